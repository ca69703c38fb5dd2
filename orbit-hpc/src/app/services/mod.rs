// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod managers;
pub mod pbs;
pub mod shell;
pub mod slurm;
pub mod templates;
pub mod terminator;
