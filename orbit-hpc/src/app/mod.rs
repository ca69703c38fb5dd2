// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod dispatch;
pub mod errors;
pub mod job;
pub mod kill;
pub mod overlay;
pub mod poller;
pub mod ports;
pub mod registry;
pub mod services;
pub mod submission;
pub mod timer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
