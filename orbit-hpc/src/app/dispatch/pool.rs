// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Mutex;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::app::errors::{AppResult, internal};
use crate::app::types::ExecCategory;

use super::session_cache::WorkerId;

/// Fixed set of workers for one operation category.
/// A lease is both a concurrency slot and a worker identity.
pub struct WorkerPool {
    category: ExecCategory,
    size: usize,
    slots: Semaphore,
    idle: Mutex<Vec<usize>>,
}

pub struct WorkerLease<'a> {
    pool: &'a WorkerPool,
    index: usize,
    _permit: SemaphorePermit<'a>,
}

impl WorkerPool {
    pub fn new(category: ExecCategory, size: usize) -> Self {
        let size = size.max(1);
        Self {
            category,
            size,
            slots: Semaphore::new(size),
            idle: Mutex::new((0..size).rev().collect()),
        }
    }

    pub fn category(&self) -> ExecCategory {
        self.category
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn acquire(&self) -> AppResult<WorkerLease<'_>> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| internal(format!("{} pool closed", self.category)))?;
        let index = self
            .idle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop()
            .ok_or_else(|| internal(format!("{} pool has no idle worker", self.category)))?;
        Ok(WorkerLease {
            pool: self,
            index,
            _permit: permit,
        })
    }
}

impl WorkerLease<'_> {
    pub fn worker(&self) -> WorkerId {
        WorkerId {
            category: self.pool.category,
            index: self.index,
        }
    }
}

impl Drop for WorkerLease<'_> {
    fn drop(&mut self) {
        self.pool
            .idle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(self.index);
    }
}
