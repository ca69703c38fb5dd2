// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::app::job::HpcJob;
use crate::app::ports::LocalJob;

/// All jobs seen during the run, keyed by local job identity.
///
/// Entries are never removed; they feed final statistics and the shutdown
/// sweep. The lock only guards insertion and lookup.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Arc<HpcJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Arc<HpcJob>> {
        self.jobs.lock().await.get(key).cloned()
    }

    /// Returns the existing record or inserts a new one. First caller wins.
    pub async fn get_or_insert(&self, local: &Arc<dyn LocalJob>) -> Arc<HpcJob> {
        let mut jobs = self.jobs.lock().await;
        jobs.entry(local.key().to_string())
            .or_insert_with(|| Arc::new(HpcJob::new(Arc::clone(local))))
            .clone()
    }

    /// Plain copy of all records so callers can do I/O without the lock.
    pub async fn snapshot(&self) -> Vec<Arc<HpcJob>> {
        self.jobs.lock().await.values().cloned().collect()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<HpcJob>>> {
        self.jobs.lock().await
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}
