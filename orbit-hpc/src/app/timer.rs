// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Mutex;

use time::{Duration, OffsetDateTime};

use crate::app::ports::JobTimer;

#[derive(Debug, Default, Clone, Copy)]
struct PhaseEntry {
    open: Option<OffsetDateTime>,
    total: Duration,
}

/// Accumulating phase timer. Restarting a phase after stopping it adds a new
/// interval; nothing already accumulated is rewritten.
#[derive(Debug, Default)]
pub struct PhaseTimer {
    phases: Mutex<HashMap<String, PhaseEntry>>,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobTimer for PhaseTimer {
    fn start(&self, phase: &str, at: OffsetDateTime) {
        let mut phases = self.phases.lock().unwrap_or_else(|p| p.into_inner());
        phases.entry(phase.to_string()).or_default().open = Some(at);
    }

    fn stop(&self, phase: &str, at: OffsetDateTime) {
        let mut phases = self.phases.lock().unwrap_or_else(|p| p.into_inner());
        let Some(entry) = phases.get_mut(phase) else {
            return;
        };
        if let Some(start) = entry.open.take() {
            let elapsed = at - start;
            if elapsed.is_positive() {
                entry.total += elapsed;
            }
        }
    }

    fn started_at(&self, phase: &str) -> Option<OffsetDateTime> {
        let phases = self.phases.lock().unwrap_or_else(|p| p.into_inner());
        phases.get(phase).and_then(|entry| entry.open)
    }

    fn total(&self, phase: &str) -> Duration {
        let phases = self.phases.lock().unwrap_or_else(|p| p.into_inner());
        phases
            .get(phase)
            .map(|entry| entry.total)
            .unwrap_or(Duration::ZERO)
    }
}
