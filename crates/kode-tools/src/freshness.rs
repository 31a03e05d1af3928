// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The File-Freshness Registry: detects when a file an edit-class tool is
//! about to touch has changed on disk since this process last read it,
//! distinguishing the agent's own recent write from an external edit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Tolerance absorbing same-instant writes the agent itself just made.
pub const FRESHNESS_EPSILON: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct FileTimestamp {
    last_read_at: SystemTime,
    last_modified_at_read: SystemTime,
    size: u64,
    last_agent_edit_at: Option<SystemTime>,
}

/// Result of [`FreshnessRegistry::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessStatus {
    pub fresh: bool,
    pub conflict: bool,
}

#[derive(Default)]
pub struct FreshnessRegistry {
    records: Mutex<HashMap<PathBuf, FileTimestamp>>,
}

impl FreshnessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful read: stat the path, store its mtime and size.
    pub fn record_read(&self, path: &Path) -> std::io::Result<()> {
        let meta = std::fs::metadata(path)?;
        let mut records = self.records.lock().expect("freshness registry poisoned");
        records.insert(
            path.to_path_buf(),
            FileTimestamp {
                last_read_at: SystemTime::now(),
                last_modified_at_read: meta.modified()?,
                size: meta.len(),
                last_agent_edit_at: None,
            },
        );
        Ok(())
    }

    /// Record a successful agent-initiated write: stat after the write,
    /// clear any prior conflict by refreshing the stored mtime.
    pub fn record_edit(&self, path: &Path) -> std::io::Result<()> {
        let meta = std::fs::metadata(path)?;
        let now = SystemTime::now();
        let mut records = self.records.lock().expect("freshness registry poisoned");
        records.insert(
            path.to_path_buf(),
            FileTimestamp {
                last_read_at: now,
                last_modified_at_read: meta.modified()?,
                size: meta.len(),
                last_agent_edit_at: Some(now),
            },
        );
        Ok(())
    }

    /// Check whether `path` is still fresh w.r.t. the last recorded read.
    pub fn check(&self, path: &Path) -> FreshnessStatus {
        let records = self.records.lock().expect("freshness registry poisoned");
        let Some(record) = records.get(path) else {
            return FreshnessStatus { fresh: true, conflict: false };
        };

        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => return FreshnessStatus { fresh: false, conflict: true },
        };
        let current_mtime = match meta.modified() {
            Ok(m) => m,
            Err(_) => return FreshnessStatus { fresh: false, conflict: true },
        };

        let within_epsilon = current_mtime
            .duration_since(record.last_modified_at_read)
            .map(|d| d <= FRESHNESS_EPSILON)
            .unwrap_or(true); // current_mtime <= stored: definitely fresh

        let agent_edit_covers_it = record
            .last_agent_edit_at
            .map(|edit_at| {
                // last_agent_edit_at >= current_mtime - epsilon
                current_mtime
                    .checked_sub(FRESHNESS_EPSILON)
                    .map(|floor| edit_at >= floor)
                    .unwrap_or(true)
            })
            .unwrap_or(false);

        let fresh = within_epsilon || agent_edit_covers_it;
        FreshnessStatus { fresh, conflict: !fresh }
    }

    /// Discard every record. Called on session reset.
    pub fn clear(&self) {
        self.records.lock().expect("freshness registry poisoned").clear();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
