// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process-wide mount statistics. The counters are atomics rather than a
//! mutex-guarded struct because the orchestrator today runs single-threaded,
//! but inventory scanning already uses `rayon`, and a future parallel
//! orchestrator should not need to revisit this module.

use std::sync::{
    OnceLock,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{defs, utils::atomic_write};

#[derive(Default)]
pub struct MountStatistics {
    total_mounts: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    tmpfs_created: AtomicU64,
    files_mounted: AtomicU64,
    dirs_mounted: AtomicU64,
    symlinks_created: AtomicU64,
    overlay_mounts: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct MountStatisticsSnapshot {
    pub total_mounts: u64,
    pub successful: u64,
    pub failed: u64,
    pub tmpfs_created: u64,
    pub files_mounted: u64,
    pub dirs_mounted: u64,
    pub symlinks_created: u64,
    pub overlay_mounts: u64,
    pub success_rate: f64,
}

impl MountStatistics {
    pub fn record_total(&self) {
        self.total_mounts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_successful(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tmpfs_created(&self) {
        self.tmpfs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_mounted(&self) {
        self.files_mounted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dir_mounted(&self) {
        self.dirs_mounted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_symlink_created(&self) {
        self.symlinks_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumped when the orchestrator delegates a partition to the
    /// out-of-scope overlay backend instead of the magic-mount engine.
    pub fn increment_overlay_stats(&self) {
        self.overlay_mounts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_mounts.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.successful.load(Ordering::Relaxed) as f64 / total as f64) * 100.0
    }

    pub fn snapshot(&self) -> MountStatisticsSnapshot {
        MountStatisticsSnapshot {
            total_mounts: self.total_mounts.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            tmpfs_created: self.tmpfs_created.load(Ordering::Relaxed),
            files_mounted: self.files_mounted.load(Ordering::Relaxed),
            dirs_mounted: self.dirs_mounted.load(Ordering::Relaxed),
            symlinks_created: self.symlinks_created.load(Ordering::Relaxed),
            overlay_mounts: self.overlay_mounts.load(Ordering::Relaxed),
            success_rate: self.success_rate(),
        }
    }

    pub fn reset(&self) {
        self.total_mounts.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.tmpfs_created.store(0, Ordering::Relaxed);
        self.files_mounted.store(0, Ordering::Relaxed);
        self.dirs_mounted.store(0, Ordering::Relaxed);
        self.symlinks_created.store(0, Ordering::Relaxed);
        self.overlay_mounts.store(0, Ordering::Relaxed);
    }
}

static STATS: OnceLock<MountStatistics> = OnceLock::new();

/// The single process-wide statistics record.
pub fn global() -> &'static MountStatistics {
    STATS.get_or_init(MountStatistics::default)
}

pub fn save_mount_statistics() -> Result<()> {
    let json =
        serde_json::to_string_pretty(&global().snapshot()).context("failed to serialize stats")?;
    atomic_write(defs::STATS_FILE, json).context("failed to write stats file")
}

pub fn reset_mount_statistics() {
    global().reset();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_zero_with_no_mounts() {
        let stats = MountStatistics::default();
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn success_rate_reflects_ratio() {
        let stats = MountStatistics::default();
        for _ in 0..4 {
            stats.record_total();
        }
        for _ in 0..3 {
            stats.record_successful();
        }
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_zeroes_every_counter() {
        let stats = MountStatistics::default();
        stats.record_total();
        stats.record_successful();
        stats.record_file_mounted();
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.total_mounts, 0);
        assert_eq!(snap.successful, 0);
        assert_eq!(snap.files_mounted, 0);
    }
}
