// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! JSON status exporters consumed by an external status UI. Pure functions
//! over already-collected data; none of them touch the mount table or issue
//! syscalls beyond the handful of `/proc`/`/sys` reads needed for system
//! info.

use std::path::Path;

use serde_json::{Value, json};

use crate::{core::stats::MountStatistics, mount::partitions::PartitionInfo};

pub fn export_mount_stats_json(stats: &MountStatistics) -> Value {
    serde_json::to_value(stats.snapshot()).unwrap_or(Value::Null)
}

pub fn export_partitions_json(partitions: &[PartitionInfo]) -> Value {
    serde_json::to_value(partitions).unwrap_or(Value::Null)
}

pub fn export_system_info_json(
    stats: &MountStatistics,
    partitions: &[PartitionInfo],
    mount_base: &Path,
) -> Value {
    json!({
        "kernel_version": kernel_version(),
        "selinux_status": selinux_status(),
        "mount_base": mount_base,
        "stats": export_mount_stats_json(stats),
        "partitions": export_partitions_json(partitions),
    })
}

fn kernel_version() -> String {
    let Ok(content) = std::fs::read_to_string("/proc/version") else {
        return "unknown".to_string();
    };

    content
        .split("Linux version ")
        .nth(1)
        .and_then(|rest| rest.split(' ').next())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

fn selinux_status() -> &'static str {
    match std::fs::read_to_string("/sys/fs/selinux/enforce") {
        Ok(content) if content.trim() == "0" => "Permissive",
        Ok(_) => "Enforcing",
        Err(_) => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_stats_json_carries_success_rate() {
        let stats = MountStatistics::default();
        stats.record_total();
        stats.record_successful();

        let value = export_mount_stats_json(&stats);
        assert_eq!(value["success_rate"], 100.0);
    }

    #[test]
    fn system_info_embeds_stats_and_partitions() {
        let stats = MountStatistics::default();
        let partitions: Vec<PartitionInfo> = Vec::new();

        let value = export_system_info_json(&stats, &partitions, Path::new("/data/adb/meta-hybrid"));
        assert!(value["kernel_version"].is_string());
        assert!(value["partitions"].is_array());
    }
}
