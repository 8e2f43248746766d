// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Discovers which read-only partitions are actually mounted on this
//! device by reading `/proc/mounts` directly, rather than trusting a
//! static list — OEMs routinely add their own (`my_product`, `mi_ext`,
//! `oem`, ...) on top of the AOSP set.

use std::{
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::defs;

const SKIP_MOUNTS: &[&str] = &[
    "proc",
    "sys",
    "dev",
    "data",
    "cache",
    "metadata",
    "mnt",
    "storage",
    "apex",
    "linkerconfig",
    "sdcard",
    "debug_ramdisk",
    "second_stage_resources",
];

#[derive(Debug, Clone, Serialize)]
pub struct PartitionInfo {
    pub name: String,
    pub mount_point: String,
    pub fs_type: String,
    pub read_only: bool,
    pub exists_as_symlink_under_system: bool,
}

struct MountLine {
    mount_point: String,
    fs_type: String,
    read_only: bool,
}

fn parse_mount_line(line: &str) -> Option<MountLine> {
    let mut fields = line.split_whitespace();
    let _device = fields.next()?;
    let mount_point = fields.next()?.to_string();
    let fs_type = fields.next()?.to_string();
    let options = fields.next()?;

    if !mount_point.starts_with('/') {
        return None;
    }

    // Only single-component mount points directly under `/` are partition
    // roots (`/vendor`, not `/vendor/odm` or `/data/adb/...`).
    let trimmed = mount_point.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') {
        return None;
    }

    let read_only = options.split(',').any(|opt| opt == "ro");

    Some(MountLine {
        mount_point,
        fs_type,
        read_only,
    })
}

/// Parses `/proc/mounts` and returns every top-level, read-only partition
/// mount point that isn't a pseudo-filesystem or bind-mounted data path.
pub fn detect_partitions() -> Result<Vec<PartitionInfo>> {
    let content = fs::read_to_string("/proc/mounts").context("Failed to read /proc/mounts")?;

    let mut partitions = Vec::new();

    for line in content.lines() {
        let Some(parsed) = parse_mount_line(line) else {
            continue;
        };

        let name = parsed.mount_point.trim_start_matches('/').to_string();

        if SKIP_MOUNTS.contains(&name.as_str()) {
            continue;
        }

        let exists_as_symlink_under_system = Path::new("/system")
            .join(&name)
            .symlink_metadata()
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);

        partitions.push(PartitionInfo {
            name,
            mount_point: parsed.mount_point,
            fs_type: parsed.fs_type,
            read_only: parsed.read_only,
            exists_as_symlink_under_system,
        });
    }

    Ok(partitions)
}

/// Splits a full partition list into the AOSP-standard set and whatever
/// the device added on top, so callers can treat the two differently
/// (e.g. logging extras at a louder level).
pub fn get_extra_partitions(all: &[PartitionInfo]) -> Vec<PartitionInfo> {
    all.iter()
        .filter(|p| !defs::BUILTIN_PARTITIONS.contains(&p.name.as_str()))
        .cloned()
        .collect()
}

pub fn is_partition_mount_point(name: &str, detected: &[PartitionInfo]) -> bool {
    detected.iter().any(|p| p.name == name)
}

const MIN_TMPFS_SIZE: u64 = 32 * 1024 * 1024;
const MAX_TMPFS_SIZE: u64 = 512 * 1024 * 1024;

/// Sizes the tmpfs scratch root at `min(free_ram/10, 512MiB)`, clamped so
/// it never exceeds a quarter of the partition it's standing in for, and
/// floored at 32MiB so a nearly-full device doesn't get an unusable mount.
pub fn get_optimal_tmpfs_size(partition: &Path) -> Result<u64> {
    let free_ram = free_ram_bytes()?;
    let mut size = std::cmp::min(free_ram / 10, MAX_TMPFS_SIZE);

    if let Ok(stat) = rustix::fs::statvfs(partition) {
        let partition_size = stat.f_blocks * stat.f_frsize;
        size = std::cmp::min(size, partition_size / 4);
    }

    Ok(std::cmp::max(size, MIN_TMPFS_SIZE))
}

fn free_ram_bytes() -> Result<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").context("Failed to read /proc/meminfo")?;

    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches(" kB")
                .trim()
                .parse()
                .context("Failed to parse MemAvailable")?;
            return Ok(kb * 1024);
        }
    }

    anyhow::bail!("MemAvailable not present in /proc/meminfo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_standard_system_line() {
        let line = "/dev/block/dm-1 /system ext4 ro,seclabel,relatime 0 0";
        let parsed = parse_mount_line(line).unwrap();

        assert_eq!(parsed.mount_point, "/system");
        assert_eq!(parsed.fs_type, "ext4");
        assert!(parsed.read_only);
    }

    #[test]
    fn rejects_nested_mount_points() {
        let line = "/dev/block/dm-1 /data/adb/modules ext4 rw,seclabel 0 0";
        assert!(parse_mount_line(line).is_none());
    }

    #[test]
    fn accepts_rw_mount_but_marks_it() {
        let line = "tmpfs /mi_ext tmpfs rw,seclabel 0 0";
        let parsed = parse_mount_line(line).unwrap();
        assert!(!parsed.read_only);
    }

    #[test]
    fn extras_excludes_standard_partitions() {
        let all = vec![
            PartitionInfo {
                name: "system".into(),
                mount_point: "/system".into(),
                fs_type: "erofs".into(),
                read_only: true,
                exists_as_symlink_under_system: false,
            },
            PartitionInfo {
                name: "my_product".into(),
                mount_point: "/my_product".into(),
                fs_type: "erofs".into(),
                read_only: true,
                exists_as_symlink_under_system: false,
            },
        ];

        let extras = get_extra_partitions(&all);
        assert_eq!(extras.len(), 1);
        assert_eq!(extras[0].name, "my_product");
    }
}
