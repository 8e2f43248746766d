// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mount orchestrator: for each target partition, allocates a tmpfs scratch
//! root, asks the planner and materialiser to fill it in, executes the
//! staged bind mounts in dependency order, then bind-mounts the scratch
//! root onto the live partition path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rustix::mount::{MountFlags, UnmountFlags, unmount};

use crate::{
    core::{
        inventory::Module,
        ops::{
            materializer::{self, OpKind},
            planner,
        },
        stats,
    },
    defs,
    mount::{
        bind::{bind, mount_with_retry},
        partitions::{get_optimal_tmpfs_size, is_partition_mount_point},
        umount_mgr::send_umountable,
    },
};

/// Runs the magic-mount engine over the AOSP-standard partitions plus
/// whatever extras the caller supplies, skipping any that aren't actually
/// mounted on this device. Returns `true` iff at least one partition ended
/// up successfully mounted.
pub fn mount_partitions(
    tmp_root: &Path,
    modules: &[Module],
    mount_source: &str,
    extra_partitions: &[String],
    disable_umount: bool,
) -> Result<bool> {
    let candidates: Vec<&str> = defs::BUILTIN_PARTITIONS
        .iter()
        .copied()
        .chain(extra_partitions.iter().map(String::as_str))
        .collect();

    let mut any_success = false;

    for partition in candidates {
        let live = PathBuf::from("/").join(partition);

        if !live.is_dir() {
            continue;
        }

        match mount_one_partition(tmp_root, partition, &live, modules, mount_source, disable_umount)
        {
            Ok(mounted) => any_success |= mounted,
            Err(e) => {
                log::error!("partition {} pipeline failed: {:#}", partition, e);
                stats::global().record_failed();
            }
        }
    }

    Ok(any_success)
}

/// Calls the partition detector first to pick up OEM-added partitions
/// before delegating to [`mount_partitions`].
pub fn mount_partitions_auto(
    tmp_root: &Path,
    modules: &[Module],
    mount_source: &str,
    configured_extra: &[String],
    disable_umount: bool,
) -> Result<bool> {
    let detected = crate::mount::partitions::detect_partitions().unwrap_or_default();
    let mut extras: Vec<String> = crate::mount::partitions::get_extra_partitions(&detected)
        .into_iter()
        .map(|p| p.name)
        .collect();

    for name in configured_extra {
        if !extras.contains(name) {
            extras.push(name.clone());
        }
    }

    mount_partitions(tmp_root, modules, mount_source, &extras, disable_umount)
}

/// The seven-step per-partition pipeline. Returns `Ok(true)` iff the
/// partition's final bind onto its live path succeeded.
fn mount_one_partition(
    tmp_root: &Path,
    partition: &str,
    live: &Path,
    modules: &[Module],
    mount_source: &str,
    disable_umount: bool,
) -> Result<bool> {
    if !is_partition_mount_point(partition, &crate::mount::partitions::detect_partitions().unwrap_or_default())
        && !defs::BUILTIN_PARTITIONS.contains(&partition)
    {
        return Ok(false);
    }

    let scratch = tmp_root.join(partition);
    crate::utils::ensure_dir_exists(&scratch)
        .with_context(|| format!("failed to create scratch dir {}", scratch.display()))?;

    let size = get_optimal_tmpfs_size(live).unwrap_or(32 * 1024 * 1024);
    let size_opt = format!("size={}", size);

    stats::global().record_total();

    if let Err(e) = mount_with_retry(
        mount_source,
        &scratch,
        "tmpfs",
        MountFlags::empty(),
        Some(size_opt.as_str()),
    ) {
        log::error!(
            "failed to mount tmpfs scratch for {}: {:#}",
            partition,
            e
        );
        stats::global().record_failed();
        return Ok(false);
    }
    stats::global().record_tmpfs_created();

    // `Auto` resolves to the magic-mount engine: the overlay/hymofs backends
    // are out-of-scope stub dispatch points, so the only implemented
    // strategy is the one `Auto` should fall back to.
    let magic_modules: Vec<&Module> = modules
        .iter()
        .filter(|m| {
            matches!(
                m.rules.default_mode,
                crate::conf::config::MountMode::Magic | crate::conf::config::MountMode::Auto
            )
        })
        .collect();

    let Some(trie) = planner::plan_partition(partition, live, &magic_modules) else {
        let _ = unmount(&scratch, UnmountFlags::DETACH);
        let _ = std::fs::remove_dir(&scratch);
        return Ok(false);
    };

    let staged_ops = materializer::materialize(&trie, &scratch);

    for op in &staged_ops {
        if bind(&op.source, &op.target, op.recursive) {
            match op.kind {
                OpKind::File => stats::global().record_file_mounted(),
                OpKind::Dir => stats::global().record_dir_mounted(),
                OpKind::Symlink => stats::global().record_symlink_created(),
            }
        } else {
            stats::global().record_failed();
        }
    }

    if bind(&scratch, live, true) {
        stats::global().record_successful();

        if !disable_umount {
            let _ = send_umountable(live);
            let _ = unmount(&scratch, UnmountFlags::DETACH);
            let _ = std::fs::remove_dir(&scratch);
        } else {
            log::warn!(
                "umount disabled: leaving {} mounted for debugging",
                scratch.display()
            );
        }

        Ok(true)
    } else {
        log::error!(
            "final bind {} -> {} failed",
            scratch.display(),
            live.display()
        );
        stats::global().record_failed();
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_list_includes_extras() {
        let extras = vec!["my_product".to_string()];
        let candidates: Vec<&str> = defs::BUILTIN_PARTITIONS
            .iter()
            .copied()
            .chain(extras.iter().map(String::as_str))
            .collect();

        assert!(candidates.contains(&"my_product"));
        assert!(candidates.contains(&"system"));
    }
}
