// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bind-mount primitive shared by the materialiser and orchestrator. Tries
//! the modern `open_tree`/`move_mount` pair first, since it avoids the
//! global mount namespace lookup `mount(2)` does on the target, and falls
//! back to the classic `MS_BIND`/`MS_REC` call on kernels that lack it.

use std::{path::Path, thread, time::Duration};

use anyhow::{Context, Result};
use rustix::{
    fd::AsFd,
    mount::{MountFlags, OpenTreeFlags, mount, move_mount, open_tree},
};

const RETRY_BACKOFF_MS: u64 = 100;
const MAX_RETRIES: u32 = 3;

/// Binds `source` onto `target`, preferring the modern `open_tree`+`move_mount`
/// path and falling back to a legacy `mount(2)` bind on failure (e.g.
/// missing kernel support). Converts syscall errors into a logged warning
/// plus a boolean result so a single failed leaf never aborts a partition.
pub fn bind(source: &Path, target: &Path, recursive: bool) -> bool {
    match bind_modern(source, target, recursive) {
        Ok(()) => true,
        Err(modern_err) => match bind_legacy(source, target, recursive) {
            Ok(()) => true,
            Err(legacy_err) => {
                log::warn!(
                    "bind mount failed for {} -> {}: modern={:#}, legacy={:#}",
                    source.display(),
                    target.display(),
                    modern_err,
                    legacy_err
                );
                false
            }
        },
    }
}

fn bind_modern(source: &Path, target: &Path, recursive: bool) -> Result<()> {
    let mut flags = OpenTreeFlags::OPEN_TREE_CLOEXEC;
    if recursive {
        flags |= OpenTreeFlags::AT_RECURSIVE;
    }

    let tree = open_tree(rustix::fs::CWD, source, flags)
        .with_context(|| format!("open_tree failed for {}", source.display()))?;

    move_mount(
        tree.as_fd(),
        "",
        rustix::fs::CWD,
        target,
        rustix::mount::MoveMountFlags::MOVE_MOUNT_F_EMPTY_PATH,
    )
    .with_context(|| format!("move_mount failed for {}", target.display()))?;

    Ok(())
}

fn bind_legacy(source: &Path, target: &Path, recursive: bool) -> Result<()> {
    let mut flags = MountFlags::BIND;
    if recursive {
        flags |= MountFlags::REC;
    }

    mount(source, target, "", flags, None).with_context(|| {
        format!(
            "legacy bind mount failed: {} -> {}",
            source.display(),
            target.display()
        )
    })
}

/// Re-invokes a raw `mount(2)` (e.g. tmpfs creation) up to three times with
/// a `100ms * attempt` linear backoff, to absorb the transient `EBUSY` that
/// shows up when something else is racing an unmount on the same path
/// during boot.
pub fn mount_with_retry(
    source: &str,
    target: &Path,
    fstype: &str,
    flags: MountFlags,
    data: Option<&str>,
) -> Result<()> {
    retry_with_backoff(target, |attempt| {
        let _ = attempt;
        mount(source, target, fstype, flags, data)
    })
}

/// The retry/backoff loop itself, parameterized over the fallible mount
/// call so it can be exercised with a fault injector under test without a
/// real `CAP_SYS_ADMIN` mount syscall.
fn retry_with_backoff<E: std::fmt::Display>(
    target: &Path,
    mut attempt_mount: impl FnMut(u32) -> Result<(), E>,
) -> Result<()> {
    let mut last_err = None;

    for attempt in 1..=MAX_RETRIES {
        match attempt_mount(attempt) {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::debug!(
                    "mount attempt {}/{} failed for {}: {}",
                    attempt,
                    MAX_RETRIES,
                    target.display(),
                    e
                );
                last_err = Some(e.to_string());
                thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt)));
            }
        }
    }

    Err(anyhow::anyhow!(
        "mount failed after {} attempts: {}",
        MAX_RETRIES,
        last_err.unwrap_or_else(|| "no recorded error".to_string())
    ))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn bind_reports_failure_for_nonexistent_source() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();

        assert!(!bind(&missing, &target, true));
    }

    #[test]
    fn retry_succeeds_after_a_transient_failure() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("scratch");
        std::fs::create_dir(&target).unwrap();

        let mut calls = 0u32;
        let result = retry_with_backoff(&target, |_attempt| {
            calls += 1;
            if calls == 1 {
                Err("EBUSY")
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_gives_up_after_max_retries() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("scratch");
        std::fs::create_dir(&target).unwrap();

        let mut calls = 0u32;
        let result = retry_with_backoff(&target, |_attempt| {
            calls += 1;
            Err::<(), _>("EBUSY")
        });

        assert!(result.is_err());
        assert_eq!(calls, MAX_RETRIES);
    }
}
