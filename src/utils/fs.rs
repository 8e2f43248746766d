// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::Path,
    time::{Duration, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use rustix::fs::{Mode, XattrFlags, lgetxattr, llistxattr, lsetxattr};

pub const SELINUX_XATTR: &str = "security.selinux";

pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
    }
    Ok(())
}

pub fn atomic_write<P: AsRef<Path>>(path: P, content: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");

    fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to rename {} to {}", tmp.display(), path.display()))?;

    Ok(())
}

/// Best-effort SELinux context getter. Returns `None` when the filesystem
/// carries no xattr support or the attribute is absent.
pub fn lgetfilecon<P: AsRef<Path>>(path: P) -> Option<String> {
    let mut buf = vec![0u8; 256];
    match lgetxattr(path.as_ref(), SELINUX_XATTR, &mut buf) {
        Ok(len) => Some(String::from_utf8_lossy(&buf[..len]).trim_end_matches('\0').to_string()),
        Err(_) => None,
    }
}

pub fn lsetfilecon<P: AsRef<Path>>(path: P, context: &str) -> Result<()> {
    lsetxattr(
        path.as_ref(),
        SELINUX_XATTR,
        context.as_bytes(),
        XattrFlags::empty(),
    )
    .with_context(|| format!("Failed to set SELinux context on {}", path.as_ref().display()))
}

/// Probes whether the tmpfs scratch root honours `security.*`/`trusted.*`
/// xattrs (CONFIG_TMPFS_XATTR). Without this the overlay-opaque marker and
/// SELinux contexts cannot be cloned onto materialised nodes.
pub fn is_overlay_xattr_supported() -> Result<bool> {
    let probe = std::env::temp_dir().join(format!(".hybrid_xattr_probe_{}", std::process::id()));
    fs::write(&probe, b"")?;

    let result = lsetxattr(&probe, "trusted.overlay.probe", b"1", XattrFlags::empty()).is_ok();

    let _ = fs::remove_file(&probe);
    Ok(result)
}

/// Clones ownership, mode, mtime, SELinux context and the remaining xattr
/// set from `source` onto `target`, without following symlinks. Mirrors
/// what the kernel's own bind mount would otherwise leave untouched, since
/// a bind mount shares the inode and copies none of this by itself, but a
/// freshly materialised tmpfs node starts out owned by the daemon.
pub fn clone_attr(source: &Path, target: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(source)
        .with_context(|| format!("Failed to stat {}", source.display()))?;

    if let Err(e) = rustix::fs::chownat(
        rustix::fs::CWD,
        target,
        Some(rustix::fs::Uid::from_raw(meta.uid())),
        Some(rustix::fs::Gid::from_raw(meta.gid())),
        rustix::fs::AtFlags::SYMLINK_NOFOLLOW,
    ) {
        log::warn!("Failed to chown {}: {:#}", target.display(), e);
    }

    if !meta.file_type().is_symlink()
        && let Err(e) = fs::set_permissions(target, fs::Permissions::from_mode(meta.mode()))
    {
        log::warn!("Failed to chmod {}: {:#}", target.display(), e);
    }

    let atime = Duration::from_secs(meta.atime().max(0) as u64);
    let mtime = Duration::from_secs(meta.mtime().max(0) as u64);

    let _ = rustix::fs::utimensat(
        rustix::fs::CWD,
        target,
        &rustix::fs::Timestamps {
            last_access: rustix::fs::Timespec {
                tv_sec: (UNIX_EPOCH + atime).duration_since(UNIX_EPOCH)?.as_secs() as i64,
                tv_nsec: 0,
            },
            last_modification: rustix::fs::Timespec {
                tv_sec: (UNIX_EPOCH + mtime).duration_since(UNIX_EPOCH)?.as_secs() as i64,
                tv_nsec: 0,
            },
        },
        rustix::fs::AtFlags::SYMLINK_NOFOLLOW,
    );

    if let Some(ctx) = lgetfilecon(source) {
        let _ = lsetxattr(target, SELINUX_XATTR, ctx.as_bytes(), XattrFlags::empty());
    }

    clone_other_xattrs(source, target);

    Ok(())
}

fn clone_other_xattrs(source: &Path, target: &Path) {
    let mut names_buf = vec![0u8; 1024];
    let Ok(len) = llistxattr(source, &mut names_buf) else {
        return;
    };

    for name in names_buf[..len].split(|b| *b == 0) {
        if name.is_empty() {
            continue;
        }
        let Ok(name) = std::str::from_utf8(name) else {
            continue;
        };
        if name == SELINUX_XATTR {
            continue;
        }

        let mut value_buf = vec![0u8; 1024];
        if let Ok(vlen) = lgetxattr(source, name, &mut value_buf) {
            let _ = lsetxattr(target, name, &value_buf[..vlen], XattrFlags::empty());
        }
    }
}

#[allow(dead_code)]
pub const fn default_dir_mode() -> Mode {
    Mode::from_raw_mode(0o755)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        atomic_write(&path, "{}").unwrap();
        atomic_write(&path, "{\"a\":1}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn ensure_dir_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");

        ensure_dir_exists(&nested).unwrap();
        ensure_dir_exists(&nested).unwrap();

        assert!(nested.is_dir());
    }

    #[test]
    fn clone_attr_copies_mode_and_ownership() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");

        fs::write(&source, b"hello").unwrap();
        fs::write(&target, b"").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o640)).unwrap();

        clone_attr(&source, &target).unwrap();

        let meta = fs::metadata(&target).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
    }
}
