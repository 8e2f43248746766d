// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Scratch-root preparation ahead of the magic-mount engine. The engine
//! mounts its own per-partition tmpfs under this directory (see
//! `core::ops::executor`); this module only has to guarantee the directory
//! itself exists and report whether the kernel's tmpfs honours xattrs, since
//! the Attribute Cloner degrades without them.
//!
//! The teacher's overlay/ext4/erofs image-packing backends (`StorageHandle`
//! carrying a `backing_image`, `setup_ext4_image`, `create_erofs_image`,
//! `mount_erofs_image`) are out of scope here: this spec only implements the
//! magic-mount strategy, and those backends are reachable only via the
//! `mode` dispatch tag on a module, which the engine never follows itself.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::utils::{self, ensure_dir_exists};

pub struct StorageHandle {
    pub mount_point: PathBuf,
    pub tmpfs_xattr_supported: bool,
}

pub fn setup(tempdir: &Path) -> Result<StorageHandle> {
    ensure_dir_exists(tempdir)
        .with_context(|| format!("failed to create scratch root {}", tempdir.display()))?;

    let tmpfs_xattr_supported = utils::is_overlay_xattr_supported().unwrap_or(false);

    if !tmpfs_xattr_supported {
        log::warn!("tmpfs on this device does not support xattrs; SELinux labels on materialised nodes will be lost");
    }

    Ok(StorageHandle {
        mount_point: tempdir.to_path_buf(),
        tmpfs_xattr_supported,
    })
}
