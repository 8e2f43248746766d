// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Attribute cloning for freshly materialised tmpfs nodes.
//!
//! A bind mount shares the source inode's attributes for free. A directory
//! or symlink created directly on the tmpfs scratch root to host further
//! bind mounts does not: it starts out owned by the daemon, with the
//! daemon's umask and no SELinux context. This module makes such a node
//! indistinguishable from the original partition entry it stands in for.

use std::path::Path;

use anyhow::Result;

use crate::utils::fs::clone_attr;

/// Copies ownership, permission bits, timestamps, SELinux context and any
/// other xattrs from `source` onto `target`. Call this immediately after
/// creating a placeholder directory or symlink on the tmpfs scratch root,
/// before anything is bind-mounted over or under it.
pub fn clone_attributes(source: &Path, target: &Path) -> Result<()> {
    clone_attr(source, target)
}
