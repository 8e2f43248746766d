// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Guards against module contributions that try to mount outside their
//! own tree via `..` segments or symlinks pointing at sensitive roots.

use std::{
    fs,
    path::{Path, PathBuf},
};

const MAX_SYMLINK_DEPTH: u32 = 20;

const FORBIDDEN_ABSOLUTE_PREFIXES: &[&str] = &["/data/", "/dev/", "/proc/", "/sys/"];

/// Resolves `candidate` and confirms it still lives under `root` once `.`
/// and `..` components are collapsed, without requiring the path to exist.
pub fn is_safe_path(root: &Path, candidate: &Path) -> bool {
    let Some(resolved) = lexically_normalize(candidate) else {
        return false;
    };

    let Some(root_norm) = lexically_normalize(root) else {
        return false;
    };

    resolved.starts_with(&root_norm)
}

fn lexically_normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();

    for component in path.components() {
        use std::path::Component;

        match component {
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }

    Some(out)
}

/// Chases a symlink chain up to [`MAX_SYMLINK_DEPTH`] hops, rejecting any
/// link (direct or transitive) that resolves to an absolute path under one
/// of the [`FORBIDDEN_ABSOLUTE_PREFIXES`].
pub fn is_safe_symlink(link: &Path) -> bool {
    let mut current = link.to_path_buf();

    for _ in 0..MAX_SYMLINK_DEPTH {
        let Ok(target) = fs::read_link(&current) else {
            return true;
        };

        if target.is_absolute() {
            let target_str = target.to_string_lossy();
            if FORBIDDEN_ABSOLUTE_PREFIXES
                .iter()
                .any(|prefix| target_str.starts_with(prefix))
            {
                return false;
            }
            current = target;
        } else {
            let parent = current.parent().unwrap_or(Path::new("/")).to_path_buf();
            current = parent.join(target);
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_parent_dir_escape() {
        let root = Path::new("/data/adb/modules/foo");
        let escape = Path::new("/data/adb/modules/foo/../../../etc/passwd");

        assert!(!is_safe_path(root, escape));
    }

    #[test]
    fn accepts_path_within_root() {
        let root = Path::new("/data/adb/modules/foo");
        let inside = Path::new("/data/adb/modules/foo/system/bin/sh");

        assert!(is_safe_path(root, inside));
    }

    #[test]
    fn rejects_symlink_into_data() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("evil");

        std::os::unix::fs::symlink("/data/secret", &link).unwrap();

        assert!(!is_safe_symlink(&link));
    }

    #[test]
    fn accepts_non_symlink() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain");
        fs::write(&plain, b"x").unwrap();

        assert!(is_safe_symlink(&plain));
    }
}
