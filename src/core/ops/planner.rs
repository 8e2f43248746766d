// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Merge planner: walks every contributing module's tree for one partition
//! and builds a trie recording, for each path, which source wins and which
//! directories must leave the original partition and become owned tmpfs.
//!
//! The planner never touches the kernel mount table. It only reads module
//! directories and `fs::symlink_metadata` on the live partition, so it is
//! fully exercised by the `#[cfg(test)]` fixtures below without root.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{core::inventory::Module, mount::path_safety::is_safe_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File,
    Symlink,
    Whiteout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Original,
    Module(String),
}

/// A single node in the merge trie, keyed by path component in `children`.
#[derive(Debug, Clone)]
pub struct MergeNode {
    pub kind: NodeKind,
    pub origin: Origin,
    pub children: BTreeMap<String, MergeNode>,
    pub must_materialise: bool,
    pub source_path: PathBuf,
}

impl MergeNode {
    fn original_dir(source: PathBuf) -> Self {
        Self {
            kind: NodeKind::Dir,
            origin: Origin::Original,
            children: BTreeMap::new(),
            must_materialise: false,
            source_path: source,
        }
    }
}

/// Returns true iff `path` (a directory) contains, anywhere beneath it, at
/// least one regular file, symlink, or itself being such. Used both to
/// decide whether a module contributes to a partition at all, and to skip
/// module subdirectories that are present but wholly empty.
fn dir_has_content(path: &Path) -> bool {
    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if dir_has_content(&entry.path()) {
                return true;
            }
        } else {
            return true;
        }
    }

    false
}

/// Builds the merge trie for one partition from every module's `<id>/<partition>`
/// contribution, in input order. Returns `None` if no module contributes
/// anything to this partition (the caller should skip tmpfs entirely).
pub fn plan_partition(
    partition_name: &str,
    live_mount_point: &Path,
    modules: &[&Module],
) -> Option<MergeNode> {
    let mut root = MergeNode::original_dir(live_mount_point.to_path_buf());
    let mut touched = false;

    for module in modules {
        let contribution = module.source_path.join(partition_name);

        if !contribution.is_dir() || !dir_has_content(&contribution) {
            continue;
        }

        touched = true;
        walk_module_dir(
            &mut root,
            &module.id,
            &module.source_path,
            &contribution,
            live_mount_point,
        );
    }

    touched.then_some(root)
}

/// Recursively merges one module's contribution subdirectory into `node`,
/// which stands for the directory at `live_dir` in the live partition.
fn walk_module_dir(
    node: &mut MergeNode,
    module_id: &str,
    module_root: &Path,
    module_dir: &Path,
    live_dir: &Path,
) {
    let Ok(entries) = fs::read_dir(module_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let entry_path = entry.path();

        if !is_safe_path(module_root, &entry_path) {
            log::warn!(
                "module '{}': rejecting path outside its own tree: {}",
                module_id,
                entry_path.display()
            );
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        let name = entry.file_name().to_string_lossy().to_string();
        let live_child = live_dir.join(&name);

        if file_type.is_dir() {
            if !dir_has_content(&entry_path) {
                continue;
            }

            match node.children.get(&name) {
                Some(existing) if existing.kind != NodeKind::Dir => {
                    log::warn!(
                        "module '{}': '{}' conflicts with an earlier file/symlink at the same \
                         path, skipping",
                        module_id,
                        live_child.display()
                    );
                    continue;
                }
                _ => {}
            }

            let child = node.children.entry(name).or_insert_with(|| {
                MergeNode::original_dir(live_child.clone())
            });

            // First module to touch a directory supplies its attribute
            // template; later modules only contribute further descendants.
            if child.origin == Origin::Original {
                child.origin = Origin::Module(module_id.to_string());
                child.source_path = entry_path.clone();
            }

            walk_module_dir(child, module_id, module_root, &entry_path, &live_child);
            node.must_materialise = true;
        } else if file_type.is_file() || file_type.is_symlink() {
            if let Some(existing) = node.children.get(&name)
                && existing.kind == NodeKind::Dir
            {
                log::warn!(
                    "module '{}': '{}' conflicts with an earlier directory at the same path, \
                     skipping",
                    module_id,
                    live_child.display()
                );
                continue;
            }

            if let Some(existing) = node.children.get(&name) {
                log::warn!(
                    "'{}' is shadowed: module '{}' overrides earlier contribution from {:?}",
                    live_child.display(),
                    module_id,
                    existing.origin
                );
            }

            let kind = if file_type.is_symlink() {
                NodeKind::Symlink
            } else {
                NodeKind::File
            };

            node.children.insert(
                name,
                MergeNode {
                    kind,
                    origin: Origin::Module(module_id.to_string()),
                    children: BTreeMap::new(),
                    must_materialise: false,
                    source_path: entry_path,
                },
            );
            node.must_materialise = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::conf::config::ModuleRules;

    fn module(id: &str, dir: &Path) -> Module {
        Module {
            id: id.to_string(),
            source_path: dir.to_path_buf(),
            rules: ModuleRules::default(),
        }
    }

    #[test]
    fn no_contribution_yields_no_trie() {
        let live = TempDir::new().unwrap();
        let module_a = TempDir::new().unwrap();

        let m = module("a", module_a.path());
        assert!(plan_partition("system", live.path(), &[&m]).is_none());
    }

    #[test]
    fn single_file_overlay_marks_ancestors() {
        let live = TempDir::new().unwrap();
        let module_a = TempDir::new().unwrap();

        let etc = module_a.path().join("system/etc");
        fs::create_dir_all(&etc).unwrap();
        fs::write(etc.join("hosts"), b"127.0.0.1 a").unwrap();

        let m = module("a", module_a.path());
        let trie = plan_partition("system", live.path(), &[&m]).unwrap();

        assert!(trie.must_materialise);
        let etc_node = trie.children.get("etc").unwrap();
        assert!(etc_node.must_materialise);
        let hosts_node = etc_node.children.get("hosts").unwrap();
        assert_eq!(hosts_node.kind, NodeKind::File);
        assert_eq!(hosts_node.origin, Origin::Module("a".to_string()));
    }

    #[test]
    fn last_writer_wins_for_files() {
        let live = TempDir::new().unwrap();
        let module_a = TempDir::new().unwrap();
        let module_b = TempDir::new().unwrap();

        for (dir, content) in [(&module_a, "from a"), (&module_b, "from b")] {
            let etc = dir.path().join("system/etc");
            fs::create_dir_all(&etc).unwrap();
            fs::write(etc.join("hosts"), content).unwrap();
        }

        let a = module("a", module_a.path());
        let b = module("b", module_b.path());
        let trie = plan_partition("system", live.path(), &[&a, &b]).unwrap();

        let hosts_node = trie.children.get("etc").unwrap().children.get("hosts").unwrap();
        assert_eq!(hosts_node.origin, Origin::Module("b".to_string()));
        assert_eq!(hosts_node.source_path, module_b.path().join("system/etc/hosts"));
    }

    #[test]
    fn empty_module_directory_contributes_nothing() {
        let live = TempDir::new().unwrap();
        let module_a = TempDir::new().unwrap();

        fs::create_dir_all(module_a.path().join("vendor/empty")).unwrap();

        let m = module("a", module_a.path());
        assert!(plan_partition("vendor", live.path(), &[&m]).is_none());
    }

    #[test]
    fn conflicting_kinds_keep_the_earlier_structure() {
        let live = TempDir::new().unwrap();
        let module_a = TempDir::new().unwrap();
        let module_b = TempDir::new().unwrap();

        let a_bin = module_a.path().join("system/bin");
        fs::create_dir_all(&a_bin).unwrap();
        fs::write(a_bin.join("tool"), b"a").unwrap();

        fs::create_dir_all(module_b.path().join("system")).unwrap();
        fs::create_dir_all(module_b.path().join("system/bin/tool")).unwrap();
        fs::write(module_b.path().join("system/bin/tool/inner"), b"x").unwrap();

        let a = module("a", module_a.path());
        let b = module("b", module_b.path());
        let trie = plan_partition("system", live.path(), &[&a, &b]).unwrap();

        let tool_node = trie.children.get("bin").unwrap().children.get("tool").unwrap();
        assert_eq!(tool_node.kind, NodeKind::File);
        assert_eq!(tool_node.origin, Origin::Module("a".to_string()));
    }
}
