// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Materialiser: walks a merge trie and a freshly mounted tmpfs scratch
//! root, creating the directory skeleton and staging the bind-mount
//! operations the orchestrator will later execute. Never issues a mount
//! syscall itself.

use std::{
    fs,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

use crate::{
    core::{
        ops::planner::{MergeNode, NodeKind},
        stats,
    },
    mount::{attr::clone_attributes, path_safety::is_safe_symlink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    File,
    Dir,
    Symlink,
}

/// One bind mount the orchestrator still needs to perform. Emitted in
/// depth-first pre-order: a parent's op (or directory creation) always
/// precedes its children's.
#[derive(Debug, Clone)]
pub struct StagedOp {
    pub source: PathBuf,
    pub target: PathBuf,
    pub recursive: bool,
    pub kind: OpKind,
}

/// A synthetic pass-through entry discovered on the live partition but
/// absent from the trie (untouched by any module), treated uniformly with
/// explicit trie children during the walk.
enum Entry<'a> {
    Explicit(&'a MergeNode),
    PassThrough { kind: NodeKind, source: PathBuf },
}

pub fn materialize(trie: &MergeNode, scratch_root: &Path) -> Vec<StagedOp> {
    let mut staged = Vec::new();
    // The trie's root is always built as `Origin::Original` over the live
    // mount point (see `planner::plan_partition`), and the planner never
    // reassigns the root's own origin — only its descendants get adopted by
    // a module. So the root's `source_path` is a safe starting `live_dir`.
    let live_dir = trie.source_path.clone();
    walk(trie, scratch_root, scratch_root, &live_dir, &mut staged);
    staged
}

/// `live_dir` is the original partition path this node stands for,
/// independent of `node.source_path` (which may already point at a
/// module's directory once this node has been adopted as a template).
fn walk(
    node: &MergeNode,
    scratch_root: &Path,
    scratch_path: &Path,
    live_dir: &Path,
    staged: &mut Vec<StagedOp>,
) {
    match node.kind {
        NodeKind::Dir if node.must_materialise => {
            if let Err(e) = fs::create_dir_all(scratch_path) {
                log::error!(
                    "failed to create scratch directory {}: {:#}",
                    scratch_path.display(),
                    e
                );
                return;
            }

            if let Err(e) = clone_attributes(&node.source_path, scratch_path) {
                log::warn!(
                    "failed to clone attributes {} -> {}: {:#}",
                    node.source_path.display(),
                    scratch_path.display(),
                    e
                );
            }

            for (name, entry) in merged_children(node, live_dir) {
                let child_scratch = scratch_path.join(&name);
                let child_live_dir = live_dir.join(&name);
                match entry {
                    Entry::Explicit(child) => {
                        walk(child, scratch_root, &child_scratch, &child_live_dir, staged)
                    }
                    Entry::PassThrough { kind, source } => {
                        stage_pass_through(kind, source, child_scratch, staged)
                    }
                }
            }
        }
        NodeKind::Dir => {
            staged.push(StagedOp {
                source: node.source_path.clone(),
                target: scratch_path.to_path_buf(),
                recursive: true,
                kind: OpKind::Dir,
            });
        }
        NodeKind::File => {
            if let Err(e) = fs::File::create(scratch_path) {
                log::error!(
                    "failed to create placeholder file {}: {:#}",
                    scratch_path.display(),
                    e
                );
                return;
            }

            staged.push(StagedOp {
                source: node.source_path.clone(),
                target: scratch_path.to_path_buf(),
                recursive: false,
                kind: OpKind::File,
            });
        }
        NodeKind::Symlink => {
            materialize_symlink(&node.source_path, scratch_path);
        }
        NodeKind::Whiteout => {
            let _ = fs::remove_file(scratch_path).or_else(|_| fs::remove_dir_all(scratch_path));
        }
    }
}

/// Combines the trie's explicit children with whatever else lives on the
/// original partition directory so untouched siblings still end up bind
/// mounted from their original location (pass-through dominance). `live_dir`
/// is threaded down from the root rather than derived from this node's own
/// `source_path`, so pass-through enumeration still works once a module has
/// adopted this directory as a template (see `walk`).
fn merged_children<'a>(node: &'a MergeNode, live_dir: &Path) -> Vec<(String, Entry<'a>)> {
    let mut out: Vec<(String, Entry<'a>)> = node
        .children
        .iter()
        .map(|(name, child)| (name.clone(), Entry::Explicit(child)))
        .collect();

    if let Ok(entries) = fs::read_dir(live_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if node.children.contains_key(&name) {
                continue;
            }

            let Ok(meta) = entry.path().symlink_metadata() else {
                continue;
            };

            let kind = if meta.is_dir() {
                NodeKind::Dir
            } else if meta.file_type().is_symlink() {
                NodeKind::Symlink
            } else {
                NodeKind::File
            };

            out.push((
                name,
                Entry::PassThrough {
                    kind,
                    source: entry.path(),
                },
            ));
        }
    }

    out
}

fn stage_pass_through(kind: NodeKind, source: PathBuf, target: PathBuf, staged: &mut Vec<StagedOp>) {
    match kind {
        NodeKind::Dir => staged.push(StagedOp {
            source,
            target,
            recursive: true,
            kind: OpKind::Dir,
        }),
        NodeKind::File => {
            if let Err(e) = fs::File::create(&target) {
                log::error!("failed to create mirror file {}: {:#}", target.display(), e);
                return;
            }
            staged.push(StagedOp {
                source,
                target,
                recursive: false,
                kind: OpKind::File,
            });
        }
        NodeKind::Symlink => materialize_symlink(&source, &target),
        NodeKind::Whiteout => {}
    }
}

fn materialize_symlink(source: &Path, target: &Path) {
    if !is_safe_symlink(source) {
        log::warn!("rejecting unsafe symlink {}", source.display());
        stats::global().record_failed();
        return;
    }

    let Ok(link_target) = fs::read_link(source) else {
        stats::global().record_failed();
        return;
    };

    if let Err(e) = symlink(&link_target, target) {
        log::error!(
            "failed to create symlink {} -> {:?}: {:#}",
            target.display(),
            link_target,
            e
        );
        stats::global().record_failed();
        return;
    }

    if let Err(e) = clone_attributes(source, target) {
        log::warn!(
            "failed to clone attributes onto symlink {}: {:#}",
            target.display(),
            e
        );
    }

    stats::global().record_symlink_created();
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink as unix_symlink;

    use tempfile::TempDir;

    use super::*;
    use crate::{core::ops::planner::Origin, mount::path_safety::is_safe_path};

    fn leaf(kind: NodeKind, source: PathBuf) -> MergeNode {
        MergeNode {
            kind,
            origin: Origin::Module("a".into()),
            children: Default::default(),
            must_materialise: false,
            source_path: source,
        }
    }

    #[test]
    fn staged_targets_never_escape_scratch() {
        let live = TempDir::new().unwrap();
        let module = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();

        fs::write(module.path().join("hosts"), b"x").unwrap();

        let mut root = MergeNode {
            kind: NodeKind::Dir,
            origin: Origin::Original,
            children: Default::default(),
            must_materialise: true,
            source_path: live.path().to_path_buf(),
        };
        root.children.insert(
            "hosts".to_string(),
            leaf(NodeKind::File, module.path().join("hosts")),
        );

        let ops = materialize(&root, scratch.path());
        assert!(!ops.is_empty());
        for op in &ops {
            assert!(is_safe_path(scratch.path(), &op.target));
        }
    }

    #[test]
    fn untouched_subtree_yields_single_recursive_op() {
        let live = TempDir::new().unwrap();
        fs::create_dir_all(live.path().join("vendor/odm")).unwrap();

        let scratch = TempDir::new().unwrap();
        let module = TempDir::new().unwrap();
        fs::write(module.path().join("hosts"), b"x").unwrap();

        let mut root = MergeNode {
            kind: NodeKind::Dir,
            origin: Origin::Original,
            children: Default::default(),
            must_materialise: true,
            source_path: live.path().to_path_buf(),
        };
        root.children.insert(
            "hosts".to_string(),
            leaf(NodeKind::File, module.path().join("hosts")),
        );

        let ops = materialize(&root, scratch.path());
        let vendor_ops: Vec<_> = ops.iter().filter(|op| op.target.ends_with("vendor")).collect();
        assert_eq!(vendor_ops.len(), 1);
        assert!(vendor_ops[0].recursive);
        assert_eq!(vendor_ops[0].source, live.path().join("vendor"));
    }

    #[test]
    fn untouched_sibling_inside_contributed_subdir_is_preserved() {
        let live = TempDir::new().unwrap();
        fs::create_dir_all(live.path().join("etc")).unwrap();
        fs::write(live.path().join("etc/hosts"), b"live hosts").unwrap();
        fs::write(live.path().join("etc/passwd"), b"live passwd").unwrap();

        let scratch = TempDir::new().unwrap();
        let module = TempDir::new().unwrap();
        fs::create_dir_all(module.path().join("etc")).unwrap();
        fs::write(module.path().join("etc/hosts"), b"module hosts").unwrap();

        let mut etc = MergeNode {
            kind: NodeKind::Dir,
            origin: Origin::Module("a".into()),
            children: Default::default(),
            must_materialise: true,
            source_path: module.path().join("etc"),
        };
        etc.children.insert(
            "hosts".to_string(),
            leaf(NodeKind::File, module.path().join("etc/hosts")),
        );

        let mut root = MergeNode {
            kind: NodeKind::Dir,
            origin: Origin::Original,
            children: Default::default(),
            must_materialise: true,
            source_path: live.path().to_path_buf(),
        };
        root.children.insert("etc".to_string(), etc);

        let ops = materialize(&root, scratch.path());

        let passwd_op = ops
            .iter()
            .find(|op| op.target.ends_with("etc/passwd"))
            .expect("untouched sibling must still be staged from the live partition");
        assert_eq!(passwd_op.source, live.path().join("etc/passwd"));

        let hosts_op = ops
            .iter()
            .find(|op| op.target.ends_with("etc/hosts"))
            .expect("contributed file must still be staged");
        assert_eq!(hosts_op.source, module.path().join("etc/hosts"));
    }

    #[test]
    fn unsafe_symlink_is_skipped() {
        let live = TempDir::new().unwrap();
        let module = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();

        let link = module.path().join("evil");
        unix_symlink("/data/secret", &link).unwrap();

        let mut root = MergeNode {
            kind: NodeKind::Dir,
            origin: Origin::Original,
            children: Default::default(),
            must_materialise: true,
            source_path: live.path().to_path_buf(),
        };
        root.children.insert("evil".to_string(), leaf(NodeKind::Symlink, link));

        let ops = materialize(&root, scratch.path());
        assert!(!scratch.path().join("evil").exists());
        assert!(ops.iter().all(|op| !op.target.ends_with("evil")));
    }
}
