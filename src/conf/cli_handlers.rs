// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Implementations of the inspection subcommands: each one loads config,
//! does a bounded amount of read-only work, prints JSON (or a short status
//! line) to stdout, and returns without touching the kernel mount table.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

use crate::{
    conf::{
        cli::Cli,
        config::{self, Config},
    },
    core::{
        inventory::{self, Module, model as modules},
        status,
    },
    defs,
    mount::{partitions, path_safety},
    utils,
};

pub fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(config_path) = &cli.config {
        return Config::from_file(config_path).with_context(|| {
            format!(
                "failed to load config from custom path: {}",
                config_path.display()
            )
        });
    }

    match Config::load_default() {
        Ok(config) => Ok(config),
        Err(e) => {
            let is_not_found = e
                .root_cause()
                .downcast_ref::<std::io::Error>()
                .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                .unwrap_or(false);

            if is_not_found {
                Ok(Config::default())
            } else {
                Err(e).context(format!(
                    "failed to load default config from {}",
                    defs::CONFIG_FILE
                ))
            }
        }
    }
}

pub fn handle_gen_config(output: &Path) -> Result<()> {
    Config::default()
        .save_to_file(output)
        .with_context(|| format!("failed to save generated config to {}", output.display()))
}

pub fn handle_show_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let json = serde_json::to_string(&config).context("failed to serialize config to JSON")?;
    println!("{}", json);
    Ok(())
}

fn decode_hex_payload(payload: &str) -> Result<Vec<u8>> {
    (0..payload.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&payload[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .context("failed to decode hex payload")
}

pub fn handle_save_config(payload: &str) -> Result<()> {
    let json_bytes = decode_hex_payload(payload)?;

    let config: Config =
        serde_json::from_slice(&json_bytes).context("failed to parse config JSON payload")?;

    config
        .save_to_file(defs::CONFIG_FILE)
        .context("failed to save config file")?;

    println!("configuration saved");
    Ok(())
}

pub fn handle_save_module_rules(module_id: &str, payload: &str) -> Result<()> {
    utils::validate_module_id(module_id)?;

    let json_bytes = decode_hex_payload(payload)?;
    let new_rules: config::ModuleRules =
        serde_json::from_slice(&json_bytes).context("failed to parse module rules JSON")?;

    let mut cfg = Config::load_default().unwrap_or_default();
    cfg.rules.insert(module_id.to_string(), new_rules);

    cfg.save_to_file(defs::CONFIG_FILE)
        .context("failed to update config file with new rules")?;

    println!("module rules saved for {}", module_id);
    Ok(())
}

pub fn handle_modules(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    modules::print_list(&config).context("failed to list modules")
}

pub fn handle_storage(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let partitions = partitions::detect_partitions().unwrap_or_default();

    let tempdir = Path::new(&config.hybrid_mnt_dir).join(defs::MODULE_IMG_TEMPDIR);
    let xattr_supported = utils::is_overlay_xattr_supported().unwrap_or(false);

    let json = serde_json::json!({
        "scratch_root": tempdir,
        "tmpfs_xattr_supported": xattr_supported,
        "partitions": status::export_partitions_json(&partitions),
    });

    println!("{}", json);
    Ok(())
}

/// A path contributed by more than one module for the same partition. Built
/// directly from each module's on-disk contribution tree rather than from
/// the planner's trie, since the planner only keeps the winner and this
/// report exists precisely to surface who lost.
#[derive(Serialize)]
struct PathConflict {
    partition: String,
    path: String,
    contenders: Vec<String>,
    selected: String,
}

fn partition_contributors(partition: &str, modules: &[Module]) -> HashMap<String, Vec<String>> {
    let mut by_path: HashMap<String, Vec<String>> = HashMap::new();

    for module in modules {
        let root = module.source_path.join(partition);
        if !root.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_dir() {
                continue;
            }

            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };

            by_path
                .entry(rel.to_string_lossy().to_string())
                .or_default()
                .push(module.id.clone());
        }
    }

    by_path
}

fn find_conflicts(config: &Config, modules: &[Module]) -> Vec<PathConflict> {
    let mut conflicts = Vec::new();

    let partition_names: Vec<&str> = defs::BUILTIN_PARTITIONS
        .iter()
        .copied()
        .chain(config.partitions.iter().map(String::as_str))
        .collect();

    for partition in partition_names {
        let by_path = partition_contributors(partition, modules);

        for (path, contenders) in by_path {
            if contenders.len() < 2 {
                continue;
            }

            let selected = contenders.last().cloned().unwrap_or_default();
            conflicts.push(PathConflict {
                partition: partition.to_string(),
                path,
                contenders,
                selected,
            });
        }
    }

    conflicts
}

pub fn handle_conflicts(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let module_list =
        inventory::scan(&config.moduledir, &config).context("failed to scan modules")?;

    let conflicts = find_conflicts(&config, &module_list);
    let json = serde_json::to_string(&conflicts).context("failed to serialize conflict report")?;
    println!("{}", json);
    Ok(())
}

#[derive(Serialize)]
enum DiagnosticLevel {
    Warning,
    Critical,
}

#[derive(Serialize)]
struct DiagnosticIssue {
    level: DiagnosticLevel,
    context: String,
    message: String,
}

fn run_diagnostics(config: &Config, modules: &[Module]) -> Vec<DiagnosticIssue> {
    let mut issues = Vec::new();

    for conflict in find_conflicts(config, modules) {
        issues.push(DiagnosticIssue {
            level: DiagnosticLevel::Warning,
            context: conflict.partition.clone(),
            message: format!(
                "{} is contributed by {:?}; {} wins",
                conflict.path, conflict.contenders, conflict.selected
            ),
        });
    }

    for module in modules {
        for partition in defs::BUILTIN_PARTITIONS {
            let root = module.source_path.join(partition);
            if !root.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
                let path = entry.path();

                if !path_safety::is_safe_path(&module.source_path, path) {
                    issues.push(DiagnosticIssue {
                        level: DiagnosticLevel::Critical,
                        context: module.id.clone(),
                        message: format!("{} escapes the module's own tree", path.display()),
                    });
                    continue;
                }

                if entry.file_type().is_symlink() && !path_safety::is_safe_symlink(path) {
                    issues.push(DiagnosticIssue {
                        level: DiagnosticLevel::Critical,
                        context: module.id.clone(),
                        message: format!("{} is an unsafe symlink", path.display()),
                    });
                }
            }
        }
    }

    issues
}

pub fn handle_diagnostics(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let module_list =
        inventory::scan(&config.moduledir, &config).context("failed to scan modules")?;

    let issues = run_diagnostics(&config, &module_list);
    let json = serde_json::to_string(&issues).context("failed to serialize diagnostics report")?;
    println!("{}", json);
    Ok(())
}
