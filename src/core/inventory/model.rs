// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::HashSet,
    fs::{self},
    io::{BufRead, BufReader},
    path::Path,
    sync::OnceLock,
};

use anyhow::Result;
use regex_lite::Regex;
use serde::Serialize;

use super::scanner as inventory;
use crate::{
    conf::config::{self, MountMode},
    core::state::RuntimeState,
    defs, utils,
};

static MODULE_PROP_REGEX: OnceLock<Regex> = OnceLock::new();

/// Parsed `module.prop`. Falls back to the owning directory name for `id`
/// when the file is absent or doesn't declare one.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ModuleProp {
    pub id: String,
    pub name: String,
    pub version: String,
    pub version_code: String,
    pub author: String,
    pub description: String,
}

impl ModuleProp {
    pub fn parse(path: &Path, fallback_id: &str) -> Self {
        let mut prop = ModuleProp {
            id: fallback_id.to_string(),
            ..Default::default()
        };

        let re = MODULE_PROP_REGEX.get_or_init(|| {
            Regex::new(r"^([a-zA-Z0-9_.]+)=(.*)$").expect("failed to compile module prop regex")
        });

        let Ok(file) = fs::File::open(path) else {
            return prop;
        };

        for line in BufReader::new(file).lines().map_while(Result::ok) {
            let Some(caps) = re.captures(line.trim()) else {
                continue;
            };

            let k = caps.get(1).map_or("", |m| m.as_str());
            let v = caps.get(2).map_or("", |m| m.as_str());

            match k {
                "id" if !v.is_empty() => prop.id = v.to_string(),
                "name" => prop.name = v.to_string(),
                "version" => prop.version = v.to_string(),
                "versionCode" => prop.version_code = v.to_string(),
                "author" => prop.author = v.to_string(),
                "description" => prop.description = v.to_string(),
                _ => {}
            }
        }

        prop
    }
}

#[derive(Serialize)]
struct ModuleInfo {
    id: String,
    name: String,
    version: String,
    version_code: String,
    author: String,
    description: String,
    mode: &'static str,
    is_mounted: bool,
    rules: config::ModuleRules,
}

fn mode_str(mode: &MountMode) -> &'static str {
    match mode {
        MountMode::Auto => "auto",
        MountMode::Magic => "magic",
        MountMode::Overlay => "overlay",
        MountMode::Hymofs => "hymofs",
    }
}

impl ModuleInfo {
    fn new(m: inventory::Module, mounted_set: &HashSet<&str>) -> Self {
        let prop = ModuleProp::parse(&m.source_path.join("module.prop"), &m.id);

        Self {
            is_mounted: mounted_set.contains(m.id.as_str()),
            mode: mode_str(&m.rules.default_mode),
            id: m.id,
            name: prop.name,
            version: prop.version,
            version_code: prop.version_code,
            author: prop.author,
            description: prop.description,
            rules: m.rules,
        }
    }
}

/// Prints every scanned module as a JSON array, annotated with whether the
/// most recent run actually mounted it (per [`RuntimeState`]).
pub fn print_list(config: &config::Config) -> Result<()> {
    let modules = inventory::scan(&config.moduledir, config)?;

    let state = RuntimeState::load().unwrap_or_default();

    let mounted_ids: HashSet<&str> = state
        .overlay_modules
        .iter()
        .chain(state.magic_modules.iter())
        .map(|s| s.as_str())
        .collect();

    let infos: Vec<ModuleInfo> = modules
        .into_iter()
        .map(|m| ModuleInfo::new(m, &mounted_ids))
        .collect();

    println!("{}", serde_json::to_string(&infos)?);

    Ok(())
}

/// Appends a sad-face glyph to this binary's own `module.prop` description
/// when the most recent run failed to mount at least one builtin partition.
/// Silently no-ops when the file is missing.
pub fn update_description(success: bool) {
    let prop_path = Path::new(defs::MODULE_PROP_FILE);

    if !prop_path.exists() {
        return;
    }

    let glyph = if success { "" } else { " \u{1F62D}" };

    let lines: Vec<String> = match fs::File::open(prop_path) {
        Ok(file) => BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .map(|line| {
                if let Some(rest) = line.strip_prefix("description=") {
                    format!(
                        "description={}{}",
                        rest.trim_end_matches(" \u{1F62D}"),
                        glyph
                    )
                } else {
                    line
                }
            })
            .collect(),
        Err(_) => return,
    };

    let content = format!("{}\n", lines.join("\n"));
    if let Err(e) = utils::atomic_write(prop_path, content) {
        log::warn!("failed to update module description at {}: {}", prop_path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn parse_falls_back_to_directory_id_when_absent() {
        let dir = TempDir::new().unwrap();
        let prop = ModuleProp::parse(&dir.path().join("module.prop"), "my_module");
        assert_eq!(prop.id, "my_module");
        assert!(prop.name.is_empty());
    }

    #[test]
    fn parse_reads_declared_fields() {
        let dir = TempDir::new().unwrap();
        let prop_path = dir.path().join("module.prop");
        std::fs::write(
            &prop_path,
            "id=demo\nname=Demo Module\nversion=v1.0\nversionCode=100\nauthor=me\ndescription=hi\n",
        )
        .unwrap();

        let prop = ModuleProp::parse(&prop_path, "fallback");
        assert_eq!(prop.id, "demo");
        assert_eq!(prop.name, "Demo Module");
        assert_eq!(prop.version_code, "100");
    }
}
