// Copyright 2025 Meta-Hybrid Mount Authors
// SPDX-License-Identifier: GPL-3.0-or-later

mod conf;
mod core;
mod defs;
mod mount;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use conf::{
    cli::{Cli, Commands},
    cli_handlers,
};
use core::MountController;
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        match command {
            Commands::GenConfig { output } => cli_handlers::handle_gen_config(output)?,
            Commands::ShowConfig => cli_handlers::handle_show_config(&cli)?,
            Commands::SaveConfig { payload } => cli_handlers::handle_save_config(payload)?,
            Commands::SaveModuleRules { module, payload } => {
                cli_handlers::handle_save_module_rules(module, payload)?
            }
            Commands::Storage => cli_handlers::handle_storage(&cli)?,
            Commands::Modules => cli_handlers::handle_modules(&cli)?,
            Commands::Conflicts => cli_handlers::handle_conflicts(&cli)?,
            Commands::Diagnostics => cli_handlers::handle_diagnostics(&cli)?,
            Commands::SystemAction { action, value } => {
                log::info!("system-action {} {:?} is not implemented by the engine", action, value);
            }
        }

        return Ok(());
    }

    let mut config = cli_handlers::load_config(&cli)?;

    config.merge_with_cli(
        cli.moduledir.clone(),
        cli.mountsource.clone(),
        cli.partitions.clone(),
        cli.verbose,
    );

    if utils::check_zygisksu_enforce_status() {
        if config.allow_umount_coexistence {
            log::info!(">> ZygiskSU enforce detected, umount coexistence allowed by config");
        } else {
            log::warn!(">> ZygiskSU enforce detected, forcing disable_umount");
            config.disable_umount = true;
        }
    }

    utils::init_logging(config.verbose).context("failed to initialize logging")?;

    utils::ensure_dir_exists(defs::RUN_DIR)
        .with_context(|| format!("failed to create run directory: {}", defs::RUN_DIR))?;

    let camouflage_name = utils::random_kworker_name();
    if let Err(e) = utils::camouflage_process(&camouflage_name) {
        log::warn!("failed to camouflage process: {:#}", e);
    }

    log::info!(">> initializing meta-hybrid mount daemon");
    log::debug!("process camouflaged as: {}", camouflage_name);

    utils::check_ksu();

    if config.disable_umount {
        log::warn!("!! umount is disabled via config");
    }

    MountController::new(config)
        .init_storage()
        .context("failed to prepare scratch root")?
        .scan_modules()
        .context("failed to scan module inventory")?
        .run_magic_mount()
        .context("magic-mount pipeline failed")?
        .finalize()
        .context("failed to finalize boot sequence")?;

    Ok(())
}
