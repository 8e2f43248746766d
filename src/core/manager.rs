// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Type-state wrapper around the boot sequence: storage preparation, module
//! inventory, and the magic-mount pipeline itself, each phase only reachable
//! once its predecessor has completed. Mirrors the teacher's own staged
//! `OryzaEngine`-style controller, generalised to the smaller pipeline this
//! spec actually requires (no plan/execute split at this layer, since the
//! planner and materialiser are internal to `core::ops::executor`).

use std::path::Path;

use anyhow::{Context, Result};

use crate::{
    conf::config::Config,
    core::{
        inventory::{self, Module, model as modules},
        ops::executor,
        state, stats, storage,
        storage::StorageHandle,
    },
};

pub struct Init;

pub struct StorageReady {
    handle: StorageHandle,
}

pub struct ModulesReady {
    handle: StorageHandle,
    modules: Vec<Module>,
}

pub struct Mounted {
    handle: StorageHandle,
    modules: Vec<Module>,
    success: bool,
}

pub struct MountController<S> {
    config: Config,
    state: S,
}

impl MountController<Init> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: Init,
        }
    }

    pub fn init_storage(self) -> Result<MountController<StorageReady>> {
        let tempdir = Path::new(&self.config.hybrid_mnt_dir).join(crate::defs::MODULE_IMG_TEMPDIR);
        let handle = storage::setup(&tempdir).context("failed to prepare scratch root")?;

        log::info!(">> scratch root ready at {}", handle.mount_point.display());

        Ok(MountController {
            config: self.config,
            state: StorageReady { handle },
        })
    }
}

impl MountController<StorageReady> {
    pub fn scan_modules(self) -> Result<MountController<ModulesReady>> {
        let modules = inventory::scan(&self.config.moduledir, &self.config)
            .context("module inventory scan failed")?;

        log::info!(">> inventory: found {} enabled modules", modules.len());

        Ok(MountController {
            config: self.config,
            state: ModulesReady {
                handle: self.state.handle,
                modules,
            },
        })
    }
}

impl MountController<ModulesReady> {
    pub fn run_magic_mount(self) -> Result<MountController<Mounted>> {
        stats::reset_mount_statistics();

        let success = executor::mount_partitions_auto(
            &self.state.handle.mount_point,
            &self.state.modules,
            &self.config.mountsource,
            &self.config.partitions,
            self.config.disable_umount,
        )
        .context("magic-mount pipeline failed to start")?;

        Ok(MountController {
            config: self.config,
            state: Mounted {
                handle: self.state.handle,
                modules: self.state.modules,
                success,
            },
        })
    }
}

impl MountController<Mounted> {
    pub fn finalize(self) -> Result<()> {
        modules::update_description(self.state.success);

        if let Err(e) = stats::save_mount_statistics() {
            log::error!("failed to persist mount statistics: {:#}", e);
        }

        if !self.config.disable_umount {
            let _ = crate::mount::umount_mgr::commit();
        }

        let magic_ids: Vec<String> = self.state.modules.iter().map(|m| m.id.clone()).collect();

        let rt_state = state::RuntimeState::new(
            "tmpfs".to_string(),
            self.state.handle.mount_point,
            Vec::new(),
            magic_ids,
            Vec::new(),
        );

        if let Err(e) = rt_state.save() {
            log::error!("failed to save runtime state: {:#}", e);
        }

        if self.state.success {
            log::info!(">> magic-mount sequence complete");
        } else {
            log::warn!(">> magic-mount sequence finished with no partition mounted");
        }

        Ok(())
    }
}
