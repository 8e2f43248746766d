// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub const DEFAULT_HYBRID_MNT_DIR: &str = "/debug_ramdisk";
pub const RUN_DIR: &str = "/data/adb/meta-hybrid/run/";
pub const STATE_FILE: &str = "/data/adb/meta-hybrid/run/daemon_state.json";
pub const DISABLE_FILE_NAME: &str = "disable";
pub const REMOVE_FILE_NAME: &str = "remove";
pub const SKIP_MOUNT_FILE_NAME: &str = "skip_mount";
pub const MODULE_PROP_FILE: &str = "/data/adb/modules/meta-hybrid/module.prop";
pub const MODULES_DIR: &str = "/data/adb/modules";
pub const CONFIG_FILE: &str = "/data/adb/meta-hybrid/config.toml";
pub const ZYGISKSU_DENYLIST_FILE: &str = "/data/adb/zygisksu/denylist_enforce";
pub const KSU_OVERLAY_SOURCE: &str = "KSU";

// Partitions the detector always treats as present without having to be
// rediscovered from /proc/mounts, and whose identity it still confirms there.
pub const BUILTIN_PARTITIONS: &[&str] = &["system", "vendor", "product", "system_ext", "odm"];

pub const STATS_FILE: &str = "/data/adb/meta-hybrid/run/mount_stats.json";
pub const MODULE_IMG_TEMPDIR: &str = "img_mnt";
