use std::ffi::{CString, CStr};
use std::fs::File;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use anyhow::{Context, Result};
use log::{debug, warn};
use walkdir::WalkDir;
use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr, ioctl_none};

const DEV_PATH: &str = "/dev/hymo_ctl";
const HYMO_IOC_MAGIC: u8 = 0xE0;

#[repr(C)]
pub struct HymoIoctlArg {
    pub src: *const std::ffi::c_char,
    pub target: *const std::ffi::c_char,
    pub type_: std::ffi::c_int,
}

#[repr(C)]
pub struct HymoIoctlListArg {
    pub buf: *mut std::ffi::c_char,
    pub size: usize,
}

ioctl_write_ptr!(ioc_add_rule, HYMO_IOC_MAGIC, 1, HymoIoctlArg);
ioctl_write_ptr!(ioc_del_rule, HYMO_IOC_MAGIC, 2, HymoIoctlArg);
ioctl_write_ptr!(ioc_hide_rule, HYMO_IOC_MAGIC, 3, HymoIoctlArg);
ioctl_none!(ioc_clear_all, HYMO_IOC_MAGIC, 5);
ioctl_read!(ioc_get_version, HYMO_IOC_MAGIC, 6, i32);
ioctl_readwrite!(ioc_list_rules, HYMO_IOC_MAGIC, 7, HymoIoctlListArg);
ioctl_write_ptr!(ioc_set_debug, HYMO_IOC_MAGIC, 8, i32);
ioctl_write_ptr!(ioc_set_stealth, HYMO_IOC_MAGIC, 10, i32);
ioctl_write_ptr!(ioc_hide_overlay_xattrs, HYMO_IOC_MAGIC, 11, HymoIoctlArg);

#[derive(Debug, PartialEq)]
#[allow(dead_code)]
pub enum HymoFsStatus {
    Available,
    NotPresent,
    KernelTooOld,
    ModuleTooOld,
}

pub struct HymoFs;

impl HymoFs {
    fn open_dev() -> Result<File> {
        File::open(DEV_PATH).with_context(|| format!("Failed to open {}", DEV_PATH))
    }

    pub fn check_status() -> HymoFsStatus {
        if Path::new(DEV_PATH).exists() {
            HymoFsStatus::Available
        } else {
            HymoFsStatus::NotPresent
        }
    }

    pub fn is_available() -> bool {
        Self::check_status() == HymoFsStatus::Available
    }

    pub fn get_version() -> Option<i32> {
        let file = Self::open_dev().ok()?;
        let mut version: i32 = 0;
        let ret = unsafe { ioc_get_version(file.as_raw_fd(), &mut version) };
        if ret.is_err() {
            None
        } else {
            Some(version)
        }
    }

    pub fn clear() -> Result<()> {
        debug!("HymoFS: Clearing all rules");
        let file = Self::open_dev()?;
        unsafe { ioc_clear_all(file.as_raw_fd()) }
            .context("HymoFS clear failed")?;

        // Enable debug mode by default
        let debug_val: i32 = 1;
        unsafe { ioc_set_debug(file.as_raw_fd(), &debug_val) }.ok();
        
        Ok(())
    }

    pub fn add_rule(src: &str, target: &str, type_val: i32) -> Result<()> {
        debug!("HymoFS: ADD_RULE src='{}' target='{}' type={}", src, target, type_val);
        let file = Self::open_dev()?;
        let c_src = CString::new(src)?;
        let c_target = CString::new(target)?;
        
        let arg = HymoIoctlArg {
            src: c_src.as_ptr(),
            target: c_target.as_ptr(),
            type_: type_val as std::ffi::c_int,
        };

        unsafe { ioc_add_rule(file.as_raw_fd(), &arg) }
            .context("HymoFS add_rule failed")?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn delete_rule(src: &str) -> Result<()> {
        debug!("HymoFS: DEL_RULE src='{}'", src);
        let file = Self::open_dev()?;
        let c_src = CString::new(src)?;
        
        let arg = HymoIoctlArg {
            src: c_src.as_ptr(),
            target: std::ptr::null(),
            type_: 0,
        };

        unsafe { ioc_del_rule(file.as_raw_fd(), &arg) }
            .context("HymoFS delete_rule failed")?;
        Ok(())
    }

    pub fn hide_path(path: &str) -> Result<()> {
        debug!("HymoFS: HIDE_RULE path='{}'", path);
        let file = Self::open_dev()?;
        let c_path = CString::new(path)?;
        
        let arg = HymoIoctlArg {
            src: c_path.as_ptr(),
            target: std::ptr::null(),
            type_: 0,
        };

        unsafe { ioc_hide_rule(file.as_raw_fd(), &arg) }
            .context("HymoFS hide_path failed")?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn list_active_rules() -> Result<String> {
        let file = Self::open_dev()?;
        let capacity = 128 * 1024;
        let mut buffer = vec![0u8; capacity];
        let mut arg = HymoIoctlListArg {
            buf: buffer.as_mut_ptr() as *mut std::ffi::c_char,
            size: capacity,
        };

        unsafe { ioc_list_rules(file.as_raw_fd(), &mut arg) }
            .context("HymoFS list_rules failed")?;

        let c_str = unsafe { CStr::from_ptr(buffer.as_ptr() as *const std::ffi::c_char) };
        Ok(c_str.to_string_lossy().into_owned())
    }

    pub fn inject_directory(target_base: &Path, module_dir: &Path) -> Result<()> {
        if !module_dir.exists() || !module_dir.is_dir() {
            return Ok(());
        }

        debug!("HymoFS: Scanning module dir: {} -> {}", module_dir.display(), target_base.display());

        let mut pending_ops = Vec::new();

        for entry in WalkDir::new(module_dir).min_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("HymoFS walk error: {}", e);
                    continue;
                }
            };

            let current_path = entry.path().to_path_buf();
            let relative_path = match current_path.strip_prefix(module_dir) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let target_path = target_base.join(relative_path);
            let file_type = entry.file_type();

            if file_type.is_file() || file_type.is_symlink() {
                pending_ops.push((true, target_path, current_path));
            } else if file_type.is_char_device() {
                if let Ok(metadata) = entry.metadata() {
                    if metadata.rdev() == 0 {
                        pending_ops.push((false, target_path, current_path));
                    }
                }
            }
        }

        for (is_add, target_path, current_path) in pending_ops {
            if is_add {
                if let Err(e) = Self::add_rule(
                    &target_path.to_string_lossy(),
                    &current_path.to_string_lossy(),
                    0 
                ) {
                    warn!("Failed to add rule for {}: {}", target_path.display(), e);
                }
            } else {
                if let Err(e) = Self::hide_path(&target_path.to_string_lossy()) {
                    warn!("Failed to hide path {}: {}", target_path.display(), e);
                }
            }
        }
        
        Ok(())
    }

    #[allow(dead_code)]
    pub fn delete_directory_rules(target_base: &Path, module_dir: &Path) -> Result<()> {
        if !module_dir.exists() || !module_dir.is_dir() {
            return Ok(());
        }

        for entry in WalkDir::new(module_dir).min_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("HymoFS walk error: {}", e);
                    continue;
                }
            };

            let current_path = entry.path();
            let relative_path = match current_path.strip_prefix(module_dir) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let target_path = target_base.join(relative_path);
            let file_type = entry.file_type();

            if file_type.is_file() || file_type.is_symlink() {
                if let Err(e) = Self::delete_rule(&target_path.to_string_lossy()) {
                    warn!("Failed to delete rule for {}: {}", target_path.display(), e);
                }
            } else if file_type.is_char_device() {
                if let Ok(metadata) = entry.metadata() {
                    if metadata.rdev() == 0 {
                        if let Err(e) = Self::delete_rule(&target_path.to_string_lossy()) {
                            warn!("Failed to delete hidden rule for {}: {}", target_path.display(), e);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(dead_code)]
    pub fn set_debug(enable: bool) -> Result<()> {
        let file = Self::open_dev()?;
        let val: i32 = if enable { 1 } else { 0 };
        unsafe { ioc_set_debug(file.as_raw_fd(), &val) }
            .context("HymoFS set_debug failed")?;
        Ok(())
    }
}
