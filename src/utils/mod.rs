// Copyright 2026 Hybrid Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod fs;
pub mod log;
pub mod mount;
pub mod process;
pub mod validation;

pub use self::{fs::*, log::*, mount::*, process::*, validation::*};
