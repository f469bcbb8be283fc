// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the installation engine
//!
//! This crate is the real Linux backend. It drives the usual tools:
//! - `lsblk`, `blkid` and sysfs for device discovery
//! - `/proc/self/mountinfo` for the live mount table
//! - `parted`, `mkfs.*`, `cryptsetup`, `mount` for device changes
//! - `pacstrap` and `arch-chroot` for the target system
//!
//! Destructive operations require root and should only be reached through
//! the filesystem handler in install-core.

pub mod backend;
pub mod block;
pub mod cmd;
pub mod error;
pub mod firmware;
pub mod lsblk;
pub mod mounts;

pub use backend::SysBackend;
pub use cmd::{CommandOutcome, Runner};
pub use error::{Result, SysError};
