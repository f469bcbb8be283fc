// SPDX-License-Identifier: GPL-3.0-only

//! Disk layout execution and the installation pipeline
//!
//! - `FilesystemHandler` applies a validated `DiskLayoutConfiguration`
//! - `DeviceHandler` caches the device inventory and detects pre-mounted trees
//! - `Installer` owns the mounted target and implements every stage
//! - `perform_installation` drives the stages in order
//!
//! All system access goes through an `install_contracts::SystemBackend`.

pub mod applied;
pub mod confirm;
pub mod device_handler;
pub mod error;
pub mod filesystem_handler;
pub mod fstab;
pub mod hooks;
pub mod installer;
pub mod pacman;
pub mod pipeline;
pub mod stage;

pub use applied::{AppliedLayout, AppliedPartition};
pub use confirm::{AssumeYes, Confirmation};
pub use device_handler::DeviceHandler;
pub use error::{DeviceStep, InstallError, Result};
pub use filesystem_handler::FilesystemHandler;
pub use fstab::render_fstab;
pub use hooks::{AudioConfigurator, MinimalProfile, NetworkConfigurator, ProfileHook};
pub use installer::Installer;
pub use pipeline::{InstallerHooks, perform_installation};
pub use stage::{InstallReport, Stage, StageOutcome, StageRecord};
