// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for disk layout planning and installation
//!
//! This crate defines the single source of truth for the planning types.
//! They are used throughout the stack:
//!
//! - **install-sys**: Returns these types from device discovery
//! - **install-core**: Validates and executes layouts, drives the installer
//! - **install-app**: Builds them from the TOML install document
//!
//! ## Lifecycle
//!
//! - `Device` → read-only snapshot of a block device and its partition table
//! - `PartitionModification` → a planned or captured partition
//! - `DeviceModification` → the partitions planned for one device
//! - `DiskLayoutConfiguration` → the complete plan, plus `DiskEncryption`
//!
//! Every planning invariant is checked here, before any device is touched.

pub mod config;
pub mod device;
pub mod encryption;
pub mod error;
pub mod filesystem;
pub mod layout;
pub mod modification;
pub mod partition;
pub mod size;

pub use config::{
    AdditionalRepository, AudioServer, Bootloader, CustomRepository, FirmwareMode,
    InstallationConfig, LocaleConfig, MirrorConfiguration, NetworkMode, ProfileSpec, User,
};
pub use device::{Device, PartitionInfo, PartitionTableType};
pub use encryption::{DiskEncryption, EncryptionType, Fido2Device, Password};
pub use error::{ConfigError, PlanningError, SizeError};
pub use filesystem::{BlockIdentity, FilesystemType, MountEntry};
pub use layout::{DiskLayoutConfiguration, DiskLayoutType};
pub use modification::DeviceModification;
pub use partition::{
    ModificationStatus, PartitionFlag, PartitionFlags, PartitionId, PartitionModification,
    PartitionType,
};
pub use size::{ByteRange, GPT_ALIGNMENT_BYTES, SectorSize, Size, Unit, bytes_to_pretty};
