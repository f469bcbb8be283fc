// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use install_types::{BlockIdentity, Device, FilesystemType, FirmwareMode, MountEntry};

use crate::BackendError;

pub trait DeviceDiscovery: Send + Sync {
    /// Snapshot of every disk with its partitions
    fn list_devices(&self) -> Result<Vec<Device>, BackendError>;

    /// Current mount table of the live system
    fn mount_table(&self) -> Result<Vec<MountEntry>, BackendError>;

    /// Filesystem signature found on the device, read from disk
    fn probe_filesystem(&self, path: &Path) -> Result<Option<FilesystemType>, BackendError>;

    fn block_identity(&self, path: &Path) -> Result<BlockIdentity, BackendError>;

    fn firmware_mode(&self) -> FirmwareMode;
}
