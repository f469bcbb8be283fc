// SPDX-License-Identifier: GPL-3.0-only

//! Capabilities the engine needs from the system, split by concern.
//!
//! The real implementation shells out to the usual Linux tools; tests use a
//! recording fake. All calls block until the underlying operation finished.

pub mod discovery;
pub mod filesystem;
pub mod luks;
pub mod partition;
pub mod target;

pub use discovery::DeviceDiscovery;
pub use filesystem::FilesystemOps;
pub use luks::LuksOps;
pub use partition::PartitionOps;
pub use target::TargetOps;

/// Everything the filesystem handler and the installer use
pub trait SystemBackend:
    DeviceDiscovery + PartitionOps + FilesystemOps + LuksOps + TargetOps
{
}

impl<T> SystemBackend for T where
    T: DeviceDiscovery + PartitionOps + FilesystemOps + LuksOps + TargetOps
{
}
