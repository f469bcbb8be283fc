// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod traits;

pub use error::{BackendError, BackendErrorKind};
pub use traits::{
    DeviceDiscovery, FilesystemOps, LuksOps, PartitionOps, SystemBackend, TargetOps,
};
