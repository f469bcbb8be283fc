// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

use crate::PartitionId;

/// Errors produced by the size model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("relative size cannot be converted without a device total")]
    RelativeWithoutTotal,

    #[error("percentage {0} is outside 0..=100")]
    PercentOutOfRange(u64),

    #[error("size overflow: {0}")]
    Overflow(String),

    #[error("size underflow: {0}")]
    Underflow(String),

    #[error("invalid size '{0}'; use B, KiB, MiB, GiB, TiB, s or % suffix")]
    Parse(String),
}

/// Invariant violations detected before any device is touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error(transparent)]
    Size(#[from] SizeError),

    #[error("partitions {first} and {second} overlap on {}", .device.display())]
    Overlap {
        device: PathBuf,
        first: PartitionId,
        second: PartitionId,
    },

    #[error(
        "partition {partition} overlaps the existing partition {}, which the plan keeps",
        .existing.display()
    )]
    OverlapsExisting {
        device: PathBuf,
        partition: PartitionId,
        existing: PathBuf,
    },

    #[error(
        "partition {partition} on {} ends at byte {end}, beyond the device size {total}",
        .device.display()
    )]
    OutOfBounds {
        device: PathBuf,
        partition: PartitionId,
        end: u64,
        total: u64,
    },

    #[error(
        "partition {partition} on {} starts at byte {start}, inside the reserved first {reserved} bytes",
        .device.display()
    )]
    ReservedRegion {
        device: PathBuf,
        partition: PartitionId,
        start: u64,
        reserved: u64,
    },

    #[error("partition {partition} on {} has zero length", .device.display())]
    ZeroLength {
        device: PathBuf,
        partition: PartitionId,
    },

    #[error("more than one boot/ESP partition planned on {}", .device.display())]
    MultipleBootPartitions { device: PathBuf },

    #[error("{} would hold {count} primary partitions, an MBR table allows 4", .device.display())]
    TooManyPrimaryPartitions { device: PathBuf, count: usize },

    #[error("device {} appears in more than one modification", .0.display())]
    DuplicateDevice(PathBuf),

    #[error("mountpoint {} is assigned to more than one partition", .0.display())]
    DuplicateMountpoint(PathBuf),

    #[error("partition {0} carries a boot/ESP flag and cannot be encrypted")]
    EncryptedBootPartition(PartitionId),

    #[error("encrypted partition {0} is not part of the disk layout")]
    UnknownEncryptedPartition(PartitionId),

    #[error("encrypted partition {0} has no filesystem to create inside the container")]
    EncryptedWithoutFilesystem(PartitionId),

    #[error("encrypted partition {0} already exists and would have to be reformatted")]
    EncryptedExistingPartition(PartitionId),

    #[error("encryption is enabled but no password was given")]
    MissingEncryptionPassword,

    #[error("encryption type 'no_encryption' cannot reference partitions")]
    PartitionsWithoutEncryption,

    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

/// Inconsistencies in the resolved installation settings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one kernel must be selected")]
    NoKernel,

    #[error("hostname '{0}' is not a valid hostname")]
    InvalidHostname(String),

    #[error("user name '{0}' is not a valid login name")]
    InvalidUsername(String),

    #[error("no user with sudo rights and no root password: nobody could administer the system")]
    NoAdministrator,
}
