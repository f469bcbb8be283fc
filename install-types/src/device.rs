//! Block device inventory models
//!
//! These types are read-only snapshots of what the kernel reports for a
//! device at discovery time. Only the filesystem handler changes the real
//! devices, after which the snapshot is refreshed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    ByteRange, FilesystemType, GPT_ALIGNMENT_BYTES, PartitionFlags, SectorSize, Size, SizeError,
};

/// Partition table type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    /// GPT (GUID Partition Table)
    Gpt,

    /// MBR/DOS (Master Boot Record)
    Mbr,
}

impl PartitionTableType {
    /// Label name understood by parted's `mklabel`
    pub fn as_parted_label(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Mbr => "msdos",
        }
    }

    /// Parse the names reported by lsblk/blkid/parted
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gpt" => Some(Self::Gpt),
            "dos" | "mbr" | "msdos" => Some(Self::Mbr),
            _ => None,
        }
    }
}

/// A partition as found in an existing partition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Device path (e.g., "/dev/sda1")
    pub path: PathBuf,

    /// Partition number (1-based)
    pub number: u32,

    pub start: Size,

    pub length: Size,

    /// Filesystem found on the partition, if any
    pub fs_type: Option<FilesystemType>,

    /// Filesystem UUID
    pub uuid: Option<String>,

    /// Partition UUID (GPT) or disk-id based id (MBR)
    pub partuuid: Option<String>,

    /// Current mount points (empty if not mounted)
    pub mountpoints: Vec<PathBuf>,

    #[serde(default)]
    pub flags: PartitionFlags,

    /// Open device-mapper device stacked on this partition
    #[serde(default)]
    pub mapper: Option<PathBuf>,
}

impl PartitionInfo {
    pub fn is_mounted(&self) -> bool {
        !self.mountpoints.is_empty()
    }
}

/// Complete device snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device path (e.g., "/dev/sda")
    pub path: PathBuf,

    /// Disk model name
    #[serde(default)]
    pub model: String,

    pub sector_size: SectorSize,

    pub total_size: Size,

    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub removable: bool,

    /// Existing partition table, `None` for blank devices
    pub partition_table: Option<PartitionTableType>,

    pub partitions: Vec<PartitionInfo>,
}

impl Device {
    /// Get a human-readable display name for the device
    pub fn display_name(&self) -> String {
        if !self.model.is_empty() {
            format!("{} ({})", self.model, self.path.display())
        } else {
            self.path.display().to_string()
        }
    }

    pub fn total_bytes(&self) -> Result<u64, SizeError> {
        self.total_size.bytes()
    }

    /// Region new partitions may be placed in; the first MiB holds the
    /// partition table and bootloader embedding area.
    pub fn usable_range(&self) -> Result<ByteRange, SizeError> {
        Ok(ByteRange {
            start: GPT_ALIGNMENT_BYTES,
            end: self.total_bytes()?,
        })
    }

    pub fn find_partition(&self, path: &Path) -> Option<&PartitionInfo> {
        self.partitions
            .iter()
            .find(|p| p.path == path || p.mapper.as_deref() == Some(path))
    }

    pub fn highest_partition_number(&self) -> u32 {
        self.partitions.iter().map(|p| p.number).max().unwrap_or(0)
    }

    /// Path of partition `number` on this device.
    ///
    /// Devices whose name ends in a digit (nvme0n1, mmcblk0, loop0) take a
    /// 'p' separator before the partition number.
    pub fn partition_path(&self, number: u32) -> PathBuf {
        let base = self.path.to_string_lossy();
        if base.ends_with(|c: char| c.is_ascii_digit()) {
            PathBuf::from(format!("{base}p{number}"))
        } else {
            PathBuf::from(format!("{base}{number}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Unit;

    fn disk(path: &str) -> Device {
        Device {
            path: PathBuf::from(path),
            model: "Samsung SSD 970 EVO".to_string(),
            sector_size: SectorSize::DEFAULT,
            total_size: Size::new(64, Unit::GiB, SectorSize::DEFAULT),
            read_only: false,
            removable: false,
            partition_table: Some(PartitionTableType::Gpt),
            partitions: vec![],
        }
    }

    #[test]
    fn partition_paths_follow_kernel_naming() {
        assert_eq!(disk("/dev/sda").partition_path(2), PathBuf::from("/dev/sda2"));
        assert_eq!(
            disk("/dev/nvme0n1").partition_path(1),
            PathBuf::from("/dev/nvme0n1p1")
        );
        assert_eq!(
            disk("/dev/mmcblk0").partition_path(3),
            PathBuf::from("/dev/mmcblk0p3")
        );
    }

    #[test]
    fn table_type_parsing() {
        assert_eq!(PartitionTableType::parse("dos"), Some(PartitionTableType::Mbr));
        assert_eq!(PartitionTableType::parse("gpt"), Some(PartitionTableType::Gpt));
        assert_eq!(PartitionTableType::parse("apm"), None);
        assert_eq!(PartitionTableType::Mbr.as_parted_label(), "msdos");
    }

    #[test]
    fn test_device_serialization() {
        let device = disk("/dev/sda");
        let json = serde_json::to_string(&device).unwrap();
        let deserialized: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(device, deserialized);
    }
}
