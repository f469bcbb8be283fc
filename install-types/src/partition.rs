// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::{Component, Path, PathBuf};

use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ByteRange, FilesystemType, PartitionInfo, SizeError, size::Size};

/// Stable identity of a partition across planning, encryption and the
/// applied records produced by the filesystem handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(Uuid);

impl PartitionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex digits, enough to tell partitions apart in messages
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for PartitionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// What the filesystem handler must do with a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationStatus {
    /// Present on disk, left untouched
    Exist,
    /// Present on disk, reformatted in place
    Modify,
    /// Present on disk, removed from the table
    Delete,
    /// Planned, created by the filesystem handler
    Create,
}

impl ModificationStatus {
    /// Statuses that describe a partition already in the table
    pub fn is_existing(&self) -> bool {
        !matches!(self, Self::Create)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionFlag {
    Boot = 1 << 0,
    Esp = 1 << 1,
    XbootLdr = 1 << 2,
    Swap = 1 << 3,
}

impl PartitionFlag {
    /// Flag name understood by `parted set`
    pub fn parted_name(&self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Esp => "esp",
            Self::XbootLdr => "bls_boot",
            Self::Swap => "swap",
        }
    }
}

pub type PartitionFlags = BitFlags<PartitionFlag>;

/// A planned or captured partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionModification {
    pub id: PartitionId,

    pub status: ModificationStatus,

    #[serde(default)]
    pub partition_type: PartitionType,

    pub start: Size,

    pub length: Size,

    /// `None` means the partition is not formatted
    pub fs_type: Option<FilesystemType>,

    /// Absolute path inside the target, e.g. "/" or "/home"
    pub mountpoint: Option<PathBuf>,

    #[serde(default)]
    pub mount_options: Vec<String>,

    #[serde(default)]
    pub flags: PartitionFlags,

    /// Device node, known only for partitions captured from a table
    #[serde(default)]
    pub dev_path: Option<PathBuf>,
}

impl PartitionModification {
    pub fn new(status: ModificationStatus, start: Size, length: Size) -> Self {
        Self {
            id: PartitionId::new(),
            status,
            partition_type: PartitionType::Primary,
            start,
            length,
            fs_type: None,
            mountpoint: None,
            mount_options: Vec::new(),
            flags: PartitionFlags::empty(),
            dev_path: None,
        }
    }

    /// Capture a partition from an existing table
    pub fn from_existing(info: &PartitionInfo) -> Self {
        let mut pm = Self::new(ModificationStatus::Exist, info.start, info.length);
        pm.fs_type = info.fs_type;
        pm.flags = info.flags;
        pm.dev_path = Some(info.path.clone());
        pm
    }

    pub fn with_fs(mut self, fs_type: FilesystemType) -> Self {
        self.fs_type = Some(fs_type);
        self
    }

    pub fn with_mountpoint(mut self, mountpoint: impl Into<PathBuf>) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }

    pub fn with_flags(mut self, flags: impl Into<PartitionFlags>) -> Self {
        self.flags |= flags.into();
        self
    }

    pub fn with_type(mut self, partition_type: PartitionType) -> Self {
        self.partition_type = partition_type;
        self
    }

    pub fn with_dev_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dev_path = Some(path.into());
        self
    }

    /// Options keep their first position, later duplicates are dropped
    pub fn with_mount_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for option in options {
            let option = option.into();
            if !option.is_empty() && !self.mount_options.contains(&option) {
                self.mount_options.push(option);
            }
        }
        self
    }

    /// Absolute byte range on a device of `total` bytes
    pub fn range(&self, total: u64) -> Result<ByteRange, SizeError> {
        let start = self.start.bytes_of(total)?;
        let length = self.length.bytes_of(total)?;
        ByteRange::from_start_len(start, length)
            .ok_or_else(|| SizeError::Overflow(format!("{} + {}", self.start, self.length)))
    }

    /// Whether this entry stands for the captured partition `info`
    pub fn refers_to(&self, info: &PartitionInfo) -> bool {
        match &self.dev_path {
            Some(path) => *path == info.path,
            None => self.start == info.start && self.length == info.length,
        }
    }

    pub fn is_boot(&self) -> bool {
        self.flags.contains(PartitionFlag::Boot)
    }

    pub fn is_esp(&self) -> bool {
        self.flags.contains(PartitionFlag::Esp)
    }

    /// Boot or ESP: may not be encrypted, at most one per device
    pub fn has_boot_role(&self) -> bool {
        self.flags.intersects(PartitionFlag::Boot | PartitionFlag::Esp)
    }

    pub fn is_root(&self) -> bool {
        self.mountpoint.as_deref() == Some(Path::new("/"))
    }

    pub fn is_swap(&self) -> bool {
        self.fs_type == Some(FilesystemType::LinuxSwap) || self.flags.contains(PartitionFlag::Swap)
    }

    pub fn is_create_or_modify(&self) -> bool {
        matches!(
            self.status,
            ModificationStatus::Create | ModificationStatus::Modify
        )
    }

    /// Mountpoint without its leading '/', ready to be joined to a target root
    pub fn relative_mountpoint(&self) -> Option<PathBuf> {
        self.mountpoint.as_ref().map(|mp| {
            mp.components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect()
        })
    }

    /// Device-mapper name used when this partition is encrypted
    pub fn mapper_name(&self) -> String {
        match self.mountpoint.as_deref() {
            Some(mp) if mp == Path::new("/") => "luks-root".to_string(),
            Some(mp) => {
                let name = mp
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("-");
                if name.is_empty() {
                    format!("luks-part-{}", self.id.short())
                } else {
                    format!("luks-{name}")
                }
            }
            None => format!("luks-part-{}", self.id.short()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SectorSize, Unit};

    fn mib(v: u64) -> Size {
        Size::new(v, Unit::MiB, SectorSize::DEFAULT)
    }

    #[test]
    fn mount_options_are_deduplicated_in_order() {
        let pm = PartitionModification::new(ModificationStatus::Create, mib(1), mib(100))
            .with_mount_options(["noatime", "compress=zstd", "noatime", ""]);
        assert_eq!(pm.mount_options, vec!["noatime", "compress=zstd"]);
    }

    #[test]
    fn roles_follow_flags_and_mountpoints() {
        let esp = PartitionModification::new(ModificationStatus::Create, mib(1), mib(512))
            .with_fs(FilesystemType::Fat32)
            .with_mountpoint("/boot")
            .with_flags(PartitionFlag::Boot | PartitionFlag::Esp);
        assert!(esp.is_boot());
        assert!(esp.is_esp());
        assert!(esp.has_boot_role());
        assert!(!esp.is_root());

        let swap = PartitionModification::new(ModificationStatus::Create, mib(513), mib(1024))
            .with_fs(FilesystemType::LinuxSwap);
        assert!(swap.is_swap());
        assert!(!swap.has_boot_role());
    }

    #[test]
    fn relative_mountpoint_strips_root() {
        let pm = PartitionModification::new(ModificationStatus::Create, mib(1), mib(1))
            .with_mountpoint("/var/log");
        assert_eq!(pm.relative_mountpoint(), Some(PathBuf::from("var/log")));

        let root = pm.clone().with_mountpoint("/");
        assert_eq!(root.relative_mountpoint(), Some(PathBuf::new()));
    }

    #[test]
    fn mapper_names() {
        let base = PartitionModification::new(ModificationStatus::Create, mib(1), mib(1));
        assert_eq!(base.clone().with_mountpoint("/").mapper_name(), "luks-root");
        assert_eq!(
            base.clone().with_mountpoint("/var/log").mapper_name(),
            "luks-var-log"
        );
        assert_eq!(
            base.mapper_name(),
            format!("luks-part-{}", base.id.short())
        );
    }

    #[test]
    fn range_resolves_percent_lengths() {
        let pm = PartitionModification::new(
            ModificationStatus::Create,
            mib(1),
            Size::percent(50, SectorSize::DEFAULT),
        );
        let range = pm.range(1000 << 20).unwrap();
        assert_eq!(range.start, 1 << 20);
        assert_eq!(range.size(), 500 << 20);
    }

    #[test]
    fn test_partition_modification_serialization() {
        let pm = PartitionModification::new(ModificationStatus::Create, mib(1), mib(512))
            .with_fs(FilesystemType::Fat32)
            .with_flags(PartitionFlag::Esp);
        let json = serde_json::to_string(&pm).unwrap();
        let deserialized: PartitionModification = serde_json::from_str(&json).unwrap();
        assert_eq!(pm, deserialized);
    }
}
