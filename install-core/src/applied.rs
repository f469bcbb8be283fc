// SPDX-License-Identifier: GPL-3.0-only

//! Records of what the filesystem handler actually did
//!
//! Planned modifications stay untouched; each applied partition is a new
//! record carrying the same `PartitionId` plus the device nodes that exist now.

use std::path::{Path, PathBuf};

use install_types::{
    FilesystemType, PartitionFlag, PartitionFlags, PartitionId, PartitionModification,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPartition {
    pub id: PartitionId,

    /// Disk holding the partition
    pub device: PathBuf,

    /// Partition node, e.g. "/dev/sda2"
    pub path: PathBuf,

    pub number: Option<u32>,

    /// Device-mapper name when the partition is an open LUKS container
    pub mapper_name: Option<String>,

    pub fs_type: Option<FilesystemType>,

    pub mountpoint: Option<PathBuf>,

    pub mount_options: Vec<String>,

    pub flags: PartitionFlags,
}

impl AppliedPartition {
    pub fn from_modification(
        device: &Path,
        pm: &PartitionModification,
        path: PathBuf,
        number: Option<u32>,
        mapper_name: Option<String>,
    ) -> Self {
        Self {
            id: pm.id,
            device: device.to_path_buf(),
            path,
            number,
            mapper_name,
            fs_type: pm.fs_type,
            mountpoint: pm.mountpoint.clone(),
            mount_options: pm.mount_options.clone(),
            flags: pm.flags,
        }
    }

    pub fn mapped_path(&self) -> Option<PathBuf> {
        self.mapper_name
            .as_ref()
            .map(|name| Path::new("/dev/mapper").join(name))
    }

    /// Node carrying the filesystem: the mapping when encrypted, else the partition
    pub fn fs_device(&self) -> PathBuf {
        self.mapped_path().unwrap_or_else(|| self.path.clone())
    }

    pub fn is_encrypted(&self) -> bool {
        self.mapper_name.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.mountpoint.as_deref() == Some(Path::new("/"))
    }

    pub fn is_esp(&self) -> bool {
        self.flags.contains(PartitionFlag::Esp)
    }

    pub fn is_boot(&self) -> bool {
        self.flags.contains(PartitionFlag::Boot)
    }

    pub fn is_mountable(&self) -> bool {
        self.mountpoint.is_some() && self.fs_type.is_none_or(|fs| fs.is_mountable())
    }

    /// Mount target below `root`
    pub fn target_under(&self, root: &Path) -> Option<PathBuf> {
        self.mountpoint.as_ref().map(|mp| {
            let relative = mp.strip_prefix("/").unwrap_or(mp);
            if relative.as_os_str().is_empty() {
                root.to_path_buf()
            } else {
                root.join(relative)
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedLayout {
    pub partitions: Vec<AppliedPartition>,
}

impl AppliedLayout {
    pub fn new(partitions: Vec<AppliedPartition>) -> Self {
        Self { partitions }
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn get(&self, id: PartitionId) -> Option<&AppliedPartition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub fn root(&self) -> Option<&AppliedPartition> {
        self.partitions.iter().find(|p| p.is_root())
    }

    /// Partition mounted at /boot, falling back to the ESP or boot flag holder
    pub fn boot(&self) -> Option<&AppliedPartition> {
        self.partitions
            .iter()
            .find(|p| p.mountpoint.as_deref() == Some(Path::new("/boot")))
            .or_else(|| self.esp())
    }

    /// The partition carrying the boot or ESP flag
    pub fn esp(&self) -> Option<&AppliedPartition> {
        self.partitions.iter().find(|p| p.is_esp() || p.is_boot())
    }

    pub fn encrypted(&self) -> impl Iterator<Item = &AppliedPartition> {
        self.partitions.iter().filter(|p| p.is_encrypted())
    }

    pub fn filesystems(&self) -> impl Iterator<Item = FilesystemType> + '_ {
        self.partitions.iter().filter_map(|p| p.fs_type)
    }

    /// Mountable partitions, every path before its descendants
    pub fn mount_order(&self) -> Vec<&AppliedPartition> {
        let mut order: Vec<&AppliedPartition> =
            self.partitions.iter().filter(|p| p.is_mountable()).collect();
        order.sort_by(|a, b| {
            let (a, b) = (a.mountpoint.as_deref(), b.mountpoint.as_deref());
            let depth = |p: Option<&Path>| p.map_or(0, |p| p.components().count());
            depth(a).cmp(&depth(b)).then_with(|| a.cmp(&b))
        });
        order
    }
}
