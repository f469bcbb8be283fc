// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{DeviceModification, ModificationStatus, PartitionId, PartitionModification, PlanningError};

/// How the target tree comes into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskLayoutType {
    /// Partition, format and mount according to the modifications
    #[default]
    Default,
    /// The user already mounted everything below `mountpoint`
    PreMount,
}

/// The complete disk plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayoutConfiguration {
    pub config_type: DiskLayoutType,

    #[serde(default)]
    pub device_modifications: Vec<DeviceModification>,

    /// Root of the pre-mounted tree, only used by `PreMount`
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,
}

impl DiskLayoutConfiguration {
    pub fn new(device_modifications: Vec<DeviceModification>) -> Self {
        Self {
            config_type: DiskLayoutType::Default,
            device_modifications,
            mountpoint: None,
        }
    }

    /// Layout over a tree mounted by hand; `detected` comes from the live mount table
    pub fn pre_mount(mountpoint: impl Into<PathBuf>, detected: Vec<DeviceModification>) -> Self {
        Self {
            config_type: DiskLayoutType::PreMount,
            device_modifications: detected,
            mountpoint: Some(mountpoint.into()),
        }
    }

    pub fn is_pre_mount(&self) -> bool {
        self.config_type == DiskLayoutType::PreMount
    }

    pub fn has_wipe(&self) -> bool {
        self.device_modifications.iter().any(|m| m.wipe)
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&DeviceModification, &PartitionModification)> {
        self.device_modifications
            .iter()
            .flat_map(|m| m.effective_partitions().map(move |p| (m, p)))
    }

    pub fn find_partition(&self, id: PartitionId) -> Option<(&DeviceModification, &PartitionModification)> {
        self.partitions().find(|(_, p)| p.id == id)
    }

    pub fn root_partition(&self) -> Option<&PartitionModification> {
        self.device_modifications
            .iter()
            .find_map(|m| m.root_partition())
    }

    /// Every layout invariant that can be checked without touching a device
    pub fn validate(&self) -> Result<(), PlanningError> {
        match self.config_type {
            DiskLayoutType::Default => {
                if self.device_modifications.is_empty() {
                    return Err(PlanningError::InvalidLayout(
                        "a default layout needs at least one device modification".to_string(),
                    ));
                }
            }
            DiskLayoutType::PreMount => {
                if self.mountpoint.is_none() {
                    return Err(PlanningError::InvalidLayout(
                        "a pre-mounted layout needs a mountpoint".to_string(),
                    ));
                }
                let planned = self
                    .device_modifications
                    .iter()
                    .any(|m| m.wipe || m.partitions.iter().any(|p| p.status != ModificationStatus::Exist));
                if planned {
                    return Err(PlanningError::InvalidLayout(
                        "a pre-mounted layout can only describe existing partitions".to_string(),
                    ));
                }
            }
        }

        let mut devices = HashSet::new();
        for modification in &self.device_modifications {
            if !devices.insert(modification.device.path.as_path()) {
                return Err(PlanningError::DuplicateDevice(modification.device.path.clone()));
            }
            modification.validate()?;
        }

        let mut mountpoints: HashSet<&Path> = HashSet::new();
        for (_, pm) in self.partitions() {
            if pm.status == ModificationStatus::Delete {
                continue;
            }
            if let Some(mp) = pm.mountpoint.as_deref()
                && !mountpoints.insert(mp)
            {
                return Err(PlanningError::DuplicateMountpoint(mp.to_path_buf()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, FilesystemType, SectorSize, Size, Unit};

    fn mib(v: u64) -> Size {
        Size::new(v, Unit::MiB, SectorSize::DEFAULT)
    }

    fn device(path: &str) -> Device {
        Device {
            path: PathBuf::from(path),
            model: String::new(),
            sector_size: SectorSize::DEFAULT,
            total_size: mib(4096),
            read_only: false,
            removable: false,
            partition_table: None,
            partitions: vec![],
        }
    }

    fn root_on(path: &str) -> DeviceModification {
        let mut dm = DeviceModification::new(device(path), true);
        dm.add_partition(
            PartitionModification::new(ModificationStatus::Create, mib(1), mib(2048))
                .with_fs(FilesystemType::Ext4)
                .with_mountpoint("/"),
        );
        dm
    }

    #[test]
    fn default_layout_needs_devices() {
        let layout = DiskLayoutConfiguration::new(vec![]);
        assert!(matches!(
            layout.validate(),
            Err(PlanningError::InvalidLayout(_))
        ));
        DiskLayoutConfiguration::new(vec![root_on("/dev/sda")])
            .validate()
            .unwrap();
    }

    #[test]
    fn duplicate_devices_and_mountpoints() {
        let layout = DiskLayoutConfiguration::new(vec![root_on("/dev/sda"), root_on("/dev/sda")]);
        assert_eq!(
            layout.validate(),
            Err(PlanningError::DuplicateDevice(PathBuf::from("/dev/sda")))
        );

        let layout = DiskLayoutConfiguration::new(vec![root_on("/dev/sda"), root_on("/dev/sdb")]);
        assert_eq!(
            layout.validate(),
            Err(PlanningError::DuplicateMountpoint(PathBuf::from("/")))
        );
    }

    #[test]
    fn pre_mount_rules() {
        let empty = DiskLayoutConfiguration::pre_mount("/mnt/archinstall", vec![]);
        empty.validate().unwrap();
        assert!(empty.is_pre_mount());

        let mut missing = empty.clone();
        missing.mountpoint = None;
        assert!(missing.validate().is_err());

        let planned = DiskLayoutConfiguration::pre_mount("/mnt/archinstall", vec![root_on("/dev/sda")]);
        assert!(matches!(
            planned.validate(),
            Err(PlanningError::InvalidLayout(_))
        ));
    }

    #[test]
    fn find_partition_by_id() {
        let dm = root_on("/dev/sda");
        let id = dm.partitions[0].id;
        let layout = DiskLayoutConfiguration::new(vec![dm]);
        let (owner, pm) = layout.find_partition(id).unwrap();
        assert_eq!(owner.device.path, PathBuf::from("/dev/sda"));
        assert!(pm.is_root());
        assert!(layout.find_partition(PartitionId::new()).is_none());
        assert!(layout.has_wipe());
    }

    #[test]
    fn test_layout_serialization() {
        let layout = DiskLayoutConfiguration::new(vec![root_on("/dev/sda")]);
        let json = serde_json::to_string(&layout).unwrap();
        assert!(json.contains("\"config_type\":\"default\""));
        let deserialized: DiskLayoutConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(layout, deserialized);
    }
}
