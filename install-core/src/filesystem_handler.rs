// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use install_contracts::{BackendError, SystemBackend};
use install_types::{
    ByteRange, DeviceModification, DiskEncryption, DiskLayoutConfiguration, FirmwareMode,
    ModificationStatus, PartitionModification, PartitionTableType, PlanningError,
};
use tracing::{debug, info, warn};

use crate::{
    AppliedLayout, AppliedPartition, Confirmation, DeviceHandler, DeviceStep, InstallError,
    Result,
};

/// Turns a validated disk layout into partitions, containers and filesystems
pub struct FilesystemHandler<'a> {
    layout: &'a DiskLayoutConfiguration,
    encryption: &'a DiskEncryption,
    devices: Arc<DeviceHandler>,
}

impl<'a> FilesystemHandler<'a> {
    pub fn new(
        layout: &'a DiskLayoutConfiguration,
        encryption: &'a DiskEncryption,
        devices: Arc<DeviceHandler>,
    ) -> Self {
        Self {
            layout,
            encryption,
            devices,
        }
    }

    fn backend(&self) -> &Arc<dyn SystemBackend> {
        self.devices.backend()
    }

    /// Layout and encryption invariants; never touches a device
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        self.encryption.validate(self.layout)?;
        Ok(())
    }

    /// Table type each modification ends up with
    fn table_type(&self, modification: &DeviceModification, firmware: FirmwareMode) -> Result<PartitionTableType> {
        if modification.wipe {
            return Ok(match firmware {
                FirmwareMode::Uefi => PartitionTableType::Gpt,
                FirmwareMode::Bios => PartitionTableType::Mbr,
            });
        }
        match modification.device.partition_table {
            Some(table) => Ok(table),
            None if modification.partitions.iter().any(|p| p.status == ModificationStatus::Create) => {
                Err(PlanningError::InvalidLayout(format!(
                    "{} has no partition table; it must be wiped before partitions can be created",
                    modification.device.path.display()
                ))
                .into())
            }
            None => Ok(PartitionTableType::Gpt),
        }
    }

    /// Apply the layout and describe the result
    ///
    /// Nothing is changed when validation fails or `confirmation` refuses
    /// the wipe. There is no rollback: a failure leaves the devices as far
    /// as the handler got.
    pub fn perform_filesystem_operations(
        &self,
        confirmation: &dyn Confirmation,
    ) -> Result<AppliedLayout> {
        self.validate()?;

        if self.layout.is_pre_mount() {
            info!("pre-mounted layout, no device operations");
            return Ok(self.applied_pre_mount());
        }

        let firmware = self.backend().firmware_mode();
        let mut tables = Vec::with_capacity(self.layout.device_modifications.len());
        for modification in &self.layout.device_modifications {
            let table = self.table_type(modification, firmware)?;
            modification.validate_for_table(table)?;
            tables.push(table);
        }

        if self.layout.has_wipe() {
            let wiped: Vec<PathBuf> = self
                .layout
                .device_modifications
                .iter()
                .filter(|m| m.wipe)
                .map(|m| m.device.path.clone())
                .collect();
            if !confirmation.confirm_wipe(&wiped) {
                info!("wipe of {} device(s) was not confirmed", wiped.len());
                return Err(InstallError::Cancelled);
            }
        }

        let result = self.apply_all(&tables);
        self.devices.invalidate();
        result.map(AppliedLayout::new)
    }

    fn apply_all(&self, tables: &[PartitionTableType]) -> Result<Vec<AppliedPartition>> {
        let mut applied = Vec::new();
        for (modification, table) in self.layout.device_modifications.iter().zip(tables) {
            applied.extend(self.apply_device(modification, *table)?);
        }
        Ok(applied)
    }

    fn applied_pre_mount(&self) -> AppliedLayout {
        let partitions = self
            .layout
            .partitions()
            .map(|(modification, pm)| {
                let source = pm.dev_path.clone().unwrap_or_default();
                let info = modification.device.find_partition(&source);
                let mapper_name = source
                    .strip_prefix("/dev/mapper")
                    .ok()
                    .map(|name| name.display().to_string());
                let path = info.map_or_else(|| source.clone(), |p| p.path.clone());
                AppliedPartition::from_modification(
                    &modification.device.path,
                    pm,
                    path,
                    info.map(|p| p.number),
                    mapper_name,
                )
            })
            .collect();
        AppliedLayout::new(partitions)
    }

    fn apply_device(
        &self,
        modification: &DeviceModification,
        table: PartitionTableType,
    ) -> Result<Vec<AppliedPartition>> {
        let backend = self.backend();
        let device = &modification.device;
        let disk = device.path.as_path();
        let total = device.total_bytes().map_err(PlanningError::from)?;

        info!(
            "applying {} partition(s) to {} (wipe: {})",
            modification.partitions.len(),
            device.display_name(),
            modification.wipe
        );

        let mut used_numbers: BTreeSet<u32> = BTreeSet::new();
        let mut allocated: Vec<(ByteRange, &PartitionModification)> = Vec::new();
        let mut nodes: Vec<(&PartitionModification, PathBuf, Option<u32>)> = Vec::new();
        let mut kept: Vec<(ByteRange, &Path)> = Vec::new();

        if modification.wipe {
            self.release_device(modification)?;
            backend
                .create_partition_table(disk, table)
                .map_err(InstallError::device(disk, DeviceStep::Wipe))?;
        } else {
            let mut deletions: Vec<u32> = Vec::new();
            for pm in modification.effective_partitions() {
                if pm.status == ModificationStatus::Create {
                    continue;
                }
                let number = existing_number(modification, pm)?;
                match pm.status {
                    ModificationStatus::Delete => deletions.push(number),
                    _ => {
                        used_numbers.insert(number);
                        allocated.push((pm.range(total).map_err(PlanningError::from)?, pm));
                        let path = pm
                            .dev_path
                            .clone()
                            .unwrap_or_else(|| device.partition_path(number));
                        nodes.push((pm, path, Some(number)));
                    }
                }
            }

            for info in modification.untouched_partitions() {
                used_numbers.insert(info.number);
                let range = ByteRange::from_start_len(
                    info.start.bytes_of(total).map_err(PlanningError::from)?,
                    info.length.bytes_of(total).map_err(PlanningError::from)?,
                );
                if let Some(range) = range {
                    kept.push((range, info.path.as_path()));
                }
            }

            // highest first so the remaining numbers stay valid
            deletions.sort_unstable_by(|a, b| b.cmp(a));
            for number in deletions {
                backend
                    .delete_partition(disk, number)
                    .map_err(InstallError::device(disk, DeviceStep::Delete))?;
            }
        }

        let creations = modification.creations_in_order()?;
        for pm in &creations {
            let range = pm.range(total).map_err(PlanningError::from)?;
            if range.end > total {
                return Err(PlanningError::OutOfBounds {
                    device: disk.to_path_buf(),
                    partition: pm.id,
                    end: range.end,
                    total,
                }
                .into());
            }
            if let Some((_, other)) = allocated.iter().find(|(r, _)| r.overlaps(&range)) {
                return Err(PlanningError::Overlap {
                    device: disk.to_path_buf(),
                    first: other.id,
                    second: pm.id,
                }
                .into());
            }

            if let Some((_, existing)) = kept.iter().find(|(r, _)| r.overlaps(&range)) {
                return Err(PlanningError::OverlapsExisting {
                    device: disk.to_path_buf(),
                    partition: pm.id,
                    existing: existing.to_path_buf(),
                }
                .into());
            }

            let number = (1..).find(|n| !used_numbers.contains(n)).unwrap_or(1);
            let path = backend
                .create_partition(device, table, pm, number)
                .map_err(InstallError::device(disk, DeviceStep::Create))?;
            debug!("created {} for partition {}", path.display(), pm.id);

            used_numbers.insert(number);
            allocated.push((range, *pm));
            nodes.push((*pm, path, Some(number)));
        }

        if !creations.is_empty() || modification.wipe {
            backend
                .settle(disk)
                .map_err(InstallError::device(disk, DeviceStep::Settle))?;
        }

        // keep the declaration order for encryption, formatting and the records
        let order = |pm: &PartitionModification| {
            modification
                .partitions
                .iter()
                .position(|p| p.id == pm.id)
                .unwrap_or(usize::MAX)
        };
        nodes.sort_by_key(|(pm, _, _)| order(pm));

        let mut applied = Vec::with_capacity(nodes.len());
        for (pm, path, number) in nodes {
            let mapper_name = self.encrypt_partition(pm, &path)?;
            self.format_partition(pm, &path, mapper_name.as_deref())?;
            applied.push(AppliedPartition::from_modification(
                disk,
                pm,
                path,
                number,
                mapper_name,
            ));
        }

        Ok(applied)
    }

    /// Unmount, close and swap off everything still using the old table
    fn release_device(&self, modification: &DeviceModification) -> Result<()> {
        let backend = self.backend();
        let disk = modification.device.path.as_path();

        for partition in &modification.device.partitions {
            let mut targets: Vec<&PathBuf> = partition.mountpoints.iter().collect();
            // children before parents
            targets.sort_by_key(|t| std::cmp::Reverse(t.components().count()));
            for target in targets {
                if target.as_path() == Path::new("[SWAP]") {
                    backend
                        .swapoff(&partition.path)
                        .map_err(InstallError::device(disk, DeviceStep::Release))?;
                } else {
                    backend
                        .unmount(target, false)
                        .map_err(InstallError::device(disk, DeviceStep::Release))?;
                }
            }

            if let Some(mapper) = &partition.mapper {
                let name = mapper
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                backend
                    .luks_close(&name)
                    .map_err(InstallError::device(disk, DeviceStep::Release))?;
            }
        }
        Ok(())
    }

    fn encrypt_partition(&self, pm: &PartitionModification, path: &Path) -> Result<Option<String>> {
        if !self.encryption.should_encrypt(pm.id) {
            return Ok(None);
        }
        // checked by validate()
        let Some(password) = self.encryption.encryption_password.as_ref() else {
            return Err(PlanningError::MissingEncryptionPassword.into());
        };

        let backend = self.backend();
        let name = pm.mapper_name();
        let wrap = |err: BackendError| InstallError::Device {
            device: path.to_path_buf(),
            step: DeviceStep::Encrypt,
            source: err,
        };

        backend.luks_format(path, password).map_err(wrap)?;
        let mapped = backend.luks_open(path, &name, password).map_err(wrap)?;
        debug!("{} unlocked as {}", path.display(), mapped.display());

        if let Some(token) = &self.encryption.hsm_device {
            backend.fido2_enroll(path, token, password).map_err(wrap)?;
        }

        Ok(Some(name))
    }

    fn format_partition(
        &self,
        pm: &PartitionModification,
        path: &Path,
        mapper_name: Option<&str>,
    ) -> Result<()> {
        let Some(fs_type) = pm.fs_type else {
            return Ok(());
        };
        if !pm.is_create_or_modify() {
            return Ok(());
        }

        let target = match mapper_name {
            Some(name) => Path::new("/dev/mapper").join(name),
            None => path.to_path_buf(),
        };
        if pm.status == ModificationStatus::Modify {
            warn!("reformatting existing partition {}", path.display());
        }
        self.backend()
            .format(&target, fs_type)
            .map_err(InstallError::device(target.clone(), DeviceStep::Format))
    }
}

fn existing_number(modification: &DeviceModification, pm: &PartitionModification) -> Result<u32> {
    let path = pm.dev_path.as_deref();
    modification
        .device
        .partitions
        .iter()
        .find(|p| Some(p.path.as_path()) == path)
        .or_else(|| {
            // fall back to geometry when no node was captured
            modification
                .device
                .partitions
                .iter()
                .find(|p| p.start == pm.start && p.length == pm.length)
        })
        .map(|p| p.number)
        .ok_or_else(|| {
            PlanningError::InvalidLayout(format!(
                "partition {} is not present on {}",
                pm.id,
                modification.device.path.display()
            ))
            .into()
        })
}
