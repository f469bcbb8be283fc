// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    ByteRange, Device, GPT_ALIGNMENT_BYTES, ModificationStatus, PartitionInfo,
    PartitionModification, PartitionTableType, PartitionType, PlanningError,
};

/// The partitions planned for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModification {
    pub device: Device,

    /// Destroy the existing table before creating partitions
    pub wipe: bool,

    pub partitions: Vec<PartitionModification>,
}

impl DeviceModification {
    pub fn new(device: Device, wipe: bool) -> Self {
        Self {
            device,
            wipe,
            partitions: Vec::new(),
        }
    }

    pub fn device_path(&self) -> &PathBuf {
        &self.device.path
    }

    pub fn add_partition(&mut self, partition: PartitionModification) {
        self.partitions.push(partition);
    }

    /// Partitions that survive planning: when wiping, only `Create` entries
    pub fn effective_partitions(&self) -> impl Iterator<Item = &PartitionModification> {
        let wipe = self.wipe;
        self.partitions
            .iter()
            .filter(move |p| !wipe || p.status == ModificationStatus::Create)
    }

    /// Partitions that will occupy space once the handler is done
    fn occupying_partitions(&self) -> impl Iterator<Item = &PartitionModification> {
        self.effective_partitions()
            .filter(|p| p.status != ModificationStatus::Delete)
    }

    /// Existing partitions the plan neither lists nor deletes
    ///
    /// They stay on disk untouched unless the device is wiped.
    pub fn untouched_partitions(&self) -> impl Iterator<Item = &PartitionInfo> {
        let wipe = self.wipe;
        self.device.partitions.iter().filter(move |info| {
            !wipe
                && !self
                    .partitions
                    .iter()
                    .any(|pm| pm.status != ModificationStatus::Create && pm.refers_to(info))
        })
    }

    pub fn boot_partition(&self) -> Option<&PartitionModification> {
        self.occupying_partitions().find(|p| p.is_boot())
    }

    pub fn esp_partition(&self) -> Option<&PartitionModification> {
        self.occupying_partitions().find(|p| p.is_esp())
    }

    pub fn root_partition(&self) -> Option<&PartitionModification> {
        self.occupying_partitions().find(|p| p.is_root())
    }

    /// Create entries sorted by their start offset
    pub fn creations_in_order(&self) -> Result<Vec<&PartitionModification>, PlanningError> {
        let total = self.device.total_bytes()?;
        let mut creates = Vec::new();
        for pm in self
            .effective_partitions()
            .filter(|p| p.status == ModificationStatus::Create)
        {
            creates.push((pm.range(total)?.start, pm));
        }
        creates.sort_by_key(|(start, _)| *start);
        Ok(creates.into_iter().map(|(_, pm)| pm).collect())
    }

    /// Check geometry and roles: bounds, reserved head, overlap, boot role
    pub fn validate(&self) -> Result<(), PlanningError> {
        let total = self.device.total_bytes()?;
        let device = self.device.path.clone();

        let mut ranges: Vec<(ByteRange, &PartitionModification)> = Vec::new();
        for pm in self.occupying_partitions() {
            let range = pm.range(total)?;

            if range.size() == 0 {
                return Err(PlanningError::ZeroLength {
                    device,
                    partition: pm.id,
                });
            }
            if range.end > total {
                return Err(PlanningError::OutOfBounds {
                    device,
                    partition: pm.id,
                    end: range.end,
                    total,
                });
            }
            if pm.status == ModificationStatus::Create && range.start < GPT_ALIGNMENT_BYTES {
                return Err(PlanningError::ReservedRegion {
                    device,
                    partition: pm.id,
                    start: range.start,
                    reserved: GPT_ALIGNMENT_BYTES,
                });
            }
            ranges.push((range, pm));
        }

        for info in self.untouched_partitions() {
            let kept = ByteRange::from_start_len(
                info.start.bytes_of(total)?,
                info.length.bytes_of(total)?,
            );
            let Some(kept) = kept else {
                continue;
            };
            if let Some((_, pm)) = ranges.iter().find(|(range, _)| range.overlaps(&kept)) {
                return Err(PlanningError::OverlapsExisting {
                    device,
                    partition: pm.id,
                    existing: info.path.clone(),
                });
            }
        }

        ranges.sort_by_key(|(range, _)| range.start);
        for pair in ranges.windows(2) {
            let (a, first) = &pair[0];
            let (b, second) = &pair[1];
            if a.overlaps(b) {
                return Err(PlanningError::Overlap {
                    device,
                    first: first.id,
                    second: second.id,
                });
            }
        }

        if self.occupying_partitions().filter(|p| p.has_boot_role()).count() > 1 {
            return Err(PlanningError::MultipleBootPartitions { device });
        }

        Ok(())
    }

    /// Table specific limits, checked once the table type is known
    pub fn validate_for_table(&self, table: PartitionTableType) -> Result<(), PlanningError> {
        if table != PartitionTableType::Mbr {
            return Ok(());
        }
        let count = self
            .occupying_partitions()
            .filter(|p| p.partition_type != PartitionType::Logical)
            .count();
        if count > 4 {
            return Err(PlanningError::TooManyPrimaryPartitions {
                device: self.device.path.clone(),
                count,
            });
        }
        Ok(())
    }
}
