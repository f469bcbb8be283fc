// SPDX-License-Identifier: GPL-3.0-only

//! Devices and layouts shared by the tests

use std::path::PathBuf;

use install_types::{
    Device, DeviceModification, DiskLayoutConfiguration, FilesystemType, ModificationStatus,
    PartitionFlag, PartitionFlags, PartitionInfo, PartitionModification, PartitionTableType, SectorSize, Size,
    Unit,
};

pub const BOOT_MIB: u64 = 512;

pub fn mib(value: u64) -> Size {
    Size::new(value, Unit::MiB, SectorSize::DEFAULT)
}

pub fn gib(value: u64) -> Size {
    Size::new(value, Unit::GiB, SectorSize::DEFAULT)
}

/// Blank disk without a partition table
pub fn disk(path: &str, size_gib: u64) -> Device {
    Device {
        path: PathBuf::from(path),
        model: "QEMU HARDDISK".to_string(),
        sector_size: SectorSize::DEFAULT,
        total_size: gib(size_gib),
        read_only: false,
        removable: false,
        partition_table: None,
        partitions: Vec::new(),
    }
}

/// GPT disk with a 512 MiB ESP followed by `count - 1` equal ext4 partitions
pub fn partitioned_disk(path: &str, size_gib: u64, count: u32) -> Device {
    let mut device = disk(path, size_gib);
    device.partition_table = Some(PartitionTableType::Gpt);

    let rest = (size_gib * 1024).saturating_sub(BOOT_MIB + 2);
    let each = rest / u64::from(count.saturating_sub(1).max(1));
    let mut start = 1;
    for number in 1..=count {
        let (length, fs_type, flags): (u64, FilesystemType, PartitionFlags) = if number == 1 {
            (BOOT_MIB, FilesystemType::Fat32, PartitionFlag::Esp.into())
        } else {
            (each, FilesystemType::Ext4, Default::default())
        };
        let path = device.partition_path(number);
        device.partitions.push(PartitionInfo {
            path,
            number,
            start: mib(start),
            length: mib(length),
            fs_type: Some(fs_type),
            uuid: None,
            partuuid: None,
            mountpoints: Vec::new(),
            flags,
            mapper: None,
        });
        start += length;
    }
    device
}

pub fn boot_partition() -> PartitionModification {
    PartitionModification::new(ModificationStatus::Create, mib(1), mib(BOOT_MIB))
        .with_fs(FilesystemType::Fat32)
        .with_mountpoint("/boot")
        .with_flags(PartitionFlag::Boot)
}

/// Root filling the device after the boot partition, leaving 1 MiB at the end
pub fn root_partition(device: &Device) -> PartitionModification {
    let total = device.total_size.bytes().unwrap_or_default();
    let start = mib(1 + BOOT_MIB);
    let length = total
        .saturating_sub(start.bytes().unwrap_or_default())
        .saturating_sub(1024 * 1024);
    PartitionModification::new(
        ModificationStatus::Create,
        start,
        Size::from_bytes(length, device.sector_size),
    )
    .with_fs(FilesystemType::Ext4)
    .with_mountpoint("/")
}

/// Wiped `device` with a 512 MiB FAT32 /boot and an ext4 root
pub fn boot_root_layout(device: Device) -> DiskLayoutConfiguration {
    let root = root_partition(&device);
    let mut modification = DeviceModification::new(device, true);
    modification.add_partition(boot_partition());
    modification.add_partition(root);
    DiskLayoutConfiguration::new(vec![modification])
}
