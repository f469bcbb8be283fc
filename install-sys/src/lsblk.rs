// SPDX-License-Identifier: GPL-3.0-only

//! Device inventory from `lsblk --json`

use std::path::PathBuf;

use install_types::{
    Device, FilesystemType, PartitionFlag, PartitionFlags, PartitionInfo, PartitionTableType,
    SectorSize, Size,
};
use serde::Deserialize;

use crate::{Result, SysError};

/// Columns requested from lsblk; `START` is reported in 512-byte units
pub const LSBLK_COLUMNS: &str =
    "NAME,TYPE,SIZE,MODEL,RO,RM,PTTYPE,PARTTYPE,PARTFLAGS,FSTYPE,UUID,PARTUUID,MOUNTPOINTS,PARTN,START,LOG-SEC";

const GPT_ESP_GUID: &str = "c12a7328-f81f-11d2-ba4b-00a0c93ec93b";
const GPT_SWAP_GUID: &str = "0657fd6d-a4ab-43c4-84e5-0933c84b4f4f";
const GPT_XBOOTLDR_GUID: &str = "bc13c2ff-59e6-4262-a352-b275fd6f7172";

/// Older util-linux prints numbers and booleans as strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Lenient {
    Num(u64),
    Bool(bool),
    Str(String),
}

impl Lenient {
    fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0,
            Self::Str(s) => s.trim() == "1",
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<Lenient>,
    model: Option<String>,
    ro: Option<Lenient>,
    rm: Option<Lenient>,
    pttype: Option<String>,
    parttype: Option<String>,
    partflags: Option<String>,
    fstype: Option<String>,
    uuid: Option<String>,
    partuuid: Option<String>,
    #[serde(default)]
    mountpoints: Vec<Option<String>>,
    partn: Option<Lenient>,
    start: Option<Lenient>,
    #[serde(rename = "log-sec")]
    log_sec: Option<Lenient>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    fn mountpoints(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.mountpoints.iter().flatten().map(PathBuf::from)
    }

    fn flags(&self) -> PartitionFlags {
        let mut flags = PartitionFlags::empty();
        let parttype = self.parttype.as_deref().unwrap_or_default().to_ascii_lowercase();
        match parttype.as_str() {
            GPT_ESP_GUID | "0xef" => flags |= PartitionFlag::Esp,
            GPT_SWAP_GUID | "0x82" => flags |= PartitionFlag::Swap,
            GPT_XBOOTLDR_GUID => flags |= PartitionFlag::XbootLdr,
            _ => {}
        }
        // MBR active flag
        if self.partflags.as_deref() == Some("0x80") {
            flags |= PartitionFlag::Boot;
        }
        flags
    }

    fn into_partition(self, sector_size: SectorSize, fallback_number: u32) -> PartitionInfo {
        let number = self
            .partn
            .as_ref()
            .and_then(Lenient::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(fallback_number);
        let start = self.start.as_ref().and_then(Lenient::as_u64).unwrap_or(0) * 512;
        let length = self.size.as_ref().and_then(Lenient::as_u64).unwrap_or(0);
        let flags = self.flags();

        let crypt = self.children.iter().find(|c| c.kind == "crypt");
        let mut mountpoints: Vec<PathBuf> = self.mountpoints().collect();
        if let Some(crypt) = crypt {
            mountpoints.extend(crypt.mountpoints());
        }

        PartitionInfo {
            path: PathBuf::from(&self.name),
            number,
            start: Size::from_bytes(start, sector_size),
            length: Size::from_bytes(length, sector_size),
            fs_type: self.fstype.as_deref().and_then(FilesystemType::parse),
            uuid: self.uuid.clone(),
            partuuid: self.partuuid.clone(),
            mountpoints,
            flags,
            mapper: crypt.map(|c| PathBuf::from(&c.name)),
        }
    }
}

/// Turn lsblk JSON into device snapshots; only whole disks are returned
pub fn parse_lsblk(json: &str) -> Result<Vec<Device>> {
    let output: LsblkOutput =
        serde_json::from_str(json).map_err(|e| SysError::Parse(format!("lsblk output: {e}")))?;

    let devices = output
        .blockdevices
        .into_iter()
        .filter(|d| d.kind == "disk")
        .map(|disk| {
            let sector_size = SectorSize::new(
                disk.log_sec.as_ref().and_then(Lenient::as_u64).unwrap_or(0),
            );
            let total = disk.size.as_ref().and_then(Lenient::as_u64).unwrap_or(0);
            let partitions = disk
                .children
                .into_iter()
                .filter(|c| c.kind == "part")
                .enumerate()
                .map(|(i, part)| part.into_partition(sector_size, i as u32 + 1))
                .collect();

            Device {
                path: PathBuf::from(&disk.name),
                model: disk.model.unwrap_or_default().trim().to_string(),
                sector_size,
                total_size: Size::from_bytes(total, sector_size),
                read_only: disk.ro.as_ref().is_some_and(Lenient::as_bool),
                removable: disk.rm.as_ref().is_some_and(Lenient::as_bool),
                partition_table: disk.pttype.as_deref().and_then(PartitionTableType::parse),
                partitions,
            }
        })
        .collect();

    Ok(devices)
}
