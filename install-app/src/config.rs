// SPDX-License-Identifier: GPL-3.0-only

//! The TOML install document and its resolution against the device inventory
//!
//! ```toml
//! [disk]
//! root = "/mnt/archinstall"
//!
//! [[disk.devices]]
//! path = "/dev/sda"
//! wipe = true
//!
//! [[disk.devices.partitions]]
//! size = "512MiB"
//! fs = "fat32"
//! mountpoint = "/boot"
//! flags = ["boot", "esp"]
//!
//! [[disk.devices.partitions]]
//! size = "rest"
//! fs = "ext4"
//! mountpoint = "/"
//! encrypt = true
//!
//! [encryption]
//! password = "..."
//!
//! [install]
//! hostname = "archlinux"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use install_core::DeviceHandler;
use install_types::{
    Device, DeviceModification, DiskEncryption, DiskLayoutConfiguration, DiskLayoutType,
    Fido2Device, FilesystemType, GPT_ALIGNMENT_BYTES, InstallationConfig, ModificationStatus,
    PartitionFlag, PartitionFlags, PartitionId, PartitionModification, PartitionType, Password,
    Size,
};
use serde::Deserialize;
use tracing::{debug, warn};

const DEFAULT_ROOT: &str = "/mnt/archinstall";

/// Partition size that takes everything up to the end of the device
const REST: &str = "rest";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallDocument {
    pub disk: DiskSection,
    pub encryption: Option<EncryptionSection>,
    pub install: InstallationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskSection {
    pub config_type: DiskLayoutType,
    /// Where the target tree is mounted
    pub root: PathBuf,
    pub devices: Vec<DeviceSection>,
}

impl Default for DiskSection {
    fn default() -> Self {
        Self {
            config_type: DiskLayoutType::Default,
            root: PathBuf::from(DEFAULT_ROOT),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSection {
    pub path: PathBuf,
    #[serde(default)]
    pub wipe: bool,
    #[serde(default)]
    pub partitions: Vec<PartitionSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionSection {
    /// Defaults to `exist` when `path` is given, `create` otherwise
    pub status: Option<ModificationStatus>,
    /// Existing partition node
    pub path: Option<PathBuf>,
    /// Placed after the previous partition when omitted
    pub start: Option<String>,
    /// A size like "512MiB" or "25%", or "rest"
    pub size: Option<String>,
    pub fs: Option<String>,
    pub mountpoint: Option<PathBuf>,
    pub mount_options: Vec<String>,
    pub flags: Vec<String>,
    pub partition_type: Option<PartitionType>,
    pub encrypt: bool,
}

impl PartitionSection {
    fn status(&self) -> ModificationStatus {
        self.status.unwrap_or(if self.path.is_some() {
            ModificationStatus::Exist
        } else {
            ModificationStatus::Create
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionSection {
    pub password: Password,
    #[serde(default)]
    pub fido2: Option<Fido2Device>,
}

/// Everything the filesystem handler and the installer need
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub root: PathBuf,
    pub layout: DiskLayoutConfiguration,
    pub encryption: DiskEncryption,
    pub install: InstallationConfig,
}

impl ResolvedPlan {
    /// Every planning and configuration check, without touching a device
    pub fn validate(&self) -> Result<()> {
        self.layout.validate().context("invalid disk layout")?;
        self.encryption
            .validate(&self.layout)
            .context("invalid encryption settings")?;
        self.install
            .validate()
            .context("invalid installation settings")?;
        Ok(())
    }
}

impl InstallDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Turn the document into concrete modifications
    ///
    /// `root` overrides `[disk] root` when given.
    pub fn resolve(self, devices: &DeviceHandler, root: Option<PathBuf>) -> Result<ResolvedPlan> {
        let root = root.unwrap_or(self.disk.root);

        if self.disk.config_type == DiskLayoutType::PreMount {
            if !self.disk.devices.is_empty() {
                warn!("[[disk.devices]] is ignored for a pre-mounted layout");
            }
            if self.encryption.is_some() {
                warn!("[encryption] is ignored for a pre-mounted layout");
            }
            let detected = devices
                .detect_pre_mounted_mods(&root)
                .with_context(|| format!("failed to inspect mounts below {}", root.display()))?;
            if detected.is_empty() {
                warn!("nothing is mounted below {}", root.display());
            }
            return Ok(ResolvedPlan {
                layout: DiskLayoutConfiguration::pre_mount(&root, detected),
                root,
                encryption: DiskEncryption::none(),
                install: self.install,
            });
        }

        let mut encrypted = Vec::new();
        let mut modifications = Vec::with_capacity(self.disk.devices.len());
        for section in &self.disk.devices {
            let device = devices
                .get_device(&section.path)?
                .ok_or_else(|| anyhow!("unknown device {}", section.path.display()))?;
            modifications.push(
                resolve_device(device, section, &mut encrypted)
                    .with_context(|| format!("in device {}", section.path.display()))?,
            );
        }

        let encryption = match (encrypted.is_empty(), self.encryption) {
            (true, None) => DiskEncryption::none(),
            (true, Some(_)) => {
                warn!("[encryption] is set but no partition has encrypt = true");
                DiskEncryption::none()
            }
            (false, None) => bail!("partitions are marked for encryption but [encryption] is missing"),
            (false, Some(section)) => {
                let encryption = DiskEncryption::new(section.password, encrypted);
                match section.fido2 {
                    Some(device) => encryption.with_hsm(device),
                    None => encryption,
                }
            }
        };

        Ok(ResolvedPlan {
            root,
            layout: DiskLayoutConfiguration::new(modifications),
            encryption,
            install: self.install,
        })
    }
}

fn align_up(bytes: u64) -> u64 {
    bytes.div_ceil(GPT_ALIGNMENT_BYTES) * GPT_ALIGNMENT_BYTES
}

fn align_down(bytes: u64) -> u64 {
    bytes / GPT_ALIGNMENT_BYTES * GPT_ALIGNMENT_BYTES
}

fn resolve_device(
    device: Device,
    section: &DeviceSection,
    encrypted: &mut Vec<PartitionId>,
) -> Result<DeviceModification> {
    let sector_size = device.sector_size;
    let total = device.total_bytes()?;
    // The last MiB stays free for the backup GPT header.
    let end_limit = align_down(total.saturating_sub(GPT_ALIGNMENT_BYTES));

    let mut cursor = GPT_ALIGNMENT_BYTES;
    if !section.wipe {
        let deleted: Vec<&Path> = section
            .partitions
            .iter()
            .filter(|p| p.status() == ModificationStatus::Delete)
            .filter_map(|p| p.path.as_deref())
            .collect();
        for info in &device.partitions {
            if deleted.contains(&info.path.as_path()) {
                continue;
            }
            let end = info.start.bytes()?.saturating_add(info.length.bytes()?);
            cursor = cursor.max(end);
        }
    }

    let mut modification = DeviceModification::new(device.clone(), section.wipe);
    for (index, part) in section.partitions.iter().enumerate() {
        let number = index + 1;
        let status = part.status();

        let mut pm = if status == ModificationStatus::Create {
            let start = match &part.start {
                Some(start) => Size::parse_with(start, sector_size)
                    .with_context(|| format!("partition {number}: bad start"))?,
                None => Size::from_bytes(align_up(cursor), sector_size),
            };
            let start_bytes = start.bytes_of(total)?;
            let length = match part.size.as_deref() {
                Some(REST) => {
                    let length = end_limit
                        .checked_sub(start_bytes)
                        .filter(|l| *l > 0)
                        .ok_or_else(|| anyhow!("partition {number}: no space left at {start}"))?;
                    Size::from_bytes(length, sector_size)
                }
                Some(size) => Size::parse_with(size, sector_size)
                    .with_context(|| format!("partition {number}: bad size"))?,
                None => bail!("partition {number}: a new partition needs a size"),
            };
            cursor = start_bytes.saturating_add(length.bytes_of(total)?);
            debug!(
                "partition {number} on {}: {} at {}",
                device.path.display(),
                length.format_highest(),
                start.format_highest()
            );
            PartitionModification::new(status, start, length)
        } else {
            let path = part
                .path
                .as_deref()
                .ok_or_else(|| anyhow!("partition {number}: {status:?} needs a path"))?;
            let info = device
                .find_partition(path)
                .ok_or_else(|| anyhow!("partition {number}: {} not found", path.display()))?;
            let mut pm = PartitionModification::from_existing(info);
            pm.status = status;
            pm
        };

        if let Some(fs) = &part.fs {
            pm.fs_type = Some(
                FilesystemType::parse(fs)
                    .ok_or_else(|| anyhow!("partition {number}: unknown filesystem '{fs}'"))?,
            );
        }
        if let Some(mountpoint) = &part.mountpoint {
            pm.mountpoint = Some(mountpoint.clone());
        }
        if let Some(partition_type) = part.partition_type {
            pm = pm.with_type(partition_type);
        }
        pm = pm
            .with_flags(parse_flags(&part.flags).with_context(|| format!("partition {number}"))?)
            .with_mount_options(part.mount_options.iter().cloned());

        if part.encrypt {
            encrypted.push(pm.id);
        }
        modification.add_partition(pm);
    }

    Ok(modification)
}

fn parse_flags(names: &[String]) -> Result<PartitionFlags> {
    let mut flags = PartitionFlags::empty();
    for name in names {
        flags |= match name.trim().to_ascii_lowercase().as_str() {
            "boot" => PartitionFlag::Boot,
            "esp" => PartitionFlag::Esp,
            "xbootldr" | "bls_boot" => PartitionFlag::XbootLdr,
            "swap" => PartitionFlag::Swap,
            other => bail!("unknown partition flag '{other}'"),
        };
    }
    Ok(flags)
}
