// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Filesystems the handler knows how to create and mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemType {
    Btrfs,
    Ext2,
    Ext3,
    Ext4,
    F2fs,
    Fat12,
    Fat16,
    Fat32,
    Ntfs,
    Xfs,
    #[serde(rename = "linux-swap")]
    LinuxSwap,
}

impl FilesystemType {
    /// Accepts the names used by blkid, lsblk and the mount table
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "btrfs" => Some(Self::Btrfs),
            "ext2" => Some(Self::Ext2),
            "ext3" => Some(Self::Ext3),
            "ext4" => Some(Self::Ext4),
            "f2fs" => Some(Self::F2fs),
            "fat12" => Some(Self::Fat12),
            "fat16" => Some(Self::Fat16),
            "fat32" | "vfat" => Some(Self::Fat32),
            "ntfs" | "ntfs3" => Some(Self::Ntfs),
            "xfs" => Some(Self::Xfs),
            "swap" | "linux-swap" | "linux-swap(v1)" => Some(Self::LinuxSwap),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Btrfs => "btrfs",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::F2fs => "f2fs",
            Self::Fat12 => "fat12",
            Self::Fat16 => "fat16",
            Self::Fat32 => "fat32",
            Self::Ntfs => "ntfs",
            Self::Xfs => "xfs",
            Self::LinuxSwap => "linux-swap",
        }
    }

    /// Type passed to `mount -t` and written to fstab
    pub fn mount_type(&self) -> &'static str {
        match self {
            Self::Fat12 | Self::Fat16 | Self::Fat32 => "vfat",
            Self::Ntfs => "ntfs3",
            Self::LinuxSwap => "swap",
            other => other.name(),
        }
    }

    /// Filesystem type hint for `parted mkpart`
    pub fn parted_type(&self) -> &'static str {
        match self {
            Self::Fat12 | Self::Fat16 => "fat16",
            Self::Fat32 => "fat32",
            Self::LinuxSwap => "linux-swap",
            Self::Ntfs => "ntfs",
            Self::Btrfs => "btrfs",
            Self::Xfs => "xfs",
            Self::F2fs => "f2fs",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
        }
    }

    /// Formatting program and its fixed arguments; the device path is appended
    pub fn mkfs_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Btrfs => ("mkfs.btrfs", &["-f"]),
            Self::Ext2 => ("mkfs.ext2", &["-F"]),
            Self::Ext3 => ("mkfs.ext3", &["-F"]),
            Self::Ext4 => ("mkfs.ext4", &["-F"]),
            Self::F2fs => ("mkfs.f2fs", &["-f"]),
            Self::Fat12 => ("mkfs.fat", &["-F", "12"]),
            Self::Fat16 => ("mkfs.fat", &["-F", "16"]),
            Self::Fat32 => ("mkfs.fat", &["-F", "32"]),
            Self::Ntfs => ("mkfs.ntfs", &["-Q", "-F"]),
            Self::Xfs => ("mkfs.xfs", &["-f"]),
            Self::LinuxSwap => ("mkswap", &[]),
        }
    }

    /// Userspace tools the installed system needs for this filesystem
    pub fn installation_packages(&self) -> &'static [&'static str] {
        match self {
            Self::Btrfs => &["btrfs-progs"],
            Self::Xfs => &["xfsprogs"],
            Self::F2fs => &["f2fs-tools"],
            Self::Fat12 | Self::Fat16 | Self::Fat32 => &["dosfstools"],
            Self::Ntfs => &["ntfs-3g"],
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::LinuxSwap => &[],
        }
    }

    pub fn is_mountable(&self) -> bool {
        !matches!(self, Self::LinuxSwap)
    }
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the live mount table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Mount source, usually a device node
    pub source: PathBuf,

    pub target: PathBuf,

    /// Type as reported by the kernel, e.g. "ext4" or "vfat"
    pub fs_type: String,

    pub options: Vec<String>,
}

impl MountEntry {
    /// True when the entry is mounted at or below `root`
    pub fn is_under(&self, root: &Path) -> bool {
        self.target.starts_with(root)
    }
}

/// Identifiers of a filesystem or container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdentity {
    pub uuid: Option<String>,
    pub partuuid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kernel_names() {
        assert_eq!(FilesystemType::parse("vfat"), Some(FilesystemType::Fat32));
        assert_eq!(FilesystemType::parse("EXT4"), Some(FilesystemType::Ext4));
        assert_eq!(FilesystemType::parse("swap"), Some(FilesystemType::LinuxSwap));
        assert_eq!(FilesystemType::parse("zfs"), None);
    }

    #[test]
    fn fat_mounts_as_vfat() {
        assert_eq!(FilesystemType::Fat32.mount_type(), "vfat");
        assert_eq!(FilesystemType::Fat32.mkfs_command(), ("mkfs.fat", &["-F", "32"][..]));
        assert_eq!(FilesystemType::Fat32.installation_packages(), &["dosfstools"]);
    }

    #[test]
    fn mount_entries_under_root() {
        let entry = MountEntry {
            source: PathBuf::from("/dev/sda2"),
            target: PathBuf::from("/mnt/archinstall/boot"),
            fs_type: "vfat".to_string(),
            options: vec!["rw".to_string()],
        };
        assert!(entry.is_under(Path::new("/mnt/archinstall")));
        assert!(!entry.is_under(Path::new("/mnt/arch")));
    }

    #[test]
    fn test_filesystem_serialization() {
        let json = serde_json::to_string(&FilesystemType::LinuxSwap).unwrap();
        assert_eq!(json, "\"linux-swap\"");
        let fs: FilesystemType = serde_json::from_str("\"ext4\"").unwrap();
        assert_eq!(fs, FilesystemType::Ext4);
    }
}
