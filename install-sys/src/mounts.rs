// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use install_types::MountEntry;

use crate::{Result, SysError};

const EXCLUDED_FS_TYPES: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "overlay",
    "proc",
    "pstore",
    "ramfs",
    "rpc_pipefs",
    "securityfs",
    "selinuxfs",
    "squashfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

pub fn read_mount_table() -> Result<Vec<MountEntry>> {
    let mount_info = fs::read_to_string("/proc/self/mountinfo")?;
    parse_mountinfo(&mount_info)
}

/// Parse mountinfo into block-backed mounts, in kernel order
pub fn parse_mountinfo(input: &str) -> Result<Vec<MountEntry>> {
    let mut entries = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let invalid = || SysError::Parse(format!("mountinfo line '{line}'"));

        let (left, right) = line.split_once(" - ").ok_or_else(invalid)?;

        let mut left_fields = left.split_whitespace();
        let mount_point = left_fields.nth(4).ok_or_else(invalid)?;
        let options = left_fields.next().ok_or_else(invalid)?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields.next().ok_or_else(invalid)?;
        let source = right_fields.next().ok_or_else(invalid)?;

        if is_pseudo_fs_type(fs_type) {
            continue;
        }

        entries.push(MountEntry {
            source: unescape_mount_field(source),
            target: unescape_mount_field(mount_point),
            fs_type: fs_type.to_string(),
            options: options.split(',').map(str::to_string).collect(),
        });
    }

    Ok(entries)
}

fn is_pseudo_fs_type(fs_type: &str) -> bool {
    if EXCLUDED_FS_TYPES.contains(&fs_type) {
        return true;
    }

    fs_type.starts_with("fuse.") || fs_type.starts_with("nfs")
}

fn unescape_mount_field(value: &str) -> PathBuf {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(u8::is_ascii_digit)
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num);
            index += 4;
            continue;
        }

        output.push(bytes[index]);
        index += 1;
    }

    PathBuf::from(OsString::from_vec(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mountinfo_and_filters_pseudo_types() {
        let sample = "36 25 8:2 / /mnt/archinstall rw,relatime - ext4 /dev/nvme0n1p2 rw\n\
                      37 25 0:5 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw\n\
                      40 36 8:1 / /mnt/archinstall/boot rw,noatime - vfat /dev/nvme0n1p1 rw,fmask=0022\n";

        let mounts = parse_mountinfo(sample).expect("parse should succeed");
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].target, PathBuf::from("/mnt/archinstall"));
        assert_eq!(mounts[0].source, PathBuf::from("/dev/nvme0n1p2"));
        assert_eq!(mounts[0].options, vec!["rw", "relatime"]);
        assert_eq!(mounts[1].fs_type, "vfat");
    }

    #[test]
    fn unescapes_spaces_in_mountpoints() {
        let sample = "50 25 8:3 / /mnt/my\\040disk rw - ext4 /dev/sdb1 rw\n";
        let mounts = parse_mountinfo(sample).unwrap();
        assert_eq!(mounts[0].target, PathBuf::from("/mnt/my disk"));
    }

    #[test]
    fn keeps_multibyte_mountpoints_intact() {
        let sample = "51 25 8:4 / /mnt/instalaci\\303\\263n rw - ext4 /dev/sdb2 rw\n\
                      52 25 8:5 / /mnt/données rw - ext4 /dev/sdb3 rw\n";
        let mounts = parse_mountinfo(sample).unwrap();
        assert_eq!(mounts[0].target, PathBuf::from("/mnt/instalación"));
        assert_eq!(mounts[1].target, PathBuf::from("/mnt/données"));
        assert!(mounts[0].target.starts_with("/mnt"));
    }

    #[test]
    fn rejects_truncated_lines() {
        assert!(parse_mountinfo("36 25 8:2 / /mnt rw ext4\n").is_err());
    }
}
