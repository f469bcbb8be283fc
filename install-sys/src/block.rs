// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io;
use std::path::Path;

use install_types::SectorSize;
use tracing::warn;

fn sysfs_logical_block_size(devnode: &Path) -> io::Result<u64> {
    let dev_name = devnode
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing dev basename"))?;

    let path = Path::new("/sys/class/block")
        .join(dev_name)
        .join("queue/logical_block_size");

    let raw = fs::read_to_string(path)?;
    raw.trim()
        .parse::<u64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn ioctl_logical_block_size(file: &fs::File) -> io::Result<u64> {
    // linux/fs.h: BLKSSZGET = _IO(0x12, 104)
    const BLKSSZGET: libc::c_ulong = 0x1268;
    let mut size: libc::c_int = 0;

    use std::os::fd::AsRawFd;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKSSZGET, &mut size) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(u64::try_from(size).unwrap_or(0))
}

/// Logical sector size from `BLKSSZGET`, falling back to sysfs, then 512
pub fn logical_sector_size(devnode: &Path) -> SectorSize {
    let from_ioctl = fs::File::open(devnode).and_then(|file| ioctl_logical_block_size(&file));
    match from_ioctl {
        Ok(v) if v >= 512 => return SectorSize::new(v),
        Ok(v) => warn!(
            "suspicious logical block size from ioctl: {v}; devnode={}",
            devnode.display()
        ),
        Err(_) => {}
    }

    match sysfs_logical_block_size(devnode) {
        Ok(v) if v >= 512 => SectorSize::new(v),
        Ok(v) => {
            warn!(
                "suspicious logical_block_size from sysfs: {v}; devnode={}",
                devnode.display()
            );
            SectorSize::DEFAULT
        }
        Err(err) => {
            warn!(
                "failed to determine logical block size; sysfs={err}; devnode={}",
                devnode.display()
            );
            SectorSize::DEFAULT
        }
    }
}

/// Last sector a partition may end on
///
/// GPT keeps a backup header in the last sector, preceded by 16 KiB of
/// partition entries. MBR can use the disk up to its final sector.
pub fn last_usable_sector(total_bytes: u64, sector_size: SectorSize, gpt: bool) -> u64 {
    let ss = sector_size.bytes();
    let total_sectors = total_bytes / ss;
    let reserved = if gpt { 1 + (16 * 1024_u64).div_ceil(ss) } else { 0 };
    total_sectors.saturating_sub(1 + reserved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt_backup_area_is_reserved() {
        let total = 1024 * 1024 * 1024;
        assert_eq!(
            last_usable_sector(total, SectorSize::DEFAULT, true),
            total / 512 - 34
        );
        assert_eq!(
            last_usable_sector(total, SectorSize::new(4096), true),
            total / 4096 - 6
        );
        assert_eq!(
            last_usable_sector(total, SectorSize::DEFAULT, false),
            total / 512 - 1
        );
    }
}
