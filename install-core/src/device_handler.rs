// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use install_contracts::SystemBackend;
use install_types::{
    Device, DeviceModification, FilesystemType, MountEntry, PartitionInfo, PartitionModification,
};
use tracing::{debug, warn};

use crate::Result;

/// Shared registry of the system's block devices
///
/// The topology is read once and cached. The filesystem handler is the only
/// component that changes devices and invalidates the cache afterwards.
pub struct DeviceHandler {
    backend: Arc<dyn SystemBackend>,
    cache: RwLock<Option<Vec<Device>>>,
}

impl DeviceHandler {
    pub fn new(backend: Arc<dyn SystemBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(None),
        }
    }

    pub fn backend(&self) -> &Arc<dyn SystemBackend> {
        &self.backend
    }

    pub fn devices(&self) -> Result<Vec<Device>> {
        if let Ok(cache) = self.cache.read()
            && let Some(devices) = cache.as_ref()
        {
            return Ok(devices.clone());
        }

        let devices = self.backend.list_devices()?;
        debug!("loaded {} block devices", devices.len());
        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(devices.clone());
        }
        Ok(devices)
    }

    pub fn get_device(&self, path: &Path) -> Result<Option<Device>> {
        Ok(self.devices()?.into_iter().find(|d| d.path == path))
    }

    /// Drop the cached topology; the next lookup reads it again
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }

    pub fn mount_table(&self) -> Result<Vec<MountEntry>> {
        Ok(self.backend.mount_table()?)
    }

    /// Capture everything mounted at or below `root` as `Exist` modifications
    ///
    /// Sources the cached topology does not know trigger one reload; if they
    /// are still unknown afterwards they are skipped with a warning.
    pub fn detect_pre_mounted_mods(&self, root: &Path) -> Result<Vec<DeviceModification>> {
        let entries: Vec<MountEntry> = self
            .mount_table()?
            .into_iter()
            .filter(|e| e.is_under(root))
            .collect();

        let mut devices = self.devices()?;
        let mut reloaded = false;
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut modifications: Vec<DeviceModification> = Vec::new();

        for entry in &entries {
            let mut found = find_source(&devices, &entry.source);
            if found.is_none() && !reloaded {
                debug!(
                    "{} is not in the cached topology, reloading",
                    entry.source.display()
                );
                self.invalidate();
                devices = self.devices()?;
                reloaded = true;
                found = find_source(&devices, &entry.source);
            }

            let Some((device, info)) = found else {
                warn!(
                    "mount source {} at {} does not belong to a known disk, skipping",
                    entry.source.display(),
                    entry.target.display()
                );
                continue;
            };

            if !seen.insert(info.path.clone()) {
                debug!(
                    "{} is mounted more than once, keeping the first mountpoint",
                    info.path.display()
                );
                continue;
            }

            let relative = entry.target.strip_prefix(root).unwrap_or(Path::new(""));
            let mountpoint = Path::new("/").join(relative);

            let mut pm = PartitionModification::from_existing(info)
                .with_mountpoint(mountpoint)
                .with_dev_path(entry.source.clone())
                .with_mount_options(entry.options.iter().cloned());
            pm.fs_type = self.resolve_fs_type(entry);

            let device_path = device.path.clone();
            match modifications.iter_mut().find(|m| m.device.path == device_path) {
                Some(modification) => modification.add_partition(pm),
                None => {
                    let mut modification = DeviceModification::new(device.clone(), false);
                    modification.add_partition(pm);
                    modifications.push(modification);
                }
            }
        }

        Ok(modifications)
    }

    /// The on-disk signature wins over the mount table
    fn resolve_fs_type(&self, entry: &MountEntry) -> Option<FilesystemType> {
        let from_table = FilesystemType::parse(&entry.fs_type);
        match self.backend.probe_filesystem(&entry.source) {
            Ok(Some(probed)) => {
                if from_table.is_some_and(|t| t != probed) {
                    warn!(
                        "{} is mounted as {} but carries a {probed} signature",
                        entry.source.display(),
                        entry.fs_type
                    );
                }
                Some(probed)
            }
            Ok(None) => from_table,
            Err(err) => {
                warn!(
                    "could not probe the filesystem of {}: {err}",
                    entry.source.display()
                );
                from_table
            }
        }
    }
}

fn find_source<'a>(devices: &'a [Device], source: &Path) -> Option<(&'a Device, &'a PartitionInfo)> {
    devices
        .iter()
        .find_map(|d| d.find_partition(source).map(|p| (d, p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use install_testing::{FakeBackend, fixtures};
    use install_types::ModificationStatus;

    #[test]
    fn devices_are_cached_until_invalidated() {
        let fake = FakeBackend::new();
        fake.add_device(fixtures::disk("/dev/sda", 32));
        let handler = DeviceHandler::new(Arc::new(fake.clone()));

        assert_eq!(handler.devices().unwrap().len(), 1);
        assert!(handler.get_device(Path::new("/dev/sda")).unwrap().is_some());
        assert_eq!(fake.list_devices_count(), 1);

        handler.invalidate();
        handler.devices().unwrap();
        assert_eq!(fake.list_devices_count(), 2);
    }

    #[test]
    fn detects_mounts_under_root_grouped_per_device() {
        let fake = FakeBackend::new();
        fake.add_device(fixtures::partitioned_disk("/dev/vda", 32, 3));
        fake.add_mount("/dev/vda2", "/mnt/archinstall", "ext4");
        fake.add_mount("/dev/vda1", "/mnt/archinstall/boot", "vfat");
        fake.add_mount("/dev/sdz1", "/mnt/archinstall/ghost", "ext4");
        fake.add_mount("/dev/vda3", "/home", "ext4");

        let handler = DeviceHandler::new(Arc::new(fake.clone()));
        let mods = handler
            .detect_pre_mounted_mods(Path::new("/mnt/archinstall"))
            .unwrap();

        assert_eq!(mods.len(), 1);
        let dm = &mods[0];
        assert!(!dm.wipe);
        assert_eq!(dm.partitions.len(), 2);
        assert!(dm.partitions.iter().all(|p| p.status == ModificationStatus::Exist));
        assert_eq!(dm.partitions[0].mountpoint.as_deref(), Some(Path::new("/")));
        assert_eq!(dm.partitions[0].fs_type, Some(FilesystemType::Ext4));
        assert_eq!(dm.partitions[1].mountpoint.as_deref(), Some(Path::new("/boot")));
        assert_eq!(dm.partitions[1].fs_type, Some(FilesystemType::Fat32));

        // the unknown source forced exactly one reload
        assert_eq!(fake.list_devices_count(), 2);
    }

    #[test]
    fn probed_signature_wins_over_mount_table() {
        let fake = FakeBackend::new();
        fake.add_device(fixtures::partitioned_disk("/dev/vda", 32, 1));
        fake.add_mount("/dev/vda1", "/mnt/archinstall", "ext4");
        fake.set_probe("/dev/vda1", FilesystemType::Btrfs);

        let handler = DeviceHandler::new(Arc::new(fake));
        let mods = handler
            .detect_pre_mounted_mods(Path::new("/mnt/archinstall"))
            .unwrap();
        assert_eq!(mods[0].partitions[0].fs_type, Some(FilesystemType::Btrfs));
    }

    #[test]
    fn nothing_mounted_yields_no_modifications() {
        let fake = FakeBackend::new();
        fake.add_device(fixtures::disk("/dev/sda", 32));
        let handler = DeviceHandler::new(Arc::new(fake));
        assert!(
            handler
                .detect_pre_mounted_mods(Path::new("/mnt/archinstall"))
                .unwrap()
                .is_empty()
        );
    }
}
