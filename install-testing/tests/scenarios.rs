// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end runs of the filesystem handler and installer against the fake backend

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use install_core::{
    AssumeYes, DeviceHandler, FilesystemHandler, InstallError, Installer, InstallerHooks, Stage,
    StageOutcome, perform_installation,
};
use install_testing::{Call, FakeBackend, Op, fixtures};
use install_types::{
    Bootloader, DeviceModification, DiskEncryption, DiskLayoutConfiguration, FirmwareMode,
    InstallationConfig, ModificationStatus, Password, PlanningError, User,
};

fn devices(fake: &FakeBackend) -> Arc<DeviceHandler> {
    Arc::new(DeviceHandler::new(Arc::new(fake.clone())))
}

fn installation() -> InstallationConfig {
    InstallationConfig {
        users: vec![User::new("archie", "hunter2", true)],
        ..Default::default()
    }
}

#[test]
fn scenario_a_boot_and_root_without_encryption() {
    let fake = FakeBackend::new();
    let dir = tempfile::tempdir().unwrap();
    let layout = fixtures::boot_root_layout(fixtures::disk("/dev/sda", 64));
    let encryption = DiskEncryption::none();

    let applied = FilesystemHandler::new(&layout, &encryption, devices(&fake))
        .perform_filesystem_operations(&AssumeYes)
        .unwrap();
    assert_eq!(fake.count(Op::CreatePartition), 2);
    assert_eq!(fake.count(Op::Format), 2);
    assert_eq!(applied.partitions.len(), 2);

    let mut installer = Installer::new(
        dir.path(),
        layout,
        applied,
        encryption,
        vec!["linux".to_string()],
        Arc::new(fake.clone()),
    );
    installer.mount_ordered_layout().unwrap();

    let mounted: Vec<(PathBuf, PathBuf)> = fake
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Mount { source, target, .. } => Some((source, target)),
            _ => None,
        })
        .collect();
    assert_eq!(
        mounted,
        vec![
            (PathBuf::from("/dev/sda2"), dir.path().to_path_buf()),
            (PathBuf::from("/dev/sda1"), dir.path().join("boot")),
        ]
    );
}

#[test]
fn scenario_b_encrypted_root_is_referenced_through_its_mapping() {
    let fake = FakeBackend::new();
    let dir = tempfile::tempdir().unwrap();
    let layout = fixtures::boot_root_layout(fixtures::disk("/dev/sda", 64));
    let root = layout.root_partition().unwrap().id;
    let encryption = DiskEncryption::new(Password::new("correct horse"), vec![root]);
    encryption.validate(&layout).unwrap();

    let applied = FilesystemHandler::new(&layout, &encryption, devices(&fake))
        .perform_filesystem_operations(&AssumeYes)
        .unwrap();

    let calls = fake.calls();
    let opened = calls
        .iter()
        .position(|c| matches!(c, Call::LuksOpen { name, .. } if name == "luks-root"))
        .unwrap();
    let formatted = calls
        .iter()
        .position(|c| {
            matches!(c, Call::Format { device, .. } if device == Path::new("/dev/mapper/luks-root"))
        })
        .unwrap();
    assert!(opened < formatted);

    let mut installer = Installer::new(
        dir.path(),
        layout,
        applied,
        encryption,
        vec!["linux".to_string()],
        Arc::new(fake.clone()),
    );
    installer.mount_ordered_layout().unwrap();
    installer.genfstab().unwrap();

    let fstab = fs::read_to_string(dir.path().join("etc/fstab")).unwrap();
    assert!(fstab.contains("/dev/mapper/luks-root\t/\text4"));
    assert!(!fstab.contains("/dev/sda2"));

    installer.release();
    assert_eq!(fake.count(Op::LuksClose), 1);
}

#[test]
fn scenario_c_pre_mounted_tree_skips_mount_and_installs() {
    let fake = FakeBackend::new();
    fake.set_firmware(FirmwareMode::Bios);
    fake.add_device(fixtures::partitioned_disk("/dev/vda", 32, 2));
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("archinstall");
    fs::create_dir_all(&target).unwrap();
    fake.add_mount("/dev/vda2", &target, "ext4");

    let handler = devices(&fake);
    let detected = handler.detect_pre_mounted_mods(&target).unwrap();
    let layout = DiskLayoutConfiguration::pre_mount(&target, detected);
    let encryption = DiskEncryption::none();

    let applied = FilesystemHandler::new(&layout, &encryption, handler.clone())
        .perform_filesystem_operations(&AssumeYes)
        .unwrap();
    assert!(fake.calls().is_empty());
    assert_eq!(applied.root().unwrap().path, PathBuf::from("/dev/vda2"));

    let config = InstallationConfig {
        bootloader: Bootloader::Grub,
        ..installation()
    };
    let mut installer = Installer::new(
        &target,
        layout,
        applied,
        encryption,
        config.kernels.clone(),
        Arc::new(fake.clone()),
    )
    .with_live_root(dir.path().join("live"));

    let report =
        perform_installation(&mut installer, &config, &InstallerHooks::from_config(&config))
            .unwrap();
    assert!(matches!(
        report.outcome(Stage::Mount),
        Some(StageOutcome::Skipped(_))
    ));
    assert!(report.completed(Stage::SanityCheck));
    assert!(report.completed(Stage::Bootstrap));
    assert!(report.completed(Stage::Fstab));
    assert_eq!(fake.count(Op::Mount), 0);
    assert_eq!(fake.count(Op::Unmount), 1);
}

#[test]
fn scenario_c_nothing_mounted_means_nothing_to_install() {
    let fake = FakeBackend::new();
    let dir = tempfile::tempdir().unwrap();
    let handler = devices(&fake);
    let detected = handler.detect_pre_mounted_mods(dir.path()).unwrap();
    assert!(detected.is_empty());

    let layout = DiskLayoutConfiguration::pre_mount(dir.path(), detected);
    let mut installer = Installer::new(
        dir.path(),
        layout,
        Default::default(),
        DiskEncryption::none(),
        vec!["linux".to_string()],
        Arc::new(fake.clone()),
    );
    let err = perform_installation(&mut installer, &installation(), &InstallerHooks::default())
        .unwrap_err();
    match err {
        InstallError::Stage { stage, source } => {
            assert_eq!(stage, Stage::SanityCheck);
            assert!(matches!(*source, InstallError::NothingToInstall(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn scenario_d_overlapping_partitions_are_rejected_before_any_device_call() {
    let fake = FakeBackend::new();
    let device = fixtures::disk("/dev/sda", 16);
    let mut modification = DeviceModification::new(device, true);
    modification.add_partition(install_types::PartitionModification::new(
        ModificationStatus::Create,
        fixtures::mib(1),
        fixtures::mib(1024),
    ));
    modification.add_partition(install_types::PartitionModification::new(
        ModificationStatus::Create,
        fixtures::mib(512),
        fixtures::mib(1024),
    ));
    let layout = DiskLayoutConfiguration::new(vec![modification]);
    let encryption = DiskEncryption::none();

    let handler = FilesystemHandler::new(&layout, &encryption, devices(&fake));
    assert!(matches!(
        handler.validate(),
        Err(InstallError::Planning(PlanningError::Overlap { .. }))
    ));
    assert!(matches!(
        handler.perform_filesystem_operations(&AssumeYes),
        Err(InstallError::Planning(PlanningError::Overlap { .. }))
    ));
    assert!(fake.calls().is_empty());
}

#[test]
fn scenario_d_new_partition_on_top_of_an_unlisted_one_is_rejected() {
    let fake = FakeBackend::new();
    let device = fixtures::partitioned_disk("/dev/sda", 64, 3);
    let third = device.partitions[2].clone();
    let mut modification = DeviceModification::new(device, false);
    modification.add_partition(
        install_types::PartitionModification::new(
            ModificationStatus::Create,
            third.start,
            fixtures::mib(1024),
        )
        .with_fs(install_types::FilesystemType::Ext4)
        .with_mountpoint("/"),
    );
    let layout = DiskLayoutConfiguration::new(vec![modification]);
    let encryption = DiskEncryption::none();

    let handler = FilesystemHandler::new(&layout, &encryption, devices(&fake));
    assert!(matches!(
        handler.validate(),
        Err(InstallError::Planning(PlanningError::OverlapsExisting { existing, .. }))
            if existing == third.path
    ));
    assert!(handler.perform_filesystem_operations(&AssumeYes).is_err());
    assert!(fake.calls().is_empty());
    assert_eq!(fake.count(Op::Format), 0);
}
