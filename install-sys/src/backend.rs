// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use install_contracts::{
    BackendError, DeviceDiscovery, FilesystemOps, LuksOps, PartitionOps, TargetOps,
};
use install_types::{
    BlockIdentity, Device, FilesystemType, Fido2Device, FirmwareMode, MountEntry,
    PartitionModification, PartitionTableType, PartitionType, Password,
};
use tracing::{debug, info, warn};

use crate::block::{last_usable_sector, logical_sector_size};
use crate::cmd::{Runner, args, require_tool};
use crate::firmware::detect_firmware_mode;
use crate::lsblk::{LSBLK_COLUMNS, parse_lsblk};
use crate::mounts::read_mount_table;
use crate::{Result, SysError};

/// Backend that drives the real system through its command line tools
#[derive(Debug, Clone, Default)]
pub struct SysBackend {
    runner: Runner,
}

impl SysBackend {
    pub fn new(dry_run: bool) -> Self {
        if !dry_run && !nix::unistd::Uid::effective().is_root() {
            warn!("not running as root; device operations will most likely fail");
        }
        Self {
            runner: Runner::new(dry_run),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.runner.is_dry_run()
    }

    /// Tools that are only logged in dry-run mode need not be installed
    fn require(&self, tool: &str) -> Result<()> {
        if self.is_dry_run() {
            Ok(())
        } else {
            require_tool(tool)
        }
    }

    fn run(&self, tool: &str, argv: Vec<String>) -> Result<String> {
        self.require(tool)?;
        Ok(self.runner.run(tool, &argv)?.stdout)
    }

    fn run_with_secret(&self, tool: &str, argv: Vec<String>, secret: &str) -> Result<String> {
        self.require(tool)?;
        Ok(self
            .runner
            .run_with_input(tool, &argv, Some(secret), &[])?
            .stdout)
    }

    fn blkid_value(&self, path: &Path, tag: &str) -> Result<Option<String>> {
        require_tool("blkid")?;
        let argv = args(["-o", "value", "-s", tag]).into_iter().chain([path.display().to_string()]);
        match self.runner.query("blkid", &argv.collect::<Vec<_>>()) {
            Ok(out) => {
                let value = out.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            // blkid exits with 2 when nothing was found
            Err(SysError::CommandFailed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl DeviceDiscovery for SysBackend {
    fn list_devices(&self) -> std::result::Result<Vec<Device>, BackendError> {
        require_tool("lsblk")?;
        let out = self
            .runner
            .query("lsblk", &args(["--json", "--bytes", "--paths", "--output", LSBLK_COLUMNS]))?;
        let devices = parse_lsblk(&out)?;
        for device in &devices {
            let probed = logical_sector_size(&device.path);
            if probed != device.sector_size {
                debug!(
                    "sector size of {} from ioctl is {} bytes, lsblk reported {}",
                    device.path.display(),
                    probed.bytes(),
                    device.sector_size.bytes()
                );
            }
        }
        Ok(devices)
    }

    fn mount_table(&self) -> std::result::Result<Vec<MountEntry>, BackendError> {
        Ok(read_mount_table()?)
    }

    fn probe_filesystem(
        &self,
        path: &Path,
    ) -> std::result::Result<Option<FilesystemType>, BackendError> {
        let value = self.blkid_value(path, "TYPE")?;
        Ok(value.as_deref().and_then(FilesystemType::parse))
    }

    fn block_identity(&self, path: &Path) -> std::result::Result<BlockIdentity, BackendError> {
        Ok(BlockIdentity {
            uuid: self.blkid_value(path, "UUID")?,
            partuuid: self.blkid_value(path, "PARTUUID")?,
        })
    }

    fn firmware_mode(&self) -> FirmwareMode {
        detect_firmware_mode()
    }
}

impl PartitionOps for SysBackend {
    fn create_partition_table(
        &self,
        device: &Path,
        table_type: PartitionTableType,
    ) -> std::result::Result<(), BackendError> {
        info!(
            "creating {} partition table on {}",
            table_type.as_parted_label(),
            device.display()
        );
        self.run("wipefs", args([Path::new("--all"), device]))?;
        let dev = device.display().to_string();
        self.run(
            "parted",
            args(["-s", dev.as_str(), "mklabel", table_type.as_parted_label()]),
        )?;
        Ok(())
    }

    fn create_partition(
        &self,
        device: &Device,
        table_type: PartitionTableType,
        partition: &PartitionModification,
        number: u32,
    ) -> std::result::Result<PathBuf, BackendError> {
        let total = device.total_bytes().map_err(|e| SysError::Parse(e.to_string()))?;
        let range = partition
            .range(total)
            .map_err(|e| SysError::Parse(e.to_string()))?;
        let ss = device.sector_size.bytes();

        let start_sector = range.start / ss;
        let last = last_usable_sector(total, device.sector_size, table_type == PartitionTableType::Gpt);
        let end_sector = (range.end.div_ceil(ss).saturating_sub(1)).min(last);

        let part_label = match (table_type, partition.partition_type) {
            (PartitionTableType::Gpt, _) | (_, PartitionType::Primary) => "primary",
            (_, PartitionType::Extended) => "extended",
            (_, PartitionType::Logical) => "logical",
        };

        let dev = device.path.display().to_string();
        let mut argv = args(["-s", "-a", "optimal", dev.as_str(), "unit", "s", "mkpart", part_label]);
        if let Some(fs) = partition.fs_type {
            argv.push(fs.parted_type().to_string());
        }
        argv.push(format!("{start_sector}s"));
        argv.push(format!("{end_sector}s"));

        info!(
            "creating partition {number} on {dev}: sectors {start_sector}..={end_sector}"
        );
        self.run("parted", argv)?;

        let number_arg = number.to_string();
        for flag in partition.flags.iter() {
            self.run(
                "parted",
                args(["-s", dev.as_str(), "set", number_arg.as_str(), flag.parted_name(), "on"]),
            )?;
        }

        Ok(device.partition_path(number))
    }

    fn delete_partition(&self, device: &Path, number: u32) -> std::result::Result<(), BackendError> {
        info!("deleting partition {number} on {}", device.display());
        let dev = device.display().to_string();
        let number_arg = number.to_string();
        self.run("parted", args(["-s", dev.as_str(), "rm", number_arg.as_str()]))?;
        Ok(())
    }

    fn settle(&self, device: &Path) -> std::result::Result<(), BackendError> {
        // partprobe fails on busy disks even when the kernel already knows the table
        if let Err(err) = self.run("partprobe", args([device])) {
            warn!("partprobe {} failed: {err}", device.display());
        }
        self.run("udevadm", args(["settle"]))?;
        Ok(())
    }
}

impl FilesystemOps for SysBackend {
    fn format(
        &self,
        device: &Path,
        fs_type: FilesystemType,
    ) -> std::result::Result<(), BackendError> {
        let (tool, fixed) = fs_type.mkfs_command();
        info!("formatting {} as {fs_type}", device.display());
        let mut argv = args(fixed.iter());
        argv.push(device.display().to_string());
        self.run(tool, argv)?;
        Ok(())
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: Option<FilesystemType>,
        options: &[String],
    ) -> std::result::Result<(), BackendError> {
        if !self.is_dry_run() {
            fs::create_dir_all(target).map_err(SysError::from)?;
        }
        let mut argv = Vec::new();
        if let Some(fs) = fs_type {
            argv.extend(args(["-t", fs.mount_type()]));
        }
        if !options.is_empty() {
            argv.push("-o".to_string());
            argv.push(options.join(","));
        }
        argv.extend(args([source, target]));
        info!("mounting {} on {}", source.display(), target.display());
        self.run("mount", argv)?;
        Ok(())
    }

    fn unmount(&self, target: &Path, recursive: bool) -> std::result::Result<(), BackendError> {
        let mut argv = Vec::new();
        if recursive {
            argv.push("-R".to_string());
        }
        argv.push(target.display().to_string());
        info!("unmounting {}", target.display());
        self.run("umount", argv)?;
        Ok(())
    }

    fn swapoff(&self, device: &Path) -> std::result::Result<(), BackendError> {
        self.run("swapoff", args([device]))?;
        Ok(())
    }
}

impl LuksOps for SysBackend {
    fn luks_format(
        &self,
        device: &Path,
        password: &Password,
    ) -> std::result::Result<(), BackendError> {
        info!("creating LUKS2 container on {}", device.display());
        let argv = args([
            Path::new("--batch-mode"),
            Path::new("--type"),
            Path::new("luks2"),
            Path::new("--key-file"),
            Path::new("-"),
            Path::new("luksFormat"),
            device,
        ]);
        self.run_with_secret("cryptsetup", argv, password.expose())?;
        Ok(())
    }

    fn luks_open(
        &self,
        device: &Path,
        name: &str,
        password: &Password,
    ) -> std::result::Result<PathBuf, BackendError> {
        info!("unlocking {} as {name}", device.display());
        let dev = device.display().to_string();
        let argv = args(["--key-file", "-", "open", dev.as_str(), name]);
        self.run_with_secret("cryptsetup", argv, password.expose())?;
        Ok(Path::new("/dev/mapper").join(name))
    }

    fn luks_close(&self, name: &str) -> std::result::Result<(), BackendError> {
        self.run("cryptsetup", args(["close", name]))?;
        Ok(())
    }

    fn luks_add_key(
        &self,
        device: &Path,
        password: &Password,
        key_file: &Path,
    ) -> std::result::Result<(), BackendError> {
        info!("adding key file {} to {}", key_file.display(), device.display());
        let argv = args([
            Path::new("--batch-mode"),
            Path::new("--key-file"),
            Path::new("-"),
            Path::new("luksAddKey"),
            device,
            key_file,
        ]);
        self.run_with_secret("cryptsetup", argv, password.expose())?;
        Ok(())
    }

    fn fido2_enroll(
        &self,
        device: &Path,
        token: &Fido2Device,
        password: &Password,
    ) -> std::result::Result<(), BackendError> {
        self.require("systemd-cryptenroll")?;
        info!(
            "enrolling FIDO2 token {} for {}",
            token.path.display(),
            device.display()
        );
        let argv = args([
            format!("--fido2-device={}", token.path.display()),
            device.display().to_string(),
        ]);
        // systemd-cryptenroll reads the existing passphrase from $PASSWORD
        self.runner.run_with_input(
            "systemd-cryptenroll",
            &argv,
            None,
            &[("PASSWORD", password.expose())],
        )?;
        Ok(())
    }
}

impl TargetOps for SysBackend {
    fn pacstrap(&self, root: &Path, packages: &[String]) -> std::result::Result<(), BackendError> {
        info!("installing {} packages into {}", packages.len(), root.display());
        let mut argv = args([Path::new("-K"), root]);
        argv.extend(packages.iter().cloned());
        self.run("pacstrap", argv)?;
        Ok(())
    }

    fn chroot_run(
        &self,
        root: &Path,
        argv: &[&str],
        stdin: Option<&str>,
    ) -> std::result::Result<String, BackendError> {
        self.require("arch-chroot")?;
        let mut full = args([root]);
        full.extend(argv.iter().map(|a| a.to_string()));
        let outcome = self.runner.run_with_input("arch-chroot", &full, stdin, &[])?;
        Ok(outcome.stdout)
    }

    fn interactive_shell(&self, root: &Path) -> std::result::Result<(), BackendError> {
        if self.is_dry_run() {
            debug!("dry-run: arch-chroot {}", root.display());
            return Ok(());
        }
        require_tool("arch-chroot")?;
        let status = Command::new("arch-chroot")
            .arg(root)
            .status()
            .map_err(SysError::from)?;
        if !status.success() {
            return Err(SysError::CommandFailed {
                command: format!("arch-chroot {}", root.display()),
                stderr: format!("process exited with status {status}"),
            }
            .into());
        }
        Ok(())
    }
}
