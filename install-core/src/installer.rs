// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use install_contracts::SystemBackend;
use install_types::{
    AdditionalRepository, BlockIdentity, Bootloader, DiskEncryption, DiskLayoutConfiguration,
    FirmwareMode, LocaleConfig, MirrorConfiguration, Password, PlanningError, User,
};
use tracing::{debug, info, warn};

use crate::{AppliedLayout, AppliedPartition, InstallError, Result, Stage, fstab, pacman};

const KEY_DIR: &str = "etc/cryptsetup-keys.d";
const KEY_SIZE: usize = 512;
const BASE_PACKAGES: [&str; 3] = ["base", "sudo", "linux-firmware"];

/// An installation onto the tree mounted at `target`
///
/// The installer owns the mounted tree: it is unmounted, and the containers
/// opened for it closed, exactly once, by [`Installer::release`] or on drop.
pub struct Installer {
    target: PathBuf,
    disk_config: DiskLayoutConfiguration,
    applied: AppliedLayout,
    encryption: DiskEncryption,
    kernels: Vec<String>,
    backend: Arc<dyn SystemBackend>,
    firmware: FirmwareMode,
    live_root: PathBuf,

    /// Queued until bootstrap, installed right away afterwards
    helper_packages: Vec<String>,
    bootstrapped: bool,

    stage: Option<Stage>,
    mounted: bool,
    released: bool,
}

impl Installer {
    pub fn new(
        mountpoint: impl Into<PathBuf>,
        disk_config: DiskLayoutConfiguration,
        applied: AppliedLayout,
        encryption: DiskEncryption,
        kernels: Vec<String>,
        backend: Arc<dyn SystemBackend>,
    ) -> Self {
        let firmware = backend.firmware_mode();
        let target = mountpoint.into();
        info!(
            "installing onto {} ({firmware:?} firmware)",
            target.display()
        );
        Self {
            target,
            disk_config,
            applied,
            encryption,
            kernels,
            backend,
            firmware,
            live_root: PathBuf::from("/"),
            helper_packages: Vec::new(),
            bootstrapped: false,
            stage: None,
            mounted: false,
            released: false,
        }
    }

    /// Root of the running system; mirror and network settings are read from
    /// and written below it
    pub fn with_live_root(mut self, live_root: impl Into<PathBuf>) -> Self {
        self.live_root = live_root.into();
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn live_root(&self) -> &Path {
        &self.live_root
    }

    pub fn firmware(&self) -> FirmwareMode {
        self.firmware
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn disk_config(&self) -> &DiskLayoutConfiguration {
        &self.disk_config
    }

    pub fn applied(&self) -> &AppliedLayout {
        &self.applied
    }

    pub fn encryption(&self) -> &DiskEncryption {
        &self.encryption
    }

    pub fn kernels(&self) -> &[String] {
        &self.kernels
    }

    pub fn backend(&self) -> &Arc<dyn SystemBackend> {
        &self.backend
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Advance the stage marker; it never moves backwards
    pub fn enter_stage(&mut self, stage: Stage) -> Result<()> {
        if let Some(current) = self.stage
            && stage < current
        {
            return Err(InstallError::StageOrder {
                current,
                requested: stage,
            });
        }
        self.stage = Some(stage);
        Ok(())
    }

    /// Host path of `relative` inside the target
    pub fn target_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        self.target
            .join(relative.strip_prefix("/").unwrap_or(relative))
    }

    /// Write a file inside the target, creating its parent directories
    pub fn write_target_file(&self, relative: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
        let path = self.target_path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(InstallError::io(parent))?;
        }
        fs::write(&path, contents).map_err(InstallError::io(&path))?;
        debug!("wrote {}", path.display());
        Ok(path)
    }

    fn read_target_file(&self, relative: impl AsRef<Path>) -> Result<Option<String>> {
        let path = self.target_path(relative);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(InstallError::Io { path, source: err }),
        }
    }

    /// Run a shell command inside the target
    pub fn arch_chroot(&self, command: &str) -> Result<String> {
        self.chroot(&["sh", "-c", command])
    }

    fn chroot(&self, args: &[&str]) -> Result<String> {
        Ok(self.backend.chroot_run(&self.target, args, None)?)
    }

    /// Mount every applied partition below the target, parents first
    pub fn mount_ordered_layout(&mut self) -> Result<()> {
        let order: Vec<(PathBuf, PathBuf, AppliedPartition)> = self
            .applied
            .mount_order()
            .into_iter()
            .filter_map(|p| {
                p.target_under(&self.target)
                    .map(|target| (p.fs_device(), target, p.clone()))
            })
            .collect();

        if order.is_empty() {
            return Err(InstallError::NothingToInstall(self.target.clone()));
        }

        for (source, target, partition) in order {
            info!("mounting {} at {}", source.display(), target.display());
            self.backend.mount(
                &source,
                &target,
                partition.fs_type,
                &partition.mount_options,
            )?;
            self.mounted = true;
        }
        Ok(())
    }

    /// The target is a mountpoint and everything the layout placed is mounted
    pub fn sanity_check(&self) -> Result<()> {
        if !self.target.is_dir() {
            return Err(InstallError::NotMounted(self.target.clone()));
        }

        let table = self.backend.mount_table()?;
        let is_mounted = |path: &Path| table.iter().any(|e| e.target == path);

        if !is_mounted(&self.target) {
            return Err(if self.disk_config.is_pre_mount() {
                InstallError::NothingToInstall(self.target.clone())
            } else {
                InstallError::NotMounted(self.target.clone())
            });
        }

        for partition in self.applied.mount_order() {
            if let Some(target) = partition.target_under(&self.target)
                && !is_mounted(&target)
            {
                return Err(InstallError::NotMounted(target));
            }
        }
        Ok(())
    }

    /// Key files let the initramfs unlock every encrypted partition but root
    /// without asking again
    pub fn generate_key_files(&self) -> Result<()> {
        let Some(password) = self.encryption.encryption_password.as_ref() else {
            return Err(PlanningError::MissingEncryptionPassword.into());
        };

        let partitions: Vec<&AppliedPartition> = self
            .applied
            .encrypted()
            .filter(|p| !p.is_root())
            .collect();
        if partitions.is_empty() {
            debug!("only the root partition is encrypted, no key files needed");
            return Ok(());
        }

        let key_dir = self.target_path(KEY_DIR);
        fs::create_dir_all(&key_dir).map_err(InstallError::io(&key_dir))?;
        fs::set_permissions(&key_dir, fs::Permissions::from_mode(0o700))
            .map_err(InstallError::io(&key_dir))?;

        let mut crypttab = self.read_target_file("etc/crypttab")?.unwrap_or_default();
        for partition in partitions {
            let Some(name) = partition.mapper_name.as_deref() else {
                continue;
            };
            let key_file = key_dir.join(format!("{name}.key"));
            write_key_file(&key_file)?;
            self.backend
                .luks_add_key(&partition.path, password, &key_file)?;

            let identity = self.backend.block_identity(&partition.path)?;
            let source = match identity.uuid {
                Some(uuid) => format!("UUID={uuid}"),
                None => partition.path.display().to_string(),
            };
            let line = format!("{name} {source} /{KEY_DIR}/{name}.key\n");
            if !crypttab.contains(&line) {
                crypttab.push_str(&line);
            }
            info!("key file for {} added", partition.path.display());
        }
        self.write_target_file("etc/crypttab", &crypttab)?;
        Ok(())
    }

    /// Write the mirror list and custom repositories, on the live system or
    /// inside the target
    pub fn set_mirrors(&self, mirrors: &MirrorConfiguration, on_target: bool) -> Result<()> {
        let root = if on_target {
            self.target.as_path()
        } else {
            self.live_root.as_path()
        };
        info!(
            "applying {} mirror(s) and {} custom repositories to {}",
            mirrors.servers.len(),
            mirrors.custom_repositories.len(),
            root.display()
        );

        if !mirrors.servers.is_empty() {
            let path = root.join("etc/pacman.d/mirrorlist");
            write_file(&path, &mirrors.mirrorlist())?;
        }

        if !mirrors.custom_repositories.is_empty() {
            let path = root.join("etc/pacman.conf");
            let mut conf = read_file(&path)?.unwrap_or_default();
            for repo in &mirrors.custom_repositories {
                if conf.contains(&format!("[{}]", repo.name)) {
                    continue;
                }
                let single = MirrorConfiguration {
                    servers: Vec::new(),
                    custom_repositories: vec![repo.clone()],
                };
                conf.push_str(&single.pacman_sections());
            }
            write_file(&path, &conf)?;
        }
        Ok(())
    }

    /// Bootstrap the base system, then hostname, locale and initramfs
    pub fn minimal_installation(
        &mut self,
        repositories: &[AdditionalRepository],
        parallel_downloads: u8,
        hostname: &str,
        locale: &LocaleConfig,
    ) -> Result<()> {
        let live_conf = self.live_root.join("etc/pacman.conf");
        if let Some(conf) = read_file(&live_conf)? {
            let edited = pacman::set_parallel_downloads(
                &pacman::enable_repositories(&conf, repositories),
                parallel_downloads,
            );
            if edited != conf {
                write_file(&live_conf, &edited)?;
            }
        }

        let mut packages: Vec<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
        packages.extend(self.kernels.iter().cloned());
        for fs_type in self.applied.filesystems() {
            packages.extend(fs_type.installation_packages().iter().map(|p| p.to_string()));
        }
        packages.append(&mut self.helper_packages);
        dedup_in_place(&mut packages);

        info!("bootstrapping {} packages into {}", packages.len(), self.target.display());
        self.backend.pacstrap(&self.target, &packages)?;
        self.bootstrapped = true;

        if let Some(conf) = self.read_target_file("etc/pacman.conf")? {
            let edited = pacman::enable_repositories(&conf, repositories);
            if edited != conf {
                self.write_target_file("etc/pacman.conf", &edited)?;
            }
        }

        self.write_target_file("etc/hostname", &format!("{hostname}\n"))?;
        self.set_locale(locale)?;
        self.configure_initramfs()?;
        Ok(())
    }

    fn set_locale(&self, locale: &LocaleConfig) -> Result<()> {
        let line = locale.locale_gen_line();
        let existing = self.read_target_file("etc/locale.gen")?.unwrap_or_default();
        let mut found = false;
        let mut lines: Vec<String> = existing
            .lines()
            .map(|l| {
                if l.trim_start_matches('#').trim() == line {
                    found = true;
                    line.clone()
                } else {
                    l.to_string()
                }
            })
            .collect();
        if !found {
            lines.push(line);
        }
        self.write_target_file("etc/locale.gen", &(lines.join("\n") + "\n"))?;
        self.chroot(&["locale-gen"])?;

        self.write_target_file("etc/locale.conf", &format!("LANG={}\n", locale.lang()))?;
        self.write_target_file(
            "etc/vconsole.conf",
            &format!("KEYMAP={}\n", locale.keyboard_layout),
        )?;
        Ok(())
    }

    fn configure_initramfs(&self) -> Result<()> {
        if self.applied.encrypted().next().is_some() {
            let conf = self
                .read_target_file("etc/mkinitcpio.conf")?
                .unwrap_or_default();
            self.write_target_file("etc/mkinitcpio.conf", &with_encrypt_hook(&conf))?;
        }
        self.chroot(&["mkinitcpio", "-P"])?;
        Ok(())
    }

    /// Install `packages` now, or with the bootstrap when it has not run yet
    pub fn add_additional_packages<S: AsRef<str>>(&mut self, packages: &[S]) -> Result<()> {
        let packages: Vec<String> = packages
            .iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if packages.is_empty() {
            return Ok(());
        }

        if self.bootstrapped {
            info!("installing {}", packages.join(" "));
            self.backend.pacstrap(&self.target, &packages)?;
        } else {
            debug!("queueing {} for the bootstrap", packages.join(" "));
            self.helper_packages.extend(packages);
        }
        Ok(())
    }

    /// Compressed swap in RAM
    pub fn setup_swap_zram(&mut self) -> Result<()> {
        self.add_additional_packages(&["zram-generator"])?;
        self.write_target_file(
            "etc/systemd/zram-generator.conf",
            "[zram0]\nzram-size = min(ram / 2, 4096)\ncompression-algorithm = zstd\n",
        )?;
        self.enable_service(&["systemd-zram-setup@zram0.service"])
    }

    pub fn add_bootloader(&mut self, bootloader: Bootloader) -> Result<()> {
        if bootloader.requires_uefi() && self.firmware != FirmwareMode::Uefi {
            return Err(InstallError::Unsupported(format!(
                "{bootloader:?} needs UEFI firmware, this system booted in BIOS mode"
            )));
        }
        info!("installing the {bootloader:?} boot loader");
        match bootloader {
            Bootloader::SystemdBoot => self.add_systemd_boot(),
            Bootloader::Grub => self.add_grub(),
            Bootloader::Efistub => self.add_efistub(),
        }
    }

    fn boot_mountpoint(&self) -> Result<PathBuf> {
        self.applied
            .boot()
            .and_then(|p| p.mountpoint.clone())
            .ok_or_else(|| {
                InstallError::Unsupported("the layout has no boot or EFI system partition".to_string())
            })
    }

    /// Boot loaders that read the kernel from the ESP need it mounted at /boot,
    /// where pacman installs the images
    fn esp_holding_kernels(&self, bootloader: Bootloader) -> Result<PathBuf> {
        let esp = self
            .applied
            .esp()
            .and_then(|p| p.mountpoint.clone())
            .ok_or_else(|| InstallError::Unsupported("no EFI system partition".to_string()))?;
        if esp != Path::new("/boot") {
            return Err(InstallError::Unsupported(format!(
                "{bootloader:?} loads the kernel from the EFI system partition, \
                 which is mounted at {} instead of /boot",
                esp.display()
            )));
        }
        Ok(esp)
    }

    /// Kernel parameters locating the root filesystem
    pub fn kernel_parameters(&self) -> Result<String> {
        let root = self
            .applied
            .root()
            .ok_or_else(|| PlanningError::InvalidLayout("no root partition".to_string()))?;

        let params = match root.mapper_name.as_deref() {
            Some(name) => {
                let container = self.identity_reference(&root.path)?;
                format!("cryptdevice={container}:{name} root=/dev/mapper/{name}")
            }
            None => format!("root={}", self.identity_reference(&root.path)?),
        };
        Ok(format!("{params} rw"))
    }

    fn identity_reference(&self, device: &Path) -> Result<String> {
        let identity = self.backend.block_identity(device)?;
        Ok(match identity {
            BlockIdentity { uuid: Some(uuid), .. } => format!("UUID={uuid}"),
            BlockIdentity {
                partuuid: Some(partuuid),
                ..
            } => format!("PARTUUID={partuuid}"),
            _ => device.display().to_string(),
        })
    }

    fn add_systemd_boot(&mut self) -> Result<()> {
        let boot = self.esp_holding_kernels(Bootloader::SystemdBoot)?;
        let esp_path = format!("--esp-path={}", boot.display());
        self.chroot(&["bootctl", esp_path.as_str(), "install"])?;

        let options = self.kernel_parameters()?;
        let first = self.kernels.first().cloned().unwrap_or_else(|| "linux".to_string());
        self.write_target_file(
            boot.join("loader/loader.conf"),
            &format!("default arch-{first}.conf\ntimeout 3\n"),
        )?;
        for kernel in &self.kernels {
            let entry = format!(
                "title Arch Linux ({kernel})\nlinux /vmlinuz-{kernel}\ninitrd /initramfs-{kernel}.img\noptions {options}\n"
            );
            self.write_target_file(boot.join(format!("loader/entries/arch-{kernel}.conf")), &entry)?;
        }
        Ok(())
    }

    fn add_grub(&mut self) -> Result<()> {
        let mut packages = vec!["grub"];
        if self.firmware == FirmwareMode::Uefi {
            packages.push("efibootmgr");
        }
        self.add_additional_packages(&packages)?;

        if let Some(root) = self.applied.root()
            && let Some(name) = root.mapper_name.as_deref()
        {
            let container = self.identity_reference(&root.path)?;
            let mut defaults = self.read_target_file("etc/default/grub")?.unwrap_or_default();
            defaults.push_str(&format!(
                "GRUB_CMDLINE_LINUX=\"cryptdevice={container}:{name}\"\n"
            ));
            self.write_target_file("etc/default/grub", &defaults)?;
        }

        match self.firmware {
            FirmwareMode::Uefi => {
                let boot = self.boot_mountpoint()?;
                let efi_dir = format!("--efi-directory={}", boot.display());
                self.chroot(&[
                    "grub-install",
                    "--target=x86_64-efi",
                    efi_dir.as_str(),
                    "--bootloader-id=GRUB",
                    "--removable",
                ])?;
            }
            FirmwareMode::Bios => {
                let root = self
                    .applied
                    .root()
                    .ok_or_else(|| PlanningError::InvalidLayout("no root partition".to_string()))?;
                let disk = root.device.display().to_string();
                self.chroot(&["grub-install", "--target=i386-pc", "--recheck", disk.as_str()])?;
            }
        }
        self.chroot(&["grub-mkconfig", "-o", "/boot/grub/grub.cfg"])?;
        Ok(())
    }

    fn add_efistub(&mut self) -> Result<()> {
        self.esp_holding_kernels(Bootloader::Efistub)?;
        self.add_additional_packages(&["efibootmgr"])?;
        let esp = self
            .applied
            .esp()
            .cloned()
            .ok_or_else(|| InstallError::Unsupported("no EFI system partition".to_string()))?;
        let number = esp.number.unwrap_or(1).to_string();
        let disk = esp.device.display().to_string();
        let options = self.kernel_parameters()?;

        for kernel in self.kernels.clone() {
            let label = format!("Arch Linux ({kernel})");
            let loader = format!("/vmlinuz-{kernel}");
            let cmdline = format!("{options} initrd=\\initramfs-{kernel}.img");
            self.chroot(&[
                "efibootmgr",
                "--disk",
                disk.as_str(),
                "--part",
                number.as_str(),
                "--create",
                "--label",
                label.as_str(),
                "--loader",
                loader.as_str(),
                "--unicode",
                cmdline.as_str(),
                "--verbose",
            ])?;
        }
        Ok(())
    }

    pub fn enable_service<S: AsRef<str>>(&self, services: &[S]) -> Result<()> {
        for service in services {
            let service = service.as_ref();
            info!("enabling {service}");
            self.chroot(&["systemctl", "enable", service])?;
        }
        Ok(())
    }

    pub fn create_users(&self, users: &[User]) -> Result<()> {
        for user in users {
            self.create_user(user)?;
        }
        Ok(())
    }

    fn create_user(&self, user: &User) -> Result<()> {
        info!("creating user {}", user.username);
        let mut args = vec!["useradd", "-m"];
        if user.is_sudoer {
            args.extend(["-G", "wheel"]);
        }
        args.push(user.username.as_str());
        self.chroot(&args)?;
        self.user_set_pw(&user.username, &user.password)?;

        if user.is_sudoer {
            let path = self.write_target_file(
                format!("etc/sudoers.d/00_{}", user.username),
                &format!("{} ALL=(ALL) ALL\n", user.username),
            )?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o440))
                .map_err(InstallError::io(&path))?;
        }
        Ok(())
    }

    pub fn user_set_pw(&self, username: &str, password: &Password) -> Result<()> {
        let input = format!("{username}:{}\n", password.expose());
        self.backend
            .chroot_run(&self.target, &["chpasswd"], Some(&input))?;
        debug!("password set for {username}");
        Ok(())
    }

    pub fn set_timezone(&self, zone: &str) -> Result<()> {
        if zone.is_empty() || zone.split('/').any(|c| c == ".." || c.is_empty()) {
            return Err(InstallError::Unsupported(format!("invalid time zone '{zone}'")));
        }
        let link = self.target_path("etc/localtime");
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent).map_err(InstallError::io(parent))?;
        }
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link).map_err(InstallError::io(&link))?;
        }
        std::os::unix::fs::symlink(format!("/usr/share/zoneinfo/{zone}"), &link)
            .map_err(InstallError::io(&link))?;
        info!("time zone set to {zone}");
        Ok(())
    }

    pub fn activate_time_synchronization(&self) -> Result<()> {
        self.enable_service(&["systemd-timesyncd.service"])
    }

    pub fn run_custom_user_commands<S: AsRef<str>>(&self, commands: &[S]) -> Result<()> {
        for command in commands {
            let output = self.arch_chroot(command.as_ref())?;
            debug!("custom command output: {}", output.trim());
        }
        Ok(())
    }

    /// Overwrite `/etc/fstab` from what is mounted below the target
    pub fn genfstab(&self) -> Result<()> {
        let entries = self.backend.mount_table()?;
        let mut identities: HashMap<PathBuf, BlockIdentity> = HashMap::new();
        for entry in entries.iter().filter(|e| e.is_under(&self.target)) {
            if !entry.source.starts_with("/dev") || entry.source.starts_with("/dev/mapper") {
                continue;
            }
            match self.backend.block_identity(&entry.source) {
                Ok(identity) => {
                    identities.insert(entry.source.clone(), identity);
                }
                Err(err) => warn!(
                    "no identity for {}, referencing it by path: {err}",
                    entry.source.display()
                ),
            }
        }

        let rendered = fstab::render_fstab(&entries, &self.target, &identities);
        self.write_target_file("etc/fstab", &rendered)?;
        info!("fstab written");
        Ok(())
    }

    pub fn drop_to_shell(&self) -> Result<()> {
        Ok(self.backend.interactive_shell(&self.target)?)
    }

    /// Unmount the tree and close the containers opened for it
    ///
    /// Runs once; later calls and the drop that follows do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.mounted || self.disk_config.is_pre_mount() {
            info!("unmounting {}", self.target.display());
            if let Err(err) = self.backend.unmount(&self.target, true) {
                warn!("could not unmount {}: {err}", self.target.display());
            }
        }

        if self.disk_config.is_pre_mount() {
            return;
        }
        let names: Vec<String> = self
            .applied
            .encrypted()
            .filter_map(|p| p.mapper_name.clone())
            .collect();
        for name in names {
            if let Err(err) = self.backend.luks_close(&name) {
                warn!("could not close {name}: {err}");
            }
        }
    }
}

impl Drop for Installer {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_file(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(InstallError::Io {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(InstallError::io(parent))?;
    }
    fs::write(path, contents).map_err(InstallError::io(path))
}

fn write_key_file(path: &Path) -> Result<()> {
    let mut key = [0u8; KEY_SIZE];
    fs::File::open("/dev/urandom")
        .and_then(|mut random| random.read_exact(&mut key))
        .map_err(InstallError::io("/dev/urandom"))?;
    fs::write(path, key).map_err(InstallError::io(path))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o400)).map_err(InstallError::io(path))
}

/// Insert `encrypt` before `filesystems` in the HOOKS array
fn with_encrypt_hook(conf: &str) -> String {
    let mut replaced = false;
    let mut lines: Vec<String> = conf
        .lines()
        .map(|line| {
            let Some(hooks) = line.strip_prefix("HOOKS=(").and_then(|l| l.strip_suffix(')')) else {
                return line.to_string();
            };
            replaced = true;
            let mut hooks: Vec<&str> = hooks.split_whitespace().collect();
            if !hooks.contains(&"encrypt") {
                let at = hooks
                    .iter()
                    .position(|h| *h == "filesystems")
                    .unwrap_or(hooks.len());
                hooks.insert(at, "encrypt");
            }
            format!("HOOKS=({})", hooks.join(" "))
        })
        .collect();

    if !replaced {
        lines.push(
            "HOOKS=(base udev autodetect microcode modconf kms keyboard keymap consolefont block encrypt filesystems fsck)"
                .to_string(),
        );
    }
    lines.join("\n") + "\n"
}

fn dedup_in_place(packages: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    packages.retain(|p| seen.insert(p.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use install_testing::{Call, FakeBackend, Op, fixtures};
    use install_types::{DiskEncryption, FilesystemType, ModificationStatus, PartitionFlag};

    use crate::test_support::applied_boot_root;

    fn installer(fake: &FakeBackend, target: &Path, applied: AppliedLayout) -> Installer {
        let layout = fixtures::boot_root_layout(fixtures::disk("/dev/sda", 64));
        Installer::new(
            target,
            layout,
            applied,
            DiskEncryption::none(),
            vec!["linux".to_string()],
            Arc::new(fake.clone()),
        )
        .with_live_root(target.join("live"))
    }

    #[test]
    fn stage_marker_never_moves_backwards() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let mut installer = installer(&fake, dir.path(), AppliedLayout::default());

        installer.enter_stage(Stage::Mount).unwrap();
        installer.enter_stage(Stage::Bootstrap).unwrap();
        installer.enter_stage(Stage::Bootstrap).unwrap();
        let err = installer.enter_stage(Stage::Mirrors).unwrap_err();
        assert!(matches!(
            err,
            InstallError::StageOrder {
                current: Stage::Bootstrap,
                requested: Stage::Mirrors
            }
        ));
    }

    #[test]
    fn mounts_root_before_boot_and_unmounts_once() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let applied = applied_boot_root();
        let mut installer = installer(&fake, dir.path(), applied);

        installer.mount_ordered_layout().unwrap();
        installer.sanity_check().unwrap();

        let mounts: Vec<PathBuf> = fake
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Mount { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(mounts, vec![dir.path().to_path_buf(), dir.path().join("boot")]);

        installer.release();
        drop(installer);
        assert_eq!(fake.count(Op::Unmount), 1);
    }

    #[test]
    fn sanity_check_reports_missing_mounts() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let applied = applied_boot_root();
        let installer = installer(&fake, dir.path(), applied);

        assert!(matches!(
            installer.sanity_check().unwrap_err(),
            InstallError::NotMounted(_)
        ));
    }

    #[test]
    fn packages_queue_until_bootstrap() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let mut installer = installer(&fake, dir.path(), applied_boot_root());

        installer.add_additional_packages(&["grub", "", "  "]).unwrap();
        assert_eq!(fake.count(Op::Pacstrap), 0);

        installer
            .minimal_installation(&[], 0, "box", &LocaleConfig::default())
            .unwrap();
        let bootstrap = fake
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::Pacstrap { packages, .. } => Some(packages),
                _ => None,
            })
            .unwrap();
        assert!(bootstrap.contains(&"base".to_string()));
        assert!(bootstrap.contains(&"linux".to_string()));
        assert!(bootstrap.contains(&"dosfstools".to_string()));
        assert!(bootstrap.contains(&"grub".to_string()));

        installer.add_additional_packages(&["vim"]).unwrap();
        assert_eq!(fake.count(Op::Pacstrap), 2);

        assert_eq!(
            fs::read_to_string(dir.path().join("etc/hostname")).unwrap(),
            "box\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/locale.conf")).unwrap(),
            "LANG=en_US.UTF-8\n"
        );
    }

    #[test]
    fn encrypted_layout_gets_key_files_and_encrypt_hook() {
        let fake = FakeBackend::new();
        fake.set_identity("/dev/sda3", "c0ffee00-0000-4000-8000-000000000003");
        let dir = tempfile::tempdir().unwrap();

        let mut applied = applied_boot_root();
        applied.partitions[1].mapper_name = Some("luks-root".to_string());
        let mib = install_types::Size::new(1, install_types::Unit::MiB, Default::default());
        let home = install_types::PartitionModification::new(ModificationStatus::Create, mib, mib)
            .with_fs(FilesystemType::Ext4)
            .with_mountpoint("/home");
        applied.partitions.push(AppliedPartition::from_modification(
            Path::new("/dev/sda"),
            &home,
            PathBuf::from("/dev/sda3"),
            Some(3),
            Some("luks-home".to_string()),
        ));

        let layout = fixtures::boot_root_layout(fixtures::disk("/dev/sda", 64));
        let installer = Installer::new(
            dir.path(),
            layout,
            applied,
            DiskEncryption::new(Password::new("secret"), Vec::new()),
            vec!["linux".to_string()],
            Arc::new(fake.clone()),
        );

        installer.generate_key_files().unwrap();
        let key = dir.path().join("etc/cryptsetup-keys.d/luks-home.key");
        assert_eq!(fs::metadata(&key).unwrap().len(), KEY_SIZE as u64);
        assert_eq!(fake.count(Op::LuksAddKey), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/crypttab")).unwrap(),
            "luks-home UUID=c0ffee00-0000-4000-8000-000000000003 /etc/cryptsetup-keys.d/luks-home.key\n"
        );

        installer.configure_initramfs().unwrap();
        let conf = fs::read_to_string(dir.path().join("etc/mkinitcpio.conf")).unwrap();
        assert!(conf.contains("block encrypt filesystems"));
    }

    #[test]
    fn encrypt_hook_is_inserted_once() {
        let conf = "MODULES=()\nHOOKS=(base udev block filesystems fsck)\n";
        let once = with_encrypt_hook(conf);
        assert_eq!(once, "MODULES=()\nHOOKS=(base udev block encrypt filesystems fsck)\n");
        assert_eq!(with_encrypt_hook(&once), once);
    }

    #[test]
    fn uefi_only_bootloaders_fail_on_bios() {
        let fake = FakeBackend::new();
        fake.set_firmware(FirmwareMode::Bios);
        let dir = tempfile::tempdir().unwrap();
        let mut installer = installer(&fake, dir.path(), applied_boot_root());

        assert!(matches!(
            installer.add_bootloader(Bootloader::SystemdBoot).unwrap_err(),
            InstallError::Unsupported(_)
        ));
        installer.add_bootloader(Bootloader::Grub).unwrap();
        assert!(fake.calls().iter().any(|c| matches!(
            c,
            Call::Chroot { args, .. } if args.iter().any(|a| a == "--target=i386-pc")
        )));
    }

    #[test]
    fn systemd_boot_entries_reference_the_root_uuid() {
        let fake = FakeBackend::new();
        fake.set_identity("/dev/sda2", "aaaa-bbbb");
        let dir = tempfile::tempdir().unwrap();
        let mut installer = installer(&fake, dir.path(), applied_boot_root());

        installer.add_bootloader(Bootloader::SystemdBoot).unwrap();
        let entry =
            fs::read_to_string(dir.path().join("boot/loader/entries/arch-linux.conf")).unwrap();
        assert!(entry.contains("options root=UUID=aaaa-bbbb rw\n"));
    }

    #[test]
    fn esp_loaders_need_the_esp_at_boot() {
        let mut layout = fixtures::boot_root_layout(fixtures::disk("/dev/sda", 64));
        let esp = &mut layout.device_modifications[0].partitions[0];
        esp.mountpoint = Some(PathBuf::from("/boot/efi"));
        esp.flags = PartitionFlag::Esp.into();
        let applied = crate::test_support::applied_from(&layout);

        for bootloader in [Bootloader::SystemdBoot, Bootloader::Efistub] {
            let fake = FakeBackend::new();
            let dir = tempfile::tempdir().unwrap();
            let mut installer = installer(&fake, dir.path(), applied.clone());

            assert!(matches!(
                installer.add_bootloader(bootloader).unwrap_err(),
                InstallError::Unsupported(reason) if reason.contains("/boot/efi")
            ));
            assert_eq!(fake.count(Op::Chroot), 0);
            assert_eq!(fake.count(Op::Pacstrap), 0);
            assert!(!dir.path().join("boot/efi/loader").exists());
        }

        // grub installs its own loader onto the ESP wherever it is mounted
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let mut installer = installer(&fake, dir.path(), applied);
        installer.add_bootloader(Bootloader::Grub).unwrap();
    }

    #[test]
    fn sudoers_and_timezone() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let installer = installer(&fake, dir.path(), AppliedLayout::default());

        installer
            .create_users(&[User::new("alice", "pw", true), User::new("bob", "pw", false)])
            .unwrap();
        assert!(dir.path().join("etc/sudoers.d/00_alice").exists());
        assert!(!dir.path().join("etc/sudoers.d/00_bob").exists());
        assert!(fake.calls().iter().any(|c| matches!(
            c,
            Call::Chroot { args, stdin: Some(input), .. } if args == &["chpasswd"] && input == "alice:pw\n"
        )));

        installer.set_timezone("Europe/Berlin").unwrap();
        installer.set_timezone("Europe/Berlin").unwrap();
        assert_eq!(
            fs::read_link(dir.path().join("etc/localtime")).unwrap(),
            PathBuf::from("/usr/share/zoneinfo/Europe/Berlin")
        );
        assert!(installer.set_timezone("../etc/passwd").is_err());
    }

    #[test]
    fn fstab_is_rendered_from_the_mounted_tree() {
        let fake = FakeBackend::new();
        fake.set_identity("/dev/sda1", "1234-ABCD");
        let dir = tempfile::tempdir().unwrap();
        let mut installer = installer(&fake, dir.path(), applied_boot_root());
        installer.mount_ordered_layout().unwrap();

        installer.genfstab().unwrap();
        installer.genfstab().unwrap();
        let fstab = fs::read_to_string(dir.path().join("etc/fstab")).unwrap();
        assert_eq!(fstab.matches("UUID=1234-ABCD\t/boot\tvfat").count(), 1);
        assert!(fstab.contains("/dev/sda2\t/\text4"));
    }
}
