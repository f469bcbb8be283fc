// SPDX-License-Identifier: GPL-3.0-only

//! Extension points called by the installation pipeline

use std::fs;

use install_types::{AudioServer, NetworkMode, ProfileSpec};
use tracing::{debug, info};

use crate::{InstallError, Installer, Result};

/// A selectable set of software installed into the target
pub trait ProfileHook {
    fn name(&self) -> &str;

    fn is_desktop(&self) -> bool {
        false
    }

    fn install(&self, installer: &mut Installer) -> Result<()>;

    /// Runs after the root password is set
    fn post_install(&self, _installer: &mut Installer) -> Result<()> {
        Ok(())
    }
}

pub trait NetworkConfigurator {
    fn install_network_config(
        &self,
        installer: &mut Installer,
        profile: Option<&dyn ProfileHook>,
    ) -> Result<()>;
}

pub trait AudioConfigurator {
    fn install_audio_config(&self, installer: &mut Installer) -> Result<()>;
}

/// Installs nothing beyond the base system
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimalProfile;

impl ProfileHook for MinimalProfile {
    fn name(&self) -> &str {
        "minimal"
    }

    fn install(&self, _installer: &mut Installer) -> Result<()> {
        Ok(())
    }
}

impl ProfileHook for ProfileSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_desktop(&self) -> bool {
        self.desktop
    }

    fn install(&self, installer: &mut Installer) -> Result<()> {
        info!("installing profile {}", self.name);
        installer.add_additional_packages(&self.packages)
    }

    fn post_install(&self, installer: &mut Installer) -> Result<()> {
        installer.enable_service(&self.services)
    }
}

impl NetworkConfigurator for NetworkMode {
    fn install_network_config(
        &self,
        installer: &mut Installer,
        profile: Option<&dyn ProfileHook>,
    ) -> Result<()> {
        match self {
            NetworkMode::CopyIso => copy_iso_network_config(installer),
            NetworkMode::NetworkManager => {
                let mut packages = vec!["networkmanager"];
                if profile.is_some_and(|p| p.is_desktop()) {
                    packages.push("network-manager-applet");
                }
                installer.add_additional_packages(&packages)?;
                installer.enable_service(&["NetworkManager.service"])
            }
        }
    }
}

/// Carry the live system's systemd-networkd units over to the target
fn copy_iso_network_config(installer: &mut Installer) -> Result<()> {
    let source = installer.live_root().join("etc/systemd/network");
    let destination = installer.target_path("etc/systemd/network");

    match fs::read_dir(&source) {
        Ok(entries) => {
            fs::create_dir_all(&destination).map_err(InstallError::io(&destination))?;
            for entry in entries {
                let path = entry.map_err(InstallError::io(&source))?.path();
                if path.extension().is_none_or(|ext| ext != "network") {
                    continue;
                }
                if let Some(name) = path.file_name() {
                    let copy = destination.join(name);
                    fs::copy(&path, &copy).map_err(InstallError::io(&copy))?;
                    debug!("copied {}", path.display());
                }
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} does not exist, nothing to copy", source.display());
        }
        Err(err) => return Err(InstallError::Io { path: source, source: err }),
    }

    installer.enable_service(&["systemd-networkd.service", "systemd-resolved.service"])
}

impl AudioConfigurator for AudioServer {
    fn install_audio_config(&self, installer: &mut Installer) -> Result<()> {
        info!("installing the {self:?} audio server");
        match self {
            AudioServer::Pipewire => installer.add_additional_packages(&[
                "pipewire",
                "pipewire-alsa",
                "pipewire-jack",
                "pipewire-pulse",
                "gst-plugin-pipewire",
                "libpulse",
                "wireplumber",
            ]),
            AudioServer::Pulseaudio => installer.add_additional_packages(&["pulseaudio"]),
        }
    }
}
