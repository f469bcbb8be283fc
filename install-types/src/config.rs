// SPDX-License-Identifier: GPL-3.0-only

//! Resolved installation settings handed to the installer

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Password};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareMode {
    Uefi,
    Bios,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bootloader {
    #[default]
    SystemdBoot,
    Grub,
    Efistub,
}

impl Bootloader {
    pub fn requires_uefi(&self) -> bool {
        matches!(self, Self::SystemdBoot | Self::Efistub)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdditionalRepository {
    Multilib,
    Testing,
}

impl AdditionalRepository {
    /// Section names enabled in pacman.conf
    pub fn sections(&self) -> &'static [&'static str] {
        match self {
            Self::Multilib => &["multilib"],
            Self::Testing => &["core-testing", "extra-testing"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioServer {
    Pipewire,
    Pulseaudio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkMode {
    /// Copy the live environment's network configuration
    CopyIso,
    NetworkManager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleConfig {
    pub keyboard_layout: String,
    pub language: String,
    pub encoding: String,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            keyboard_layout: "us".to_string(),
            language: "en_US".to_string(),
            encoding: "UTF-8".to_string(),
        }
    }
}

impl LocaleConfig {
    /// Value for LANG, e.g. "en_US.UTF-8"
    pub fn lang(&self) -> String {
        format!("{}.{}", self.language, self.encoding)
    }

    /// Line enabled in /etc/locale.gen
    pub fn locale_gen_line(&self) -> String {
        format!("{} {}", self.lang(), self.encoding)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRepository {
    pub name: String,
    pub url: String,
    #[serde(default = "default_sig_level")]
    pub sig_level: String,
}

fn default_sig_level() -> String {
    "Optional TrustAll".to_string()
}

/// Mirrors chosen elsewhere; the installer only writes them out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfiguration {
    /// Server URLs in priority order, e.g. "https://mirror.example/$repo/os/$arch"
    pub servers: Vec<String>,
    pub custom_repositories: Vec<CustomRepository>,
}

impl MirrorConfiguration {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty() && self.custom_repositories.is_empty()
    }

    pub fn mirrorlist(&self) -> String {
        let mut out = String::new();
        for server in &self.servers {
            out.push_str(&format!("Server = {server}\n"));
        }
        out
    }

    pub fn pacman_sections(&self) -> String {
        let mut out = String::new();
        for repo in &self.custom_repositories {
            out.push_str(&format!(
                "\n[{}]\nSigLevel = {}\nServer = {}\n",
                repo.name, repo.sig_level, repo.url
            ));
        }
        out
    }
}

/// What a profile contributes to the installed system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSpec {
    pub name: String,
    pub packages: Vec<String>,
    pub services: Vec<String>,
    pub desktop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: Password,
    #[serde(default)]
    pub is_sudoer: bool,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>, is_sudoer: bool) -> Self {
        Self {
            username: username.into(),
            password: Password::new(password),
            is_sudoer,
        }
    }
}

/// Every setting the installer reads, resolved ahead of time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationConfig {
    pub hostname: String,
    pub kernels: Vec<String>,
    pub bootloader: Bootloader,
    pub locale: LocaleConfig,
    pub mirrors: Option<MirrorConfiguration>,
    /// Compressed swap in RAM via zram-generator
    pub swap: bool,
    pub users: Vec<User>,
    pub root_password: Option<Password>,
    pub packages: Vec<String>,
    pub profile: Option<ProfileSpec>,
    pub network: Option<NetworkMode>,
    pub audio: Option<AudioServer>,
    pub timezone: Option<String>,
    pub ntp: bool,
    pub services: Vec<String>,
    pub custom_commands: Vec<String>,
    pub additional_repositories: Vec<AdditionalRepository>,
    /// 0 leaves pacman's default
    pub parallel_downloads: u8,
    /// Offer a shell inside the target once everything is done
    pub chroot_shell: bool,
}

impl Default for InstallationConfig {
    fn default() -> Self {
        Self {
            hostname: "archlinux".to_string(),
            kernels: vec!["linux".to_string()],
            bootloader: Bootloader::default(),
            locale: LocaleConfig::default(),
            mirrors: None,
            swap: true,
            users: Vec::new(),
            root_password: None,
            packages: Vec::new(),
            profile: None,
            network: None,
            audio: None,
            timezone: None,
            ntp: true,
            services: Vec::new(),
            custom_commands: Vec::new(),
            additional_repositories: Vec::new(),
            parallel_downloads: 0,
            chroot_shell: false,
        }
    }
}

impl InstallationConfig {
    pub fn has_root_password(&self) -> bool {
        self.root_password.as_ref().is_some_and(|pw| !pw.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kernels.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::NoKernel);
        }
        if !valid_hostname(&self.hostname) {
            return Err(ConfigError::InvalidHostname(self.hostname.clone()));
        }
        if let Some(user) = self.users.iter().find(|u| !valid_username(&u.username)) {
            return Err(ConfigError::InvalidUsername(user.username.clone()));
        }
        if !self.has_root_password() && !self.users.iter().any(|u| u.is_sudoer) {
            return Err(ConfigError::NoAdministrator);
        }
        Ok(())
    }
}

fn valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 32
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> User {
        User::new("archinstall", "password", true)
    }

    #[test]
    fn defaults_need_an_administrator() {
        let config = InstallationConfig::default();
        assert_eq!(config.hostname, "archlinux");
        assert_eq!(config.kernels, vec!["linux"]);
        assert_eq!(config.validate(), Err(ConfigError::NoAdministrator));

        let config = InstallationConfig {
            users: vec![admin()],
            ..Default::default()
        };
        config.validate().unwrap();

        let config = InstallationConfig {
            root_password: Some(Password::new("toor")),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_names_and_missing_kernel() {
        let base = InstallationConfig {
            users: vec![admin()],
            ..Default::default()
        };
        let config = InstallationConfig {
            kernels: vec![],
            ..base.clone()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoKernel));

        let config = InstallationConfig {
            hostname: "bad host".to_string(),
            ..base.clone()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHostname(_))));

        let config = InstallationConfig {
            users: vec![User::new("Root", "x", true)],
            ..base
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUsername(_))));
    }

    #[test]
    fn locale_strings() {
        let locale = LocaleConfig::default();
        assert_eq!(locale.lang(), "en_US.UTF-8");
        assert_eq!(locale.locale_gen_line(), "en_US.UTF-8 UTF-8");
    }

    #[test]
    fn mirror_rendering() {
        let mirrors = MirrorConfiguration {
            servers: vec!["https://geo.mirror.pkgbuild.com/$repo/os/$arch".to_string()],
            custom_repositories: vec![CustomRepository {
                name: "local".to_string(),
                url: "file:///srv/repo".to_string(),
                sig_level: default_sig_level(),
            }],
        };
        assert_eq!(
            mirrors.mirrorlist(),
            "Server = https://geo.mirror.pkgbuild.com/$repo/os/$arch\n"
        );
        assert!(mirrors.pacman_sections().contains("[local]\nSigLevel = Optional TrustAll"));
    }

    #[test]
    fn config_from_toml() {
        let config: InstallationConfig = toml::from_str(
            r#"
            hostname = "minimal-arch"
            bootloader = "grub"
            packages = ["nano", "wget", "git"]
            audio = "pipewire"
            network = "copy-iso"

            [[users]]
            username = "archinstall"
            password = "password"
            is_sudoer = true
            "#,
        )
        .unwrap();
        assert_eq!(config.bootloader, Bootloader::Grub);
        assert_eq!(config.kernels, vec!["linux"]);
        assert_eq!(config.network, Some(NetworkMode::CopyIso));
        assert!(config.swap);
        config.validate().unwrap();
    }
}
