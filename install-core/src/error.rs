// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::PathBuf;

use install_contracts::BackendError;
use install_types::{ConfigError, PlanningError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Stage;

/// Which part of applying a device modification failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStep {
    Release,
    Wipe,
    Delete,
    Create,
    Settle,
    Encrypt,
    Format,
}

impl fmt::Display for DeviceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Release => "release",
            Self::Wipe => "wipe",
            Self::Delete => "delete",
            Self::Create => "create",
            Self::Settle => "settle",
            Self::Encrypt => "encrypt",
            Self::Format => "format",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("invalid disk layout: {0}")]
    Planning(#[from] PlanningError),

    #[error("{step} failed on {}: {source}", .device.display())]
    Device {
        device: PathBuf,
        step: DeviceStep,
        #[source]
        source: BackendError,
    },

    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<InstallError>,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("cancelled before any device was modified")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stage '{requested}' cannot run after '{current}'")]
    StageOrder { current: Stage, requested: Stage },

    #[error("nothing is mounted at {}: nothing to install onto", .0.display())]
    NothingToInstall(PathBuf),

    #[error("{} is not mounted", .0.display())]
    NotMounted(PathBuf),

    #[error("{0}")]
    Unsupported(String),
}

impl InstallError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub fn device(
        device: impl Into<PathBuf>,
        step: DeviceStep,
    ) -> impl FnOnce(BackendError) -> Self {
        let device = device.into();
        move |source| Self::Device {
            device,
            step,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
