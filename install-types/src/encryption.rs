// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{DiskLayoutConfiguration, ModificationStatus, PartitionId, PlanningError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    #[default]
    NoEncryption,
    Luks,
}

/// A passphrase that never shows up in logs or debug output
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Hardware token enrolled as an additional unlock method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fido2Device {
    pub path: PathBuf,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub product: String,
}

/// Which planned partitions get encrypted, and how
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskEncryption {
    pub encryption_type: EncryptionType,

    #[serde(default)]
    pub encryption_password: Option<Password>,

    #[serde(default)]
    pub partitions: Vec<PartitionId>,

    #[serde(default)]
    pub hsm_device: Option<Fido2Device>,
}

impl DiskEncryption {
    pub fn new(password: Password, partitions: Vec<PartitionId>) -> Self {
        Self {
            encryption_type: EncryptionType::Luks,
            encryption_password: Some(password),
            partitions,
            hsm_device: None,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_hsm(mut self, device: Fido2Device) -> Self {
        self.hsm_device = Some(device);
        self
    }

    pub fn is_active(&self) -> bool {
        self.encryption_type != EncryptionType::NoEncryption && !self.partitions.is_empty()
    }

    pub fn should_encrypt(&self, id: PartitionId) -> bool {
        self.encryption_type != EncryptionType::NoEncryption && self.partitions.contains(&id)
    }

    /// Check the selection against the layout it refers to
    pub fn validate(&self, layout: &DiskLayoutConfiguration) -> Result<(), PlanningError> {
        if self.encryption_type == EncryptionType::NoEncryption {
            if !self.partitions.is_empty() {
                return Err(PlanningError::PartitionsWithoutEncryption);
            }
            return Ok(());
        }

        if self
            .encryption_password
            .as_ref()
            .is_none_or(Password::is_empty)
        {
            return Err(PlanningError::MissingEncryptionPassword);
        }

        for id in &self.partitions {
            let (_, pm) = layout
                .find_partition(*id)
                .ok_or(PlanningError::UnknownEncryptedPartition(*id))?;

            if pm.has_boot_role() {
                return Err(PlanningError::EncryptedBootPartition(*id));
            }
            if pm.fs_type.is_none() {
                return Err(PlanningError::EncryptedWithoutFilesystem(*id));
            }
            if matches!(pm.status, ModificationStatus::Exist | ModificationStatus::Delete) {
                return Err(PlanningError::EncryptedExistingPartition(*id));
            }
        }

        Ok(())
    }
}
