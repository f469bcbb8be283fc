// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use install_types::{Fido2Device, Password};

use crate::BackendError;

/// Passphrases are handed to the tools on stdin, never on the command line
pub trait LuksOps: Send + Sync {
    fn luks_format(&self, device: &Path, password: &Password) -> Result<(), BackendError>;

    /// Open the container as `/dev/mapper/<name>` and return that path
    fn luks_open(
        &self,
        device: &Path,
        name: &str,
        password: &Password,
    ) -> Result<PathBuf, BackendError>;

    fn luks_close(&self, name: &str) -> Result<(), BackendError>;

    /// Add `key_file` as an additional key slot
    fn luks_add_key(
        &self,
        device: &Path,
        password: &Password,
        key_file: &Path,
    ) -> Result<(), BackendError>;

    fn fido2_enroll(
        &self,
        device: &Path,
        token: &Fido2Device,
        password: &Password,
    ) -> Result<(), BackendError>;
}
