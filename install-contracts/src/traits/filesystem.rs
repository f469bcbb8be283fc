// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use install_types::FilesystemType;

use crate::BackendError;

pub trait FilesystemOps: Send + Sync {
    fn format(&self, device: &Path, fs_type: FilesystemType) -> Result<(), BackendError>;

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: Option<FilesystemType>,
        options: &[String],
    ) -> Result<(), BackendError>;

    /// Unmount `target`, and everything below it when `recursive`
    fn unmount(&self, target: &Path, recursive: bool) -> Result<(), BackendError>;

    fn swapoff(&self, device: &Path) -> Result<(), BackendError>;
}
