// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use crate::BackendError;

/// Operations that run against the installed tree
pub trait TargetOps: Send + Sync {
    /// Install packages into `root` from the live system's package cache
    fn pacstrap(&self, root: &Path, packages: &[String]) -> Result<(), BackendError>;

    /// Run a command inside `root`, optionally feeding `stdin`; returns stdout
    fn chroot_run(
        &self,
        root: &Path,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<String, BackendError>;

    /// Hand the terminal to an interactive shell inside `root`
    fn interactive_shell(&self, root: &Path) -> Result<(), BackendError>;
}
