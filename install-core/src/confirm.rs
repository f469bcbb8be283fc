// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

/// Asked once before any device listed in `devices` is wiped
pub trait Confirmation {
    fn confirm_wipe(&self, devices: &[PathBuf]) -> bool;
}

/// Accepts every wipe, for unattended runs
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirmation for AssumeYes {
    fn confirm_wipe(&self, _devices: &[PathBuf]) -> bool {
        true
    }
}

impl<F> Confirmation for F
where
    F: Fn(&[PathBuf]) -> bool,
{
    fn confirm_wipe(&self, devices: &[PathBuf]) -> bool {
        self(devices)
    }
}
