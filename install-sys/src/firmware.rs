// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use install_types::FirmwareMode;

const EFI_SYSFS: &str = "/sys/firmware/efi";

/// UEFI when the kernel exposes EFI runtime services
pub fn detect_firmware_mode() -> FirmwareMode {
    firmware_mode_at(Path::new(EFI_SYSFS))
}

fn firmware_mode_at(efi_dir: &Path) -> FirmwareMode {
    if efi_dir.is_dir() {
        FirmwareMode::Uefi
    } else {
        FirmwareMode::Bios
    }
}
