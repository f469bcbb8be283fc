// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use install_types::{BlockIdentity, MountEntry};

const HEADER: &str = "# Static information about the filesystems.\n\
                      # See fstab(5) for details.\n\n\
                      # <file system> <dir> <type> <options> <dump> <pass>\n";

/// Render fstab for the tree mounted at `root`
///
/// Only block-device mounts at or below `root` are listed, in mount table
/// order. Mapped devices are referenced by their mapper path; everything else
/// by `UUID=` when known, else by device path.
pub fn render_fstab(
    entries: &[MountEntry],
    root: &Path,
    identities: &HashMap<PathBuf, BlockIdentity>,
) -> String {
    let mut out = String::from(HEADER);

    for entry in entries.iter().filter(|e| e.is_under(root)) {
        if !entry.source.starts_with("/dev") {
            continue;
        }

        let spec = if entry.source.starts_with("/dev/mapper") {
            entry.source.display().to_string()
        } else {
            match identities.get(&entry.source).and_then(|id| id.uuid.as_deref()) {
                Some(uuid) => format!("UUID={uuid}"),
                None => entry.source.display().to_string(),
            }
        };

        let relative = entry.target.strip_prefix(root).unwrap_or(&entry.target);
        let dir = Path::new("/").join(relative);
        let pass = if dir == Path::new("/") { 1 } else { 2 };
        let options = if entry.options.is_empty() {
            "defaults".to_string()
        } else {
            entry.options.join(",")
        };

        out.push_str(&format!("# {}\n", entry.source.display()));
        out.push_str(&format!(
            "{spec}\t{}\t{}\t{options}\t0 {pass}\n\n",
            escape_field(&dir),
            entry.fs_type
        ));
    }

    out
}

/// Whitespace in fstab fields is written as octal escapes
fn escape_field(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
}
