// SPDX-License-Identifier: GPL-3.0-only

//! Edits to pacman.conf

use install_types::AdditionalRepository;

/// Uncomment the sections of `repos` and their `Include` line
pub fn enable_repositories(conf: &str, repos: &[AdditionalRepository]) -> String {
    let sections: Vec<String> = repos
        .iter()
        .flat_map(|r| r.sections())
        .map(|s| format!("[{s}]"))
        .collect();

    let mut out = Vec::new();
    let mut in_enabled_section = false;
    for line in conf.lines() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('#').map(str::trim)
            && header.starts_with('[')
        {
            in_enabled_section = sections.iter().any(|s| s == header);
            if in_enabled_section {
                out.push(header.to_string());
                continue;
            }
        } else if trimmed.starts_with('[') {
            in_enabled_section = false;
        } else if in_enabled_section
            && let Some(include) = trimmed.strip_prefix('#').map(str::trim)
            && include.starts_with("Include")
        {
            out.push(include.to_string());
            continue;
        }
        out.push(line.to_string());
    }

    let mut result = out.join("\n");
    result.push('\n');
    result
}

/// Set `ParallelDownloads`; 0 leaves the file untouched
pub fn set_parallel_downloads(conf: &str, count: u8) -> String {
    if count == 0 {
        return conf.to_string();
    }
    let mut replaced = false;
    let mut out: Vec<String> = conf
        .lines()
        .map(|line| {
            let key = line.trim().trim_start_matches('#').trim();
            if !replaced && key.starts_with("ParallelDownloads") {
                replaced = true;
                format!("ParallelDownloads = {count}")
            } else {
                line.to_string()
            }
        })
        .collect();

    if !replaced {
        match out.iter().position(|l| l.trim() == "[options]") {
            Some(index) => out.insert(index + 1, format!("ParallelDownloads = {count}")),
            None => {
                out.insert(0, format!("ParallelDownloads = {count}"));
                out.insert(0, "[options]".to_string());
            }
        }
    }

    let mut result = out.join("\n");
    result.push('\n');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = "[options]\n#ParallelDownloads = 5\n\n[core]\nInclude = /etc/pacman.d/mirrorlist\n\n#[multilib-testing]\n#Include = /etc/pacman.d/mirrorlist\n\n#[multilib]\n#Include = /etc/pacman.d/mirrorlist\n";

    #[test]
    fn enables_only_requested_sections() {
        let edited = enable_repositories(CONF, &[AdditionalRepository::Multilib]);
        assert!(edited.contains("\n[multilib]\nInclude = /etc/pacman.d/mirrorlist\n"));
        assert!(edited.contains("#[multilib-testing]\n#Include"));
        assert_eq!(enable_repositories(&edited, &[AdditionalRepository::Multilib]), edited);
    }

    #[test]
    fn parallel_downloads() {
        let edited = set_parallel_downloads(CONF, 8);
        assert!(edited.contains("[options]\nParallelDownloads = 8\n"));
        assert_eq!(set_parallel_downloads(CONF, 0), CONF);
        assert_eq!(
            set_parallel_downloads("[core]\n", 3),
            "[options]\nParallelDownloads = 3\n[core]\n"
        );
    }
}
