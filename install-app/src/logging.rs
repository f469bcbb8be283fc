// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_LOG_PREFIX: &str = "osinstall.log";
const DEFAULT_LOG_DIR: &str = "/var/log/osinstall";
const KEEP_DAYS: u64 = 7;

fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "osinstall=debug,install_core=debug,install_sys=debug,warn"
    } else {
        "osinstall=info,install_core=info,install_sys=info,warn"
    }
}

/// Log to stderr and to a daily rolling file
///
/// `RUST_LOG` overrides the default filter. When the log directory cannot
/// be created only stderr is used.
pub(crate) fn init(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    match file_writer() {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            // Flushes the background writer on exit.
            let _ = LOG_GUARD.set(guard);
        }
        Err(e) => {
            eprintln!("osinstall: failed to initialize file logging: {e:#}");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

fn file_writer() -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let (dir, prefix) = resolve_log_location();

    if let Err(e) = fs::create_dir_all(&dir) {
        return Err(anyhow::anyhow!(
            "create log directory failed: {} ({})",
            dir.display(),
            e
        ));
    }

    cleanup_old_logs(&dir, &prefix);

    let appender = tracing_appender::rolling::daily(&dir, &prefix);
    Ok(tracing_appender::non_blocking(appender))
}

fn resolve_log_location() -> (PathBuf, OsString) {
    if let Some(file) = std::env::var_os("OSINSTALL_LOG_FILE") {
        let path = PathBuf::from(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let prefix = path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from(DEFAULT_LOG_PREFIX));
        return (dir, prefix);
    }

    let dir = std::env::var_os("OSINSTALL_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    (dir, OsString::from(DEFAULT_LOG_PREFIX))
}

fn cleanup_old_logs(dir: &Path, prefix: &OsString) {
    let Some(cutoff) =
        SystemTime::now().checked_sub(Duration::from_secs(KEEP_DAYS * 24 * 60 * 60))
    else {
        return;
    };

    let prefix = prefix.to_string_lossy();

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        // Only files written by the rolling appender.
        if !entry
            .file_name()
            .to_string_lossy()
            .starts_with(prefix.as_ref())
        {
            continue;
        }

        let modified = entry.metadata().and_then(|m| m.modified());
        match modified {
            Ok(modified) if modified < cutoff => {
                let _ = fs::remove_file(entry.path());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_only_touches_our_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let ours = dir.path().join("osinstall.log.2020-01-01");
        let theirs = dir.path().join("pacman.log");
        fs::write(&ours, "old").unwrap();
        fs::write(&theirs, "old").unwrap();

        let old = SystemTime::now() - Duration::from_secs((KEEP_DAYS + 1) * 24 * 60 * 60);
        for path in [&ours, &theirs] {
            fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(old)
                .unwrap();
        }

        cleanup_old_logs(dir.path(), &OsString::from(DEFAULT_LOG_PREFIX));
        assert!(!ours.exists());
        assert!(theirs.exists());
    }

    #[test]
    fn recent_logs_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("osinstall.log.2099-01-01");
        fs::write(&fresh, "new").unwrap();

        cleanup_old_logs(dir.path(), &OsString::from(DEFAULT_LOG_PREFIX));
        assert!(fresh.exists());
    }
}
