// SPDX-License-Identifier: GPL-3.0-only

mod config;
mod countdown;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use install_contracts::SystemBackend;
use install_core::{
    AppliedLayout, AssumeYes, Confirmation, DeviceHandler, FilesystemHandler, InstallReport,
    Installer, InstallerHooks, StageOutcome, perform_installation,
};
use install_sys::SysBackend;
use install_types::{DeviceModification, PartitionId, PartitionModification};
use tracing::{error, info};

use crate::config::{InstallDocument, ResolvedPlan};
use crate::countdown::Countdown;

#[derive(Debug, Parser)]
#[command(name = "osinstall")]
#[command(about = "Partition, format and install Arch Linux from a TOML install document")]
struct Cli {
    /// Debug output from osinstall and its libraries
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List block devices and their partitions
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Show what is mounted below a root, as a pre-mounted layout would see it
    Detect {
        #[arg(long, default_value = "/mnt/archinstall")]
        root: PathBuf,
    },
    /// Resolve and validate an install document without touching any device
    Plan {
        #[arg(long)]
        config: PathBuf,
        /// Print the resolved disk layout as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply the disk layout and install the system
    Install {
        #[arg(long)]
        config: PathBuf,
        /// Wipe devices without the countdown
        #[arg(long)]
        no_confirm: bool,
        /// Seconds to wait for Ctrl-C before wiping
        #[arg(long, default_value_t = 5)]
        countdown: u64,
        /// Log device commands instead of running them, then stop after the disk layout
        #[arg(long)]
        dry_run: bool,
        /// Overrides `[disk] root`
        #[arg(long)]
        mountpoint: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Devices { json } => list_devices(json),
        Command::Detect { root } => detect(root),
        Command::Plan { config, json } => plan(config, json),
        Command::Install {
            config,
            no_confirm,
            countdown,
            dry_run,
            mountpoint,
        } => {
            let confirmation: Box<dyn Confirmation> = if no_confirm {
                Box::new(AssumeYes)
            } else {
                Box::new(Countdown::new(countdown))
            };
            install(config, mountpoint, dry_run, confirmation.as_ref())
        }
    }
}

/// Discovery only; a dry-run backend never changes anything
fn read_only_devices() -> Arc<DeviceHandler> {
    let backend: Arc<dyn SystemBackend> = Arc::new(SysBackend::new(true));
    Arc::new(DeviceHandler::new(backend))
}

fn list_devices(json: bool) -> Result<()> {
    let devices = read_only_devices()
        .devices()
        .context("failed to list block devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    for device in &devices {
        let table = device
            .partition_table
            .map(|t| t.as_parted_label())
            .unwrap_or("none");
        println!(
            "{:<16} {:>12}  {:<5} {}",
            device.path.display(),
            device.total_size.format_highest(),
            table,
            device.model
        );
        for partition in &device.partitions {
            let mountpoints: Vec<String> = partition
                .mountpoints
                .iter()
                .map(|m| m.display().to_string())
                .collect();
            println!(
                "  {:<14} {:>12}  {:<5} {}",
                partition.path.display(),
                partition.length.format_highest(),
                partition.fs_type.map(|f| f.name()).unwrap_or("-"),
                mountpoints.join(",")
            );
        }
    }
    Ok(())
}

fn detect(root: PathBuf) -> Result<()> {
    let detected = read_only_devices()
        .detect_pre_mounted_mods(&root)
        .with_context(|| format!("failed to inspect mounts below {}", root.display()))?;
    if detected.is_empty() {
        println!("nothing is mounted below {}", root.display());
    }
    for modification in &detected {
        print_device(modification, &[]);
    }
    Ok(())
}

fn plan(config: PathBuf, json: bool) -> Result<()> {
    let plan = InstallDocument::load(&config)?.resolve(&read_only_devices(), None)?;
    plan.validate()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan.layout)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn install(
    config: PathBuf,
    mountpoint: Option<PathBuf>,
    dry_run: bool,
    confirmation: &dyn Confirmation,
) -> Result<()> {
    if !dry_run && !nix::unistd::Uid::effective().is_root() {
        bail!("installing needs root privileges; --dry-run previews the disk layout");
    }

    let backend: Arc<dyn SystemBackend> = Arc::new(SysBackend::new(dry_run));
    let devices = Arc::new(DeviceHandler::new(backend.clone()));

    let plan = InstallDocument::load(&config)?.resolve(&devices, mountpoint)?;
    plan.validate()?;
    print_plan(&plan);

    let ResolvedPlan {
        root,
        layout,
        encryption,
        install,
    } = plan;

    let applied = FilesystemHandler::new(&layout, &encryption, devices)
        .perform_filesystem_operations(confirmation)
        .context("failed to apply the disk layout")?;

    if dry_run {
        print_mount_order(&applied);
        info!("dry run: stopping before installation");
        return Ok(());
    }

    let mut installer = Installer::new(
        &root,
        layout,
        applied,
        encryption,
        install.kernels.clone(),
        backend,
    );
    let hooks = InstallerHooks::from_config(&install);
    let report = perform_installation(&mut installer, &install, &hooks)
        .context("installation failed")?;

    print_report(&report);
    info!("installation onto {} finished", root.display());
    Ok(())
}

fn print_plan(plan: &ResolvedPlan) {
    println!("Target: {}", plan.root.display());
    if plan.layout.is_pre_mount() {
        println!("Layout: pre-mounted");
    }
    for modification in &plan.layout.device_modifications {
        print_device(modification, &plan.encryption.partitions);
    }
}

fn print_device(modification: &DeviceModification, encrypted: &[PartitionId]) {
    println!(
        "{}{}",
        modification.device.display_name(),
        if modification.wipe { " [wipe]" } else { "" }
    );
    for pm in &modification.partitions {
        println!(
            "  {}{}",
            describe_partition(pm),
            if encrypted.contains(&pm.id) {
                "  encrypted"
            } else {
                ""
            }
        );
    }
}

fn describe_partition(pm: &PartitionModification) -> String {
    let status = format!("{:?}", pm.status).to_lowercase();
    let node = pm
        .dev_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "new".to_string());
    let flags: Vec<&str> = pm.flags.iter().map(|f| f.parted_name()).collect();
    format!(
        "{status:<7} {node:<14} {:>12} @ {:<12} {:<10} {:<12} {}",
        pm.length.format_highest(),
        pm.start.format_highest(),
        pm.fs_type.map(|f| f.name()).unwrap_or("-"),
        pm.mountpoint
            .as_ref()
            .map(|m| m.display().to_string())
            .unwrap_or_else(|| "-".to_string()),
        flags.join(",")
    )
}

fn print_mount_order(applied: &AppliedLayout) {
    println!("Mount order:");
    for partition in applied.mount_order() {
        println!(
            "  {} -> {}",
            partition.fs_device().display(),
            partition
                .mountpoint
                .as_ref()
                .map(|m| m.display().to_string())
                .unwrap_or_default()
        );
    }
}

fn print_report(report: &InstallReport) {
    for record in &report.records {
        let stage = record.stage.name();
        match &record.outcome {
            StageOutcome::Completed => println!("{stage:<14} done"),
            StageOutcome::Skipped(reason) => println!("{stage:<14} skipped ({reason})"),
            StageOutcome::Failed(reason) => println!("{stage:<14} FAILED: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn install_flags_parse() {
        let cli = Cli::try_parse_from([
            "osinstall",
            "install",
            "--config",
            "install.toml",
            "--dry-run",
            "--countdown",
            "0",
        ])
        .unwrap();
        match cli.command {
            Command::Install {
                config,
                dry_run,
                countdown,
                no_confirm,
                mountpoint,
            } => {
                assert_eq!(config, PathBuf::from("install.toml"));
                assert!(dry_run);
                assert_eq!(countdown, 0);
                assert!(!no_confirm);
                assert!(mountpoint.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
