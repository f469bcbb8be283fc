// SPDX-License-Identifier: GPL-3.0-only

use install_types::InstallationConfig;
use tracing::{error, info, warn};

use crate::{
    AudioConfigurator, InstallError, InstallReport, Installer, NetworkConfigurator, ProfileHook,
    Result, Stage, StageOutcome,
};

/// Hooks the pipeline calls; `None` skips the stage
#[derive(Default, Clone, Copy)]
pub struct InstallerHooks<'a> {
    pub profile: Option<&'a dyn ProfileHook>,
    pub network: Option<&'a dyn NetworkConfigurator>,
    pub audio: Option<&'a dyn AudioConfigurator>,
}

impl<'a> InstallerHooks<'a> {
    /// The built-in hooks selected by `config`
    pub fn from_config(config: &'a InstallationConfig) -> Self {
        Self {
            profile: config.profile.as_ref().map(|p| p as &dyn ProfileHook),
            network: config.network.as_ref().map(|n| n as &dyn NetworkConfigurator),
            audio: config.audio.as_ref().map(|a| a as &dyn AudioConfigurator),
        }
    }
}

struct Run<'r> {
    installer: &'r mut Installer,
    report: &'r mut InstallReport,
}

impl Run<'_> {
    fn stage<F>(&mut self, stage: Stage, body: F) -> Result<()>
    where
        F: FnOnce(&mut Installer) -> Result<StageOutcome>,
    {
        self.installer.enter_stage(stage)?;
        info!("stage {stage}");
        let result = body(self.installer);
        self.finish(stage, result)
    }

    /// Work reported under `stage` without moving the stage marker
    fn record_under<F>(&mut self, stage: Stage, body: F) -> Result<()>
    where
        F: FnOnce(&mut Installer) -> Result<StageOutcome>,
    {
        let result = body(self.installer);
        self.finish(stage, result)
    }

    fn finish(&mut self, stage: Stage, result: Result<StageOutcome>) -> Result<()> {
        match result {
            Ok(outcome) => {
                if let StageOutcome::Skipped(reason) = &outcome {
                    info!("stage {stage} skipped: {reason}");
                }
                self.report.record(stage, outcome);
                Ok(())
            }
            Err(err) if stage.is_fatal() => {
                error!("stage {stage} failed: {err}");
                self.report.record(stage, StageOutcome::Failed(err.to_string()));
                Err(InstallError::Stage {
                    stage,
                    source: Box::new(err),
                })
            }
            Err(err) => {
                warn!("stage {stage} failed, continuing: {err}");
                self.report.record(stage, StageOutcome::Failed(err.to_string()));
                Ok(())
            }
        }
    }
}

fn done(result: Result<()>) -> Result<StageOutcome> {
    result.map(|()| StageOutcome::Completed)
}

fn skipped(reason: &str) -> Result<StageOutcome> {
    Ok(StageOutcome::Skipped(reason.to_string()))
}

/// Run every stage against `installer`
///
/// A failing fatal stage stops the run; the exit stage still runs and the
/// installer is released before the error is returned. The chroot shell is
/// only offered after a successful run.
pub fn perform_installation(
    installer: &mut Installer,
    config: &InstallationConfig,
    hooks: &InstallerHooks<'_>,
) -> Result<InstallReport> {
    config.validate()?;

    let mut report = InstallReport::default();
    let result = run_stages(
        &mut Run {
            installer: &mut *installer,
            report: &mut report,
        },
        config,
        hooks,
    );

    if let Err(err) = installer.enter_stage(Stage::Exit) {
        warn!("{err}");
    }
    let exit = match (config.chroot_shell, &result) {
        (true, Ok(())) => match installer.drop_to_shell() {
            Ok(()) => StageOutcome::Completed,
            Err(err) => {
                warn!("interactive shell failed: {err}");
                StageOutcome::Failed(err.to_string())
            }
        },
        (true, Err(_)) => StageOutcome::Skipped("installation failed".to_string()),
        (false, _) => StageOutcome::Completed,
    };
    installer.release();
    report.record(Stage::Exit, exit);

    result.map(|()| {
        info!(
            "installation finished with {} non-fatal failure(s)",
            report.failures().count()
        );
        report
    })
}

fn run_stages(
    run: &mut Run<'_>,
    config: &InstallationConfig,
    hooks: &InstallerHooks<'_>,
) -> Result<()> {
    run.stage(Stage::Mount, |i| {
        if i.disk_config().is_pre_mount() {
            skipped("layout is pre-mounted")
        } else {
            done(i.mount_ordered_layout())
        }
    })?;

    run.stage(Stage::SanityCheck, |i| done(i.sanity_check()))?;

    run.stage(Stage::KeyFiles, |i| {
        if !i.encryption().is_active() || i.disk_config().is_pre_mount() {
            skipped("no encryption")
        } else {
            done(i.generate_key_files())
        }
    })?;

    let mirrors = config.mirrors.as_ref().filter(|m| !m.is_empty());
    run.stage(Stage::Mirrors, |i| match mirrors {
        Some(mirrors) => done(i.set_mirrors(mirrors, false)),
        None => skipped("no mirror configuration"),
    })?;

    run.stage(Stage::Bootstrap, |i| {
        done(i.minimal_installation(
            &config.additional_repositories,
            config.parallel_downloads,
            &config.hostname,
            &config.locale,
        ))
    })?;

    if let Some(mirrors) = mirrors {
        run.record_under(Stage::Mirrors, |i| done(i.set_mirrors(mirrors, true)))?;
    }

    run.stage(Stage::Swap, |i| {
        if config.swap {
            done(i.setup_swap_zram())
        } else {
            skipped("swap disabled")
        }
    })?;

    run.stage(Stage::Bootloader, |i| done(i.add_bootloader(config.bootloader)))?;

    run.stage(Stage::Network, |i| match hooks.network {
        Some(network) => done(network.install_network_config(i, hooks.profile)),
        None => skipped("no network configuration selected"),
    })?;

    run.stage(Stage::Users, |i| {
        if config.users.is_empty() {
            skipped("no users")
        } else {
            done(i.create_users(&config.users))
        }
    })?;

    run.stage(Stage::Audio, |i| match hooks.audio {
        Some(audio) => done(audio.install_audio_config(i)),
        None => {
            info!("no audio server selected");
            skipped("no audio server selected")
        }
    })?;

    run.stage(Stage::Packages, |i| {
        if config.packages.iter().all(|p| p.trim().is_empty()) {
            skipped("no additional packages")
        } else {
            done(i.add_additional_packages(&config.packages))
        }
    })?;

    run.stage(Stage::Profile, |i| match hooks.profile {
        Some(profile) => done(profile.install(i)),
        None => skipped("no profile selected"),
    })?;

    run.stage(Stage::Timezone, |i| {
        if config.timezone.is_none() && !config.ntp {
            return skipped("no time zone and NTP disabled");
        }
        if let Some(zone) = &config.timezone {
            i.set_timezone(zone)?;
        }
        if config.ntp {
            i.activate_time_synchronization()?;
        }
        Ok(StageOutcome::Completed)
    })?;

    run.stage(Stage::RootPassword, |i| {
        let password = config.root_password.as_ref().filter(|p| !p.is_empty());
        match password {
            Some(password) => done(i.user_set_pw("root", password)),
            None => skipped("no root password"),
        }
    })?;

    if let Some(profile) = hooks.profile {
        run.record_under(Stage::Profile, |i| done(profile.post_install(i)))?;
    }

    run.stage(Stage::Services, |i| {
        if config.services.is_empty() && config.custom_commands.is_empty() {
            return skipped("no services or custom commands");
        }
        i.enable_service(&config.services)?;
        i.run_custom_user_commands(&config.custom_commands)?;
        Ok(StageOutcome::Completed)
    })?;

    run.stage(Stage::Fstab, |i| done(i.genfstab()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use install_testing::{FakeBackend, Op, fixtures};
    use install_types::{DiskEncryption, User};

    use crate::test_support::applied_boot_root;

    fn config() -> InstallationConfig {
        InstallationConfig {
            users: vec![User::new("alice", "pw", true)],
            ntp: false,
            ..Default::default()
        }
    }

    fn installer(fake: &FakeBackend, dir: &std::path::Path) -> Installer {
        Installer::new(
            dir.join("target"),
            fixtures::boot_root_layout(fixtures::disk("/dev/sda", 64)),
            applied_boot_root(),
            DiskEncryption::none(),
            vec!["linux".to_string()],
            Arc::new(fake.clone()),
        )
        .with_live_root(dir.join("live"))
    }

    #[test]
    fn every_stage_is_reported_in_order() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        let mut installer = installer(&fake, dir.path());

        let report = perform_installation(&mut installer, &config(), &InstallerHooks::default())
            .unwrap();

        let stages: Vec<Stage> = report.records.iter().map(|r| r.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert_eq!(
            report.outcome(Stage::Audio),
            Some(&StageOutcome::Skipped("no audio server selected".to_string()))
        );
        assert_eq!(report.failures().count(), 0);
        assert_eq!(fake.count(Op::Unmount), 1);
        assert!(dir.path().join("target/etc/fstab").exists());
    }

    #[test]
    fn fatal_failure_stops_but_still_releases() {
        let fake = FakeBackend::new();
        fake.fail_on(Op::Pacstrap, "pacstrap: no network");
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        let mut installer = installer(&fake, dir.path());

        let err = perform_installation(&mut installer, &config(), &InstallerHooks::default())
            .unwrap_err();
        assert!(matches!(
            err,
            InstallError::Stage {
                stage: Stage::Bootstrap,
                ..
            }
        ));
        assert_eq!(fake.count(Op::Unmount), 1);
        assert_eq!(fake.count(Op::Chroot), 0);
    }

    #[test]
    fn non_fatal_failures_are_recorded_and_skipped_over() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        let mut installer = installer(&fake, dir.path());
        let config = InstallationConfig {
            timezone: Some("../../nowhere".to_string()),
            ..config()
        };

        let report = perform_installation(&mut installer, &config, &InstallerHooks::default())
            .unwrap();
        assert!(matches!(
            report.outcome(Stage::Timezone),
            Some(StageOutcome::Failed(_))
        ));
        assert_eq!(report.outcome(Stage::Fstab), Some(&StageOutcome::Completed));
    }

    struct BrokenFinish;

    impl ProfileHook for BrokenFinish {
        fn name(&self) -> &str {
            "broken-finish"
        }

        fn install(&self, _installer: &mut Installer) -> Result<()> {
            Ok(())
        }

        fn post_install(&self, _installer: &mut Installer) -> Result<()> {
            Err(InstallError::Unsupported("greeter config missing".to_string()))
        }
    }

    #[test]
    fn failing_profile_post_install_still_writes_fstab() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        let mut installer = installer(&fake, dir.path());
        let hooks = InstallerHooks {
            profile: Some(&BrokenFinish),
            ..Default::default()
        };

        let report = perform_installation(&mut installer, &config(), &hooks).unwrap();
        assert_eq!(
            report.outcome(Stage::RootPassword),
            Some(&StageOutcome::Skipped("no root password".to_string()))
        );
        assert!(matches!(
            report.outcome(Stage::Profile),
            Some(StageOutcome::Failed(reason)) if reason.contains("greeter config missing")
        ));
        assert_eq!(report.outcome(Stage::Fstab), Some(&StageOutcome::Completed));
        assert!(dir.path().join("target/etc/fstab").exists());
    }

    #[test]
    fn no_shell_after_a_fatal_failure() {
        let fake = FakeBackend::new();
        fake.fail_on(Op::Pacstrap, "pacstrap: no network");
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        let mut installer = installer(&fake, dir.path());
        let config = InstallationConfig {
            chroot_shell: true,
            ..config()
        };

        assert!(perform_installation(&mut installer, &config, &InstallerHooks::default()).is_err());
        assert_eq!(fake.count(Op::Shell), 0);
        assert_eq!(fake.count(Op::Unmount), 1);
    }

    #[test]
    fn shell_is_offered_after_success() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        let mut installer = installer(&fake, dir.path());
        let config = InstallationConfig {
            chroot_shell: true,
            ..config()
        };

        let report =
            perform_installation(&mut installer, &config, &InstallerHooks::default()).unwrap();
        assert_eq!(fake.count(Op::Shell), 1);
        assert_eq!(report.outcome(Stage::Exit), Some(&StageOutcome::Completed));
    }

    #[test]
    fn invalid_configuration_touches_nothing() {
        let fake = FakeBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let mut installer = installer(&fake, dir.path());
        let config = InstallationConfig {
            kernels: Vec::new(),
            ..config()
        };

        assert!(matches!(
            perform_installation(&mut installer, &config, &InstallerHooks::default()),
            Err(InstallError::Config(_))
        ));
        assert!(fake.calls().is_empty());
    }
}
