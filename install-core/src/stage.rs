// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

/// Installation stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Mount,
    SanityCheck,
    KeyFiles,
    Mirrors,
    Bootstrap,
    Swap,
    Bootloader,
    Network,
    Users,
    Audio,
    Packages,
    Profile,
    Timezone,
    RootPassword,
    Services,
    Fstab,
    Exit,
}

impl Stage {
    pub const ALL: [Stage; 17] = [
        Self::Mount,
        Self::SanityCheck,
        Self::KeyFiles,
        Self::Mirrors,
        Self::Bootstrap,
        Self::Swap,
        Self::Bootloader,
        Self::Network,
        Self::Users,
        Self::Audio,
        Self::Packages,
        Self::Profile,
        Self::Timezone,
        Self::RootPassword,
        Self::Services,
        Self::Fstab,
        Self::Exit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::SanityCheck => "sanity-check",
            Self::KeyFiles => "key-files",
            Self::Mirrors => "mirrors",
            Self::Bootstrap => "bootstrap",
            Self::Swap => "swap",
            Self::Bootloader => "bootloader",
            Self::Network => "network",
            Self::Users => "users",
            Self::Audio => "audio",
            Self::Packages => "packages",
            Self::Profile => "profile",
            Self::Timezone => "timezone",
            Self::RootPassword => "root-password",
            Self::Services => "services",
            Self::Fstab => "fstab",
            Self::Exit => "exit",
        }
    }

    /// A failing fatal stage aborts the remaining stages
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Mount
                | Self::SanityCheck
                | Self::KeyFiles
                | Self::Bootstrap
                | Self::Bootloader
                | Self::Users
                | Self::RootPassword
                | Self::Fstab
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// What happened to every stage of one installation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub records: Vec<StageRecord>,
}

impl InstallReport {
    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.records.push(StageRecord { stage, outcome });
    }

    /// Last outcome recorded for `stage`
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.records
            .iter()
            .rev()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }

    pub fn completed(&self, stage: Stage) -> bool {
        self.outcome(stage) == Some(&StageOutcome::Completed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Failed(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
        assert!(Stage::Mount < Stage::Exit);
        assert!(Stage::Fstab.is_fatal());
        assert!(!Stage::Audio.is_fatal());
        assert!(!Stage::Exit.is_fatal());
    }

    #[test]
    fn report_keeps_last_outcome() {
        let mut report = InstallReport::default();
        report.record(Stage::Mirrors, StageOutcome::Completed);
        report.record(Stage::Mirrors, StageOutcome::Failed("no network".into()));
        assert!(!report.completed(Stage::Mirrors));
        assert_eq!(report.failures().count(), 1);

        let json = serde_json::to_string(&report).unwrap();
        let parsed: InstallReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
