// SPDX-License-Identifier: GPL-3.0-only

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::{Result, SysError};

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub executed: bool,
}

/// Command line as it is logged; stdin and environment values are never included
pub fn render(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

pub fn require_tool(name: &str) -> Result<()> {
    which::which(name)
        .map(|_| ())
        .map_err(|_| SysError::ToolMissing(name.to_string()))
}

/// Runs external programs, or only logs them in dry-run mode
#[derive(Debug, Clone, Copy, Default)]
pub struct Runner {
    dry_run: bool,
}

impl Runner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn run(&self, command: &str, args: &[String]) -> Result<CommandOutcome> {
        self.run_with_input(command, args, None, &[])
    }

    /// Run a command that changes the system; `input` is written to stdin
    pub fn run_with_input(
        &self,
        command: &str,
        args: &[String],
        input: Option<&str>,
        envs: &[(&str, &str)],
    ) -> Result<CommandOutcome> {
        let rendered = render(command, args);
        if self.dry_run {
            debug!("dry-run: {rendered}");
            return Ok(CommandOutcome {
                command: rendered,
                stdout: String::new(),
                stderr: String::new(),
                executed: false,
            });
        }
        execute(command, args, input, envs, rendered)
    }

    /// Read-only commands run even in dry-run mode
    pub fn query(&self, command: &str, args: &[String]) -> Result<String> {
        let rendered = render(command, args);
        execute(command, args, None, &[], rendered).map(|outcome| outcome.stdout)
    }
}

fn execute(
    command: &str,
    args: &[String],
    input: Option<&str>,
    envs: &[(&str, &str)],
    rendered: String,
) -> Result<CommandOutcome> {
    debug!("running: {rendered}");

    let mut child = Command::new(command)
        .args(args)
        .envs(envs.iter().copied())
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| SysError::CommandFailed {
            command: rendered.clone(),
            stderr: error.to_string(),
        })?;

    if let Some(input) = input
        && let Some(mut stdin) = child.stdin.take()
    {
        stdin.write_all(input.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(SysError::CommandFailed {
            command: rendered,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(CommandOutcome {
        command: rendered,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        executed: true,
    })
}

/// Build an owned argument vector from anything string-like
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string_lossy().into_owned())
        .collect()
}
