// SPDX-License-Identifier: GPL-3.0-only

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use install_core::Confirmation;
use tracing::{info, warn};

/// Gives the operator `seconds` to abort with Ctrl-C before devices are wiped
pub struct Countdown {
    seconds: u64,
}

impl Countdown {
    pub fn new(seconds: u64) -> Self {
        Self { seconds }
    }
}

impl Confirmation for Countdown {
    fn confirm_wipe(&self, devices: &[PathBuf]) -> bool {
        if devices.is_empty() || self.seconds == 0 {
            return true;
        }

        eprintln!("The following devices will be wiped:");
        for device in devices {
            eprintln!("  {}", device.display());
        }
        eprintln!("Press Ctrl-C to abort.");

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("cannot start the countdown: {e}");
                return false;
            }
        };

        let seconds = self.seconds;
        let confirmed = runtime.block_on(async move {
            tokio::select! {
                _ = tick(seconds) => true,
                _ = tokio::signal::ctrl_c() => false,
            }
        });

        eprintln!();
        if !confirmed {
            info!("aborted by the operator");
        }
        confirmed
    }
}

async fn tick(seconds: u64) {
    for remaining in (1..=seconds).rev() {
        eprint!("\rStarting in {remaining}... ");
        let _ = std::io::stderr().flush();
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_seconds_confirms_immediately() {
        assert!(Countdown::new(0).confirm_wipe(&[PathBuf::from("/dev/sda")]));
    }

    #[test]
    fn nothing_to_wipe_needs_no_countdown() {
        assert!(Countdown::new(30).confirm_wipe(&[]));
    }
}
