//! ICMP prober
//!
//! Runs the system `ping` and counts echo replies. Every failure mode
//! (missing binary, total loss, runaway process) reads as unreachable.

use async_trait::async_trait;
use natmon_core::probe::{LivenessProber, ProbePolicy};
use std::net::IpAddr;
use std::time::Duration;
use tokio::process::Command;

/// Slack on top of the policy budget before the ping process is abandoned
const PROCESS_GRACE: Duration = Duration::from_secs(2);

/// `LivenessProber` that shells out to `ping`
pub struct IcmpProber {
    binary: String,
}

impl IcmpProber {
    /// Prober using `ping` from `PATH`
    pub fn new() -> Self {
        Self::with_binary("ping")
    }

    /// Prober using a specific ping binary
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LivenessProber for IcmpProber {
    async fn probe(&self, ip: IpAddr, policy: ProbePolicy) -> bool {
        let wait_secs = policy.timeout.as_secs().max(1);

        let mut command = Command::new(&self.binary);
        command
            .arg("-c")
            .arg(policy.count.to_string())
            .arg("-W")
            .arg(wait_secs.to_string())
            .arg(ip.to_string())
            .kill_on_drop(true);

        match tokio::time::timeout(policy.budget() + PROCESS_GRACE, command.output()).await {
            Ok(Ok(output)) => {
                let replies = count_replies(&String::from_utf8_lossy(&output.stdout));
                tracing::debug!(%ip, replies, sent = policy.count, "Ping finished");
                replies > 0
            }
            Ok(Err(e)) => {
                tracing::warn!(%ip, error = %e, "Failed to run {}", self.binary);
                false
            }
            Err(_) => {
                tracing::warn!(%ip, "Ping did not finish in time");
                false
            }
        }
    }
}

/// Number of echo replies in ping output
fn count_replies(output: &str) -> usize {
    output.lines().filter(|line| line.contains("time=")).count()
}
