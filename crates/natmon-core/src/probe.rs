//! Liveness Probing
//!
//! A probe answers one question: did the peer reply at least once within the
//! policy's bounds. Unreachability is an ordinary `false`, never an error.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How hard to try before declaring a peer dead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Echo requests to send
    pub count: u32,
    /// Timeout for each request
    pub timeout: Duration,
}

impl ProbePolicy {
    /// Worst-case time a probe may take
    pub fn budget(&self) -> Duration {
        self.timeout * self.count
    }
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            count: 3,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Reachability probe
#[async_trait]
pub trait LivenessProber: Send + Sync {
    /// True if at least one reply arrived before the policy ran out
    async fn probe(&self, ip: IpAddr, policy: ProbePolicy) -> bool;
}

/// Scripted prober (for testing and development)
///
/// Unknown addresses are reported dead.
pub struct StaticProber {
    answers: RwLock<HashMap<IpAddr, bool>>,
    calls: AtomicUsize,
}

impl StaticProber {
    /// Prober that reports every address dead
    pub fn new() -> Self {
        Self {
            answers: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Set the answer for an address
    pub fn set_reachable(&self, ip: IpAddr, reachable: bool) {
        self.answers.write().insert(ip, reachable);
    }

    /// Number of probes issued so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LivenessProber for StaticProber {
    async fn probe(&self, ip: IpAddr, _policy: ProbePolicy) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers.read().get(&ip).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_budget() {
        let policy = ProbePolicy::default();
        assert_eq!(policy.count, 3);
        assert_eq!(policy.budget(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_static_prober() {
        let prober = StaticProber::new();
        let up: IpAddr = "10.0.1.10".parse().unwrap();
        let down: IpAddr = "10.0.1.11".parse().unwrap();
        prober.set_reachable(up, true);
        prober.set_reachable(down, false);

        assert!(prober.probe(up, ProbePolicy::default()).await);
        assert!(!prober.probe(down, ProbePolicy::default()).await);
        assert!(!prober.probe("10.0.1.12".parse().unwrap(), ProbePolicy::default()).await);
        assert_eq!(prober.calls(), 3);
    }
}
