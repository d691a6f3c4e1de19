//! Failover Controller
//!
//! Each cycle walks every configured route table, not only this host's own,
//! so any live NAT can pick up any route whose owner has gone away.
//!
//! There is no lock and no leader. When two peers seize the same route at
//! once the last write wins; on the next cycle the loser sees a live owner
//! and stops reacting, and the winner sees itself.

use crate::config::{RouteConfig, RouteConfigSet};
use crate::gateway::{CloudGateway, GatewayError};
use crate::identity::HostIdentity;
use crate::ownership::{OwnershipResolver, RouteOwnership};
use crate::probe::LivenessProber;
use crate::settings::MonitorSettings;
use crate::{NatMonError, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// Result of evaluating one route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerouteOutcome {
    /// Route table evaluated
    pub route_table_id: String,
    /// Owner observed before any action
    pub ownership: RouteOwnership,
    /// Whether the route was seized
    pub rerouted: bool,
}

/// Outcomes of one full pass over the configured routes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// One entry per route, in config order
    pub outcomes: Vec<RerouteOutcome>,
}

impl CycleReport {
    /// Route tables seized during the cycle
    pub fn rerouted(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.rerouted)
            .map(|o| o.route_table_id.as_str())
    }

    /// Number of routes seized during the cycle
    pub fn reroute_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.rerouted).count()
    }
}

/// NAT failover control loop
pub struct FailoverController {
    identity: Arc<HostIdentity>,
    gateway: Arc<dyn CloudGateway>,
    resolver: OwnershipResolver,
    configs: RouteConfigSet,
    settings: MonitorSettings,
}

impl FailoverController {
    /// Controller for `configs`, probing peers with the settings' policy
    pub fn new(
        identity: Arc<HostIdentity>,
        gateway: Arc<dyn CloudGateway>,
        prober: Arc<dyn LivenessProber>,
        configs: RouteConfigSet,
        settings: MonitorSettings,
    ) -> Self {
        let resolver = OwnershipResolver::new(
            identity.clone(),
            gateway.clone(),
            prober,
            settings.probe_policy(),
            settings.destination_cidr.clone(),
        );
        Self {
            identity,
            gateway,
            resolver,
            configs,
            settings,
        }
    }

    /// Identity of this host
    pub fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    /// Route tables watched each cycle
    pub fn configs(&self) -> &RouteConfigSet {
        &self.configs
    }

    /// Make this host the NAT for its own subnet.
    ///
    /// Binds the elastic IP, disables the source/destination check and points
    /// the route at this host whatever its current target.
    pub async fn setup_nat(&self, config: &RouteConfig) -> std::result::Result<(), GatewayError> {
        let instance_id = self.identity.instance_id();

        self.gateway
            .assign_elastic_ip(instance_id, &config.elastic_ip_allocation_id)
            .await?;
        self.gateway.set_source_dest_check(instance_id, false).await?;
        self.seize(config).await?;

        tracing::info!(
            az = %self.identity.availability_zone(),
            route_table = %config.route_table_id,
            allocation_id = %config.elastic_ip_allocation_id,
            "NAT setup for this instance"
        );
        Ok(())
    }

    /// Whether a live NAT currently serves the route
    pub async fn check_alive(&self, config: &RouteConfig) -> std::result::Result<bool, GatewayError> {
        self.resolver.check_alive(config).await
    }

    /// Point the route at this host
    pub async fn seize(&self, config: &RouteConfig) -> std::result::Result<(), GatewayError> {
        self.gateway
            .replace_route(
                &config.route_table_id,
                self.resolver.destination(),
                self.identity.instance_id(),
            )
            .await
    }

    /// Seize the route if no live NAT serves it. Returns whether it was seized.
    pub async fn reroute_if_necessary(&self, config: &RouteConfig) -> std::result::Result<bool, GatewayError> {
        Ok(self.evaluate(config).await?.rerouted)
    }

    /// Observe a route and seize it when its owner is dead or absent
    pub async fn evaluate(&self, config: &RouteConfig) -> std::result::Result<RerouteOutcome, GatewayError> {
        let ownership = self.resolver.resolve(config).await?;

        let rerouted = if ownership.is_alive() {
            tracing::debug!(route_table = %config.route_table_id, owner = %ownership, "Route served");
            false
        } else {
            self.seize(config).await?;
            tracing::warn!(
                route_table = %config.route_table_id,
                previous_owner = %ownership,
                "Assumed NAT for route table {}", config.route_table_id
            );
            true
        };

        Ok(RerouteOutcome {
            route_table_id: config.route_table_id.clone(),
            ownership,
            rerouted,
        })
    }

    /// Evaluate every configured route once.
    ///
    /// The first failure ends the cycle; remaining routes wait for the next one.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for config in &self.configs {
            let outcome = self.evaluate(config).await.map_err(|source| NatMonError::Route {
                route_table_id: config.route_table_id.clone(),
                source,
            })?;
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Monitor all routes until `shutdown` resolves.
    ///
    /// A failed cycle is logged and never ends the loop.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let span = tracing::info_span!("nat-monitor", az = %self.identity.availability_zone());
        self.run_loop(shutdown).instrument(span).await
    }

    async fn run_loop<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let interval = self.settings.check_interval();
        tokio::pin!(shutdown);

        tracing::info!(
            routes = self.configs.len(),
            interval_secs = interval.as_secs(),
            "Starting route monitor"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) => tracing::info!(
                    rerouted = report.reroute_count(),
                    "All routes checked successfully"
                ),
                Err(e) => tracing::error!(error = %e, "Route check cycle failed"),
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Route monitor stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Set up NAT for this host's subnet, then monitor until `shutdown`
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let host_config = self.identity.host_config(&self.configs)?;
        self.setup_nat(host_config).await?;
        self.run(shutdown).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::probe::StaticProber;
    use crate::settings::DEFAULT_ROUTE_CIDR;
    use std::net::IpAddr;
    use std::time::Duration;

    const SELF_ID: &str = "i-self";

    struct Harness {
        gateway: Arc<InMemoryGateway>,
        prober: Arc<StaticProber>,
        controller: FailoverController,
    }

    fn harness(instance_id: &str, routes: &str, gateway: Arc<InMemoryGateway>) -> Harness {
        let identity = Arc::new(HostIdentity::new(instance_id, "us-east-1a", ["subnet-a"]).unwrap());
        let prober = Arc::new(StaticProber::new());
        let controller = FailoverController::new(
            identity,
            gateway.clone(),
            prober.clone(),
            RouteConfigSet::parse(routes).unwrap(),
            MonitorSettings::default(),
        );
        Harness { gateway, prober, controller }
    }

    fn config(route_table_id: &str) -> RouteConfig {
        RouteConfig::new("eip-1", "subnet-a", route_table_id)
    }

    #[tokio::test]
    async fn test_reroute_when_dead() {
        let h = harness(SELF_ID, "eip-1,subnet-a,rtb-1", Arc::new(InMemoryGateway::new()));
        h.gateway.set_route("rtb-1", DEFAULT_ROUTE_CIDR, None);

        assert!(h.controller.reroute_if_necessary(&config("rtb-1")).await.unwrap());
        assert_eq!(h.gateway.calls().replace_route, 1);
        assert_eq!(h.gateway.route_target("rtb-1", DEFAULT_ROUTE_CIDR), Some(SELF_ID.into()));
    }

    #[tokio::test]
    async fn test_no_reroute_when_alive() {
        let h = harness(SELF_ID, "eip-1,subnet-a,rtb-1", Arc::new(InMemoryGateway::new()));
        let peer_ip: IpAddr = "10.0.2.20".parse().unwrap();
        h.gateway.set_route("rtb-1", DEFAULT_ROUTE_CIDR, Some("i-peer"));
        h.gateway.add_instance("i-peer", peer_ip);
        h.prober.set_reachable(peer_ip, true);

        assert!(!h.controller.reroute_if_necessary(&config("rtb-1")).await.unwrap());
        assert_eq!(h.gateway.calls().replace_route, 0);
        assert_eq!(h.gateway.route_target("rtb-1", DEFAULT_ROUTE_CIDR), Some("i-peer".into()));
    }

    #[tokio::test]
    async fn test_reroute_when_peer_lookup_fails() {
        let h = harness(SELF_ID, "eip-1,subnet-a,rtb-1", Arc::new(InMemoryGateway::new()));
        h.gateway.set_route("rtb-1", DEFAULT_ROUTE_CIDR, Some("i-peer"));
        h.gateway.add_instance("i-peer", "10.0.2.20".parse().unwrap());
        h.gateway
            .fail_instance_lookups(Some(GatewayError::Api("describe failed".into())));

        let report = h.controller.run_cycle().await.unwrap();
        assert_eq!(report.rerouted().collect::<Vec<_>>(), vec!["rtb-1"]);
        assert_eq!(h.gateway.route_target("rtb-1", DEFAULT_ROUTE_CIDR), Some(SELF_ID.into()));
    }

    #[tokio::test]
    async fn test_second_reroute_observes_self() {
        let h = harness(SELF_ID, "eip-1,subnet-a,rtb-1", Arc::new(InMemoryGateway::new()));
        h.gateway.set_route("rtb-1", DEFAULT_ROUTE_CIDR, Some("i-dead"));

        assert!(h.controller.reroute_if_necessary(&config("rtb-1")).await.unwrap());
        assert!(!h.controller.reroute_if_necessary(&config("rtb-1")).await.unwrap());
        assert_eq!(h.gateway.calls().replace_route, 1);
        assert_eq!(h.prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_setup_then_cycle_does_not_reroute() {
        let h = harness(SELF_ID, "eip-1,subnet-a,rtb-1", Arc::new(InMemoryGateway::new()));
        h.gateway.set_route("rtb-1", DEFAULT_ROUTE_CIDR, Some("i-dead"));

        let host_config = h.controller.identity().host_config(h.controller.configs()).unwrap().clone();
        h.controller.setup_nat(&host_config).await.unwrap();

        let calls = h.gateway.calls();
        assert_eq!(calls.assign_elastic_ip, 1);
        assert_eq!(calls.set_source_dest_check, 1);
        assert_eq!(calls.replace_route, 1);
        assert_eq!(h.gateway.elastic_ip_holder("eip-1"), Some(SELF_ID.into()));
        assert_eq!(h.gateway.source_dest_check(SELF_ID), Some(false));
        assert_eq!(h.gateway.route_target("rtb-1", DEFAULT_ROUTE_CIDR), Some(SELF_ID.into()));

        let report = h.controller.run_cycle().await.unwrap();
        assert_eq!(report.reroute_count(), 0);
        assert_eq!(report.outcomes[0].ownership, RouteOwnership::OwnedBySelf);
        assert_eq!(h.gateway.calls().replace_route, 1);
    }

    #[tokio::test]
    async fn test_cycle_reroutes_only_dead_routes() {
        let h = harness(
            SELF_ID,
            "eip-1,subnet-a,rtb-1 eip-2,subnet-b,rtb-2",
            Arc::new(InMemoryGateway::new()),
        );
        h.gateway.set_route("rtb-1", DEFAULT_ROUTE_CIDR, Some(SELF_ID));
        h.gateway.set_route("rtb-2", DEFAULT_ROUTE_CIDR, None);

        let report = h.controller.run_cycle().await.unwrap();
        assert_eq!(report.rerouted().collect::<Vec<_>>(), vec!["rtb-2"]);
        assert_eq!(h.gateway.calls().replace_route, 1);

        let report = h.controller.run_cycle().await.unwrap();
        assert_eq!(report.reroute_count(), 0);
    }

    #[tokio::test]
    async fn test_cycle_error_aborts_remaining_routes() {
        let h = harness(
            SELF_ID,
            "eip-1,subnet-a,rtb-missing eip-2,subnet-b,rtb-2",
            Arc::new(InMemoryGateway::new()),
        );
        h.gateway.set_route("rtb-2", DEFAULT_ROUTE_CIDR, None);

        let err = h.controller.run_cycle().await.unwrap_err();
        assert!(matches!(err, NatMonError::Route { ref route_table_id, .. } if route_table_id == "rtb-missing"));
        assert_eq!(h.gateway.calls().replace_route, 0);
        assert_eq!(h.gateway.route_target("rtb-2", DEFAULT_ROUTE_CIDR), None);
    }

    #[tokio::test]
    async fn test_concurrent_seizure_converges() {
        let gateway = Arc::new(InMemoryGateway::new());
        let a = harness("i-a", "eip-1,subnet-a,rtb-1", gateway.clone());
        let b = harness("i-b", "eip-1,subnet-a,rtb-1", gateway.clone());
        let (ip_a, ip_b): (IpAddr, IpAddr) = ("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap());
        gateway.add_instance("i-a", ip_a);
        gateway.add_instance("i-b", ip_b);
        gateway.set_route("rtb-1", DEFAULT_ROUTE_CIDR, Some("i-dead"));
        a.prober.set_reachable(ip_b, true);
        b.prober.set_reachable(ip_a, true);

        // Both peers see the dead owner before either writes.
        assert!(!a.controller.check_alive(&config("rtb-1")).await.unwrap());
        assert!(!b.controller.check_alive(&config("rtb-1")).await.unwrap());
        a.controller.seize(&config("rtb-1")).await.unwrap();
        b.controller.seize(&config("rtb-1")).await.unwrap();
        assert_eq!(gateway.route_target("rtb-1", DEFAULT_ROUTE_CIDR), Some("i-b".into()));

        let report_a = a.controller.run_cycle().await.unwrap();
        let report_b = b.controller.run_cycle().await.unwrap();
        assert_eq!(report_a.reroute_count(), 0);
        assert_eq!(report_b.reroute_count(), 0);
        assert_eq!(
            report_a.outcomes[0].ownership,
            RouteOwnership::OwnedByLivePeer { instance_id: "i-b".into(), ip: ip_b }
        );
        assert_eq!(report_b.outcomes[0].ownership, RouteOwnership::OwnedBySelf);
        assert_eq!(gateway.calls().replace_route, 2);
    }

    #[tokio::test]
    async fn test_start_requires_matching_subnet() {
        let h = harness(SELF_ID, "eip-9,subnet-z,rtb-9", Arc::new(InMemoryGateway::new()));
        h.gateway.set_route("rtb-9", DEFAULT_ROUTE_CIDR, None);

        let err = h.controller.start(std::future::ready(())).await.unwrap_err();
        assert!(matches!(err, NatMonError::Identity(_)));
        assert_eq!(h.gateway.calls().assign_elastic_ip, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_failed_cycles() {
        let h = harness(SELF_ID, "eip-1,subnet-a,rtb-1", Arc::new(InMemoryGateway::new()));
        h.gateway.set_route("rtb-1", "10.0.0.0/8", Some(SELF_ID));

        // Cycles at t=0, 60 and 120; shutdown lands at 150.
        h.controller.run(tokio::time::sleep(Duration::from_secs(150))).await;

        assert_eq!(h.gateway.calls().instance_id_for_route, 3);
        assert_eq!(h.gateway.calls().replace_route, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sets_up_and_monitors() {
        let h = harness(SELF_ID, "eip-1,subnet-a,rtb-1", Arc::new(InMemoryGateway::new()));
        h.gateway.set_route("rtb-1", DEFAULT_ROUTE_CIDR, Some("i-dead"));

        h.controller
            .start(tokio::time::sleep(Duration::from_secs(90)))
            .await
            .unwrap();

        let calls = h.gateway.calls();
        assert_eq!(calls.assign_elastic_ip, 1);
        assert_eq!(calls.replace_route, 1);
        assert_eq!(calls.instance_id_for_route, 2);
    }
}
