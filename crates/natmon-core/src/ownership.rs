//! Route Ownership Resolution
//!
//! Ownership is never cached: every call re-reads the route from the control
//! plane, so a reroute made by a peer is visible on the next cycle.

use crate::config::RouteConfig;
use crate::gateway::{CloudGateway, GatewayError};
use crate::identity::HostIdentity;
use crate::probe::{LivenessProber, ProbePolicy};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Observed owner of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOwnership {
    /// Route targets this host
    OwnedBySelf,
    /// Route targets a peer that answered the probe
    OwnedByLivePeer {
        /// Peer instance
        instance_id: String,
        /// Address that answered
        ip: IpAddr,
    },
    /// Route targets a peer that did not answer or could not be looked up
    OwnedByDeadPeer {
        /// Peer instance
        instance_id: String,
        /// Address probed, `None` when the lookup failed
        ip: Option<IpAddr>,
    },
    /// Route has no instance target
    Unowned,
}

impl RouteOwnership {
    /// Whether a live NAT serves the route
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::OwnedBySelf | Self::OwnedByLivePeer { .. })
    }

    /// Route target when it is a peer instance
    pub fn peer_instance_id(&self) -> Option<&str> {
        match self {
            Self::OwnedBySelf | Self::Unowned => None,
            Self::OwnedByLivePeer { instance_id, .. } | Self::OwnedByDeadPeer { instance_id, .. } => {
                Some(instance_id.as_str())
            }
        }
    }
}

impl fmt::Display for RouteOwnership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OwnedBySelf => write!(f, "self"),
            Self::OwnedByLivePeer { instance_id, ip } => write!(f, "live peer {} ({})", instance_id, ip),
            Self::OwnedByDeadPeer { instance_id, ip: Some(ip) } => {
                write!(f, "dead peer {} ({})", instance_id, ip)
            }
            Self::OwnedByDeadPeer { instance_id, ip: None } => write!(f, "vanished peer {}", instance_id),
            Self::Unowned => write!(f, "no owner"),
        }
    }
}

/// Decides who owns a route and whether that owner is alive
pub struct OwnershipResolver {
    identity: Arc<HostIdentity>,
    gateway: Arc<dyn CloudGateway>,
    prober: Arc<dyn LivenessProber>,
    policy: ProbePolicy,
    destination: String,
}

impl OwnershipResolver {
    /// Resolver watching `destination` in each route table
    pub fn new(
        identity: Arc<HostIdentity>,
        gateway: Arc<dyn CloudGateway>,
        prober: Arc<dyn LivenessProber>,
        policy: ProbePolicy,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            gateway,
            prober,
            policy,
            destination: destination.into(),
        }
    }

    /// Destination CIDR inspected in each route table
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Whether a live NAT currently serves the route
    pub async fn check_alive(&self, config: &RouteConfig) -> Result<bool, GatewayError> {
        Ok(self.resolve(config).await?.is_alive())
    }

    /// Observe the route's owner.
    ///
    /// Errors reading the route itself propagate. A peer whose address cannot
    /// be looked up is reported dead, whatever the lookup error.
    pub async fn resolve(&self, config: &RouteConfig) -> Result<RouteOwnership, GatewayError> {
        let owner = self
            .gateway
            .instance_id_for_route(&config.route_table_id, &self.destination)
            .await?;

        let instance_id = match owner {
            None => return Ok(RouteOwnership::Unowned),
            // A running process is alive by definition; skip the probe.
            Some(id) if id == self.identity.instance_id() => return Ok(RouteOwnership::OwnedBySelf),
            Some(id) => id,
        };

        let ip = match self.gateway.instance_ip(&instance_id).await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(
                    route_table = %config.route_table_id,
                    instance_id = %instance_id,
                    error = %e,
                    "Cannot resolve route target address, treating it as dead"
                );
                return Ok(RouteOwnership::OwnedByDeadPeer { instance_id, ip: None });
            }
        };

        if self.prober.probe(ip, self.policy).await {
            Ok(RouteOwnership::OwnedByLivePeer { instance_id, ip })
        } else {
            Ok(RouteOwnership::OwnedByDeadPeer { instance_id, ip: Some(ip) })
        }
    }
}
