//! Cloud Gateway
//!
//! The slice of the cloud control plane the failover loop depends on. Every
//! operation is safe to repeat; callers never retry internally.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Control-plane errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Route table does not exist
    #[error("route table not found: {0}")]
    RouteTableNotFound(String),

    /// Route table has no route for the destination
    #[error("no route for {destination} in route table {route_table_id}")]
    RouteNotFound {
        /// Route table searched
        route_table_id: String,
        /// Destination CIDR looked up
        destination: String,
    },

    /// Instance is gone or has no private address
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Any other control-plane failure
    #[error("control plane error: {0}")]
    Api(String),
}

/// Cloud control-plane capability
#[async_trait]
pub trait CloudGateway: Send + Sync {
    /// Associate a pre-allocated elastic IP with an instance
    async fn assign_elastic_ip(&self, instance_id: &str, allocation_id: &str) -> GatewayResult<()>;

    /// Toggle the source/destination check of an instance
    async fn set_source_dest_check(&self, instance_id: &str, enabled: bool) -> GatewayResult<()>;

    /// Point `destination` in a route table at an instance
    async fn replace_route(
        &self,
        route_table_id: &str,
        destination: &str,
        instance_id: &str,
    ) -> GatewayResult<()>;

    /// Instance currently targeted by `destination`, if the route has one
    async fn instance_id_for_route(
        &self,
        route_table_id: &str,
        destination: &str,
    ) -> GatewayResult<Option<String>>;

    /// Private address of an instance
    async fn instance_ip(&self, instance_id: &str) -> GatewayResult<IpAddr>;
}

/// Gateway call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    /// `assign_elastic_ip` calls
    pub assign_elastic_ip: usize,
    /// `set_source_dest_check` calls
    pub set_source_dest_check: usize,
    /// `replace_route` calls
    pub replace_route: usize,
    /// `instance_id_for_route` calls
    pub instance_id_for_route: usize,
    /// `instance_ip` calls
    pub instance_ip: usize,
}

#[derive(Default)]
struct CloudState {
    /// (route table, destination) -> target instance
    routes: HashMap<(String, String), Option<String>>,
    instances: HashMap<String, IpAddr>,
    elastic_ips: HashMap<String, String>,
    source_dest_check: HashMap<String, bool>,
    /// Error returned by every `instance_ip` call while set
    instance_ip_fault: Option<GatewayError>,
    calls: GatewayCalls,
}

/// In-memory control plane (for testing and development)
///
/// Several controllers may share one instance through an `Arc` to simulate
/// peers racing on the same route tables.
pub struct InMemoryGateway {
    state: RwLock<CloudState>,
}

impl InMemoryGateway {
    /// Empty control plane with no route tables
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CloudState::default()),
        }
    }

    /// Create or overwrite a route
    pub fn set_route(&self, route_table_id: &str, destination: &str, target: Option<&str>) {
        self.state.write().routes.insert(
            (route_table_id.to_string(), destination.to_string()),
            target.map(str::to_string),
        );
    }

    /// Register an instance with its private address
    pub fn add_instance(&self, instance_id: &str, ip: IpAddr) {
        self.state.write().instances.insert(instance_id.to_string(), ip);
    }

    /// Remove an instance, as if it had been terminated
    pub fn terminate_instance(&self, instance_id: &str) {
        self.state.write().instances.remove(instance_id);
    }

    /// Current target of a route
    pub fn route_target(&self, route_table_id: &str, destination: &str) -> Option<String> {
        self.state
            .read()
            .routes
            .get(&(route_table_id.to_string(), destination.to_string()))
            .cloned()
            .flatten()
    }

    /// Instance currently holding an elastic IP allocation
    pub fn elastic_ip_holder(&self, allocation_id: &str) -> Option<String> {
        self.state.read().elastic_ips.get(allocation_id).cloned()
    }

    /// Source/destination check flag of an instance, if it was ever set
    pub fn source_dest_check(&self, instance_id: &str) -> Option<bool> {
        self.state.read().source_dest_check.get(instance_id).copied()
    }

    /// Make `instance_ip` fail with `error` until cleared with `None`
    pub fn fail_instance_lookups(&self, error: Option<GatewayError>) {
        self.state.write().instance_ip_fault = error;
    }

    /// Calls made so far
    pub fn calls(&self) -> GatewayCalls {
        self.state.read().calls
    }

    fn has_table(state: &CloudState, route_table_id: &str) -> bool {
        state.routes.keys().any(|(table, _)| table == route_table_id)
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudGateway for InMemoryGateway {
    async fn assign_elastic_ip(&self, instance_id: &str, allocation_id: &str) -> GatewayResult<()> {
        let mut state = self.state.write();
        state.calls.assign_elastic_ip += 1;
        state.elastic_ips.insert(allocation_id.to_string(), instance_id.to_string());
        Ok(())
    }

    async fn set_source_dest_check(&self, instance_id: &str, enabled: bool) -> GatewayResult<()> {
        let mut state = self.state.write();
        state.calls.set_source_dest_check += 1;
        state.source_dest_check.insert(instance_id.to_string(), enabled);
        Ok(())
    }

    async fn replace_route(
        &self,
        route_table_id: &str,
        destination: &str,
        instance_id: &str,
    ) -> GatewayResult<()> {
        let mut state = self.state.write();
        state.calls.replace_route += 1;
        if !Self::has_table(&state, route_table_id) {
            return Err(GatewayError::RouteTableNotFound(route_table_id.to_string()));
        }
        state.routes.insert(
            (route_table_id.to_string(), destination.to_string()),
            Some(instance_id.to_string()),
        );
        Ok(())
    }

    async fn instance_id_for_route(
        &self,
        route_table_id: &str,
        destination: &str,
    ) -> GatewayResult<Option<String>> {
        let mut state = self.state.write();
        state.calls.instance_id_for_route += 1;
        if !Self::has_table(&state, route_table_id) {
            return Err(GatewayError::RouteTableNotFound(route_table_id.to_string()));
        }
        state
            .routes
            .get(&(route_table_id.to_string(), destination.to_string()))
            .cloned()
            .ok_or_else(|| GatewayError::RouteNotFound {
                route_table_id: route_table_id.to_string(),
                destination: destination.to_string(),
            })
    }

    async fn instance_ip(&self, instance_id: &str) -> GatewayResult<IpAddr> {
        let mut state = self.state.write();
        state.calls.instance_ip += 1;
        if let Some(err) = &state.instance_ip_fault {
            return Err(err.clone());
        }
        state
            .instances
            .get(instance_id)
            .copied()
            .ok_or_else(|| GatewayError::InstanceNotFound(instance_id.to_string()))
    }
}
