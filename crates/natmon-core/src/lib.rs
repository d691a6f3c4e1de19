//! NatMon Core - NAT Instance Failover
//!
//! Keeps the default route of a set of cloud route tables pointed at a live
//! NAT instance. Every NAT instance in the group runs the same loop: it checks
//! that each route's current target answers, and takes the route over when it
//! does not.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          FAILOVER CONTROLLER                            │
//! │        setup_nat (own subnet, once) | run_cycle (every route)           │
//! └──────────────┬──────────────────────────────────────┬───────────────────┘
//!                │                                      │
//! ┌──────────────▼──────────────┐        ┌──────────────▼──────────────────┐
//! │   ROUTE OWNERSHIP RESOLVER  │        │          HOST IDENTITY          │
//! │ self | live peer | dead     │        │  instance | zone | subnets      │
//! └──────┬───────────────┬──────┘        └─────────────────────────────────┘
//!        │               │
//! ┌──────▼──────┐ ┌──────▼──────┐
//! │CLOUD GATEWAY│ │   PROBER    │
//! │ routes, EIP │ │ ICMP echo   │
//! └─────────────┘ └─────────────┘
//! ```
//!
//! No state survives a cycle: ownership is re-read from the control plane
//! every time, which is how peers observe each other's reroutes.

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod gateway;
pub mod identity;
pub mod ownership;
pub mod probe;
pub mod settings;

use thiserror::Error;

pub use config::{ConfigError, RouteConfig, RouteConfigSet};
pub use controller::{CycleReport, FailoverController, RerouteOutcome};
pub use gateway::{CloudGateway, GatewayError, GatewayResult, InMemoryGateway};
pub use identity::{HostIdentity, IdentityError, MetadataSource, StaticMetadata};
pub use ownership::{OwnershipResolver, RouteOwnership};
pub use probe::{LivenessProber, ProbePolicy, StaticProber};
pub use settings::{MonitorSettings, DEFAULT_ROUTE_CIDR};

/// NatMon error types
#[derive(Debug, Error)]
pub enum NatMonError {
    /// Route list or settings rejected
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Host identity could not be established
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    /// Control plane call failed outside a cycle
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    /// Control plane call failed while evaluating a route
    #[error("route table {route_table_id}: {source}")]
    Route {
        /// Route table being evaluated
        route_table_id: String,
        /// Underlying failure
        source: GatewayError,
    },
}

/// NatMon result type
pub type Result<T> = std::result::Result<T, NatMonError>;
