//! Host Identity
//!
//! Who this process runs as: instance, placement and attached subnets. Resolved
//! once at startup from instance metadata; there is no degraded mode without it.

use crate::config::{RouteConfig, RouteConfigSet};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

/// Identity errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Metadata lookup failed
    #[error("instance metadata unavailable: {0}")]
    Metadata(String),

    /// Zone name has no region prefix
    #[error("invalid availability zone {0:?}")]
    InvalidZone(String),

    /// No route config names a host subnet
    #[error("no configured route matches host subnets {0:?}")]
    NoMatchingSubnet(Vec<String>),

    /// More than one route config names a host subnet
    #[error("host subnets match several route configs: {0:?}")]
    AmbiguousSubnet(Vec<String>),
}

/// Instance metadata capability
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Id of the running instance
    async fn instance_id(&self) -> Result<String, IdentityError>;

    /// Availability zone, e.g. `us-east-1a`
    async fn availability_zone(&self) -> Result<String, IdentityError>;

    /// MAC addresses of the attached network interfaces
    async fn interface_macs(&self) -> Result<Vec<String>, IdentityError>;

    /// Subnet of the interface with this MAC
    async fn subnet_id_for_mac(&self, mac: &str) -> Result<String, IdentityError>;
}

/// Identity of the running instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    instance_id: String,
    availability_zone: String,
    region: String,
    subnet_ids: BTreeSet<String>,
}

impl HostIdentity {
    /// Build an identity from known values
    pub fn new<I, S>(
        instance_id: impl Into<String>,
        availability_zone: impl Into<String>,
        subnet_ids: I,
    ) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let availability_zone = availability_zone.into();
        let region = region_of(&availability_zone)?;
        Ok(Self {
            instance_id: instance_id.into(),
            availability_zone,
            region,
            subnet_ids: subnet_ids.into_iter().map(Into::into).collect(),
        })
    }

    /// Resolve the identity from instance metadata
    pub async fn resolve(metadata: &dyn MetadataSource) -> Result<Self, IdentityError> {
        let instance_id = metadata.instance_id().await?;
        let availability_zone = metadata.availability_zone().await?;

        let mut subnet_ids = Vec::new();
        for mac in metadata.interface_macs().await? {
            subnet_ids.push(metadata.subnet_id_for_mac(&mac).await?);
        }

        let identity = Self::new(instance_id, availability_zone, subnet_ids)?;
        tracing::debug!(
            instance_id = %identity.instance_id,
            az = %identity.availability_zone,
            subnets = ?identity.subnet_ids,
            "Resolved host identity"
        );
        Ok(identity)
    }

    /// Instance id
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Availability zone
    pub fn availability_zone(&self) -> &str {
        &self.availability_zone
    }

    /// Region derived from the zone
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Subnets of all attached interfaces
    pub fn subnet_ids(&self) -> &BTreeSet<String> {
        &self.subnet_ids
    }

    /// The one route config this host serves at startup
    pub fn host_config<'a>(&self, configs: &'a RouteConfigSet) -> Result<&'a RouteConfig, IdentityError> {
        let matches: Vec<&RouteConfig> = configs
            .iter()
            .filter(|c| self.subnet_ids.contains(&c.subnet_id))
            .collect();

        match matches.as_slice() {
            [config] => Ok(*config),
            [] => Err(IdentityError::NoMatchingSubnet(self.subnet_ids.iter().cloned().collect())),
            _ => Err(IdentityError::AmbiguousSubnet(
                matches.iter().map(|c| c.subnet_id.clone()).collect(),
            )),
        }
    }
}

/// Region of an availability zone: the zone name minus its trailing letter
pub fn region_of(availability_zone: &str) -> Result<String, IdentityError> {
    let mut chars = availability_zone.chars();
    match chars.next_back() {
        Some(suffix) if suffix.is_ascii_alphabetic() && !chars.as_str().is_empty() => {
            Ok(chars.as_str().to_string())
        }
        _ => Err(IdentityError::InvalidZone(availability_zone.to_string())),
    }
}

/// Fixed metadata (for testing and development)
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    /// Empty reads as a metadata failure
    pub instance_id: String,
    /// Zone name
    pub availability_zone: String,
    /// MAC -> subnet id
    pub interfaces: BTreeMap<String, String>,
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn instance_id(&self) -> Result<String, IdentityError> {
        if self.instance_id.is_empty() {
            return Err(IdentityError::Metadata("instance-id".into()));
        }
        Ok(self.instance_id.clone())
    }

    async fn availability_zone(&self) -> Result<String, IdentityError> {
        Ok(self.availability_zone.clone())
    }

    async fn interface_macs(&self) -> Result<Vec<String>, IdentityError> {
        Ok(self.interfaces.keys().cloned().collect())
    }

    async fn subnet_id_for_mac(&self, mac: &str) -> Result<String, IdentityError> {
        self.interfaces
            .get(mac)
            .cloned()
            .ok_or_else(|| IdentityError::Metadata(format!("subnet-id for {}", mac)))
    }
}
