//! Instance metadata (IMDSv2)

use async_trait::async_trait;
use aws_config::imds::Client;
use natmon_core::identity::{IdentityError, MetadataSource};

const INSTANCE_ID: &str = "/latest/meta-data/instance-id";
const AVAILABILITY_ZONE: &str = "/latest/meta-data/placement/availability-zone";
const INTERFACE_MACS: &str = "/latest/meta-data/network/interfaces/macs/";

/// `MetadataSource` backed by the EC2 instance metadata service
pub struct ImdsMetadata {
    client: Client,
}

impl ImdsMetadata {
    /// Client with the default IMDS endpoint and token settings
    pub fn new() -> Self {
        Self {
            client: Client::builder().build(),
        }
    }

    async fn get(&self, path: &str) -> Result<String, IdentityError> {
        let value = self
            .client
            .get(path)
            .await
            .map_err(|e| IdentityError::Metadata(format!("{}: {}", path, e)))?;
        Ok(value.as_ref().trim().to_string())
    }
}

impl Default for ImdsMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataSource for ImdsMetadata {
    async fn instance_id(&self) -> Result<String, IdentityError> {
        self.get(INSTANCE_ID).await
    }

    async fn availability_zone(&self) -> Result<String, IdentityError> {
        self.get(AVAILABILITY_ZONE).await
    }

    async fn interface_macs(&self) -> Result<Vec<String>, IdentityError> {
        Ok(parse_listing(&self.get(INTERFACE_MACS).await?))
    }

    async fn subnet_id_for_mac(&self, mac: &str) -> Result<String, IdentityError> {
        self.get(&format!("{}{}/subnet-id", INTERFACE_MACS, mac)).await
    }
}

/// Entries of a metadata directory listing, trailing slashes removed
fn parse_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(|line| line.trim().trim_end_matches('/'))
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
