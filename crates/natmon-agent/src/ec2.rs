//! EC2 control plane
//!
//! `CloudGateway` over the EC2 API. Credentials come from the default AWS
//! provider chain; the region is the host's own.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ec2::types::AttributeBooleanValue;
use aws_sdk_ec2::Client;
use natmon_core::gateway::{CloudGateway, GatewayError, GatewayResult};
use std::net::IpAddr;

const ROUTE_TABLE_NOT_FOUND: &str = "InvalidRouteTableID.NotFound";
const ROUTE_NOT_FOUND: &str = "InvalidRoute.NotFound";
const INSTANCE_NOT_FOUND: &[&str] = &["InvalidInstanceID.NotFound", "InvalidInstanceID.Malformed"];

/// EC2-backed gateway
#[derive(Clone)]
pub struct Ec2Gateway {
    client: Client,
}

impl Ec2Gateway {
    /// Build a client for `region` from the environment's credentials
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        tracing::debug!(region, "EC2 client ready");
        Self::from_client(Client::new(&config))
    }

    /// Wrap an existing client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CloudGateway for Ec2Gateway {
    async fn assign_elastic_ip(&self, instance_id: &str, allocation_id: &str) -> GatewayResult<()> {
        self.client
            .associate_address()
            .instance_id(instance_id)
            .allocation_id(allocation_id)
            .allow_reassociation(true)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn set_source_dest_check(&self, instance_id: &str, enabled: bool) -> GatewayResult<()> {
        self.client
            .modify_instance_attribute()
            .instance_id(instance_id)
            .source_dest_check(AttributeBooleanValue::builder().value(enabled).build())
            .send()
            .await
            .map_err(|e| classify_instance_error(e, instance_id))?;
        Ok(())
    }

    async fn replace_route(
        &self,
        route_table_id: &str,
        destination: &str,
        instance_id: &str,
    ) -> GatewayResult<()> {
        let replaced = self
            .client
            .replace_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination)
            .instance_id(instance_id)
            .send()
            .await;

        let err = match replaced {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };

        // ReplaceRoute does not create; fall back so the call is an upsert.
        if err.code() != Some(ROUTE_NOT_FOUND) {
            return Err(classify_route_table_error(err, route_table_id));
        }
        tracing::info!(route_table = route_table_id, destination, "Route missing, creating it");

        self.client
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| classify_route_table_error(e, route_table_id))?;
        Ok(())
    }

    async fn instance_id_for_route(
        &self,
        route_table_id: &str,
        destination: &str,
    ) -> GatewayResult<Option<String>> {
        let output = self
            .client
            .describe_route_tables()
            .route_table_ids(route_table_id)
            .send()
            .await
            .map_err(|e| classify_route_table_error(e, route_table_id))?;

        let table = output
            .route_tables()
            .first()
            .ok_or_else(|| GatewayError::RouteTableNotFound(route_table_id.to_string()))?;

        let route = table
            .routes()
            .iter()
            .find(|r| r.destination_cidr_block() == Some(destination))
            .ok_or_else(|| GatewayError::RouteNotFound {
                route_table_id: route_table_id.to_string(),
                destination: destination.to_string(),
            })?;

        Ok(route.instance_id().map(str::to_string))
    }

    async fn instance_ip(&self, instance_id: &str) -> GatewayResult<IpAddr> {
        let output = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| classify_instance_error(e, instance_id))?;

        // Terminated instances linger in results without a private address.
        let address = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find_map(|i| i.private_ip_address())
            .ok_or_else(|| GatewayError::InstanceNotFound(instance_id.to_string()))?;

        address
            .parse()
            .map_err(|e| GatewayError::Api(format!("bad address {:?} for {}: {}", address, instance_id, e)))
    }
}

fn api_error<E: std::error::Error>(err: E) -> GatewayError {
    GatewayError::Api(DisplayErrorContext(err).to_string())
}

fn classify_route_table_error<E>(err: E, route_table_id: &str) -> GatewayError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    if err.code() == Some(ROUTE_TABLE_NOT_FOUND) {
        GatewayError::RouteTableNotFound(route_table_id.to_string())
    } else {
        api_error(err)
    }
}

fn classify_instance_error<E>(err: E, instance_id: &str) -> GatewayError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    match err.code() {
        Some(code) if INSTANCE_NOT_FOUND.contains(&code) => {
            GatewayError::InstanceNotFound(instance_id.to_string())
        }
        _ => api_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::error::ErrorMetadata;

    #[test]
    fn test_classify_missing_instance() {
        let err = ErrorMetadata::builder()
            .code("InvalidInstanceID.NotFound")
            .message("The instance ID 'i-dead' does not exist")
            .build();
        assert_eq!(
            classify_instance_error(err, "i-dead"),
            GatewayError::InstanceNotFound("i-dead".into())
        );
    }

    #[test]
    fn test_classify_missing_route_table() {
        let err = ErrorMetadata::builder().code(ROUTE_TABLE_NOT_FOUND).build();
        assert_eq!(
            classify_route_table_error(err, "rtb-1"),
            GatewayError::RouteTableNotFound("rtb-1".into())
        );
    }

    #[test]
    fn test_other_errors_are_transient() {
        let err = ErrorMetadata::builder()
            .code("RequestLimitExceeded")
            .message("Request limit exceeded.")
            .build();
        assert!(matches!(classify_instance_error(err, "i-1"), GatewayError::Api(_)));
    }
}
