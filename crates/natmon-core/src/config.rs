//! Route Configuration
//!
//! Route configs arrive as whitespace-separated rows of the form
//! `allocation_id,subnet_id,route_table_id`, one row per subnet a NAT may serve.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// A single NAT route assignment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Elastic IP allocation bound to the NAT serving this subnet
    pub elastic_ip_allocation_id: String,
    /// Subnet this assignment applies to
    pub subnet_id: String,
    /// Route table rewritten on failover
    pub route_table_id: String,
}

impl RouteConfig {
    /// Build a config from its three ids
    pub fn new(
        elastic_ip_allocation_id: impl Into<String>,
        subnet_id: impl Into<String>,
        route_table_id: impl Into<String>,
    ) -> Self {
        Self {
            elastic_ip_allocation_id: elastic_ip_allocation_id.into(),
            subnet_id: subnet_id.into(),
            route_table_id: route_table_id.into(),
        }
    }
}

impl FromStr for RouteConfig {
    type Err = ConfigError;

    fn from_str(row: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = row.split(',').map(str::trim).collect();
        match fields.as_slice() {
            [allocation, subnet, route_table]
                if !allocation.is_empty() && !subnet.is_empty() && !route_table.is_empty() =>
            {
                Ok(Self::new(*allocation, *subnet, *route_table))
            }
            _ => Err(ConfigError::MalformedRow(row.to_string())),
        }
    }
}

/// The validated set of route configs, in input order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfigSet {
    routes: Vec<RouteConfig>,
}

impl RouteConfigSet {
    /// Build a set, rejecting empty input and duplicate subnets
    pub fn new(routes: Vec<RouteConfig>) -> Result<Self, ConfigError> {
        if routes.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.subnet_id.as_str()) {
                return Err(ConfigError::DuplicateSubnet(route.subnet_id.clone()));
            }
        }

        Ok(Self { routes })
    }

    /// Parse the textual route list. Any malformed row fails the whole parse.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let routes = input
            .split_whitespace()
            .map(RouteConfig::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(routes)
    }

    /// Configs in input order
    pub fn iter(&self) -> impl Iterator<Item = &RouteConfig> {
        self.routes.iter()
    }

    /// Number of configs
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Always false for a validated set
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<'a> IntoIterator for &'a RouteConfigSet {
    type Item = &'a RouteConfig;
    type IntoIter = std::slice::Iter<'a, RouteConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.routes.iter()
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Row is not three non-empty comma-separated ids
    #[error("malformed route row {0:?}: expected allocation_id,subnet_id,route_table_id")]
    MalformedRow(String),

    /// No rows at all
    #[error("no route configs supplied")]
    Empty,

    /// Two rows name the same subnet
    #[error("subnet {0} is configured more than once")]
    DuplicateSubnet(String),

    /// Settings value out of range
    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// File could not be read
    #[error("failed to read {path}: {reason}")]
    Io {
        /// File path
        path: String,
        /// I/O or parse failure
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows() {
        let input = "eipalloc-1,subnet-a,rtb-1\n eipalloc-2,subnet-b,rtb-2  ";
        let set = RouteConfigSet::parse(input).unwrap();

        assert_eq!(set.len(), 2);
        let routes: Vec<_> = set.iter().collect();
        assert_eq!(routes[0], &RouteConfig::new("eipalloc-1", "subnet-a", "rtb-1"));
        assert_eq!(routes[1].route_table_id, "rtb-2");
    }

    #[test]
    fn test_malformed_row_is_fatal() {
        let err = RouteConfigSet::parse("eipalloc-1,subnet-a,rtb-1 eipalloc-2,subnet-b").unwrap_err();
        assert_eq!(err, ConfigError::MalformedRow("eipalloc-2,subnet-b".into()));

        let err = RouteConfigSet::parse("eipalloc-1,,rtb-1").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedRow(_)));

        let err = RouteConfigSet::parse("a,b,c,d").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedRow(_)));
    }

    #[test]
    fn test_duplicate_subnet_rejected() {
        let err = RouteConfigSet::parse("eip-1,subnet-a,rtb-1 eip-2,subnet-a,rtb-2").unwrap_err();
        assert_eq!(err, ConfigError::DuplicateSubnet("subnet-a".into()));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(RouteConfigSet::parse("  \n ").unwrap_err(), ConfigError::Empty);
    }
}
