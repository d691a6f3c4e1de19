//! NatMon Agent
//!
//! AWS-facing adapters for the failover loop in `natmon-core`:
//!
//! - [`Ec2Gateway`]: route tables, elastic IPs and instance attributes via EC2
//! - [`ImdsMetadata`]: host identity from the instance metadata service
//! - [`IcmpProber`]: peer liveness via the system `ping`

#![warn(missing_docs)]

pub mod ec2;
pub mod icmp;
pub mod imds;

pub use ec2::Ec2Gateway;
pub use icmp::IcmpProber;
pub use imds::ImdsMetadata;
