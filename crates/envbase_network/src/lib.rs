//! # envbase_network
//!
//! Multi-AZ network topology generation.
//!
//! ## Features
//!
//! - Zone selection filtered by availability and instance-type offerings
//! - Sequential, aligned CIDR allocation tier by tier and zone by zone
//! - Internet gateway routing for public tiers, per-zone NAT for private tiers
//!
//! ## Example
//!
//! ```rust
//! use envbase_network::{plan_layout, NetworkSpec, SubnetTier};
//!
//! let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 2)
//!     .with_tier(SubnetTier::public(18, "myPublic"))
//!     .with_tier(SubnetTier::private(22, "myPrivate"));
//!
//! let zones = vec!["us-east-1a".to_string(), "us-east-1b".to_string()];
//! let layout = plan_layout(&spec, &zones).unwrap();
//! assert_eq!(layout.subnets.len(), 4);
//! ```

pub mod allocator;
pub mod error;
pub mod generator;
pub mod layout;
pub mod spec;

pub use allocator::CidrAllocator;
pub use error::{NetworkError, NetworkResult};
pub use generator::TopologyGenerator;
pub use layout::{plan_layout, EgressRoute, NatPlan, NetworkLayout, SubnetPlan};
pub use spec::{NetworkSpec, SubnetKind, SubnetTier, DEFAULT_NAT_INSTANCE_TYPE, MAX_SUBNET_PREFIX};
