//! # envbase_provider
//!
//! Cloud provider seams used by envbase.
//!
//! ## Features
//!
//! - `CloudProvider`: zone listing, instance-type offerings, template
//!   storage and stack lifecycle calls
//! - `StackEventSource`: topic + queue notification channel for stack events
//! - `NatApi`: route takeover calls for the HA-NAT failover controller
//! - `MockProvider`: in-memory implementation for tests and dry runs
//! - `AwsProvider`: AWS SDK implementation (`aws` cargo feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! use envbase_provider::{CloudProvider, MockProvider};
//!
//! # async fn example() {
//! let provider = MockProvider::new().with_zones(["us-east-1a", "us-east-1b"]);
//! let zones = provider.describe_zones("us-east-1").await.unwrap();
//! assert_eq!(zones.len(), 2);
//! # }
//! ```

#[cfg(feature = "aws")]
pub mod aws;
pub mod error;
pub mod mock;
pub mod provider;
pub mod types;

#[cfg(feature = "aws")]
pub use aws::AwsProvider;
pub use error::{ProviderError, ProviderResult};
pub use mock::{CapturedCall, MockProvider, MockSubnet};
pub use provider::{CloudProvider, NatApi, StackEventSource};
pub use types::{
    AvailabilityZone, ChannelMessage, EventSubscription, InstanceDescription,
    RouteTableAssociation, StackRequest, StackSummary, ZoneState,
};
