//! # envbase_nat
//!
//! HA-NAT failover controller.
//!
//! A NAT instance started by the HA NAT auto scaling group runs this once at
//! boot to claim the default route of the private subnets in its zone.
//!
//! ## Features
//!
//! - IMDSv2 metadata client with bounded retries
//! - Idempotent IP forwarding and masquerade setup
//! - Route creation or replacement per private subnet, skipping main tables
//! - Degraded fallback to masquerading `0.0.0.0/0` when the VPC range is unknown
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use envbase_nat::{FailoverController, ImdsClient, SystemHostNetwork};
//! use envbase_provider::MockProvider;
//!
//! # async fn example() -> envbase_nat::NatResult<()> {
//! let controller = FailoverController::new(
//!     Arc::new(ImdsClient::new()?),
//!     Arc::new(SystemHostNetwork),
//!     Arc::new(MockProvider::new()),
//! );
//! let report = controller.run().await?;
//! println!("{} routes taken", report.routes_taken());
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;
pub mod host;
pub mod metadata;

pub use controller::{
    FailoverController, FailoverSettings, RouteOutcome, SubnetRoute, TakeoverReport,
    TakeoverStage, DEFAULT_ROUTE,
};
pub use error::{NatError, NatResult};
pub use host::{ensure_masquerade, HostNetwork, SystemHostNetwork};
pub use metadata::{instance_identity, vpc_cidr, ImdsClient, InstanceIdentity, MetadataSource};
