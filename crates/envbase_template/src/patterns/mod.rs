//! Built-in patterns.

pub mod base_network;
pub mod bastion;
pub mod cluster;
pub mod ha_cluster;
pub mod ha_nat;

use std::sync::Arc;

use crate::pattern::Pattern;

pub use base_network::{BaseNetworkPattern, BASE_NETWORK};
pub use bastion::{BastionPattern, BastionSettings, BASTION};
pub use ha_cluster::{HaClusterPattern, HaClusterSettings, HA_CLUSTER};
pub use ha_nat::HaNat;

/// The default environment, dependencies first.
///
/// [`HaClusterPattern`] is registered by callers that want one.
pub fn builtin() -> Vec<Arc<dyn Pattern>> {
    vec![
        Arc::new(BaseNetworkPattern::new()),
        Arc::new(BastionPattern::new()),
    ]
}
