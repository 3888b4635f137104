//! Zone selection and layout generation against a live provider.

use std::sync::Arc;

use envbase_provider::CloudProvider;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, NetworkResult};
use crate::layout::{plan_layout, NetworkLayout};
use crate::spec::NetworkSpec;

/// Generates network layouts using zones reported by the provider.
pub struct TopologyGenerator {
    provider: Arc<dyn CloudProvider>,
}

impl TopologyGenerator {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Up to `limit` zones in `region` that are available and offer `instance_type`,
    /// in provider order.
    pub async fn eligible_zones(
        &self,
        region: &str,
        instance_type: &str,
        limit: usize,
    ) -> NetworkResult<Vec<String>> {
        let zones = self.provider.describe_zones(region).await?;
        let mut eligible = Vec::new();

        for zone in zones {
            if eligible.len() == limit {
                break;
            }
            if !zone.is_available() {
                debug!("Skipping zone {} in state {}", zone.name, zone.state);
                continue;
            }
            if !self
                .provider
                .zone_offers_instance_type(&zone.name, instance_type)
                .await?
            {
                warn!("Zone {} does not offer {}; skipping", zone.name, instance_type);
                continue;
            }
            eligible.push(zone.name);
        }

        Ok(eligible)
    }

    /// Select zones and lay out the network.
    pub async fn generate(&self, spec: &NetworkSpec, region: &str) -> NetworkResult<NetworkLayout> {
        spec.validate()?;

        let zones = self
            .eligible_zones(region, &spec.nat_instance_type, spec.az_count)
            .await?;

        if zones.len() < spec.az_count {
            return Err(NetworkError::InsufficientZones {
                region: region.to_string(),
                requested: spec.az_count,
                eligible: zones.len(),
            });
        }

        info!("Using availability zones {:?} in {}", zones, region);
        plan_layout(spec, &zones)
    }
}
