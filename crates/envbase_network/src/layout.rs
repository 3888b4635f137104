//! The planned network: subnets per tier and zone, routing and NAT placement.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allocator::CidrAllocator;
use crate::error::{NetworkError, NetworkResult};
use crate::spec::{NetworkSpec, SubnetKind};

/// Default route target of a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "target")]
pub enum EgressRoute {
    InternetGateway,
    Nat { nat: String },
    None,
}

/// One subnet of the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetPlan {
    /// Logical name, `<tier>AZ<index>`.
    pub name: String,
    pub tier: String,
    pub kind: SubnetKind,
    pub az_index: usize,
    pub zone: String,
    pub cidr: Ipv4Net,
    pub route_table: String,
    pub egress: EgressRoute,
}

/// A NAT instance serving the private subnets of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatPlan {
    pub name: String,
    pub az_index: usize,
    pub zone: String,
    /// Public subnet hosting the NAT.
    pub subnet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLayout {
    pub vpc_cidr: Ipv4Net,
    pub zones: Vec<String>,
    pub subnets: Vec<SubnetPlan>,
    pub nats: Vec<NatPlan>,
    pub nat_instance_type: String,
}

impl NetworkLayout {
    pub fn subnet(&self, name: &str) -> Option<&SubnetPlan> {
        self.subnets.iter().find(|s| s.name == name)
    }

    pub fn subnets_of(&self, kind: SubnetKind) -> impl Iterator<Item = &SubnetPlan> {
        self.subnets.iter().filter(move |s| s.kind == kind)
    }

    pub fn subnets_in_tier<'a>(&'a self, tier: &'a str) -> impl Iterator<Item = &'a SubnetPlan> {
        self.subnets.iter().filter(move |s| s.tier == tier)
    }

    pub fn nat_for_zone(&self, az_index: usize) -> Option<&NatPlan> {
        self.nats.iter().find(|n| n.az_index == az_index)
    }

    pub fn az_count(&self) -> usize {
        self.zones.len()
    }

    /// Names of the tiers in declaration order.
    pub fn tier_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for subnet in &self.subnets {
            if !names.contains(&subnet.tier.as_str()) {
                names.push(subnet.tier.as_str());
            }
        }
        names
    }
}

/// Lay out `spec` over `zones`. Pure and deterministic.
///
/// Uses the first `spec.az_count` zones. Tiers are allocated in declaration
/// order and, within a tier, zone by zone.
pub fn plan_layout(spec: &NetworkSpec, zones: &[String]) -> NetworkResult<NetworkLayout> {
    let vpc = spec.validate()?;

    if zones.len() < spec.az_count {
        return Err(NetworkError::InsufficientZones {
            region: String::new(),
            requested: spec.az_count,
            eligible: zones.len(),
        });
    }
    let zones: Vec<String> = zones.iter().take(spec.az_count).cloned().collect();

    let mut allocator = match spec.first_address_block {
        Some(start) => CidrAllocator::starting_at(vpc, start)?,
        None => CidrAllocator::new(vpc),
    };

    let has_private = spec.tiers.iter().any(|t| t.kind == SubnetKind::Private);
    let nat_host_tier = spec.tiers.iter().find(|t| t.kind == SubnetKind::Public);

    let mut nats = Vec::new();
    if has_private {
        for (az_index, zone) in zones.iter().enumerate() {
            let host = nat_host_tier.ok_or(NetworkError::NoPublicSubnetForNat(az_index))?;
            nats.push(NatPlan {
                name: format!("HaNat{}", az_index),
                az_index,
                zone: zone.clone(),
                subnet: subnet_name(&host.name, az_index),
            });
        }
    }

    let mut subnets = Vec::with_capacity(spec.tiers.len() * zones.len());
    for tier in &spec.tiers {
        for (az_index, zone) in zones.iter().enumerate() {
            let cidr = allocator.allocate(tier.size).map_err(|e| match e {
                NetworkError::BlockOutOfRange { .. } => NetworkError::SubnetDoesNotFit {
                    tier: tier.name.clone(),
                    size: tier.size,
                    az_index,
                    network: vpc.to_string(),
                },
                other => other,
            })?;

            let name = subnet_name(&tier.name, az_index);
            let egress = match tier.kind {
                SubnetKind::Public => EgressRoute::InternetGateway,
                SubnetKind::Private => EgressRoute::Nat {
                    nat: format!("HaNat{}", az_index),
                },
                SubnetKind::Custom => EgressRoute::None,
            };

            debug!("Allocated {} for {} in {}", cidr, name, zone);

            subnets.push(SubnetPlan {
                route_table: format!("{}RouteTable", name),
                name,
                tier: tier.name.clone(),
                kind: tier.kind,
                az_index,
                zone: zone.clone(),
                cidr,
                egress,
            });
        }
    }

    info!(
        "Planned {} subnets across {} availability zones in {}",
        subnets.len(),
        zones.len(),
        vpc
    );

    Ok(NetworkLayout {
        vpc_cidr: vpc,
        zones,
        subnets,
        nats,
        nat_instance_type: spec.nat_instance_type.clone(),
    })
}

fn subnet_name(tier: &str, az_index: usize) -> String {
    format!("{}AZ{}", tier, az_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SubnetTier;

    fn zones(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("us-east-1{}", (b'a' + i as u8) as char)).collect()
    }

    #[test]
    fn test_custom_tier_has_no_route() {
        let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 1)
            .with_tier(SubnetTier::custom(24, "isolated"));
        let layout = plan_layout(&spec, &zones(1)).unwrap();

        assert_eq!(layout.subnets[0].egress, EgressRoute::None);
        assert!(layout.nats.is_empty());
    }

    #[test]
    fn test_private_without_public_fails() {
        let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 2)
            .with_tier(SubnetTier::private(24, "app"));
        assert!(matches!(
            plan_layout(&spec, &zones(2)),
            Err(NetworkError::NoPublicSubnetForNat(0))
        ));
    }

    #[test]
    fn test_uses_first_zones_only() {
        let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 2)
            .with_tier(SubnetTier::public(24, "web"));
        let layout = plan_layout(&spec, &zones(4)).unwrap();
        assert_eq!(layout.zones, vec!["us-east-1a", "us-east-1b"]);
    }

    #[test]
    fn test_tier_names_in_order() {
        let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 2)
            .with_tier(SubnetTier::public(24, "web"))
            .with_tier(SubnetTier::custom(24, "data"));
        let layout = plan_layout(&spec, &zones(2)).unwrap();
        assert_eq!(layout.tier_names(), vec!["web", "data"]);
    }
}
