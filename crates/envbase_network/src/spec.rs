//! Network settings read from the `network` and `nat` sections.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use envbase_config::ConfigTree;
use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{NetworkError, NetworkResult};

/// Smallest subnet the provider accepts.
pub const MAX_SUBNET_PREFIX: u8 = 28;

/// Default NAT instance type used for zone eligibility.
pub const DEFAULT_NAT_INSTANCE_TYPE: &str = "t2.micro";

/// Routing behavior of a subnet tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetKind {
    Public,
    Private,
    Custom,
}

impl SubnetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for SubnetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One subnet tier. Each tier gets one subnet per availability zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetTier {
    #[serde(rename = "type")]
    pub kind: SubnetKind,
    /// Mask length of each subnet in the tier.
    #[serde(deserialize_with = "lenient_u8")]
    pub size: u8,
    pub name: String,
}

impl SubnetTier {
    pub fn new(kind: SubnetKind, size: u8, name: impl Into<String>) -> Self {
        Self {
            kind,
            size,
            name: name.into(),
        }
    }

    pub fn public(size: u8, name: impl Into<String>) -> Self {
        Self::new(SubnetKind::Public, size, name)
    }

    pub fn private(size: u8, name: impl Into<String>) -> Self {
        Self::new(SubnetKind::Private, size, name)
    }

    pub fn custom(size: u8, name: impl Into<String>) -> Self {
        Self::new(SubnetKind::Custom, size, name)
    }
}

/// Accept `18` as well as `"18"`.
fn lenient_u8<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u8),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Everything the generator needs to lay out a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub cidr_base: Ipv4Addr,
    pub cidr_size: u8,
    pub az_count: usize,
    pub tiers: Vec<SubnetTier>,
    /// Where allocation starts. Defaults to the network address.
    pub first_address_block: Option<Ipv4Addr>,
    /// Zones must offer this instance type to be eligible.
    pub nat_instance_type: String,
}

impl NetworkSpec {
    pub fn new(cidr_base: Ipv4Addr, cidr_size: u8, az_count: usize) -> Self {
        Self {
            cidr_base,
            cidr_size,
            az_count,
            tiers: Vec::new(),
            first_address_block: None,
            nat_instance_type: DEFAULT_NAT_INSTANCE_TYPE.to_string(),
        }
    }

    pub fn with_tier(mut self, tier: SubnetTier) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn with_first_address_block(mut self, address: Ipv4Addr) -> Self {
        self.first_address_block = Some(address);
        self
    }

    pub fn with_nat_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.nat_instance_type = instance_type.into();
        self
    }

    /// Read the `network` and `nat` sections.
    pub fn from_config(config: &ConfigTree) -> NetworkResult<Self> {
        let base = config
            .get_non_empty("network", "network_cidr_base")
            .ok_or_else(|| NetworkError::InvalidConfig("network.network_cidr_base is required".into()))?;
        let cidr_base: Ipv4Addr = base
            .trim()
            .parse()
            .map_err(|_| NetworkError::InvalidCidr(base.to_string()))?;

        let cidr_size = config
            .get_u64("network", "network_cidr_size")
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| NetworkError::InvalidConfig("network.network_cidr_size must be a mask length".into()))?;

        let az_count = config
            .get_u64("network", "az_count")
            .ok_or_else(|| NetworkError::InvalidConfig("network.az_count must be an integer".into()))?
            as usize;

        let tiers: Vec<SubnetTier> = match config.get("network", "subnet_config") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| NetworkError::InvalidConfig(format!("network.subnet_config: {}", e)))?,
            None => Vec::new(),
        };

        let first_address_block = match config.get_non_empty("network", "first_network_address_block") {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| NetworkError::InvalidCidr(raw.to_string()))?,
            ),
            None => None,
        };

        let nat_instance_type = config
            .get_non_empty("nat", "instance_type")
            .unwrap_or(DEFAULT_NAT_INSTANCE_TYPE)
            .to_string();

        Ok(Self {
            cidr_base,
            cidr_size,
            az_count,
            tiers,
            first_address_block,
            nat_instance_type,
        })
    }

    /// The VPC block.
    pub fn vpc_cidr(&self) -> NetworkResult<Ipv4Net> {
        let net = Ipv4Net::new(self.cidr_base, self.cidr_size)
            .map_err(|_| NetworkError::InvalidCidr(format!("{}/{}", self.cidr_base, self.cidr_size)))?;
        if net.network() != self.cidr_base {
            return Err(NetworkError::InvalidCidr(format!(
                "{}/{} has host bits set (network address is {})",
                self.cidr_base,
                self.cidr_size,
                net.network()
            )));
        }
        Ok(net)
    }

    /// Structural checks that do not depend on the zone list.
    pub fn validate(&self) -> NetworkResult<Ipv4Net> {
        let vpc = self.vpc_cidr()?;

        if self.az_count == 0 {
            return Err(NetworkError::InvalidAzCount);
        }
        if self.tiers.is_empty() {
            return Err(NetworkError::NoTiers);
        }

        let mut names = HashSet::new();
        for tier in &self.tiers {
            if tier.name.trim().is_empty() {
                return Err(NetworkError::InvalidTier {
                    tier: tier.name.clone(),
                    message: "name must not be empty".to_string(),
                });
            }
            if !names.insert(tier.name.as_str()) {
                return Err(NetworkError::InvalidTier {
                    tier: tier.name.clone(),
                    message: "duplicate tier name".to_string(),
                });
            }
            if tier.size < self.cidr_size {
                return Err(NetworkError::InvalidTier {
                    tier: tier.name.clone(),
                    message: format!("/{} is larger than the network {}", tier.size, vpc),
                });
            }
            if tier.size > MAX_SUBNET_PREFIX {
                return Err(NetworkError::InvalidTier {
                    tier: tier.name.clone(),
                    message: format!("/{} is smaller than the minimum /{}", tier.size, MAX_SUBNET_PREFIX),
                });
            }
        }

        if let Some(start) = self.first_address_block {
            if !vpc.contains(&start) {
                return Err(NetworkError::InvalidConfig(format!(
                    "first_network_address_block {} is outside {}",
                    start, vpc
                )));
            }
        }

        Ok(vpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(network: serde_json::Value) -> ConfigTree {
        ConfigTree::from_value(json!({ "network": network })).unwrap()
    }

    #[test]
    fn test_from_config_accepts_string_sizes() {
        let tree = config(json!({
            "network_cidr_base": "10.0.0.0",
            "network_cidr_size": "16",
            "az_count": 3,
            "subnet_config": [
                {"type": "public", "size": "18", "name": "myPublic"},
                {"type": "private", "size": 22, "name": "myPrivate"}
            ]
        }));

        let spec = NetworkSpec::from_config(&tree).unwrap();
        assert_eq!(spec.cidr_size, 16);
        assert_eq!(spec.tiers[0], SubnetTier::public(18, "myPublic"));
        assert_eq!(spec.tiers[1], SubnetTier::private(22, "myPrivate"));
        assert_eq!(spec.nat_instance_type, DEFAULT_NAT_INSTANCE_TYPE);
    }

    #[test]
    fn test_validate_rejects_host_bits() {
        let spec = NetworkSpec::new("10.0.1.0".parse().unwrap(), 16, 1)
            .with_tier(SubnetTier::public(24, "pub"));
        assert!(matches!(spec.validate(), Err(NetworkError::InvalidCidr(_))));
    }

    #[test]
    fn test_validate_rejects_tier_larger_than_vpc() {
        let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 1)
            .with_tier(SubnetTier::public(15, "pub"));
        assert!(matches!(spec.validate(), Err(NetworkError::InvalidTier { .. })));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 1)
            .with_tier(SubnetTier::public(24, "net"))
            .with_tier(SubnetTier::private(24, "net"));
        assert!(matches!(spec.validate(), Err(NetworkError::InvalidTier { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_zones() {
        let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 0)
            .with_tier(SubnetTier::public(24, "pub"));
        assert!(matches!(spec.validate(), Err(NetworkError::InvalidAzCount)));
    }
}
