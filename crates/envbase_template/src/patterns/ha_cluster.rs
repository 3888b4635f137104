//! Auto-scaled instance group behind a classic load balancer.
//!
//! Instances run in one subnet layer of the base network. An internet-facing
//! balancer sits in the public subnets and accepts traffic from anywhere; an
//! internal one shares the instances' layer and only accepts traffic from
//! inside the VPC.

use std::collections::BTreeMap;

use envbase_config::{ConfigHandler, ConfigSchema, ConfigTree, FieldType};
use envbase_network::SubnetKind;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::bootstrap::{UserData, DEFAULT_PREPEND};
use crate::composer::{EC2_KEY_PARAMETER, REGION_MAP};
use crate::document::{Output, Parameter, Template};
use crate::error::{TemplateError, TemplateResult};
use crate::intrinsic;
use crate::pattern::{CompositionContext, Pattern};
use crate::patterns::base_network::BASE_NETWORK;
use crate::patterns::cluster::{self, Listener};

pub const HA_CLUSTER: &str = "HaCluster";
pub const HA_CLUSTER_SECTION: &str = "ha_cluster";
const ANYWHERE: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetLayer {
    Public,
    Private,
}

impl SubnetLayer {
    fn kind(self) -> SubnetKind {
        match self {
            Self::Public => SubnetKind::Public,
            Self::Private => SubnetKind::Private,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElbScheme {
    InternetFacing,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HaClusterSettings {
    /// Key of the image in the region map.
    pub ami_name: String,
    /// Balancer port to instance port. Keys are strings in the config file.
    pub elb_ports: BTreeMap<String, u64>,
    pub instance_type: String,
    pub min_size: u64,
    pub max_size: u64,
    pub subnet_layer: SubnetLayer,
    pub elb_scheme: ElbScheme,
    /// Script appended to the instances' user data.
    pub user_data: String,
    /// Exported as `NAME=value` lines ahead of the script.
    pub env_vars: BTreeMap<String, String>,
    /// Add a CNAME for the balancer in `hosted_zone`.
    pub register_dns: bool,
    pub hosted_zone: Option<String>,
}

impl Default for HaClusterSettings {
    fn default() -> Self {
        Self {
            ami_name: "amazonLinuxAmiId".to_string(),
            elb_ports: BTreeMap::from([("80".to_string(), 80)]),
            instance_type: "t2.micro".to_string(),
            min_size: 1,
            max_size: 1,
            subnet_layer: SubnetLayer::Private,
            elb_scheme: ElbScheme::InternetFacing,
            user_data: String::new(),
            env_vars: BTreeMap::new(),
            register_dns: false,
            hosted_zone: None,
        }
    }
}

impl HaClusterSettings {
    /// Read `section`, falling back to defaults when it is absent.
    pub fn from_config(config: &ConfigTree, section: &str) -> TemplateResult<Self> {
        if !config.has_section(section) {
            return Ok(Self::default());
        }
        Ok(config.section_as(section)?)
    }

    /// Listeners in balancer port order.
    pub fn listeners(&self) -> Result<Vec<Listener>, String> {
        if self.elb_ports.is_empty() {
            return Err("elb_ports is empty".to_string());
        }
        self.elb_ports
            .iter()
            .map(|(elb_port, instance_port)| {
                let elb_port: u64 = elb_port
                    .parse()
                    .map_err(|_| format!("invalid balancer port '{}'", elb_port))?;
                for port in [elb_port, *instance_port] {
                    if port == 0 || port > u64::from(u16::MAX) {
                        return Err(format!("port {} out of range", port));
                    }
                }
                Ok(Listener::new(elb_port, *instance_port, "TCP"))
            })
            .collect()
    }

    fn user_data(&self) -> Option<Value> {
        if self.user_data.is_empty() && self.env_vars.is_empty() {
            return None;
        }
        let mut data = UserData::new(DEFAULT_PREPEND);
        for (name, value) in &self.env_vars {
            data = data.variable(name, value.as_str());
        }
        Some(data.script(&self.user_data).build())
    }
}

/// A named cluster reading its settings from one config section.
#[derive(Debug, Clone)]
pub struct HaClusterPattern {
    name: String,
    section: String,
}

impl Default for HaClusterPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl HaClusterPattern {
    pub fn new() -> Self {
        Self::named(HA_CLUSTER, HA_CLUSTER_SECTION)
    }

    /// Cluster `name` configured from `section`, so one environment can hold several.
    pub fn named(name: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            section: section.into(),
        }
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    fn failed(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::PatternFailed {
            pattern: self.name.clone(),
            message: message.into(),
        }
    }
}

impl ConfigHandler for HaClusterPattern {
    fn factory_defaults(&self) -> ConfigTree {
        let defaults = HaClusterSettings::default();
        let mut tree = ConfigTree::new();
        let section = self.section.as_str();
        tree.set(section, "ami_name", json!(defaults.ami_name));
        tree.set(section, "elb_ports", json!(defaults.elb_ports));
        tree.set(section, "instance_type", json!(defaults.instance_type));
        tree.set(section, "min_size", json!(defaults.min_size));
        tree.set(section, "max_size", json!(defaults.max_size));
        tree.set(section, "subnet_layer", json!("private"));
        tree.set(section, "elb_scheme", json!("internet-facing"));
        tree.set(section, "user_data", json!(""));
        tree.set(section, "env_vars", json!({}));
        tree.set(section, "register_dns", json!(false));
        tree
    }

    fn config_schema(&self) -> ConfigSchema {
        let section = self.section.as_str();
        ConfigSchema::new()
            .field(section, "ami_name", FieldType::Str)
            .field(section, "elb_ports", FieldType::Map)
            .field(section, "instance_type", FieldType::Str)
            .field(section, "min_size", FieldType::Int)
            .field(section, "max_size", FieldType::Int)
            .field(section, "subnet_layer", FieldType::Str)
            .field(section, "elb_scheme", FieldType::Str)
            .field(section, "user_data", FieldType::Str)
            .field(section, "env_vars", FieldType::Map)
            .field(section, "register_dns", FieldType::Bool)
    }
}

impl Pattern for HaClusterPattern {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<String> {
        vec![BASE_NETWORK.to_string()]
    }

    fn create(&self, ctx: &mut CompositionContext<'_>) -> TemplateResult<()> {
        let settings = HaClusterSettings::from_config(ctx.config, &self.section)?;
        let listeners = settings.listeners().map_err(|m| self.failed(m))?;
        if settings.min_size > settings.max_size {
            return Err(self.failed(format!(
                "min_size {} exceeds max_size {}",
                settings.min_size, settings.max_size
            )));
        }
        let has_ami = ctx
            .ami_cache
            .regions()
            .any(|region| ctx.ami_cache.image(region, &settings.ami_name).is_some());
        if !has_ami {
            return Err(self.failed(format!("no image named '{}'", settings.ami_name)));
        }

        let layout = ctx.layout;
        let internet_facing = settings.elb_scheme == ElbScheme::InternetFacing;
        let instance_kind = settings.subnet_layer.kind();
        let elb_kind = if internet_facing {
            SubnetKind::Public
        } else {
            instance_kind
        };
        let count_of = |kind: SubnetKind| layout.subnets_of(kind).count().min(layout.az_count());
        let zone_count = count_of(instance_kind).min(count_of(elb_kind));
        if zone_count == 0 {
            return Err(self.failed(format!(
                "the network has no {} subnets",
                if count_of(instance_kind) == 0 {
                    instance_kind.as_str()
                } else {
                    elb_kind.as_str()
                }
            )));
        }

        let name = self.name.as_str();
        let mut child = Template::new(name).with_description(format!("{} cluster", name));
        let vpc = child.add_parameter("vpcId", Parameter::of_type("AWS::EC2::VPC::Id"))?;
        let vpc_cidr = child.add_parameter("vpcCidr", Parameter::string())?;
        let common_sg = child.add_parameter(
            "commonSecurityGroup",
            Parameter::of_type("AWS::EC2::SecurityGroup::Id"),
        )?;
        let ec2_key = child.add_parameter(EC2_KEY_PARAMETER, Parameter::key_pair())?;
        let instance_subnets = subnet_parameters(&mut child, instance_kind, zone_count)?;
        let elb_subnets = if elb_kind == instance_kind {
            instance_subnets.clone()
        } else {
            subnet_parameters(&mut child, elb_kind, zone_count)?
        };
        child.add_mapping(REGION_MAP, ctx.ami_cache.to_mapping())?;

        let elb_ports: Vec<u64> = listeners.iter().map(|l| l.elb_port).collect();
        let source = if internet_facing {
            Value::String(ANYWHERE.to_string())
        } else {
            vpc_cidr
        };
        let elb_sg_name = format!("{}ElbSecurityGroup", name);
        let elb_sg = child.add_resource(
            &elb_sg_name,
            cluster::security_group(
                &format!("Security group for {} ELB", name),
                &vpc,
                Some(&source),
                &elb_ports,
            ),
        )?;
        let cluster_sg_name = format!("{}SecurityGroup", name);
        let cluster_sg = child.add_resource(
            &cluster_sg_name,
            cluster::security_group(&format!("Security group for {}", name), &vpc, None, &[]),
        )?;
        let mut instance_ports: Vec<u64> = listeners.iter().map(|l| l.instance_port).collect();
        instance_ports.sort_unstable();
        instance_ports.dedup();
        for port in &instance_ports {
            cluster::add_reciprocal_rule(
                &mut child,
                &format!("{}ElbEgressTo{}{}", name, name, port),
                &format!("{}IngressFromElb{}", name, port),
                &elb_sg,
                &cluster_sg,
                *port,
            )?;
        }

        let elb_name = format!("{}Elb", name);
        let elb = child.add_resource(
            &elb_name,
            cluster::load_balancer(&elb_subnets, &elb_sg, &listeners, !internet_facing),
        )?;

        let mut launch = cluster::launch_configuration(
            &settings.ami_name,
            &settings.instance_type,
            &ec2_key,
            vec![cluster_sg.clone(), common_sg],
            settings.subnet_layer == SubnetLayer::Public,
        );
        if let Some(user_data) = settings.user_data() {
            launch = launch.property("UserData", user_data);
        }
        let launch_config = child.add_resource(&format!("{}LaunchConfiguration", name), launch)?;

        child.add_resource(
            &format!("{}AutoScalingGroup", name),
            cluster::auto_scaling_group(
                name,
                &layout.zones[..zone_count],
                &instance_subnets,
                &launch_config,
                &elb,
                settings.min_size,
                settings.max_size,
            ),
        )?;

        if settings.register_dns {
            debug!(cluster = name, "Registering balancer in DNS");
            cluster::register_elb_to_dns(
                &mut child,
                &elb_name,
                name,
                settings.hosted_zone.as_deref(),
            )?;
        }

        child.add_output(
            &format!("{}ELBDNSName", name),
            Output::new(intrinsic::get_att(&elb_name, "DNSName")),
        )?;
        child.add_output(&format!("{}SecurityGroupId", name), Output::new(cluster_sg))?;
        child.add_output(&format!("{}ElbSecurityGroupId", name), Output::new(elb_sg))?;

        info!(
            cluster = name,
            instance_type = %settings.instance_type,
            min_size = settings.min_size,
            max_size = settings.max_size,
            internet_facing,
            "Cluster built"
        );
        ctx.add_child(child);
        Ok(())
    }
}

/// `<kind>Subnet<i>` parameters, linked to the base network's outputs by name.
fn subnet_parameters(
    child: &mut Template,
    kind: SubnetKind,
    count: usize,
) -> TemplateResult<Vec<Value>> {
    (0..count)
        .map(|index| {
            child.add_parameter(
                &format!("{}Subnet{}", kind.as_str(), index),
                Parameter::of_type("AWS::EC2::Subnet::Id"),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_without_section() {
        let settings = HaClusterSettings::from_config(&ConfigTree::new(), "web").unwrap();
        assert_eq!(settings, HaClusterSettings::default());
    }

    #[test]
    fn test_settings_read_from_named_section() {
        let config = ConfigTree::from_json_str(
            r#"{"web": {
                "elb_ports": {"443": 8443},
                "min_size": 2,
                "max_size": 4,
                "subnet_layer": "public",
                "elb_scheme": "internal"
            }}"#,
        )
        .unwrap();
        let settings = HaClusterSettings::from_config(&config, "web").unwrap();

        assert_eq!(settings.subnet_layer, SubnetLayer::Public);
        assert_eq!(settings.elb_scheme, ElbScheme::Internal);
        assert_eq!(settings.instance_type, "t2.micro");
        assert_eq!(
            settings.listeners().unwrap(),
            vec![Listener::new(443, 8443, "TCP")]
        );
    }

    #[test]
    fn test_listeners_reject_bad_ports() {
        let mut settings = HaClusterSettings::default();
        settings.elb_ports = BTreeMap::from([("http".to_string(), 80)]);
        assert!(settings.listeners().is_err());

        settings.elb_ports = BTreeMap::from([("80".to_string(), 70000)]);
        assert!(settings.listeners().is_err());

        settings.elb_ports.clear();
        assert!(settings.listeners().is_err());
    }

    #[test]
    fn test_user_data_exports_variables_before_script() {
        let mut settings = HaClusterSettings::default();
        assert!(settings.user_data().is_none());

        settings.env_vars = BTreeMap::from([("ROLE".to_string(), "web".to_string())]);
        settings.user_data = "yum install -y nginx\n#~ hidden\n".to_string();
        let built = settings.user_data().unwrap();

        assert_eq!(
            built,
            intrinsic::base64(intrinsic::join(
                "\n",
                vec![
                    json!(DEFAULT_PREPEND),
                    json!("ROLE=web"),
                    json!("yum install -y nginx")
                ]
            ))
        );
    }

    #[test]
    fn test_factory_defaults_deserialize_to_default_settings() {
        let pattern = HaClusterPattern::named("Web", "web");
        let settings =
            HaClusterSettings::from_config(&pattern.factory_defaults(), pattern.section()).unwrap();
        assert_eq!(settings, HaClusterSettings::default());
    }
}
