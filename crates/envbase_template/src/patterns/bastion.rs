//! SSH bastion behind a load balancer in the public subnets.

use envbase_config::{ConfigHandler, ConfigSchema, ConfigTree, FieldType};
use envbase_network::SubnetKind;
use serde_json::{json, Value};
use tracing::info;

use crate::composer::{EC2_KEY_PARAMETER, REGION_MAP};
use crate::document::{Output, Parameter, Template};
use crate::error::{TemplateError, TemplateResult};
use crate::intrinsic;
use crate::pattern::{CompositionContext, Pattern};
use crate::patterns::base_network::BASE_NETWORK;
use crate::patterns::cluster::{self, Listener};

pub const BASTION: &str = "Bastion";
const SSH_PORT: u64 = 22;

#[derive(Debug, Clone, PartialEq)]
pub struct BastionSettings {
    pub instance_type: String,
    pub remote_access_cidr: String,
    pub ingress_port: u64,
}

impl BastionSettings {
    pub fn from_config(config: &ConfigTree) -> Self {
        Self {
            instance_type: config
                .get_non_empty("bastion", "default_instance_type")
                .unwrap_or("t2.micro")
                .to_string(),
            remote_access_cidr: config
                .get_non_empty("bastion", "remote_access_cidr")
                .unwrap_or("0.0.0.0/0")
                .to_string(),
            ingress_port: config.get_u64("bastion", "ingress_port").unwrap_or(2222),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BastionPattern;

impl BastionPattern {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigHandler for BastionPattern {
    fn factory_defaults(&self) -> ConfigTree {
        let mut tree = ConfigTree::new();
        tree.set("bastion", "default_instance_type", json!("t2.micro"));
        tree.set("bastion", "remote_access_cidr", json!("0.0.0.0/0"));
        tree.set("bastion", "ingress_port", json!(2222));
        tree
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .field("bastion", "default_instance_type", FieldType::Str)
            .field("bastion", "remote_access_cidr", FieldType::Str)
            .field("bastion", "ingress_port", FieldType::Int)
    }
}

impl Pattern for BastionPattern {
    fn name(&self) -> &str {
        BASTION
    }

    fn requires(&self) -> Vec<String> {
        vec![BASE_NETWORK.to_string()]
    }

    fn create(&self, ctx: &mut CompositionContext<'_>) -> TemplateResult<()> {
        let settings = BastionSettings::from_config(ctx.config);
        let layout = ctx.layout;

        // One public subnet per zone: the first public tier.
        let public_count = layout
            .subnets_of(SubnetKind::Public)
            .count()
            .min(layout.az_count());
        if public_count == 0 {
            return Err(TemplateError::PatternFailed {
                pattern: BASTION.to_string(),
                message: "the network has no public subnets".to_string(),
            });
        }

        let mut child = Template::new(BASTION).with_description("Bastion host");
        let vpc = child.add_parameter("vpcId", Parameter::of_type("AWS::EC2::VPC::Id"))?;
        child.add_parameter("vpcCidr", Parameter::string())?;
        let common_sg = child.add_parameter(
            "commonSecurityGroup",
            Parameter::of_type("AWS::EC2::SecurityGroup::Id"),
        )?;
        let ec2_key = child.add_parameter(EC2_KEY_PARAMETER, Parameter::key_pair())?;
        let mut subnets = Vec::new();
        for index in 0..public_count {
            subnets.push(child.add_parameter(
                &format!("publicSubnet{}", index),
                Parameter::of_type("AWS::EC2::Subnet::Id"),
            )?);
        }
        if ctx.ami_cache.regions().next().is_some() {
            child.add_mapping(REGION_MAP, ctx.ami_cache.to_mapping())?;
        }

        let remote_access = Value::String(settings.remote_access_cidr.clone());
        let elb_sg = child.add_resource(
            "BastionElbSecurityGroup",
            cluster::security_group(
                "Security group for Bastion ELB",
                &vpc,
                Some(&remote_access),
                &[settings.ingress_port],
            ),
        )?;
        let bastion_sg = child.add_resource(
            "BastionSecurityGroup",
            cluster::security_group("Security group for Bastion", &vpc, None, &[]),
        )?;
        cluster::add_reciprocal_rule(
            &mut child,
            "BastionElbEgressToBastion",
            "BastionIngressFromElb",
            &elb_sg,
            &bastion_sg,
            SSH_PORT,
        )?;

        let elb = child.add_resource(
            "BastionElb",
            cluster::load_balancer(
                &subnets,
                &elb_sg,
                &[Listener::new(settings.ingress_port, SSH_PORT, "TCP")],
                false,
            ),
        )?;
        let launch_config = child.add_resource(
            "BastionLaunchConfiguration",
            cluster::launch_configuration(
                "amazonLinuxAmiId",
                &settings.instance_type,
                &ec2_key,
                vec![bastion_sg.clone(), common_sg],
                true,
            ),
        )?;
        child.add_resource(
            "BastionAutoScalingGroup",
            cluster::auto_scaling_group(
                BASTION,
                &layout.zones[..public_count],
                &subnets,
                &launch_config,
                &elb,
                1,
                1,
            ),
        )?;

        child.add_output(
            "BastionELBDNSName",
            Output::new(intrinsic::get_att("BastionElb", "DNSName")),
        )?;
        child.add_output(
            "BastionELBDNSZoneId",
            Output::new(intrinsic::get_att("BastionElb", "CanonicalHostedZoneNameID")),
        )?;
        child.add_output("BastionSecurityGroupId", Output::new(bastion_sg))?;

        info!(
            instance_type = %settings.instance_type,
            ingress_port = settings.ingress_port,
            "Bastion built"
        );
        ctx.add_child(child);
        Ok(())
    }
}
