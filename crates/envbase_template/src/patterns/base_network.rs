//! The base network: VPC, internet gateway, tiered subnets, routing, a
//! common security group and one HA NAT per availability zone.

use envbase_config::{ConfigHandler, ConfigSchema, ConfigTree, FieldType};
use envbase_network::{EgressRoute, NetworkLayout, SubnetKind, SubnetPlan};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::composer::{EC2_KEY_PARAMETER, REGION_MAP};
use crate::document::{Output, Parameter, Resource, Template};
use crate::error::TemplateResult;
use crate::intrinsic;
use crate::pattern::{CompositionContext, Pattern};
use crate::patterns::ha_nat::HaNat;

pub const BASE_NETWORK: &str = "BaseNetwork";
pub const NETWORK_ADDRESSES: &str = "networkAddresses";

const VPC: &str = "vpc";
const IGW: &str = "vpcIgw";
const IGW_ATTACHMENT: &str = "igwVpcAttachment";
const COMMON_SECURITY_GROUP: &str = "commonSecurityGroup";

#[derive(Debug, Clone, Default)]
pub struct BaseNetworkPattern {
    nat: HaNat,
}

impl BaseNetworkPattern {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigHandler for BaseNetworkPattern {
    fn factory_defaults(&self) -> ConfigTree {
        let mut tree = ConfigTree::new();
        tree.set("network", "network_cidr_base", json!("10.0.0.0"));
        tree.set("network", "network_cidr_size", json!(16));
        tree.set("network", "az_count", json!(3));
        tree.set(
            "network",
            "subnet_config",
            json!([
                { "type": "public", "size": 18, "name": "myPublic" },
                { "type": "private", "size": 22, "name": "myPrivate" }
            ]),
        );
        tree.merge(&self.nat.factory_defaults());
        tree
    }

    fn config_schema(&self) -> ConfigSchema {
        let mut schema = ConfigSchema::new()
            .field("network", "network_cidr_base", FieldType::Str)
            .field("network", "network_cidr_size", FieldType::Int)
            .field("network", "az_count", FieldType::Int)
            .field("network", "subnet_config", FieldType::List);
        schema.extend(&self.nat.config_schema());
        schema
    }
}

impl Pattern for BaseNetworkPattern {
    fn name(&self) -> &str {
        BASE_NETWORK
    }

    fn create(&self, ctx: &mut CompositionContext<'_>) -> TemplateResult<()> {
        let layout = ctx.layout;
        let env_name = ctx
            .config
            .get_non_empty("global", "environment_name")
            .unwrap_or("environmentbase")
            .to_string();

        let mut child = Template::new(BASE_NETWORK)
            .with_description("Base network: VPC, subnets, routing and HA NAT");
        let ec2_key = child.add_parameter(
            EC2_KEY_PARAMETER,
            Parameter::key_pair().with_description("Key pair for NAT instances"),
        )?;
        if ctx.ami_cache.regions().next().is_some() {
            child.add_mapping(REGION_MAP, ctx.ami_cache.to_mapping())?;
        }
        child.add_mapping(NETWORK_ADDRESSES, network_addresses(layout))?;

        let vpc = add_vpc(&mut child, &env_name)?;
        let igw = child.add_resource(IGW, Resource::new("AWS::EC2::InternetGateway"))?;
        child.add_resource(
            IGW_ATTACHMENT,
            Resource::new("AWS::EC2::VPCGatewayAttachment")
                .property("InternetGatewayId", igw.clone())
                .property("VpcId", vpc.clone()),
        )?;

        for subnet in &layout.subnets {
            add_subnet(&mut child, subnet, &vpc, &igw)?;
        }

        let common_sg = child.add_resource(
            COMMON_SECURITY_GROUP,
            Resource::new("AWS::EC2::SecurityGroup")
                .property("GroupDescription", "Common security group for all instances")
                .property("VpcId", vpc.clone())
                .property(
                    "SecurityGroupEgress",
                    json!([
                        { "IpProtocol": "tcp", "FromPort": "80", "ToPort": "80", "CidrIp": "0.0.0.0/0" },
                        { "IpProtocol": "tcp", "FromPort": "443", "ToPort": "443", "CidrIp": "0.0.0.0/0" },
                        { "IpProtocol": "udp", "FromPort": "123", "ToPort": "123", "CidrIp": "0.0.0.0/0" }
                    ]),
                )
                .property(
                    "SecurityGroupIngress",
                    json!([
                        { "IpProtocol": "tcp", "FromPort": "22", "ToPort": "22",
                          "CidrIp": layout.vpc_cidr.to_string() }
                    ]),
                ),
        )?;

        let nat = HaNat::from_config(ctx.config);
        for plan in &layout.nats {
            nat.add_to(&mut child, layout, plan, &vpc, &ec2_key)?;
        }

        add_outputs(&mut child, layout, vpc, igw, common_sg)?;

        info!(
            subnets = layout.subnets.len(),
            nats = layout.nats.len(),
            zones = ?layout.zones,
            "Base network built"
        );
        ctx.add_child_with_outputs(child);
        Ok(())
    }
}

/// `vpcBase -> cidr` plus `<tier> -> AZ<i> -> cidr`.
fn network_addresses(layout: &NetworkLayout) -> Value {
    let mut mapping = Map::new();
    mapping.insert(
        "vpcBase".to_string(),
        json!({ "cidr": layout.vpc_cidr.to_string() }),
    );
    for subnet in &layout.subnets {
        let tier = mapping
            .entry(subnet.tier.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(tier) = tier.as_object_mut() {
            tier.insert(
                format!("AZ{}", subnet.az_index),
                Value::String(subnet.cidr.to_string()),
            );
        }
    }
    Value::Object(mapping)
}

fn add_vpc(child: &mut Template, env_name: &str) -> TemplateResult<Value> {
    child.add_resource(
        VPC,
        Resource::new("AWS::EC2::VPC")
            .property("CidrBlock", intrinsic::find_in_map(NETWORK_ADDRESSES, "vpcBase", "cidr"))
            .property("EnableDnsSupport", true)
            .property("EnableDnsHostnames", true)
            .property("Tags", intrinsic::tags([("Name", json!(env_name))])),
    )
}

fn add_subnet(
    child: &mut Template,
    subnet: &SubnetPlan,
    vpc: &Value,
    igw: &Value,
) -> TemplateResult<()> {
    let mut resource = Resource::new("AWS::EC2::Subnet")
        .property("VpcId", vpc.clone())
        .property("AvailabilityZone", subnet.zone.clone())
        .property(
            "CidrBlock",
            intrinsic::find_in_map(
                NETWORK_ADDRESSES,
                subnet.tier.as_str(),
                format!("AZ{}", subnet.az_index),
            ),
        )
        .property(
            "Tags",
            intrinsic::tags([
                ("network", json!(subnet.kind.as_str())),
                ("Name", json!(subnet.name)),
            ]),
        );
    if subnet.kind == SubnetKind::Public {
        resource = resource.property("MapPublicIpOnLaunch", true);
    }
    let subnet_ref = child.add_resource(&subnet.name, resource)?;

    let mut table_tags = vec![
        ("network", json!(subnet.kind.as_str())),
        ("Name", json!(subnet.route_table)),
    ];
    if let EgressRoute::Nat { nat } = &subnet.egress {
        table_tags.push(("egress", json!(nat)));
    }
    let route_table = child.add_resource(
        &subnet.route_table,
        Resource::new("AWS::EC2::RouteTable")
            .property("VpcId", vpc.clone())
            .property("Tags", intrinsic::tags(table_tags)),
    )?;

    child.add_resource(
        &format!("{}EgressRouteTableAssociation", subnet.name),
        Resource::new("AWS::EC2::SubnetRouteTableAssociation")
            .property("SubnetId", subnet_ref)
            .property("RouteTableId", route_table.clone()),
    )?;

    // Private default routes are installed by the NAT instance at boot.
    if subnet.egress == EgressRoute::InternetGateway {
        child.add_resource(
            &format!("{}EgressRoute", subnet.name),
            Resource::new("AWS::EC2::Route")
                .property("DestinationCidrBlock", "0.0.0.0/0")
                .property("GatewayId", igw.clone())
                .property("RouteTableId", route_table)
                .depends_on(IGW_ATTACHMENT),
        )?;
    }
    Ok(())
}

fn add_outputs(
    child: &mut Template,
    layout: &NetworkLayout,
    vpc: Value,
    igw: Value,
    common_sg: Value,
) -> TemplateResult<()> {
    child.add_output("vpcId", Output::new(vpc))?;
    child.add_output("vpcCidr", Output::new(layout.vpc_cidr.to_string()))?;
    child.add_output("internetGateway", Output::new(igw))?;
    child.add_output(
        IGW_ATTACHMENT,
        Output::new(intrinsic::reference(IGW_ATTACHMENT)),
    )?;
    child.add_output(COMMON_SECURITY_GROUP, Output::new(common_sg))?;

    for subnet in &layout.subnets {
        child.add_output(&subnet.name, Output::new(intrinsic::reference(&subnet.name)))?;
    }
    for kind in [SubnetKind::Public, SubnetKind::Private] {
        for (index, subnet) in layout.subnets_of(kind).enumerate() {
            child.add_output(
                &format!("{}Subnet{}", kind.as_str(), index),
                Output::new(intrinsic::reference(&subnet.name)),
            )?;
        }
    }
    for (index, zone) in layout.zones.iter().enumerate() {
        child.add_output(&format!("availabilityZone{}", index), Output::new(zone.clone()))?;
    }
    Ok(())
}
