//! Highly available NAT: one self-healing instance per availability zone.
//!
//! Each NAT runs in a single-instance auto scaling group. On boot the
//! instance runs the failover controller, which takes over the default route
//! of every private route table in its zone.

use envbase_config::{ConfigHandler, ConfigSchema, ConfigTree, FieldType};
use envbase_network::{NatPlan, NetworkLayout, SubnetKind, DEFAULT_NAT_INSTANCE_TYPE};
use serde_json::{json, Value};
use tracing::debug;

use crate::bootstrap::{UserData, DEFAULT_PREPEND};
use crate::composer::REGION_MAP;
use crate::document::{Resource, Template};
use crate::error::TemplateResult;
use crate::intrinsic;

pub const DEFAULT_CONTROLLER_COMMAND: &str = "envbase-ha-nat";

/// Permissions the failover controller needs.
pub const TAKEOVER_ACTIONS: &[&str] = &[
    "ec2:DescribeInstances",
    "ec2:DescribeSubnets",
    "ec2:DescribeRouteTables",
    "ec2:CreateRoute",
    "ec2:ReplaceRoute",
    "ec2:ModifyInstanceAttribute",
];

#[derive(Debug, Clone, PartialEq)]
pub struct HaNat {
    pub instance_type: String,
    pub enable_ntp: bool,
    pub controller_command: String,
}

impl Default for HaNat {
    fn default() -> Self {
        Self {
            instance_type: DEFAULT_NAT_INSTANCE_TYPE.to_string(),
            enable_ntp: false,
            controller_command: DEFAULT_CONTROLLER_COMMAND.to_string(),
        }
    }
}

impl ConfigHandler for HaNat {
    fn factory_defaults(&self) -> ConfigTree {
        let mut tree = ConfigTree::new();
        tree.set("nat", "instance_type", json!(DEFAULT_NAT_INSTANCE_TYPE));
        tree.set("nat", "enable_ntp", json!(false));
        tree.set("nat", "controller_command", json!(DEFAULT_CONTROLLER_COMMAND));
        tree
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .field("nat", "instance_type", FieldType::Str)
            .field("nat", "enable_ntp", FieldType::Bool)
            .field("nat", "controller_command", FieldType::Str)
    }
}

impl HaNat {
    pub fn from_config(config: &ConfigTree) -> Self {
        let defaults = Self::default();
        Self {
            instance_type: config
                .get_non_empty("nat", "instance_type")
                .map(str::to_string)
                .unwrap_or(defaults.instance_type),
            enable_ntp: config.get_bool("nat", "enable_ntp").unwrap_or(false),
            controller_command: config
                .get_non_empty("nat", "controller_command")
                .map(str::to_string)
                .unwrap_or(defaults.controller_command),
        }
    }

    fn user_data(&self) -> Value {
        let mut data = UserData::new(DEFAULT_PREPEND)
            .variable("AWS_DEFAULT_REGION", intrinsic::reference(intrinsic::AWS_REGION));
        if self.enable_ntp {
            data = data
                .line("yum install -y ntp")
                .line("chkconfig ntpd on")
                .line("service ntpd start");
        }
        data.line(format!(
            "{} --tag-key network --tag-value private",
            self.controller_command
        ))
        .build()
    }

    /// Add the resources for `nat` to `template`.
    pub fn add_to(
        &self,
        template: &mut Template,
        layout: &NetworkLayout,
        nat: &NatPlan,
        vpc: &Value,
        ec2_key: &Value,
    ) -> TemplateResult<()> {
        let name = &nat.name;

        let security_group = template.add_resource(
            &format!("{}SecurityGroup", name),
            Resource::new("AWS::EC2::SecurityGroup")
                .property("GroupDescription", format!("NAT security group for {}", nat.zone))
                .property("VpcId", vpc.clone())
                .property(
                    "SecurityGroupIngress",
                    json!([{ "IpProtocol": "-1", "FromPort": "-1", "ToPort": "-1",
                             "CidrIp": layout.vpc_cidr.to_string() }]),
                )
                .property(
                    "SecurityGroupEgress",
                    json!([{ "IpProtocol": "-1", "FromPort": "-1", "ToPort": "-1",
                             "CidrIp": "0.0.0.0/0" }]),
                ),
        )?;

        let role = template.add_resource(
            &format!("{}Role", name),
            Resource::new("AWS::IAM::Role")
                .property(
                    "AssumeRolePolicyDocument",
                    json!({
                        "Statement": [{
                            "Effect": "Allow",
                            "Principal": { "Service": ["ec2.amazonaws.com"] },
                            "Action": ["sts:AssumeRole"]
                        }]
                    }),
                )
                .property("Path", "/")
                .property(
                    "Policies",
                    json!([{
                        "PolicyName": "natTakeover",
                        "PolicyDocument": {
                            "Statement": [{
                                "Effect": "Allow",
                                "Action": TAKEOVER_ACTIONS,
                                "Resource": "*"
                            }]
                        }
                    }]),
                ),
        )?;

        let profile = template.add_resource(
            &format!("{}InstanceProfile", name),
            Resource::new("AWS::IAM::InstanceProfile")
                .property("Path", "/")
                .property("Roles", json!([role])),
        )?;

        let launch_config = template.add_resource(
            &format!("{}LaunchConfiguration", name),
            Resource::new("AWS::AutoScaling::LaunchConfiguration")
                .property(
                    "ImageId",
                    intrinsic::find_in_map(
                        REGION_MAP,
                        intrinsic::reference(intrinsic::AWS_REGION),
                        "natAmiId",
                    ),
                )
                .property("InstanceType", self.instance_type.clone())
                .property("KeyName", ec2_key.clone())
                .property("SecurityGroups", json!([security_group]))
                .property("IamInstanceProfile", profile)
                .property("AssociatePublicIpAddress", true)
                .property("UserData", self.user_data()),
        )?;

        let mut asg = Resource::new("AWS::AutoScaling::AutoScalingGroup")
            .property("AvailabilityZones", json!([nat.zone]))
            .property("VPCZoneIdentifier", json!([intrinsic::reference(&nat.subnet)]))
            .property("LaunchConfigurationName", launch_config)
            .property("MinSize", "1")
            .property("MaxSize", "1")
            .property("DesiredCapacity", "1")
            .property(
                "Tags",
                json!([{ "Key": "Name", "Value": name, "PropagateAtLaunch": true }]),
            );
        for subnet in layout
            .subnets_of(SubnetKind::Private)
            .filter(|s| s.az_index == nat.az_index)
        {
            asg = asg.depends_on(format!("{}EgressRouteTableAssociation", subnet.name));
        }
        template.add_resource(&format!("{}AutoScalingGroup", name), asg)?;

        debug!(nat = %name, zone = %nat.zone, "Added HA NAT");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_falls_back_to_defaults() {
        let config = ConfigTree::new();
        assert_eq!(HaNat::from_config(&config), HaNat::default());

        let mut config = ConfigTree::new();
        config.set("nat", "instance_type", json!("m5.large"));
        config.set("nat", "enable_ntp", json!(true));
        let nat = HaNat::from_config(&config);
        assert_eq!(nat.instance_type, "m5.large");
        assert!(nat.enable_ntp);
    }

    #[test]
    fn test_user_data_runs_controller() {
        let nat = HaNat::default();
        let data = nat.user_data();
        let lines = data["Fn::Base64"]["Fn::Join"][1].as_array().unwrap();
        assert_eq!(
            lines.last().unwrap(),
            &json!("envbase-ha-nat --tag-key network --tag-value private")
        );
    }
}
