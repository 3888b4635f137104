//! Building blocks shared by load-balanced instance groups.

use serde_json::{json, Value};

use crate::composer::REGION_MAP;
use crate::document::{Parameter, Resource, Template};
use crate::error::TemplateResult;
use crate::intrinsic;

pub const HOSTED_ZONE_PARAMETER: &str = "environmentHostedZone";
pub const DEFAULT_HOSTED_ZONE: &str = "devopsdemo.com";
const DNS_TTL: &str = "300";

/// One classic ELB listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub elb_port: u64,
    pub instance_port: u64,
    pub protocol: &'static str,
}

impl Listener {
    pub fn new(elb_port: u64, instance_port: u64, protocol: &'static str) -> Self {
        Self {
            elb_port,
            instance_port,
            protocol,
        }
    }

    fn to_value(self) -> Value {
        json!({
            "LoadBalancerPort": self.elb_port.to_string(),
            "InstancePort": self.instance_port.to_string(),
            "Protocol": self.protocol
        })
    }
}

/// Security group inside `vpc`, optionally opening `ports` to `cidr`.
pub fn security_group(
    description: &str,
    vpc: &Value,
    cidr: Option<&Value>,
    ports: &[u64],
) -> Resource {
    let mut group = Resource::new("AWS::EC2::SecurityGroup")
        .property("GroupDescription", description)
        .property("VpcId", vpc.clone());
    if let Some(cidr) = cidr {
        let ingress: Vec<Value> = ports
            .iter()
            .map(|port| {
                json!({
                    "IpProtocol": "tcp",
                    "FromPort": port.to_string(),
                    "ToPort": port.to_string(),
                    "CidrIp": cidr
                })
            })
            .collect();
        group = group.property("SecurityGroupIngress", Value::Array(ingress));
    }
    group
}

/// Egress from `source` and matching ingress on `dest` for one TCP port.
pub fn add_reciprocal_rule(
    child: &mut Template,
    egress_name: &str,
    ingress_name: &str,
    source: &Value,
    dest: &Value,
    port: u64,
) -> TemplateResult<()> {
    child.add_resource(
        egress_name,
        Resource::new("AWS::EC2::SecurityGroupEgress")
            .property("GroupId", source.clone())
            .property("IpProtocol", "tcp")
            .property("FromPort", port.to_string())
            .property("ToPort", port.to_string())
            .property("DestinationSecurityGroupId", dest.clone()),
    )?;
    child.add_resource(
        ingress_name,
        Resource::new("AWS::EC2::SecurityGroupIngress")
            .property("GroupId", dest.clone())
            .property("IpProtocol", "tcp")
            .property("FromPort", port.to_string())
            .property("ToPort", port.to_string())
            .property("SourceSecurityGroupId", source.clone()),
    )?;
    Ok(())
}

/// Cross-zone classic ELB health checked on the first listener's instance port.
pub fn load_balancer(
    subnets: &[Value],
    security_group: &Value,
    listeners: &[Listener],
    internal: bool,
) -> Resource {
    let health_port = listeners.first().map(|l| l.instance_port).unwrap_or(80);
    let mut elb = Resource::new("AWS::ElasticLoadBalancing::LoadBalancer")
        .property("Subnets", Value::Array(subnets.to_vec()))
        .property("SecurityGroups", json!([security_group]))
        .property("CrossZone", true)
        .property(
            "Listeners",
            Value::Array(listeners.iter().map(|l| l.to_value()).collect()),
        )
        .property(
            "HealthCheck",
            json!({
                "Target": format!("TCP:{}", health_port),
                "HealthyThreshold": "3",
                "UnhealthyThreshold": "5",
                "Interval": "30",
                "Timeout": "5"
            }),
        );
    if internal {
        elb = elb.property("Scheme", "internal");
    }
    elb
}

/// Launch configuration resolving its image through the region map.
pub fn launch_configuration(
    ami_name: &str,
    instance_type: &str,
    key_name: &Value,
    security_groups: Vec<Value>,
    public_ip: bool,
) -> Resource {
    Resource::new("AWS::AutoScaling::LaunchConfiguration")
        .property(
            "ImageId",
            intrinsic::find_in_map(
                REGION_MAP,
                intrinsic::reference(intrinsic::AWS_REGION),
                ami_name,
            ),
        )
        .property("InstanceType", instance_type)
        .property("KeyName", key_name.clone())
        .property("SecurityGroups", Value::Array(security_groups))
        .property("AssociatePublicIpAddress", public_ip)
}

/// Auto scaling group registered with `elb`, tagging instances with `name`.
pub fn auto_scaling_group(
    name: &str,
    zones: &[String],
    subnets: &[Value],
    launch_config: &Value,
    elb: &Value,
    min_size: u64,
    max_size: u64,
) -> Resource {
    let zones: Vec<Value> = zones.iter().map(|z| Value::String(z.clone())).collect();
    Resource::new("AWS::AutoScaling::AutoScalingGroup")
        .property("AvailabilityZones", Value::Array(zones))
        .property("VPCZoneIdentifier", Value::Array(subnets.to_vec()))
        .property("LaunchConfigurationName", launch_config.clone())
        .property("LoadBalancerNames", json!([elb]))
        .property("MinSize", min_size.to_string())
        .property("MaxSize", max_size.to_string())
        .property("DesiredCapacity", min_size.to_string())
        .property(
            "Tags",
            json!([{ "Key": "Name", "Value": name, "PropagateAtLaunch": true }]),
        )
}

/// CNAME `<host>.<zone>` for the ELB `elb_name`.
///
/// Adds the `environmentHostedZone` and `<tier>HostName` parameters and a
/// `<tier>DnsRecord` resource.
pub fn register_elb_to_dns(
    child: &mut Template,
    elb_name: &str,
    tier: &str,
    hosted_zone: Option<&str>,
) -> TemplateResult<()> {
    let zone = child.add_parameter(
        HOSTED_ZONE_PARAMETER,
        Parameter::string()
            .with_description("Route53 hosted zone the environment registers names in")
            .with_default(hosted_zone.unwrap_or(DEFAULT_HOSTED_ZONE)),
    )?;
    let host = child.add_parameter(
        &format!("{}HostName", tier),
        Parameter::string()
            .with_description(format!("Host name registered for the {} ELB", tier))
            .with_default(tier.to_lowercase()),
    )?;
    child.add_resource(
        &format!("{}DnsRecord", tier),
        Resource::new("AWS::Route53::RecordSet")
            .property(
                "HostedZoneName",
                intrinsic::join("", vec![zone.clone(), json!(".")]),
            )
            .property(
                "Name",
                intrinsic::join("", vec![host, json!("."), zone]),
            )
            .property("Type", "CNAME")
            .property("TTL", DNS_TTL)
            .property(
                "ResourceRecords",
                json!([intrinsic::get_att(elb_name, "DNSName")]),
            ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reciprocal_rule_points_both_ways() {
        let mut child = Template::new("Web");
        let elb = intrinsic::reference("ElbSg");
        let web = intrinsic::reference("WebSg");
        add_reciprocal_rule(&mut child, "ElbEgress", "WebIngress", &elb, &web, 8080).unwrap();

        let egress = &child.resource("ElbEgress").unwrap().properties;
        assert_eq!(egress["GroupId"], elb);
        assert_eq!(egress["DestinationSecurityGroupId"], web);
        let ingress = &child.resource("WebIngress").unwrap().properties;
        assert_eq!(ingress["GroupId"], web);
        assert_eq!(ingress["FromPort"], "8080");
    }

    #[test]
    fn test_internal_load_balancer_sets_scheme() {
        let sg = intrinsic::reference("Sg");
        let listeners = [Listener::new(443, 8443, "TCP")];
        let internal = load_balancer(&[], &sg, &listeners, true).properties;
        let public = load_balancer(&[], &sg, &listeners, false).properties;

        assert_eq!(internal["Scheme"], "internal");
        assert_eq!(internal["HealthCheck"]["Target"], "TCP:8443");
        assert!(!public.contains_key("Scheme"));
    }

    #[test]
    fn test_dns_record_defaults_host_to_tier() {
        let mut child = Template::new("Web");
        register_elb_to_dns(&mut child, "WebElb", "Web", None).unwrap();

        let host = child.parameter("WebHostName").unwrap();
        assert_eq!(host.default, Some(json!("web")));
        let zone = child.parameter(HOSTED_ZONE_PARAMETER).unwrap();
        assert_eq!(zone.default, Some(json!(DEFAULT_HOSTED_ZONE)));
        let record = &child.resource("WebDnsRecord").unwrap().properties;
        assert_eq!(record["Type"], "CNAME");
        assert_eq!(
            record["ResourceRecords"][0],
            intrinsic::get_att("WebElb", "DNSName")
        );
    }
}
