//! Integration tests for template composition and publishing.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use envbase_config::{AmiCache, Binding, ConfigHandler, ConfigTree, ParameterBindings};
use envbase_network::{plan_layout, NetworkLayout, NetworkSpec, SubnetTier};
use envbase_provider::MockProvider;
use envbase_template::patterns::{self, BaseNetworkPattern, BastionPattern, HaClusterPattern};
use envbase_template::{
    validate_template_contents, ComposedTemplates, ComposerSettings, CompositionContext, Output,
    Parameter, Pattern, PublishSettings, Template, TemplateComposer, TemplateError,
    TemplatePublisher, TemplateResult,
};
use serde_json::{json, Value};

const TIMESTAMP: i64 = 1_700_000_000;

fn config() -> ConfigTree {
    let mut tree = ConfigTree::from_json_str(
        r#"{
            "global": {"environment_name": "demo", "output": "demo.template"},
            "template": {
                "description": "demo environment",
                "ec2_key_default": "ops-key",
                "s3_bucket": "demo-bucket",
                "s3_prefix": "templates",
                "upload_templates": true,
                "include_timestamp": true,
                "timeout_in_minutes": 30
            }
        }"#,
    )
    .unwrap();
    tree.merge(&BaseNetworkPattern::new().factory_defaults());
    tree.merge(&BastionPattern::new().factory_defaults());
    tree
}

fn layout() -> NetworkLayout {
    let spec = NetworkSpec::new("10.0.0.0".parse().unwrap(), 16, 3)
        .with_tier(SubnetTier::public(18, "myPublic"))
        .with_tier(SubnetTier::private(22, "myPrivate"));
    let zones: Vec<String> = ["us-east-1a", "us-east-1b", "us-east-1c"]
        .iter()
        .map(|z| z.to_string())
        .collect();
    plan_layout(&spec, &zones).unwrap()
}

fn composer(config: &ConfigTree) -> TemplateComposer {
    TemplateComposer::new(ComposerSettings::from_config(config).unwrap())
        .with_generated_at(Utc.timestamp_opt(TIMESTAMP, 0).unwrap())
}

fn compose_with(
    patterns: &[Arc<dyn Pattern>],
    bindings: &ParameterBindings,
) -> TemplateResult<ComposedTemplates> {
    let config = config();
    composer(&config).compose(
        &config,
        &layout(),
        &AmiCache::builtin().unwrap(),
        patterns,
        bindings,
    )
}

fn stack_params(composed: &ComposedTemplates, stack: &str) -> Value {
    composed.parent.resource(stack).unwrap().properties["Parameters"].clone()
}

/// Registers a child with the given parameter names.
struct SamplePattern {
    parameters: Vec<&'static str>,
}

impl ConfigHandler for SamplePattern {}

impl Pattern for SamplePattern {
    fn name(&self) -> &str {
        "Sample"
    }

    fn create(&self, ctx: &mut CompositionContext<'_>) -> TemplateResult<()> {
        let mut child = Template::new("Sample");
        for name in &self.parameters {
            child.add_parameter(name, Parameter::string().with_default("x"))?;
        }
        child.add_output("sampleOutput", Output::new("done"))?;
        ctx.add_child(child);
        Ok(())
    }
}

#[test]
fn test_parent_carries_common_parameters_and_region_map() {
    let composed = compose_with(&patterns::builtin(), &ParameterBindings::new()).unwrap();
    let parent = &composed.parent;

    assert_eq!(parent.name(), "demo");
    assert_eq!(
        parent.parameter("ec2Key").unwrap().default,
        Some(json!("ops-key"))
    );
    assert!(parent.has_parameter("remoteAccessLocation"));
    assert!(parent.mapping("RegionMap").unwrap()["us-east-1"]["natAmiId"].is_string());
}

#[test]
fn test_children_become_stack_resources() {
    let composed = compose_with(&patterns::builtin(), &ParameterBindings::new()).unwrap();

    let base = composed.parent.resource("BaseNetworkStack").unwrap();
    assert_eq!(base.resource_type, "AWS::CloudFormation::Stack");
    assert_eq!(
        base.properties["TemplateURL"],
        json!(format!(
            "https://demo-bucket.s3.amazonaws.com/templates/BaseNetwork.{}.template",
            TIMESTAMP
        ))
    );
    assert_eq!(base.properties["TimeoutInMinutes"], json!(30));
    assert_eq!(
        stack_params(&composed, "BaseNetworkStack")["ec2Key"],
        json!({"Ref": "ec2Key"})
    );

    assert_eq!(composed.children.len(), 2);
    assert_eq!(composed.children[0].pattern, "BaseNetwork");
    assert_eq!(composed.children[1].stack_resource, "BastionStack");
    assert_eq!(
        composed.parent_key,
        format!("templates/demo.{}.template", TIMESTAMP)
    );
}

#[test]
fn test_later_child_binds_to_earlier_outputs() {
    let composed = compose_with(&patterns::builtin(), &ParameterBindings::new()).unwrap();

    let params = stack_params(&composed, "BastionStack");
    assert_eq!(
        params["vpcId"],
        json!({"Fn::GetAtt": ["BaseNetworkStack", "Outputs.vpcId"]})
    );
    assert_eq!(
        params["publicSubnet2"],
        json!({"Fn::GetAtt": ["BaseNetworkStack", "Outputs.publicSubnet2"]})
    );
    assert_eq!(params["ec2Key"], json!({"Ref": "ec2Key"}));

    let bastion = composed.parent.resource("BastionStack").unwrap();
    assert_eq!(bastion.depends_on, vec!["BaseNetworkStack".to_string()]);

    assert_eq!(
        composed.bindings.get("BastionELBDNSName"),
        Some(&Binding::stack_output("BastionStack", "BastionELBDNSName"))
    );
}

#[test]
fn test_base_network_outputs_propagate_to_parent() {
    let composed = compose_with(&patterns::builtin(), &ParameterBindings::new()).unwrap();

    assert_eq!(
        composed.parent.output("vpcId").unwrap().value,
        json!({"Fn::GetAtt": ["BaseNetworkStack", "Outputs.vpcId"]})
    );
    assert!(composed.parent.output("BastionELBDNSName").is_none());
}

#[test]
fn test_base_network_routing() {
    let composed = compose_with(&patterns::builtin(), &ParameterBindings::new()).unwrap();
    let child = &composed.child("BaseNetwork").unwrap().template;

    assert_eq!(child.resources_of_type("AWS::EC2::Subnet").count(), 6);
    assert_eq!(child.resources_of_type("AWS::EC2::RouteTable").count(), 6);
    assert_eq!(
        child
            .resources_of_type("AWS::EC2::SubnetRouteTableAssociation")
            .count(),
        6
    );

    let routes: Vec<_> = child.resources_of_type("AWS::EC2::Route").collect();
    assert_eq!(routes.len(), 3);
    for (name, route) in routes {
        assert!(name.starts_with("myPublicAZ"), "unexpected route {}", name);
        assert_eq!(route.properties["GatewayId"], json!({"Ref": "vpcIgw"}));
        assert_eq!(route.depends_on, vec!["igwVpcAttachment".to_string()]);
    }

    for index in 0..3 {
        let table = child
            .resource(&format!("myPrivateAZ{}RouteTable", index))
            .unwrap();
        let tags = table.properties["Tags"].as_array().unwrap();
        assert!(tags.contains(&json!({"Key": "egress", "Value": format!("HaNat{}", index)})));

        let asg = child
            .resource(&format!("HaNat{}AutoScalingGroup", index))
            .unwrap();
        assert_eq!(
            asg.properties["VPCZoneIdentifier"],
            json!([{"Ref": format!("myPublicAZ{}", index)}])
        );
        assert_eq!(
            asg.depends_on,
            vec![format!("myPrivateAZ{}EgressRouteTableAssociation", index)]
        );
    }

    let mapping = child.mapping("networkAddresses").unwrap();
    assert_eq!(mapping["myPublic"]["AZ1"], json!("10.0.64.0/18"));
    assert_eq!(mapping["myPrivate"]["AZ2"], json!("10.0.200.0/22"));

    let subnet = child.resource("myPrivateAZ0").unwrap();
    assert!(subnet.properties["Tags"]
        .as_array()
        .unwrap()
        .contains(&json!({"Key": "network", "Value": "private"})));
}

#[test]
fn test_pattern_order_is_checked() {
    let reversed: Vec<Arc<dyn Pattern>> = vec![
        Arc::new(BastionPattern::new()),
        Arc::new(BaseNetworkPattern::new()),
    ];
    let err = compose_with(&reversed, &ParameterBindings::new()).unwrap_err();
    assert!(matches!(
        err,
        TemplateError::ForwardReference { ref pattern, ref requires }
            if pattern == "Bastion" && requires == "BaseNetwork"
    ));

    let duplicated: Vec<Arc<dyn Pattern>> = vec![
        Arc::new(BaseNetworkPattern::new()),
        Arc::new(BaseNetworkPattern::new()),
    ];
    assert!(matches!(
        compose_with(&duplicated, &ParameterBindings::new()),
        Err(TemplateError::DuplicatePattern(_))
    ));
}

#[test]
fn test_literal_binding_beats_child_output() {
    let mut bindings = ParameterBindings::new();
    bindings.bind_value("vpcId", "vpc-0123");

    let composed = compose_with(&patterns::builtin(), &bindings).unwrap();

    assert_eq!(stack_params(&composed, "BastionStack")["vpcId"], json!("vpc-0123"));
    assert_eq!(composed.bindings.get("vpcId"), Some(&Binding::literal("vpc-0123")));
}

#[test]
fn test_unbound_parameters_are_promoted_and_zones_linked() {
    let sample: Vec<Arc<dyn Pattern>> = vec![Arc::new(SamplePattern {
        parameters: vec!["dbName", "availabilityZone1"],
    })];
    let composed = compose_with(&sample, &ParameterBindings::new()).unwrap();

    let params = stack_params(&composed, "SampleStack");
    assert_eq!(params["dbName"], json!({"Ref": "dbName"}));
    assert_eq!(params["availabilityZone1"], json!("us-east-1b"));
    assert_eq!(
        composed.parent.parameter("dbName").unwrap().default,
        Some(json!("x"))
    );
    assert!(!composed.parent.has_parameter("availabilityZone1"));
}

fn with_cluster(cluster: HaClusterPattern) -> Vec<Arc<dyn Pattern>> {
    vec![Arc::new(BaseNetworkPattern::new()), Arc::new(cluster)]
}

#[test]
fn test_ha_cluster_runs_private_behind_public_elb() {
    let composed =
        compose_with(&with_cluster(HaClusterPattern::new()), &ParameterBindings::new()).unwrap();

    let params = stack_params(&composed, "HaClusterStack");
    assert_eq!(
        params["privateSubnet0"],
        json!({"Fn::GetAtt": ["BaseNetworkStack", "Outputs.privateSubnet0"]})
    );
    assert_eq!(
        params["publicSubnet2"],
        json!({"Fn::GetAtt": ["BaseNetworkStack", "Outputs.publicSubnet2"]})
    );

    let cluster = &composed.child("HaCluster").unwrap().template;
    let elb = &cluster.resource("HaClusterElb").unwrap().properties;
    assert_eq!(elb["Subnets"][0], json!({"Ref": "publicSubnet0"}));
    assert!(!elb.contains_key("Scheme"));
    let elb_sg = &cluster.resource("HaClusterElbSecurityGroup").unwrap().properties;
    assert_eq!(elb_sg["SecurityGroupIngress"][0]["CidrIp"], json!("0.0.0.0/0"));
    assert!(cluster.has_resource("HaClusterIngressFromElb80"));

    let asg = &cluster.resource("HaClusterAutoScalingGroup").unwrap().properties;
    assert_eq!(asg["VPCZoneIdentifier"][2], json!({"Ref": "privateSubnet2"}));
    let launch = &cluster
        .resource("HaClusterLaunchConfiguration")
        .unwrap()
        .properties;
    assert_eq!(launch["AssociatePublicIpAddress"], json!(false));
    assert!(!launch.contains_key("UserData"));

    assert!(!cluster.has_resource("HaClusterDnsRecord"));
    assert_eq!(
        composed.bindings.get("HaClusterELBDNSName"),
        Some(&Binding::stack_output("HaClusterStack", "HaClusterELBDNSName"))
    );
}

#[test]
fn test_internal_ha_cluster_registers_dns() {
    let mut config = config();
    let web = ConfigTree::from_json_str(
        r#"{"web": {
            "elb_ports": {"443": 8443},
            "elb_scheme": "internal",
            "env_vars": {"ROLE": "web"},
            "register_dns": true,
            "hosted_zone": "example.com"
        }}"#,
    )
    .unwrap();
    config.merge(&web);
    let patterns = with_cluster(HaClusterPattern::named("Web", "web"));
    let composed = composer(&config)
        .compose(
            &config,
            &layout(),
            &AmiCache::builtin().unwrap(),
            &patterns,
            &ParameterBindings::new(),
        )
        .unwrap();

    let cluster = &composed.child("Web").unwrap().template;
    assert!(!cluster.has_parameter("publicSubnet0"));
    let elb = &cluster.resource("WebElb").unwrap().properties;
    assert_eq!(elb["Scheme"], json!("internal"));
    assert_eq!(elb["Subnets"][0], json!({"Ref": "privateSubnet0"}));
    assert_eq!(elb["Listeners"][0]["InstancePort"], json!("8443"));
    let elb_sg = &cluster.resource("WebElbSecurityGroup").unwrap().properties;
    assert_eq!(
        elb_sg["SecurityGroupIngress"][0]["CidrIp"],
        json!({"Ref": "vpcCidr"})
    );
    assert!(cluster.has_resource("WebElbEgressToWeb8443"));
    assert!(cluster
        .resource("WebLaunchConfiguration")
        .unwrap()
        .properties
        .contains_key("UserData"));

    let record = &cluster.resource("WebDnsRecord").unwrap().properties;
    assert_eq!(record["Type"], json!("CNAME"));
    assert_eq!(
        composed.parent.parameter("environmentHostedZone").unwrap().default,
        Some(json!("example.com"))
    );
    assert_eq!(
        stack_params(&composed, "WebStack")["WebHostName"],
        json!({"Ref": "WebHostName"})
    );
}

#[test]
fn test_ha_cluster_rejects_inverted_sizes() {
    let mut config = config();
    config.set("ha_cluster", "min_size", json!(3));
    config.set("ha_cluster", "max_size", json!(1));
    let patterns = with_cluster(HaClusterPattern::new());
    let err = composer(&config)
        .compose(
            &config,
            &layout(),
            &AmiCache::builtin().unwrap(),
            &patterns,
            &ParameterBindings::new(),
        )
        .unwrap_err();

    assert!(matches!(err, TemplateError::PatternFailed { ref pattern, .. } if pattern == "HaCluster"));
}

#[test]
fn test_ha_cluster_requires_base_network() {
    let patterns: Vec<Arc<dyn Pattern>> = vec![Arc::new(HaClusterPattern::new())];
    let err = compose_with(&patterns, &ParameterBindings::new()).unwrap_err();
    assert!(matches!(err, TemplateError::ForwardReference { ref requires, .. } if requires == "BaseNetwork"));
}

#[tokio::test]
async fn test_publish_writes_and_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let composed = compose_with(&patterns::builtin(), &ParameterBindings::new()).unwrap();
    let provider = MockProvider::new();

    let settings = PublishSettings::from_config(&config())
        .unwrap()
        .with_output_path(dir.path().join("demo.template"));
    let publisher = TemplatePublisher::new(Arc::new(provider.clone()), settings);
    let report = publisher.publish(&composed).await.unwrap();

    assert!(report.parent_path.exists());
    assert!(dir.path().join("BaseNetwork.template").exists());
    assert!(dir.path().join("Bastion.template").exists());
    assert!(dir.path().join("demo.template.params.json").exists());
    assert_eq!(report.uploaded.len(), 3);

    let parent = std::fs::read_to_string(&report.parent_path).unwrap();
    validate_template_contents(&parent).unwrap();

    let uploaded = provider
        .object("demo-bucket", &composed.parent_key)
        .unwrap();
    assert_eq!(String::from_utf8(uploaded).unwrap(), parent);
    assert!(provider
        .object("demo-bucket", &format!("templates/Bastion.{}.template", TIMESTAMP))
        .is_some());
}

#[tokio::test]
async fn test_publish_without_upload_only_writes() {
    let dir = tempfile::tempdir().unwrap();
    let composed = compose_with(&patterns::builtin(), &ParameterBindings::new()).unwrap();
    let provider = MockProvider::new();

    let settings = PublishSettings::from_config(&config())
        .unwrap()
        .with_output_path(dir.path().join("demo.template"))
        .with_upload(false);
    let publisher = TemplatePublisher::new(Arc::new(provider.clone()), settings);
    let report = publisher.publish(&composed).await.unwrap();

    assert!(report.uploaded.is_empty());
    assert!(!provider.was_called("put_object"));
    assert_eq!(report.child_paths.len(), 2);
}

#[tokio::test]
async fn test_upload_written_reuses_child_keys() {
    let dir = tempfile::tempdir().unwrap();
    let composed = compose_with(&patterns::builtin(), &ParameterBindings::new()).unwrap();
    let settings = PublishSettings::from_config(&config())
        .unwrap()
        .with_output_path(dir.path().join("demo.template"))
        .with_upload(false);

    let provider = MockProvider::new();
    let publisher = TemplatePublisher::new(Arc::new(provider.clone()), settings);
    publisher.write(&composed).unwrap();

    let url = publisher.upload_written("templates/demo.template").await.unwrap();

    assert_eq!(url, "https://demo-bucket.s3.amazonaws.com/templates/demo.template");
    assert!(provider
        .object("demo-bucket", &composed.child("BaseNetwork").unwrap().object_key)
        .is_some());
    assert_eq!(provider.get_method_calls("put_object").len(), 3);
}
