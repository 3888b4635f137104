//! Integration tests for the HA-NAT route takeover.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use envbase_nat::{
    FailoverController, FailoverSettings, HostNetwork, MetadataSource, NatError, NatResult,
    RouteOutcome, DEFAULT_ROUTE,
};
use envbase_provider::{InstanceDescription, MockProvider, MockSubnet, ProviderError};

const INSTANCE: &str = "i-0abc";
const VPC: &str = "vpc-1";
const ZONE: &str = "us-east-1a";
const MAC: &str = "0a:00:00:00:00:01";

struct FakeMetadata {
    values: HashMap<String, String>,
}

impl FakeMetadata {
    fn complete() -> Self {
        let mut values = HashMap::new();
        for (path, value) in [
            ("instance-id", INSTANCE),
            ("placement/availability-zone", ZONE),
            ("placement/region", "us-east-1"),
            ("mac", MAC),
        ] {
            values.insert(path.to_string(), value.to_string());
        }
        values.insert(
            format!("network/interfaces/macs/{}/vpc-ipv4-cidr-block", MAC),
            "10.0.0.0/16".to_string(),
        );
        Self { values }
    }

    fn without(mut self, path: &str) -> Self {
        self.values.remove(path);
        self
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn get(&self, path: &str) -> NatResult<String> {
        self.values
            .get(path)
            .cloned()
            .ok_or_else(|| NatError::metadata(path, "404"))
    }
}

/// Host double that keeps its rules in memory.
#[derive(Default)]
struct MemoryHost {
    forwarding: Mutex<Vec<String>>,
    rules: Mutex<Vec<(String, String)>>,
}

impl HostNetwork for MemoryHost {
    fn enable_ip_forwarding(&self, interface: &str) -> NatResult<()> {
        self.forwarding.lock().unwrap().push(interface.to_string());
        Ok(())
    }

    fn masquerade_rule_exists(&self, interface: &str, source_cidr: &str) -> NatResult<bool> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .contains(&(interface.to_string(), source_cidr.to_string())))
    }

    fn add_masquerade_rule(&self, interface: &str, source_cidr: &str) -> NatResult<()> {
        self.rules
            .lock()
            .unwrap()
            .push((interface.to_string(), source_cidr.to_string()));
        Ok(())
    }
}

fn private_subnet(id: &str, zone: &str) -> MockSubnet {
    MockSubnet::new(id, VPC, zone).tag("network", "private")
}

fn provider() -> MockProvider {
    MockProvider::new()
        .add_instance(InstanceDescription {
            instance_id: INSTANCE.to_string(),
            vpc_id: VPC.to_string(),
            availability_zone: ZONE.to_string(),
        })
        .with_main_route_table(VPC, "rtb-main")
        .add_subnet(private_subnet("subnet-a", ZONE))
        .add_subnet(private_subnet("subnet-b", ZONE))
        .add_subnet(private_subnet("subnet-other-zone", "us-east-1b"))
        .add_subnet(MockSubnet::new("subnet-public", VPC, ZONE).tag("network", "public"))
        .associate("subnet-a", "rtb-a", false)
        .associate("subnet-b", "rtb-b", false)
}

fn controller(
    metadata: FakeMetadata,
    host: &Arc<MemoryHost>,
    provider: &Arc<MockProvider>,
) -> FailoverController {
    FailoverController::new(Arc::new(metadata), host.clone(), provider.clone())
}

#[tokio::test]
async fn test_takeover_points_private_routes_at_instance() {
    let host = Arc::new(MemoryHost::default());
    let provider = Arc::new(provider().with_route("rtb-b", DEFAULT_ROUTE, "i-dead"));

    let report = controller(FakeMetadata::complete(), &host, &provider)
        .run()
        .await
        .unwrap();

    assert_eq!(report.vpc_id, VPC);
    assert_eq!(report.region, "us-east-1");
    assert_eq!(report.masquerade_cidr, "10.0.0.0/16");
    assert!(!report.degraded);
    assert_eq!(report.routes.len(), 2);
    assert_eq!(report.routes[0].outcome, RouteOutcome::Created);
    assert_eq!(report.routes[1].outcome, RouteOutcome::Replaced);
    assert_eq!(report.routes_taken(), 2);

    assert_eq!(provider.route("rtb-a", DEFAULT_ROUTE).as_deref(), Some(INSTANCE));
    assert_eq!(provider.route("rtb-b", DEFAULT_ROUTE).as_deref(), Some(INSTANCE));
    assert!(provider.source_dest_check_disabled(INSTANCE));

    assert_eq!(*host.forwarding.lock().unwrap(), vec!["eth0"]);
    assert_eq!(
        *host.rules.lock().unwrap(),
        vec![("eth0".to_string(), "10.0.0.0/16".to_string())]
    );
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let host = Arc::new(MemoryHost::default());
    let provider = Arc::new(provider());

    controller(FakeMetadata::complete(), &host, &provider)
        .run()
        .await
        .unwrap();
    let second = controller(FakeMetadata::complete(), &host, &provider)
        .run()
        .await
        .unwrap();

    assert!(second
        .routes
        .iter()
        .all(|r| r.outcome == RouteOutcome::Replaced));
    assert_eq!(host.rules.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_vpc_cidr_masquerades_everything() {
    let host = Arc::new(MemoryHost::default());
    let provider = Arc::new(provider());

    let report = controller(FakeMetadata::complete().without("mac"), &host, &provider)
        .run()
        .await
        .unwrap();

    assert!(report.degraded);
    assert_eq!(report.masquerade_cidr, DEFAULT_ROUTE);
    assert_eq!(
        *host.rules.lock().unwrap(),
        vec![("eth0".to_string(), DEFAULT_ROUTE.to_string())]
    );
}

#[tokio::test]
async fn test_main_table_and_unassociated_subnets_are_skipped() {
    let host = Arc::new(MemoryHost::default());
    let provider = Arc::new(
        provider()
            .add_subnet(private_subnet("subnet-main", ZONE))
            .associate("subnet-main", "rtb-main", false)
            .add_subnet(private_subnet("subnet-loose", ZONE)),
    );

    let report = controller(FakeMetadata::complete(), &host, &provider)
        .run()
        .await
        .unwrap();

    let outcome = |id: &str| {
        report
            .routes
            .iter()
            .find(|r| r.subnet_id == id)
            .map(|r| r.outcome)
    };
    assert_eq!(outcome("subnet-main"), Some(RouteOutcome::SkippedMainTable));
    assert_eq!(outcome("subnet-loose"), Some(RouteOutcome::SkippedNoAssociation));
    assert!(provider.route("rtb-main", DEFAULT_ROUTE).is_none());
    assert_eq!(report.routes_taken(), 2);
}

#[tokio::test]
async fn test_no_private_subnets_fails() {
    let host = Arc::new(MemoryHost::default());
    let provider = Arc::new(provider());
    let settings = FailoverSettings::default().with_tag("network", "isolated");

    let err = controller(FakeMetadata::complete(), &host, &provider)
        .with_settings(settings)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, NatError::RouteTakeover { ref stage, .. } if stage == "subnets"));
    assert!(!provider.source_dest_check_disabled(INSTANCE));
}

#[tokio::test]
async fn test_route_failure_names_stage() {
    let host = Arc::new(MemoryHost::default());
    let provider = Arc::new(
        provider().fail_on("create_route", ProviderError::api("CreateRoute", "throttled")),
    );

    let err = controller(FakeMetadata::complete(), &host, &provider)
        .run()
        .await
        .unwrap_err();

    match err {
        NatError::RouteTakeover { stage, message } => {
            assert_eq!(stage, "routes");
            assert!(message.contains("throttled"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_instance_id_fails_discovery() {
    let host = Arc::new(MemoryHost::default());
    let provider = Arc::new(provider());

    let err = controller(
        FakeMetadata::complete().without("instance-id"),
        &host,
        &provider,
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, NatError::RouteTakeover { ref stage, .. } if stage == "discovery"));
    assert!(!provider.was_called("find_subnets"));
}
