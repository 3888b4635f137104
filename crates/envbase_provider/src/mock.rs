//! In-memory provider for tests and dry runs.
//!
//! `MockProvider` implements every provider trait against shared in-memory
//! state. It records each call, can be told to fail specific methods, and
//! replays scripted batches of stack notification messages.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CloudProvider, NatApi, StackEventSource};
use crate::types::{
    AvailabilityZone, ChannelMessage, EventSubscription, InstanceDescription,
    RouteTableAssociation, StackRequest, StackSummary,
};

/// Longest a mock receive sleeps when nothing is queued.
const IDLE_RECEIVE_WAIT: Duration = Duration::from_millis(10);

/// Captured call information for verification.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedCall {
    pub method: String,
    pub args: Vec<String>,
    pub request: Option<StackRequest>,
}

/// A subnet known to the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct MockSubnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub tags: BTreeMap<String, String>,
}

impl MockSubnet {
    pub fn new(
        subnet_id: impl Into<String>,
        vpc_id: impl Into<String>,
        availability_zone: impl Into<String>,
    ) -> Self {
        Self {
            subnet_id: subnet_id.into(),
            vpc_id: vpc_id.into(),
            availability_zone: availability_zone.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Mock cloud provider.
#[derive(Clone, Default)]
pub struct MockProvider {
    zones: Arc<RwLock<Vec<AvailabilityZone>>>,
    /// (zone, instance type) pairs that are not offered.
    missing_offerings: Arc<RwLock<BTreeSet<(String, String)>>>,
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    stacks: Arc<RwLock<BTreeMap<String, StackSummary>>>,
    no_updates: Arc<RwLock<bool>>,
    stack_counter: Arc<AtomicUsize>,
    event_batches: Arc<RwLock<VecDeque<Vec<ChannelMessage>>>>,
    acknowledged: Arc<RwLock<Vec<String>>>,
    open_channels: Arc<RwLock<BTreeSet<String>>>,
    instances: Arc<RwLock<BTreeMap<String, InstanceDescription>>>,
    subnets: Arc<RwLock<Vec<MockSubnet>>>,
    associations: Arc<RwLock<BTreeMap<String, RouteTableAssociation>>>,
    main_tables: Arc<RwLock<BTreeMap<String, String>>>,
    routes: Arc<RwLock<BTreeMap<(String, String), String>>>,
    source_dest_disabled: Arc<RwLock<BTreeSet<String>>>,
    failures: Arc<RwLock<HashMap<String, ProviderError>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
}

impl MockProvider {
    /// Create an empty mock provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider for dry runs: six available zones named after the region.
    pub fn dry_run(region: &str) -> Self {
        let zones = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|suffix| format!("{}{}", region, suffix))
            .collect::<Vec<_>>();
        Self::new().with_zones(zones)
    }

    /// Available zones, in listing order.
    pub fn with_zones<I, S>(self, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zones
            .write()
            .extend(zones.into_iter().map(AvailabilityZone::available));
        self
    }

    pub fn add_zone(self, zone: AvailabilityZone) -> Self {
        self.zones.write().push(zone);
        self
    }

    /// Mark an instance type as not offered in a zone.
    pub fn without_offering(self, zone: impl Into<String>, instance_type: impl Into<String>) -> Self {
        self.missing_offerings
            .write()
            .insert((zone.into(), instance_type.into()));
        self
    }

    /// Pretend a stack already exists.
    pub fn with_stack(self, stack_name: impl Into<String>, status: impl Into<String>) -> Self {
        let stack_name = stack_name.into();
        let summary = StackSummary {
            stack_id: format!("arn:aws:cloudformation:mock:stack/{}/0", stack_name),
            stack_name: stack_name.clone(),
            status: status.into(),
        };
        self.stacks.write().insert(stack_name, summary);
        self
    }

    /// Make update calls report that nothing changed.
    pub fn with_no_updates(self) -> Self {
        *self.no_updates.write() = true;
        self
    }

    /// Queue a batch of messages returned by the next receive.
    pub fn add_event_batch(self, batch: Vec<ChannelMessage>) -> Self {
        self.event_batches.write().push_back(batch);
        self
    }

    pub fn add_instance(self, instance: InstanceDescription) -> Self {
        self.instances
            .write()
            .insert(instance.instance_id.clone(), instance);
        self
    }

    pub fn add_subnet(self, subnet: MockSubnet) -> Self {
        self.subnets.write().push(subnet);
        self
    }

    /// Explicitly associate a subnet with a route table.
    pub fn associate(
        self,
        subnet_id: impl Into<String>,
        route_table_id: impl Into<String>,
        main: bool,
    ) -> Self {
        let subnet_id = subnet_id.into();
        self.associations.write().insert(
            subnet_id.clone(),
            RouteTableAssociation {
                route_table_id: route_table_id.into(),
                subnet_id,
                main,
            },
        );
        self
    }

    pub fn with_main_route_table(self, vpc_id: impl Into<String>, route_table_id: impl Into<String>) -> Self {
        self.main_tables
            .write()
            .insert(vpc_id.into(), route_table_id.into());
        self
    }

    /// Seed an existing route.
    pub fn with_route(
        self,
        route_table_id: impl Into<String>,
        destination: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        self.routes
            .write()
            .insert((route_table_id.into(), destination.into()), instance_id.into());
        self
    }

    /// Make every call to `method` fail with `error`.
    pub fn fail_on(self, method: impl Into<String>, error: ProviderError) -> Self {
        self.failures.write().insert(method.into(), error);
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls.read().iter().any(|c| c.method == method)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects.read().get(&object_id(bucket, key)).cloned()
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn stack(&self, stack_name: &str) -> Option<StackSummary> {
        self.stacks.read().get(stack_name).cloned()
    }

    pub fn route(&self, route_table_id: &str, destination: &str) -> Option<String> {
        self.routes
            .read()
            .get(&(route_table_id.to_string(), destination.to_string()))
            .cloned()
    }

    pub fn source_dest_check_disabled(&self, instance_id: &str) -> bool {
        self.source_dest_disabled.read().contains(instance_id)
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.read().clone()
    }

    pub fn open_channels(&self) -> Vec<String> {
        self.open_channels.read().iter().cloned().collect()
    }

    fn record(&self, method: &str, args: &[&str], request: Option<&StackRequest>) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            request: request.cloned(),
        });
    }

    fn check_failure(&self, method: &str) -> ProviderResult<()> {
        match self.failures.read().get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn object_id(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, key)
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn describe_zones(&self, region: &str) -> ProviderResult<Vec<AvailabilityZone>> {
        self.record("describe_zones", &[region], None);
        self.check_failure("describe_zones")?;
        Ok(self.zones.read().clone())
    }

    async fn zone_offers_instance_type(
        &self,
        zone: &str,
        instance_type: &str,
    ) -> ProviderResult<bool> {
        self.record("zone_offers_instance_type", &[zone, instance_type], None);
        self.check_failure("zone_offers_instance_type")?;
        Ok(!self
            .missing_offerings
            .read()
            .contains(&(zone.to_string(), instance_type.to_string())))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> ProviderResult<String> {
        self.record("put_object", &[bucket, key], None);
        self.check_failure("put_object")?;
        debug!("Mock upload of {} bytes to {}/{}", body.len(), bucket, key);
        self.objects.write().insert(object_id(bucket, key), body);
        Ok(format!("https://{}.s3.amazonaws.com/{}", bucket, key))
    }

    async fn describe_stack(&self, stack_name: &str) -> ProviderResult<Option<StackSummary>> {
        self.record("describe_stack", &[stack_name], None);
        self.check_failure("describe_stack")?;
        Ok(self.stacks.read().get(stack_name).cloned())
    }

    async fn create_stack(&self, request: &StackRequest) -> ProviderResult<String> {
        self.record("create_stack", &[&request.stack_name], Some(request));
        self.check_failure("create_stack")?;

        let mut stacks = self.stacks.write();
        if stacks.contains_key(&request.stack_name) {
            return Err(ProviderError::AlreadyExists(request.stack_name.clone()));
        }

        let n = self.stack_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let stack_id = format!(
            "arn:aws:cloudformation:mock:stack/{}/{}",
            request.stack_name, n
        );
        stacks.insert(
            request.stack_name.clone(),
            StackSummary {
                stack_id: stack_id.clone(),
                stack_name: request.stack_name.clone(),
                status: "CREATE_IN_PROGRESS".to_string(),
            },
        );
        Ok(stack_id)
    }

    async fn update_stack(&self, request: &StackRequest) -> ProviderResult<String> {
        self.record("update_stack", &[&request.stack_name], Some(request));
        self.check_failure("update_stack")?;

        if *self.no_updates.read() {
            return Err(ProviderError::NoUpdates(request.stack_name.clone()));
        }

        let mut stacks = self.stacks.write();
        let stack = stacks
            .get_mut(&request.stack_name)
            .ok_or_else(|| ProviderError::NotFound(request.stack_name.clone()))?;
        stack.status = "UPDATE_IN_PROGRESS".to_string();
        Ok(stack.stack_id.clone())
    }

    async fn delete_stack(&self, stack_name: &str) -> ProviderResult<()> {
        self.record("delete_stack", &[stack_name], None);
        self.check_failure("delete_stack")?;
        self.stacks.write().remove(stack_name);
        Ok(())
    }
}

#[async_trait]
impl StackEventSource for MockProvider {
    async fn open_channel(&self, name: &str) -> ProviderResult<EventSubscription> {
        self.record("open_channel", &[name], None);
        self.check_failure("open_channel")?;
        self.open_channels.write().insert(name.to_string());
        Ok(EventSubscription {
            name: name.to_string(),
            topic_arn: format!("arn:aws:sns:mock:000000000000:{}", name),
            queue_url: format!("https://sqs.mock.amazonaws.com/000000000000/{}", name),
            queue_arn: format!("arn:aws:sqs:mock:000000000000:{}", name),
        })
    }

    async fn receive(
        &self,
        subscription: &EventSubscription,
        wait: Duration,
        max_messages: usize,
    ) -> ProviderResult<Vec<ChannelMessage>> {
        self.record("receive", &[&subscription.name], None);
        self.check_failure("receive")?;

        let batch = self.event_batches.write().pop_front();
        match batch {
            Some(mut batch) => {
                batch.truncate(max_messages);
                Ok(batch)
            }
            None => {
                tokio::time::sleep(wait.min(IDLE_RECEIVE_WAIT)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn acknowledge(
        &self,
        subscription: &EventSubscription,
        receipt: &str,
    ) -> ProviderResult<()> {
        self.record("acknowledge", &[&subscription.name, receipt], None);
        self.check_failure("acknowledge")?;
        self.acknowledged.write().push(receipt.to_string());
        Ok(())
    }

    async fn close_channel(&self, subscription: &EventSubscription) -> ProviderResult<()> {
        self.record("close_channel", &[&subscription.name], None);
        self.check_failure("close_channel")?;
        self.open_channels.write().remove(&subscription.name);
        Ok(())
    }
}

#[async_trait]
impl NatApi for MockProvider {
    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<InstanceDescription> {
        self.record("describe_instance", &[instance_id], None);
        self.check_failure("describe_instance")?;
        self.instances
            .read()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(instance_id.to_string()))
    }

    async fn find_subnets(
        &self,
        vpc_id: &str,
        availability_zone: &str,
        tag_key: &str,
        tag_value: &str,
    ) -> ProviderResult<Vec<String>> {
        self.record(
            "find_subnets",
            &[vpc_id, availability_zone, tag_key, tag_value],
            None,
        );
        self.check_failure("find_subnets")?;
        Ok(self
            .subnets
            .read()
            .iter()
            .filter(|s| s.vpc_id == vpc_id && s.availability_zone == availability_zone)
            .filter(|s| s.tags.get(tag_key).map(String::as_str) == Some(tag_value))
            .map(|s| s.subnet_id.clone())
            .collect())
    }

    async fn route_table_for_subnet(
        &self,
        subnet_id: &str,
    ) -> ProviderResult<Option<RouteTableAssociation>> {
        self.record("route_table_for_subnet", &[subnet_id], None);
        self.check_failure("route_table_for_subnet")?;
        Ok(self.associations.read().get(subnet_id).cloned())
    }

    async fn main_route_table(&self, vpc_id: &str) -> ProviderResult<Option<String>> {
        self.record("main_route_table", &[vpc_id], None);
        self.check_failure("main_route_table")?;
        Ok(self.main_tables.read().get(vpc_id).cloned())
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        self.record(
            "create_route",
            &[route_table_id, destination_cidr, instance_id],
            None,
        );
        self.check_failure("create_route")?;

        let key = (route_table_id.to_string(), destination_cidr.to_string());
        let mut routes = self.routes.write();
        if routes.contains_key(&key) {
            return Err(ProviderError::AlreadyExists(format!(
                "route {} in {}",
                destination_cidr, route_table_id
            )));
        }
        routes.insert(key, instance_id.to_string());
        Ok(())
    }

    async fn replace_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        self.record(
            "replace_route",
            &[route_table_id, destination_cidr, instance_id],
            None,
        );
        self.check_failure("replace_route")?;

        let key = (route_table_id.to_string(), destination_cidr.to_string());
        let mut routes = self.routes.write();
        match routes.get_mut(&key) {
            Some(target) => {
                *target = instance_id.to_string();
                Ok(())
            }
            None => Err(ProviderError::NotFound(format!(
                "route {} in {}",
                destination_cidr, route_table_id
            ))),
        }
    }

    async fn disable_source_dest_check(&self, instance_id: &str) -> ProviderResult<()> {
        self.record("disable_source_dest_check", &[instance_id], None);
        self.check_failure("disable_source_dest_check")?;
        self.source_dest_disabled
            .write()
            .insert(instance_id.to_string());
        Ok(())
    }
}
