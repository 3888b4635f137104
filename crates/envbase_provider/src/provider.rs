//! Provider traits.
//!
//! Three seams cover everything envbase asks of the cloud:
//! [`CloudProvider`] for zones, objects and stacks, [`StackEventSource`] for
//! the stack notification channel, and [`NatApi`] for the failover
//! controller's route takeover.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::types::{
    AvailabilityZone, ChannelMessage, EventSubscription, InstanceDescription,
    RouteTableAssociation, StackRequest, StackSummary,
};

/// Zones, template storage and stack lifecycle calls.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// List zones in `region`, in the provider's order.
    async fn describe_zones(&self, region: &str) -> ProviderResult<Vec<AvailabilityZone>>;

    /// Whether `zone` can launch `instance_type`.
    async fn zone_offers_instance_type(
        &self,
        zone: &str,
        instance_type: &str,
    ) -> ProviderResult<bool>;

    /// Store an object and return its URL.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> ProviderResult<String>;

    /// Look up a stack by name. `None` when it does not exist.
    async fn describe_stack(&self, stack_name: &str) -> ProviderResult<Option<StackSummary>>;

    /// Create a stack and return its id.
    async fn create_stack(&self, request: &StackRequest) -> ProviderResult<String>;

    /// Update a stack and return its id.
    ///
    /// Implementations report an unchanged template as `ProviderError::NoUpdates`.
    async fn update_stack(&self, request: &StackRequest) -> ProviderResult<String>;

    /// Request deletion of a stack.
    async fn delete_stack(&self, stack_name: &str) -> ProviderResult<()>;
}

/// Notification channel carrying stack events.
#[async_trait]
pub trait StackEventSource: Send + Sync {
    /// Create a topic and a subscribed queue named `name`.
    async fn open_channel(&self, name: &str) -> ProviderResult<EventSubscription>;

    /// Long-poll for up to `max_messages`, waiting at most `wait`.
    async fn receive(
        &self,
        subscription: &EventSubscription,
        wait: Duration,
        max_messages: usize,
    ) -> ProviderResult<Vec<ChannelMessage>>;

    /// Remove a processed message.
    async fn acknowledge(
        &self,
        subscription: &EventSubscription,
        receipt: &str,
    ) -> ProviderResult<()>;

    /// Delete the topic and queue.
    async fn close_channel(&self, subscription: &EventSubscription) -> ProviderResult<()>;
}

/// Calls made by the HA-NAT failover controller.
#[async_trait]
pub trait NatApi: Send + Sync {
    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<InstanceDescription>;

    /// Subnets in `vpc_id` and `availability_zone` tagged `tag_key=tag_value`.
    async fn find_subnets(
        &self,
        vpc_id: &str,
        availability_zone: &str,
        tag_key: &str,
        tag_value: &str,
    ) -> ProviderResult<Vec<String>>;

    /// The explicit route table association of a subnet, if any.
    async fn route_table_for_subnet(
        &self,
        subnet_id: &str,
    ) -> ProviderResult<Option<RouteTableAssociation>>;

    async fn main_route_table(&self, vpc_id: &str) -> ProviderResult<Option<String>>;

    /// Fails with `ProviderError::AlreadyExists` when the destination is taken.
    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ProviderResult<()>;

    async fn replace_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ProviderResult<()>;

    async fn disable_source_dest_check(&self, instance_id: &str) -> ProviderResult<()>;
}
