//! Integration tests for the in-memory provider.
//!
//! Higher layers rely on these behaviors when they use the mock for tests
//! and dry runs.

use std::time::Duration;

use envbase_provider::{
    ChannelMessage, CloudProvider, InstanceDescription, MockProvider, MockSubnet, NatApi,
    ProviderError, StackEventSource, StackRequest,
};

#[tokio::test]
async fn test_stack_create_then_update() {
    let provider = MockProvider::new();
    let request = StackRequest::new("env")
        .with_template_url("https://bucket.s3.amazonaws.com/env.template")
        .with_parameter("ec2Key", "ops");

    let id = provider.create_stack(&request).await.unwrap();
    assert!(id.contains("env"));
    assert_eq!(provider.stack("env").unwrap().status, "CREATE_IN_PROGRESS");

    let again = provider.create_stack(&request).await.unwrap_err();
    assert_eq!(again, ProviderError::AlreadyExists("env".to_string()));

    provider.update_stack(&request).await.unwrap();
    assert_eq!(provider.stack("env").unwrap().status, "UPDATE_IN_PROGRESS");

    let calls = provider.get_method_calls("create_stack");
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0].request.as_ref().unwrap().parameters["ec2Key"],
        "ops"
    );
}

#[tokio::test]
async fn test_update_without_changes() {
    let provider = MockProvider::new()
        .with_stack("env", "CREATE_COMPLETE")
        .with_no_updates();

    let err = provider
        .update_stack(&StackRequest::new("env"))
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::NoUpdates("env".to_string()));
}

#[tokio::test]
async fn test_put_object_returns_url() {
    let provider = MockProvider::new();
    let url = provider
        .put_object("bucket", "templates/a.template", b"{}".to_vec())
        .await
        .unwrap();

    assert_eq!(url, "https://bucket.s3.amazonaws.com/templates/a.template");
    assert_eq!(provider.object("bucket", "templates/a.template"), Some(b"{}".to_vec()));
}

#[tokio::test]
async fn test_event_batches_replay_in_order() {
    let provider = MockProvider::new()
        .add_event_batch(vec![ChannelMessage::new("r1", "first")])
        .add_event_batch(vec![ChannelMessage::new("r2", "second")]);

    let sub = provider.open_channel("env_20240101-000000_abcde").await.unwrap();
    let first = provider.receive(&sub, Duration::from_secs(5), 10).await.unwrap();
    let second = provider.receive(&sub, Duration::from_secs(5), 10).await.unwrap();
    let empty = provider.receive(&sub, Duration::from_secs(5), 10).await.unwrap();

    assert_eq!(first[0].body, "first");
    assert_eq!(second[0].body, "second");
    assert!(empty.is_empty());

    provider.acknowledge(&sub, "r1").await.unwrap();
    provider.close_channel(&sub).await.unwrap();
    assert_eq!(provider.acknowledged(), vec!["r1".to_string()]);
    assert!(provider.open_channels().is_empty());
}

#[tokio::test]
async fn test_find_subnets_filters_by_tag_and_zone() {
    let provider = MockProvider::new()
        .add_instance(InstanceDescription {
            instance_id: "i-1".to_string(),
            vpc_id: "vpc-1".to_string(),
            availability_zone: "us-east-1a".to_string(),
        })
        .add_subnet(MockSubnet::new("subnet-a", "vpc-1", "us-east-1a").tag("network", "private"))
        .add_subnet(MockSubnet::new("subnet-b", "vpc-1", "us-east-1b").tag("network", "private"))
        .add_subnet(MockSubnet::new("subnet-c", "vpc-1", "us-east-1a").tag("network", "public"));

    let subnets = provider
        .find_subnets("vpc-1", "us-east-1a", "network", "private")
        .await
        .unwrap();
    assert_eq!(subnets, vec!["subnet-a".to_string()]);

    let instance = provider.describe_instance("i-1").await.unwrap();
    assert_eq!(instance.vpc_id, "vpc-1");
    assert!(provider.describe_instance("i-missing").await.is_err());
}

#[tokio::test]
async fn test_replace_route_requires_existing() {
    let provider = MockProvider::new().with_route("rtb-1", "0.0.0.0/0", "i-old");

    provider.replace_route("rtb-1", "0.0.0.0/0", "i-new").await.unwrap();
    assert_eq!(provider.route("rtb-1", "0.0.0.0/0"), Some("i-new".to_string()));

    let err = provider
        .replace_route("rtb-2", "0.0.0.0/0", "i-new")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}
