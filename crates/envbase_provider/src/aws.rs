//! AWS SDK implementation of the provider traits.
//!
//! Built only with the `aws` feature.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::{Capability, Parameter};
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{AttributeBooleanValue, Filter, LocationType};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_sqs::types::QueueAttributeName;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CloudProvider, NatApi, StackEventSource};
use crate::types::{
    AvailabilityZone, ChannelMessage, EventSubscription, InstanceDescription,
    RouteTableAssociation, StackRequest, StackSummary, ZoneState,
};

/// Provider backed by the AWS SDK clients for one region.
#[derive(Clone)]
pub struct AwsProvider {
    region: String,
    ec2: aws_sdk_ec2::Client,
    cloudformation: aws_sdk_cloudformation::Client,
    s3: aws_sdk_s3::Client,
    sns: aws_sdk_sns::Client,
    sqs: aws_sdk_sqs::Client,
}

impl AwsProvider {
    /// Load credentials from the default chain and target `region`.
    pub async fn from_region(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        info!("Using AWS provider in region {}", region);

        Self {
            region: region.to_string(),
            ec2: aws_sdk_ec2::Client::new(&config),
            cloudformation: aws_sdk_cloudformation::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            sns: aws_sdk_sns::Client::new(&config),
            sqs: aws_sdk_sqs::Client::new(&config),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

const VALIDATION_ERROR: &str = "ValidationError";
const STACK_ALREADY_EXISTS: &str = "AlreadyExistsException";
const ROUTE_ALREADY_EXISTS: &str = "RouteAlreadyExists";

fn sdk_error<E: std::error::Error>(operation: &str, error: E) -> ProviderError {
    ProviderError::api(operation, DisplayErrorContext(error).to_string())
}

fn has_code<E: ProvideErrorMetadata>(error: &E, code: &str) -> bool {
    error.code() == Some(code)
}

/// CloudFormation reports missing stacks and empty updates as validation
/// errors; only the message tells them apart.
fn is_validation_error<E: ProvideErrorMetadata>(error: &E, message: &str) -> bool {
    has_code(error, VALIDATION_ERROR) && error.message().is_some_and(|m| m.contains(message))
}

fn filter(name: &str, value: &str) -> Filter {
    Filter::builder().name(name).values(value).build()
}

fn stack_parameters(request: &StackRequest) -> Vec<Parameter> {
    request
        .parameters
        .iter()
        .map(|(key, value)| {
            Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

fn capabilities(request: &StackRequest) -> Vec<Capability> {
    request
        .capabilities
        .iter()
        .map(|c| Capability::from(c.as_str()))
        .collect()
}

#[async_trait]
impl CloudProvider for AwsProvider {
    async fn describe_zones(&self, region: &str) -> ProviderResult<Vec<AvailabilityZone>> {
        let output = self
            .ec2
            .describe_availability_zones()
            .filters(filter("region-name", region))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeAvailabilityZones", e))?;

        Ok(output
            .availability_zones()
            .iter()
            .filter_map(|zone| {
                let name = zone.zone_name()?;
                let state = zone
                    .state()
                    .map(|s| ZoneState::from_str(s.as_str()))
                    .unwrap_or(ZoneState::Unavailable);
                Some(AvailabilityZone::with_state(name, state))
            })
            .collect())
    }

    async fn zone_offers_instance_type(
        &self,
        zone: &str,
        instance_type: &str,
    ) -> ProviderResult<bool> {
        let output = self
            .ec2
            .describe_instance_type_offerings()
            .location_type(LocationType::AvailabilityZone)
            .filters(filter("location", zone))
            .filters(filter("instance-type", instance_type))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeInstanceTypeOfferings", e))?;

        Ok(!output.instance_type_offerings().is_empty())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> ProviderResult<String> {
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", e))?;

        Ok(format!("https://{}.s3.amazonaws.com/{}", bucket, key))
    }

    async fn describe_stack(&self, stack_name: &str) -> ProviderResult<Option<StackSummary>> {
        let output = match self
            .cloudformation
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if is_validation_error(&e, "does not exist") => return Ok(None),
            Err(e) => return Err(sdk_error("DescribeStacks", e)),
        };

        Ok(output.stacks().first().map(|stack| StackSummary {
            stack_id: stack.stack_id().unwrap_or_default().to_string(),
            stack_name: stack.stack_name().unwrap_or(stack_name).to_string(),
            status: stack
                .stack_status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
        }))
    }

    async fn create_stack(&self, request: &StackRequest) -> ProviderResult<String> {
        let output = self
            .cloudformation
            .create_stack()
            .stack_name(&request.stack_name)
            .set_template_url(request.template_url.clone())
            .set_template_body(request.template_body.clone())
            .set_parameters(Some(stack_parameters(request)))
            .set_capabilities(Some(capabilities(request)))
            .set_notification_arns(Some(request.notification_arns.clone()))
            .send()
            .await
            .map_err(|e| {
                if has_code(&e, STACK_ALREADY_EXISTS) {
                    ProviderError::AlreadyExists(request.stack_name.clone())
                } else {
                    sdk_error("CreateStack", e)
                }
            })?;

        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn update_stack(&self, request: &StackRequest) -> ProviderResult<String> {
        let output = self
            .cloudformation
            .update_stack()
            .stack_name(&request.stack_name)
            .set_template_url(request.template_url.clone())
            .set_template_body(request.template_body.clone())
            .set_parameters(Some(stack_parameters(request)))
            .set_capabilities(Some(capabilities(request)))
            .set_notification_arns(Some(request.notification_arns.clone()))
            .send()
            .await
            .map_err(|e| {
                if is_validation_error(&e, "No updates are to be performed") {
                    ProviderError::NoUpdates(request.stack_name.clone())
                } else {
                    sdk_error("UpdateStack", e)
                }
            })?;

        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn delete_stack(&self, stack_name: &str) -> ProviderResult<()> {
        self.cloudformation
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteStack", e))?;
        Ok(())
    }
}

#[async_trait]
impl StackEventSource for AwsProvider {
    async fn open_channel(&self, name: &str) -> ProviderResult<EventSubscription> {
        let topic = self
            .sns
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|e| sdk_error("CreateTopic", e))?;
        let topic_arn = topic
            .topic_arn()
            .ok_or_else(|| ProviderError::api("CreateTopic", "no topic ARN returned"))?
            .to_string();

        let queue = self
            .sqs
            .create_queue()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| sdk_error("CreateQueue", e))?;
        let queue_url = queue
            .queue_url()
            .ok_or_else(|| ProviderError::api("CreateQueue", "no queue URL returned"))?
            .to_string();

        let attributes = self
            .sqs
            .get_queue_attributes()
            .queue_url(&queue_url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| sdk_error("GetQueueAttributes", e))?;
        let queue_arn = attributes
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .cloned()
            .ok_or_else(|| ProviderError::api("GetQueueAttributes", "no queue ARN returned"))?;

        let policy = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "AllowTopicDelivery",
                "Effect": "Allow",
                "Principal": {"Service": "sns.amazonaws.com"},
                "Action": "sqs:SendMessage",
                "Resource": queue_arn,
                "Condition": {"ArnEquals": {"aws:SourceArn": topic_arn}}
            }]
        });

        self.sqs
            .set_queue_attributes()
            .queue_url(&queue_url)
            .attributes(QueueAttributeName::Policy, policy.to_string())
            .send()
            .await
            .map_err(|e| sdk_error("SetQueueAttributes", e))?;

        self.sns
            .subscribe()
            .topic_arn(&topic_arn)
            .protocol("sqs")
            .endpoint(&queue_arn)
            .send()
            .await
            .map_err(|e| sdk_error("Subscribe", e))?;

        debug!("Opened event channel {} ({} -> {})", name, topic_arn, queue_arn);

        Ok(EventSubscription {
            name: name.to_string(),
            topic_arn,
            queue_url,
            queue_arn,
        })
    }

    async fn receive(
        &self,
        subscription: &EventSubscription,
        wait: Duration,
        max_messages: usize,
    ) -> ProviderResult<Vec<ChannelMessage>> {
        // SQS caps long polls at 20 seconds and batches at 10 messages.
        let wait_seconds = wait.as_secs().min(20) as i32;
        let max_messages = max_messages.clamp(1, 10) as i32;

        let output = self
            .sqs
            .receive_message()
            .queue_url(&subscription.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_seconds)
            .send()
            .await
            .map_err(|e| sdk_error("ReceiveMessage", e))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(ChannelMessage::new(
                    m.receipt_handle()?,
                    m.body().unwrap_or_default(),
                ))
            })
            .collect())
    }

    async fn acknowledge(
        &self,
        subscription: &EventSubscription,
        receipt: &str,
    ) -> ProviderResult<()> {
        self.sqs
            .delete_message()
            .queue_url(&subscription.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteMessage", e))?;
        Ok(())
    }

    async fn close_channel(&self, subscription: &EventSubscription) -> ProviderResult<()> {
        self.sns
            .delete_topic()
            .topic_arn(&subscription.topic_arn)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteTopic", e))?;
        self.sqs
            .delete_queue()
            .queue_url(&subscription.queue_url)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteQueue", e))?;
        Ok(())
    }
}

#[async_trait]
impl NatApi for AwsProvider {
    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<InstanceDescription> {
        let output = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeInstances", e))?;

        let instance = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .ok_or_else(|| ProviderError::NotFound(instance_id.to_string()))?;

        Ok(InstanceDescription {
            instance_id: instance_id.to_string(),
            vpc_id: instance
                .vpc_id()
                .ok_or_else(|| ProviderError::NotFound(format!("VPC of {}", instance_id)))?
                .to_string(),
            availability_zone: instance
                .placement()
                .and_then(|p| p.availability_zone())
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn find_subnets(
        &self,
        vpc_id: &str,
        availability_zone: &str,
        tag_key: &str,
        tag_value: &str,
    ) -> ProviderResult<Vec<String>> {
        let output = self
            .ec2
            .describe_subnets()
            .filters(filter("vpc-id", vpc_id))
            .filters(filter("availability-zone", availability_zone))
            .filters(filter(&format!("tag:{}", tag_key), tag_value))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeSubnets", e))?;

        Ok(output
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_id().map(str::to_string))
            .collect())
    }

    async fn route_table_for_subnet(
        &self,
        subnet_id: &str,
    ) -> ProviderResult<Option<RouteTableAssociation>> {
        let output = self
            .ec2
            .describe_route_tables()
            .filters(filter("association.subnet-id", subnet_id))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeRouteTables", e))?;

        Ok(output.route_tables().first().and_then(|table| {
            let route_table_id = table.route_table_id()?.to_string();
            let main = table
                .associations()
                .iter()
                .filter(|a| a.subnet_id() == Some(subnet_id))
                .any(|a| a.main().unwrap_or(false));
            Some(RouteTableAssociation {
                route_table_id,
                subnet_id: subnet_id.to_string(),
                main,
            })
        }))
    }

    async fn main_route_table(&self, vpc_id: &str) -> ProviderResult<Option<String>> {
        let output = self
            .ec2
            .describe_route_tables()
            .filters(filter("vpc-id", vpc_id))
            .filters(filter("association.main", "true"))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeRouteTables", e))?;

        Ok(output
            .route_tables()
            .first()
            .and_then(|t| t.route_table_id())
            .map(str::to_string))
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        self.ec2
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination_cidr)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| {
                if has_code(&e, ROUTE_ALREADY_EXISTS) {
                    ProviderError::AlreadyExists(format!(
                        "route {} in {}",
                        destination_cidr, route_table_id
                    ))
                } else {
                    sdk_error("CreateRoute", e)
                }
            })?;
        Ok(())
    }

    async fn replace_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        self.ec2
            .replace_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination_cidr)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| sdk_error("ReplaceRoute", e))?;
        Ok(())
    }

    async fn disable_source_dest_check(&self, instance_id: &str) -> ProviderResult<()> {
        self.ec2
            .modify_instance_attribute()
            .instance_id(instance_id)
            .source_dest_check(AttributeBooleanValue::builder().value(false).build())
            .send()
            .await
            .map_err(|e| sdk_error("ModifyInstanceAttribute", e))?;
        Ok(())
    }
}
