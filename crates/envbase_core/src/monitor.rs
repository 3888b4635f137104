//! Stack event monitoring.
//!
//! The provider publishes stack events to a notification topic whose queue
//! this module long-polls. Each queue message is an envelope whose `Message`
//! field holds `Key='value'` lines; those are normalized into [`StackEvent`]s
//! and handed to [`LifecycleHooks::on_stack_event`].
//!
//! The loop stops when the hook returns `true`, when the monitored stack
//! reports a failure or rollback status, or when the timeout elapses.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use envbase_config::ConfigTree;
use envbase_provider::{EventSubscription, StackEventSource};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::EnvironmentContext;
use crate::error::{CoreError, CoreResult};
use crate::hooks::LifecycleHooks;

pub const STACK_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";
pub const MAX_MESSAGES_PER_POLL: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Statuses after which the stack will not make progress on its own.
pub const TERMINAL_FAILURE_STATES: &[&str] = &[
    "CREATE_FAILED",
    "ROLLBACK_COMPLETE",
    "ROLLBACK_FAILED",
    "UPDATE_FAILED",
    "UPDATE_ROLLBACK_COMPLETE",
    "UPDATE_ROLLBACK_FAILED",
    "DELETE_FAILED",
];

pub const TERMINAL_SUCCESS_STATES: &[&str] =
    &["CREATE_COMPLETE", "UPDATE_COMPLETE", "DELETE_COMPLETE"];

/// One normalized stack event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEvent {
    pub stack_name: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub name: Option<String>,
    pub reason: Option<String>,
    /// Parsed as JSON when possible, otherwise the raw string.
    pub props: Value,
}

impl StackEvent {
    /// An event about the stack `stack_name` itself rather than one of its resources.
    pub fn is_stack_level(&self, stack_name: &str) -> bool {
        self.resource_type.as_deref() == Some(STACK_RESOURCE_TYPE)
            && self.name.as_deref() == Some(stack_name)
    }

    pub fn is_terminal_failure(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| TERMINAL_FAILURE_STATES.contains(&s))
    }

    pub fn is_success_terminal(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| TERMINAL_SUCCESS_STATES.contains(&s))
    }
}

fn pair_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\S+)=('.*?'|\S+)").ok())
        .as_ref()
}

/// Normalize a raw queue message body.
///
/// Bodies that are not a notification envelope are parsed as the message
/// text itself. Returns `None` when no `Key=value` pairs are present.
pub fn parse_stack_message(body: &str) -> Option<StackEvent> {
    let envelope: Option<Value> = serde_json::from_str(body).ok();
    let message = envelope
        .as_ref()
        .and_then(|v| v.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or(body);

    let mut pairs = std::collections::HashMap::new();
    for capture in pair_pattern()?.captures_iter(message) {
        let key = capture[1].to_string();
        let value = capture[2].trim_matches('\'').to_string();
        pairs.insert(key, value);
    }
    if pairs.is_empty() {
        return None;
    }

    let props = match pairs.remove("ResourceProperties") {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        None => Value::Null,
    };

    Some(StackEvent {
        stack_name: pairs.remove("StackName"),
        status: pairs.remove("ResourceStatus"),
        resource_type: pairs.remove("ResourceType"),
        name: pairs.remove("LogicalResourceId"),
        reason: pairs.remove("ResourceStatusReason"),
        props,
    })
}

/// Channel name for one monitoring session: `<env>_<YYYYmmdd-HHMMSS>_<suffix>`.
pub fn channel_name(environment_name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        environment_name,
        Utc::now().format("%Y%m%d-%H%M%S"),
        &suffix[..5]
    )
}

/// Why monitoring stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// The hook returned `true`.
    Hook,
    /// The stack reported a failure or rollback status.
    StackFailed { status: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOutcome {
    pub termination: Termination,
    pub events_seen: usize,
    pub last_event: Option<StackEvent>,
}

/// Bounded long-poll loop over a stack event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMonitor {
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for StackMonitor {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl StackMonitor {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Read `global.monitor_timeout_seconds` and `global.monitor_poll_interval_seconds`.
    pub fn from_config(config: &ConfigTree) -> Self {
        Self::new(
            Duration::from_secs(
                config
                    .get_u64("global", "monitor_timeout_seconds")
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            Duration::from_secs(
                config
                    .get_u64("global", "monitor_poll_interval_seconds")
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll until a terminal condition or the timeout.
    pub async fn watch(
        &self,
        source: &dyn StackEventSource,
        subscription: &EventSubscription,
        hooks: &dyn LifecycleHooks,
        ctx: &EnvironmentContext,
    ) -> CoreResult<MonitorOutcome> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut events_seen = 0;

        info!(stack = %ctx.stack_name, channel = %subscription.name, "Monitoring stack events");

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::MonitorTimeout {
                    stack: ctx.stack_name.clone(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            let wait = self.poll_interval.min(deadline - now);

            let messages = source
                .receive(subscription, wait, MAX_MESSAGES_PER_POLL)
                .await?;

            for message in messages {
                source.acknowledge(subscription, &message.receipt).await?;

                let Some(event) = parse_stack_message(&message.body) else {
                    warn!(receipt = %message.receipt, "Ignoring unparseable stack event");
                    continue;
                };
                events_seen += 1;
                debug!(
                    status = ?event.status,
                    resource_type = ?event.resource_type,
                    name = ?event.name,
                    reason = ?event.reason,
                    "Stack event"
                );

                if hooks.on_stack_event(&event, ctx) {
                    info!(events = events_seen, "Monitoring complete");
                    return Ok(MonitorOutcome {
                        termination: Termination::Hook,
                        events_seen,
                        last_event: Some(event),
                    });
                }

                if event.is_stack_level(&ctx.stack_name) && event.is_terminal_failure() {
                    let status = event.status.clone().unwrap_or_default();
                    let reason = event.reason.clone().unwrap_or_default();
                    warn!(stack = %ctx.stack_name, %status, %reason, "Stack reached a failure state");
                    return Ok(MonitorOutcome {
                        termination: Termination::StackFailed { status, reason },
                        events_seen,
                        last_event: Some(event),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(message: &str) -> String {
        serde_json::json!({ "Type": "Notification", "Message": message }).to_string()
    }

    #[test]
    fn test_parse_envelope() {
        let body = envelope(
            "StackId='arn:aws:cloudformation:us-east-1:1:stack/demo/1'\n\
             StackName='demo'\n\
             LogicalResourceId='demo'\n\
             ResourceStatus='CREATE_COMPLETE'\n\
             ResourceType='AWS::CloudFormation::Stack'\n\
             ResourceStatusReason=''\n\
             ResourceProperties='{\"CidrBlock\": \"10.0.0.0/16\"}'\n",
        );
        let event = parse_stack_message(&body).unwrap();

        assert_eq!(event.stack_name.as_deref(), Some("demo"));
        assert_eq!(event.status.as_deref(), Some("CREATE_COMPLETE"));
        assert_eq!(event.reason.as_deref(), Some(""));
        assert_eq!(event.props["CidrBlock"], "10.0.0.0/16");
        assert!(event.is_stack_level("demo"));
        assert!(event.is_success_terminal());
    }

    #[test]
    fn test_parse_keeps_unparseable_props_as_string() {
        let event = parse_stack_message(
            "ResourceStatus=CREATE_IN_PROGRESS ResourceProperties='not json'",
        )
        .unwrap();
        assert_eq!(event.props, Value::String("not json".to_string()));
        assert!(!event.is_terminal_failure());
    }

    #[test]
    fn test_parse_rejects_empty_message() {
        assert!(parse_stack_message(&envelope("")).is_none());
    }

    #[test]
    fn test_rollback_is_terminal_failure() {
        let event = parse_stack_message("ResourceStatus='UPDATE_ROLLBACK_COMPLETE'").unwrap();
        assert!(event.is_terminal_failure());
        assert!(!event.is_success_terminal());
    }

    #[test]
    fn test_channel_name_shape() {
        let name = channel_name("demo");
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "demo");
        assert_eq!(parts[1].len(), 15);
        assert_eq!(parts[2].len(), 5);
    }
}
