//! Data exchanged with the cloud provider.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Availability state reported for a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneState {
    Available,
    Information,
    Impaired,
    Unavailable,
}

impl ZoneState {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "available" => Self::Available,
            "information" => Self::Information,
            "impaired" => Self::Impaired,
            _ => Self::Unavailable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Information => "information",
            Self::Impaired => "impaired",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for ZoneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A zone as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub name: String,
    pub state: ZoneState,
}

impl AvailabilityZone {
    pub fn available(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ZoneState::Available,
        }
    }

    pub fn with_state(name: impl Into<String>, state: ZoneState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == ZoneState::Available
    }
}

/// Parameters for a stack create or update call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_url: Option<String>,
    pub template_body: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
    pub notification_arns: Vec<String>,
}

impl StackRequest {
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            capabilities: vec!["CAPABILITY_IAM".to_string()],
            ..Default::default()
        }
    }

    pub fn with_template_url(mut self, url: impl Into<String>) -> Self {
        self.template_url = Some(url.into());
        self.template_body = None;
        self
    }

    pub fn with_template_body(mut self, body: impl Into<String>) -> Self {
        self.template_body = Some(body.into());
        self.template_url = None;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn with_notification_arn(mut self, arn: impl Into<String>) -> Self {
        self.notification_arns.push(arn.into());
        self
    }
}

/// Current state of a deployed stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSummary {
    pub stack_id: String,
    pub stack_name: String,
    pub status: String,
}

/// A notification topic and the queue subscribed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub name: String,
    pub topic_arn: String,
    pub queue_url: String,
    pub queue_arn: String,
}

/// A raw message pulled from the event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub receipt: String,
    pub body: String,
}

impl ChannelMessage {
    pub fn new(receipt: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            receipt: receipt.into(),
            body: body.into(),
        }
    }
}

/// What the failover controller needs to know about an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
}

/// A subnet's route table association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableAssociation {
    pub route_table_id: String,
    pub subnet_id: String,
    /// Whether the associated table is the VPC's main route table.
    pub main: bool,
}
