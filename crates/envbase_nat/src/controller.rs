//! Route takeover for a freshly started NAT instance.
//!
//! The controller runs once per boot. It configures the host for
//! forwarding and masquerading, finds the private subnets in its own zone and
//! points their default route at itself. Any failing step is reported as
//! [`NatError::RouteTakeover`] naming the stage. Re-running is safe: existing
//! rules and routes are accepted or replaced.

use std::sync::Arc;

use envbase_provider::{NatApi, ProviderError};
use tracing::{debug, info, warn};

use crate::error::{NatError, NatResult};
use crate::host::{ensure_masquerade, HostNetwork};
use crate::metadata::{instance_identity, vpc_cidr, MetadataSource};

pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";
pub const DEFAULT_TAG_KEY: &str = "network";
pub const DEFAULT_TAG_VALUE: &str = "private";
pub const DEFAULT_INTERFACE: &str = "eth0";

/// Steps of a takeover, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverStage {
    HostSetup,
    Discovery,
    Subnets,
    Routes,
    SourceDestCheck,
}

impl TakeoverStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostSetup => "host_setup",
            Self::Discovery => "discovery",
            Self::Subnets => "subnets",
            Self::Routes => "routes",
            Self::SourceDestCheck => "source_dest_check",
        }
    }

    fn fail(self) -> impl FnOnce(NatError) -> NatError {
        move |e| NatError::takeover(self.as_str(), e.to_string())
    }
}

impl std::fmt::Display for TakeoverStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which subnets to take over and which interface faces outward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverSettings {
    pub tag_key: String,
    pub tag_value: String,
    pub interface: String,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            tag_key: DEFAULT_TAG_KEY.to_string(),
            tag_value: DEFAULT_TAG_VALUE.to_string(),
            interface: DEFAULT_INTERFACE.to_string(),
        }
    }
}

impl FailoverSettings {
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tag_key = key.into();
        self.tag_value = value.into();
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }
}

/// What happened to one subnet's default route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Created,
    Replaced,
    /// The subnet uses the VPC's main route table, which is left alone.
    SkippedMainTable,
    SkippedNoAssociation,
}

impl RouteOutcome {
    pub fn is_taken(&self) -> bool {
        matches!(self, Self::Created | Self::Replaced)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRoute {
    pub subnet_id: String,
    pub route_table_id: Option<String>,
    pub outcome: RouteOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeoverReport {
    pub instance_id: String,
    pub region: String,
    pub availability_zone: String,
    pub vpc_id: String,
    /// Source range being masqueraded.
    pub masquerade_cidr: String,
    /// The VPC range could not be discovered and everything is masqueraded.
    pub degraded: bool,
    pub routes: Vec<SubnetRoute>,
}

impl TakeoverReport {
    pub fn routes_taken(&self) -> usize {
        self.routes.iter().filter(|r| r.outcome.is_taken()).count()
    }
}

pub struct FailoverController {
    metadata: Arc<dyn MetadataSource>,
    host: Arc<dyn HostNetwork>,
    api: Arc<dyn NatApi>,
    settings: FailoverSettings,
}

impl FailoverController {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        host: Arc<dyn HostNetwork>,
        api: Arc<dyn NatApi>,
    ) -> Self {
        Self {
            metadata,
            host,
            api,
            settings: FailoverSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: FailoverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &FailoverSettings {
        &self.settings
    }

    pub async fn run(&self) -> NatResult<TakeoverReport> {
        let (masquerade_cidr, degraded) = self.masquerade_range().await;

        self.configure_host(&masquerade_cidr)
            .map_err(TakeoverStage::HostSetup.fail())?;

        let identity = instance_identity(self.metadata.as_ref())
            .await
            .map_err(TakeoverStage::Discovery.fail())?;
        let instance = self
            .api
            .describe_instance(&identity.instance_id)
            .await
            .map_err(NatError::from)
            .map_err(TakeoverStage::Discovery.fail())?;
        info!(
            instance = %identity.instance_id,
            vpc = %instance.vpc_id,
            zone = %identity.availability_zone,
            region = %identity.region,
            "Instance discovered"
        );

        let subnets = self
            .api
            .find_subnets(
                &instance.vpc_id,
                &identity.availability_zone,
                &self.settings.tag_key,
                &self.settings.tag_value,
            )
            .await
            .map_err(NatError::from)
            .map_err(TakeoverStage::Subnets.fail())?;
        if subnets.is_empty() {
            return Err(NatError::takeover(
                TakeoverStage::Subnets.as_str(),
                format!(
                    "no subnets tagged {}={} in {} ({})",
                    self.settings.tag_key,
                    self.settings.tag_value,
                    instance.vpc_id,
                    identity.availability_zone
                ),
            ));
        }
        debug!(subnets = ?subnets, "Private subnets found");

        let main_table = self
            .api
            .main_route_table(&instance.vpc_id)
            .await
            .map_err(NatError::from)
            .map_err(TakeoverStage::Routes.fail())?;

        let mut routes = Vec::with_capacity(subnets.len());
        for subnet_id in subnets {
            let route = self
                .take_route(&subnet_id, main_table.as_deref(), &identity.instance_id)
                .await
                .map_err(TakeoverStage::Routes.fail())?;
            routes.push(route);
        }

        self.api
            .disable_source_dest_check(&identity.instance_id)
            .await
            .map_err(NatError::from)
            .map_err(TakeoverStage::SourceDestCheck.fail())?;

        let report = TakeoverReport {
            instance_id: identity.instance_id,
            region: identity.region,
            availability_zone: identity.availability_zone,
            vpc_id: instance.vpc_id,
            masquerade_cidr,
            degraded,
            routes,
        };
        info!(
            routes = report.routes_taken(),
            subnets = report.routes.len(),
            "Route takeover complete"
        );
        Ok(report)
    }

    /// VPC range to masquerade, or everything when metadata is unavailable.
    async fn masquerade_range(&self) -> (String, bool) {
        match vpc_cidr(self.metadata.as_ref()).await {
            Ok(cidr) => (cidr, false),
            Err(e) => {
                warn!(
                    "VPC CIDR unavailable ({}); masquerading {} instead. \
                     This NAT will forward traffic from ANY source until it is restarted with metadata access.",
                    e, DEFAULT_ROUTE
                );
                (DEFAULT_ROUTE.to_string(), true)
            }
        }
    }

    fn configure_host(&self, masquerade_cidr: &str) -> NatResult<()> {
        let interface = &self.settings.interface;
        self.host.enable_ip_forwarding(interface)?;
        ensure_masquerade(self.host.as_ref(), interface, masquerade_cidr)?;
        Ok(())
    }

    async fn take_route(
        &self,
        subnet_id: &str,
        main_table: Option<&str>,
        instance_id: &str,
    ) -> NatResult<SubnetRoute> {
        let Some(association) = self.api.route_table_for_subnet(subnet_id).await? else {
            warn!(subnet = subnet_id, "Subnet has no route table association, skipping");
            return Ok(SubnetRoute {
                subnet_id: subnet_id.to_string(),
                route_table_id: None,
                outcome: RouteOutcome::SkippedNoAssociation,
            });
        };
        let table = association.route_table_id;

        if association.main || main_table == Some(table.as_str()) {
            warn!(subnet = subnet_id, table = %table, "Subnet uses the main route table, skipping");
            return Ok(SubnetRoute {
                subnet_id: subnet_id.to_string(),
                route_table_id: Some(table),
                outcome: RouteOutcome::SkippedMainTable,
            });
        }

        let outcome = match self.api.create_route(&table, DEFAULT_ROUTE, instance_id).await {
            Ok(()) => RouteOutcome::Created,
            Err(ProviderError::AlreadyExists(_)) => {
                self.api
                    .replace_route(&table, DEFAULT_ROUTE, instance_id)
                    .await?;
                RouteOutcome::Replaced
            }
            Err(e) => return Err(e.into()),
        };
        info!(subnet = subnet_id, table = %table, outcome = ?outcome, "Default route points at this instance");

        Ok(SubnetRoute {
            subnet_id: subnet_id.to_string(),
            route_table_id: Some(table),
            outcome,
        })
    }
}
