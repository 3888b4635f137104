//! envbase-ha-nat - route takeover run by NAT instances at boot.
//!
//! Exit codes:
//! - 0: Routes taken over
//! - 1: Takeover failed

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use envbase_nat::{
    instance_identity, FailoverController, FailoverSettings, ImdsClient, MetadataSource,
    SystemHostNetwork,
};
use envbase_provider::NatApi;
use tracing::info;

mod logging;

use logging::LogSettings;

/// Point private subnet default routes at this NAT instance
#[derive(Parser)]
#[command(name = "envbase-ha-nat")]
#[command(version, about = "Point private subnet default routes at this NAT instance")]
struct Args {
    /// Subnet tag key identifying the subnets to take over
    #[arg(long, default_value = "network")]
    tag_key: String,

    /// Subnet tag value identifying the subnets to take over
    #[arg(long, default_value = "private")]
    tag_value: String,

    /// Outbound interface used for masquerading
    #[arg(long, default_value = "eth0")]
    interface: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit JSON logs
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&LogSettings {
        json: args.json,
        ..LogSettings::default().with_debug(args.debug)
    });

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let metadata: Arc<dyn MetadataSource> =
        Arc::new(ImdsClient::new().context("Failed to build metadata client")?);
    let identity = instance_identity(metadata.as_ref())
        .await
        .context("Failed to read instance identity")?;
    let api = nat_api(&identity.region).await?;

    let settings = FailoverSettings::default()
        .with_tag(args.tag_key, args.tag_value)
        .with_interface(args.interface);
    let report = FailoverController::new(metadata, Arc::new(SystemHostNetwork), api)
        .with_settings(settings)
        .run()
        .await?;

    for route in &report.routes {
        info!(
            subnet = %route.subnet_id,
            table = ?route.route_table_id,
            outcome = ?route.outcome,
            "Subnet route"
        );
    }
    println!(
        "Instance {} took over {} of {} private subnet routes in {}",
        report.instance_id,
        report.routes_taken(),
        report.routes.len(),
        report.availability_zone
    );
    Ok(())
}

#[cfg(feature = "aws")]
async fn nat_api(region: &str) -> Result<Arc<dyn NatApi>> {
    Ok(Arc::new(
        envbase_provider::AwsProvider::from_region(region).await,
    ))
}

#[cfg(not(feature = "aws"))]
async fn nat_api(region: &str) -> Result<Arc<dyn NatApi>> {
    anyhow::bail!(
        "envbase-ha-nat was built without the `aws` feature; cannot manage routes in {}",
        region
    )
}
