//! Init command - write configuration defaults.

use anyhow::Result;
use clap::Args;
use envbase_core::{Action, ActionOutcome, EnvironmentController, PatternRegistry};

use super::GlobalArgs;

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite existing configuration and AMI cache files
    #[arg(short, long)]
    force: bool,
}

pub async fn execute(global: &GlobalArgs, args: InitArgs) -> Result<()> {
    let options = global.options(&[])?.with_force(args.force);
    let region = options.region(&PatternRegistry::builtin())?;
    let (provider, events) = global.providers(Action::Init, &region).await?;
    let outcome = EnvironmentController::new(provider, events, options)
        .run(Action::Init)
        .await?;

    if let ActionOutcome::Initialized(report) = outcome {
        let status = |wrote: bool| if wrote { "written" } else { "kept" };
        println!(
            "Configuration {}: {}",
            status(report.wrote_config),
            report.config_path.display()
        );
        println!(
            "AMI cache {}: {}",
            status(report.wrote_ami_cache),
            report.ami_cache_path.display()
        );
        println!();
        println!("Next steps:");
        println!("  set template.ec2_key_default and template.s3_bucket, then run `envbase create`");
    }
    Ok(())
}
