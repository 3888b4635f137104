//! Deploy command - create or update the stack.

use anyhow::Result;
use clap::Args;
use envbase_core::{Action, ActionOutcome};

use super::GlobalArgs;

#[derive(Args)]
pub struct DeployArgs {
    /// Follow stack events until the stack settles (global.monitor_stack)
    #[arg(long)]
    monitor: bool,
}

pub async fn execute(global: &GlobalArgs, args: DeployArgs) -> Result<()> {
    let mut extra = Vec::new();
    if args.monitor {
        extra.push(("global", "monitor_stack", "true".to_string()));
    }

    if let ActionOutcome::Deployed {
        stack_name,
        stack_id,
        no_updates,
        monitor,
    } = global.run(Action::Deploy, &extra).await?
    {
        if no_updates {
            println!("Stack {} is up to date ({})", stack_name, stack_id);
        } else {
            println!("Stack {} submitted ({})", stack_name, stack_id);
        }
        if let Some(monitor) = monitor {
            let status = monitor
                .last_event
                .and_then(|event| event.status)
                .unwrap_or_else(|| "unknown".to_string());
            println!("Monitoring finished after {} events: {}", monitor.events_seen, status);
        }
    }
    Ok(())
}
