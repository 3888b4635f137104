//! Delete command - remove the stack.

use anyhow::Result;
use clap::Args;
use envbase_core::{Action, ActionOutcome};

use super::GlobalArgs;

#[derive(Args)]
pub struct DeleteArgs {}

pub async fn execute(global: &GlobalArgs, _args: DeleteArgs) -> Result<()> {
    if let ActionOutcome::Deleted { stack_name } = global.run(Action::Delete, &[]).await? {
        println!("Deletion of stack {} requested", stack_name);
    }
    Ok(())
}
