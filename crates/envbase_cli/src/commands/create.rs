//! Create command - compose and publish templates.

use anyhow::Result;
use clap::Args;
use envbase_core::{Action, ActionOutcome};

use super::GlobalArgs;

#[derive(Args)]
pub struct CreateArgs {
    /// Write templates locally without uploading them
    #[arg(long)]
    no_upload: bool,
}

pub async fn execute(global: &GlobalArgs, args: CreateArgs) -> Result<()> {
    let mut extra = Vec::new();
    if args.no_upload {
        extra.push(("template", "upload_templates", "false".to_string()));
    }

    if let ActionOutcome::Created(report) = global.run(Action::Create, &extra).await? {
        println!("Parent template: {}", report.parent_path.display());
        for path in &report.child_paths {
            println!("Child template:  {}", path.display());
        }
        println!("Bindings:        {}", report.bindings_path.display());
        for url in &report.uploaded {
            println!("Uploaded:        {}", url);
        }
    }
    Ok(())
}
