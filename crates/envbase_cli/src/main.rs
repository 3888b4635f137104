//! envbase CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Configuration error
//! - 3: Network error
//! - 4: Template error
//! - 5: Provider error
//! - 6: Stack monitoring error

use std::process::ExitCode;

use clap::Parser;
use envbase_core::CoreError;

mod commands;
mod logging;

use commands::{Cli, Commands};
use logging::LogSettings;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const CONFIG_ERROR: u8 = 2;
    pub const NETWORK_ERROR: u8 = 3;
    pub const TEMPLATE_ERROR: u8 = 4;
    pub const PROVIDER_ERROR: u8 = 5;
    pub const MONITOR_ERROR: u8 = 6;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&LogSettings::from_config_file(&cli.global.config_file).with_debug(cli.global.debug));

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(&cli.global, args).await,
        Commands::Create(args) => commands::create::execute(&cli.global, args).await,
        Commands::Deploy(args) => commands::deploy::execute(&cli.global, args).await,
        Commands::Delete(args) => commands::delete::execute(&cli.global, args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Map the underlying lifecycle error to an exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    let Some(core) = e.chain().find_map(|cause| cause.downcast_ref::<CoreError>()) else {
        return ExitCodes::GENERAL_ERROR;
    };

    match core {
        CoreError::Config(_) => ExitCodes::CONFIG_ERROR,
        CoreError::Network(_) => ExitCodes::NETWORK_ERROR,
        CoreError::Template(_) | CoreError::MissingTemplate(_) => ExitCodes::TEMPLATE_ERROR,
        CoreError::Provider(_) => ExitCodes::PROVIDER_ERROR,
        CoreError::MonitorTimeout { .. } | CoreError::StackFailed { .. } => {
            ExitCodes::MONITOR_ERROR
        }
        CoreError::Hook { .. } | CoreError::Io(_) | CoreError::Serialization(_) => {
            ExitCodes::GENERAL_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_categorize_core_errors() {
        let err: anyhow::Error = CoreError::MonitorTimeout {
            stack: "demo".to_string(),
            waited_secs: 3600,
        }
        .into();
        assert_eq!(categorize_error(&err), ExitCodes::MONITOR_ERROR);

        let err = Err::<(), _>(CoreError::MissingTemplate("demo.template".into()))
            .context("deploy failed")
            .unwrap_err();
        assert_eq!(categorize_error(&err), ExitCodes::TEMPLATE_ERROR);

        let err = Err::<(), _>(CoreError::from(
            envbase_provider::ProviderError::NotFound("demo".to_string()),
        ))
        .context("delete failed")
        .unwrap_err();
        assert_eq!(categorize_error(&err), ExitCodes::PROVIDER_ERROR);
    }

    #[test]
    fn test_other_errors_are_general() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(categorize_error(&err), ExitCodes::GENERAL_ERROR);
    }
}
