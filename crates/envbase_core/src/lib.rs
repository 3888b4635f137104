//! # envbase_core
//!
//! Lifecycle orchestration for envbase environments.
//!
//! ## Features
//!
//! - `init`, `create`, `deploy` and `delete` actions over a pluggable provider
//! - Pre/post lifecycle hooks with explicit per-run context
//! - Pattern registry driven by `template.patterns`
//! - Bounded stack event monitoring over a notification channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use envbase_core::{Action, ControllerOptions, EnvironmentController};
//! use envbase_provider::MockProvider;
//!
//! # async fn example() -> envbase_core::CoreResult<()> {
//! let provider = Arc::new(MockProvider::dry_run("us-east-1"));
//! let controller = EnvironmentController::new(
//!     provider.clone(),
//!     provider,
//!     ControllerOptions::new("config.json"),
//! );
//! let outcome = controller.run(Action::Create).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod context;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod monitor;
pub mod registry;

pub use action::Action;
pub use context::EnvironmentContext;
pub use controller::{ActionOutcome, ControllerOptions, EnvironmentController};
pub use error::{CoreError, CoreResult};
pub use hooks::{LifecycleHooks, NoopHooks};
pub use monitor::{
    channel_name, parse_stack_message, MonitorOutcome, StackEvent, StackMonitor, Termination,
};
pub use registry::PatternRegistry;
