//! Lifecycle extension points.
//!
//! Each action is wrapped by a pre/post pair; every method defaults to a
//! no-op. A hook error aborts the action. Files already written stay where
//! they are.

use async_trait::async_trait;

use crate::context::EnvironmentContext;
use crate::error::CoreResult;
use crate::monitor::StackEvent;

#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Runs after the network is generated and before composition. May
    /// change `ctx.config`.
    async fn pre_create(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        Ok(())
    }

    /// Runs after composition and before templates are written.
    async fn post_create(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        Ok(())
    }

    async fn pre_deploy(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        Ok(())
    }

    async fn post_deploy(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        Ok(())
    }

    async fn pre_delete(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        Ok(())
    }

    async fn post_delete(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        Ok(())
    }

    /// Called for every stack event while monitoring. Return `true` to stop.
    ///
    /// The default stops once the monitored stack itself completes.
    fn on_stack_event(&self, event: &StackEvent, ctx: &EnvironmentContext) -> bool {
        event.is_stack_level(&ctx.stack_name) && event.is_success_terminal()
    }
}

/// Hooks that do nothing beyond the default behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl LifecycleHooks for NoopHooks {}
