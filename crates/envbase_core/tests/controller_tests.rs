//! Integration tests for the lifecycle controller.
//!
//! Every test runs against the mock provider in its own temporary directory
//! with an explicit, empty environment snapshot.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use envbase_config::CliOverrides;
use envbase_core::{
    Action, ActionOutcome, ControllerOptions, CoreError, CoreResult, EnvironmentContext,
    EnvironmentController, LifecycleHooks, Termination,
};
use envbase_provider::{ChannelMessage, MockProvider};
use serde_json::json;
use tempfile::{tempdir, TempDir};

/// Hooks that record the order they ran in.
#[derive(Default)]
struct RecordingHooks {
    calls: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingHooks {
    fn failing(hook: &'static str) -> Self {
        Self {
            fail_on: Some(hook),
            ..Default::default()
        }
    }

    fn record(&self, hook: &str) -> CoreResult<()> {
        self.calls.lock().unwrap().push(hook.to_string());
        if self.fail_on == Some(hook) {
            return Err(CoreError::hook(hook, "refused"));
        }
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LifecycleHooks for RecordingHooks {
    async fn pre_create(&self, ctx: &mut EnvironmentContext) -> CoreResult<()> {
        assert!(ctx.layout.is_some());
        self.record("pre_create")
    }

    async fn post_create(&self, ctx: &mut EnvironmentContext) -> CoreResult<()> {
        assert!(ctx.composed.is_some());
        self.record("post_create")
    }

    async fn pre_deploy(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        self.record("pre_deploy")
    }

    async fn post_deploy(&self, ctx: &mut EnvironmentContext) -> CoreResult<()> {
        assert!(ctx.stack_id.is_some());
        self.record("post_deploy")
    }

    async fn pre_delete(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        self.record("pre_delete")
    }

    async fn post_delete(&self, _ctx: &mut EnvironmentContext) -> CoreResult<()> {
        self.record("post_delete")
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.json")
    }

    fn output_path(&self) -> PathBuf {
        self.dir.path().join("demo.template")
    }

    fn write_config(&self, extra_global: serde_json::Value) -> &Self {
        let mut global = json!({
            "environment_name": "demo",
            "output": self.output_path().to_string_lossy(),
            "monitor_poll_interval_seconds": 1,
            "monitor_timeout_seconds": 5
        });
        if let (Some(target), Some(extra)) = (global.as_object_mut(), extra_global.as_object()) {
            for (key, value) in extra {
                target.insert(key.clone(), value.clone());
            }
        }
        let config = json!({
            "global": global,
            "template": {"ec2_key_default": "ops-key", "s3_bucket": "demo-bucket"}
        });
        std::fs::write(
            self.config_path(),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();
        self
    }

    fn options(&self) -> ControllerOptions {
        ControllerOptions::new(self.config_path())
            .with_env_vars(Vec::<(String, String)>::new())
    }
}

fn controller(
    provider: &Arc<MockProvider>,
    options: ControllerOptions,
    hooks: Arc<RecordingHooks>,
) -> EnvironmentController {
    EnvironmentController::new(provider.clone(), provider.clone(), options).with_hooks(hooks)
}

fn stack_event(receipt: &str, logical_id: &str, resource_type: &str, status: &str) -> ChannelMessage {
    let message = format!(
        "StackName='demo'\nLogicalResourceId='{}'\nResourceType='{}'\nResourceStatus='{}'\nResourceStatusReason='test'\n",
        logical_id, resource_type, status
    );
    ChannelMessage::new(
        receipt,
        json!({"Type": "Notification", "Message": message}).to_string(),
    )
}

#[tokio::test]
async fn test_init_writes_bootstrap_files() {
    let ws = Workspace::new();
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));
    let hooks = Arc::new(RecordingHooks::default());

    let outcome = controller(&provider, ws.options(), hooks.clone())
        .run(Action::Init)
        .await
        .unwrap();

    let ActionOutcome::Initialized(report) = outcome else {
        panic!("expected init outcome, got {:?}", outcome);
    };
    assert!(report.wrote_config);
    assert!(report.wrote_ami_cache);
    assert!(Path::exists(&ws.config_path()));
    assert!(provider.get_calls().is_empty());
    assert!(hooks.calls().is_empty());
}

#[tokio::test]
async fn test_init_keeps_existing_config_unless_forced() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));

    let outcome = controller(&provider, ws.options(), Arc::default())
        .run(Action::Init)
        .await
        .unwrap();
    assert!(matches!(outcome, ActionOutcome::Initialized(ref r) if !r.wrote_config));

    let outcome = controller(&provider, ws.options().with_force(true), Arc::default())
        .run(Action::Init)
        .await
        .unwrap();
    assert!(matches!(outcome, ActionOutcome::Initialized(ref r) if r.wrote_config));
}

#[tokio::test]
async fn test_missing_config_halts_without_provider_calls() {
    let ws = Workspace::new();
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));
    let hooks = Arc::new(RecordingHooks::default());

    let outcome = controller(&provider, ws.options(), hooks.clone())
        .run(Action::Create)
        .await
        .unwrap();

    assert!(matches!(outcome, ActionOutcome::Halted { ref config_path } if config_path == &ws.config_path()));
    assert!(Path::exists(&ws.config_path()));
    assert!(provider.get_calls().is_empty());
    assert!(hooks.calls().is_empty());
}

#[tokio::test]
async fn test_create_publishes_templates() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));
    let hooks = Arc::new(RecordingHooks::default());

    let outcome = controller(&provider, ws.options(), hooks.clone())
        .run(Action::Create)
        .await
        .unwrap();

    let ActionOutcome::Created(report) = outcome else {
        panic!("expected create outcome, got {:?}", outcome);
    };
    assert_eq!(report.parent_path, ws.output_path());
    assert!(Path::exists(&report.parent_path));
    assert!(Path::exists(&report.bindings_path));
    assert_eq!(report.child_paths.len(), 1);
    assert!(Path::exists(&report.child_paths[0]));
    assert!(!report.uploaded.is_empty());
    assert!(provider.was_called("describe_zones"));
    assert!(provider.was_called("put_object"));
    assert_eq!(hooks.calls(), vec!["pre_create", "post_create"]);

    let contents = std::fs::read_to_string(&report.parent_path).unwrap();
    envbase_template::validate_template_contents(&contents).unwrap();
}

#[tokio::test]
async fn test_create_hook_failure_aborts_before_writing() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));
    let hooks = Arc::new(RecordingHooks::failing("post_create"));

    let err = controller(&provider, ws.options(), hooks.clone())
        .run(Action::Create)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Hook { ref hook, .. } if hook == "post_create"));
    assert!(!Path::exists(&ws.output_path()));
    assert!(!provider.was_called("put_object"));
}

#[tokio::test]
async fn test_create_rejects_unknown_pattern_before_hooks() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));
    let hooks = Arc::new(RecordingHooks::default());
    let cli = CliOverrides::new().with_setting(
        "template",
        "patterns",
        r#"["BaseNetwork", "Cloudfront"]"#,
    );

    let err = controller(&provider, ws.options().with_cli(cli), hooks.clone())
        .run(Action::Create)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Template(envbase_template::TemplateError::UnknownPattern(ref name)) if name == "Cloudfront"
    ));
    assert!(hooks.calls().is_empty());
}

#[tokio::test]
async fn test_deploy_without_template_fails() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));

    let err = controller(&provider, ws.options(), Arc::default())
        .run(Action::Deploy)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::MissingTemplate(ref p) if p == &ws.output_path()));
    assert!(!provider.was_called("create_stack"));
}

#[tokio::test]
async fn test_deploy_creates_stack_from_uploaded_template() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));
    let hooks = Arc::new(RecordingHooks::default());
    let controller = controller(&provider, ws.options(), hooks.clone());

    controller.run(Action::Create).await.unwrap();
    let outcome = controller.run(Action::Deploy).await.unwrap();

    let ActionOutcome::Deployed {
        stack_name,
        stack_id,
        no_updates,
        monitor,
    } = outcome
    else {
        panic!("expected deploy outcome, got {:?}", outcome);
    };
    assert_eq!(stack_name, "demo");
    assert!(stack_id.contains("stack/demo"));
    assert!(!no_updates);
    assert!(monitor.is_none());
    assert!(provider.stack("demo").is_some());

    let calls = provider.get_method_calls("create_stack");
    assert_eq!(calls.len(), 1);
    let request = calls[0].request.clone().unwrap();
    assert!(request
        .template_url
        .as_deref()
        .is_some_and(|url| url.starts_with("https://demo-bucket.s3.amazonaws.com/")));
    assert_eq!(request.parameters.get("ec2Key").map(String::as_str), Some("ops-key"));
    assert!(request.capabilities.contains(&"CAPABILITY_IAM".to_string()));
    assert!(request.notification_arns.is_empty());

    assert_eq!(
        hooks.calls(),
        vec!["pre_create", "post_create", "pre_deploy", "post_deploy"]
    );
}

#[tokio::test]
async fn test_deploy_uses_overrides_resolved_at_deploy_time() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let mut config: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(ws.config_path()).unwrap()).unwrap();
    config["parameters"] = json!({"remoteAccessLocation": "10.0.0.0/8"});
    std::fs::write(ws.config_path(), config.to_string()).unwrap();
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));

    controller(&provider, ws.options(), Arc::default())
        .run(Action::Create)
        .await
        .unwrap();

    let options = ControllerOptions::new(ws.config_path()).with_env_vars([
        ("TEMPLATE_EC2_KEY_DEFAULT", "rotated-key"),
        ("PARAMETERS_REMOTEACCESSLOCATION", "192.168.0.0/16"),
    ]);
    controller(&provider, options, Arc::default())
        .run(Action::Deploy)
        .await
        .unwrap();

    let request = provider.get_method_calls("create_stack")[0]
        .request
        .clone()
        .unwrap();
    assert_eq!(request.parameters.get("ec2Key").map(String::as_str), Some("rotated-key"));
    assert_eq!(
        request.parameters.get("remoteAccessLocation").map(String::as_str),
        Some("192.168.0.0/16")
    );
}

#[tokio::test]
async fn test_deploy_inline_body_when_upload_disabled() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1"));
    let cli = CliOverrides::new().with_setting("template", "upload_templates", "false");
    let controller = controller(&provider, ws.options().with_cli(cli), Arc::default());

    controller.run(Action::Create).await.unwrap();
    controller.run(Action::Deploy).await.unwrap();

    assert!(!provider.was_called("put_object"));
    let request = provider.get_method_calls("create_stack")[0]
        .request
        .clone()
        .unwrap();
    assert!(request.template_url.is_none());
    assert!(request.template_body.is_some());
}

#[tokio::test]
async fn test_deploy_existing_stack_without_changes() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(
        MockProvider::dry_run("us-east-1")
            .with_stack("demo", "CREATE_COMPLETE")
            .with_no_updates(),
    );
    let controller = controller(&provider, ws.options(), Arc::default());

    controller.run(Action::Create).await.unwrap();
    let outcome = controller.run(Action::Deploy).await.unwrap();

    assert!(matches!(outcome, ActionOutcome::Deployed { no_updates: true, .. }));
    assert!(provider.was_called("update_stack"));
    assert!(!provider.was_called("create_stack"));
}

#[tokio::test]
async fn test_deploy_monitors_until_stack_completes() {
    let ws = Workspace::new();
    ws.write_config(json!({"monitor_stack": true}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1").add_event_batch(vec![
        stack_event("r1", "vpc", "AWS::EC2::VPC", "CREATE_COMPLETE"),
        stack_event("r2", "demo", "AWS::CloudFormation::Stack", "CREATE_COMPLETE"),
    ]));
    let controller = controller(&provider, ws.options(), Arc::default());

    controller.run(Action::Create).await.unwrap();
    let outcome = controller.run(Action::Deploy).await.unwrap();

    let ActionOutcome::Deployed { monitor, .. } = outcome else {
        panic!("expected deploy outcome, got {:?}", outcome);
    };
    let monitor = monitor.unwrap();
    assert_eq!(monitor.termination, Termination::Hook);
    assert_eq!(monitor.events_seen, 2);
    assert_eq!(provider.acknowledged(), vec!["r1", "r2"]);
    assert!(provider.open_channels().is_empty());

    let request = provider.get_method_calls("create_stack")[0]
        .request
        .clone()
        .unwrap();
    assert_eq!(request.notification_arns.len(), 1);
}

#[tokio::test]
async fn test_deploy_reports_stack_rollback() {
    let ws = Workspace::new();
    ws.write_config(json!({"monitor_stack": true}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1").add_event_batch(vec![
        stack_event("r1", "demo", "AWS::CloudFormation::Stack", "ROLLBACK_COMPLETE"),
    ]));
    let hooks = Arc::new(RecordingHooks::default());
    let controller = controller(&provider, ws.options(), hooks.clone());

    controller.run(Action::Create).await.unwrap();
    let err = controller.run(Action::Deploy).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::StackFailed { ref status, .. } if status == "ROLLBACK_COMPLETE"
    ));
    assert!(provider.open_channels().is_empty());
    assert!(!hooks.calls().contains(&"post_deploy".to_string()));
}

#[tokio::test]
async fn test_delete_uses_overridden_stack_name() {
    let ws = Workspace::new();
    ws.write_config(json!({}));
    let provider = Arc::new(MockProvider::dry_run("us-east-1").with_stack("staging", "CREATE_COMPLETE"));
    let hooks = Arc::new(RecordingHooks::default());
    let options = ControllerOptions::new(ws.config_path())
        .with_env_vars([("GLOBAL_ENVIRONMENT_NAME", "staging")]);

    let outcome = controller(&provider, options, hooks.clone())
        .run(Action::Delete)
        .await
        .unwrap();

    assert!(matches!(outcome, ActionOutcome::Deleted { ref stack_name } if stack_name == "staging"));
    assert!(provider.stack("staging").is_none());
    assert_eq!(hooks.calls(), vec!["pre_delete", "post_delete"]);
}
