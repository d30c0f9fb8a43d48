use std::io::Write;

use waypoint_core::config::WorkflowConfig;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{ConfigErrorKind, WaypointError};
use waypoint_engine::engine::LAST_ERROR;
use waypoint_engine::WorkflowBuilder;
use waypoint_test_utils::fixtures::ONBOARDING_TOML;

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}

#[test]
fn test_load_workflow_from_file() {
    let tmp = write_temp(ONBOARDING_TOML);
    let config = WorkflowConfig::load(tmp.path()).expect("load workflow");

    assert_eq!(config.name, "onboarding");
    assert_eq!(config.initial_state, "collect");
    assert_eq!(config.final_states, vec!["done"]);
    assert_eq!(config.states.len(), 4);
    assert_eq!(config.transitions.len(), 4);
    assert_eq!(config.settings.action_timeout_secs, 30);

    let collect = config.state("collect").expect("collect present");
    assert_eq!(collect.on_error.as_deref(), Some("recover"));
    assert_eq!(collect.actions.len(), 2);
    assert_eq!(collect.actions[1].kind, "try_with_fallback");
    assert_eq!(config.state("route").map(|s| s.kind.as_str()), Some("conditional"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_is_reported() {
    let err = WorkflowConfig::load(std::path::Path::new("/nonexistent/flow.toml")).unwrap_err();
    assert!(matches!(err, WaypointError::ConfigNotFound(_)));
}

#[test]
fn test_env_var_expansion_in_workflow() {
    std::env::set_var("WAYPOINT_TEST_PROVIDER", "salesforce");

    let tmp = write_temp(
        r#"
name = "env"
initial_state = "start"
final_states = ["end"]

[[states]]
name = "start"

[[states.actions]]
type = "set"
params = { key = "provider", value = "${WAYPOINT_TEST_PROVIDER}" }

[[states]]
name = "end"
kind = "final"

[[transitions]]
from = "start"
to = "end"
"#,
    );

    let config = WorkflowConfig::load(tmp.path()).expect("load workflow");
    let action = &config.states[0].actions[0];
    assert_eq!(action.params["value"], serde_json::json!("salesforce"));

    std::env::remove_var("WAYPOINT_TEST_PROVIDER");
}

#[test]
fn test_unset_env_var_fails_load_with_path() {
    let tmp = write_temp(
        r#"
name = "env"
initial_state = "start"

[[states]]
name = "start"
kind = "final"
owner = "${WAYPOINT_TEST_UNSET_OWNER}"
"#,
    );

    match WorkflowConfig::load(tmp.path()).unwrap_err() {
        WaypointError::Config(message) => {
            assert!(message.starts_with(&tmp.path().display().to_string()));
            assert!(message.ends_with("WAYPOINT_TEST_UNSET_OWNER"));
        }
        other => panic!("expected a config error, got {other}"),
    }
}

#[test]
fn test_minimal_workflow_uses_defaults() {
    let tmp = write_temp(
        r#"
name = "minimal"
initial_state = "only"

[[states]]
name = "only"
kind = "final"
"#,
    );

    let config = WorkflowConfig::load(tmp.path()).expect("load workflow");
    assert!(config.settings.cancellation);
    assert_eq!(config.settings.action_timeout_secs, 0);
    assert!(config.final_states.is_empty());
    assert!(config.transitions.is_empty());
    assert!(config.states[0].is_final());
}

#[test]
fn test_invalid_workflow_rejected_by_builder() {
    let tmp = write_temp(
        r#"
name = "broken"
initial_state = "start"

[[states]]
name = "start"

[[states.actions]]
type = "noop"

[[transitions]]
from = "start"
to = "nowhere"
"#,
    );

    let config = WorkflowConfig::load(tmp.path()).expect("parses");
    let err = WorkflowBuilder::default().build(&config).err().expect("build should fail");
    assert!(matches!(
        err,
        WaypointError::ConfigValidation {
            kind: ConfigErrorKind::MissingEndpoint,
            ..
        }
    ));
}

#[tokio::test]
async fn test_onboarding_runs_through_fallback() {
    let config = WorkflowConfig::from_toml_str(ONBOARDING_TOML).unwrap();
    let engine = WorkflowBuilder::default().build(&config).unwrap();
    let ctx = ExecutionContext::new();

    engine.execute(&ctx).await.unwrap();

    assert_eq!(ctx.current_state(), "done");
    assert_eq!(ctx.path_history(), vec!["collect", "route"]);
    assert_eq!(ctx.get_string("provider").as_deref(), Some("hubspot"));
    assert_eq!(ctx.get_int("records"), Some(12));
    assert_eq!(ctx.get_string("fetch_source").as_deref(), Some("fallback"));
    assert!(ctx.contains("fetch_primary_error"));
    assert!(!ctx.contains(LAST_ERROR));

    let hops: Vec<(String, String)> = ctx
        .history()
        .into_iter()
        .map(|r| (r.from, r.to))
        .collect();
    assert_eq!(
        hops,
        vec![
            ("collect".to_string(), "route".to_string()),
            ("route".to_string(), "done".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_onboarding_reroutes_on_error() {
    // Make the fallback fail too so `collect` errors out.
    let toml = ONBOARDING_TOML.replace(
        "params = { key = \"records\", value = 12 }",
        "params = { message = \"backup down\" }",
    );
    let toml = toml.replacen(
        "[states.actions.params.fallback]\ntype = \"set\"",
        "[states.actions.params.fallback]\ntype = \"fail\"",
        1,
    );
    let config = WorkflowConfig::from_toml_str(&toml).unwrap();
    let engine = WorkflowBuilder::default().build(&config).unwrap();
    let ctx = ExecutionContext::new();

    engine.execute(&ctx).await.unwrap();

    assert_eq!(ctx.current_state(), "done");
    assert_eq!(ctx.path_history(), vec!["collect", "recover", "done"]);
    let last_error = ctx.get_string(LAST_ERROR).expect("error recorded");
    assert!(last_error.contains("primary and fallback failed"));
    assert_eq!(ctx.get_string("collect_error"), Some(last_error.clone()));

    let first = &ctx.history()[0];
    assert_eq!((first.from.as_str(), first.to.as_str()), ("collect", "recover"));
    assert_eq!(first.data_snapshot[LAST_ERROR], serde_json::json!(last_error));
}
