use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waypoint_core::config::WorkflowConfig;
use waypoint_core::context::{ContextIdentity, ExecutionContext};
use waypoint_engine::{Registry, TracingHook, WorkflowBuilder};

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Declarative workflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow to completion and print the final context
    Run {
        /// Path to the workflow TOML file
        workflow: PathBuf,
        /// Seed context data (key=value, value parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
        /// Session id recorded in the context identity
        #[arg(long, env = "WAYPOINT_SESSION")]
        session: Option<String>,
        /// Abort after this many state executions
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// Check a workflow for structural problems
    Lint {
        workflow: PathBuf,
        /// Emit findings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the states and transitions of a workflow
    Show { workflow: PathBuf },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("waypoint=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            set,
            session,
            max_steps,
        } => run(workflow, set, session, max_steps).await,
        Commands::Lint { workflow, json } => {
            let config = load(&workflow)?;
            let registry = Registry::with_builtins();
            let report = waypoint_lint::lint(&config, Some(&registry));
            if json {
                println!("{}", serde_json::to_string_pretty(&report.findings)?);
            } else if report.is_clean() {
                println!("{}: no findings", config.name);
            } else {
                for finding in &report.findings {
                    println!("{}", finding);
                }
                println!(
                    "\n{} error(s), {} warning(s)",
                    report.errors().count(),
                    report.warnings().count()
                );
            }
            if report.has_errors() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Show { workflow } => {
            let config = load(&workflow)?;
            println!("Workflow: {}", config.name);
            println!("Initial:  {}", config.initial_state);
            println!();
            println!("States:");
            for state in &config.states {
                let marker = if state.is_final() || config.is_final(&state.name) {
                    " (final)"
                } else {
                    ""
                };
                let actions: Vec<&str> = state.actions.iter().map(|a| a.name()).collect();
                if actions.is_empty() {
                    println!("  {} [{}]{}", state.name, state.kind, marker);
                } else {
                    println!(
                        "  {} [{}]{} -> {}",
                        state.name,
                        state.kind,
                        marker,
                        actions.join(", ")
                    );
                }
                if let Some(target) = &state.on_error {
                    println!("      on_error: {}", target);
                }
            }
            println!();
            println!("Transitions:");
            for t in &config.transitions {
                println!("  {} -> {}  [{}]", t.from, t.to, t.condition);
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "waypoint", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn load(path: &Path) -> anyhow::Result<WorkflowConfig> {
    WorkflowConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

async fn run(
    workflow: PathBuf,
    set: Vec<String>,
    session: Option<String>,
    max_steps: Option<usize>,
) -> anyhow::Result<()> {
    let config = load(&workflow)?;

    let mut builder = WorkflowBuilder::new(Registry::with_builtins()).with_hook(Arc::new(TracingHook));
    if let Some(limit) = max_steps {
        builder = builder.with_max_steps(limit);
    }
    let engine = builder.build(&config)?;

    let mut identity = ContextIdentity::new();
    if let Some(session) = session {
        identity = identity.with_session(session);
    }
    let ctx = ExecutionContext::with_identity(identity);
    ctx.merge(parse_assignments(&set)?);

    // Ctrl-C stops the run before the next state
    let cancel = ctx.cancellation_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling workflow...");
        cancel.cancel();
    });

    let outcome = engine.execute(&ctx).await;
    println!("{}", serde_json::to_string_pretty(&ctx.snapshot())?);

    if let Err(e) = outcome {
        warn!(workflow = %engine.name(), error = %e, "Workflow failed");
        return Err(e.into());
    }
    Ok(())
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type.
fn parse_assignments(pairs: &[String]) -> anyhow::Result<HashMap<String, serde_json::Value>> {
    let mut data = HashMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("empty key in '{}'", pair);
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        data.insert(key.to_string(), value);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments() {
        let data = parse_assignments(&[
            "provider=hubspot".to_string(),
            "count=3".to_string(),
            "flag=true".to_string(),
            "note=\"quoted\"".to_string(),
        ])
        .unwrap();
        assert_eq!(data["provider"], serde_json::json!("hubspot"));
        assert_eq!(data["count"], serde_json::json!(3));
        assert_eq!(data["flag"], serde_json::json!(true));
        assert_eq!(data["note"], serde_json::json!("quoted"));
    }

    #[test]
    fn test_parse_assignments_rejects_missing_equals() {
        assert!(parse_assignments(&["provider".to_string()]).is_err());
        assert!(parse_assignments(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "waypoint",
            "run",
            "flow.toml",
            "--set",
            "a=1",
            "--set",
            "b=x",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { workflow, set, .. } => {
                assert_eq!(workflow, PathBuf::from("flow.toml"));
                assert_eq!(set, vec!["a=1", "b=x"]);
            }
            _ => panic!("expected run"),
        }
    }
}
