mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use toolgate_kernel::KernelBuilder;
use toolgate_protocol::{GatewayContext, ToolCall};
use toolgate_sandbox::{CommandOverrideRunner, OverrideRunner, WorkspacePolicyOverride};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::GateConfig;

#[derive(Debug, Parser)]
#[command(name = "toolgate")]
#[command(about = "Inspect and exercise tool-access policy for a workspace")]
struct Cli {
    /// JSON file with `workspace` and optional `guardrails`.
    #[arg(long, short, default_value = "toolgate.json")]
    config: PathBuf,
    /// Gateway context the request arrived through.
    #[arg(long, value_parser = parse_context)]
    context: Option<GatewayContext>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the per-tool classification.
    Audit,
    /// Evaluate one tool call through the engine and the workspace override.
    Check(CallArgs),
    /// Run only the workspace override script for one tool call.
    Override(CallArgs),
}

#[derive(Debug, Args)]
struct CallArgs {
    tool: String,
    /// Tool input as a JSON object.
    #[arg(long, default_value = "{}")]
    input: String,
    /// Sandbox binary that executes the override script.
    #[arg(long)]
    runner: Option<PathBuf>,
    #[arg(long = "runner-arg", allow_hyphen_values = true)]
    runner_args: Vec<String>,
}

impl CallArgs {
    fn tool_call(&self) -> Result<ToolCall> {
        let input: Value =
            serde_json::from_str(&self.input).context("--input is not valid JSON")?;
        Ok(ToolCall::new(self.tool.clone(), input))
    }

    fn runner(&self) -> Option<Arc<dyn OverrideRunner>> {
        self.runner.as_ref().map(|program| {
            Arc::new(CommandOverrideRunner::new(program).with_args(self.runner_args.clone()))
                as Arc<dyn OverrideRunner>
        })
    }
}

fn parse_context(value: &str) -> Result<GatewayContext, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = GateConfig::load(&cli.config)?;
    info!(
        workspace = %config.workspace.id,
        context = ?cli.context,
        "configuration loaded"
    );

    match &cli.command {
        Command::Audit => {
            let kernel = KernelBuilder::new()
                .guardrails(config.guardrails.clone())
                .build();
            let engine = kernel.policy_engine(&config.workspace, cli.context);
            print_json(&engine.audit())?;
        }
        Command::Check(args) => {
            let call = args.tool_call()?;
            let mut builder = KernelBuilder::new()
                .guardrails(config.guardrails.clone())
                .ledger_config(config.ledger.clone())
                .override_limits(config.override_limits);
            match args.runner() {
                Some(runner) => builder = builder.override_runner(runner),
                None => warn!("no --runner given; workspace override is skipped"),
            }
            let kernel = builder.build();
            let engine = kernel.policy_engine(&config.workspace, cli.context);
            let verdict = kernel
                .evaluate_tool_call(&engine, &config.workspace, &call)
                .await;
            info!(allowed = verdict.result.allowed, tool = %call.tool_name, "tool call evaluated");
            print_json(&verdict)?;
        }
        Command::Override(args) => {
            let call = args.tool_call()?;
            let runner = args.runner().context("override requires --runner")?;
            let policy_override =
                WorkspacePolicyOverride::new(runner).with_limits(config.override_limits);
            let decision = policy_override
                .evaluate(&config.workspace, &call.tool_name, &call.input, cli.context)
                .await;
            print_json(&decision)?;
        }
    }

    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_check_with_context_and_runner() {
        let cli = Cli::try_parse_from([
            "toolgate",
            "--context",
            "public",
            "check",
            "run_command",
            "--input",
            r#"{"command": "ls"}"#,
            "--runner",
            "/usr/local/bin/policy-sandbox",
            "--runner-arg",
            "--strict",
        ])
        .unwrap();
        assert_eq!(cli.context, Some(GatewayContext::Public));
        let Command::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.tool_call().unwrap().command(), Some("ls"));
        assert_eq!(args.runner_args, vec!["--strict"]);
        assert!(args.runner().is_some());
    }

    #[test]
    fn rejects_unknown_context() {
        assert!(Cli::try_parse_from(["toolgate", "--context", "broadcast", "audit"]).is_err());
    }
}
