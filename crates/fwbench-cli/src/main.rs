mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fwbench_control::budget;
use fwbench_control::mgmt::MgmtClient;
use fwbench_control::{
    Connector, ControlClient, Error, GqlConnector, RoleControl, RpcError, Session,
};
use fwbench_protocol::activation::Role;
use fwbench_protocol::env::{NodeLabel, ServerEnv};
use fwbench_protocol::locator::MgmtLocator;
use fwbench_protocol::result::TrialResult;
use fwbench_protocol::DEFAULT_MGMT_ADDR;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BenchConfig;

#[derive(Parser, Debug)]
#[command(name = "fwbench", about = "Forwarder throughput benchmark controller")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Server environment document
    #[arg(short, long, env = "FWBENCH_ENV", default_value = "env.json", global = true)]
    env: PathBuf,

    /// Benchmark config (TOML, or JSON options)
    #[arg(short, long, env = "FWBENCH_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the resource budget without contacting any node
    Validate,
    /// Run benchmark trials until Ctrl-C or --count trials
    Run {
        /// Number of trials
        #[arg(long)]
        count: Option<usize>,
        /// Write all results to this JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Restart a node's engine and wait until it is healthy
    Restart {
        #[arg(long)]
        node: NodeLabel,
    },
    /// Show a node's engine version
    Version {
        #[arg(long)]
        node: NodeLabel,
    },
    /// Create a face through the management JSON-RPC interface
    CreateFace {
        #[arg(long)]
        scheme: String,
        #[arg(long)]
        remote: String,
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        local: Option<String>,
        /// Management endpoint
        #[arg(long, default_value = DEFAULT_MGMT_ADDR)]
        mgmt: String,
    },
    /// Print the effective options as JSON
    Options,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = config::load_config(args.config.as_deref())?;

    match args.command {
        Commands::Validate => {
            let env = config::load_env(&args.env)?;
            validate(&env, &config)
        }
        Commands::Run { count, output } => {
            let env = config::load_env(&args.env)?;
            run(env, config, count, output).await
        }
        Commands::Restart { node } => {
            let env = config::load_env(&args.env)?;
            let control = connect(&env, &config, node)?;
            let cancel = cancel_on_ctrl_c();
            let result = control.restart(&cancel).await;
            control.close().await;
            result?;
            println!("{node} restarted");
            Ok(())
        }
        Commands::Version { node } => {
            let env = config::load_env(&args.env)?;
            let control = connect(&env, &config, node)?;
            let version = control.base().version().await;
            control.close().await;
            println!("{}", version?);
            Ok(())
        }
        Commands::CreateFace { scheme, remote, port, local, mgmt } => {
            let client = MgmtClient::new(mgmt, Duration::from_millis(config.control.request_timeout_ms));
            let locator = MgmtLocator { scheme, local, port, remote };
            match client.create_face(&locator).await {
                Ok(id) => {
                    println!("{id}");
                    Ok(())
                }
                Err(e) => {
                    let detail = match &e {
                        RpcError::Application { message, .. } => message.clone(),
                        other => serde_json::to_string(&other.to_string())?,
                    };
                    eprintln!("{detail}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Options => {
            println!("{}", serde_json::to_string_pretty(&config.options)?);
            Ok(())
        }
    }
}

fn validate(env: &ServerEnv, config: &BenchConfig) -> anyhow::Result<()> {
    config.options.validate().map_err(Error::InvalidOptions)?;
    for node in budget::plan(&config.options, env) {
        let labels: Vec<&str> = node.labels.iter().map(NodeLabel::as_str).collect();
        println!(
            "{:<2} {:<32} [{}] need {:>3}, assigned {:>3}  {}",
            node.label,
            node.endpoint,
            labels.join("+"),
            node.need,
            node.avail,
            if node.is_sufficient() { "ok" } else { "SHORT" },
        );
    }
    budget::validate(&config.options, env).map_err(Error::InsufficientCores)?;
    println!("configuration accepted");
    Ok(())
}

fn connector(config: &BenchConfig) -> GqlConnector {
    GqlConnector {
        timeout: Duration::from_millis(config.control.request_timeout_ms),
    }
}

fn connect(env: &ServerEnv, config: &BenchConfig, node: NodeLabel) -> anyhow::Result<RoleControl> {
    let endpoint = env.gqlserver(node);
    let channel = connector(config)
        .connect(endpoint)
        .with_context(|| format!("failed to connect to {node} at {endpoint}"))?;
    let role = if node.is_generator() { Role::Trafficgen } else { Role::Forwarder };
    Ok(RoleControl::for_role(role, ControlClient::new(channel, config.control.restart)))
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            token.cancel();
        }
    });
    cancel
}

async fn run(
    env: ServerEnv,
    mut config: BenchConfig,
    count: Option<usize>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    if count.is_some() {
        config.control.max_trials = count;
    }
    let connector = Arc::new(connector(&config));
    let mut session = Session::new(env, config.options, connector, config.control);

    let printer = tokio::spawn(print_results(session.subscribe_results(), |result| {
        println!("{}", format_trial(result));
    }));

    let cancel = cancel_on_ctrl_c();
    let outcome = session.run(cancel).await.map(|r| r.to_vec());
    drop(session);
    let _ = printer.await;

    let results = outcome?;
    info!(trials = results.len(), "Benchmark finished");
    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&results)?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Results written");
    }
    Ok(())
}

fn format_trial(result: &TrialResult) -> String {
    let rates: Vec<String> = result
        .directions
        .iter()
        .map(|d| format!("{} {:.0} pkt/s {:.1} Mbps", d.label(), d.data_rate, d.goodput_mbps))
        .collect();
    format!("trial {:>3}  {}", result.trial, rates.join("  "))
}

/// Emit each recorded trial until the session drops its sender. Trials the
/// receiver fell behind on are skipped with a warning; they remain in the
/// session's result list.
async fn print_results(mut rx: broadcast::Receiver<TrialResult>, mut emit: impl FnMut(&TrialResult)) {
    loop {
        match rx.recv().await {
            Ok(result) => emit(&result),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Result printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(n: usize) -> TrialResult {
        TrialResult {
            trial: n,
            timestamp_us: n as u64,
            elapsed_ms: 1000,
            directions: vec![],
        }
    }

    #[tokio::test]
    async fn printer_survives_lag() {
        let (tx, rx) = broadcast::channel(2);
        for n in 1..=5 {
            tx.send(trial(n)).unwrap();
        }
        drop(tx);

        let mut printed = Vec::new();
        print_results(rx, |r| printed.push(r.trial)).await;
        assert_eq!(printed, vec![4, 5]);
    }

    #[tokio::test]
    async fn printer_emits_in_order() {
        let (tx, rx) = broadcast::channel(8);
        let printer = tokio::spawn(async move {
            let mut printed = Vec::new();
            print_results(rx, |r| printed.push(r.trial)).await;
            printed
        });
        for n in 1..=3 {
            tx.send(trial(n)).unwrap();
        }
        drop(tx);
        assert_eq!(printer.await.unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn trial_line_without_directions() {
        assert_eq!(format_trial(&trial(7)), "trial   7  ");
    }
}
