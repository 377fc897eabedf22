//! Thin CLI over the taskmill engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use taskmill::callback::DefaultCallback;
use taskmill::executor::{RUN_FAILED_BREAK_PLAY, RUN_UNKNOWN_ERROR};
use taskmill::prelude::*;

#[derive(Parser, Debug)]
#[command(
    name = "taskmill",
    version,
    about = "Run declarative plays against an inventory"
)]
struct Cli {
    /// Playbook file (a YAML list of plays)
    playbook: PathBuf,

    /// Inventory file (YAML mapping of host name to vars)
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// Maximum number of parallel workers
    #[arg(short, long, env = "TASKMILL_FORKS")]
    forks: Option<usize>,

    /// Extra variables as key=value pairs (highest precedence)
    #[arg(short, long = "extra-var", value_name = "KEY=VALUE")]
    extra_vars: Vec<String>,

    /// Route failed-task output to stderr
    #[arg(long)]
    failed_to_stderr: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "taskmill=warn",
        1 => "taskmill=info",
        2 => "taskmill=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_extra_vars(pairs: &[String]) -> anyhow::Result<Variables> {
    let mut vars = Variables::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("invalid extra var '{pair}', expected KEY=VALUE"))?;
        // Values that parse as JSON keep their type; the rest are
        // strings.
        let value = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

fn load_inventory(path: Option<&PathBuf>) -> anyhow::Result<Inventory> {
    match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("reading inventory {}", path.display()))?;
            Ok(Inventory::from_yaml_str(&source)?)
        }
        None => {
            let mut inventory = Inventory::new();
            inventory.add_host(Host::new("localhost"));
            Ok(inventory)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let source = std::fs::read_to_string(&cli.playbook)
        .with_context(|| format!("reading playbook {}", cli.playbook.display()))?;
    let plays = Play::list_from_yaml_str(&source)?;
    let inventory = load_inventory(cli.inventory.as_ref())?;

    let mut config = Config::default();
    if let Some(forks) = cli.forks {
        config.forks = forks.max(1);
    }

    let mut tqm = TaskQueueManager::new(config, inventory);
    tqm.variable_manager_mut()
        .set_extra_vars(parse_extra_vars(&cli.extra_vars)?);
    let stdout_cb = if cli.failed_to_stderr {
        DefaultCallback::new().with_failed_stderr()
    } else {
        DefaultCallback::new()
    };
    tqm.callbacks_mut().register(Arc::new(stdout_cb));

    let mut status = RUN_OK;
    for play in &plays {
        match tqm.run(play).await {
            Ok(PlayOutcome::Completed(s)) => status |= s,
            Ok(PlayOutcome::EndedEarly(s)) => {
                status |= s | RUN_FAILED_BREAK_PLAY;
                break;
            }
            Err(e) => {
                tracing::error!("play failed: {e}");
                status |= if e.is_fatal() {
                    RUN_UNKNOWN_ERROR
                } else {
                    taskmill::executor::RUN_ERROR
                };
                break;
            }
        }
    }

    tqm.send_stats();
    tqm.cleanup().await;
    std::process::exit(status.min(255) as i32);
}
