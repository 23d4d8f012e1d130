use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use trimflow_engine::{DEFAULT_QUOTA, Engine, EngineConfig, InvokeError, WorkerInvoker};
use trimflow_pipeline::{TriggerEvent, build_pipeline};

/// Trimflow - the video-processing pipeline engine
#[derive(Parser)]
#[command(name = "trimflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Concurrency quota bounding chunk fan-out (default: 10)
  #[arg(long, global = true)]
  quota: Option<usize>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run one pipeline execution for a trigger event
  Run {
    /// Object key of the uploaded source (e.g. job-1/original.mp4)
    #[arg(long)]
    key: String,

    /// Size of the uploaded object in bytes
    #[arg(long, default_value_t = 0)]
    size: u64,

    /// JSON file scripting worker responses ({"worker-name": response, ...});
    /// unscripted workers echo their input
    #[arg(long)]
    responses: Option<PathBuf>,
  },

  /// Print the wired pipeline graph as JSON
  Graph,
}

/// Replays canned responses instead of calling a real worker fleet.
struct ScriptedInvoker {
  responses: HashMap<String, Value>,
}

#[async_trait]
impl WorkerInvoker for ScriptedInvoker {
  async fn invoke(&self, worker: &str, input: Value) -> Result<Value, InvokeError> {
    match self.responses.get(worker) {
      Some(response) => Ok(response.clone()),
      None => Ok(input),
    }
  }
}

fn main() -> Result<()> {
  init_tracing();
  let cli = Cli::parse();
  let quota = cli.quota.unwrap_or(DEFAULT_QUOTA).max(1);

  match cli.command {
    Some(Commands::Run {
      key,
      size,
      responses,
    }) => {
      run_pipeline(key, size, responses, quota)?;
    }
    Some(Commands::Graph) => {
      let graph = build_pipeline(quota).context("failed to build pipeline graph")?;
      println!("{}", serde_json::to_string_pretty(&graph)?);
    }
    None => {
      println!("trimflow - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing() {
  use tracing_subscriber::EnvFilter;

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trimflow=info")),
    )
    .with_writer(io::stderr)
    .init();
}

fn run_pipeline(key: String, size: u64, responses: Option<PathBuf>, quota: usize) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_pipeline_async(key, size, responses, quota).await })
}

async fn run_pipeline_async(
  key: String,
  size: u64,
  responses: Option<PathBuf>,
  quota: usize,
) -> Result<()> {
  let event = TriggerEvent { key, size };
  let input = event
    .initial_context()
    .context("trigger event does not start an execution")?;
  eprintln!("Input: {}", input);

  let responses = match responses {
    Some(path) => {
      let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read responses file: {}", path.display()))?;
      serde_json::from_str(&content)
        .with_context(|| format!("failed to parse responses file: {}", path.display()))?
    }
    None => read_responses_from_stdin()?,
  };

  let graph = build_pipeline(quota).context("failed to build pipeline graph")?;
  let engine = Engine::new(Arc::new(ScriptedInvoker { responses }), EngineConfig { quota });

  let cancel = CancellationToken::new();
  let outcome = engine
    .execute(&graph, input, cancel)
    .await
    .context("pipeline execution failed")?;

  eprintln!(
    "Execution {} finished: {:?}",
    outcome.execution_id, outcome.status
  );
  println!("{}", serde_json::to_string_pretty(&outcome.output)?);

  Ok(())
}

fn read_responses_from_stdin() -> Result<HashMap<String, Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, every worker echoes its input
    Ok(HashMap::new())
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read worker responses from stdin")?;

    if input.trim().is_empty() {
      Ok(HashMap::new())
    } else {
      serde_json::from_str(&input).context("failed to parse worker responses JSON from stdin")
    }
  }
}
