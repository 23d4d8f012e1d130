//! Pipeline execution.
//!
//! The `Engine` walks a validated [`StateGraph`] and drives one job execution
//! to exactly one terminal outcome. The interpreter loop itself is
//! single-threaded per execution; concurrency arises only inside Parallel and
//! Map states, where sibling branches run against independent context forks
//! and are merged back by the owning loop at the join point.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use trimflow_context::Context;
use trimflow_graph::{FailState, MapState, ParallelState, State, StateGraph, StateId, TaskState};

use crate::error::ExecutionError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::invoker::{WorkerInvoker, unwrap_envelope};
use crate::quota::DEFAULT_QUOTA;

/// State machine over one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Ready,
  Running,
  Succeeded,
  Failed,
}

/// Result of a complete execution.
///
/// `status` is always terminal: `Succeeded` when a Succeed state (or the end
/// of the top-level chain) was reached, `Failed` when a Fail state was
/// reached, directly or because an uncaught error routed to it. In the
/// failed case `output` carries the error detail
/// (`{"error": kind, "cause": message}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
  pub execution_id: String,
  pub status: ExecutionStatus,
  pub output: Value,
}

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Resolved concurrency quota bounding Map fan-out. Resolve it once with
  /// [`crate::resolve_quota`] before constructing the engine.
  pub quota: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      quota: DEFAULT_QUOTA,
    }
  }
}

/// The pipeline execution engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification
/// strategies. Use `Engine::new()` for a default engine with no-op
/// notifications, or `Engine::with_notifier()` to observe events.
pub struct Engine<N: ExecutionNotifier = NoopNotifier> {
  invoker: Arc<dyn WorkerInvoker>,
  config: EngineConfig,
  notifier: N,
}

impl Engine<NoopNotifier> {
  pub fn new(invoker: Arc<dyn WorkerInvoker>, config: EngineConfig) -> Self {
    Self::with_notifier(invoker, config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> Engine<N> {
  pub fn with_notifier(invoker: Arc<dyn WorkerInvoker>, config: EngineConfig, notifier: N) -> Self {
    Self {
      invoker,
      config,
      notifier,
    }
  }

  pub fn quota(&self) -> usize {
    self.config.quota
  }

  /// Execute one job against `graph`, starting from `input`.
  ///
  /// Returns `Ok` with a terminal [`Outcome`] for both handled success and
  /// handled failure; `Err` is reserved for cancellation and graph/engine
  /// mismatches.
  pub async fn execute(
    &self,
    graph: &StateGraph,
    input: Value,
    cancel: CancellationToken,
  ) -> Result<Outcome, ExecutionError> {
    let execution = Execution {
      engine: self,
      graph,
      execution_id: uuid::Uuid::new_v4().to_string(),
      cancel,
      status: ExecutionStatus::Ready,
    };
    execution.run(input).await
  }
}

/// One job execution: exclusive owner of the traversal state.
struct Execution<'a, N: ExecutionNotifier> {
  engine: &'a Engine<N>,
  graph: &'a StateGraph,
  execution_id: String,
  cancel: CancellationToken,
  status: ExecutionStatus,
}

impl<'a, N: ExecutionNotifier> Execution<'a, N> {
  #[instrument(
    name = "execution",
    skip(self, input),
    fields(execution_id = %self.execution_id)
  )]
  async fn run(mut self, input: Value) -> Result<Outcome, ExecutionError> {
    self.status = ExecutionStatus::Running;
    self.notify(ExecutionEvent::ExecutionStarted {
      execution_id: self.execution_id.clone(),
    });
    info!(
      execution_id = %self.execution_id,
      input = %input,
      "execution_started"
    );

    let result = self
      .run_from(self.graph.start(), Context::new(input))
      .await;

    match result {
      Ok(context) => {
        self.status = ExecutionStatus::Succeeded;
        self.notify(ExecutionEvent::ExecutionSucceeded {
          execution_id: self.execution_id.clone(),
        });
        info!(execution_id = %self.execution_id, "execution_succeeded");
        Ok(Outcome {
          execution_id: self.execution_id,
          status: self.status,
          output: context.into_value(),
        })
      }
      Err(e) if !e.is_catchable() => {
        warn!(execution_id = %self.execution_id, error = %e, "execution aborted");
        Err(e)
      }
      Err(e) => {
        // An error that stayed uncaught routes to the graph's Fail terminal;
        // reaching a Fail state directly is already terminal. Either way the
        // execution reaches its failure terminal exactly once.
        let output = match &e {
          ExecutionError::StateFail { .. } => e.to_error_value(),
          _ => match self.fail_terminal() {
            Some(fail) => {
              self.notify(ExecutionEvent::StateEntered {
                execution_id: self.execution_id.clone(),
                state: fail.name.clone(),
              });
              json!({
                "error": fail.error,
                "cause": e.to_string(),
              })
            }
            None => {
              let unrecoverable = ExecutionError::Unrecoverable {
                state: e.state().unwrap_or("<execution>").to_string(),
                kind: e.kind().to_string(),
                cause: e.to_string(),
              };
              self.notify(ExecutionEvent::ExecutionFailed {
                execution_id: self.execution_id.clone(),
                error: unrecoverable.to_string(),
              });
              error!(
                execution_id = %self.execution_id,
                error = %unrecoverable,
                "execution_failed"
              );
              return Err(unrecoverable);
            }
          },
        };
        self.status = ExecutionStatus::Failed;
        self.notify(ExecutionEvent::ExecutionFailed {
          execution_id: self.execution_id.clone(),
          error: e.to_string(),
        });
        error!(execution_id = %self.execution_id, error = %e, "execution_failed");
        Ok(Outcome {
          execution_id: self.execution_id,
          status: self.status,
          output,
        })
      }
    }
  }

  /// The graph's Fail terminal, absorbing errors that stay uncaught at top
  /// level.
  fn fail_terminal(&self) -> Option<&'a FailState> {
    self.graph.states().find_map(|(_, state)| match state {
      State::Fail(fail) => Some(fail),
      _ => None,
    })
  }

  /// Interpret the (sub-)graph from `entry` until it terminates.
  ///
  /// Boxed because Parallel branches and Map items recurse into it.
  fn run_from(
    &self,
    entry: StateId,
    mut context: Context,
  ) -> BoxFuture<'_, Result<Context, ExecutionError>> {
    Box::pin(async move {
      let mut current = entry;
      loop {
        if self.cancel.is_cancelled() {
          return Err(ExecutionError::Cancelled);
        }

        let state = self
          .graph
          .get(current)
          .ok_or_else(|| ExecutionError::InvalidGraph {
            message: format!("state id {} out of bounds", current.index()),
          })?;
        self.notify(ExecutionEvent::StateEntered {
          execution_id: self.execution_id.clone(),
          state: state.name().to_string(),
        });

        match state {
          State::Task(task) => match self.run_task(task, &context).await {
            Ok(output) => {
              context.merge_at(&task.result_path, output);
              self.state_completed(state);
              match task.next {
                Some(n) => current = n,
                None => return Ok(context),
              }
            }
            Err(err) => current = self.route_catch(state, &mut context, err)?,
          },

          State::Choice(choice) => {
            let target = choice
              .rules
              .iter()
              .find(|rule| rule.condition.evaluate(&context))
              .map(|rule| rule.next)
              .or(choice.default);
            // Build-time validation guarantees a default exists.
            current = target.ok_or_else(|| ExecutionError::InvalidGraph {
              message: format!("choice '{}' has no default target", choice.name),
            })?;
            self.state_completed(state);
          }

          State::Parallel(parallel) => match self.run_parallel(parallel, &context).await {
            Ok(outputs) => {
              context.merge_at(&parallel.result_path, Value::Array(outputs));
              self.state_completed(state);
              match parallel.next {
                Some(n) => current = n,
                None => return Ok(context),
              }
            }
            Err(err) => current = self.route_catch(state, &mut context, err)?,
          },

          State::Map(map) => match self.run_map(map, &context).await {
            Ok(outputs) => {
              context.merge_at(&map.result_path, Value::Array(outputs));
              self.state_completed(state);
              match map.next {
                Some(n) => current = n,
                None => return Ok(context),
              }
            }
            Err(err) => current = self.route_catch(state, &mut context, err)?,
          },

          State::Pass(pass) => {
            if let Some(result) = &pass.result {
              context.merge_at(&pass.result_path, result.clone());
            }
            self.state_completed(state);
            match pass.next {
              Some(n) => current = n,
              None => return Ok(context),
            }
          }

          State::Succeed(_) => {
            self.state_completed(state);
            return Ok(context);
          }

          State::Fail(fail) => {
            return Err(ExecutionError::StateFail {
              state: fail.name.clone(),
              error: fail.error.clone(),
              cause: fail.cause.clone(),
            });
          }
        }
      }
    })
  }

  /// Invoke a task state's worker, racing the declared timeout and
  /// cancellation, and unwrap the result envelope.
  async fn run_task(
    &self,
    task: &TaskState,
    context: &Context,
  ) -> Result<Value, ExecutionError> {
    let input = context.select(&task.input_path);
    info!(
      execution_id = %self.execution_id,
      state = %task.name,
      worker = %task.worker,
      "task_started"
    );

    let invocation = async {
      match task.timeout_ms {
        Some(ms) => {
          match tokio::time::timeout(Duration::from_millis(ms), self.invoke(task, input)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout {
              state: task.name.clone(),
              timeout_ms: ms,
            }),
          }
        }
        None => self.invoke(task, input).await,
      }
    };

    let output = tokio::select! {
      result = invocation => result?,
      _ = self.cancel.cancelled() => return Err(ExecutionError::Cancelled),
    };

    info!(
      execution_id = %self.execution_id,
      state = %task.name,
      "task_completed"
    );
    Ok(unwrap_envelope(output))
  }

  async fn invoke(&self, task: &TaskState, input: Value) -> Result<Value, ExecutionError> {
    self
      .engine
      .invoker
      .invoke(&task.worker, input)
      .await
      .map_err(|source| ExecutionError::Invocation {
        state: task.name.clone(),
        source,
      })
  }

  /// Run all branches concurrently against independent forks and join.
  ///
  /// All-succeed semantics: the first branch error fails the whole node and
  /// remaining branch results are discarded. Outputs are collected in branch
  /// declaration order.
  async fn run_parallel(
    &self,
    parallel: &ParallelState,
    context: &Context,
  ) -> Result<Vec<Value>, ExecutionError> {
    info!(
      execution_id = %self.execution_id,
      state = %parallel.name,
      branches = parallel.branches.len(),
      "parallel_started"
    );

    let mut branches: FuturesUnordered<_> = parallel
      .branches
      .iter()
      .enumerate()
      .map(|(index, entry)| {
        let fork = context.fork();
        async move { (index, self.run_from(*entry, fork).await) }
      })
      .collect();

    let mut outputs: Vec<Option<Value>> = vec![None; parallel.branches.len()];
    while let Some((index, result)) = branches.next().await {
      match result {
        Ok(branch_context) => outputs[index] = Some(branch_context.into_value()),
        Err(err) => {
          // Dropping the remaining futures stops waiting on siblings;
          // already-dispatched invocations are not recalled.
          warn!(
            execution_id = %self.execution_id,
            state = %parallel.name,
            branch = index,
            error = %err,
            "parallel branch failed"
          );
          return Err(err);
        }
      }
    }

    Ok(
      outputs
        .into_iter()
        .map(|output| output.unwrap_or(Value::Null))
        .collect(),
    )
  }

  /// Fan the item sub-graph out over the items at `items_path`.
  ///
  /// In-flight item executions never exceed `min(configured cap, quota)`;
  /// results are collected index-preserving regardless of completion order;
  /// a single item's unrecovered error fails the whole Map exactly once.
  async fn run_map(&self, map: &MapState, context: &Context) -> Result<Vec<Value>, ExecutionError> {
    let items = match context.get(&map.items_path) {
      Some(Value::Array(items)) => items.clone(),
      _ => {
        return Err(ExecutionError::ItemsNotArray {
          state: map.name.clone(),
          path: map.items_path.to_string(),
        });
      }
    };

    let cap = map
      .max_concurrency
      .unwrap_or(usize::MAX)
      .min(self.engine.config.quota)
      .max(1);
    info!(
      execution_id = %self.execution_id,
      state = %map.name,
      items = items.len(),
      cap,
      "map_started"
    );

    let semaphore = Arc::new(Semaphore::new(cap));
    let mut executions: FuturesUnordered<_> = items
      .into_iter()
      .enumerate()
      .map(|(index, item)| {
        let semaphore = semaphore.clone();
        async move {
          let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return (index, Err(ExecutionError::Cancelled)),
          };
          (index, self.run_from(map.item_entry, Context::new(item)).await)
        }
      })
      .collect();

    let mut outputs: Vec<Option<Value>> = vec![None; executions.len()];
    while let Some((index, result)) = executions.next().await {
      match result {
        Ok(item_context) => outputs[index] = Some(item_context.into_value()),
        Err(err) => {
          warn!(
            execution_id = %self.execution_id,
            state = %map.name,
            item = index,
            error = %err,
            "map item failed, failing whole map"
          );
          return Err(ExecutionError::MapItem {
            state: map.name.clone(),
            index,
            source: Box::new(err),
          });
        }
      }
    }

    Ok(
      outputs
        .into_iter()
        .map(|output| output.unwrap_or(Value::Null))
        .collect(),
    )
  }

  /// Evaluate a failed state's catch list in declaration order.
  ///
  /// The first matcher containing the error's kind wins: the error object is
  /// merged at the catcher's result path and control transfers to its
  /// target. Unmatched errors propagate to the caller (one nesting level up,
  /// or the execution's failure terminal at top level).
  fn route_catch(
    &self,
    state: &State,
    context: &mut Context,
    err: ExecutionError,
  ) -> Result<StateId, ExecutionError> {
    self.notify(ExecutionEvent::StateFailed {
      execution_id: self.execution_id.clone(),
      state: state.name().to_string(),
      error: err.to_string(),
    });

    if !err.is_catchable() {
      return Err(err);
    }

    for catcher in state.catchers() {
      if catcher.matches(err.kind()) {
        warn!(
          execution_id = %self.execution_id,
          state = %state.name(),
          kind = %err.kind(),
          "error caught, routing to recovery target"
        );
        context.merge_at(&catcher.result_path, err.to_error_value());
        return Ok(catcher.next);
      }
    }
    Err(err)
  }

  fn state_completed(&self, state: &State) {
    self.notify(ExecutionEvent::StateCompleted {
      execution_id: self.execution_id.clone(),
      state: state.name().to_string(),
    });
  }

  fn notify(&self, event: ExecutionEvent) {
    self.engine.notifier.notify(event);
  }
}

#[cfg(test)]
mod tests {
  use std::collections::{HashMap, HashSet};
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use async_trait::async_trait;
  use serde_json::json;
  use tokio::sync::mpsc;
  use trimflow_context::Path;
  use trimflow_graph::{
    Catcher, ChoiceRule, ChoiceState, Condition, FailState, GraphBuilder, PassState, SucceedState,
  };

  use super::*;
  use crate::events::ChannelNotifier;
  use crate::invoker::InvokeError;

  /// Configurable stand-in for the external worker fleet.
  ///
  /// Responses are keyed by worker name (default: echo the input). An input
  /// object may carry `delayMs` to simulate a slow worker and `fail: true`
  /// to simulate a per-item failure.
  #[derive(Default)]
  struct MockWorkers {
    responses: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
  }

  impl MockWorkers {
    fn respond(self, worker: &str, payload: Value) -> Self {
      self
        .responses
        .lock()
        .unwrap()
        .insert(worker.to_string(), payload);
      self
    }

    fn failing(self, worker: &str) -> Self {
      self.failing.lock().unwrap().insert(worker.to_string());
      self
    }

    fn calls(&self, worker: &str) -> usize {
      self.calls.lock().unwrap().get(worker).copied().unwrap_or(0)
    }

    fn max_concurrent(&self) -> usize {
      self.max_concurrent.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl WorkerInvoker for MockWorkers {
    async fn invoke(&self, worker: &str, input: Value) -> Result<Value, InvokeError> {
      *self
        .calls
        .lock()
        .unwrap()
        .entry(worker.to_string())
        .or_insert(0) += 1;

      let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_concurrent.fetch_max(current, Ordering::SeqCst);

      if let Some(delay) = input.get("delayMs").and_then(Value::as_u64) {
        tokio::time::sleep(Duration::from_millis(delay)).await;
      }

      self.concurrent.fetch_sub(1, Ordering::SeqCst);

      if self.failing.lock().unwrap().contains(worker)
        || input.get("fail").and_then(Value::as_bool) == Some(true)
      {
        return Err(InvokeError::new(worker, "worker exploded"));
      }

      let response = self.responses.lock().unwrap().get(worker).cloned();
      Ok(response.unwrap_or(input))
    }
  }

  fn path(raw: &str) -> Path {
    Path::parse(raw).unwrap()
  }

  fn engine(workers: MockWorkers, quota: usize) -> Engine {
    Engine::new(Arc::new(workers), EngineConfig { quota })
  }

  fn task(name: &str, worker: &str, result_path: &str, next: Option<StateId>) -> State {
    State::Task(TaskState {
      name: name.to_string(),
      worker: worker.to_string(),
      input_path: Path::root(),
      result_path: path(result_path),
      timeout_ms: None,
      next,
      catch: vec![],
    })
  }

  fn succeed(name: &str) -> State {
    State::Succeed(SucceedState {
      name: name.to_string(),
    })
  }

  async fn run<N: ExecutionNotifier>(engine: &Engine<N>, graph: &StateGraph, input: Value) -> Outcome {
    engine
      .execute(graph, input, CancellationToken::new())
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn merges_task_result_and_succeeds() {
    let workers =
      MockWorkers::default().respond("probe", json!({"payload": {"width": 1920, "height": 1080}}));
    let engine = engine(workers, 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let probe = b.add(task("Probe", "probe", "$.video", Some(done)));
    let graph = b.build(probe).unwrap();

    let outcome = run(&engine, &graph, json!({"jobId": "j1"})).await;
    assert_eq!(outcome.status, ExecutionStatus::Succeeded);
    assert_eq!(
      outcome.output,
      json!({"jobId": "j1", "video": {"width": 1920, "height": 1080}})
    );
  }

  #[tokio::test]
  async fn exactly_one_terminal_event_on_success_and_failure() {
    for failing in [false, true] {
      let mut workers = MockWorkers::default();
      if failing {
        workers = workers.failing("probe");
      }
      let (tx, mut rx) = mpsc::unbounded_channel();
      let engine = Engine::with_notifier(
        Arc::new(workers),
        EngineConfig::default(),
        ChannelNotifier::new(tx),
      );

      let mut b = GraphBuilder::new();
      let done = b.add(succeed("Done"));
      let probe = b.add(task("Probe", "probe", "$.video", Some(done)));
      let graph = b.build(probe).unwrap();

      let _ = engine
        .execute(&graph, json!({}), CancellationToken::new())
        .await;

      let mut terminals = 0;
      while let Ok(event) = rx.try_recv() {
        if matches!(
          event,
          ExecutionEvent::ExecutionSucceeded { .. } | ExecutionEvent::ExecutionFailed { .. }
        ) {
          terminals += 1;
        }
      }
      assert_eq!(terminals, 1, "failing={failing}");
    }
  }

  #[tokio::test]
  async fn choice_takes_first_matching_rule() {
    let engine = engine(MockWorkers::default(), 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let first = b.add(State::Pass(PassState {
      name: "First".to_string(),
      result: Some(json!("first")),
      result_path: path("$.taken"),
      next: Some(done),
    }));
    let second = b.add(State::Pass(PassState {
      name: "Second".to_string(),
      result: Some(json!("second")),
      result_path: path("$.taken"),
      next: Some(done),
    }));
    // Both conditions hold; only the first target may be taken.
    let choice = b.add(State::Choice(ChoiceState {
      name: "Pick".to_string(),
      rules: vec![
        ChoiceRule {
          condition: Condition::BoolEquals {
            path: path("$.flag"),
            value: true,
          },
          next: first,
        },
        ChoiceRule {
          condition: Condition::IsPresent {
            path: path("$.flag"),
          },
          next: second,
        },
      ],
      default: Some(done),
    }));
    let graph = b.build(choice).unwrap();

    let outcome = run(&engine, &graph, json!({"flag": true})).await;
    assert_eq!(outcome.output["taken"], json!("first"));
  }

  #[tokio::test]
  async fn choice_falls_back_to_default() {
    let engine = engine(MockWorkers::default(), 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let matched = b.add(State::Pass(PassState {
      name: "Matched".to_string(),
      result: Some(json!(true)),
      result_path: path("$.matched"),
      next: Some(done),
    }));
    let fallback = b.add(State::Pass(PassState {
      name: "Fallback".to_string(),
      result: Some(json!(true)),
      result_path: path("$.fellBack"),
      next: Some(done),
    }));
    let choice = b.add(State::Choice(ChoiceState {
      name: "Pick".to_string(),
      rules: vec![ChoiceRule {
        condition: Condition::BoolEquals {
          path: path("$.flag"),
          value: true,
        },
        next: matched,
      }],
      default: Some(fallback),
    }));
    let graph = b.build(choice).unwrap();

    let outcome = run(&engine, &graph, json!({"flag": false})).await;
    assert_eq!(outcome.output["fellBack"], json!(true));
    assert!(outcome.output.get("matched").is_none());
  }

  #[tokio::test]
  async fn fail_state_yields_failed_outcome() {
    let engine = engine(MockWorkers::default(), 4);

    let mut b = GraphBuilder::new();
    let fail = b.add(State::Fail(FailState {
      name: "JobFailed".to_string(),
      error: "JobFailedError".to_string(),
      cause: "processing failed".to_string(),
    }));
    let entry = b.add(State::Pass(PassState {
      name: "Entry".to_string(),
      result: None,
      result_path: Path::root(),
      next: Some(fail),
    }));
    let graph = b.build(entry).unwrap();

    let outcome = run(&engine, &graph, json!({})).await;
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(outcome.output["error"], json!("JobFailedError"));
  }

  #[tokio::test]
  async fn catch_routes_to_recovery_and_attaches_error() {
    let workers = MockWorkers::default().failing("probe");
    let engine = engine(workers, 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let recover = b.add(task("Recover", "handle-error", "$.handled", Some(done)));
    let probe = b.add(State::Task(TaskState {
      name: "Probe".to_string(),
      worker: "probe".to_string(),
      input_path: Path::root(),
      result_path: path("$.video"),
      timeout_ms: None,
      next: Some(done),
      catch: vec![Catcher {
        errors: vec!["InvocationError".to_string()],
        result_path: path("$.error"),
        next: recover,
      }],
    }));
    let graph = b.build(probe).unwrap();

    let outcome = run(&engine, &graph, json!({"jobId": "j1"})).await;
    assert_eq!(outcome.status, ExecutionStatus::Succeeded);
    assert_eq!(outcome.output["error"]["error"], json!("InvocationError"));
    // The recovery worker received the context including the attached error.
    assert_eq!(
      outcome.output["handled"]["error"]["error"],
      json!("InvocationError")
    );
  }

  #[tokio::test]
  async fn catch_first_match_wins_in_declaration_order() {
    let workers = MockWorkers::default().failing("probe");
    let engine = engine(workers, 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let on_timeout = b.add(State::Pass(PassState {
      name: "OnTimeout".to_string(),
      result: Some(json!("timeout")),
      result_path: path("$.route"),
      next: Some(done),
    }));
    let on_any = b.add(State::Pass(PassState {
      name: "OnAny".to_string(),
      result: Some(json!("any")),
      result_path: path("$.route"),
      next: Some(done),
    }));
    let probe = b.add(State::Task(TaskState {
      name: "Probe".to_string(),
      worker: "probe".to_string(),
      input_path: Path::root(),
      result_path: Path::root(),
      timeout_ms: None,
      next: Some(done),
      catch: vec![
        Catcher {
          errors: vec!["TimeoutError".to_string()],
          result_path: path("$.error"),
          next: on_timeout,
        },
        Catcher::catch_all(path("$.error"), on_any),
      ],
    }));
    let graph = b.build(probe).unwrap();

    let outcome = run(&engine, &graph, json!({})).await;
    assert_eq!(outcome.output["route"], json!("any"));
  }

  #[tokio::test]
  async fn uncaught_error_routes_to_fail_terminal() {
    let workers = MockWorkers::default().failing("probe");
    let engine = engine(workers, 4);

    let mut b = GraphBuilder::new();
    let _failed = b.add(State::Fail(FailState {
      name: "JobFailed".to_string(),
      error: "JobFailedError".to_string(),
      cause: "processing failed".to_string(),
    }));
    let done = b.add(succeed("Done"));
    let probe = b.add(task("Probe", "probe", "$.video", Some(done)));
    let graph = b.build(probe).unwrap();

    let outcome = run(&engine, &graph, json!({})).await;
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(outcome.output["error"], json!("JobFailedError"));
    let cause = outcome.output["cause"].as_str().unwrap();
    assert!(cause.contains("Probe"), "cause: {cause}");
  }

  #[tokio::test]
  async fn uncaught_error_without_fail_terminal_is_unrecoverable() {
    let workers = MockWorkers::default().failing("probe");
    let engine = engine(workers, 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let probe = b.add(task("Probe", "probe", "$.video", Some(done)));
    let graph = b.build(probe).unwrap();

    let result = engine
      .execute(&graph, json!({}), CancellationToken::new())
      .await;
    match result {
      Err(ExecutionError::Unrecoverable { state, kind, .. }) => {
        assert_eq!(state, "Probe");
        assert_eq!(kind, "InvocationError");
      }
      other => panic!("expected unrecoverable error, got {other:?}"),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn timeout_is_routed_as_timeout_error() {
    let engine = engine(MockWorkers::default(), 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let recover = b.add(State::Pass(PassState {
      name: "Recover".to_string(),
      result: None,
      result_path: Path::root(),
      next: Some(done),
    }));
    let slow = b.add(State::Task(TaskState {
      name: "Slow".to_string(),
      worker: "slow".to_string(),
      input_path: Path::root(),
      result_path: path("$.out"),
      timeout_ms: Some(100),
      next: Some(done),
      catch: vec![Catcher {
        errors: vec!["TimeoutError".to_string()],
        result_path: path("$.error"),
        next: recover,
      }],
    }));
    let graph = b.build(slow).unwrap();

    let outcome = run(&engine, &graph, json!({"delayMs": 60000})).await;
    assert_eq!(outcome.status, ExecutionStatus::Succeeded);
    assert_eq!(outcome.output["error"]["error"], json!("TimeoutError"));
  }

  #[tokio::test(start_paused = true)]
  async fn parallel_collects_branch_outputs_in_declaration_order() {
    let engine = engine(MockWorkers::default(), 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    // The first branch is the slowest; outputs must still come back in
    // declaration order.
    let slow = b.add(State::Task(TaskState {
      name: "SlowBranch".to_string(),
      worker: "slow".to_string(),
      input_path: path("$.slowInput"),
      result_path: path("$.branch"),
      timeout_ms: None,
      next: None,
      catch: vec![],
    }));
    let fast = b.add(State::Task(TaskState {
      name: "FastBranch".to_string(),
      worker: "fast".to_string(),
      input_path: path("$.fastInput"),
      result_path: path("$.branch"),
      timeout_ms: None,
      next: None,
      catch: vec![],
    }));
    let parallel = b.add(State::Parallel(ParallelState {
      name: "Both".to_string(),
      branches: vec![slow, fast],
      result_path: path("$.results"),
      next: Some(done),
      catch: vec![],
    }));
    let graph = b.build(parallel).unwrap();

    let input = json!({
      "slowInput": {"delayMs": 50, "name": "slow"},
      "fastInput": {"delayMs": 1, "name": "fast"},
    });
    let outcome = run(&engine, &graph, input).await;
    let results = outcome.output["results"].as_array().unwrap();
    assert_eq!(results[0]["branch"]["name"], json!("slow"));
    assert_eq!(results[1]["branch"]["name"], json!("fast"));
  }

  #[tokio::test]
  async fn parallel_fails_as_a_whole_on_branch_error() {
    let workers = MockWorkers::default().failing("bad");
    let engine = engine(workers, 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let good = b.add(task("Good", "good", "$.out", None));
    let bad = b.add(task("Bad", "bad", "$.out", None));
    let parallel = b.add(State::Parallel(ParallelState {
      name: "Both".to_string(),
      branches: vec![good, bad],
      result_path: path("$.results"),
      next: Some(done),
      catch: vec![],
    }));
    let graph = b.build(parallel).unwrap();

    let result = engine
      .execute(&graph, json!({}), CancellationToken::new())
      .await;
    assert!(matches!(
      result,
      Err(ExecutionError::Unrecoverable { kind, .. }) if kind == "InvocationError"
    ));
  }

  fn map_graph(max_concurrency: Option<usize>) -> StateGraph {
    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let item = b.add(task("ProcessItem", "process", "$", None));
    let map = b.add(State::Map(MapState {
      name: "ProcessAll".to_string(),
      items_path: path("$.items"),
      item_entry: item,
      max_concurrency,
      result_path: path("$.processed"),
      next: Some(done),
      catch: vec![],
    }));
    b.build(map).unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn map_results_preserve_input_order() {
    let engine = engine(MockWorkers::default(), 8);
    let graph = map_graph(None);

    // Items complete in reverse order; results must match input order.
    let input = json!({"items": [
      {"name": "a", "delayMs": 30},
      {"name": "b", "delayMs": 20},
      {"name": "c", "delayMs": 10},
    ]});
    let outcome = run(&engine, &graph, input).await;
    let names: Vec<_> = outcome.output["processed"]
      .as_array()
      .unwrap()
      .iter()
      .map(|v| v["name"].as_str().unwrap().to_string())
      .collect();
    assert_eq!(names, ["a", "b", "c"]);
  }

  #[tokio::test(start_paused = true)]
  async fn map_in_flight_never_exceeds_quota() {
    let workers = Arc::new(MockWorkers::default());
    let engine = Engine::new(workers.clone(), EngineConfig { quota: 2 });
    let graph = map_graph(Some(8));

    let items: Vec<_> = (0..6).map(|i| json!({"i": i, "delayMs": 10})).collect();
    let outcome = engine
      .execute(&graph, json!({"items": items}), CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Succeeded);
    assert!(workers.max_concurrent() <= 2);
  }

  #[tokio::test(start_paused = true)]
  async fn map_cap_is_min_of_configured_and_quota() {
    let workers = Arc::new(MockWorkers::default());
    let engine = Engine::new(workers.clone(), EngineConfig { quota: 8 });
    let graph = map_graph(Some(3));

    let items: Vec<_> = (0..9).map(|i| json!({"i": i, "delayMs": 10})).collect();
    engine
      .execute(&graph, json!({"items": items}), CancellationToken::new())
      .await
      .unwrap();
    assert!(workers.max_concurrent() <= 3);
  }

  #[tokio::test]
  async fn map_fails_fast_with_a_single_error() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let workers = Arc::new(MockWorkers::default());
    let engine = Engine::with_notifier(
      workers.clone(),
      EngineConfig { quota: 1 },
      ChannelNotifier::new(tx),
    );

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let recover = b.add(task("Recover", "handle-error", "$.handled", Some(done)));
    let item = b.add(task("ProcessItem", "process", "$", None));
    let map = b.add(State::Map(MapState {
      name: "ProcessAll".to_string(),
      items_path: path("$.items"),
      item_entry: item,
      max_concurrency: None,
      result_path: path("$.processed"),
      next: Some(done),
      catch: vec![Catcher::catch_all(path("$.error"), recover)],
    }));
    let graph = b.build(map).unwrap();

    // Item 1 of 5 fails; the map must fail exactly once, not per item.
    let items: Vec<_> = (0..5).map(|i| json!({"i": i, "fail": i == 1})).collect();
    let outcome = engine
      .execute(&graph, json!({"items": items}), CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Succeeded);
    assert_eq!(outcome.output["error"]["error"], json!("MapItemError"));
    assert_eq!(workers.calls("handle-error"), 1);

    let mut map_failures = 0;
    while let Ok(event) = rx.try_recv() {
      if let ExecutionEvent::StateFailed { state, .. } = event
        && state == "ProcessAll"
      {
        map_failures += 1;
      }
    }
    assert_eq!(map_failures, 1);
  }

  #[tokio::test]
  async fn map_rejects_non_array_items() {
    let engine = engine(MockWorkers::default(), 4);
    let graph = map_graph(None);

    let result = engine
      .execute(&graph, json!({"items": "not-an-array"}), CancellationToken::new())
      .await;
    assert!(matches!(
      result,
      Err(ExecutionError::Unrecoverable { kind, .. }) if kind == "ItemsPathError"
    ));
  }

  #[tokio::test]
  async fn cancellation_aborts_the_execution() {
    let engine = engine(MockWorkers::default(), 4);

    let mut b = GraphBuilder::new();
    let done = b.add(succeed("Done"));
    let probe = b.add(task("Probe", "probe", "$.out", Some(done)));
    let graph = b.build(probe).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine.execute(&graph, json!({}), cancel).await;
    assert!(matches!(result, Err(ExecutionError::Cancelled)));
  }
}
