//! The DAG executor: scheduling, dispatch, retries, verification and
//! checkpointing for workflow executions.

use super::checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use super::control::ExecutionControl;
use super::readiness::{assess, Readiness};
use super::state::{NodeState, VerificationStatus};
use super::summary::ExecutionSummary;
use super::task::{NodeOutcome, NodeRequest, NodeTask, TaskFailure};
use super::WorkflowContext;
use crate::artifacts::{Artifact, ArtifactStore};
use crate::config::{ExecutorConfig, PhasegateConfig};
use crate::contracts::{Breach, ContractRegistry, ContractState, LateBreachResolution, VerificationResult};
use crate::core::{NodeStatus, WorkflowEvent, WorkflowEventType, WorkflowStatus};
use crate::errors::{codes, ContractError, ErrorInfo, GraphValidationError, PhasegateError, TransitionError};
use crate::events::{ChannelEventSink, EventSink, LoggingEventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::utils::{iso_timestamp, new_execution_id};
use crate::workflow::{WorkflowDag, WorkflowNode};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const OUTPUT_SUMMARY_LIMIT: usize = 200;

/// Outcome of [`DagExecutor::handle_late_breach`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateBreachOutcome {
    /// What the registry recorded.
    pub resolution: LateBreachResolution,
    /// Completed producer nodes moved to failed.
    pub clawed_back: Vec<String>,
    /// Finished nodes whose inputs can no longer be trusted.
    pub invalidated: Vec<String>,
    /// Pending nodes that can no longer run.
    pub blocked: Vec<String>,
}

/// Something the scheduler loop was waiting for.
enum Wake {
    Attempt {
        index: usize,
        elapsed_ms: f64,
        result: Result<(NodeOutcome, Vec<Artifact>), TaskFailure>,
    },
    Verified {
        index: usize,
        verdicts: Vec<(String, Result<VerificationResult, String>)>,
    },
    RetryDue(usize),
}

/// Scheduler state of one execution. Owned by the loop; nothing else writes
/// the context while it runs.
struct Run {
    dag: Arc<WorkflowDag>,
    ctx: WorkflowContext,
    control: Arc<ExecutionControl>,
    pending: FuturesUnordered<JoinHandle<Wake>>,
    in_flight: HashSet<usize>,
    exclusive: bool,
    verifying: HashSet<usize>,
    due: BTreeSet<usize>,
}

impl Run {
    fn new(dag: Arc<WorkflowDag>, ctx: WorkflowContext, control: Arc<ExecutionControl>) -> Self {
        Self {
            dag,
            ctx,
            control,
            pending: FuturesUnordered::new(),
            in_flight: HashSet::new(),
            exclusive: false,
            verifying: HashSet::new(),
            due: BTreeSet::new(),
        }
    }

    /// No attempt or verification is outstanding. Retry timers don't count.
    fn is_quiet(&self) -> bool {
        self.in_flight.is_empty() && self.verifying.is_empty()
    }
}

/// Removes an execution from the active set when its driver returns.
struct ActiveGuard<'a> {
    active: &'a DashMap<String, Arc<ExecutionControl>>,
    execution_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.execution_id);
    }
}

fn node_state<'a>(ctx: &'a mut WorkflowContext, node_id: &str) -> Result<&'a mut NodeState, PhasegateError> {
    ctx.node_mut(node_id)
        .ok_or_else(|| PhasegateError::Internal(format!("no state recorded for node '{node_id}'")))
}

fn summarize_output(output: &Value) -> String {
    let text = match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > OUTPUT_SUMMARY_LIMIT {
        let mut short: String = text.chars().take(OUTPUT_SUMMARY_LIMIT).collect();
        short.push_str("...");
        short
    } else {
        text
    }
}

/// Runs workflow graphs.
///
/// Each execution is driven by the future returned from
/// [`execute`](Self::execute) (or [`resume`](Self::resume) /
/// [`rerun_from`](Self::rerun_from)). Node attempts run as separate Tokio
/// tasks; the driving future is the only writer of the execution's
/// [`WorkflowContext`] and persists it after every transition.
///
/// # Example
///
/// ```rust,ignore
/// let executor = DagExecutor::new(Arc::new(MyTask))
///     .with_registry(registry)
///     .with_event_sink(sink);
/// let ctx = executor.execute(&dag, Map::new()).await?;
/// assert_eq!(ctx.status, WorkflowStatus::Completed);
/// ```
pub struct DagExecutor {
    task: Arc<dyn NodeTask>,
    registry: Option<Arc<ContractRegistry>>,
    store: Option<Arc<ArtifactStore>>,
    sink: Arc<dyn EventSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: ExecutorConfig,
    active: DashMap<String, Arc<ExecutionControl>>,
    graphs: DashMap<String, Arc<WorkflowDag>>,
}

impl std::fmt::Debug for DagExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagExecutor")
            .field("config", &self.config)
            .field("has_registry", &self.registry.is_some())
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl DagExecutor {
    /// Creates an executor with in-memory checkpoints and no event sink.
    #[must_use]
    pub fn new(task: Arc<dyn NodeTask>) -> Self {
        Self {
            task,
            registry: None,
            store: None,
            sink: Arc::new(NoOpEventSink),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            config: ExecutorConfig::default(),
            active: DashMap::new(),
            graphs: DashMap::new(),
        }
    }

    /// Builds an executor, registry, artifact store and checkpoint store
    /// from configuration.
    ///
    /// Events go through a bounded [`ChannelEventSink`] into the log when a
    /// Tokio runtime is available, and straight into the log otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a store cannot
    /// be opened.
    pub fn from_config(task: Arc<dyn NodeTask>, config: &PhasegateConfig) -> Result<Self, PhasegateError> {
        config.validate()?;
        let store = Arc::new(ArtifactStore::open(&config.artifacts.root)?);
        let registry = ContractRegistry::from_config(&config.verification).with_artifact_store(Arc::clone(&store));
        let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoints.dir {
            Some(dir) => Arc::new(FileCheckpointStore::open(dir)?),
            None => Arc::new(InMemoryCheckpointStore::new()),
        };
        let sink: Arc<dyn EventSink> = if tokio::runtime::Handle::try_current().is_ok() {
            ChannelEventSink::with_logging(config.executor.event_queue_size)
        } else {
            Arc::new(LoggingEventSink::default())
        };

        Ok(Self::new(task)
            .with_config(config.executor.clone())
            .with_registry(Arc::new(registry))
            .with_artifact_store(store)
            .with_checkpoint_store(checkpoints)
            .with_event_sink(sink))
    }

    /// Sets the contract registry used for input gating and output verification.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ContractRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the store for node artifacts. Without one, the registry's store is used.
    #[must_use]
    pub fn with_artifact_store(mut self, store: Arc<ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the checkpoint store.
    #[must_use]
    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Sets the scheduler configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the contract registry, if any.
    #[must_use]
    pub fn registry(&self) -> Option<&Arc<ContractRegistry>> {
        self.registry.as_ref()
    }

    /// Returns true while an execution is being driven.
    #[must_use]
    pub fn is_active(&self, execution_id: &str) -> bool {
        self.active.contains_key(execution_id)
    }

    fn artifact_store(&self) -> Option<Arc<ArtifactStore>> {
        self.store
            .clone()
            .or_else(|| self.registry.as_ref().and_then(|r| r.artifact_store().cloned()))
    }

    /// Runs a workflow under a fresh execution id.
    ///
    /// # Errors
    ///
    /// See [`execute_with_id`](Self::execute_with_id).
    pub async fn execute(&self, dag: &WorkflowDag, global: Map<String, Value>) -> Result<WorkflowContext, PhasegateError> {
        self.execute_with_id(dag, global, new_execution_id()).await
    }

    /// Runs a workflow under the given execution id and returns the final
    /// context (completed, failed, paused or cancelled).
    ///
    /// # Errors
    ///
    /// Returns a validation error (`CONTRACT-001-UNKNOWN`) when a node names a
    /// contract the registry does not know, [`PhasegateError::ExecutionActive`]
    /// when the id is already running, and checkpoint errors.
    pub async fn execute_with_id(
        &self,
        dag: &WorkflowDag,
        global: Map<String, Value>,
        execution_id: impl Into<String>,
    ) -> Result<WorkflowContext, PhasegateError> {
        let execution_id = execution_id.into();
        self.check_contracts(dag)?;
        let (_active, control) = self.activate(&execution_id)?;

        let dag = Arc::new(dag.clone());
        self.graphs.insert(execution_id.clone(), Arc::clone(&dag));
        let mut ctx = WorkflowContext::for_dag(&dag, &execution_id, global);
        ctx.status.check_transition(&execution_id, WorkflowStatus::Running)?;
        ctx.status = WorkflowStatus::Running;

        info!(
            workflow_id = %dag.id(),
            execution_id = %execution_id,
            node_count = dag.len(),
            "Workflow started"
        );
        let mut run = Run::new(dag, ctx, control);
        self.emit(
            &run.ctx,
            WorkflowEventType::WorkflowStarted,
            None,
            json!({ "node_count": run.dag.len() }),
        );
        self.persist(&mut run)?;
        self.drive(run).await
    }

    /// Requests a pause. Running attempts and verifications finish first;
    /// the driving future then returns a context with status `Paused`.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionNotFound`] if the execution is not running.
    pub fn pause(&self, execution_id: &str) -> Result<(), PhasegateError> {
        let control = self
            .active
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PhasegateError::ExecutionNotFound(execution_id.to_string()))?;
        info!(execution_id = %execution_id, "Pause requested");
        control.request_pause();
        Ok(())
    }

    /// Resumes a paused (or interrupted) execution using the graph it was
    /// started with.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionNotFound`] if this executor never
    /// ran the execution; use [`resume_with`](Self::resume_with) instead.
    pub async fn resume(&self, execution_id: &str) -> Result<WorkflowContext, PhasegateError> {
        let dag = self
            .graphs
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PhasegateError::ExecutionNotFound(execution_id.to_string()))?;
        self.resume_graph(dag, execution_id).await
    }

    /// Resumes an execution from its checkpoint with the given graph.
    ///
    /// Nodes that were running when the checkpoint was written count as
    /// failed attempts and are retried if their policy allows; ready nodes go
    /// back to pending; pending retries run straight away.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionNotFound`] without a checkpoint, a
    /// validation error if the checkpoint belongs to another graph, and a
    /// transition error for finished executions.
    pub async fn resume_with(&self, dag: &WorkflowDag, execution_id: &str) -> Result<WorkflowContext, PhasegateError> {
        self.resume_graph(Arc::new(dag.clone()), execution_id).await
    }

    async fn resume_graph(&self, dag: Arc<WorkflowDag>, execution_id: &str) -> Result<WorkflowContext, PhasegateError> {
        self.check_contracts(&dag)?;
        let (_active, control) = self.activate(execution_id)?;
        let mut ctx = self.load(execution_id)?;
        check_graph_matches(&dag, &ctx)?;

        match ctx.status {
            WorkflowStatus::Paused => {
                ctx.status.check_transition(execution_id, WorkflowStatus::Running)?;
                ctx.status = WorkflowStatus::Running;
            }
            WorkflowStatus::Running => {
                warn!(execution_id = %execution_id, "Recovering execution interrupted while running");
            }
            other => {
                return Err(TransitionError::new("workflow", execution_id, other, WorkflowStatus::Running).into());
            }
        }
        self.graphs.insert(execution_id.to_string(), Arc::clone(&dag));

        let mut run = Run::new(dag, ctx, control);
        self.recover_nodes(&mut run)?;
        info!(
            workflow_id = %run.ctx.workflow_id,
            execution_id = %execution_id,
            sequence = run.ctx.sequence,
            "Workflow resumed"
        );
        self.emit(&run.ctx, WorkflowEventType::WorkflowResumed, None, json!({}));
        self.persist(&mut run)?;
        self.drive(run).await
    }

    /// Cancels an execution.
    ///
    /// A running execution stops dispatching; in-flight attempts finish and
    /// are persisted, then its driving future returns a `Cancelled` context.
    /// A paused or interrupted execution is cancelled directly in its
    /// checkpoint; nodes it recorded as running become cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionNotFound`] for unknown executions
    /// and a transition error for finished ones.
    pub fn cancel(&self, execution_id: &str) -> Result<(), PhasegateError> {
        if let Some(control) = self.active.get(execution_id).map(|entry| Arc::clone(entry.value())) {
            info!(execution_id = %execution_id, "Cancel requested");
            control.request_cancel();
            return Ok(());
        }

        let (_active, control) = self.activate(execution_id)?;
        let ctx = self.load(execution_id)?;
        ctx.status.check_transition(execution_id, WorkflowStatus::Cancelled)?;
        let dag = self.graphs.get(execution_id).map(|entry| Arc::clone(entry.value()));
        let dag = match dag {
            Some(dag) => dag,
            None => Arc::new(WorkflowDag::new(
                ctx.workflow_id.clone(),
                ctx.workflow_id.clone(),
                ctx.node_states.keys().map(|id| WorkflowNode::new(id.clone(), id.clone())).collect(),
                Map::new(),
            )?),
        };
        let mut run = Run::new(dag, ctx, control);
        let interrupted: Vec<String> = run
            .ctx
            .nodes_with_status(NodeStatus::Running)
            .into_iter()
            .map(str::to_string)
            .collect();
        for node_id in interrupted {
            let state = node_state(&mut run.ctx, &node_id)?;
            state.transition(&node_id, NodeStatus::Cancelled)?;
            state.pending_retry = false;
            state.last_error = Some("attempt interrupted before completion".to_string());
            state.ended_at = Some(iso_timestamp());
            warn!(execution_id = %execution_id, node_id = %node_id, "Interrupted attempt cancelled");
        }
        self.cancel_waiting(&mut run)?;
        self.finish_cancelled(run)?;
        Ok(())
    }

    /// Returns the status recorded in the latest checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionNotFound`] without a checkpoint.
    pub fn status(&self, execution_id: &str) -> Result<WorkflowStatus, PhasegateError> {
        self.load(execution_id).map(|ctx| ctx.status)
    }

    /// Returns the latest checkpointed context.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionNotFound`] without a checkpoint.
    pub fn context(&self, execution_id: &str) -> Result<WorkflowContext, PhasegateError> {
        self.load(execution_id)
    }

    /// Summarizes the latest checkpoint of an execution this executor ran.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionNotFound`] for unknown executions.
    pub fn summary(&self, execution_id: &str) -> Result<ExecutionSummary, PhasegateError> {
        let dag = self
            .graphs
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PhasegateError::ExecutionNotFound(execution_id.to_string()))?;
        let ctx = self.load(execution_id)?;
        Ok(ExecutionSummary::from_context(&dag, &ctx))
    }

    /// Applies a contract breach discovered after the execution moved on.
    ///
    /// The registry records the breach. For a blocking contract, completed
    /// producer nodes are clawed back to failed, finished nodes downstream of
    /// the producers or consumers are marked invalidated, and pending ones are
    /// blocked. A completed workflow becomes failed. Use
    /// [`rerun_from`](Self::rerun_from) to redo the affected work.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionActive`] while the execution is
    /// being driven, and registry or checkpoint errors.
    pub fn handle_late_breach(
        &self,
        execution_id: &str,
        contract_id: &str,
        breach: Breach,
    ) -> Result<LateBreachOutcome, PhasegateError> {
        let registry = self
            .registry
            .clone()
            .ok_or_else(|| ContractError::NotFound(contract_id.to_string()))?;
        let dag = self
            .graphs
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PhasegateError::ExecutionNotFound(execution_id.to_string()))?;
        let (_active, control) = self.activate(execution_id)?;
        let ctx = self.load(execution_id)?;
        let resolution = registry.handle_late_breach(contract_id, breach)?;

        let mut outcome = LateBreachOutcome {
            resolution: resolution.clone(),
            clawed_back: Vec::new(),
            invalidated: Vec::new(),
            blocked: Vec::new(),
        };
        if !resolution.blocking {
            warn!(
                execution_id = %execution_id,
                contract_id = %contract_id,
                "Late breach of non-blocking contract; execution unchanged"
            );
            return Ok(outcome);
        }

        let mut run = Run::new(Arc::clone(&dag), ctx, control);
        let mut affected_contracts: HashSet<&str> =
            resolution.invalidated_contracts.iter().map(String::as_str).collect();
        affected_contracts.insert(contract_id);

        let producers: Vec<usize> = dag
            .producers_of(contract_id)
            .into_iter()
            .filter_map(|id| dag.index_of(id))
            .collect();
        let consumers: Vec<usize> = dag
            .nodes()
            .enumerate()
            .filter(|(_, n)| n.input_contracts.iter().any(|c| affected_contracts.contains(c.as_str())))
            .map(|(i, _)| i)
            .collect();

        for &index in &producers {
            let Some(node) = dag.node_at(index) else { continue };
            let state = node_state(&mut run.ctx, &node.id)?;
            if state.status != NodeStatus::Completed {
                continue;
            }
            state.transition(&node.id, NodeStatus::Failed)?;
            let message = format!("late breach of output contract '{contract_id}'");
            state.last_error = Some(message.clone());
            state.verification = Some(VerificationStatus::Failed);
            state.pending_retry = false;
            warn!(execution_id = %execution_id, node_id = %node.id, contract_id = %contract_id, "Node clawed back");
            self.emit(
                &run.ctx,
                WorkflowEventType::NodeFailed,
                Some(&node.id),
                json!({ "error": message, "retry": false, "clawback": true, "contract_id": contract_id }),
            );
            outcome.clawed_back.push(node.id.clone());
        }

        let mut starts = producers.clone();
        starts.extend(consumers.iter().copied());
        let mut affected: BTreeSet<usize> = dag.descendant_indices(&starts).into_iter().collect();
        affected.extend(consumers);
        for index in producers {
            affected.remove(&index);
        }

        for index in affected {
            let Some(node) = dag.node_at(index) else { continue };
            let state = node_state(&mut run.ctx, &node.id)?;
            match state.status {
                NodeStatus::Completed | NodeStatus::Skipped if !state.invalidated => {
                    state.invalidated = true;
                    outcome.invalidated.push(node.id.clone());
                }
                NodeStatus::Pending => {
                    let reason = format!("input invalidated by late breach of '{contract_id}'");
                    state.transition(&node.id, NodeStatus::Blocked)?;
                    state.last_error = Some(reason.clone());
                    self.emit(
                        &run.ctx,
                        WorkflowEventType::NodeBlocked,
                        Some(&node.id),
                        json!({ "reason": reason }),
                    );
                    outcome.blocked.push(node.id.clone());
                }
                _ => {}
            }
        }

        if run.ctx.status == WorkflowStatus::Completed {
            run.ctx.status.check_transition(execution_id, WorkflowStatus::Failed)?;
            run.ctx.status = WorkflowStatus::Failed;
            self.emit(
                &run.ctx,
                WorkflowEventType::WorkflowFailed,
                None,
                json!({ "reason": "late_breach", "contract_id": contract_id }),
            );
        }
        warn!(
            execution_id = %execution_id,
            contract_id = %contract_id,
            clawed_back = ?outcome.clawed_back,
            invalidated = ?outcome.invalidated,
            blocked = ?outcome.blocked,
            "Late breach applied"
        );
        self.persist(&mut run)?;
        Ok(outcome)
    }

    /// Re-runs part of a finished execution under a fresh execution id.
    ///
    /// The listed nodes, everything downstream of them, and every node that
    /// did not end completed or skipped (or was invalidated) run again.
    /// Other nodes keep their results.
    ///
    /// # Errors
    ///
    /// Returns [`PhasegateError::ExecutionNotFound`] for unknown executions,
    /// [`PhasegateError::ExecutionActive`] while it runs, and a validation
    /// error for unknown node ids.
    pub async fn rerun_from(&self, execution_id: &str, nodes: &[&str]) -> Result<WorkflowContext, PhasegateError> {
        if self.is_active(execution_id) {
            return Err(PhasegateError::ExecutionActive(execution_id.to_string()));
        }
        let dag = self
            .graphs
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PhasegateError::ExecutionNotFound(execution_id.to_string()))?;
        let previous = self.load(execution_id)?;

        let mut starts = Vec::with_capacity(nodes.len());
        for id in nodes {
            let index = dag.index_of(id).ok_or_else(|| {
                GraphValidationError::new(format!("Unknown node '{id}' in workflow '{}'", dag.id()))
                    .with_nodes(vec![(*id).to_string()])
            })?;
            starts.push(index);
        }
        let mut affected: HashSet<usize> = dag.descendant_indices(&starts).into_iter().collect();
        affected.extend(starts);

        let new_id = new_execution_id();
        self.check_contracts(&dag)?;
        let (_active, control) = self.activate(&new_id)?;
        let mut ctx = WorkflowContext::for_dag(&dag, &new_id, previous.global.clone());
        let mut kept = Vec::new();
        for (index, node) in dag.nodes().enumerate() {
            let Some(state) = previous.node(&node.id) else { continue };
            let reusable = matches!(state.status, NodeStatus::Completed | NodeStatus::Skipped) && !state.invalidated;
            if affected.contains(&index) || !reusable {
                continue;
            }
            ctx.node_states.insert(node.id.clone(), state.clone());
            if let Some(output) = previous.outputs.get(&node.id) {
                ctx.outputs.insert(node.id.clone(), output.clone());
            }
            if let Some(paths) = previous.artifacts.get(&node.id) {
                ctx.artifacts.insert(node.id.clone(), paths.clone());
            }
            kept.push(node.id.clone());
        }
        if let Some(registry) = &self.registry {
            // Producers about to run again reopen their breached contracts so
            // consumers wait for the new verdict instead of blocking on the old one.
            for node in dag.nodes().filter(|n| !kept.contains(&n.id)) {
                for contract_id in &node.output_contracts {
                    if registry.state(contract_id) == Some(ContractState::Breached) {
                        registry.update_state(contract_id, ContractState::InProgress)?;
                        info!(
                            execution_id = %new_id,
                            node_id = %node.id,
                            contract_id = %contract_id,
                            "Breached contract reopened for rerun"
                        );
                    }
                }
            }
        }
        ctx.status.check_transition(&new_id, WorkflowStatus::Running)?;
        ctx.status = WorkflowStatus::Running;
        self.graphs.insert(new_id.clone(), Arc::clone(&dag));

        info!(
            workflow_id = %dag.id(),
            execution_id = %new_id,
            rerun_of = %execution_id,
            kept = ?kept,
            "Workflow rerun started"
        );
        let mut run = Run::new(dag, ctx, control);
        self.emit(
            &run.ctx,
            WorkflowEventType::WorkflowStarted,
            None,
            json!({ "node_count": run.dag.len(), "rerun_of": execution_id, "kept": kept }),
        );
        self.persist(&mut run)?;
        self.drive(run).await
    }

    fn activate(&self, execution_id: &str) -> Result<(ActiveGuard<'_>, Arc<ExecutionControl>), PhasegateError> {
        let control = match self.active.entry(execution_id.to_string()) {
            Entry::Occupied(_) => return Err(PhasegateError::ExecutionActive(execution_id.to_string())),
            Entry::Vacant(slot) => {
                let control = Arc::new(ExecutionControl::new());
                slot.insert(Arc::clone(&control));
                control
            }
        };
        Ok((
            ActiveGuard {
                active: &self.active,
                execution_id: execution_id.to_string(),
            },
            control,
        ))
    }

    fn load(&self, execution_id: &str) -> Result<WorkflowContext, PhasegateError> {
        self.checkpoints
            .load(execution_id)?
            .ok_or_else(|| PhasegateError::ExecutionNotFound(execution_id.to_string()))
    }

    fn check_contracts(&self, dag: &WorkflowDag) -> Result<(), PhasegateError> {
        let missing: Vec<String> = dag
            .contract_ids()
            .into_iter()
            .filter(|id| self.registry.as_ref().map_or(true, |r| !r.contains(id)))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let nodes = dag
            .nodes()
            .filter(|n| {
                n.input_contracts
                    .iter()
                    .chain(n.output_contracts.iter())
                    .any(|c| missing.contains(c))
            })
            .map(|n| n.id.clone())
            .collect();
        let summary = if self.registry.is_some() {
            "Nodes reference contracts the registry does not know"
        } else {
            "Nodes reference contracts but no contract registry is configured"
        };
        Err(GraphValidationError::new(format!(
            "Workflow '{}' references unknown contracts: {}",
            dag.id(),
            missing.join(", ")
        ))
        .with_nodes(nodes)
        .with_error_info(
            ErrorInfo::new(codes::UNKNOWN_CONTRACT, summary)
                .with_fix_hint("Register the contracts before executing the workflow."),
        )
        .into())
    }

    fn persist(&self, run: &mut Run) -> Result<(), PhasegateError> {
        run.ctx.touch();
        self.checkpoints.save(&run.ctx).map_err(|err| {
            error!(
                execution_id = %run.ctx.execution_id,
                sequence = run.ctx.sequence,
                error = %err,
                "Checkpoint write failed"
            );
            PhasegateError::from(err)
        })
    }

    fn emit(&self, ctx: &WorkflowContext, event_type: WorkflowEventType, node_id: Option<&str>, data: Value) {
        let mut event = WorkflowEvent::new(event_type, ctx.workflow_id.clone(), ctx.execution_id.clone());
        if let Some(node_id) = node_id {
            event = event.for_node(node_id);
        }
        if let Value::Object(data) = data {
            event.data = data;
        }
        self.sink.try_emit(event);
    }

    async fn drive(&self, mut run: Run) -> Result<WorkflowContext, PhasegateError> {
        self.restart_verifications(&mut run);
        loop {
            if run.control.cancel_requested() {
                self.cancel_waiting(&mut run)?;
                if run.is_quiet() {
                    return self.finish_cancelled(run);
                }
            } else if run.control.pause_requested() {
                if run.is_quiet() {
                    return self.finish_paused(run);
                }
            } else {
                self.resolve(&mut run)?;
                self.dispatch(&mut run)?;
                if run.pending.is_empty() {
                    return self.finish(run);
                }
            }

            let woke = {
                let control = Arc::clone(&run.control);
                tokio::select! {
                    joined = run.pending.next(), if !run.pending.is_empty() => joined,
                    () = control.signalled() => None,
                }
            };
            match woke {
                Some(Ok(wake)) => self.handle(&mut run, wake)?,
                Some(Err(err)) => {
                    error!(execution_id = %run.ctx.execution_id, error = %err, "Scheduler task ended abnormally");
                    return Err(PhasegateError::Internal(format!("scheduler task failed: {err}")));
                }
                None => {}
            }
        }
    }

    /// Moves pending nodes to ready, skipped or blocked, in topological order
    /// so a block propagates through a whole subgraph in one pass.
    fn resolve(&self, run: &mut Run) -> Result<(), PhasegateError> {
        let dag = Arc::clone(&run.dag);
        for &index in dag.topological_indices() {
            let Some(node) = dag.node_at(index) else { continue };
            match assess(&dag, &run.ctx, index, self.registry.as_deref()) {
                Readiness::Waiting => continue,
                Readiness::Ready => {
                    node_state(&mut run.ctx, &node.id)?.transition(&node.id, NodeStatus::Ready)?;
                    debug!(execution_id = %run.ctx.execution_id, node_id = %node.id, "Node ready");
                }
                Readiness::Skip => {
                    let state = node_state(&mut run.ctx, &node.id)?;
                    state.transition(&node.id, NodeStatus::Skipped)?;
                    state.ended_at = Some(iso_timestamp());
                    info!(execution_id = %run.ctx.execution_id, node_id = %node.id, "Node skipped");
                    self.emit(
                        &run.ctx,
                        WorkflowEventType::NodeSkipped,
                        Some(&node.id),
                        json!({ "condition": node.condition }),
                    );
                }
                Readiness::Blocked { reason } => {
                    let state = node_state(&mut run.ctx, &node.id)?;
                    state.transition(&node.id, NodeStatus::Blocked)?;
                    state.last_error = Some(reason.clone());
                    warn!(execution_id = %run.ctx.execution_id, node_id = %node.id, reason = %reason, "Node blocked");
                    self.emit(
                        &run.ctx,
                        WorkflowEventType::NodeBlocked,
                        Some(&node.id),
                        json!({ "reason": reason }),
                    );
                }
            }
            self.persist(run)?;
        }
        Ok(())
    }

    /// Starts ready nodes and due retries in declaration order. Parallel
    /// nodes share the `max_parallel` slots; any other node runs alone.
    fn dispatch(&self, run: &mut Run) -> Result<(), PhasegateError> {
        let dag = Arc::clone(&run.dag);
        let cap = self.config.max_parallel.max(1);
        for (index, node) in dag.nodes().enumerate() {
            let candidate = match run.ctx.status_of(&node.id) {
                Some(NodeStatus::Ready) => true,
                Some(NodeStatus::Failed) => run.due.contains(&index),
                _ => false,
            };
            if !candidate {
                continue;
            }
            if run.exclusive {
                break;
            }
            if node.is_parallel() {
                if run.in_flight.len() >= cap {
                    break;
                }
            } else if !run.in_flight.is_empty() {
                break;
            }
            self.start_attempt(run, index, node)?;
            if !node.is_parallel() {
                run.exclusive = true;
                break;
            }
        }
        Ok(())
    }

    fn start_attempt(&self, run: &mut Run, index: usize, node: &WorkflowNode) -> Result<(), PhasegateError> {
        run.due.remove(&index);
        let state = node_state(&mut run.ctx, &node.id)?;
        state.transition(&node.id, NodeStatus::Running)?;
        state.pending_retry = false;
        state.attempt_count += 1;
        state.started_at = Some(iso_timestamp());
        state.ended_at = None;
        let attempt = state.attempt_count;
        run.in_flight.insert(index);

        info!(
            workflow_id = %run.ctx.workflow_id,
            execution_id = %run.ctx.execution_id,
            node_id = %node.id,
            attempt,
            max_attempts = node.retry_policy.max_attempts,
            "Node started"
        );
        self.emit(
            &run.ctx,
            WorkflowEventType::NodeStarted,
            Some(&node.id),
            json!({ "attempt": attempt, "max_attempts": node.retry_policy.max_attempts }),
        );
        self.persist(run)?;

        let dependency_outputs = run
            .dag
            .upstream_of(index)
            .iter()
            .filter_map(|&dep| run.dag.node_at(dep))
            .filter_map(|dep| run.ctx.output(&dep.id).map(|out| (dep.id.clone(), out.clone())))
            .collect();
        let request = NodeRequest {
            workflow_id: run.ctx.workflow_id.clone(),
            execution_id: run.ctx.execution_id.clone(),
            node: node.clone(),
            attempt,
            dependency_outputs,
            global: run.ctx.global.clone(),
        };
        run.pending.push(self.spawn_attempt(index, request));
        Ok(())
    }

    fn spawn_attempt(&self, index: usize, request: NodeRequest) -> JoinHandle<Wake> {
        let task = Arc::clone(&self.task);
        let store = self.artifact_store();
        let timeout = self.config.node_timeout();
        tokio::spawn(async move {
            let timer = SpanTimer::start("node", request.node.id.clone());
            let result = run_attempt(task, request, store, timeout).await;
            Wake::Attempt {
                index,
                elapsed_ms: timer.finish(),
                result,
            }
        })
    }

    fn handle(&self, run: &mut Run, wake: Wake) -> Result<(), PhasegateError> {
        match wake {
            Wake::Attempt {
                index,
                elapsed_ms,
                result,
            } => {
                run.in_flight.remove(&index);
                if run.in_flight.is_empty() {
                    run.exclusive = false;
                }
                match result {
                    Ok((outcome, artifacts)) => self.complete_node(run, index, elapsed_ms, outcome, artifacts),
                    Err(failure) => self.fail_node(run, index, elapsed_ms, &failure),
                }
            }
            Wake::Verified { index, verdicts } => {
                run.verifying.remove(&index);
                self.apply_verdicts(run, index, verdicts)
            }
            Wake::RetryDue(index) => {
                run.due.insert(index);
                Ok(())
            }
        }
    }

    fn complete_node(
        &self,
        run: &mut Run,
        index: usize,
        elapsed_ms: f64,
        outcome: NodeOutcome,
        artifacts: Vec<Artifact>,
    ) -> Result<(), PhasegateError> {
        let dag = Arc::clone(&run.dag);
        let Some(node) = dag.node_at(index) else {
            return Ok(());
        };
        let NodeOutcome {
            output,
            context_updates,
            ..
        } = outcome;
        let verify = !node.output_contracts.is_empty() && self.registry.is_some();

        let state = node_state(&mut run.ctx, &node.id)?;
        state.transition(&node.id, NodeStatus::Completed)?;
        state.ended_at = Some(iso_timestamp());
        state.last_error = None;
        state.output = Some(output.clone());
        state.artifacts.clone_from(&artifacts);
        state.metadata.insert("execution_time_ms".to_string(), json!(elapsed_ms));
        state.verification = verify.then_some(VerificationStatus::Pending);
        let attempt = state.attempt_count;

        run.ctx.outputs.insert(node.id.clone(), output.clone());
        run.ctx
            .artifacts
            .insert(node.id.clone(), artifacts.iter().map(|a| a.path.clone()).collect());
        run.ctx.global.extend(context_updates);

        info!(
            execution_id = %run.ctx.execution_id,
            node_id = %node.id,
            attempt,
            execution_time_ms = elapsed_ms,
            artifacts = artifacts.len(),
            "Node completed"
        );
        self.emit(
            &run.ctx,
            WorkflowEventType::NodeCompleted,
            Some(&node.id),
            json!({
                "attempt": attempt,
                "output_summary": summarize_output(&output),
                "execution_time_ms": elapsed_ms,
                "artifact_count": artifacts.len(),
            }),
        );
        if verify {
            self.spawn_verification(run, index, node, artifacts, output);
        }
        self.persist(run)
    }

    fn fail_node(&self, run: &mut Run, index: usize, elapsed_ms: f64, failure: &TaskFailure) -> Result<(), PhasegateError> {
        let dag = Arc::clone(&run.dag);
        let Some(node) = dag.node_at(index) else {
            return Ok(());
        };
        let cancelling = run.control.cancel_requested();

        let state = node_state(&mut run.ctx, &node.id)?;
        state.transition(&node.id, NodeStatus::Failed)?;
        state.ended_at = Some(iso_timestamp());
        state.last_error = Some(failure.message.clone());
        state.metadata.insert("execution_time_ms".to_string(), json!(elapsed_ms));
        let attempt = state.attempt_count;
        let retry = failure.retryable && !cancelling && node.retry_policy.allows_retry(attempt);
        state.pending_retry = retry;

        warn!(
            execution_id = %run.ctx.execution_id,
            node_id = %node.id,
            attempt,
            retry,
            error = %failure,
            "Node attempt failed"
        );
        self.emit(
            &run.ctx,
            WorkflowEventType::NodeFailed,
            Some(&node.id),
            json!({ "error": failure.message, "retry": retry, "attempt": attempt }),
        );

        if retry {
            let delay = node.retry_policy.delay_for(attempt);
            info!(
                execution_id = %run.ctx.execution_id,
                node_id = %node.id,
                next_attempt = attempt + 1,
                delay_seconds = delay.as_secs_f64(),
                "Retry scheduled"
            );
            self.emit(
                &run.ctx,
                WorkflowEventType::NodeRetry,
                Some(&node.id),
                json!({
                    "attempt": attempt + 1,
                    "max_attempts": node.retry_policy.max_attempts,
                    "delay_seconds": delay.as_secs_f64(),
                }),
            );
            run.pending.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                Wake::RetryDue(index)
            }));
        }
        self.persist(run)
    }

    fn spawn_verification(&self, run: &mut Run, index: usize, node: &WorkflowNode, artifacts: Vec<Artifact>, output: Value) {
        let Some(registry) = self.registry.clone() else {
            return;
        };
        let contracts = node.output_contracts.clone();
        debug!(
            execution_id = %run.ctx.execution_id,
            node_id = %node.id,
            contracts = ?contracts,
            "Verifying output contracts"
        );
        run.verifying.insert(index);
        run.pending.push(tokio::spawn(async move {
            let mut verdicts = Vec::with_capacity(contracts.len());
            for contract_id in contracts {
                let registry = Arc::clone(&registry);
                let artifacts = artifacts.clone();
                let output = output.clone();
                let id = contract_id.clone();
                let joined =
                    tokio::spawn(async move { registry.verify_with_output(&id, &artifacts, Some(&output)).await }).await;
                let verdict = match joined {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(err) => Err(format!("verification did not finish: {err}")),
                };
                verdicts.push((contract_id, verdict));
            }
            Wake::Verified { index, verdicts }
        }));
    }

    /// Re-spawns verification for completed nodes whose verdict was never
    /// recorded, e.g. after resuming from a checkpoint.
    fn restart_verifications(&self, run: &mut Run) {
        let dag = Arc::clone(&run.dag);
        for (index, node) in dag.nodes().enumerate() {
            if run.verifying.contains(&index) {
                continue;
            }
            let Some(state) = run.ctx.node(&node.id) else { continue };
            if state.status != NodeStatus::Completed || state.verification != Some(VerificationStatus::Pending) {
                continue;
            }
            let artifacts = state.artifacts.clone();
            let output = state.output.clone().unwrap_or(Value::Null);
            self.spawn_verification(run, index, node, artifacts, output);
        }
    }

    fn contract_blocks(&self, contract_id: &str) -> bool {
        self.registry
            .as_ref()
            .and_then(|r| r.get(contract_id))
            .map_or(true, |c| c.is_blocking && c.waiver.is_none())
    }

    fn apply_verdicts(
        &self,
        run: &mut Run,
        index: usize,
        verdicts: Vec<(String, Result<VerificationResult, String>)>,
    ) -> Result<(), PhasegateError> {
        let dag = Arc::clone(&run.dag);
        let Some(node) = dag.node_at(index) else {
            return Ok(());
        };
        let mut breached = Vec::new();
        let mut report = Map::new();

        for (contract_id, verdict) in verdicts {
            match verdict {
                Ok(result) if result.passed => {
                    info!(
                        execution_id = %run.ctx.execution_id,
                        node_id = %node.id,
                        contract_id = %contract_id,
                        score = result.score(),
                        "Output contract verified"
                    );
                    self.emit(
                        &run.ctx,
                        WorkflowEventType::ContractVerified,
                        Some(&node.id),
                        json!({ "contract_id": contract_id, "score": result.score(), "duration_ms": result.duration_ms }),
                    );
                    report.insert(contract_id, json!({ "passed": true, "score": result.score() }));
                }
                Ok(result) => {
                    let blocking = self.contract_blocks(&contract_id);
                    let failed = result.failed_critical();
                    warn!(
                        execution_id = %run.ctx.execution_id,
                        node_id = %node.id,
                        contract_id = %contract_id,
                        blocking,
                        failed = ?failed,
                        "Output contract breached"
                    );
                    self.emit(
                        &run.ctx,
                        WorkflowEventType::ContractBreached,
                        Some(&node.id),
                        json!({ "contract_id": contract_id, "blocking": blocking, "failed_criteria": failed }),
                    );
                    report.insert(
                        contract_id.clone(),
                        json!({ "passed": false, "blocking": blocking, "failed_criteria": failed }),
                    );
                    if blocking {
                        breached.push(contract_id);
                    }
                }
                Err(message) => {
                    error!(
                        execution_id = %run.ctx.execution_id,
                        node_id = %node.id,
                        contract_id = %contract_id,
                        error = %message,
                        "Output contract verification errored"
                    );
                    self.emit(
                        &run.ctx,
                        WorkflowEventType::ContractBreached,
                        Some(&node.id),
                        json!({ "contract_id": contract_id, "blocking": true, "error": message }),
                    );
                    report.insert(contract_id.clone(), json!({ "passed": false, "error": message }));
                    breached.push(contract_id);
                }
            }
        }

        let state = node_state(&mut run.ctx, &node.id)?;
        state.metadata.insert("contracts".to_string(), Value::Object(report));
        if breached.is_empty() {
            state.verification = Some(VerificationStatus::Passed);
        } else {
            state.transition(&node.id, NodeStatus::Failed)?;
            state.verification = Some(VerificationStatus::Failed);
            state.pending_retry = false;
            let message = format!("output contract breached: {}", breached.join(", "));
            state.last_error = Some(message.clone());
            warn!(
                execution_id = %run.ctx.execution_id,
                node_id = %node.id,
                contracts = ?breached,
                "Node clawed back after contract breach"
            );
            self.emit(
                &run.ctx,
                WorkflowEventType::NodeFailed,
                Some(&node.id),
                json!({ "error": message, "retry": false, "clawback": true, "contracts": breached }),
            );
        }
        self.persist(run)
    }

    fn recover_nodes(&self, run: &mut Run) -> Result<(), PhasegateError> {
        let dag = Arc::clone(&run.dag);
        for (index, node) in dag.nodes().enumerate() {
            let state = node_state(&mut run.ctx, &node.id)?;
            match state.status {
                NodeStatus::Running => {
                    state.transition(&node.id, NodeStatus::Failed)?;
                    state.ended_at = Some(iso_timestamp());
                    let message = "attempt interrupted before completion".to_string();
                    state.last_error = Some(message.clone());
                    let retry = node.retry_policy.allows_retry(state.attempt_count);
                    state.pending_retry = retry;
                    let attempt = state.attempt_count;
                    if retry {
                        run.due.insert(index);
                    }
                    warn!(
                        execution_id = %run.ctx.execution_id,
                        node_id = %node.id,
                        attempt,
                        retry,
                        "Recovered interrupted attempt"
                    );
                    self.emit(
                        &run.ctx,
                        WorkflowEventType::NodeFailed,
                        Some(&node.id),
                        json!({ "error": message, "retry": retry, "attempt": attempt, "interrupted": true }),
                    );
                }
                NodeStatus::Ready => state.transition(&node.id, NodeStatus::Pending)?,
                NodeStatus::Failed if state.pending_retry => {
                    run.due.insert(index);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Cancels nodes that were waiting to be dispatched or retried.
    fn cancel_waiting(&self, run: &mut Run) -> Result<(), PhasegateError> {
        let dag = Arc::clone(&run.dag);
        let mut changed = false;
        for node in dag.nodes() {
            let Some(state) = run.ctx.node_mut(&node.id) else { continue };
            let waiting = state.status == NodeStatus::Ready || (state.status == NodeStatus::Failed && state.pending_retry);
            if waiting {
                state.transition(&node.id, NodeStatus::Cancelled)?;
                state.pending_retry = false;
                state.ended_at = Some(iso_timestamp());
                changed = true;
                debug!(execution_id = %run.ctx.execution_id, node_id = %node.id, "Node cancelled");
            }
        }
        run.due.clear();
        if changed {
            self.persist(run)?;
        }
        Ok(())
    }

    fn finish_cancelled(&self, mut run: Run) -> Result<WorkflowContext, PhasegateError> {
        let execution_id = run.ctx.execution_id.clone();
        run.ctx.status.check_transition(&execution_id, WorkflowStatus::Cancelled)?;
        run.ctx.status = WorkflowStatus::Cancelled;
        info!(workflow_id = %run.ctx.workflow_id, execution_id = %execution_id, "Workflow cancelled");
        self.emit(&run.ctx, WorkflowEventType::WorkflowCancelled, None, json!({}));
        self.persist(&mut run)?;
        Ok(run.ctx)
    }

    fn finish_paused(&self, mut run: Run) -> Result<WorkflowContext, PhasegateError> {
        let execution_id = run.ctx.execution_id.clone();
        run.ctx.status.check_transition(&execution_id, WorkflowStatus::Paused)?;
        run.ctx.status = WorkflowStatus::Paused;
        let pending_retries = run.ctx.node_states.values().filter(|s| s.pending_retry).count();
        info!(
            workflow_id = %run.ctx.workflow_id,
            execution_id = %execution_id,
            pending_retries,
            "Workflow paused"
        );
        self.emit(&run.ctx, WorkflowEventType::WorkflowPaused, None, json!({}));
        self.persist(&mut run)?;
        Ok(run.ctx)
    }

    /// Ends an execution that can make no further progress. Nodes still
    /// pending here wait on something that will never happen and are blocked.
    fn finish(&self, mut run: Run) -> Result<WorkflowContext, PhasegateError> {
        let dag = Arc::clone(&run.dag);
        for node in dag.nodes() {
            if run.ctx.status_of(&node.id) != Some(NodeStatus::Pending) {
                continue;
            }
            let reason = "waiting on dependencies or input contracts that can no longer progress".to_string();
            let state = node_state(&mut run.ctx, &node.id)?;
            state.transition(&node.id, NodeStatus::Blocked)?;
            state.last_error = Some(reason.clone());
            warn!(execution_id = %run.ctx.execution_id, node_id = %node.id, "Node can never become ready");
            self.emit(
                &run.ctx,
                WorkflowEventType::NodeBlocked,
                Some(&node.id),
                json!({ "reason": reason }),
            );
        }

        let failed = run
            .ctx
            .node_states
            .values()
            .any(|s| matches!(s.status, NodeStatus::Failed | NodeStatus::Blocked));
        let next = if failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        let execution_id = run.ctx.execution_id.clone();
        run.ctx.status.check_transition(&execution_id, next)?;
        run.ctx.status = next;

        let summary = ExecutionSummary::from_context(&dag, &run.ctx);
        let data = json!({ "counts": summary.counts, "total_attempts": summary.total_attempts });
        if failed {
            let failing: Vec<&str> = summary.failures.iter().map(|f| f.node_id.as_str()).collect();
            warn!(
                workflow_id = %run.ctx.workflow_id,
                execution_id = %execution_id,
                failing = ?failing,
                "Workflow failed"
            );
            self.emit(&run.ctx, WorkflowEventType::WorkflowFailed, None, data);
        } else {
            info!(workflow_id = %run.ctx.workflow_id, execution_id = %execution_id, "Workflow completed");
            self.emit(&run.ctx, WorkflowEventType::WorkflowCompleted, None, data);
        }
        self.persist(&mut run)?;
        Ok(run.ctx)
    }
}

async fn run_attempt(
    task: Arc<dyn NodeTask>,
    request: NodeRequest,
    store: Option<Arc<ArtifactStore>>,
    timeout: Option<Duration>,
) -> Result<(NodeOutcome, Vec<Artifact>), TaskFailure> {
    let probe = request.clone();
    let handle = tokio::spawn(async move { task.run(request).await });
    let abort = handle.abort_handle();
    let joined = match timeout {
        Some(limit) => {
            if let Ok(joined) = tokio::time::timeout(limit, handle).await {
                joined
            } else {
                abort.abort();
                return Err(TaskFailure::retryable(format!(
                    "attempt timed out after {:.3}s",
                    limit.as_secs_f64()
                )));
            }
        }
        None => handle.await,
    };
    let outcome = match joined {
        Ok(result) => result?,
        Err(err) => return Err(TaskFailure::fatal(format!("task did not finish: {err}"))),
    };
    let artifacts = store_artifacts(&probe, &outcome, store.as_deref())?;
    Ok((outcome, artifacts))
}

fn store_artifacts(
    request: &NodeRequest,
    outcome: &NodeOutcome,
    store: Option<&ArtifactStore>,
) -> Result<Vec<Artifact>, TaskFailure> {
    if outcome.artifacts.is_empty() {
        return Ok(Vec::new());
    }
    let Some(store) = store else {
        return Err(TaskFailure::fatal("node produced artifacts but no artifact store is configured"));
    };
    outcome
        .artifacts
        .iter()
        .map(|produced| {
            store
                .store(&produced.content, produced.spec(request))
                .map_err(|err| TaskFailure::retryable(format!("storing artifact failed: {err}")))
        })
        .collect()
}

fn check_graph_matches(dag: &WorkflowDag, ctx: &WorkflowContext) -> Result<(), GraphValidationError> {
    if ctx.workflow_id != dag.id() {
        return Err(GraphValidationError::new(format!(
            "Checkpoint {} belongs to workflow '{}', not '{}'",
            ctx.execution_id,
            ctx.workflow_id,
            dag.id()
        )));
    }
    let missing: Vec<String> = dag
        .nodes()
        .filter(|n| ctx.node(&n.id).is_none())
        .map(|n| n.id.clone())
        .collect();
    if !missing.is_empty() || ctx.node_states.len() != dag.len() {
        return Err(GraphValidationError::new(format!(
            "Checkpoint {} does not match the nodes of workflow '{}'",
            ctx.execution_id,
            dag.id()
        ))
        .with_nodes(missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::workflow::RetryPolicy;

    fn quick_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_delay_seconds(0.001)
            .with_exponential_backoff(false)
    }

    fn chain() -> WorkflowDag {
        WorkflowDag::new(
            "chain",
            "Chain",
            vec![
                WorkflowNode::new("a", "A"),
                WorkflowNode::new("b", "B").depends_on(&["a"]),
            ],
            Map::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_summarize_output_truncates() {
        assert_eq!(summarize_output(&json!("short")), "short");
        let long = "x".repeat(OUTPUT_SUMMARY_LIMIT + 10);
        let summary = summarize_output(&json!(long));
        assert_eq!(summary.chars().count(), OUTPUT_SUMMARY_LIMIT + 3);
        assert!(summary.ends_with("..."));
    }

    #[tokio::test]
    async fn test_closure_task_runs_chain() {
        let task = |request: NodeRequest| -> Result<NodeOutcome, TaskFailure> {
            Ok(NodeOutcome::new(json!({ "ran": request.node.id })))
        };
        let sink = Arc::new(CollectingEventSink::new());
        let executor = DagExecutor::new(Arc::new(task)).with_event_sink(sink.clone());

        let ctx = executor.execute(&chain(), Map::new()).await.unwrap();
        assert_eq!(ctx.status, WorkflowStatus::Completed);
        assert_eq!(ctx.output("b"), Some(&json!({ "ran": "b" })));
        assert!(sink.position(WorkflowEventType::NodeCompleted, "a") < sink.position(WorkflowEventType::NodeStarted, "b"));
        assert_eq!(executor.status(&ctx.execution_id).unwrap(), WorkflowStatus::Completed);
        assert!(!executor.is_active(&ctx.execution_id));
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let task = |_: NodeRequest| -> Result<NodeOutcome, TaskFailure> { Err(TaskFailure::fatal("bad input")) };
        let dag = WorkflowDag::new(
            "one",
            "One",
            vec![WorkflowNode::new("a", "A").with_retry_policy(quick_retry(3))],
            Map::new(),
        )
        .unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let executor = DagExecutor::new(Arc::new(task)).with_event_sink(sink.clone());

        let ctx = executor.execute(&dag, Map::new()).await.unwrap();
        assert_eq!(ctx.status, WorkflowStatus::Failed);
        assert_eq!(ctx.node("a").unwrap().attempt_count, 1);
        assert!(sink.events_of_type(WorkflowEventType::NodeRetry).is_empty());
    }

    #[tokio::test]
    async fn test_retries_stop_at_max_attempts() {
        let task = |_: NodeRequest| -> Result<NodeOutcome, TaskFailure> { Err(TaskFailure::retryable("flaky")) };
        let dag = WorkflowDag::new(
            "one",
            "One",
            vec![
                WorkflowNode::new("a", "A").with_retry_policy(quick_retry(3)),
                WorkflowNode::new("b", "B").depends_on(&["a"]),
            ],
            Map::new(),
        )
        .unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let executor = DagExecutor::new(Arc::new(task)).with_event_sink(sink.clone());

        let ctx = executor.execute(&dag, Map::new()).await.unwrap();
        assert_eq!(ctx.node("a").unwrap().attempt_count, 3);
        assert_eq!(sink.node_events(WorkflowEventType::NodeRetry, "a").len(), 2);
        assert_eq!(ctx.status_of("b"), Some(NodeStatus::Blocked));
        assert_eq!(ctx.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_contract_rejected_at_submit() {
        let task = |_: NodeRequest| -> Result<NodeOutcome, TaskFailure> { Ok(NodeOutcome::default()) };
        let dag = WorkflowDag::new(
            "wf",
            "wf",
            vec![WorkflowNode::new("a", "A").with_output_contracts(&["API_404"])],
            Map::new(),
        )
        .unwrap();

        let executor = DagExecutor::new(Arc::new(task));
        let err = executor.execute(&dag, Map::new()).await.unwrap_err();
        match err {
            PhasegateError::Validation(err) => {
                assert_eq!(err.code(), Some(codes::UNKNOWN_CONTRACT));
                assert_eq!(err.nodes, vec!["a".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let executor = executor.with_registry(Arc::new(ContractRegistry::new()));
        assert!(executor.execute(&dag, Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_node_timeout_is_retryable() {
        struct Slow;

        #[async_trait::async_trait]
        impl NodeTask for Slow {
            async fn run(&self, request: NodeRequest) -> Result<NodeOutcome, TaskFailure> {
                if request.attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(NodeOutcome::new(json!(request.attempt)))
            }
        }

        let dag = WorkflowDag::new(
            "wf",
            "wf",
            vec![WorkflowNode::new("a", "A").with_retry_policy(quick_retry(2))],
            Map::new(),
        )
        .unwrap();
        let executor = DagExecutor::new(Arc::new(Slow)).with_config(ExecutorConfig::default().with_node_timeout(0.05));

        let ctx = executor.execute(&dag, Map::new()).await.unwrap();
        assert_eq!(ctx.status, WorkflowStatus::Completed);
        assert_eq!(ctx.output("a"), Some(&json!(2)));
        assert_eq!(ctx.node("a").unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_artifacts_without_store_fail_the_node() {
        use crate::artifacts::ArtifactRole;
        use crate::executor::ProducedArtifact;

        let task = |_: NodeRequest| -> Result<NodeOutcome, TaskFailure> {
            Ok(NodeOutcome::new(json!(null))
                .with_artifact(ProducedArtifact::new(b"x".to_vec(), ArtifactRole::Report, "text/plain")))
        };
        let executor = DagExecutor::new(Arc::new(task));
        let ctx = executor.execute(&chain(), Map::new()).await.unwrap();
        let a = ctx.node("a").unwrap();
        assert_eq!(a.status, NodeStatus::Failed);
        assert_eq!(a.attempt_count, 1);
        assert!(a.last_error.as_deref().unwrap().contains("no artifact store"));
    }

    #[tokio::test]
    async fn test_pause_and_cancel_unknown_execution() {
        let task = |_: NodeRequest| -> Result<NodeOutcome, TaskFailure> { Ok(NodeOutcome::default()) };
        let executor = DagExecutor::new(Arc::new(task));
        assert!(matches!(executor.pause("nope"), Err(PhasegateError::ExecutionNotFound(_))));
        assert!(matches!(executor.cancel("nope"), Err(PhasegateError::ExecutionNotFound(_))));
        assert!(matches!(executor.resume("nope").await, Err(PhasegateError::ExecutionNotFound(_))));
    }

    #[test]
    fn test_cancel_interrupted_checkpoint_cancels_running_nodes() {
        let dag = chain();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let mut crashed = WorkflowContext::for_dag(&dag, "exec-crash", Map::new());
        crashed.status = WorkflowStatus::Running;
        {
            let a = crashed.node_mut("a").unwrap();
            a.status = NodeStatus::Running;
            a.attempt_count = 1;
        }
        crashed.touch();
        store.save(&crashed).unwrap();

        let task = |_: NodeRequest| -> Result<NodeOutcome, TaskFailure> { Ok(NodeOutcome::default()) };
        let executor = DagExecutor::new(Arc::new(task)).with_checkpoint_store(store);
        executor.cancel("exec-crash").unwrap();

        let ctx = executor.context("exec-crash").unwrap();
        assert_eq!(ctx.status, WorkflowStatus::Cancelled);
        assert_eq!(ctx.status_of("a"), Some(NodeStatus::Cancelled));
        assert_eq!(ctx.status_of("b"), Some(NodeStatus::Pending));
        assert!(ctx.nodes_with_status(NodeStatus::Running).is_empty());
    }

    #[tokio::test]
    async fn test_context_updates_merge_into_global() {
        let task = |request: NodeRequest| -> Result<NodeOutcome, TaskFailure> {
            let seen = request.global.get("env").cloned().unwrap_or(Value::Null);
            Ok(NodeOutcome::new(seen).with_context_update(format!("{}_done", request.node.id), json!(true)))
        };
        let mut global = Map::new();
        global.insert("env".into(), json!("staging"));
        let executor = DagExecutor::new(Arc::new(task));

        let ctx = executor.execute(&chain(), global).await.unwrap();
        assert_eq!(ctx.global("a_done"), Some(&json!(true)));
        assert_eq!(ctx.global("b_done"), Some(&json!(true)));
        assert_eq!(ctx.output("b"), Some(&json!("staging")));
    }
}
