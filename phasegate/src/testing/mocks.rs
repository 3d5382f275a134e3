//! Scripted and recording node tasks.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::executor::{NodeOutcome, NodeRequest, NodeTask, ProducedArtifact, TaskFailure};

#[derive(Debug, Clone, Default)]
struct Script {
    failures: u32,
    fatal: bool,
    output: Option<Value>,
    delay: Option<Duration>,
    artifacts: Vec<ProducedArtifact>,
    context_updates: Map<String, Value>,
}

/// A task whose behaviour is scripted per node.
///
/// Unscripted nodes succeed with `{"node": <id>}`. Failure scripts key off
/// the attempt number, so they behave the same across pause and resume.
#[derive(Debug, Default)]
pub struct ScriptedTask {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedTask {
    /// Creates a task where every node succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&mut self, node_id: &str) -> &mut Script {
        self.scripts.entry(node_id.to_string()).or_default()
    }

    /// Fails the first `times` attempts of a node with a retryable error.
    #[must_use]
    pub fn fail_times(mut self, node_id: &str, times: u32) -> Self {
        self.script(node_id).failures = times;
        self
    }

    /// Fails every attempt of a node with a non-retryable error.
    #[must_use]
    pub fn fail_fatally(mut self, node_id: &str) -> Self {
        let script = self.script(node_id);
        script.fatal = true;
        script.failures = u32::MAX;
        self
    }

    /// Sets the output of a node.
    #[must_use]
    pub fn with_output(mut self, node_id: &str, output: Value) -> Self {
        self.script(node_id).output = Some(output);
        self
    }

    /// Delays every attempt of a node.
    #[must_use]
    pub fn with_delay(mut self, node_id: &str, delay: Duration) -> Self {
        self.script(node_id).delay = Some(delay);
        self
    }

    /// Adds an artifact to a node's outcome.
    #[must_use]
    pub fn with_artifact(mut self, node_id: &str, artifact: ProducedArtifact) -> Self {
        self.script(node_id).artifacts.push(artifact);
        self
    }

    /// Adds a global context update to a node's outcome.
    #[must_use]
    pub fn with_context_update(mut self, node_id: &str, key: impl Into<String>, value: Value) -> Self {
        self.script(node_id).context_updates.insert(key.into(), value);
        self
    }

    /// Returns how many attempts of a node were run.
    #[must_use]
    pub fn attempts(&self, node_id: &str) -> u32 {
        self.calls.lock().get(node_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl NodeTask for ScriptedTask {
    async fn run(&self, request: NodeRequest) -> Result<NodeOutcome, TaskFailure> {
        let node_id = request.node.id.clone();
        *self.calls.lock().entry(node_id.clone()).or_insert(0) += 1;
        let script = self.scripts.get(&node_id).cloned().unwrap_or_default();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if script.fatal {
            return Err(TaskFailure::fatal(format!("{node_id} failed permanently")));
        }
        if request.attempt <= script.failures {
            return Err(TaskFailure::retryable(format!(
                "{node_id} failed on attempt {}",
                request.attempt
            )));
        }

        let mut outcome = NodeOutcome::new(script.output.unwrap_or_else(|| json!({ "node": node_id })));
        outcome.artifacts = script.artifacts;
        outcome.context_updates = script.context_updates;
        Ok(outcome)
    }
}

/// A start or finish observed by a [`RecordingTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// An attempt began.
    Started {
        /// Node id.
        node_id: String,
        /// Attempt number.
        attempt: u32,
        /// Dependencies whose outputs were passed in.
        inputs: Vec<String>,
    },
    /// An attempt returned.
    Finished {
        /// Node id.
        node_id: String,
        /// Whether it succeeded.
        succeeded: bool,
    },
}

/// Wraps another task and records dispatch order and concurrency.
pub struct RecordingTask {
    inner: Arc<dyn NodeTask>,
    log: Mutex<Vec<Recorded>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl std::fmt::Debug for RecordingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTask")
            .field("log", &self.log.lock().len())
            .field("peak", &self.peak.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RecordingTask {
    /// Records calls to `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn NodeTask>) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Returns everything recorded so far.
    #[must_use]
    pub fn log(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    /// Returns node ids in the order their attempts started.
    #[must_use]
    pub fn start_order(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Started { node_id, .. } => Some(node_id.clone()),
                Recorded::Finished { .. } => None,
            })
            .collect()
    }

    /// Returns how many attempts of a node started.
    #[must_use]
    pub fn starts(&self, node_id: &str) -> usize {
        self.start_order().iter().filter(|id| *id == node_id).count()
    }

    /// Returns the most attempts that were ever running at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns true if every attempt of `later` started after the last
    /// successful attempt of `earlier` finished.
    #[must_use]
    pub fn started_after(&self, later: &str, earlier: &str) -> bool {
        let log = self.log.lock();
        let finished = log.iter().rposition(
            |r| matches!(r, Recorded::Finished { node_id, succeeded: true } if node_id == earlier),
        );
        let first_start = log
            .iter()
            .position(|r| matches!(r, Recorded::Started { node_id, .. } if node_id == later));
        match (finished, first_start) {
            (Some(finished), Some(start)) => start > finished,
            _ => false,
        }
    }
}

#[async_trait]
impl NodeTask for RecordingTask {
    async fn run(&self, request: NodeRequest) -> Result<NodeOutcome, TaskFailure> {
        let node_id = request.node.id.clone();
        let mut inputs: Vec<String> = request.dependency_outputs.keys().cloned().collect();
        inputs.sort();
        self.log.lock().push(Recorded::Started {
            node_id: node_id.clone(),
            attempt: request.attempt,
            inputs,
        });
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = self.inner.run(request).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().push(Recorded::Finished {
            node_id,
            succeeded: result.is_ok(),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowNode;

    fn request(node: &str, attempt: u32) -> NodeRequest {
        NodeRequest {
            workflow_id: "wf".into(),
            execution_id: "exec".into(),
            node: WorkflowNode::new(node, node),
            attempt,
            dependency_outputs: HashMap::new(),
            global: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_failures_follow_attempts() {
        let task = ScriptedTask::new()
            .fail_times("backend", 1)
            .with_output("design", json!({"pages": 3}));

        let failure = task.run(request("backend", 1)).await.unwrap_err();
        assert!(failure.retryable);
        assert!(task.run(request("backend", 2)).await.is_ok());
        assert_eq!(task.attempts("backend"), 2);

        let outcome = task.run(request("design", 1)).await.unwrap();
        assert_eq!(outcome.output, json!({"pages": 3}));
        let outcome = task.run(request("other", 1)).await.unwrap();
        assert_eq!(outcome.output, json!({"node": "other"}));
    }

    #[tokio::test]
    async fn test_fatal_script() {
        let task = ScriptedTask::new().fail_fatally("deploy");
        let failure = task.run(request("deploy", 5)).await.unwrap_err();
        assert!(!failure.retryable);
    }

    #[tokio::test]
    async fn test_recording_task_tracks_order() {
        let task = RecordingTask::new(Arc::new(ScriptedTask::new().fail_times("b", 1)));
        task.run(request("a", 1)).await.unwrap();
        assert!(task.run(request("b", 1)).await.is_err());
        task.run(request("b", 2)).await.unwrap();

        assert_eq!(task.start_order(), vec!["a", "b", "b"]);
        assert_eq!(task.starts("b"), 2);
        assert!(task.started_after("b", "a"));
        assert!(!task.started_after("a", "b"));
        assert_eq!(task.peak_concurrency(), 1);
    }
}
