//! The orchestrator: one perceive → analyze → plan → execute → report cycle
//! at a time, plus the feedback entry point.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{ExecutorError, FeedbackError, OrchestratorError};
use crate::memory::model::now_micros;
use crate::memory::{
    EventStore, FeedbackKind, FeedbackOutcome, LearningEngine, LearningSummary, Memory,
    PreferenceStore,
};
use crate::monitor::{PerformanceMonitor, RealTimeStats};
use crate::pipeline::fanout::{Analyzers, BranchReport, FanOut, fan_out};
use crate::pipeline::plan::{ExecutionPlan, GateThresholds};
use crate::pipeline::state::OrchestratorState;
use crate::pipeline::types::{ActionExecutor, PlannedAction, Record, RecordSource};
use crate::tools::ToolKind;

/// Event type of the per-cycle summary.
pub const WORKFLOW_EVENT: &str = "workflow_execution";
/// Event type of the per-record analysis summary that feedback refers to.
pub const RECORD_ANALYSIS_EVENT: &str = "record_analysis";

const WORKFLOW_IMPORTANCE: f64 = 0.8;
const RECORD_ANALYSIS_IMPORTANCE: f64 = 0.5;
const ORCHESTRATOR_OWNER: &str = "orchestrator";
const EXECUTOR_OWNER: &str = "executor";

/// External collaborators one orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn RecordSource>,
    pub analyzers: Analyzers,
    pub executor: Arc<dyn ActionExecutor>,
}

/// An immediate action that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub record_id: String,
    pub action: String,
    pub kind: String,
    pub message: String,
}

/// Outcome counts of the executing stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTally {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ActionFailure>,
}

/// Summary of one cycle. Persisted as a `workflow_execution` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub record_count: usize,
    pub branches: Vec<BranchReport>,
    pub thresholds: Option<GateThresholds>,
    pub plan: ExecutionPlan,
    pub tally: ExecutionTally,
    /// False when every analysis branch failed, the source failed, or the
    /// cycle hit a catastrophic error.
    pub success: bool,
    pub error: Option<String>,
    /// ID of the persisted summary event, when persisting succeeded.
    pub event_id: Option<Uuid>,
    /// Record ID → `record_analysis` event ID, for submitting feedback.
    pub analysis_events: BTreeMap<String, Uuid>,
}

impl WorkflowExecution {
    fn begin() -> Self {
        Self {
            id: Uuid::now_v7(),
            started_at: now_micros(),
            ended_at: None,
            record_count: 0,
            branches: Vec::new(),
            thresholds: None,
            plan: ExecutionPlan::default(),
            tally: ExecutionTally::default(),
            success: true,
            error: None,
            event_id: None,
            analysis_events: BTreeMap::new(),
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.success = false;
        self.error = Some(reason.into());
    }
}

/// Snapshot of the orchestrator for callers.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub cycles_run: u64,
    pub unsuccessful_cycles: u64,
    pub actions_executed: u64,
    pub feedback_received: u64,
    pub last_execution_id: Option<Uuid>,
    pub thresholds: GateThresholds,
    pub batch_size: usize,
    pub worker_pool_size: usize,
}

/// Final statistics logged at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub status: OrchestratorStatus,
    pub monitor: RealTimeStats,
    pub learning: LearningSummary,
}

#[derive(Default)]
struct Counters {
    cycles_run: AtomicU64,
    unsuccessful_cycles: AtomicU64,
    actions_executed: AtomicU64,
    feedback_received: AtomicU64,
}

/// Tool timing captured while executing, reported to the monitor afterwards.
struct ActionTiming {
    tool: ToolKind,
    elapsed: Duration,
    success: bool,
}

/// Coordinates analysis, gating and execution over batches of records.
pub struct Orchestrator {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    events: Arc<EventStore>,
    preferences: Arc<PreferenceStore>,
    learning: Arc<LearningEngine>,
    monitor: Arc<PerformanceMonitor>,
    pool: Arc<Semaphore>,
    state: Mutex<OrchestratorState>,
    /// Held for the whole cycle; cycles never overlap.
    cycle_lock: tokio::sync::Mutex<()>,
    counters: Counters,
    last_execution: RwLock<Option<WorkflowExecution>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        memory: &Memory,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            config,
            collaborators,
            events: memory.events.clone(),
            preferences: memory.preferences.clone(),
            learning: memory.learning.clone(),
            monitor,
            pool,
            state: Mutex::new(OrchestratorState::Idle),
            cycle_lock: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
            last_execution: RwLock::new(None),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, target: OrchestratorState) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let from = *state;
        *state = from.transition(target)?;
        debug!(from = %from, to = %target, "Orchestrator state changed");
        Ok(())
    }

    /// The most recent cycle, including a partial one that failed.
    pub fn last_execution(&self) -> Option<WorkflowExecution> {
        self.last_execution
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Cycle ───────────────────────────────────────────────────────

    /// Run one full cycle over the next batch.
    ///
    /// Branch and action failures are contained in the returned execution.
    /// Only a catastrophic error is returned as `Err`, after which the
    /// orchestrator is `Failed` and every later call returns `Halted`.
    pub async fn run_cycle(&self) -> Result<WorkflowExecution, OrchestratorError> {
        let _cycle = self.cycle_lock.lock().await;
        if self.state().is_terminal() {
            return Err(OrchestratorError::Halted);
        }
        let _reset = IdleOnDrop(&self.state);

        let cycle_started = Instant::now();
        let mut exec = WorkflowExecution::begin();
        info!(workflow_id = %exec.id, "Workflow cycle started");

        // Perceiving
        self.set_state(OrchestratorState::Perceiving)?;
        let records = match self
            .collaborators
            .source
            .fetch_batch(self.config.batch_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(workflow_id = %exec.id, error = %e, "Failed to fetch batch");
                exec.fail(e.to_string());
                self.set_state(OrchestratorState::Reporting)?;
                self.report(&mut exec, &[], &FanOut::default(), &[], cycle_started)
                    .await;
                self.set_state(OrchestratorState::Idle)?;
                return Ok(exec);
            }
        };

        exec.record_count = records.len();
        if records.is_empty() {
            debug!(workflow_id = %exec.id, "Empty batch");
            self.set_state(OrchestratorState::Reporting)?;
            self.report(&mut exec, &[], &FanOut::default(), &[], cycle_started)
                .await;
            self.set_state(OrchestratorState::Idle)?;
            return Ok(exec);
        }

        // Analyzing
        self.set_state(OrchestratorState::Analyzing)?;
        let records: Arc<[Record]> = records.into();
        let analysis = fan_out(
            &self.collaborators.analyzers,
            records.clone(),
            self.pool.clone(),
            self.config.branch_timeout,
        )
        .await;
        exec.branches = analysis.reports.clone();
        if analysis.all_failed() {
            warn!(workflow_id = %exec.id, "All analysis branches failed");
            exec.fail("all analysis branches failed");
        }

        // Planning
        self.set_state(OrchestratorState::Planning)?;
        let thresholds = GateThresholds::resolve(&self.config, &self.preferences);
        exec.thresholds = Some(thresholds);
        exec.plan = ExecutionPlan::build(&analysis, &thresholds);

        // Executing
        self.set_state(OrchestratorState::Executing)?;
        let (timings, catastrophic) = self.execute(&mut exec).await;

        if let Some(e) = catastrophic {
            error!(workflow_id = %exec.id, error = %e, "Catastrophic failure while executing");
            self.set_state(OrchestratorState::Failed)?;
            exec.fail(e.to_string());
            self.report(&mut exec, &records, &analysis, &timings, cycle_started)
                .await;
            return Err(OrchestratorError::Catastrophic {
                stage: OrchestratorState::Executing.to_string(),
                reason: e.to_string(),
            });
        }

        // Reporting
        self.set_state(OrchestratorState::Reporting)?;
        self.report(&mut exec, &records, &analysis, &timings, cycle_started)
            .await;
        self.set_state(OrchestratorState::Idle)?;

        info!(
            workflow_id = %exec.id,
            records = exec.record_count,
            succeeded = exec.tally.succeeded,
            failed = exec.tally.failed,
            needs_approval = exec.plan.needs_approval.len(),
            success = exec.success,
            "Workflow cycle completed"
        );
        Ok(exec)
    }

    /// Apply every immediate action. Successes move to `completed`; the
    /// rest stay in `immediate`. Stops early only on a catastrophic error.
    async fn execute(
        &self,
        exec: &mut WorkflowExecution,
    ) -> (Vec<ActionTiming>, Option<ExecutorError>) {
        let pending = std::mem::take(&mut exec.plan.immediate);
        let mut remaining = Vec::new();
        let mut timings = Vec::with_capacity(pending.len());
        let mut catastrophic = None;

        let mut actions = pending.into_iter();
        for action in actions.by_ref() {
            let tool = ToolKind::for_action(&action.action);
            let started = Instant::now();
            let result = self.collaborators.executor.apply(&action).await;
            let elapsed = started.elapsed();

            match result {
                Ok(true) => {
                    timings.push(ActionTiming {
                        tool,
                        elapsed,
                        success: true,
                    });
                    exec.tally.succeeded += 1;
                    exec.plan.completed.push(action);
                }
                Ok(false) => {
                    timings.push(ActionTiming {
                        tool,
                        elapsed,
                        success: false,
                    });
                    record_failure(exec, &action, "declined", "executor declined the action");
                    remaining.push(action);
                }
                Err(e) if e.is_catastrophic() => {
                    timings.push(ActionTiming {
                        tool,
                        elapsed,
                        success: false,
                    });
                    record_failure(exec, &action, e.kind(), &e.to_string());
                    remaining.push(action);
                    catastrophic = Some(e);
                    break;
                }
                Err(e) => {
                    timings.push(ActionTiming {
                        tool,
                        elapsed,
                        success: false,
                    });
                    warn!(
                        record_id = %action.record_id,
                        action = %action.action.key(),
                        error = %e,
                        "Action failed"
                    );
                    record_failure(exec, &action, e.kind(), &e.to_string());
                    remaining.push(action);
                }
            }
        }
        remaining.extend(actions);
        exec.plan.immediate = remaining;

        self.counters
            .actions_executed
            .fetch_add(exec.tally.succeeded as u64, Ordering::Relaxed);
        (timings, catastrophic)
    }

    /// Persist the cycle and feed the monitor. Storage failures are logged
    /// and otherwise ignored.
    async fn report(
        &self,
        exec: &mut WorkflowExecution,
        records: &[Record],
        analysis: &FanOut,
        timings: &[ActionTiming],
        cycle_started: Instant,
    ) {
        exec.ended_at = Some(now_micros());
        exec.analysis_events = self.persist_record_analyses(exec.id, records, analysis).await;

        match serde_json::to_value(&*exec) {
            Ok(payload) => {
                match self
                    .events
                    .append(
                        WORKFLOW_EVENT,
                        payload,
                        WORKFLOW_IMPORTANCE,
                        ["workflow", "email_processing"],
                    )
                    .await
                {
                    Ok(id) => exec.event_id = Some(id),
                    Err(e) => warn!(workflow_id = %exec.id, error = %e, "Workflow event not stored"),
                }
            }
            Err(e) => warn!(workflow_id = %exec.id, error = %e, "Workflow event not serializable"),
        }

        for branch in &exec.branches {
            self.monitor.record_operation(
                branch.branch.owner(),
                "analyze",
                Duration::from_secs_f64(branch.elapsed_secs),
                branch.success,
                branch.error_kind.as_deref(),
            );
        }
        for timing in timings {
            self.monitor.record_tool_usage(
                EXECUTOR_OWNER,
                timing.tool.as_str(),
                timing.elapsed,
                timing.success,
            );
        }
        self.monitor.record_operation(
            ORCHESTRATOR_OWNER,
            "workflow_cycle",
            cycle_started.elapsed(),
            exec.success,
            exec.error.as_deref(),
        );

        self.counters.cycles_run.fetch_add(1, Ordering::Relaxed);
        if !exec.success {
            self.counters
                .unsuccessful_cycles
                .fetch_add(1, Ordering::Relaxed);
        }
        *self
            .last_execution
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(exec.clone());
    }

    /// One `record_analysis` event per record, carrying what the learning
    /// rules read back: sender, keywords, category, priority, intent and
    /// response style.
    async fn persist_record_analyses(
        &self,
        workflow_id: Uuid,
        records: &[Record],
        analysis: &FanOut,
    ) -> BTreeMap<String, Uuid> {
        let classifications: HashMap<&str, _> = analysis
            .classifications
            .iter()
            .map(|c| (c.record_id.as_str(), c))
            .collect();
        let responses: HashMap<&str, _> = analysis
            .responses
            .iter()
            .map(|r| (r.record_id.as_str(), r))
            .collect();

        let writes = records.iter().map(|record| {
            let class = classifications.get(record.id.as_str());
            let response = responses.get(record.id.as_str());
            let payload = json!({
                "workflow_id": workflow_id,
                "record_id": record.id,
                "sender": record.sender,
                "subject": record.subject,
                "keywords": class.map(|c| c.keywords.clone()).unwrap_or_default(),
                "category": class.and_then(|c| c.category.clone()),
                "priority": class.and_then(|c| c.priority_score),
                "sentiment": class.and_then(|c| c.sentiment.clone()),
                "intent": response.map(|r| r.intent.clone()),
                "response_style": response.and_then(|r| r.style.clone()),
            });
            let record_id = record.id.clone();
            async move {
                let result = self
                    .events
                    .append(
                        RECORD_ANALYSIS_EVENT,
                        payload,
                        RECORD_ANALYSIS_IMPORTANCE,
                        ["analysis", "email"],
                    )
                    .await;
                (record_id, result)
            }
        });

        let mut stored = BTreeMap::new();
        for (record_id, result) in futures::future::join_all(writes).await {
            match result {
                Ok(event_id) => {
                    stored.insert(record_id, event_id);
                }
                Err(e) => warn!(record_id = %record_id, error = %e, "Record analysis not stored"),
            }
        }
        stored
    }

    // ── Feedback and lifecycle ──────────────────────────────────────

    /// Forward a user correction to the learning engine.
    pub async fn submit_feedback(
        &self,
        source_event_id: Uuid,
        kind: FeedbackKind,
        payload: serde_json::Value,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        self.counters
            .feedback_received
            .fetch_add(1, Ordering::Relaxed);
        self.learning
            .record_feedback(source_event_id, kind, payload)
            .await
    }

    pub fn status(&self) -> OrchestratorStatus {
        let last_execution_id = self
            .last_execution
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|e| e.id);
        OrchestratorStatus {
            state: self.state(),
            cycles_run: self.counters.cycles_run.load(Ordering::Relaxed),
            unsuccessful_cycles: self.counters.unsuccessful_cycles.load(Ordering::Relaxed),
            actions_executed: self.counters.actions_executed.load(Ordering::Relaxed),
            feedback_received: self.counters.feedback_received.load(Ordering::Relaxed),
            last_execution_id,
            thresholds: GateThresholds::resolve(&self.config, &self.preferences),
            batch_size: self.config.batch_size,
            worker_pool_size: self.config.worker_pool_size,
        }
    }

    /// Wait for any running cycle, close the worker pool and log final
    /// statistics.
    pub async fn shutdown(&self) -> ShutdownReport {
        let _cycle = self.cycle_lock.lock().await;
        self.pool.close();
        self.events.prune_cache();

        let report = ShutdownReport {
            status: self.status(),
            monitor: self.monitor.real_time_stats(),
            learning: self.learning.summary().await,
        };
        info!(
            cycles = report.status.cycles_run,
            unsuccessful = report.status.unsuccessful_cycles,
            actions = report.status.actions_executed,
            feedback = report.status.feedback_received,
            preferences = report.learning.total_preferences,
            metrics = report.monitor.total_metrics_collected,
            "Orchestrator shut down"
        );
        report
    }
}

/// Returns an interrupted cycle's state to `Idle`. `Failed` is kept.
struct IdleOnDrop<'a>(&'a Mutex<OrchestratorState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let interrupted = *state;
        if !interrupted.is_terminal() && interrupted != OrchestratorState::Idle {
            warn!(state = %interrupted, "Cycle interrupted, returning to idle");
            *state = OrchestratorState::Idle;
        }
    }
}

fn record_failure(exec: &mut WorkflowExecution, action: &PlannedAction, kind: &str, message: &str) {
    exec.tally.failed += 1;
    exec.tally.failures.push(ActionFailure {
        record_id: action.record_id.clone(),
        action: action.action.key(),
        kind: kind.to_string(),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, MonitorConfig};
    use crate::error::SourceError;
    use crate::pipeline::fanout::tests::{Fixed, classification};
    use crate::pipeline::types::{
        ClassificationResult, OrganizationResult, OrganizeAction, ResponseCandidate,
    };
    use crate::store::{Database, LibSqlBackend};
    use async_trait::async_trait;

    struct StaticSource {
        batch: Mutex<Vec<Result<Vec<Record>, SourceError>>>,
    }

    impl StaticSource {
        /// Serves `batches` in order, then empty batches.
        fn new(batches: Vec<Result<Vec<Record>, SourceError>>) -> Self {
            let mut batches = batches;
            batches.reverse();
            Self {
                batch: Mutex::new(batches),
            }
        }
    }

    #[async_trait]
    impl RecordSource for StaticSource {
        async fn fetch_batch(&self, limit: usize) -> Result<Vec<Record>, SourceError> {
            let next = self.batch.lock().unwrap().pop();
            next.unwrap_or(Ok(Vec::new()))
                .map(|mut records| {
                    records.truncate(limit);
                    records
                })
        }
    }

    /// Succeeds unless a record is scripted to fail.
    #[derive(Default)]
    struct ScriptedExecutor {
        failures: HashMap<String, ExecutorError>,
        applied: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActionExecutor for ScriptedExecutor {
        async fn apply(&self, action: &PlannedAction) -> Result<bool, ExecutorError> {
            self.applied.lock().unwrap().push(action.record_id.clone());
            match self.failures.get(&action.record_id) {
                Some(e) => Err(e.clone()),
                None => Ok(true),
            }
        }
    }

    fn batch(ids: &[&str]) -> Vec<Record> {
        ids.iter()
            .map(|id| Record::new(*id, format!("{id}@example.com"), "Quarterly numbers"))
            .collect()
    }

    fn analyzers(
        classifier: Fixed<ClassificationResult>,
        organizer: Fixed<OrganizationResult>,
        responder: Fixed<ResponseCandidate>,
    ) -> Analyzers {
        Analyzers {
            classifier: Arc::new(classifier),
            organizer: Arc::new(organizer),
            responder: Arc::new(responder),
        }
    }

    fn response(record_id: &str, confidence: f64) -> ResponseCandidate {
        ResponseCandidate {
            record_id: record_id.into(),
            response_text: "Thanks, I'll take a look.".into(),
            intent: "request".into(),
            style: Some("formal".into()),
            confidence,
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        memory: Memory,
        monitor: Arc<PerformanceMonitor>,
        executor: Arc<ScriptedExecutor>,
    }

    async fn harness(
        source: StaticSource,
        analyzers: Analyzers,
        executor: ScriptedExecutor,
    ) -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let memory = Memory::open(db, &MemoryConfig::default()).await.unwrap();
        let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig::default()));
        let executor = Arc::new(executor);
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            Collaborators {
                source: Arc::new(source),
                analyzers,
                executor: executor.clone(),
            },
            &memory,
            monitor.clone(),
        );
        Harness {
            orchestrator,
            memory,
            monitor,
            executor,
        }
    }

    #[tokio::test]
    async fn one_failing_branch_still_succeeds() {
        let h = harness(
            StaticSource::new(vec![Ok(batch(&["r1"]))]),
            analyzers(
                Fixed::ok(vec![classification("r1", "work", 0.9)]),
                Fixed::failing("organization"),
                Fixed::ok(vec![response("r1", 0.85)]),
            ),
            ScriptedExecutor::default(),
        )
        .await;

        let exec = h.orchestrator.run_cycle().await.unwrap();
        assert!(exec.success);
        assert_eq!(exec.tally.succeeded, 2);
        assert_eq!(exec.plan.completed.len(), 2);
        assert!(exec.plan.immediate.is_empty());

        let event = h
            .memory
            .events
            .get(exec.event_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, WORKFLOW_EVENT);
        assert!(event.tags.contains("workflow"));
        assert_eq!(event.importance, 0.8);
        assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn all_branches_failing_is_unsuccessful_but_recorded() {
        let h = harness(
            StaticSource::new(vec![Ok(batch(&["r1", "r2"]))]),
            analyzers(
                Fixed::failing("classification"),
                Fixed::failing("organization"),
                Fixed::failing("response"),
            ),
            ScriptedExecutor::default(),
        )
        .await;

        let exec = h.orchestrator.run_cycle().await.unwrap();
        assert!(!exec.success);
        assert!(exec.plan.is_empty());
        let event_id = exec.event_id.expect("workflow event persisted");
        let event = h.memory.events.get(event_id).await.unwrap().unwrap();
        assert_eq!(event.payload["success"], false);
        assert_eq!(event.payload["branches"].as_array().unwrap().len(), 3);
        assert_eq!(h.orchestrator.status().unsuccessful_cycles, 1);
    }

    #[tokio::test]
    async fn empty_batch_is_an_immediate_success() {
        let h = harness(
            StaticSource::new(vec![]),
            analyzers(Fixed::ok(vec![]), Fixed::ok(vec![]), Fixed::ok(vec![])),
            ScriptedExecutor::default(),
        )
        .await;

        let exec = h.orchestrator.run_cycle().await.unwrap();
        assert!(exec.success);
        assert_eq!(exec.record_count, 0);
        assert!(exec.branches.is_empty());
        assert!(exec.event_id.is_some());
    }

    #[tokio::test]
    async fn source_failure_is_reported_and_recoverable() {
        let h = harness(
            StaticSource::new(vec![
                Err(SourceError::Connectivity("imap timeout".into())),
                Ok(batch(&["r1"])),
            ]),
            analyzers(
                Fixed::ok(vec![classification("r1", "work", 0.9)]),
                Fixed::ok(vec![]),
                Fixed::ok(vec![]),
            ),
            ScriptedExecutor::default(),
        )
        .await;

        let failed = h.orchestrator.run_cycle().await.unwrap();
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains("imap timeout"));
        assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);

        let next = h.orchestrator.run_cycle().await.unwrap();
        assert!(next.success);
        assert_eq!(next.tally.succeeded, 1);
    }

    #[tokio::test]
    async fn action_failures_are_isolated() {
        let executor = ScriptedExecutor {
            failures: HashMap::from([(
                "r1".to_string(),
                ExecutorError::Connectivity("label service down".into()),
            )]),
            ..ScriptedExecutor::default()
        };
        let h = harness(
            StaticSource::new(vec![Ok(batch(&["r1", "r2"]))]),
            analyzers(
                Fixed::ok(vec![
                    classification("r1", "work", 0.9),
                    classification("r2", "work", 0.9),
                ]),
                Fixed::ok(vec![]),
                Fixed::ok(vec![]),
            ),
            executor,
        )
        .await;

        let exec = h.orchestrator.run_cycle().await.unwrap();
        assert!(exec.success);
        assert_eq!(exec.tally.succeeded, 1);
        assert_eq!(exec.tally.failed, 1);
        assert_eq!(exec.tally.failures[0].kind, "connectivity");
        assert_eq!(exec.plan.immediate[0].record_id, "r1");
        assert_eq!(exec.plan.completed[0].record_id, "r2");
        assert_eq!(*h.executor.applied.lock().unwrap(), vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn unavailable_executor_halts_the_orchestrator() {
        let executor = ScriptedExecutor {
            failures: HashMap::from([(
                "r1".to_string(),
                ExecutorError::Unavailable("mailbox gone".into()),
            )]),
            ..ScriptedExecutor::default()
        };
        let h = harness(
            StaticSource::new(vec![Ok(batch(&["r1", "r2"]))]),
            analyzers(
                Fixed::ok(vec![
                    classification("r1", "work", 0.9),
                    classification("r2", "work", 0.9),
                ]),
                Fixed::ok(vec![]),
                Fixed::ok(vec![]),
            ),
            executor,
        )
        .await;

        let err = h.orchestrator.run_cycle().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Catastrophic { .. }));
        assert_eq!(h.orchestrator.state(), OrchestratorState::Failed);
        // r2 was never attempted.
        assert_eq!(*h.executor.applied.lock().unwrap(), vec!["r1"]);

        let partial = h.orchestrator.last_execution().unwrap();
        assert!(!partial.success);
        assert!(partial.event_id.is_some());
        assert_eq!(partial.plan.immediate.len(), 2);

        assert!(matches!(
            h.orchestrator.run_cycle().await,
            Err(OrchestratorError::Halted)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_cycle_leaves_orchestrator_usable() {
        let h = harness(
            StaticSource::new(vec![Ok(batch(&["r1"])), Ok(batch(&["r2"]))]),
            analyzers(
                Fixed::slow(
                    vec![classification("r2", "work", 0.9)],
                    Duration::from_secs(20),
                ),
                Fixed::ok(vec![]),
                Fixed::ok(vec![]),
            ),
            ScriptedExecutor::default(),
        )
        .await;

        let cancelled =
            tokio::time::timeout(Duration::from_secs(5), h.orchestrator.run_cycle()).await;
        assert!(cancelled.is_err());
        assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);

        let exec = h.orchestrator.run_cycle().await.unwrap();
        assert!(exec.success);
        assert_eq!(exec.tally.succeeded, 1);
        assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn reporting_feeds_the_monitor() {
        let h = harness(
            StaticSource::new(vec![Ok(batch(&["r1"]))]),
            analyzers(
                Fixed::ok(vec![classification("r1", "work", 0.9)]),
                Fixed::ok(vec![OrganizationResult {
                    record_id: "r1".into(),
                    suggested_action: OrganizeAction::Archive,
                    target: None,
                    confidence: 0.4,
                }]),
                Fixed::failing("response"),
            ),
            ScriptedExecutor::default(),
        )
        .await;

        h.orchestrator.run_cycle().await.unwrap();

        for owner in ["classifier", "organizer", "responder", "orchestrator"] {
            assert_eq!(h.monitor.agent_stats(owner).unwrap().total_ops, 1, "{owner}");
        }
        assert_eq!(h.monitor.agent_stats("responder").unwrap().fail_ops, 1);
        let executor = h.monitor.agent_stats("executor").unwrap();
        assert_eq!(executor.tool_usage.get("apply_label"), Some(&1));
        assert_eq!(executor.tool_usage.get("archive"), Some(&1));
    }

    #[tokio::test]
    async fn feedback_on_a_record_updates_preferences() {
        let h = harness(
            StaticSource::new(vec![Ok(batch(&["r1"]))]),
            analyzers(
                Fixed::ok(vec![ClassificationResult {
                    keywords: vec!["invoice".into()],
                    ..classification("r1", "personal", 0.9)
                }]),
                Fixed::ok(vec![]),
                Fixed::ok(vec![response("r1", 0.5)]),
            ),
            ScriptedExecutor::default(),
        )
        .await;

        let exec = h.orchestrator.run_cycle().await.unwrap();
        assert_eq!(exec.plan.needs_approval.len(), 1);
        let source = exec.analysis_events["r1"];

        let outcome = h
            .orchestrator
            .submit_feedback(
                source,
                FeedbackKind::ClassificationCorrection,
                json!({"correct_category": "finance"}),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, FeedbackOutcome::Applied(ref keys) if keys.len() == 2));

        let outcome = h
            .orchestrator
            .submit_feedback(source, FeedbackKind::ResponseApproval, json!({"approved": true}))
            .await
            .unwrap();
        assert!(matches!(outcome, FeedbackOutcome::Applied(_)));

        let (value, confidence) = h.memory.preferences.get_preference(
            "classification",
            "sender_category_r1@example.com",
            json!(null),
        );
        assert_eq!(value, json!("finance"));
        assert!((confidence - 0.8).abs() < 1e-9);
        assert_eq!(h.orchestrator.status().feedback_received, 2);
    }

    #[tokio::test]
    async fn shutdown_reports_final_stats() {
        let h = harness(
            StaticSource::new(vec![Ok(batch(&["r1"]))]),
            analyzers(
                Fixed::ok(vec![classification("r1", "work", 0.9)]),
                Fixed::ok(vec![]),
                Fixed::ok(vec![]),
            ),
            ScriptedExecutor::default(),
        )
        .await;
        h.orchestrator.run_cycle().await.unwrap();

        let report = h.orchestrator.shutdown().await;
        assert_eq!(report.status.cycles_run, 1);
        assert_eq!(report.status.actions_executed, 1);
        assert_eq!(report.learning.cached_events, 2);
        assert!(report.monitor.total_metrics_collected > 0);
    }
}
