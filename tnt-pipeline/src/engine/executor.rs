//! Graph execution.
//!
//! Each scan graph is scheduled on its own: a node starts once every
//! upstream node completed, and all communication between nodes goes through
//! the port values they return. Scans share nothing but the resource pool,
//! so a failure only ever stops the scan it happened in.

use super::crash::CrashReport;
use super::hooks::{HookVerdict, NodeHook, NodeInvocation, Plugin};
use super::pool::ResourcePool;
use super::report::{FailureRecord, RunReport, ScanOutcome};
use crate::bids::EntityDescriptor;
use crate::config::FailureMode;
use crate::events::{EventKind, EventSink, NoOpEventSink};
use crate::graph::{NodeSpec, PortValues, ResourceHints, WorkflowGraph};
use crate::nodes::{NodeContext, NodeError};
use crate::profile::ResourceTable;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// One scan's graph plus where its failures are reported.
#[derive(Debug, Clone)]
pub struct ScanJob {
    /// The scan graph; its name identifies the scan.
    pub graph: WorkflowGraph,
    /// Entities of the scan.
    pub entities: EntityDescriptor,
    /// Directory receiving crash reports.
    pub crash_dir: PathBuf,
}

impl ScanJob {
    /// Creates a job.
    #[must_use]
    pub fn new(graph: WorkflowGraph, entities: EntityDescriptor, crash_dir: impl Into<PathBuf>) -> Self {
        Self {
            graph,
            entities,
            crash_dir: crash_dir.into(),
        }
    }

    /// Graph name of the scan.
    #[must_use]
    pub fn name(&self) -> &str {
        self.graph.name()
    }
}

/// Everything the executor needs besides the jobs.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Scheduling plugin.
    pub plugin: Plugin,
    /// Failure handling within a scan.
    pub failure_mode: FailureMode,
    /// Root of the node working directories.
    pub work_dir: PathBuf,
    /// Per-node resource overrides.
    pub resources: Option<Arc<ResourceTable>>,
    /// Receives lifecycle events.
    pub events: Arc<dyn EventSink>,
    /// Name of the graph holding all scan graphs, prepended to node paths
    /// when looking up resource estimates.
    pub forest: Option<String>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("plugin", &self.plugin)
            .field("failure_mode", &self.failure_mode)
            .field("work_dir", &self.work_dir)
            .field("resources", &self.resources.as_ref().map(|r| r.len()))
            .field("forest", &self.forest)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// A linear, fail-fast context working below `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin: Plugin::Linear,
            failure_mode: FailureMode::FailFast,
            work_dir: work_dir.into(),
            resources: None,
            events: Arc::new(NoOpEventSink),
            forest: None,
        }
    }

    /// Sets the plugin.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Plugin) -> Self {
        self.plugin = plugin;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub const fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets the resource overrides.
    #[must_use]
    pub fn with_resources(mut self, table: ResourceTable) -> Self {
        self.resources = Some(Arc::new(table));
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the forest name.
    #[must_use]
    pub fn with_forest(mut self, name: impl Into<String>) -> Self {
        self.forest = Some(name.into());
        self
    }

    /// Dotted path of a node of `scan`.
    #[must_use]
    pub fn node_path(&self, scan: &str, node: &str) -> String {
        match &self.forest {
            Some(forest) => format!("{forest}.{scan}.{node}"),
            None => format!("{scan}.{node}"),
        }
    }

    fn hints(&self, scan: &str, spec: &NodeSpec) -> ResourceHints {
        self.resources
            .as_ref()
            .map_or(spec.resources, |table| table.apply(&self.node_path(scan, &spec.name), spec.resources))
    }
}

/// Runs scan graphs under an [`ExecutionContext`].
#[derive(Debug, Clone)]
pub struct Executor {
    context: ExecutionContext,
}

/// What became of one node.
enum NodeRun {
    Completed(PortValues),
    Skipped,
    Failed(FailureRecord),
}

/// Owned inputs of a spawned node task.
struct NodeTask {
    scan: String,
    spec: NodeSpec,
    inputs: PortValues,
    hints: ResourceHints,
    work_dir: PathBuf,
    crash_dir: PathBuf,
    entities: EntityDescriptor,
    pool: Arc<ResourcePool>,
    hook: Option<Arc<dyn NodeHook>>,
    events: Arc<dyn EventSink>,
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub const fn new(context: ExecutionContext) -> Self {
        Self { context }
    }

    /// The execution context.
    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Runs every job and reports the outcome of each. Never fails as a
    /// whole: node failures are recorded in the report.
    pub async fn run(&self, jobs: &[ScanJob]) -> RunReport {
        let start = Instant::now();
        info!(plugin = ?self.context.plugin, scans = jobs.len(), "Starting run");
        let scans = match &self.context.plugin {
            Plugin::Linear | Plugin::Debug(_) => {
                let pool = Arc::new(ResourcePool::serial());
                let mut outcomes = Vec::with_capacity(jobs.len());
                for job in jobs {
                    outcomes.push(self.run_scan(job, &pool).await);
                }
                outcomes
            }
            Plugin::MultiProc { n_procs, memory_gb } => {
                let pool = Arc::new(ResourcePool::new(*n_procs, *memory_gb));
                futures::future::join_all(jobs.iter().map(|job| self.run_scan(job, &pool))).await
            }
        };
        let report = RunReport {
            scans,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            scans = report.scans.len(),
            failed = report.failed_scans().len(),
            duration_ms = report.duration_ms,
            "Run finished"
        );
        report
    }

    async fn run_scan(&self, job: &ScanJob, pool: &Arc<ResourcePool>) -> ScanOutcome {
        let graph = &job.graph;
        let scan = job.name();
        let start = Instant::now();
        let events = &self.context.events;
        events.try_emit_kind(EventKind::ScanStarted, json!({"scan": scan, "nodes": graph.node_count()}));
        info!(scan, nodes = graph.node_count(), "Starting scan");

        let mut in_degree: HashMap<&str, usize> = graph
            .execution_order()
            .iter()
            .map(|name| (name.as_str(), graph.upstream(name).len()))
            .collect();
        let mut outputs: HashMap<String, PortValues> = HashMap::new();
        let mut outcome = ScanOutcome::new(scan);
        let mut active = FuturesUnordered::new();
        let mut stopped = false;

        for name in graph.execution_order() {
            if in_degree.get(name.as_str()) == Some(&0) {
                active.push(self.spawn_node(job, name, &outputs, pool));
            }
        }

        while let Some((name, joined)) = active.next().await {
            let run = joined.unwrap_or_else(|e| NodeRun::Failed(panicked(&name, &e)));
            match run {
                NodeRun::Completed(values) => {
                    outputs.insert(name.clone(), values);
                    outcome.completed.push(name.clone());
                }
                NodeRun::Skipped => {
                    outputs.insert(name.clone(), PortValues::new());
                    outcome.skipped.push(name.clone());
                }
                NodeRun::Failed(record) => {
                    outcome.failures.push(record);
                    if self.context.failure_mode == FailureMode::FailFast {
                        stopped = true;
                    }
                    // dependents of a failed node never become ready
                    continue;
                }
            }
            if stopped {
                continue;
            }
            for child in graph.downstream(&name) {
                if let Some(count) = in_degree.get_mut(child) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        active.push(self.spawn_node(job, child, &outputs, pool));
                    }
                }
            }
        }

        outcome.not_run = graph
            .node_count()
            .saturating_sub(outcome.completed.len() + outcome.skipped.len() + outcome.failures.len());
        outcome.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        if outcome.is_success() {
            events.try_emit_kind(
                EventKind::ScanCompleted,
                json!({"scan": scan, "duration_ms": outcome.duration_ms}),
            );
            info!(scan, completed = outcome.completed.len(), "Scan completed");
        } else {
            let failed: Vec<&str> = outcome.failures.iter().map(|f| f.node.as_str()).collect();
            events.try_emit_kind(
                EventKind::ScanFailed,
                json!({"scan": scan, "failed_nodes": failed, "not_run": outcome.not_run}),
            );
            error!(scan, failed_nodes = ?failed, not_run = outcome.not_run, "Scan failed");
        }
        outcome
    }

    fn spawn_node(
        &self,
        job: &ScanJob,
        name: &str,
        outputs: &HashMap<String, PortValues>,
        pool: &Arc<ResourcePool>,
    ) -> impl Future<Output = (String, Result<NodeRun, JoinError>)> {
        let graph = &job.graph;
        let scan = job.name().to_string();
        let task = graph.node(name).cloned().map(|spec| NodeTask {
            inputs: resolve_inputs(graph, &spec, outputs),
            hints: self.context.hints(&scan, &spec),
            work_dir: self.context.work_dir.join(&scan).join(name.replace('.', "/")),
            crash_dir: job.crash_dir.clone(),
            entities: job.entities.clone(),
            pool: Arc::clone(pool),
            hook: self.context.plugin.hook(),
            events: Arc::clone(&self.context.events),
            scan,
            spec,
        });
        let name = name.to_string();
        let missing = name.clone();
        let handle = tokio::spawn(async move {
            match task {
                Some(task) => run_node(task).await,
                None => NodeRun::Failed(FailureRecord {
                    node: missing,
                    kind: "graph".to_string(),
                    message: "node not found in graph".to_string(),
                    crash_file: None,
                }),
            }
        });
        handle.map(move |joined| (name, joined))
    }
}

/// Bound inputs overlaid with the outputs of upstream nodes.
fn resolve_inputs(graph: &WorkflowGraph, spec: &NodeSpec, outputs: &HashMap<String, PortValues>) -> PortValues {
    let mut inputs = spec.inputs.clone();
    for edge in graph.incoming(&spec.name) {
        if let Some(value) = outputs.get(&edge.from.node).and_then(|o| o.get(&edge.from.port)) {
            inputs.insert(edge.to.port.clone(), value.clone());
        }
    }
    inputs
}

fn panicked(node: &str, error: &JoinError) -> FailureRecord {
    FailureRecord {
        node: node.to_string(),
        kind: "panic".to_string(),
        message: error.to_string(),
        crash_file: None,
    }
}

async fn run_node(task: NodeTask) -> NodeRun {
    let node = task.spec.name.as_str();
    let scan = task.scan.as_str();
    let interface = task.spec.interface.kind().to_string();

    let reservation = match task.pool.reserve(task.hints).await {
        Ok(reservation) => reservation,
        Err(e) => return fail(&task, &interface, &e),
    };

    if let Some(hook) = &task.hook {
        let invocation = NodeInvocation {
            scan,
            node,
            entities: &task.entities,
            interface: &interface,
        };
        match hook.on_node(&invocation) {
            HookVerdict::Run => {}
            HookVerdict::Skip => {
                debug!(scan, node, "Node skipped by hook");
                task.events.try_emit_kind(EventKind::NodeSkipped, json!({"scan": scan, "node": node}));
                return NodeRun::Skipped;
            }
            HookVerdict::Fail(message) => return fail(&task, &interface, &NodeError::Injected(message)),
        }
    }

    task.events.try_emit_kind(
        EventKind::NodeStarted,
        json!({"scan": scan, "node": node, "interface": interface, "n_procs": reservation.n_procs}),
    );
    debug!(scan, node, interface = %interface, n_procs = reservation.n_procs, "Starting node");
    let start = Instant::now();

    if let Err(e) = tokio::fs::create_dir_all(&task.work_dir).await {
        return fail(&task, &interface, &NodeError::Io(e));
    }
    let ctx = NodeContext::new(format!("{scan}.{node}"), &task.work_dir, task.inputs.clone())
        .with_threads(reservation.n_procs);
    let result = task.spec.interface.run(&ctx).await;
    drop(reservation);

    match result {
        Ok(values) => {
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            task.events.try_emit_kind(
                EventKind::NodeCompleted,
                json!({"scan": scan, "node": node, "duration_ms": duration_ms}),
            );
            NodeRun::Completed(values)
        }
        Err(e) => fail(&task, &interface, &e),
    }
}

fn fail(task: &NodeTask, interface: &str, error: &NodeError) -> NodeRun {
    let node = task.spec.name.as_str();
    let scan = task.scan.as_str();
    let report = CrashReport {
        scan,
        node,
        interface,
        inputs: &task.inputs,
        error,
    };
    let crash_file = match report.write(&task.crash_dir) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(scan, node, error = %e, "Could not write crash report");
            None
        }
    };
    error!(scan, node, error = %error, crash_file = ?crash_file, "Node failed");
    task.events.try_emit_kind(
        EventKind::NodeFailed,
        json!({"scan": scan, "node": node, "kind": error.kind(), "error": error.to_string(), "crash_file": crash_file}),
    );
    NodeRun::Failed(FailureRecord {
        node: node.to_string(),
        kind: error.kind().to_string(),
        message: error.to_string(),
        crash_file,
    })
}
