//! Concurrent plan executor.
//!
//! Runs plan entries on a bounded worker pool. An entry is dispatched once
//! every entry it depends on has completed; independent entries run
//! concurrently. Deferred references in the entry's inputs are resolved
//! from the outputs published by completed dependencies immediately before
//! dispatch. When an entry fails, its transitive dependents are skipped but
//! unrelated entries keep running, and state is saved after every
//! completion so a crash or abort loses at most the in-flight calls.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::InputHasher;
use crate::error::{CairnError, ExecError, ProviderError, Result};
use crate::planner::{ActionType, Plan, PlanEntry};
use crate::provider::{Provider, ProviderRegistry};
use crate::resource::{Resource, ResourceSet};
use crate::state::{StackState, StateStore};

use super::retry::{self, DEFAULT_MAX_ATTEMPTS};

/// Default number of entries applied concurrently.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Executor for plans.
pub struct PlanExecutor<'a> {
    /// Provider registry used to dispatch entries.
    providers: &'a ProviderRegistry,
    /// Maximum number of concurrent provider calls.
    parallelism: usize,
    /// Attempts per provider call before giving up on transient failures.
    max_attempts: u32,
}

/// How a single entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOutcome {
    /// Resource was created.
    Created,
    /// Resource was updated in place.
    Updated,
    /// Resource was already up to date.
    Unchanged,
    /// Resource was deleted.
    Deleted,
    /// Entry failed.
    Failed,
    /// Entry was skipped because a dependency failed or the run was aborted.
    Skipped,
}

/// Result of executing a single entry.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Entry index in the plan.
    pub index: usize,
    /// Logical name of the resource.
    pub logical_name: String,
    /// Action that was attempted.
    pub action: ActionType,
    /// How the entry ended.
    pub outcome: ResourceOutcome,
    /// Error message (if failed or skipped).
    pub error: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Individual entry results.
    pub results: Vec<ActionResult>,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated.
    pub updated: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources already up to date.
    pub unchanged: usize,
    /// Number of failed entries.
    pub failed: usize,
    /// Number of skipped entries.
    pub skipped: usize,
    /// Whether the run was aborted by a cancellation signal.
    pub aborted: bool,
    /// Whether every entry succeeded.
    pub success: bool,
}

/// What a worker task produced.
enum TaskOutput {
    Created {
        id: String,
        outputs: serde_json::Map<String, serde_json::Value>,
    },
    Updated {
        outputs: serde_json::Map<String, serde_json::Value>,
    },
    Deleted,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(providers: &'a ProviderRegistry) -> Self {
        Self {
            providers,
            parallelism: DEFAULT_PARALLELISM,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the maximum number of concurrent provider calls.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = if parallelism == 0 { 1 } else { parallelism };
        self
    }

    /// Sets the number of attempts per provider call.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = if max_attempts == 0 { 1 } else { max_attempts };
        self
    }

    /// Executes a plan, checkpointing state after every completed entry.
    ///
    /// Flipping `cancel` to true stops new dispatches; in-flight calls are
    /// drained and their results recorded before returning.
    ///
    /// # Errors
    ///
    /// Returns an error only when state cannot be saved; entry failures are
    /// reported in the [`ExecutionResult`] instead.
    pub async fn execute(
        &self,
        plan: &Plan,
        resources: &ResourceSet,
        state: &mut StackState,
        store: &dyn StateStore,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        info!("Executing plan with {} entries", plan.entries.len());
        if plan.entries.is_empty() {
            return Ok(Self::summarize(vec![], false));
        }

        let total = plan.entries.len();
        let mut remaining_deps: Vec<usize> =
            plan.entries.iter().map(|e| e.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
        for (idx, entry) in plan.entries.iter().enumerate() {
            for &dep in &entry.dependencies {
                dependents[dep].push(idx);
            }
        }

        // Outputs published by completed entries, keyed by logical name.
        let mut outputs: HashMap<String, serde_json::Map<String, serde_json::Value>> =
            HashMap::new();
        let mut results: Vec<Option<ActionResult>> = vec![None; total];
        let mut ready: VecDeque<usize> = (0..total).filter(|&i| remaining_deps[i] == 0).collect();

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut join_set: JoinSet<(usize, Result<TaskOutput>)> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut aborted = *cancel.borrow();
        let mut cancel_open = true;

        loop {
            while !aborted {
                let Some(idx) = ready.pop_front() else { break };
                let entry = &plan.entries[idx];
                match self.dispatch(idx, entry, resources, state, &outputs, &semaphore) {
                    Dispatch::Spawned(task) => {
                        join_set.spawn(task);
                        in_flight += 1;
                    }
                    Dispatch::Immediate(result) => {
                        let unblocked = Self::complete(
                            idx,
                            result,
                            plan,
                            resources,
                            &mut results,
                            &mut remaining_deps,
                            &dependents,
                            &mut outputs,
                            state,
                        );
                        ready.extend(unblocked);
                    }
                }
            }

            if in_flight == 0 {
                break;
            }

            tokio::select! {
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    in_flight -= 1;
                    let (idx, task_result) = joined
                        .map_err(|e| CairnError::internal(format!("worker task panicked: {e}")))?;
                    let unblocked = Self::complete(
                        idx,
                        task_result,
                        plan,
                        resources,
                        &mut results,
                        &mut remaining_deps,
                        &dependents,
                        &mut outputs,
                        state,
                    );
                    store.save(state).await?;
                    ready.extend(unblocked);
                }
                changed = cancel.changed(), if !aborted && cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            warn!("Cancellation requested, draining in-flight operations");
                            aborted = true;
                        }
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
            }
        }

        // Everything never dispatched is skipped.
        for (idx, slot) in results.iter_mut().enumerate() {
            if slot.is_none() {
                let entry = &plan.entries[idx];
                let reason = if aborted {
                    "run aborted"
                } else {
                    "dependency failed"
                };
                *slot = Some(ActionResult {
                    index: idx,
                    logical_name: entry.logical_name.clone(),
                    action: entry.action,
                    outcome: ResourceOutcome::Skipped,
                    error: Some(reason.to_string()),
                });
            }
        }

        let results: Vec<ActionResult> = results.into_iter().flatten().collect();
        Ok(Self::summarize(results, aborted))
    }

    /// Prepares a single entry for execution.
    ///
    /// Noop entries and entries that cannot be dispatched (missing provider,
    /// unresolved reference) complete immediately without a worker task.
    fn dispatch(
        &self,
        idx: usize,
        entry: &PlanEntry,
        resources: &ResourceSet,
        state: &StackState,
        outputs: &HashMap<String, serde_json::Map<String, serde_json::Value>>,
        semaphore: &Arc<Semaphore>,
    ) -> Dispatch {
        if entry.action == ActionType::Noop {
            debug!("{} is up to date", entry.logical_name);
            let recorded = state
                .get_record(&entry.logical_name)
                .map(crate::state::StateRecord::outputs_object)
                .unwrap_or_default();
            return Dispatch::Immediate(Ok(TaskOutput::Updated { outputs: recorded }));
        }

        let provider = match self.providers.resolve(&entry.type_token) {
            Ok(provider) => provider,
            Err(e) => return Dispatch::Immediate(Err(e)),
        };

        let name = entry.logical_name.clone();
        let token = entry.type_token.clone();
        let action = entry.action;
        let semaphore = Arc::clone(semaphore);
        let max_attempts = self.max_attempts;

        // Deletes operate on the recorded external id; creates and updates
        // need the desired inputs resolved against published outputs.
        let resource_id = state
            .get_record(&entry.logical_name)
            .map(|r| r.resource_id.clone());
        let resolved = if action == ActionType::Delete {
            serde_json::Map::new()
        } else {
            let Some(resource) = resources.get(&entry.logical_name) else {
                return Dispatch::Immediate(Err(CairnError::internal(format!(
                    "plan entry {name} has no declared resource"
                ))));
            };
            match resolve_inputs(resource, outputs) {
                Ok(resolved) => resolved,
                Err(e) => return Dispatch::Immediate(Err(e)),
            }
        };

        Dispatch::Spawned(Box::pin(async move {
            // Closing the semaphore is not part of this executor's protocol,
            // so acquisition only fails on abort paths that never run it.
            let Ok(_permit) = semaphore.acquire().await else {
                return (idx, Err(CairnError::internal("worker pool closed")));
            };
            let output = run_action(action, &name, &token, resource_id, &resolved, &provider, max_attempts)
                .await;
            (idx, output)
        }))
    }

    /// Records a completed entry, updates state and publishes outputs.
    ///
    /// Returns the indices of entries unblocked by this completion. On
    /// failure, transitive dependents are marked skipped instead.
    #[allow(clippy::too_many_arguments)]
    fn complete(
        idx: usize,
        task_result: Result<TaskOutput>,
        plan: &Plan,
        resources: &ResourceSet,
        results: &mut [Option<ActionResult>],
        remaining_deps: &mut [usize],
        dependents: &[Vec<usize>],
        outputs: &mut HashMap<String, serde_json::Map<String, serde_json::Value>>,
        state: &mut StackState,
    ) -> Vec<usize> {
        let entry = &plan.entries[idx];
        match task_result {
            Ok(output) => {
                let outcome =
                    Self::apply_success(entry, resources.get(&entry.logical_name), output, outputs, state);
                info!("{}: {}", entry.logical_name, entry.action);
                results[idx] = Some(ActionResult {
                    index: idx,
                    logical_name: entry.logical_name.clone(),
                    action: entry.action,
                    outcome,
                    error: None,
                });
                let mut unblocked = Vec::new();
                for &dep in &dependents[idx] {
                    remaining_deps[dep] -= 1;
                    if remaining_deps[dep] == 0 {
                        unblocked.push(dep);
                    }
                }
                unblocked
            }
            Err(e) => {
                error!("Failed to {} {}: {}", entry.action, entry.logical_name, e);
                results[idx] = Some(ActionResult {
                    index: idx,
                    logical_name: entry.logical_name.clone(),
                    action: entry.action,
                    outcome: ResourceOutcome::Failed,
                    error: Some(e.to_string()),
                });
                Self::skip_dependents(idx, plan, results, dependents);
                Vec::new()
            }
        }
    }

    /// Writes the success of an entry into state and the outputs map.
    fn apply_success(
        entry: &PlanEntry,
        resource: Option<&Resource>,
        output: TaskOutput,
        outputs: &mut HashMap<String, serde_json::Map<String, serde_json::Value>>,
        state: &mut StackState,
    ) -> ResourceOutcome {
        match output {
            TaskOutput::Created { id, outputs: produced } => {
                outputs.insert(entry.logical_name.clone(), produced.clone());
                Self::record(entry, resource, state, &id, produced);
                ResourceOutcome::Created
            }
            TaskOutput::Updated { outputs: produced } => {
                outputs.insert(entry.logical_name.clone(), produced.clone());
                if entry.action == ActionType::Noop {
                    ResourceOutcome::Unchanged
                } else {
                    let id = state
                        .get_record(&entry.logical_name)
                        .map(|r| r.resource_id.clone())
                        .unwrap_or_default();
                    Self::record(entry, resource, state, &id, produced);
                    ResourceOutcome::Updated
                }
            }
            TaskOutput::Deleted => {
                state.remove_record(&entry.logical_name);
                ResourceOutcome::Deleted
            }
        }
    }

    /// Writes or refreshes the state record for a created or updated entry.
    ///
    /// Inputs are recorded in canonical unresolved form so future diffs
    /// compare like with like even when referenced outputs change.
    fn record(
        entry: &PlanEntry,
        resource: Option<&Resource>,
        state: &mut StackState,
        id: &str,
        produced: serde_json::Map<String, serde_json::Value>,
    ) {
        let hasher = InputHasher::new();
        let (input_hash, last_inputs, deps) = resource.map_or_else(
            || (String::new(), serde_json::json!({}), Vec::new()),
            |r| {
                (
                    hasher.hash_resource(r),
                    r.canonical_inputs(),
                    r.dependency_names().into_iter().collect(),
                )
            },
        );
        let record = crate::state::StateRecord::new(
            &entry.logical_name,
            &entry.type_token,
            id,
            &input_hash,
            last_inputs,
            serde_json::Value::Object(produced),
            deps,
        );
        state.set_record(record);
    }

    /// Marks all transitive dependents of a failed entry as skipped.
    fn skip_dependents(
        idx: usize,
        plan: &Plan,
        results: &mut [Option<ActionResult>],
        dependents: &[Vec<usize>],
    ) {
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            for &dep in &dependents[current] {
                if results[dep].is_none() {
                    let entry = &plan.entries[dep];
                    warn!(
                        "Skipping {} because a dependency failed",
                        entry.logical_name
                    );
                    results[dep] = Some(ActionResult {
                        index: dep,
                        logical_name: entry.logical_name.clone(),
                        action: entry.action,
                        outcome: ResourceOutcome::Skipped,
                        error: Some(String::from("dependency failed")),
                    });
                    stack.push(dep);
                }
            }
        }
    }

    /// Computes the summary counts for a finished run.
    fn summarize(results: Vec<ActionResult>, aborted: bool) -> ExecutionResult {
        let count = |o: ResourceOutcome| results.iter().filter(|r| r.outcome == o).count();
        let created = count(ResourceOutcome::Created);
        let updated = count(ResourceOutcome::Updated);
        let deleted = count(ResourceOutcome::Deleted);
        let unchanged = count(ResourceOutcome::Unchanged);
        let failed = count(ResourceOutcome::Failed);
        let skipped = count(ResourceOutcome::Skipped);
        ExecutionResult {
            results,
            created,
            updated,
            deleted,
            unchanged,
            failed,
            skipped,
            aborted,
            success: failed == 0 && skipped == 0 && !aborted,
        }
    }
}

/// How a ready entry enters execution.
enum Dispatch {
    /// A worker task to spawn on the join set.
    Spawned(
        std::pin::Pin<
            Box<dyn std::future::Future<Output = (usize, Result<TaskOutput>)> + Send + 'static>,
        >,
    ),
    /// The entry completed without a provider call.
    Immediate(Result<TaskOutput>),
}

/// Runs the provider call for one entry, retrying transient failures.
async fn run_action(
    action: ActionType,
    name: &str,
    token: &str,
    resource_id: Option<String>,
    inputs: &serde_json::Map<String, serde_json::Value>,
    provider: &Arc<dyn Provider>,
    max_attempts: u32,
) -> Result<TaskOutput> {
    match action {
        ActionType::Create => {
            let produced =
                retry::with_backoff(name, max_attempts, || provider.create(token, inputs)).await?;
            Ok(TaskOutput::Created {
                id: produced.id,
                outputs: produced.outputs,
            })
        }
        ActionType::Update => {
            let Some(id) = resource_id else {
                return Err(CairnError::internal(format!(
                    "no recorded id for {name}, cannot update"
                )));
            };
            let produced =
                retry::with_backoff(name, max_attempts, || provider.update(token, &id, inputs))
                    .await?;
            Ok(TaskOutput::Updated { outputs: produced })
        }
        ActionType::Delete => {
            let Some(id) = resource_id else {
                // Nothing recorded means nothing to tear down externally.
                debug!("No recorded id for {name}, treating delete as done");
                return Ok(TaskOutput::Deleted);
            };
            match retry::with_backoff(name, max_attempts, || provider.delete(token, &id)).await {
                Ok(()) => Ok(TaskOutput::Deleted),
                // An external resource that is already gone is the desired end
                // state for a delete.
                Err(CairnError::Provider(ProviderError::NotFound { .. })) => {
                    debug!("Resource {name} ({id}) already gone, treating delete as done");
                    Ok(TaskOutput::Deleted)
                }
                Err(e) => Err(e),
            }
        }
        ActionType::Noop => Err(CairnError::internal(format!(
            "noop entry {name} reached the worker path"
        ))),
    }
}

/// Resolves a resource's inputs against published outputs.
fn resolve_inputs(
    resource: &Resource,
    outputs: &HashMap<String, serde_json::Map<String, serde_json::Value>>,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut resolved = serde_json::Map::new();
    for (key, value) in &resource.inputs {
        let json = value.resolve(outputs).map_err(|r| {
            CairnError::Exec(ExecError::UnresolvedReference {
                reference: r.expression(),
                resource: resource.logical_name.clone(),
            })
        })?;
        resolved.insert(key.clone(), json);
    }
    Ok(resolved)
}

impl ExecutionResult {
    /// Returns true if every entry succeeded and nothing was skipped.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.success && self.failed == 0 && self.skipped == 0
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged, {} failed, {} skipped",
            self.created, self.updated, self.deleted, self.unchanged, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::planner::{DiffEngine, Plan};
    use crate::provider::MemoryProvider;
    use crate::state::LocalStateStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn registry_with(provider: MemoryProvider) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register("test", Arc::new(provider));
        registry
    }

    async fn run(
        set: &ResourceSet,
        state: &mut StackState,
        registry: &ProviderRegistry,
        cancel: watch::Receiver<bool>,
    ) -> ExecutionResult {
        let temp = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(temp.path(), "demo");
        let graph = DependencyGraph::build(set).expect("graph");
        let diff = DiffEngine::new().compute(set, Some(state), registry);
        let plan = Plan::from_diff("demo", &diff, set, &graph, Some(state));
        PlanExecutor::new(registry)
            .execute(&plan, set, state, &store, cancel)
            .await
            .expect("execute")
    }

    #[tokio::test]
    async fn test_creates_record_state_and_outputs() {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "base", &json!({"x": 1}), vec![])
            .expect("declare");
        set.declare(
            "test:core/Thing",
            "child",
            &json!({"parent": "${base.id}"}),
            vec![],
        )
        .expect("declare");

        let registry = registry_with(MemoryProvider::new());
        let mut state = StackState::new("demo");
        let (_tx, rx) = watch::channel(false);
        let result = run(&set, &mut state, &registry, rx).await;

        assert!(result.success);
        assert_eq!(result.created, 2);
        let child = state.get_record("child").expect("child record");
        assert_eq!(child.dependencies, vec![String::from("base")]);
        assert!(!child.input_hash.is_empty());
    }

    #[tokio::test]
    async fn test_failure_skips_transitive_dependents_only() {
        let mut set = ResourceSet::new();
        set.declare("test:core/A", "a", &json!({}), vec![]).expect("declare");
        set.declare("test:core/B", "b", &json!({"p": "${a.id}"}), vec![])
            .expect("declare");
        set.declare("test:core/C", "c", &json!({"p": "${b.id}"}), vec![])
            .expect("declare");
        set.declare("test:core/A", "other", &json!({}), vec![])
            .expect("declare");

        let provider = MemoryProvider::new();
        provider.fail_on("test:core/B");
        let registry = registry_with(provider);

        let mut state = StackState::new("demo");
        let (_tx, rx) = watch::channel(false);
        let result = run(&set, &mut state, &registry, rx).await;

        assert!(!result.success);
        assert_eq!(result.created, 2); // a and other
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert!(state.get_record("a").is_some());
        assert!(state.get_record("b").is_none());
        assert!(state.get_record("c").is_none());
    }

    #[tokio::test]
    async fn test_noop_publishes_recorded_outputs_for_dependents() {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "base", &json!({"x": 1}), vec![])
            .expect("declare");

        // Seed state as if base was applied previously.
        let hasher = InputHasher::new();
        let resource = set.get("base").expect("base");
        let mut state = StackState::new("demo");
        state.set_record(crate::state::StateRecord::new(
            "base",
            "test:core/Thing",
            "id-base",
            &hasher.hash_resource(resource),
            resource.canonical_inputs(),
            json!({"id": "id-base", "name": "base"}),
            vec![],
        ));

        set.declare(
            "test:core/Thing",
            "child",
            &json!({"parent": "${base.id}"}),
            vec![],
        )
        .expect("declare");

        let registry = registry_with(MemoryProvider::new());
        let (_tx, rx) = watch::channel(false);
        let result = run(&set, &mut state, &registry, rx).await;

        assert!(result.success);
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.created, 1);
        assert!(state.get_record("child").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_recover_from_transient_failures() {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "flaky", &json!({}), vec![])
            .expect("declare");

        let provider = MemoryProvider::new();
        provider.fail_transiently("test:core/Thing", 2);
        let registry = registry_with(provider);

        let mut state = StackState::new("demo");
        let (_tx, rx) = watch::channel(false);
        let result = run(&set, &mut state, &registry, rx).await;

        assert!(result.success);
        assert_eq!(result.created, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_everything() {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "base", &json!({}), vec![])
            .expect("declare");

        let registry = registry_with(MemoryProvider::new());
        let mut state = StackState::new("demo");
        let (_tx, rx) = watch::channel(true);
        let result = run(&set, &mut state, &registry, rx).await;

        assert!(result.aborted);
        assert!(!result.success);
        assert_eq!(result.skipped, 1);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_deletes_run_before_creates_share_nothing() {
        let mut state = StackState::new("demo");
        state.set_record(crate::state::StateRecord::new(
            "old",
            "test:core/Thing",
            "id-old",
            "hash",
            json!({}),
            json!({}),
            vec![],
        ));

        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "new", &json!({}), vec![])
            .expect("declare");

        let registry = registry_with(MemoryProvider::new());
        let (_tx, rx) = watch::channel(false);
        let result = run(&set, &mut state, &registry, rx).await;

        assert!(result.success);
        assert_eq!(result.deleted, 1);
        assert_eq!(result.created, 1);
        assert!(state.get_record("old").is_none());
        assert!(state.get_record("new").is_some());
    }
}
