//! End-to-end engine tests against the in-memory provider.

use std::sync::Arc;

use cairn::config::ConfigParser;
use cairn::engine::PlanExecutor;
use cairn::planner::{ActionType, DiffEngine, Plan};
use cairn::provider::{MemoryProvider, Provider, ProviderRegistry};
use cairn::stack::StackContext;
use cairn::state::{LocalStateStore, StackState, StateStore};
use tempfile::TempDir;
use tokio::sync::watch;

const STACK: &str = r"
stack:
  name: people-demo
resources:
  - name: database
    type: test:firestore/Database
    inputs:
      locationId: nam5
  - name: person-doc
    type: test:firestore/Document
    inputs:
      database: ${database.id}
      collection: person
  - name: bucket
    type: test:storage/Bucket
    inputs:
      location: US
";

fn load(yaml: &str) -> StackContext {
    let config = ConfigParser::parse_yaml(yaml, None).expect("parse stack yaml");
    StackContext::from_config(config).expect("build context")
}

fn registry(provider: MemoryProvider) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let shared: Arc<dyn Provider> = Arc::new(provider);
    registry.register("test", shared);
    registry
}

async fn apply(
    ctx: &StackContext,
    registry: &ProviderRegistry,
    store: &dyn StateStore,
) -> (StackState, cairn::engine::ExecutionResult) {
    let mut state = store
        .load()
        .await
        .expect("load state")
        .unwrap_or_else(|| StackState::new(ctx.name()));
    let diff = DiffEngine::new().compute(&ctx.resources, Some(&state), registry);
    let plan = Plan::from_diff(ctx.name(), &diff, &ctx.resources, &ctx.graph, Some(&state));
    let (_tx, rx) = watch::channel(false);
    let result = PlanExecutor::new(registry)
        .execute(&plan, &ctx.resources, &mut state, store, rx)
        .await
        .expect("execute plan");
    store.save(&state).await.expect("save state");
    (state, result)
}

#[tokio::test]
async fn test_first_up_creates_everything_in_dependency_order() {
    let temp = TempDir::new().expect("tempdir");
    let store = LocalStateStore::with_base_dir(temp.path(), "people-demo");
    let ctx = load(STACK);
    let provider = MemoryProvider::new();
    let registry = registry(provider);

    let (state, result) = apply(&ctx, &registry, &store).await;

    assert!(result.success);
    assert_eq!(result.created, 3);
    assert_eq!(state.records.len(), 3);

    // The document's dependency on the database is persisted.
    let doc = state.get_record("person-doc").expect("document record");
    assert_eq!(doc.dependencies, vec![String::from("database")]);
}

#[tokio::test]
async fn test_second_up_is_a_noop() {
    let temp = TempDir::new().expect("tempdir");
    let store = LocalStateStore::with_base_dir(temp.path(), "people-demo");
    let ctx = load(STACK);
    let registry = registry(MemoryProvider::new());

    apply(&ctx, &registry, &store).await;
    let (_, second) = apply(&ctx, &registry, &store).await;

    assert!(second.success);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 3);
}

#[tokio::test]
async fn test_changed_inputs_update_only_that_resource() {
    let temp = TempDir::new().expect("tempdir");
    let store = LocalStateStore::with_base_dir(temp.path(), "people-demo");
    let registry = registry(MemoryProvider::new());

    apply(&load(STACK), &registry, &store).await;

    let changed = STACK.replace("location: US", "location: EU");
    let (_, result) = apply(&load(&changed), &registry, &store).await;

    assert!(result.success);
    assert_eq!(result.updated, 1);
    assert_eq!(result.unchanged, 2);
}

#[tokio::test]
async fn test_removed_resource_is_deleted_dependents_first() {
    let temp = TempDir::new().expect("tempdir");
    let store = LocalStateStore::with_base_dir(temp.path(), "people-demo");
    let registry = registry(MemoryProvider::new());

    apply(&load(STACK), &registry, &store).await;

    // Drop the database and its document.
    let shrunk = r"
stack:
  name: people-demo
resources:
  - name: bucket
    type: test:storage/Bucket
    inputs:
      location: US
";
    let ctx = load(shrunk);
    let state = store.load().await.expect("load").expect("state present");
    let diff = DiffEngine::new().compute(&ctx.resources, Some(&state), &registry);
    let plan = Plan::from_diff(ctx.name(), &diff, &ctx.resources, &ctx.graph, Some(&state));

    // Deletes lead the plan, document before the database it references.
    let deletes: Vec<&str> = plan
        .entries
        .iter()
        .filter(|e| e.action == ActionType::Delete)
        .map(|e| e.logical_name.as_str())
        .collect();
    assert_eq!(deletes, vec!["person-doc", "database"]);

    let (state, result) = apply(&ctx, &registry, &store).await;
    assert!(result.success);
    assert_eq!(result.deleted, 2);
    assert_eq!(state.records.len(), 1);
    assert!(state.get_record("bucket").is_some());
}

#[tokio::test]
async fn test_failure_spares_independent_branch_and_state_survives() {
    let temp = TempDir::new().expect("tempdir");
    let store = LocalStateStore::with_base_dir(temp.path(), "people-demo");
    let provider = MemoryProvider::new();
    provider.fail_on("test:firestore/Document");
    let registry = registry(provider);

    let ctx = load(STACK);
    let (_, result) = apply(&ctx, &registry, &store).await;

    assert!(!result.success);
    assert_eq!(result.created, 2); // database and bucket
    assert_eq!(result.failed, 1);

    // The checkpointed state only contains what actually succeeded.
    let persisted = store.load().await.expect("load").expect("state present");
    assert!(persisted.get_record("database").is_some());
    assert!(persisted.get_record("bucket").is_some());
    assert!(persisted.get_record("person-doc").is_none());

    // A retry with a healthy provider finishes the job without redoing work.
    let healthy = registry_for_retry();
    let (_, second) = apply(&ctx, &healthy, &store).await;
    assert!(second.success);
    assert_eq!(second.created, 1);
    assert_eq!(second.unchanged, 2);
}

fn registry_for_retry() -> ProviderRegistry {
    registry(MemoryProvider::new())
}

#[tokio::test]
async fn test_cycles_are_rejected_before_any_provider_call() {
    let cyclic = r"
stack:
  name: people-demo
resources:
  - name: a
    type: test:core/Thing
    inputs:
      x: ${b.id}
  - name: b
    type: test:core/Thing
    inputs:
      y: ${a.id}
";
    let config = ConfigParser::parse_yaml(cyclic, None).expect("parse");
    let err = StackContext::from_config(config).expect_err("cycle must be rejected");
    assert!(err.to_string().contains("cycle") || err.to_string().contains("Cycle"));
}

#[tokio::test]
async fn test_destroy_plan_removes_state_document() {
    let temp = TempDir::new().expect("tempdir");
    let store = LocalStateStore::with_base_dir(temp.path(), "people-demo");
    let registry = registry(MemoryProvider::new());

    let ctx = load(STACK);
    apply(&ctx, &registry, &store).await;

    let mut state = store.load().await.expect("load").expect("state present");
    let plan = Plan::destroy(ctx.name(), &state);
    let (_tx, rx) = watch::channel(false);
    let empty = cairn::resource::ResourceSet::new();
    let result = PlanExecutor::new(&registry)
        .execute(&plan, &empty, &mut state, &store, rx)
        .await
        .expect("execute destroy");

    assert!(result.success);
    assert_eq!(result.deleted, 3);
    assert!(state.is_empty());
}
