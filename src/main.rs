//! Cairn CLI entrypoint.
//!
//! This is the main entrypoint for the cairn command-line tool.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use cairn::cli::{Cli, Commands, OutputFormatter, StateCommands};
use cairn::config::find_config_file;
use cairn::engine::PlanExecutor;
use cairn::error::{CairnError, ExecError, Result};
use cairn::planner::{DiffEngine, Plan};
use cairn::provider::{MemoryProvider, ProviderRegistry};
use cairn::stack::StackContext;
use cairn::state::{
    RunHistoryEntry, RunOperation, StackState, StateStore, generate_holder_id,
};

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings),
        Commands::Preview { detailed } => {
            cmd_preview(cli.config.as_ref(), detailed, &formatter).await
        }
        Commands::Up { yes } => cmd_up(cli.config.as_ref(), yes, cli.parallelism, &formatter).await,
        Commands::Destroy { yes } => {
            cmd_destroy(cli.config.as_ref(), yes, cli.parallelism, &formatter).await
        }
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new stack.
fn cmd_init(path: &PathBuf, force: bool) -> Result<()> {
    info!("Initializing new stack in: {}", path.display());

    let stack_path = path.join("cairn.stack.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && stack_path.exists() {
        eprintln!("Stack file already exists: {}", stack_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let stack_template = include_str!("../templates/cairn.stack.yaml");
    std::fs::write(&stack_path, stack_template)?;
    eprintln!("Created: {}", stack_path.display());

    let gitignore_entry = ".cairn/\n";
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".cairn") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Cairn state")?;
            write!(file, "{gitignore_entry}")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, gitignore_entry)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit cairn.stack.yaml with your resource declarations");
    eprintln!("  2. Run 'cairn validate' to check the stack file");
    eprintln!("  3. Run 'cairn preview' to see what would change");
    eprintln!("  4. Run 'cairn up' to apply the stack");

    Ok(())
}

/// Validate the stack file.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool) -> Result<()> {
    let stack_file = resolve_config_path(config_path)?;
    info!("Validating stack file: {}", stack_file.display());

    let ctx = StackContext::load(&stack_file)?;

    eprintln!("Stack file is valid!");
    if show_warnings {
        let validation = cairn::config::StackValidator::new().validate(&ctx.config)?;
        if !validation.warnings.is_empty() {
            eprintln!("\nWarnings:");
            for warning in &validation.warnings {
                eprintln!("  - {warning}");
            }
        }
    }

    eprintln!("\nStack summary:");
    eprintln!("  Stack: {}", ctx.name());
    if let Some(description) = &ctx.config.stack.description {
        eprintln!("  Description: {description}");
    }
    eprintln!("  Resources: {}", ctx.resources.len());
    eprintln!("  Apply order: {}", ctx.graph.apply_order().join(", "));

    Ok(())
}

/// Show the plan without applying it.
async fn cmd_preview(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let stack_file = resolve_config_path(config_path)?;
    let ctx = StackContext::load(&stack_file)?;
    let store = ctx.open_store()?;
    let state = store.load().await?;

    let registry = build_registry(&ctx);
    let diff = DiffEngine::new().compute(&ctx.resources, state.as_ref(), &registry);
    let plan = Plan::from_diff(ctx.name(), &diff, &ctx.resources, &ctx.graph, state.as_ref());

    eprintln!("{}", formatter.format_plan(&plan, &diff, detailed));
    Ok(())
}

/// Apply the stack.
async fn cmd_up(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: usize,
    formatter: &OutputFormatter,
) -> Result<()> {
    let stack_file = resolve_config_path(config_path)?;
    let ctx = StackContext::load(&stack_file)?;
    let store = ctx.open_store()?;

    let lock = store.acquire_lock(&generate_holder_id()).await?;
    let outcome = up_locked(&ctx, store.as_ref(), auto_approve, parallelism, formatter).await;
    if let Err(e) = store.release_lock(&lock.lock_id).await {
        warn!("Failed to release state lock: {e}");
    }
    outcome
}

/// The locked portion of `up`: plan, confirm, execute, record history.
async fn up_locked(
    ctx: &StackContext,
    store: &dyn StateStore,
    auto_approve: bool,
    parallelism: usize,
    formatter: &OutputFormatter,
) -> Result<()> {
    let mut state = store
        .load()
        .await?
        .unwrap_or_else(|| StackState::new(ctx.name()));

    let registry = build_registry(ctx);
    let diff = DiffEngine::new().compute(&ctx.resources, Some(&state), &registry);
    let plan = Plan::from_diff(ctx.name(), &diff, &ctx.resources, &ctx.graph, Some(&state));

    if plan.is_noop() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    eprintln!("{}", formatter.format_plan(&plan, &diff, false));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let cancel = spawn_ctrl_c_watch();
    let executor = PlanExecutor::new(&registry).with_parallelism(parallelism);
    let result = executor
        .execute(&plan, &ctx.resources, &mut state, store, cancel)
        .await?;

    let touched: Vec<String> = plan
        .actionable_entries()
        .iter()
        .map(|e| e.logical_name.clone())
        .collect();
    let history = if result.success {
        RunHistoryEntry::new(RunOperation::Up, touched)
    } else {
        RunHistoryEntry::failed(
            RunOperation::Up,
            touched,
            &format!("{} entries failed, {} skipped", result.failed, result.skipped),
        )
    };
    state.add_history(history);
    store.save(&state).await?;

    eprintln!("{}", formatter.format_result(&result));

    if result.aborted {
        return Err(CairnError::Exec(ExecError::Aborted {
            reason: String::from("interrupted"),
        }));
    }
    if !result.success {
        return Err(CairnError::Exec(ExecError::ApplyFailed {
            failed: result.failed + result.skipped,
        }));
    }
    Ok(())
}

/// Destroy everything in state.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: usize,
    formatter: &OutputFormatter,
) -> Result<()> {
    let stack_file = resolve_config_path(config_path)?;
    let ctx = StackContext::load(&stack_file)?;
    let store = ctx.open_store()?;

    let lock = store.acquire_lock(&generate_holder_id()).await?;
    let outcome = destroy_locked(&ctx, store.as_ref(), auto_approve, parallelism, formatter).await;
    if let Err(e) = store.release_lock(&lock.lock_id).await {
        warn!("Failed to release state lock: {e}");
    }
    outcome
}

/// The locked portion of `destroy`.
async fn destroy_locked(
    ctx: &StackContext,
    store: &dyn StateStore,
    auto_approve: bool,
    parallelism: usize,
    formatter: &OutputFormatter,
) -> Result<()> {
    let Some(mut state) = store.load().await? else {
        eprintln!("No state found, nothing to destroy.");
        return Ok(());
    };
    if state.is_empty() {
        eprintln!("No resources recorded, nothing to destroy.");
        return Ok(());
    }

    let plan = Plan::destroy(ctx.name(), &state);
    eprintln!("The following resources will be destroyed:");
    for entry in &plan.entries {
        eprintln!("  - {} ({})", entry.logical_name, entry.type_token);
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let registry = build_registry(ctx);
    let cancel = spawn_ctrl_c_watch();
    let executor = PlanExecutor::new(&registry).with_parallelism(parallelism);
    // Destroy uses recorded resources, not the desired set.
    let empty = cairn::resource::ResourceSet::new();
    let result = executor
        .execute(&plan, &empty, &mut state, store, cancel)
        .await?;

    let touched: Vec<String> = plan
        .entries
        .iter()
        .map(|e| e.logical_name.clone())
        .collect();
    let history = if result.success {
        RunHistoryEntry::new(RunOperation::Destroy, touched)
    } else {
        RunHistoryEntry::failed(
            RunOperation::Destroy,
            touched,
            &format!("{} entries failed", result.failed),
        )
    };
    state.add_history(history);

    if state.is_empty() {
        store.delete().await?;
        eprintln!("\nAll resources destroyed.");
    } else {
        store.save(&state).await?;
        eprintln!("{}", formatter.format_result(&result));
        return Err(CairnError::Exec(ExecError::ApplyFailed {
            failed: result.failed + result.skipped,
        }));
    }

    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let stack_file = resolve_config_path(config_path)?;
    let ctx = StackContext::load(&stack_file)?;
    let store = ctx.open_store()?;

    match command {
        StateCommands::Show => {
            if let Some(state) = store.load().await? {
                eprintln!("{}", formatter.format_state(&state));
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.get_lock_info().await? {
                    store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Builds the provider registry for a stack.
///
/// One in-memory provider instance is registered for every provider package
/// the stack references; real provider plugins would be wired here.
fn build_registry(ctx: &StackContext) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let provider = Arc::new(MemoryProvider::new());
    let packages: BTreeSet<&str> = ctx
        .resources
        .iter()
        .filter_map(|r| r.type_token.split(':').next())
        .collect();
    for package in packages {
        debug!("Registering in-memory provider for package {package}");
        registry.register(package, provider.clone());
    }
    registry
}

/// Asks the user for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Raises a cancellation flag on the first Ctrl-C.
fn spawn_ctrl_c_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight operations");
            let _ = tx.send(true);
        }
    });
    rx
}
