//! redgreen CLI entry point.
//!
//! Thin by design (spec §1 Out-of-scope: full CLI argument parsing / PRD
//! ingestion / project bootstrap are external collaborators). This wires
//! the store, decomposition pipeline, worker pool, phase gate, and run
//! validator together end to end behind a handful of flags.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use redgreen::adapters::lm::SubprocessLmTransport;
use redgreen::adapters::sqlite::{all_embedded_migrations, create_pool, Migrator, SqliteTaskStore};
use redgreen::adapters::verifier::{ProcessVerifierTools, ToolResolver};
use redgreen::domain::models::RunStatus;
use redgreen::domain::ports::{TaskStore, VerifierTools};
use redgreen::infrastructure::config::ConfigLoader;
use redgreen::services::{
    CircuitBreakerService, DecompositionPipeline, LmStageRunner, PhaseGate, RunValidator, TddPipeline, WorkerPool,
};

/// Decompose a PRD into tasks (if given one) and run the worker pool to
/// completion, phase by phase, then validate the finished run.
#[derive(Debug, Parser)]
#[command(name = "redgreen", version, about)]
struct Cli {
    /// Path to the SQLite database file. Overrides config/env.
    #[arg(long)]
    db_path: Option<String>,

    /// PRD to decompose into tasks before running. Omit to run against
    /// tasks already present in the store.
    #[arg(long)]
    prd_path: Option<PathBuf>,

    /// Workspace directory tasks execute in.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Overrides `worker_pool.max_workers` from config.
    #[arg(long)]
    max_workers: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::load().context("failed to load configuration")?;
    if let Some(db_path) = &cli.db_path {
        config.store.path = db_path.clone();
    }
    if let Some(max_workers) = cli.max_workers {
        config.worker_pool.max_workers = max_workers;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pool = create_pool(&format!("sqlite:{}", config.store.path), None)
        .await
        .context("failed to open database")?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("failed to run migrations")?;

    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(pool));
    let workspace = cli.workspace.to_string_lossy().to_string();

    if let Some(prd_path) = &cli.prd_path {
        let prd_source = tokio::fs::read_to_string(prd_path)
            .await
            .with_context(|| format!("failed to read PRD at {}", prd_path.display()))?;
        let transport = Arc::new(SubprocessLmTransport::new(config.lm_stage_runner.executable.clone()));
        let decomposer = DecompositionPipeline::new(transport, config.decomposition.clone());
        let tasks = decomposer.run(&prd_source, &workspace).await.context("decomposition failed")?;
        tracing::info!(count = tasks.len(), "decomposed PRD into tasks");
        for task in tasks {
            store.create_task(task).await.context("failed to persist a decomposed task")?;
        }
    }

    let lm_transport = Arc::new(SubprocessLmTransport::new(config.lm_stage_runner.executable.clone()));
    let lm_runner = Arc::new(LmStageRunner::new(lm_transport, config.lm_stage_runner.clone()));
    let tool_resolver = ToolResolver::new(config.verifier_tools.venv_dir.clone());
    let tools: Arc<dyn VerifierTools> = Arc::new(ProcessVerifierTools::new(tool_resolver.clone()));
    let breakers = Arc::new(CircuitBreakerService::new(store.clone(), config.circuit_breakers.clone()));
    let tdd_pipeline =
        Arc::new(TddPipeline::new(store.clone(), lm_runner, tools.clone(), breakers.clone(), tool_resolver));
    let worker_pool = WorkerPool::new(
        store.clone(),
        tdd_pipeline,
        breakers,
        config.worker_pool.clone(),
        config.heartbeat.clone(),
        cli.workspace.clone(),
    );
    let phase_gate = PhaseGate::new(store.clone(), tools.clone());

    let run = store.start_run(config.worker_pool.max_workers).await.context("failed to start run")?;

    let all_tasks = store.all_tasks().await.context("failed to list tasks")?;
    let max_phase = all_tasks.iter().map(|t| t.phase).max().unwrap_or(0);

    let mut run_status = RunStatus::Passed;
    for phase in 0..=max_phase {
        worker_pool.run_phase(phase).await.context("worker pool failed")?;
        let report = phase_gate.run(phase, &workspace).await.context("phase gate failed")?;
        if !report.passed {
            tracing::error!(phase, failing_tests = ?report.failing_tests, "phase gate failed, stopping run");
            run_status = RunStatus::Failed;
            break;
        }
    }

    let validator = RunValidator::new(store.clone(), tools);
    let validation = validator.validate(&workspace).await.context("run validation failed")?;
    let run = run.finish(run_status).with_validation(validation);
    store.finish_run(run).await.context("failed to persist run result")?;

    Ok(())
}
