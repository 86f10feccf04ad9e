//! The job loop: claims queued jobs one at a time and executes them.
//!
//! Handler errors are logged and never stop the loop; cancellation is
//! honored between jobs, so a claimed job always finishes.

use engine_core::store::JobQueue;
use model::execution::job::{Job, JobRequest};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Engine;
use crate::error::EngineError;
use crate::{orchestrator, runs, validator};

pub(crate) async fn run_loop(engine: &Engine, cancel: CancellationToken) {
    info!(
        poll_secs = engine.settings.poll_interval.as_secs(),
        "dispatcher started"
    );
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match engine.store.claim_next().await {
            Ok(Some(job)) => execute(engine, job).await,
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(engine.settings.poll_interval) => {}
                }
            }
            Err(err) => {
                error!(error = %err, "failed to claim a job");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(engine.settings.poll_interval) => {}
                }
            }
        }
    }
    info!("dispatcher stopped");
}

/// Executes every queued job until the queue is empty. Returns how
/// many jobs ran.
pub(crate) async fn drain(engine: &Engine) -> Result<usize, EngineError> {
    let mut processed = 0;
    while let Some(job) = engine.store.claim_next().await? {
        execute(engine, job).await;
        processed += 1;
    }
    Ok(processed)
}

pub(crate) async fn execute(engine: &Engine, job: Job) {
    let name = job.request.name();
    info!(job_id = %job.id, job = name, "job started");
    let started = std::time::Instant::now();
    match dispatch(engine, job.request).await {
        Ok(()) => info!(
            job_id = %job.id,
            job = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        ),
        Err(err) => error!(job_id = %job.id, job = name, error = %err, "job failed"),
    }
}

async fn dispatch(engine: &Engine, request: JobRequest) -> Result<(), EngineError> {
    match request {
        JobRequest::StartRun {
            run_id,
            dataset_id,
            actions,
            iteration,
            trigger,
        } => orchestrator::run_batches(engine, run_id, dataset_id, actions, iteration, trigger)
            .await,
        JobRequest::ValidateRuns => validator::validate_runs(engine).await,
        JobRequest::PrepareScheduledRuns => runs::prepare_scheduled_runs(engine).await,
        JobRequest::ResetRuns { dataset_id } => runs::reset_runs(engine, dataset_id).await,
        JobRequest::DeleteDataset { dataset_id } => runs::delete_dataset(engine, dataset_id).await,
    }
}
