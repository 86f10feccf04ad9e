use crate::error::CliError;
use clap::Parser;
use commands::{Commands, EnqueueCommand};
use engine_core::settings::EngineSettings;
use engine_core::store::{DatasetStore, TaskFilter, TaskStore};
use engine_runtime::{Engine, error::EngineError};
use model::core::identifiers::{RunId, TaskId};
use model::execution::job::JobRequest;
use model::execution::operation::Trigger;
use model::execution::task::TaskStatus;
use model::records::dataset::Dataset;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod ingest;
mod output;
mod shutdown;
mod submission;

#[derive(Parser)]
#[command(
    name = "tandem",
    version = "0.1.0",
    about = "Benchmarks competing pipeline implementations and verifies their outputs"
)]
struct Cli {
    #[arg(long, global = true, help = "Overrides TANDEM_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = EngineSettings::from_env();
    if let Some(dir) = cli.state_dir {
        settings.state_dir = dir;
    }
    if let Commands::Serve {
        poll_secs: Some(secs),
    } = &cli.command
    {
        settings.poll_interval = Duration::from_secs(*secs);
    }

    let engine = Engine::open(settings)?;

    match cli.command {
        Commands::Load { file, name, schema } => {
            load(&engine, &file, &name, &schema).await?;
        }
        Commands::Datasets { json } => {
            let datasets = engine
                .store
                .list_datasets()
                .await
                .map_err(EngineError::from)?;
            if json {
                output::print_json(&datasets)?;
            } else {
                output::print_datasets(&datasets);
            }
        }
        Commands::Submit {
            dataset,
            operations,
            no_wait,
        } => {
            submit(&engine, &dataset, &operations, no_wait).await?;
        }
        Commands::Iterate { run, no_wait } => {
            let run_id = parse_run_id(&run)?;
            let summary = engine.iterate_run(run_id).await?;
            println!(
                "Run {} iteration {} queued ({} tasks)",
                summary.run_id,
                summary.iteration,
                summary.task_ids.len()
            );
            if !no_wait {
                drain_and_show(&engine, summary.run_id).await?;
            }
        }
        Commands::Status {
            run,
            dataset,
            iteration,
            trigger,
            state,
            skip,
            limit,
            json,
        } => {
            let mut filter = TaskFilter::all();
            if let Some(run) = run {
                filter = filter.run(parse_run_id(&run)?);
            }
            if let Some(name) = dataset {
                filter = filter.dataset(find_dataset(&engine, &name).await?.id);
            }
            if let Some(iteration) = iteration {
                filter = filter.iteration(iteration);
            }
            if let Some(trigger) = trigger {
                filter = filter.trigger(parse_trigger(&trigger)?);
            }
            if let Some(state) = state {
                filter = filter.status(parse_status(&state)?);
            }
            let page = engine.task_status(&filter, skip, limit).await?;
            if json {
                output::print_json(&page)?;
            } else {
                output::print_task_page(&page);
            }
        }
        Commands::Results { task, json } => {
            let task_id = TaskId::parse(&task).map_err(|_| CliError::InvalidId(task.clone()))?;
            let task = engine
                .store
                .get_task(task_id)
                .await
                .map_err(EngineError::from)?
                .ok_or_else(|| CliError::UnknownTask(task_id.to_string()))?;
            if json {
                output::print_json(&task)?;
            } else {
                output::print_task(&task);
            }
        }
        Commands::Enqueue { command } => {
            let (request, wait) = match command {
                EnqueueCommand::Validate { wait } => (JobRequest::ValidateRuns, wait),
                EnqueueCommand::Schedule { wait } => (JobRequest::PrepareScheduledRuns, wait),
            };
            let name = request.name();
            let job_id = engine.enqueue_job(request).await?;
            println!("Job {job_id} queued ({name})");
            if wait {
                let processed = engine.drain_queue().await?;
                println!("Processed {processed} jobs");
            }
        }
        Commands::Reset { dataset, no_wait } => {
            let dataset = find_dataset(&engine, &dataset).await?;
            engine
                .enqueue_job(JobRequest::ResetRuns {
                    dataset_id: dataset.id,
                })
                .await?;
            println!("Reset of '{}' queued", dataset.name);
            if !no_wait {
                let processed = engine.drain_queue().await?;
                println!("Processed {processed} jobs");
            }
        }
        Commands::Delete { dataset, no_wait } => {
            let dataset = find_dataset(&engine, &dataset).await?;
            engine
                .enqueue_job(JobRequest::DeleteDataset {
                    dataset_id: dataset.id,
                })
                .await?;
            println!("Deletion of '{}' queued", dataset.name);
            if !no_wait {
                let processed = engine.drain_queue().await?;
                println!("Processed {processed} jobs");
            }
        }
        Commands::Serve { .. } => {
            serve(&engine).await;
        }
    }

    Ok(())
}

async fn load(engine: &Engine, file: &str, name: &str, schema: &str) -> Result<(), CliError> {
    let schema = ingest::parse_schema(schema)?;
    let rows = ingest::read_rows(Path::new(file), &schema)?;
    let dataset = engine.register_dataset(name, schema, rows).await?;
    println!(
        "Loaded '{}' as {} (version {}, {} rows)",
        dataset.name, dataset.id, dataset.version, dataset.size
    );
    Ok(())
}

async fn submit(
    engine: &Engine,
    dataset: &str,
    operations: &str,
    no_wait: bool,
) -> Result<(), CliError> {
    let dataset = find_dataset(engine, dataset).await?;
    let source = tokio::fs::read_to_string(operations).await?;
    let operations = submission::parse_operations(&source)?;
    let summary = engine.create_run(dataset.id, operations).await?;
    println!(
        "Run {} created against '{}' ({} tasks)",
        summary.run_id,
        dataset.name,
        summary.task_ids.len()
    );
    if !no_wait {
        drain_and_show(engine, summary.run_id).await?;
    }
    Ok(())
}

/// Processes the queue, then prints the run's tasks.
async fn drain_and_show(engine: &Engine, run_id: RunId) -> Result<(), CliError> {
    let processed = engine.drain_queue().await?;
    info!(processed, "queue drained");
    let page = engine
        .task_status(&TaskFilter::all().run(run_id), 0, 100)
        .await?;
    output::print_task_page(&page);
    Ok(())
}

async fn serve(engine: &Engine) {
    let cancel = shutdown::cancel_on_signal();
    info!(
        state_dir = %engine.settings.state_dir.display(),
        poll_secs = engine.settings.poll_interval.as_secs(),
        "serving the job queue"
    );
    engine.run_dispatcher(cancel).await;
    info!("Dispatcher stopped");
}

async fn find_dataset(engine: &Engine, name: &str) -> Result<Dataset, CliError> {
    engine
        .store
        .find_dataset_by_name(name)
        .await
        .map_err(EngineError::from)?
        .ok_or_else(|| CliError::UnknownDataset(name.to_string()))
}

fn parse_run_id(s: &str) -> Result<RunId, CliError> {
    RunId::parse(s).map_err(|_| CliError::InvalidId(s.to_string()))
}

fn parse_trigger(s: &str) -> Result<Trigger, CliError> {
    match s.to_ascii_lowercase().as_str() {
        "user" => Ok(Trigger::User),
        "system" => Ok(Trigger::System),
        other => Err(CliError::InvalidFlag(format!("unknown trigger '{other}'"))),
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, CliError> {
    match s.to_ascii_lowercase().as_str() {
        "pending" => Ok(TaskStatus::Pending),
        "in_progress" => Ok(TaskStatus::InProgress),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        other => Err(CliError::InvalidFlag(format!(
            "unknown task state '{other}'"
        ))),
    }
}
