use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a CSV file as a dataset; re-loading a name replaces its
    /// rows and bumps the version
    Load {
        #[arg(long, help = "CSV file path")]
        file: String,

        #[arg(long, help = "Dataset name")]
        name: String,

        #[arg(
            long,
            help = "Declared column types, e.g. \"age:number,city:string\""
        )]
        schema: String,
    },
    /// List ingested datasets
    Datasets {
        #[arg(long, help = "If set, prints JSON instead of a table")]
        json: bool,
    },
    /// Create a run from an operations file and execute its first iteration
    Submit {
        #[arg(long, help = "Dataset name")]
        dataset: String,

        #[arg(long, help = "Operations file (JSON)")]
        operations: String,

        #[arg(long, help = "Queue the run without processing it")]
        no_wait: bool,
    },
    /// Queue and execute the next iteration of a finished run
    Iterate {
        #[arg(long, help = "Run ID")]
        run: String,

        #[arg(long, help = "Queue the iteration without processing it")]
        no_wait: bool,
    },
    /// Show tasks, filtered and paged
    Status {
        #[arg(long, help = "Run ID")]
        run: Option<String>,

        #[arg(long, help = "Dataset name")]
        dataset: Option<String>,

        #[arg(long, help = "Iteration number")]
        iteration: Option<u32>,

        #[arg(long, help = "Trigger: \"user\" or \"system\"")]
        trigger: Option<String>,

        #[arg(
            long,
            help = "Task state: pending, in_progress, completed or failed"
        )]
        state: Option<String>,

        #[arg(long, default_value_t = 0, help = "Tasks to skip")]
        skip: u64,

        #[arg(long, default_value_t = 20, help = "Tasks per page (max 100)")]
        limit: u64,

        #[arg(long, help = "If set, prints JSON instead of a table")]
        json: bool,
    },
    /// Show one task's reconciled output, metrics and verdict
    Results {
        #[arg(long, help = "Task ID")]
        task: String,

        #[arg(long, help = "If set, prints the full task as JSON")]
        json: bool,
    },
    /// Put a job on the queue the way the external scheduler would
    Enqueue {
        #[command(subcommand)]
        command: EnqueueCommand,
    },
    /// Drop all tasks and batch results of a dataset, keeping its rows
    Reset {
        #[arg(long, help = "Dataset name")]
        dataset: String,

        #[arg(long, help = "Queue the reset without processing it")]
        no_wait: bool,
    },
    /// Delete a dataset with its rows, tasks and batch results
    Delete {
        #[arg(long, help = "Dataset name")]
        dataset: String,

        #[arg(long, help = "Queue the deletion without processing it")]
        no_wait: bool,
    },
    /// Process queued jobs until interrupted
    Serve {
        #[arg(long, help = "Override the queue poll interval in seconds")]
        poll_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum EnqueueCommand {
    /// Compare outputs of completed, unvalidated tasks
    Validate {
        #[arg(long, help = "Process the queue after enqueueing")]
        wait: bool,
    },
    /// Expand eligible runs into scheduled iterations
    Schedule {
        #[arg(long, help = "Process the queue after enqueueing")]
        wait: bool,
    },
}
