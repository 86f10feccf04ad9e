use crate::monitor::CpuStrategy;
use std::{path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

/// Runtime knobs, read once at startup from `TANDEM_*` environment
/// variables with compiled defaults.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Rows per chunk handed to the pipeline variants.
    pub chunk_size: u64,
    /// Batch results fetched per page during reconciliation.
    pub result_page_size: u64,
    /// Dispatcher idle poll interval.
    pub poll_interval: Duration,
    /// Resource sampler interval.
    pub monitor_interval: Duration,
    /// Iterations created per eligible run by the scheduled expansion.
    pub scheduled_iterations: u32,
    /// Cores held back from the candidate's worker pool.
    pub candidate_reserve_cpus: usize,
    /// How CPU usage is sampled.
    pub cpu_strategy: CpuStrategy,
    /// Where the embedded database lives.
    pub state_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_size: 15_000,
            result_page_size: 500,
            poll_interval: Duration::from_secs(10),
            monitor_interval: Duration::from_millis(25),
            scheduled_iterations: 10,
            candidate_reserve_cpus: 3,
            cpu_strategy: CpuStrategy::Process,
            state_dir: default_state_dir(),
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cpu_strategy = if env_parse("TANDEM_USES_CGROUP_CPU", false) {
            CpuStrategy::CgroupV2 {
                stat_path: PathBuf::from(env_string(
                    "TANDEM_CGROUP_CPU_STAT",
                    "/sys/fs/cgroup/cpu.stat",
                )),
                cpu_limit: env_parse("TANDEM_CGROUP_CPU_LIMIT", default_cpu_limit()),
            }
        } else {
            CpuStrategy::Process
        };
        Self {
            chunk_size: env_parse("TANDEM_CHUNK_SIZE", defaults.chunk_size),
            result_page_size: env_parse("TANDEM_RESULT_PAGE_SIZE", defaults.result_page_size),
            poll_interval: Duration::from_secs(env_parse(
                "TANDEM_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )),
            monitor_interval: Duration::from_millis(env_parse(
                "TANDEM_MONITOR_INTERVAL_MS",
                defaults.monitor_interval.as_millis() as u64,
            )),
            scheduled_iterations: env_parse(
                "TANDEM_SCHEDULED_ITERATIONS",
                defaults.scheduled_iterations,
            ),
            candidate_reserve_cpus: env_parse(
                "TANDEM_CANDIDATE_RESERVE_CPUS",
                defaults.candidate_reserve_cpus,
            ),
            cpu_strategy,
            state_dir: std::env::var("TANDEM_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".tandem").join("state"))
        .unwrap_or_else(|| PathBuf::from(".tandem-state"))
}

fn default_cpu_limit() -> f64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as f64)
        .unwrap_or(1.0)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parses an environment variable, keeping the default (and warning)
/// when the value is present but malformed.
fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}
