mod cgroup;

use chrono::Utc;
use model::execution::task::ResourceSample;
use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};
use sysinfo::{Pid, ProcessExt, System, SystemExt, get_current_pid};
use tracing::warn;

/// How the sampler measures CPU.
#[derive(Debug, Clone)]
pub enum CpuStrategy {
    /// This process's CPU share, via the OS process table.
    Process,
    /// The cgroup v2 `usage_usec` counter, normalized by the number of
    /// CPUs allotted to the container.
    CgroupV2 { stat_path: PathBuf, cpu_limit: f64 },
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub strategy: CpuStrategy,
}

/// Samples CPU and memory on a background thread between `start` and
/// `stop`. Sampling problems are logged and produce gaps, never errors:
/// a session that observed nothing returns an empty list.
pub struct ResourceMonitor;

impl ResourceMonitor {
    pub fn start(config: MonitorConfig) -> MonitorSession {
        let stop = Arc::new(AtomicBool::new(false));
        let samples = Arc::new(Mutex::new(Vec::new()));

        let thread_stop = Arc::clone(&stop);
        let thread_samples = Arc::clone(&samples);
        let handle = std::thread::Builder::new()
            .name("tandem-monitor".into())
            .spawn(move || sample_loop(config, thread_stop, thread_samples));

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                warn!(error = %e, "could not start resource sampler");
                None
            }
        };
        MonitorSession {
            stop,
            samples,
            handle,
        }
    }
}

pub struct MonitorSession {
    stop: Arc<AtomicBool>,
    samples: Arc<Mutex<Vec<ResourceSample>>>,
    handle: Option<JoinHandle<()>>,
}

impl MonitorSession {
    /// Stops the sampler and drains everything it recorded, in sample
    /// order. Always returns, even if the sampler thread panicked.
    pub fn stop(mut self) -> Vec<ResourceSample> {
        self.shutdown();
        match self.samples.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample_loop(config: MonitorConfig, stop: Arc<AtomicBool>, samples: Arc<Mutex<Vec<ResourceSample>>>) {
    let mut sampler = match Sampler::new(config.strategy) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "resource sampler unavailable, session will be empty");
            return;
        }
    };
    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(config.interval);
        if stop.load(Ordering::Acquire) {
            break;
        }
        let sample = sampler.sample();
        match samples.lock() {
            Ok(mut guard) => guard.push(sample),
            Err(_) => break,
        }
    }
}

struct Sampler {
    system: System,
    pid: Pid,
    cgroup: Option<cgroup::CgroupCpuReader>,
    cgroup_warned: bool,
}

impl Sampler {
    fn new(strategy: CpuStrategy) -> Result<Self, String> {
        let pid = get_current_pid().map_err(|e| e.to_string())?;
        let cgroup = match strategy {
            CpuStrategy::Process => None,
            CpuStrategy::CgroupV2 {
                stat_path,
                cpu_limit,
            } => Some(cgroup::CgroupCpuReader::new(stat_path, cpu_limit)),
        };
        Ok(Self {
            system: System::new(),
            pid,
            cgroup,
            cgroup_warned: false,
        })
    }

    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_process(self.pid);
        let (process_cpu, memory_mb) = match self.system.process(self.pid) {
            Some(p) => (
                p.cpu_usage() as f64,
                p.memory() as f64 / (1024.0 * 1024.0),
            ),
            None => (0.0, 0.0),
        };
        let cpu_percent = match self.cgroup.as_mut() {
            Some(reader) => match reader.percent() {
                Ok(pct) => pct,
                Err(e) => {
                    // Fall back to the process reading for this sample.
                    if !self.cgroup_warned {
                        warn!(error = %e, "cgroup cpu read failed, using process cpu");
                        self.cgroup_warned = true;
                    }
                    process_cpu
                }
            },
            None => process_cpu,
        };
        ResourceSample {
            at: Utc::now(),
            cpu_percent,
            memory_mb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_stop_returns_no_samples() {
        let session = ResourceMonitor::start(MonitorConfig {
            interval: Duration::from_secs(60),
            strategy: CpuStrategy::Process,
        });
        let samples = session.stop();
        assert!(samples.is_empty());
    }

    #[test]
    fn samples_are_time_ordered() {
        let session = ResourceMonitor::start(MonitorConfig {
            interval: Duration::from_millis(10),
            strategy: CpuStrategy::Process,
        });
        std::thread::sleep(Duration::from_millis(80));
        let samples = session.stop();
        assert!(!samples.is_empty());
        for pair in samples.windows(2) {
            assert!(pair[0].at <= pair[1].at);
        }
    }

    #[test]
    fn broken_cgroup_path_falls_back_to_process_readings() {
        let session = ResourceMonitor::start(MonitorConfig {
            interval: Duration::from_millis(10),
            strategy: CpuStrategy::CgroupV2 {
                stat_path: PathBuf::from("/nonexistent/cpu.stat"),
                cpu_limit: 1.0,
            },
        });
        std::thread::sleep(Duration::from_millis(50));
        let samples = session.stop();
        assert!(!samples.is_empty());
    }

    #[test]
    fn dropping_an_unstopped_session_terminates_the_thread() {
        let session = ResourceMonitor::start(MonitorConfig {
            interval: Duration::from_millis(5),
            strategy: CpuStrategy::Process,
        });
        std::thread::sleep(Duration::from_millis(20));
        drop(session); // must not hang or panic
    }
}
