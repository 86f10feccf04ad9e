use std::{
    io,
    path::PathBuf,
    time::Instant,
};

/// Reads the cgroup v2 cpu controller and turns the cumulative
/// `usage_usec` counter into a percentage of the allotted CPUs.
pub(crate) struct CgroupCpuReader {
    stat_path: PathBuf,
    cpu_limit: f64,
    last: Option<(Instant, u64)>,
}

impl CgroupCpuReader {
    pub(crate) fn new(stat_path: PathBuf, cpu_limit: f64) -> Self {
        Self {
            stat_path,
            cpu_limit: cpu_limit.max(f64::MIN_POSITIVE),
            last: None,
        }
    }

    /// CPU percent since the previous call. The first call has no delta
    /// to compute and reports 0.
    pub(crate) fn percent(&mut self) -> io::Result<f64> {
        let usage = self.read_usage_usec()?;
        let now = Instant::now();
        let percent = match self.last {
            Some((then, prev)) => {
                let wall_usec = now.duration_since(then).as_micros() as f64;
                if wall_usec > 0.0 {
                    usage.saturating_sub(prev) as f64 / (wall_usec * self.cpu_limit) * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some((now, usage));
        Ok(percent)
    }

    fn read_usage_usec(&self) -> io::Result<u64> {
        let text = std::fs::read_to_string(&self.stat_path)?;
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("usage_usec") {
                return rest
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
            }
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "cpu.stat has no usage_usec line",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_stat(dir: &tempfile::TempDir, usage_usec: u64) -> PathBuf {
        let path = dir.path().join("cpu.stat");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "usage_usec {usage_usec}").unwrap();
        writeln!(f, "user_usec {}", usage_usec / 2).unwrap();
        writeln!(f, "system_usec {}", usage_usec / 2).unwrap();
        path
    }

    #[test]
    fn first_sample_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stat(&dir, 1_000_000);
        let mut reader = CgroupCpuReader::new(path, 4.0);
        assert_eq!(reader.percent().unwrap(), 0.0);
    }

    #[test]
    fn second_sample_uses_the_counter_delta() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stat(&dir, 1_000_000);
        let mut reader = CgroupCpuReader::new(path.clone(), 2.0);
        reader.percent().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        write_stat(&dir, 2_000_000);
        let pct = reader.percent().unwrap();
        assert!(pct > 0.0, "expected positive usage, got {pct}");
    }

    #[test]
    fn counter_going_backwards_clamps_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stat(&dir, 5_000_000);
        let mut reader = CgroupCpuReader::new(path.clone(), 1.0);
        reader.percent().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        write_stat(&dir, 1_000_000);
        assert_eq!(reader.percent().unwrap(), 0.0);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut reader = CgroupCpuReader::new(PathBuf::from("/nonexistent/cpu.stat"), 1.0);
        assert!(reader.percent().is_err());
    }

    #[test]
    fn malformed_stat_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu.stat");
        std::fs::write(&path, "nr_periods 12\n").unwrap();
        let mut reader = CgroupCpuReader::new(path, 1.0);
        assert!(reader.percent().is_err());
    }
}
