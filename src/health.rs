//! Host health sampling (CPU load, memory, SoC temperature).
//!
//! Readings come from procfs and sysfs. Any metric the platform cannot provide
//! is reported as `None` rather than failing the sample.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TEMPERATURE_LIMIT_C: f32 = 80.0;

#[derive(Clone, Debug, PartialEq)]
pub struct HealthSettings {
    pub sample_interval: Duration,
    pub temperature_limit_c: f32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            temperature_limit_c: DEFAULT_TEMPERATURE_LIMIT_C,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SystemHealth {
    pub cpu_percent: Option<f32>,
    pub memory_used_mb: Option<u64>,
    pub memory_total_mb: Option<u64>,
    pub temperature_c: Option<f32>,
    /// Milliseconds since the Unix epoch.
    pub sampled_at: u64,
}

pub trait HealthProbe: Send {
    fn sample(&mut self) -> SystemHealth;
}

/// Reads `/proc/stat`, `/proc/meminfo` and the first thermal zone.
pub struct ProcHealthProbe {
    proc_root: PathBuf,
    thermal_zone: PathBuf,
    last_cpu: Option<CpuTimes>,
}

impl ProcHealthProbe {
    pub fn new() -> Self {
        Self::with_paths("/proc", "/sys/class/thermal/thermal_zone0")
    }

    pub fn with_paths(proc_root: impl Into<PathBuf>, thermal_zone: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            thermal_zone: thermal_zone.into(),
            last_cpu: None,
        }
    }

    fn read(&self, path: PathBuf) -> Option<String> {
        std::fs::read_to_string(path).ok()
    }
}

impl Default for ProcHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe for ProcHealthProbe {
    fn sample(&mut self) -> SystemHealth {
        let cpu = self
            .read(self.proc_root.join("stat"))
            .and_then(|stat| parse_cpu_times(&stat));
        // Load is the busy share since the previous sample; the first sample
        // uses the totals since boot.
        let cpu_percent = cpu.map(|now| match self.last_cpu {
            Some(prev) => now.busy_percent_since(prev),
            None => now.busy_percent_since(CpuTimes::default()),
        });
        if cpu.is_some() {
            self.last_cpu = cpu;
        }

        let memory = self
            .read(self.proc_root.join("meminfo"))
            .and_then(|info| parse_meminfo(&info));
        let temperature_c = self
            .read(self.thermal_zone.join("temp"))
            .and_then(|raw| parse_millidegrees(&raw));

        SystemHealth {
            cpu_percent,
            memory_used_mb: memory.map(|(used, _)| used),
            memory_total_mb: memory.map(|(_, total)| total),
            temperature_c,
            sampled_at: epoch_millis(SystemTime::now()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

impl CpuTimes {
    fn busy_percent_since(self, prev: CpuTimes) -> f32 {
        let total = self.total.saturating_sub(prev.total);
        if total == 0 {
            return 0.0;
        }
        let busy = self.busy.saturating_sub(prev.busy);
        (busy as f32 / total as f32 * 100.0).clamp(0.0, 100.0)
    }
}

fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|line| line.starts_with("cpu "))?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if fields.len() < 4 {
        return None;
    }
    let total: u64 = fields.iter().sum();
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

/// `(used_mb, total_mb)`
fn parse_meminfo(info: &str) -> Option<(u64, u64)> {
    let field = |name: &str| {
        info.lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
    };
    let total_kb = field("MemTotal:")?;
    let available_kb = field("MemAvailable:").or_else(|| field("MemFree:"))?;
    Some((
        total_kb.saturating_sub(available_kb) / 1024,
        total_kb / 1024,
    ))
}

fn parse_millidegrees(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok().map(|milli| milli / 1000.0)
}

pub(crate) fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Samples a probe at a fixed interval and warns when the temperature limit
/// is crossed (once per excursion).
pub struct HealthMonitor {
    probe: Box<dyn HealthProbe>,
    interval: Duration,
    temperature_limit_c: f32,
    last_sample_at: Option<Instant>,
    latest: Option<SystemHealth>,
    over_limit: bool,
}

impl HealthMonitor {
    pub fn new(probe: Box<dyn HealthProbe>, settings: &HealthSettings) -> Self {
        Self {
            probe,
            interval: settings.sample_interval,
            temperature_limit_c: settings.temperature_limit_c,
            last_sample_at: None,
            latest: None,
            over_limit: false,
        }
    }

    /// Latest health, re-sampling when the interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<SystemHealth> {
        let due = self
            .last_sample_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.interval);
        if due {
            let sample = self.probe.sample();
            self.check_temperature(&sample);
            self.latest = Some(sample);
            self.last_sample_at = Some(now);
        }
        self.latest.clone()
    }

    pub fn latest(&self) -> Option<SystemHealth> {
        self.latest.clone()
    }

    fn check_temperature(&mut self, sample: &SystemHealth) {
        let Some(temp) = sample.temperature_c else {
            return;
        };
        let hot = temp > self.temperature_limit_c;
        if hot && !self.over_limit {
            log::warn!(
                "temperature {:.1}C exceeds limit {:.1}C",
                temp,
                self.temperature_limit_c
            );
        } else if !hot && self.over_limit {
            log::info!("temperature back to {:.1}C", temp);
        }
        self.over_limit = hot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\n";

    #[test]
    fn parses_cpu_line() {
        let times = parse_cpu_times(STAT).unwrap();
        assert_eq!(times, CpuTimes { busy: 200, total: 1000 });
        assert_eq!(times.busy_percent_since(CpuTimes::default()), 20.0);
    }

    #[test]
    fn parses_meminfo() {
        let info = "MemTotal:        4096000 kB\nMemFree:          100000 kB\nMemAvailable:    2048000 kB\n";
        assert_eq!(parse_meminfo(info), Some((2000, 4000)));
        assert_eq!(parse_meminfo("garbage"), None);
    }

    #[test]
    fn probe_reads_fake_procfs() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let zone = dir.path().join("zone0");
        std::fs::create_dir_all(&proc_root).unwrap();
        std::fs::create_dir_all(&zone).unwrap();
        std::fs::write(proc_root.join("stat"), STAT).unwrap();
        std::fs::write(
            proc_root.join("meminfo"),
            "MemTotal: 2048000 kB\nMemAvailable: 1024000 kB\n",
        )
        .unwrap();
        std::fs::write(zone.join("temp"), "48312\n").unwrap();

        let mut probe = ProcHealthProbe::with_paths(&proc_root, &zone);
        let health = probe.sample();
        assert_eq!(health.cpu_percent, Some(20.0));
        assert_eq!(health.memory_total_mb, Some(2000));
        assert_eq!(health.memory_used_mb, Some(1000));
        assert!((health.temperature_c.unwrap() - 48.312).abs() < 1e-3);

        std::fs::write(proc_root.join("stat"), "cpu  150 0 150 750 100 0 0 0 0 0\n").unwrap();
        let health = probe.sample();
        // 100 busy of 150 elapsed jiffies
        assert!((health.cpu_percent.unwrap() - 66.666).abs() < 0.01);
    }

    #[test]
    fn missing_sources_yield_none() {
        let mut probe = ProcHealthProbe::with_paths("/nonexistent/proc", "/nonexistent/zone");
        let health = probe.sample();
        assert_eq!(health.cpu_percent, None);
        assert_eq!(health.memory_total_mb, None);
        assert_eq!(health.temperature_c, None);
    }

    struct CountingProbe {
        samples: usize,
    }

    impl HealthProbe for CountingProbe {
        fn sample(&mut self) -> SystemHealth {
            self.samples += 1;
            SystemHealth {
                temperature_c: Some(self.samples as f32 * 50.0),
                ..SystemHealth::default()
            }
        }
    }

    #[test]
    fn monitor_samples_on_interval() {
        let mut monitor = HealthMonitor::new(
            Box::new(CountingProbe { samples: 0 }),
            &HealthSettings::default(),
        );
        let start = Instant::now();
        assert_eq!(monitor.poll(start).unwrap().temperature_c, Some(50.0));
        assert_eq!(monitor.poll(start + Duration::from_secs(1)).unwrap().temperature_c, Some(50.0));
        let later = monitor.poll(start + Duration::from_secs(5)).unwrap();
        assert_eq!(later.temperature_c, Some(100.0));
        assert!(monitor.over_limit);
    }
}
