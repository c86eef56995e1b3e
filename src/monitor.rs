//! Execution time, memory and CPU measurement for arbitrary operations.
//!
//! A [`PerformanceMonitor`] owns one metrics buffer and one process probe.
//! Every operation measured through it produces exactly one [`Metric`],
//! whether it returns `Ok`, returns `Err`, or unwinds. Each record is pushed
//! to the buffer, logged as one line, and appended to the metrics file when
//! one is configured.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabular_extract::PerformanceMonitor;
//!
//! let monitor = Arc::new(PerformanceMonitor::new().with_metrics_file("data/performance.log"));
//! let double = monitor.instrument("double", |x: i64| Ok::<_, std::num::TryFromIntError>(x * 2));
//! assert_eq!(double(21).unwrap(), 42);
//! println!("{}", monitor.generate_report());
//! ```

use std::{
    fmt,
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use chrono::{Local, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use crate::error::{ExtractError, Result};
use crate::report::PerformanceReport;

/// Timestamp layout used in log lines, reports and the metrics file.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The part of a [`Metric`] that differs between success and error records.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { memory_used_mb: f64, cpu_percent: f64 },
    Error { message: String },
}

/// One recorded observation of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    timestamp: NaiveDateTime,
    operation: String,
    execution_time: f64,
    outcome: Outcome,
}

impl Metric {
    /// Time is rounded to 3 decimals, memory and CPU to 2.
    pub fn success(
        operation: impl Into<String>,
        execution_time: f64,
        memory_used_mb: f64,
        cpu_percent: f64,
    ) -> Self {
        Self {
            timestamp: now(),
            operation: operation.into(),
            execution_time: round_to(execution_time, 3),
            outcome: Outcome::Success {
                memory_used_mb: round_to(memory_used_mb, 2),
                cpu_percent: round_to(cpu_percent, 2),
            },
        }
    }

    pub fn error(operation: impl Into<String>, execution_time: f64, message: impl Into<String>) -> Self {
        Self {
            timestamp: now(),
            operation: operation.into(),
            execution_time: round_to(execution_time, 3),
            outcome: Outcome::Error {
                message: message.into(),
            },
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Seconds.
    pub fn execution_time(&self) -> f64 {
        self.execution_time
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn status(&self) -> Status {
        match self.outcome {
            Outcome::Success { .. } => Status::Success,
            Outcome::Error { .. } => Status::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == Status::Success
    }

    pub fn memory_used_mb(&self) -> Option<f64> {
        match self.outcome {
            Outcome::Success { memory_used_mb, .. } => Some(memory_used_mb),
            Outcome::Error { .. } => None,
        }
    }

    pub fn cpu_percent(&self) -> Option<f64> {
        match self.outcome {
            Outcome::Success { cpu_percent, .. } => Some(cpu_percent),
            Outcome::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Error { message } => Some(message),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Success {
                memory_used_mb,
                cpu_percent,
            } => write!(
                f,
                "Operation: {} | Time: {}s | Memory: {}MB | CPU: {}%",
                self.operation, self.execution_time, memory_used_mb, cpu_percent
            ),
            Outcome::Error { message } => write!(
                f,
                "Operation: {} | Time: {}s | Status: ERROR | Message: {}",
                self.operation, self.execution_time, message
            ),
        }
    }
}

/// Local wall-clock time at the precision the metrics file keeps.
fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(6)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Flat row layout of the metrics file. Fields absent from a record's
/// shape are written as empty cells.
#[derive(Debug, Serialize, Deserialize)]
struct MetricRow {
    timestamp: String,
    operation: String,
    execution_time: f64,
    memory_used_mb: Option<f64>,
    cpu_percent: Option<f64>,
    status: Status,
    error_message: Option<String>,
}

impl From<&Metric> for MetricRow {
    fn from(metric: &Metric) -> Self {
        Self {
            timestamp: metric.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            operation: metric.operation.clone(),
            execution_time: metric.execution_time,
            memory_used_mb: metric.memory_used_mb(),
            cpu_percent: metric.cpu_percent(),
            status: metric.status(),
            error_message: metric.error_message().map(str::to_string),
        }
    }
}

impl TryFrom<MetricRow> for Metric {
    type Error = ExtractError;

    fn try_from(row: MetricRow) -> Result<Self> {
        let timestamp = NaiveDateTime::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| ExtractError::read_with_source(format!("bad timestamp '{}'", row.timestamp), e))?;
        let outcome = match row.status {
            Status::Success => match (row.memory_used_mb, row.cpu_percent) {
                (Some(memory_used_mb), Some(cpu_percent)) => Outcome::Success {
                    memory_used_mb,
                    cpu_percent,
                },
                _ => {
                    return Err(ExtractError::read(format!(
                        "success row for '{}' lacks memory or CPU values",
                        row.operation
                    )))
                }
            },
            Status::Error => Outcome::Error {
                message: row.error_message.unwrap_or_default(),
            },
        };
        Ok(Self {
            timestamp,
            operation: row.operation,
            execution_time: row.execution_time,
            outcome,
        })
    }
}

/// Appends one row to the metrics file, writing the header only if the
/// file does not exist yet.
pub fn append_metric(path: &Path, metric: &Metric) -> Result<()> {
    let file_exists = path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(MetricRow::from(metric))?;
    wtr.flush()?;
    Ok(())
}

/// Reads a metrics file back in file order.
pub fn load_metrics(path: &Path) -> Result<Vec<Metric>> {
    let mut rdr = csv::Reader::from_path(path)?;
    rdr.deserialize::<MetricRow>()
        .map(|row| Metric::try_from(row?))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSample {
    pub memory_mb: f64,
    /// Utilization since the previous sample. The first sample taken by a
    /// fresh [`ProcessProbe`] has no baseline and reads 0.0.
    pub cpu_percent: f64,
}

/// Source of process resource readings.
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Reads resident memory and CPU usage of the current process.
pub struct ProcessProbe {
    system: System,
    pid: Option<Pid>,
}

impl ProcessProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        let mut system = System::new();
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }
        Self { system, pid }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for ProcessProbe {
    fn sample(&mut self) -> ResourceSample {
        let Some(pid) = self.pid else {
            return ResourceSample::default();
        };
        if !self.system.refresh_process(pid) {
            return ResourceSample::default();
        }
        self.system
            .process(pid)
            .map(|p| ResourceSample {
                memory_mb: p.memory() as f64 / 1024.0 / 1024.0,
                cpu_percent: f64::from(p.cpu_usage()),
            })
            .unwrap_or_default()
    }
}

pub struct PerformanceMonitor {
    metrics: Mutex<Vec<Metric>>,
    probe: Mutex<Box<dyn ResourceProbe>>,
    metrics_file: Option<PathBuf>,
}

impl PerformanceMonitor {
    /// In-memory monitor sampling the current process.
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(Vec::new()),
            probe: Mutex::new(Box::new(ProcessProbe::new())),
            metrics_file: None,
        }
    }

    pub fn with_metrics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_file = Some(path.into());
        self
    }

    pub fn with_probe(mut self, probe: impl ResourceProbe + 'static) -> Self {
        self.probe = Mutex::new(Box::new(probe));
        self
    }

    pub fn metrics_file(&self) -> Option<&Path> {
        self.metrics_file.as_deref()
    }

    /// Starts measuring `operation`. The returned guard records exactly one
    /// metric: on [`Measurement::succeed`], on [`Measurement::fail`], or
    /// when dropped unfinished.
    pub fn start(&self, operation: impl Into<String>) -> Measurement<'_> {
        let start_memory_mb = self.sample().memory_mb;
        Measurement {
            monitor: self,
            operation: operation.into(),
            started_at: Instant::now(),
            start_memory_mb,
            finished: false,
        }
    }

    /// Runs `f` under measurement and hands back its result untouched.
    pub fn measure<T, E, F>(&self, operation: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let measurement = self.start(operation);
        match f() {
            Ok(value) => {
                measurement.succeed();
                Ok(value)
            }
            Err(err) => {
                measurement.fail(err.to_string());
                Err(err)
            }
        }
    }

    /// [`measure`](Self::measure) for operations that cannot fail.
    pub fn observe<T, F>(&self, operation: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let measurement = self.start(operation);
        let value = f();
        measurement.succeed();
        value
    }

    /// Wraps `f` into a function with the same argument and result whose
    /// every call is measured as `operation`.
    pub fn instrument<'a, A, T, E, F>(
        &'a self,
        operation: impl Into<String>,
        f: F,
    ) -> impl Fn(A) -> std::result::Result<T, E> + 'a
    where
        F: Fn(A) -> std::result::Result<T, E> + 'a,
        E: fmt::Display + 'a,
        A: 'a,
        T: 'a,
    {
        let operation = operation.into();
        move |arg| self.measure(&operation, || f(arg))
    }

    /// Snapshot of every record so far, oldest first.
    pub fn metrics(&self) -> Vec<Metric> {
        self.buffer().clone()
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    pub fn generate_report(&self) -> String {
        PerformanceReport::new(&self.buffer()).to_string()
    }

    fn sample(&self) -> ResourceSample {
        self.probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample()
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<Metric>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, metric: Metric) {
        self.buffer().push(metric.clone());
        self.log_metric(&metric);
    }

    fn log_metric(&self, metric: &Metric) {
        tracing::info!("{metric}");

        if let Some(path) = &self.metrics_file {
            if let Err(e) = append_metric(path, metric) {
                tracing::warn!("Could not append metric to {}: {e}", path.display());
            }
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("metrics", &self.len())
            .field("metrics_file", &self.metrics_file)
            .finish_non_exhaustive()
    }
}

/// Scoped measurement of one operation, see [`PerformanceMonitor::start`].
#[must_use = "dropping a Measurement immediately records it as an error"]
pub struct Measurement<'a> {
    monitor: &'a PerformanceMonitor,
    operation: String,
    started_at: Instant,
    start_memory_mb: f64,
    finished: bool,
}

impl Measurement<'_> {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn succeed(mut self) {
        self.finished = true;
        let execution_time = self.started_at.elapsed().as_secs_f64();
        let end = self.monitor.sample();
        let metric = Metric::success(
            std::mem::take(&mut self.operation),
            execution_time,
            end.memory_mb - self.start_memory_mb,
            end.cpu_percent,
        );
        self.monitor.record(metric);
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.finished = true;
        let metric = Metric::error(
            std::mem::take(&mut self.operation),
            self.started_at.elapsed().as_secs_f64(),
            message,
        );
        self.monitor.record(metric);
    }
}

impl Drop for Measurement<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let message = if std::thread::panicking() {
            "operation panicked"
        } else {
            "measurement dropped before completion"
        };
        let metric = Metric::error(
            std::mem::take(&mut self.operation),
            self.started_at.elapsed().as_secs_f64(),
            message,
        );
        self.monitor.record(metric);
    }
}
