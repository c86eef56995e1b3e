use std::{collections::BTreeMap, fmt};

use crate::monitor::{Metric, Outcome, TIMESTAMP_FORMAT};

pub const NO_DATA: &str = "No performance metrics available";

/// Text summary of a metrics buffer.
///
/// Success records are grouped by operation name in lexical order; error
/// records are listed afterwards in the order they were recorded.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceReport<'a> {
    metrics: &'a [Metric],
}

impl<'a> PerformanceReport<'a> {
    pub fn new(metrics: &'a [Metric]) -> Self {
        Self { metrics }
    }

    pub fn summaries(&self) -> BTreeMap<&'a str, OperationSummary> {
        let mut summaries: BTreeMap<&str, OperationSummary> = BTreeMap::new();
        for metric in self.metrics {
            if let Outcome::Success {
                memory_used_mb,
                cpu_percent,
            } = metric.outcome()
            {
                summaries
                    .entry(metric.operation())
                    .or_default()
                    .consume(metric.execution_time(), *memory_used_mb, *cpu_percent);
            }
        }
        summaries
    }

    pub fn errors(&self) -> impl Iterator<Item = &'a Metric> {
        let metrics: &'a [Metric] = self.metrics;
        metrics.iter().filter(|m| !m.is_success())
    }
}

impl fmt::Display for PerformanceReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.metrics.is_empty() {
            return f.write_str(NO_DATA);
        }

        writeln!(f, "=== Performance report ===")?;
        writeln!(f)?;

        for (operation, summary) in self.summaries() {
            writeln!(f, "Operation: {operation}")?;
            writeln!(f, "  Invocations: {}", summary.count)?;
            writeln!(f, "  Average time: {:.3}s", summary.mean_time())?;
            writeln!(f, "  Min/Max time: {:.3}s / {:.3}s", summary.min_time, summary.max_time)?;
            writeln!(f, "  Average memory used: {:.2}MB", summary.mean_memory_mb())?;
            writeln!(f, "  Average CPU load: {:.2}%", summary.mean_cpu_percent())?;
            writeln!(f)?;
        }

        let mut errors = self.errors().peekable();
        if errors.peek().is_some() {
            writeln!(f, "=== Errors ===")?;
            for error in errors {
                writeln!(f, "Operation: {}", error.operation())?;
                writeln!(f, "Time: {}", error.timestamp().format(TIMESTAMP_FORMAT))?;
                writeln!(f, "Message: {}", error.error_message().unwrap_or_default())?;
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Running totals for the success records of one operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationSummary {
    pub count: usize,
    pub total_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub total_memory_mb: f64,
    pub total_cpu_percent: f64,
}

impl Default for OperationSummary {
    fn default() -> Self {
        Self {
            count: 0,
            total_time: 0.0,
            min_time: f64::INFINITY,
            max_time: f64::NEG_INFINITY,
            total_memory_mb: 0.0,
            total_cpu_percent: 0.0,
        }
    }
}

impl OperationSummary {
    fn consume(&mut self, execution_time: f64, memory_used_mb: f64, cpu_percent: f64) {
        self.count += 1;
        self.total_time += execution_time;
        self.min_time = self.min_time.min(execution_time);
        self.max_time = self.max_time.max(execution_time);
        self.total_memory_mb += memory_used_mb;
        self.total_cpu_percent += cpu_percent;
    }

    pub fn mean_time(&self) -> f64 {
        self.total_time / self.count.max(1) as f64
    }

    pub fn mean_memory_mb(&self) -> f64 {
        self.total_memory_mb / self.count.max(1) as f64
    }

    pub fn mean_cpu_percent(&self) -> f64 {
        self.total_cpu_percent / self.count.max(1) as f64
    }
}
