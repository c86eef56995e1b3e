pub mod config;
pub mod error;
pub mod extractor;
pub mod logger;
pub mod monitor;
pub mod report;
pub mod table;

pub use config::{FileType, Settings};
pub use error::{ExtractError, Result};
pub use extractor::{extract, ExtractionStats, Extractor, ExtractorRegistry, ReadOptions};
pub use monitor::{Measurement, Metric, Outcome, PerformanceMonitor, ResourceProbe, Status};
pub use report::PerformanceReport;
pub use table::Table;
