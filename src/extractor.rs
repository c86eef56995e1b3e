//! Extraction contract and file-type dispatch.
//!
//! Source readers implement [`Extractor`]. The sequencing around them lives
//! in [`extract`], which implementors cannot override:
//! - normalize the source path and log it
//! - `validate_source`, failing fast with [`ExtractError::InvalidSource`]
//! - `read_data` under the performance monitor, result passed through as-is
//!
//! [`ExtractorRegistry`] picks the extractor for a path from the configured
//! extension mapping and can write the result to the processed directory.

use std::{
    collections::{BTreeMap, HashMap},
    fs::create_dir_all,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use crate::config::{FileType, Settings};
use crate::error::{ExtractError, Result};
use crate::logger::{log_end_process, log_error, log_start_process};
use crate::monitor::PerformanceMonitor;
use crate::table::Table;

/// Reader options for one extraction. Keys other than the chunk size are
/// interpreted by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub chunk_size: Option<usize>,
    params: BTreeMap<String, String>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

/// A reader for one kind of data source.
pub trait Extractor: Send + Sync {
    /// Short label used in operation names and log lines.
    fn name(&self) -> &str {
        "extractor"
    }

    fn validate_source(&self, source: &Path) -> bool;

    fn read_data(&self, source: &Path, options: &ReadOptions) -> Result<Table>;
}

/// Lexically cleans a path: drops `.` segments and folds `name/..` pairs.
pub fn normalize_source(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Validates then reads `source` with `extractor`.
///
/// `read_data` is never called for a source that fails validation. Its
/// errors come back unchanged, after being recorded by `monitor` under
/// `"<name>.read_data"`.
pub fn extract<E>(
    extractor: &E,
    monitor: &PerformanceMonitor,
    source: impl AsRef<Path>,
    options: &ReadOptions,
) -> Result<Table>
where
    E: Extractor + ?Sized,
{
    let source = normalize_source(source.as_ref());
    tracing::info!("Extracting data from: {}", source.display());

    if !extractor.validate_source(&source) {
        return Err(ExtractError::InvalidSource { path: source });
    }

    let operation = format!("{}.read_data", extractor.name());
    monitor.measure(&operation, || extractor.read_data(&source, options))
}

#[derive(Debug, Clone)]
pub struct ExtractionStats {
    pub output_path: PathBuf,
    pub rows_extracted: usize,
    pub duration_secs: f64,
    pub file_size_mb: f64,
}

pub struct ExtractorRegistry {
    settings: Settings,
    monitor: Arc<PerformanceMonitor>,
    extractors: HashMap<FileType, Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new(settings: Settings, monitor: Arc<PerformanceMonitor>) -> Self {
        Self {
            settings,
            monitor,
            extractors: HashMap::new(),
        }
    }

    /// Registers `extractor` for `file_type`, returning the one it replaces.
    pub fn register(
        &mut self,
        file_type: FileType,
        extractor: impl Extractor + 'static,
    ) -> Option<Box<dyn Extractor>> {
        self.extractors.insert(file_type, Box::new(extractor))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn file_type_for(&self, source: &Path) -> Result<FileType> {
        self.settings
            .file_type_for(source)
            .ok_or_else(|| ExtractError::UnsupportedFileType {
                path: source.to_path_buf(),
            })
    }

    /// Extracts `source` with the extractor registered for its file type.
    /// Without an explicit chunk size the configured one is used.
    pub fn extract(&self, source: impl AsRef<Path>, options: &ReadOptions) -> Result<Table> {
        let source = normalize_source(source.as_ref());
        let process = format!("extract {}", source.display());
        log_start_process(&process);

        let result = self.dispatch(&source, options);
        match &result {
            Ok(table) => {
                tracing::info!(
                    "  Rows: {} | Columns: {}",
                    format_number(table.num_rows()),
                    table.num_columns()
                );
                log_end_process(&process);
            }
            Err(e) => log_error(e, Some(process.as_str())),
        }
        result
    }

    /// Extracts `source` and writes it to `<processed_dir>/<stem>.parquet`.
    pub fn extract_to_processed(
        &self,
        source: impl AsRef<Path>,
        options: &ReadOptions,
    ) -> Result<ExtractionStats> {
        let start = Instant::now();
        let source = normalize_source(source.as_ref());
        let table = self.extract(&source, options)?;

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .ok_or_else(|| ExtractError::InvalidSource { path: source.clone() })?;
        create_dir_all(&self.settings.processed_data_dir)?;
        let output_path = self.settings.processed_data_dir.join(format!("{stem}.parquet"));

        let file_size_mb = self
            .monitor
            .measure("write_parquet", || table.write_parquet(&output_path))?;

        let duration = start.elapsed().as_secs_f64();
        tracing::info!(
            "  Done: {} rows → {} in {} ({:.1} MB)",
            format_number(table.num_rows()),
            output_path.display(),
            format_duration(duration),
            file_size_mb
        );

        Ok(ExtractionStats {
            output_path,
            rows_extracted: table.num_rows(),
            duration_secs: duration,
            file_size_mb,
        })
    }

    fn dispatch(&self, source: &Path, options: &ReadOptions) -> Result<Table> {
        let file_type = self.file_type_for(source)?;
        let extractor = self
            .extractors
            .get(&file_type)
            .ok_or(ExtractError::NoExtractor { file_type })?;

        let mut options = options.clone();
        options.chunk_size.get_or_insert(self.settings.chunk_size);
        extract(extractor.as_ref(), &self.monitor, source, &options)
    }
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() / 3));
    for (i, ch) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result
}

fn format_duration(secs: f64) -> String {
    let total_secs = secs as u64;
    let mins = total_secs / 60;
    let remaining_secs = total_secs % 60;

    if mins > 0 {
        format!("{}m {}s", mins, remaining_secs)
    } else {
        format!("{:.1}s", secs)
    }
}
