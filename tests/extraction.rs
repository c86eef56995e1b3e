use std::{
    fs::File,
    io::{Seek, SeekFrom},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use arrow::csv::{reader::Format, ReaderBuilder};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tabular_extract::{
    monitor::load_metrics, report::NO_DATA, ExtractError, Extractor, ExtractorRegistry, FileType,
    PerformanceMonitor, ReadOptions, Result, Settings, Status, Table,
};

/// Minimal CSV reader standing in for a real source implementation.
#[derive(Default)]
struct CsvExtractor {
    reads: AtomicUsize,
}

impl Extractor for CsvExtractor {
    fn name(&self) -> &str {
        "csv"
    }

    fn validate_source(&self, source: &Path) -> bool {
        source.is_file()
    }

    fn read_data(&self, source: &Path, options: &ReadOptions) -> Result<Table> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut file = File::open(source)?;
        let (schema, _) = Format::default().with_header(true).infer_schema(&mut file, None)?;
        file.seek(SeekFrom::Start(0))?;

        let schema = Arc::new(schema);
        let reader = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .with_batch_size(options.chunk_size.unwrap_or(1024))
            .build(file)?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Table::try_new(schema, batches)
    }
}

fn workspace() -> (tempfile::TempDir, Settings) {
    let tmp = tempfile::tempdir().unwrap();
    let settings = Settings::from_base_dir(tmp.path());
    settings.ensure_directories().unwrap();
    (tmp, settings)
}

fn write_orders(settings: &Settings, rows: usize) -> std::path::PathBuf {
    let path = settings.raw_data_dir.join("Orders.csv");
    let mut body = String::from("id,customer,total\n");
    for i in 0..rows {
        body.push_str(&format!("{i},customer_{},{}.5\n", i % 7, i * 3));
    }
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn missing_source_is_rejected_before_reading() {
    let (_tmp, settings) = workspace();
    let missing = settings.raw_data_dir.join("missing.csv");
    let monitor = Arc::new(PerformanceMonitor::new());
    let mut registry = ExtractorRegistry::new(settings, monitor.clone());
    registry.register(FileType::Csv, CsvExtractor::default());

    let err = registry.extract(&missing, &ReadOptions::new()).unwrap_err();

    assert!(matches!(err, ExtractError::InvalidSource { ref path } if path == &missing));
    assert!(monitor.is_empty());
    assert_eq!(monitor.generate_report(), NO_DATA);
}

#[test]
fn csv_source_lands_in_processed_as_parquet() {
    let (_tmp, settings) = workspace();
    let source = write_orders(&settings, 25);
    let metrics_file = settings.performance_log_file.clone();
    let processed_dir = settings.processed_data_dir.clone();
    let monitor = Arc::new(PerformanceMonitor::new().with_metrics_file(&metrics_file));
    let mut registry = ExtractorRegistry::new(settings, monitor.clone());
    registry.register(FileType::Csv, CsvExtractor::default());

    let stats = registry
        .extract_to_processed(&source, &ReadOptions::new().with_chunk_size(10))
        .unwrap();

    assert_eq!(stats.rows_extracted, 25);
    assert_eq!(stats.output_path, processed_dir.join("orders.parquet"));
    assert!(stats.file_size_mb > 0.0);

    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&stats.output_path).unwrap())
        .unwrap()
        .build()
        .unwrap();
    let batches: Vec<_> = reader.map(|b| b.unwrap()).collect();
    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 25);
    assert_eq!(batches[0].schema().field(1).name(), "customer");

    let operations: Vec<String> = monitor.metrics().iter().map(|m| m.operation().to_string()).collect();
    assert_eq!(operations, ["csv.read_data", "write_parquet"]);

    let persisted = load_metrics(&metrics_file).unwrap();
    assert_eq!(persisted, monitor.metrics());
}

#[test]
fn report_covers_successes_and_errors_of_one_operation() {
    let monitor = PerformanceMonitor::new();
    let parse = monitor.instrument("parse", |line: &str| line.trim().parse::<i64>());

    for line in ["1", " 2", "3 "] {
        parse(line).unwrap();
    }
    let err = parse("three").unwrap_err();
    assert_eq!(err.to_string(), "invalid digit found in string");

    let metrics = monitor.metrics();
    assert_eq!(metrics.iter().filter(|m| m.status() == Status::Success).count(), 3);
    assert_eq!(metrics[3].error_message(), Some("invalid digit found in string"));

    let report = monitor.generate_report();
    assert!(report.contains("Operation: parse\n  Invocations: 3\n"), "{report}");
    let errors = report.split("=== Errors ===\n").nth(1).unwrap();
    assert_eq!(errors.matches("Operation: parse").count(), 1);
    assert!(errors.contains("Message: invalid digit found in string"));

    assert_eq!(monitor.generate_report(), report);
}

#[test]
fn one_monitor_is_shared_across_extractors() {
    let (_tmp, settings) = workspace();
    let source = write_orders(&settings, 3);
    let monitor = Arc::new(PerformanceMonitor::new());
    let mut registry = ExtractorRegistry::new(settings, monitor.clone());
    registry.register(FileType::Csv, CsvExtractor::default());

    registry.extract(&source, &ReadOptions::new()).unwrap();
    monitor.observe("transform", || ());

    assert_eq!(monitor.len(), 2);
    let report = monitor.generate_report();
    assert!(report.contains("Operation: csv.read_data"));
    assert!(report.contains("Operation: transform"));
}
