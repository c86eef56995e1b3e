use std::{
    collections::BTreeMap,
    fmt,
    fs::create_dir_all,
    path::{Path, PathBuf},
};

use crate::error::{ExtractError, Result};

/// Logical source kinds an extractor can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileType {
    Csv,
    Json,
    Excel,
    Parquet,
}

impl FileType {
    pub const ALL: [FileType; 4] = [FileType::Csv, FileType::Json, FileType::Excel, FileType::Parquet];

    pub fn name(self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Json => "json",
            FileType::Excel => "excel",
            FileType::Parquet => "parquet",
        }
    }

    fn default_extensions(self) -> &'static [&'static str] {
        match self {
            FileType::Csv => &[".csv"],
            FileType::Json => &[".json", ".jsonl"],
            FileType::Excel => &[".xlsx", ".xls"],
            FileType::Parquet => &[".parquet"],
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    pub raw_data_dir: PathBuf,
    pub processed_data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub log_level: String,
    pub log_file: PathBuf,
    pub performance_log_file: PathBuf,
    /// Rows per batch when reading large files.
    pub chunk_size: usize,
    /// Memory budget in bytes.
    pub max_memory_use: u64,
    /// Recognized extensions per file type, lowercase with leading dot.
    pub supported_file_types: BTreeMap<FileType, Vec<String>>,
}

impl Settings {
    pub const DEFAULT_LOG_LEVEL: &'static str = "INFO";
    pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
    pub const DEFAULT_MAX_MEMORY_USE: &'static str = "1G";

    pub fn from_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let data_dir = base_dir.join("data");
        let supported_file_types = FileType::ALL
            .iter()
            .map(|t| (*t, t.default_extensions().iter().map(|e| e.to_string()).collect()))
            .collect();

        Self {
            raw_data_dir: data_dir.join("raw"),
            processed_data_dir: data_dir.join("processed"),
            reports_dir: data_dir.join("reports"),
            log_level: Self::DEFAULT_LOG_LEVEL.to_string(),
            log_file: data_dir.join("app.log"),
            performance_log_file: data_dir.join("performance.log"),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            max_memory_use: 1024 * 1024 * 1024,
            supported_file_types,
            data_dir,
            base_dir,
        }
    }

    pub fn with_max_memory_use(mut self, size: &str) -> Result<Self> {
        self.max_memory_use = parse_memory_size(size)?;
        Ok(self)
    }

    pub fn directories(&self) -> [&Path; 4] {
        [
            &self.data_dir,
            &self.raw_data_dir,
            &self.processed_data_dir,
            &self.reports_dir,
        ]
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in self.directories() {
            create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Resolves a path to its file type by extension, case-insensitively.
    pub fn file_type_for(&self, path: &Path) -> Option<FileType> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let ext = format!(".{ext}");
        self.supported_file_types
            .iter()
            .find(|(_, exts)| exts.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
            .map(|(t, _)| *t)
    }

    /// The configured budget, capped by what the host actually allows.
    pub fn effective_memory_budget(&self) -> u64 {
        self.max_memory_use.min(detect_memory_limit())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_base_dir(".")
    }
}

/// Parses sizes like `1G`, `512M`, `64KB` or a plain byte count (base 1024).
pub fn parse_memory_size(input: &str) -> Result<u64> {
    let trimmed = input.trim().to_ascii_uppercase();
    let without_b = trimmed.strip_suffix('B').unwrap_or(&trimmed);
    let (digits, multiplier) = match without_b.chars().last() {
        Some('K') => (&without_b[..without_b.len() - 1], 1u64 << 10),
        Some('M') => (&without_b[..without_b.len() - 1], 1u64 << 20),
        Some('G') => (&without_b[..without_b.len() - 1], 1u64 << 30),
        Some('T') => (&without_b[..without_b.len() - 1], 1u64 << 40),
        _ => (without_b, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| ExtractError::Config(format!("invalid memory size '{input}'")))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| ExtractError::Config(format!("memory size '{input}' overflows")))
}

/// Memory available to this process in bytes.
pub fn detect_memory_limit() -> u64 {
    // 1. Try Cgroup v2
    if let Some(bytes) = read_cgroup_limit("/sys/fs/cgroup/memory.max") {
        return bytes;
    }

    // 2. Try Cgroup v1
    if let Some(bytes) = read_cgroup_limit("/sys/fs/cgroup/memory/memory.limit_in_bytes") {
        return bytes;
    }

    // 3. Fallback to System Memory (sys-info)
    if let Ok(mem) = sys_info::mem_info() {
        return mem.total * 1024; // mem_info returns kB
    }

    // 4. Last resort fallback (assume 8GB)
    8 * 1024 * 1024 * 1024
}

fn read_cgroup_limit(path: &str) -> Option<u64> {
    let contents = std::fs::read_to_string(path).ok()?;
    let bytes = contents.trim().parse::<u64>().ok()?;
    (bytes > 0 && bytes < u64::MAX).then_some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_hangs_off_data_dir() {
        let settings = Settings::from_base_dir("/srv/etl");
        assert_eq!(settings.data_dir, PathBuf::from("/srv/etl/data"));
        assert_eq!(settings.raw_data_dir, PathBuf::from("/srv/etl/data/raw"));
        assert_eq!(settings.processed_data_dir, PathBuf::from("/srv/etl/data/processed"));
        assert_eq!(settings.reports_dir, PathBuf::from("/srv/etl/data/reports"));
        assert_eq!(settings.log_file, PathBuf::from("/srv/etl/data/app.log"));
        assert_eq!(
            settings.performance_log_file,
            PathBuf::from("/srv/etl/data/performance.log")
        );
        assert_eq!(settings.chunk_size, 10_000);
        assert_eq!(settings.max_memory_use, 1 << 30);
    }

    #[test]
    fn file_types_resolve_by_extension() {
        let settings = Settings::default();
        let cases = [
            ("orders.csv", Some(FileType::Csv)),
            ("events.JSONL", Some(FileType::Json)),
            ("events.json", Some(FileType::Json)),
            ("budget.xls", Some(FileType::Excel)),
            ("budget.xlsx", Some(FileType::Excel)),
            ("facts.parquet", Some(FileType::Parquet)),
            ("notes.txt", None),
            ("Makefile", None),
        ];
        for (path, expected) in cases {
            assert_eq!(settings.file_type_for(Path::new(path)), expected, "{path}");
        }
    }

    #[test]
    fn memory_sizes_parse() {
        assert_eq!(parse_memory_size("1G").unwrap(), 1 << 30);
        assert_eq!(parse_memory_size("512m").unwrap(), 512 << 20);
        assert_eq!(parse_memory_size("64KB").unwrap(), 64 << 10);
        assert_eq!(parse_memory_size("2048").unwrap(), 2048);
        assert!(matches!(parse_memory_size("lots"), Err(ExtractError::Config(_))));
        assert!(matches!(parse_memory_size("99999999999T"), Err(ExtractError::Config(_))));
    }

    #[test]
    fn ensure_directories_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::from_base_dir(tmp.path());
        settings.ensure_directories().unwrap();
        for dir in settings.directories() {
            assert!(dir.is_dir(), "{}", dir.display());
        }
    }

    #[test]
    fn budget_never_exceeds_configured_value() {
        let settings = Settings::default().with_max_memory_use("1M").unwrap();
        assert_eq!(settings.effective_memory_budget(), 1 << 20);
    }
}
