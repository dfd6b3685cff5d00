//! Two-phase multi-file merge: structural analysis, then merge execution.
//!
//! Every file is processed in isolation. A file that fails to load or parse is
//! recorded in the per-file log and excluded; the remaining files still merge.
//! Only a merge that produces no rows at all is reported as a failure.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    columns::{ColumnMapper, MappingSuggestions},
    data::Cell,
    header::{HeaderDetection, HeaderDetector},
    normalize::{DateNormalizer, NumberNormalizer},
    output::{self, DelimitedOptions},
    profile::{self, ColumnKind, ColumnTypes, Probes},
    workbook::{self, SourceOptions},
};

pub const SOURCE_COLUMN: &str = "__source_file__";
pub const SOURCE_COLUMN_DISPLAY: &str = "원본 파일";
pub const MAPPING_ACCEPT_CONFIDENCE: f64 = 0.5;
pub const SAMPLE_ROWS: usize = 5;
pub const MAX_DUPLICATE_GROUPS: usize = 50;
pub const DATE_HINTS: &[&str] = &["날짜", "일자", "거래일", "일시", "date"];

const SIGNATURE_SEPARATOR: &str = "\u{1f}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: PathBuf,
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub header_row_index: usize,
    #[serde(default)]
    pub total_rows: usize,
    #[serde(default)]
    pub column_types: ColumnTypes,
    #[serde(default)]
    pub sample_rows: Vec<Vec<Cell>>,
    #[serde(default)]
    pub preamble_rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileAnalysis {
    fn failed(path: &Path, error: String) -> Self {
        Self {
            file_path: path.to_path_buf(),
            filename: file_name(path),
            headers: Vec::new(),
            header_row_index: 0,
            total_rows: 0,
            column_types: ColumnTypes::new(),
            sample_rows: Vec::new(),
            preamble_rows: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeAnalysis {
    pub files: Vec<FileAnalysis>,
    pub suggested_mappings: MappingSuggestions,
    /// Every distinct header across the analyzed files, sorted.
    pub all_headers: Vec<String>,
    pub files_analyzed: usize,
    pub files_failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputTarget {
    /// Do not write a file.
    Skip,
    /// `merged_{timestamp}.xlsx` next to the first input.
    #[default]
    Auto,
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    /// Raw header → canonical name overrides, applied before the mapper.
    pub column_mapping: BTreeMap<String, String>,
    pub date_columns: Vec<String>,
    pub number_columns: Vec<String>,
    pub add_source_column: bool,
    pub sort_by: Option<String>,
    pub auto_detect_types: bool,
    pub output: OutputTarget,
    pub delimited: DelimitedOptions,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            column_mapping: BTreeMap::new(),
            date_columns: Vec::new(),
            number_columns: Vec::new(),
            add_source_column: true,
            sort_by: None,
            auto_detect_types: false,
            output: OutputTarget::Auto,
            delimited: DelimitedOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLog {
    pub file: String,
    pub status: FileStatus,
    #[serde(default)]
    pub rows_processed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_row: Option<usize>,
    #[serde(default)]
    pub original_headers: Vec<String>,
    #[serde(default)]
    pub mapped_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoDetected {
    pub date_columns: Vec<String>,
    pub number_columns: Vec<String>,
    pub sort_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Hex SHA-256 of the row signature.
    pub signature: String,
    pub files: Vec<String>,
    /// Positions in the merged (sorted) row order.
    pub rows: Vec<usize>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub total_suspected: usize,
    pub details: Vec<DuplicateGroup>,
}

/// One merged row: the file it came from and its values keyed by mapped header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedRow {
    pub source: String,
    pub values: Vec<(String, Cell)>,
}

impl MergedRow {
    fn set(&mut self, header: &str, value: Cell) {
        match self.values.iter_mut().find(|(name, _)| name == header) {
            Some((_, existing)) => *existing = value,
            None => self.values.push((header.to_string(), value)),
        }
    }

    pub fn get(&self, header: &str) -> Option<&Cell> {
        self.values
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value)
    }

    /// Value under `header`, with the provenance column resolving to the source file.
    pub fn value_for(&self, header: &str) -> Cell {
        if header == SOURCE_COLUMN {
            return Cell::text(self.source.clone());
        }
        self.get(header).cloned().unwrap_or_default()
    }

    pub fn cells(&self, headers: &[String]) -> Vec<Cell> {
        headers.iter().map(|h| self.value_for(h)).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub unified_headers: Vec<String>,
    pub total_rows: usize,
    pub total_files: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub per_file_log: Vec<FileLog>,
    pub auto_detected: AutoDetected,
    pub duplicates: DuplicateReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<PathBuf>,
    #[serde(skip)]
    pub rows: Vec<MergedRow>,
}

impl MergeResult {
    /// Header labels as shown in the output file.
    pub fn display_headers(&self) -> Vec<String> {
        self.unified_headers
            .iter()
            .map(|h| {
                if h == SOURCE_COLUMN {
                    SOURCE_COLUMN_DISPLAY.to_string()
                } else {
                    h.clone()
                }
            })
            .collect()
    }

    pub fn table_rows(&self) -> Vec<Vec<Cell>> {
        self.rows
            .iter()
            .map(|row| row.cells(&self.unified_headers))
            .collect()
    }
}

struct PreparedFile {
    detection: HeaderDetection,
    mapped_headers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MergeService {
    detector: HeaderDetector,
    mapper: ColumnMapper,
    dates: DateNormalizer,
    numbers: NumberNormalizer,
    source: SourceOptions,
}

impl Default for MergeService {
    fn default() -> Self {
        Self {
            detector: HeaderDetector::default(),
            mapper: ColumnMapper::default(),
            dates: DateNormalizer::default(),
            numbers: NumberNormalizer::default(),
            source: SourceOptions::default(),
        }
    }
}

impl MergeService {
    pub fn new(mapper: ColumnMapper, dates: DateNormalizer, source: SourceOptions) -> Self {
        Self {
            mapper,
            dates,
            source,
            ..Self::default()
        }
    }

    pub fn mapper(&self) -> &ColumnMapper {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut ColumnMapper {
        &mut self.mapper
    }

    fn probes(&self) -> Probes<'_> {
        Probes {
            dates: &self.dates,
            numbers: &self.numbers,
        }
    }

    fn detect(&self, path: &Path) -> Result<HeaderDetection> {
        let table = workbook::read_table(path, &self.source)
            .with_context(|| format!("Reading {path:?}"))?;
        Ok(self.detector.extract_data_with_header(&table.rows))
    }

    pub fn analyze_file(&self, path: &Path) -> Result<FileAnalysis> {
        let detection = self.detect(path)?;
        let column_types =
            profile::infer_column_types(&detection.headers, &detection.data_rows, self.probes());
        Ok(FileAnalysis {
            file_path: path.to_path_buf(),
            filename: file_name(path),
            header_row_index: detection.header_row_index,
            total_rows: detection.total_data_rows(),
            column_types,
            sample_rows: detection.data_rows.iter().take(SAMPLE_ROWS).cloned().collect(),
            preamble_rows: detection.preamble_rows,
            headers: detection.headers,
            error: None,
        })
    }

    /// Phase 1: per-file structure plus cross-file mapping suggestions.
    pub fn analyze_files<P: AsRef<Path>>(&self, paths: &[P]) -> MergeAnalysis {
        let mut analysis = MergeAnalysis::default();
        for path in paths {
            let path = path.as_ref();
            match self.analyze_file(path) {
                Ok(file) => {
                    info!(
                        "✓ Analyzed {} ({} column(s), {} row(s))",
                        file.filename,
                        file.headers.len(),
                        file.total_rows
                    );
                    analysis.files.push(file);
                }
                Err(err) => {
                    warn!("Analysis failed for {path:?}: {err:#}");
                    analysis.files.push(FileAnalysis::failed(path, format!("{err:#}")));
                }
            }
        }

        let header_lists: Vec<Vec<String>> = analysis
            .files
            .iter()
            .filter(|f| f.is_ok())
            .map(|f| f.headers.clone())
            .collect();
        analysis.files_analyzed = header_lists.len();
        analysis.files_failed = analysis.files.len() - header_lists.len();
        if !header_lists.is_empty() {
            analysis.suggested_mappings = self.mapper.suggest_mappings(&header_lists);
            let unique: BTreeSet<&String> = header_lists.iter().flatten().collect();
            analysis.all_headers = unique.into_iter().cloned().collect();
        }
        analysis
    }

    fn prepare(&self, path: &Path, overrides: &BTreeMap<String, String>) -> Result<PreparedFile> {
        let detection = self.detect(path)?;
        let mapped_headers = detection
            .headers
            .iter()
            .map(|header| match overrides.get(header) {
                Some(target) => target.clone(),
                None => {
                    let mapped = self.mapper.map_column(header);
                    if mapped.confidence > MAPPING_ACCEPT_CONFIDENCE {
                        mapped.standard_name
                    } else {
                        header.clone()
                    }
                }
            })
            .collect();
        Ok(PreparedFile {
            detection,
            mapped_headers,
        })
    }

    /// Phase 2: merge every readable file into one unified table.
    pub fn merge_files<P: AsRef<Path>>(&self, paths: &[P], options: &MergeOptions) -> MergeResult {
        let mut result = MergeResult {
            total_files: paths.len(),
            ..MergeResult::default()
        };

        let prepared: Vec<(PathBuf, Result<PreparedFile>)> = paths
            .iter()
            .map(|p| {
                let path = p.as_ref().to_path_buf();
                let file = self.prepare(&path, &options.column_mapping);
                (path, file)
            })
            .collect();

        let mut date_columns = options.date_columns.clone();
        let mut number_columns = options.number_columns.clone();
        if options.auto_detect_types && date_columns.is_empty() && number_columns.is_empty() {
            for file in prepared.iter().filter_map(|(_, f)| f.as_ref().ok()) {
                let types = profile::infer_column_types(
                    &file.mapped_headers,
                    &file.detection.data_rows,
                    self.probes(),
                );
                for header in &file.mapped_headers {
                    if date_columns.contains(header) || number_columns.contains(header) {
                        continue;
                    }
                    match types.get(header) {
                        Some(ColumnKind::Date) => date_columns.push(header.clone()),
                        Some(ColumnKind::Number) => number_columns.push(header.clone()),
                        _ => {}
                    }
                }
            }
            debug!("Auto-detected date columns {date_columns:?}, number columns {number_columns:?}");
        }

        for (path, file) in prepared {
            let filename = file_name(&path);
            match file {
                Ok(file) => {
                    let rows = self.normalize_rows(&file, &filename, &date_columns, &number_columns);
                    info!("✓ Merged {} row(s) from {filename}", rows.len());
                    result.per_file_log.push(FileLog {
                        file: filename,
                        status: FileStatus::Success,
                        rows_processed: rows.len(),
                        header_row: Some(file.detection.header_row_index),
                        original_headers: file.detection.headers,
                        mapped_headers: file.mapped_headers,
                        error: None,
                    });
                    result.files_succeeded += 1;
                    result.rows.extend(rows);
                }
                Err(err) => {
                    warn!("Skipping {filename}: {err:#}");
                    result.per_file_log.push(FileLog {
                        file: filename,
                        status: FileStatus::Error,
                        rows_processed: 0,
                        header_row: None,
                        original_headers: Vec::new(),
                        mapped_headers: Vec::new(),
                        error: Some(format!("{err:#}")),
                    });
                    result.files_failed += 1;
                }
            }
        }

        result.auto_detected.date_columns = date_columns;
        result.auto_detected.number_columns = number_columns;

        if result.rows.is_empty() {
            result.error = Some("No data to merge".to_string());
            return result;
        }

        result.unified_headers = unified_headers(&result.rows, options.add_source_column);

        let sort_column = options
            .sort_by
            .clone()
            .or_else(|| infer_sort_column(&result.auto_detected.date_columns));
        if let Some(column) = &sort_column {
            result
                .rows
                .sort_by_cached_key(|row| row.get(column).map(Cell::as_display).unwrap_or_default());
        }
        result.auto_detected.sort_column = sort_column;

        result.duplicates = find_duplicates(&result.rows, &result.unified_headers);
        result.total_rows = result.rows.len();

        let target = match &options.output {
            OutputTarget::Skip => None,
            OutputTarget::Path(path) => Some(path.clone()),
            OutputTarget::Auto => Some(default_output_path(paths.first().map(AsRef::as_ref))),
        };
        if let Some(target) = target {
            let written = output::write_table(
                &target,
                &result.display_headers(),
                &result.table_rows(),
                options.delimited,
            )
            .with_context(|| format!("Writing merged output to {target:?}"));
            if let Err(err) = written {
                warn!("{err:#}");
                result.error = Some(format!("{err:#}"));
                return result;
            }
            result.output_location = Some(target);
        }

        result.success = true;
        result
    }

    fn normalize_rows(
        &self,
        file: &PreparedFile,
        filename: &str,
        date_columns: &[String],
        number_columns: &[String],
    ) -> Vec<MergedRow> {
        let mut rows = Vec::with_capacity(file.detection.data_rows.len());
        for raw in &file.detection.data_rows {
            if raw.iter().all(Cell::is_blank) {
                continue;
            }
            let mut row = MergedRow {
                source: filename.to_string(),
                values: Vec::with_capacity(file.mapped_headers.len()),
            };
            for (col, header) in file.mapped_headers.iter().enumerate() {
                let mut value = raw.get(col).cloned().unwrap_or_default();
                if date_columns.contains(header)
                    && let Some(date) = self.dates.normalize(&value)
                {
                    value = Cell::Text(date);
                }
                if number_columns.contains(header)
                    && let Some(number) = self.numbers.normalize(&value)
                {
                    value = Cell::Float(number);
                }
                row.set(header, value);
            }
            rows.push(row);
        }
        rows
    }
}

/// First-seen header order across rows, provenance column first when enabled.
pub fn unified_headers(rows: &[MergedRow], add_source_column: bool) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    if add_source_column {
        headers.push(SOURCE_COLUMN.to_string());
    }
    for row in rows {
        for (name, _) in &row.values {
            if !headers.iter().any(|h| h == name) {
                headers.push(name.clone());
            }
        }
    }
    headers
}

/// First date column whose name carries a date hint, else the first date column.
pub fn infer_sort_column(date_columns: &[String]) -> Option<String> {
    date_columns
        .iter()
        .find(|column| {
            let lowered = column.to_lowercase();
            DATE_HINTS.iter().any(|hint| lowered.contains(hint))
        })
        .or_else(|| date_columns.first())
        .cloned()
}

/// Groups rows with identical non-provenance values; only groups spanning
/// more than one source file are reported.
pub fn find_duplicates(rows: &[MergedRow], unified_headers: &[String]) -> DuplicateReport {
    let value_headers: Vec<&String> = unified_headers
        .iter()
        .filter(|h| h.as_str() != SOURCE_COLUMN)
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Vec<usize>, Vec<String>)> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        let signature = value_headers
            .iter()
            .map(|h| row.get(h).map(Cell::as_display).unwrap_or_default())
            .join(SIGNATURE_SEPARATOR);
        let digest = format!("{:x}", Sha256::digest(signature.as_bytes()));
        let entry = groups.entry(digest.clone()).or_insert_with(|| {
            order.push(digest);
            (Vec::new(), Vec::new())
        });
        entry.0.push(idx);
        if !entry.1.contains(&row.source) {
            entry.1.push(row.source.clone());
        }
    }

    let mut report = DuplicateReport::default();
    for digest in order {
        let Some((indices, files)) = groups.remove(&digest) else {
            continue;
        };
        if files.len() < 2 {
            continue;
        }
        report.total_suspected += 1;
        if report.details.len() < MAX_DUPLICATE_GROUPS {
            report.details.push(DuplicateGroup {
                signature: digest,
                count: indices.len(),
                files,
                rows: indices,
            });
        }
    }
    report
}

pub fn default_output_path(first_input: Option<&Path>) -> PathBuf {
    let dir = first_input
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!("merged_{}.xlsx", Local::now().format("%Y%m%d_%H%M%S")))
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
