//! Single-file normalization: header detection, canonical column names,
//! typed-column normalization, cleanup, date ordering, balance verification
//! and auto-classification of the description column.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    classify::{ClassificationRule, Classifier, KeywordTable, RuleStore, UNCLASSIFIED},
    cli::NormalizeArgs,
    columns::ColumnMapper,
    data::{Cell, RawTable},
    error::{self, Error},
    financial::{self, BalanceCheck, FinancialColumns, FinancialSummary, Role},
    header::HeaderDetector,
    normalize::{DateNormalizer, NumberNormalizer},
    output::{self, DelimitedOptions},
    profile::{self, Probes},
    table,
    template::MappingTemplate,
    workbook::{self, SourceOptions},
};

pub const PREPROCESSING_VERSION: u32 = 2;
pub const MAPPING_ACCEPT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredData {
    pub headers: Vec<String>,
    pub original_headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub sheet_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingLogEntry {
    pub mapped_to: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingInfo {
    pub header_row_detected: usize,
    pub meta_rows: Vec<Vec<String>>,
    /// Only headers that were renamed appear here.
    pub column_mapping: BTreeMap<String, MappingLogEntry>,
    pub date_columns: Vec<String>,
    pub number_columns: Vec<String>,
    pub financial_columns: BTreeMap<Role, Option<String>>,
    pub sorted_by: Option<String>,
    pub balance_check: Option<BalanceCheck>,
    /// Row index → category, for rows that did not fall through to unclassified.
    pub auto_classifications: BTreeMap<usize, String>,
    pub rows_before_cleanup: usize,
    pub rows_after_cleanup: usize,
    pub preprocessing_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub structured_data: StructuredData,
    pub total_rows: usize,
    pub preprocessing: PreprocessingInfo,
    #[serde(default)]
    pub user_classifications: BTreeMap<usize, String>,
}

impl NormalizedDocument {
    pub fn load(path: &Path) -> error::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> error::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.structured_data.headers
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.structured_data.rows
    }

    pub fn financial_columns(&self) -> FinancialColumns {
        FinancialColumns::detect(self.headers())
    }

    /// Trimmed description text of `row`, when the document has a description column.
    pub fn description(&self, row: usize) -> Option<String> {
        let col = self.financial_columns().get(Role::Description)?;
        self.rows().get(row)?.get(col)?.trimmed()
    }

    /// User override first, then the automatic category.
    pub fn category_of(&self, row: usize) -> Option<&str> {
        self.user_classifications
            .get(&row)
            .or_else(|| self.preprocessing.auto_classifications.get(&row))
            .map(String::as_str)
    }

    /// Records a manual category for `row` and learns an exact-match rule
    /// from its description so identical descriptions follow the override.
    pub fn reclassify(
        &mut self,
        row: usize,
        category: &str,
        owner: &str,
        rules: &RuleStore,
    ) -> error::Result<Option<ClassificationRule>> {
        let total = self.rows().len();
        if row >= total {
            return Err(Error::RowOutOfRange { row, total });
        }
        self.user_classifications.insert(row, category.to_string());
        Ok(self
            .description(row)
            .and_then(|description| rules.learn(owner, &description, category)))
    }

    pub fn summary(&self, classifier: &Classifier, owner: Option<&str>) -> Option<FinancialSummary> {
        financial::compute_financial_summary(self.headers(), self.rows(), classifier, owner)
    }

    pub fn preview_rows(&self, limit: usize) -> Vec<Vec<String>> {
        self.rows()
            .iter()
            .take(limit)
            .map(|row| row.iter().map(Cell::as_display).collect())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    detector: HeaderDetector,
    mapper: ColumnMapper,
    dates: DateNormalizer,
    numbers: NumberNormalizer,
}

impl Preprocessor {
    pub fn new(mapper: ColumnMapper, dates: DateNormalizer) -> Self {
        Self {
            mapper,
            dates,
            ..Self::default()
        }
    }

    fn probes(&self) -> Probes<'_> {
        Probes {
            dates: &self.dates,
            numbers: &self.numbers,
        }
    }

    pub fn process_file(
        &self,
        path: &Path,
        source: &SourceOptions,
        classifier: &Classifier,
        owner: Option<&str>,
    ) -> Result<NormalizedDocument> {
        let table = workbook::read_table(path, source).with_context(|| format!("Reading {path:?}"))?;
        Ok(self.process_table(table, classifier, owner))
    }

    pub fn process_table(&self, table: RawTable, classifier: &Classifier, owner: Option<&str>) -> NormalizedDocument {
        let detection = self.detector.extract_data_with_header(&table.rows);

        let mut column_mapping = BTreeMap::new();
        let headers: Vec<String> = detection
            .headers
            .iter()
            .map(|header| {
                let mapped = self.mapper.map_column(header);
                if mapped.confidence <= MAPPING_ACCEPT_CONFIDENCE {
                    return header.clone();
                }
                if &mapped.standard_name != header {
                    column_mapping.insert(
                        header.clone(),
                        MappingLogEntry {
                            mapped_to: mapped.standard_name.clone(),
                            confidence: financial::round2(mapped.confidence),
                        },
                    );
                }
                mapped.standard_name
            })
            .collect();
        let width = headers.len();

        let roles = FinancialColumns::detect(&headers);
        let typed = profile::detect_typed_columns(width, &detection.data_rows, self.probes());
        let mut date_cols: BTreeSet<usize> = typed.date.into_iter().collect();
        let mut number_cols: BTreeSet<usize> = typed.number.into_iter().collect();
        date_cols.extend(roles.get(Role::Date));
        number_cols.extend(
            [Role::Income, Role::Expense, Role::Balance]
                .into_iter()
                .filter_map(|role| roles.get(role)),
        );
        debug!("Date columns {date_cols:?}, number columns {number_cols:?}");

        let rows_before_cleanup = detection.data_rows.len();
        let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(rows_before_cleanup);
        for raw in &detection.data_rows {
            let mut row = raw.clone();
            if row.len() < width {
                row.resize(width, Cell::Empty);
            }
            for &col in &date_cols {
                if let Some(cell) = row.get_mut(col)
                    && *cell != Cell::Empty
                    && let Some(date) = self.dates.normalize(cell)
                {
                    *cell = Cell::Text(date);
                }
            }
            for &col in &number_cols {
                if let Some(cell) = row.get_mut(col)
                    && *cell != Cell::Empty
                    && let Some(number) = self.numbers.normalize(cell)
                {
                    *cell = Cell::Float(number);
                }
            }
            if row.iter().take(width).any(|cell| !cell.is_blank()) {
                rows.push(row);
            }
        }

        let sort_col = roles.get(Role::Date);
        if let Some(col) = sort_col {
            rows.sort_by_cached_key(|row| row.get(col).map(Cell::as_display).unwrap_or_default());
        }

        let balance_check = financial::balance_check(&rows, &roles);

        let mut auto_classifications = BTreeMap::new();
        if let Some(col) = roles.get(Role::Description) {
            for (idx, row) in rows.iter().enumerate() {
                let Some(description) = row.get(col).and_then(Cell::trimmed) else {
                    continue;
                };
                let category = classifier.classify(&description, owner);
                if category != UNCLASSIFIED {
                    auto_classifications.insert(idx, category);
                }
            }
        }

        let name_of = |cols: &BTreeSet<usize>| -> Vec<String> {
            cols.iter().filter_map(|&c| headers.get(c).cloned()).collect()
        };
        let preprocessing = PreprocessingInfo {
            header_row_detected: detection.header_row_index,
            meta_rows: detection.preamble_rows,
            column_mapping,
            date_columns: name_of(&date_cols),
            number_columns: name_of(&number_cols),
            financial_columns: roles.named(&headers),
            sorted_by: sort_col.and_then(|c| headers.get(c).cloned()),
            balance_check,
            auto_classifications,
            rows_before_cleanup,
            rows_after_cleanup: rows.len(),
            preprocessing_version: PREPROCESSING_VERSION,
        };
        info!(
            "Normalized {} of {} row(s) across {} column(s)",
            rows.len(),
            rows_before_cleanup,
            width
        );

        NormalizedDocument {
            total_rows: rows.len(),
            structured_data: StructuredData {
                headers,
                original_headers: detection.headers,
                rows,
                sheet_name: table.sheet_name,
            },
            preprocessing,
            user_classifications: BTreeMap::new(),
        }
    }
}

pub fn load_classifier(rules: Option<&Path>) -> Result<Classifier> {
    let store = match rules {
        Some(path) => RuleStore::load(path).with_context(|| format!("Loading rules from {path:?}"))?,
        None => RuleStore::new(),
    };
    Ok(Classifier::new(KeywordTable::default(), store))
}

pub fn execute(args: &NormalizeArgs) -> Result<()> {
    let source = crate::source_options(&args.source)?;
    let output_encoding = crate::io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    let dates = DateNormalizer::new(&args.date_format, None)
        .with_context(|| format!("Validating date format '{}'", args.date_format))?;
    let mut mapper = ColumnMapper::default();
    if let Some(path) = &args.template {
        MappingTemplate::load(path)
            .with_context(|| format!("Loading template {path:?}"))?
            .apply_aliases(&mut mapper);
    }
    let classifier = load_classifier(args.rules.as_deref())?;

    info!("Normalizing '{}'", args.input.display());
    let document = Preprocessor::new(mapper, dates).process_file(
        &args.input,
        &source,
        &classifier,
        args.owner.as_deref(),
    )?;

    if let Some(path) = &args.rules {
        classifier
            .rules()
            .save(path)
            .with_context(|| format!("Saving rules to {path:?}"))?;
    }
    if let Some(path) = &args.output {
        output::write_table(
            path,
            document.headers(),
            document.rows(),
            DelimitedOptions {
                delimiter: args.output_delimiter,
                encoding: output_encoding,
            },
        )
        .with_context(|| format!("Writing normalized table to {path:?}"))?;
    }
    if let Some(path) = &args.report {
        document
            .save(path)
            .with_context(|| format!("Writing report to {path:?}"))?;
        info!("Report written to {path:?}");
    }
    if args.preview {
        table::print_table(document.headers(), &document.preview_rows(args.limit));
    } else if args.output.is_none() && args.report.is_none() {
        println!("{}", serde_json::to_string_pretty(&document)?);
    }
    Ok(())
}
