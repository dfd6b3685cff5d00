use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    classify::{MatchType, RuleSource},
    header::{DEFAULT_MAX_SCAN_ROWS, DEFAULT_MIN_COLUMNS},
    normalize::DEFAULT_DATE_OUTPUT_FORMAT,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Normalize and merge messy financial spreadsheets",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Locate the header row of a spreadsheet and report the preamble above it
    Detect(DetectArgs),
    /// Normalize one spreadsheet: canonical headers, dates, amounts and categories
    Normalize(NormalizeArgs),
    /// Income/expense totals and category breakdown for one spreadsheet
    Summary(SummaryArgs),
    /// Analyze several spreadsheets ahead of a merge and suggest column mappings
    Analyze(AnalyzeArgs),
    /// Merge several spreadsheets into one unified table
    Merge(MergeArgs),
    /// Classify transaction descriptions using keywords and learned rules
    Classify(ClassifyArgs),
    /// Teach the classifier a category for a description or a document row
    Learn(LearnArgs),
    /// Inspect and edit the classification rule book
    Rules(RulesArgs),
    /// Manage a persisted merge project
    Project(ProjectArgs),
}

/// Options controlling how input spreadsheets are read.
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of delimited input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Worksheet to read from workbook inputs (defaults to the first sheet)
    #[arg(long)]
    pub sheet: Option<String>,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Input spreadsheet (.xlsx, .xls, .ods, .csv, .tsv or '-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of leading rows considered as header candidates
    #[arg(long = "max-scan-rows", default_value_t = DEFAULT_MAX_SCAN_ROWS)]
    pub max_scan_rows: usize,
    /// Minimum number of filled cells for a row to be a header candidate
    #[arg(long = "min-columns", default_value_t = DEFAULT_MIN_COLUMNS)]
    pub min_columns: usize,
    /// Print the detection result as JSON instead of a table
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Input spreadsheet
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Normalized table destination (.xlsx, .csv, .tsv or '-' for stdout)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Write the normalized document with its metadata as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// strftime pattern for normalized dates
    #[arg(long = "date-format", default_value = DEFAULT_DATE_OUTPUT_FORMAT)]
    pub date_format: String,
    /// Mapping template whose custom aliases extend the column mapper
    #[arg(long)]
    pub template: Option<PathBuf>,
    /// YAML rule book used (and updated) by auto-classification
    #[arg(long)]
    pub rules: Option<PathBuf>,
    /// Owner whose learned rules take precedence over the keyword table
    #[arg(long)]
    pub owner: Option<String>,
    /// Render the first rows as a table instead of emitting JSON
    #[arg(long)]
    pub preview: bool,
    /// Rows shown by --preview
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
    /// Delimiter for delimited output (defaults by extension)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding for delimited output (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Input spreadsheet
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML rule book consulted for categories
    #[arg(long)]
    pub rules: Option<PathBuf>,
    /// Owner whose learned rules apply
    #[arg(long)]
    pub owner: Option<String>,
    /// Print the summary as JSON instead of tables
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Input spreadsheets
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Write the analysis as JSON to this path (stdout when omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Mapping template whose custom aliases extend the column mapper
    #[arg(long)]
    pub template: Option<PathBuf>,
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Input spreadsheets, merged in the order given
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Merged output (.xlsx, .csv, .tsv); defaults to merged_<timestamp>.xlsx next to the first input
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Compute the merge without writing an output file
    #[arg(long = "no-output", conflicts_with = "output")]
    pub no_output: bool,
    /// Explicit header override as `raw=canonical`
    #[arg(long = "map", action = clap::ArgAction::Append)]
    pub mappings: Vec<String>,
    /// Columns to normalize as dates
    #[arg(long = "date-columns", value_delimiter = ',')]
    pub date_columns: Vec<String>,
    /// Columns to normalize as numbers
    #[arg(long = "number-columns", value_delimiter = ',')]
    pub number_columns: Vec<String>,
    /// Detect date and number columns when none are declared
    #[arg(long = "auto-detect")]
    pub auto_detect: bool,
    /// Column to sort merged rows by
    #[arg(long = "sort-by")]
    pub sort_by: Option<String>,
    /// Omit the source-file column
    #[arg(long = "no-source-column")]
    pub no_source_column: bool,
    /// strftime pattern for normalized dates
    #[arg(long = "date-format", default_value = DEFAULT_DATE_OUTPUT_FORMAT)]
    pub date_format: String,
    /// Mapping template applied before explicit flags
    #[arg(long)]
    pub template: Option<PathBuf>,
    /// Write the merge result (logs, duplicates) as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Delimiter for delimited output (defaults by extension)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding for delimited output (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Descriptions to classify
    #[arg(required = true)]
    pub descriptions: Vec<String>,
    /// YAML rule book; hit counts are written back
    #[arg(long)]
    pub rules: Option<PathBuf>,
    /// Owner whose rules apply
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Debug, Args)]
pub struct LearnArgs {
    /// Category to assign
    #[arg(short, long)]
    pub category: String,
    /// Description to learn directly
    #[arg(short, long, required_unless_present = "document")]
    pub description: Option<String>,
    /// Normalized document (from `normalize --report`) holding the row to reclassify
    #[arg(long, requires = "row")]
    pub document: Option<PathBuf>,
    /// Zero-based row index within the document
    #[arg(long, requires = "document")]
    pub row: Option<usize>,
    /// YAML rule book to update
    #[arg(long)]
    pub rules: PathBuf,
    /// Owner the rule belongs to
    #[arg(long)]
    pub owner: String,
}

#[derive(Debug, Args)]
pub struct RulesArgs {
    /// YAML rule book
    #[arg(long)]
    pub rules: PathBuf,
    /// Owner whose rules are shown or edited
    #[arg(long)]
    pub owner: String,
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// List rules in precedence order
    List,
    /// Create or update a rule keyed by pattern and match type
    Add(RuleAddArgs),
    /// Deactivate a rule by id
    Deactivate {
        /// Rule id as shown by `rules list`
        id: u64,
    },
}

#[derive(Debug, Args)]
pub struct RuleAddArgs {
    /// Pattern matched against descriptions
    #[arg(short, long)]
    pub pattern: String,
    /// Category assigned on match
    #[arg(short, long)]
    pub category: String,
    #[arg(long = "match", value_enum, default_value_t = RuleMatch::Contains)]
    pub match_type: RuleMatch,
    #[arg(long, value_enum, default_value_t = RuleOrigin::User)]
    pub source: RuleOrigin,
    /// Explicit priority (lower wins); defaults by source
    #[arg(long)]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum RuleMatch {
    Exact,
    Contains,
    Vendor,
}

impl From<RuleMatch> for MatchType {
    fn from(value: RuleMatch) -> Self {
        match value {
            RuleMatch::Exact => MatchType::Exact,
            RuleMatch::Contains => MatchType::Contains,
            RuleMatch::Vendor => MatchType::Vendor,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum RuleOrigin {
    User,
    Vendor,
    Auto,
}

impl From<RuleOrigin> for RuleSource {
    fn from(value: RuleOrigin) -> Self {
        match value {
            RuleOrigin::User => RuleSource::User,
            RuleOrigin::Vendor => RuleSource::Vendor,
            RuleOrigin::Auto => RuleSource::Auto,
        }
    }
}

#[derive(Debug, Args)]
pub struct ProjectArgs {
    /// Project file (JSON)
    #[arg(short, long)]
    pub project: PathBuf,
    #[command(subcommand)]
    pub command: ProjectCommand,
}

#[derive(Debug, Subcommand)]
pub enum ProjectCommand {
    /// Create a new project file
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Add input files (returns the project to draft)
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Analyze the project's files and store mapping suggestions
    Analyze {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Update the mapping configuration (marks the project ready)
    Map(ProjectMapArgs),
    /// Execute the merge
    Execute {
        /// Merged output; defaults to merged_<timestamp>.xlsx next to the first file
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Show the project's state and files
    Status {
        /// Print the whole project as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
pub struct ProjectMapArgs {
    /// Explicit header override as `raw=canonical`; replaces the stored mapping
    #[arg(long = "map", action = clap::ArgAction::Append)]
    pub mappings: Vec<String>,
    #[arg(long = "date-columns", value_delimiter = ',')]
    pub date_columns: Option<Vec<String>>,
    #[arg(long = "number-columns", value_delimiter = ',')]
    pub number_columns: Option<Vec<String>>,
    #[arg(long = "date-format")]
    pub date_format: Option<String>,
    /// Apply a mapping template
    #[arg(long)]
    pub template: Option<PathBuf>,
    /// Save the resulting mapping as a template
    #[arg(long = "save-template")]
    pub save_template: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

/// Parses `raw=canonical` override pairs.
pub fn parse_mapping(value: &str) -> Result<(String, String), String> {
    let (raw, canonical) = value
        .split_once('=')
        .ok_or_else(|| format!("Mapping '{value}' must look like raw=canonical"))?;
    let (raw, canonical) = (raw.trim(), canonical.trim());
    if raw.is_empty() || canonical.is_empty() {
        return Err(format!("Mapping '{value}' has an empty side"));
    }
    Ok((raw.to_string(), canonical.to_string()))
}
