//! Error types surfaced at the library boundary.
//!
//! Value-level parse misses never reach this type: the normalizers return
//! `None` instead. File-level problems are caught per file by the merge and
//! analysis loops and rendered into their logs, so the variants here mostly
//! describe configuration mistakes and project-level failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::project::ProjectStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet read error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Spreadsheet write error: {0}")]
    SpreadsheetWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid date output pattern '{0}'")]
    InvalidDateFormat(String),

    #[error("Unknown encoding '{0}'")]
    UnknownEncoding(String),

    #[error("Failed to decode {path:?} with encoding {encoding}")]
    Decode { path: PathBuf, encoding: String },

    #[error("Workbook {0:?} contains no sheets")]
    EmptyWorkbook(PathBuf),

    #[error("Sheet '{sheet}' not found in {path:?}")]
    SheetNotFound { path: PathBuf, sheet: String },

    #[error("Cannot {action} while project is {status}")]
    InvalidState {
        action: &'static str,
        status: ProjectStatus,
    },

    #[error("No input files were provided")]
    NoInputFiles,

    #[error("Row {row} is out of range ({total} row(s))")]
    RowOutOfRange { row: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
