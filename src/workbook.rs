//! Loads one sheet of a spreadsheet-like file into a [`RawTable`].
//!
//! Delimited text (`.csv`, `.tsv`, `.txt`, or `-` for stdin) goes through the
//! `csv` reader with ragged rows allowed. Everything else is opened with
//! `calamine`, which covers xlsx, xlsm, xlsb, xls and ods.

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{
    data::{Cell, RawTable},
    error::{Error, Result},
    io_utils,
};

#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
    /// Sheet to read from a workbook; the first sheet when unset.
    pub sheet: Option<String>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
            sheet: None,
        }
    }
}

pub fn is_delimited(path: &Path) -> bool {
    io_utils::is_dash(path)
        || matches!(
            io_utils::extension_of(path).as_deref(),
            Some("csv" | "tsv" | "txt")
        )
}

pub fn read_table(path: &Path, options: &SourceOptions) -> Result<RawTable> {
    if is_delimited(path) {
        read_delimited(path, options)
    } else {
        read_workbook(path, options.sheet.as_deref())
    }
}

fn read_delimited(path: &Path, options: &SourceOptions) -> Result<RawTable> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        let fields = io_utils::decode_record(&record, options.encoding, rows.is_empty()).ok_or_else(|| {
            Error::Decode {
                path: path.to_path_buf(),
                encoding: options.encoding.name().to_string(),
            }
        })?;
        rows.push(fields.into_iter().map(Cell::from).collect());
    }
    let sheet_name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("stdin")
        .to_string();
    debug!("Read {} delimited row(s) from {path:?}", rows.len());
    Ok(RawTable::new(sheet_name, rows))
}

fn read_workbook(path: &Path, sheet: Option<&str>) -> Result<RawTable> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = match sheet {
        Some(name) => sheet_names
            .iter()
            .find(|candidate| candidate.as_str() == name)
            .cloned()
            .ok_or_else(|| Error::SheetNotFound {
                path: path.to_path_buf(),
                sheet: name.to_string(),
            })?,
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| Error::EmptyWorkbook(path.to_path_buf()))?,
    };
    let range = workbook.worksheet_range(&sheet_name)?;

    // Pad with the leading empty rows and columns calamine trims so row
    // indices match what the user sees in the sheet.
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); start_row as usize];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; start_col as usize];
        cells.extend(row.iter().map(convert_cell));
        while cells.last() == Some(&Cell::Empty) {
            cells.pop();
        }
        rows.push(cells);
    }
    debug!(
        "Read {} row(s) from sheet '{sheet_name}' of {path:?}",
        rows.len()
    );
    Ok(RawTable::new(sheet_name, rows))
}

fn convert_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) if s.is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(n) => Cell::Integer(*n),
        Data::Float(n) => Cell::Float(*n),
        Data::Bool(b) => Cell::text(if *b { "TRUE" } else { "FALSE" }),
        Data::Error(e) => Cell::Text(format!("#{e:?}")),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if value.time() == chrono::NaiveTime::MIN => Cell::Date(value.date()),
            Some(value) => Cell::DateTime(value),
            None => Cell::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn csv_rows_keep_preamble_and_ragged_widths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.csv");
        fs::write(&path, "\u{feff}거래내역 조회\n날짜,적요,입금\n2024-01-01,급여,\"3,000\"\n").unwrap();
        let table = read_table(&path, &SourceOptions::default()).unwrap();
        assert_eq!(table.sheet_name, "bank");
        assert_eq!(table.rows[0], vec![Cell::text("거래내역 조회")]);
        assert_eq!(table.rows[1].len(), 3);
        assert_eq!(table.rows[2][2], Cell::text("3,000"));
    }

    #[test]
    fn legacy_encodings_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        let (bytes, _, _) = encoding_rs::EUC_KR.encode("날짜,금액\n2024-01-01,100\n");
        fs::write(&path, bytes).unwrap();
        let options = SourceOptions {
            encoding: encoding_rs::EUC_KR,
            ..SourceOptions::default()
        };
        let table = read_table(&path, &options).unwrap();
        assert_eq!(table.rows[0][0], Cell::text("날짜"));
    }

    #[test]
    fn corrupt_workbook_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        fs::write(&path, b"definitely not a zip archive").unwrap();
        assert!(read_table(&path, &SourceOptions::default()).is_err());
    }
}
