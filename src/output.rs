//! Materializes a unified table as a styled xlsx sheet or delimited text.

use std::path::Path;

use encoding_rs::{Encoding, UTF_8};
use log::info;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook};

use crate::{
    data::Cell,
    error::Result,
    io_utils::{self, DEFAULT_CSV_DELIMITER},
};

pub const MERGED_SHEET_NAME: &str = "병합 결과";
pub const HEADER_BACKGROUND: u32 = 0x2F75B5;
pub const WIDTH_SAMPLE_ROWS: usize = 50;
pub const WIDTH_PADDING: usize = 4;
pub const MAX_COLUMN_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelimitedOptions {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
        }
    }
}

/// Writes `headers` and `rows` to `path`, picking the format from its extension.
pub fn write_table(
    path: &Path,
    headers: &[String],
    rows: &[Vec<Cell>],
    delimited: DelimitedOptions,
) -> Result<()> {
    match io_utils::extension_of(path).as_deref() {
        Some("csv" | "tsv" | "txt") => write_delimited(Some(path), headers, rows, delimited),
        _ if io_utils::is_dash(path) => write_delimited(None, headers, rows, delimited),
        _ => write_xlsx(path, headers, rows),
    }?;
    info!("Wrote {} row(s) to {path:?}", rows.len());
    Ok(())
}

pub fn write_delimited(
    path: Option<&Path>,
    headers: &[String],
    rows: &[Vec<Cell>],
    options: DelimitedOptions,
) -> Result<()> {
    let delimiter = io_utils::resolve_output_delimiter(path, options.delimiter, DEFAULT_CSV_DELIMITER);
    let mut writer = io_utils::open_csv_writer(path, delimiter, options.encoding)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row.iter().map(Cell::as_display))?;
    }
    writer.flush()?;
    Ok(())
}

/// Column widths from the header and the first sampled values, capped.
pub fn column_widths(headers: &[String], rows: &[Vec<Cell>]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            let longest = rows
                .iter()
                .take(WIDTH_SAMPLE_ROWS)
                .filter_map(|row| row.get(col))
                .map(|cell| cell.as_display().chars().count())
                .fold(header.chars().count(), usize::max);
            (longest + WIDTH_PADDING).min(MAX_COLUMN_WIDTH)
        })
        .collect()
}

pub fn write_xlsx(path: &Path, headers: &[String], rows: &[Vec<Cell>]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_BACKGROUND))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap()
        .set_border(FormatBorder::Thin);
    let cell_format = Format::new()
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet().set_name(MERGED_SHEET_NAME)?;

    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &header_format)?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        let xl_row = row_idx as u32 + 1;
        for col in 0..headers.len() {
            let xl_col = col as u16;
            match row.get(col).unwrap_or(&Cell::Empty) {
                Cell::Empty => worksheet.write_blank(xl_row, xl_col, &cell_format)?,
                Cell::Integer(i) => worksheet.write_number_with_format(xl_row, xl_col, *i as f64, &cell_format)?,
                Cell::Float(f) if f.is_finite() => {
                    worksheet.write_number_with_format(xl_row, xl_col, *f, &cell_format)?
                }
                other => worksheet.write_string_with_format(xl_row, xl_col, other.as_display(), &cell_format)?,
            };
        }
    }

    for (col, width) in column_widths(headers, rows).into_iter().enumerate() {
        worksheet.set_column_width(col as u16, width as f64)?;
    }
    if !headers.is_empty() {
        worksheet.autofilter(0, 0, 0, (headers.len() - 1) as u16)?;
    }
    worksheet.set_freeze_panes(1, 0)?;

    workbook.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_are_padded_and_capped() {
        let headers = vec!["날짜".to_string(), "x".to_string()];
        let rows = vec![vec![Cell::text("2024-01-01"), Cell::text("y".repeat(80))]];
        assert_eq!(column_widths(&headers, &rows), vec![14, MAX_COLUMN_WIDTH]);
    }

    #[test]
    fn csv_output_renders_display_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let headers = vec!["a".to_string(), "b".to_string()];
        let rows = vec![vec![Cell::Float(1500.0), Cell::Empty]];
        write_table(&path, &headers, &rows, DelimitedOptions::default()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n1500,\n");
    }

    #[test]
    fn delimited_options_compare_by_delimiter_and_encoding() {
        let tabbed = DelimitedOptions {
            delimiter: Some(b'\t'),
            ..DelimitedOptions::default()
        };
        assert_eq!(DelimitedOptions::default(), DelimitedOptions::default());
        assert_ne!(tabbed, DelimitedOptions::default());
        assert_ne!(
            DelimitedOptions {
                encoding: encoding_rs::EUC_KR,
                ..DelimitedOptions::default()
            },
            DelimitedOptions::default()
        );
    }

    #[test]
    fn xlsx_output_reads_back() {
        use calamine::{Reader, open_workbook_auto};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.xlsx");
        let headers = vec!["원본 파일".to_string(), "금액".to_string()];
        let rows = vec![vec![Cell::text("a.csv"), Cell::Float(42.0)]];
        write_table(&path, &headers, &rows, DelimitedOptions::default()).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        assert_eq!(workbook.sheet_names(), vec![MERGED_SHEET_NAME.to_string()]);
        let range = workbook.worksheet_range(MERGED_SHEET_NAME).unwrap();
        assert_eq!(range.get_size(), (2, 2));
    }
}
