//! Header-row detection for sheets with title and annotation rows above the
//! real column labels.
//!
//! Each candidate row within the scan window is scored by [`score_row`]; the
//! highest score wins and ties keep the earliest row.

use std::{collections::HashSet, sync::LazyLock};

use log::{debug, info};
use regex::Regex;
use serde::Serialize;

use crate::data::Cell;

pub const DEFAULT_MAX_SCAN_ROWS: usize = 20;
pub const DEFAULT_MIN_COLUMNS: usize = 2;

pub const TEXT_RATIO_WEIGHT: f64 = 30.0;
pub const NON_HEADER_PENALTY: f64 = 50.0;
pub const FILL_RATIO_WEIGHT: f64 = 20.0;
pub const NEXT_ROW_NUMERIC_WEIGHT: f64 = 20.0;
pub const SHORT_LABEL_BONUS: f64 = 10.0;
pub const LONG_LABEL_PENALTY: f64 = 10.0;
pub const UNIQUE_RATIO_WEIGHT: f64 = 10.0;

/// A candidate must score above this to replace row 0.
pub const SCORE_FLOOR: f64 = -1.0;

const SHORT_LABEL_MAX_LEN: f64 = 20.0;
const LONG_LABEL_MIN_LEN: f64 = 50.0;

/// First-cell shapes of title, period, unit and company-name lines.
static NON_HEADER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\d{4}년",
        r"^제?\d+기",
        r"작성[일자]",
        r"기간\s*:",
        r"단위\s*:",
        r"^\(단위",
        r"^[가-힣]+\s*(주식)?회사",
        r"^\(주\)\s*",
        r"^\s*$",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("non-header pattern must compile"))
    .collect()
});

static NUMERIC_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d,.-]+$").expect("numeric text pattern must compile"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderDetection {
    pub header_row_index: usize,
    pub headers: Vec<String>,
    /// Rows above the header, rendered as strings.
    pub preamble_rows: Vec<Vec<String>>,
    #[serde(skip)]
    pub data_rows: Vec<Vec<Cell>>,
}

impl HeaderDetection {
    pub fn total_data_rows(&self) -> usize {
        self.data_rows.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeaderDetector {
    pub min_columns: usize,
    pub max_scan_rows: usize,
}

impl Default for HeaderDetector {
    fn default() -> Self {
        Self {
            min_columns: DEFAULT_MIN_COLUMNS,
            max_scan_rows: DEFAULT_MAX_SCAN_ROWS,
        }
    }
}

impl HeaderDetector {
    pub fn new(min_columns: usize, max_scan_rows: usize) -> Self {
        Self {
            min_columns,
            max_scan_rows,
        }
    }

    /// Returns the header row index and its labels; an empty table yields `(0, [])`.
    /// Row 0 is kept when no candidate scores above [`SCORE_FLOOR`].
    pub fn detect(&self, rows: &[Vec<Cell>]) -> (usize, Vec<String>) {
        if rows.is_empty() {
            return (0, Vec::new());
        }

        let mut best = (0, SCORE_FLOOR);
        for (idx, row) in rows.iter().enumerate().take(self.max_scan_rows) {
            let filled = row.iter().filter(|cell| !cell.is_blank()).count();
            if row.is_empty() || filled < self.min_columns {
                continue;
            }
            let score = score_row(row, rows.get(idx + 1).map(Vec::as_slice));
            debug!("Header candidate row {idx} scored {score:.2}");
            if score > best.1 {
                best = (idx, score);
            }
        }

        let index = best.0;
        let headers = header_labels(&rows[index]);
        info!("Detected header row {index}: {headers:?}");
        (index, headers)
    }

    pub fn extract_data_with_header(&self, rows: &[Vec<Cell>]) -> HeaderDetection {
        let (header_row_index, headers) = self.detect(rows);
        let split = (header_row_index + 1).min(rows.len());
        let preamble_rows = rows[..header_row_index.min(rows.len())]
            .iter()
            .map(|row| row.iter().map(Cell::as_display).collect())
            .collect();
        HeaderDetection {
            header_row_index,
            headers,
            preamble_rows,
            data_rows: rows[split..].to_vec(),
        }
    }
}

/// Header likelihood of `row`, given the row that follows it.
pub fn score_row(row: &[Cell], next_row: Option<&[Cell]>) -> f64 {
    let filled: Vec<&Cell> = row.iter().filter(|cell| !cell.is_blank()).collect();
    if filled.is_empty() {
        return -1.0;
    }
    let filled_count = filled.len() as f64;
    let mut score = 0.0;

    let text_count = filled.iter().filter(|cell| cell.is_text()).count() as f64;
    score += text_count / filled_count * TEXT_RATIO_WEIGHT;

    let first = row.first().and_then(Cell::trimmed).unwrap_or_default();
    if NON_HEADER_PATTERNS.iter().any(|p| p.is_match(&first)) {
        score -= NON_HEADER_PENALTY;
    }

    score += filled_count / row.len() as f64 * FILL_RATIO_WEIGHT;

    if let Some(next) = next_row {
        let present: Vec<&Cell> = next.iter().filter(|c| **c != Cell::Empty).collect();
        if !present.is_empty() {
            let numeric = present.iter().filter(|c| looks_numeric(c)).count() as f64;
            score += numeric / present.len() as f64 * NEXT_ROW_NUMERIC_WEIGHT;
        }
    }

    let total_len: usize = filled.iter().map(|c| c.as_display().chars().count()).sum();
    let avg_len = total_len as f64 / filled_count;
    if avg_len < SHORT_LABEL_MAX_LEN {
        score += SHORT_LABEL_BONUS;
    } else if avg_len > LONG_LABEL_MIN_LEN {
        score -= LONG_LABEL_PENALTY;
    }

    let distinct: HashSet<String> = filled.iter().map(|c| c.as_display()).collect();
    score += distinct.len() as f64 / filled_count * UNIQUE_RATIO_WEIGHT;

    score
}

fn looks_numeric(cell: &Cell) -> bool {
    match cell {
        Cell::Integer(_) | Cell::Float(_) => true,
        Cell::Text(s) => NUMERIC_TEXT.is_match(s.trim()),
        _ => false,
    }
}

fn header_labels(row: &[Cell]) -> Vec<String> {
    row.iter()
        .enumerate()
        .map(|(i, cell)| cell.trimmed().unwrap_or_else(|| format!("column_{i}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawTable;

    fn table(rows: &[&[&str]]) -> Vec<Vec<Cell>> {
        RawTable::from_strings(rows.iter().map(|r| r.iter().copied())).rows
    }

    #[test]
    fn skips_title_rows_above_header() {
        let rows = table(&[
            &[],
            &["2024년 매출현황"],
            &["날짜", "적요", "입금", "출금"],
            &["2024-01-01", "급여", "0", "3000000"],
        ]);
        let (index, headers) = HeaderDetector::default().detect(&rows);
        assert_eq!(index, 2);
        assert_eq!(headers, vec!["날짜", "적요", "입금", "출금"]);
    }

    #[test]
    fn empty_table_yields_no_headers() {
        assert_eq!(HeaderDetector::default().detect(&[]), (0, Vec::new()));
    }

    #[test]
    fn falls_back_to_first_row_with_synthetic_labels() {
        let rows = table(&[&["only"], &["", "x"]]);
        let (index, headers) = HeaderDetector::default().detect(&rows);
        assert_eq!(index, 0);
        assert_eq!(headers, vec!["only"]);

        let rows = vec![vec![Cell::Empty, Cell::text("a")], vec![Cell::text("b")]];
        let (_, headers) = HeaderDetector::new(3, 20).detect(&rows);
        assert_eq!(headers, vec!["column_0", "a"]);
    }

    #[test]
    fn annotation_first_cell_is_penalized() {
        let plain = table(&[&["날짜", "금액"]]);
        let annotated = table(&[&["(단위: 원)", "금액"]]);
        let delta = score_row(&plain[0], None) - score_row(&annotated[0], None);
        assert!((delta - NON_HEADER_PENALTY).abs() < 1e-9);
    }

    #[test]
    fn candidates_at_or_below_floor_keep_row_zero() {
        let rows = vec![
            vec![Cell::text("memo")],
            vec![
                Cell::text("2024년"),
                Cell::Integer(1),
                Cell::Integer(2),
                Cell::Integer(3),
            ],
        ];
        assert!(score_row(&rows[1], None) <= SCORE_FLOOR);
        let (index, headers) = HeaderDetector::default().detect(&rows);
        assert_eq!(index, 0);
        assert_eq!(headers, vec!["memo"]);
    }

    #[test]
    fn ties_keep_earliest_row() {
        let rows = table(&[&["a", "b"], &["c", "d"], &["e", "f"]]);
        let (index, _) = HeaderDetector::default().detect(&rows);
        assert_eq!(index, 0);
    }

    #[test]
    fn extraction_splits_preamble_and_data() {
        let rows = table(&[
            &["주식회사 테스트", ""],
            &["일자", "내용", "금액"],
            &["2024-01-01", "커피", "4,500"],
            &["2024-01-02", "택시", "12,000"],
        ]);
        let result = HeaderDetector::default().extract_data_with_header(&rows);
        assert_eq!(result.header_row_index, 1);
        assert_eq!(result.preamble_rows, vec![vec!["주식회사 테스트".to_string(), String::new()]]);
        assert_eq!(result.total_data_rows(), 2);
    }
}
