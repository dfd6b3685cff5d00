//! Column type inference over sampled data rows.
//!
//! Two detectors share the normalizers as probes:
//! - [`infer_column_types`] takes a majority vote per header (merge analysis).
//! - [`detect_typed_columns`] flags columns where more than half of the
//!   sampled values are dates or numbers (single-file normalization).

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    data::Cell,
    normalize::{DateNormalizer, NumberNormalizer},
};

pub const TYPE_SAMPLE_ROWS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Number,
    Date,
    Text,
    Empty,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ColumnKind::Number => "number",
            ColumnKind::Date => "date",
            ColumnKind::Text => "text",
            ColumnKind::Empty => "empty",
        };
        f.write_str(label)
    }
}

pub type ColumnTypes = BTreeMap<String, ColumnKind>;

#[derive(Debug, Clone, Copy)]
pub struct Probes<'a> {
    pub dates: &'a DateNormalizer,
    pub numbers: &'a NumberNormalizer,
}

impl Probes<'_> {
    /// Classifies one text value, trying numbers before dates.
    fn vote(&self, cell: &Cell) -> ColumnKind {
        match cell {
            Cell::Integer(_) | Cell::Float(_) => ColumnKind::Number,
            Cell::Date(_) | Cell::DateTime(_) => ColumnKind::Date,
            Cell::Text(s) if self.numbers.normalize_str(s).is_some() => ColumnKind::Number,
            Cell::Text(s) if self.dates.parse_str(s).is_some() => ColumnKind::Date,
            _ => ColumnKind::Text,
        }
    }

    fn is_date(&self, cell: &Cell) -> bool {
        match cell {
            Cell::Date(_) | Cell::DateTime(_) => true,
            Cell::Text(s) => self.dates.parse_str(s).is_some(),
            _ => false,
        }
    }

    fn is_number(&self, cell: &Cell) -> bool {
        match cell {
            Cell::Integer(_) | Cell::Float(_) => true,
            Cell::Text(s) => self.numbers.normalize_str(s).is_some(),
            _ => false,
        }
    }
}

fn sampled_column<'r>(data_rows: &'r [Vec<Cell>], col: usize) -> impl Iterator<Item = &'r Cell> {
    data_rows
        .iter()
        .take(TYPE_SAMPLE_ROWS)
        .filter_map(move |row| row.get(col))
        .filter(|cell| !cell.is_blank())
}

/// Majority vote per header; ties prefer number, then date, then text.
pub fn infer_column_types(headers: &[String], data_rows: &[Vec<Cell>], probes: Probes<'_>) -> ColumnTypes {
    let mut types = ColumnTypes::new();
    for (col, header) in headers.iter().enumerate() {
        let mut counts = [0usize; 3];
        let mut seen = 0usize;
        for cell in sampled_column(data_rows, col) {
            seen += 1;
            match probes.vote(cell) {
                ColumnKind::Number => counts[0] += 1,
                ColumnKind::Date => counts[1] += 1,
                _ => counts[2] += 1,
            }
        }
        let kind = if seen == 0 {
            ColumnKind::Empty
        } else {
            let [number, date, text] = counts;
            if number >= date && number >= text {
                ColumnKind::Number
            } else if date >= text {
                ColumnKind::Date
            } else {
                ColumnKind::Text
            }
        };
        types.insert(header.clone(), kind);
    }
    types
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypedColumns {
    pub date: Vec<usize>,
    pub number: Vec<usize>,
}

/// Column indices whose sampled values are mostly dates or mostly numbers.
/// Dates are probed first, so a column counts towards at most one kind.
pub fn detect_typed_columns(width: usize, data_rows: &[Vec<Cell>], probes: Probes<'_>) -> TypedColumns {
    let mut typed = TypedColumns::default();
    for col in 0..width {
        let (mut dates, mut numbers, mut total) = (0usize, 0usize, 0usize);
        for cell in sampled_column(data_rows, col) {
            total += 1;
            if probes.is_date(cell) {
                dates += 1;
            } else if probes.is_number(cell) {
                numbers += 1;
            }
        }
        if total == 0 {
            continue;
        }
        if dates * 2 > total {
            typed.date.push(col);
        } else if numbers * 2 > total {
            typed.number.push(col);
        }
    }
    typed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawTable;

    fn rows(data: &[&[&str]]) -> Vec<Vec<Cell>> {
        RawTable::from_strings(data.iter().map(|r| r.iter().copied())).rows
    }

    #[test]
    fn majority_vote_per_column() {
        let dates = DateNormalizer::new("%Y-%m-%d", Some(2024)).unwrap();
        let numbers = NumberNormalizer::default();
        let probes = Probes { dates: &dates, numbers: &numbers };
        let headers = ["날짜", "적요", "금액", "비고"].map(String::from).to_vec();
        let data = rows(&[
            &["2024-01-01", "커피", "4,500", ""],
            &["2024.01.02", "택시", "12,000원", ""],
            &["n/a", "3000", "abc", ""],
        ]);
        let types = infer_column_types(&headers, &data, probes);
        assert_eq!(types["날짜"], ColumnKind::Date);
        assert_eq!(types["적요"], ColumnKind::Text);
        assert_eq!(types["금액"], ColumnKind::Number);
        assert_eq!(types["비고"], ColumnKind::Empty);
    }

    #[test]
    fn typed_columns_need_a_strict_majority() {
        let dates = DateNormalizer::new("%Y-%m-%d", Some(2024)).unwrap();
        let numbers = NumberNormalizer::default();
        let probes = Probes { dates: &dates, numbers: &numbers };
        let data = rows(&[
            &["2024-01-01", "1,000", "x"],
            &["memo", "2,000", "1"],
        ]);
        let typed = detect_typed_columns(3, &data, probes);
        assert!(typed.date.is_empty());
        assert_eq!(typed.number, vec![1]);
    }

    #[test]
    fn compact_dates_count_as_dates_when_probing_dates_first() {
        let dates = DateNormalizer::new("%Y-%m-%d", Some(2024)).unwrap();
        let numbers = NumberNormalizer::default();
        let probes = Probes { dates: &dates, numbers: &numbers };
        let data = rows(&[&["20240101"], &["20240102"]]);
        assert_eq!(detect_typed_columns(1, &data, probes).date, vec![0]);
        let types = infer_column_types(&["d".to_string()], &data, probes);
        assert_eq!(types["d"], ColumnKind::Number);
    }
}
