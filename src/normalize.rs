//! Value-level date and number normalization.
//!
//! Both normalizers are total: every input maps to `Some(canonical)` or
//! `None`, and a miss is only ever logged at debug level.

use std::{fmt::Write as _, sync::LazyLock};

use chrono::{
    Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime,
    format::{Item, StrftimeItems},
};
use log::debug;
use regex::{Captures, Regex};

use crate::{
    data::Cell,
    error::{Error, Result},
};

pub const DEFAULT_DATE_OUTPUT_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateShape {
    YmdDash,
    YmdDot,
    MonthFirst,
    YmdCompact,
    YmdKorean,
    MdKorean,
    EnglishMdy,
    EnglishDmy,
    TwoDigitYear,
}

static DATE_PATTERNS: LazyLock<Vec<(Regex, DateShape)>> = LazyLock::new(|| {
    [
        (r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})$", DateShape::YmdDash),
        (r"^(\d{4})\.(\d{1,2})\.(\d{1,2})\.?$", DateShape::YmdDot),
        (r"^(\d{1,2})[-/](\d{1,2})[-/](\d{4})$", DateShape::MonthFirst),
        (r"^(\d{4})(\d{2})(\d{2})$", DateShape::YmdCompact),
        (r"^(\d{4})년\s*(\d{1,2})월\s*(\d{1,2})일?$", DateShape::YmdKorean),
        (r"^(\d{1,2})월\s*(\d{1,2})일?$", DateShape::MdKorean),
        (r"^([A-Za-z]+)\s+(\d{1,2}),?\s*(\d{4})$", DateShape::EnglishMdy),
        (r"^(\d{1,2})\s+([A-Za-z]+)\s+(\d{4})$", DateShape::EnglishDmy),
        (r"^(\d{2})[-/.](\d{1,2})[-/.](\d{1,2})$", DateShape::TwoDigitYear),
    ]
    .into_iter()
    .map(|(pattern, shape)| {
        (
            Regex::new(pattern).expect("date pattern must compile"),
            shape,
        )
    })
    .collect()
});

const DATETIME_FALLBACKS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y.%m.%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

const DATE_FALLBACKS: &[&str] = &["%d.%m.%Y", "%m.%d.%Y"];

fn english_month(name: &str) -> Option<u32> {
    let month = match name.to_ascii_lowercase().as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

/// Checks that `format` is a usable strftime pattern.
pub fn validate_date_format(format: &str) -> Result<()> {
    if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(Error::InvalidDateFormat(format.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DateNormalizer {
    output_format: String,
    default_year: i32,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self {
            output_format: DEFAULT_DATE_OUTPUT_FORMAT.to_string(),
            default_year: Local::now().year(),
        }
    }
}

impl DateNormalizer {
    pub fn new(output_format: &str, default_year: Option<i32>) -> Result<Self> {
        validate_date_format(output_format)?;
        Ok(Self {
            output_format: output_format.to_string(),
            default_year: default_year.unwrap_or_else(|| Local::now().year()),
        })
    }

    pub fn output_format(&self) -> &str {
        &self.output_format
    }

    pub fn normalize(&self, value: &Cell) -> Option<String> {
        match value {
            Cell::Empty => None,
            Cell::Date(date) => self.render(date.and_time(NaiveTime::MIN)),
            Cell::DateTime(dt) => self.render(*dt),
            other => self.normalize_str(&other.as_display()),
        }
    }

    pub fn normalize_str(&self, raw: &str) -> Option<String> {
        self.parse_str(raw).and_then(|dt| self.render(dt))
    }

    /// Parses `raw` into a calendar date-time without rendering it.
    pub fn parse_str(&self, raw: &str) -> Option<NaiveDateTime> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        for (pattern, shape) in DATE_PATTERNS.iter() {
            if let Some(caps) = pattern.captures(value) {
                match self.build_date(&caps, *shape) {
                    Some(date) => return Some(date.and_time(NaiveTime::MIN)),
                    None => debug!("Date shape {shape:?} matched '{value}' but is not a valid date"),
                }
            }
        }
        for format in DATETIME_FALLBACKS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
                return Some(dt);
            }
        }
        for format in DATE_FALLBACKS {
            if let Ok(date) = NaiveDate::parse_from_str(value, format) {
                return Some(date.and_time(NaiveTime::MIN));
            }
        }
        debug!("Unparseable date value '{value}'");
        None
    }

    fn build_date(&self, caps: &Captures<'_>, shape: DateShape) -> Option<NaiveDate> {
        let int = |idx: usize| caps.get(idx).and_then(|m| m.as_str().parse::<i32>().ok());
        let uint = |idx: usize| caps.get(idx).and_then(|m| m.as_str().parse::<u32>().ok());
        match shape {
            DateShape::YmdDash | DateShape::YmdDot | DateShape::YmdCompact | DateShape::YmdKorean => {
                NaiveDate::from_ymd_opt(int(1)?, uint(2)?, uint(3)?)
            }
            DateShape::MonthFirst => {
                let (first, second, year) = (uint(1)?, uint(2)?, int(3)?);
                if first > 12 {
                    NaiveDate::from_ymd_opt(year, second, first)
                } else {
                    NaiveDate::from_ymd_opt(year, first, second)
                }
            }
            DateShape::MdKorean => NaiveDate::from_ymd_opt(self.default_year, uint(1)?, uint(2)?),
            DateShape::EnglishMdy => {
                let month = english_month(caps.get(1)?.as_str())?;
                NaiveDate::from_ymd_opt(int(3)?, month, uint(2)?)
            }
            DateShape::EnglishDmy => {
                let month = english_month(caps.get(2)?.as_str())?;
                NaiveDate::from_ymd_opt(int(3)?, month, uint(1)?)
            }
            DateShape::TwoDigitYear => NaiveDate::from_ymd_opt(int(1)? + 2000, uint(2)?, uint(3)?),
        }
    }

    fn render(&self, dt: NaiveDateTime) -> Option<String> {
        let mut out = String::new();
        write!(out, "{}", dt.format(&self.output_format)).ok()?;
        Some(out)
    }
}

const KOREAN_UNITS: &[(&str, f64)] = &[
    ("십만원", 1e5),
    ("백만원", 1e6),
    ("천만원", 1e7),
    ("천원", 1e3),
    ("만원", 1e4),
    ("십만", 1e5),
    ("백만", 1e6),
    ("천만", 1e7),
    ("억원", 1e8),
    ("조원", 1e12),
    ("원", 1.0),
    ("천", 1e3),
    ("만", 1e4),
    ("억", 1e8),
    ("조", 1e12),
];

const NULL_SENTINELS: &[&str] = &["-", "N/A", "n/a"];

static CURRENCY_SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[¥$€£₩]\s*").expect("currency symbol pattern must compile"));
static CURRENCY_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(USD|KRW|JPY|EUR|GBP)\s*").expect("currency code pattern must compile")
});

#[derive(Debug, Clone, Copy)]
pub struct NumberNormalizer {
    pub strip_currency: bool,
    /// Converts `10%` into `0.1` when set.
    pub strip_percent: bool,
}

impl Default for NumberNormalizer {
    fn default() -> Self {
        Self {
            strip_currency: true,
            strip_percent: false,
        }
    }
}

impl NumberNormalizer {
    pub fn new(strip_currency: bool, strip_percent: bool) -> Self {
        Self {
            strip_currency,
            strip_percent,
        }
    }

    pub fn normalize(&self, value: &Cell) -> Option<f64> {
        match value {
            Cell::Integer(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => self.normalize_str(s),
            Cell::Empty | Cell::Date(_) | Cell::DateTime(_) => None,
        }
    }

    pub fn normalize_str(&self, raw: &str) -> Option<f64> {
        let mut value = raw.trim();
        if value.is_empty() || NULL_SENTINELS.contains(&value) {
            return None;
        }

        let mut negative = false;
        if let Some(inner) = value.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
            negative = true;
            value = inner.trim();
        } else if let Some(rest) = value
            .strip_prefix('-')
            .or_else(|| value.strip_prefix('△'))
            .or_else(|| value.strip_prefix('▲'))
        {
            negative = true;
            value = rest.trim();
        }

        let mut percent = false;
        if let Some(rest) = value.strip_suffix('%') {
            percent = true;
            value = rest.trim();
        }

        if self.strip_currency {
            value = strip_match(&CURRENCY_SYMBOL, value);
            value = strip_match(&CURRENCY_CODE, value);
        }

        let mut multiplier = 1.0;
        if let Some((rest, factor)) = KOREAN_UNITS
            .iter()
            .find_map(|(unit, factor)| value.strip_suffix(unit).map(|rest| (rest, *factor)))
        {
            multiplier = factor;
            value = rest.trim();
        }

        let cleaned: String = value
            .chars()
            .filter(|c| *c != ' ' && *c != ',')
            .map(fold_full_width)
            .collect();

        let parsed = match cleaned.parse::<f64>() {
            Ok(number) if number.is_finite() => number,
            _ => {
                debug!("Unparseable number value '{raw}'");
                return None;
            }
        };

        let mut result = parsed * multiplier;
        if negative {
            result = -result;
        }
        if percent && self.strip_percent {
            result /= 100.0;
        }
        Some(result)
    }

    /// Renders a normalized number for display; `None` renders as an empty string.
    pub fn format_output(&self, value: Option<f64>, decimal_places: usize, use_comma: bool) -> String {
        format_number(value, decimal_places, use_comma)
    }
}

fn strip_match<'a>(pattern: &Regex, value: &'a str) -> &'a str {
    match pattern.find(value) {
        Some(m) => &value[m.end()..],
        None => value,
    }
}

fn fold_full_width(c: char) -> char {
    match c {
        '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
        '．' => '.',
        other => other,
    }
}

pub fn format_number(value: Option<f64>, decimal_places: usize, use_comma: bool) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let formatted = if decimal_places == 0 {
        format!("{}", value.round_ties_even() as i64)
    } else {
        format!("{value:.decimal_places$}")
    };
    if use_comma {
        group_thousands(&formatted)
    } else {
        formatted
    }
}

fn group_thousands(formatted: &str) -> String {
    let (sign, unsigned) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac)) => (int_part, Some(frac)),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(formatted.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}
