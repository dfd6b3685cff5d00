use chrono::NaiveDate;
use ledger_merge::data::Cell;
use ledger_merge::normalize::{
    DEFAULT_DATE_OUTPUT_FORMAT, DateNormalizer, NumberNormalizer, format_number,
};
use proptest::prelude::*;

fn dates() -> DateNormalizer {
    DateNormalizer::new(DEFAULT_DATE_OUTPUT_FORMAT, Some(2024)).expect("default format is valid")
}

fn grouped(value: u64) -> String {
    format_number(Some(value as f64), 0, true)
}

proptest! {
    #[test]
    fn iso_dates_round_trip(year in 1950i32..2090, month in 1u32..=12, day in 1u32..=28) {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
        let normalizer = dates();
        for input in [
            date.format("%Y-%m-%d").to_string(),
            date.format("%Y.%m.%d").to_string(),
            date.format("%Y/%-m/%-d").to_string(),
            date.format("%Y%m%d").to_string(),
        ] {
            let rendered = normalizer.normalize_str(&input).unwrap();
            let reparsed = NaiveDate::parse_from_str(&rendered, DEFAULT_DATE_OUTPUT_FORMAT).unwrap();
            prop_assert_eq!(reparsed, date, "input {}", input);
        }
    }

    #[test]
    fn korean_dates_match_iso(year in 1950i32..2090, month in 1u32..=12, day in 1u32..=28) {
        let normalizer = dates();
        let korean = format!("{year}년 {month}월 {day}일");
        let iso = format!("{year:04}-{month:02}-{day:02}");
        prop_assert_eq!(normalizer.normalize_str(&korean), normalizer.normalize_str(&iso));
    }

    #[test]
    fn negative_markers_flip_sign(value in 1u64..10_000_000_000) {
        let numbers = NumberNormalizer::default();
        let text = grouped(value);
        let expected = -(value as f64);
        prop_assert_eq!(numbers.normalize_str(&format!("({text})")), Some(expected));
        prop_assert_eq!(numbers.normalize_str(&format!("-{text}")), Some(expected));
        prop_assert_eq!(numbers.normalize_str(&format!("△{text}")), Some(expected));
        prop_assert_eq!(numbers.normalize_str(&text), Some(value as f64));
    }

    #[test]
    fn magnitude_units_multiply(value in 1u64..1_000_000) {
        let numbers = NumberNormalizer::default();
        let text = grouped(value);
        prop_assert_eq!(numbers.normalize_str(&format!("{text}천원")), Some(value as f64 * 1e3));
        prop_assert_eq!(numbers.normalize_str(&format!("{text}만원")), Some(value as f64 * 1e4));
        prop_assert_eq!(numbers.normalize_str(&format!("{text}억")), Some(value as f64 * 1e8));
        prop_assert_eq!(numbers.normalize_str(&format!("{text}원")), Some(value as f64));
    }

    #[test]
    fn arbitrary_text_never_panics(raw in "\\PC{0,24}") {
        let _ = dates().normalize_str(&raw);
        let _ = NumberNormalizer::new(true, true).normalize_str(&raw);
    }
}

#[test]
fn documented_number_examples() {
    let numbers = NumberNormalizer::default();
    assert_eq!(numbers.normalize_str("1,000천원"), Some(1_000_000.0));
    assert_eq!(numbers.normalize_str("(1,000)"), Some(-1000.0));
    assert_eq!(NumberNormalizer::new(true, true).normalize_str("10%"), Some(0.1));
}

#[test]
fn parse_misses_surface_as_none() {
    let numbers = NumberNormalizer::default();
    assert_eq!(numbers.normalize(&Cell::text("합계")), None);
    assert_eq!(numbers.normalize(&Cell::Empty), None);
    assert_eq!(dates().normalize(&Cell::text("2024-02-30")), None);
    assert_eq!(dates().normalize(&Cell::text("적요")), None);
}

#[test]
fn custom_output_format_applies_to_every_shape() {
    let normalizer = DateNormalizer::new("%Y/%m/%d", Some(2024)).unwrap();
    assert_eq!(normalizer.normalize_str("2024-03-07").as_deref(), Some("2024/03/07"));
    assert_eq!(normalizer.normalize_str("3월 7일").as_deref(), Some("2024/03/07"));
    assert!(DateNormalizer::new("%Q", None).is_err());
}
