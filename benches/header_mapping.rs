use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use ledger_merge::columns::ColumnMapper;
use ledger_merge::data::RawTable;
use ledger_merge::header::HeaderDetector;
use ledger_merge::merge::{MergeOptions, MergeService, OutputTarget};
use tempfile::TempDir;

const HEADER_VARIANTS: &[&str] = &[
    "거래일자,적요,입금,출금,잔액",
    "날짜,거래내용,입금액,출금액,잔고",
    "date,description,credit,debit,balance",
];

fn statement_rows(rows: usize) -> RawTable {
    let mut table = vec![
        vec!["2024년 거래내역".to_string()],
        vec!["계좌번호: 123-456".to_string(), String::new()],
        HEADER_VARIANTS[0].split(',').map(str::to_string).collect(),
    ];
    for i in 0..rows {
        table.push(vec![
            format!("2024-{:02}-{:02}", i % 12 + 1, i % 28 + 1),
            format!("가맹점 {}", i % 50),
            String::new(),
            format!("{}", (i % 97) * 1000),
            format!("{}", 1_000_000 - i),
        ]);
    }
    RawTable::from_strings(table)
}

fn write_statements(files: usize, rows: usize) -> (TempDir, Vec<PathBuf>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = (0..files)
        .map(|n| {
            let path = dir.path().join(format!("statement_{n}.csv"));
            let mut file = File::create(&path).expect("create csv");
            writeln!(file, "{}", HEADER_VARIANTS[n % HEADER_VARIANTS.len()]).expect("header");
            for i in 0..rows {
                writeln!(
                    file,
                    "2024-{:02}-{:02},가맹점 {},,\"{}\",{}",
                    i % 12 + 1,
                    i % 28 + 1,
                    (i + n) % 50,
                    (i % 97) * 1000,
                    1_000_000 - i
                )
                .expect("row");
            }
            path
        })
        .collect();
    (dir, paths)
}

fn bench_header_detection(c: &mut Criterion) {
    let table = statement_rows(500);
    let detector = HeaderDetector::default();
    c.bench_function("detect_header_500_rows", |b| {
        b.iter(|| detector.detect(&table.rows))
    });
}

fn bench_column_mapping(c: &mut Criterion) {
    let mapper = ColumnMapper::default();
    let headers: Vec<Vec<String>> = HEADER_VARIANTS
        .iter()
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect();
    c.bench_function("map_headers", |b| {
        b.iter(|| {
            for list in &headers {
                mapper.map_headers(list);
            }
        })
    });
    c.bench_function("suggest_mappings", |b| b.iter(|| mapper.suggest_mappings(&headers)));
}

fn bench_merge(c: &mut Criterion) {
    let (_dir, paths) = write_statements(3, 1_000);
    let service = MergeService::default();
    c.bench_function("merge_three_statements", |b| {
        b.iter_batched(
            || MergeOptions {
                auto_detect_types: true,
                output: OutputTarget::Skip,
                ..MergeOptions::default()
            },
            |options| service.merge_files(&paths, &options),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_header_detection, bench_column_mapping, bench_merge);
criterion_main!(benches);
