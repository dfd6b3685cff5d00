//! Financial column roles, balance verification and roll-up summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{classify::Classifier, data::Cell};

pub const BALANCE_TOLERANCE: f64 = 0.01;
pub const MAX_BALANCE_MISMATCHES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Income,
    Expense,
    Balance,
    Date,
    Description,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Income,
        Role::Expense,
        Role::Balance,
        Role::Date,
        Role::Description,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Income => "income",
            Role::Expense => "expense",
            Role::Balance => "balance",
            Role::Date => "date",
            Role::Description => "description",
        }
    }

    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            Role::Income => &[
                "입금", "입금액", "수입", "매출", "수입금액", "대변", "credit", "income", "받은금액",
            ],
            Role::Expense => &[
                "출금", "출금액", "지출", "지급", "차변", "debit", "expense", "보낸금액", "사용금액",
                "결제금액", "이용금액",
            ],
            Role::Balance => &["잔액", "잔고", "누적잔액", "balance", "계좌잔액"],
            Role::Date => &[
                "날짜", "거래일", "일자", "거래일자", "사용일", "이용일", "승인일", "결제일", "date",
                "거래일시",
            ],
            Role::Description => &[
                "적요", "내용", "거래내용", "비고", "메모", "상세", "거래처", "이용내역", "사용처",
                "가맹점", "거래적요",
            ],
        }
    }
}

/// Role → column index, recomputed per dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinancialColumns(BTreeMap<Role, usize>);

impl FinancialColumns {
    /// For each role, the first header containing any of its patterns.
    pub fn detect<S: AsRef<str>>(headers: &[S]) -> Self {
        let lowered: Vec<String> = headers
            .iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .collect();
        let mut found = BTreeMap::new();
        for role in Role::ALL {
            if let Some(idx) = lowered
                .iter()
                .position(|header| role.patterns().iter().any(|p| header.contains(p)))
            {
                found.insert(role, idx);
            }
        }
        Self(found)
    }

    pub fn get(&self, role: Role) -> Option<usize> {
        self.0.get(&role).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, usize)> + '_ {
        self.0.iter().map(|(role, idx)| (*role, *idx))
    }

    /// Role → header name, for reports.
    pub fn named<S: AsRef<str>>(&self, headers: &[S]) -> BTreeMap<Role, Option<String>> {
        self.iter()
            .map(|(role, idx)| (role, headers.get(idx).map(|h| h.as_ref().to_string())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    /// 1-based position of the later row of the pair.
    pub row: usize,
    pub expected: f64,
    pub actual: f64,
    pub diff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub verified: bool,
    pub total_rows_checked: usize,
    pub mismatches: Vec<BalanceMismatch>,
}

/// Lenient reading of an already normalized amount cell.
fn amount(cell: Option<&Cell>) -> Option<f64> {
    match cell? {
        Cell::Integer(i) => Some(*i as f64),
        Cell::Float(f) if f.is_finite() => Some(*f),
        Cell::Text(s) => {
            let cleaned: String = s.replace([',', '원'], "").trim().to_string();
            cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

fn amount_or_zero(cell: Option<&Cell>) -> Option<f64> {
    match cell {
        None => Some(0.0),
        Some(c) if c.is_blank() => Some(0.0),
        Some(c) => amount(Some(c)),
    }
}

/// Verifies `prev_balance + income - expense == balance` across consecutive rows.
/// Rows whose values cannot be read as numbers are skipped.
pub fn balance_check(rows: &[Vec<Cell>], columns: &FinancialColumns) -> Option<BalanceCheck> {
    let income = columns.get(Role::Income)?;
    let expense = columns.get(Role::Expense)?;
    let balance = columns.get(Role::Balance)?;

    let mut mismatches = Vec::new();
    for (i, pair) in rows.windows(2).enumerate() {
        let (prev, curr) = (&pair[0], &pair[1]);
        let (Some(prev_bal), Some(curr_bal)) = (amount(prev.get(balance)), amount(curr.get(balance)))
        else {
            continue;
        };
        let (Some(inc), Some(exp)) = (
            amount_or_zero(curr.get(income)),
            amount_or_zero(curr.get(expense)),
        ) else {
            continue;
        };
        let expected = prev_bal + inc - exp;
        if (expected - curr_bal).abs() > BALANCE_TOLERANCE {
            mismatches.push(BalanceMismatch {
                row: i + 2,
                expected,
                actual: curr_bal,
                diff: round2(curr_bal - expected),
            });
        }
    }

    let verified = mismatches.is_empty();
    mismatches.truncate(MAX_BALANCE_MISMATCHES);
    Some(BalanceCheck {
        verified,
        total_rows_checked: rows.len().saturating_sub(1),
        mismatches,
    })
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub count: usize,
    pub income: f64,
    pub expense: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub detected_columns: BTreeMap<Role, Option<String>>,
    pub total_income: f64,
    pub total_expense: f64,
    pub net: f64,
    pub transaction_count: usize,
    pub category_breakdown: BTreeMap<String, CategoryTotals>,
}

/// Totals over the income/expense roles with a per-category breakdown.
/// `None` when there is nothing to summarize.
pub fn compute_financial_summary(
    headers: &[String],
    rows: &[Vec<Cell>],
    classifier: &Classifier,
    owner: Option<&str>,
) -> Option<FinancialSummary> {
    if headers.is_empty() || rows.is_empty() {
        return None;
    }
    let columns = FinancialColumns::detect(headers);
    if columns.is_empty() {
        return None;
    }
    let income_idx = columns.get(Role::Income);
    let expense_idx = columns.get(Role::Expense);
    let desc_idx = columns.get(Role::Description);

    let mut summary = FinancialSummary {
        detected_columns: columns.named(headers),
        total_income: 0.0,
        total_expense: 0.0,
        net: 0.0,
        transaction_count: rows.len(),
        category_breakdown: BTreeMap::new(),
    };

    for row in rows {
        let income = income_idx
            .and_then(|idx| amount_or_zero(row.get(idx)))
            .unwrap_or(0.0);
        let expense = expense_idx
            .and_then(|idx| amount_or_zero(row.get(idx)))
            .unwrap_or(0.0);
        summary.total_income += income;
        summary.total_expense += expense;

        if let Some(idx) = desc_idx
            && let Some(cell) = row.get(idx)
        {
            let category = classifier.classify(&cell.as_display(), owner);
            let totals = summary.category_breakdown.entry(category).or_default();
            totals.count += 1;
            totals.income += income;
            totals.expense += expense;
        }
    }
    summary.net = summary.total_income - summary.total_expense;
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn roles_pick_first_matching_header() {
        let cols = FinancialColumns::detect(&headers(&["거래일자", "적요", "입금액", "출금액", "잔액"]));
        assert_eq!(cols.get(Role::Date), Some(0));
        assert_eq!(cols.get(Role::Description), Some(1));
        assert_eq!(cols.get(Role::Income), Some(2));
        assert_eq!(cols.get(Role::Expense), Some(3));
        assert_eq!(cols.get(Role::Balance), Some(4));
        assert!(FinancialColumns::detect(&headers(&["품목", "수량"])).is_empty());
    }

    #[test]
    fn balance_mismatches_are_reported_with_one_based_rows() {
        let cols = FinancialColumns::detect(&headers(&["입금", "출금", "잔액"]));
        let rows = vec![
            vec![Cell::Float(0.0), Cell::Float(0.0), Cell::Float(1000.0)],
            vec![Cell::Float(500.0), Cell::Empty, Cell::Float(1500.0)],
            vec![Cell::Empty, Cell::Float(200.0), Cell::Float(1250.0)],
            vec![Cell::text("메모"), Cell::Empty, Cell::Float(1250.0)],
        ];
        let check = balance_check(&rows, &cols).unwrap();
        assert!(!check.verified);
        assert_eq!(check.total_rows_checked, 3);
        assert_eq!(check.mismatches.len(), 1);
        let mismatch = &check.mismatches[0];
        assert_eq!(mismatch.row, 3);
        assert_eq!(mismatch.expected, 1300.0);
        assert_eq!(mismatch.diff, -50.0);
    }

    #[test]
    fn zero_balance_is_a_real_balance() {
        let cols = FinancialColumns::detect(&headers(&["입금", "출금", "잔액"]));
        let rows = vec![
            vec![Cell::Empty, Cell::Empty, Cell::Float(0.0)],
            vec![Cell::Float(10.0), Cell::Empty, Cell::Float(0.0)],
        ];
        assert_eq!(balance_check(&rows, &cols).unwrap().mismatches.len(), 1);
        assert!(balance_check(&rows, &FinancialColumns::default()).is_none());
    }

    #[test]
    fn summary_totals_and_breakdown() {
        let classifier = Classifier::default();
        let hdrs = headers(&["날짜", "적요", "입금액", "출금액"]);
        let rows = vec![
            vec![Cell::text("2024-01-01"), Cell::text("매출 입금"), Cell::Float(1000.0), Cell::Empty],
            vec![Cell::text("2024-01-02"), Cell::text("택시비"), Cell::Empty, Cell::text("12,000")],
            vec![Cell::text("2024-01-03"), Cell::text("택시"), Cell::Empty, Cell::Float(3000.0)],
        ];
        let summary = compute_financial_summary(&hdrs, &rows, &classifier, None).unwrap();
        assert_eq!(summary.total_income, 1000.0);
        assert_eq!(summary.total_expense, 15000.0);
        assert_eq!(summary.net, -14000.0);
        assert_eq!(summary.transaction_count, 3);
        assert_eq!(summary.category_breakdown["여비교통비"].count, 2);
        assert_eq!(summary.category_breakdown["매출"].income, 1000.0);
        assert_eq!(summary.detected_columns[&Role::Income].as_deref(), Some("입금액"));
        assert!(compute_financial_summary(&[], &rows, &classifier, None).is_none());
    }
}
