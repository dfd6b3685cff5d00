//! Raw column name → canonical column name mapping.
//!
//! The alias table is an ordered list of `(canonical, aliases)` entries. A
//! reverse index keyed by the lower-cased canonical names and aliases drives
//! every lookup, and its iteration order (first insertion order) is what
//! breaks ties for the containment and similarity tiers.

use std::{
    collections::{BTreeMap, HashMap},
    sync::LazyLock,
};

use itertools::Itertools;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::TextDiff;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

pub const EXACT_CONFIDENCE: f64 = 1.0;
pub const COMPRESSED_CONFIDENCE: f64 = 0.95;
pub const CONTAINMENT_CONFIDENCE: f64 = 0.8;

pub const DEFAULT_ALIASES: &[(&str, &[&str])] = &[
    (
        "날짜",
        &[
            "date", "일자", "일시", "거래일", "거래일자", "작성일", "작성일자", "기준일", "기준일자",
            "사용일", "이용일", "승인일", "결제일", "거래일시",
        ],
    ),
    ("연도", &["year", "년도", "년", "사업연도"]),
    ("월", &["month", "월份"]),
    (
        "입금액",
        &["입금", "입금금액", "credit", "deposit", "수입금액", "받은금액", "수입", "대변"],
    ),
    (
        "출금액",
        &[
            "출금", "출금금액", "debit", "withdrawal", "보낸금액", "사용금액", "결제금액",
            "이용금액", "지출", "지급", "차변",
        ],
    ),
    ("잔액", &["잔고", "누적잔액", "balance", "계좌잔액"]),
    (
        "적요",
        &["내용", "거래내용", "상세", "거래처", "이용내역", "사용처", "가맹점", "거래적요"],
    ),
    (
        "매출액",
        &[
            "sales", "revenue", "매출", "매출금액", "매출 금액", "총매출", "총매출액", "total_sales",
        ],
    ),
    (
        "매입액",
        &["purchase", "cost", "매입", "매입금액", "매입 금액", "총매입", "총매입액"],
    ),
    ("영업이익", &["operating_profit", "영업 이익", "영업손익"]),
    ("순이익", &["net_profit", "net_income", "당기순이익", "순손익", "당기 순이익"]),
    ("매출원가", &["cost_of_sales", "cogs", "매출 원가", "원가"]),
    ("판관비", &["sga", "판매관리비", "판매비와관리비", "판매비와 관리비"]),
    ("금액", &["amount", "amt", "총액", "합계금액", "합계 금액"]),
    ("단가", &["unit_price", "price", "가격"]),
    ("수량", &["quantity", "qty", "갯수", "개수"]),
    (
        "거래처",
        &[
            "customer", "client", "거래처명", "업체명", "업체", "고객", "고객명", "회사명", "회사",
        ],
    ),
    ("사업자번호", &["business_number", "biz_no", "사업자등록번호", "사업자 등록번호"]),
    ("대표자", &["ceo", "대표", "대표자명", "대표이사"]),
    (
        "품목",
        &["item", "product", "품명", "상품", "상품명", "제품", "제품명", "품목명"],
    ),
    ("규격", &["spec", "specification", "스펙", "사양"]),
    ("비고", &["note", "remark", "remarks", "메모", "참고", "비 고"]),
];

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern must compile"));
static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_\-./]").expect("separator pattern must compile"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedColumn {
    pub standard_name: String,
    pub confidence: f64,
}

impl MappedColumn {
    pub fn is_mapped(&self) -> bool {
        self.confidence > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderMapping {
    pub original: String,
    pub standard_name: String,
    pub confidence: f64,
    pub mapped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingGroup {
    pub standard_name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingSuggestions {
    pub individual: Vec<HeaderMapping>,
    pub groups: Vec<MappingGroup>,
}

#[derive(Debug, Clone)]
pub struct ColumnMapper {
    mappings: Vec<(String, Vec<String>)>,
    reverse: Vec<(String, String)>,
    reverse_pos: HashMap<String, usize>,
    similarity_threshold: f64,
}

impl Default for ColumnMapper {
    fn default() -> Self {
        Self::new(&BTreeMap::new(), DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl ColumnMapper {
    /// Builds a mapper from the default table with `custom` merged in additively.
    pub fn new(custom: &BTreeMap<String, Vec<String>>, similarity_threshold: f64) -> Self {
        let mut mapper = Self::empty(similarity_threshold);
        for (standard, aliases) in DEFAULT_ALIASES {
            mapper.add_mapping(standard, aliases.iter().copied());
        }
        for (standard, aliases) in custom {
            mapper.add_mapping(standard, aliases.iter().map(String::as_str));
        }
        mapper
    }

    /// A mapper with no aliases at all.
    pub fn empty(similarity_threshold: f64) -> Self {
        Self {
            mappings: Vec::new(),
            reverse: Vec::new(),
            reverse_pos: HashMap::new(),
            similarity_threshold,
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    pub fn add_mapping<'a, I>(&mut self, standard: &str, aliases: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let aliases: Vec<String> = aliases.into_iter().map(str::to_string).collect();
        match self.mappings.iter_mut().find(|(name, _)| name == standard) {
            Some((_, existing)) => existing.extend(aliases.iter().cloned()),
            None => self.mappings.push((standard.to_string(), aliases.clone())),
        }
        self.index(standard.to_lowercase(), standard);
        for alias in &aliases {
            self.index(alias.to_lowercase(), standard);
        }
    }

    fn index(&mut self, key: String, standard: &str) {
        match self.reverse_pos.get(&key) {
            Some(&pos) => self.reverse[pos].1 = standard.to_string(),
            None => {
                self.reverse_pos.insert(key.clone(), self.reverse.len());
                self.reverse.push((key, standard.to_string()));
            }
        }
    }

    /// Canonical names with their aliases, in table order.
    pub fn mappings(&self) -> &[(String, Vec<String>)] {
        &self.mappings
    }

    pub fn map_column(&self, name: &str) -> MappedColumn {
        let unmapped = || MappedColumn {
            standard_name: name.to_string(),
            confidence: 0.0,
        };
        if name.is_empty() {
            return unmapped();
        }
        let cleaned = clean_name(name);

        if let Some(&pos) = self.reverse_pos.get(&cleaned) {
            return self.hit(pos, EXACT_CONFIDENCE);
        }

        let compressed = SEPARATORS.replace_all(&cleaned, "");
        if let Some(pos) = self
            .reverse
            .iter()
            .position(|(key, _)| SEPARATORS.replace_all(key, "") == compressed)
        {
            return self.hit(pos, COMPRESSED_CONFIDENCE);
        }

        if let Some(pos) = self
            .reverse
            .iter()
            .position(|(key, _)| cleaned.contains(key.as_str()) || key.contains(cleaned.as_str()))
        {
            return self.hit(pos, CONTAINMENT_CONFIDENCE);
        }

        let mut best: Option<(usize, f64)> = None;
        for (pos, (key, _)) in self.reverse.iter().enumerate() {
            let score = similarity(&cleaned, key);
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((pos, score));
            }
        }
        if let Some((pos, score)) = best
            && score >= self.similarity_threshold
        {
            return self.hit(pos, score);
        }

        debug!("No canonical column for '{name}'");
        unmapped()
    }

    fn hit(&self, pos: usize, confidence: f64) -> MappedColumn {
        MappedColumn {
            standard_name: self.reverse[pos].1.clone(),
            confidence,
        }
    }

    pub fn map_headers<S: AsRef<str>>(&self, headers: &[S]) -> Vec<HeaderMapping> {
        headers
            .iter()
            .map(|header| {
                let header = header.as_ref();
                let mapped = self.map_column(header);
                HeaderMapping {
                    original: header.to_string(),
                    mapped: mapped.is_mapped(),
                    standard_name: mapped.standard_name,
                    confidence: mapped.confidence,
                }
            })
            .collect()
    }

    /// Proposes mappings across several files' headers.
    ///
    /// Mapped headers are grouped under their canonical name. Headers left
    /// unmapped are clustered by pairwise similarity; each cluster is named
    /// after its first member and every header joins at most one cluster.
    pub fn suggest_mappings<S: AsRef<str>>(&self, headers_list: &[Vec<S>]) -> MappingSuggestions {
        let seen: Vec<&str> = headers_list
            .iter()
            .flatten()
            .map(|header| header.as_ref())
            .unique()
            .collect();

        let individual = self.map_headers(&seen);
        let mut groups: Vec<MappingGroup> = Vec::new();
        for mapping in individual.iter().filter(|m| m.mapped) {
            match groups.iter_mut().find(|g| g.standard_name == mapping.standard_name) {
                Some(group) => group.members.push(mapping.original.clone()),
                None => groups.push(MappingGroup {
                    standard_name: mapping.standard_name.clone(),
                    members: vec![mapping.original.clone()],
                }),
            }
        }

        let unmapped: Vec<&str> = individual
            .iter()
            .filter(|m| !m.mapped)
            .map(|m| m.original.as_str())
            .collect();
        let mut clustered = vec![false; unmapped.len()];
        for i in 0..unmapped.len() {
            if clustered[i] {
                continue;
            }
            let seed = clean_name(unmapped[i]);
            let mut members = vec![unmapped[i].to_string()];
            for j in (i + 1)..unmapped.len() {
                if !clustered[j] && similarity(&seed, &clean_name(unmapped[j])) >= self.similarity_threshold {
                    clustered[j] = true;
                    members.push(unmapped[j].to_string());
                }
            }
            if members.len() > 1 {
                clustered[i] = true;
                groups.push(MappingGroup {
                    standard_name: unmapped[i].to_string(),
                    members,
                });
            }
        }

        MappingSuggestions { individual, groups }
    }
}

/// Trims, lower-cases and collapses internal whitespace.
pub fn clean_name(name: &str) -> String {
    WHITESPACE
        .replace_all(name.trim(), " ")
        .to_lowercase()
}

/// Character-sequence similarity in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    f64::from(TextDiff::from_chars(a, b).ratio())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_alias_and_canonical_names_map_fully() {
        let mapper = ColumnMapper::default();
        let spaced = mapper.map_column("매출 금액");
        let compact = mapper.map_column("매출액");
        assert_eq!(spaced.standard_name, "매출액");
        assert_eq!(compact.standard_name, "매출액");
        assert!(spaced.confidence >= 0.8 && compact.confidence >= 0.8);
        assert_eq!(mapper.map_column("  DATE ").confidence, EXACT_CONFIDENCE);
    }

    #[test]
    fn separators_are_ignored_in_second_tier() {
        let mapper = ColumnMapper::default();
        let mapped = mapper.map_column("unit-price");
        assert_eq!(mapped.standard_name, "단가");
        assert_eq!(mapped.confidence, COMPRESSED_CONFIDENCE);
    }

    #[test]
    fn containment_uses_table_order() {
        let mapper = ColumnMapper::default();
        let mapped = mapper.map_column("카드 이용금액(원)");
        assert_eq!(mapped.standard_name, "출금액");
        assert_eq!(mapped.confidence, CONTAINMENT_CONFIDENCE);
    }

    #[test]
    fn unknown_names_keep_original() {
        let mapper = ColumnMapper::default();
        let mapped = mapper.map_column("zzqx");
        assert_eq!(mapped.standard_name, "zzqx");
        assert_eq!(mapped.confidence, 0.0);
        assert!(!mapper.map_column("").is_mapped());
    }

    #[test]
    fn custom_aliases_are_additive() {
        let mut custom = BTreeMap::new();
        custom.insert("날짜".to_string(), vec!["posting day".to_string()]);
        custom.insert("카테고리".to_string(), vec!["bucket".to_string()]);
        let mapper = ColumnMapper::new(&custom, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(mapper.map_column("Posting Day").standard_name, "날짜");
        assert_eq!(mapper.map_column("거래일").standard_name, "날짜");
        assert_eq!(mapper.map_column("bucket").standard_name, "카테고리");
    }

    #[test]
    fn re_adding_an_alias_repoints_it() {
        let mut mapper = ColumnMapper::empty(DEFAULT_SIMILARITY_THRESHOLD);
        mapper.add_mapping("a", ["shared"]);
        mapper.add_mapping("b", ["shared"]);
        assert_eq!(mapper.map_column("shared").standard_name, "b");
        assert_eq!(mapper.mappings().len(), 2);
    }

    #[test]
    fn unmapped_headers_cluster_once() {
        let mapper = ColumnMapper::empty(DEFAULT_SIMILARITY_THRESHOLD);
        let suggestions = mapper.suggest_mappings(&[
            vec!["voucher no", "memo"],
            vec!["voucher no.", "voucher num", "qqq"],
        ]);
        assert_eq!(suggestions.individual.len(), 5);
        assert_eq!(suggestions.groups.len(), 1);
        let group = &suggestions.groups[0];
        assert_eq!(group.standard_name, "voucher no");
        assert_eq!(group.members, vec!["voucher no", "voucher no.", "voucher num"]);
    }
}
