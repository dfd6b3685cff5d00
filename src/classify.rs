//! Account-category classification of transaction descriptions.
//!
//! Resolution is two-tier. An owner's active [`ClassificationRule`]s are
//! consulted first in precedence order `(priority asc, hit_count desc)`; the
//! keyword table is the fallback. Rule selection is a pure read of the
//! [`RuleStore`]; the hit counter of the winning rule is bumped afterwards as a
//! separate atomic update.

use std::{
    fs,
    path::Path,
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const UNCLASSIFIED: &str = "미분류";

pub const DEFAULT_CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("매출", &["매출", "판매", "수입", "용역", "매출 입금"]),
    ("이자수익", &["이자수입", "예금이자", "이자수익"]),
    ("잡수입", &["잡수입", "잡이익", "기타수입", "임대수입"]),
    ("급여", &["급여", "월급", "상여", "보너스", "인건비", "퇴직금"]),
    (
        "복리후생비",
        &["복리후생", "식대", "직원식대", "체력단련", "경조사", "건강검진"],
    ),
    ("소모품비", &["소모품", "사무용품", "비품"]),
    (
        "접대비",
        &["접대", "식비접대", "거래처 식비", "거래처 선물", "접대비"],
    ),
    (
        "여비교통비",
        &[
            "교통", "출장", "택시", "주유", "기차", "KTX", "버스", "항공", "유류", "승차권",
        ],
    ),
    ("통신비", &["통신", "전화", "인터넷", "핸드폰", "휴대폰"]),
    (
        "수도광열비",
        &["수도", "전기", "가스", "광열", "전기요금", "가스요금"],
    ),
    ("임차료", &["임대료", "월세", "임차", "사무실 임대"]),
    ("보험료", &["보험", "산재", "고용보험", "건강보험", "국민연금"]),
    (
        "세금과공과",
        &[
            "세금", "부가세", "법인세", "국세", "지방세", "인지세", "등록세", "중간예납", "예정신고",
        ],
    ),
    ("광고선전비", &["광고", "홍보", "마케팅", "판촉", "광고비"]),
    ("수수료", &["수수료", "카드수수료", "이체수수료", "계좌이체"]),
    ("이자비용", &["이자", "대출이자"]),
    ("감가상각비", &["감가상각"]),
    ("외주비", &["외주", "용역비", "하도급", "외주비"]),
    ("수선비", &["수선", "수리", "유지보수"]),
];

/// Ordered category → keywords table; the first category with a keyword
/// contained in the description wins.
#[derive(Debug, Clone)]
pub struct KeywordTable {
    entries: Vec<(String, Vec<String>)>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_CATEGORY_KEYWORDS
                .iter()
                .map(|(category, keywords)| {
                    (
                        category.to_string(),
                        keywords.iter().map(|k| k.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl KeywordTable {
    pub fn new(entries: Vec<(String, Vec<String>)>) -> Self {
        Self { entries }
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(category, _)| category.as_str())
    }

    pub fn lookup(&self, description: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| description.contains(kw.as_str())))
            .map(|(category, _)| category.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Contains,
    Vendor,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Contains => "contains",
            MatchType::Vendor => "vendor",
        }
    }

    /// Callers pass trimmed text: stored patterns are trimmed on insert and
    /// descriptions are trimmed before lookup, so `Exact` compares trimmed text.
    pub fn matches(self, pattern: &str, description: &str) -> bool {
        if pattern.is_empty() {
            return false;
        }
        match self {
            MatchType::Exact => description == pattern,
            MatchType::Contains | MatchType::Vendor => description.contains(pattern),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    User,
    Vendor,
    Auto,
}

impl RuleSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleSource::User => "user",
            RuleSource::Vendor => "vendor",
            RuleSource::Auto => "auto",
        }
    }

    pub fn default_priority(self) -> i32 {
        match self {
            RuleSource::User => 10,
            RuleSource::Vendor => 20,
            RuleSource::Auto => 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub id: u64,
    pub owner: String,
    pub pattern: String,
    pub match_type: MatchType,
    pub category: String,
    pub source: RuleSource,
    pub priority: i32,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug)]
struct RuleEntry {
    rule: ClassificationRule,
    hits: AtomicU64,
}

impl RuleEntry {
    fn new(rule: ClassificationRule) -> Self {
        let hits = AtomicU64::new(rule.hit_count);
        Self { rule, hits }
    }

    fn snapshot(&self) -> ClassificationRule {
        let mut rule = self.rule.clone();
        rule.hit_count = self.hits.load(Ordering::Relaxed);
        rule
    }

    fn precedence(&self) -> (i32, std::cmp::Reverse<u64>, u64) {
        (
            self.rule.priority,
            std::cmp::Reverse(self.hits.load(Ordering::Relaxed)),
            self.rule.id,
        )
    }
}

#[derive(Debug, Default)]
struct RuleBook {
    next_id: u64,
    entries: Vec<RuleEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RuleBookFile {
    #[serde(default)]
    rules: Vec<ClassificationRule>,
}

/// Shared per-owner rule set: concurrent lookups and hit increments take the
/// read lock; learning and rule edits take the write lock.
#[derive(Debug, Default)]
pub struct RuleStore {
    book: RwLock<RuleBook>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<ClassificationRule>) -> Self {
        let next_id = rules.iter().map(|r| r.id).max().map_or(1, |max| max + 1);
        let entries = rules.into_iter().map(RuleEntry::new).collect();
        Self {
            book: RwLock::new(RuleBook { next_id, entries }),
        }
    }

    /// Loads a YAML rule book; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Rule book {path:?} does not exist yet");
            return Ok(Self::new());
        }
        let contents = fs::read_to_string(path)?;
        let file: RuleBookFile = if contents.trim().is_empty() {
            RuleBookFile::default()
        } else {
            serde_yaml::from_str(&contents)?
        };
        Ok(Self::from_rules(file.rules))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = RuleBookFile {
            rules: self.all_rules(),
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(&file)?)?;
        Ok(())
    }

    /// The owner's highest-precedence active rule matching `description`.
    pub fn select_rule(&self, owner: &str, description: &str) -> Option<ClassificationRule> {
        let book = read(&self.book);
        book.entries
            .iter()
            .filter(|entry| {
                entry.rule.active
                    && entry.rule.owner == owner
                    && entry.rule.match_type.matches(&entry.rule.pattern, description)
            })
            .min_by_key(|entry| entry.precedence())
            .map(RuleEntry::snapshot)
    }

    /// Increments the hit counter of rule `id`; returns `false` if it is gone.
    pub fn record_hit(&self, id: u64) -> bool {
        let book = read(&self.book);
        match book.entries.iter().find(|entry| entry.rule.id == id) {
            Some(entry) => {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Learns an exact-match user rule from a manual reclassification.
    /// Repeating a correction updates the same rule and counts as a hit.
    pub fn learn(&self, owner: &str, description: &str, category: &str) -> Option<ClassificationRule> {
        let pattern = description.trim();
        if pattern.is_empty() {
            return None;
        }
        let mut book = write(&self.book);
        let now = Utc::now();
        if let Some(entry) = book.entries.iter_mut().find(|entry| {
            entry.rule.owner == owner
                && entry.rule.pattern == pattern
                && entry.rule.match_type == MatchType::Exact
        }) {
            entry.rule.category = category.to_string();
            entry.rule.source = RuleSource::User;
            entry.rule.priority = RuleSource::User.default_priority();
            entry.rule.active = true;
            entry.rule.updated_at = now;
            entry.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.snapshot());
        }
        let rule = ClassificationRule {
            id: book.allocate_id(),
            owner: owner.to_string(),
            pattern: pattern.to_string(),
            match_type: MatchType::Exact,
            category: category.to_string(),
            source: RuleSource::User,
            priority: RuleSource::User.default_priority(),
            hit_count: 0,
            active: true,
            created_at: now,
            updated_at: now,
        };
        info!("Learned rule '{pattern}' → {category} for {owner}");
        book.entries.push(RuleEntry::new(rule.clone()));
        Some(rule)
    }

    /// Creates or updates the rule keyed by `(owner, pattern, match_type)`.
    /// The pattern is stored trimmed.
    pub fn upsert_rule(
        &self,
        owner: &str,
        pattern: &str,
        match_type: MatchType,
        category: &str,
        source: RuleSource,
        priority: Option<i32>,
    ) -> Option<ClassificationRule> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }
        let priority = priority.unwrap_or_else(|| source.default_priority());
        let mut book = write(&self.book);
        let now = Utc::now();
        if let Some(entry) = book.entries.iter_mut().find(|entry| {
            entry.rule.owner == owner
                && entry.rule.pattern == pattern
                && entry.rule.match_type == match_type
        }) {
            entry.rule.category = category.to_string();
            entry.rule.source = source;
            entry.rule.priority = priority;
            entry.rule.active = true;
            entry.rule.updated_at = now;
            return Some(entry.snapshot());
        }
        let rule = ClassificationRule {
            id: book.allocate_id(),
            owner: owner.to_string(),
            pattern: pattern.to_string(),
            match_type,
            category: category.to_string(),
            source,
            priority,
            hit_count: 0,
            active: true,
            created_at: now,
            updated_at: now,
        };
        book.entries.push(RuleEntry::new(rule.clone()));
        Some(rule)
    }

    pub fn deactivate(&self, owner: &str, id: u64) -> bool {
        let mut book = write(&self.book);
        match book
            .entries
            .iter_mut()
            .find(|entry| entry.rule.id == id && entry.rule.owner == owner)
        {
            Some(entry) => {
                entry.rule.active = false;
                entry.rule.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// The owner's rules, active and inactive, in precedence order.
    pub fn rules_for(&self, owner: &str) -> Vec<ClassificationRule> {
        let book = read(&self.book);
        let mut entries: Vec<&RuleEntry> = book
            .entries
            .iter()
            .filter(|entry| entry.rule.owner == owner)
            .collect();
        entries.sort_by_key(|entry| entry.precedence());
        entries.into_iter().map(RuleEntry::snapshot).collect()
    }

    pub fn all_rules(&self) -> Vec<ClassificationRule> {
        read(&self.book).entries.iter().map(RuleEntry::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        read(&self.book).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleBook {
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }
}

// A poisoned lock still holds a consistent rule list: every mutation is a
// single field assignment or push.
fn read(lock: &RwLock<RuleBook>) -> std::sync::RwLockReadGuard<'_, RuleBook> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(lock: &RwLock<RuleBook>) -> std::sync::RwLockWriteGuard<'_, RuleBook> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Rule { id: u64 },
    Keyword,
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: String,
    pub resolved_by: Resolution,
}

#[derive(Debug, Default)]
pub struct Classifier {
    keywords: KeywordTable,
    rules: RuleStore,
}

impl Classifier {
    pub fn new(keywords: KeywordTable, rules: RuleStore) -> Self {
        Self { keywords, rules }
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn keywords(&self) -> &KeywordTable {
        &self.keywords
    }

    pub fn classify(&self, description: &str, owner: Option<&str>) -> String {
        self.classify_detailed(description, owner).category
    }

    pub fn classify_detailed(&self, description: &str, owner: Option<&str>) -> Classification {
        let desc = description.trim();
        if desc.is_empty() {
            return Classification {
                category: UNCLASSIFIED.to_string(),
                resolved_by: Resolution::Unclassified,
            };
        }
        if let Some(owner) = owner
            && let Some(rule) = self.rules.select_rule(owner, desc)
        {
            self.rules.record_hit(rule.id);
            debug!("Rule {} classified '{desc}' as {}", rule.id, rule.category);
            return Classification {
                category: rule.category,
                resolved_by: Resolution::Rule { id: rule.id },
            };
        }
        match self.keywords.lookup(desc) {
            Some(category) => Classification {
                category: category.to_string(),
                resolved_by: Resolution::Keyword,
            },
            None => Classification {
                category: UNCLASSIFIED.to_string(),
                resolved_by: Resolution::Unclassified,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_table_first_category_wins() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("3월 급여 지급", None), "급여");
        assert_eq!(classifier.classify("대출이자 납부", None), "이자비용");
        assert_eq!(classifier.classify("스타벅스 강남점", None), UNCLASSIFIED);
        assert_eq!(classifier.classify("   ", None), UNCLASSIFIED);
    }

    #[test]
    fn exact_rules_compare_trimmed_text() {
        let classifier = Classifier::default();
        let rule = classifier
            .rules()
            .upsert_rule("kim", "  가나상사 정산 ", MatchType::Exact, "여비교통비", RuleSource::User, None)
            .unwrap();
        assert_eq!(rule.pattern, "가나상사 정산");
        assert_eq!(classifier.classify(" 가나상사 정산\t", Some("kim")), "여비교통비");
        assert_eq!(classifier.classify("가나상사 정산 영수증", Some("kim")), UNCLASSIFIED);
    }

    #[test]
    fn learned_rule_overrides_keywords_for_owner_only() {
        let classifier = Classifier::default();
        classifier.rules().learn("kim", "스타벅스 강남점", "복리후생비");
        assert_eq!(classifier.classify("스타벅스 강남점", Some("kim")), "복리후생비");
        assert_eq!(classifier.classify("스타벅스 강남점", Some("lee")), UNCLASSIFIED);
        assert_eq!(classifier.classify("스타벅스 강남점", None), UNCLASSIFIED);
    }

    #[test]
    fn learning_is_idempotent_and_counts_repeats() {
        let store = RuleStore::new();
        let first = store.learn("kim", " 편의점 ", "소모품비").unwrap();
        let second = store.learn("kim", "편의점", "복리후생비").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.hit_count, 1);
        assert_eq!(second.category, "복리후생비");
        assert_eq!(store.len(), 1);
        assert!(store.learn("kim", "  ", "급여").is_none());
    }

    #[test]
    fn precedence_prefers_priority_then_hits() {
        let store = RuleStore::new();
        let auto = store
            .upsert_rule("kim", "카페", MatchType::Contains, "접대비", RuleSource::Auto, None)
            .unwrap();
        let vendor = store
            .upsert_rule("kim", "카페", MatchType::Vendor, "복리후생비", RuleSource::Vendor, None)
            .unwrap();
        assert_eq!(auto.priority, 30);
        let chosen = store.select_rule("kim", "동네 카페").unwrap();
        assert_eq!(chosen.id, vendor.id);

        let a = store
            .upsert_rule("lee", "마트", MatchType::Contains, "소모품비", RuleSource::User, None)
            .unwrap();
        let b = store
            .upsert_rule("lee", "이마트", MatchType::Contains, "복리후생비", RuleSource::User, None)
            .unwrap();
        assert_eq!(store.select_rule("lee", "이마트 성수").unwrap().id, a.id);
        store.record_hit(b.id);
        assert_eq!(store.select_rule("lee", "이마트 성수").unwrap().id, b.id);
    }

    #[test]
    fn deactivated_rules_are_skipped() {
        let store = RuleStore::new();
        let rule = store.learn("kim", "택배", "소모품비").unwrap();
        assert!(store.deactivate("kim", rule.id));
        assert!(store.select_rule("kim", "택배").is_none());
        assert!(!store.deactivate("lee", rule.id));
    }

    #[test]
    fn concurrent_classification_counts_every_hit() {
        let classifier = Classifier::default();
        let rule = classifier.rules().learn("kim", "정기구독", "통신비").unwrap();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        assert_eq!(classifier.classify("정기구독", Some("kim")), "통신비");
                    }
                });
            }
        });
        let stored = classifier.rules().rules_for("kim");
        assert_eq!(stored[0].id, rule.id);
        assert_eq!(stored[0].hit_count, 200);
    }

    #[test]
    fn rule_book_round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yml");
        let store = RuleStore::new();
        store.learn("kim", "스타벅스 강남점", "복리후생비");
        store.save(&path).unwrap();

        let reloaded = RuleStore::load(&path).unwrap();
        let rules = reloaded.rules_for("kim");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].match_type, MatchType::Exact);
        let next = reloaded.learn("kim", "다른 가게", "접대비").unwrap();
        assert_eq!(next.id, rules[0].id + 1);
    }
}
