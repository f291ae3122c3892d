//! Letter numbers (`nomor_surat`)
//!
//! Format: `SEQ/TE-UNILA/CAT/MONTH/YEAR/RAND`, for example
//! `007/TE-UNILA/SKP/III/2025/K3Z9QA`.
//!
//! - `SEQ` is the number of letters already approved this calendar month
//!   plus one, three digits, wrapping back to 001 after 999
//! - `CAT` is the category code (SKP, SRK, IJN, LNY)
//! - `MONTH` is the month as a Roman numeral
//! - `RAND` is six characters from `[A-Z0-9]`, redrawn on collision
//!
//! The sequence count is not serialized across concurrent approvals;
//! uniqueness comes from `RAND` and the unique index on `nomor_surat`.

use crate::db::models::{Ticket, TicketCategory, TicketColumn, TicketEntity};
use crate::db::{Repository, UserSummary};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::workflow::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rand::Rng;
use regex_lite::Regex;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Institution tag embedded in every number
pub const INSTITUTION: &str = "TE-UNILA";

/// Length of the random suffix
pub const SUFFIX_LEN: usize = 6;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const ROMAN_MONTHS: [&str; 12] = [
    "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII",
];

/// Candidates tried before giving up on a broken suffix source
const MAX_ATTEMPTS: u32 = 32;

/// Highest value `SEQ` can hold
const MAX_SEQUENCE: u64 = 999;

fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(r"^\d{3}/TE-UNILA/(SKP|SRK|IJN|LNY)/[IVX]+/\d{4}/[A-Z0-9]{6}$")
            .expect("letter number grammar is a valid regex")
    })
}

/// Whether a string matches the letter number grammar
pub fn is_well_formed(code: &str) -> bool {
    grammar().is_match(code)
}

pub fn category_code(category: TicketCategory) -> &'static str {
    match category {
        TicketCategory::SuratKeterangan => "SKP",
        TicketCategory::SuratRekomendasi => "SRK",
        TicketCategory::Ijin => "IJN",
        TicketCategory::Lainnya => "LNY",
    }
}

fn category_name(code: &str) -> &'static str {
    match code {
        "SKP" => "Surat Keterangan",
        "SRK" => "Surat Rekomendasi",
        "IJN" => "Ijin",
        "LNY" => "Lainnya",
        _ => "Unknown",
    }
}

/// Roman numeral for a month in 1..=12
pub fn roman_month(month: u32) -> &'static str {
    let index = month.clamp(1, 12) as usize - 1;
    ROMAN_MONTHS[index]
}

fn month_from_roman(roman: &str) -> Option<u32> {
    ROMAN_MONTHS
        .iter()
        .position(|m| *m == roman)
        .map(|i| i as u32 + 1)
}

/// `[first instant of the month, first instant of the next month)`
fn month_bounds(now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (year, month) = (now.year(), now.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };

    let start = NaiveDate::from_ymd_opt(year, month, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1).and_then(|d| d.and_hms_opt(0, 0, 0));

    match (start, end) {
        (Some(start), Some(end)) => Ok((start.and_utc(), end.and_utc())),
        _ => Err(AppError::Internal {
            message: format!("Cannot compute month bounds for {}", now),
        }),
    }
}

/// Fields of a letter number, split on `/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLetterNumber {
    /// Raw `SEQ` text
    pub sequence: String,
    pub sequence_number: Option<u32>,
    pub institution: String,
    pub category_code: String,
    pub category_name: String,
    /// Raw Roman month
    pub month: String,
    pub month_number: Option<u32>,
    pub year: String,
    pub unique_code: String,
}

/// Split a letter number into its fields; `None` unless there are exactly six
pub fn parse(code: &str) -> Option<ParsedLetterNumber> {
    let parts: Vec<&str> = code.split('/').collect();
    let [sequence, institution, category, month, year, unique_code] = parts.as_slice() else {
        return None;
    };

    Some(ParsedLetterNumber {
        sequence: sequence.to_string(),
        sequence_number: sequence.parse().ok(),
        institution: institution.to_string(),
        category_code: category.to_string(),
        category_name: category_name(category).to_string(),
        month: month.to_string(),
        month_number: month_from_roman(month),
        year: year.to_string(),
        unique_code: unique_code.to_string(),
    })
}

/// Storage queries the generator needs
#[async_trait]
pub trait LetterNumberStore: Send + Sync {
    /// Tickets holding a letter number approved in `[start, end)`
    async fn count_approved_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64>;

    /// Whether any ticket already holds this exact number
    async fn letter_number_exists(&self, candidate: &str) -> Result<bool>;
}

/// `LetterNumberStore` over a connection or an open transaction
pub struct TicketLetterStore<'c, C> {
    conn: &'c C,
}

impl<'c, C> TicketLetterStore<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<'c, C> LetterNumberStore for TicketLetterStore<'c, C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn count_approved_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64> {
        TicketEntity::find()
            .filter(TicketColumn::NomorSurat.is_not_null())
            .filter(TicketColumn::ApprovedAt.gte(start.fixed_offset()))
            .filter(TicketColumn::ApprovedAt.lt(end.fixed_offset()))
            .count(self.conn)
            .await
            .map_err(Into::into)
    }

    async fn letter_number_exists(&self, candidate: &str) -> Result<bool> {
        let n = TicketEntity::find()
            .filter(TicketColumn::NomorSurat.eq(candidate))
            .count(self.conn)
            .await?;
        Ok(n > 0)
    }
}

/// Source of the random suffix
pub trait SuffixSource: Send + Sync {
    fn draw(&self) -> String;
}

/// Uniform draw from `[A-Z0-9]`
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSuffix;

impl SuffixSource for RandomSuffix {
    fn draw(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect()
    }
}

/// Composes letter numbers from the injected clock and suffix source
#[derive(Clone)]
pub struct LetterNumberGenerator {
    clock: Arc<dyn Clock>,
    suffixes: Arc<dyn SuffixSource>,
}

impl LetterNumberGenerator {
    pub fn new(clock: Arc<dyn Clock>, suffixes: Arc<dyn SuffixSource>) -> Self {
        Self { clock, suffixes }
    }

    /// Produce a number no ticket holds yet
    pub async fn generate(
        &self,
        store: &dyn LetterNumberStore,
        category: TicketCategory,
    ) -> Result<String> {
        let now = self.clock.now();
        let (start, end) = month_bounds(now)?;

        let approved = store.count_approved_between(start, end).await?;
        let sequence = approved % MAX_SEQUENCE + 1;

        let prefix = format!(
            "{:03}/{}/{}/{}/{}",
            sequence,
            INSTITUTION,
            category_code(category),
            roman_month(now.month()),
            now.year()
        );

        for attempt in 0..MAX_ATTEMPTS {
            let candidate = format!("{}/{}", prefix, self.suffixes.draw());

            if !store.letter_number_exists(&candidate).await? {
                metrics::record_letter_number(category.as_str(), u64::from(attempt));
                debug!(nomor_surat = %candidate, collisions = attempt, "Letter number generated");
                return Ok(candidate);
            }

            warn!(candidate = %candidate, attempt = attempt + 1, "Letter number collision, redrawing suffix");
        }

        Err(AppError::Internal {
            message: format!(
                "Could not allocate a unique letter number after {} attempts",
                MAX_ATTEMPTS
            ),
        })
    }
}

/// A letter number resolved to its ticket
#[derive(Debug, Clone)]
pub struct RegisteredLetter {
    pub ticket: Ticket,
    pub student: Option<UserSummary>,
    pub lecturer: Option<UserSummary>,
}

/// Lookup used by public verification
#[async_trait]
pub trait LetterRegistry: Send + Sync {
    async fn find_letter(&self, nomor_surat: &str) -> Result<Option<RegisteredLetter>>;
}

#[async_trait]
impl LetterRegistry for Repository {
    async fn find_letter(&self, nomor_surat: &str) -> Result<Option<RegisteredLetter>> {
        let Some(ticket) = self.find_ticket_by_letter_number(nomor_surat).await? else {
            return Ok(None);
        };

        let mut people = self
            .user_summaries(std::iter::once(ticket.student_id).chain(ticket.lecturer_id))
            .await?;

        Ok(Some(RegisteredLetter {
            student: people.remove(&ticket.student_id),
            lecturer: ticket.lecturer_id.and_then(|id| people.remove(&id)),
            ticket,
        }))
    }
}

/// Outcome of verifying a presented letter number
#[derive(Debug, Clone)]
pub enum Verification {
    /// Does not match the grammar; storage was not consulted
    InvalidFormat,
    /// Well formed but unknown
    NotFound,
    Valid(Box<RegisteredLetter>),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Verification::InvalidFormat => "invalid format",
            Verification::NotFound => "not found",
            Verification::Valid(_) => "valid",
        }
    }
}

/// Check a presented letter number against the grammar, then the registry
pub async fn verify(registry: &dyn LetterRegistry, code: &str) -> Result<Verification> {
    let outcome = if !is_well_formed(code) {
        Verification::InvalidFormat
    } else {
        match registry.find_letter(code).await? {
            Some(letter) => Verification::Valid(Box::new(letter)),
            None => Verification::NotFound,
        }
    };

    metrics::record_verification(outcome.reason());
    info!(nomor_surat = %code, outcome = outcome.reason(), "Letter verification");

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::clock::FixedClock;
    use chrono::TimeZone;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store: every generated number is recorded as approved now
    #[derive(Default)]
    struct MemoryStore {
        taken: Mutex<HashSet<String>>,
        approved_this_month: Mutex<u64>,
    }

    impl MemoryStore {
        fn with_count(count: u64) -> Self {
            Self {
                approved_this_month: Mutex::new(count),
                ..Default::default()
            }
        }

        fn approve(&self, number: String) {
            self.taken.lock().unwrap().insert(number);
            *self.approved_this_month.lock().unwrap() += 1;
        }
    }

    #[async_trait]
    impl LetterNumberStore for MemoryStore {
        async fn count_approved_between(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<u64> {
            Ok(*self.approved_this_month.lock().unwrap())
        }

        async fn letter_number_exists(&self, candidate: &str) -> Result<bool> {
            Ok(self.taken.lock().unwrap().contains(candidate))
        }
    }

    struct ScriptedSuffix(Mutex<VecDeque<&'static str>>);

    impl ScriptedSuffix {
        fn new(script: &[&'static str]) -> Self {
            Self(Mutex::new(script.iter().copied().collect()))
        }
    }

    impl SuffixSource for ScriptedSuffix {
        fn draw(&self) -> String {
            self.0.lock().unwrap().pop_front().unwrap_or("ZZZZZZ").to_string()
        }
    }

    /// Registry that counts lookups
    #[derive(Default)]
    struct CountingRegistry {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl LetterRegistry for CountingRegistry {
        async fn find_letter(&self, _: &str) -> Result<Option<RegisteredLetter>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn march_2025() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 14, 10, 30, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_generated_number_layout() {
        let generator = LetterNumberGenerator::new(march_2025(), Arc::new(RandomSuffix));
        let store = MemoryStore::with_count(6);

        let number = generator
            .generate(&store, TicketCategory::SuratKeterangan)
            .await
            .unwrap();

        assert!(is_well_formed(&number), "{}", number);
        assert!(number.starts_with("007/TE-UNILA/SKP/III/2025/"));
    }

    #[tokio::test]
    async fn test_category_codes() {
        let generator = LetterNumberGenerator::new(march_2025(), Arc::new(RandomSuffix));
        let store = MemoryStore::default();

        for (category, code) in [
            (TicketCategory::SuratKeterangan, "/SKP/"),
            (TicketCategory::SuratRekomendasi, "/SRK/"),
            (TicketCategory::Ijin, "/IJN/"),
            (TicketCategory::Lainnya, "/LNY/"),
        ] {
            let number = generator.generate(&store, category).await.unwrap();
            assert!(number.contains(code));
        }
    }

    #[tokio::test]
    async fn test_sequence_wraps_after_999() {
        let generator = LetterNumberGenerator::new(march_2025(), Arc::new(RandomSuffix));

        let number = generator
            .generate(&MemoryStore::with_count(998), TicketCategory::Ijin)
            .await
            .unwrap();
        assert!(number.starts_with("999/"));

        let number = generator
            .generate(&MemoryStore::with_count(999), TicketCategory::Ijin)
            .await
            .unwrap();
        assert!(number.starts_with("001/"));
    }

    #[tokio::test]
    async fn test_collision_redraws_suffix() {
        let generator = LetterNumberGenerator::new(
            march_2025(),
            Arc::new(ScriptedSuffix::new(&["AAAAAA", "AAAAAA", "BBBBBB"])),
        );
        let store = MemoryStore::default();
        store.taken
            .lock()
            .unwrap()
            .insert("001/TE-UNILA/LNY/III/2025/AAAAAA".to_string());

        let number = generator
            .generate(&store, TicketCategory::Lainnya)
            .await
            .unwrap();
        assert_eq!(number, "001/TE-UNILA/LNY/III/2025/BBBBBB");
    }

    #[tokio::test]
    async fn test_gives_up_on_stuck_suffix_source() {
        let generator = LetterNumberGenerator::new(march_2025(), Arc::new(ScriptedSuffix::new(&[])));
        let store = MemoryStore::default();
        store.taken
            .lock()
            .unwrap()
            .insert("001/TE-UNILA/IJN/III/2025/ZZZZZZ".to_string());

        let err = generator.generate(&store, TicketCategory::Ijin).await.unwrap_err();
        assert!(matches!(err, AppError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_thousand_numbers_in_one_month_are_unique() {
        let generator = LetterNumberGenerator::new(march_2025(), Arc::new(RandomSuffix));
        let store = MemoryStore::default();
        let mut seen = HashSet::new();

        for _ in 0..1000 {
            let number = generator
                .generate(&store, TicketCategory::SuratRekomendasi)
                .await
                .unwrap();
            assert!(is_well_formed(&number));
            assert!(seen.insert(number.clone()), "duplicate {}", number);
            store.approve(number);
        }

        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_month_bounds() {
        let (start, end) = month_bounds(Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap()).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_roman_months() {
        assert_eq!(roman_month(1), "I");
        assert_eq!(roman_month(4), "IV");
        assert_eq!(roman_month(9), "IX");
        assert_eq!(roman_month(12), "XII");
        assert_eq!(month_from_roman("VIII"), Some(8));
        assert_eq!(month_from_roman("XIII"), None);
    }

    #[test]
    fn test_grammar() {
        assert!(is_well_formed("001/TE-UNILA/SKP/I/2025/ABC123"));
        assert!(!is_well_formed("1/TE-UNILA/SKP/I/2025/ABC123"));
        assert!(!is_well_formed("001/TE-ITB/SKP/I/2025/ABC123"));
        assert!(!is_well_formed("001/TE-UNILA/XYZ/I/2025/ABC123"));
        assert!(!is_well_formed("001/TE-UNILA/SKP/I/2025/abc123"));
        assert!(!is_well_formed("001/TE-UNILA/SKP/I/2025/ABC1234"));
        assert!(!is_well_formed(" 001/TE-UNILA/SKP/I/2025/ABC123"));
    }

    #[test]
    fn test_parse() {
        let parsed = parse("012/TE-UNILA/SRK/VII/2024/Q1W2E3").unwrap();
        assert_eq!(parsed.sequence, "012");
        assert_eq!(parsed.sequence_number, Some(12));
        assert_eq!(parsed.institution, "TE-UNILA");
        assert_eq!(parsed.category_name, "Surat Rekomendasi");
        assert_eq!(parsed.month_number, Some(7));
        assert_eq!(parsed.year, "2024");
        assert_eq!(parsed.unique_code, "Q1W2E3");

        let odd = parse("x/y/ABC/Q/2024/z").unwrap();
        assert_eq!(odd.category_name, "Unknown");
        assert_eq!(odd.month_number, None);
        assert_eq!(odd.sequence_number, None);

        assert!(parse("001/TE-UNILA/SKP/I/2025").is_none());
        assert!(parse("001/TE-UNILA/SKP/I/2025/ABC123/extra").is_none());
    }

    #[tokio::test]
    async fn test_verify_malformed_skips_lookup() {
        let registry = CountingRegistry::default();

        let outcome = verify(&registry, "not-a-letter").await.unwrap();
        assert!(matches!(outcome, Verification::InvalidFormat));
        assert_eq!(outcome.reason(), "invalid format");
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 0);

        let outcome = verify(&registry, "001/TE-UNILA/SKP/I/2025/ABC123").await.unwrap();
        assert!(matches!(outcome, Verification::NotFound));
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 1);
    }
}
