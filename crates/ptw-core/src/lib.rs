//! Core domain model for PTW: tender records, business-line configuration,
//! run modes, and the dedup helpers shared by the extraction pipeline.

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "ptw-core";

/// One procurement opportunity as reported by the remote source.
///
/// `tender_id` is assigned by the source and is only unique within a
/// business line; dedup identity is the (tender_id, business line) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderRecord {
    pub tender_id: i64,
    pub code: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
    pub organization: String,
    pub organization_unit: Option<String>,
    pub status_code: i32,
    pub status_label: String,
    pub available_amount: Option<f64>,
    pub currency: Option<String>,
    pub supplier_count: Option<u32>,
}

/// A `TenderRecord` augmented with extraction metadata at persistence time.
/// Created exactly once per (tender_id, business line) pair and never
/// updated in place; only the retention sweep removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTenderRecord {
    pub record: TenderRecord,
    pub business_line: String,
    pub query_name: String,
    pub extracted_at: DateTime<Utc>,
    pub public_link: String,
}

impl StoredTenderRecord {
    pub fn new(
        record: TenderRecord,
        business_line: impl Into<String>,
        query_name: impl Into<String>,
        extracted_at: DateTime<Utc>,
        link_base: &str,
    ) -> Self {
        let public_link = public_link(link_base, &record.code);
        Self {
            record,
            business_line: business_line.into(),
            query_name: query_name.into(),
            extracted_at,
            public_link,
        }
    }
}

/// Derive the public detail-page link from a tender code.
pub fn public_link(base: &str, code: &str) -> String {
    format!("{}?code={}", base.trim_end_matches(['/', '?']), code)
}

/// One named filter set submitted to the remote source. The date range is
/// injected by the orchestrator per run and is deliberately absent here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    pub name: String,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Static per-business-line configuration, loaded once at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessLine {
    pub id: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub queries: Vec<QueryConfig>,
    pub recipients: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Extract the current calendar day only.
    Routine,
    /// Extract from the configured historical start through today.
    Backfill,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("date range start {from} is after end {to}")]
    StartAfterEnd { from: NaiveDate, to: NaiveDate },
}

/// Calendar-date extraction window, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, DateRangeError> {
        let range = Self { from, to };
        range.validate()?;
        Ok(range)
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    pub fn validate(&self) -> Result<(), DateRangeError> {
        if self.from > self.to {
            return Err(DateRangeError::StartAfterEnd {
                from: self.from,
                to: self.to,
            });
        }
        Ok(())
    }

    /// Range for a run mode: routine covers `today` only, backfill covers
    /// `backfill_start` through `today`.
    pub fn for_mode(
        mode: RunMode,
        today: NaiveDate,
        backfill_start: NaiveDate,
    ) -> Result<Self, DateRangeError> {
        match mode {
            RunMode::Routine => Ok(Self::single_day(today)),
            RunMode::Backfill => Self::new(backfill_start, today),
        }
    }

    /// Human-readable label used in digest subjects.
    pub fn label(&self) -> String {
        if self.from == self.to {
            self.from.format("%Y-%m-%d").to_string()
        } else {
            format!(
                "{} to {}",
                self.from.format("%Y-%m-%d"),
                self.to.format("%Y-%m-%d")
            )
        }
    }
}

/// Per-business-line outcome of one extraction run. Ephemeral: reported and
/// logged, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub business_line: String,
    pub total_found: usize,
    pub newly_stored: usize,
    pub ran_at: DateTime<Utc>,
    pub queries: Vec<String>,
}

impl ExtractionSummary {
    /// Zero-valued summary recorded when a business line fails outright.
    pub fn empty(
        business_line: impl Into<String>,
        queries: Vec<String>,
        ran_at: DateTime<Utc>,
    ) -> Self {
        Self {
            business_line: business_line.into(),
            total_found: 0,
            newly_stored: 0,
            ran_at,
            queries,
        }
    }
}

/// Stable, order-preserving dedup: keeps the first item for each key and
/// drops later duplicates regardless of content differences.
pub fn dedup_first_by<T, K, F>(items: Vec<T>, mut key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::with_capacity(items.len());
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// Dedup a batch of tender records by `tender_id`, first occurrence wins.
pub fn dedup_by_tender_id(records: Vec<TenderRecord>) -> Vec<TenderRecord> {
    dedup_first_by(records, |r| r.tender_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tender_id: i64, title: &str) -> TenderRecord {
        TenderRecord {
            tender_id,
            code: format!("{tender_id}-LE26"),
            title: title.to_string(),
            published_at: None,
            closes_at: None,
            organization: "Ministry of Public Works".to_string(),
            organization_unit: None,
            status_code: 5,
            status_label: "published".to_string(),
            available_amount: Some(1200.0),
            currency: Some("CLP".to_string()),
            supplier_count: Some(3),
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence_and_preserves_order() {
        let input = vec![
            record(1, "first"),
            record(2, "second"),
            record(2, "second-again"),
            record(3, "third"),
            record(1, "first-again"),
        ];
        let deduped = dedup_by_tender_id(input);
        assert_eq!(
            deduped.iter().map(|r| r.tender_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(deduped[1].title, "second");
    }

    #[test]
    fn dedup_output_never_grows() {
        let input = vec![record(7, "a"), record(7, "b"), record(7, "c")];
        let len = input.len();
        let deduped = dedup_by_tender_id(input);
        assert!(deduped.len() <= len);
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        let from = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 8, 29).unwrap();
        assert_eq!(
            DateRange::new(from, to),
            Err(DateRangeError::StartAfterEnd { from, to })
        );
    }

    #[test]
    fn range_for_routine_mode_is_a_single_day() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let range = DateRange::for_mode(RunMode::Routine, today, start).unwrap();
        assert_eq!(range.from, today);
        assert_eq!(range.to, today);
        assert_eq!(range.label(), "2026-08-30");
    }

    #[test]
    fn range_for_backfill_mode_spans_history() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let range = DateRange::for_mode(RunMode::Backfill, today, start).unwrap();
        assert_eq!(range.from, start);
        assert_eq!(range.to, today);
        assert_eq!(range.label(), "2024-01-01 to 2026-08-30");
    }

    #[test]
    fn public_link_appends_code_as_query_parameter() {
        assert_eq!(
            public_link("https://tenders.example.gov/detail/", "4077-12-LE26"),
            "https://tenders.example.gov/detail?code=4077-12-LE26"
        );
    }

    #[test]
    fn stored_record_carries_extraction_metadata() {
        let now = Utc::now();
        let stored = StoredTenderRecord::new(
            record(9, "bridge maintenance"),
            "infrastructure",
            "bridges",
            now,
            "https://tenders.example.gov/detail",
        );
        assert_eq!(stored.business_line, "infrastructure");
        assert_eq!(stored.query_name, "bridges");
        assert_eq!(stored.extracted_at, now);
        assert!(stored.public_link.ends_with("?code=9-LE26"));
    }
}
