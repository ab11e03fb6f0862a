//! Core domain model shared by the fetch pipeline and the warehouse sync.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "hsync-core";

/// One fetched entity (company, person, edge) exactly as the upstream service returned it.
pub type RawRecord = serde_json::Value;

/// Result of a single paginated request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub total_count: Option<u64>,
    pub has_next: bool,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cursor for the following page, present only when another page is confirmed available.
    pub fn continuation(&self) -> Option<&str> {
        if self.has_next {
            self.next_cursor.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalReason {
    Exhausted,
    PageLimitReached,
    Error,
    Cancelled,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Exhausted => "exhausted",
            Self::PageLimitReached => "page-limit-reached",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Receipt for one durable batch write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWriteResult {
    pub sequence: u32,
    pub location: String,
    pub record_count: usize,
    pub content_hash: String,
}

/// Aggregate of a whole paginated fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub total_count: Option<u64>,
    pub records: Vec<RawRecord>,
    pub pages_fetched: u32,
    pub terminal_reason: TerminalReason,
    pub batches: Vec<BatchWriteResult>,
    pub consolidated: Option<String>,
    pub error: Option<String>,
}

impl FetchResult {
    pub fn records_fetched(&self) -> usize {
        self.records.len()
    }

    /// True when the run ended in error before a single record came back.
    pub fn is_total_failure(&self) -> bool {
        self.terminal_reason == TerminalReason::Error && self.records.is_empty()
    }
}

/// Scalar or list-of-scalar cell value of a destination row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl ColumnValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<String>> for ColumnValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Flat destination row: column name to value. Columns serialize in sorted order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncRow(BTreeMap<String, ColumnValue>);

impl SyncRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<ColumnValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<ColumnValue>) {
        self.0.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.0.get(column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(ColumnValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Warehouse tables written by the sync step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationTable {
    Mapping,
    Education,
    Experience,
    Profile,
}

impl DestinationTable {
    /// Content tables, in the order they are synced after the mapping.
    pub const CONTENT: [DestinationTable; 3] = [Self::Education, Self::Experience, Self::Profile];

    pub fn table_name(self) -> &'static str {
        match self {
            Self::Mapping => "linkedin_harmonic_mapping",
            Self::Education => "linkedin_education",
            Self::Experience => "linkedin_experience",
            Self::Profile => "linkedin_profile",
        }
    }

    /// Row column that carries the natural key.
    pub fn natural_key_column(self) -> &'static str {
        match self {
            Self::Mapping => "linkedin_id",
            _ => "linkedinId",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Mapping => "Mapping",
            Self::Education => "Education",
            Self::Experience => "Experience",
            Self::Profile => "Profile",
        }
    }
}

/// A (destination table, natural key) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTarget {
    pub table: DestinationTable,
    pub natural_key: String,
}

impl SyncTarget {
    pub fn new(table: DestinationTable, natural_key: impl Into<String>) -> Self {
        Self {
            table,
            natural_key: natural_key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Inserted,
    Skipped,
    DryRun,
    Failed,
}

/// Outcome of syncing one destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: DestinationTable,
    pub exists: bool,
    pub status: SyncStatus,
    pub inserted: usize,
    pub rows: Vec<SyncRow>,
    pub errors: Vec<String>,
}

impl TableReport {
    pub fn skipped(table: DestinationTable) -> Self {
        Self {
            table,
            exists: true,
            status: SyncStatus::Skipped,
            inserted: 0,
            rows: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn failed(table: DestinationTable, error: String) -> Self {
        Self {
            table,
            exists: false,
            status: SyncStatus::Failed,
            inserted: 0,
            rows: Vec::new(),
            errors: vec![error],
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == SyncStatus::Skipped
    }
}

/// Per-entity sync summary; tables appear in the order they were processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub entity_id: i64,
    pub natural_key: String,
    pub tables: Vec<TableReport>,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn new(entity_id: i64, natural_key: impl Into<String>) -> Self {
        Self {
            entity_id,
            natural_key: natural_key.into(),
            tables: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn table(&self, table: DestinationTable) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn total_inserted(&self) -> usize {
        self.tables.iter().map(|t| t.inserted).sum()
    }
}

/// Person detail gathered from independent sub-fetches; failed parts are listed in `errors`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FullProfile {
    pub person_id: i64,
    pub highlights: Vec<String>,
    pub education: Vec<RawRecord>,
    pub experience: Vec<RawRecord>,
    pub errors: Vec<String>,
}

impl FullProfile {
    pub fn new(person_id: i64) -> Self {
        Self {
            person_id,
            ..Self::default()
        }
    }

    /// Records a failed sub-fetch as `"<Part>: <error>"`.
    pub fn record_failure(&mut self, part: ProfilePart, error: impl fmt::Display) {
        self.errors.push(format!("{}: {error}", part.label()));
    }

    pub fn part_failed(&self, part: ProfilePart) -> bool {
        let prefix = format!("{}: ", part.label());
        self.errors.iter().any(|e| e.starts_with(&prefix))
    }

    /// Neither education nor experience came back, so there is nothing to sync.
    pub fn is_total_failure(&self) -> bool {
        self.part_failed(ProfilePart::Education) && self.part_failed(ProfilePart::Experience)
    }
}

/// Independently fetched sections of a person profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilePart {
    Highlights,
    Education,
    Experience,
}

impl ProfilePart {
    pub fn label(self) -> &'static str {
        match self {
            Self::Highlights => "Highlights",
            Self::Education => "Education",
            Self::Experience => "Experience",
        }
    }
}

/// Natural key to upstream entity association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonMapping {
    pub natural_key: String,
    pub entity_id: i64,
    pub display_name: Option<String>,
}

impl PersonMapping {
    pub fn profile_url(&self) -> String {
        format!("https://linkedin.com/in/{}", self.natural_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationCategory {
    AuthFailure,
    ApiError,
}

impl NotificationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailure => "auth-failure",
            Self::ApiError => "api-error",
        }
    }

    /// De-duplication key: one notification per category per calendar day.
    pub fn unique_key(self, day: NaiveDate) -> String {
        let stem = match self {
            Self::AuthFailure => "harmonic_auth_error",
            Self::ApiError => "harmonic_api_error",
        };
        format!("{stem}_{}", day.format("%Y-%m-%d"))
    }
}

/// Flattened company record used for JSON/Parquet export.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompanyRow {
    pub company_id: Option<i64>,
    pub entity_urn: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub headcount: Option<i64>,
    pub funding_stage: Option<String>,
    pub funding_total: Option<i64>,
    pub last_funding_type: Option<String>,
    pub last_funding_date: Option<String>,
    pub founding_date: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub logo_url: Option<String>,
    pub website_url: Option<String>,
    pub website_domain: Option<String>,
    pub redirect_urn: Option<String>,
    pub user_notes: Option<String>,
    pub team_notes: Option<String>,
    pub legal_name: Option<String>,
    pub external_description: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub ceo_ids: Vec<i64>,
    pub ceo_linkedin_urls: Vec<String>,
    pub ceo_names: Vec<String>,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_requires_has_next() {
        let page = Page {
            has_next: false,
            next_cursor: Some("abc".into()),
            ..Page::empty()
        };
        assert_eq!(page.continuation(), None);

        let page = Page {
            has_next: true,
            next_cursor: Some("abc".into()),
            ..Page::empty()
        };
        assert_eq!(page.continuation(), Some("abc"));
    }

    #[test]
    fn sync_row_serializes_untagged_values_in_column_order() {
        let row = SyncRow::new()
            .with("student", false)
            .with("degreeName", None::<String>)
            .with("linkedinId", "jane-doe")
            .with("tags", vec!["a".to_string()]);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(
            json,
            r#"{"degreeName":null,"linkedinId":"jane-doe","student":false,"tags":["a"]}"#
        );
        let back: SyncRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn total_failure_needs_both_education_and_experience() {
        let mut profile = FullProfile::new(1);
        profile.record_failure(ProfilePart::Highlights, "HTTP 401");
        profile.record_failure(ProfilePart::Education, "HTTP 401");
        assert!(profile.part_failed(ProfilePart::Education));
        assert!(!profile.part_failed(ProfilePart::Experience));
        assert!(!profile.is_total_failure());

        profile.record_failure(ProfilePart::Experience, "HTTP 401");
        assert!(profile.is_total_failure());
        assert_eq!(profile.errors[2], "Experience: HTTP 401");
    }

    #[test]
    fn notification_keys_are_scoped_by_category_and_day() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(
            NotificationCategory::AuthFailure.unique_key(day),
            "harmonic_auth_error_2026-03-01"
        );
        assert_eq!(
            NotificationCategory::ApiError.unique_key(day),
            "harmonic_api_error_2026-03-01"
        );
    }

    #[test]
    fn terminal_reason_uses_kebab_labels() {
        assert_eq!(TerminalReason::PageLimitReached.to_string(), "page-limit-reached");
        assert_eq!(
            serde_json::to_string(&TerminalReason::PageLimitReached).unwrap(),
            "\"page-limit-reached\""
        );
    }
}
