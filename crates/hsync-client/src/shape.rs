//! Optional-field accessors over response JSON.
//!
//! Every nested path the client reads lives here or next to the operation that owns it, and
//! every accessor returns `None` (or an empty slice) for missing keys, `null`s and wrong types.

use hsync_core::Page;
use hsync_storage::BatchLayout;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Value at `path`, treating JSON `null` like an absent key.
pub fn at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut current = value;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

pub fn str_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    at(value, path)?.as_str()
}

pub fn i64_at(value: &JsonValue, path: &[&str]) -> Option<i64> {
    let found = at(value, path)?;
    found
        .as_i64()
        .or_else(|| found.as_f64().map(|f| f as i64))
}

pub fn u64_at(value: &JsonValue, path: &[&str]) -> Option<u64> {
    at(value, path)?.as_u64()
}

pub fn bool_at(value: &JsonValue, path: &[&str]) -> Option<bool> {
    at(value, path)?.as_bool()
}

pub fn array_at<'a>(value: &'a JsonValue, path: &[&str]) -> &'a [JsonValue] {
    at(value, path)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Paginated listing operations and where their connection object sits in `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingKind {
    SavedSearchCompanies,
    PeopleSearch,
}

impl ListingKind {
    pub fn root_path(self) -> &'static [&'static str] {
        match self {
            Self::SavedSearchCompanies => &["getSavedSearch", "results"],
            Self::PeopleSearch => &["searchPeople"],
        }
    }

    pub fn layout(self) -> BatchLayout {
        match self {
            Self::SavedSearchCompanies => BatchLayout::COMPANIES,
            Self::PeopleSearch => BatchLayout::PEOPLE,
        }
    }

    /// Plural noun for progress output.
    pub fn noun(self) -> &'static str {
        match self {
            Self::SavedSearchCompanies => "companies",
            Self::PeopleSearch => "people",
        }
    }

    /// Reads edges, total count and page info from a `data` object. Anything missing gives
    /// an empty page with `has_next = false`.
    pub fn extract_page(self, data: &JsonValue) -> Page {
        let Some(root) = at(data, self.root_path()) else {
            return Page::empty();
        };
        Page {
            records: array_at(root, &["edges"]).to_vec(),
            total_count: u64_at(root, &["totalCount"]),
            has_next: bool_at(root, &["pageInfo", "hasNextPage"]).unwrap_or(false),
            next_cursor: str_at(root, &["pageInfo", "endCursor"]).map(str::to_string),
        }
    }
}
