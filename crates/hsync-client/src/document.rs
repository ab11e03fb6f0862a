//! GraphQL operation documents: `{operationName, variables, query}` payloads kept on disk or
//! compiled in for the detail queries.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tokio::fs;
use tracing::info;

use crate::ClientError;

pub const CURSOR_VARIABLE: &str = "after";

const EDUCATION_QUERY: &str = include_str!("../queries/get_person_education.graphql");
const EXPERIENCE_QUERY: &str = include_str!("../queries/get_person_experience.graphql");
const PROFILE_HEADER_QUERY: &str = include_str!("../queries/get_person_profile_header.graphql");
const LINKEDIN_QUERY: &str = include_str!("../queries/get_person_linkedin.graphql");
const TYPEAHEAD_QUERY: &str = include_str!("../queries/typeahead_search_with_investors.graphql");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDocument {
    pub operation_name: String,
    #[serde(default)]
    pub variables: Map<String, JsonValue>,
    pub query: String,
}

impl OperationDocument {
    pub fn new(operation_name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            variables: Map::new(),
            query: query.into(),
        }
    }

    pub fn person_education(person_id: i64) -> Self {
        Self::new("GetPersonEducation", EDUCATION_QUERY).with_variable("id", json!(person_id))
    }

    pub fn person_experience(person_id: i64) -> Self {
        Self::new("GetPersonExperience", EXPERIENCE_QUERY).with_variable("id", json!(person_id))
    }

    pub fn person_profile_header(person_id: i64) -> Self {
        Self::new("GetPersonProfileHeader", PROFILE_HEADER_QUERY)
            .with_variable("id", json!(person_id))
    }

    pub fn person_linkedin(person_id: i64) -> Self {
        Self::new("GetPersonLinkedIn", LINKEDIN_QUERY).with_variable("id", json!(person_id))
    }

    pub fn typeahead_search(query: &str) -> Self {
        Self::new("TypeaheadSearchWithInvestors", TYPEAHEAD_QUERY)
            .with_variable("query", json!(query))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
    }

    /// Writes the document as pretty JSON. With `backup`, an existing file is first moved to
    /// `<path>.backup`.
    pub async fn save(&self, path: impl AsRef<Path>, backup: bool) -> Result<()> {
        let path = path.as_ref();
        if backup && fs::metadata(path).await.is_ok() {
            let backup_path = backup_path(path);
            fs::rename(path, &backup_path).await.with_context(|| {
                format!("moving {} -> {}", path.display(), backup_path.display())
            })?;
            info!(backup = %backup_path.display(), "backup created");
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self).context("serializing operation document")?;
        fs::write(path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "operation document saved");
        Ok(())
    }

    pub fn with_variable(mut self, name: &str, value: JsonValue) -> Self {
        self.set_variable(name, value);
        self
    }

    pub fn set_variable(&mut self, name: &str, value: JsonValue) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&JsonValue> {
        self.variables.get(name)
    }

    pub fn cursor(&self) -> Option<&str> {
        self.variable(CURSOR_VARIABLE).and_then(JsonValue::as_str)
    }

    pub fn set_cursor(&mut self, cursor: &str) {
        self.set_variable(CURSOR_VARIABLE, json!(cursor));
    }

    /// Points a saved-search document at `saved_search_id`. The id is always sent as a string.
    pub fn with_saved_search_id(&mut self, saved_search_id: impl Display) -> Result<(), ClientError> {
        let Some(slot) = self.variables.get_mut("idOrUrn") else {
            return Err(ClientError::InvalidDocument(format!(
                "{} has no idOrUrn variable",
                self.operation_name
            )));
        };
        *slot = JsonValue::String(saved_search_id.to_string());
        info!(saved_search_id = %saved_search_id, "querying saved search");
        Ok(())
    }

    /// Appends ids not already present in `variables.ids`; returns the resulting id count.
    pub fn add_company_ids(&mut self, ids: &[i64]) -> Result<usize, ClientError> {
        let operation = self.operation_name.clone();
        let Some(existing) = self
            .variables
            .get_mut("ids")
            .and_then(JsonValue::as_array_mut)
        else {
            return Err(ClientError::InvalidDocument(format!(
                "{operation} has no ids list variable"
            )));
        };
        for id in ids {
            let value = json!(id);
            if !existing.contains(&value) {
                existing.push(value);
            }
        }
        info!(added = ids.len(), total = existing.len(), "company ids updated");
        Ok(existing.len())
    }

    pub fn to_payload(&self) -> JsonValue {
        json!({
            "operationName": self.operation_name,
            "variables": self.variables,
            "query": self.query,
        })
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}
