//! Natural key to upstream person resolution.

use std::sync::Arc;

use anyhow::Result;
use hsync_client::shape::{i64_at, str_at};
use hsync_client::{extract_natural_key, GraphqlClient};
use hsync_core::{FullProfile, PersonMapping, RawRecord};
use serde::Serialize;
use strsim::jaro_winkler;
use tracing::{debug, info, warn};

use crate::warehouse::Warehouse;

/// Candidates verified against their recorded LinkedIn URL per resolution.
pub const MAX_VERIFIED_CANDIDATES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupReport {
    pub input: String,
    pub natural_key: String,
    pub entity_id: Option<i64>,
    pub display_name: Option<String>,
    pub found_in_mapping: bool,
    pub profile: Option<FullProfile>,
    pub errors: Vec<String>,
}

/// Search query derived from a natural key: separators become spaces, trailing digits go.
pub fn search_query_from_key(natural_key: &str) -> String {
    natural_key
        .replace(['-', '_'], " ")
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .trim()
        .to_string()
}

/// Typeahead people ordered by how closely their name resembles `query`; ties keep search order.
pub fn rank_candidates(query: &str, people: Vec<RawRecord>) -> Vec<RawRecord> {
    let query = query.to_lowercase();
    let mut scored: Vec<(f64, RawRecord)> = people
        .into_iter()
        .map(|person| {
            let name = str_at(&person, &["fullName"]).unwrap_or_default().to_lowercase();
            (jaro_winkler(&query, &name), person)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, person)| person).collect()
}

pub struct PersonResolver {
    client: GraphqlClient,
    warehouse: Arc<dyn Warehouse>,
}

impl PersonResolver {
    pub fn new(client: GraphqlClient, warehouse: Arc<dyn Warehouse>) -> Self {
        Self { client, warehouse }
    }

    /// Mapping table first, then a typeahead search whose candidates are confirmed by
    /// comparing their LinkedIn URL with `natural_key`.
    pub async fn resolve(&self, natural_key: &str) -> Result<Option<PersonMapping>> {
        if let Some(mapping) = self.warehouse.find_by_natural_key(natural_key).await? {
            debug!(natural_key, entity_id = mapping.entity_id, "resolved from mapping");
            return Ok(Some(mapping));
        }
        Ok(self.resolve_by_search(natural_key).await)
    }

    async fn search_people(&self, query: &str) -> Vec<RawRecord> {
        match self.client.typeahead_search(query).await {
            Ok(results) => results.people,
            Err(err) => {
                warn!(query, error = %err, "people search failed");
                Vec::new()
            }
        }
    }

    async fn resolve_by_search(&self, natural_key: &str) -> Option<PersonMapping> {
        let mut query = natural_key.to_string();
        let mut people = self.search_people(&query).await;
        if people.is_empty() {
            query = search_query_from_key(natural_key);
            if !query.is_empty() {
                people = self.search_people(&query).await;
            }
        }

        for person in rank_candidates(&query, people)
            .into_iter()
            .take(MAX_VERIFIED_CANDIDATES)
        {
            let Some(entity_id) = i64_at(&person, &["id"]) else {
                continue;
            };
            let identity = match self.client.linkedin_identity(entity_id).await {
                Ok(Some(identity)) => identity,
                Ok(None) => continue,
                Err(err) => {
                    debug!(entity_id, error = %err, "candidate check failed");
                    continue;
                }
            };
            if identity.natural_key.eq_ignore_ascii_case(natural_key) {
                let display_name = str_at(&person, &["fullName"])
                    .map(str::to_string)
                    .or(identity.full_name);
                info!(natural_key, entity_id, name = ?display_name, "found match");
                return Some(PersonMapping {
                    natural_key: natural_key.to_string(),
                    entity_id,
                    display_name,
                });
            }
        }
        None
    }

    /// Resolves a LinkedIn URL or id and fetches the full profile of the match.
    pub async fn lookup(&self, url_or_id: &str) -> LookupReport {
        let natural_key = extract_natural_key(url_or_id);
        let mut report = LookupReport {
            input: url_or_id.to_string(),
            natural_key: natural_key.clone(),
            entity_id: None,
            display_name: None,
            found_in_mapping: false,
            profile: None,
            errors: Vec::new(),
        };

        let mapping = match self.warehouse.find_by_natural_key(&natural_key).await {
            Ok(Some(mapping)) => {
                report.found_in_mapping = true;
                Some(mapping)
            }
            Ok(None) => self.resolve_by_search(&natural_key).await,
            Err(err) => {
                report.errors.push(format!("Mapping lookup failed: {err:#}"));
                self.resolve_by_search(&natural_key).await
            }
        };
        let Some(mapping) = mapping else {
            report
                .errors
                .push(format!("No Harmonic mapping found for LinkedIn ID: {natural_key}"));
            return report;
        };

        report.entity_id = Some(mapping.entity_id);
        report.display_name = mapping.display_name;
        let profile = self.client.full_profile(mapping.entity_id).await;
        report.errors.extend(profile.errors.iter().cloned());
        report.profile = Some(profile);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_query_strips_separators_and_trailing_digits() {
        assert_eq!(search_query_from_key("daniel-sun-440493171"), "daniel sun");
        assert_eq!(search_query_from_key("jane_doe"), "jane doe");
        assert_eq!(search_query_from_key("12345"), "");
    }

    #[test]
    fn candidates_ranked_by_name_similarity() {
        let people = vec![
            json!({"id": 1, "fullName": "Robert Brown"}),
            json!({"id": 2, "fullName": "Daniel Sun"}),
            json!({"id": 3}),
        ];
        let ranked = rank_candidates("daniel sun", people);
        let ids: Vec<_> = ranked.iter().filter_map(|p| i64_at(p, &["id"])).collect();
        assert_eq!(ids[0], 2);
        assert_eq!(ranked.len(), 3);
    }
}
