//! Company lookups and flattening into [`CompanyRow`]s.

use chrono::NaiveDateTime;
use hsync_core::{CompanyRow, RawRecord};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::shape::{array_at, at, i64_at, str_at};
use crate::{ClientError, GraphqlClient, OperationDocument, ResponseOutcome};

pub const COMPANY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl GraphqlClient {
    /// Runs a `getCompaniesByIds` document and returns the response envelope as received.
    /// GraphQL errors are reported but do not fail the call.
    pub async fn companies_by_ids(&self, document: &OperationDocument) -> Result<JsonValue, ClientError> {
        match self.execute(document).await {
            ResponseOutcome::Success(data) => Ok(json!({ "data": data })),
            ResponseOutcome::Partial { data, failure } => {
                warn!(detail = %failure.detail, "companies lookup returned errors");
                Ok(json!({ "data": data, "errors": failure.detail }))
            }
            ResponseOutcome::Fatal(err) => Err(err),
        }
    }
}

/// Flattens one company entity.
pub fn flatten_company(company: &JsonValue, now: NaiveDateTime) -> CompanyRow {
    let text = |path: &[&str]| str_at(company, path).map(str::to_string);

    let founders = array_at(company, &["person_relationships_founders_and_ceos"]);
    let ceo_ids = founders.iter().filter_map(|p| i64_at(p, &["id"])).collect();
    let ceo_names = founders
        .iter()
        .filter_map(|p| str_at(p, &["fullName"]).map(str::to_string))
        .collect();
    let ceo_linkedin_urls = founders
        .iter()
        .filter_map(|p| str_at(p, &["socials", "linkedin", "url"]))
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect();

    CompanyRow {
        company_id: i64_at(company, &["id"]),
        entity_urn: text(&["entityUrn"]),
        name: text(&["name"]),
        description: text(&["description"]),
        short_description: text(&["shortDescription"]),
        headcount: i64_at(company, &["headcount"]),
        funding_stage: text(&["funding", "fundingStage"]),
        funding_total: i64_at(company, &["funding", "fundingTotal"]),
        last_funding_type: text(&["funding", "lastFundingType"]),
        last_funding_date: text(&["funding", "lastFundingAt"]),
        founding_date: text(&["foundingDate", "date"]),
        created_at: text(&["initializedDate"]),
        updated_at: text(&["updatedAt"]),
        logo_url: text(&["logoUrl"]),
        website_url: text(&["website", "url"]),
        website_domain: text(&["website", "domain"]),
        redirect_urn: text(&["redirectUrn"]),
        user_notes: text(&["userNotes"]),
        team_notes: text(&["teamNotes"]),
        legal_name: text(&["legal_name"]),
        external_description: text(&["external_description"]),
        city: text(&["location", "city"]),
        state: text(&["location", "state"]),
        country: text(&["location", "country"]),
        ceo_ids,
        ceo_linkedin_urls,
        ceo_names,
        timestamp: now.format(COMPANY_TIMESTAMP_FORMAT).to_string(),
    }
}

/// Company entities in a `getCompaniesByIds` response, a saved-search response, or a
/// `{"companies": [edge, ...]}` listing output.
pub fn company_entities(response: &JsonValue) -> Vec<&JsonValue> {
    if let Some(companies) = at(response, &["data", "getCompaniesByIds"]).and_then(JsonValue::as_array) {
        return companies.iter().collect();
    }
    let edges = match at(response, &["companies"]).and_then(JsonValue::as_array) {
        Some(edges) => edges.as_slice(),
        None => array_at(response, &["data", "getSavedSearch", "results", "edges"]),
    };
    edges
        .iter()
        .filter_map(|edge| at(edge, &["node", "entity"]))
        .collect()
}

pub fn flatten_companies(response: &JsonValue, now: NaiveDateTime) -> Vec<CompanyRow> {
    let rows: Vec<CompanyRow> = company_entities(response)
        .into_iter()
        .map(|company| flatten_company(company, now))
        .collect();
    info!(companies = rows.len(), "flattened companies");
    rows
}

/// Company ids from fetched saved-search edges (or any shape [`company_entities`] accepts).
pub fn company_ids(response: &JsonValue) -> Vec<i64> {
    company_entities(response)
        .into_iter()
        .filter_map(|company| i64_at(company, &["id"]))
        .filter(|id| *id != 0)
        .collect()
}

/// Company ids straight from a list of listing edges.
pub fn company_ids_from_edges(edges: &[RawRecord]) -> Vec<i64> {
    company_ids(&json!({ "companies": edges }))
}
