//! Person detail operations and natural-key helpers.

use hsync_core::{FullProfile, ProfilePart, RawRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::shape::{array_at, str_at};
use crate::{ClientError, GraphqlClient, OperationDocument, ResponseOutcome};

const PERSON: &str = "getPersonById";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedinIdentity {
    pub natural_key: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeaheadResults {
    pub people: Vec<RawRecord>,
    pub companies: Vec<RawRecord>,
    pub investors: Vec<RawRecord>,
}

impl TypeaheadResults {
    pub fn from_data(data: &JsonValue) -> Self {
        Self {
            people: array_at(data, &["getPeopleWithTypeahead"]).to_vec(),
            companies: array_at(data, &["getCompaniesWithTypeahead"]).to_vec(),
            investors: array_at(data, &["getInvestorsWithTypeahead", "investors"]).to_vec(),
        }
    }
}

impl GraphqlClient {
    /// The `getPersonById` object of the education query.
    pub async fn person_education(&self, person_id: i64) -> Result<JsonValue, ClientError> {
        let data = self
            .execute_strict(&OperationDocument::person_education(person_id))
            .await?;
        Ok(person_object(data))
    }

    pub async fn education(&self, person_id: i64) -> Result<Vec<RawRecord>, ClientError> {
        let person = self.person_education(person_id).await?;
        Ok(array_at(&person, &["education"]).to_vec())
    }

    /// The `getPersonById` object of the experience query.
    pub async fn person_experience(&self, person_id: i64) -> Result<JsonValue, ClientError> {
        let data = self
            .execute_strict(&OperationDocument::person_experience(person_id))
            .await?;
        Ok(person_object(data))
    }

    pub async fn experience(&self, person_id: i64) -> Result<Vec<RawRecord>, ClientError> {
        let person = self.person_experience(person_id).await?;
        Ok(array_at(&person, &["experience"]).to_vec())
    }

    /// Distinct highlight categories in first-seen order. A response carrying GraphQL errors
    /// yields an empty list rather than an error.
    pub async fn highlights(&self, person_id: i64) -> Result<Vec<String>, ClientError> {
        let data = match self
            .execute(&OperationDocument::person_profile_header(person_id))
            .await
        {
            ResponseOutcome::Success(data) => data,
            ResponseOutcome::Partial { .. } | ResponseOutcome::Fatal(ClientError::Api { .. }) => {
                return Ok(Vec::new())
            }
            ResponseOutcome::Fatal(err) => return Err(err),
        };
        let mut categories: Vec<String> = Vec::new();
        for highlight in array_at(&data, &[PERSON, "highlights"]) {
            let Some(category) = str_at(highlight, &["category"]).filter(|c| !c.is_empty()) else {
                continue;
            };
            if !categories.iter().any(|c| c == category) {
                categories.push(category.to_string());
            }
        }
        Ok(categories)
    }

    /// LinkedIn identity recorded upstream for a person. GraphQL errors are reported to the
    /// notifier but whatever data came back is still used.
    pub async fn linkedin_identity(&self, person_id: i64) -> Result<Option<LinkedinIdentity>, ClientError> {
        let data = match self
            .execute(&OperationDocument::person_linkedin(person_id))
            .await
        {
            ResponseOutcome::Success(data) | ResponseOutcome::Partial { data, .. } => data,
            ResponseOutcome::Fatal(err) => return Err(err),
        };
        let full_name = str_at(&data, &[PERSON, "fullName"]).map(str::to_string);
        Ok(str_at(&data, &[PERSON, "socials", "linkedin", "url"])
            .map(natural_key_from_profile_url)
            .filter(|key| !key.is_empty())
            .map(|natural_key| LinkedinIdentity {
                natural_key,
                full_name,
            }))
    }

    pub async fn typeahead_search(&self, query: &str) -> Result<TypeaheadResults, ClientError> {
        let data = self
            .execute_strict(&OperationDocument::typeahead_search(query))
            .await?;
        let results = TypeaheadResults::from_data(&data);
        debug!(
            query,
            people = results.people.len(),
            companies = results.companies.len(),
            investors = results.investors.len(),
            "typeahead results"
        );
        Ok(results)
    }

    /// Highlights, education and experience fetched independently; a failing part is recorded
    /// in `errors` and never blocks the others.
    pub async fn full_profile(&self, person_id: i64) -> FullProfile {
        let mut profile = FullProfile::new(person_id);

        match self.highlights(person_id).await {
            Ok(highlights) => profile.highlights = highlights,
            Err(err) => profile.record_failure(ProfilePart::Highlights, err),
        }
        match self.education(person_id).await {
            Ok(education) => profile.education = education,
            Err(err) => profile.record_failure(ProfilePart::Education, err),
        }
        match self.experience(person_id).await {
            Ok(experience) => profile.experience = experience,
            Err(err) => profile.record_failure(ProfilePart::Experience, err),
        }

        info!(
            person_id,
            highlights = profile.highlights.len(),
            education = profile.education.len(),
            experience = profile.experience.len(),
            errors = profile.errors.len(),
            "full profile fetched"
        );
        profile
    }
}

fn person_object(mut data: JsonValue) -> JsonValue {
    match data.get_mut(PERSON) {
        Some(person) if !person.is_null() => person.take(),
        _ => JsonValue::Object(Default::default()),
    }
}

/// Natural key from a LinkedIn profile URL or a bare id.
///
/// `https://www.linkedin.com/in/jane-doe-123/?trk=x` and `jane-doe-123/` both give
/// `jane-doe-123`.
pub fn extract_natural_key(url_or_id: &str) -> String {
    let input = url_or_id.trim();
    if input.contains("linkedin.com") {
        if let Some(rest) = input.split("/in/").nth(1) {
            let key: String = rest
                .chars()
                .take_while(|c| *c != '/' && *c != '?' && !c.is_whitespace())
                .collect();
            if !key.is_empty() {
                return key;
            }
        }
    }
    input.trim_end_matches('/').to_string()
}

/// Last path segment of a profile URL.
pub fn natural_key_from_profile_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
