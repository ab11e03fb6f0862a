use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hsync_client::{FailureNotifier, GraphqlClient};
use hsync_core::{
    ColumnValue, DestinationTable, FullProfile, NotificationCategory, PersonMapping, SyncRow, SyncStatus, SyncTarget,
};
use hsync_storage::{GraphqlTransport, TransportError, TransportReply};
use hsync_sync::export::{LOOKUP_RESULTS_FILE, SYNC_RESULTS_FILE};
use hsync_sync::transform::{education_rows, experience_rows, profile_row};
use hsync_sync::{FileConfig, IdempotentSync, MemoryWarehouse, PersonResolver, SyncConfig, SyncPipeline, Warehouse};
use serde_json::{json, Value as JsonValue};
use tempfile::tempdir;
use uuid::Uuid;

fn stamp(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).single().unwrap()
}

fn mapping() -> PersonMapping {
    PersonMapping {
        natural_key: "daniel-sun-440493171".into(),
        entity_id: 36601930,
        display_name: Some("Daniel Sun".into()),
    }
}

fn profile() -> FullProfile {
    FullProfile {
        person_id: 36601930,
        highlights: vec!["Top University".into()],
        education: vec![
            json!({
                "school": {"name": "Stanford", "linkedinUrl": "https://www.linkedin.com/school/stanford-university/"},
                "degree": "BS",
                "field": "Computer Science",
                "startDate": "2014-09-01T00:00:00",
                "endDate": "2018-06-01T00:00:00"
            }),
            json!({"school": {"name": "Stanford"}, "degree": "MS", "endDate": "2027-06-01T00:00:00"}),
        ],
        experience: vec![
            json!({
                "title": "Founder",
                "isCurrentPosition": true,
                "startDate": "2022-01-01T00:00:00",
                "company": {"id": 991, "name": "Chapter One", "logoUrl": "logo.png"}
            }),
            json!({"title": "Engineer", "startDate": "2018-07-01", "endDate": "2021-12-01", "company": {"id": 5, "name": "Acme"}}),
        ],
        errors: Vec::new(),
    }
}

#[tokio::test]
async fn existing_rows_are_never_touched() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let key = mapping().natural_key;
    warehouse.seed(
        DestinationTable::Education,
        vec![SyncRow::new().with("linkedinId", key.as_str()).with("schoolName", "Old School")],
    );
    warehouse.seed(
        DestinationTable::Profile,
        vec![SyncRow::new().with("linkedinId", key.as_str())],
    );

    let report = IdempotentSync::new(warehouse.clone())
        .sync(&mapping(), &profile(), stamp(1))
        .await;

    let education = report.table(DestinationTable::Education).unwrap();
    assert_eq!(education.status, SyncStatus::Skipped);
    assert!(education.exists);
    assert_eq!(education.inserted, 0);
    assert_eq!(warehouse.rows(DestinationTable::Education).len(), 1);
    assert_eq!(
        report.table(DestinationTable::Profile).map(|t| t.status),
        Some(SyncStatus::Skipped)
    );
    assert_eq!(
        report.table(DestinationTable::Experience).map(|t| t.inserted),
        Some(2)
    );
    assert_eq!(
        report.table(DestinationTable::Mapping).map(|t| t.status),
        Some(SyncStatus::Inserted)
    );
}

#[tokio::test]
async fn second_sync_skips_everything() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let sync = IdempotentSync::new(warehouse.clone());
    let first = sync.sync(&mapping(), &profile(), stamp(1)).await;
    assert_eq!(first.total_inserted(), 6);

    let second = sync.sync(&mapping(), &profile(), stamp(2)).await;
    assert!(second.tables.iter().all(|t| t.is_skipped()));
    assert_eq!(second.total_inserted(), 0);
    assert_eq!(warehouse.rows(DestinationTable::Experience).len(), 2);
    assert_eq!(warehouse.insert_calls(), 4);

    let found = warehouse
        .find_by_natural_key("daniel-sun-440493171")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, mapping());
}

#[tokio::test]
async fn synced_rows_match_the_transform_output() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    IdempotentSync::new(warehouse.clone())
        .sync(&mapping(), &profile(), stamp(1))
        .await;

    let profile_rows = warehouse.rows(DestinationTable::Profile);
    assert_eq!(profile_rows.len(), 1);
    let row = &profile_rows[0];
    assert_eq!(row.text("headline"), Some("Founder at Chapter One"));
    assert_eq!(row.get("student").and_then(ColumnValue::as_bool), Some(true));

    let education = warehouse.rows(DestinationTable::Education);
    assert_eq!(
        education[0].text("schoolUrn"),
        Some("urn:li:fs_miniSchool:stanford-university")
    );
    assert_eq!(education[1].text("schoolUrn"), Some("urn:li:fs_miniSchool:harmonic_1"));
}

fn without_date(mut rows: Vec<SyncRow>) -> String {
    for row in &mut rows {
        row.insert("date", ColumnValue::Null);
    }
    serde_json::to_string(&rows).unwrap()
}

#[test]
fn row_derivation_is_deterministic_apart_from_the_stamp() {
    let key = "daniel-sun-440493171";
    let fetched = profile();
    assert_eq!(
        without_date(education_rows(&fetched.education, key, stamp(1))),
        without_date(education_rows(&fetched.education, key, stamp(9)))
    );
    assert_eq!(
        without_date(experience_rows(&fetched.experience, key, stamp(1))),
        without_date(experience_rows(&fetched.experience, key, stamp(9)))
    );
    assert_eq!(
        without_date(vec![profile_row(1, key, &fetched.education, &fetched.experience, stamp(1))]),
        without_date(vec![profile_row(1, key, &fetched.education, &fetched.experience, stamp(9))])
    );
}

/// Answers by operation name, in order per operation.
#[derive(Default)]
struct OperationTransport {
    replies: Mutex<Vec<(String, VecDeque<JsonValue>)>>,
    seen: Mutex<Vec<(String, JsonValue)>>,
}

impl OperationTransport {
    fn reply(self, operation: &str, body: JsonValue) -> Self {
        {
            let mut replies = self.replies.lock().unwrap();
            match replies.iter_mut().find(|(op, _)| op == operation) {
                Some((_, queue)) => queue.push_back(body),
                None => replies.push((operation.to_string(), VecDeque::from([body]))),
            }
        }
        self
    }

    fn variables_of(&self, operation: &str) -> Vec<JsonValue> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, payload)| payload["variables"].clone())
            .collect()
    }
}

#[async_trait]
impl GraphqlTransport for OperationTransport {
    async fn post(&self, operation: &str, payload: &JsonValue) -> Result<TransportReply, TransportError> {
        self.seen
            .lock()
            .unwrap()
            .push((operation.to_string(), payload.clone()));
        let body = self
            .replies
            .lock()
            .unwrap()
            .iter_mut()
            .find(|(op, _)| op == operation)
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| json!({"data": null, "errors": [{"message": "unscripted"}]}));
        Ok(TransportReply {
            status: 200,
            body: serde_json::to_vec(&body).unwrap(),
        })
    }
}

struct SilentNotifier;

#[async_trait]
impl FailureNotifier for SilentNotifier {
    async fn notify(&self, _category: NotificationCategory, _detail: &str) {}
}

fn linkedin_reply(id: i64, name: &str, key: &str) -> JsonValue {
    json!({"data": {"getPersonById": {
        "id": id,
        "fullName": name,
        "socials": {"linkedin": {"url": format!("https://linkedin.com/in/{key}/")}}
    }}})
}

#[tokio::test]
async fn resolver_prefers_the_mapping_table() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    IdempotentSync::new(warehouse.clone())
        .sync(&mapping(), &FullProfile::new(36601930), stamp(1))
        .await;
    let transport = Arc::new(OperationTransport::default());
    let client = GraphqlClient::new(transport.clone(), Arc::new(SilentNotifier));

    let resolved = PersonResolver::new(client, warehouse)
        .resolve("daniel-sun-440493171")
        .await
        .unwrap();
    assert_eq!(resolved, Some(mapping()));
    assert!(transport.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn resolver_verifies_search_candidates() {
    let transport = Arc::new(
        OperationTransport::default()
            .reply("TypeaheadSearchWithInvestors", json!({"data": {"getPeopleWithTypeahead": []}}))
            .reply(
                "TypeaheadSearchWithInvestors",
                json!({"data": {"getPeopleWithTypeahead": [
                    {"id": 1, "fullName": "Danielle Sunderland"},
                    {"id": 36601930, "fullName": "Daniel Sun"}
                ]}}),
            )
            .reply("GetPersonLinkedIn", linkedin_reply(36601930, "Daniel Sun", "Daniel-Sun-440493171"))
            .reply("GetPersonLinkedIn", linkedin_reply(1, "Danielle Sunderland", "danielle-s")),
    );
    let client = GraphqlClient::new(transport.clone(), Arc::new(SilentNotifier));

    let resolved = PersonResolver::new(client, Arc::new(MemoryWarehouse::new()))
        .resolve("daniel-sun-440493171")
        .await
        .unwrap();
    assert_eq!(resolved, Some(mapping()));

    let queries = transport.variables_of("TypeaheadSearchWithInvestors");
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0]["query"], "daniel-sun-440493171");
    assert_eq!(queries[1]["query"], "daniel sun");
    // Closest name is checked first and matches, so only one identity lookup happens.
    assert_eq!(transport.variables_of("GetPersonLinkedIn").len(), 1);
}

#[tokio::test]
async fn lookup_without_any_match_reports_an_error() {
    let transport = Arc::new(
        OperationTransport::default()
            .reply("TypeaheadSearchWithInvestors", json!({"data": {"getPeopleWithTypeahead": []}}))
            .reply("TypeaheadSearchWithInvestors", json!({"data": {"getPeopleWithTypeahead": []}})),
    );
    let client = GraphqlClient::new(transport, Arc::new(SilentNotifier));

    let report = PersonResolver::new(client, Arc::new(MemoryWarehouse::new()))
        .lookup("https://www.linkedin.com/in/nobody-123/")
        .await;
    assert_eq!(report.natural_key, "nobody-123");
    assert!(!report.found_in_mapping);
    assert!(report.profile.is_none());
    assert_eq!(
        report.errors,
        vec!["No Harmonic mapping found for LinkedIn ID: nobody-123".to_string()]
    );
}

/// Every request is rejected as unauthorized.
struct UnauthorizedTransport;

#[async_trait]
impl GraphqlTransport for UnauthorizedTransport {
    async fn post(&self, _operation: &str, _payload: &JsonValue) -> Result<TransportReply, TransportError> {
        Ok(TransportReply {
            status: 401,
            body: b"{}".to_vec(),
        })
    }
}

fn pipeline(transport: Arc<dyn GraphqlTransport>, output_dir: &std::path::Path) -> SyncPipeline {
    let mut config = SyncConfig::from_file_and_env(FileConfig::default());
    config.output_dir = output_dir.to_path_buf();
    let client = GraphqlClient::new(transport, Arc::new(SilentNotifier));
    SyncPipeline::from_parts(config, client, Uuid::new_v4())
}

fn person_reply(field: &str, entries: JsonValue) -> JsonValue {
    json!({"data": {"getPersonById": {field: entries}}})
}

#[tokio::test]
async fn sync_person_refuses_a_profile_that_failed_to_fetch() {
    let dir = tempdir().expect("tempdir");
    let warehouse = Arc::new(MemoryWarehouse::new());

    let result = pipeline(Arc::new(UnauthorizedTransport), dir.path())
        .sync_person(warehouse.clone(), 42, Some("jane-doe"), false, false)
        .await;

    let err = result.expect_err("nothing to sync");
    assert!(format!("{err:#}").contains("nothing synced"));
    assert_eq!(warehouse.insert_calls(), 0);
    assert!(warehouse.rows(DestinationTable::Mapping).is_empty());
    assert!(warehouse.rows(DestinationTable::Profile).is_empty());
    assert!(!dir.path().join(SYNC_RESULTS_FILE).exists());

    // Nothing was written, so a later successful fetch can still sync everything.
    assert!(!warehouse
        .has_rows_for(&SyncTarget::new(DestinationTable::Profile, "jane-doe"))
        .await
        .unwrap());
}

#[tokio::test]
async fn sync_person_keeps_going_when_one_part_fails() {
    let dir = tempdir().expect("tempdir");
    let warehouse = Arc::new(MemoryWarehouse::new());
    let transport = Arc::new(
        OperationTransport::default()
            .reply("GetPersonLinkedIn", linkedin_reply(42, "Jane Doe", "jane-doe"))
            .reply(
                "GetPersonProfileHeader",
                person_reply("highlights", json!([{"category": "Prior Exit"}])),
            )
            .reply(
                "GetPersonExperience",
                person_reply(
                    "experience",
                    json!([{"title": "CTO", "isCurrentPosition": true, "company": {"id": 3, "name": "Acme"}}]),
                ),
            ),
    );

    let report = pipeline(transport, dir.path())
        .sync_person(warehouse.clone(), 42, None, false, false)
        .await
        .expect("partial profile still syncs");

    assert_eq!(report.natural_key, "jane-doe");
    let statuses: Vec<_> = report.tables.iter().map(|t| (t.table, t.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (DestinationTable::Mapping, SyncStatus::Inserted),
            (DestinationTable::Education, SyncStatus::Failed),
            (DestinationTable::Experience, SyncStatus::Inserted),
            (DestinationTable::Profile, SyncStatus::Failed),
        ]
    );
    assert!(report.errors.iter().any(|e| e.starts_with("Education: ")));
    assert_eq!(
        warehouse.rows(DestinationTable::Mapping)[0].text("full_name"),
        Some("Jane Doe")
    );
    assert!(warehouse.rows(DestinationTable::Profile).is_empty());

    let written: JsonValue =
        serde_json::from_slice(&std::fs::read(dir.path().join(SYNC_RESULTS_FILE)).unwrap()).unwrap();
    assert_eq!(written["natural_key"], "jane-doe");
}

#[tokio::test]
async fn pipeline_lookup_uses_the_mapping_and_writes_results() {
    let dir = tempdir().expect("tempdir");
    let warehouse = Arc::new(MemoryWarehouse::new());
    IdempotentSync::new(warehouse.clone())
        .sync(&mapping(), &profile(), stamp(1))
        .await;
    let transport = Arc::new(
        OperationTransport::default()
            .reply("GetPersonProfileHeader", person_reply("highlights", json!([])))
            .reply("GetPersonEducation", person_reply("education", json!([{"school": {"name": "Stanford"}}])))
            .reply("GetPersonExperience", person_reply("experience", json!([]))),
    );

    let (report, path) = pipeline(transport.clone(), dir.path())
        .lookup(warehouse, "https://www.linkedin.com/in/daniel-sun-440493171/")
        .await
        .expect("lookup");

    assert!(report.found_in_mapping);
    assert_eq!(report.entity_id, Some(36601930));
    assert_eq!(report.profile.as_ref().map(|p| p.education.len()), Some(1));
    assert!(report.errors.is_empty());
    assert!(transport.variables_of("TypeaheadSearchWithInvestors").is_empty());
    assert!(path.ends_with(LOOKUP_RESULTS_FILE));
    let written: JsonValue = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written["found_in_mapping"], true);
}
