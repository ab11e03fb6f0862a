//! Row derivation for the destination tables.
//!
//! Synthetic URNs depend only on the natural key, the entity id and the entry index, so two runs
//! over the same profile produce identical rows apart from the `date` stamp.

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use hsync_client::shape::{bool_at, i64_at, str_at};
use hsync_core::{ColumnValue, DestinationTable, PersonMapping, RawRecord, SyncRow};

/// Leading `YYYY-MM-DD` of an ISO8601 value; anything else yields `None`.
pub fn iso_date(raw: Option<&str>) -> Option<String> {
    let head = raw?.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()?;
    Some(head.to_string())
}

fn stamp_date(stamped_at: DateTime<Utc>) -> String {
    stamped_at.format("%Y-%m-%d").to_string()
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

fn school_urn(school_url: Option<&str>) -> Option<String> {
    let slug = school_url?.trim_end_matches('/').rsplit('/').next()?;
    (!slug.is_empty()).then(|| format!("urn:li:fs_miniSchool:{slug}"))
}

pub fn mapping_row(mapping: &PersonMapping, stamped_at: DateTime<Utc>) -> SyncRow {
    let stamp = stamped_at.to_rfc3339_opts(SecondsFormat::Micros, false);
    SyncRow::new()
        .with("linkedin_id", mapping.natural_key.as_str())
        .with("harmonic_id", mapping.entity_id)
        .with("full_name", mapping.display_name.clone())
        .with("linkedin_url", mapping.profile_url())
        .with("created_at", stamp.clone())
        .with("updated_at", stamp)
}

pub fn education_rows(entries: &[RawRecord], natural_key: &str, stamped_at: DateTime<Utc>) -> Vec<SyncRow> {
    let date = stamp_date(stamped_at);
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let school_name = str_at(entry, &["school", "name"]).unwrap_or_default();
            let urn = school_urn(str_at(entry, &["school", "linkedinUrl"]).filter(|s| !s.is_empty()));
            let mini_school = urn
                .clone()
                .unwrap_or_else(|| format!("urn:li:fs_miniSchool:harmonic_{idx}"));

            SyncRow::new()
                .with("date", date.as_str())
                .with("linkedinId", natural_key)
                .with("entityUrn", format!("urn:li:fs_education:harmonic_{natural_key}_{idx}"))
                .with(
                    "school_objectUrn",
                    urn.clone().unwrap_or_else(|| format!("urn:li:school:harmonic_{idx}")),
                )
                .with("school_entityUrn", mini_school.clone())
                .with("school_active", true)
                .with("school_schoolName", school_name)
                .with("school_trackingId", format!("harmonic_{natural_key}_{idx}"))
                .with(
                    "school_logoUrl",
                    str_at(entry, &["school", "logoUrl"]).unwrap_or_default(),
                )
                .with("startDate", iso_date(str_at(entry, &["startDate"])))
                .with("endDate", iso_date(str_at(entry, &["endDate"])))
                .with("schoolName", school_name)
                .with("fieldOfStudy", str_at(entry, &["field"]).unwrap_or_default())
                .with("schoolUrn", mini_school)
                .with("degreeName", owned(str_at(entry, &["degree"])))
        })
        .collect()
}

pub fn experience_rows(entries: &[RawRecord], natural_key: &str, stamped_at: DateTime<Utc>) -> Vec<SyncRow> {
    let date = stamp_date(stamped_at);
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let company_urn = i64_at(entry, &["company", "id"])
                .filter(|id| *id != 0)
                .map(|id| format!("urn:li:fs_miniCompany:harmonic_{id}"));

            SyncRow::new()
                .with("date", date.as_str())
                .with("linkedinId", natural_key)
                .with("entityUrn", format!("urn:li:fs_position:harmonic_{natural_key}_{idx}"))
                .with(
                    "companyName",
                    str_at(entry, &["company", "name"]).unwrap_or_default(),
                )
                .with(
                    "startDate",
                    iso_date(str_at(entry, &["startDate"])).unwrap_or_default(),
                )
                .with("endDate", iso_date(str_at(entry, &["endDate"])))
                .with("description", owned(str_at(entry, &["description"])))
                .with("title", owned(str_at(entry, &["title"])))
                .with("companyUrn", company_urn)
                .with(
                    "companyLogoUrl",
                    str_at(entry, &["company", "logoUrl"]).unwrap_or_default(),
                )
                .with("locationName", ColumnValue::Null)
                .with("geoLocationName", ColumnValue::Null)
                .with("geoUrn", ColumnValue::Null)
                .with("region", ColumnValue::Null)
        })
        .collect()
}

/// "{title} at {company}" of the first current position, when both parts are present.
pub fn headline(experience: &[RawRecord]) -> Option<String> {
    let current = experience
        .iter()
        .find(|exp| bool_at(exp, &["isCurrentPosition"]).unwrap_or(false))?;
    let title = str_at(current, &["title"]).filter(|s| !s.is_empty())?;
    let company = str_at(current, &["company", "name"]).filter(|s| !s.is_empty())?;
    Some(format!("{title} at {company}"))
}

/// Any education entry ending in `year` or later.
pub fn is_student(education: &[RawRecord], year: i32) -> bool {
    education.iter().any(|edu| {
        str_at(edu, &["endDate"])
            .and_then(|end| end.get(..4))
            .and_then(|y| y.parse::<i32>().ok())
            .is_some_and(|end_year| end_year >= year)
    })
}

pub fn profile_row(
    entity_id: i64,
    natural_key: &str,
    education: &[RawRecord],
    experience: &[RawRecord],
    stamped_at: DateTime<Utc>,
) -> SyncRow {
    let profile_urn = format!("urn:li:fs_profile:harmonic_{entity_id}");
    let mut row = SyncRow::new()
        .with("date", stamp_date(stamped_at))
        .with("linkedinId", natural_key)
        .with("student", is_student(education, stamped_at.year()))
        .with("geoLocationBackfilled", false)
        .with("elt", false)
        .with("entityUrn", profile_urn.clone())
        .with("headline", headline(experience))
        .with("profile_id", entity_id.to_string())
        .with("profile_urn", profile_urn)
        .with("member_urn", format!("urn:li:member:harmonic_{entity_id}"))
        .with("public_id", natural_key);
    for column in [
        "industryName",
        "lastName",
        "locationName",
        "geoCountryName",
        "geoCountryUrn",
        "industryUrn",
        "firstName",
        "geoLocation",
        "geoLocationName",
        "displayPictureUrl",
        "img_100_100",
        "img_200_200",
        "img_400_400",
        "img_800_800",
    ] {
        row.insert(column, ColumnValue::Null);
    }
    row
}

fn text_or<'a>(row: &'a SyncRow, column: &str, fallback: &'a str) -> &'a str {
    row.text(column).unwrap_or(fallback)
}

/// One-line description of a row, used by verbose sync output.
pub fn row_summary(table: DestinationTable, row: &SyncRow) -> String {
    match table {
        DestinationTable::Mapping => format!(
            "{} -> {}",
            text_or(row, "linkedin_id", "?"),
            row.get("harmonic_id")
                .and_then(ColumnValue::as_i64)
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string())
        ),
        DestinationTable::Education => format!(
            "{}: {} in {}",
            text_or(row, "schoolName", ""),
            text_or(row, "degreeName", "None"),
            text_or(row, "fieldOfStudy", "")
        ),
        DestinationTable::Experience => format!(
            "{} at {} ({} - {})",
            text_or(row, "title", "None"),
            text_or(row, "companyName", ""),
            text_or(row, "startDate", ""),
            text_or(row, "endDate", "Present")
        ),
        DestinationTable::Profile => format!(
            "LinkedIn ID: {}, Headline: {}, Student: {}",
            text_or(row, "linkedinId", ""),
            text_or(row, "headline", "None"),
            row.get("student")
                .and_then(ColumnValue::as_bool)
                .unwrap_or(false)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).single().expect("valid")
    }

    #[test]
    fn iso_dates_are_truncated_or_dropped() {
        assert_eq!(iso_date(Some("2018-09-01T00:00:00Z")).as_deref(), Some("2018-09-01"));
        assert_eq!(iso_date(Some("2018-09-01")).as_deref(), Some("2018-09-01"));
        assert_eq!(iso_date(Some("2018")), None);
        assert_eq!(iso_date(Some("not-a-date-at-all")), None);
        assert_eq!(iso_date(None), None);
    }

    #[test]
    fn education_rows_derive_urns_from_key_and_index() {
        let entries = vec![
            json!({
                "school": {"name": "MIT", "linkedinUrl": "https://linkedin.com/school/mit/", "logoUrl": "logo"},
                "degree": "BS",
                "field": "Physics",
                "startDate": "2018-09-01T00:00:00",
                "endDate": "2022-06-01T00:00:00"
            }),
            json!({"school": {"name": "Night School"}}),
        ];
        let rows = education_rows(&entries, "jane-doe", stamp());
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.text("date"), Some("2026-03-01"));
        assert_eq!(first.text("entityUrn"), Some("urn:li:fs_education:harmonic_jane-doe_0"));
        assert_eq!(first.text("school_objectUrn"), Some("urn:li:fs_miniSchool:mit"));
        assert_eq!(first.text("schoolUrn"), Some("urn:li:fs_miniSchool:mit"));
        assert_eq!(first.text("school_trackingId"), Some("harmonic_jane-doe_0"));
        assert_eq!(first.text("startDate"), Some("2018-09-01"));
        assert_eq!(first.text("degreeName"), Some("BS"));

        let second = &rows[1];
        assert_eq!(second.text("school_objectUrn"), Some("urn:li:school:harmonic_1"));
        assert_eq!(second.text("school_entityUrn"), Some("urn:li:fs_miniSchool:harmonic_1"));
        assert_eq!(second.text("fieldOfStudy"), Some(""));
        assert_eq!(second.text("school_logoUrl"), Some(""));
        assert!(second.get("startDate").is_some_and(ColumnValue::is_null));
        assert!(second.get("degreeName").is_some_and(ColumnValue::is_null));
    }

    #[test]
    fn experience_rows_default_missing_fields() {
        let entries = vec![
            json!({
                "title": "CTO",
                "description": "Builds things",
                "startDate": "2021-03-01T00:00:00",
                "company": {"id": 42, "name": "Acme", "logoUrl": "acme.png"}
            }),
            json!({"title": "Intern", "company": null}),
        ];
        let rows = experience_rows(&entries, "jane-doe", stamp());
        assert_eq!(rows[0].text("entityUrn"), Some("urn:li:fs_position:harmonic_jane-doe_0"));
        assert_eq!(rows[0].text("companyUrn"), Some("urn:li:fs_miniCompany:harmonic_42"));
        assert_eq!(rows[0].text("startDate"), Some("2021-03-01"));
        assert!(rows[0].get("endDate").is_some_and(ColumnValue::is_null));
        assert!(rows[0].get("region").is_some_and(ColumnValue::is_null));

        assert_eq!(rows[1].text("companyName"), Some(""));
        assert_eq!(rows[1].text("startDate"), Some(""));
        assert!(rows[1].get("companyUrn").is_some_and(ColumnValue::is_null));
    }

    #[test]
    fn profile_headline_uses_first_current_position_only() {
        let experience = vec![
            json!({"title": "", "isCurrentPosition": true, "company": {"name": "Acme"}}),
            json!({"title": "CEO", "isCurrentPosition": true, "company": {"name": "Other"}}),
        ];
        assert_eq!(headline(&experience), None);

        let experience = vec![
            json!({"title": "Analyst", "isCurrentPosition": false, "company": {"name": "Old"}}),
            json!({"title": "CTO", "isCurrentPosition": true, "company": {"name": "Acme"}}),
        ];
        let row = profile_row(77, "jane-doe", &[], &experience, stamp());
        assert_eq!(row.text("headline"), Some("CTO at Acme"));
        assert_eq!(row.text("profile_id"), Some("77"));
        assert_eq!(row.text("entityUrn"), Some("urn:li:fs_profile:harmonic_77"));
        assert_eq!(row.text("member_urn"), Some("urn:li:member:harmonic_77"));
        assert_eq!(row.text("public_id"), Some("jane-doe"));
        assert!(row.get("firstName").is_some_and(ColumnValue::is_null));
        assert_eq!(row.get("elt").and_then(ColumnValue::as_bool), Some(false));
    }

    #[test]
    fn student_flag_compares_end_year_with_stamp_year() {
        let education = vec![json!({"endDate": "2019-06-01"}), json!({"endDate": "2027-06-01"})];
        assert!(is_student(&education, 2026));
        assert!(!is_student(&education[..1], 2026));
        assert!(!is_student(&[json!({"endDate": "soon"})], 2026));
        assert!(!is_student(&[], 2026));
    }

    #[test]
    fn mapping_row_carries_association_and_url() {
        let mapping = PersonMapping {
            natural_key: "jane-doe".into(),
            entity_id: 77,
            display_name: Some("Jane Doe".into()),
        };
        let row = mapping_row(&mapping, stamp());
        assert_eq!(row.text("linkedin_url"), Some("https://linkedin.com/in/jane-doe"));
        assert_eq!(row.get("harmonic_id").and_then(ColumnValue::as_i64), Some(77));
        assert_eq!(row.text("created_at"), row.text("updated_at"));
        assert!(row.text("created_at").is_some_and(|s| s.starts_with("2026-03-01T12:30:00")));
    }

    #[test]
    fn rows_are_reproducible_apart_from_the_stamp() {
        let education = vec![json!({"school": {"name": "MIT"}, "endDate": "2022-01-01"})];
        let later = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).single().expect("valid");

        let mut first = education_rows(&education, "jane", stamp());
        let mut second = education_rows(&education, "jane", later);
        for row in first.iter_mut().chain(second.iter_mut()) {
            row.insert("date", ColumnValue::Null);
        }
        assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json")
        );
    }

    #[test]
    fn summaries() {
        let edu = SyncRow::new()
            .with("schoolName", "MIT")
            .with("degreeName", "BS")
            .with("fieldOfStudy", "Physics");
        assert_eq!(row_summary(DestinationTable::Education, &edu), "MIT: BS in Physics");

        let exp = SyncRow::new()
            .with("title", "CTO")
            .with("companyName", "Acme")
            .with("startDate", "2021-03-01")
            .with("endDate", ColumnValue::Null);
        assert_eq!(
            row_summary(DestinationTable::Experience, &exp),
            "CTO at Acme (2021-03-01 - Present)"
        );
    }
}
