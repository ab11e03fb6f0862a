//! Console rendering of fetched entries.

use std::collections::BTreeMap;

use hsync_core::CompanyRow;
use serde_json::Value as JsonValue;

use crate::shape::{array_at, bool_at, i64_at, str_at};

fn year(value: &JsonValue, field: &str) -> String {
    str_at(value, &[field])
        .map(|s| s.chars().take(4).collect())
        .unwrap_or_default()
}

fn location(value: &JsonValue, path: &[&str]) -> String {
    let parts: Vec<&str> = ["city", "state", "country"]
        .iter()
        .filter_map(|field| {
            let mut full = path.to_vec();
            full.push(*field);
            str_at(value, &full).filter(|s| !s.is_empty())
        })
        .collect();
    parts.join(", ")
}

pub fn format_education(entry: &JsonValue) -> String {
    let school = str_at(entry, &["school", "name"]).unwrap_or("Unknown School");
    let start = year(entry, "startDate");
    let end = year(entry, "endDate");
    let dates = match (start.is_empty(), end.is_empty()) {
        (false, false) => format!(" ({start}-{end})"),
        (_, false) => format!(" ({end})"),
        _ => String::new(),
    };

    let parts: Vec<&str> = [str_at(entry, &["degree"]), str_at(entry, &["field"])]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    let description = if parts.is_empty() {
        "No degree info".to_string()
    } else {
        parts.join(" in ")
    };

    format!("  {school}{dates}\n    {description}")
}

pub fn format_experience(entry: &JsonValue) -> String {
    let company = str_at(entry, &["company", "name"]).unwrap_or("Unknown Company");
    let title = str_at(entry, &["title"]).unwrap_or("Unknown Title");
    let current = bool_at(entry, &["isCurrentPosition"]).unwrap_or(false);

    let start = year(entry, "startDate");
    let mut end = year(entry, "endDate");
    if end.is_empty() && current {
        end = "Present".to_string();
    }
    let dates = match (start.is_empty(), end.is_empty()) {
        (false, false) => format!(" ({start}-{end})"),
        (false, true) => format!(" ({start}-)"),
        _ => String::new(),
    };
    let marker = if current { " [CURRENT]" } else { "" };

    let mut details = Vec::new();
    if let Some(stage) = str_at(entry, &["company", "funding", "fundingStage"]).filter(|s| !s.is_empty()) {
        details.push(format!("Stage: {stage}"));
    }
    if let Some(headcount) = i64_at(entry, &["company", "headcount"]).filter(|h| *h > 0) {
        details.push(format!("Headcount: {headcount}"));
    }

    let mut out = format!("  {title} at {company}{dates}{marker}");
    if !details.is_empty() {
        out.push_str(&format!("\n    {}", details.join(", ")));
    }
    out
}

/// One typeahead person: id, name and first current position.
pub fn format_person(person: &JsonValue) -> String {
    let name = str_at(person, &["fullName"]).unwrap_or("Unknown");
    let id = id_label(person, &["id"]);
    let position = array_at(person, &["experience"])
        .iter()
        .find(|exp| bool_at(exp, &["isCurrentPosition"]).unwrap_or(false))
        .map(|exp| {
            format!(
                "{} at {}",
                str_at(exp, &["title"]).unwrap_or("Unknown"),
                str_at(exp, &["company", "name"]).unwrap_or("Unknown")
            )
        })
        .unwrap_or_else(|| "No current position".to_string());
    format!("  [{id}] {name} - {position}")
}

pub fn format_company(company: &JsonValue) -> String {
    let name = str_at(company, &["name"]).unwrap_or("Unknown");
    let id = id_label(company, &["id"]);
    let stage = str_at(company, &["funding", "fundingStage"]).unwrap_or("Unknown");
    let loc = location(company, &["location"]);
    let loc = if loc.is_empty() { "No location".to_string() } else { loc };
    format!("  [{id}] {name} ({stage}) - {loc}")
}

pub fn format_investor(investor: &JsonValue) -> String {
    let name = str_at(investor, &["details", "name"]).unwrap_or("Unknown");
    let id = id_label(investor, &["details", "id"]);
    let urn = str_at(investor, &["entityUrn"]).unwrap_or_default();
    let loc = location(investor, &["details", "location"]);
    let loc = if loc.is_empty() { "No location".to_string() } else { loc };
    format!("  [{id}] {name} - {loc} ({urn})")
}

fn id_label(value: &JsonValue, path: &[&str]) -> String {
    i64_at(value, path)
        .map(|id| id.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Funding stage and country breakdown plus a few sample rows.
pub fn company_summary(rows: &[CompanyRow]) -> String {
    if rows.is_empty() {
        return "No companies found".to_string();
    }
    let mut out = format!("Total companies: {}\n", rows.len());

    let mut stages: BTreeMap<&str, usize> = BTreeMap::new();
    let mut countries: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        *stages
            .entry(row.funding_stage.as_deref().unwrap_or("Unknown"))
            .or_default() += 1;
        *countries
            .entry(row.country.as_deref().unwrap_or("Unknown"))
            .or_default() += 1;
    }

    out.push_str("\nFunding stages:\n");
    for (stage, count) in &stages {
        out.push_str(&format!("  {stage}: {count}\n"));
    }
    out.push_str("\nCountries:\n");
    for (country, count) in &countries {
        out.push_str(&format!("  {country}: {count}\n"));
    }
    out.push_str("\nSample companies:\n");
    for (i, row) in rows.iter().take(5).enumerate() {
        out.push_str(&format!(
            "  {}. {} - {}, {}\n",
            i + 1,
            row.name.as_deref().unwrap_or("Unknown"),
            row.city.as_deref().unwrap_or("Unknown"),
            row.country.as_deref().unwrap_or("Unknown"),
        ));
    }
    out
}
