//! JSON and Parquet exports of flattened companies, plus run result files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use hsync_core::{CompanyRow, SyncReport};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;

pub const COMPANIES_JSON: &str = "companies.json";
pub const COMPANIES_PARQUET: &str = "companies.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SYNC_RESULTS_FILE: &str = "sync_results.json";
pub const LOOKUP_RESULTS_FILE: &str = "lookup_results.json";

#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub files: Vec<ExportManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `companies.json`, `companies.parquet` and a sha256 manifest into `dir`.
/// Returns the manifest path.
pub async fn write_company_exports(dir: &Path, rows: &[CompanyRow]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json_path = dir.join(COMPANIES_JSON);
    let json = serde_json::to_vec_pretty(rows).context("serializing companies")?;
    fs::write(&json_path, json)
        .await
        .with_context(|| format!("writing {}", json_path.display()))?;

    let parquet_path = dir.join(COMPANIES_PARQUET);
    write_companies_parquet(&parquet_path, rows)?;

    let manifest = ExportManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("companies_json", dir, &json_path)?,
            manifest_entry("companies", dir, &parquet_path)?,
        ],
    };
    let manifest_path = dir.join(MANIFEST_FILE);
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing export manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(companies = rows.len(), manifest = %manifest_path.display(), "company export written");
    Ok(manifest_path)
}

/// Pretty JSON of any serializable run result, e.g. a sync or lookup report.
pub async fn write_report<T: Serialize>(dir: &Path, file_name: &str, report: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(file_name);
    let bytes = serde_json::to_vec_pretty(report).with_context(|| format!("serializing {file_name}"))?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub async fn write_sync_results(dir: &Path, report: &SyncReport) -> Result<PathBuf> {
    write_report(dir, SYNC_RESULTS_FILE, report).await
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn text_column<'a>(rows: &'a [CompanyRow], get: impl Fn(&'a CompanyRow) -> Option<&'a str>) -> StringArray {
    StringArray::from(rows.iter().map(get).collect::<Vec<_>>())
}

// List columns are stored as JSON array text.
fn list_column<T: Serialize>(rows: &[CompanyRow], get: impl Fn(&CompanyRow) -> &[T]) -> Result<StringArray> {
    let values = rows
        .iter()
        .map(|row| serde_json::to_string(get(row)).map(Some))
        .collect::<Result<Vec<_>, _>>()
        .context("encoding list column")?;
    Ok(StringArray::from(values))
}

fn write_companies_parquet(path: &Path, rows: &[CompanyRow]) -> Result<()> {
    let text_fields = [
        "entity_urn",
        "name",
        "description",
        "short_description",
        "funding_stage",
        "last_funding_type",
        "last_funding_date",
        "founding_date",
        "created_at",
        "updated_at",
        "logo_url",
        "website_url",
        "website_domain",
        "redirect_urn",
        "user_notes",
        "team_notes",
        "legal_name",
        "external_description",
        "city",
        "state",
        "country",
    ];

    let mut fields = vec![
        ArrowField::new("company_id", DataType::Int64, true),
        ArrowField::new("headcount", DataType::Int64, true),
        ArrowField::new("funding_total", DataType::Int64, true),
    ];
    fields.extend(text_fields.iter().map(|name| ArrowField::new(*name, DataType::Utf8, true)));
    fields.extend([
        ArrowField::new("ceo_ids", DataType::Utf8, false),
        ArrowField::new("ceo_linkedin_urls", DataType::Utf8, false),
        ArrowField::new("ceo_names", DataType::Utf8, false),
        ArrowField::new("timestamp", DataType::Utf8, false),
    ]);
    let schema = Arc::new(Schema::new(fields));

    let columns: Vec<arrow_array::ArrayRef> = vec![
        Arc::new(Int64Array::from(rows.iter().map(|r| r.company_id).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.headcount).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.funding_total).collect::<Vec<_>>())),
        Arc::new(text_column(rows, |r| r.entity_urn.as_deref())),
        Arc::new(text_column(rows, |r| r.name.as_deref())),
        Arc::new(text_column(rows, |r| r.description.as_deref())),
        Arc::new(text_column(rows, |r| r.short_description.as_deref())),
        Arc::new(text_column(rows, |r| r.funding_stage.as_deref())),
        Arc::new(text_column(rows, |r| r.last_funding_type.as_deref())),
        Arc::new(text_column(rows, |r| r.last_funding_date.as_deref())),
        Arc::new(text_column(rows, |r| r.founding_date.as_deref())),
        Arc::new(text_column(rows, |r| r.created_at.as_deref())),
        Arc::new(text_column(rows, |r| r.updated_at.as_deref())),
        Arc::new(text_column(rows, |r| r.logo_url.as_deref())),
        Arc::new(text_column(rows, |r| r.website_url.as_deref())),
        Arc::new(text_column(rows, |r| r.website_domain.as_deref())),
        Arc::new(text_column(rows, |r| r.redirect_urn.as_deref())),
        Arc::new(text_column(rows, |r| r.user_notes.as_deref())),
        Arc::new(text_column(rows, |r| r.team_notes.as_deref())),
        Arc::new(text_column(rows, |r| r.legal_name.as_deref())),
        Arc::new(text_column(rows, |r| r.external_description.as_deref())),
        Arc::new(text_column(rows, |r| r.city.as_deref())),
        Arc::new(text_column(rows, |r| r.state.as_deref())),
        Arc::new(text_column(rows, |r| r.country.as_deref())),
        Arc::new(list_column(rows, |r| r.ceo_ids.as_slice())?),
        Arc::new(list_column(rows, |r| r.ceo_linkedin_urls.as_slice())?),
        Arc::new(list_column(rows, |r| r.ceo_names.as_slice())?),
        Arc::new(text_column(rows, |r| Some(r.timestamp.as_str()))),
    ];

    let batch = RecordBatch::try_new(schema, columns).context("building companies record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, dir: &Path, path: &Path) -> Result<ExportManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path.strip_prefix(dir).unwrap_or(path).display().to_string();
    Ok(ExportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}
