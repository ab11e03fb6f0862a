//! Skip-if-exists load of one person into the destination tables.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hsync_core::{
    DestinationTable, FullProfile, PersonMapping, ProfilePart, SyncReport, SyncRow, SyncStatus, SyncTarget,
    TableReport,
};
use tracing::{info, warn};

use crate::transform::{education_rows, experience_rows, mapping_row, profile_row, row_summary};
use crate::warehouse::Warehouse;

/// Rows already present for a natural key are never touched again: no upsert, no merge.
pub struct IdempotentSync {
    warehouse: Arc<dyn Warehouse>,
    dry_run: bool,
    verbose: bool,
}

impl IdempotentSync {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            warehouse,
            dry_run: false,
            verbose: false,
        }
    }

    /// Check and transform, but never insert.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Syncs the mapping first, then education, experience and profile, each independently.
    pub async fn sync(
        &self,
        mapping: &PersonMapping,
        profile: &FullProfile,
        stamped_at: DateTime<Utc>,
    ) -> SyncReport {
        let key = mapping.natural_key.as_str();
        let mut report = SyncReport::new(mapping.entity_id, key);
        report.errors.extend(profile.errors.iter().cloned());
        info!(entity_id = mapping.entity_id, natural_key = key, dry_run = self.dry_run, "syncing person");

        let tables = std::iter::once(DestinationTable::Mapping).chain(DestinationTable::CONTENT);
        for table in tables {
            if let Some(part) = missing_source(table, profile) {
                warn!(table = table.table_name(), part = part.label(), "source fetch failed, not syncing");
                let table_report =
                    TableReport::failed(table, format!("not synced, {} fetch failed", part.label()));
                report.errors.extend(
                    table_report
                        .errors
                        .iter()
                        .map(|err| format!("{}: {err}", table.label())),
                );
                report.tables.push(table_report);
                continue;
            }
            let table_report = self
                .sync_table(table, key, || match table {
                    DestinationTable::Mapping => vec![mapping_row(mapping, stamped_at)],
                    DestinationTable::Education => education_rows(&profile.education, key, stamped_at),
                    DestinationTable::Experience => experience_rows(&profile.experience, key, stamped_at),
                    DestinationTable::Profile => vec![profile_row(
                        mapping.entity_id,
                        key,
                        &profile.education,
                        &profile.experience,
                        stamped_at,
                    )],
                })
                .await;
            report.errors.extend(
                table_report
                    .errors
                    .iter()
                    .map(|err| format!("{}: {err}", table.label())),
            );
            report.tables.push(table_report);
        }

        info!(
            natural_key = key,
            inserted = report.total_inserted(),
            errors = report.errors.len(),
            "sync finished"
        );
        report
    }

    async fn sync_table(
        &self,
        table: DestinationTable,
        natural_key: &str,
        build_rows: impl FnOnce() -> Vec<SyncRow>,
    ) -> TableReport {
        let target = SyncTarget::new(table, natural_key);
        let exists = match self.warehouse.has_rows_for(&target).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(table = table.table_name(), error = %format!("{err:#}"), "existence check failed");
                return TableReport::failed(table, format!("{err:#}"));
            }
        };
        if exists {
            info!(table = table.table_name(), natural_key, "already exists, skipping");
            return TableReport::skipped(table);
        }

        let rows = build_rows();
        if self.verbose {
            for row in &rows {
                info!(table = table.table_name(), "{}", row_summary(table, row));
            }
        }

        if self.dry_run {
            info!(table = table.table_name(), rows = rows.len(), "dry run, not inserting");
            return TableReport {
                table,
                exists: false,
                status: SyncStatus::DryRun,
                inserted: rows.len(),
                rows,
                errors: Vec::new(),
            };
        }

        let outcome = self.warehouse.insert_rows(table, &rows).await;
        let status = if outcome.errors.is_empty() {
            info!(table = table.table_name(), inserted = outcome.inserted_count, "rows inserted");
            SyncStatus::Inserted
        } else {
            warn!(table = table.table_name(), errors = ?outcome.errors, "insert failed");
            SyncStatus::Failed
        };
        TableReport {
            table,
            exists: false,
            status,
            inserted: outcome.inserted_count,
            rows,
            errors: outcome.errors,
        }
    }
}

/// Per-table lines of the final console summary.
/// Profile section a table is derived from, when that section failed to fetch. Rows built
/// from a missing section would be permanent placeholders, so the table is left alone.
fn missing_source(table: DestinationTable, profile: &FullProfile) -> Option<ProfilePart> {
    let sources: &[ProfilePart] = match table {
        DestinationTable::Mapping => &[],
        DestinationTable::Education => &[ProfilePart::Education],
        DestinationTable::Experience => &[ProfilePart::Experience],
        DestinationTable::Profile => &[ProfilePart::Education, ProfilePart::Experience],
    };
    sources.iter().copied().find(|part| profile.part_failed(*part))
}

pub fn summary_lines(report: &SyncReport) -> Vec<String> {
    report
        .tables
        .iter()
        .map(|table| {
            let outcome = match table.status {
                SyncStatus::Skipped => "SKIPPED (already exists)".to_string(),
                SyncStatus::DryRun => format!("Would insert {} rows", table.inserted),
                SyncStatus::Inserted => format!("Inserted {} rows", table.inserted),
                SyncStatus::Failed => format!("FAILED ({})", table.errors.join("; ")),
            };
            format!("  {}: {outcome}", table.table.label())
        })
        .collect()
}
