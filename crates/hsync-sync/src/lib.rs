//! Fetch pipeline and warehouse sync for hsync.
//!
//! [`SyncPipeline`] ties one run together: a GraphQL client built from [`SyncConfig`], a run id
//! for log correlation and a cancellation token shared with the fetch loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hsync_client::{
    company_ids_from_edges, flatten_companies, GraphqlClient, ListingFetcher, ListingKind, OperationDocument,
};
use hsync_core::{CompanyRow, FetchResult, PersonMapping, RawRecord, SyncReport};
use hsync_storage::{BatchStore, JsonBatchSink, Pacer};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub mod accumulator;
pub mod config;
pub mod export;
pub mod lookup;
pub mod orchestrator;
pub mod sync;
pub mod transform;
pub mod warehouse;

pub use accumulator::BatchAccumulator;
pub use config::{normalize_token, FileConfig, SyncConfig};
pub use lookup::{LookupReport, PersonResolver};
pub use orchestrator::{FetchOptions, FetchOrchestrator};
pub use sync::{summary_lines, IdempotentSync};
pub use warehouse::{InsertOutcome, MemoryWarehouse, PgWarehouse, Warehouse};

pub const CRATE_NAME: &str = "hsync-sync";

/// Raw response of a companies-by-id request.
pub const COMPANIES_BY_ID_OUTPUT: &str = "company_by_id_output.json";

#[derive(Debug, Clone, Serialize)]
pub struct ListingRun {
    pub run_id: Uuid,
    pub kind: ListingKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: FetchResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompaniesRun {
    pub run_id: Uuid,
    pub raw_output: String,
    pub export_manifest: String,
    pub companies: Vec<CompanyRow>,
}

pub struct SyncPipeline {
    config: SyncConfig,
    client: GraphqlClient,
    run_id: Uuid,
    cancel: CancellationToken,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let run_id = Uuid::new_v4();
        let client = config.graphql_client(run_id)?;
        Ok(Self::from_parts(config, client, run_id))
    }

    pub fn from_parts(config: SyncConfig, client: GraphqlClient, run_id: Uuid) -> Self {
        Self {
            config,
            client,
            run_id,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn client(&self) -> &GraphqlClient {
        &self.client
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn store(&self) -> BatchStore {
        BatchStore::new(self.config.output_dir.clone())
    }

    /// Pages through a listing, writing numbered batch files and a consolidated file into the
    /// output directory.
    pub async fn fetch_listing(
        &self,
        kind: ListingKind,
        document: OperationDocument,
        options: FetchOptions,
        pacer: Pacer,
    ) -> ListingRun {
        let started_at = Utc::now();
        info!(run_id = %self.run_id, kind = kind.noun(), max_pages = options.max_pages, "starting listing fetch");

        let fetcher = Arc::new(ListingFetcher::new(self.client.clone(), kind));
        let sink = Arc::new(JsonBatchSink::new(self.store(), kind.layout()));
        let mut orchestrator =
            FetchOrchestrator::new(fetcher, sink, pacer).with_cancellation(self.cancel.clone());
        let result = orchestrator.fetch_all(document, options).await;

        ListingRun {
            run_id: self.run_id,
            kind,
            started_at,
            finished_at: Utc::now(),
            result,
        }
    }

    /// Adds the company ids of fetched saved-search edges to a companies-by-id payload and
    /// saves it, keeping a backup. Returns the id count of the updated document.
    pub async fn queue_companies(&self, records: &[RawRecord], payload: &Path) -> Result<usize> {
        let ids = company_ids_from_edges(records);
        let mut document = OperationDocument::load(payload).await?;
        let total = document.add_company_ids(&ids)?;
        document.save(payload, true).await?;
        info!(added = ids.len(), total, payload = %payload.display(), "company ids queued");
        Ok(total)
    }

    /// Single `getCompaniesByIds` request: raw response saved, companies flattened and exported.
    pub async fn fetch_companies(&self, document: &OperationDocument) -> Result<CompaniesRun> {
        let response = self
            .client
            .companies_by_ids(document)
            .await
            .context("fetching companies by id")?;
        let stored = self
            .store()
            .write_json(COMPANIES_BY_ID_OUTPUT, &response)
            .await?;

        let companies = flatten_companies(&response, Utc::now().naive_utc());
        let export_dir = self.config.output_dir.join("exports");
        let manifest = export::write_company_exports(&export_dir, &companies).await?;
        info!(companies = companies.len(), raw = %stored.path.display(), "companies fetched");

        Ok(CompaniesRun {
            run_id: self.run_id,
            raw_output: stored.path.display().to_string(),
            export_manifest: manifest.display().to_string(),
            companies,
        })
    }

    /// Natural key and display name recorded upstream for `entity_id`. Lookup failures are
    /// logged and treated as "unknown".
    async fn identity_of(&self, entity_id: i64) -> Option<(String, Option<String>)> {
        match self.client.linkedin_identity(entity_id).await {
            Ok(identity) => identity.map(|i| (i.natural_key, i.full_name)),
            Err(err) => {
                warn!(entity_id, error = %err, "linkedin lookup failed");
                None
            }
        }
    }

    /// Fetches the full profile of `entity_id` and syncs it into the warehouse. Without a
    /// natural key one is looked up upstream; not finding one is an error, and so is a profile
    /// whose education and experience both failed to fetch.
    pub async fn sync_person(
        &self,
        warehouse: Arc<dyn Warehouse>,
        entity_id: i64,
        natural_key: Option<&str>,
        dry_run: bool,
        verbose: bool,
    ) -> Result<SyncReport> {
        let identity = self.identity_of(entity_id).await;
        let natural_key = match (natural_key, &identity) {
            (Some(key), _) => key.to_string(),
            (None, Some((key, _))) => {
                info!(entity_id, natural_key = %key, "natural key found upstream");
                key.clone()
            }
            (None, None) => bail!("could not find a LinkedIn ID for person {entity_id}; pass it explicitly"),
        };
        let mapping = PersonMapping {
            natural_key,
            entity_id,
            display_name: identity.and_then(|(_, name)| name),
        };

        let profile = self.client.full_profile(entity_id).await;
        info!(
            education = profile.education.len(),
            experience = profile.experience.len(),
            "profile entries found"
        );
        if profile.is_total_failure() {
            bail!(
                "fetching profile of person {entity_id} failed, nothing synced: {}",
                profile.errors.join("; ")
            );
        }

        let report = IdempotentSync::new(warehouse)
            .dry_run(dry_run)
            .verbose(verbose)
            .sync(&mapping, &profile, Utc::now())
            .await;
        export::write_sync_results(&self.config.output_dir, &report).await?;
        Ok(report)
    }

    pub async fn lookup(&self, warehouse: Arc<dyn Warehouse>, url_or_id: &str) -> Result<(LookupReport, PathBuf)> {
        let report = PersonResolver::new(self.client.clone(), warehouse)
            .lookup(url_or_id)
            .await;
        let path = export::write_report(&self.config.output_dir, export::LOOKUP_RESULTS_FILE, &report).await?;
        Ok((report, path))
    }
}
