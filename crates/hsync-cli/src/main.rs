use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use hsync_client::format::{
    company_summary, format_company, format_education, format_experience, format_investor,
    format_person,
};
use hsync_client::{flatten_companies, ListingKind, OperationDocument};
use hsync_core::TerminalReason;
use hsync_storage::Pacer;
use hsync_sync::{summary_lines, FetchOptions, ListingRun, PgWarehouse, SyncConfig, SyncPipeline};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SAVED_SEARCH_PAYLOAD: &str = "payloads/get_company_saved_search_results.json";
const SEARCH_PEOPLE_PAYLOAD: &str = "payloads/search_people.json";
const COMPANIES_PAYLOAD: &str = "payloads/get_companies_by_ids.json";

#[derive(Debug, Parser)]
#[command(name = "hsync-cli")]
#[command(about = "Harmonic fetch and warehouse sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct ListingArgs {
    /// Operation document to send; its `after` variable is rewritten per page.
    #[arg(long)]
    payload: Option<PathBuf>,
    #[arg(long)]
    max_pages: Option<u32>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    no_pacing: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Page through a company saved search.
    SavedSearch {
        id: String,
        #[command(flatten)]
        listing: ListingArgs,
        /// Add the fetched company ids to this companies-by-id payload.
        #[arg(long, value_name = "PAYLOAD")]
        queue_companies: Option<PathBuf>,
    },
    /// Page through a people search.
    SearchPeople {
        #[command(flatten)]
        listing: ListingArgs,
    },
    /// Fetch companies by id and export them.
    Companies {
        #[arg(required = true)]
        ids: Vec<i64>,
        #[arg(long)]
        payload: Option<PathBuf>,
        /// Write the updated id list back to the payload file, keeping a backup.
        #[arg(long)]
        save_payload: bool,
    },
    /// Typeahead search over people, companies and investors.
    Search { query: String },
    Education { person_id: i64 },
    Experience { person_id: i64 },
    Profile { person_id: i64 },
    /// Resolve a LinkedIn URL or id and fetch the matching profile.
    Lookup { linkedin_url_or_id: String },
    /// Sync one person into the warehouse; existing rows are never modified.
    Sync {
        harmonic_id: i64,
        linkedin_id: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        verbose: bool,
    },
    /// Create the warehouse tables.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current page");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::SavedSearch {
            id,
            listing,
            queue_companies,
        } => {
            let pipeline = SyncPipeline::new(config)?.with_cancellation(cancel);
            let mut document =
                OperationDocument::load(listing.payload.clone().unwrap_or_else(|| SAVED_SEARCH_PAYLOAD.into()))
                    .await?;
            document.with_saved_search_id(&id)?;
            let run = run_listing(&pipeline, ListingKind::SavedSearchCompanies, document, &listing).await;
            let rows = flatten_companies(&json!({ "companies": run.result.records }), Utc::now().naive_utc());
            println!("{}", company_summary(&rows));
            if let Some(payload) = queue_companies {
                let total = pipeline.queue_companies(&run.result.records, &payload).await?;
                println!("{} now lists {total} company ids", payload.display());
            }
            finish_listing(&run)?;
        }
        Commands::SearchPeople { listing } => {
            let pipeline = SyncPipeline::new(config)?.with_cancellation(cancel);
            let document =
                OperationDocument::load(listing.payload.clone().unwrap_or_else(|| SEARCH_PEOPLE_PAYLOAD.into()))
                    .await?;
            let run = run_listing(&pipeline, ListingKind::PeopleSearch, document, &listing).await;
            finish_listing(&run)?;
        }
        Commands::Companies {
            ids,
            payload,
            save_payload,
        } => {
            let pipeline = SyncPipeline::new(config)?;
            let path = payload.unwrap_or_else(|| COMPANIES_PAYLOAD.into());
            let mut document = OperationDocument::load(&path).await?;
            document.add_company_ids(&ids)?;
            if save_payload {
                document.save(&path, true).await?;
            }
            let run = pipeline.fetch_companies(&document).await?;
            println!("{}", company_summary(&run.companies));
            println!("raw response: {}", run.raw_output);
            println!("export manifest: {}", run.export_manifest);
        }
        Commands::Search { query } => {
            let pipeline = SyncPipeline::new(config)?;
            let results = pipeline.client().typeahead_search(&query).await?;
            println!("People ({}):", results.people.len());
            results.people.iter().for_each(|p| println!("{}", format_person(p)));
            println!("Companies ({}):", results.companies.len());
            results.companies.iter().for_each(|c| println!("{}", format_company(c)));
            println!("Investors ({}):", results.investors.len());
            results.investors.iter().for_each(|i| println!("{}", format_investor(i)));
        }
        Commands::Education { person_id } => {
            let pipeline = SyncPipeline::new(config)?;
            let entries = pipeline.client().education(person_id).await?;
            println!("Education ({}):", entries.len());
            entries.iter().for_each(|e| println!("{}", format_education(e)));
        }
        Commands::Experience { person_id } => {
            let pipeline = SyncPipeline::new(config)?;
            let entries = pipeline.client().experience(person_id).await?;
            println!("Experience ({}):", entries.len());
            entries.iter().for_each(|e| println!("{}", format_experience(e)));
        }
        Commands::Profile { person_id } => {
            let pipeline = SyncPipeline::new(config)?;
            let profile = pipeline.client().full_profile(person_id).await;
            println!("Highlights: {}", profile.highlights.join(", "));
            println!("Education ({}):", profile.education.len());
            profile.education.iter().for_each(|e| println!("{}", format_education(e)));
            println!("Experience ({}):", profile.experience.len());
            profile.experience.iter().for_each(|e| println!("{}", format_experience(e)));
            profile.errors.iter().for_each(|e| println!("error: {e}"));
        }
        Commands::Lookup { linkedin_url_or_id } => {
            let warehouse = PgWarehouse::connect(config.require_database_url()?).await?;
            let pipeline = SyncPipeline::new(config)?;
            let (report, path) = pipeline.lookup(Arc::new(warehouse), &linkedin_url_or_id).await?;
            match report.entity_id {
                Some(id) => println!(
                    "{} -> {} ({}){}",
                    report.natural_key,
                    id,
                    report.display_name.as_deref().unwrap_or("unknown name"),
                    if report.found_in_mapping { "" } else { " via search" }
                ),
                None => println!("{}: no match", report.natural_key),
            }
            if let Some(profile) = &report.profile {
                profile.education.iter().for_each(|e| println!("{}", format_education(e)));
                profile.experience.iter().for_each(|e| println!("{}", format_experience(e)));
            }
            report.errors.iter().for_each(|e| println!("error: {e}"));
            println!("results written to {}", path.display());
        }
        Commands::Sync {
            harmonic_id,
            linkedin_id,
            dry_run,
            verbose,
        } => {
            let warehouse = PgWarehouse::connect(config.require_database_url()?).await?;
            let pipeline = SyncPipeline::new(config)?;
            let report = pipeline
                .sync_person(Arc::new(warehouse), harmonic_id, linkedin_id.as_deref(), dry_run, verbose)
                .await?;
            println!("Sync {} ({}):", report.natural_key, report.entity_id);
            summary_lines(&report).iter().for_each(|line| println!("{line}"));
            report.errors.iter().for_each(|e| println!("error: {e}"));
        }
        Commands::Migrate => {
            let warehouse = PgWarehouse::connect(config.require_database_url()?).await?;
            warehouse.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn run_listing(
    pipeline: &SyncPipeline,
    kind: ListingKind,
    document: OperationDocument,
    args: &ListingArgs,
) -> ListingRun {
    let defaults = pipeline.config().fetch_options();
    let options = FetchOptions {
        max_pages: args.max_pages.unwrap_or(defaults.max_pages),
        batch_capacity: args.batch_size.unwrap_or(defaults.batch_capacity),
    };
    let pacer = if args.no_pacing {
        Pacer::disabled()
    } else {
        pipeline.config().pacer()
    };
    pipeline.fetch_listing(kind, document, options, pacer).await
}

fn finish_listing(run: &ListingRun) -> Result<()> {
    let result = &run.result;
    let total = result
        .total_count
        .map(|t| t.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "{} {} fetched of {} over {} pages ({})",
        result.records_fetched(),
        run.kind.noun(),
        total,
        result.pages_fetched,
        result.terminal_reason
    );
    for batch in &result.batches {
        println!("  batch {:03}: {} records -> {}", batch.sequence, batch.record_count, batch.location);
    }
    if let Some(consolidated) = &result.consolidated {
        println!("  consolidated -> {consolidated}");
    }
    if result.terminal_reason == TerminalReason::Cancelled {
        info!(run_id = %run.run_id, "listing fetch cancelled");
    }
    if let Some(error) = &result.error {
        println!("error: {error}");
    }
    if result.is_total_failure() {
        bail!("{} fetch failed before any records came back", run.kind.noun());
    }
    Ok(())
}
