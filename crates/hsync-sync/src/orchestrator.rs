//! Cursor-driven fetch loop: page fetcher, batch accumulator and pacer in strict sequence.

use std::sync::Arc;

use hsync_client::{OperationDocument, PageFetcher, PageOutcome};
use hsync_core::{BatchWriteResult, FetchResult, RawRecord, TerminalReason};
use hsync_storage::{BatchSink, Pacer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::accumulator::BatchAccumulator;

pub const DEFAULT_MAX_PAGES: u32 = 100;
pub const DEFAULT_BATCH_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Page ceiling; 0 is treated as 1.
    pub max_pages: u32,
    pub batch_capacity: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
        }
    }
}

pub struct FetchOrchestrator {
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn BatchSink>,
    pacer: Pacer,
    cancel: CancellationToken,
}

impl FetchOrchestrator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, sink: Arc<dyn BatchSink>, pacer: Pacer) -> Self {
        Self {
            fetcher,
            sink,
            pacer,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetches pages until the listing is exhausted, the page ceiling is hit, a page fails or
    /// the run is cancelled. Records gathered before a failure are always returned, and every
    /// record ends up in exactly one flushed batch.
    pub async fn fetch_all(&mut self, mut request: OperationDocument, options: FetchOptions) -> FetchResult {
        let max_pages = options.max_pages.max(1);
        let mut accumulator = BatchAccumulator::new(self.sink.clone(), options.batch_capacity);

        let mut page_number: u32 = 1;
        let mut pages_fetched: u32 = 0;
        let mut total_count: Option<u64> = None;
        let mut records: Vec<RawRecord> = Vec::new();
        let mut batches: Vec<BatchWriteResult> = Vec::new();
        let mut error: Option<String> = None;

        let mut terminal_reason = loop {
            info!(page = page_number, operation = %request.operation_name, "fetching page");
            let page = match self.fetcher.fetch(&request).await {
                PageOutcome::Success(page) => page,
                PageOutcome::Partial { page, failure } => {
                    warn!(
                        page = page_number,
                        discarded = page.records.len(),
                        detail = %failure.detail,
                        "page returned errors, stopping"
                    );
                    error = Some(failure.into_error().to_string());
                    break TerminalReason::Error;
                }
                PageOutcome::Fatal(err) => {
                    warn!(page = page_number, error = %err, "page fetch failed, stopping");
                    error = Some(err.to_string());
                    break TerminalReason::Error;
                }
            };
            pages_fetched += 1;

            records.extend(page.records.iter().cloned());
            accumulator.append(&page.records);
            match accumulator.flush_if_full().await {
                Ok(Some(batch)) => batches.push(batch),
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "batch write failed, stopping");
                    error = Some(format!("{err:#}"));
                    break TerminalReason::Error;
                }
            }

            if total_count.is_none() {
                total_count = page.total_count;
            }

            let Some(cursor) = page.continuation() else {
                if page.has_next {
                    warn!(page = page_number, "next page announced without a cursor");
                }
                break TerminalReason::Exhausted;
            };
            if page_number >= max_pages {
                info!(max_pages, "reached max pages, stopping pagination");
                break TerminalReason::PageLimitReached;
            }

            request.set_cursor(cursor);
            page_number += 1;

            if self.cancel.is_cancelled() {
                break TerminalReason::Cancelled;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break TerminalReason::Cancelled,
                _ = self.pacer.pause() => {}
            }
        };

        if terminal_reason == TerminalReason::Cancelled {
            info!(pages_fetched, "fetch cancelled");
        }

        match accumulator.flush_remainder().await {
            Ok(Some(batch)) => batches.push(batch),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "final batch write failed");
                error.get_or_insert_with(|| format!("{err:#}"));
                terminal_reason = TerminalReason::Error;
            }
        }

        let consolidated = match self.sink.write_consolidated(&records).await {
            Ok(location) => Some(location),
            Err(err) => {
                warn!(error = %err, "consolidated write failed");
                error.get_or_insert_with(|| format!("{err:#}"));
                terminal_reason = TerminalReason::Error;
                None
            }
        };

        info!(
            total_count = ?total_count,
            fetched = records.len(),
            pages_fetched,
            batches = batches.len(),
            reason = %terminal_reason,
            "fetch finished"
        );

        FetchResult {
            total_count,
            records,
            pages_fetched,
            terminal_reason,
            batches,
            consolidated,
            error,
        }
    }
}
