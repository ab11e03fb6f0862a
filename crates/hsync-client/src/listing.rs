use async_trait::async_trait;
use hsync_core::Page;
use tracing::info;

use crate::{ClientError, GraphqlClient, GraphqlFailure, ListingKind, OperationDocument, ResponseOutcome};

#[derive(Debug)]
pub enum PageOutcome {
    Success(Page),
    /// The upstream reported errors next to whatever page data it still returned.
    Partial { page: Page, failure: GraphqlFailure },
    Fatal(ClientError),
}

/// One paginated request, with the cursor variable already set by the caller.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &OperationDocument) -> PageOutcome;
}

#[derive(Clone)]
pub struct ListingFetcher {
    client: GraphqlClient,
    kind: ListingKind,
}

impl ListingFetcher {
    pub fn new(client: GraphqlClient, kind: ListingKind) -> Self {
        Self { client, kind }
    }
}

#[async_trait]
impl PageFetcher for ListingFetcher {
    async fn fetch(&self, request: &OperationDocument) -> PageOutcome {
        match self.client.execute(request).await {
            ResponseOutcome::Success(data) => {
                let page = self.kind.extract_page(&data);
                info!(count = page.records.len(), kind = self.kind.noun(), "records in this page");
                PageOutcome::Success(page)
            }
            ResponseOutcome::Partial { data, failure } => PageOutcome::Partial {
                page: self.kind.extract_page(&data),
                failure,
            },
            ResponseOutcome::Fatal(err) => PageOutcome::Fatal(err),
        }
    }
}
