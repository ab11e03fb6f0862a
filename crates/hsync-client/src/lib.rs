//! Harmonic GraphQL operations on top of the hsync transport: response classification,
//! listing pages, person detail and company lookups.

use std::sync::Arc;

use hsync_core::NotificationCategory;
use hsync_storage::{GraphqlTransport, StatusClass, TransportError, TransportReply};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

pub mod company;
pub mod document;
pub mod format;
pub mod listing;
pub mod notify;
pub mod person;
pub mod shape;

pub use company::{company_ids, company_ids_from_edges, flatten_companies, flatten_company};
pub use document::OperationDocument;
pub use listing::{ListingFetcher, PageFetcher, PageOutcome};
pub use notify::{
    ChannelMessage, DailyNotifier, FailureNotifier, LogChannel, MemoryChannel, MessageChannel,
    WebhookChannel,
};
pub use person::{extract_natural_key, natural_key_from_profile_url, LinkedinIdentity, TypeaheadResults};
pub use shape::ListingKind;

pub const CRATE_NAME: &str = "hsync-client";

/// Case-insensitive substrings that mark a GraphQL error list as an authentication problem.
pub const AUTH_KEYWORDS: [&str; 8] = [
    "unauthorized",
    "unauthenticated",
    "token",
    "expired",
    "invalid",
    "forbidden",
    "401",
    "403",
];

/// Error text forwarded to notifications and reports is cut to this many characters.
pub const ERROR_DETAIL_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication failed: {detail}")]
    Auth { detail: String },
    #[error("GraphQL errors: {detail}")]
    Api { detail: String },
    #[error("HTTP {status} from {operation}")]
    HttpStatus { status: u16, operation: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("decoding {operation} response: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid operation document: {0}")]
    InvalidDocument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Api,
}

impl FailureKind {
    pub fn category(self) -> NotificationCategory {
        match self {
            Self::Auth => NotificationCategory::AuthFailure,
            Self::Api => NotificationCategory::ApiError,
        }
    }
}

/// A top-level GraphQL `errors` list, classified and truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphqlFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl GraphqlFailure {
    pub fn from_errors(errors: &JsonValue) -> Self {
        let text = match errors {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        let kind = if is_auth_error_text(&text) {
            FailureKind::Auth
        } else {
            FailureKind::Api
        };
        Self {
            kind,
            detail: truncate_detail(&text),
        }
    }

    pub fn into_error(self) -> ClientError {
        match self.kind {
            FailureKind::Auth => ClientError::Auth {
                detail: self.detail,
            },
            FailureKind::Api => ClientError::Api {
                detail: self.detail,
            },
        }
    }
}

pub fn is_auth_error_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    AUTH_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

pub fn truncate_detail(text: &str) -> String {
    text.chars().take(ERROR_DETAIL_LIMIT).collect()
}

/// Classified result of one GraphQL call.
#[derive(Debug)]
pub enum ResponseOutcome {
    /// The `data` object of an error-free response.
    Success(JsonValue),
    /// Errors were reported alongside usable `data`.
    Partial {
        data: JsonValue,
        failure: GraphqlFailure,
    },
    Fatal(ClientError),
}

impl ResponseOutcome {
    pub fn classify(operation: &str, reply: &TransportReply) -> Self {
        match reply.status_class() {
            StatusClass::Success => {}
            StatusClass::Unauthorized => {
                return Self::Fatal(ClientError::Auth {
                    detail: format!("HTTP {}: {operation}", reply.status),
                })
            }
            StatusClass::Failed => {
                return Self::Fatal(ClientError::HttpStatus {
                    status: reply.status,
                    operation: operation.to_string(),
                })
            }
        }

        let mut body: JsonValue = match serde_json::from_slice(&reply.body) {
            Ok(body) => body,
            Err(source) => {
                return Self::Fatal(ClientError::Decode {
                    operation: operation.to_string(),
                    source,
                })
            }
        };
        let data = body
            .get_mut("data")
            .map(JsonValue::take)
            .unwrap_or(JsonValue::Null);

        match body.get("errors") {
            Some(errors) if !errors.is_null() => {
                let failure = GraphqlFailure::from_errors(errors);
                if data.is_null() {
                    Self::Fatal(failure.into_error())
                } else {
                    Self::Partial { data, failure }
                }
            }
            _ => Self::Success(data),
        }
    }

    /// Detail operations treat any reported error as fatal.
    pub fn into_strict(self) -> Result<JsonValue, ClientError> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Partial { failure, .. } => Err(failure.into_error()),
            Self::Fatal(err) => Err(err),
        }
    }

    fn notification(&self) -> Option<(NotificationCategory, String)> {
        match self {
            Self::Success(_) => None,
            Self::Partial { failure, .. } => Some((failure.kind.category(), failure.detail.clone())),
            Self::Fatal(ClientError::Auth { detail }) => {
                Some((NotificationCategory::AuthFailure, detail.clone()))
            }
            Self::Fatal(ClientError::Api { detail }) => {
                Some((NotificationCategory::ApiError, detail.clone()))
            }
            Self::Fatal(_) => None,
        }
    }
}

/// Stateless operation layer: a transport plus the notifier every failure is reported to.
#[derive(Clone)]
pub struct GraphqlClient {
    transport: Arc<dyn GraphqlTransport>,
    notifier: Arc<dyn FailureNotifier>,
}

impl GraphqlClient {
    pub fn new(transport: Arc<dyn GraphqlTransport>, notifier: Arc<dyn FailureNotifier>) -> Self {
        Self {
            transport,
            notifier,
        }
    }

    /// Sends one document and classifies the reply. Auth and GraphQL failures are passed to
    /// the notifier before returning.
    pub async fn execute(&self, document: &OperationDocument) -> ResponseOutcome {
        let operation = document.operation_name.as_str();
        let outcome = match self.transport.post(operation, &document.to_payload()).await {
            Ok(reply) => ResponseOutcome::classify(operation, &reply),
            Err(err) => ResponseOutcome::Fatal(err.into()),
        };
        if let Some((category, detail)) = outcome.notification() {
            warn!(operation, category = category.as_str(), %detail, "upstream failure");
            self.notifier.notify(category, &detail).await;
        }
        outcome
    }

    pub async fn execute_strict(&self, document: &OperationDocument) -> Result<JsonValue, ClientError> {
        self.execute(document).await.into_strict()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hsync_core::NotificationCategory;
    use hsync_storage::{GraphqlTransport, TransportError, TransportReply};
    use serde_json::Value as JsonValue;

    use crate::FailureNotifier;

    /// Replays canned replies in order and records which operations were posted.
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<TransportReply>>,
        pub posted: Mutex<Vec<(String, JsonValue)>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<TransportReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                posted: Mutex::new(Vec::new()),
            }
        }

        pub fn operations(&self) -> Vec<String> {
            self.posted
                .lock()
                .unwrap()
                .iter()
                .map(|(op, _)| op.clone())
                .collect()
        }
    }

    pub fn ok(body: JsonValue) -> TransportReply {
        TransportReply {
            status: 200,
            body: body.to_string().into_bytes(),
        }
    }

    pub fn status(code: u16) -> TransportReply {
        TransportReply {
            status: code,
            body: b"{}".to_vec(),
        }
    }

    #[async_trait]
    impl GraphqlTransport for ScriptedTransport {
        async fn post(&self, operation: &str, payload: &JsonValue) -> Result<TransportReply, TransportError> {
            self.posted
                .lock()
                .unwrap()
                .push((operation.to_string(), payload.clone()));
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| status(500)))
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub calls: Mutex<Vec<(NotificationCategory, String)>>,
    }

    #[async_trait]
    impl FailureNotifier for RecordingNotifier {
        async fn notify(&self, category: NotificationCategory, detail: &str) {
            self.calls
                .lock()
                .unwrap()
                .push((category, detail.to_string()));
        }
    }
}
