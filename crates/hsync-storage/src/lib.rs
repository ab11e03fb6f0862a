//! Durable batch storage + GraphQL HTTP transport for hsync.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hsync_core::{BatchWriteResult, RawRecord};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub mod pacer;

pub use pacer::{Clock, ManualClock, PaceDecision, Pacer, PacingPolicy, TokioClock};

pub const CRATE_NAME: &str = "hsync-storage";

pub const DEFAULT_BASE_URL: &str = "https://api.harmonic.ai/graphql";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";
const ORIGIN: &str = "https://console.harmonic.ai";
const REFERER: &str = "https://console.harmonic.ai/";

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub content_hash: String,
    pub path: PathBuf,
    pub byte_size: usize,
}

/// Directory of JSON output files. Writes go through a temp file and an atomic rename,
/// so an existing file with the same name is replaced whole.
#[derive(Debug, Clone)]
pub struct BatchStore {
    root: PathBuf,
}

impl BatchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub async fn write_json(&self, file_name: &str, value: &JsonValue) -> anyhow::Result<StoredFile> {
        let bytes = serde_json::to_vec_pretty(value).with_context(|| format!("serializing {file_name}"))?;
        self.write_bytes(file_name, &bytes).await
    }

    pub async fn write_bytes(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<StoredFile> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating output directory {}", self.root.display()))?;

        let path = self.root.join(file_name);
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!("renaming {} -> {}", temp_path.display(), path.display())
            });
        }

        Ok(StoredFile {
            content_hash: Self::sha256_hex(bytes),
            path,
            byte_size: bytes.len(),
        })
    }
}

/// File naming for one listing operation's batch output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLayout {
    pub file_prefix: &'static str,
    pub collection_key: &'static str,
    pub consolidated_name: &'static str,
}

impl BatchLayout {
    pub const COMPANIES: BatchLayout = BatchLayout {
        file_prefix: "harmonic_companies",
        collection_key: "companies",
        consolidated_name: "harmonic_companies_output.json",
    };

    pub const PEOPLE: BatchLayout = BatchLayout {
        file_prefix: "harmonic_output",
        collection_key: "people",
        consolidated_name: "harmonic_output.json",
    };

    pub fn batch_file_name(&self, sequence: u32) -> String {
        format!("{}_batch_{:03}.json", self.file_prefix, sequence)
    }

    fn wrap(&self, records: &[RawRecord]) -> JsonValue {
        let mut map = serde_json::Map::new();
        map.insert(
            self.collection_key.to_string(),
            JsonValue::Array(records.to_vec()),
        );
        JsonValue::Object(map)
    }
}

/// Durable destination for flushed batches and the final consolidated record set.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn write_batch(&self, sequence: u32, records: &[RawRecord]) -> anyhow::Result<BatchWriteResult>;

    async fn write_consolidated(&self, records: &[RawRecord]) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct JsonBatchSink {
    store: BatchStore,
    layout: BatchLayout,
}

impl JsonBatchSink {
    pub fn new(store: BatchStore, layout: BatchLayout) -> Self {
        Self { store, layout }
    }

    pub fn layout(&self) -> BatchLayout {
        self.layout
    }
}

#[async_trait]
impl BatchSink for JsonBatchSink {
    async fn write_batch(&self, sequence: u32, records: &[RawRecord]) -> anyhow::Result<BatchWriteResult> {
        let file_name = self.layout.batch_file_name(sequence);
        let stored = self
            .store
            .write_json(&file_name, &self.layout.wrap(records))
            .await?;
        info!(sequence, records = records.len(), file = %stored.path.display(), "saved batch");
        Ok(BatchWriteResult {
            sequence,
            location: stored.path.display().to_string(),
            record_count: records.len(),
            content_hash: stored.content_hash,
        })
    }

    async fn write_consolidated(&self, records: &[RawRecord]) -> anyhow::Result<String> {
        let stored = self
            .store
            .write_json(self.layout.consolidated_name, &self.layout.wrap(records))
            .await?;
        info!(records = records.len(), file = %stored.path.display(), "saved consolidated output");
        Ok(stored.path.display().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Unauthorized,
    Failed,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 | 403 => StatusClass::Unauthorized,
        _ => StatusClass::Failed,
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid header value for {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportReply {
    pub fn status_class(&self) -> StatusClass {
        classify_status(self.status)
    }
}

/// One GraphQL POST; any HTTP status comes back as a reply, only network failures are errors.
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    async fn post(&self, operation: &str, payload: &JsonValue) -> Result<TransportReply, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub auth_token: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl HttpClientConfig {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: auth_token.into(),
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }

    fn default_headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&self.auth_token).map_err(|e| TransportError::InvalidHeader {
                name: "authorization",
                reason: e.to_string(),
            })?,
        );
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::ORIGIN, HeaderValue::from_static(ORIGIN));
        headers.insert(header::REFERER, HeaderValue::from_static(REFERER));
        headers.insert(
            HeaderName::from_static("x-harmonic-request-source"),
            HeaderValue::from_static("frontend"),
        );
        headers.insert(HeaderName::from_static("version"), HeaderValue::from_static("FE"));
        Ok(headers)
    }
}

#[derive(Debug)]
pub struct GraphqlHttp {
    client: reqwest::Client,
    base_url: String,
    run_id: Uuid,
}

impl GraphqlHttp {
    pub fn new(config: &HttpClientConfig, run_id: Uuid) -> Result<Self, TransportError> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(user_agent)
            .default_headers(config.default_headers()?)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('?').to_string(),
            run_id,
        })
    }

    pub fn operation_url(&self, operation: &str) -> String {
        format!("{}?{}", self.base_url, operation)
    }
}

#[async_trait]
impl GraphqlTransport for GraphqlHttp {
    async fn post(&self, operation: &str, payload: &JsonValue) -> Result<TransportReply, TransportError> {
        let url = self.operation_url(operation);
        let span = info_span!("graphql_request", run_id = %self.run_id, operation);

        async {
            let resp = self.client.post(&url).json(payload).send().await?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await?.to_vec();
            debug!(status, bytes = body.len(), "graphql response");
            Ok::<_, TransportError>(TransportReply { status, body })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn content_hashing_is_stable() {
        let hash = BatchStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn batch_file_names_are_zero_padded() {
        assert_eq!(
            BatchLayout::COMPANIES.batch_file_name(1),
            "harmonic_companies_batch_001.json"
        );
        assert_eq!(BatchLayout::PEOPLE.batch_file_name(42), "harmonic_output_batch_042.json");
        assert_eq!(
            BatchLayout::PEOPLE.batch_file_name(1234),
            "harmonic_output_batch_1234.json"
        );
    }

    #[test]
    fn status_classification_separates_auth_failures() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
        assert_eq!(classify_status(401), StatusClass::Unauthorized);
        assert_eq!(classify_status(403), StatusClass::Unauthorized);
        assert_eq!(classify_status(429), StatusClass::Failed);
        assert_eq!(classify_status(500), StatusClass::Failed);
    }

    #[tokio::test]
    async fn batch_writes_overwrite_existing_files() {
        let dir = tempdir().expect("tempdir");
        let sink = JsonBatchSink::new(BatchStore::new(dir.path()), BatchLayout::COMPANIES);

        let first = sink
            .write_batch(1, &[json!({"id": 1})])
            .await
            .expect("first write");
        let second = sink
            .write_batch(1, &[json!({"id": 2}), json!({"id": 3})])
            .await
            .expect("second write");

        assert_eq!(first.location, second.location);
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(second.record_count, 2);

        let text = std::fs::read_to_string(&second.location).expect("read batch");
        let value: JsonValue = serde_json::from_str(&text).expect("parse batch");
        assert_eq!(value, json!({"companies": [{"id": 2}, {"id": 3}]}));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn consolidated_output_uses_layout_name() {
        let dir = tempdir().expect("tempdir");
        let sink = JsonBatchSink::new(BatchStore::new(dir.path()), BatchLayout::PEOPLE);
        let location = sink
            .write_consolidated(&[json!({"node": {"id": 7}})])
            .await
            .expect("consolidated");
        assert!(location.ends_with("harmonic_output.json"));
        let value: JsonValue =
            serde_json::from_str(&std::fs::read_to_string(&location).unwrap()).unwrap();
        assert_eq!(value["people"][0]["node"]["id"], 7);
    }

    #[test]
    fn http_config_rejects_unprintable_tokens() {
        let config = HttpClientConfig::new("Bearer abc\ndef");
        let err = GraphqlHttp::new(&config, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, TransportError::InvalidHeader { name: "authorization", .. }));
    }

    #[test]
    fn operation_url_appends_operation_name() {
        let mut config = HttpClientConfig::new("Bearer abc.def.ghi");
        config.base_url = "https://example.test/graphql".into();
        let http = GraphqlHttp::new(&config, Uuid::new_v4()).expect("client");
        assert_eq!(
            http.operation_url("GetPersonEducation"),
            "https://example.test/graphql?GetPersonEducation"
        );
    }
}
