//! Run configuration: optional YAML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hsync_client::{DailyNotifier, FailureNotifier, GraphqlClient, LogChannel, MessageChannel, WebhookChannel};
use hsync_storage::{GraphqlHttp, HttpClientConfig, Pacer, PacingPolicy, TokioClock, DEFAULT_BASE_URL};
use serde::Deserialize;
use uuid::Uuid;

use crate::orchestrator::{FetchOptions, DEFAULT_BATCH_CAPACITY, DEFAULT_MAX_PAGES};

pub const DEFAULT_CONFIG_PATH: &str = "./hsync.yaml";
const DEFAULT_NOTIFY_TARGET: &str = "harmonic-alerts";

/// Shape of `hsync.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_token: Option<String>,
    pub base_url: Option<String>,
    pub database_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub max_pages: Option<u32>,
    pub batch_size: Option<usize>,
    pub pacing: Option<bool>,
    pub http_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub notify_target: Option<String>,
}

impl FileConfig {
    /// A missing file is an empty config; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub database_url: Option<String>,
    pub output_dir: PathBuf,
    pub max_pages: u32,
    pub batch_size: usize,
    pub pacing: bool,
    pub http_timeout_secs: u64,
    pub user_agent: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub notify_target: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env_var(name).map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "on" | "yes"))
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let path = env_var("HSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Ok(Self::from_file_and_env(FileConfig::load(&path)?))
    }

    pub fn from_file_and_env(file: FileConfig) -> Self {
        Self {
            api_token: env_var("HARMONIC_API_TOKEN").or(file.api_token),
            base_url: env_var("HARMONIC_BASE_URL")
                .or(file.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            database_url: env_var("DATABASE_URL").or(file.database_url),
            output_dir: env_var("HSYNC_OUTPUT_DIR")
                .map(PathBuf::from)
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            max_pages: env_parsed("HSYNC_MAX_PAGES")
                .or(file.max_pages)
                .unwrap_or(DEFAULT_MAX_PAGES),
            batch_size: env_parsed("HSYNC_BATCH_SIZE")
                .or(file.batch_size)
                .unwrap_or(DEFAULT_BATCH_CAPACITY),
            pacing: env_flag("HSYNC_PACING").or(file.pacing).unwrap_or(true),
            http_timeout_secs: env_parsed("HSYNC_HTTP_TIMEOUT_SECS")
                .or(file.http_timeout_secs)
                .unwrap_or(30),
            user_agent: env_var("HSYNC_USER_AGENT").or(file.user_agent),
            notify_webhook_url: env_var("HSYNC_NOTIFY_WEBHOOK_URL").or(file.notify_webhook_url),
            notify_target: env_var("HSYNC_NOTIFY_TARGET")
                .or(file.notify_target)
                .unwrap_or_else(|| DEFAULT_NOTIFY_TARGET.to_string()),
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            max_pages: self.max_pages,
            batch_capacity: self.batch_size,
        }
    }

    pub fn pacer(&self) -> Pacer {
        if self.pacing {
            Pacer::new(PacingPolicy::default(), Arc::new(TokioClock))
        } else {
            Pacer::disabled()
        }
    }

    pub fn http_config(&self) -> Result<HttpClientConfig> {
        let raw = self
            .api_token
            .as_deref()
            .context("HARMONIC_API_TOKEN is not set")?;
        let mut http = HttpClientConfig::new(normalize_token(raw)?);
        http.base_url = self.base_url.clone();
        http.timeout = Duration::from_secs(self.http_timeout_secs);
        http.user_agent = self.user_agent.clone();
        Ok(http)
    }

    pub fn notifier(&self) -> Arc<dyn FailureNotifier> {
        let channel: Arc<dyn MessageChannel> = match &self.notify_webhook_url {
            Some(url) => Arc::new(WebhookChannel::new(url.clone())),
            None => Arc::new(LogChannel),
        };
        Arc::new(DailyNotifier::new(channel, self.notify_target.clone()))
    }

    /// HTTP transport plus notifier, built once per run.
    pub fn graphql_client(&self, run_id: Uuid) -> Result<GraphqlClient> {
        let transport = GraphqlHttp::new(&self.http_config()?, run_id).context("building HTTP client")?;
        Ok(GraphqlClient::new(Arc::new(transport), self.notifier()))
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().context("DATABASE_URL is not set")
    }
}

/// Accepts `Bearer <jwt>` or a bare JWT, optionally quoted, and returns the header value.
pub fn normalize_token(raw: &str) -> Result<String> {
    let token = raw.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
    if token.starts_with("eyJ") {
        return Ok(format!("Bearer {token}"));
    }
    let Some(jwt) = token.strip_prefix("Bearer ") else {
        bail!("token must start with 'Bearer ' or be a bare JWT");
    };
    if jwt.split('.').count() != 3 {
        bail!("token does not look like a JWT (expected three dot-separated parts)");
    }
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tokens_are_normalized() {
        assert_eq!(normalize_token("eyJa.b.c").expect("bare"), "Bearer eyJa.b.c");
        assert_eq!(normalize_token("\"Bearer eyJa.b.c\"").expect("quoted"), "Bearer eyJa.b.c");
        assert_eq!(normalize_token(" 'eyJa.b.c' ").expect("single quoted"), "Bearer eyJa.b.c");
        assert!(normalize_token("Bearer abc").is_err());
        assert!(normalize_token("token123").is_err());
    }

    #[test]
    fn missing_file_is_empty_and_yaml_is_parsed() {
        let dir = tempdir().expect("tempdir");
        let missing = FileConfig::load(&dir.path().join("absent.yaml")).expect("missing is fine");
        assert!(missing.base_url.is_none());

        let path = dir.path().join("hsync.yaml");
        std::fs::write(&path, "max_pages: 5\nbatch_size: 50\npacing: false\noutput_dir: out\n").expect("write");
        let file = FileConfig::load(&path).expect("parse");
        assert_eq!(file.max_pages, Some(5));
        assert_eq!(file.output_dir.as_deref(), Some(Path::new("out")));

        std::fs::write(&path, "max_pagez: 5\n").expect("write");
        assert!(FileConfig::load(&path).is_err());
    }

    #[test]
    fn file_values_fill_in_defaults() {
        let file = FileConfig {
            api_token: Some("eyJa.b.c".into()),
            notify_target: Some("ops".into()),
            ..FileConfig::default()
        };
        let config = SyncConfig::from_file_and_env(file);
        assert_eq!(config.notify_target, "ops");

        let http = config.http_config().expect("token present");
        assert_eq!(http.auth_token, "Bearer eyJa.b.c");
        assert_eq!(http.timeout, Duration::from_secs(config.http_timeout_secs));

        let without_token = SyncConfig {
            api_token: None,
            ..config
        };
        assert!(without_token.http_config().is_err());
    }
}
