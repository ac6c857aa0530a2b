//! Token usage reporting over the trailing 24 hours, against the relay
//! station's data API. Optional: left unwired unless the auth env vars are
//! set.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://new.xigua.wiki/api/data/";
const WINDOW_SECS: i64 = 86_400;

#[derive(Debug, Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<Vec<UsagePoint>>,
}

#[derive(Debug, Deserialize)]
struct UsagePoint {
    #[serde(default)]
    token_used: u64,
}

/// Aggregated usage over the query window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSummary {
    pub total_tokens: u64,
    pub points: usize,
    pub window_start: DateTime<Local>,
    pub window_end: DateTime<Local>,
}

pub struct UsageClient {
    base_url: String,
    token: String,
    user_id: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl UsageClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            user_id: user_id.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Build from `USAGE_API_TOKEN` / `USAGE_API_USER` (and optionally
    /// `USAGE_API_URL`). `None` when the token is unset: the usage command
    /// then reports itself as unconfigured instead of failing per call.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("USAGE_API_TOKEN").ok()?;
        let user_id = std::env::var("USAGE_API_USER").unwrap_or_default();
        let base_url =
            std::env::var("USAGE_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Some(Self::new(base_url, token, user_id))
    }

    /// Sum `token_used` over hourly points in the last 24 hours.
    ///
    /// `Ok(None)` means the API answered but with no usable data, which the
    /// command surface reports differently from a failed request.
    pub async fn fetch_last_24h(&self) -> Result<Option<UsageSummary>> {
        let window_end = Local::now();
        let end = window_end.timestamp();
        let start = end - WINDOW_SECS;

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("username", String::new()),
                ("start_timestamp", start.to_string()),
                ("end_timestamp", end.to_string()),
                ("default_time", "hour".to_string()),
            ])
            .header("Authorization", &self.token)
            .header("New-Api-User", &self.user_id)
            .timeout(self.timeout)
            .send()
            .await
            .context("usage API request")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("usage API returned HTTP {status}");
        }

        let envelope: UsageEnvelope = resp.json().await.context("usage API payload")?;
        let Some(points) = envelope.data.filter(|_| envelope.success) else {
            return Ok(None);
        };

        Ok(Some(UsageSummary {
            total_tokens: points.iter().map(|p| p.token_used).sum(),
            points: points.len(),
            window_start: window_end - chrono::Duration::seconds(WINDOW_SECS),
            window_end,
        }))
    }
}

/// Render a token count in 万/亿 units, as the report shows it.
pub fn format_tokens(n: u64) -> String {
    if n < 100_000_000 {
        format!("{:.2}万", n as f64 / 10_000.0)
    } else {
        format!("{:.2}亿", n as f64 / 100_000_000.0)
    }
}
