//! # Content Fetcher
//!
//! One bounded outbound call per delivery: pick a provider, GET its endpoint,
//! decode the JSON payload against the provider's declared schema. Failures
//! are classified (timeout / HTTP / schema / network) so the dispatcher can
//! log and count them without unpacking transport details.

use std::time::Duration;

use metrics::counter;
use serde_json::Value;

use crate::error::FetchError;
use crate::providers::{PayloadSchema, Provider};

/// Field names tried, in order, when a provider declares no schema.
const HEURISTIC_FIELDS: [&str; 3] = ["text", "content", "msg"];

/// One fetched quote, tagged with the provider it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub text: String,
    pub provider_id: String,
}

/// Shared HTTP client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ContentFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Fetch and decode one quote from `provider`.
    pub async fn fetch(&self, provider: &Provider) -> Result<ContentItem, FetchError> {
        match self.fetch_inner(provider).await {
            Ok(item) => Ok(item),
            Err(e) => {
                tracing::warn!(provider = %provider.id, error = %e, "provider fetch failed");
                counter!("quote_fetch_errors_total").increment(1);
                Err(e)
            }
        }
    }

    async fn fetch_inner(&self, provider: &Provider) -> Result<ContentItem, FetchError> {
        let resp = self
            .client
            .get(&provider.endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(&provider.id, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                provider: provider.id.clone(),
                status: status.as_u16(),
            });
        }

        let payload: Value = resp.json().await.map_err(|e| FetchError::Schema {
            provider: provider.id.clone(),
            detail: e.to_string(),
        })?;

        let text = decode_payload(provider, &payload)?;
        Ok(ContentItem {
            text,
            provider_id: provider.id.clone(),
        })
    }
}

/// Decode a JSON payload according to the provider's schema.
///
/// Pure so the schema matrix is unit-testable without a server. Decoded text
/// is trimmed; an empty result counts as a schema violation for declared
/// shapes, while the heuristic falls through to the raw payload dump.
pub fn decode_payload(provider: &Provider, payload: &Value) -> Result<String, FetchError> {
    let schema_err = |detail: String| FetchError::Schema {
        provider: provider.id.clone(),
        detail,
    };

    match &provider.schema {
        PayloadSchema::StatusText { ok_code, field } => {
            let code = payload.get("code").and_then(Value::as_i64);
            if code != Some(*ok_code) {
                return Err(schema_err(format!(
                    "expected code {ok_code}, got {code:?}"
                )));
            }
            text_field(payload, field)
                .ok_or_else(|| schema_err(format!("missing text field '{field}'")))
        }
        PayloadSchema::FirstElement { field } => {
            let first = payload
                .as_array()
                .and_then(|a| a.first())
                .ok_or_else(|| schema_err("expected a non-empty array".to_string()))?;
            text_field(first, field)
                .ok_or_else(|| schema_err(format!("missing text field '{field}'")))
        }
        PayloadSchema::Heuristic => {
            for name in HEURISTIC_FIELDS {
                if let Some(text) = text_field(payload, name) {
                    return Ok(text);
                }
            }
            Ok(payload.to_string())
        }
    }
}

/// Non-empty trimmed string under `field`, if present.
fn text_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn classify_request_error(provider: &str, e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            provider: provider.to_string(),
        }
    } else if let Some(status) = e.status() {
        FetchError::Http {
            provider: provider.to_string(),
            status: status.as_u16(),
        }
    } else if e.is_decode() {
        FetchError::Schema {
            provider: provider.to_string(),
            detail: e.to_string(),
        }
    } else {
        FetchError::Network {
            provider: provider.to_string(),
            detail: e.to_string(),
        }
    }
}
