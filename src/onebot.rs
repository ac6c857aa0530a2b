//! OneBot v11 HTTP adapter: implements the destination directory over
//! `get_group_list` and the message transport over `send_group_msg`.
//!
//! OneBot answers every action with `{status, retcode, data}`; retcode 0 is
//! the only success.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{DeliveryError, DirectoryError};
use crate::ports::{Destination, DestinationDirectory, Transport};

#[derive(Clone)]
pub struct OneBotClient {
    base_url: String,
    access_token: Option<String>,
    client: Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    group_id: Option<i64>,
}

impl OneBotClient {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            access_token,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Build from `ONEBOT_HTTP_URL` (required) and `ONEBOT_ACCESS_TOKEN`.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("ONEBOT_HTTP_URL")
            .map_err(|_| anyhow::anyhow!("ONEBOT_HTTP_URL is not set"))?;
        let access_token = std::env::var("ONEBOT_ACCESS_TOKEN").ok();
        Ok(Self::new(base_url, access_token))
    }

    async fn call(&self, action: &str, payload: Value) -> Result<ApiEnvelope, reqwest::Error> {
        let mut req = self
            .client
            .post(format!("{}/{action}", self.base_url))
            .timeout(self.timeout)
            .json(&payload);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?.error_for_status()?;
        resp.json::<ApiEnvelope>().await
    }
}

#[async_trait]
impl DestinationDirectory for OneBotClient {
    async fn list_destinations(&self) -> Result<Vec<Destination>, DirectoryError> {
        let envelope = self
            .call("get_group_list", json!({}))
            .await
            .map_err(|e| DirectoryError::Unavailable {
                detail: e.to_string(),
            })?;

        if envelope.retcode != 0 {
            return Err(DirectoryError::Unavailable {
                detail: format!("get_group_list retcode {}", envelope.retcode),
            });
        }
        let groups: Vec<GroupEntry> = envelope
            .data
            .and_then(|d| serde_json::from_value(d).ok())
            .ok_or_else(|| DirectoryError::Unavailable {
                detail: "get_group_list data is not a group array".to_string(),
            })?;

        // Entries without a group_id are directory noise, not destinations.
        Ok(groups
            .into_iter()
            .filter_map(|g| g.group_id)
            .map(|id| Destination(id.to_string()))
            .collect())
    }
}

#[async_trait]
impl Transport for OneBotClient {
    async fn send(&self, dest: &Destination, text: &str) -> Result<(), DeliveryError> {
        // Numeric ids are sent as numbers; OneBot implementations differ in
        // how strictly they type group_id.
        let group_id = dest
            .0
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(dest.0.clone()));

        let envelope = self
            .call("send_group_msg", json!({"group_id": group_id, "message": text}))
            .await
            .map_err(|e| {
                if e.status().is_some() {
                    DeliveryError::Rejected {
                        detail: e.to_string(),
                    }
                } else {
                    DeliveryError::Unreachable {
                        detail: e.to_string(),
                    }
                }
            })?;

        if envelope.retcode != 0 {
            return Err(DeliveryError::Rejected {
                detail: format!("send_group_msg retcode {}", envelope.retcode),
            });
        }
        Ok(())
    }
}
