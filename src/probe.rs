//! # Probe Aggregator
//!
//! Concurrent health checks over remote model APIs and plain HTTP endpoints.
//! The opposite concurrency stance to the dispatcher: probes are read-only
//! and rate limits are not a concern, so every target is checked in its own
//! task and a slow target costs the run only its own timeout.
//!
//! Results are reassembled into input order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::{timeout, Instant};
use tracing::warn;

use crate::config::ProbeConfig;

const STATUS_OK: &str = "✅ 运行正常";
const STATUS_DEGRADED: &str = "⚠️ 响应异常";
const STATUS_TIMEOUT: &str = "⌛ 请求超时";
const STATUS_API_ERROR: &str = "❌ API错误";
const STATUS_NO_RESPONSE: &str = "❌ 无响应";
const STATUS_REQUEST_FAILED: &str = "❌ 请求失败";
const STATUS_PROBE_FAILED: &str = "探测失败";

/// Failure class of one probe, when it failed outright. A degraded probe
/// (answered, but not the expected content) carries no failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    Timeout,
    Http(u16),
    Network,
}

impl ProbeFailure {
    /// Operator-facing error label.
    pub fn label(&self) -> String {
        match self {
            ProbeFailure::Timeout => "超时".to_string(),
            ProbeFailure::Http(status) => format!("HTTP {status}"),
            ProbeFailure::Network => "网络错误".to_string(),
        }
    }
}

/// Outcome of one target check, position-stable with the target list.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub target: String,
    /// Grouping key for the report (site name); `None` for plain endpoints.
    pub group: Option<String>,
    pub ok: bool,
    /// Operator-facing status label.
    pub status: String,
    /// Truncated response excerpt, for targets that answer with content.
    pub response: Option<String>,
    pub latency_ms: u64,
    pub error: Option<ProbeFailure>,
}

/// What a target's own check produced, before the aggregator adds timing.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub ok: bool,
    pub status: String,
    pub response: Option<String>,
    pub error: Option<ProbeFailure>,
}

/// One independently checked remote target.
#[async_trait]
pub trait ProbeTarget: Send + Sync {
    fn name(&self) -> String;
    fn group(&self) -> Option<String> {
        None
    }
    /// Upper bound the aggregator enforces on [`ProbeTarget::check`].
    fn time_limit(&self) -> Duration;
    /// Label used when the aggregator times the check out.
    fn timeout_label(&self) -> String {
        STATUS_TIMEOUT.to_string()
    }
    async fn check(&self) -> CheckOutcome;
}

/// Aggregate tally over one probe run. Mean latency is taken over targets
/// that answered at all (ok or degraded), not over outright failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub ok: usize,
    pub degraded: usize,
    pub failed: usize,
    pub mean_latency_ms: u64,
}

pub fn summarize(reports: &[ProbeReport]) -> ProbeSummary {
    let ok = reports.iter().filter(|r| r.ok).count();
    let degraded = reports.iter().filter(|r| !r.ok && r.error.is_none()).count();
    let failed = reports.len() - ok - degraded;

    let answered: Vec<&ProbeReport> = reports.iter().filter(|r| r.error.is_none()).collect();
    let mean_latency_ms = if answered.is_empty() {
        0
    } else {
        let sum: u64 = answered.iter().map(|r| r.latency_ms).sum();
        (sum as f64 / answered.len() as f64).round() as u64
    };

    ProbeSummary {
        ok,
        degraded,
        failed,
        mean_latency_ms,
    }
}

pub struct ProbeAggregator {
    targets: Vec<Arc<dyn ProbeTarget>>,
}

impl ProbeAggregator {
    pub fn new(targets: Vec<Arc<dyn ProbeTarget>>) -> Self {
        Self { targets }
    }

    /// Build model probes (site x model) and endpoint probes from config.
    pub fn from_config(cfg: &ProbeConfig) -> Self {
        let mut targets: Vec<Arc<dyn ProbeTarget>> = Vec::new();
        for site in &cfg.sites {
            let api_key = site.resolved_key();
            for model in &site.models {
                targets.push(Arc::new(ModelProbe {
                    site: site.name.clone(),
                    base_url: site.base_url.clone(),
                    api_key: api_key.clone(),
                    model: model.name.clone(),
                    display: model.display.clone().unwrap_or_else(|| model.name.clone()),
                    prompt: cfg.test_prompt.clone(),
                    expect: cfg.expect_marker.clone(),
                    max_response_len: cfg.max_response_len,
                    time_limit: Duration::from_millis(cfg.model_timeout_ms),
                    extra_body: site.extra_body.clone(),
                    client: reqwest::Client::new(),
                }));
            }
        }
        for ep in &cfg.endpoints {
            targets.push(Arc::new(EndpointProbe {
                name: ep.name.clone(),
                url: ep.url.clone(),
                time_limit: Duration::from_millis(cfg.endpoint_timeout_ms),
                client: reqwest::Client::new(),
            }));
        }
        Self::new(targets)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Check every target concurrently; reports come back in input order.
    pub async fn run_all(&self) -> Vec<ProbeReport> {
        counter!("probe_runs_total").increment(1);

        let mut handles = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let target = Arc::clone(target);
            handles.push((
                target.name(),
                target.group(),
                tokio::spawn(check_one(target)),
            ));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (name, group, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(target = %name, error = %e, "probe task failed");
                    ProbeReport {
                        target: name,
                        group,
                        ok: false,
                        status: STATUS_PROBE_FAILED.to_string(),
                        response: None,
                        latency_ms: 0,
                        error: Some(ProbeFailure::Network),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

async fn check_one(target: Arc<dyn ProbeTarget>) -> ProbeReport {
    let started = Instant::now();
    let outcome = match timeout(target.time_limit(), target.check()).await {
        Ok(outcome) => outcome,
        Err(_) => CheckOutcome {
            ok: false,
            status: target.timeout_label(),
            response: None,
            error: Some(ProbeFailure::Timeout),
        },
    };
    ProbeReport {
        target: target.name(),
        group: target.group(),
        ok: outcome.ok,
        status: outcome.status,
        response: outcome.response,
        latency_ms: started.elapsed().as_millis() as u64,
        error: outcome.error,
    }
}

/// Chat-completion probe: post a canned prompt, expect the marker phrase in
/// the first choice's content.
pub struct ModelProbe {
    pub site: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub display: String,
    pub prompt: String,
    pub expect: String,
    pub max_response_len: usize,
    pub time_limit: Duration,
    /// Extra top-level body fields some vendors require (e.g. disabling
    /// thinking/stream modes).
    pub extra_body: Option<Value>,
    client: reqwest::Client,
}

impl ModelProbe {
    fn request_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": self.prompt}],
            "max_tokens": 50,
        });
        if let (Some(obj), Some(extra)) = (
            body.as_object_mut(),
            self.extra_body.as_ref().and_then(Value::as_object),
        ) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        body
    }

    fn excerpt(&self, s: &str) -> String {
        truncate_chars(s, self.max_response_len)
    }
}

#[async_trait]
impl ProbeTarget for ModelProbe {
    fn name(&self) -> String {
        self.display.clone()
    }

    fn group(&self) -> Option<String> {
        Some(self.site.clone())
    }

    fn time_limit(&self) -> Duration {
        self.time_limit
    }

    async fn check(&self) -> CheckOutcome {
        let mut req = self.client.post(&self.base_url).json(&self.request_body());
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_builder() => {
                return CheckOutcome {
                    ok: false,
                    status: STATUS_REQUEST_FAILED.to_string(),
                    response: Some(self.excerpt(&e.to_string())),
                    error: Some(ProbeFailure::Network),
                };
            }
            Err(e) if e.is_timeout() => {
                return CheckOutcome {
                    ok: false,
                    status: STATUS_TIMEOUT.to_string(),
                    response: None,
                    error: Some(ProbeFailure::Timeout),
                };
            }
            Err(e) => {
                return CheckOutcome {
                    ok: false,
                    status: STATUS_NO_RESPONSE.to_string(),
                    response: Some(self.excerpt(&e.to_string())),
                    error: Some(ProbeFailure::Network),
                };
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "未知错误".to_string());
            return CheckOutcome {
                ok: false,
                status: STATUS_API_ERROR.to_string(),
                response: Some(self.excerpt(&detail)),
                error: Some(ProbeFailure::Http(status.as_u16())),
            };
        }

        let content = resp.json::<Value>().await.ok().and_then(|v| {
            v.pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        });
        match content {
            Some(text) if text.contains(&self.expect) => CheckOutcome {
                ok: true,
                status: STATUS_OK.to_string(),
                response: Some(self.excerpt(&text)),
                error: None,
            },
            Some(text) => CheckOutcome {
                ok: false,
                status: STATUS_DEGRADED.to_string(),
                response: Some(self.excerpt(&text)),
                error: None,
            },
            None => CheckOutcome {
                ok: false,
                status: STATUS_DEGRADED.to_string(),
                response: Some("无有效内容".to_string()),
                error: None,
            },
        }
    }
}

/// Reachability probe: GET the URL, only a 200 counts as up.
pub struct EndpointProbe {
    pub name: String,
    pub url: String,
    pub time_limit: Duration,
    client: reqwest::Client,
}

#[async_trait]
impl ProbeTarget for EndpointProbe {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn time_limit(&self) -> Duration {
        self.time_limit
    }

    fn timeout_label(&self) -> String {
        "超时".to_string()
    }

    async fn check(&self) -> CheckOutcome {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => CheckOutcome {
                ok: true,
                status: "200".to_string(),
                response: None,
                error: None,
            },
            Ok(resp) => {
                let code = resp.status().as_u16();
                CheckOutcome {
                    ok: false,
                    status: code.to_string(),
                    response: None,
                    error: Some(ProbeFailure::Http(code)),
                }
            }
            Err(e) if e.is_timeout() => CheckOutcome {
                ok: false,
                status: "超时".to_string(),
                response: None,
                error: Some(ProbeFailure::Timeout),
            },
            Err(e) => CheckOutcome {
                ok: false,
                status: if is_dns_failure(&e) {
                    "DNS解析失败".to_string()
                } else {
                    "网络错误".to_string()
                },
                response: None,
                error: Some(ProbeFailure::Network),
            },
        }
    }
}

fn is_dns_failure(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        if s.to_string().to_ascii_lowercase().contains("dns") {
            return true;
        }
        source = s.source();
    }
    false
}

/// Truncate to `max` characters with an ellipsis marker.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}
