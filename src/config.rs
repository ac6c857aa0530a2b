// src/config.rs
//! Runtime configuration: push schedule and pacing, fetch/almanac timeouts,
//! probe targets. One TOML document with built-in defaults for every field,
//! loaded env-path-first like the rest of the config surface.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;

pub const ENV_CONFIG_PATH: &str = "COURIER_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/courier.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Path of the provider pool JSON; missing file falls back to the
    /// built-in seed.
    pub providers_path: String,
    pub push: PushConfig,
    pub fetch: FetchConfig,
    pub almanac: AlmanacConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// 5-field cron expression for the daily push.
    pub cron: String,
    /// Inter-delivery pacing for operator-triggered runs.
    pub manual_pace_ms: u64,
    /// Inter-delivery pacing for cron-triggered runs.
    pub scheduled_pace_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            cron: "0 0 * * *".to_string(),
            manual_pace_ms: 3_000,
            scheduled_pace_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlmanacConfig {
    pub endpoint: String,
    pub cache_path: String,
    pub timeout_ms: u64,
}

impl Default for AlmanacConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.36jxs.com/api/Commonweal/almanac".to_string(),
            cache_path: "data/lunar_cache.json".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Prompt posted to every model target.
    pub test_prompt: String,
    /// Marker phrase expected back for a healthy model.
    pub expect_marker: String,
    pub model_timeout_ms: u64,
    pub endpoint_timeout_ms: u64,
    /// Response excerpts are cut to this many characters in reports.
    pub max_response_len: usize,
    pub sites: Vec<SiteConfig>,
    pub endpoints: Vec<EndpointConfig>,
    /// Free-form footer appended to status reports (service notes, links).
    pub notes: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            test_prompt: "请回复'运行正常'".to_string(),
            expect_marker: "运行正常".to_string(),
            model_timeout_ms: 10_000,
            endpoint_timeout_ms: 8_000,
            max_response_len: 80,
            sites: Vec::new(),
            endpoints: Vec::new(),
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    /// Full chat-completions URL, not just the host.
    pub base_url: String,
    /// Literal key, or "ENV" to read the variable named by `api_key_env`.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub models: Vec<ModelConfig>,
    /// Extra top-level request fields some vendors need.
    #[serde(default)]
    pub extra_body: Option<Value>,
}

impl SiteConfig {
    /// Resolve the probe key, following the "ENV" indirection so real keys
    /// never sit in the config file.
    pub fn resolved_key(&self) -> String {
        if !self.api_key.trim().eq_ignore_ascii_case("env") {
            return self.api_key.clone();
        }
        let var = self.api_key_env.as_deref().unwrap_or("PROBE_API_KEY");
        match std::env::var(var) {
            Ok(key) => key,
            Err(_) => {
                tracing::warn!(site = %self.name, var, "probe api key env var not set");
                String::new()
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Report label; defaults to `name`.
    #[serde(default)]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
}

impl CourierConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load using env var + fallbacks:
    /// 1) $COURIER_CONFIG_PATH (must exist if set)
    /// 2) config/courier.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(&default);
        }
        Ok(Self::default())
    }
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            providers_path: "config/providers.json".to_string(),
            push: PushConfig::default(),
            fetch: FetchConfig::default(),
            almanac: AlmanacConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn empty_document_gets_all_defaults() {
        let cfg: CourierConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.push.cron, "0 0 * * *");
        assert_eq!(cfg.push.manual_pace_ms, 3_000);
        assert_eq!(cfg.push.scheduled_pace_ms, 2_000);
        assert_eq!(cfg.fetch.timeout_ms, 10_000);
        assert_eq!(cfg.almanac.cache_path, "data/lunar_cache.json");
        assert_eq!(cfg.probe.model_timeout_ms, 10_000);
        assert_eq!(cfg.probe.endpoint_timeout_ms, 8_000);
        assert_eq!(cfg.probe.max_response_len, 80);
        assert!(cfg.probe.sites.is_empty());
    }

    #[test]
    fn full_document_parses() {
        let cfg: CourierConfig = toml::from_str(
            r#"
            providers_path = "etc/pool.json"

            [push]
            cron = "30 8 * * *"
            manual_pace_ms = 1500
            scheduled_pace_ms = 1000

            [fetch]
            timeout_ms = 5000

            [almanac]
            endpoint = "https://alma.example/api"
            cache_path = "state/day.json"
            timeout_ms = 4000

            [probe]
            notes = "maintenance window 02:00-03:00"

            [[probe.sites]]
            name = "relay"
            base_url = "https://relay.example/v1/chat/completions"
            api_key = "ENV"
            api_key_env = "RELAY_KEY"
            extra_body = { enable_thinking = false, stream = false }

            [[probe.sites.models]]
            name = "qwen3-0.6b"

            [[probe.sites.models]]
            name = "deep-1"
            display = "deepseek-v3"

            [[probe.endpoints]]
            name = "🌍 eo全球分流"
            url = "https://relay.example"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.providers_path, "etc/pool.json");
        assert_eq!(cfg.push.cron, "30 8 * * *");
        assert_eq!(cfg.almanac.endpoint, "https://alma.example/api");
        assert_eq!(cfg.probe.sites.len(), 1);
        let site = &cfg.probe.sites[0];
        assert_eq!(site.models.len(), 2);
        assert_eq!(site.models[1].display.as_deref(), Some("deepseek-v3"));
        assert_eq!(
            site.extra_body.as_ref().unwrap()["enable_thinking"],
            serde_json::json!(false)
        );
        assert_eq!(cfg.probe.endpoints[0].name, "🌍 eo全球分流");
        assert_eq!(cfg.probe.notes.as_deref(), Some("maintenance window 02:00-03:00"));
    }

    #[test]
    fn literal_api_key_passes_through() {
        let site = SiteConfig {
            name: "s".into(),
            base_url: "https://s.example/v1".into(),
            api_key: "sk-local-test".into(),
            api_key_env: None,
            models: vec![],
            extra_body: None,
        };
        assert_eq!(site.resolved_key(), "sk-local-test");
    }

    #[serial_test::serial]
    #[test]
    fn env_indirection_reads_named_variable() {
        env::set_var("COURIER_TEST_PROBE_KEY", "sk-from-env");
        let site = SiteConfig {
            name: "s".into(),
            base_url: "https://s.example/v1".into(),
            api_key: "ENV".into(),
            api_key_env: Some("COURIER_TEST_PROBE_KEY".into()),
            models: vec![],
            extra_body: None,
        };
        assert_eq!(site.resolved_key(), "sk-from-env");
        env::remove_var("COURIER_TEST_PROBE_KEY");

        // Unset variable degrades to an empty key rather than failing.
        assert_eq!(site.resolved_key(), "");
    }

    #[serial_test::serial]
    #[test]
    fn env_path_overrides_and_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("courier.toml");
        fs::write(&p, "[push]\ncron = \"0 7 * * *\"\n").unwrap();

        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let cfg = CourierConfig::load_default().unwrap();
        assert_eq!(cfg.push.cron, "0 7 * * *");

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(CourierConfig::load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);
    }
}
