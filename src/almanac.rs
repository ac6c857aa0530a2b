//! # Almanac Day Cache
//!
//! At most one annotation per calendar day: local date/time labels plus
//! lunar-calendar fields from a remote almanac. The cache holds exactly one
//! entry (today's); any entry for another date is purged eagerly on access.
//!
//! - Remote failures degrade into a placeholder annotation that is cached
//!   like a success, so a dead almanac is hit at most once per day.
//! - Freshness is decided by the recorded instant: the entry is reused while
//!   that instant still renders to today's date and does not lie in the
//!   future (clock rolled back since the write).
//! - Storage mechanics live behind the [`KeyValueStore`] port; the external
//!   document shape (camelCase fields keyed by `YYYY-MM-DD`) is part of the
//!   contract with co-deployed tooling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AlmanacError;
use crate::ports::{AlmanacData, AlmanacSource, KeyValueStore};

/// Weekday labels indexed from Sunday.
const WEEKDAYS: [&str; 7] = ["日", "一", "二", "三", "四", "五", "六"];

/// Era label carried by a degraded annotation.
pub const DEGRADED_ERA: &str = "农历数据获取失败";

/// One cached day annotation. Serialized field names mirror the on-disk
/// cache document written by earlier deployments; they must stay camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAnnotation {
    /// Local instant (epoch millis) this annotation was computed at.
    pub timestamp: i64,
    /// Display date, e.g. `2026年8月25日` (month and day unpadded).
    pub date: String,
    /// Wall-clock time at computation, `HH:MM:SS`.
    pub time: String,
    /// Weekday label, e.g. `星期二`.
    pub weekday: String,
    /// Sexagenary era label, e.g. `甲辰年【龙年】`, or [`DEGRADED_ERA`].
    pub chinese_era: String,
    /// Lunar month and day, e.g. `腊月初八`; empty when degraded.
    pub lunar_date: String,
    /// Wall-clock millis when the entry was persisted.
    pub cache_time: i64,
}

impl DayAnnotation {
    pub fn is_degraded(&self) -> bool {
        self.chinese_era == DEGRADED_ERA
    }
}

/// Cache key for a local instant: `YYYY-MM-DD`.
pub fn date_key(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn display_date(now: &DateTime<Local>) -> String {
    format!("{}年{}月{}日", now.year(), now.month(), now.day())
}

fn clock_time(now: &DateTime<Local>) -> String {
    format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second())
}

fn weekday_label(now: &DateTime<Local>) -> String {
    let idx = now.weekday().num_days_from_sunday() as usize;
    format!("星期{}", WEEKDAYS[idx])
}

/// An entry is fresh while the instant it was computed at still renders to
/// `today` and is not in the future.
fn is_fresh(entry: &DayAnnotation, today: &str, now_ms: i64) -> bool {
    if entry.timestamp > now_ms {
        return false;
    }
    match Local.timestamp_millis_opt(entry.timestamp).single() {
        Some(at) => date_key(&at) == today,
        None => false,
    }
}

/// The day cache. Never fails outward: storage errors are logged and the
/// annotation recomputed, remote errors degrade.
pub struct DayCache {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn AlmanacSource>,
    /// Serializes the purge/read/fetch/write sequence across concurrent
    /// triggers so the remote is called at most once per day.
    lock: Mutex<()>,
}

impl DayCache {
    pub fn new(store: Arc<dyn KeyValueStore>, remote: Arc<dyn AlmanacSource>) -> Self {
        Self {
            store,
            remote,
            lock: Mutex::new(()),
        }
    }

    /// Today's annotation, from cache or freshly computed.
    pub async fn get(&self) -> DayAnnotation {
        self.get_at(Local::now()).await
    }

    /// Same as [`DayCache::get`] with an explicit "now" (test seam).
    pub async fn get_at(&self, now: DateTime<Local>) -> DayAnnotation {
        let _guard = self.lock.lock().await;
        let today = date_key(&now);

        self.purge_other_days(&today).await;

        if let Some(entry) = self.read_entry(&today).await {
            if is_fresh(&entry, &today, now.timestamp_millis()) {
                counter!("almanac_cache_hits_total").increment(1);
                tracing::debug!(date = %today, "almanac cache hit");
                return entry;
            }
            tracing::warn!(
                date = %today,
                entry_ts = entry.timestamp,
                "cached annotation instant inconsistent with clock, recomputing"
            );
        }

        let annotation = self.compute(&now, &today).await;
        self.write_entry(&today, &annotation).await;
        annotation
    }

    async fn compute(&self, now: &DateTime<Local>, today: &str) -> DayAnnotation {
        let base = DayAnnotation {
            timestamp: now.timestamp_millis(),
            date: display_date(now),
            time: clock_time(now),
            weekday: weekday_label(now),
            chinese_era: String::new(),
            lunar_date: String::new(),
            cache_time: Local::now().timestamp_millis(),
        };

        counter!("almanac_remote_calls_total").increment(1);
        match self.remote.fetch(today).await {
            Ok(data) => DayAnnotation {
                chinese_era: format!("{}年【{}年】", data.era_year, data.lunar_year),
                lunar_date: format!("{}{}", data.lunar_month, data.lunar_day),
                ..base
            },
            Err(e) => {
                tracing::warn!(date = %today, error = %e, "almanac lookup failed, degrading");
                counter!("almanac_degraded_total").increment(1);
                DayAnnotation {
                    chinese_era: DEGRADED_ERA.to_string(),
                    lunar_date: String::new(),
                    ..base
                }
            }
        }
    }

    /// Drop every entry whose key is not today's. The document only ever
    /// holds one day.
    async fn purge_other_days(&self, today: &str) {
        match self.store.keys().await {
            Ok(keys) => {
                for key in keys.iter().filter(|k| k.as_str() != today) {
                    if let Err(e) = self.store.remove(key).await {
                        tracing::warn!(key = %key, error = %e, "stale cache entry not removed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache keys unreadable, skipping purge");
            }
        }
    }

    /// Corrupt entries are treated as absent.
    async fn read_entry(&self, key: &str) -> Option<DayAnnotation> {
        match self.store.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cache entry unreadable, recomputing");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, recomputing");
                None
            }
        }
    }

    async fn write_entry(&self, key: &str, annotation: &DayAnnotation) {
        let value = match serde_json::to_value(annotation) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "annotation not serializable");
                return;
            }
        };
        if let Err(e) = self.store.set(key, value).await {
            tracing::warn!(key = %key, error = %e, "annotation not persisted");
        }
    }
}

/// Remote almanac client for the public `Commonweal/almanac` endpoint.
/// Takes the date as a `sun` query parameter and answers
/// `{code: 1, data: {TianGanDiZhiYear, LYear, LMonth, LDay, ...}}`.
pub struct HttpAlmanac {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AlmanacEnvelope {
    #[serde(default)]
    code: i64,
    data: Option<AlmanacFields>,
}

#[derive(Debug, Deserialize)]
struct AlmanacFields {
    #[serde(rename = "TianGanDiZhiYear")]
    tian_gan_di_zhi_year: String,
    #[serde(rename = "LYear")]
    l_year: String,
    #[serde(rename = "LMonth")]
    l_month: String,
    #[serde(rename = "LDay")]
    l_day: String,
}

impl HttpAlmanac {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl AlmanacSource for HttpAlmanac {
    async fn fetch(&self, date: &str) -> Result<AlmanacData, AlmanacError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("sun", date)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AlmanacError::Network {
                detail: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AlmanacError::Http {
                status: status.as_u16(),
            });
        }

        let envelope: AlmanacEnvelope =
            resp.json().await.map_err(|e| AlmanacError::Malformed {
                detail: e.to_string(),
            })?;
        if envelope.code != 1 {
            return Err(AlmanacError::Malformed {
                detail: format!("code {}", envelope.code),
            });
        }
        let fields = envelope.data.ok_or_else(|| AlmanacError::Malformed {
            detail: "missing data".to_string(),
        })?;

        Ok(AlmanacData {
            era_year: fields.tian_gan_di_zhi_year,
            lunar_year: fields.l_year,
            lunar_month: fields.l_month,
            lunar_day: fields.l_day,
        })
    }
}
