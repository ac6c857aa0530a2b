//! Collaborator ports consumed by the engine.
//!
//! Everything the courier touches outside its own process sits behind one of
//! these traits: the chat platform (directory + transport), the persistent
//! cache store, the remote almanac and the trigger scheduler. The engine is
//! wired against `Arc<dyn ...>` handles so tests run it against in-process
//! fakes and the binary wires real adapters.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AlmanacError, DeliveryError, DirectoryError, ScheduleError, StoreError};

/// Opaque destination identifier (a group/channel id on the chat platform).
/// The engine never interprets its structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(pub String);

impl Destination {
    pub fn new(id: impl Into<String>) -> Self {
        Destination(id.into())
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Enumerates the destinations of a fan-out run.
#[async_trait]
pub trait DestinationDirectory: Send + Sync {
    async fn list_destinations(&self) -> Result<Vec<Destination>, DirectoryError>;
}

/// Delivers one composed message to one destination.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, dest: &Destination, text: &str) -> Result<(), DeliveryError>;
}

/// Keyed JSON persistence for the day cache.
///
/// The backing document is an externally visible JSON object keyed by date
/// string; adapters must keep that shape readable by co-deployed tooling.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Lunar calendar fields for one Gregorian date, as served by the remote
/// almanac. Local clock fields (date, time, weekday) are computed by the
/// cache itself and are not part of this payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlmanacData {
    /// Sexagenary year label, e.g. `甲辰`.
    pub era_year: String,
    /// Zodiac year label, e.g. `龙`.
    pub lunar_year: String,
    /// Lunar month label, e.g. `腊月`.
    pub lunar_month: String,
    /// Lunar day label, e.g. `初八`.
    pub lunar_day: String,
}

/// Remote almanac lookup for one calendar date (`YYYY-MM-DD`).
#[async_trait]
pub trait AlmanacSource: Send + Sync {
    async fn fetch(&self, date: &str) -> Result<AlmanacData, AlmanacError>;
}

/// Boxed future produced by a scheduled job closure.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Registers recurring triggers. Expressions are validated at registration;
/// the engine itself never parses them.
pub trait Scheduler: Send + Sync {
    fn register(
        &self,
        expr: &str,
        job: Box<dyn Fn() -> JobFuture + Send + Sync>,
    ) -> Result<(), ScheduleError>;
}
