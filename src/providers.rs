//! # Provider Registry
//!
//! A weighted pool of upstream quote APIs and the selection algorithm over it.
//!
//! - Loads from JSON config (id, endpoint, weight, payload schema).
//! - Weighted random selection: heavier providers are drawn proportionally
//!   more often, every positive-weight provider remains reachable.
//! - An advisory "current" index for operator display; it never biases
//!   selection.
//! - Includes a built-in `default_seed()` with the stock provider pool.
//!
//! The pool only grows through `register`, which needs `&mut`; once shared
//! behind an `Arc` only the advisory index moves.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// How a provider's JSON payload is decoded into quote text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadSchema {
    /// Object with a numeric `code` that must equal `ok_code`; text sits
    /// under `field`.
    StatusText { ok_code: i64, field: String },
    /// Non-empty array; text sits under `field` of the first element.
    FirstElement { field: String },
    /// No declared shape: try common text fields in order, fall back to the
    /// raw payload dump.
    Heuristic,
}

/// One upstream quote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// Operator-facing id, shown in provenance tags and the provider list.
    pub id: String,
    pub endpoint: String,
    /// Relative selection weight; must be strictly positive.
    pub weight: u32,
    #[serde(default = "default_schema")]
    pub schema: PayloadSchema,
}

fn default_schema() -> PayloadSchema {
    PayloadSchema::Heuristic
}

/// Weighted provider pool.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
    /// Advisory only: which provider the operator last "switched to".
    current: AtomicUsize,
}

impl ProviderRegistry {
    /// Build a registry from an explicit pool. Rejects zero-weight entries.
    pub fn from_pool(pool: Vec<Provider>) -> Result<Self, PoolError> {
        let mut reg = Self {
            providers: Vec::with_capacity(pool.len()),
            current: AtomicUsize::new(0),
        };
        for p in pool {
            reg.register(p)?;
        }
        Ok(reg)
    }

    /// Add one provider to the pool. Zero weights are rejected: they would
    /// make the entry unreachable while still counting as pool members.
    pub fn register(&mut self, provider: Provider) -> Result<(), PoolError> {
        if provider.weight == 0 {
            return Err(PoolError::ZeroWeight { id: provider.id });
        }
        self.providers.push(provider);
        Ok(())
    }

    /// Load the pool from a JSON file (array of providers).
    /// Falls back to `default_seed()` on any read, parse or validation error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str::<Vec<Provider>>(&s)
                .ok()
                .and_then(|pool| Self::from_pool(pool).ok())
                .unwrap_or_else(Self::default_seed),
            Err(_) => Self::default_seed(),
        }
    }

    /// Built-in seed: the stock pool of public quote APIs.
    /// Used as fallback if no config is found.
    pub fn default_seed() -> Self {
        let mir6 = |id: &str, txt: u32| Provider {
            id: id.to_string(),
            endpoint: format!("https://api.mir6.com/api/yulu?txt={txt}&type=json"),
            weight: 5,
            schema: PayloadSchema::StatusText {
                ok_code: 200,
                field: "text".to_string(),
            },
        };

        let mut pool = vec![
            mir6("mir6=6", 9),
            mir6("mir6=1", 1),
            mir6("mir6=8", 8),
            mir6("mir6=11", 11),
            mir6("mir6=16", 16),
            mir6("mir6=17", 17),
            mir6("mir6=18", 18),
        ];
        pool.push(Provider {
            id: "aa1-wangyiyunreping".to_string(),
            endpoint: "https://v.api.aa1.cn/api/api-wenan-wangyiyunreping/index.php?aa1=json"
                .to_string(),
            weight: 7,
            schema: PayloadSchema::FirstElement {
                field: "wangyiyunreping".to_string(),
            },
        });
        pool.push(Provider {
            id: "4qb-emowenan".to_string(),
            endpoint: "https://api.4qb.cn/api/emowenan?type=json".to_string(),
            weight: 7,
            schema: PayloadSchema::StatusText {
                ok_code: 1,
                field: "text".to_string(),
            },
        });

        Self {
            providers: pool,
            current: AtomicUsize::new(0),
        }
    }

    pub fn list(&self) -> &[Provider] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Sum of all weights, as the draw space for selection.
    pub fn total_weight(&self) -> u64 {
        self.providers.iter().map(|p| u64::from(p.weight)).sum()
    }

    /// Advisory "current" index (0-based).
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Move the advisory index. Does not change selection odds.
    pub fn set_current(&self, index: usize) -> Result<(), PoolError> {
        if index >= self.providers.len() {
            return Err(PoolError::OutOfRange {
                index,
                len: self.providers.len(),
            });
        }
        self.current.store(index, Ordering::Relaxed);
        Ok(())
    }

    /// Draw one provider, weight-proportionally, from the thread RNG.
    pub fn select(&self) -> Result<&Provider, PoolError> {
        self.select_with(&mut rand::rng())
    }

    /// Draw one provider using the given RNG (seedable in tests).
    ///
    /// Steps:
    /// 1. Draw an integer `r` uniformly in `[0, total_weight)`.
    /// 2. Scan the pool, subtracting each weight until `r` falls inside one.
    pub fn select_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&Provider, PoolError> {
        let total = self.total_weight();
        if total == 0 {
            return Err(PoolError::Empty);
        }
        let mut r = rng.random_range(0..total);
        for p in &self.providers {
            let w = u64::from(p.weight);
            if r < w {
                return Ok(p);
            }
            r -= w;
        }
        // An integer draw below the weight sum always lands inside the scan.
        Err(PoolError::Empty)
    }
}
