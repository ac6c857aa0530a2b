// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod almanac;
pub mod api;
pub mod commands;
pub mod compose;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod onebot;
pub mod ports;
pub mod probe;
pub mod providers;
pub mod schedule;
pub mod store;
pub mod usage;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::dispatch::{FanOutDispatcher, Pacing, PushMode, PushSummary};
pub use crate::ports::Destination;
pub use crate::providers::{PayloadSchema, Provider, ProviderRegistry};
