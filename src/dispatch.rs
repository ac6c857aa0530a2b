//! # Fan-Out Dispatcher
//!
//! One logical push run: snapshot the destination list, then deliver one
//! freshly fetched quote to each destination sequentially, pacing between
//! consecutive deliveries to respect the platform's send rate.
//!
//! - A destination's failure (fetch or send) is counted and isolated; the
//!   loop continues with the next destination.
//! - Only directory enumeration failure aborts a run; there is no snapshot
//!   to tally against without it.
//! - At most one run is in flight; concurrent triggers are rejected as busy
//!   rather than queued, so a stuck run cannot pile up duplicates behind it.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::almanac::{DayAnnotation, DayCache};
use crate::compose::{render_message, DeliveryTag};
use crate::error::{DeliveryError, DispatchError, FetchError, PoolError};
use crate::fetcher::ContentFetcher;
use crate::ports::{Destination, DestinationDirectory, Transport};
use crate::providers::ProviderRegistry;

/// What triggered a run; selects the pacing delay and provenance tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    Scheduled,
    Manual,
}

impl PushMode {
    fn tag(self) -> DeliveryTag {
        match self {
            PushMode::Scheduled => DeliveryTag::Scheduled,
            PushMode::Manual => DeliveryTag::Manual,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PushMode::Scheduled => "scheduled",
            PushMode::Manual => "manual",
        }
    }
}

/// Tally of one run. Success plus failure always equals the snapshot size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct PushSummary {
    pub success_count: usize,
    pub fail_count: usize,
}

/// Inter-delivery delays per trigger kind. Manual runs pace slower: an
/// operator watching the run beats tripping the platform limiter.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub manual: Duration,
    pub scheduled: Duration,
}

impl Pacing {
    pub fn new(manual_ms: u64, scheduled_ms: u64) -> Self {
        Self {
            manual: Duration::from_millis(manual_ms),
            scheduled: Duration::from_millis(scheduled_ms),
        }
    }

    fn for_mode(&self, mode: PushMode) -> Duration {
        match mode {
            PushMode::Manual => self.manual,
            PushMode::Scheduled => self.scheduled,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(3_000, 2_000)
    }
}

/// One delivery's failure, kept only long enough to log it.
#[derive(Debug, Error)]
enum DeliverFailure {
    #[error("select: {0}")]
    Pool(#[from] PoolError),
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("send: {0}")]
    Send(#[from] DeliveryError),
}

pub struct FanOutDispatcher {
    directory: Arc<dyn DestinationDirectory>,
    transport: Arc<dyn Transport>,
    registry: Arc<ProviderRegistry>,
    fetcher: Arc<ContentFetcher>,
    cache: Arc<DayCache>,
    pacing: Pacing,
    /// Single-run guard. `try_lock` failure maps to [`DispatchError::Busy`].
    run_lock: Mutex<()>,
}

impl FanOutDispatcher {
    pub fn new(
        directory: Arc<dyn DestinationDirectory>,
        transport: Arc<dyn Transport>,
        registry: Arc<ProviderRegistry>,
        fetcher: Arc<ContentFetcher>,
        cache: Arc<DayCache>,
        pacing: Pacing,
    ) -> Self {
        Self {
            directory,
            transport,
            registry,
            fetcher,
            cache,
            pacing,
            run_lock: Mutex::new(()),
        }
    }

    /// Enumerate destinations and deliver to every one of them.
    ///
    /// `annotation` lets a caller that already resolved today's annotation
    /// (e.g. to time the run) pass it through; otherwise the cache is asked
    /// once for the whole run.
    pub async fn run(
        &self,
        mode: PushMode,
        annotation: Option<DayAnnotation>,
    ) -> Result<PushSummary, DispatchError> {
        let _guard = self.run_lock.try_lock().map_err(|_| DispatchError::Busy)?;

        info!(mode = mode.label(), "starting fan-out push");
        let destinations = self.directory.list_destinations().await?;
        info!(count = destinations.len(), "destinations enumerated");

        Ok(self.deliver_to(mode, &destinations, annotation).await)
    }

    /// Deliver to an explicit destination snapshot. Infallible: every
    /// per-destination failure folds into the tally.
    pub async fn deliver_to(
        &self,
        mode: PushMode,
        destinations: &[Destination],
        annotation: Option<DayAnnotation>,
    ) -> PushSummary {
        if destinations.is_empty() {
            info!("no destinations to push to");
            return PushSummary::default();
        }

        let annotation = match annotation {
            Some(a) => a,
            None => self.cache.get().await,
        };
        let pace = self.pacing.for_mode(mode);
        let last = destinations.len() - 1;
        let mut summary = PushSummary::default();

        for (i, dest) in destinations.iter().enumerate() {
            info!(dest = %dest, n = i + 1, total = destinations.len(), "pushing");
            match self.deliver_one(mode, dest, &annotation).await {
                Ok(()) => {
                    summary.success_count += 1;
                    counter!("push_success_total").increment(1);
                    if i < last {
                        sleep(pace).await;
                    }
                }
                Err(e) => {
                    summary.fail_count += 1;
                    counter!("push_fail_total").increment(1);
                    warn!(dest = %dest, error = %e, "push failed");
                }
            }
        }

        info!(
            success = summary.success_count,
            failed = summary.fail_count,
            "fan-out push finished"
        );
        summary
    }

    /// Fetch a fresh quote and send it to one destination.
    async fn deliver_one(
        &self,
        mode: PushMode,
        dest: &Destination,
        annotation: &DayAnnotation,
    ) -> Result<(), DeliverFailure> {
        let provider = self.registry.select()?;
        let item = self.fetcher.fetch(provider).await?;
        let message = render_message(annotation, &item, mode.tag());
        self.transport.send(dest, &message).await?;
        Ok(())
    }
}
