// tests/dispatch_fanout.rs
//
// Fan-out runs against in-process fakes plus a local quote server:
// per-destination failure isolation, pacing, the single-run lock and the
// directory abort.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use quote_courier::almanac::{DayAnnotation, DayCache};
use quote_courier::dispatch::{FanOutDispatcher, Pacing, PushMode, PushSummary};
use quote_courier::error::{AlmanacError, DeliveryError, DirectoryError, DispatchError};
use quote_courier::fetcher::ContentFetcher;
use quote_courier::ports::{
    AlmanacData, AlmanacSource, Destination, DestinationDirectory, Transport,
};
use quote_courier::providers::{PayloadSchema, Provider, ProviderRegistry};
use quote_courier::store::MemoryStore;

/// Quote endpoint that numbers its answers and can fail one specific hit.
async fn spawn_quote_server(fail_on_hit: Option<usize>) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let handler_hits = hits.clone();
    let app = Router::new().route(
        "/quote",
        get(move || {
            let hits = handler_hits.clone();
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                if fail_on_hit == Some(n) {
                    return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
                }
                Json(json!({ "code": 200, "text": format!("第{n}条语录") })).into_response()
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

struct FixedDirectory(Vec<Destination>);

#[async_trait]
impl DestinationDirectory for FixedDirectory {
    async fn list_destinations(&self) -> Result<Vec<Destination>, DirectoryError> {
        Ok(self.0.clone())
    }
}

struct FailingDirectory;

#[async_trait]
impl DestinationDirectory for FailingDirectory {
    async fn list_destinations(&self) -> Result<Vec<Destination>, DirectoryError> {
        Err(DirectoryError::Unavailable {
            detail: "bot offline".into(),
        })
    }
}

/// Records every send attempt; optionally rejects one destination id.
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    reject: Option<String>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: None,
        }
    }

    fn rejecting(dest: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: Some(dest.to_string()),
        }
    }

    fn attempts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(d, _)| d.clone())
            .collect()
    }

    fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, dest: &Destination, text: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((dest.0.clone(), text.to_string()));
        if self.reject.as_deref() == Some(dest.0.as_str()) {
            return Err(DeliveryError::Rejected {
                detail: "blocked".into(),
            });
        }
        Ok(())
    }
}

struct SlowTransport(Duration);

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&self, _dest: &Destination, _text: &str) -> Result<(), DeliveryError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// Almanac fake that counts remote lookups.
struct CountingAlmanac {
    calls: AtomicUsize,
}

impl CountingAlmanac {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AlmanacSource for CountingAlmanac {
    async fn fetch(&self, _date: &str) -> Result<AlmanacData, AlmanacError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AlmanacData {
            era_year: "丙午".into(),
            lunar_year: "马".into(),
            lunar_month: "七月".into(),
            lunar_day: "十四".into(),
        })
    }
}

fn fixed_annotation() -> DayAnnotation {
    DayAnnotation {
        timestamp: 1_787_716_800_000,
        date: "2026年8月25日".into(),
        time: "08:00:00".into(),
        weekday: "星期二".into(),
        chinese_era: "丙午年【马年】".into(),
        lunar_date: "七月十四".into(),
        cache_time: 1_787_716_800_000,
    }
}

fn build_dispatcher(
    directory: Arc<dyn DestinationDirectory>,
    transport: Arc<dyn Transport>,
    quote_base: &str,
    remote: Arc<dyn AlmanacSource>,
    pacing: Pacing,
) -> FanOutDispatcher {
    let registry = Arc::new(
        ProviderRegistry::from_pool(vec![Provider {
            id: "fixture".into(),
            endpoint: format!("{quote_base}/quote"),
            weight: 1,
            schema: PayloadSchema::StatusText {
                ok_code: 200,
                field: "text".into(),
            },
        }])
        .unwrap(),
    );
    let fetcher = Arc::new(ContentFetcher::new(Duration::from_secs(2)));
    let cache = Arc::new(DayCache::new(Arc::new(MemoryStore::new()), remote));
    FanOutDispatcher::new(directory, transport, registry, fetcher, cache, pacing)
}

fn dests(ids: &[&str]) -> Vec<Destination> {
    ids.iter().copied().map(Destination::new).collect()
}

#[tokio::test]
async fn mixed_failures_are_isolated_and_tallied() {
    // Third fetch fails at the provider, destination "4" is rejected by the
    // transport; both count as failures without stopping the run.
    let (base, hits) = spawn_quote_server(Some(3)).await;
    let transport = Arc::new(RecordingTransport::rejecting("4"));
    let remote = Arc::new(CountingAlmanac::new());
    let dispatcher = build_dispatcher(
        Arc::new(FixedDirectory(dests(&["1", "2", "3", "4", "5"]))),
        transport.clone(),
        &base,
        remote.clone(),
        Pacing::new(1, 1),
    );

    let summary = dispatcher
        .run(PushMode::Manual, Some(fixed_annotation()))
        .await
        .expect("run should complete");

    assert_eq!(
        summary,
        PushSummary {
            success_count: 3,
            fail_count: 2,
        }
    );
    // Destination "3" never reached the transport: its fetch already failed.
    assert_eq!(transport.attempts(), vec!["1", "2", "4", "5"]);
    assert_eq!(hits.load(Ordering::SeqCst), 5, "one fetch per destination");
    assert_eq!(
        remote.calls.load(Ordering::SeqCst),
        0,
        "caller-provided annotation must not trigger an almanac lookup"
    );

    // Every delivery carries a fresh quote and the manual provenance tag.
    let first = &transport.messages()[0];
    assert_eq!(
        first.1,
        "🕑2026年8月25日 08:00:00 星期二\n\
         🗓️丙午年【马年】 七月十四\n\
         ————————\n\
         第1条语录\n\
         [手动推送 来自:fixture]"
    );
    for (_, text) in transport.messages() {
        assert!(text.ends_with("[手动推送 来自:fixture]"), "got: {text}");
    }
}

#[tokio::test]
async fn one_fetch_failure_keeps_the_tail_of_the_run() {
    // Destination "3" loses its fetch; "4" and "5" must still be served.
    let (base, hits) = spawn_quote_server(Some(3)).await;
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = build_dispatcher(
        Arc::new(FixedDirectory(dests(&["1", "2", "3", "4", "5"]))),
        transport.clone(),
        &base,
        Arc::new(CountingAlmanac::new()),
        Pacing::new(1, 1),
    );

    let summary = dispatcher
        .run(PushMode::Manual, Some(fixed_annotation()))
        .await
        .unwrap();

    assert_eq!(
        summary,
        PushSummary {
            success_count: 4,
            fail_count: 1,
        }
    );
    assert_eq!(transport.attempts(), vec!["1", "2", "4", "5"]);
    assert_eq!(hits.load(Ordering::SeqCst), 5, "one fetch per destination");
}

#[tokio::test]
async fn paced_between_consecutive_deliveries() {
    let (base, _) = spawn_quote_server(None).await;
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = build_dispatcher(
        Arc::new(FixedDirectory(dests(&["a", "b", "c"]))),
        transport,
        &base,
        Arc::new(CountingAlmanac::new()),
        Pacing::new(150, 10),
    );

    let started = Instant::now();
    let summary = dispatcher
        .run(PushMode::Manual, Some(fixed_annotation()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.success_count, 3);
    // Two inter-delivery gaps at manual pace.
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn scheduled_runs_use_scheduled_pace() {
    let (base, _) = spawn_quote_server(None).await;
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = build_dispatcher(
        Arc::new(FixedDirectory(dests(&["a", "b", "c"]))),
        transport,
        &base,
        Arc::new(CountingAlmanac::new()),
        Pacing::new(10, 150),
    );

    let started = Instant::now();
    dispatcher
        .run(PushMode::Scheduled, Some(fixed_annotation()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn no_pacing_delay_after_final_delivery() {
    // A huge pace with a single destination: if the loop slept after the
    // last delivery this would take ten seconds.
    let (base, _) = spawn_quote_server(None).await;
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = build_dispatcher(
        Arc::new(FixedDirectory(dests(&["only"]))),
        transport,
        &base,
        Arc::new(CountingAlmanac::new()),
        Pacing::new(10_000, 10_000),
    );

    let started = Instant::now();
    let summary = dispatcher
        .run(PushMode::Manual, Some(fixed_annotation()))
        .await
        .unwrap();

    assert_eq!(summary.success_count, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn second_trigger_while_running_is_busy() {
    let (base, _) = spawn_quote_server(None).await;
    let dispatcher = Arc::new(build_dispatcher(
        Arc::new(FixedDirectory(dests(&["g"]))),
        Arc::new(SlowTransport(Duration::from_millis(700))),
        &base,
        Arc::new(CountingAlmanac::new()),
        Pacing::new(1, 1),
    ));

    let first = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .run(PushMode::Manual, Some(fixed_annotation()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    let second = dispatcher
        .run(PushMode::Manual, Some(fixed_annotation()))
        .await;
    assert!(matches!(second, Err(DispatchError::Busy)));

    let summary = first.await.unwrap().expect("first run completes");
    assert_eq!(summary.success_count, 1);

    // Lock released once the first run is done.
    let third = dispatcher
        .run(PushMode::Manual, Some(fixed_annotation()))
        .await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn empty_directory_short_circuits_annotation_and_fetch() {
    let (base, hits) = spawn_quote_server(None).await;
    let transport = Arc::new(RecordingTransport::new());
    let remote = Arc::new(CountingAlmanac::new());
    let dispatcher = build_dispatcher(
        Arc::new(FixedDirectory(Vec::new())),
        transport.clone(),
        &base,
        remote.clone(),
        Pacing::new(1, 1),
    );

    let summary = dispatcher.run(PushMode::Scheduled, None).await.unwrap();

    assert_eq!(summary, PushSummary::default());
    assert!(transport.attempts().is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(
        remote.calls.load(Ordering::SeqCst),
        0,
        "empty runs must not resolve the day annotation"
    );
}

#[tokio::test]
async fn directory_failure_aborts_run() {
    let (base, hits) = spawn_quote_server(None).await;
    let dispatcher = build_dispatcher(
        Arc::new(FailingDirectory),
        Arc::new(RecordingTransport::new()),
        &base,
        Arc::new(CountingAlmanac::new()),
        Pacing::new(1, 1),
    );

    let err = dispatcher
        .run(PushMode::Manual, Some(fixed_annotation()))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Directory(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 0, "no fetch without a snapshot");
}
