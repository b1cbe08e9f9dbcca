use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trackline::{Emitter, EmitterConfig, EmitterError, EventRecord, TerminalReason};

#[derive(Clone, Copy, Debug)]
enum CollectorMode {
    Accept,
    ServerError,
    ClientError,
    Hang,
}

#[derive(Clone)]
struct CollectorState {
    mode: CollectorMode,
    attempts: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<Value>>>,
}

async fn ingest(State(state): State<CollectorState>, Json(body): Json<Value>) -> StatusCode {
    state.attempts.fetch_add(1, Ordering::SeqCst);
    match state.mode {
        CollectorMode::Accept => {
            state.batches.lock().unwrap().push(body);
            StatusCode::OK
        }
        CollectorMode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        CollectorMode::ClientError => StatusCode::BAD_REQUEST,
        CollectorMode::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::OK
        }
    }
}

/// In-process stand-in for the collector endpoint.
struct MockCollector {
    endpoint: String,
    attempts: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<Value>>>,
}

impl MockCollector {
    async fn launch(mode: CollectorMode) -> Self {
        let state = CollectorState {
            mode,
            attempts: Arc::new(AtomicUsize::new(0)),
            batches: Arc::new(Mutex::new(Vec::new())),
        };
        let attempts = state.attempts.clone();
        let batches = state.batches.clone();

        let app = Router::new().route("/events", post(ingest)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock collector");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockCollector {
            endpoint: format!("http://{}/events", addr),
            attempts,
            batches,
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Record sequence numbers per received batch, in arrival order.
    fn batch_seqs(&self) -> Vec<Vec<u64>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|body| {
                body["data"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|record| record["payload"]["seq"].as_u64().unwrap())
                    .collect()
            })
            .collect()
    }
}

fn test_config(endpoint: &str) -> EmitterConfig {
    let mut config = EmitterConfig::new(endpoint);
    config.batch_size = 5;
    config.batch_timeout_ms = 60_000;
    config.buffer_capacity = 256;
    // Single worker keeps cross-batch arrival order deterministic; the
    // accounting test below opts back into parallel delivery.
    config.delivery_parallelism = 1;
    config.max_retries = 2;
    config.base_backoff_ms = 10;
    config.max_backoff_ms = 50;
    config.request_timeout_ms = 60_000;
    config
}

fn record(seq: u64) -> EventRecord {
    EventRecord::self_describing(
        "iglu:com.acme/test_event/jsonschema/1-0-0",
        json!({ "seq": seq }),
    )
}

#[tokio::test]
async fn twelve_records_make_three_fifo_batches() {
    let collector = MockCollector::launch(CollectorMode::Accept).await;
    let (emitter, mut failures) = Emitter::new(test_config(&collector.endpoint)).unwrap();

    for seq in 0..12 {
        emitter.track(record(seq)).unwrap();
    }
    emitter.flush(Duration::from_secs(5)).await.unwrap();

    let batches = collector.batch_seqs();
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![5, 5, 2]);

    // Submission order survives batching end to end.
    let flat: Vec<u64> = batches.into_iter().flatten().collect();
    assert_eq!(flat, (0..12).collect::<Vec<u64>>());

    assert!(failures.try_recv().is_err());
    emitter.close(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn flush_accounts_for_every_submitted_record() {
    let collector = MockCollector::launch(CollectorMode::Accept).await;
    let mut config = test_config(&collector.endpoint);
    config.batch_size = 3;
    config.delivery_parallelism = 2;
    let (emitter, mut failures) = Emitter::new(config).unwrap();

    for seq in 0..7 {
        emitter.track(record(seq)).unwrap();
    }
    emitter.flush(Duration::from_secs(5)).await.unwrap();

    let mut seqs: Vec<u64> = collector.batch_seqs().into_iter().flatten().collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..7).collect::<Vec<u64>>());
    assert!(failures.try_recv().is_err());

    emitter.close(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn time_trigger_sends_partial_batch_without_flush() {
    let collector = MockCollector::launch(CollectorMode::Accept).await;
    let mut config = test_config(&collector.endpoint);
    config.batch_size = 100;
    config.batch_timeout_ms = 100;
    let (emitter, _failures) = Emitter::new(config).unwrap();

    emitter.track(record(0)).unwrap();
    emitter.track(record(1)).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if collector.batch_seqs().first().map(|b| b.len()) == Some(2) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "time trigger never closed the batch"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    emitter.close(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn retry_budget_is_exhausted_then_surfaced_once() {
    let collector = MockCollector::launch(CollectorMode::ServerError).await;
    let mut config = test_config(&collector.endpoint);
    config.max_retries = 2;
    let (emitter, mut failures) = Emitter::new(config).unwrap();

    emitter.track(record(0)).unwrap();
    emitter.flush(Duration::from_secs(10)).await.unwrap();

    // max_retries + 1 attempts, then the batch is dropped.
    assert_eq!(collector.attempts(), 3);

    let failure = failures.try_recv().expect("one terminal failure expected");
    assert_eq!(failure.record_count, 1);
    match failure.reason {
        TerminalReason::RetryExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected reason: {:?}", other),
    }
    assert!(failures.try_recv().is_err());

    emitter.close(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn client_rejection_is_terminal_with_single_attempt() {
    let collector = MockCollector::launch(CollectorMode::ClientError).await;
    let (emitter, mut failures) = Emitter::new(test_config(&collector.endpoint)).unwrap();

    emitter.track(record(0)).unwrap();
    emitter.flush(Duration::from_secs(5)).await.unwrap();

    assert_eq!(collector.attempts(), 1);

    let failure = failures.try_recv().expect("one terminal failure expected");
    match failure.reason {
        TerminalReason::Rejected { status, .. } => assert_eq!(status, 400),
        other => panic!("unexpected reason: {:?}", other),
    }
    assert!(failures.try_recv().is_err());

    emitter.close(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn close_drains_buffered_records() {
    let collector = MockCollector::launch(CollectorMode::Accept).await;
    let (emitter, mut failures) = Emitter::new(test_config(&collector.endpoint)).unwrap();

    for seq in 0..3 {
        emitter.track(record(seq)).unwrap();
    }
    emitter.close(Duration::from_secs(5)).await.unwrap();

    assert_eq!(collector.batch_seqs(), vec![vec![0, 1, 2]]);
    assert!(failures.try_recv().is_err());
}

#[tokio::test]
async fn lifecycle_is_enforced_and_close_is_idempotent() {
    let collector = MockCollector::launch(CollectorMode::Accept).await;
    let (emitter, _failures) = Emitter::new(test_config(&collector.endpoint)).unwrap();

    emitter.close(Duration::from_secs(5)).await.unwrap();
    assert!(emitter.is_closed());

    assert!(matches!(
        emitter.track(record(0)),
        Err(EmitterError::Closed)
    ));
    assert!(matches!(
        emitter.flush(Duration::from_secs(1)).await,
        Err(EmitterError::Closed)
    ));

    // Second close is a no-op.
    emitter.close(Duration::from_secs(5)).await.unwrap();
    assert!(emitter.is_closed());
}

#[tokio::test]
async fn empty_schema_is_rejected_at_track() {
    let collector = MockCollector::launch(CollectorMode::Accept).await;
    let (emitter, _failures) = Emitter::new(test_config(&collector.endpoint)).unwrap();

    let result = emitter.track(EventRecord::self_describing("  ", json!({})));
    assert!(matches!(result, Err(EmitterError::InvalidEvent(_))));

    emitter.close(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn buffer_backpressure_rejects_newest() {
    let collector = MockCollector::launch(CollectorMode::Hang).await;
    let mut config = test_config(&collector.endpoint);
    config.buffer_capacity = 4;
    config.batch_size = 100;
    config.batch_timeout_ms = 60_000;
    let (emitter, _failures) = Emitter::new(config).unwrap();

    // The batcher may pull a few records into its open batch, so overfill
    // well past capacity and expect the tail to be rejected.
    let mut rejected = 0;
    for seq in 0..200 {
        if matches!(
            emitter.track(record(seq)),
            Err(EmitterError::BufferFull { .. })
        ) {
            rejected += 1;
        }
    }
    assert!(rejected > 0);

    emitter.close(Duration::from_millis(200)).await.unwrap();
}

#[tokio::test]
async fn shutdown_deadline_abandons_in_flight_batches() {
    let collector = MockCollector::launch(CollectorMode::Hang).await;
    let (emitter, mut failures) = Emitter::new(test_config(&collector.endpoint)).unwrap();

    emitter.track(record(0)).unwrap();

    assert!(matches!(
        emitter.flush(Duration::from_millis(200)).await,
        Err(EmitterError::FlushTimeout)
    ));

    emitter.close(Duration::from_millis(300)).await.unwrap();
    assert!(emitter.is_closed());

    let failure = failures.recv().await.expect("abandoned batch published");
    assert_eq!(failure.reason, TerminalReason::ShutdownAbandoned);
}
