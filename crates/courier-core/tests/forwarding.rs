//! End-to-end forwarding: SQLite store, HTTP sink, real scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use courier_core::app::{Outbox, OutboxBuilder};
use courier_core::config::{EndpointMode, load_config_from_str};
use courier_core::domain::{NewEvent, SchedulerState};
use courier_core::impls::{HttpSink, InMemoryOutboxStore, RecordingSink, SinkOptions, SqliteOutboxStore};
use courier_core::ports::{IdGenerator, OutboxStore, SystemClock, UlidGenerator};

async fn sqlite_store() -> (tempfile::TempDir, SqliteOutboxStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteOutboxStore::open(dir.path().join("courier.db")).await.unwrap();
    (dir, store)
}

fn http_sink(server: &MockServer, token: Option<&str>) -> Arc<HttpSink> {
    let sink = HttpSink::new(
        format!("{}/data/-/create", server.uri()),
        SinkOptions {
            token: token.map(str::to_string),
            mode: EndpointMode::Create,
            timeout: Duration::from_secs(5),
            ..SinkOptions::default()
        },
    )
    .unwrap();
    Arc::new(sink)
}

async fn outbox(store: &SqliteOutboxStore, server: &MockServer, batch_limit: usize) -> Outbox {
    let outbox = OutboxBuilder::new()
        .store(Arc::new(store.clone()))
        .sink(http_sink(server, Some("xxx")))
        .batch_limit(batch_limit)
        .rate_limit(1000.0, Duration::from_secs(1))
        .build()
        .unwrap();
    outbox.start().await.unwrap();
    outbox
}

async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.body_json().unwrap())
        .collect()
}

#[tokio::test]
async fn single_event_is_delivered_and_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/data/-/create"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let (_dir, store) = sqlite_store().await;
    let outbox = outbox(&store, &server, 10).await;

    outbox
        .enqueue(
            NewEvent::new("create-table", Utc::now())
                .actor("root")
                .property("database", "data")
                .property("table", "hello"),
        )
        .await
        .unwrap();
    outbox.drain().await;

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    let rows = bodies[0]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["event"], "create-table");
    assert_eq!(rows[0]["database_name"], "data");
    assert_eq!(rows[0]["table_name"], "hello");
    assert_eq!(store.counts(3).await.unwrap().total(), 0);
}

#[tokio::test]
async fn backlog_drains_in_two_cycles() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let (_dir, store) = sqlite_store().await;

    // queue everything before the sink is attached so the first cycle sees all 11
    let writer = OutboxBuilder::new().store(Arc::new(store.clone())).build().unwrap();
    writer.start().await.unwrap();
    for i in 0..11 {
        writer.enqueue(NewEvent::new(format!("e{i}"), Utc::now())).await.unwrap();
    }
    writer.shutdown().await;

    let outbox = outbox(&store, &server, 10).await;
    outbox.drain().await;

    let sizes: Vec<_> = request_bodies(&server)
        .await
        .iter()
        .map(|b| b["rows"].as_array().unwrap().len())
        .collect();
    assert_eq!(sizes, vec![10, 1]);
    assert_eq!(store.counts(3).await.unwrap().total(), 0);
}

#[tokio::test]
async fn repeated_failures_abandon_the_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let (_dir, store) = sqlite_store().await;
    let outbox = outbox(&store, &server, 10).await;

    let id = outbox.enqueue(NewEvent::new("login", Utc::now())).await.unwrap();
    outbox.drain().await;

    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    let abandoned = outbox.abandoned(10).await.unwrap();
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].id, id);
    assert_eq!(abandoned[0].failure_count, 3);

    // a fourth cycle selects nothing and sends nothing
    outbox.flush();
    outbox.drain().await;
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    let counts = store.counts(3).await.unwrap();
    assert_eq!((counts.pending, counts.abandoned), (0, 1));
}

#[tokio::test]
async fn missing_token_sends_without_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let (_dir, store) = sqlite_store().await;
    let outbox = OutboxBuilder::new()
        .store(Arc::new(store.clone()))
        .sink(http_sink(&server, None))
        .build()
        .unwrap();
    outbox.start().await.unwrap();

    outbox.enqueue(NewEvent::new("login", Utc::now())).await.unwrap();
    outbox.drain().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
    assert_eq!(store.counts(3).await.unwrap().total(), 0);
}

#[tokio::test]
async fn config_without_api_url_never_touches_the_network() {
    let config = load_config_from_str("[forward]\nbatch_limit = 5\n").unwrap();
    let (_dir, store) = sqlite_store().await;
    let outbox = OutboxBuilder::from_config(&config.forward)
        .unwrap()
        .store(Arc::new(store.clone()))
        .build()
        .unwrap();
    outbox.start().await.unwrap();

    for i in 0..3 {
        outbox.enqueue(NewEvent::new(format!("e{i}"), Utc::now())).await.unwrap();
    }
    outbox.drain().await;

    let status = outbox.status().await.unwrap();
    assert!(!status.delivery_enabled());
    assert_eq!(status.counts.pending, 3);
    assert_eq!(status.scheduler, SchedulerState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enqueues_never_overlap_cycles() {
    let store = InMemoryOutboxStore::new();
    let sink = Arc::new(RecordingSink::new().with_delay(Duration::from_millis(20)));
    let outbox = Arc::new(
        OutboxBuilder::new()
            .store(Arc::new(store.clone()))
            .sink(sink.clone())
            .batch_limit(5)
            .rate_limit(1000.0, Duration::from_secs(1))
            .build()
            .unwrap(),
    );
    outbox.start().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let outbox = Arc::clone(&outbox);
        handles.push(tokio::spawn(async move {
            outbox.enqueue(NewEvent::new(format!("e{i}"), Utc::now())).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    outbox.drain().await;

    assert_eq!(sink.max_concurrent(), 1);
    assert!(store.is_empty().await);
    let delivered: usize = sink.batches().iter().map(Vec::len).sum();
    assert_eq!(delivered, 20);
}

#[tokio::test]
async fn instances_do_not_share_scheduling_state() {
    let slow_store = InMemoryOutboxStore::new();
    let slow_sink = Arc::new(RecordingSink::new().with_delay(Duration::from_millis(200)));
    let slow = OutboxBuilder::new()
        .store(Arc::new(slow_store.clone()))
        .sink(slow_sink.clone())
        .build()
        .unwrap();

    let fast_store = InMemoryOutboxStore::new();
    let fast_sink = Arc::new(RecordingSink::new());
    let fast = OutboxBuilder::new()
        .store(Arc::new(fast_store.clone()))
        .sink(fast_sink.clone())
        .build()
        .unwrap();

    slow.enqueue(NewEvent::new("slow", Utc::now())).await.unwrap();
    fast.enqueue(NewEvent::new("fast", Utc::now())).await.unwrap();
    fast.drain().await;

    // the fast instance finished while the slow one is still mid-delivery
    assert!(fast_store.is_empty().await);
    assert_eq!(fast_sink.calls(), 1);
    assert_ne!(slow.scheduler_state(), SchedulerState::Idle);

    slow.drain().await;
    assert!(slow_store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn follow_up_cycles_respect_the_rate_limit() {
    let store = InMemoryOutboxStore::new();
    let ids = UlidGenerator::new(SystemClock);
    for i in 0..11 {
        let ev = NewEvent::new(format!("e{i}"), Utc::now()).into_queued(ids.generate_event_id());
        store.insert(ev).await.unwrap();
    }
    let sink = Arc::new(RecordingSink::new());
    let outbox = OutboxBuilder::new()
        .store(Arc::new(store.clone()))
        .sink(sink.clone())
        .rate_limit(1.0, Duration::from_secs(10))
        .build()
        .unwrap();

    let start = tokio::time::Instant::now();
    outbox.start().await.unwrap();
    outbox.drain().await;

    assert_eq!(sink.calls(), 2);
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn undecodable_row_does_not_stall_delivery() {
    let (dir, store) = sqlite_store().await;
    store.bootstrap().await.unwrap();
    {
        let raw = rusqlite::Connection::open(dir.path().join("courier.db")).unwrap();
        raw.execute(
            "INSERT INTO events_to_forward (id, event, created, properties) \
             VALUES ('00000000000000000000000000', 'e', 'yesterday', '{}')",
            [],
        )
        .unwrap();
    }
    let sink = Arc::new(RecordingSink::new());
    let outbox = OutboxBuilder::new()
        .store(Arc::new(store.clone()))
        .sink(sink.clone())
        .rate_limit(1000.0, Duration::from_secs(1))
        .build()
        .unwrap();
    outbox.start().await.unwrap();

    for i in 0..3 {
        outbox.enqueue(NewEvent::new(format!("e{i}"), Utc::now())).await.unwrap();
    }
    outbox.drain().await;

    let delivered: usize = sink.batches().iter().map(Vec::len).sum();
    assert_eq!(delivered, 3);
    let status = outbox.status().await.unwrap();
    assert_eq!(status.counts.pending, 0);
    assert_eq!(status.counts.abandoned, 1);
}
