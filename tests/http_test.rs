use anyhow::Result;
use axum::{http::StatusCode, routing::get, Json, Router};
use chrono::{Duration, Utc};
use event_ingest::config::{Config, FetchConfig, SourceConfig, SourceKind};
use event_ingest::error::FetchError;
use event_ingest::pipeline::ingestion::Fetcher;
use event_ingest::pipeline::storage::{SqliteStorage, Storage};
use event_ingest::pipeline::{RunCoordinator, RunSettings};
use event_ingest::server::{self, AppState, IngestResponse};
use event_ingest::types::IngestRun;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const SECRET: &str = "s3cret";

fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn spawn_router(router: Router) -> SocketAddr {
    let (listener, addr) = bind();
    tokio::spawn(async move {
        hyper::Server::from_tcp(listener)
            .unwrap()
            .serve(router.into_make_service())
            .await
            .unwrap();
    });
    addr
}

fn fast_fetch() -> FetchConfig {
    FetchConfig {
        retries: 3,
        timeout_secs: 5,
        backoff_ms: 10,
        min_host_interval_ms: 0,
        ..FetchConfig::default()
    }
}

#[tokio::test]
async fn test_fetcher_retries_transient_errors() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let addr = spawn_router(Router::new().route(
        "/flaky",
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::SERVICE_UNAVAILABLE, "busy")
                } else {
                    (StatusCode::OK, "hello")
                }
            }
        }),
    ));

    let fetcher = Fetcher::from_config(&fast_fetch())?;
    let body = fetcher.get_text(&format!("http://{addr}/flaky")).await?;
    assert_eq!(body, "hello");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_fetcher_does_not_retry_not_found() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let addr = spawn_router(Router::new().route(
        "/gone",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        }),
    ));

    let fetcher = Fetcher::from_config(&fast_fetch())?;
    let err = fetcher.get_text(&format!("http://{addr}/gone")).await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

/// Trigger server wired to an in-memory catalog and one JSON feed source.
async fn trigger_server() -> Result<(SocketAddr, SqliteStorage)> {
    let start = (Utc::now() + Duration::days(4)).to_rfc3339();
    let feed_addr = spawn_router(Router::new().route(
        "/feed",
        get(move || {
            let start = start.clone();
            async move {
                Json(serde_json::json!([
                    {"title": "Jazz Night", "url": "/events/jazz", "venue": "Rialto", "start": start},
                    {"title": "Listing without date", "url": "/events/undated"}
                ]))
            }
        }),
    ));

    let mut config = Config::default();
    config.fetch = fast_fetch();
    config.server.secret = Some(SECRET.to_string());
    config.sources = vec![SourceConfig {
        name: "feed".into(),
        kind: SourceKind::JsonFeed,
        url: format!("http://{feed_addr}/feed"),
        enabled: true,
        items_key: None,
        fields: HashMap::new(),
        selectors: HashMap::new(),
        fetch_detail: false,
    }];

    let storage = SqliteStorage::open_in_memory()?;
    let fetcher = Arc::new(Fetcher::from_config(&config.fetch)?);
    let coordinator = RunCoordinator::new(
        Arc::new(storage.clone()),
        fetcher,
        None,
        RunSettings::from_config(&config),
    );

    let (listener, addr) = bind();
    let state = AppState::new(coordinator, &config);
    tokio::spawn(async move { server::serve(state, listener).await.unwrap() });
    Ok((addr, storage))
}

#[tokio::test]
async fn test_trigger_requires_secret() -> Result<()> {
    let (addr, storage) = trigger_server().await?;
    let client = reqwest::Client::new();

    let missing = client.post(format!("http://{addr}/api/ingest")).send().await?;
    assert_eq!(missing.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong = client
        .post(format!("http://{addr}/api/ingest"))
        .header("x-ingest-secret", "nope")
        .send()
        .await?;
    assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(storage.list_events().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_trigger_runs_ingestion() -> Result<()> {
    let (addr, storage) = trigger_server().await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/ingest?sources=feed"))
        .header("x-ingest-secret", SECRET)
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: IngestResponse = resp.json().await?;
    assert!(body.success);
    let results = body.results.unwrap();
    assert_eq!(results.total, 2);
    assert_eq!(results.created, 1);
    assert_eq!(results.updated, 0);
    assert_eq!(results.errors.len(), 1);
    assert!(results.errors[0].starts_with("feed: Listing without date:"));

    let events = storage.list_events().await?;
    assert_eq!(events.len(), 1);
    assert!(events[0].source_url.ends_with("/events/jazz"));

    let runs: serde_json::Value = client.get(format!("http://{addr}/api/runs?limit=5")).send().await?.json().await?;
    assert_eq!(runs.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_trigger_rejects_unknown_source() -> Result<()> {
    let (addr, _storage) = trigger_server().await?;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/ingest?sources=feed,missing"))
        .header("x-ingest-secret", SECRET)
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: IngestResponse = resp.json().await?;
    assert!(!body.success);
    assert!(body.error.unwrap().contains("missing"));
    Ok(())
}

#[tokio::test]
async fn test_trigger_reports_lock_contention() -> Result<()> {
    let (addr, storage) = trigger_server().await?;
    storage
        .acquire_run_lock(&IngestRun::start(Utc::now()), Duration::hours(1))
        .await?;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/ingest"))
        .header("x-ingest-secret", SECRET)
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: IngestResponse = resp.json().await?;
    assert!(!body.success);
    Ok(())
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let (addr, _storage) = trigger_server().await?;
    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health")).await?.json().await?;
    assert_eq!(body["status"], "healthy");
    Ok(())
}
