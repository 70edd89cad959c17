//! Failure injection tests for the reverse proxy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

mod common;

#[tokio::test]
async fn test_upstream_down_returns_502() {
    let upstream = common::unused_addr().await;
    let (proxy_addr, shutdown) = common::start_proxy(common::proxy_config(upstream)).await;

    let res = common::client()
        .get(format!("http://{proxy_addr}/System/Info/Public"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Bad Gateway");
    assert_eq!(body["message"], "Failed to connect to upstream server");
    assert!(!body["details"].as_str().unwrap_or_default().is_empty());

    shutdown.trigger();
}

#[tokio::test]
async fn test_silent_upstream_times_out_with_504() {
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let upstream = common::start_raw_upstream(move |mut socket, _head| {
        let closed_tx = closed_tx.clone();
        async move {
            // never answer; report when the proxy gives up on us
            let mut buf = [0u8; 256];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            let _ = closed_tx.send(Instant::now());
        }
    })
    .await;

    let mut config = common::proxy_config(upstream);
    config.timeouts.default_ms = 400;
    config.timeouts.rules.clear();
    let (proxy_addr, shutdown) = common::start_proxy(config).await;

    let start = Instant::now();
    let res = common::client()
        .get(format!("http://{proxy_addr}/Users/1/Items"))
        .send()
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(elapsed >= Duration::from_millis(400), "answered early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "answered late: {elapsed:?}");

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Gateway Timeout");

    let closed = tokio::time::timeout(Duration::from_secs(2), closed_rx.recv())
        .await
        .expect("upstream socket was not closed")
        .unwrap();
    assert!(closed.duration_since(start) < Duration::from_secs(2));

    shutdown.trigger();
}

#[tokio::test]
async fn test_timeout_tier_follows_path() {
    let upstream = common::start_axum_upstream(Router::new().route(
        "/Videos/{id}/stream",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(600)).await;
            "late but fine"
        }),
    ))
    .await;

    let mut config = common::proxy_config(upstream);
    config.timeouts.default_ms = 200;
    let (proxy_addr, shutdown) = common::start_proxy(config).await;

    // /Videos/ keeps its long tier even though the default is short
    let res = common::client()
        .get(format!("http://{proxy_addr}/Videos/9/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "late but fine");

    shutdown.trigger();
}

#[tokio::test]
async fn test_oversized_upload_is_rejected_before_upstream() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    let upstream = common::start_axum_upstream(Router::new().route(
        "/Items/{id}/Images/Primary",
        post(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                StatusCode::NO_CONTENT
            }
        }),
    ))
    .await;

    let mut config = common::proxy_config(upstream);
    config.limits.max_request_body_bytes = 1024;
    let (proxy_addr, shutdown) = common::start_proxy(config).await;

    let res = common::client()
        .post(format!("http://{proxy_addr}/Items/1/Images/Primary"))
        .body(vec![7u8; 4096])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Payload Too Large");

    let res = common::client()
        .post(format!("http://{proxy_addr}/Items/1/Images/Primary"))
        .body(vec![7u8; 512])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn test_streamed_upload_over_limit_is_rejected() {
    let received = Arc::new(AtomicU32::new(0));
    let seen = received.clone();
    let upstream = common::start_axum_upstream(Router::new().route(
        "/Items/{id}/Images/Primary",
        post(move |body: Bytes| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                body.len().to_string()
            }
        }),
    ))
    .await;

    let mut config = common::proxy_config(upstream);
    config.limits.max_request_body_bytes = 1024;
    let (proxy_addr, shutdown) = common::start_proxy(config).await;

    // chunked, so the size is only known once the limit is crossed
    let chunks = stream::iter((0..8).map(|_| Ok::<_, std::io::Error>(vec![7u8; 512])));
    let res = common::client()
        .post(format!("http://{proxy_addr}/Items/1/Images/Primary"))
        .body(reqwest::Body::wrap_stream(chunks))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Payload Too Large");
    assert_eq!(received.load(Ordering::SeqCst), 0);

    // a chunked upload under the limit goes through whole
    let chunks = stream::iter((0..2).map(|_| Ok::<_, std::io::Error>(vec![7u8; 400])));
    let res = common::client()
        .post(format!("http://{proxy_addr}/Items/1/Images/Primary"))
        .body(reqwest::Body::wrap_stream(chunks))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "800");
    assert_eq!(received.load(Ordering::SeqCst), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn test_max_connections_queues_extra_clients() {
    let upstream = common::start_axum_upstream(Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            "slow"
        }),
    ))
    .await;

    let mut config = common::proxy_config(upstream);
    config.listener.max_connections = 1;
    let (proxy_addr, shutdown) = common::start_proxy(config).await;

    // separate clients so each request needs its own connection; a
    // client is dropped with its task, which frees the proxy's slot
    let url = format!("http://{proxy_addr}/slow");
    let start = Instant::now();
    let first = tokio::spawn({
        let url = url.clone();
        async move { common::client().get(&url).send().await.unwrap().status() }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = tokio::spawn(async move { common::client().get(&url).send().await.unwrap().status() });

    assert_eq!(first.await.unwrap(), StatusCode::OK);
    let second = tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .expect("queued connection was never served")
        .unwrap();
    assert_eq!(second, StatusCode::OK);
    // served one after the other, never side by side
    assert!(start.elapsed() >= Duration::from_millis(400));

    shutdown.trigger();
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let upstream = common::start_axum_upstream(Router::new().route("/ping", get(|| async { "pong" }))).await;
    let (proxy_addr, shutdown) = common::start_proxy(common::proxy_config(upstream)).await;

    let res = common::client()
        .get(format!("http://{proxy_addr}/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "pong");

    shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fresh = reqwest::Client::builder().no_proxy().build().unwrap();
    assert!(fresh
        .get(format!("http://{proxy_addr}/ping"))
        .timeout(Duration::from_secs(1))
        .send()
        .await
        .is_err());
}
