//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health and proxy handlers
//! - Configure HTTP/1.1 and HTTP/2 support, with upgrades
//! - Wire up middleware (request ID, tracing, compression)
//! - Classify each request and dispatch it to the tunnel, media relay or
//!   generic forwarder
//! - Drain connections on shutdown
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → hyper-util auto connection (h1/h2, upgrades)
//!     → SetRequestId → Trace → PropagateRequestId → [Compression]
//!     → /healthz                     → health::healthz
//!     → everything else → dispatch   → RouteClassifier
//!           Tunnel  → websocket::tunnel
//!           Media   → media::relay
//!           Generic → forward::forward
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, Request, StatusCode, Version};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use thiserror::Error;
use tokio::sync::broadcast;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::compression::predicate::{DefaultPredicate, NotForContentType, Predicate};
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::{ProxyConfig, TunnelMode};
use crate::error::ProxyError;
use crate::health;
use crate::http::request::{MakeRequestUuidV4, RequestContext};
use crate::http::{forward, media, response, websocket};
use crate::net::{ConnectionTracker, Listener};
use crate::observability::metrics;
use crate::resilience::TimeoutPolicy;
use crate::routing::{is_websocket_upgrade, RouteClass, RouteClassifier, UpstreamError, UpstreamTarget};
use crate::security::headers::HeaderConfigError;
use crate::security::{BodyLimits, HeaderPolicy};

/// Failure to assemble the server from a configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid upstream: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("invalid header configuration: {0}")]
    Headers(#[from] HeaderConfigError),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Everything a request handler needs, built once at startup.
pub struct ProxyState {
    pub upstream: UpstreamTarget,
    pub client: reqwest::Client,
    pub classifier: RouteClassifier,
    pub headers: HeaderPolicy,
    pub timeouts: TimeoutPolicy,
    pub limits: BodyLimits,
    pub frame_size: usize,
    pub tunnel_mode: TunnelMode,
    pub close_grace: Duration,
}

/// Application state injected into handlers.
pub type AppState = Arc<ProxyState>;

impl ProxyState {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ServerError> {
        let upstream = UpstreamTarget::parse(&config.upstream.url)?;
        let timeouts = TimeoutPolicy::from_config(&config.timeouts);

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeouts.connect_timeout())
            .no_proxy()
            .build()?;

        Ok(Self {
            upstream,
            client,
            classifier: RouteClassifier::new(&config.tunnel, &config.media),
            headers: HeaderPolicy::from_config(&config.headers)?,
            timeouts,
            limits: BodyLimits::from_config(&config.limits),
            frame_size: config.media.frame_size,
            tunnel_mode: config.tunnel.mode,
            close_grace: Duration::from_millis(config.tunnel.close_grace_ms),
        })
    }
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let state = Arc::new(ProxyState::from_config(&config)?);
        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let router = Router::new()
            .route("/healthz", get(health::healthz).fallback(dispatch))
            .fallback(dispatch)
            .with_state(state);

        let router = if config.compression.enabled {
            // media is already compressed; 101 responses carry no body
            let predicate = DefaultPredicate::new()
                .and(NotForContentType::const_new("video/"))
                .and(NotForContentType::const_new("audio/"))
                .and(|status: StatusCode, _: Version, _: &HeaderMap, extensions: &Extensions| {
                    status != StatusCode::SWITCHING_PROTOCOLS
                        && extensions.get::<RouteClass>() != Some(&RouteClass::Media)
                });
            router.layer(CompressionLayer::new().compress_when(predicate))
        } else {
            router
        };

        router.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve connections until `shutdown` fires, then drain in-flight
    /// connections for at most `listener.shutdown_grace_secs`.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.url,
            "HTTP server starting"
        );

        let builder = auto::Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();

        loop {
            let (stream, peer, permit) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
                _ = shutdown.recv() => break,
            };

            let guard = self.tracker.track();
            let router = self.router.clone();
            let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                router.clone().oneshot(request)
            });

            let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            let connection = graceful.watch(connection.into_owned());
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::debug!(
                        connection_id = %guard.id(),
                        peer_addr = %peer,
                        error = %e,
                        "Connection ended with error"
                    );
                }
                drop(guard);
                drop(permit);
            });
        }

        drop(listener);
        let grace = Duration::from_secs(self.config.listener.shutdown_grace_secs);
        tracing::info!(
            active_connections = self.tracker.active_count(),
            grace_secs = grace.as_secs(),
            "Draining connections"
        );
        tokio::select! {
            _ = graceful.shutdown() => tracing::info!("All connections drained"),
            _ = tokio::time::sleep(grace) => tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Drain deadline reached, dropping remaining connections"
            ),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Classify a request and hand it to the matching handler.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let class = state
        .classifier
        .classify(request.method(), request.uri().path(), request.headers());
    let ctx = RequestContext::new(&request, class);

    tracing::debug!(
        request_id = %ctx.request_id,
        method = %ctx.method,
        path = %ctx.path,
        class = %class,
        "Dispatching request"
    );

    let (ctx, result) = match class {
        RouteClass::Tunnel => {
            let upgrade = is_websocket_upgrade(request.headers());
            match (state.tunnel_mode, upgrade) {
                (TunnelMode::Tunnel, true) => {
                    let result = websocket::tunnel(&state, &ctx, request).await;
                    (ctx, result)
                }
                (TunnelMode::Tunnel, false) => (
                    ctx,
                    Err(ProxyError::BadRequest("WebSocket upgrade required".into())),
                ),
                (TunnelMode::HttpFallback, true) => (ctx, Err(ProxyError::UpgradeRequired)),
                (TunnelMode::HttpFallback, false) => {
                    let ctx = ctx.reclassify(RouteClass::Generic);
                    let result = forward::forward(&state, &ctx, request).await;
                    (ctx, result)
                }
            }
        }
        RouteClass::Media => {
            let result = media::relay(&state, &ctx, request).await;
            (ctx, result)
        }
        RouteClass::Generic => {
            let result = forward::forward(&state, &ctx, request).await;
            (ctx, result)
        }
    };

    let mut response = match result {
        Ok(response) => response,
        Err(e) => response::error_response(&ctx, e),
    };
    // read by the compression predicate
    response.extensions_mut().insert(ctx.class);

    metrics::record_request(
        ctx.method.as_str(),
        response.status().as_u16(),
        ctx.class.as_str(),
        ctx.started,
    );
    tracing::info!(
        request_id = %ctx.request_id,
        method = %ctx.method,
        path = %ctx.path,
        class = %ctx.class,
        status = response.status().as_u16(),
        duration_ms = ctx.started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
