//! WebSocket tunnel.
//!
//! # Responsibilities
//! - Open the upstream WebSocket before accepting the client upgrade
//! - Relay text, binary and close frames in both directions, in order
//! - Propagate a close on either leg to the other one
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Upstream
//!
//!   client_rx ──pump──▶ upstream_tx
//!   client_tx ◀──pump── upstream_rx
//!
//! Connecting → Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Upstream handshake first: if it fails the client gets 502 (or 504)
//!   instead of an upgrade that immediately closes
//! - One task per direction. Each owns one read half and one write half,
//!   so frames are never reordered
//! - Ping/pong stay on the leg they arrived on; both ends answer their
//!   own pings
//! - When one direction finishes the other gets a grace period to drain
//!   its close handshake, then it is aborted

use std::fmt;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, Method, Request};
use axum::response::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ProxyError;
use crate::http::request::{path_and_query, RequestContext};
use crate::http::server::ProxyState;
use crate::observability::metrics;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of one tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client_to_upstream",
            Direction::UpstreamToClient => "upstream_to_client",
        }
    }
}

/// How a pump finished.
#[derive(Debug)]
enum PumpOutcome {
    /// A close frame was read and forwarded.
    Closed,
    /// The source ended without a close frame.
    Eof,
    /// Reading from the source failed.
    ReadFailed(String),
    /// Writing to the other leg failed.
    WriteFailed(String),
}

impl fmt::Display for PumpOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpOutcome::Closed => f.write_str("closed"),
            PumpOutcome::Eof => f.write_str("eof"),
            PumpOutcome::ReadFailed(e) => write!(f, "read failed: {e}"),
            PumpOutcome::WriteFailed(e) => write!(f, "write failed: {e}"),
        }
    }
}

/// A frame after translation to the other leg's message type.
enum Relay<M> {
    Data(M),
    Close(M),
    Skip,
}

/// Accept a client upgrade and tunnel it to the upstream.
pub async fn tunnel(
    state: &ProxyState,
    ctx: &RequestContext,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let url = state.upstream.websocket_url(&path_and_query(&request));
    let (mut parts, _body) = request.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .map_err(|rejection| ProxyError::BadRequest(rejection.body_text()))?;

    let mut upstream_request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ProxyError::Internal(format!("invalid upstream WebSocket URL: {e}")))?;
    let forwarded = state
        .headers
        .tunnel_request_headers(&parts.headers, &state.upstream, ctx.client_addr);
    for (name, value) in forwarded.iter() {
        // the WebSocket client writes its own Host
        if *name != header::HOST {
            upstream_request.headers_mut().append(name.clone(), value.clone());
        }
    }

    let timeout = state.timeouts.timeout_for(&ctx.path, &Method::GET);
    let mut session = TunnelSession::new(ctx, state.close_grace);
    let (upstream, handshake) =
        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(upstream_request)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                session.transition(TunnelState::Closed);
                return Err(ProxyError::bad_gateway(
                    "WebSocket handshake with upstream failed",
                    &e,
                ));
            }
            Err(_) => {
                session.transition(TunnelState::Closed);
                return Err(ProxyError::GatewayTimeout { timeout });
            }
        };

    let mut upgrade = upgrade.on_failed_upgrade({
        let request_id = ctx.request_id.clone();
        move |e| tracing::warn!(request_id = %request_id, error = %e, "Client upgrade failed")
    });
    if let Some(protocol) = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        upgrade = upgrade.protocols([protocol.to_string()]);
    }

    Ok(upgrade.on_upgrade(move |client| session.run(client, upstream)))
}

struct TunnelSession {
    request_id: String,
    path: String,
    close_grace: Duration,
    state: TunnelState,
}

impl TunnelSession {
    fn new(ctx: &RequestContext, close_grace: Duration) -> Self {
        let session = Self {
            request_id: ctx.request_id.clone(),
            path: ctx.path.clone(),
            close_grace,
            state: TunnelState::Connecting,
        };
        tracing::debug!(request_id = %session.request_id, path = %session.path, state = ?session.state, "Tunnel state");
        session
    }

    fn transition(&mut self, next: TunnelState) {
        tracing::debug!(
            request_id = %self.request_id,
            from = ?self.state,
            to = ?next,
            "Tunnel state"
        );
        self.state = next;
    }

    async fn run(mut self, client: WebSocket, upstream: UpstreamSocket) {
        self.transition(TunnelState::Open);
        metrics::tunnel_opened();
        tracing::info!(request_id = %self.request_id, path = %self.path, "WebSocket tunnel open");

        let (client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = upstream.split();

        let mut to_upstream = tokio::spawn(pump(
            client_rx,
            upstream_tx,
            Direction::ClientToUpstream,
            client_to_upstream,
        ));
        let mut to_client = tokio::spawn(pump(
            upstream_rx,
            client_tx,
            Direction::UpstreamToClient,
            upstream_to_client,
        ));

        let (finished, outcome) = tokio::select! {
            outcome = &mut to_upstream => (Direction::ClientToUpstream, outcome),
            outcome = &mut to_client => (Direction::UpstreamToClient, outcome),
        };
        let mut remaining = match finished {
            Direction::ClientToUpstream => to_client,
            Direction::UpstreamToClient => to_upstream,
        };

        self.transition(TunnelState::Closing);
        match outcome {
            Ok(outcome) => tracing::debug!(
                request_id = %self.request_id,
                direction = finished.as_str(),
                %outcome,
                "Tunnel direction finished"
            ),
            Err(e) => tracing::warn!(
                request_id = %self.request_id,
                direction = finished.as_str(),
                error = %e,
                "Tunnel pump task failed"
            ),
        }

        if tokio::time::timeout(self.close_grace, &mut remaining).await.is_err() {
            remaining.abort();
            tracing::debug!(
                request_id = %self.request_id,
                grace_ms = self.close_grace.as_millis() as u64,
                "Tunnel close handshake timed out"
            );
        }

        self.transition(TunnelState::Closed);
        metrics::tunnel_closed();
        tracing::info!(request_id = %self.request_id, path = %self.path, "WebSocket tunnel closed");
    }
}

/// Copy frames from `rx` to `tx` until either side stops, then close `tx`.
async fn pump<In, Out, Rx, Tx, ReadErr, WriteErr, F>(
    mut rx: Rx,
    mut tx: Tx,
    direction: Direction,
    translate: F,
) -> PumpOutcome
where
    F: Fn(In) -> Relay<Out>,
    Rx: Stream<Item = Result<In, ReadErr>> + Unpin,
    Tx: Sink<Out, Error = WriteErr> + Unpin,
    Out: CloseMessage,
    ReadErr: fmt::Display,
    WriteErr: fmt::Display,
{
    let outcome = loop {
        let message = match rx.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break PumpOutcome::ReadFailed(e.to_string()),
            None => break PumpOutcome::Eof,
        };
        match translate(message) {
            Relay::Data(frame) => {
                if let Err(e) = tx.send(frame).await {
                    break PumpOutcome::WriteFailed(e.to_string());
                }
                metrics::record_tunnel_frame(direction.as_str());
            }
            Relay::Close(frame) => {
                let _ = tx.send(frame).await;
                break PumpOutcome::Closed;
            }
            Relay::Skip => {}
        }
    };

    if !matches!(outcome, PumpOutcome::Closed | PumpOutcome::WriteFailed(_)) {
        let _ = tx.send(Out::close()).await;
    }
    let _ = tx.close().await;
    outcome
}

/// A message type that can express a bare close.
trait CloseMessage {
    fn close() -> Self;
}

impl CloseMessage for Message {
    fn close() -> Self {
        Message::Close(None)
    }
}

impl CloseMessage for ws::Message {
    fn close() -> Self {
        ws::Message::Close(None)
    }
}

fn client_to_upstream(message: ws::Message) -> Relay<Message> {
    match message {
        ws::Message::Text(text) => Relay::Data(Message::Text(text.as_str().to_owned().into())),
        ws::Message::Binary(data) => Relay::Data(Message::Binary(data)),
        ws::Message::Close(frame) => Relay::Close(Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        ws::Message::Ping(_) | ws::Message::Pong(_) => Relay::Skip,
    }
}

fn upstream_to_client(message: Message) -> Relay<ws::Message> {
    match message {
        Message::Text(text) => Relay::Data(ws::Message::Text(text.as_str().to_owned().into())),
        Message::Binary(data) => Relay::Data(ws::Message::Binary(data)),
        Message::Close(frame) => Relay::Close(ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Relay::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn data_frames_translate_both_ways() {
        match client_to_upstream(ws::Message::Text("hello".into())) {
            Relay::Data(Message::Text(t)) => assert_eq!(t.as_str(), "hello"),
            _ => panic!("expected text"),
        }
        match upstream_to_client(Message::Binary(Bytes::from_static(&[1, 2, 3]))) {
            Relay::Data(ws::Message::Binary(b)) => assert_eq!(&b[..], &[1, 2, 3]),
            _ => panic!("expected binary"),
        }
    }

    #[test]
    fn close_frames_keep_code_and_reason() {
        let close = ws::Message::Close(Some(ws::CloseFrame {
            code: 4000,
            reason: "bye".into(),
        }));
        match client_to_upstream(close) {
            Relay::Close(Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), 4000);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            _ => panic!("expected close"),
        }
    }

    #[test]
    fn control_frames_stay_on_their_leg() {
        assert!(matches!(
            client_to_upstream(ws::Message::Ping(Bytes::new())),
            Relay::Skip
        ));
        assert!(matches!(upstream_to_client(Message::Pong(Bytes::new())), Relay::Skip));
    }

    #[tokio::test]
    async fn pump_preserves_order_and_closes() {
        let inbound: Vec<Result<ws::Message, std::io::Error>> = (0..50)
            .map(|i| Ok(ws::Message::Text(format!("frame-{i}").into())))
            .collect();
        let mut relayed: Vec<Message> = Vec::new();

        let outcome = pump(
            futures_util::stream::iter(inbound),
            &mut relayed,
            Direction::ClientToUpstream,
            client_to_upstream,
        )
        .await;
        assert!(matches!(outcome, PumpOutcome::Eof));

        assert_eq!(relayed.len(), 51);
        for (i, message) in relayed[..50].iter().enumerate() {
            assert_eq!(message, &Message::Text(format!("frame-{i}").into()));
        }
        assert_eq!(relayed[50], Message::Close(None));
    }
}
