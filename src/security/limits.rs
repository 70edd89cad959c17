//! Request body limits.
//!
//! # Responsibilities
//! - Enforce maximum request body size on forwarded uploads
//! - Stream bodies by default; buffer only when configured to
//!
//! # Design Decisions
//! - A declared `Content-Length` over the cap is rejected before the
//!   upstream is contacted
//! - Streamed bodies are counted as they flow and fail once the cap is
//!   crossed, so memory stays bounded either way
//! - Return 413 Payload Too Large

use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, Stream, StreamExt};
use thiserror::Error;

use crate::config::schema::LimitsConfig;
use crate::error::ProxyError;

/// Raised inside a streamed upload once it crosses the cap. The forwarder
/// finds it in the upstream error chain and reports 413.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("request body exceeds the {limit} byte limit")]
pub struct BodyTooLarge {
    pub limit: usize,
}

/// Compiled body limits.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    max_bytes: usize,
    buffered: bool,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl BodyLimits {
    pub fn from_config(config: &LimitsConfig) -> Self {
        Self {
            max_bytes: config.max_request_body_bytes,
            buffered: config.buffer_request_body,
        }
    }

    /// Turn an inbound body into the body sent upstream.
    pub async fn outbound_body(
        &self,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<reqwest::Body, ProxyError> {
        if let Some(declared) = content_length(headers) {
            if declared > self.max_bytes as u64 {
                return Err(ProxyError::PayloadTooLarge { limit: self.max_bytes });
            }
        }

        if self.buffered {
            let bytes = self.buffer(body).await?;
            Ok(reqwest::Body::from(bytes))
        } else {
            Ok(reqwest::Body::wrap_stream(limited(body, self.max_bytes)))
        }
    }

    /// Read the whole body, failing once it crosses the cap.
    pub async fn buffer(&self, body: Body) -> Result<Bytes, ProxyError> {
        let mut chunks = Box::pin(limited(body, self.max_bytes));
        let mut buf = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(e) => {
                    return Err(match e.downcast_ref::<BodyTooLarge>() {
                        Some(too_large) => ProxyError::PayloadTooLarge {
                            limit: too_large.limit,
                        },
                        None => ProxyError::BadRequest(format!("failed to read request body: {e}")),
                    });
                }
            }
        }
        Ok(buf.freeze())
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Pass body chunks through, ending with `BodyTooLarge` once more than
/// `max_bytes` have been seen.
pub fn limited(body: Body, max_bytes: usize) -> impl Stream<Item = Result<Bytes, BoxError>> + Send {
    let chunks = body.into_data_stream();
    stream::unfold(
        (chunks, 0usize, false),
        move |(mut chunks, seen, done)| async move {
            if done {
                return None;
            }
            match chunks.next().await {
                Some(Ok(chunk)) => {
                    let seen = seen + chunk.len();
                    if seen > max_bytes {
                        let err: BoxError = Box::new(BodyTooLarge { limit: max_bytes });
                        Some((Err(err), (chunks, seen, true)))
                    } else {
                        Some((Ok(chunk), (chunks, seen, false)))
                    }
                }
                Some(Err(e)) => {
                    let err: BoxError = Box::new(e);
                    Some((Err(err), (chunks, seen, true)))
                }
                None => None,
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn limits(max: usize, buffered: bool) -> BodyLimits {
        BodyLimits::from_config(&LimitsConfig {
            max_request_body_bytes: max,
            buffer_request_body: buffered,
        })
    }

    fn chunked(parts: &[&'static [u8]]) -> Body {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Body::from_stream(stream::iter(chunks))
    }

    #[tokio::test]
    async fn buffers_within_the_cap() {
        let bytes = limits(8, true).buffer(chunked(&[b"abc", b"defgh"])).await.unwrap();
        assert_eq!(&bytes[..], b"abcdefgh");
    }

    #[tokio::test]
    async fn buffer_rejects_oversized_bodies() {
        let err = limits(4, true).buffer(chunked(&[b"abc", b"de"])).await.unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn stream_ends_with_error_after_cap() {
        let items: Vec<_> = limited(chunked(&[b"ab", b"cd", b"ef", b"gh"]), 5).collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        let err = items[2].as_ref().unwrap_err();
        assert_eq!(
            err.downcast_ref::<BodyTooLarge>(),
            Some(&BodyTooLarge { limit: 5 })
        );
    }

    #[tokio::test]
    async fn declared_length_is_checked_up_front() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1024"));
        let err = limits(10, false)
            .outbound_body(&headers, Body::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge { limit: 10 }));
    }
}
