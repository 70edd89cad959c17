//! Response body adapters.
//!
//! # Responsibilities
//! - Bound the idle gap between upstream body chunks
//! - Re-segment media bodies into fixed-size frames
//!
//! # Design Decisions
//! - Both adapters are pull-based: nothing is read from the upstream until
//!   hyper asks for the next chunk, which only happens once the client
//!   socket has room. That is the relay's backpressure.
//! - An error ends the stream; hyper then aborts the connection because
//!   the status line has already been sent

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{stream, Stream, StreamExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Fail with `TimedOut` if the upstream sends nothing for `idle`.
pub fn idle_timeout<S, E>(
    inner: S,
    idle: Duration,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError>,
{
    stream::unfold(Some(Box::pin(inner)), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout(idle, inner.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(inner))),
            Ok(Some(Err(e))) => Some((Err(io::Error::other(e)), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("upstream body idle for {} ms", idle.as_millis()),
                )),
                None,
            )),
        }
    })
}

/// Re-chunks a byte stream into frames of exactly `frame_size` bytes.
/// Only the final frame may be shorter.
pub struct FrameStream<S> {
    inner: S,
    buf: BytesMut,
    frame_size: usize,
    done: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S, frame_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(frame_size),
            frame_size,
            done: false,
        }
    }
}

impl<S, E> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.buf.len() >= this.frame_size {
                let frame = this.buf.split_to(this.frame_size).freeze();
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.done {
                if this.buf.is_empty() {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Ok(this.buf.split().freeze())));
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => this.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    // partial frames are never flushed after a failure
                    this.done = true;
                    this.buf.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                None => this.done = true,
            }
        }
    }
}
