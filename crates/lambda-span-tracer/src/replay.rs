// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Observes the head of a single-read HTTP body without taking it away from its consumer.
//!
//! [`capture`] pulls frames from the body until the requested number of data bytes has been
//! seen, the body ends, or it fails. Every frame pulled this way is kept and handed back, in the
//! same order, by the returned [`ReplayBody`] before the underlying body is polled again.

use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use http_body_util::BodyExt;
use hyper::body::{Body, Bytes, Frame, SizeHint};

/// Result of observing the head of a body
pub struct Capture<B: Body> {
    /// The first `min(limit, available)` data bytes, empty when reading failed
    pub observed: Bytes,
    /// Stream to hand to the original consumer in place of the captured body
    pub body: ReplayBody<B>,
    /// Read failure hit while capturing
    pub error: Option<String>,
}

/// A body that yields previously consumed frames before resuming the wrapped body.
pub struct ReplayBody<B: Body> {
    replay: VecDeque<Frame<Bytes>>,
    pending_error: Option<B::Error>,
    inner: B,
    inner_done: bool,
}

// Fields are never structurally pinned; the inner body is polled through `Pin::new`.
impl<B: Body + Unpin> Unpin for ReplayBody<B> {}

impl<B: Body + fmt::Debug> fmt::Debug for ReplayBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayBody")
            .field("replay_frames", &self.replay.len())
            .field("pending_error", &self.pending_error.is_some())
            .field("inner", &self.inner)
            .field("inner_done", &self.inner_done)
            .finish()
    }
}

impl<B: Body> ReplayBody<B> {
    /// Wraps a body that was not read from.
    pub fn new(inner: B) -> Self {
        Self {
            replay: VecDeque::new(),
            pending_error: None,
            inner,
            inner_done: false,
        }
    }

    fn buffered_len(&self) -> u64 {
        self.replay
            .iter()
            .filter_map(Frame::data_ref)
            .map(|data| data.len() as u64)
            .sum()
    }
}

/// Reads frames from `body` until `limit` data bytes were observed, the body ended, or it failed.
pub async fn capture<B>(mut body: B, limit: usize) -> Capture<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    let mut replay = VecDeque::new();
    let mut observed = Vec::with_capacity(limit.min(64 * 1024));
    let mut pending_error = None;
    let mut error = None;
    let mut inner_done = false;

    while observed.len() < limit {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    let wanted = (limit - observed.len()).min(data.len());
                    observed.extend_from_slice(&data[..wanted]);
                }
                replay.push_back(frame);
            }
            Some(Err(e)) => {
                error = Some(e.to_string());
                pending_error = Some(e);
                observed.clear();
                break;
            }
            None => {
                inner_done = true;
                break;
            }
        }
    }

    Capture {
        observed: Bytes::from(observed),
        body: ReplayBody {
            replay,
            pending_error,
            inner: body,
            inner_done,
        },
        error,
    }
}

impl<B> Body for ReplayBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(frame) = this.replay.pop_front() {
            return Poll::Ready(Some(Ok(frame)));
        }
        if let Some(e) = this.pending_error.take() {
            return Poll::Ready(Some(Err(e)));
        }
        if this.inner_done {
            return Poll::Ready(None);
        }
        let next = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        if next.is_none() {
            this.inner_done = true;
        }
        Poll::Ready(next)
    }

    fn is_end_stream(&self) -> bool {
        self.replay.is_empty()
            && self.pending_error.is_none()
            && (self.inner_done || self.inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.buffered_len();
        let inner = if self.inner_done {
            SizeHint::with_exact(0)
        } else {
            self.inner.size_hint()
        };
        let mut hint = SizeHint::new();
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper.saturating_add(buffered));
        }
        hint.set_lower(inner.lower().saturating_add(buffered));
        hint
    }
}
