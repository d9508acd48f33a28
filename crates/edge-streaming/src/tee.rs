//! Forward-and-capture body stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};

/// Called once with the full body after a clean end-of-stream.
pub type CompletionHandler = Box<dyn FnOnce(Bytes) -> BoxFuture<'static, ()> + Send>;

/// Upper bound on how much of a body is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureLimit {
    /// Capture everything.
    #[default]
    Unbounded,
    /// Stop capturing once more than this many bytes arrived.
    Bytes(usize),
}

impl CaptureLimit {
    fn admits(&self, total: usize) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Bytes(max) => total <= *max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeeState {
    /// Forwarding chunks.
    Streaming,
    /// Body ended cleanly; waiting for the completion handler.
    Finishing,
    /// Nothing more to yield.
    Done,
}

/// Stream adapter that forwards every chunk unchanged while keeping a copy.
///
/// On a clean end-of-stream the copy is handed to the completion handler,
/// and the stream only ends once the handler's future resolves. Any inner
/// error, or exceeding the [`CaptureLimit`], abandons the capture: chunks
/// keep flowing but the handler never runs. Dropping the stream early
/// (client went away) also abandons it.
pub struct TeeStream<S> {
    inner: S,
    captured: Option<BytesMut>,
    limit: CaptureLimit,
    on_complete: Option<CompletionHandler>,
    finishing: Option<BoxFuture<'static, ()>>,
    forwarded: usize,
    state: TeeState,
}

impl<S> TeeStream<S> {
    /// Wrap `inner`, calling `on_complete` with the body if it ends cleanly.
    pub fn new(inner: S, on_complete: CompletionHandler) -> Self {
        Self {
            inner,
            captured: Some(BytesMut::new()),
            limit: CaptureLimit::Unbounded,
            on_complete: Some(on_complete),
            finishing: None,
            forwarded: 0,
            state: TeeState::Streaming,
        }
    }

    /// Set the capture limit.
    pub fn with_limit(mut self, limit: CaptureLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Whether the body is still being captured.
    pub fn is_capturing(&self) -> bool {
        self.captured.is_some()
    }

    fn abandon(&mut self, reason: &'static str) {
        if self.captured.take().is_some() {
            tracing::debug!(reason, forwarded = self.forwarded, "abandoning body capture");
        }
        self.on_complete = None;
    }
}

impl<S, E> Stream for TeeStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.state {
                TeeState::Streaming => match Pin::new(&mut this.inner).poll_next(cx) {
                    Poll::Ready(Some(Ok(chunk))) => {
                        this.forwarded += chunk.len();
                        if let Some(buf) = this.captured.as_mut() {
                            if this.limit.admits(buf.len() + chunk.len()) {
                                buf.extend_from_slice(&chunk);
                            } else {
                                this.abandon("capture limit exceeded");
                            }
                        }
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Poll::Ready(Some(Err(e))) => {
                        this.abandon("body error");
                        this.state = TeeState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        match (this.captured.take(), this.on_complete.take()) {
                            (Some(buf), Some(handler)) => {
                                this.finishing = Some(handler(buf.freeze()));
                                this.state = TeeState::Finishing;
                            }
                            _ => this.state = TeeState::Done,
                        }
                    }
                    Poll::Pending => return Poll::Pending,
                },
                TeeState::Finishing => {
                    let Some(fut) = this.finishing.as_mut() else {
                        this.state = TeeState::Done;
                        continue;
                    };
                    match fut.poll_unpin(cx) {
                        Poll::Ready(()) => {
                            this.finishing = None;
                            this.state = TeeState::Done;
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
                TeeState::Done => return Poll::Ready(None),
            }
        }
    }
}

impl<S> Drop for TeeStream<S> {
    fn drop(&mut self) {
        if self.state == TeeState::Streaming && self.is_capturing() {
            tracing::debug!(forwarded = self.forwarded, "body dropped before completion");
        }
    }
}
