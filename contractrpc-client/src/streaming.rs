//! Cancellable streams.
//!
//! [`Cancellable`] wraps a stream of results so the call's cancellation token
//! and deadline end it. When either fires, the stream yields one error
//! ([`RpcError::Cancelled`] or `DeadlineExceeded`) and then ends. An `Err`
//! item from the inner stream also ends it.
//!
//! The request and response streams of one call share a token, and whichever
//! notices the deadline first cancels it. A token found cancelled after the
//! deadline has passed is therefore reported as `DeadlineExceeded`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use contractrpc_core::{RpcError, Status};
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

pin_project! {
    /// A stream that stops when its call is cancelled or runs out of time.
    pub struct Cancellable<S> {
        #[pin]
        inner: S,
        #[pin]
        cancelled: WaitForCancellationFutureOwned,
        token: CancellationToken,
        deadline: Option<Pin<Box<Sleep>>>,
        done: bool,
    }
}

impl<S> Cancellable<S> {
    pub fn new(inner: S, token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self {
            inner,
            cancelled: token.clone().cancelled_owned(),
            token,
            deadline: deadline.map(|at| Box::pin(tokio::time::sleep_until(at))),
            done: false,
        }
    }

    /// Whether the stream has ended.
    pub fn is_finished(&self) -> bool {
        self.done
    }
}

fn deadline_exceeded() -> RpcError {
    Status::deadline_exceeded("deadline exceeded").into()
}

impl<S, T> Stream for Cancellable<S>
where
    S: Stream<Item = Result<T, RpcError>>,
{
    type Item = Result<T, RpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        if this.cancelled.poll(cx).is_ready() {
            *this.done = true;
            let expired = this
                .deadline
                .as_ref()
                .is_some_and(|sleep| sleep.deadline() <= Instant::now());
            let error = if expired {
                deadline_exceeded()
            } else {
                RpcError::Cancelled
            };
            return Poll::Ready(Some(Err(error)));
        }
        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                *this.done = true;
                this.token.cancel();
                return Poll::Ready(Some(Err(deadline_exceeded())));
            }
        }
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Err(error))) => {
                *this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
