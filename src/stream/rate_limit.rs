//! Latest-wins rate limiting for subscription streams.

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Adds [`rate_limit`](RateLimitExt::rate_limit) to any stream.
pub trait RateLimitExt: Stream {
    /// Emit at most one item per `period`.
    ///
    /// Items that arrive while waiting replace each other, so the consumer
    /// always gets the newest one. The first item goes out immediately.
    fn rate_limit(self, period: Duration) -> RateLimit<Self>
    where
        Self: Sized,
    {
        RateLimit::new(self, period)
    }
}

impl<T: Stream> RateLimitExt for T {}

pin_project! {
    pub struct RateLimit<S: Stream> {
        #[pin]
        stream: S,
        period: Duration,
        // Created on first poll so construction needs no runtime.
        interval: Option<Interval>,
        pending: Option<S::Item>,
        finished: bool,
    }
}

impl<S: Stream> RateLimit<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        Self { stream, period, interval: None, pending: None, finished: false }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl<S: Stream> Stream for RateLimit<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        while !*this.finished {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.finished = true,
                Poll::Pending => break,
            }
        }

        if this.pending.is_none() {
            return if *this.finished { Poll::Ready(None) } else { Poll::Pending };
        }

        let period = *this.period;
        let ticker = this.interval.get_or_insert_with(|| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ready!(ticker.poll_tick(cx));
        Poll::Ready(this.pending.take())
    }
}
