//! # BatchingStream: turns a stream of envelopes into a stream of batches.
//!
//! Composes one source with a [`BatchBuilder`] factory. Every window gets a fresh builder.
//!
//! ```text
//! source ──► try_add ──┬─ Added (first item) ──► arm timer at builder.deadline()
//!                      ├─ Added, is_full()   ──► emit batch, new builder
//!                      ├─ Full(item)         ──► emit batch, item opens next window
//!                      └─ Oversized(item)    ──► OversizePolicy (Isolate | Drop)
//! timer fires          ──► emit partial batch, new builder
//! source ends          ──► emit partial batch (if any), then end
//! ```
//!
//! ## Rules
//! - A batch never exceeds the builder's caps; order inside a batch is arrival order.
//! - Batches are emitted in the order their size/time thresholds were crossed.
//! - A non-empty partial batch is flushed exactly once at source completion;
//!   an empty builder at completion yields nothing.
//! - Window expiry is control flow, not an error.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::time::{Sleep, sleep_until};
use tracing::{trace, warn};

use crate::batch::builder::{BatchBuilder, CountBatchBuilder, TryAdd, singleton};
use crate::config::OversizePolicy;
use crate::envelope::{Batch, Envelope};

/// Stream of [`Batch`]es built from a source of envelopes.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use futures::{StreamExt, stream};
/// use queuevisor::{BatchingStream, Envelope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let source = stream::iter((1..=5).map(Envelope::new));
/// let batches: Vec<Vec<i32>> = BatchingStream::by_count(source, 2, Duration::from_secs(1))
///     .map(|b| b.payloads().copied().collect())
///     .collect()
///     .await;
/// assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
/// # }
/// ```
pub struct BatchingStream<T, S, B, F> {
    source: S,
    factory: F,
    builder: B,
    oversize: OversizePolicy,
    timer: Option<Pin<Box<Sleep>>>,
    armed: bool,
    carry: Option<Envelope<T>>,
    ready: VecDeque<Batch<T>>,
    done: bool,
}

// `builder` and `factory` are never pinned; only `source` is polled through a pin.
impl<T, S: Unpin, B, F> Unpin for BatchingStream<T, S, B, F> {}

impl<T, S, B, F> BatchingStream<T, S, B, F>
where
    S: Stream<Item = Envelope<T>> + Unpin,
    B: BatchBuilder<T>,
    F: FnMut() -> B,
{
    /// Creates a batching stream; `factory` produces one builder per window.
    pub fn new(source: S, mut factory: F, oversize: OversizePolicy) -> Self {
        let builder = factory();
        Self {
            source,
            factory,
            builder,
            oversize,
            timer: None,
            armed: false,
            carry: None,
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// Moves the current window into the ready queue (no-op when empty).
    fn flush(&mut self) {
        self.armed = false;
        if self.builder.is_empty() {
            return;
        }
        let mut full = std::mem::replace(&mut self.builder, (self.factory)());
        if let Ok(batch) = full.build() {
            trace!(window = %batch.window(), len = batch.len(), "batch closed");
            self.ready.push_back(batch);
        }
    }

    fn arm(&mut self) {
        let Some(deadline) = self.builder.deadline() else {
            return;
        };
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().reset(deadline),
            None => self.timer = Some(Box::pin(sleep_until(deadline))),
        }
        self.armed = true;
    }

    fn offer(&mut self, item: Envelope<T>) {
        match self.builder.try_add(item) {
            TryAdd::Added => {
                if self.builder.len() == 1 {
                    self.arm();
                }
                if self.builder.is_full() {
                    self.flush();
                }
            }
            TryAdd::Full(item) => {
                self.flush();
                self.carry = Some(item);
            }
            TryAdd::Oversized(item) => match self.oversize {
                OversizePolicy::Isolate => {
                    self.flush();
                    self.ready.push_back(singleton(item));
                }
                OversizePolicy::Drop => {
                    warn!("item exceeds batch limits on its own; dropped");
                }
            },
        }
    }

    /// Polls the window timer; true if it fired.
    fn window_lapsed(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.armed {
            return false;
        }
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }
}

impl<T, S> BatchingStream<T, S, CountBatchBuilder<T>, Box<dyn FnMut() -> CountBatchBuilder<T> + Send>>
where
    T: Send + 'static,
    S: Stream<Item = Envelope<T>> + Unpin,
{
    /// Batches by item count and time window, isolating nothing (count caps cannot overflow).
    pub fn by_count(source: S, max_size: usize, time_window: Duration) -> Self {
        Self::new(
            source,
            Box::new(move || CountBatchBuilder::new(max_size, time_window)),
            OversizePolicy::Isolate,
        )
    }
}

impl<T, S, B, F> Stream for BatchingStream<T, S, B, F>
where
    S: Stream<Item = Envelope<T>> + Unpin,
    B: BatchBuilder<T>,
    F: FnMut() -> B,
{
    type Item = Batch<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(batch) = this.ready.pop_front() {
                return Poll::Ready(Some(batch));
            }
            if this.done {
                return Poll::Ready(None);
            }
            if let Some(item) = this.carry.take() {
                this.offer(item);
                continue;
            }
            if this.window_lapsed(cx) {
                this.flush();
                continue;
            }
            match Pin::new(&mut this.source).poll_next(cx) {
                Poll::Ready(Some(item)) => this.offer(item),
                Poll::Ready(None) => {
                    this.done = true;
                    this.flush();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::builder::WeightedBatchBuilder;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn payloads<T: Clone>(b: &Batch<T>) -> Vec<T> {
        b.payloads().cloned().collect()
    }

    #[tokio::test]
    async fn batches_partition_input_in_order() {
        let source = futures::stream::iter((0..10).map(Envelope::new));
        let batches: Vec<Batch<i32>> = BatchingStream::by_count(source, 3, Duration::from_secs(60))
            .collect()
            .await;

        assert!(batches.iter().all(|b| b.len() <= 3 && b.len() > 0));
        let flat: Vec<i32> = batches.iter().flat_map(payloads).collect();
        assert_eq!(flat, (0..10).collect::<Vec<_>>());
        assert_eq!(batches.len(), 4);
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        let source = futures::stream::iter(Vec::<Envelope<u8>>::new());
        let mut s = BatchingStream::by_count(source, 3, Duration::from_secs(1));
        assert!(s.next().await.is_none());
        assert!(s.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_is_emitted_without_waiting_and_partial_after_window() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut s = BatchingStream::by_count(
            UnboundedReceiverStream::new(rx),
            3,
            Duration::from_secs(2),
        );

        let start = Instant::now();
        for n in [1, 2, 3] {
            tx.send(Envelope::new(n)).unwrap();
        }
        let first = s.next().await.unwrap();
        assert_eq!(payloads(&first), vec![1, 2, 3]);
        assert_eq!(start.elapsed(), Duration::ZERO);

        tx.send(Envelope::new(4)).unwrap();
        tx.send(Envelope::new(5)).unwrap();
        let opened = Instant::now();
        let second = s.next().await.unwrap();
        assert_eq!(payloads(&second), vec![4, 5]);
        assert!(opened.elapsed() >= Duration::from_secs(2));

        drop(tx);
        assert!(s.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn window_starts_at_first_item_not_at_stream_start() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut s = BatchingStream::by_count(
            UnboundedReceiverStream::new(rx),
            10,
            Duration::from_secs(2),
        );

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send(Envelope::new(1)).unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(Envelope::new(2)).unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            tx.send(Envelope::new(3)).unwrap();
        });

        let start = Instant::now();
        let first = s.next().await.unwrap();
        assert_eq!(payloads(&first), vec![1, 2]);
        assert!(start.elapsed() >= Duration::from_secs(7));

        let second = s.next().await.unwrap();
        assert_eq!(payloads(&second), vec![3]);
        assert!(s.next().await.is_none());
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn weight_overflow_carries_item_into_next_window() {
        let source = futures::stream::iter([6u32, 3, 5, 1].map(Envelope::new));
        let batches: Vec<Batch<u32>> = BatchingStream::new(
            source,
            || WeightedBatchBuilder::new(10, 10, Duration::from_secs(60), |n: &u32| *n as usize),
            OversizePolicy::Isolate,
        )
        .collect()
        .await;

        let got: Vec<Vec<u32>> = batches.iter().map(payloads).collect();
        assert_eq!(got, vec![vec![6, 3], vec![5, 1]]);
    }

    #[tokio::test]
    async fn oversized_item_policy() {
        let make = |policy| {
            let source = futures::stream::iter([1u32, 50, 2].map(Envelope::new));
            BatchingStream::new(
                source,
                || WeightedBatchBuilder::new(10, 10, Duration::from_secs(60), |n: &u32| *n as usize),
                policy,
            )
            .map(|b| payloads(&b))
            .collect::<Vec<_>>()
        };

        assert_eq!(
            make(OversizePolicy::Isolate).await,
            vec![vec![1], vec![50], vec![2]]
        );
        assert_eq!(make(OversizePolicy::Drop).await, vec![vec![1, 2]]);
    }
}
