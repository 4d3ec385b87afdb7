//! # In-memory buffer with an overflow policy.
//!
//! Many producers push, one consumer loop pops. The state sits behind one short-held
//! mutex; suspension uses two [`Notify`]s (`readable`, `writable`) and never holds the lock.
//!
//! ```text
//! push ──► closed? ──yes──► Err(Closed)
//!            │ no
//!            ▼
//!        room? ──yes──► push_back ──► notify readable
//!            │ no
//!            ├─ Wait        ──► suspend on writable (or cancel ──► Err(Canceled))
//!            ├─ DropOldest  ──► pop_front, push_back ──► Evicted(oldest)
//!            ├─ DropNewest  ──► pop_back,  push_back ──► Evicted(newest)
//!            └─ Reject      ──► Err(Full)
//!
//! recv ──► pop_front ──► notify writable
//!        empty & closed ──► None
//! ```
//!
//! ## Rules
//! - FIFO per producer.
//! - After `close`, pushes fail; `recv` keeps returning buffered items, then `None`.
//! - Suspended producers are woken by `close` and fail with `Closed`.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::FullMode;
use crate::envelope::Envelope;
use crate::error::EnqueueError;

/// Result of an accepted push.
#[derive(Debug)]
pub(crate) enum Pushed<T> {
    Accepted,
    /// Accepted by evicting this buffered item.
    Evicted(Envelope<T>),
}

struct State<T> {
    items: VecDeque<Envelope<T>>,
    closed: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    readable: Notify,
    writable: Notify,
    capacity: Option<usize>,
    mode: FullMode,
}

pub(crate) struct Buffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Buffer<T> {
    /// `capacity = None` is unbounded; `Some(0)` is treated as 1.
    pub(crate) fn new(capacity: Option<usize>, mode: FullMode) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    closed: false,
                }),
                readable: Notify::new(),
                writable: Notify::new(),
                capacity: capacity.map(|c| c.max(1)),
                mode,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes one item, suspending under `FullMode::Wait` until there is room.
    pub(crate) async fn push(
        &self,
        mut item: Envelope<T>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Pushed<T>, EnqueueError<T>> {
        loop {
            let mut writable = pin!(self.inner.writable.notified());
            writable.as_mut().enable();

            item = match self.offer(item) {
                Ok(pushed) => return Ok(pushed),
                Err(Offer::Retry(item)) => item,
                Err(Offer::Refused(err)) => return Err(err),
            };

            match cancel {
                Some(token) => tokio::select! {
                    _ = writable => {}
                    _ = token.cancelled() => return Err(EnqueueError::Canceled(item)),
                },
                None => writable.await,
            }
        }
    }

    /// Pushes without suspending; a full `Wait` buffer fails with `Full`.
    pub(crate) fn try_push(&self, item: Envelope<T>) -> Result<Pushed<T>, EnqueueError<T>> {
        match self.offer(item) {
            Ok(pushed) => Ok(pushed),
            Err(Offer::Retry(item)) => Err(EnqueueError::Full(item)),
            Err(Offer::Refused(err)) => Err(err),
        }
    }

    fn offer(&self, item: Envelope<T>) -> Result<Pushed<T>, Offer<T>> {
        let mut st = self.state();
        if st.closed {
            return Err(Offer::Refused(EnqueueError::Closed(item)));
        }
        let full = self.inner.capacity.is_some_and(|cap| st.items.len() >= cap);
        let pushed = if !full {
            Pushed::Accepted
        } else {
            let evicted = match self.inner.mode {
                FullMode::Wait => return Err(Offer::Retry(item)),
                FullMode::Reject => return Err(Offer::Refused(EnqueueError::Full(item))),
                FullMode::DropOldest => st.items.pop_front(),
                FullMode::DropNewest => st.items.pop_back(),
            };
            evicted.map_or(Pushed::Accepted, Pushed::Evicted)
        };
        st.items.push_back(item);
        drop(st);
        self.inner.readable.notify_one();
        Ok(pushed)
    }

    /// Pops the oldest item; `None` once closed and empty.
    pub(crate) async fn recv(&self) -> Option<Envelope<T>> {
        loop {
            let mut readable = pin!(self.inner.readable.notified());
            readable.as_mut().enable();
            {
                let mut st = self.state();
                if let Some(item) = st.items.pop_front() {
                    drop(st);
                    self.inner.writable.notify_one();
                    return Some(item);
                }
                if st.closed {
                    return None;
                }
            }
            readable.await;
        }
    }

    /// Stops accepting writes and wakes every waiter.
    pub(crate) fn close(&self) {
        self.state().closed = true;
        self.inner.readable.notify_waiters();
        self.inner.writable.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state().items.len()
    }

    /// Drains the buffer as a stream ending after `close` once empty.
    pub(crate) fn into_stream(self) -> BoxStream<'static, Envelope<T>> {
        stream::unfold(self, |buf| async move {
            let item = buf.recv().await?;
            Some((item, buf))
        })
        .boxed()
    }
}

enum Offer<T> {
    /// Full under `Wait`; try again once space frees up.
    Retry(Envelope<T>),
    Refused(EnqueueError<T>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn payloads(buf: &Buffer<u32>) -> Vec<u32> {
        buf.state().items.iter().map(|e| *e.payload()).collect()
    }

    async fn fill(buf: &Buffer<u32>, range: std::ops::RangeInclusive<u32>) -> Vec<Pushed<u32>> {
        let mut out = Vec::new();
        for n in range {
            out.push(buf.push(Envelope::new(n), None).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn drop_oldest_keeps_newest_capacity_items() {
        let buf = Buffer::new(Some(3), FullMode::DropOldest);
        let pushed = fill(&buf, 1..=4).await;

        assert_eq!(payloads(&buf), vec![2, 3, 4]);
        match pushed.last() {
            Some(Pushed::Evicted(e)) => assert_eq!(*e.payload(), 1),
            other => panic!("expected eviction, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drop_newest_replaces_last_buffered() {
        let buf = Buffer::new(Some(3), FullMode::DropNewest);
        fill(&buf, 1..=4).await;
        assert_eq!(payloads(&buf), vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn reject_fails_immediately_and_returns_item() {
        let buf = Buffer::new(Some(1), FullMode::Reject);
        fill(&buf, 1..=1).await;
        let err = buf.push(Envelope::new(2), None).await.unwrap_err();
        assert_eq!(err.as_label(), "enqueue_full");
        assert_eq!(*err.into_envelope().payload(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_suspends_until_consumer_pops() {
        let buf = Buffer::new(Some(1), FullMode::Wait);
        fill(&buf, 1..=1).await;
        assert!(matches!(buf.try_push(Envelope::new(9)), Err(EnqueueError::Full(_))));

        let producer = buf.clone();
        let pending = tokio::spawn(async move { producer.push(Envelope::new(2), None).await.is_ok() });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());
        assert_eq!(buf.recv().await.map(|e| *e.payload()), Some(1));
        assert!(pending.await.unwrap());
        assert_eq!(payloads(&buf), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_push_honours_cancel() {
        let buf = Buffer::new(Some(1), FullMode::Wait);
        fill(&buf, 1..=1).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });
        let err = buf.push(Envelope::new(2), Some(&cancel)).await.unwrap_err();
        assert!(matches!(err, EnqueueError::Canceled(_)));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let buf = Buffer::new(None, FullMode::Wait);
        fill(&buf, 1..=3).await;
        buf.close();

        assert!(matches!(buf.try_push(Envelope::new(4)), Err(EnqueueError::Closed(_))));
        let drained: Vec<u32> = buf.clone().into_stream().map(|e| *e.payload()).collect().await;
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(buf.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn close_wakes_suspended_producer() {
        let buf = Buffer::new(Some(1), FullMode::Wait);
        fill(&buf, 1..=1).await;

        let producer = buf.clone();
        let pending = tokio::spawn(async move { producer.push(Envelope::new(2), None).await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        buf.close();

        assert!(matches!(pending.await.unwrap(), Err(EnqueueError::Closed(_))));
    }
}
