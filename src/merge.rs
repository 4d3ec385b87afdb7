//! # Dynamic fan-in of many sources into one stream.
//!
//! [`StreamMerger::new`] returns a cloneable handle plus the [`MergedStream`] it feeds.
//! Sources can be added from any task at any time; the merged stream yields items from
//! whichever source is ready first.
//!
//! ```text
//! handle.add(s1) ─┐                          ┌─► next(s1) ─┐
//! handle.add(s2) ─┼─► pending + wake ─► poll ┼─► next(s2) ─┼─► item ─► consumer
//! handle.add(sN) ─┘                          └─► next(sN) ─┘
//!                                              exhausted ─► retire from snapshot
//! ```
//!
//! ## Rules
//! - FIFO per source; no ordering across sources.
//! - A source is removed the first time it reports exhaustion.
//! - Sources added while the consumer waits are picked up without losing in-flight waits.
//! - The merged stream ends once at least one source was added (or the merger was closed)
//!   and the set is empty with nothing pending. It then stays ended; `add` fails with
//!   [`MergeError::Closed`].
//! - [`StreamMerger::permanent`] holds a never-ending placeholder so the stream survives an
//!   empty set until [`release`](StreamMerger::release) or [`close`](StreamMerger::close).
//! - The source set is copy-on-write: [`sources`](StreamMerger::sources) returns an immutable snapshot.
//! - Closing (or dropping the merged stream) cancels every per-source wait.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, FusedStream, FuturesUnordered};
use futures::task::AtomicWaker;
use futures::{FutureExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::MergeError;

/// Identity of one source registered with a [`StreamMerger`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

struct Pending<I> {
    sources: Vec<(SourceId, BoxStream<'static, I>)>,
    closed: bool,
}

struct Shared<I> {
    pending: Mutex<Pending<I>>,
    waker: AtomicWaker,
    snapshot: ArcSwap<Vec<SourceId>>,
    tokens: Mutex<HashMap<SourceId, CancellationToken>>,
    placeholder: Mutex<Option<CancellationToken>>,
    token: CancellationToken,
    next_id: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<I> Shared<I> {
    fn retire(&self, id: SourceId) {
        lock(&self.tokens).remove(&id);
        self.snapshot.rcu(|cur| {
            cur.iter()
                .copied()
                .filter(|s| *s != id)
                .collect::<Vec<_>>()
        });
    }
}

/// Handle for adding and removing sources of a [`MergedStream`].
///
/// Cheap to clone; all clones feed the same merged stream.
pub struct StreamMerger<I> {
    shared: Arc<Shared<I>>,
}

impl<I> Clone for StreamMerger<I> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<I: Send + 'static> StreamMerger<I> {
    /// Creates an empty merger.
    ///
    /// The merged stream ends once every added source is exhausted.
    ///
    /// ## Example
    /// ```rust
    /// use futures::{StreamExt, stream};
    /// use queuevisor::StreamMerger;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let (merger, merged) = StreamMerger::new();
    /// merger.add(stream::iter([1, 2])).unwrap();
    /// merger.add(stream::iter([10, 20])).unwrap();
    ///
    /// let mut all: Vec<i32> = merged.collect().await;
    /// all.sort();
    /// assert_eq!(all, vec![1, 2, 10, 20]);
    /// # }
    /// ```
    pub fn new() -> (Self, MergedStream<I>) {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                sources: Vec::new(),
                closed: false,
            }),
            waker: AtomicWaker::new(),
            snapshot: ArcSwap::from_pointee(Vec::new()),
            tokens: Mutex::new(HashMap::new()),
            placeholder: Mutex::new(None),
            token: CancellationToken::new(),
            next_id: AtomicU64::new(0),
        });
        let merged = MergedStream {
            shared: Arc::clone(&shared),
            waits: FuturesUnordered::new(),
            seen: false,
            done: false,
        };
        (Self { shared }, merged)
    }

    /// Creates a merger whose stream never ends on its own.
    ///
    /// A placeholder source keeps the set non-empty until [`release`](Self::release)
    /// or [`close`](Self::close).
    pub fn permanent() -> (Self, MergedStream<I>) {
        let (merger, mut merged) = Self::new();
        let hold = merger.shared.token.child_token();
        let placeholder = futures::stream::pending::<I>()
            .take_until(hold.clone().cancelled_owned())
            .boxed();
        *lock(&merger.shared.placeholder) = Some(hold);
        merged.seen = true;
        merged.waits.push(next_of(None, placeholder));
        (merger, merged)
    }

    /// Registers a source; its items start flowing on the next poll of the merged stream.
    ///
    /// Fails with [`MergeError::Closed`] once the merged stream has ended or was closed.
    pub fn add<S>(&self, source: S) -> Result<SourceId, MergeError>
    where
        S: Stream<Item = I> + Send + 'static,
    {
        let mut pending = lock(&self.shared.pending);
        if pending.closed || self.shared.token.is_cancelled() {
            return Err(MergeError::Closed);
        }
        let id = SourceId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let token = self.shared.token.child_token();
        let source = source.take_until(token.clone().cancelled_owned()).boxed();

        lock(&self.shared.tokens).insert(id, token);
        self.shared.snapshot.rcu(|cur| {
            let mut next = Vec::with_capacity(cur.len() + 1);
            next.extend(cur.iter().copied());
            next.push(id);
            next
        });
        pending.sources.push((id, source));
        drop(pending);

        trace!(source = %id, "source added");
        self.shared.waker.wake();
        Ok(id)
    }

    /// Ends a live source early. Returns false if it is unknown or already exhausted.
    pub fn remove(&self, id: SourceId) -> bool {
        let token = lock(&self.shared.tokens).remove(&id);
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops the permanent placeholder; the stream ends once the remaining sources do.
    pub fn release(&self) {
        if let Some(hold) = lock(&self.shared.placeholder).take() {
            hold.cancel();
        }
    }

    /// Ends every source and the merged stream.
    pub fn close(&self) {
        self.shared.token.cancel();
        self.shared.waker.wake();
    }

    /// True once [`close`](Self::close) was called or the merged stream was dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.token.is_cancelled() || lock(&self.shared.pending).closed
    }

    /// Immutable snapshot of the live sources.
    pub fn sources(&self) -> Arc<Vec<SourceId>> {
        self.shared.snapshot.load_full()
    }

    /// Number of live sources.
    pub fn len(&self) -> usize {
        self.shared.snapshot.load().len()
    }

    /// True if no source is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Wait<I> = BoxFuture<'static, (Option<SourceId>, Option<I>, BoxStream<'static, I>)>;

fn next_of<I: Send + 'static>(id: Option<SourceId>, mut source: BoxStream<'static, I>) -> Wait<I> {
    async move {
        let item = source.next().await;
        (id, item, source)
    }
    .boxed()
}

/// The single output stream of a [`StreamMerger`].
pub struct MergedStream<I> {
    shared: Arc<Shared<I>>,
    waits: FuturesUnordered<Wait<I>>,
    seen: bool,
    done: bool,
}

impl<I: Send + 'static> MergedStream<I> {
    fn admit_pending(&mut self) {
        let added = std::mem::take(&mut lock(&self.shared.pending).sources);
        for (id, source) in added {
            self.seen = true;
            self.waits.push(next_of(Some(id), source));
        }
    }

    /// Marks the merger closed unless a source slipped in; true if it ended.
    fn try_finish(&mut self) -> bool {
        let mut pending = lock(&self.shared.pending);
        if !pending.sources.is_empty() {
            return false;
        }
        if !self.seen && !self.shared.token.is_cancelled() {
            return false;
        }
        pending.closed = true;
        self.done = true;
        true
    }
}

impl<I: Send + 'static> Stream for MergedStream<I> {
    type Item = I;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<I>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            this.shared.waker.register(cx.waker());
            this.admit_pending();

            match this.waits.poll_next_unpin(cx) {
                Poll::Ready(Some((id, Some(item), source))) => {
                    this.waits.push(next_of(id, source));
                    return Poll::Ready(Some(item));
                }
                Poll::Ready(Some((id, None, _))) => {
                    if let Some(id) = id {
                        trace!(source = %id, "source exhausted");
                        this.shared.retire(id);
                    }
                }
                Poll::Ready(None) | Poll::Pending if this.waits.is_empty() => {
                    if this.try_finish() {
                        return Poll::Ready(None);
                    }
                    if lock(&this.shared.pending).sources.is_empty() {
                        return Poll::Pending;
                    }
                }
                Poll::Ready(None) | Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<I: Send + 'static> FusedStream for MergedStream<I> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl<I> Drop for MergedStream<I> {
    fn drop(&mut self) {
        lock(&self.shared.pending).closed = true;
        self.shared.token.cancel();
    }
}
