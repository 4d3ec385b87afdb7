//! # Batch builders: size- and time-bounded accumulation.
//!
//! A [`BatchBuilder`] accumulates envelopes for one window. It does no scheduling of its
//! own: it only reports the [`deadline`](BatchBuilder::deadline) at which the current
//! window lapses, and the caller (usually [`BatchingStream`](crate::BatchingStream))
//! races that deadline against new arrivals.
//!
//! ## Closing rules
//! A window is closeable when either:
//! - `len() == max_size` (or the weight cap is reached), or
//! - `time_window` elapsed since the **first accepted** item.
//!
//! ```text
//! try_add(e1) ──► window opens, deadline = now + time_window
//! try_add(e2) ──► Added
//! try_add(eK) ──► Added, is_full() == true ──► build() ──► Batch[e1..eK], new window
//! ```
//!
//! ## Builders
//! - [`CountBatchBuilder`] caps the number of items.
//! - [`WeightedBatchBuilder`] additionally caps the summed weight (e.g. payload bytes).

use std::time::Duration;

use tokio::time::Instant;

use crate::envelope::{Batch, Envelope, WindowId};
use crate::error::BatchError;

/// Outcome of [`BatchBuilder::try_add`].
#[derive(Debug)]
pub enum TryAdd<T> {
    /// Item accepted into the current window.
    Added,
    /// Window is full; the item is handed back untouched.
    Full(Envelope<T>),
    /// Item cannot fit even an empty window; handed back untouched.
    Oversized(Envelope<T>),
}

impl<T> TryAdd<T> {
    /// True if the item was accepted.
    pub fn is_added(&self) -> bool {
        matches!(self, TryAdd::Added)
    }
}

/// Accumulates envelopes into one size/time bounded [`Batch`].
///
/// Owned by one caller at a time.
pub trait BatchBuilder<T>: Send {
    /// Offers an item to the current window.
    fn try_add(&mut self, item: Envelope<T>) -> TryAdd<T>;

    /// Number of accumulated items.
    fn len(&self) -> usize;

    /// True if no item was accepted in the current window.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the window cannot accept any further item.
    fn is_full(&self) -> bool;

    /// Takes the accumulated items as a batch and opens a new window.
    ///
    /// Fails with [`BatchError::Empty`] if nothing was accepted.
    fn build(&mut self) -> Result<Batch<T>, BatchError>;

    /// Discards accumulated items and opens a new window.
    fn reset(&mut self);

    /// Instant at which the current window lapses (`None` while empty).
    fn deadline(&self) -> Option<Instant>;

    /// True once the current window's time budget is spent.
    fn time_window_expired(&self) -> bool {
        self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    /// Identity of the current window.
    fn window(&self) -> WindowId;
}

/// Items, identity and timing of one window.
struct Window<T> {
    id: WindowId,
    items: Vec<Envelope<T>>,
    opened_at: Option<Instant>,
    span: Duration,
}

impl<T> Window<T> {
    fn new(span: Duration, hint: usize) -> Self {
        Self {
            id: WindowId::next(),
            items: Vec::with_capacity(hint),
            opened_at: None,
            span,
        }
    }

    fn push(&mut self, item: Envelope<T>) {
        if self.items.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.items.push(item);
    }

    fn take(&mut self) -> Result<Batch<T>, BatchError> {
        let opened_at = match self.opened_at {
            Some(at) if !self.items.is_empty() => at,
            _ => return Err(BatchError::Empty),
        };
        let hint = self.items.capacity();
        let items = std::mem::replace(&mut self.items, Vec::with_capacity(hint));
        let batch = Batch::new(items, self.id, opened_at);
        self.reopen();
        Ok(batch)
    }

    fn reopen(&mut self) {
        self.items.clear();
        self.id = WindowId::next();
        self.opened_at = None;
    }

    fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|at| at + self.span)
    }
}

/// Builder capped by item count and time window.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use queuevisor::{BatchBuilder, CountBatchBuilder, Envelope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut b = CountBatchBuilder::new(2, Duration::from_secs(1));
/// assert!(b.try_add(Envelope::new("a")).is_added());
/// assert!(b.try_add(Envelope::new("b")).is_added());
/// assert!(b.is_full());
///
/// let batch = b.build().unwrap();
/// assert_eq!(batch.payloads().copied().collect::<Vec<_>>(), vec!["a", "b"]);
/// assert!(b.is_empty());
/// # }
/// ```
pub struct CountBatchBuilder<T> {
    max_size: usize,
    window: Window<T>,
}

impl<T> CountBatchBuilder<T> {
    /// Creates a builder holding at most `max_size` items (min 1) per `time_window`.
    pub fn new(max_size: usize, time_window: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            window: Window::new(time_window, max_size.min(1024)),
        }
    }

    /// Maximum items per batch.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T: Send> BatchBuilder<T> for CountBatchBuilder<T> {
    fn try_add(&mut self, item: Envelope<T>) -> TryAdd<T> {
        if self.is_full() {
            return TryAdd::Full(item);
        }
        self.window.push(item);
        TryAdd::Added
    }

    fn len(&self) -> usize {
        self.window.items.len()
    }

    fn is_full(&self) -> bool {
        self.window.items.len() >= self.max_size
    }

    fn build(&mut self) -> Result<Batch<T>, BatchError> {
        self.window.take()
    }

    fn reset(&mut self) {
        self.window.reopen();
    }

    fn deadline(&self) -> Option<Instant> {
        self.window.deadline()
    }

    fn window(&self) -> WindowId {
        self.window.id
    }
}

/// Builder capped by item count, summed weight and time window.
///
/// The weigher maps a payload to its weight (typically its encoded size in bytes).
/// An item whose own weight exceeds `max_weight` is reported as [`TryAdd::Oversized`].
pub struct WeightedBatchBuilder<T, W> {
    max_size: usize,
    max_weight: usize,
    weight: usize,
    weigher: W,
    window: Window<T>,
}

impl<T, W> WeightedBatchBuilder<T, W>
where
    W: Fn(&T) -> usize,
{
    /// Creates a builder holding at most `max_size` items (min 1) whose weights sum to
    /// at most `max_weight` (min 1).
    pub fn new(max_size: usize, max_weight: usize, time_window: Duration, weigher: W) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            max_weight: max_weight.max(1),
            weight: 0,
            weigher,
            window: Window::new(time_window, max_size.min(1024)),
        }
    }

    /// Summed weight of the current window.
    pub fn weight(&self) -> usize {
        self.weight
    }
}

impl<T, W> BatchBuilder<T> for WeightedBatchBuilder<T, W>
where
    T: Send,
    W: Fn(&T) -> usize + Send,
{
    fn try_add(&mut self, item: Envelope<T>) -> TryAdd<T> {
        let w = (self.weigher)(item.payload());
        if w > self.max_weight {
            return TryAdd::Oversized(item);
        }
        if self.window.items.len() >= self.max_size
            || self.weight.checked_add(w).is_none_or(|total| total > self.max_weight)
        {
            return TryAdd::Full(item);
        }
        self.weight += w;
        self.window.push(item);
        TryAdd::Added
    }

    fn len(&self) -> usize {
        self.window.items.len()
    }

    fn is_full(&self) -> bool {
        self.window.items.len() >= self.max_size || self.weight >= self.max_weight
    }

    fn build(&mut self) -> Result<Batch<T>, BatchError> {
        let batch = self.window.take()?;
        self.weight = 0;
        Ok(batch)
    }

    fn reset(&mut self) {
        self.weight = 0;
        self.window.reopen();
    }

    fn deadline(&self) -> Option<Instant> {
        self.window.deadline()
    }

    fn window(&self) -> WindowId {
        self.window.id
    }
}

/// Builds a singleton batch for an item that fits no regular window.
pub(crate) fn singleton<T>(item: Envelope<T>) -> Batch<T> {
    Batch::new(vec![item], WindowId::next(), Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(n: u32) -> Envelope<u32> {
        Envelope::new(n)
    }

    #[tokio::test]
    async fn empty_builder_cannot_build() {
        let mut b = CountBatchBuilder::<u32>::new(3, Duration::from_secs(1));
        assert!(b.is_empty());
        assert!(b.deadline().is_none());
        assert_eq!(b.build().unwrap_err(), BatchError::Empty);
    }

    #[tokio::test]
    async fn full_builder_hands_item_back() {
        let mut b = CountBatchBuilder::new(2, Duration::from_secs(1));
        assert!(b.try_add(env(1)).is_added());
        assert!(b.try_add(env(2)).is_added());
        match b.try_add(env(3)) {
            TryAdd::Full(item) => assert_eq!(*item.payload(), 3),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(b.len(), 2);
    }

    #[tokio::test]
    async fn build_opens_a_new_window() {
        let mut b = CountBatchBuilder::new(2, Duration::from_secs(1));
        b.try_add(env(1));
        let first = b.window();
        let batch = b.build().unwrap();
        assert_eq!(batch.window(), first);
        assert_ne!(b.window(), first);
        assert!(b.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_from_first_item() {
        let mut b = CountBatchBuilder::new(10, Duration::from_secs(2));
        b.try_add(env(1));
        let opened = Instant::now();
        tokio::time::advance(Duration::from_secs(1)).await;
        b.try_add(env(2));
        assert_eq!(b.deadline(), Some(opened + Duration::from_secs(2)));
        assert!(!b.time_window_expired());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(b.time_window_expired());
    }

    #[tokio::test]
    async fn reset_discards_items() {
        let mut b = CountBatchBuilder::new(4, Duration::from_secs(1));
        b.try_add(env(1));
        b.reset();
        assert!(b.is_empty());
        assert!(b.deadline().is_none());
    }

    #[tokio::test]
    async fn weighted_builder_caps_weight() {
        let mut b = WeightedBatchBuilder::new(10, 10, Duration::from_secs(1), |n: &u32| *n as usize);
        assert!(b.try_add(env(4)).is_added());
        assert!(b.try_add(env(5)).is_added());
        assert!(matches!(b.try_add(env(2)), TryAdd::Full(_)));
        assert!(matches!(b.try_add(env(11)), TryAdd::Oversized(_)));
        assert_eq!(b.weight(), 9);

        let batch = b.build().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(b.weight(), 0);
        assert!(b.try_add(env(10)).is_added());
        assert!(b.is_full());
    }

    #[tokio::test]
    async fn huge_weights_do_not_overflow() {
        let mut b = WeightedBatchBuilder::new(10, usize::MAX, Duration::from_secs(1), |n: &usize| *n);
        assert!(b.try_add(Envelope::new(usize::MAX - 1)).is_added());
        match b.try_add(Envelope::new(5)) {
            TryAdd::Full(item) => assert_eq!(*item.payload(), 5),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(b.weight(), usize::MAX - 1);
    }
}
