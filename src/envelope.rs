//! # Envelopes and batches.
//!
//! [`Envelope`] wraps a payload with an opaque [`TraceContext`] and free-form
//! attributes. Envelopes are immutable once built: middleware that changes the
//! payload produces a new envelope via [`Envelope::map`], which keeps the context.
//!
//! [`Batch`] is an ordered, non-empty group of envelopes produced by one time window.
//!
//! ## Example
//! ```rust
//! use queuevisor::{Envelope, TraceContext};
//!
//! let env = Envelope::new(41)
//!     .with_trace_context(TraceContext::new("00-abc-01"))
//!     .with_attribute("tenant", "acme");
//!
//! let env = env.map(|n| n + 1);
//! assert_eq!(*env.payload(), 42);
//! assert_eq!(env.trace_context().map(|c| c.as_str()), Some("00-abc-01"));
//! assert_eq!(env.attribute("tenant"), Some("acme"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::time::Instant;

/// Global counter for time-window identities.
static WINDOW_SEQ: AtomicU64 = AtomicU64::new(0);

/// Opaque trace-context value carried through the pipeline untouched.
///
/// The runtime never interprets it; it only hands it to middleware (e.g. for span fields).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TraceContext(Arc<str>);

impl TraceContext {
    /// Wraps an opaque context value (e.g. a W3C `traceparent` header).
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TraceContext").field(&&*self.0).finish()
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key/value metadata attached to an envelope.
pub type Attributes = BTreeMap<Arc<str>, Arc<str>>;

/// A payload plus its trace/metadata wrapper.
#[derive(Clone, Debug)]
pub struct Envelope<T> {
    payload: T,
    trace: Option<TraceContext>,
    attributes: Arc<Attributes>,
}

impl<T> Envelope<T> {
    /// Creates an envelope with no trace context and no attributes.
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            trace: None,
            attributes: Arc::new(Attributes::new()),
        }
    }

    /// Attaches a trace context.
    #[inline]
    pub fn with_trace_context(mut self, ctx: TraceContext) -> Self {
        self.trace = Some(ctx);
        self
    }

    /// Attaches (or replaces) an attribute.
    pub fn with_attribute(mut self, key: impl Into<Arc<str>>, value: impl Into<Arc<str>>) -> Self {
        Arc::make_mut(&mut self.attributes).insert(key.into(), value.into());
        self
    }

    /// Returns the payload.
    #[inline]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Returns the trace context, if any.
    #[inline]
    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Returns all attributes.
    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns a single attribute value.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| &**v)
    }

    /// Replaces the payload, keeping trace context and attributes.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            payload: f(self.payload),
            trace: self.trace,
            attributes: self.attributes,
        }
    }

    /// Unwraps the payload, discarding metadata.
    #[inline]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// Identity of the time window that produced a [`Batch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowId(u64);

impl WindowId {
    /// Allocates the next window identity (globally monotonic).
    pub(crate) fn next() -> Self {
        Self(WINDOW_SEQ.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Ordered, non-empty group of envelopes assembled within one time window.
///
/// ### Invariants
/// - `0 < len() <= max_size` of the builder that produced it
/// - item order equals arrival order into the window
#[derive(Clone, Debug)]
pub struct Batch<T> {
    items: Vec<Envelope<T>>,
    window: WindowId,
    opened_at: Instant,
}

impl<T> Batch<T> {
    /// Only builders construct batches; they uphold the non-empty invariant.
    pub(crate) fn new(items: Vec<Envelope<T>>, window: WindowId, opened_at: Instant) -> Self {
        debug_assert!(!items.is_empty());
        Self {
            items,
            window,
            opened_at,
        }
    }

    /// Number of envelopes (always `>= 1`).
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Identity of the producing window.
    pub fn window(&self) -> WindowId {
        self.window
    }

    /// Instant the first envelope was accepted.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Borrow the envelopes in arrival order.
    pub fn items(&self) -> &[Envelope<T>] {
        &self.items
    }

    /// Iterate over payloads in arrival order.
    pub fn payloads(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(Envelope::payload)
    }

    /// Consume the batch into its envelopes.
    pub fn into_items(self) -> Vec<Envelope<T>> {
        self.items
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = Envelope<T>;
    type IntoIter = std::vec::IntoIter<Envelope<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keeps_context_and_attributes() {
        let env = Envelope::new("7")
            .with_trace_context(TraceContext::new("trace-1"))
            .with_attribute("k", "v");
        let mapped = env.map(|s| s.parse::<u32>().unwrap_or_default());

        assert_eq!(*mapped.payload(), 7);
        assert_eq!(mapped.trace_context(), Some(&TraceContext::new("trace-1")));
        assert_eq!(mapped.attribute("k"), Some("v"));
    }

    #[test]
    fn attributes_are_copy_on_write() {
        let a = Envelope::new(1).with_attribute("x", "1");
        let b = a.clone().with_attribute("x", "2");
        assert_eq!(a.attribute("x"), Some("1"));
        assert_eq!(b.attribute("x"), Some("2"));
    }

    #[test]
    fn window_ids_increase() {
        let a = WindowId::next();
        let b = WindowId::next();
        assert!(b > a);
    }
}
