//! Attribute sources consumed by policy bodies.
//!
//! Attributes are continuous: a lookup returns a stream that emits the
//! current value and every later change. A stream that never emits is
//! allowed; documents depending on it simply do not contribute a decision
//! until it does.

use dashmap::DashMap;
use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::watch;

use crate::context::EvaluationContext;
use crate::stream::{just, watch_stream};
use crate::value::Value;

/// Resolves named attributes to continuous value streams.
///
/// Failures surface as `Value::Error` items, never as stream termination.
pub trait AttributeProvider: Send + Sync {
    fn attribute(&self, name: &str, context: &EvaluationContext) -> BoxStream<'static, Value>;
}

/// Provider used when no attribute source is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttributes;

impl AttributeProvider for NoAttributes {
    fn attribute(&self, name: &str, _context: &EvaluationContext) -> BoxStream<'static, Value> {
        just(Value::error(format!("Unknown attribute '{name}'")))
    }
}

/// In-memory attribute source backed by one `watch` channel per name.
///
/// Publishing replaces the current value and notifies every open stream.
/// Looking up a name that was never published yields a stream that stays
/// silent until the first publish.
#[derive(Debug, Default)]
pub struct AttributeRepository {
    channels: DashMap<String, watch::Sender<Option<Value>>>,
}

impl AttributeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, name: &str) -> watch::Sender<Option<Value>> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    /// Publish a new value for `name`.
    pub fn publish(&self, name: &str, value: Value) {
        self.sender(name).send_replace(Some(value));
        tracing::trace!(attribute = %name, "Attribute published");
    }

    /// Current value for `name`, if any was published.
    pub fn current(&self, name: &str) -> Option<Value> {
        self.channels
            .get(name)
            .and_then(|sender| sender.borrow().clone())
    }

    /// Number of streams currently following `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.channels
            .get(name)
            .map_or(0, |sender| sender.receiver_count())
    }
}

impl AttributeProvider for AttributeRepository {
    fn attribute(&self, name: &str, _context: &EvaluationContext) -> BoxStream<'static, Value> {
        watch_stream(self.sender(name).subscribe())
            .filter_map(future::ready)
            .boxed()
    }
}
