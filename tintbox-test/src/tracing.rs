//! Tracing utilities for asserting on spans and log events in tests.
//!
//! Install a collector with [`SpanCollector::set_default`] on a current-thread
//! runtime; tasks spawned on that runtime report to it as well.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::dispatcher::DefaultGuard;
use tracing::span::{Attributes, Id};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

/// Captured span information.
#[derive(Debug, Clone)]
pub struct CapturedSpan {
    pub name: String,
    pub target: String,
    pub fields: Vec<(String, String)>,
}

/// Captured event information.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    /// The `message` field, empty if the event had none.
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct Captured {
    spans: Vec<CapturedSpan>,
    events: Vec<CapturedEvent>,
}

struct CaptureLayer {
    captured: Arc<Mutex<Captured>>,
}

struct FieldVisitor {
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields
            .push((field.name().to_string(), format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let metadata = attrs.metadata();
        if !metadata.target().starts_with("tintbox") {
            return;
        }
        let mut visitor = FieldVisitor { fields: Vec::new() };
        attrs.record(&mut visitor);
        lock(&self.captured).spans.push(CapturedSpan {
            name: metadata.name().to_string(),
            target: metadata.target().to_string(),
            fields: visitor.fields,
        });
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with("tintbox") {
            return;
        }
        let mut visitor = FieldVisitor { fields: Vec::new() };
        event.record(&mut visitor);
        let message = visitor
            .fields
            .iter()
            .position(|(k, _)| k == "message")
            .map(|i| visitor.fields.remove(i).1)
            .unwrap_or_default();
        lock(&self.captured).events.push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message,
            fields: visitor.fields,
        });
    }
}

fn lock(captured: &Mutex<Captured>) -> MutexGuard<'_, Captured> {
    captured.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collector of spans and events emitted by tintbox crates.
#[derive(Clone)]
pub struct SpanCollector {
    captured: Arc<Mutex<Captured>>,
    dispatch: Dispatch,
}

impl Default for SpanCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanCollector {
    pub fn new() -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let layer = CaptureLayer {
            captured: captured.clone(),
        };
        let dispatch = Dispatch::new(Registry::default().with(layer));
        Self { captured, dispatch }
    }

    /// Routes this thread's tracing output to the collector until the guard
    /// is dropped.
    pub fn set_default(&self) -> DefaultGuard {
        tracing::dispatcher::set_default(&self.dispatch)
    }

    pub fn span_names(&self) -> Vec<String> {
        lock(&self.captured)
            .spans
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn has_span(&self, name: &str) -> bool {
        lock(&self.captured).spans.iter().any(|s| s.name == name)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        lock(&self.captured).events.clone()
    }

    /// Events whose message contains `needle`.
    pub fn events_matching(&self, needle: &str) -> Vec<CapturedEvent> {
        lock(&self.captured)
            .events
            .iter()
            .filter(|e| e.message.contains(needle))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut captured = lock(&self.captured);
        captured.spans.clear();
        captured.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_tintbox_targets_are_captured() {
        let collector = SpanCollector::new();
        {
            let _guard = collector.set_default();
            tracing::warn!(target: "tintbox::revalidate", key = "k", "revalidation failed");
            tracing::warn!(target: "hyper", "ignored");
            let _span = tracing::info_span!(target: "tintbox::offload", "offload_task").entered();
        }

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::WARN);
        assert_eq!(events[0].message, "revalidation failed");
        assert_eq!(events[0].field("key"), Some("k"));
        assert!(collector.has_span("offload_task"));
    }
}
