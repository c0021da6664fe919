//! Analytics hooks fired by the lead form.

use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub name: String,
    pub params: Value,
}

impl AnalyticsEvent {
    pub fn new(name: &str, params: Value) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }
}

/// Tracking collaborator (tag manager, gtag, ...). Optional everywhere.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: AnalyticsEvent);
}

/// Emits events as structured log lines.
pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn track(&self, event: AnalyticsEvent) {
        info!(target: "analytics", event = %event.name, params = %event.params, "analytics event");
    }
}

/// Keeps events in memory, for tests and previews.
#[derive(Default)]
pub struct MemoryAnalytics {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }
}

impl AnalyticsSink for MemoryAnalytics {
    fn track(&self, event: AnalyticsEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
