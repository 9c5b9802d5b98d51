//! Device notifications and diagnostics.
//!
//! Every user-meaningful transition produces a [`DeviceEvent`], every
//! runtime failure a [`Diagnostic`]. Both are logged through the `log`
//! facade and kept in a bounded [`EventLog`] for the caller to drain.

use std::collections::{HashMap, VecDeque};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::device::Timestamp;

/// Category of device state events.
pub const DEVICE_CATEGORY: &str = "DEVICE";

/// Category of configuration events.
pub const CONFIG_CATEGORY: &str = "CONFIG";

/// What happened to a device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    /// A self-announced device was added to the registry.
    Added,
    Detected,
    /// No report was received for too long.
    Silent,
    Set,
    /// A pulse ended.
    Reset,
    Retry,
    Timeout,
    /// The device reported the commanded state.
    Confirmed,
    /// Someone else changed the device state.
    Changed,
    /// Someone switched the device on by hand.
    Operated,
    /// The configuration was (re)loaded.
    Activating,
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Failure,
}

/// A recorded device or configuration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub timestamp: Timestamp,
    pub category: String,
    pub name: String,
    pub action: EventAction,
    pub detail: String,
}

/// A recorded failure or oddity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub timestamp: Timestamp,
    pub severity: Severity,
    pub category: String,
    pub message: String,
}

/// Bounded history of events and diagnostics.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<DeviceEvent>,
    diagnostics: VecDeque<Diagnostic>,
    counts: HashMap<EventAction, usize>,
    failures: usize,
    last_failure: Option<String>,
    max_entries: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub const DEFAULT_MAX_ENTRIES: usize = 256;

    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            events: VecDeque::new(),
            diagnostics: VecDeque::new(),
            counts: HashMap::new(),
            failures: 0,
            last_failure: None,
            max_entries,
        }
    }

    pub fn record(
        &mut self,
        timestamp: Timestamp,
        category: &str,
        name: &str,
        action: EventAction,
        detail: impl Into<String>,
    ) {
        let event = DeviceEvent {
            timestamp,
            category: category.to_string(),
            name: name.to_string(),
            action,
            detail: detail.into(),
        };
        info!(
            "{} {} {} {}",
            event.category, event.name, event.action, event.detail
        );

        *self.counts.entry(action).or_default() += 1;
        self.events.push_back(event);
        if self.events.len() > self.max_entries {
            self.events.pop_front();
        }
    }

    pub fn diagnose(
        &mut self,
        timestamp: Timestamp,
        severity: Severity,
        category: &str,
        message: impl Into<String>,
    ) {
        let diagnostic = Diagnostic {
            timestamp,
            severity,
            category: category.to_string(),
            message: message.into(),
        };
        match severity {
            Severity::Info => info!("{} {}", diagnostic.category, diagnostic.message),
            Severity::Warning => warn!("{} {}", diagnostic.category, diagnostic.message),
            Severity::Failure => {
                error!("{} {}", diagnostic.category, diagnostic.message);
                self.failures += 1;
                self.last_failure = Some(diagnostic.message.clone());
            }
        }

        self.diagnostics.push_back(diagnostic);
        if self.diagnostics.len() > self.max_entries {
            self.diagnostics.pop_front();
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &DeviceEvent> {
        self.events.iter()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn drain_events(&mut self) -> Vec<DeviceEvent> {
        self.events.drain(..).collect()
    }

    pub fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.drain(..).collect()
    }

    pub fn summary(&self) -> EventSummary {
        EventSummary {
            counts: self.counts.clone(),
            failures: self.failures,
            pending_events: self.events.len(),
            pending_diagnostics: self.diagnostics.len(),
            last_failure: self.last_failure.clone(),
        }
    }
}

/// Counters over everything recorded since the log was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub counts: HashMap<EventAction, usize>,
    pub failures: usize,
    pub pending_events: usize,
    pub pending_diagnostics: usize,
    pub last_failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_action_tags() {
        let tags: Vec<String> = EventAction::iter().map(|a| a.to_string()).collect();
        assert_eq!(
            tags,
            [
                "ADDED",
                "DETECTED",
                "SILENT",
                "SET",
                "RESET",
                "RETRY",
                "TIMEOUT",
                "CONFIRMED",
                "CHANGED",
                "OPERATED",
                "ACTIVATING"
            ]
        );
        assert_eq!(Severity::Failure.to_string(), "FAILURE");
    }

    #[test]
    fn test_max_entries() {
        let mut log = EventLog::with_max_entries(2);
        for i in 0..5 {
            log.record(i, DEVICE_CATEGORY, "lamp1", EventAction::Retry, "on");
        }
        let events = log.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, 3);
        assert_eq!(log.summary().counts[&EventAction::Retry], 5);
    }

    #[test]
    fn test_failure_tracking() {
        let mut log = EventLog::new();
        log.diagnose(1, Severity::Warning, DEVICE_CATEGORY, "odd");
        log.diagnose(2, Severity::Failure, DEVICE_CATEGORY, "sendto() error");
        let summary = log.summary();
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.last_failure.as_deref(), Some("sendto() error"));
        assert_eq!(log.drain_diagnostics().len(), 2);
        assert_eq!(log.diagnostics().count(), 0);
    }
}
