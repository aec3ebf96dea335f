//! The front end an operation reports to.

use std::sync::{Mutex, PoisonError};

/// How the caller finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerResult {
    /// The operation completed.
    Ok,
    /// The operation was abandoned.
    Cancelled,
}

/// Receives operation results.
pub trait Caller: Send + Sync + std::fmt::Debug {
    /// Show an error to the user.
    fn show_error(&self, message: &str);

    /// End the interaction that started the operation.
    fn finish(&self, result: CallerResult);

    /// Refresh whatever view lists the store's contents.
    fn refresh_list(&self);

    /// Show blocking progress while an operation runs.
    fn progress(&self, message: &str);

    /// Show an informational message.
    fn notify(&self, message: &str);
}

/// Everything a [`RecordingCaller`] was told, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerEvent {
    /// `show_error`.
    Error(String),
    /// `finish`.
    Finished(CallerResult),
    /// `refresh_list`.
    Refreshed,
    /// `progress`.
    Progress(String),
    /// `notify`.
    Message(String),
}

/// Caller that records events, for tests.
#[derive(Debug, Default)]
pub struct RecordingCaller {
    events: Mutex<Vec<CallerEvent>>,
}

impl RecordingCaller {
    fn push(&self, event: CallerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// All recorded events.
    pub fn events(&self) -> Vec<CallerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Errors shown so far.
    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallerEvent::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    /// How the caller was finished, if it was.
    pub fn finished(&self) -> Option<CallerResult> {
        self.events().into_iter().find_map(|e| match e {
            CallerEvent::Finished(result) => Some(result),
            _ => None,
        })
    }
}

impl Caller for RecordingCaller {
    fn show_error(&self, message: &str) {
        self.push(CallerEvent::Error(message.to_string()));
    }

    fn finish(&self, result: CallerResult) {
        self.push(CallerEvent::Finished(result));
    }

    fn refresh_list(&self) {
        self.push(CallerEvent::Refreshed);
    }

    fn progress(&self, message: &str) {
        self.push(CallerEvent::Progress(message.to_string()));
    }

    fn notify(&self, message: &str) {
        self.push(CallerEvent::Message(message.to_string()));
    }
}
