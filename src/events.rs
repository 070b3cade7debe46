// src/events.rs

//! Events emitted while packages are installed, removed and updated
//!
//! The UI and content indexers live outside this crate; they observe the
//! manager through an [`EventSink`].

use crate::repository::ProgressCallback;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

/// Notification emitted by the add-on manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A package directory was activated in the packages root
    InstallComplete { id: String },
    /// A package directory was removed
    UninstallComplete { id: String },
    /// Download progress for a package archive
    DownloadProgress {
        id: String,
        bytes: u64,
        total: Option<u64>,
    },
    /// A downloaded archive failed digest verification and was deleted
    ChecksumFailed { id: String },
    /// The baseline package was re-fetched and activated
    BaselineResynced { id: String, version: u32 },
    /// An update batch finished with at least one updated package
    UpdateBatchComplete { updated: Vec<String> },
}

/// Receiver of manager events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Progress callback that forwards download progress for `id` to a sink
pub fn progress_callback(sink: Arc<dyn EventSink>, id: &str) -> ProgressCallback {
    let id = id.to_string();
    Box::new(move |bytes, total| {
        sink.emit(Event::DownloadProgress {
            id: id.clone(),
            bytes,
            total,
        })
    })
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

impl EventSink for UnboundedSender<Event> {
    fn emit(&self, event: Event) {
        // Receiver gone means nobody is listening any more
        let _ = self.send(event);
    }
}

/// Sink that keeps every event in order, for inspection after the fact
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded events with download progress filtered out
    pub fn milestones(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, Event::DownloadProgress { .. }))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
