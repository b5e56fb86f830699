//! Outbound notifications about library changes.

use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;

use super::report::{ApplyStatus, ReapplyReport};
use crate::Target;

/// An event published after a library operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LibraryEvent {
    /// A reapply finished (completely, partially or cancelled).
    Reapplied {
        /// Game id of the installation.
        game: String,
        /// Targets whose content or contributor changed.
        affected: Vec<Target>,
        /// Targets that failed.
        failed: Vec<Target>,
        /// Overall status.
        status: ApplyStatus,
    },
}

impl LibraryEvent {
    /// Builds the event for a finished reapply.
    pub fn reapplied(game: &str, report: &ReapplyReport) -> Self {
        LibraryEvent::Reapplied {
            game: game.to_string(),
            affected: report.affected(),
            failed: report.failed_targets(),
            status: report.status(),
        }
    }
}

/// Fan-out of events to any number of receivers.
///
/// Receivers that were dropped are forgotten on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<LibraryEvent>>>,
}

impl EventBus {
    /// Creates a bus without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<LibraryEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Sends `event` to every live subscriber.
    pub fn publish(&self, event: LibraryEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of subscribers that were live at the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
