//! Post-commit notification collaborator.
//!
//! # Responsibility
//! - Tell downstream caches which entities changed after a commit.
//!
//! # Invariants
//! - Notifications are only emitted after a successful commit.
//! - A failing notifier is logged and never rolls anything back.

use crate::model::note::Note;
use crate::model::notebook::Notebook;
use crate::model::tag::Tag;
use crate::model::LocalId;
use log::warn;
use parking_lot::Mutex;
use std::sync::mpsc::Sender;

/// What changed in storage.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    NotebookPut(Notebook),
    NotebookExpunged {
        local_id: LocalId,
        expunged_note_local_ids: Vec<LocalId>,
    },
    TagPut(Tag),
    TagExpunged {
        local_id: LocalId,
        expunged_child_local_ids: Vec<LocalId>,
    },
    NotePut(Note),
    NoteUpdated(Note),
    NoteExpunged {
        local_id: LocalId,
    },
    ResourceExpunged {
        local_id: LocalId,
        note_local_id: LocalId,
    },
}

impl StorageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotebookPut(_) => "notebook_put",
            Self::NotebookExpunged { .. } => "notebook_expunged",
            Self::TagPut(_) => "tag_put",
            Self::TagExpunged { .. } => "tag_expunged",
            Self::NotePut(_) => "note_put",
            Self::NoteUpdated(_) => "note_updated",
            Self::NoteExpunged { .. } => "note_expunged",
            Self::ResourceExpunged { .. } => "resource_expunged",
        }
    }
}

/// Receives committed changes.
pub trait StorageNotifier: Send + Sync {
    fn notify(&self, event: StorageEvent) -> Result<(), String>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl StorageNotifier for NoopNotifier {
    fn notify(&self, _event: StorageEvent) -> Result<(), String> {
        Ok(())
    }
}

/// Forwards events into an mpsc channel.
pub struct ChannelNotifier {
    sender: Mutex<Sender<StorageEvent>>,
}

impl ChannelNotifier {
    pub fn new(sender: Sender<StorageEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl StorageNotifier for ChannelNotifier {
    fn notify(&self, event: StorageEvent) -> Result<(), String> {
        self.sender
            .lock()
            .send(event)
            .map_err(|err| format!("notification receiver dropped: {err}"))
    }
}

/// Delivers one event, logging instead of propagating failures.
pub(crate) fn deliver(notifier: &dyn StorageNotifier, event: StorageEvent) {
    let name = event.name();
    if let Err(err) = notifier.notify(event) {
        warn!(
            "event=notify module=notify status=error kind={} error={}",
            name, err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{deliver, ChannelNotifier, StorageEvent};
    use std::sync::mpsc;

    #[test]
    fn channel_notifier_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let notifier = ChannelNotifier::new(tx);
        deliver(
            &notifier,
            StorageEvent::NoteExpunged {
                local_id: "n1".to_string(),
            },
        );
        assert_eq!(
            rx.recv().unwrap(),
            StorageEvent::NoteExpunged {
                local_id: "n1".to_string()
            }
        );
    }

    #[test]
    fn dropped_receiver_is_swallowed() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let notifier = ChannelNotifier::new(tx);
        deliver(
            &notifier,
            StorageEvent::NoteExpunged {
                local_id: "n1".to_string(),
            },
        );
    }
}
