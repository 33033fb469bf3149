//! Mutation outcomes for the UI: one-shot notices and the pending count.

use tokio::sync::{broadcast, watch};

use crate::constants::CHANNEL_CAPACITY;
use crate::error::AgendaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateEvent,
    UpdateEvent,
    DeleteEvent,
    DuplicateEvent,
    CreateCalendar,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateEvent => "create_event",
            Operation::UpdateEvent => "update_event",
            Operation::DeleteEvent => "delete_event",
            Operation::DuplicateEvent => "duplicate_event",
            Operation::CreateCalendar => "create_calendar",
        }
    }
}

/// A settled mutation, suitable for a toast.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Succeeded {
        operation: Operation,
        entity_id: String,
    },
    Failed {
        operation: Operation,
        error: AgendaError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationState {
    /// Mutations started and not yet settled
    pub pending: usize,
}

impl MutationState {
    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }
}

pub(crate) struct Notifier {
    notices: broadcast::Sender<Notice>,
    state: watch::Sender<MutationState>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (notices, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (state, _) = watch::channel(MutationState::default());
        Notifier { notices, state }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }

    /// Count a mutation as pending until the returned guard is dropped.
    pub(crate) fn begin(&self) -> Pending<'_> {
        self.state.send_modify(|s| s.pending += 1);
        Pending { notifier: self }
    }

    pub(crate) fn publish(&self, notice: Notice) {
        // Nobody listening is fine
        let _ = self.notices.send(notice);
    }
}

/// Marks one mutation as in progress.
pub(crate) struct Pending<'a> {
    notifier: &'a Notifier,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.notifier
            .state
            .send_modify(|s| s.pending = s.pending.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_count_follows_guards() {
        let notifier = Notifier::new();
        let state = notifier.watch_state();
        let a = notifier.begin();
        let b = notifier.begin();
        assert_eq!(state.borrow().pending, 2);
        drop(a);
        assert_eq!(state.borrow().pending, 1);
        drop(b);
        assert!(state.borrow().is_idle());
    }

    #[test]
    fn notices_reach_subscribers() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.publish(Notice::Succeeded {
            operation: Operation::DeleteEvent,
            entity_id: "evt-1".to_string(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Notice::Succeeded {
                operation: Operation::DeleteEvent,
                entity_id: "evt-1".to_string(),
            }
        );
    }
}
