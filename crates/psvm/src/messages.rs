//! Messaging & Telemetry (spec.md §4.I, component I).
//!
//! The interpreter polls for asynchronous events — a finalizable object
//! became collectible, a collection completed with a live/condemned/
//! not-condemned breakdown — rather than the collector calling back into
//! arbitrary interpreter code from a GC-internal context. `MessageQueue`
//! mirrors `mps_message_get`/`mps_message_type_enable`: each `Message` kind
//! can be independently enabled, and undelivered messages of a disabled kind
//! are dropped rather than queued.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::Mutex;

/// One asynchronous event surfaced to the interpreter (spec.md §6
/// "Messaging" ABI group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A finalizable object at `addr` is now only reachable from the
    /// finalization queue itself.
    Finalization { addr: usize },
    /// A collection completed: counts of objects found live, condemned
    /// (reclaimed), and not-condemned (survived without being a collection
    /// candidate).
    Gc {
        live: usize,
        condemned: usize,
        not_condemned: usize,
    },
}

impl Message {
    fn kind(&self) -> MessageKind {
        match self {
            Message::Finalization { .. } => MessageKind::Finalization,
            Message::Gc { .. } => MessageKind::Gc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MessageKind {
    Finalization,
    Gc,
}

/// Per-kind enable/disable message channel. Disabled kinds are cheap: a
/// `post` for a disabled kind never touches the channel at all.
pub struct MessageQueue {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    enabled: Mutex<HashSet<MessageKind>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            enabled: Mutex::new(HashSet::new()),
        }
    }

    /// `mps_message_type_enable` for finalization messages.
    pub fn enable_finalization(&self, enabled: bool) {
        self.set_enabled(MessageKind::Finalization, enabled);
    }

    /// `mps_message_type_enable` for GC-completion messages.
    pub fn enable_gc(&self, enabled: bool) {
        self.set_enabled(MessageKind::Gc, enabled);
    }

    fn set_enabled(&self, kind: MessageKind, on: bool) {
        let mut enabled = self.enabled.lock().expect("message queue enabled-set poisoned");
        if on {
            enabled.insert(kind);
        } else {
            enabled.remove(&kind);
        }
    }

    fn is_enabled(&self, kind: MessageKind) -> bool {
        self.enabled.lock().expect("message queue enabled-set poisoned").contains(&kind)
    }

    /// `mps_message_post`-equivalent: queues `message` if its kind is
    /// enabled, otherwise silently drops it.
    pub fn post(&self, message: Message) {
        if self.is_enabled(message.kind()) {
            // The receiver is held by `self` too, so the channel never
            // disconnects; send only fails if the crate is unwinding with
            // the queue already dropped.
            let _ = self.sender.send(message);
        }
    }

    /// `mps_message_get`: non-blocking poll for the next queued message.
    pub fn poll(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Number of messages currently queued, for diagnostics/tests.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocation-pattern hint attached to an `AllocationPoint` (spec.md §4.I):
/// advises the pool which buffering/commit strategy favors the upcoming
/// allocation burst. Purely advisory — a pool is free to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocPattern {
    /// Steady incremental growth, the default.
    Ramp,
    /// A large burst expected to be condemned together at the next
    /// collection (e.g. a page's worth of short-lived glyph caches).
    RampCollectAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_kind_drops_messages() {
        let queue = MessageQueue::new();
        queue.post(Message::Finalization { addr: 0x1000 });
        assert!(queue.is_empty());
    }

    #[test]
    fn enabled_kind_queues_and_polls_in_order() {
        let queue = MessageQueue::new();
        queue.enable_gc(true);
        queue.post(Message::Gc {
            live: 10,
            condemned: 3,
            not_condemned: 1,
        });
        queue.post(Message::Gc {
            live: 8,
            condemned: 2,
            not_condemned: 0,
        });
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.poll(),
            Some(Message::Gc {
                live: 10,
                condemned: 3,
                not_condemned: 1
            })
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn disabling_a_kind_does_not_affect_other_kinds() {
        let queue = MessageQueue::new();
        queue.enable_finalization(true);
        queue.post(Message::Finalization { addr: 0x2000 });
        queue.post(Message::Gc {
            live: 1,
            condemned: 1,
            not_condemned: 0,
        });
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.poll(), Some(Message::Finalization { addr: 0x2000 }));
    }
}
