//! Message identifier allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide allocator shared by every connection.
static MESSAGE_IDS: MessageIdAllocator = MessageIdAllocator::new();

/// A telemetry message identifier, rendered as `msg_0001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    /// Get the raw sequence number.
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg_{:04}", self.0)
    }
}

/// Strictly increasing identifier source.
///
/// `fetch_add` makes allocation atomic, so concurrent callers never observe
/// the same value. Relaxed ordering is enough: only uniqueness matters.
#[derive(Debug)]
pub struct MessageIdAllocator {
    next: AtomicU64,
}

impl MessageIdAllocator {
    /// Allocator whose first identifier is `msg_0001`.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> MessageId {
        MessageId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The process-wide allocator.
    pub fn global() -> &'static MessageIdAllocator {
        &MESSAGE_IDS
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate from the process-wide allocator.
pub fn next_message_id() -> MessageId {
    MESSAGE_IDS.next_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn sequential_ids_are_padded_and_increasing() {
        let ids = MessageIdAllocator::new();
        let rendered: Vec<String> = (0..3).map(|_| ids.next_id().to_string()).collect();
        assert_eq!(rendered, vec!["msg_0001", "msg_0002", "msg_0003"]);

        let mut last = ids.next_id();
        for _ in 0..100 {
            let id = ids.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn ids_widen_past_four_digits() {
        let ids = MessageIdAllocator {
            next: AtomicU64::new(9_999),
        };
        assert_eq!(ids.next_id().to_string(), "msg_9999");
        assert_eq!(ids.next_id().to_string(), "msg_10000");
    }

    #[test]
    fn concurrent_callers_never_share_an_id() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1_000;

        let ids = Arc::new(MessageIdAllocator::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    (0..PER_THREAD).map(|_| ids.next_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate {}", id);
            }
        }
        assert_eq!(seen.len(), THREADS * PER_THREAD);
    }

    #[test]
    fn global_allocator_is_monotonic() {
        let a = next_message_id();
        let b = next_message_id();
        assert!(b > a);
    }
}
