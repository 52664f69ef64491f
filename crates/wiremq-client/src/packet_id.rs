//! Packet identifier allocation.

use std::sync::atomic::{AtomicU16, Ordering};

/// Monotonic packet id counter. Identifier 0 is reserved as "unassigned", so
/// the counter wraps 65535 -> 1 and never yields 0.
#[derive(Debug, Default)]
pub(crate) struct PacketIds {
    last: AtomicU16,
}

impl PacketIds {
    pub fn new() -> Self {
        Self {
            last: AtomicU16::new(0),
        }
    }

    pub fn next(&self) -> u16 {
        loop {
            let id = self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn ids_are_sequential() {
        let ids = PacketIds::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn wraps_past_65535_skipping_zero() {
        let ids = PacketIds::new();
        ids.last.store(65_534, Ordering::Relaxed);
        assert_eq!(ids.next(), 65_535);
        assert_eq!(ids.next(), 1);
    }

    #[test]
    fn concurrent_allocations_are_distinct_and_non_zero() {
        let ids = Arc::new(PacketIds::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..100).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert_ne!(id, 0);
                assert!(seen.insert(id), "duplicate packet id {id}");
            }
        }
    }
}
