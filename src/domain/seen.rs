//! Seen-device set used to enumerate each address at most once per session.

use crate::domain::models::DeviceAddress;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct SeenDevices {
    addresses: Mutex<HashSet<DeviceAddress>>,
}

impl SeenDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `address` if absent. Returns `true` when this call inserted it.
    ///
    /// Test and insert happen under one lock, so concurrent callers racing on
    /// the same address see exactly one `true`.
    pub fn insert_if_absent(&self, address: DeviceAddress) -> bool {
        self.lock().insert(address)
    }

    pub fn contains(&self, address: DeviceAddress) -> bool {
        self.lock().contains(&address)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget every address, for a fresh session
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<DeviceAddress>> {
        // The set stays consistent even if a holder panicked mid-insert.
        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_insert_once() {
        let seen = SeenDevices::new();
        let address = DeviceAddress::new(0xAABBCCDDEEFF);

        assert!(seen.insert_if_absent(address));
        assert!(!seen.insert_if_absent(address));
        assert!(seen.contains(address));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_clear_resets() {
        let seen = SeenDevices::new();
        let address = DeviceAddress::new(7);
        seen.insert_if_absent(address);
        seen.clear();
        assert!(seen.is_empty());
        assert!(seen.insert_if_absent(address));
    }

    #[test]
    fn test_concurrent_insert_single_winner() {
        let seen = Arc::new(SeenDevices::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let address = DeviceAddress::new(0x112233445566);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let seen = seen.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if seen.insert_if_absent(address) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
