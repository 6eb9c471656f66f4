//! Per-volume mutual exclusion.
//!
//! Node operations read the mount table and then act on it. Two operations
//! on the same volume racing between the read and the act would both see
//! "not mounted" and mount twice, so every operation holds the lock for its
//! volume ID for its full duration. Different volumes never contend.
//!
//! Entries are created on first use and dropped when the last holder or
//! waiter releases them, so the map only ever contains volumes with an
//! operation in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Keyed async mutex over volume IDs.
#[derive(Clone, Default)]
pub struct VolumeLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to `volume_id`.
    pub async fn lock(&self, volume_id: &str) -> VolumeGuard {
        // Clone the entry under the map lock so removal in Drop can tell
        // whether anyone else still references it.
        let entry = self
            .map()
            .entry(volume_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let guard = entry.lock_owned().await;
        debug!(volume_id = %volume_id, "Acquired volume lock");

        VolumeGuard {
            volume_id: volume_id.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of volumes with an operation holding or waiting on the lock.
    pub fn in_flight(&self) -> usize {
        self.map().len()
    }
}

/// Exclusive access to one volume; released on drop.
pub struct VolumeGuard {
    volume_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

        // Release the volume before deciding whether the entry is still needed
        drop(self.guard.take());

        // Only the map holds the entry: no holder and no waiter remain
        if map
            .get(&self.volume_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            map.remove(&self.volume_id);
        }
        debug!(volume_id = %self.volume_id, "Released volume lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = VolumeLocks::new();
        {
            let _guard = locks.lock("vol-1").await;
            assert_eq!(locks.in_flight(), 1);
        }
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_volumes_do_not_contend() {
        let locks = VolumeLocks::new();
        let _a = locks.lock("vol-a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("vol-b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_same_volume_is_serialized() {
        let locks = VolumeLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("vol-1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let locks = VolumeLocks::new();
        let first = locks.lock("vol-1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("vol-1").await;
            })
        };

        // Let the waiter register on the entry
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.in_flight(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.in_flight(), 0);
    }
}
