// src/store.rs

use std::sync::{Arc, RwLock};

use crate::state::Snapshot;

/// Single hand-off point between the producer loop and all consumers.
///
/// The producer installs a complete immutable snapshot in one swap; readers
/// clone the `Arc` out from under the lock. A reader therefore always holds
/// either the previous snapshot in full or the new one in full — never a
/// frame paired with events from a different cycle. Only the latest
/// snapshot exists at any instant.
pub struct FrameStore {
    latest: RwLock<Arc<Snapshot>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        match self.latest.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(mut poisoned) => **poisoned.get_mut() = snapshot,
        }
    }

    pub fn read(&self) -> Arc<Snapshot> {
        match self.latest.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(poisoned.get_ref()),
        }
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BBox, FallEvent};
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn snapshot_for_cycle(cycle: u64) -> Snapshot {
        // The frame payload and the event track_id both carry the cycle
        // number so a torn read would be observable.
        Snapshot {
            jpeg: Some(Arc::new(cycle.to_le_bytes().to_vec())),
            events: Arc::new(vec![FallEvent {
                track_id: cycle,
                bbox: BBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                },
                confidence: 1.0,
                timestamp: Utc::now(),
            }]),
        }
    }

    #[test]
    fn read_returns_the_latest_published_snapshot() {
        let store = FrameStore::new();
        assert!(store.read().jpeg.is_none());
        store.publish(snapshot_for_cycle(7));
        let snap = store.read();
        assert_eq!(snap.events[0].track_id, 7);
    }

    #[test]
    fn concurrent_readers_never_observe_a_mixed_snapshot() {
        let store = Arc::new(FrameStore::new());
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        let snap = store.read();
                        if let Some(jpeg) = snap.jpeg.as_ref() {
                            let mut bytes = [0u8; 8];
                            bytes.copy_from_slice(jpeg);
                            let frame_cycle = u64::from_le_bytes(bytes);
                            assert_eq!(frame_cycle, snap.events[0].track_id);
                        }
                    }
                })
            })
            .collect();

        for cycle in 1..2000 {
            store.publish(snapshot_for_cycle(cycle));
        }
        done.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
