//! Per-key async locks used to coalesce concurrent `get_or_create` misses.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of per-key locks; entries live only while someone holds or awaits one.
#[derive(Default)]
pub(crate) struct SingleFlight {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>, RandomState>>,
}

impl SingleFlight {
    /// Waits until no other caller holds `key`, then holds it until the guard drops.
    pub(crate) async fn lock(&self, key: &str) -> FlightGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry_ref(key)
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = slot.lock_owned().await;
        FlightGuard {
            flights: self,
            key: key.to_owned(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

pub(crate) struct FlightGuard<'a> {
    flights: &'a SingleFlight,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // Release first so the strong count reflects only the table and waiters.
        self.guard.take();
        let mut slots = self.flights.slots.lock();
        if slots
            .get(self.key.as_str())
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(self.key.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn table_is_empty_after_release() {
        let flights = SingleFlight::default();
        {
            let _guard = flights.lock("a").await;
            assert_eq!(flights.len(), 1);
        }
        assert_eq!(flights.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_is_exclusive() {
        let flights = Arc::new(SingleFlight::default());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _guard = flights.lock("k").await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(flights.len(), 0);
    }
}
