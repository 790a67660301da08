use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock as StdRwLock,
    },
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::SiteflowResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A TTL cache with single-flighted refresh.
///
/// Readers with a fresh value return it without contention. A refresh
/// (forced, or triggered by expiry/invalidation) runs under the refresh
/// mutex; waiters that queued behind an in-flight refresh observe the bumped
/// generation when they acquire the mutex and reuse the just-built snapshot
/// instead of building again. Snapshots are shared via `Arc`, so every
/// concurrent caller of one refresh sees the same value.
pub struct TimedCache<T> {
    ttl: Duration,
    value: StdRwLock<Option<Entry<T>>>,
    refresh: Mutex<()>,
    generation: AtomicU64,
}

struct Entry<T> {
    value: Arc<T>,
    refreshed_at: Instant,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<T> TimedCache<T> {
    /// Creates an empty cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            value: StdRwLock::new(None),
            refresh: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the cached value, refreshing through `builder` when forced,
    /// expired or invalidated.
    pub async fn get_with<F, Fut>(&self, force_refresh: bool, builder: F) -> SiteflowResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SiteflowResult<T>>,
    {
        if !force_refresh {
            if let Some(value) = self.fresh_value() {
                return Ok(value);
            }
        }

        let observed = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh.lock().await;

        // Someone refreshed while we waited for the mutex; their snapshot
        // subsumes ours.
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(value) = self.snapshot() {
                return Ok(value);
            }
        }
        // Unforced callers may also find a fresh value written before we
        // observed the generation.
        if !force_refresh {
            if let Some(value) = self.fresh_value() {
                return Ok(value);
            }
        }

        let built = Arc::new(builder().await?);
        {
            let mut slot = self.value.write().expect("cache slot poisoned");
            *slot = Some(Entry {
                value: built.clone(),
                refreshed_at: Instant::now(),
            });
        }
        self.generation.fetch_add(1, Ordering::Release);
        Ok(built)
    }

    /// Drops the cached value; the next reader refreshes.
    pub fn invalidate(&self) {
        let mut slot = self.value.write().expect("cache slot poisoned");
        *slot = None;
    }

    /// Returns the current snapshot regardless of freshness.
    pub fn snapshot(&self) -> Option<Arc<T>> {
        let slot = self.value.read().expect("cache slot poisoned");
        slot.as_ref().map(|entry| entry.value.clone())
    }

    fn fresh_value(&self) -> Option<Arc<T>> {
        let slot = self.value.read().expect("cache slot poisoned");
        slot.as_ref().and_then(|entry| {
            (entry.refreshed_at.elapsed() <= self.ttl).then(|| entry.value.clone())
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    #[tokio::test]
    async fn test_fresh_value_skips_builder() {
        let cache = TimedCache::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get_with(false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7u32)
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let cache = TimedCache::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let build = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1u32)
        };
        cache.get_with(false, build).await.unwrap();
        cache.invalidate();
        cache.get_with(false, build).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_forced_refresh_single_flights() {
        let cache = Arc::new(TimedCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_with(true, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the refresh long enough for every waiter to
                        // queue behind it.
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42u32)
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }

        // Exactly one underlying build; every caller got the same snapshot.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = &values[0];
        assert!(values.iter().all(|v| Arc::ptr_eq(v, first)));
    }

    #[tokio::test]
    async fn test_expired_value_rebuilds() {
        let cache = TimedCache::new(Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let build = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(0u32)
        };
        cache.get_with(false, build).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.get_with(false, build).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_builder_error_leaves_cache_empty() {
        let cache: TimedCache<u32> = TimedCache::new(Duration::from_secs(60));
        let result = cache
            .get_with(false, || async {
                Err(crate::SiteflowError::Transport("down".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.snapshot().is_none());
    }
}
