use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::{Mutex, OwnedMutexGuard};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Named async locks serializing operations per logical target.
///
/// All actions against one site (or one shared file such as the Caddyfile)
/// queue behind each other; independent targets proceed concurrently up to
/// the session-pool limit.
#[derive(Debug, Default, Clone)]
pub struct TargetLocks {
    inner: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TargetLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `target`, creating it on first use.
    pub async fn lock(&self, target: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("target lock table poisoned");
            map.entry(target.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
