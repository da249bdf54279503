//! Concurrency limiter: keyed admission gate for mutating remote calls.
//!
//! Some brokers misbehave when several instances of the same plan are
//! changed at once. Callers sharing a key (typically a service plan ID) and a
//! positive ceiling are throttled to that ceiling. The first caller to
//! reference a key fixes its ceiling for the lifetime of the limiter; callers
//! without a ceiling never take part.
//!
//! The registry lock only guards create-or-fetch of the per-key semaphore.
//! Serialization of the mutation itself comes from the semaphore capacity.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Shared registry of per-key permits. Cheap to clone.
#[derive(Clone, Default)]
pub struct ConcurrencyLimiter {
    permits: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

/// A held permit. Dropping it releases the slot.
#[derive(Debug)]
pub struct ConcurrencyToken {
    key: String,
    permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyToken {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True if this token actually occupies a slot.
    pub fn is_limited(&self) -> bool {
        self.permit.is_some()
    }
}

impl ConcurrencyLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for a slot under `key`. A ceiling of `None` or zero is granted
    /// immediately without registering the key.
    pub async fn acquire(&self, key: &str, ceiling: Option<u32>) -> ConcurrencyToken {
        let ceiling = match ceiling {
            Some(n) if n > 0 => n,
            _ => {
                return ConcurrencyToken {
                    key: key.to_string(),
                    permit: None,
                };
            }
        };

        let semaphore = {
            let mut permits = self.permits.lock().await;
            Arc::clone(
                permits
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(ceiling as usize))),
            )
        };

        debug!(%key, available = semaphore.available_permits(), "waiting for concurrency permit");
        // The semaphore is never closed, so acquisition only fails if it was.
        let permit = semaphore.acquire_owned().await.ok();
        ConcurrencyToken {
            key: key.to_string(),
            permit,
        }
    }

    /// Run a single mutating call while holding a slot under `key`. The slot
    /// is released as soon as `call` resolves.
    pub async fn run<T, Fut>(&self, key: &str, ceiling: Option<u32>, call: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let token = self.acquire(key, ceiling).await;
        let out = call.await;
        if token.is_limited() {
            debug!(key = %token.key(), "concurrency permit released");
        }
        drop(token);
        out
    }

    /// Keys with a registered gate, sorted.
    pub async fn registered_keys(&self) -> Vec<String> {
        let permits = self.permits.lock().await;
        let mut keys: Vec<_> = permits.keys().cloned().collect();
        keys.sort();
        keys
    }
}
