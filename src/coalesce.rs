use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

/// Coalesces concurrent identical requests into one in-flight computation.
///
/// The first caller for a key starts the work; callers arriving while it runs await the
/// same shared outcome. The entry is removed when the computation finishes, so later
/// callers start fresh.
pub struct InflightRequests<K, V>
where
    V: Clone,
{
    pending: Arc<Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>>,
}

impl<K, V> InflightRequests<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `work` for `key` unless an identical request is already in flight.
    ///
    /// `work` is dropped without being polled when the caller joins an existing request.
    pub async fn run<Fut>(&self, key: K, work: Fut) -> V
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut pending = self.pending.lock().await;
            if let Some(existing) = pending.get(&key) {
                tracing::debug!("Joining in-flight request");
                existing.clone()
            } else {
                let registry = self.pending.clone();
                let owned_key = key.clone();
                let shared = async move {
                    let out = work.await;
                    registry.lock().await.remove(&owned_key);
                    out
                }
                .boxed()
                .shared();
                pending.insert(key, shared.clone());
                shared
            }
        };

        shared.await
    }

    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl<K, V> Default for InflightRequests<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
