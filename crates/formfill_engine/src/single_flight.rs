use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::ResolverError;

type SharedCall<V> = Shared<BoxFuture<'static, Result<V, ResolverError>>>;

struct Cell<V> {
    generation: u64,
    call: SharedCall<V>,
}

/// Collapses concurrent requests for the same key into one call.
///
/// Callers arriving while a call for their key is running await that call's
/// result. The cell is emptied as soon as the call settles, success or
/// failure, so the next request starts a fresh call.
pub struct SingleFlight<K, V> {
    cells: Arc<Mutex<HashMap<K, Cell<V>>>>,
    generations: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            cells: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the running call for `key`, or starts one built by `start`.
    pub async fn run<F>(&self, key: K, start: F) -> Result<V, ResolverError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, ResolverError>>,
    {
        let call = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            match cells.get(&key) {
                Some(cell) => cell.call.clone(),
                None => {
                    let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                    let call = settle_then_clear(Arc::clone(&self.cells), key.clone(), generation, start());
                    cells.insert(
                        key,
                        Cell {
                            generation,
                            call: call.clone(),
                        },
                    );
                    call
                }
            }
        };
        call.await
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

fn settle_then_clear<K, V>(
    cells: Arc<Mutex<HashMap<K, Cell<V>>>>,
    key: K,
    generation: u64,
    inner: BoxFuture<'static, Result<V, ResolverError>>,
) -> SharedCall<V>
where
    K: Eq + Hash + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    async move {
        let result = inner.await;
        let mut cells = cells.lock().unwrap_or_else(PoisonError::into_inner);
        if cells.get(&key).is_some_and(|cell| cell.generation == generation) {
            cells.remove(&key);
        }
        result
    }
    .boxed()
    .shared()
}
