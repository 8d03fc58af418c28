use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Serializes knowledge-store writes per store root.
///
/// Upserts go through the backend as read-modify-write of one file, so two
/// concurrent writes to the same root could lose one of them. Writes to
/// different roots proceed independently.
#[derive(Default)]
pub struct StoreWriteQueue {
    roots: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl StoreWriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `write` once every earlier write to `root` has finished.
    pub async fn serialized<T, F>(&self, root: &Path, write: F) -> T
    where
        F: Future<Output = T>,
    {
        let gate = {
            let mut roots = self.roots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(roots.entry(root.to_path_buf()).or_default())
        };
        let _turn = gate.lock().await;
        write.await
    }
}
