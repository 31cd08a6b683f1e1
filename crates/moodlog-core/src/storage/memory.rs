//! In-process content store.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{normalize_content_type, normalize_object_key, ContentStore};
use crate::{Error, Result};

/// Stored object payload and content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Content store keeping objects in memory, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail (or succeed again).
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }

    pub async fn object_keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn get(&self, object_key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(object_key).cloned()
    }
}

impl ContentStore for MemoryContentStore {
    async fn put_object(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<()> {
        let object_key = normalize_object_key(object_key)?;
        if *self.failing.lock().await {
            return Err(Error::Storage(format!("upload refused for {object_key}")));
        }

        self.objects.lock().await.insert(
            object_key,
            StoredObject {
                bytes,
                content_type: normalize_content_type(content_type),
            },
        );
        Ok(())
    }
}
