// ABOUTME: In-memory RawStore with the platform's persistence semantics
// ABOUTME: Assigns uids, bumps resource versions, honors finalizer-aware deletion

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::meta::ObjectMeta;
use crate::store::{RawStore, StoreError};

type ObjectKey = (String, String, String); // kind, namespace, name

/// In-memory object store. Deleting an object that still carries finalizers
/// only marks it with a deletion timestamp; the object disappears when an
/// update leaves a deletion-marked object with no finalizers, matching the
/// platform's behavior.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectKey, Value>>,
    version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn meta_of(obj: &Value) -> Result<ObjectMeta, StoreError> {
        let meta = obj
            .get("metadata")
            .cloned()
            .ok_or_else(|| StoreError::Internal("object has no metadata".to_string()))?;
        Ok(serde_json::from_value(meta)?)
    }

    fn put_meta(obj: &mut Value, meta: &ObjectMeta) -> Result<(), StoreError> {
        obj["metadata"] = serde_json::to_value(meta)?;
        Ok(())
    }
}

#[async_trait]
impl RawStore for MemoryStore {
    async fn get_raw(&self, kind: &str, namespace: &str, name: &str) -> Result<Value, StoreError> {
        let objects = self.objects.read().await;
        objects
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })
    }

    async fn list_raw(&self, kind: &str, namespace: &str) -> Result<Vec<Value>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind && ns == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create_raw(&self, kind: &str, obj: Value) -> Result<Value, StoreError> {
        let mut obj = obj;
        let mut meta = Self::meta_of(&obj)?;
        let key = (kind.to_string(), meta.namespace.clone(), meta.name.clone());

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                name: meta.name,
            });
        }

        if meta.uid.is_empty() {
            meta.uid = Uuid::new_v4().to_string();
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Utc::now());
        }
        meta.generation = 1;
        meta.resource_version = self.next_version();
        Self::put_meta(&mut obj, &meta)?;

        debug!(kind, name = %meta.name, namespace = %meta.namespace, "Created object");
        objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn update_raw(&self, kind: &str, obj: Value) -> Result<Value, StoreError> {
        let mut obj = obj;
        let mut meta = Self::meta_of(&obj)?;
        let key = (kind.to_string(), meta.namespace.clone(), meta.name.clone());

        let mut objects = self.objects.write().await;
        let stored = objects.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: kind.to_string(),
            name: meta.name.clone(),
        })?;
        let stored_meta = Self::meta_of(stored)?;

        if meta.resource_version != 0 && meta.resource_version != stored_meta.resource_version {
            return Err(StoreError::Conflict {
                kind: kind.to_string(),
                name: meta.name,
            });
        }

        // Deletion completes once nothing protects the object anymore.
        if stored_meta.deletion_timestamp.is_some() && meta.finalizers.is_empty() {
            debug!(kind, name = %meta.name, "Finalizers cleared, removing object");
            objects.remove(&key);
            meta.deletion_timestamp = stored_meta.deletion_timestamp;
            Self::put_meta(&mut obj, &meta)?;
            return Ok(obj);
        }

        if obj.get("spec") != stored.get("spec") {
            meta.generation = stored_meta.generation + 1;
        } else {
            meta.generation = stored_meta.generation;
        }
        meta.deletion_timestamp = stored_meta.deletion_timestamp;
        meta.creation_timestamp = stored_meta.creation_timestamp;
        meta.uid = stored_meta.uid;
        meta.resource_version = self.next_version();
        Self::put_meta(&mut obj, &meta)?;

        objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn delete_raw(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = (kind.to_string(), namespace.to_string(), name.to_string());

        let mut objects = self.objects.write().await;
        let stored = objects.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        })?;
        let mut meta = Self::meta_of(stored)?;

        if meta.finalizers.is_empty() {
            debug!(kind, name, namespace, "Deleted object");
            objects.remove(&key);
            return Ok(());
        }

        if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version = self.next_version();
            Self::put_meta(stored, &meta)?;
            debug!(kind, name, namespace, "Marked object for deletion");
        }
        Ok(())
    }
}
