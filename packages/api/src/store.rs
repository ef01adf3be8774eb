// ABOUTME: Generic object store interface consumed from the orchestration platform
// ABOUTME: RawStore moves untyped values; Api<T> is the typed per-resource handle

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use crate::meta::ObjectMeta;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflict writing {kind} {name:?}: object was modified")]
    Conflict { kind: String, name: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// A stored resource type. Cluster-scoped resources set `NAMESPACED = false`
/// and use an empty namespace.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: &'static str;
    const NAMESPACED: bool = true;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

/// Object-safe storage interface. Update performs server-side conflict
/// detection on the carried resource version.
#[async_trait]
pub trait RawStore: Send + Sync {
    async fn get_raw(&self, kind: &str, namespace: &str, name: &str) -> Result<Value, StoreError>;
    async fn list_raw(&self, kind: &str, namespace: &str) -> Result<Vec<Value>, StoreError>;
    async fn create_raw(&self, kind: &str, obj: Value) -> Result<Value, StoreError>;
    async fn update_raw(&self, kind: &str, obj: Value) -> Result<Value, StoreError>;
    async fn delete_raw(&self, kind: &str, namespace: &str, name: &str)
        -> Result<(), StoreError>;
}

/// Typed handle over a raw store for one resource kind.
pub struct Api<T> {
    store: Arc<dyn RawStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Api<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<T: Resource> Api<T> {
    pub fn new(store: Arc<dyn RawStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<T, StoreError> {
        let raw = self.store.get_raw(T::KIND, namespace, name).await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// Get that treats absence as `None` instead of an error.
    pub async fn try_get(&self, namespace: &str, name: &str) -> Result<Option<T>, StoreError> {
        match self.get(namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn list(&self, namespace: &str) -> Result<Vec<T>, StoreError> {
        let raw = self.store.list_raw(T::KIND, namespace).await?;
        raw.into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    pub async fn create(&self, obj: &T) -> Result<T, StoreError> {
        let raw = self.store.create_raw(T::KIND, serde_json::to_value(obj)?).await?;
        Ok(serde_json::from_value(raw)?)
    }

    pub async fn update(&self, obj: &T) -> Result<T, StoreError> {
        let raw = self.store.update_raw(T::KIND, serde_json::to_value(obj)?).await?;
        Ok(serde_json::from_value(raw)?)
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.store.delete_raw(T::KIND, namespace, name).await
    }

    /// Delete that treats "already gone" as success.
    pub async fn delete_tolerant(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self.delete(namespace, name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}
