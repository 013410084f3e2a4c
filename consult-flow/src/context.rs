use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{FlowError, Result};

/// Shared key/value state for one session's tasks.
///
/// Values are stored as JSON so that any serde type can travel between tasks
/// without the engine knowing about it. Clones share the same underlying map.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        self.set_sync(key, value)
    }

    pub fn set_sync(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| FlowError::ContextError(format!("cannot store '{}': {}", key, e)))?;
        self.data.insert(key, value);
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    /// Synchronous read, usable from edge conditions.
    pub fn get_sync<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Read a value that a previous task must have written.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_sync(key)
            .ok_or_else(|| FlowError::ContextError(format!("{} not found in context", key)))
    }

    /// Read-modify-write a value, starting from `T::default()` when absent.
    pub fn update<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T),
    {
        let mut value: T = self.get_sync(key).unwrap_or_default();
        f(&mut value);
        self.set_sync(key, &value)?;
        Ok(value)
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let context = Context::new();
        context.set("round", 3u32).await.unwrap();
        let round: Option<u32> = context.get("round").await;
        assert_eq!(round, Some(3));

        // Wrong type reads as absent
        let wrong: Option<String> = context.get("round").await;
        assert!(wrong.is_none());
    }

    #[test]
    fn test_update_starts_from_default() {
        let context = Context::new();
        let items = context
            .update::<Vec<String>, _>("items", |v| v.push("a".to_string()))
            .unwrap();
        assert_eq!(items, vec!["a".to_string()]);

        let items = context
            .update::<Vec<String>, _>("items", |v| v.push("b".to_string()))
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_require_missing_key() {
        let context = Context::new();
        let err = context.require::<String>("findings").unwrap_err();
        assert!(matches!(err, FlowError::ContextError(_)));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let context = Context::new();
        let other = context.clone();
        other.set("converged", true).await.unwrap();
        assert!(context.contains("converged"));
        assert!(context.remove("converged").await.is_some());
        assert!(!other.contains("converged"));
    }
}
