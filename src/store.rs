use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;

/// External ordered-list store the queues are persisted in. Elements are
/// opaque strings (the queue layer stores JSON); every method is one
/// atomic store operation. A Redis list maps onto this verbatim; the
/// in-memory implementation below serves tests and single-process runs.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Appends values in order, returning the new list length.
    async fn push_back(&self, key: &str, values: Vec<String>) -> Result<usize, StoreError>;

    async fn len(&self, key: &str) -> Result<usize, StoreError>;

    async fn get(&self, key: &str, index: usize) -> Result<Option<String>, StoreError>;

    async fn all(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Removes the first element equal to `value`; false if absent.
    async fn remove_value(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn clear(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryListStore {
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<String>>> {
        self.lists.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<String>>> {
        self.lists.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn push_back(&self, key: &str, values: Vec<String>) -> Result<usize, StoreError> {
        let mut lists = self.write();
        let list = lists.entry(key.to_string()).or_default();
        list.extend(values);
        Ok(list.len())
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.read().get(key).map_or(0, Vec::len))
    }

    async fn get(&self, key: &str, index: usize) -> Result<Option<String>, StoreError> {
        Ok(self.read().get(key).and_then(|list| list.get(index).cloned()))
    }

    async fn all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.read().get(key).cloned().unwrap_or_default())
    }

    async fn remove_value(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut lists = self.write();
        let Some(list) = lists.get_mut(key) else {
            return Ok(false);
        };
        match list.iter().position(|element| element == value) {
            Some(index) => {
                list.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_back_extends_in_order() {
        let store = MemoryListStore::new();
        store
            .push_back("k", vec!["a".into(), "b".into()])
            .await
            .unwrap();
        let len = store.push_back("k", vec!["c".into()]).await.unwrap();

        assert_eq!(len, 3);
        assert_eq!(store.all("k").await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.get("k", 1).await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.get("k", 3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_value_takes_first_occurrence_only() {
        let store = MemoryListStore::new();
        store
            .push_back("k", vec!["x".into(), "y".into(), "x".into()])
            .await
            .unwrap();

        assert!(store.remove_value("k", "x").await.unwrap());
        assert_eq!(store.all("k").await.unwrap(), vec!["y", "x"]);
        assert!(!store.remove_value("k", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn clear_and_missing_keys() {
        let store = MemoryListStore::new();
        assert_eq!(store.len("nope").await.unwrap(), 0);
        assert!(store.all("nope").await.unwrap().is_empty());

        store.push_back("k", vec!["a".into()]).await.unwrap();
        store.clear("k").await.unwrap();
        assert_eq!(store.len("k").await.unwrap(), 0);
    }
}
