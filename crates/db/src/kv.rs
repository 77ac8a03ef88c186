//! Ephemeral key-value storage for carts and conversation logs.
//!
//! Values are opaque strings (callers store JSON). Every key may carry a TTL;
//! the in-memory backend evicts lazily on access, Redis natively.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key-value store connection failed: {0}")]
    Connection(String),
    #[error("key-value store command failed: {0}")]
    Backend(String),
    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(String),
    #[error("key `{0}` holds a value of another type")]
    WrongType(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    /// Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    /// Resets the TTL of a live key. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub fn cart_key(user_id: &str, cart_id: &str) -> String {
    format!("cart:{user_id}:{cart_id}")
}

pub fn cart_index_key(user_id: &str) -> String {
    format!("cart:{user_id}:list")
}

pub fn conversation_key(user_id: &str) -> String {
    format!("conversation:{user_id}")
}

pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

pub async fn store_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StoreError> {
    let raw =
        serde_json::to_string(value).map_err(|e| StoreError::Serialization(format!("{key}: {e}")))?;
    store.set(key, &raw, ttl).await
}

#[derive(Clone, Debug)]
enum StoredValue {
    Text(String),
    Set(BTreeSet<String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Process-local store. Uses the tokio clock so tests can pause and advance time.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.live_entry(key).await {
            Some(Entry { value: StoredValue::Text(value), .. }) => Ok(Some(value)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let entry = Entry {
            value: StoredValue::Text(value.to_string()),
            expires_at: Some(Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry { value: StoredValue::Set(BTreeSet::new()), expires_at: None });
        if !entry.is_live(now) {
            *entry = Entry { value: StoredValue::Set(BTreeSet::new()), expires_at: None };
        }
        match &mut entry.value {
            StoredValue::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            StoredValue::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.live_entry(key).await {
            Some(Entry { value: StoredValue::Set(members), .. }) => {
                Ok(members.into_iter().collect())
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let now_empty = match entries.get_mut(key).map(|entry| &mut entry.value) {
            Some(StoredValue::Set(members)) => {
                members.remove(member);
                members.is_empty()
            }
            Some(StoredValue::Text(_)) => return Err(StoreError::WrongType(key.to_string())),
            None => false,
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
