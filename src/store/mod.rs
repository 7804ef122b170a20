mod file;
mod memory;
mod redis;

pub use self::file::FileStore;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::cli::Args;
use crate::error::{ Result, SessionError };
use async_trait::async_trait;
use log::{ info, warn };
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const TRANSCRIPT_KEY: &str = "gymai_messages";
pub const PROFILE_KEY: &str = "gymai_profile";
pub const THEME_KEY: &str = "gymai_theme";

/// Byte storage that survives restarts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

pub fn create_store(args: &Args) -> Result<Arc<dyn KeyValueStore>> {
    match args.store_type.to_lowercase().as_str() {
        "file" => Ok(Arc::new(FileStore::new(&args.data_dir))),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "redis" => {
            let store = RedisStore::new(&args.store_redis_url, &args.store_redis_prefix)?;
            Ok(Arc::new(store))
        }
        other => Err(SessionError::Config(format!("Unsupported store type: {}", other))),
    }
}

pub fn initialize_store(args: &Args) -> Result<Arc<dyn KeyValueStore>> {
    match args.store_type.to_lowercase().as_str() {
        "redis" => info!("Session state will be stored in redis at {}", args.store_redis_url),
        "file" => info!("Session state will be stored in: {}", args.data_dir),
        other => info!("Session state will be stored in: {}", other),
    }
    create_store(args)
}

/// Reads a JSON value, treating a missing key, a read failure or malformed
/// data as absent.
pub async fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            return None;
        }
        Err(e) => {
            warn!("Failed to read '{}' from store: {}", key, e);
            return None;
        }
    };
    match serde_json::from_slice::<T>(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding malformed '{}' entry: {}", key, e);
            None
        }
    }
}

pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T
) -> Result<()> {
    let raw = serde_json::to_vec(value)?;
    store.set(key, &raw).await
}
