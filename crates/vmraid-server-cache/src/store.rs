// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Raw key-value store shared by every site and worker process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CacheError, Result};

/// String values plus hashes of string fields.
///
/// Keys passed here are already namespaced; see [`crate::SiteCache`].
#[async_trait]
pub trait CacheStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>>;
	async fn set(&self, key: &str, value: &str) -> Result<()>;
	/// Returns the number of keys that existed.
	async fn delete(&self, keys: &[String]) -> Result<u64>;
	async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
	async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
	async fn exists(&self, key: &str) -> Result<bool>;
	async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
	async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
	async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;
	async fn hkeys(&self, key: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
enum Entry {
	Value(String),
	Hash(HashMap<String, String>),
}

/// Process-local store used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryCache {
	entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}
}

fn wrong_type(key: &str) -> CacheError {
	CacheError::Backend(format!(
		"WRONGTYPE operation against key {key} holding the wrong kind of value"
	))
}

#[async_trait]
impl CacheStore for MemoryCache {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		match self.entries.read().await.get(key) {
			None => Ok(None),
			Some(Entry::Value(v)) => Ok(Some(v.clone())),
			Some(Entry::Hash(_)) => Err(wrong_type(key)),
		}
	}

	async fn set(&self, key: &str, value: &str) -> Result<()> {
		self.entries
			.write()
			.await
			.insert(key.to_string(), Entry::Value(value.to_string()));
		Ok(())
	}

	async fn delete(&self, keys: &[String]) -> Result<u64> {
		let mut entries = self.entries.write().await;
		Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count() as u64)
	}

	async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
		let mut entries = self.entries.write().await;
		let before = entries.len();
		entries.retain(|k, _| !k.starts_with(prefix));
		Ok((before - entries.len()) as u64)
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
		Ok(self
			.entries
			.read()
			.await
			.keys()
			.filter(|k| k.starts_with(prefix))
			.cloned()
			.collect())
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		Ok(self.entries.read().await.contains_key(key))
	}

	async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
		match self.entries.read().await.get(key) {
			None => Ok(None),
			Some(Entry::Hash(h)) => Ok(h.get(field).cloned()),
			Some(Entry::Value(_)) => Err(wrong_type(key)),
		}
	}

	async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
		let mut entries = self.entries.write().await;
		match entries
			.entry(key.to_string())
			.or_insert_with(|| Entry::Hash(HashMap::new()))
		{
			Entry::Hash(h) => {
				h.insert(field.to_string(), value.to_string());
				Ok(())
			}
			Entry::Value(_) => Err(wrong_type(key)),
		}
	}

	async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
		let mut entries = self.entries.write().await;
		let (removed, now_empty) = match entries.get_mut(key) {
			None => return Ok(0),
			Some(Entry::Value(_)) => return Err(wrong_type(key)),
			Some(Entry::Hash(h)) => {
				let removed = fields.iter().filter(|f| h.remove(*f).is_some()).count();
				(removed as u64, h.is_empty())
			}
		};
		// Redis drops a hash once its last field is gone.
		if now_empty {
			entries.remove(key);
		}
		Ok(removed)
	}

	async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
		match self.entries.read().await.get(key) {
			None => Ok(Vec::new()),
			Some(Entry::Hash(h)) => {
				let mut fields: Vec<String> = h.keys().cloned().collect();
				fields.sort();
				Ok(fields)
			}
			Some(Entry::Value(_)) => Err(wrong_type(key)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_values() {
		let cache = MemoryCache::new();
		assert_eq!(cache.get("a").await.unwrap(), None);
		cache.set("a", "1").await.unwrap();
		assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
		assert!(cache.exists("a").await.unwrap());

		let deleted = cache
			.delete(&["a".to_string(), "missing".to_string()])
			.await
			.unwrap();
		assert_eq!(deleted, 1);
		assert!(!cache.exists("a").await.unwrap());
	}

	#[tokio::test]
	async fn test_hash_fields() {
		let cache = MemoryCache::new();
		cache.hset("roles", "alice", "[]").await.unwrap();
		cache.hset("roles", "bob", "[\"Admin\"]").await.unwrap();
		assert_eq!(cache.hkeys("roles").await.unwrap(), vec!["alice", "bob"]);
		assert_eq!(
			cache.hget("roles", "bob").await.unwrap().as_deref(),
			Some("[\"Admin\"]")
		);

		assert_eq!(cache.hdel("roles", &["alice".to_string()]).await.unwrap(), 1);
		assert_eq!(cache.hget("roles", "alice").await.unwrap(), None);
		assert_eq!(cache.hdel("roles", &["bob".to_string()]).await.unwrap(), 1);
		assert!(!cache.exists("roles").await.unwrap());
	}

	#[tokio::test]
	async fn test_prefix_operations() {
		let cache = MemoryCache::new();
		cache.set("s1|user:alice:a", "1").await.unwrap();
		cache.set("s1|user:alice:b", "1").await.unwrap();
		cache.set("s1|user:bob:a", "1").await.unwrap();
		cache.set("s2|user:alice:a", "1").await.unwrap();

		assert_eq!(cache.keys("s1|user:alice").await.unwrap().len(), 2);
		assert_eq!(cache.delete_prefix("s1|user:alice").await.unwrap(), 2);
		assert_eq!(cache.len().await, 2);
		assert!(cache.exists("s2|user:alice:a").await.unwrap());
	}

	#[tokio::test]
	async fn test_wrong_type() {
		let cache = MemoryCache::new();
		cache.set("k", "v").await.unwrap();
		assert!(matches!(
			cache.hset("k", "f", "v").await,
			Err(CacheError::Backend(_))
		));
		cache.hset("h", "f", "v").await.unwrap();
		assert!(cache.get("h").await.is_err());
	}
}
