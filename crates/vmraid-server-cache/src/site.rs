// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::store::CacheStore;

/// A view of the shared store with every key prefixed by `"<site>|"`.
///
/// Values are stored as JSON so any process can read what another wrote.
#[derive(Clone)]
pub struct SiteCache {
	store: Arc<dyn CacheStore>,
	site: String,
}

impl SiteCache {
	pub fn new(store: Arc<dyn CacheStore>, site: impl Into<String>) -> Self {
		Self {
			store,
			site: site.into(),
		}
	}

	pub fn site(&self) -> &str {
		&self.site
	}

	pub fn store(&self) -> &Arc<dyn CacheStore> {
		&self.store
	}

	pub fn make_key(&self, key: &str) -> String {
		format!("{}|{}", self.site, key)
	}

	/// Key scoped to a single user, for per-user values that are not hashes.
	pub fn user_key(user: &str, key: &str) -> String {
		format!("user:{user}:{key}")
	}

	pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
		match self.store.get(&self.make_key(key)).await? {
			Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
			None => Ok(None),
		}
	}

	pub async fn set_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
		let raw = serde_json::to_string(value)?;
		self.store.set(&self.make_key(key), &raw).await
	}

	pub async fn delete_value(&self, keys: &[&str]) -> Result<u64> {
		let keys: Vec<String> = keys.iter().map(|k| self.make_key(k)).collect();
		self.store.delete(&keys).await
	}

	/// Delete every key starting with `prefix`.
	pub async fn delete_keys(&self, prefix: &str) -> Result<u64> {
		self.store.delete_prefix(&self.make_key(prefix)).await
	}

	pub async fn exists(&self, key: &str) -> Result<bool> {
		self.store.exists(&self.make_key(key)).await
	}

	pub async fn hget_value<T: DeserializeOwned>(&self, name: &str, field: &str) -> Result<Option<T>> {
		match self.store.hget(&self.make_key(name), field).await? {
			Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
			None => Ok(None),
		}
	}

	pub async fn hset_value<T: Serialize + ?Sized>(
		&self,
		name: &str,
		field: &str,
		value: &T,
	) -> Result<()> {
		let raw = serde_json::to_string(value)?;
		self.store.hset(&self.make_key(name), field, &raw).await
	}

	pub async fn hdel(&self, name: &str, fields: &[&str]) -> Result<u64> {
		let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
		self.store.hdel(&self.make_key(name), &fields).await
	}

	pub async fn hkeys(&self, name: &str) -> Result<Vec<String>> {
		self.store.hkeys(&self.make_key(name)).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::MemoryCache;
	use serde_json::json;

	#[tokio::test]
	async fn test_sites_do_not_share_keys() {
		let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
		let a = SiteCache::new(store.clone(), "a.local");
		let b = SiteCache::new(store.clone(), "b.local");

		a.set_value("time_zone", "Asia/Kolkata").await.unwrap();
		assert_eq!(
			a.get_value::<String>("time_zone").await.unwrap().as_deref(),
			Some("Asia/Kolkata")
		);
		assert_eq!(b.get_value::<String>("time_zone").await.unwrap(), None);
		assert!(store.exists("a.local|time_zone").await.unwrap());
	}

	#[tokio::test]
	async fn test_hash_values_round_trip_json() {
		let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
		let cache = SiteCache::new(store, "a.local");

		cache
			.hset_value("roles", "alice", &json!(["System Manager"]))
			.await
			.unwrap();
		let roles: Vec<String> = cache.hget_value("roles", "alice").await.unwrap().unwrap();
		assert_eq!(roles, vec!["System Manager"]);
		assert_eq!(cache.hkeys("roles").await.unwrap(), vec!["alice"]);

		cache.hdel("roles", &["alice"]).await.unwrap();
		assert!(cache
			.hget_value::<Vec<String>>("roles", "alice")
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_delete_keys_by_user_prefix() {
		let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
		let cache = SiteCache::new(store, "a.local");
		cache
			.set_value(&SiteCache::user_key("alice", "recent"), &1)
			.await
			.unwrap();
		cache
			.set_value(&SiteCache::user_key("bob", "recent"), &1)
			.await
			.unwrap();

		assert_eq!(cache.delete_keys("user:alice").await.unwrap(), 1);
		assert!(cache.exists("user:bob:recent").await.unwrap());
	}
}
