// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Invalidation rules over a [`SiteCache`].
//!
//! Broader tiers clear the tiers derived from them first: global clears
//! doctype then website caches before its own keys, and clearing every
//! user's cache ends with a global clear.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use vmraid_server_db::{DbError, Document, DocumentStore, Filters};

use crate::error::{CacheError, Result};
use crate::keys::{
	doctype_map_key, notification_count_key, scrub, CHAIR_CACHE_KEYS, COMMON_DEFAULT_KEYS,
	DEFAULTS_KEY, DOCTYPE_CACHE_KEYS, DOCTYPE_MAP_KEYS, DOCTYPE_SHARED_KEYS, DOCUMENT_CACHE_KEY,
	DOMAIN_CACHE_KEYS, GLOBAL_CACHE_KEYS, USER_CACHE_KEYS, WEBSITE_CACHE_KEYS,
};
use crate::site::SiteCache;

const GUEST: &str = "Guest";

/// Module ownership derived from the installed apps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMap {
	pub app_modules: BTreeMap<String, Vec<String>>,
	pub module_app: BTreeMap<String, String>,
}

impl ModuleMap {
	/// Build from `(app, module names)` pairs; module names are scrubbed.
	pub fn build(apps: &BTreeMap<String, Vec<String>>) -> Self {
		let mut map = ModuleMap::default();
		for (app, modules) in apps {
			let entry = map.app_modules.entry(app.clone()).or_default();
			for module in modules {
				let module = scrub(module);
				map.module_app.insert(module.clone(), app.clone());
				entry.push(module);
			}
		}
		map
	}

	pub fn app_for(&self, module: &str) -> Option<&str> {
		self.module_app.get(&scrub(module)).map(String::as_str)
	}
}

#[derive(Clone)]
pub struct CacheManager {
	cache: SiteCache,
	documents: Arc<dyn DocumentStore>,
	installed_modules: Arc<BTreeMap<String, Vec<String>>>,
	notification_groups: Arc<Vec<String>>,
	in_install: bool,
}

impl CacheManager {
	pub fn new(cache: SiteCache, documents: Arc<dyn DocumentStore>) -> Self {
		Self {
			cache,
			documents,
			installed_modules: Arc::new(BTreeMap::new()),
			notification_groups: Arc::new(Vec::new()),
			in_install: false,
		}
	}

	/// Apps and the modules each one ships, used by [`Self::setup_module_map`].
	pub fn with_installed_modules(mut self, modules: BTreeMap<String, Vec<String>>) -> Self {
		self.installed_modules = Arc::new(modules);
		self
	}

	/// Doctypes and modules that keep a cached notification count.
	pub fn with_notification_groups(mut self, groups: Vec<String>) -> Self {
		self.notification_groups = Arc::new(groups);
		self
	}

	/// While installing, notification counts and the `defaults` hash are left alone.
	pub fn in_install(mut self, in_install: bool) -> Self {
		self.in_install = in_install;
		self
	}

	pub fn cache(&self) -> &SiteCache {
		&self.cache
	}

	/// Read-through cache of `doctype` rows matching `filters`, stored under
	/// field `name` of the doctype's map hash.
	///
	/// A missing table yields an empty list and nothing is cached, so the
	/// lookup can run before the doctype is installed.
	#[instrument(skip(self, filters), fields(site = %self.cache.site()))]
	pub async fn get_doctype_map(
		&self,
		doctype: &str,
		name: &str,
		filters: &Filters,
		order_by: Option<&str>,
	) -> Result<Vec<Document>> {
		let key = doctype_map_key(doctype);
		if let Some(items) = self.cache.hget_value::<Vec<Document>>(&key, name).await? {
			return Ok(items);
		}

		match self.documents.get_all(doctype, filters, order_by).await {
			Ok(items) => {
				self.cache.hset_value(&key, name, &items).await?;
				Ok(items)
			}
			Err(DbError::TableMissing(table)) => {
				debug!(%table, "doctype table missing, not caching");
				Ok(Vec::new())
			}
			Err(e) => Err(CacheError::Database(e)),
		}
	}

	#[instrument(skip(self), fields(site = %self.cache.site()))]
	pub async fn clear_doctype_map(&self, doctype: &str, name: &str) -> Result<()> {
		self.cache.hdel(&doctype_map_key(doctype), &[name]).await?;
		Ok(())
	}

	/// Clear user-tier caches for one user, or for everyone followed by the global tier.
	#[instrument(skip(self), fields(site = %self.cache.site()))]
	pub async fn clear_user_cache(&self, user: Option<&str>) -> Result<()> {
		// Notification counts are rebuilt from the user and global tiers.
		self.clear_notifications(user).await?;

		match user {
			Some(user) => self.clear_single_user(user).await,
			None => {
				self.cache.delete_value(USER_CACHE_KEYS).await?;
				self.clear_defaults_cache(None).await?;
				self.clear_global_cache().await
			}
		}
	}

	async fn clear_single_user(&self, user: &str) -> Result<()> {
		for name in USER_CACHE_KEYS {
			self.cache.hdel(name, &[user]).await?;
		}
		self.cache.delete_keys(&format!("user:{user}:")).await?;
		self.clear_defaults_cache(Some(user)).await
	}

	#[instrument(skip(self), fields(site = %self.cache.site()))]
	pub async fn clear_domain_cache(&self) -> Result<()> {
		self.cache.delete_value(DOMAIN_CACHE_KEYS).await?;
		Ok(())
	}

	/// Doctype cache, website cache, global and chair keys, then the module map.
	#[instrument(skip(self), fields(site = %self.cache.site()))]
	pub async fn clear_global_cache(&self) -> Result<()> {
		self.clear_doctype_cache(None).await?;
		self.clear_website_cache().await?;
		self.cache.delete_value(GLOBAL_CACHE_KEYS).await?;
		self.cache.delete_value(DOCTYPE_MAP_KEYS).await?;
		self.cache.delete_value(CHAIR_CACHE_KEYS).await?;
		self.setup_module_map().await?;
		debug!("global cache cleared");
		Ok(())
	}

	#[instrument(skip(self), fields(site = %self.cache.site()))]
	pub async fn clear_defaults_cache(&self, user: Option<&str>) -> Result<()> {
		match user {
			Some(user) => {
				let mut parents = vec![user];
				parents.extend(COMMON_DEFAULT_KEYS);
				self.cache.hdel(DEFAULTS_KEY, &parents).await?;
			}
			None if !self.in_install => {
				self.cache.delete_value(&[DEFAULTS_KEY]).await?;
			}
			None => {}
		}
		Ok(())
	}

	/// Clear doctype-tier caches for one doctype and every doctype embedding it
	/// as a child table, or for all doctypes.
	#[instrument(skip(self), fields(site = %self.cache.site()))]
	pub async fn clear_doctype_cache(&self, doctype: Option<&str>) -> Result<()> {
		self.cache.delete_value(DOCTYPE_SHARED_KEYS).await?;

		match doctype {
			Some(doctype) => {
				self.clear_single_doctype(doctype).await?;
				let parents = match self.documents.table_parents(doctype).await {
					Ok(parents) => parents,
					Err(DbError::TableMissing(_)) => Vec::new(),
					Err(e) => return Err(e.into()),
				};
				for parent in parents {
					self.clear_single_doctype(&parent).await?;
				}
				self.delete_notification_count_for(doctype).await?;
			}
			None => {
				self.cache.delete_value(DOCTYPE_CACHE_KEYS).await?;
				self.cache.delete_value(DOCTYPE_MAP_KEYS).await?;
			}
		}

		self.clear_document_cache().await
	}

	async fn clear_single_doctype(&self, doctype: &str) -> Result<()> {
		for name in DOCTYPE_CACHE_KEYS.iter().chain(DOCTYPE_MAP_KEYS) {
			self.cache.hdel(name, &[doctype]).await?;
		}
		Ok(())
	}

	pub async fn clear_document_cache(&self) -> Result<()> {
		self.cache.delete_value(&[DOCUMENT_CACHE_KEY]).await?;
		Ok(())
	}

	#[instrument(skip(self), fields(site = %self.cache.site()))]
	pub async fn clear_website_cache(&self) -> Result<()> {
		self.cache.delete_value(&["sitemap_routes"]).await?;
		self.clear_notifications(Some(GUEST)).await?;
		self.clear_single_user(GUEST).await?;
		self.cache.delete_value(WEBSITE_CACHE_KEYS).await?;
		Ok(())
	}

	/// Drop cached notification counts, for one user or all of them.
	pub async fn clear_notifications(&self, user: Option<&str>) -> Result<()> {
		if self.in_install {
			return Ok(());
		}
		for group in self.notification_groups.iter() {
			let key = notification_count_key(group);
			match user {
				Some(user) => {
					self.cache.hdel(&key, &[user]).await?;
				}
				None => {
					self.cache.delete_value(&[key.as_str()]).await?;
				}
			}
		}
		Ok(())
	}

	pub async fn delete_notification_count_for(&self, doctype: &str) -> Result<()> {
		self.cache
			.delete_value(&[notification_count_key(doctype).as_str()])
			.await?;
		Ok(())
	}

	/// Load the module map from cache, rebuilding it from the installed apps
	/// when either half is missing.
	#[instrument(skip(self), fields(site = %self.cache.site()))]
	pub async fn setup_module_map(&self) -> Result<ModuleMap> {
		let app_modules = self
			.cache
			.get_value::<BTreeMap<String, Vec<String>>>("app_modules")
			.await?;
		let module_app = self
			.cache
			.get_value::<BTreeMap<String, String>>("module_app")
			.await?;

		if let (Some(app_modules), Some(module_app)) = (app_modules, module_app) {
			if !app_modules.is_empty() && !module_app.is_empty() {
				return Ok(ModuleMap {
					app_modules,
					module_app,
				});
			}
		}

		let map = ModuleMap::build(&self.installed_modules);
		self.cache.set_value("app_modules", &map.app_modules).await?;
		self.cache.set_value("module_app", &map.module_app).await?;
		Ok(map)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::{CacheStore, MemoryCache};
	use async_trait::async_trait;
	use serde_json::json;
	use std::sync::Mutex;
	use vmraid_server_db::testing::TestDb;
	use vmraid_server_db::DocumentRepository;

	/// Document store that records every call.
	#[derive(Default)]
	struct CountingDocuments {
		calls: Mutex<Vec<String>>,
		parents: BTreeMap<String, Vec<String>>,
	}

	#[async_trait]
	impl DocumentStore for CountingDocuments {
		async fn get_all(
			&self,
			doctype: &str,
			_filters: &Filters,
			_order_by: Option<&str>,
		) -> vmraid_server_db::Result<Vec<Document>> {
			self.calls.lock().unwrap().push(doctype.to_string());
			if doctype == "Missing" {
				return Err(DbError::TableMissing("tabMissing".into()));
			}
			let mut doc = Document::new();
			doc.insert("name".into(), json!("rule-1"));
			Ok(vec![doc])
		}

		async fn table_parents(&self, doctype: &str) -> vmraid_server_db::Result<Vec<String>> {
			Ok(self.parents.get(doctype).cloned().unwrap_or_default())
		}
	}

	fn manager_with(documents: Arc<dyn DocumentStore>) -> (CacheManager, Arc<MemoryCache>) {
		let store = Arc::new(MemoryCache::new());
		let cache = SiteCache::new(store.clone() as Arc<dyn CacheStore>, "site1.local");
		(CacheManager::new(cache, documents), store)
	}

	#[tokio::test]
	async fn test_doctype_map_reads_through_once() {
		let documents = Arc::new(CountingDocuments::default());
		let (manager, _) = manager_with(documents.clone());

		let first = manager
			.get_doctype_map("Assignment Rule", "ToDo", &Filters::new(), None)
			.await
			.unwrap();
		let second = manager
			.get_doctype_map("Assignment Rule", "ToDo", &Filters::new(), None)
			.await
			.unwrap();
		assert_eq!(first, second);
		assert_eq!(documents.calls.lock().unwrap().len(), 1);

		manager.clear_doctype_map("Assignment Rule", "ToDo").await.unwrap();
		manager
			.get_doctype_map("Assignment Rule", "ToDo", &Filters::new(), None)
			.await
			.unwrap();
		assert_eq!(documents.calls.lock().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_doctype_map_missing_table_is_empty_and_uncached() {
		let documents = Arc::new(CountingDocuments::default());
		let (manager, store) = manager_with(documents.clone());

		let items = manager
			.get_doctype_map("Missing", "ToDo", &Filters::new(), None)
			.await
			.unwrap();
		assert!(items.is_empty());
		assert!(store.is_empty().await);
	}

	#[tokio::test]
	async fn test_doctype_map_against_site_database() {
		let db = TestDb::site().await;
		sqlx::query(r#"CREATE TABLE "tabAssignment Rule" (name TEXT PRIMARY KEY, document_type TEXT)"#)
			.execute(&db.pool)
			.await
			.unwrap();
		sqlx::query(r#"INSERT INTO "tabAssignment Rule" VALUES ('r1', 'ToDo'), ('r2', 'Task')"#)
			.execute(&db.pool)
			.await
			.unwrap();
		let (manager, _) = manager_with(Arc::new(DocumentRepository::new(db.pool.clone())));

		let filters: Filters = [("document_type".to_string(), json!("ToDo"))]
			.into_iter()
			.collect();
		let items = manager
			.get_doctype_map("Assignment Rule", "ToDo", &filters, None)
			.await
			.unwrap();
		assert_eq!(items.len(), 1);
		assert_eq!(items[0]["name"], "r1");

		let cached: Vec<Document> = manager
			.cache()
			.hget_value("assignment_rule_map", "ToDo")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(cached, items);
	}

	#[tokio::test]
	async fn test_clear_single_user_cache_keeps_others() {
		let (manager, _) = manager_with(Arc::new(CountingDocuments::default()));
		let cache = manager.cache().clone();
		for user in ["alice", "bob"] {
			cache.hset_value("roles", user, &json!(["Guest"])).await.unwrap();
			cache.hset_value(DEFAULTS_KEY, user, &json!({})).await.unwrap();
			cache
				.set_value(&SiteCache::user_key(user, "recent"), &json!([]))
				.await
				.unwrap();
		}
		cache.hset_value(DEFAULTS_KEY, "__default", &json!({})).await.unwrap();
		cache.set_value("time_zone", "UTC").await.unwrap();

		manager.clear_user_cache(Some("alice")).await.unwrap();

		assert_eq!(cache.hkeys("roles").await.unwrap(), vec!["bob"]);
		assert_eq!(cache.hkeys(DEFAULTS_KEY).await.unwrap(), vec!["bob"]);
		assert!(!cache.exists("user:alice:recent").await.unwrap());
		assert!(cache.exists("user:bob:recent").await.unwrap());
		assert!(cache.exists("time_zone").await.unwrap());
	}

	#[tokio::test]
	async fn test_clear_all_users_clears_global_tier() {
		let (manager, _) = manager_with(Arc::new(CountingDocuments::default()));
		let cache = manager.cache().clone();
		cache.hset_value("roles", "alice", &json!([])).await.unwrap();
		cache.set_value("time_zone", "UTC").await.unwrap();
		cache.hset_value("meta", "ToDo", &json!({})).await.unwrap();
		cache.set_value("website_page", &json!({})).await.unwrap();
		cache.set_value("assets_json", &json!({})).await.unwrap();

		manager.clear_user_cache(None).await.unwrap();

		for key in ["roles", "time_zone", "meta", "website_page", "assets_json"] {
			assert!(!cache.exists(key).await.unwrap(), "{key} survived");
		}
		// Rebuilt by setup_module_map.
		assert!(cache.exists("app_modules").await.unwrap());
	}

	#[tokio::test]
	async fn test_clear_doctype_cache_cascades_to_parents() {
		let documents = CountingDocuments {
			parents: [("Sales Order Item".to_string(), vec!["Sales Order".to_string()])]
				.into_iter()
				.collect(),
			..Default::default()
		};
		let (manager, _) = manager_with(Arc::new(documents));
		let manager = manager.with_notification_groups(vec!["Sales Order Item".into()]);
		let cache = manager.cache().clone();
		for doctype in ["Sales Order Item", "Sales Order", "ToDo"] {
			cache.hset_value("meta", doctype, &json!({})).await.unwrap();
		}
		cache.set_value("is_table", &json!([])).await.unwrap();
		cache.set_value(DOCUMENT_CACHE_KEY, &json!({})).await.unwrap();
		cache
			.hset_value("notification_count:Sales Order Item", "alice", &3)
			.await
			.unwrap();

		manager
			.clear_doctype_cache(Some("Sales Order Item"))
			.await
			.unwrap();

		assert_eq!(cache.hkeys("meta").await.unwrap(), vec!["ToDo"]);
		assert!(!cache.exists("is_table").await.unwrap());
		assert!(!cache.exists(DOCUMENT_CACHE_KEY).await.unwrap());
		assert!(!cache.exists("notification_count:Sales Order Item").await.unwrap());
	}

	#[tokio::test]
	async fn test_clear_notifications_per_user() {
		let (manager, _) = manager_with(Arc::new(CountingDocuments::default()));
		let manager = manager.with_notification_groups(vec!["ToDo".into(), "Event".into()]);
		let cache = manager.cache().clone();
		for group in ["ToDo", "Event"] {
			for user in ["alice", "bob"] {
				cache
					.hset_value(&notification_count_key(group), user, &1)
					.await
					.unwrap();
			}
		}

		manager.clear_notifications(Some("alice")).await.unwrap();
		assert_eq!(cache.hkeys("notification_count:ToDo").await.unwrap(), vec!["bob"]);

		manager.clear_notifications(None).await.unwrap();
		assert!(!cache.exists("notification_count:Event").await.unwrap());
	}

	#[tokio::test]
	async fn test_in_install_keeps_defaults_and_counts() {
		let (manager, _) = manager_with(Arc::new(CountingDocuments::default()));
		let manager = manager
			.with_notification_groups(vec!["ToDo".into()])
			.in_install(true);
		let cache = manager.cache().clone();
		cache.hset_value(DEFAULTS_KEY, "__default", &json!({})).await.unwrap();
		cache
			.hset_value("notification_count:ToDo", "alice", &1)
			.await
			.unwrap();

		manager.clear_defaults_cache(None).await.unwrap();
		manager.clear_notifications(None).await.unwrap();

		assert!(cache.exists(DEFAULTS_KEY).await.unwrap());
		assert!(cache.exists("notification_count:ToDo").await.unwrap());
	}

	#[tokio::test]
	async fn test_clear_domain_cache() {
		let (manager, _) = manager_with(Arc::new(CountingDocuments::default()));
		let cache = manager.cache().clone();
		cache.set_value("domain_restricted_pages", &json!([])).await.unwrap();
		cache.set_value("active_domains", &json!([])).await.unwrap();

		manager.clear_domain_cache().await.unwrap();
		assert!(!cache.exists("domain_restricted_pages").await.unwrap());
		assert!(cache.exists("active_domains").await.unwrap());
	}

	#[tokio::test]
	async fn test_setup_module_map_prefers_cache() {
		let (manager, _) = manager_with(Arc::new(CountingDocuments::default()));
		let manager = manager.with_installed_modules(
			[(
				"vmraid".to_string(),
				vec!["Core".to_string(), "Website Settings".to_string()],
			)]
			.into_iter()
			.collect(),
		);

		let map = manager.setup_module_map().await.unwrap();
		assert_eq!(map.app_for("Website Settings"), Some("vmraid"));
		assert_eq!(map.app_modules["vmraid"], vec!["core", "website_settings"]);

		let cache = manager.cache().clone();
		let mut stale = map.clone();
		stale.module_app.insert("custom".into(), "other".into());
		cache.set_value("module_app", &stale.module_app).await.unwrap();
		assert_eq!(manager.setup_module_map().await.unwrap(), stale);
	}
}
