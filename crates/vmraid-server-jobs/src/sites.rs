// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use sqlx::SqlitePool;
use tracing::{info, instrument};
use vmraid_server_config::SitesConfig;
use vmraid_server_db::{
	create_pool, run_site_migrations, DefaultsRepository, DocumentRepository, ErrorLogRepository,
	ScheduledJobRepository, SystemSettingsRepository,
};

use crate::error::{JobError, Result};

/// One site and its database.
#[derive(Clone)]
pub struct Site {
	name: String,
	pool: SqlitePool,
}

impl std::fmt::Debug for Site {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Site").field("name", &self.name).finish()
	}
}

impl Site {
	pub fn new(name: impl Into<String>, pool: SqlitePool) -> Self {
		Self {
			name: name.into(),
			pool,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub fn scheduled_jobs(&self) -> ScheduledJobRepository {
		ScheduledJobRepository::new(self.pool.clone())
	}

	pub fn settings(&self) -> SystemSettingsRepository {
		SystemSettingsRepository::new(self.pool.clone())
	}

	pub fn error_log(&self) -> ErrorLogRepository {
		ErrorLogRepository::new(self.pool.clone())
	}

	pub fn defaults(&self) -> DefaultsRepository {
		DefaultsRepository::new(self.pool.clone())
	}

	pub fn documents(&self) -> DocumentRepository {
		DocumentRepository::new(self.pool.clone())
	}
}

/// Every site served by this process, by name.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
	sites: BTreeMap<String, Site>,
}

impl SiteRegistry {
	pub fn new(sites: impl IntoIterator<Item = Site>) -> Self {
		Self {
			sites: sites
				.into_iter()
				.map(|site| (site.name.clone(), site))
				.collect(),
		}
	}

	/// Open and migrate every configured site database.
	#[instrument(skip(config))]
	pub async fn connect(config: &SitesConfig) -> Result<Self> {
		let mut sites = Vec::with_capacity(config.sites.len());
		for entry in &config.sites {
			let pool = create_pool(&entry.database_url).await?;
			run_site_migrations(&pool).await?;
			sites.push(Site::new(&entry.name, pool));
		}
		info!(count = sites.len(), "Sites connected");
		Ok(Self::new(sites))
	}

	pub fn get(&self, name: &str) -> Result<&Site> {
		self.sites
			.get(name)
			.ok_or_else(|| JobError::UnknownSite(name.to_string()))
	}

	pub fn names(&self) -> Vec<String> {
		self.sites.keys().cloned().collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Site> {
		self.sites.values()
	}

	pub fn len(&self) -> usize {
		self.sites.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sites.is_empty()
	}

	/// The named sites, or all of them when `names` is empty.
	pub fn select(&self, names: &[String]) -> Result<Vec<Site>> {
		if names.is_empty() {
			return Ok(self.sites.values().cloned().collect());
		}
		names
			.iter()
			.map(|name| self.get(name).cloned())
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use vmraid_server_config::SiteEntry;

	#[tokio::test]
	async fn test_connect_migrates_sites() {
		let dir = tempfile::tempdir().unwrap();
		let url = |name: &str| format!("sqlite:{}", dir.path().join(name).display());
		let config = SitesConfig {
			sites: vec![
				SiteEntry::new("a.local", url("a.db")),
				SiteEntry::new("b.local", url("b.db")),
			],
		};

		let registry = SiteRegistry::connect(&config).await.unwrap();
		assert_eq!(registry.names(), vec!["a.local", "b.local"]);

		let site = registry.get("a.local").unwrap();
		assert!(site.scheduled_jobs().list_all().await.unwrap().is_empty());
		assert!(matches!(registry.get("c.local"), Err(JobError::UnknownSite(_))));
	}

	#[tokio::test]
	async fn test_select() {
		let dir = tempfile::tempdir().unwrap();
		let url = |name: &str| format!("sqlite:{}", dir.path().join(name).display());
		let config = SitesConfig {
			sites: vec![
				SiteEntry::new("a.local", url("a.db")),
				SiteEntry::new("b.local", url("b.db")),
			],
		};
		let registry = SiteRegistry::connect(&config).await.unwrap();

		assert_eq!(registry.select(&[]).unwrap().len(), 2);
		let picked = registry.select(&["b.local".to_string()]).unwrap();
		assert_eq!(picked.len(), 1);
		assert_eq!(picked[0].name(), "b.local");
		assert!(registry.select(&["nope".to_string()]).is_err());
	}
}
