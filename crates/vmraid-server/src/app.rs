// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Services shared by every command, built once from [`ServerConfig`].

use std::sync::Arc;

use vmraid_server_cache::{CacheManager, CacheStore, MemoryCache, SiteCache};
use vmraid_server_config::{CacheBackend, CacheConfig, ServerConfig};
use vmraid_server_db::{create_pool, run_queue_migrations, QueueRepository, QueueStore};
use vmraid_server_jobs::{
	Dispatcher, HandlerRegistry, QueueSet, RetryPolicy, ScheduleSettings, ScheduledJobRunner,
	SchedulerEvents, SchedulerPoller, Site, SiteRegistry,
};

use crate::jobs::{builtin_events, default_handlers};

pub struct AppState {
	pub config: ServerConfig,
	pub sites: Arc<SiteRegistry>,
	pub dispatcher: Arc<Dispatcher>,
	pub poller: Arc<SchedulerPoller>,
	pub cache: Arc<dyn CacheStore>,
}

impl AppState {
	/// Connect every site and the queue database, running migrations.
	pub async fn build(config: ServerConfig) -> anyhow::Result<Self> {
		let sites = Arc::new(SiteRegistry::connect(&config.sites).await?);

		let queue_pool = create_pool(&config.queue.database_url).await?;
		run_queue_migrations(&queue_pool).await?;
		let queue: Arc<dyn QueueStore> = Arc::new(QueueRepository::new(queue_pool));

		let cache = connect_cache(&config.cache).await?;
		Self::assemble(config, sites, queue, cache, default_handlers())
	}

	pub fn assemble(
		config: ServerConfig,
		sites: Arc<SiteRegistry>,
		queue: Arc<dyn QueueStore>,
		cache: Arc<dyn CacheStore>,
		handlers: HandlerRegistry,
	) -> anyhow::Result<Self> {
		let dispatcher = Arc::new(
			Dispatcher::new(queue, QueueSet::from_config(&config.queue), Arc::new(handlers))
				.with_retry_policy(RetryPolicy::from_config(&config.queue)),
		);
		let settings = ScheduleSettings::from_config(&config.scheduler)?;
		let runner = Arc::new(ScheduledJobRunner::new(Arc::clone(&dispatcher), settings));
		let poller = Arc::new(SchedulerPoller::new(
			Arc::clone(&sites),
			runner,
			config.scheduler.clone(),
		));

		Ok(Self {
			config,
			sites,
			dispatcher,
			poller,
			cache,
		})
	}

	pub fn runner(&self) -> &Arc<ScheduledJobRunner> {
		self.poller.runner()
	}

	/// The named sites, or every configured site.
	pub fn select_sites(&self, names: &[String]) -> anyhow::Result<Vec<Site>> {
		Ok(self.sites.select(names)?)
	}

	pub fn cache_manager(&self, site: &Site) -> CacheManager {
		CacheManager::new(
			SiteCache::new(Arc::clone(&self.cache), site.name()),
			Arc::new(site.documents()),
		)
	}

	/// Built-in events plus those declared in `scheduler.events_path`.
	pub fn scheduler_events(&self) -> anyhow::Result<SchedulerEvents> {
		let mut events = builtin_events();
		if let Some(path) = &self.config.scheduler.events_path {
			let declared = SchedulerEvents::load(path)?;
			for (event_type, methods) in declared.events {
				events.events.entry(event_type).or_default().extend(methods);
			}
			for (expression, methods) in declared.cron {
				events.cron.entry(expression).or_default().extend(methods);
			}
		}
		Ok(events)
	}
}

async fn connect_cache(config: &CacheConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
	match config.backend {
		CacheBackend::Memory => Ok(Arc::new(MemoryCache::new())),
		#[cfg(feature = "redis")]
		CacheBackend::Redis => Ok(Arc::new(
			vmraid_server_cache::RedisCache::connect(&config.redis_url).await?,
		)),
		#[cfg(not(feature = "redis"))]
		CacheBackend::Redis => {
			anyhow::bail!("cache backend redis requires building with the `redis` feature")
		}
	}
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use vmraid_server_db::testing::TestDb;

	pub struct TestApp {
		pub state: AppState,
		pub site: Site,
		pub queue: QueueRepository,
		_site_db: TestDb,
		_queue_db: TestDb,
	}

	pub async fn test_app(config: ServerConfig) -> TestApp {
		let site_db = TestDb::site().await;
		let queue_db = TestDb::queue().await;
		let site = Site::new("site1.local", site_db.pool.clone());
		let queue = QueueRepository::new(queue_db.pool.clone());
		let state = AppState::assemble(
			config,
			Arc::new(SiteRegistry::new([site.clone()])),
			Arc::new(queue.clone()),
			Arc::new(MemoryCache::new()),
			default_handlers(),
		)
		.unwrap();
		TestApp {
			state,
			site,
			queue,
			_site_db: site_db,
			_queue_db: queue_db,
		}
	}
}
