// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use vmraid_server_config::SchedulerConfig;
use vmraid_server_db::settings::{ENABLE_SCHEDULER, PAUSE_SCHEDULER};

use crate::context::ExecutionContext;
use crate::error::{error_chain, Result};
use crate::scheduled::ScheduledJobRunner;
use crate::sites::{Site, SiteRegistry};

/// Present in the sites directory while the bench restarts.
pub const RESTARTING_MARKER: &str = ".restarting";

const ONE_DAY_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum SiteOutcome {
	/// Maintenance mode, paused or disabled.
	Inactive,
	/// Dormant and already ran within the last day.
	Dormant,
	/// Methods of the job types that were due.
	Enqueued(Vec<String>),
	Failed(String),
}

pub struct SchedulerPoller {
	sites: Arc<SiteRegistry>,
	runner: Arc<ScheduledJobRunner>,
	config: SchedulerConfig,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerPoller {
	pub fn new(
		sites: Arc<SiteRegistry>,
		runner: Arc<ScheduledJobRunner>,
		config: SchedulerConfig,
	) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			sites,
			runner,
			config,
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn sites(&self) -> &Arc<SiteRegistry> {
		&self.sites
	}

	pub fn runner(&self) -> &Arc<ScheduledJobRunner> {
		&self.runner
	}

	pub fn config(&self) -> &SchedulerConfig {
		&self.config
	}

	pub fn tick_interval(&self) -> Duration {
		Duration::from_secs(self.config.tick_interval_secs.max(1))
	}

	/// Spawn the polling loop. The first tick fires immediately.
	#[instrument(skip(self))]
	pub async fn start(self: &Arc<Self>) {
		let mut handles = self.handles.lock().await;
		let poller = Arc::clone(self);
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		let interval = self.tick_interval();

		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = ticker.tick() => {
						poller.enqueue_events_for_all_sites(Utc::now()).await;
					}
					_ = shutdown_rx.recv() => {
						info!("Shutting down scheduler poller");
						break;
					}
				}
			}
		});
		handles.push(handle);

		info!(
			sites = self.sites.len(),
			tick_secs = interval.as_secs(),
			"Scheduler poller started"
		);
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Scheduler poller shut down");
	}

	pub fn is_restarting(&self) -> bool {
		self.config.sites_path.join(RESTARTING_MARKER).exists()
	}

	/// One tick over every site. A failing site is logged and does not stop
	/// the others.
	#[instrument(skip(self))]
	pub async fn enqueue_events_for_all_sites(
		&self,
		now: DateTime<Utc>,
	) -> BTreeMap<String, SiteOutcome> {
		let mut outcomes = BTreeMap::new();
		if self.is_restarting() {
			info!("Bench is restarting, skipping scheduler tick");
			return outcomes;
		}

		for site in self.sites.iter() {
			let outcome = match self.enqueue_events_for_site(site, now).await {
				Ok(outcome) => outcome,
				Err(e) => {
					error!(site = %site.name(), error = %e, "Failed to enqueue scheduled jobs");
					SiteOutcome::Failed(error_chain(&e))
				}
			};
			outcomes.insert(site.name().to_string(), outcome);
		}
		outcomes
	}

	#[instrument(skip(self, site), fields(site = %site.name()))]
	pub async fn enqueue_events_for_site(
		&self,
		site: &Site,
		now: DateTime<Utc>,
	) -> Result<SiteOutcome> {
		if self.is_scheduler_inactive(site).await? {
			debug!("Scheduler inactive");
			return Ok(SiteOutcome::Inactive);
		}
		if !self.schedule_jobs_based_on_activity(site, now).await? {
			debug!("Site dormant, jobs ran within the last day");
			return Ok(SiteOutcome::Dormant);
		}

		let enqueued = self
			.runner
			.enqueue_due(site, &ExecutionContext::default(), now)
			.await?;
		debug!(count = enqueued.len(), "Queued events for site");
		Ok(SiteOutcome::Enqueued(enqueued))
	}

	pub async fn is_scheduler_inactive(&self, site: &Site) -> Result<bool> {
		if self.config.maintenance_mode {
			return Ok(true);
		}
		if site.settings().scheduler_paused().await? {
			return Ok(true);
		}
		self.is_scheduler_disabled(site).await
	}

	pub async fn is_scheduler_disabled(&self, site: &Site) -> Result<bool> {
		if self.config.disable_scheduler {
			return Ok(true);
		}
		Ok(!site.settings().scheduler_enabled().await?)
	}

	/// Active sites always run. Dormant sites run at most once a day,
	/// measured from the newest scheduled job log.
	pub async fn schedule_jobs_based_on_activity(
		&self,
		site: &Site,
		now: DateTime<Utc>,
	) -> Result<bool> {
		if !self.is_dormant(site, now).await? {
			return Ok(true);
		}
		match site.scheduled_jobs().last_log_created_at().await? {
			None => Ok(true),
			Some(last) => Ok((now - last).num_seconds() >= ONE_DAY_SECS),
		}
	}

	/// A site with no recorded activity is new, not dormant.
	pub async fn is_dormant(&self, site: &Site, now: DateTime<Utc>) -> Result<bool> {
		let Some(last_active) = site.settings().last_activity_at().await? else {
			return Ok(false);
		};
		let days = site
			.settings()
			.dormant_days()
			.await?
			.unwrap_or(self.config.dormant_days);
		Ok(now - last_active > chrono::Duration::days(days as i64))
	}
}

#[instrument(skip(site), fields(site = %site.name()))]
pub async fn toggle_scheduler(site: &Site, enable: bool) -> Result<()> {
	site.settings().set_bool(ENABLE_SCHEDULER, enable).await?;
	info!(enable, "Scheduler toggled");
	Ok(())
}

pub async fn enable_scheduler(site: &Site) -> Result<()> {
	toggle_scheduler(site, true).await
}

pub async fn disable_scheduler(site: &Site) -> Result<()> {
	toggle_scheduler(site, false).await
}

#[instrument(skip(site), fields(site = %site.name()))]
pub async fn pause_scheduler(site: &Site) -> Result<()> {
	site.settings().set_bool(PAUSE_SCHEDULER, true).await?;
	warn!("Scheduler paused");
	Ok(())
}

#[instrument(skip(site), fields(site = %site.name()))]
pub async fn resume_scheduler(site: &Site) -> Result<()> {
	site.settings().set_bool(PAUSE_SCHEDULER, false).await?;
	info!("Scheduler resumed");
	Ok(())
}
