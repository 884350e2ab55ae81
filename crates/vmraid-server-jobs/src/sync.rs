// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reconcile declared scheduler events with the stored job types.
//!
//! Events are declared in TOML, one list of methods per event type plus a
//! `[cron]` table keyed by cron expression:
//!
//! ```toml
//! all = ["app.tasks.flush_queue"]
//! daily_long = ["app.tasks.rebuild_index"]
//!
//! [cron]
//! "0/15 * * * *" = ["app.tasks.sync_mail"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use vmraid_server_db::{Frequency, ScheduledJobType};

use crate::error::{JobError, Result};
use crate::schedule::validate_cron_expression;
use crate::sites::Site;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerEvents {
	#[serde(default)]
	pub cron: BTreeMap<String, Vec<String>>,
	#[serde(flatten)]
	pub events: BTreeMap<String, Vec<String>>,
}

impl SchedulerEvents {
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path).map_err(|e| {
			JobError::InvalidSchedule(format!("failed to read {}: {e}", path.display()))
		})?;
		Self::parse(&content)
	}

	pub fn parse(content: &str) -> Result<Self> {
		toml::from_str(content)
			.map_err(|e| JobError::InvalidSchedule(format!("invalid scheduler events: {e}")))
	}

	pub fn event(mut self, event_type: &str, method: &str) -> Self {
		self.events
			.entry(event_type.to_string())
			.or_default()
			.push(method.to_string());
		self
	}

	pub fn cron(mut self, expression: &str, method: &str) -> Self {
		self.cron
			.entry(expression.to_string())
			.or_default()
			.push(method.to_string());
		self
	}

	/// Every declared job type. A method declared twice keeps its last declaration.
	pub fn job_types(&self) -> Result<Vec<ScheduledJobType>> {
		let mut jobs: BTreeMap<String, ScheduledJobType> = BTreeMap::new();

		for (event_type, methods) in &self.events {
			let frequency = Frequency::from_event_type(event_type)
				.filter(|f| *f != Frequency::Cron)
				.ok_or_else(|| {
					JobError::InvalidSchedule(format!("unknown scheduler event {event_type}"))
				})?;
			for method in methods {
				jobs.insert(method.clone(), ScheduledJobType::new(method.as_str(), frequency));
			}
		}

		for (expression, methods) in &self.cron {
			validate_cron_expression(expression)?;
			for method in methods {
				jobs.insert(method.clone(), ScheduledJobType::cron(method.as_str(), expression.as_str()));
			}
		}

		Ok(jobs.into_values().collect())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
	pub inserted: Vec<String>,
	pub updated: Vec<String>,
	pub removed: Vec<String>,
}

/// Insert declared job types, update changed schedules and delete job types
/// no longer declared. Job types backed by a server script are kept.
///
/// Existing rows keep their `last_execution` and `stopped` state.
#[instrument(skip(site, events), fields(site = %site.name()))]
pub async fn sync_jobs(site: &Site, events: &SchedulerEvents) -> Result<SyncReport> {
	let declared = events.job_types()?;
	let repo = site.scheduled_jobs();
	let mut report = SyncReport::default();

	let existing: BTreeMap<String, ScheduledJobType> = repo
		.list_all()
		.await?
		.into_iter()
		.map(|job| (job.method.clone(), job))
		.collect();

	for job in &declared {
		match existing.get(&job.method) {
			None => {
				repo.upsert(job).await?;
				report.inserted.push(job.method.clone());
			}
			Some(current)
				if current.frequency != job.frequency || current.cron_format != job.cron_format =>
			{
				let updated = ScheduledJobType {
					frequency: job.frequency,
					cron_format: job.cron_format.clone(),
					create_log: job.create_log,
					..current.clone()
				};
				repo.upsert(&updated).await?;
				report.updated.push(job.method.clone());
			}
			Some(_) => {}
		}
	}

	let declared_methods: BTreeSet<&str> = declared.iter().map(|j| j.method.as_str()).collect();
	for job in existing.values() {
		if job.server_script.is_none() && !declared_methods.contains(job.method.as_str()) {
			repo.delete(&job.name).await?;
			report.removed.push(job.method.clone());
		}
	}

	info!(
		inserted = report.inserted.len(),
		updated = report.updated.len(),
		removed = report.removed.len(),
		"Scheduled job types synced"
	);
	Ok(report)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use vmraid_server_db::testing::TestDb;

	const EVENTS: &str = r#"
all = ["app.tasks.flush"]
daily_long = ["app.tasks.reindex"]
hourly = ["app.tasks.digest", "app.tasks.reminders"]

[cron]
"0/15 * * * *" = ["app.tasks.mail"]
"#;

	#[test]
	fn test_parse_events() {
		let events = SchedulerEvents::parse(EVENTS).unwrap();
		assert_eq!(events.cron["0/15 * * * *"], vec!["app.tasks.mail"]);
		assert_eq!(events.events["hourly"].len(), 2);

		let jobs = events.job_types().unwrap();
		assert_eq!(jobs.len(), 5);
		let reindex = jobs.iter().find(|j| j.method == "app.tasks.reindex").unwrap();
		assert_eq!(reindex.frequency, Frequency::DailyLong);
		let flush = jobs.iter().find(|j| j.method == "app.tasks.flush").unwrap();
		assert!(!flush.create_log);
		let mail = jobs.iter().find(|j| j.method == "app.tasks.mail").unwrap();
		assert_eq!(mail.frequency, Frequency::Cron);
		assert_eq!(mail.cron_format.as_deref(), Some("0/15 * * * *"));
	}

	#[test]
	fn test_rejects_unknown_event_and_bad_cron() {
		let unknown = SchedulerEvents::default().event("fortnightly", "app.tasks.x");
		assert!(matches!(unknown.job_types(), Err(JobError::InvalidSchedule(_))));

		let bare_cron = SchedulerEvents::default().event("cron", "app.tasks.x");
		assert!(bare_cron.job_types().is_err());

		let bad = SchedulerEvents::default().cron("not a cron", "app.tasks.x");
		assert!(bad.job_types().is_err());
	}

	#[test]
	fn test_load_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("scheduler_events.toml");
		std::fs::write(&path, EVENTS).unwrap();
		assert_eq!(SchedulerEvents::load(&path).unwrap().events.len(), 3);
		assert!(SchedulerEvents::load(&dir.path().join("missing.toml")).is_err());
	}

	#[tokio::test]
	async fn test_sync_inserts_updates_and_removes() {
		let db = TestDb::site().await;
		let site = Site::new("site1.local", db.pool.clone());
		let repo = site.scheduled_jobs();

		let report = sync_jobs(&site, &SchedulerEvents::parse(EVENTS).unwrap())
			.await
			.unwrap();
		assert_eq!(report.inserted.len(), 5);
		assert!(report.updated.is_empty() && report.removed.is_empty());

		let ran_at = Utc::now();
		repo.record_start("app.tasks.digest", true, ran_at).await.unwrap();
		repo.set_stopped("app.tasks.digest", true).await.unwrap();
		repo.upsert(
			&ScheduledJobType::new("app.tasks.custom", Frequency::Daily)
				.with_server_script("Custom Script"),
		)
		.await
		.unwrap();

		let next = SchedulerEvents::default()
			.event("daily", "app.tasks.digest")
			.event("all", "app.tasks.flush")
			.cron("0 3 * * *", "app.tasks.mail");
		let report = sync_jobs(&site, &next).await.unwrap();
		assert!(report.inserted.is_empty());
		assert_eq!(report.updated, vec!["app.tasks.digest", "app.tasks.mail"]);
		assert_eq!(report.removed, vec!["app.tasks.reindex", "app.tasks.reminders"]);

		let digest = repo.get_by_method("app.tasks.digest").await.unwrap().unwrap();
		assert_eq!(digest.frequency, Frequency::Daily);
		assert!(digest.stopped);
		assert!(digest.last_execution.is_some());
		assert!(repo.get_by_method("app.tasks.custom").await.unwrap().is_some());
		assert!(repo.get_by_method("app.tasks.reindex").await.unwrap().is_none());

		let again = sync_jobs(&site, &next).await.unwrap();
		assert_eq!(again, SyncReport::default());
	}
}
