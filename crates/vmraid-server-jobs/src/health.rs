// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;
use vmraid_server_db::JobLogStatus;

use crate::error::Result;
use crate::scheduled::ScheduledJobRunner;
use crate::scheduler::SchedulerPoller;
use crate::sites::Site;

#[derive(Debug, Clone, Serialize)]
pub struct JobHealthStatus {
	pub job_type: String,
	pub method: String,
	pub stopped: bool,
	pub status: HealthState,
	pub last_run: Option<LastRunInfo>,
	pub next_execution: Option<DateTime<Utc>>,
	pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRunInfo {
	pub log_id: String,
	pub status: JobLogStatus,
	pub started_at: DateTime<Utc>,
	pub duration_ms: Option<i64>,
	pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobsHealthStatus {
	pub status: HealthState,
	pub jobs: Vec<JobHealthStatus>,
}

pub fn determine_health_state(last_run: &Option<LastRunInfo>, consecutive_failures: u32) -> HealthState {
	match last_run {
		None => HealthState::Healthy,
		Some(run) => match run.status {
			JobLogStatus::Start | JobLogStatus::Complete => HealthState::Healthy,
			JobLogStatus::Failed => {
				if consecutive_failures >= 3 {
					HealthState::Unhealthy
				} else if consecutive_failures >= 1 {
					HealthState::Degraded
				} else {
					HealthState::Healthy
				}
			}
		},
	}
}

/// Health of every scheduled job type on `site`, worst state first.
#[instrument(skip(site, runner), fields(site = %site.name()))]
pub async fn job_health(site: &Site, runner: &ScheduledJobRunner) -> Result<JobsHealthStatus> {
	let repo = site.scheduled_jobs();
	let mut jobs = Vec::new();
	let mut worst_state = HealthState::Healthy;

	for job in repo.list_all().await? {
		let last_run = repo
			.list_logs(&job.name, 1)
			.await?
			.into_iter()
			.next()
			.map(|log| LastRunInfo {
				duration_ms: (log.status != JobLogStatus::Start)
					.then(|| (log.updated_at - log.created_at).num_milliseconds()),
				log_id: log.id,
				status: log.status,
				started_at: log.created_at,
				details: log.details,
			});
		let consecutive_failures = repo.count_consecutive_failures(&job.name).await?;
		let status = determine_health_state(&last_run, consecutive_failures);

		if status == HealthState::Unhealthy {
			worst_state = HealthState::Unhealthy;
		} else if status == HealthState::Degraded && worst_state != HealthState::Unhealthy {
			worst_state = HealthState::Degraded;
		}

		jobs.push(JobHealthStatus {
			next_execution: runner.get_next_execution(&job).ok(),
			job_type: job.name,
			method: job.method,
			stopped: job.stopped,
			status,
			last_run,
			consecutive_failures,
		});
	}

	jobs.sort_by_key(|j| match j.status {
		HealthState::Unhealthy => 0,
		HealthState::Degraded => 1,
		HealthState::Healthy => 2,
	});
	Ok(JobsHealthStatus {
		status: worst_state,
		jobs,
	})
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteDiagnosis {
	pub site: String,
	pub scheduler_disabled: bool,
	pub scheduler_paused: bool,
	pub maintenance_mode: bool,
	pub scheduler_inactive: bool,
	pub dormant: bool,
	pub health: JobsHealthStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
	pub restarting: bool,
	pub busy_workers: Vec<String>,
	/// Queued job counts by queue, then by method.
	pub pending: BTreeMap<String, BTreeMap<String, usize>>,
	pub sites: Vec<SiteDiagnosis>,
}

impl DoctorReport {
	/// True when some site will not run scheduled jobs.
	pub fn scheduler_inactive(&self) -> bool {
		self.restarting || self.sites.iter().any(|s| s.scheduler_inactive)
	}
}

/// Scheduler status and pending work for the selected sites (all when empty).
#[instrument(skip(poller))]
pub async fn doctor(poller: &SchedulerPoller, site_names: &[String]) -> Result<DoctorReport> {
	let sites = poller.sites().select(site_names)?;
	let dispatcher = poller.runner().dispatcher();
	let now = Utc::now();

	let mut diagnoses = Vec::with_capacity(sites.len());
	let mut pending: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

	for site in &sites {
		diagnoses.push(SiteDiagnosis {
			site: site.name().to_string(),
			scheduler_disabled: poller.is_scheduler_disabled(site).await?,
			scheduler_paused: site.settings().scheduler_paused().await?,
			maintenance_mode: poller.config().maintenance_mode,
			scheduler_inactive: poller.is_scheduler_inactive(site).await?,
			dormant: poller.is_dormant(site, now).await?,
			health: job_health(site, poller.runner()).await?,
		});

		for (queue, per_site) in dispatcher.pending_jobs(Some(site.name())).await? {
			let counts = pending.entry(queue).or_default();
			for job in per_site.into_values().flatten() {
				*counts.entry(job.method).or_default() += 1;
			}
		}
	}

	Ok(DoctorReport {
		restarting: poller.is_restarting(),
		busy_workers: dispatcher.busy_workers().await?,
		pending,
		sites: diagnoses,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dispatch::test_support::Harness;
	use crate::dispatch::EnqueueRequest;
	use crate::context::ExecutionContext;
	use crate::handler::test_handlers::{Failing, Marker};
	use crate::handler::HandlerRegistry;
	use crate::schedule::ScheduleSettings;
	use crate::scheduler::{enable_scheduler, pause_scheduler};
	use crate::sites::SiteRegistry;
	use std::sync::Arc;
	use vmraid_server_config::SchedulerConfig;
	use vmraid_server_db::{Frequency, ScheduledJobType};

	fn last_run(status: JobLogStatus) -> Option<LastRunInfo> {
		Some(LastRunInfo {
			log_id: "log-1".into(),
			status,
			started_at: Utc::now(),
			duration_ms: Some(10),
			details: None,
		})
	}

	#[test]
	fn test_determine_health_state() {
		assert_eq!(determine_health_state(&None, 0), HealthState::Healthy);
		assert_eq!(
			determine_health_state(&last_run(JobLogStatus::Complete), 0),
			HealthState::Healthy
		);
		assert_eq!(
			determine_health_state(&last_run(JobLogStatus::Start), 5),
			HealthState::Healthy
		);
		assert_eq!(
			determine_health_state(&last_run(JobLogStatus::Failed), 1),
			HealthState::Degraded
		);
		assert_eq!(
			determine_health_state(&last_run(JobLogStatus::Failed), 3),
			HealthState::Unhealthy
		);
	}

	#[test]
	fn test_health_state_serializes_snake_case() {
		assert_eq!(
			serde_json::to_string(&HealthState::Unhealthy).unwrap(),
			"\"unhealthy\""
		);
	}

	fn poller(h: &Harness) -> SchedulerPoller {
		let mut handlers = HandlerRegistry::new();
		handlers.register("app.tasks.ok", Arc::new(Marker("ok")));
		handlers.register("app.tasks.broken", Arc::new(Failing("broken")));
		let runner = ScheduledJobRunner::new(
			Arc::new(h.dispatcher(handlers)),
			ScheduleSettings::default(),
		);
		SchedulerPoller::new(
			Arc::new(SiteRegistry::new([h.site.clone()])),
			Arc::new(runner),
			SchedulerConfig::default(),
		)
	}

	#[tokio::test]
	async fn test_job_health_reports_failures() {
		let h = Harness::new().await;
		let poller = poller(&h);
		let repo = h.site.scheduled_jobs();
		repo.upsert(&ScheduledJobType::new("app.tasks.ok", Frequency::Hourly))
			.await
			.unwrap();
		repo.upsert(&ScheduledJobType::new("app.tasks.broken", Frequency::Hourly))
			.await
			.unwrap();

		poller.runner().run_scheduled_job(&h.site, "app.tasks.ok").await.unwrap();
		poller.runner().run_scheduled_job(&h.site, "app.tasks.broken").await.unwrap();

		let health = job_health(&h.site, poller.runner()).await.unwrap();
		assert_eq!(health.status, HealthState::Degraded);
		assert_eq!(health.jobs[0].method, "app.tasks.broken");
		assert_eq!(health.jobs[0].consecutive_failures, 1);
		assert!(health.jobs[0].last_run.as_ref().unwrap().details.is_some());
		assert_eq!(health.jobs[1].status, HealthState::Healthy);
		assert!(health.jobs[1].next_execution.is_some());

		for _ in 0..2 {
			poller.runner().run_scheduled_job(&h.site, "app.tasks.broken").await.unwrap();
		}
		let health = job_health(&h.site, poller.runner()).await.unwrap();
		assert_eq!(health.status, HealthState::Unhealthy);
	}

	#[tokio::test]
	async fn test_doctor_report() {
		let h = Harness::new().await;
		let poller = poller(&h);
		let ctx = ExecutionContext::default();
		let dispatcher = poller.runner().dispatcher();
		dispatcher
			.enqueue(&h.site, &ctx, EnqueueRequest::new("app.tasks.ok"))
			.await
			.unwrap();
		dispatcher
			.enqueue(&h.site, &ctx, EnqueueRequest::new("app.tasks.ok"))
			.await
			.unwrap();
		dispatcher
			.enqueue(&h.site, &ctx, EnqueueRequest::new("app.tasks.broken").queue("long"))
			.await
			.unwrap();

		let report = doctor(&poller, &[]).await.unwrap();
		assert!(!report.restarting);
		assert!(report.busy_workers.is_empty());
		assert_eq!(report.pending["default"]["app.tasks.ok"], 2);
		assert_eq!(report.pending["long"]["app.tasks.broken"], 1);
		assert!(report.sites[0].scheduler_disabled);
		assert!(report.scheduler_inactive());

		enable_scheduler(&h.site).await.unwrap();
		let report = doctor(&poller, &["site1.local".to_string()]).await.unwrap();
		assert!(!report.scheduler_inactive());

		pause_scheduler(&h.site).await.unwrap();
		let report = doctor(&poller, &[]).await.unwrap();
		assert!(report.sites[0].scheduler_paused);
		assert!(report.scheduler_inactive());

		assert!(doctor(&poller, &["missing.local".to_string()]).await.is_err());
	}
}
