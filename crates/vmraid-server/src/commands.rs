// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator commands. Each takes the shared [`AppState`] and the sites the
//! command was scoped to.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tracing::info;
use vmraid_server_cache::scrub;
use vmraid_server_db::{table_name, TreeRepository, TreeTable};
use vmraid_server_jobs::{
	disable_scheduler, doctor, enable_scheduler, pause_scheduler, resume_scheduler, sync_jobs,
	DoctorReport, JobError, SyncReport, WorkerPool,
};

use crate::app::AppState;

/// How long busy workers get to finish after Ctrl-C.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
	Enable,
	Disable,
	Pause,
	Resume,
}

pub async fn set_scheduler(
	app: &AppState,
	sites: &[String],
	action: SchedulerAction,
) -> anyhow::Result<()> {
	for site in app.select_sites(sites)? {
		match action {
			SchedulerAction::Enable => enable_scheduler(&site).await?,
			SchedulerAction::Disable => disable_scheduler(&site).await?,
			SchedulerAction::Pause => pause_scheduler(&site).await?,
			SchedulerAction::Resume => resume_scheduler(&site).await?,
		}
		let state = match action {
			SchedulerAction::Enable => "enabled",
			SchedulerAction::Disable => "disabled",
			SchedulerAction::Pause => "paused",
			SchedulerAction::Resume => "resumed",
		};
		println!("Scheduler {state} for {}", site.name());
	}
	Ok(())
}

/// Run the scheduled job type `event` right away on each site.
pub async fn trigger_scheduler_event(
	app: &AppState,
	sites: &[String],
	event: &str,
) -> anyhow::Result<()> {
	let mut missing = Vec::new();
	for site in app.select_sites(sites)? {
		match app.runner().run_scheduled_job(&site, event).await {
			Ok(status) => println!("{}: {event} {status:?}", site.name()),
			Err(JobError::NotFound(_)) => {
				println!("Event {event} does not exist on {}", site.name());
				missing.push(site.name().to_string());
			}
			Err(e) => return Err(e.into()),
		}
	}
	if !missing.is_empty() {
		bail!("event {event} is missing on {}", missing.join(", "));
	}
	Ok(())
}

pub fn render_doctor(report: &DoctorReport) -> String {
	let mut out = String::from("-----Checking scheduler status-----\n");
	if report.restarting {
		out.push_str("Bench is restarting, scheduler ticks are skipped\n");
	}
	for site in &report.sites {
		if site.scheduler_disabled {
			out.push_str(&format!("Scheduler disabled for {}\n", site.site));
		}
		if site.maintenance_mode {
			out.push_str(&format!("Maintenance mode on for {}\n", site.site));
		}
		if site.scheduler_paused {
			out.push_str(&format!("Scheduler paused for {}\n", site.site));
		}
		if site.dormant {
			out.push_str(&format!("{} is dormant, jobs run once a day\n", site.site));
		}
		for job in site.health.jobs.iter().filter(|j| j.consecutive_failures > 0) {
			out.push_str(&format!(
				"{}: {} failed {} time(s) in a row\n",
				site.site, job.method, job.consecutive_failures
			));
		}
	}
	if !report.scheduler_inactive() {
		out.push_str("Scheduler is active\n");
	}

	out.push_str("-----Checking for pending tasks-----\n");
	out.push_str(&format!("Workers busy: {}\n", report.busy_workers.len()));
	for (queue, methods) in &report.pending {
		out.push_str(&format!("-----{queue} Jobs-----\n"));
		for (method, count) in methods {
			out.push_str(&format!("{method}: {count}\n"));
		}
	}
	out
}

pub async fn doctor_cmd(app: &AppState, sites: &[String]) -> anyhow::Result<()> {
	let report = doctor(&app.poller, sites).await?;
	print!("{}", render_doctor(&report));
	Ok(())
}

pub async fn show_pending_jobs(app: &AppState, sites: &[String]) -> anyhow::Result<()> {
	for site in app.select_sites(sites)? {
		let pending = app.dispatcher.pending_jobs(Some(site.name())).await?;
		println!("-----Pending Jobs for {}-----", site.name());
		for (queue, per_site) in pending {
			for job in per_site.into_values().flatten() {
				println!("{queue}\t{}\t{}\t{}", job.id, job.job_name, job.enqueued_at);
			}
		}
	}
	Ok(())
}

pub async fn purge_jobs(
	app: &AppState,
	sites: &[String],
	queue: Option<&str>,
	event: Option<&str>,
) -> anyhow::Result<u64> {
	let mut purged = 0;
	for site in app.select_sites(sites)? {
		purged += app
			.dispatcher
			.purge_pending_jobs(queue, Some(site.name()), event)
			.await?;
	}
	println!("Purged {purged} jobs");
	Ok(purged)
}

pub async fn ready_for_migration(app: &AppState, sites: &[String]) -> anyhow::Result<()> {
	let mut busy = Vec::new();
	for site in app.select_sites(sites)? {
		if app.dispatcher.ready_for_migration(site.name()).await? {
			println!("READY for migration: site {}", site.name());
		} else {
			println!("NOT READY for migration: site {} has pending jobs", site.name());
			busy.push(site.name().to_string());
		}
	}
	if !busy.is_empty() {
		bail!("sites with pending jobs: {}", busy.join(", "));
	}
	Ok(())
}

pub async fn sync_jobs_cmd(app: &AppState, sites: &[String]) -> anyhow::Result<Vec<SyncReport>> {
	let events = app.scheduler_events()?;
	let mut reports = Vec::new();
	for site in app.select_sites(sites)? {
		let report = sync_jobs(&site, &events).await?;
		println!(
			"{}: {} inserted, {} updated, {} removed",
			site.name(),
			report.inserted.len(),
			report.updated.len(),
			report.removed.len()
		);
		reports.push(report);
	}
	Ok(reports)
}

/// Rebuild the nested-set intervals of `doctype` from its parent column.
/// The parent column defaults to `parent_<doctype>`.
pub async fn rebuild_tree(
	app: &AppState,
	sites: &[String],
	doctype: &str,
	parent_field: Option<&str>,
) -> anyhow::Result<()> {
	let parent_field = parent_field
		.map(str::to_string)
		.unwrap_or_else(|| format!("parent_{}", scrub(doctype)));
	let tree = TreeTable::new(table_name(doctype), parent_field)?;
	for site in app.select_sites(sites)? {
		let nodes = TreeRepository::new(site.pool().clone(), tree.clone())
			.rebuild_tree()
			.await?;
		println!("{}: rebuilt {doctype} ({nodes} nodes)", site.name());
	}
	Ok(())
}

pub async fn clear_cache(
	app: &AppState,
	sites: &[String],
	user: Option<&str>,
	doctype: Option<&str>,
) -> anyhow::Result<()> {
	for site in app.select_sites(sites)? {
		let manager = app.cache_manager(&site);
		match doctype {
			Some(doctype) => manager.clear_doctype_cache(Some(doctype)).await?,
			None => {
				manager.clear_user_cache(user).await?;
				if user.is_none() {
					manager.clear_domain_cache().await?;
				}
			}
		}
		println!("Cache cleared for {}", site.name());
	}
	Ok(())
}

/// Run the scheduler poller until Ctrl-C.
pub async fn schedule(app: &AppState) -> anyhow::Result<()> {
	app.poller.start().await;
	tokio::signal::ctrl_c().await?;
	info!("Received Ctrl-C, stopping scheduler");
	app.poller.shutdown().await;
	Ok(())
}

/// Run workers for `queues` (all when empty). Burst workers exit once the
/// queues are drained; others run until Ctrl-C.
pub async fn worker(app: &AppState, queues: &[String], burst: bool) -> anyhow::Result<()> {
	let mut pool = WorkerPool::new(Arc::clone(&app.dispatcher), Arc::clone(&app.sites), queues)?
		.configure(&app.config.queue);
	if burst {
		pool = pool.burst();
		pool.start().wait_for_shutdown().await;
		return Ok(());
	}

	let handle = pool.start();
	tokio::signal::ctrl_c().await?;
	info!("Received Ctrl-C, stopping workers");
	handle.shutdown(WORKER_SHUTDOWN_GRACE).await;
	Ok(())
}
