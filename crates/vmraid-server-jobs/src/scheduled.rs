// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use vmraid_server_db::{JobLogStatus, QueueStore, ScheduledJobType};

use crate::context::ExecutionContext;
use crate::dispatch::{Dispatcher, EnqueueRequest};
use crate::error::{error_chain, JobError, Result};
use crate::handler::{run_in_session, HandlerRegistry, JobContext, JobHandler};
use crate::queues::{DEFAULT_QUEUE, LONG_QUEUE};
use crate::schedule::{self, ScheduleSettings};
use crate::sites::Site;

/// Queue-side entry point every scheduled job is enqueued under.
pub const RUN_SCHEDULED_JOB: &str =
	"vmraid.core.doctype.scheduled_job_type.scheduled_job_type.run_scheduled_job";

/// Loads the job type named by the `job_type` argument and executes it.
pub struct RunScheduledJob;

#[async_trait]
impl JobHandler for RunScheduledJob {
	async fn run(&self, ctx: &mut JobContext<'_>) -> Result<()> {
		let job_type = ctx.kwarg_str("job_type")?.to_string();
		let site = ctx.session.site().clone();
		let job = site
			.scheduled_jobs()
			.get_by_method(&job_type)
			.await?
			.ok_or_else(|| JobError::NotFound(format!("Scheduled Job Type {job_type}")))?;
		execute_scheduled_job(&site, ctx.handlers, ctx.queue, &job).await?;
		Ok(())
	}
}

/// Run one scheduled job type to completion.
///
/// The Start log and `last_execution` are committed before the target runs.
/// The target gets its own transaction; its failure is recorded on the log
/// and never returned to the caller.
#[instrument(skip(site, handlers, queue, job), fields(site = %site.name(), job = %job.name))]
pub async fn execute_scheduled_job(
	site: &Site,
	handlers: &HandlerRegistry,
	queue: &dyn QueueStore,
	job: &ScheduledJobType,
) -> Result<JobLogStatus> {
	let log_id = site
		.scheduled_jobs()
		.record_start(&job.name, job.create_log, Utc::now())
		.await?;
	info!(method = %job.method, "Scheduled Job Start");

	let handler = match &job.server_script {
		Some(script) => handlers.get_server_script(script),
		None => handlers.get(&job.method),
	};
	let result = match handler {
		Ok(handler) => {
			let kwargs = serde_json::json!({});
			run_in_session(
				site,
				ExecutionContext::background(None),
				handler.as_ref(),
				&job.method,
				&kwargs,
				handlers,
				queue,
			)
			.await
		}
		Err(e) => Err(e),
	};

	let (status, details) = match &result {
		Ok(()) => {
			info!(method = %job.method, "Scheduled Job Complete");
			(JobLogStatus::Complete, None)
		}
		Err(e) => {
			warn!(method = %job.method, error = %e, "Scheduled Job Failed");
			(JobLogStatus::Failed, Some(error_chain(e)))
		}
	};

	if let Some(log_id) = log_id {
		site.scheduled_jobs()
			.set_log_status(&log_id, status, details.as_deref())
			.await?;
	}
	Ok(status)
}

pub struct ScheduledJobRunner {
	dispatcher: Arc<Dispatcher>,
	settings: ScheduleSettings,
}

impl ScheduledJobRunner {
	pub fn new(dispatcher: Arc<Dispatcher>, settings: ScheduleSettings) -> Self {
		Self {
			dispatcher,
			settings,
		}
	}

	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}

	pub fn settings(&self) -> &ScheduleSettings {
		&self.settings
	}

	pub fn get_next_execution(&self, job: &ScheduledJobType) -> Result<DateTime<Utc>> {
		schedule::get_next_execution(job, &self.settings)
	}

	pub fn is_event_due(&self, job: &ScheduledJobType, now: DateTime<Utc>) -> Result<bool> {
		schedule::is_event_due(job, &self.settings, now)
	}

	fn queue_for(job: &ScheduledJobType) -> &'static str {
		if job.frequency.is_long() {
			LONG_QUEUE
		} else {
			DEFAULT_QUEUE
		}
	}

	/// Enqueue `job` when it is due (or `force` is set). Returns true only
	/// when a queue entry was created.
	///
	/// With `execute_job` set on the context the job runs inline instead.
	#[instrument(skip(self, site, context, job), fields(site = %site.name(), job = %job.name))]
	pub async fn enqueue(
		&self,
		site: &Site,
		context: &ExecutionContext,
		job: &ScheduledJobType,
		force: bool,
		now: DateTime<Utc>,
	) -> Result<bool> {
		if context.suppresses_scheduling() {
			return Ok(false);
		}
		if !force && !self.is_event_due(job, now)? {
			return Ok(false);
		}

		context.record_enqueued(&job.method);

		if context.execute_job {
			self.execute(site, job).await?;
			return Ok(false);
		}

		if self.is_job_in_queue(site, job).await? {
			info!("Scheduled job already queued, skipping");
			return Ok(false);
		}

		let req = EnqueueRequest::new(RUN_SCHEDULED_JOB)
			.queue(Self::queue_for(job))
			.job_name(job.method.clone())
			.kwarg("job_type", job.method.clone());
		self.dispatcher.enqueue(site, context, req).await?;
		Ok(true)
	}

	/// Whether a run of `job` is queued or in progress on `site`.
	pub async fn is_job_in_queue(&self, site: &Site, job: &ScheduledJobType) -> Result<bool> {
		Ok(self
			.dispatcher
			.queue_store()
			.is_pending(site.name(), &job.method)
			.await?)
	}

	pub async fn execute(&self, site: &Site, job: &ScheduledJobType) -> Result<JobLogStatus> {
		execute_scheduled_job(
			site,
			self.dispatcher.handlers(),
			self.dispatcher.queue_store(),
			job,
		)
		.await
	}

	/// Execute the job type with method `job_type` right now.
	pub async fn run_scheduled_job(&self, site: &Site, job_type: &str) -> Result<JobLogStatus> {
		let job = self.load(site, job_type).await?;
		self.execute(site, &job).await
	}

	/// Force-enqueue the job type with method `method`, due or not.
	pub async fn execute_event(
		&self,
		site: &Site,
		context: &ExecutionContext,
		method: &str,
	) -> Result<bool> {
		let job = self.load(site, method).await?;
		self.enqueue(site, context, &job, true, Utc::now()).await
	}

	/// Enqueue every due, non-stopped job type on `site`. Returns the methods
	/// that were due, whether or not a new queue entry was needed.
	#[instrument(skip(self, site, context), fields(site = %site.name()))]
	pub async fn enqueue_due(
		&self,
		site: &Site,
		context: &ExecutionContext,
		now: DateTime<Utc>,
	) -> Result<Vec<String>> {
		let context = context.clone().tracking_enqueued();
		for job in site.scheduled_jobs().list_active().await? {
			if let Err(e) = self.enqueue(site, &context, &job, false, now).await {
				warn!(job = %job.name, error = %e, "Failed to enqueue scheduled job");
			}
		}
		Ok(context.enqueued_jobs())
	}

	async fn load(&self, site: &Site, method: &str) -> Result<ScheduledJobType> {
		site.scheduled_jobs()
			.get_by_method(method)
			.await?
			.ok_or_else(|| JobError::NotFound(format!("Scheduled Job Type {method}")))
	}
}
