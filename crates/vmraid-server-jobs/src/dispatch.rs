// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sending jobs to named queues and running them with transactional bracketing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use vmraid_server_config::QueueConfig;
use vmraid_server_db::{JobFilter, JobState, NewQueuedJob, QueueStore, QueuedJob};

use crate::context::{ExecutionContext, SiteSession};
use crate::error::{error_chain, JobError, Result};
use crate::handler::{run_in_session, HandlerRegistry, JobContext};
use crate::queues::{QueueSet, DEFAULT_QUEUE};
use crate::sites::Site;

const PENDING_STATES: &[JobState] = &[JobState::Queued, JobState::Started];

#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRequest {
	pub method: String,
	pub queue: String,
	/// Seconds; defaults to the queue's timeout.
	pub timeout: Option<u64>,
	pub event: Option<String>,
	/// Defaults to the method.
	pub job_name: Option<String>,
	/// Run in-process instead of queueing.
	pub now: bool,
	pub enqueue_after_commit: bool,
	pub at_front: bool,
	pub kwargs: Map<String, Value>,
}

impl EnqueueRequest {
	pub fn new(method: impl Into<String>) -> Self {
		Self {
			method: method.into(),
			queue: DEFAULT_QUEUE.to_string(),
			timeout: None,
			event: None,
			job_name: None,
			now: false,
			enqueue_after_commit: false,
			at_front: false,
			kwargs: Map::new(),
		}
	}

	pub fn queue(mut self, queue: impl Into<String>) -> Self {
		self.queue = queue.into();
		self
	}

	pub fn timeout(mut self, secs: u64) -> Self {
		self.timeout = Some(secs);
		self
	}

	pub fn event(mut self, event: impl Into<String>) -> Self {
		self.event = Some(event.into());
		self
	}

	pub fn job_name(mut self, job_name: impl Into<String>) -> Self {
		self.job_name = Some(job_name.into());
		self
	}

	pub fn now(mut self) -> Self {
		self.now = true;
		self
	}

	pub fn after_commit(mut self) -> Self {
		self.enqueue_after_commit = true;
		self
	}

	pub fn at_front(mut self) -> Self {
		self.at_front = true;
		self
	}

	pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.kwargs.insert(key.into(), value.into());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
	/// Pushed to the queue with this id.
	Queued(String),
	/// Held on the session until it commits.
	Deferred,
	/// Ran in-process.
	Executed,
}

/// What a job call is identified by in [`Dispatcher::get_jobs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKey {
	Method,
	JobName,
	Kwarg(String),
}

impl JobKey {
	fn extract(&self, job: &QueuedJob) -> Option<String> {
		match self {
			JobKey::Method => Some(job.method.clone()),
			JobKey::JobName => Some(job.job_name.clone()),
			JobKey::Kwarg(key) => job.kwargs.get(key).map(|v| match v {
				Value::String(s) => s.clone(),
				other => other.to_string(),
			}),
		}
	}
}

/// The parts of a queued job needed to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCall {
	pub site: String,
	pub method: String,
	pub job_name: String,
	pub kwargs: Value,
	pub user: Option<String>,
}

impl From<&QueuedJob> for JobCall {
	fn from(job: &QueuedJob) -> Self {
		Self {
			site: job.site.clone(),
			method: job.method.clone(),
			job_name: job.job_name.clone(),
			kwargs: job.kwargs.clone(),
			user: job.user.clone(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub base_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 5,
			base_delay: Duration::from_secs(1),
		}
	}
}

impl RetryPolicy {
	pub fn from_config(config: &QueueConfig) -> Self {
		Self {
			max_retries: config.max_retries,
			base_delay: Duration::from_millis(config.retry_base_delay_ms),
		}
	}

	/// Linear backoff: the n-th retry (0-based) waits `n + 1` base delays.
	pub fn delay_for(&self, retry: u32) -> Duration {
		self.base_delay * (retry + 1)
	}
}

pub struct Dispatcher {
	queue: Arc<dyn QueueStore>,
	queues: QueueSet,
	handlers: Arc<HandlerRegistry>,
	retry: RetryPolicy,
}

impl Dispatcher {
	pub fn new(queue: Arc<dyn QueueStore>, queues: QueueSet, handlers: Arc<HandlerRegistry>) -> Self {
		Self {
			queue,
			queues,
			handlers,
			retry: RetryPolicy::default(),
		}
	}

	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	pub fn queues(&self) -> &QueueSet {
		&self.queues
	}

	pub fn handlers(&self) -> &HandlerRegistry {
		&self.handlers
	}

	pub fn queue_store(&self) -> &dyn QueueStore {
		self.queue.as_ref()
	}

	fn describe(&self, site: &Site, context: &ExecutionContext, req: EnqueueRequest) -> Result<NewQueuedJob> {
		let timeout_secs = match req.timeout {
			Some(secs) if secs > 0 => {
				self.queues.validate(&req.queue)?;
				secs
			}
			_ => self.queues.timeout(&req.queue)?,
		};
		Ok(NewQueuedJob {
			job_name: req.job_name.unwrap_or_else(|| req.method.clone()),
			queue: req.queue,
			site: site.name().to_string(),
			method: req.method,
			kwargs: Value::Object(req.kwargs),
			user: Some(context.user.clone()),
			event: req.event,
			timeout_secs,
			at_front: req.at_front,
		})
	}

	/// Enqueue outside any open transaction. `enqueue_after_commit` has
	/// nothing to wait for here, so the job is pushed straight away.
	#[instrument(skip(self, context, req), fields(site = %site.name(), method = %req.method, queue = %req.queue))]
	pub async fn enqueue(
		&self,
		site: &Site,
		context: &ExecutionContext,
		req: EnqueueRequest,
	) -> Result<Enqueued> {
		if req.now || context.runs_inline() {
			let handler = self.handlers.get(&req.method)?;
			let kwargs = Value::Object(req.kwargs);
			run_in_session(
				site,
				context.clone(),
				handler.as_ref(),
				&req.method,
				&kwargs,
				&self.handlers,
				self.queue.as_ref(),
			)
			.await?;
			return Ok(Enqueued::Executed);
		}

		let job = self.describe(site, context, req)?;
		let id = self.queue.push(&job).await?;
		info!(job_id = %id, job_name = %job.job_name, "Job enqueued");
		Ok(Enqueued::Queued(id))
	}

	/// Enqueue from inside `session`. `now` runs the handler on the session
	/// itself; `enqueue_after_commit` defers the push to the session's commit.
	#[instrument(skip(self, session, req), fields(site = %session.site().name(), method = %req.method, queue = %req.queue))]
	pub async fn enqueue_in(&self, session: &mut SiteSession, req: EnqueueRequest) -> Result<Enqueued> {
		if req.now || session.context().runs_inline() {
			let handler = self.handlers.get(&req.method)?;
			let kwargs = Value::Object(req.kwargs);
			let mut ctx = JobContext {
				session,
				method: &req.method,
				kwargs: &kwargs,
				handlers: &self.handlers,
				queue: self.queue.as_ref(),
			};
			handler.run(&mut ctx).await?;
			return Ok(Enqueued::Executed);
		}

		let after_commit = req.enqueue_after_commit;
		let job = self.describe(session.site(), session.context(), req)?;
		if after_commit {
			session.enqueue_after_commit(job);
			return Ok(Enqueued::Deferred);
		}
		let id = self.queue.push(&job).await?;
		info!(job_id = %id, job_name = %job.job_name, "Job enqueued");
		Ok(Enqueued::Queued(id))
	}

	/// Worker-side execution. Each attempt gets a fresh session; lock
	/// contention and explicit retry requests are retried with linear
	/// backoff, every other failure is written to the site's error log.
	#[instrument(skip(self, site, call), fields(site = %site.name(), method = %call.method))]
	pub async fn execute_job(&self, site: &Site, call: &JobCall) -> Result<()> {
		let handler = self.handlers.get(&call.method)?;
		let mut retry = 0u32;

		loop {
			let result = run_in_session(
				site,
				ExecutionContext::background(call.user.as_deref()),
				handler.as_ref(),
				&call.method,
				&call.kwargs,
				&self.handlers,
				self.queue.as_ref(),
			)
			.await;

			match result {
				Ok(()) => return Ok(()),
				Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
					let delay = self.retry.delay_for(retry);
					warn!(retry, delay_ms = delay.as_millis() as u64, error = %e, "Job hit lock contention, retrying");
					tokio::time::sleep(delay).await;
					retry += 1;
				}
				Err(e) => {
					self.log_error(site, &call.method, &e).await;
					return Err(e);
				}
			}
		}
	}

	async fn log_error(&self, site: &Site, method: &str, err: &JobError) {
		warn!(site = %site.name(), method, error = %err, "Job failed");
		if let Err(log_err) = site.error_log().insert(method, &error_chain(err)).await {
			warn!(site = %site.name(), method, error = %log_err, "Failed to write error log");
		}
	}

	/// Identifiers of queued and running jobs per site.
	#[instrument(skip(self))]
	pub async fn get_jobs(
		&self,
		site: Option<&str>,
		queue: Option<&str>,
		key: &JobKey,
	) -> Result<BTreeMap<String, Vec<String>>> {
		let requested: Vec<String> = queue.map(|q| vec![q.to_string()]).unwrap_or_default();
		let queues = self.queues.resolve(&requested)?;
		let filter = JobFilter {
			queues: Some(&queues),
			site,
			event: None,
			states: PENDING_STATES,
		};

		let mut per_site: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for job in self.queue.list(&filter).await? {
			if let Some(id) = key.extract(&job) {
				per_site.entry(job.site.clone()).or_default().push(id);
			}
		}
		Ok(per_site)
	}

	/// Queued jobs by queue, then by site.
	#[instrument(skip(self))]
	pub async fn pending_jobs(
		&self,
		site: Option<&str>,
	) -> Result<BTreeMap<String, BTreeMap<String, Vec<QueuedJob>>>> {
		let filter = JobFilter {
			site,
			states: &[JobState::Queued],
			..Default::default()
		};
		let mut grouped: BTreeMap<String, BTreeMap<String, Vec<QueuedJob>>> = BTreeMap::new();
		for job in self.queue.list(&filter).await? {
			grouped
				.entry(job.queue.clone())
				.or_default()
				.entry(job.site.clone())
				.or_default()
				.push(job);
		}
		Ok(grouped)
	}

	/// Delete queued jobs, optionally narrowed by queue, site and event.
	#[instrument(skip(self))]
	pub async fn purge_pending_jobs(
		&self,
		queue: Option<&str>,
		site: Option<&str>,
		event: Option<&str>,
	) -> Result<u64> {
		let requested: Vec<String> = queue.map(|q| vec![q.to_string()]).unwrap_or_default();
		let queues = self.queues.resolve(&requested)?;
		let filter = JobFilter {
			queues: Some(&queues),
			site,
			event,
			states: &[JobState::Queued],
		};
		let purged = self.queue.purge(&filter).await?;
		info!(purged, "Purged pending jobs");
		Ok(purged)
	}

	/// True when `site` has nothing queued or running.
	pub async fn ready_for_migration(&self, site: &str) -> Result<bool> {
		let filter = JobFilter {
			site: Some(site),
			states: PENDING_STATES,
			..Default::default()
		};
		Ok(self.queue.list(&filter).await?.is_empty())
	}

	/// Workers currently running a job.
	pub async fn busy_workers(&self) -> Result<Vec<String>> {
		let filter = JobFilter {
			states: &[JobState::Started],
			..Default::default()
		};
		let mut workers: Vec<String> = self
			.queue
			.list(&filter)
			.await?
			.into_iter()
			.filter_map(|job| job.worker)
			.collect();
		workers.sort();
		workers.dedup();
		Ok(workers)
	}
}
