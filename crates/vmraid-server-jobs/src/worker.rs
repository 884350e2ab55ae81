// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use vmraid_server_config::QueueConfig;
use vmraid_server_db::QueuedJob;

use crate::dispatch::{Dispatcher, JobCall};
use crate::error::{error_chain, JobError, Result};
use crate::sites::SiteRegistry;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_JITTER: Duration = Duration::from_millis(100);

/// `<uuid>.<hostname>.<pid>`, suffixed with `.<queue>` when one is given.
pub fn worker_name(queue: Option<&str>) -> String {
	let host = hostname::get()
		.ok()
		.and_then(|h| h.into_string().ok())
		.unwrap_or_else(|| "localhost".to_string());
	let mut name = format!(
		"{}.{}.{}",
		uuid::Uuid::new_v4().simple(),
		host,
		std::process::id()
	);
	if let Some(queue) = queue {
		name.push('.');
		name.push_str(queue);
	}
	name
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&str>() {
		format!("job panicked: {msg}")
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		format!("job panicked: {msg}")
	} else {
		"job panicked".to_string()
	}
}

/// A set of workers draining the same queues.
pub struct WorkerPool {
	dispatcher: Arc<Dispatcher>,
	sites: Arc<SiteRegistry>,
	queues: Vec<String>,
	/// Set when queues were requested explicitly; becomes part of worker names.
	queue_label: Option<String>,
	num_workers: usize,
	poll_interval: Duration,
	jitter: Duration,
	burst: bool,
}

impl WorkerPool {
	/// Workers for `queues`, or every configured queue when empty.
	pub fn new(dispatcher: Arc<Dispatcher>, sites: Arc<SiteRegistry>, queues: &[String]) -> Result<Self> {
		let resolved = dispatcher.queues().resolve(queues)?;
		Ok(Self {
			queue_label: (!queues.is_empty()).then(|| queues.join(",")),
			queues: resolved,
			dispatcher,
			sites,
			num_workers: 1,
			poll_interval: DEFAULT_POLL_INTERVAL,
			jitter: DEFAULT_JITTER,
			burst: false,
		})
	}

	pub fn configure(self, config: &QueueConfig) -> Self {
		self.num_workers(config.workers)
			.poll_interval(Duration::from_millis(config.poll_interval_ms))
			.jitter(Duration::from_millis(config.jitter_ms))
	}

	pub fn num_workers(mut self, num_workers: usize) -> Self {
		self.num_workers = num_workers.max(1);
		self
	}

	pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	/// Upper bound of the random delay added to each idle poll.
	pub fn jitter(mut self, jitter: Duration) -> Self {
		self.jitter = jitter;
		self
	}

	/// Exit once the queues are empty instead of polling forever.
	pub fn burst(mut self) -> Self {
		self.burst = true;
		self
	}

	pub fn queues(&self) -> &[String] {
		&self.queues
	}

	fn worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Worker {
		Worker {
			name: worker_name(self.queue_label.as_deref()),
			queues: self.queues.clone(),
			dispatcher: Arc::clone(&self.dispatcher),
			sites: Arc::clone(&self.sites),
			poll_interval: self.poll_interval,
			jitter: self.jitter,
			burst: self.burst,
			shutdown_rx,
		}
	}

	pub fn start(&self) -> RunHandle {
		let (shutdown_tx, _) = broadcast::channel(1);
		let mut workers = Vec::with_capacity(self.num_workers);

		for _ in 0..self.num_workers {
			let mut worker = self.worker(shutdown_tx.subscribe());
			let name = worker.name.clone();
			info!(worker.name = %name, queues = ?self.queues, "Starting worker");

			let span = info_span!("worker", worker.name = %name);
			let handle = tokio::spawn(async move { worker.run().instrument(span).await });
			workers.push((name, handle));
		}

		RunHandle {
			workers,
			shutdown_tx,
			dispatcher: Arc::clone(&self.dispatcher),
		}
	}
}

/// Handle to running workers.
pub struct RunHandle {
	workers: Vec<(String, JoinHandle<()>)>,
	shutdown_tx: broadcast::Sender<()>,
	dispatcher: Arc<Dispatcher>,
}

impl RunHandle {
	pub fn worker_names(&self) -> Vec<String> {
		self.workers.iter().map(|(name, _)| name.clone()).collect()
	}

	/// Wait for every worker to exit on its own (burst mode).
	pub async fn wait_for_shutdown(self) {
		for (name, handle) in self.workers {
			if let Err(error) = handle.await {
				warn!(worker.name = %name, %error, "Worker task panicked");
			}
		}
	}

	/// Ask workers to stop after their current job. Workers still busy after
	/// `grace` are aborted and their jobs put back on the queue.
	pub async fn shutdown(self, grace: Duration) {
		let _ = self.shutdown_tx.send(());
		let deadline = Instant::now() + grace;

		for (name, mut handle) in self.workers {
			match tokio::time::timeout_at(deadline, &mut handle).await {
				Ok(Ok(())) => {}
				Ok(Err(error)) => warn!(worker.name = %name, %error, "Worker task panicked"),
				Err(_) => {
					handle.abort();
					match self.dispatcher.queue_store().requeue_worker(&name).await {
						Ok(requeued) => {
							warn!(worker.name = %name, requeued, "Aborted busy worker")
						}
						Err(e) => {
							error!(worker.name = %name, error = %e, "Failed to requeue jobs of aborted worker")
						}
					}
				}
			}
		}

		info!("Workers shut down");
	}
}

pub(crate) struct Worker {
	name: String,
	queues: Vec<String>,
	dispatcher: Arc<Dispatcher>,
	sites: Arc<SiteRegistry>,
	poll_interval: Duration,
	jitter: Duration,
	burst: bool,
	shutdown_rx: broadcast::Receiver<()>,
}

impl Worker {
	fn sleep_duration_with_jitter(&self) -> Duration {
		if self.jitter.is_zero() {
			return self.poll_interval;
		}
		let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
		self.poll_interval + Duration::from_millis(fastrand::u64(0..=jitter_millis))
	}

	fn shutdown_requested(&mut self) -> bool {
		!matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Empty))
	}

	/// Sleep for one poll interval. Returns false when shutdown arrived first.
	async fn idle(&mut self) -> bool {
		let duration = self.sleep_duration_with_jitter();
		tokio::select! {
			_ = sleep(duration) => true,
			_ = self.shutdown_rx.recv() => false,
		}
	}

	pub(crate) async fn run(&mut self) {
		loop {
			if self.shutdown_requested() {
				debug!("Shutdown requested, stopping worker");
				break;
			}
			match self.run_next_job().await {
				Ok(Some(_)) => {}
				Ok(None) if self.burst => {
					debug!("No pending jobs found. Shutting down the worker");
					break;
				}
				Ok(None) => {
					trace!("No pending jobs found, polling again");
					if !self.idle().await {
						break;
					}
				}
				Err(error) => {
					error!(%error, "Failed to fetch job");
					if !self.idle().await {
						break;
					}
				}
			}
		}
	}

	/// Claim and run the next job, if there is one.
	///
	/// Job failures are recorded on the job. Only queue access errors are
	/// returned.
	pub(crate) async fn run_next_job(&self) -> Result<Option<String>> {
		let queue = self.dispatcher.queue_store();
		let Some(job) = queue.claim_next(&self.queues, &self.name).await? else {
			return Ok(None);
		};

		let span = info_span!("job", job.id = %job.id, job.method = %job.method, site = %job.site);
		debug!(parent: &span, "Running job");

		match self.execute(&job).instrument(span.clone()).await {
			Ok(()) => {
				debug!(parent: &span, "Deleting successful job");
				queue.complete(&job.id).await?;
			}
			Err(e) => {
				warn!(parent: &span, error = %e, "Failed to run job");
				queue.fail(&job.id, &error_chain(&e)).await?;
			}
		}

		Ok(Some(job.id))
	}

	async fn execute(&self, job: &QueuedJob) -> Result<()> {
		let site = self.sites.get(&job.site)?.clone();
		let call = JobCall::from(job);
		let run = AssertUnwindSafe(self.dispatcher.execute_job(&site, &call)).catch_unwind();

		let outcome = if job.timeout_secs > 0 {
			tokio::time::timeout(Duration::from_secs(job.timeout_secs), run)
				.await
				.map_err(|_| JobError::Timeout {
					method: job.method.clone(),
					secs: job.timeout_secs,
				})?
		} else {
			run.await
		};

		outcome.map_err(|panic| JobError::failed(&job.method, panic_message(&*panic)))?
	}
}
