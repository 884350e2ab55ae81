// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::{Arc, Mutex, MutexGuard};

use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::debug;
use vmraid_server_db::{NewQueuedJob, QueueStore};

use crate::error::Result;
use crate::sites::Site;

pub const ADMINISTRATOR: &str = "Administrator";

/// Who is running and in which mode, passed explicitly to dispatch and sync.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
	pub user: String,
	pub in_migrate: bool,
	pub in_install: bool,
	pub in_test: bool,
	/// Run due scheduled jobs inline instead of queueing them.
	pub execute_job: bool,
	enqueued_jobs: Option<Arc<Mutex<Vec<String>>>>,
}

impl Default for ExecutionContext {
	fn default() -> Self {
		Self::for_user(ADMINISTRATOR)
	}
}

impl ExecutionContext {
	pub fn for_user(user: impl Into<String>) -> Self {
		Self {
			user: user.into(),
			in_migrate: false,
			in_install: false,
			in_test: false,
			execute_job: false,
			enqueued_jobs: None,
		}
	}

	/// Context for a worker running a job on behalf of `user`.
	pub fn background(user: Option<&str>) -> Self {
		Self::for_user(user.unwrap_or(ADMINISTRATOR))
	}

	pub fn migrating(mut self) -> Self {
		self.in_migrate = true;
		self
	}

	pub fn installing(mut self) -> Self {
		self.in_install = true;
		self
	}

	pub fn testing(mut self) -> Self {
		self.in_test = true;
		self
	}

	pub fn executing_jobs(mut self) -> Self {
		self.execute_job = true;
		self
	}

	/// Start recording which scheduled jobs get enqueued.
	pub fn tracking_enqueued(mut self) -> Self {
		self.enqueued_jobs = Some(Arc::new(Mutex::new(Vec::new())));
		self
	}

	/// Migrations and test runs execute enqueued jobs in-process.
	pub fn runs_inline(&self) -> bool {
		self.in_migrate || self.in_test
	}

	/// Installs and migrations must not start scheduled jobs.
	pub fn suppresses_scheduling(&self) -> bool {
		self.in_install || self.in_migrate
	}

	pub fn record_enqueued(&self, method: &str) {
		if let Some(jobs) = &self.enqueued_jobs {
			lock(jobs).push(method.to_string());
		}
	}

	pub fn enqueued_jobs(&self) -> Vec<String> {
		self.enqueued_jobs
			.as_ref()
			.map(|jobs| lock(jobs).clone())
			.unwrap_or_default()
	}
}

fn lock(jobs: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
	jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An open transaction on one site database.
///
/// Jobs enqueued with `enqueue_after_commit` are held here and pushed only
/// once the transaction commits; a rollback discards them.
pub struct SiteSession {
	site: Site,
	context: ExecutionContext,
	tx: Transaction<'static, Sqlite>,
	after_commit: Vec<NewQueuedJob>,
}

impl SiteSession {
	pub async fn begin(site: &Site, context: ExecutionContext) -> Result<Self> {
		let tx = site.pool().begin().await?;
		Ok(Self {
			site: site.clone(),
			context,
			tx,
			after_commit: Vec::new(),
		})
	}

	pub fn site(&self) -> &Site {
		&self.site
	}

	pub fn context(&self) -> &ExecutionContext {
		&self.context
	}

	pub fn user(&self) -> &str {
		&self.context.user
	}

	pub fn conn(&mut self) -> &mut SqliteConnection {
		&mut *self.tx
	}

	pub fn enqueue_after_commit(&mut self, job: NewQueuedJob) {
		self.after_commit.push(job);
	}

	pub fn pending_after_commit(&self) -> &[NewQueuedJob] {
		&self.after_commit
	}

	/// Commit, then push the buffered jobs. Returns how many were pushed.
	pub async fn commit(self, queue: &dyn QueueStore) -> Result<usize> {
		let SiteSession {
			site,
			tx,
			after_commit,
			..
		} = self;
		tx.commit().await?;
		for job in &after_commit {
			queue.push(job).await?;
		}
		if !after_commit.is_empty() {
			debug!(site = %site.name(), count = after_commit.len(), "flushed jobs enqueued after commit");
		}
		Ok(after_commit.len())
	}

	pub async fn rollback(self) -> Result<()> {
		if !self.after_commit.is_empty() {
			debug!(
				site = %self.site.name(),
				count = self.after_commit.len(),
				"discarding jobs enqueued after commit"
			);
		}
		self.tx.rollback().await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use vmraid_server_db::testing::TestDb;
	use vmraid_server_db::{JobFilter, QueueRepository};

	fn job(method: &str) -> NewQueuedJob {
		NewQueuedJob {
			queue: "default".into(),
			site: "site1.local".into(),
			method: method.into(),
			job_name: method.into(),
			kwargs: serde_json::json!({}),
			user: None,
			event: None,
			timeout_secs: 300,
			at_front: false,
		}
	}

	#[test]
	fn test_context_flags() {
		let ctx = ExecutionContext::default();
		assert_eq!(ctx.user, ADMINISTRATOR);
		assert!(!ctx.suppresses_scheduling());
		assert!(ExecutionContext::default().migrating().suppresses_scheduling());
		assert!(ExecutionContext::default().installing().suppresses_scheduling());
		assert_eq!(ExecutionContext::background(Some("alice")).user, "alice");

		assert!(!ctx.runs_inline());
		assert!(ExecutionContext::default().migrating().runs_inline());
		let testing = ExecutionContext::default().testing();
		assert!(testing.runs_inline());
		assert!(!testing.suppresses_scheduling());
	}

	#[test]
	fn test_enqueued_jobs_shared_between_clones() {
		let ctx = ExecutionContext::default();
		ctx.record_enqueued("ignored");
		assert!(ctx.enqueued_jobs().is_empty());

		let ctx = ExecutionContext::default().tracking_enqueued();
		let clone = ctx.clone();
		clone.record_enqueued("app.tasks.a");
		ctx.record_enqueued("app.tasks.b");
		assert_eq!(ctx.enqueued_jobs(), vec!["app.tasks.a", "app.tasks.b"]);
	}

	#[tokio::test]
	async fn test_after_commit_jobs_pushed_on_commit() {
		let site_db = TestDb::site().await;
		let queue_db = TestDb::queue().await;
		let site = Site::new("site1.local", site_db.pool.clone());
		let queue = QueueRepository::new(queue_db.pool.clone());

		let mut session = SiteSession::begin(&site, ExecutionContext::default())
			.await
			.unwrap();
		sqlx::query("INSERT INTO system_settings (key, value) VALUES ('k', 'v')")
			.execute(session.conn())
			.await
			.unwrap();
		session.enqueue_after_commit(job("app.tasks.notify"));
		assert!(queue.list(&JobFilter::default()).await.unwrap().is_empty());

		assert_eq!(session.commit(&queue).await.unwrap(), 1);
		let jobs = queue.list(&JobFilter::default()).await.unwrap();
		assert_eq!(jobs.len(), 1);
		assert_eq!(jobs[0].method, "app.tasks.notify");
	}

	#[tokio::test]
	async fn test_after_commit_jobs_discarded_on_rollback() {
		let site_db = TestDb::site().await;
		let queue_db = TestDb::queue().await;
		let site = Site::new("site1.local", site_db.pool.clone());
		let queue = QueueRepository::new(queue_db.pool.clone());

		let mut session = SiteSession::begin(&site, ExecutionContext::default())
			.await
			.unwrap();
		sqlx::query("INSERT INTO system_settings (key, value) VALUES ('k', 'v')")
			.execute(session.conn())
			.await
			.unwrap();
		session.enqueue_after_commit(job("app.tasks.notify"));
		session.rollback().await.unwrap();

		assert!(queue.list(&JobFilter::default()).await.unwrap().is_empty());
		let row = sqlx::query_as::<_, (String,)>("SELECT value FROM system_settings WHERE key = 'k'")
			.fetch_optional(&site_db.pool)
			.await
			.unwrap();
		assert!(row.is_none());
	}
}
