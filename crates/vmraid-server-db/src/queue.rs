// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared background job queue.
//!
//! Every queue is a FIFO ordered by `position`. Pushing to the front takes a
//! position below the current minimum. Claiming flips the head row from
//! `queued` to `started` in a single statement, so two workers never claim the
//! same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
	Queued,
	Started,
	Failed,
}

impl JobState {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobState::Queued => "queued",
			JobState::Started => "started",
			JobState::Failed => "failed",
		}
	}
}

impl std::str::FromStr for JobState {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"queued" => Ok(JobState::Queued),
			"started" => Ok(JobState::Started),
			"failed" => Ok(JobState::Failed),
			_ => Err(format!("unknown job state: {s}")),
		}
	}
}

/// Call descriptor pushed by `enqueue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueuedJob {
	pub queue: String,
	pub site: String,
	pub method: String,
	pub job_name: String,
	pub kwargs: serde_json::Value,
	pub user: Option<String>,
	pub event: Option<String>,
	pub timeout_secs: u64,
	pub at_front: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
	pub id: String,
	pub queue: String,
	pub site: String,
	pub method: String,
	pub job_name: String,
	pub kwargs: serde_json::Value,
	pub user: Option<String>,
	pub event: Option<String>,
	pub timeout_secs: u64,
	pub position: i64,
	pub state: JobState,
	pub worker: Option<String>,
	pub error: Option<String>,
	pub enqueued_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub ended_at: Option<DateTime<Utc>>,
}

/// Optional filters for listing and purging.
#[derive(Debug, Clone, Default)]
pub struct JobFilter<'a> {
	pub queues: Option<&'a [String]>,
	pub site: Option<&'a str>,
	pub event: Option<&'a str>,
	pub states: &'a [JobState],
}

type QueuedJobRow = (
	String,
	String,
	String,
	String,
	String,
	String,
	Option<String>,
	Option<String>,
	i64,
	i64,
	String,
	Option<String>,
	Option<String>,
	DateTime<Utc>,
	Option<DateTime<Utc>>,
	Option<DateTime<Utc>>,
);

const JOB_COLUMNS: &str = "id, queue, site, method, job_name, kwargs, user, event, timeout_secs, position, state, worker, error, enqueued_at, started_at, ended_at";

fn job_from_row(row: QueuedJobRow) -> Result<QueuedJob> {
	let (
		id,
		queue,
		site,
		method,
		job_name,
		kwargs,
		user,
		event,
		timeout_secs,
		position,
		state,
		worker,
		error,
		enqueued_at,
		started_at,
		ended_at,
	) = row;

	Ok(QueuedJob {
		id,
		queue,
		site,
		method,
		job_name,
		kwargs: serde_json::from_str(&kwargs)?,
		user,
		event,
		timeout_secs: timeout_secs.max(0) as u64,
		position,
		state: state.parse().map_err(|e: String| DbError::Internal(e))?,
		worker,
		error,
		enqueued_at,
		started_at,
		ended_at,
	})
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &JobFilter<'a>) {
	builder.push(" WHERE 1 = 1");
	if let Some(queues) = filter.queues {
		builder.push(" AND queue IN (");
		let mut separated = builder.separated(", ");
		for queue in queues {
			separated.push_bind(queue.as_str());
		}
		separated.push_unseparated(")");
	}
	if let Some(site) = filter.site {
		builder.push(" AND site = ").push_bind(site);
	}
	if let Some(event) = filter.event {
		builder.push(" AND event = ").push_bind(event);
	}
	if !filter.states.is_empty() {
		builder.push(" AND state IN (");
		let mut separated = builder.separated(", ");
		for state in filter.states {
			separated.push_bind(state.as_str());
		}
		separated.push_unseparated(")");
	}
}

#[derive(Clone)]
pub struct QueueRepository {
	pool: SqlitePool,
}

impl QueueRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, job), fields(queue = %job.queue, site = %job.site, method = %job.method))]
	pub async fn push(&self, job: &NewQueuedJob) -> Result<String> {
		let id = Uuid::new_v4().to_string();
		let kwargs = serde_json::to_string(&job.kwargs)?;
		let position_sql = if job.at_front {
			"(SELECT COALESCE(MIN(position), 0) - 1 FROM background_jobs WHERE queue = ?)"
		} else {
			"(SELECT COALESCE(MAX(position), 0) + 1 FROM background_jobs WHERE queue = ?)"
		};

		sqlx::query(&format!(
			r#"
			INSERT INTO background_jobs
				(id, queue, site, method, job_name, kwargs, user, event, timeout_secs, position, state, enqueued_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, {position_sql}, 'queued', ?)
			"#
		))
		.bind(&id)
		.bind(&job.queue)
		.bind(&job.site)
		.bind(&job.method)
		.bind(&job.job_name)
		.bind(&kwargs)
		.bind(&job.user)
		.bind(&job.event)
		.bind(job.timeout_secs as i64)
		.bind(&job.queue)
		.bind(Utc::now())
		.execute(&self.pool)
		.await?;

		tracing::debug!(job_id = %id, "job pushed");
		Ok(id)
	}

	/// Claim the head of the first non-empty queue in `queues`.
	#[tracing::instrument(skip(self))]
	pub async fn claim_next(&self, queues: &[String], worker: &str) -> Result<Option<QueuedJob>> {
		for queue in queues {
			let row = sqlx::query_as::<_, QueuedJobRow>(&format!(
				r#"
				UPDATE background_jobs
				SET state = 'started', worker = ?, started_at = ?
				WHERE id = (
					SELECT id FROM background_jobs
					WHERE queue = ? AND state = 'queued'
					ORDER BY position
					LIMIT 1
				) AND state = 'queued'
				RETURNING {JOB_COLUMNS}
				"#
			))
			.bind(worker)
			.bind(Utc::now())
			.bind(queue)
			.fetch_optional(&self.pool)
			.await?;

			if let Some(row) = row {
				return job_from_row(row).map(Some);
			}
		}
		Ok(None)
	}

	/// Successful jobs leave the queue.
	#[tracing::instrument(skip(self))]
	pub async fn complete(&self, id: &str) -> Result<()> {
		sqlx::query("DELETE FROM background_jobs WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Move a job to the failed registry.
	#[tracing::instrument(skip(self, error))]
	pub async fn fail(&self, id: &str, error: &str) -> Result<()> {
		let result = sqlx::query(
			"UPDATE background_jobs SET state = 'failed', error = ?, ended_at = ? WHERE id = ?",
		)
		.bind(error)
		.bind(Utc::now())
		.bind(id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(id.to_string()));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get(&self, id: &str) -> Result<Option<QueuedJob>> {
		let row = sqlx::query_as::<_, QueuedJobRow>(&format!(
			"SELECT {JOB_COLUMNS} FROM background_jobs WHERE id = ?"
		))
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(job_from_row).transpose()
	}

	/// Jobs matching `filter` in queue order.
	#[tracing::instrument(skip(self, filter))]
	pub async fn list(&self, filter: &JobFilter<'_>) -> Result<Vec<QueuedJob>> {
		let mut builder = QueryBuilder::<Sqlite>::new(format!(
			"SELECT {JOB_COLUMNS} FROM background_jobs"
		));
		push_filter(&mut builder, filter);
		builder.push(" ORDER BY queue, position");

		let rows = builder
			.build_query_as::<QueuedJobRow>()
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(job_from_row).collect()
	}

	/// Delete queued (not started) jobs matching `filter`.
	#[tracing::instrument(skip(self, filter))]
	pub async fn purge(&self, filter: &JobFilter<'_>) -> Result<u64> {
		let queued = [JobState::Queued];
		let filter = JobFilter {
			states: &queued,
			..filter.clone()
		};
		let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM background_jobs");
		push_filter(&mut builder, &filter);

		let result = builder.build().execute(&self.pool).await?;
		Ok(result.rows_affected())
	}

	/// True when a job named `job_name` for `site` is queued or running.
	#[tracing::instrument(skip(self))]
	pub async fn is_pending(&self, site: &str, job_name: &str) -> Result<bool> {
		let (count,): (i64,) = sqlx::query_as(
			r#"
			SELECT COUNT(*) FROM background_jobs
			WHERE site = ? AND job_name = ? AND state IN ('queued', 'started')
			"#,
		)
		.bind(site)
		.bind(job_name)
		.fetch_one(&self.pool)
		.await?;

		Ok(count > 0)
	}

	/// Reset `started` jobs owned by a worker that is gone.
	#[tracing::instrument(skip(self))]
	pub async fn requeue_worker(&self, worker: &str) -> Result<u64> {
		let result = sqlx::query(
			"UPDATE background_jobs SET state = 'queued', worker = NULL, started_at = NULL WHERE worker = ? AND state = 'started'",
		)
		.bind(worker)
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	/// Drop failed jobs of `site` that ended more than `retention_days` ago.
	#[tracing::instrument(skip(self))]
	pub async fn cleanup_failed(&self, site: &str, retention_days: u32) -> Result<u64> {
		let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
		let result = sqlx::query(
			"DELETE FROM background_jobs WHERE site = ? AND state = 'failed' AND ended_at < ?",
		)
		.bind(site)
		.bind(cutoff)
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}
}

#[async_trait]
pub trait QueueStore: Send + Sync {
	async fn push(&self, job: &NewQueuedJob) -> Result<String>;
	async fn claim_next(&self, queues: &[String], worker: &str) -> Result<Option<QueuedJob>>;
	async fn complete(&self, id: &str) -> Result<()>;
	async fn fail(&self, id: &str, error: &str) -> Result<()>;
	async fn list(&self, filter: &JobFilter<'_>) -> Result<Vec<QueuedJob>>;
	async fn purge(&self, filter: &JobFilter<'_>) -> Result<u64>;
	async fn is_pending(&self, site: &str, job_name: &str) -> Result<bool>;
	async fn requeue_worker(&self, worker: &str) -> Result<u64>;
	async fn cleanup_failed(&self, site: &str, retention_days: u32) -> Result<u64>;
}

#[async_trait]
impl QueueStore for QueueRepository {
	async fn push(&self, job: &NewQueuedJob) -> Result<String> {
		self.push(job).await
	}

	async fn claim_next(&self, queues: &[String], worker: &str) -> Result<Option<QueuedJob>> {
		self.claim_next(queues, worker).await
	}

	async fn complete(&self, id: &str) -> Result<()> {
		self.complete(id).await
	}

	async fn fail(&self, id: &str, error: &str) -> Result<()> {
		self.fail(id, error).await
	}

	async fn list(&self, filter: &JobFilter<'_>) -> Result<Vec<QueuedJob>> {
		self.list(filter).await
	}

	async fn purge(&self, filter: &JobFilter<'_>) -> Result<u64> {
		self.purge(filter).await
	}

	async fn is_pending(&self, site: &str, job_name: &str) -> Result<bool> {
		self.is_pending(site, job_name).await
	}

	async fn requeue_worker(&self, worker: &str) -> Result<u64> {
		self.requeue_worker(worker).await
	}

	async fn cleanup_failed(&self, site: &str, retention_days: u32) -> Result<u64> {
		self.cleanup_failed(site, retention_days).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestDb;
	use serde_json::json;

	fn job(queue: &str, site: &str, method: &str) -> NewQueuedJob {
		NewQueuedJob {
			queue: queue.to_string(),
			site: site.to_string(),
			method: method.to_string(),
			job_name: method.to_string(),
			kwargs: json!({}),
			user: None,
			event: None,
			timeout_secs: 300,
			at_front: false,
		}
	}

	fn queues(names: &[&str]) -> Vec<String> {
		names.iter().map(|s| s.to_string()).collect()
	}

	#[tokio::test]
	async fn test_fifo_with_at_front() {
		let db = TestDb::queue().await;
		let repo = QueueRepository::new(db.pool.clone());

		repo.push(&job("default", "s", "first")).await.unwrap();
		repo.push(&job("default", "s", "second")).await.unwrap();
		repo
			.push(&NewQueuedJob {
				at_front: true,
				..job("default", "s", "urgent")
			})
			.await
			.unwrap();

		let default = queues(&["default"]);
		let mut order = Vec::new();
		while let Some(claimed) = repo.claim_next(&default, "w1").await.unwrap() {
			assert_eq!(claimed.state, JobState::Started);
			assert_eq!(claimed.worker.as_deref(), Some("w1"));
			order.push(claimed.method);
		}
		assert_eq!(order, vec!["urgent", "first", "second"]);
	}

	#[tokio::test]
	async fn test_claim_respects_queue_order() {
		let db = TestDb::queue().await;
		let repo = QueueRepository::new(db.pool.clone());

		repo.push(&job("long", "s", "slow")).await.unwrap();
		repo.push(&job("short", "s", "quick")).await.unwrap();

		let claimed = repo
			.claim_next(&queues(&["short", "long"]), "w")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(claimed.method, "quick");

		let none = repo.claim_next(&queues(&["short"]), "w").await.unwrap();
		assert!(none.is_none());
	}

	#[tokio::test]
	async fn test_complete_and_fail() {
		let db = TestDb::queue().await;
		let repo = QueueRepository::new(db.pool.clone());

		let ok = repo.push(&job("default", "s", "ok")).await.unwrap();
		let bad = repo.push(&job("default", "s", "bad")).await.unwrap();

		repo.complete(&ok).await.unwrap();
		repo.fail(&bad, "Traceback: boom").await.unwrap();

		assert!(repo.get(&ok).await.unwrap().is_none());
		let failed = repo.get(&bad).await.unwrap().unwrap();
		assert_eq!(failed.state, JobState::Failed);
		assert_eq!(failed.error.as_deref(), Some("Traceback: boom"));
		assert!(failed.ended_at.is_some());
	}

	#[tokio::test]
	async fn test_is_pending_ignores_failed_and_other_sites() {
		let db = TestDb::queue().await;
		let repo = QueueRepository::new(db.pool.clone());

		let id = repo.push(&job("default", "a", "m")).await.unwrap();
		assert!(repo.is_pending("a", "m").await.unwrap());
		assert!(!repo.is_pending("b", "m").await.unwrap());

		repo.claim_next(&queues(&["default"]), "w").await.unwrap();
		assert!(repo.is_pending("a", "m").await.unwrap());

		repo.fail(&id, "x").await.unwrap();
		assert!(!repo.is_pending("a", "m").await.unwrap());
	}

	#[tokio::test]
	async fn test_list_and_purge_filters() {
		let db = TestDb::queue().await;
		let repo = QueueRepository::new(db.pool.clone());

		repo
			.push(&NewQueuedJob {
				event: Some("daily".to_string()),
				..job("default", "a", "m1")
			})
			.await
			.unwrap();
		repo.push(&job("default", "a", "m2")).await.unwrap();
		repo.push(&job("long", "b", "m3")).await.unwrap();
		repo.push(&job("long", "a", "m4")).await.unwrap();
		repo.claim_next(&queues(&["long"]), "w").await.unwrap();

		let all = repo.list(&JobFilter::default()).await.unwrap();
		assert_eq!(all.len(), 4);

		let long = queues(&["long"]);
		let started = repo
			.list(&JobFilter {
				queues: Some(&long),
				states: &[JobState::Started],
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(started.len(), 1);
		assert_eq!(started[0].method, "m3");

		let purged = repo
			.purge(&JobFilter {
				event: Some("daily"),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(purged, 1);

		// Started jobs are never purged.
		let purged = repo.purge(&JobFilter::default()).await.unwrap();
		assert_eq!(purged, 2);
		assert_eq!(repo.list(&JobFilter::default()).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_kwargs_roundtrip() {
		let db = TestDb::queue().await;
		let repo = QueueRepository::new(db.pool.clone());

		let id = repo
			.push(&NewQueuedJob {
				kwargs: json!({"job_type": "app.tasks.flush", "n": 3}),
				user: Some("Administrator".to_string()),
				..job("short", "s", "run")
			})
			.await
			.unwrap();
		let stored = repo.get(&id).await.unwrap().unwrap();
		assert_eq!(stored.kwargs["job_type"], "app.tasks.flush");
		assert_eq!(stored.user.as_deref(), Some("Administrator"));
		assert_eq!(stored.timeout_secs, 300);
	}

	#[tokio::test]
	async fn test_requeue_worker() {
		let db = TestDb::queue().await;
		let repo = QueueRepository::new(db.pool.clone());

		let id = repo.push(&job("default", "s", "m")).await.unwrap();
		repo.claim_next(&queues(&["default"]), "dead").await.unwrap();
		assert_eq!(repo.requeue_worker("dead").await.unwrap(), 1);

		let job = repo.get(&id).await.unwrap().unwrap();
		assert_eq!(job.state, JobState::Queued);
		assert!(job.worker.is_none());
	}

	#[tokio::test]
	async fn test_cleanup_failed_keeps_recent_and_other_sites() {
		let db = TestDb::queue().await;
		let repo = QueueRepository::new(db.pool.clone());

		let old = repo.push(&job("default", "a", "old")).await.unwrap();
		let recent = repo.push(&job("default", "a", "recent")).await.unwrap();
		let other = repo.push(&job("default", "b", "other")).await.unwrap();
		let queued = repo.push(&job("default", "a", "queued")).await.unwrap();
		for id in [&old, &recent, &other] {
			repo.fail(id, "boom").await.unwrap();
		}
		let long_ago = Utc::now() - chrono::Duration::days(60);
		sqlx::query("UPDATE background_jobs SET ended_at = ? WHERE id IN (?, ?)")
			.bind(long_ago)
			.bind(&old)
			.bind(&other)
			.execute(&db.pool)
			.await
			.unwrap();

		assert_eq!(repo.cleanup_failed("a", 30).await.unwrap(), 1);
		assert!(repo.get(&old).await.unwrap().is_none());
		assert!(repo.get(&recent).await.unwrap().is_some());
		assert!(repo.get(&other).await.unwrap().is_some());
		assert!(repo.get(&queued).await.unwrap().is_some());
	}
}
