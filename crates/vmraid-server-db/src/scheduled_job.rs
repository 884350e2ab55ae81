// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduled job types and their execution logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
	All,
	Hourly,
	HourlyLong,
	Daily,
	DailyLong,
	Weekly,
	WeeklyLong,
	Monthly,
	MonthlyLong,
	Yearly,
	Annual,
	Cron,
}

impl Frequency {
	pub fn as_str(&self) -> &'static str {
		match self {
			Frequency::All => "All",
			Frequency::Hourly => "Hourly",
			Frequency::HourlyLong => "Hourly Long",
			Frequency::Daily => "Daily",
			Frequency::DailyLong => "Daily Long",
			Frequency::Weekly => "Weekly",
			Frequency::WeeklyLong => "Weekly Long",
			Frequency::Monthly => "Monthly",
			Frequency::MonthlyLong => "Monthly Long",
			Frequency::Yearly => "Yearly",
			Frequency::Annual => "Annual",
			Frequency::Cron => "Cron",
		}
	}

	/// Parse a scheduler event key such as `daily_long`.
	pub fn from_event_type(event: &str) -> Option<Self> {
		let frequency = match event {
			"all" => Frequency::All,
			"hourly" => Frequency::Hourly,
			"hourly_long" => Frequency::HourlyLong,
			"daily" => Frequency::Daily,
			"daily_long" => Frequency::DailyLong,
			"weekly" => Frequency::Weekly,
			"weekly_long" => Frequency::WeeklyLong,
			"monthly" => Frequency::Monthly,
			"monthly_long" => Frequency::MonthlyLong,
			"yearly" => Frequency::Yearly,
			"annual" => Frequency::Annual,
			"cron" => Frequency::Cron,
			_ => return None,
		};
		Some(frequency)
	}

	/// Long frequencies run on the `long` queue.
	pub fn is_long(&self) -> bool {
		matches!(
			self,
			Frequency::HourlyLong
				| Frequency::DailyLong
				| Frequency::WeeklyLong
				| Frequency::MonthlyLong
		)
	}
}

impl std::fmt::Display for Frequency {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Frequency {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"All" => Ok(Frequency::All),
			"Hourly" => Ok(Frequency::Hourly),
			"Hourly Long" => Ok(Frequency::HourlyLong),
			"Daily" => Ok(Frequency::Daily),
			"Daily Long" => Ok(Frequency::DailyLong),
			"Weekly" => Ok(Frequency::Weekly),
			"Weekly Long" => Ok(Frequency::WeeklyLong),
			"Monthly" => Ok(Frequency::Monthly),
			"Monthly Long" => Ok(Frequency::MonthlyLong),
			"Yearly" => Ok(Frequency::Yearly),
			"Annual" => Ok(Frequency::Annual),
			"Cron" => Ok(Frequency::Cron),
			_ => Err(format!("unknown frequency: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJobType {
	pub name: String,
	pub method: String,
	pub frequency: Frequency,
	pub cron_format: Option<String>,
	pub last_execution: Option<DateTime<Utc>>,
	pub create_log: bool,
	pub stopped: bool,
	/// Server script run instead of the registered method handler.
	pub server_script: Option<String>,
}

impl ScheduledJobType {
	/// Job type keyed by its method. Every frequency except `All` logs its
	/// executions.
	pub fn new(method: impl Into<String>, frequency: Frequency) -> Self {
		let method = method.into();
		Self {
			name: method.clone(),
			method,
			frequency,
			cron_format: None,
			last_execution: None,
			create_log: frequency != Frequency::All,
			stopped: false,
			server_script: None,
		}
	}

	pub fn cron(method: impl Into<String>, cron_format: impl Into<String>) -> Self {
		Self {
			cron_format: Some(cron_format.into()),
			..Self::new(method, Frequency::Cron)
		}
	}

	pub fn with_server_script(mut self, script: impl Into<String>) -> Self {
		self.server_script = Some(script.into());
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobLogStatus {
	Start,
	Complete,
	Failed,
}

impl JobLogStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobLogStatus::Start => "Start",
			JobLogStatus::Complete => "Complete",
			JobLogStatus::Failed => "Failed",
		}
	}
}

impl std::str::FromStr for JobLogStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"Start" => Ok(JobLogStatus::Start),
			"Complete" => Ok(JobLogStatus::Complete),
			"Failed" => Ok(JobLogStatus::Failed),
			_ => Err(format!("unknown job log status: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJobLog {
	pub id: String,
	pub scheduled_job_type: String,
	pub status: JobLogStatus,
	pub details: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

type JobTypeRow = (
	String,
	String,
	String,
	Option<String>,
	Option<DateTime<Utc>>,
	bool,
	bool,
	Option<String>,
);

const JOB_TYPE_COLUMNS: &str =
	"name, method, frequency, cron_format, last_execution, create_log, stopped, server_script";

fn job_type_from_row(row: JobTypeRow) -> Result<ScheduledJobType> {
	let (name, method, frequency, cron_format, last_execution, create_log, stopped, server_script) =
		row;
	Ok(ScheduledJobType {
		name,
		method,
		frequency: frequency.parse().map_err(|e: String| DbError::Internal(e))?,
		cron_format,
		last_execution,
		create_log,
		stopped,
		server_script,
	})
}

type JobLogRow = (
	String,
	String,
	String,
	Option<String>,
	DateTime<Utc>,
	DateTime<Utc>,
);

fn job_log_from_row(row: JobLogRow) -> Result<ScheduledJobLog> {
	let (id, scheduled_job_type, status, details, created_at, updated_at) = row;
	Ok(ScheduledJobLog {
		id,
		scheduled_job_type,
		status: status.parse().map_err(|e: String| DbError::Internal(e))?,
		details,
		created_at,
		updated_at,
	})
}

#[derive(Clone)]
pub struct ScheduledJobRepository {
	pool: SqlitePool,
}

impl ScheduledJobRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert or update a job type. `last_execution` is only written on insert.
	#[tracing::instrument(skip(self, job), fields(method = %job.method))]
	pub async fn upsert(&self, job: &ScheduledJobType) -> Result<()> {
		let now = Utc::now();
		sqlx::query(
			r#"
			INSERT INTO scheduled_job_types
				(name, method, frequency, cron_format, last_execution, create_log, stopped, server_script, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(name) DO UPDATE SET
				frequency = excluded.frequency,
				cron_format = excluded.cron_format,
				create_log = excluded.create_log,
				stopped = excluded.stopped,
				server_script = excluded.server_script,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&job.name)
		.bind(&job.method)
		.bind(job.frequency.as_str())
		.bind(&job.cron_format)
		.bind(job.last_execution)
		.bind(job.create_log)
		.bind(job.stopped)
		.bind(&job.server_script)
		.bind(now)
		.bind(now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get(&self, name: &str) -> Result<Option<ScheduledJobType>> {
		let row = sqlx::query_as::<_, JobTypeRow>(&format!(
			"SELECT {JOB_TYPE_COLUMNS} FROM scheduled_job_types WHERE name = ?"
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(job_type_from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_by_method(&self, method: &str) -> Result<Option<ScheduledJobType>> {
		let row = sqlx::query_as::<_, JobTypeRow>(&format!(
			"SELECT {JOB_TYPE_COLUMNS} FROM scheduled_job_types WHERE method = ?"
		))
		.bind(method)
		.fetch_optional(&self.pool)
		.await?;

		row.map(job_type_from_row).transpose()
	}

	/// Job types the poller considers.
	#[tracing::instrument(skip(self))]
	pub async fn list_active(&self) -> Result<Vec<ScheduledJobType>> {
		let rows = sqlx::query_as::<_, JobTypeRow>(&format!(
			"SELECT {JOB_TYPE_COLUMNS} FROM scheduled_job_types WHERE stopped = 0 ORDER BY name"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(job_type_from_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_all(&self) -> Result<Vec<ScheduledJobType>> {
		let rows = sqlx::query_as::<_, JobTypeRow>(&format!(
			"SELECT {JOB_TYPE_COLUMNS} FROM scheduled_job_types ORDER BY name"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(job_type_from_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn set_stopped(&self, name: &str, stopped: bool) -> Result<()> {
		let result = sqlx::query(
			"UPDATE scheduled_job_types SET stopped = ?, updated_at = ? WHERE name = ?",
		)
		.bind(stopped)
		.bind(Utc::now())
		.bind(name)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(name.to_string()));
		}
		Ok(())
	}

	/// Delete a job type together with its logs.
	#[tracing::instrument(skip(self))]
	pub async fn delete(&self, name: &str) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query("DELETE FROM scheduled_job_logs WHERE scheduled_job_type = ?")
			.bind(name)
			.execute(&mut *tx)
			.await?;

		let result = sqlx::query("DELETE FROM scheduled_job_types WHERE name = ?")
			.bind(name)
			.execute(&mut *tx)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(name.to_string()));
		}

		tx.commit().await?;
		Ok(())
	}

	/// Persist `last_execution` and, when logging, a Start log in one commit.
	///
	/// Returns the id of the Start log.
	#[tracing::instrument(skip(self))]
	pub async fn record_start(
		&self,
		name: &str,
		create_log: bool,
		now: DateTime<Utc>,
	) -> Result<Option<String>> {
		let mut tx = self.pool.begin().await?;

		let result = sqlx::query(
			"UPDATE scheduled_job_types SET last_execution = ?, updated_at = ? WHERE name = ?",
		)
		.bind(now)
		.bind(now)
		.bind(name)
		.execute(&mut *tx)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(name.to_string()));
		}

		let log_id = if create_log {
			let id = Uuid::new_v4().to_string();
			sqlx::query(
				r#"
				INSERT INTO scheduled_job_logs (id, scheduled_job_type, status, details, created_at, updated_at)
				VALUES (?, ?, ?, NULL, ?, ?)
				"#,
			)
			.bind(&id)
			.bind(name)
			.bind(JobLogStatus::Start.as_str())
			.bind(now)
			.bind(now)
			.execute(&mut *tx)
			.await?;
			Some(id)
		} else {
			None
		};

		tx.commit().await?;
		Ok(log_id)
	}

	#[tracing::instrument(skip(self, details))]
	pub async fn set_log_status(
		&self,
		log_id: &str,
		status: JobLogStatus,
		details: Option<&str>,
	) -> Result<()> {
		let result = sqlx::query(
			"UPDATE scheduled_job_logs SET status = ?, details = ?, updated_at = ? WHERE id = ?",
		)
		.bind(status.as_str())
		.bind(details)
		.bind(Utc::now())
		.bind(log_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(log_id.to_string()));
		}
		Ok(())
	}

	/// Newest logs first.
	#[tracing::instrument(skip(self))]
	pub async fn list_logs(&self, name: &str, limit: u32) -> Result<Vec<ScheduledJobLog>> {
		let rows = sqlx::query_as::<_, JobLogRow>(
			r#"
			SELECT id, scheduled_job_type, status, details, created_at, updated_at
			FROM scheduled_job_logs
			WHERE scheduled_job_type = ?
			ORDER BY created_at DESC, rowid DESC
			LIMIT ?
			"#,
		)
		.bind(name)
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(job_log_from_row).collect()
	}

	/// Failed logs since the last completed run. Logs still in Start are
	/// ignored.
	#[tracing::instrument(skip(self))]
	pub async fn count_consecutive_failures(&self, name: &str) -> Result<u32> {
		let row = sqlx::query_as::<_, (i64,)>(
			r#"
			WITH ranked AS (
				SELECT status,
				       ROW_NUMBER() OVER (ORDER BY created_at DESC, rowid DESC) as rn
				FROM scheduled_job_logs
				WHERE scheduled_job_type = ? AND status != 'Start'
			)
			SELECT COUNT(*) as count
			FROM ranked
			WHERE status = 'Failed'
			  AND rn <= (
			      SELECT COALESCE(MIN(rn) - 1, (SELECT COUNT(*) FROM ranked))
			      FROM ranked
			      WHERE status != 'Failed'
			  )
			"#,
		)
		.bind(name)
		.fetch_one(&self.pool)
		.await?;

		Ok(row.0 as u32)
	}

	/// Creation time of the newest log across all job types.
	#[tracing::instrument(skip(self))]
	pub async fn last_log_created_at(&self) -> Result<Option<DateTime<Utc>>> {
		let row = sqlx::query_as::<_, (Option<DateTime<Utc>>,)>(
			"SELECT MAX(created_at) FROM scheduled_job_logs",
		)
		.fetch_one(&self.pool)
		.await?;
		Ok(row.0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn cleanup_old_logs(&self, retention_days: u32) -> Result<u64> {
		let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
		let result = sqlx::query("DELETE FROM scheduled_job_logs WHERE created_at < ?")
			.bind(cutoff)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
pub trait ScheduledJobStore: Send + Sync {
	async fn upsert(&self, job: &ScheduledJobType) -> Result<()>;
	async fn get(&self, name: &str) -> Result<Option<ScheduledJobType>>;
	async fn get_by_method(&self, method: &str) -> Result<Option<ScheduledJobType>>;
	async fn list_active(&self) -> Result<Vec<ScheduledJobType>>;
	async fn list_all(&self) -> Result<Vec<ScheduledJobType>>;
	async fn delete(&self, name: &str) -> Result<()>;
	async fn record_start(
		&self,
		name: &str,
		create_log: bool,
		now: DateTime<Utc>,
	) -> Result<Option<String>>;
	async fn set_log_status(
		&self,
		log_id: &str,
		status: JobLogStatus,
		details: Option<&str>,
	) -> Result<()>;
	async fn count_consecutive_failures(&self, name: &str) -> Result<u32>;
}

#[async_trait]
impl ScheduledJobStore for ScheduledJobRepository {
	async fn upsert(&self, job: &ScheduledJobType) -> Result<()> {
		self.upsert(job).await
	}

	async fn get(&self, name: &str) -> Result<Option<ScheduledJobType>> {
		self.get(name).await
	}

	async fn get_by_method(&self, method: &str) -> Result<Option<ScheduledJobType>> {
		self.get_by_method(method).await
	}

	async fn list_active(&self) -> Result<Vec<ScheduledJobType>> {
		self.list_active().await
	}

	async fn list_all(&self) -> Result<Vec<ScheduledJobType>> {
		self.list_all().await
	}

	async fn delete(&self, name: &str) -> Result<()> {
		self.delete(name).await
	}

	async fn record_start(
		&self,
		name: &str,
		create_log: bool,
		now: DateTime<Utc>,
	) -> Result<Option<String>> {
		self.record_start(name, create_log, now).await
	}

	async fn set_log_status(
		&self,
		log_id: &str,
		status: JobLogStatus,
		details: Option<&str>,
	) -> Result<()> {
		self.set_log_status(log_id, status, details).await
	}

	async fn count_consecutive_failures(&self, name: &str) -> Result<u32> {
		self.count_consecutive_failures(name).await
	}
}
