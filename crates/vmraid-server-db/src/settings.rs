// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-site system settings and activity.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

pub const ENABLE_SCHEDULER: &str = "enable_scheduler";
pub const PAUSE_SCHEDULER: &str = "pause_scheduler";
pub const DORMANT_DAYS: &str = "dormant_days";

#[derive(Clone)]
pub struct SystemSettingsRepository {
	pool: SqlitePool,
}

impl SystemSettingsRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn get(&self, key: &str) -> Result<Option<String>> {
		let row = sqlx::query_as::<_, (String,)>("SELECT value FROM system_settings WHERE key = ?")
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(|(value,)| value))
	}

	#[tracing::instrument(skip(self, value))]
	pub async fn set(&self, key: &str, value: &str) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO system_settings (key, value) VALUES (?, ?)
			ON CONFLICT(key) DO UPDATE SET value = excluded.value
			"#,
		)
		.bind(key)
		.bind(value)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	pub async fn get_bool(&self, key: &str) -> Result<bool> {
		Ok(self
			.get(key)
			.await?
			.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")))
	}

	pub async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
		self.set(key, if value { "1" } else { "0" }).await
	}

	pub async fn scheduler_enabled(&self) -> Result<bool> {
		self.get_bool(ENABLE_SCHEDULER).await
	}

	pub async fn scheduler_paused(&self) -> Result<bool> {
		self.get_bool(PAUSE_SCHEDULER).await
	}

	/// Site override for the dormancy threshold.
	pub async fn dormant_days(&self) -> Result<Option<u32>> {
		Ok(self.get(DORMANT_DAYS).await?.and_then(|v| v.parse().ok()))
	}

	/// Newest activity log timestamp, if any.
	#[tracing::instrument(skip(self))]
	pub async fn last_activity_at(&self) -> Result<Option<DateTime<Utc>>> {
		let row = sqlx::query_as::<_, (Option<DateTime<Utc>>,)>(
			"SELECT MAX(created_at) FROM activity_logs",
		)
		.fetch_one(&self.pool)
		.await?;
		Ok(row.0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn record_activity(&self, subject: &str, at: DateTime<Utc>) -> Result<()> {
		sqlx::query("INSERT INTO activity_logs (id, subject, created_at) VALUES (?, ?, ?)")
			.bind(uuid::Uuid::new_v4().to_string())
			.bind(subject)
			.bind(at)
			.execute(&self.pool)
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestDb;
	use chrono::TimeZone;

	#[tokio::test]
	async fn test_flags_default_to_false() {
		let db = TestDb::site().await;
		let repo = SystemSettingsRepository::new(db.pool.clone());
		assert!(!repo.scheduler_enabled().await.unwrap());
		assert!(!repo.scheduler_paused().await.unwrap());
		assert_eq!(repo.dormant_days().await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_set_and_overwrite() {
		let db = TestDb::site().await;
		let repo = SystemSettingsRepository::new(db.pool.clone());

		repo.set_bool(ENABLE_SCHEDULER, true).await.unwrap();
		assert!(repo.scheduler_enabled().await.unwrap());
		repo.set_bool(ENABLE_SCHEDULER, false).await.unwrap();
		assert!(!repo.scheduler_enabled().await.unwrap());

		repo.set(DORMANT_DAYS, "7").await.unwrap();
		assert_eq!(repo.dormant_days().await.unwrap(), Some(7));
	}

	#[tokio::test]
	async fn test_last_activity() {
		let db = TestDb::site().await;
		let repo = SystemSettingsRepository::new(db.pool.clone());
		assert_eq!(repo.last_activity_at().await.unwrap(), None);

		let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		let newer = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
		repo.record_activity("login", older).await.unwrap();
		repo.record_activity("login", newer).await.unwrap();
		assert_eq!(repo.last_activity_at().await.unwrap(), Some(newer));
	}
}
