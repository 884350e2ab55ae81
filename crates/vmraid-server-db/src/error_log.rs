// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-site error log written when background jobs fail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLog {
	pub id: String,
	pub method: String,
	pub error: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ErrorLogRepository {
	pool: SqlitePool,
}

impl ErrorLogRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, error))]
	pub async fn insert(&self, method: &str, error: &str) -> Result<String> {
		let id = Uuid::new_v4().to_string();
		sqlx::query("INSERT INTO error_logs (id, method, error, created_at) VALUES (?, ?, ?, ?)")
			.bind(&id)
			.bind(method)
			.bind(error)
			.bind(Utc::now())
			.execute(&self.pool)
			.await?;
		Ok(id)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_recent(&self, limit: u32) -> Result<Vec<ErrorLog>> {
		let rows = sqlx::query_as::<_, (String, String, String, DateTime<Utc>)>(
			"SELECT id, method, error, created_at FROM error_logs ORDER BY created_at DESC, rowid DESC LIMIT ?",
		)
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(|(id, method, error, created_at)| ErrorLog {
				id,
				method,
				error,
				created_at,
			})
			.collect())
	}

	#[tracing::instrument(skip(self))]
	pub async fn cleanup(&self, retention_days: u32) -> Result<u64> {
		let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
		let result = sqlx::query("DELETE FROM error_logs WHERE created_at < ?")
			.bind(cutoff)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestDb;

	#[tokio::test]
	async fn test_insert_and_list() {
		let db = TestDb::site().await;
		let repo = ErrorLogRepository::new(db.pool.clone());

		repo.insert("app.tasks.a", "first").await.unwrap();
		repo.insert("app.tasks.b", "second").await.unwrap();

		let logs = repo.list_recent(10).await.unwrap();
		assert_eq!(logs.len(), 2);
		assert_eq!(logs[0].method, "app.tasks.b");
		assert_eq!(repo.list_recent(1).await.unwrap().len(), 1);
		assert_eq!(repo.cleanup(30).await.unwrap(), 0);
	}
}
