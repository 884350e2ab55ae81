// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema migrations for site databases and the queue database.
//!
//! Migrations are idempotent and safe to run on every start.

use sqlx::sqlite::SqlitePool;

use crate::error::Result;

const SITE_MIGRATIONS: &[(&str, &str)] = &[
	(
		"001_scheduled_jobs",
		include_str!("../migrations/site/001_scheduled_jobs.sql"),
	),
	(
		"002_site_state",
		include_str!("../migrations/site/002_site_state.sql"),
	),
];

const QUEUE_MIGRATIONS: &[(&str, &str)] = &[(
	"001_background_jobs",
	include_str!("../migrations/queue/001_background_jobs.sql"),
)];

#[tracing::instrument(skip(pool))]
pub async fn run_site_migrations(pool: &SqlitePool) -> Result<()> {
	apply(pool, SITE_MIGRATIONS).await
}

#[tracing::instrument(skip(pool))]
pub async fn run_queue_migrations(pool: &SqlitePool) -> Result<()> {
	apply(pool, QUEUE_MIGRATIONS).await
}

async fn apply(pool: &SqlitePool, migrations: &[(&str, &str)]) -> Result<()> {
	for (name, sql) in migrations {
		for stmt in statements(sql) {
			if let Err(e) = sqlx::query(stmt).execute(pool).await {
				let msg = e.to_string();
				if !msg.contains("already exists") && !msg.contains("duplicate column") {
					return Err(e.into());
				}
			}
		}
		tracing::debug!(migration = name, "migration applied");
	}
	Ok(())
}

/// Split a script on `;`, dropping comment-only fragments.
fn statements(sql: &str) -> impl Iterator<Item = &str> {
	sql.split(';').filter(|stmt| {
		stmt
			.lines()
			.any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_statements_skip_comments() {
		let sql = "-- header\nCREATE TABLE a (x INTEGER);\n\n-- trailing\n";
		let stmts: Vec<&str> = statements(sql).collect();
		assert_eq!(stmts.len(), 1);
		assert!(stmts[0].contains("CREATE TABLE a"));
	}

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let pool = SqlitePool::connect(":memory:").await.unwrap();
		run_site_migrations(&pool).await.unwrap();
		run_site_migrations(&pool).await.unwrap();
		run_queue_migrations(&pool).await.unwrap();
		run_queue_migrations(&pool).await.unwrap();

		let (count,): (i64,) = sqlx::query_as(
			"SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('scheduled_job_types', 'background_jobs', 'default_values')",
		)
		.fetch_one(&pool)
		.await
		.unwrap();
		assert_eq!(count, 3);
	}
}
