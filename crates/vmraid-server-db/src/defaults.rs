// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Default values keyed by parent (a user, `__default` or `__global`).

use std::collections::BTreeMap;

use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Clone)]
pub struct DefaultsRepository {
	pool: SqlitePool,
}

impl DefaultsRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn list(&self, parent: &str) -> Result<BTreeMap<String, String>> {
		let rows = sqlx::query_as::<_, (String, String)>(
			"SELECT key, value FROM default_values WHERE parent = ? ORDER BY key",
		)
		.bind(parent)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.into_iter().collect())
	}

	#[tracing::instrument(skip(self, value))]
	pub async fn set(&self, parent: &str, key: &str, value: &str) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO default_values (parent, key, value) VALUES (?, ?, ?)
			ON CONFLICT(parent, key) DO UPDATE SET value = excluded.value
			"#,
		)
		.bind(parent)
		.bind(key)
		.bind(value)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Remove one key, or every key of `parent` when `key` is `None`.
	#[tracing::instrument(skip(self))]
	pub async fn delete(&self, parent: &str, key: Option<&str>) -> Result<u64> {
		let result = match key {
			Some(key) => {
				sqlx::query("DELETE FROM default_values WHERE parent = ? AND key = ?")
					.bind(parent)
					.bind(key)
					.execute(&self.pool)
					.await?
			}
			None => {
				sqlx::query("DELETE FROM default_values WHERE parent = ?")
					.bind(parent)
					.execute(&self.pool)
					.await?
			}
		};
		Ok(result.rows_affected())
	}
}
