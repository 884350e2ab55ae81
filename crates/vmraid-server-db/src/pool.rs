// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::DbError;

/// How long a connection waits on another writer before `SQLITE_BUSY`.
/// Workers, the poller and tree mutations all contend for the write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_CONNECTIONS: u32 = 8;

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL {database_url:?}: {e}")))?;
	Ok(options
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(BUSY_TIMEOUT)
		.foreign_keys(true)
		.create_if_missing(true))
}

/// Open a WAL-mode pool for a site or queue database, creating the file
/// when missing.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let pool = SqlitePoolOptions::new()
		.max_connections(MAX_CONNECTIONS)
		.connect_with(connect_options(database_url)?)
		.await?;

	tracing::debug!(max_connections = MAX_CONNECTIONS, "sqlite pool ready");
	Ok(pool)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_invalid_url_is_rejected() {
		let err = connect_options("postgres://nope").unwrap_err();
		assert!(matches!(err, DbError::Internal(msg) if msg.contains("postgres://nope")));
	}

	#[tokio::test]
	async fn test_create_pool_uses_wal() {
		let dir = tempfile::tempdir().unwrap();
		let url = format!("sqlite:{}", dir.path().join("site.db").display());
		let pool = create_pool(&url).await.unwrap();

		let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(mode.to_lowercase(), "wal");
	}
}
