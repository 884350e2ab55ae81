// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use vmraid_nestedset_core::NestedSetError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Table does not exist: {0}")]
	TableMissing(String),

	#[error(transparent)]
	NestedSet(#[from] NestedSetError),
}

impl DbError {
	/// Map "no such table" failures on `table` to [`DbError::TableMissing`].
	pub fn from_query(table: &str, err: sqlx::Error) -> Self {
		match &err {
			sqlx::Error::Database(db) if db.message().contains("no such table") => {
				DbError::TableMissing(table.to_string())
			}
			_ => DbError::Sqlx(err),
		}
	}

	/// True for SQLite busy/locked failures that succeed when retried.
	pub fn is_lock_contention(&self) -> bool {
		match self {
			DbError::Sqlx(err) => is_lock_contention(err),
			_ => false,
		}
	}
}

/// SQLite primary and extended result codes for busy/locked databases.
const LOCK_CODES: &[&str] = &["5", "6", "261", "262", "517"];

pub fn is_lock_contention(err: &sqlx::Error) -> bool {
	match err {
		sqlx::Error::PoolTimedOut => true,
		sqlx::Error::Database(db) => {
			if db.code().is_some_and(|code| LOCK_CODES.contains(&code.as_ref())) {
				return true;
			}
			let msg = db.message().to_lowercase();
			msg.contains("locked") || msg.contains("deadlock") || msg.contains("lock wait timeout")
		}
		_ => false,
	}
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_pool_timeout_is_contention() {
		assert!(DbError::Sqlx(sqlx::Error::PoolTimedOut).is_lock_contention());
		assert!(!DbError::NotFound("x".into()).is_lock_contention());
		assert!(!DbError::Sqlx(sqlx::Error::RowNotFound).is_lock_contention());
	}
}
