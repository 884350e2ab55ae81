// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use vmraid_server_db::{is_lock_contention, DbError};

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
	#[error("{method} failed: {message}")]
	Failed { method: String, message: String },

	/// Raised by a handler to ask for the job to be retried.
	#[error("retry requested: {0}")]
	Retry(String),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error(transparent)]
	Repository(#[from] DbError),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("no handler registered for {0}")]
	UnknownHandler(String),

	#[error("unknown site: {0}")]
	UnknownSite(String),

	#[error("Queue should be one of {allowed}, got {queue}")]
	InvalidQueue { queue: String, allowed: String },

	#[error("invalid schedule: {0}")]
	InvalidSchedule(String),

	#[error("{method} timed out after {secs}s")]
	Timeout { method: String, secs: u64 },

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl JobError {
	pub fn failed(method: impl Into<String>, message: impl Into<String>) -> Self {
		JobError::Failed {
			method: method.into(),
			message: message.into(),
		}
	}

	/// Lock contention and explicit retry requests are worth another attempt.
	pub fn is_retryable(&self) -> bool {
		match self {
			JobError::Retry(_) => true,
			JobError::Database(e) => is_lock_contention(e),
			JobError::Repository(e) => e.is_lock_contention(),
			_ => false,
		}
	}
}

/// The error followed by each of its sources, one per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
	let mut out = err.to_string();
	let mut source = err.source();
	while let Some(cause) = source {
		out.push_str("\nCaused by: ");
		out.push_str(&cause.to_string());
		source = cause.source();
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_retryable_errors() {
		assert!(JobError::Retry("busy".into()).is_retryable());
		assert!(JobError::Database(sqlx::Error::PoolTimedOut).is_retryable());
		assert!(JobError::Repository(DbError::Sqlx(sqlx::Error::PoolTimedOut)).is_retryable());
		assert!(!JobError::failed("app.tasks.x", "boom").is_retryable());
		assert!(!JobError::Database(sqlx::Error::RowNotFound).is_retryable());
	}

	#[test]
	fn test_error_chain_includes_sources() {
		let err = JobError::Repository(DbError::Sqlx(sqlx::Error::PoolTimedOut));
		let chain = error_chain(&err);
		assert!(chain.starts_with(&err.to_string()));

		let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
		let wrapped = sqlx::Error::Io(io);
		assert!(error_chain(&wrapped).contains("disk full"));
	}
}
