// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use vmraid_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
	#[error("Cache backend error: {0}")]
	Backend(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error(transparent)]
	Database(#[from] DbError),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
	fn from(e: redis::RedisError) -> Self {
		CacheError::Backend(e.to_string())
	}
}

pub type Result<T> = std::result::Result<T, CacheError>;
