// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NestedSetError {
	#[error("{name} cannot be added to its own descendants")]
	Recursion { name: String },

	#[error("Multiple root nodes not allowed")]
	MultipleRoots,

	#[error("Cannot delete {0} as it has child nodes")]
	ChildExists(String),

	#[error("Root {0} cannot be deleted")]
	RootDeletion(String),

	#[error("Node not found: {0}")]
	NotFound(String),

	#[error("Node already exists: {0}")]
	Duplicate(String),

	#[error("Nested set corrupted: {0}")]
	Corrupt(String),
}

pub type Result<T> = std::result::Result<T, NestedSetError>;
