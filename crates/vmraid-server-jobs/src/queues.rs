// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use vmraid_server_config::QueueConfig;

use crate::error::{JobError, Result};

pub const DEFAULT_QUEUE: &str = "default";
pub const SHORT_QUEUE: &str = "short";
pub const LONG_QUEUE: &str = "long";

/// The queues jobs may be sent to, with their timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSet {
	timeouts: BTreeMap<String, u64>,
}

impl Default for QueueSet {
	fn default() -> Self {
		Self::new(BTreeMap::new())
	}
}

impl QueueSet {
	/// The three built-in queues plus `custom`, which may override their timeouts.
	pub fn new(custom: BTreeMap<String, u64>) -> Self {
		let mut timeouts: BTreeMap<String, u64> = [
			(DEFAULT_QUEUE.to_string(), 300),
			(SHORT_QUEUE.to_string(), 300),
			(LONG_QUEUE.to_string(), 1500),
		]
		.into_iter()
		.collect();
		timeouts.extend(custom);
		Self { timeouts }
	}

	pub fn from_config(config: &QueueConfig) -> Self {
		Self::new(config.timeouts.clone())
	}

	pub fn validate(&self, queue: &str) -> Result<()> {
		self.timeout(queue).map(|_| ())
	}

	pub fn timeout(&self, queue: &str) -> Result<u64> {
		self.timeouts
			.get(queue)
			.copied()
			.ok_or_else(|| JobError::InvalidQueue {
				queue: queue.to_string(),
				allowed: self.names().join(", "),
			})
	}

	pub fn names(&self) -> Vec<String> {
		self.timeouts.keys().cloned().collect()
	}

	/// The requested queues after validation, or every queue.
	pub fn resolve(&self, requested: &[String]) -> Result<Vec<String>> {
		if requested.is_empty() {
			return Ok(self.names());
		}
		for queue in requested {
			self.validate(queue)?;
		}
		Ok(requested.to_vec())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builtin_queues() {
		let queues = QueueSet::default();
		assert_eq!(queues.timeout("default").unwrap(), 300);
		assert_eq!(queues.timeout("short").unwrap(), 300);
		assert_eq!(queues.timeout("long").unwrap(), 1500);
		assert!(matches!(
			queues.timeout("urgent"),
			Err(JobError::InvalidQueue { queue, .. }) if queue == "urgent"
		));
	}

	#[test]
	fn test_custom_queues_extend_allow_list() {
		let queues = QueueSet::new([("reports".to_string(), 3600)].into_iter().collect());
		assert_eq!(queues.timeout("reports").unwrap(), 3600);
		assert_eq!(queues.names(), vec!["default", "long", "reports", "short"]);
	}

	#[test]
	fn test_resolve() {
		let queues = QueueSet::default();
		assert_eq!(queues.resolve(&[]).unwrap().len(), 3);
		assert_eq!(
			queues.resolve(&["long".to_string()]).unwrap(),
			vec!["long".to_string()]
		);
		assert!(queues.resolve(&["nope".to_string()]).is_err());
	}

	#[test]
	fn test_from_config() {
		let config = QueueConfig::default();
		let queues = QueueSet::from_config(&config);
		assert!(queues.validate("default").is_ok());
	}
}
