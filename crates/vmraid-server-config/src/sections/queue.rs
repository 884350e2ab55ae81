// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background queue configuration section.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueConfigLayer {
	pub database_url: Option<String>,
	/// Extra queues (or overridden built-in timeouts) in seconds.
	pub timeouts: Option<BTreeMap<String, u64>>,
	pub workers: Option<usize>,
	pub poll_interval_ms: Option<u64>,
	pub jitter_ms: Option<u64>,
	pub max_retries: Option<u32>,
	pub retry_base_delay_ms: Option<u64>,
}

impl QueueConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.database_url.is_some() {
			self.database_url = other.database_url;
		}
		if let Some(timeouts) = other.timeouts {
			self.timeouts.get_or_insert_with(BTreeMap::new).extend(timeouts);
		}
		if other.workers.is_some() {
			self.workers = other.workers;
		}
		if other.poll_interval_ms.is_some() {
			self.poll_interval_ms = other.poll_interval_ms;
		}
		if other.jitter_ms.is_some() {
			self.jitter_ms = other.jitter_ms;
		}
		if other.max_retries.is_some() {
			self.max_retries = other.max_retries;
		}
		if other.retry_base_delay_ms.is_some() {
			self.retry_base_delay_ms = other.retry_base_delay_ms;
		}
	}

	pub fn finalize(self) -> QueueConfig {
		let defaults = QueueConfig::default();
		let mut timeouts = defaults.timeouts;
		timeouts.extend(self.timeouts.unwrap_or_default());

		QueueConfig {
			database_url: self.database_url.unwrap_or(defaults.database_url),
			timeouts,
			workers: self.workers.unwrap_or(defaults.workers).max(1),
			poll_interval_ms: self.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
			jitter_ms: self.jitter_ms.unwrap_or(defaults.jitter_ms),
			max_retries: self.max_retries.unwrap_or(defaults.max_retries),
			retry_base_delay_ms: self
				.retry_base_delay_ms
				.unwrap_or(defaults.retry_base_delay_ms),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
	pub database_url: String,
	/// Allowed queue names and their job timeout in seconds.
	pub timeouts: BTreeMap<String, u64>,
	/// Worker tasks per `worker` process.
	pub workers: usize,
	pub poll_interval_ms: u64,
	pub jitter_ms: u64,
	pub max_retries: u32,
	pub retry_base_delay_ms: u64,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			database_url: "sqlite:./queue.db".to_string(),
			timeouts: BTreeMap::from([
				("default".to_string(), 300),
				("short".to_string(), 300),
				("long".to_string(), 1500),
			]),
			workers: 1,
			poll_interval_ms: 1000,
			jitter_ms: 250,
			max_retries: 5,
			retry_base_delay_ms: 1000,
		}
	}
}
