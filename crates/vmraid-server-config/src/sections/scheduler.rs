// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduler poller configuration section.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 240;
pub const DEFAULT_DORMANT_DAYS: u32 = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfigLayer {
	pub tick_interval_secs: Option<u64>,
	pub scheduler_interval_secs: Option<u64>,
	pub timezone: Option<String>,
	pub disable_scheduler: Option<bool>,
	pub maintenance_mode: Option<bool>,
	pub dormant_days: Option<u32>,
	pub sites_path: Option<PathBuf>,
	pub events_path: Option<PathBuf>,
}

impl SchedulerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.tick_interval_secs.is_some() {
			self.tick_interval_secs = other.tick_interval_secs;
		}
		if other.scheduler_interval_secs.is_some() {
			self.scheduler_interval_secs = other.scheduler_interval_secs;
		}
		if other.timezone.is_some() {
			self.timezone = other.timezone;
		}
		if other.disable_scheduler.is_some() {
			self.disable_scheduler = other.disable_scheduler;
		}
		if other.maintenance_mode.is_some() {
			self.maintenance_mode = other.maintenance_mode;
		}
		if other.dormant_days.is_some() {
			self.dormant_days = other.dormant_days;
		}
		if other.sites_path.is_some() {
			self.sites_path = other.sites_path;
		}
		if other.events_path.is_some() {
			self.events_path = other.events_path;
		}
	}

	pub fn finalize(self) -> SchedulerConfig {
		let defaults = SchedulerConfig::default();
		SchedulerConfig {
			tick_interval_secs: self
				.tick_interval_secs
				.filter(|secs| *secs > 0)
				.unwrap_or(defaults.tick_interval_secs),
			// Zero is kept so the schedule layer can fall back to its own default.
			scheduler_interval_secs: self
				.scheduler_interval_secs
				.unwrap_or(defaults.scheduler_interval_secs),
			timezone: self.timezone.unwrap_or(defaults.timezone),
			disable_scheduler: self.disable_scheduler.unwrap_or(false),
			maintenance_mode: self.maintenance_mode.unwrap_or(false),
			dormant_days: self.dormant_days.unwrap_or(defaults.dormant_days),
			sites_path: self.sites_path.unwrap_or(defaults.sites_path),
			events_path: self.events_path,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
	/// Seconds between two poller ticks.
	pub tick_interval_secs: u64,
	/// Interval behind the "All" frequency.
	pub scheduler_interval_secs: u64,
	/// IANA timezone cron expressions are evaluated in.
	pub timezone: String,
	pub disable_scheduler: bool,
	pub maintenance_mode: bool,
	/// Days without activity after which a site only runs when the scheduler
	/// is explicitly enabled.
	pub dormant_days: u32,
	/// Directory holding the `.restarting` marker.
	pub sites_path: PathBuf,
	/// TOML file declaring scheduler events for job sync.
	pub events_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
			scheduler_interval_secs: DEFAULT_SCHEDULER_INTERVAL_SECS,
			timezone: "UTC".to_string(),
			disable_scheduler: false,
			maintenance_mode: false,
			dormant_days: DEFAULT_DORMANT_DAYS,
			sites_path: PathBuf::from("."),
			events_path: None,
		}
	}
}
