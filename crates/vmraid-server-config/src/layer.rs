// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration layer merged across sources.

use serde::{Deserialize, Serialize};

use crate::sections::{
	CacheConfigLayer, LoggingConfigLayer, QueueConfigLayer, SchedulerConfigLayer, SitesConfigLayer,
};

/// One source's view of the configuration. Unset fields defer to
/// lower-precedence sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub scheduler: Option<SchedulerConfigLayer>,
	#[serde(default)]
	pub queue: Option<QueueConfigLayer>,
	/// `[[sites]]` tables live at the top level of the file.
	#[serde(flatten)]
	pub sites: SitesConfigLayer,
	#[serde(default)]
	pub cache: Option<CacheConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ServerConfigLayer {
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.scheduler, other.scheduler, SchedulerConfigLayer::merge);
		merge_option(&mut self.queue, other.queue, QueueConfigLayer::merge);
		self.sites.merge(other.sites);
		merge_option(&mut self.cache, other.cache, CacheConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T>(target: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (target.as_mut(), other) {
		(Some(current), Some(other)) => merge(current, other),
		(None, Some(other)) => *target = Some(other),
		_ => {}
	}
}
