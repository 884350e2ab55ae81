// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod cache;
mod logging;
mod queue;
mod scheduler;
mod sites;

pub use cache::{CacheBackend, CacheConfig, CacheConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use queue::{QueueConfig, QueueConfigLayer};
pub use scheduler::{
	SchedulerConfig, SchedulerConfigLayer, DEFAULT_DORMANT_DAYS, DEFAULT_SCHEDULER_INTERVAL_SECS,
	DEFAULT_TICK_INTERVAL_SECS,
};
pub use sites::{SiteEntry, SitesConfig, SitesConfigLayer, DEFAULT_SITE};
