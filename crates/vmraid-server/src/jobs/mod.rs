// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job handlers shipped with the binary.

mod log_retention;

pub use log_retention::{LogRetentionJob, DEFAULT_LOG_RETENTION_DAYS, LOG_CLEANUP_METHOD};

use std::sync::Arc;

use vmraid_server_jobs::{HandlerRegistry, SchedulerEvents};

pub fn default_handlers() -> HandlerRegistry {
	let mut handlers = HandlerRegistry::new();
	handlers.register(
		LOG_CLEANUP_METHOD,
		Arc::new(LogRetentionJob::new(DEFAULT_LOG_RETENTION_DAYS)),
	);
	handlers
}

/// Scheduler events declared by the built-in handlers.
pub fn builtin_events() -> SchedulerEvents {
	SchedulerEvents::default().event("daily_long", LOG_CLEANUP_METHOD)
}
