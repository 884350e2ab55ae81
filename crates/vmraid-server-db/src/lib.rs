// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for VMRaid.
//!
//! Each site has its own database holding scheduled job types, their logs,
//! settings, defaults and tree tables. All processes share one queue
//! database for background jobs.

pub mod defaults;
pub mod document;
pub mod error;
pub mod error_log;
pub mod migrations;
pub mod pool;
pub mod queue;
pub mod scheduled_job;
pub mod settings;
pub mod tree;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use defaults::DefaultsRepository;
pub use document::{table_name, Document, DocumentRepository, DocumentStore, Filters};
pub use error::{is_lock_contention, DbError, Result};
pub use error_log::{ErrorLog, ErrorLogRepository};
pub use migrations::{run_queue_migrations, run_site_migrations};
pub use pool::create_pool;
pub use queue::{JobFilter, JobState, NewQueuedJob, QueueRepository, QueueStore, QueuedJob};
pub use scheduled_job::{
	Frequency, JobLogStatus, ScheduledJobLog, ScheduledJobRepository, ScheduledJobStore,
	ScheduledJobType,
};
pub use settings::SystemSettingsRepository;
pub use tree::{TreeRepository, TreeTable};
