// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduled jobs and background queues for VMRaid.
//!
//! Scheduled job types are polled per site by [`SchedulerPoller`] and, when
//! due, pushed to a named queue through the [`Dispatcher`]. A [`WorkerPool`]
//! claims queued jobs and runs the registered [`JobHandler`] inside a fresh
//! site transaction, retrying on lock contention.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod health;
pub mod queues;
pub mod schedule;
pub mod scheduled;
pub mod scheduler;
pub mod sites;
pub mod sync;
pub mod worker;

pub use context::{ExecutionContext, SiteSession, ADMINISTRATOR};
pub use dispatch::{Dispatcher, EnqueueRequest, Enqueued, JobCall, JobKey, RetryPolicy};
pub use error::{error_chain, JobError, Result};
pub use handler::{run_in_session, HandlerRegistry, JobContext, JobHandler};
pub use health::{
	determine_health_state, doctor, job_health, DoctorReport, HealthState, JobHealthStatus,
	JobsHealthStatus, LastRunInfo, SiteDiagnosis,
};
pub use queues::{QueueSet, DEFAULT_QUEUE, LONG_QUEUE, SHORT_QUEUE};
pub use schedule::ScheduleSettings;
pub use scheduled::{execute_scheduled_job, RunScheduledJob, ScheduledJobRunner, RUN_SCHEDULED_JOB};
pub use scheduler::{
	disable_scheduler, enable_scheduler, pause_scheduler, resume_scheduler, toggle_scheduler,
	SchedulerPoller, SiteOutcome, RESTARTING_MARKER,
};
pub use sites::{Site, SiteRegistry};
pub use sync::{sync_jobs, SchedulerEvents, SyncReport};
pub use worker::{worker_name, RunHandle, WorkerPool};
