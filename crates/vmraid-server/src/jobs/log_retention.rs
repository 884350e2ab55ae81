// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use vmraid_server_jobs::{JobContext, JobError, JobHandler, Result};

pub const LOG_CLEANUP_METHOD: &str = "vmraid.core.doctype.log_settings.log_settings.run_log_clean_up";
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 30;

/// Deletes scheduled job logs, error logs and the site's failed queue jobs
/// older than the retention window.
///
/// A `days` argument overrides the configured window.
pub struct LogRetentionJob {
	retention_days: u32,
}

impl LogRetentionJob {
	pub fn new(retention_days: u32) -> Self {
		Self { retention_days }
	}
}

#[async_trait]
impl JobHandler for LogRetentionJob {
	async fn run(&self, ctx: &mut JobContext<'_>) -> Result<()> {
		let retention_days = match ctx.kwarg("days") {
			None => self.retention_days,
			Some(value) => value
				.as_u64()
				.and_then(|d| u32::try_from(d).ok())
				.ok_or_else(|| JobError::failed(ctx.method, format!("invalid days: {value}")))?,
		};

		let site = ctx.session.site();
		let job_logs = site.scheduled_jobs().cleanup_old_logs(retention_days).await?;
		let error_logs = site.error_log().cleanup(retention_days).await?;
		let failed_jobs = ctx.queue.cleanup_failed(site.name(), retention_days).await?;

		tracing::info!(
			site = %site.name(),
			job_logs,
			error_logs,
			failed_jobs,
			retention_days,
			"Log cleanup completed"
		);
		Ok(())
	}
}
