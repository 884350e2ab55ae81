// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job methods are looked up by name in a [`HandlerRegistry`] rather than
//! resolved dynamically.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use vmraid_server_db::QueueStore;

use crate::context::{ExecutionContext, SiteSession};
use crate::error::{JobError, Result};
use crate::scheduled::{RunScheduledJob, RUN_SCHEDULED_JOB};
use crate::sites::Site;

pub struct JobContext<'a> {
	pub session: &'a mut SiteSession,
	pub method: &'a str,
	pub kwargs: &'a Value,
	pub handlers: &'a HandlerRegistry,
	pub queue: &'a dyn QueueStore,
}

impl JobContext<'_> {
	pub fn kwarg(&self, key: &str) -> Option<&Value> {
		self.kwargs.get(key)
	}

	pub fn kwarg_str(&self, key: &str) -> Result<&str> {
		self.kwarg(key)
			.and_then(Value::as_str)
			.ok_or_else(|| JobError::failed(self.method, format!("missing argument {key}")))
	}
}

#[async_trait]
pub trait JobHandler: Send + Sync {
	/// Work done inside the caller's site transaction. Returning an error
	/// rolls the transaction back.
	async fn run(&self, ctx: &mut JobContext<'_>) -> Result<()>;
}

#[derive(Clone)]
pub struct HandlerRegistry {
	methods: HashMap<String, Arc<dyn JobHandler>>,
	server_scripts: HashMap<String, Arc<dyn JobHandler>>,
}

impl Default for HandlerRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl HandlerRegistry {
	/// A registry holding only the queue-side entry point for scheduled jobs.
	pub fn new() -> Self {
		let mut registry = Self {
			methods: HashMap::new(),
			server_scripts: HashMap::new(),
		};
		registry.register(RUN_SCHEDULED_JOB, Arc::new(RunScheduledJob));
		registry
	}

	pub fn register(&mut self, method: impl Into<String>, handler: Arc<dyn JobHandler>) {
		self.methods.insert(method.into(), handler);
	}

	pub fn register_server_script(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
		self.server_scripts.insert(name.into(), handler);
	}

	pub fn get(&self, method: &str) -> Result<Arc<dyn JobHandler>> {
		self.methods
			.get(method)
			.cloned()
			.ok_or_else(|| JobError::UnknownHandler(method.to_string()))
	}

	pub fn get_server_script(&self, name: &str) -> Result<Arc<dyn JobHandler>> {
		self.server_scripts
			.get(name)
			.cloned()
			.ok_or_else(|| JobError::UnknownHandler(format!("server script {name}")))
	}

	pub fn contains(&self, method: &str) -> bool {
		self.methods.contains_key(method)
	}

	pub fn methods(&self) -> Vec<String> {
		let mut methods: Vec<String> = self.methods.keys().cloned().collect();
		methods.sort();
		methods
	}
}

/// Run `handler` in a fresh transaction on `site`: commit on success,
/// roll back on error.
pub async fn run_in_session(
	site: &Site,
	context: ExecutionContext,
	handler: &dyn JobHandler,
	method: &str,
	kwargs: &Value,
	handlers: &HandlerRegistry,
	queue: &dyn QueueStore,
) -> Result<()> {
	let mut session = SiteSession::begin(site, context).await?;
	let result = {
		let mut ctx = JobContext {
			session: &mut session,
			method,
			kwargs,
			handlers,
			queue,
		};
		handler.run(&mut ctx).await
	};
	match result {
		Ok(()) => {
			session.commit(queue).await?;
			Ok(())
		}
		Err(e) => {
			session.rollback().await?;
			Err(e)
		}
	}
}

#[cfg(test)]
pub(crate) mod test_handlers {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	/// Writes a marker setting then succeeds.
	pub struct Marker(pub &'static str);

	#[async_trait]
	impl JobHandler for Marker {
		async fn run(&self, ctx: &mut JobContext<'_>) -> Result<()> {
			sqlx::query("INSERT INTO system_settings (key, value) VALUES (?, '1') ON CONFLICT(key) DO UPDATE SET value = CAST(value AS INTEGER) + 1")
				.bind(self.0)
				.execute(ctx.session.conn())
				.await?;
			Ok(())
		}
	}

	/// Writes a marker setting then fails.
	pub struct Failing(pub &'static str);

	#[async_trait]
	impl JobHandler for Failing {
		async fn run(&self, ctx: &mut JobContext<'_>) -> Result<()> {
			sqlx::query("INSERT INTO system_settings (key, value) VALUES (?, '1')")
				.bind(self.0)
				.execute(ctx.session.conn())
				.await?;
			Err(JobError::failed(ctx.method, "boom"))
		}
	}

	/// Asks for a retry until it has been called `succeed_on` times.
	pub struct Flaky {
		pub calls: AtomicU32,
		pub succeed_on: u32,
	}

	#[async_trait]
	impl JobHandler for Flaky {
		async fn run(&self, _ctx: &mut JobContext<'_>) -> Result<()> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			if call >= self.succeed_on {
				Ok(())
			} else {
				Err(JobError::Retry("database is locked".into()))
			}
		}
	}

	pub async fn marker(site: &Site, key: &str) -> Option<String> {
		site.settings().get(key).await.unwrap()
	}
}
