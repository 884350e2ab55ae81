// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML files and environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	CacheBackend, CacheConfigLayer, LogFormat, LoggingConfigLayer, QueueConfigLayer,
	SchedulerConfigLayer, SiteEntry, SitesConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file source. A missing file contributes nothing.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/vmraid/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: VMRAID_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			scheduler: Some(load_scheduler_from_env()?),
			queue: Some(load_queue_from_env()?),
			sites: load_sites_from_env()?,
			cache: Some(load_cache_from_env()?),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	match env_var(name) {
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|_| ConfigError::invalid_value(name, format!("invalid u32 value '{v}'"))),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|_| ConfigError::invalid_value(name, format!("invalid u64 value '{v}'"))),
		None => Ok(None),
	}
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	match env_var(name) {
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|_| ConfigError::invalid_value(name, format!("invalid usize value '{v}'"))),
		None => Ok(None),
	}
}

/// Split `a=1,b=2` into trimmed pairs.
fn parse_pairs(key: &str, raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
	raw.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(|pair| match pair.split_once('=') {
			Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
				Ok((k.trim().to_string(), v.trim().to_string()))
			}
			_ => Err(ConfigError::invalid_value(
				key,
				format!("expected name=value, got '{pair}'"),
			)),
		})
		.collect()
}

fn load_scheduler_from_env() -> Result<SchedulerConfigLayer, ConfigError> {
	Ok(SchedulerConfigLayer {
		tick_interval_secs: env_u64("VMRAID_SCHEDULER_TICK_INTERVAL_SECS")?,
		scheduler_interval_secs: env_u64("VMRAID_SCHEDULER_INTERVAL_SECS")?,
		timezone: env_var("VMRAID_SCHEDULER_TIMEZONE"),
		disable_scheduler: env_bool("VMRAID_SCHEDULER_DISABLED"),
		maintenance_mode: env_bool("VMRAID_MAINTENANCE_MODE"),
		dormant_days: env_u32("VMRAID_SCHEDULER_DORMANT_DAYS")?,
		sites_path: env_var("VMRAID_SITES_PATH").map(PathBuf::from),
		events_path: env_var("VMRAID_SCHEDULER_EVENTS_PATH").map(PathBuf::from),
	})
}

fn load_queue_from_env() -> Result<QueueConfigLayer, ConfigError> {
	let timeouts = match env_var("VMRAID_QUEUE_TIMEOUTS") {
		Some(raw) => {
			let mut timeouts = BTreeMap::new();
			for (name, secs) in parse_pairs("VMRAID_QUEUE_TIMEOUTS", &raw)? {
				let secs = secs.parse::<u64>().map_err(|_| {
					ConfigError::invalid_value(
						"VMRAID_QUEUE_TIMEOUTS",
						format!("invalid timeout '{secs}' for queue '{name}'"),
					)
				})?;
				timeouts.insert(name, secs);
			}
			Some(timeouts)
		}
		None => None,
	};

	Ok(QueueConfigLayer {
		database_url: env_var("VMRAID_QUEUE_DATABASE_URL"),
		timeouts,
		workers: env_usize("VMRAID_QUEUE_WORKERS")?,
		poll_interval_ms: env_u64("VMRAID_QUEUE_POLL_INTERVAL_MS")?,
		jitter_ms: env_u64("VMRAID_QUEUE_JITTER_MS")?,
		max_retries: env_u32("VMRAID_QUEUE_MAX_RETRIES")?,
		retry_base_delay_ms: env_u64("VMRAID_QUEUE_RETRY_BASE_DELAY_MS")?,
	})
}

fn load_sites_from_env() -> Result<SitesConfigLayer, ConfigError> {
	let sites = match env_var("VMRAID_SITES") {
		Some(raw) => Some(
			parse_pairs("VMRAID_SITES", &raw)?
				.into_iter()
				.map(|(name, url)| SiteEntry::new(name, url))
				.collect(),
		),
		None => None,
	};
	Ok(SitesConfigLayer { sites })
}

fn load_cache_from_env() -> Result<CacheConfigLayer, ConfigError> {
	let backend = match env_var("VMRAID_CACHE_BACKEND") {
		Some(v) => Some(
			v.parse::<CacheBackend>()
				.map_err(|e| ConfigError::invalid_value("VMRAID_CACHE_BACKEND", e))?,
		),
		None => None,
	};

	Ok(CacheConfigLayer {
		backend,
		redis_url: env_var("VMRAID_CACHE_REDIS_URL"),
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = env_var("VMRAID_LOG_FORMAT").map(|v| match v.to_lowercase().as_str() {
		"json" => LogFormat::Json,
		_ => LogFormat::Text,
	});

	Ok(LoggingConfigLayer {
		level: env_var("VMRAID_LOG_LEVEL"),
		format,
	})
}
