// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the VMRaid scheduler, workers and sites.
//!
//! Values come from built-in defaults, an optional TOML file and
//! `VMRAID_*` environment variables, in increasing precedence.
//!
//! ```ignore
//! use vmraid_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("ticking every {}s", config.scheduler.tick_interval_secs);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use std::path::PathBuf;

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub scheduler: SchedulerConfig,
	pub queue: QueueConfig,
	pub sites: SitesConfig,
	pub cache: CacheConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`VMRAID_*`)
/// 2. Config file (`/etc/vmraid/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		scheduler: layer.scheduler.unwrap_or_default().finalize(),
		queue: layer.queue.unwrap_or_default().finalize(),
		sites: layer.sites.finalize(),
		cache: layer.cache.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		sites = config.sites.sites.len(),
		timezone = %config.scheduler.timezone,
		scheduler_interval_secs = config.scheduler.scheduler_interval_secs,
		queues = config.queue.timeouts.len(),
		queue_database = %config.queue.database_url,
		cache_backend = config.cache.backend.as_str(),
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	let mut seen = std::collections::HashSet::new();
	for site in &config.sites.sites {
		if site.name.trim().is_empty() {
			return Err(ConfigError::Validation("site name must not be empty".to_string()));
		}
		if !seen.insert(site.name.as_str()) {
			return Err(ConfigError::Validation(format!(
				"site '{}' is configured more than once",
				site.name
			)));
		}
	}

	for (queue, timeout) in &config.queue.timeouts {
		if *timeout == 0 {
			return Err(ConfigError::Validation(format!(
				"queue '{queue}' must have a non-zero timeout"
			)));
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	struct FixedSource(ServerConfigLayer, Precedence);

	impl ConfigSource for FixedSource {
		fn name(&self) -> &'static str {
			"fixed"
		}

		fn precedence(&self) -> Precedence {
			self.1
		}

		fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
			Ok(self.0.clone())
		}
	}

	fn with_workers(workers: usize) -> ServerConfigLayer {
		ServerConfigLayer {
			queue: Some(QueueConfigLayer {
				workers: Some(workers),
				..Default::default()
			}),
			..Default::default()
		}
	}

	#[test]
	fn test_higher_precedence_wins_regardless_of_order() {
		let config = load_from_sources(vec![
			Box::new(FixedSource(with_workers(8), Precedence::Environment)),
			Box::new(FixedSource(with_workers(2), Precedence::ConfigFile)),
			Box::new(DefaultsSource),
		])
		.unwrap();
		assert_eq!(config.queue.workers, 8);
	}

	#[test]
	fn test_duplicate_site_rejected() {
		let layer = ServerConfigLayer {
			sites: SitesConfigLayer {
				sites: Some(vec![
					SiteEntry::new("a.local", "sqlite:./a.db"),
					SiteEntry::new("a.local", "sqlite:./b.db"),
				]),
			},
			..Default::default()
		};
		let err = finalize(layer).unwrap_err();
		assert!(err.to_string().contains("more than once"));
	}

	#[test]
	fn test_zero_queue_timeout_rejected() {
		let layer = ServerConfigLayer {
			queue: Some(QueueConfigLayer {
				timeouts: Some([("reports".to_string(), 0)].into_iter().collect()),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(finalize(layer).is_err());
	}

	#[test]
	fn test_file_values_are_applied() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			"[scheduler]\nscheduler_interval_secs = 120\n\n[[sites]]\nname = \"x.local\"\ndatabase_url = \"sqlite:./x.db\""
		)
		.unwrap();

		let config = load_from_sources(vec![
			Box::new(DefaultsSource),
			Box::new(TomlSource::new(file.path())),
		])
		.unwrap();
		assert_eq!(config.scheduler.scheduler_interval_secs, 120);
		assert_eq!(config.sites.names(), vec!["x.local"]);
		assert_eq!(config.queue.timeouts.len(), 3);
	}
}
