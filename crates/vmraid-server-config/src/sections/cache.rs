// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cache backend configuration section.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
	#[default]
	Memory,
	Redis,
}

impl CacheBackend {
	pub fn as_str(&self) -> &'static str {
		match self {
			CacheBackend::Memory => "memory",
			CacheBackend::Redis => "redis",
		}
	}
}

impl FromStr for CacheBackend {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"memory" => Ok(CacheBackend::Memory),
			"redis" => Ok(CacheBackend::Redis),
			_ => Err(format!("unknown cache backend: {s}")),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheConfigLayer {
	pub backend: Option<CacheBackend>,
	pub redis_url: Option<String>,
}

impl CacheConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.redis_url.is_some() {
			self.redis_url = other.redis_url;
		}
	}

	pub fn finalize(self) -> CacheConfig {
		CacheConfig {
			backend: self.backend.unwrap_or_default(),
			redis_url: self
				.redis_url
				.unwrap_or_else(|| "redis://127.0.0.1:13000".to_string()),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
	pub backend: CacheBackend,
	pub redis_url: String,
}

impl Default for CacheConfig {
	fn default() -> Self {
		CacheConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_backend_is_memory() {
		let config = CacheConfig::default();
		assert_eq!(config.backend, CacheBackend::Memory);
	}

	#[test]
	fn test_backend_from_str() {
		assert_eq!("Redis".parse::<CacheBackend>(), Ok(CacheBackend::Redis));
		assert!("memcached".parse::<CacheBackend>().is_err());
	}

	#[test]
	fn test_deserialize_layer() {
		let layer: CacheConfigLayer =
			toml::from_str("backend = \"redis\"\nredis_url = \"redis://cache:6379\"").unwrap();
		let config = layer.finalize();
		assert_eq!(config.backend, CacheBackend::Redis);
		assert_eq!(config.redis_url, "redis://cache:6379");
	}
}
