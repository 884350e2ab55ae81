// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Site list configuration section.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SITE: &str = "site1.local";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteEntry {
	pub name: String,
	pub database_url: String,
}

impl SiteEntry {
	pub fn new(name: impl Into<String>, database_url: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			database_url: database_url.into(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SitesConfigLayer {
	pub sites: Option<Vec<SiteEntry>>,
}

impl SitesConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.sites.is_some() {
			self.sites = other.sites;
		}
	}

	pub fn finalize(self) -> SitesConfig {
		match self.sites {
			Some(sites) if !sites.is_empty() => SitesConfig { sites },
			_ => SitesConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SitesConfig {
	pub sites: Vec<SiteEntry>,
}

impl SitesConfig {
	pub fn get(&self, name: &str) -> Option<&SiteEntry> {
		self.sites.iter().find(|s| s.name == name)
	}

	pub fn names(&self) -> Vec<String> {
		self.sites.iter().map(|s| s.name.clone()).collect()
	}
}

impl Default for SitesConfig {
	fn default() -> Self {
		Self {
			sites: vec![SiteEntry::new(
				DEFAULT_SITE,
				format!("sqlite:./{DEFAULT_SITE}.db"),
			)],
		}
	}
}
