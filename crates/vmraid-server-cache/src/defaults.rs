// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User and global defaults, cached in the `defaults` hash by parent.

use std::collections::BTreeMap;

use tracing::instrument;
use vmraid_server_db::DefaultsRepository;

use crate::error::Result;
use crate::keys::{COMMON_DEFAULT_KEYS, DEFAULTS_KEY};
use crate::manager::CacheManager;

pub const GLOBAL_PARENT: &str = "__default";
const GUEST: &str = "Guest";

pub type DefaultsMap = BTreeMap<String, String>;

#[derive(Clone)]
pub struct Defaults {
	manager: CacheManager,
	repo: DefaultsRepository,
}

impl Defaults {
	pub fn new(manager: CacheManager, repo: DefaultsRepository) -> Self {
		Self { manager, repo }
	}

	/// Defaults stored for `parent`, loaded from the database on a cache miss.
	#[instrument(skip(self))]
	pub async fn get_defaults_for(&self, parent: &str) -> Result<DefaultsMap> {
		let cache = self.manager.cache();
		if let Some(defaults) = cache.hget_value::<DefaultsMap>(DEFAULTS_KEY, parent).await? {
			return Ok(defaults);
		}
		let defaults = self.repo.list(parent).await?;
		cache.hset_value(DEFAULTS_KEY, parent, &defaults).await?;
		Ok(defaults)
	}

	/// Global defaults overlaid with the user's own, plus `user` and `owner`.
	pub async fn get_defaults(&self, user: Option<&str>) -> Result<DefaultsMap> {
		let user = user.unwrap_or(GUEST);
		let mut defaults = self.get_defaults_for(GLOBAL_PARENT).await?;
		defaults.extend(self.get_defaults_for(user).await?);
		defaults.insert("user".to_string(), user.to_string());
		defaults.insert("owner".to_string(), user.to_string());
		Ok(defaults)
	}

	pub async fn get_user_default(&self, key: &str, user: Option<&str>) -> Result<Option<String>> {
		Ok(self.get_defaults(user).await?.remove(key))
	}

	pub async fn get_global_default(&self, key: &str) -> Result<Option<String>> {
		Ok(self.get_defaults(None).await?.remove(key))
	}

	#[instrument(skip(self, value))]
	pub async fn set_default(&self, key: &str, value: &str, parent: &str) -> Result<()> {
		self.repo.set(parent, key, value).await?;
		self.invalidate(parent).await
	}

	pub async fn set_global_default(&self, key: &str, value: &str) -> Result<()> {
		self.set_default(key, value, GLOBAL_PARENT).await
	}

	/// Remove one key of `parent`, or all of them.
	#[instrument(skip(self))]
	pub async fn clear_default(&self, key: Option<&str>, parent: &str) -> Result<u64> {
		let removed = self.repo.delete(parent, key).await?;
		self.invalidate(parent).await?;
		Ok(removed)
	}

	/// A shared parent affects every user, so the whole user tier goes.
	async fn invalidate(&self, parent: &str) -> Result<()> {
		if COMMON_DEFAULT_KEYS.contains(&parent) {
			self.manager.clear_user_cache(None).await
		} else {
			self.manager.clear_user_cache(Some(parent)).await
		}
	}
}
