// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tiered site cache for VMRaid.
//!
//! A [`CacheStore`] is shared by every site and process. [`SiteCache`]
//! namespaces keys per site, [`CacheManager`] knows which keys belong to
//! which tier and clears them in dependency order, and [`Defaults`] caches
//! user and global defaults on top.

pub mod defaults;
pub mod error;
pub mod keys;
pub mod manager;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod site;
pub mod store;

pub use defaults::{Defaults, DefaultsMap, GLOBAL_PARENT};
pub use error::{CacheError, Result};
pub use keys::{doctype_map_key, scrub};
pub use manager::{CacheManager, ModuleMap};
#[cfg(feature = "redis")]
pub use redis_store::RedisCache;
pub use site::SiteCache;
pub use store::{CacheStore, MemoryCache};
