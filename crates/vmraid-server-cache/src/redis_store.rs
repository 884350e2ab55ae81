// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Redis backend shared between the poller, workers and web processes.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::Result;
use crate::store::CacheStore;

const SCAN_COUNT: usize = 500;

#[derive(Clone)]
pub struct RedisCache {
	conn: MultiplexedConnection,
}

impl RedisCache {
	#[tracing::instrument]
	pub async fn connect(url: &str) -> Result<Self> {
		let client = redis::Client::open(url)?;
		let conn = client.get_multiplexed_async_connection().await?;
		tracing::debug!("connected to redis cache");
		Ok(Self { conn })
	}

	async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
		let mut conn = self.conn.clone();
		let pattern = format!("{}*", escape_glob(prefix));
		let mut cursor: u64 = 0;
		let mut found = Vec::new();
		loop {
			let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
				.arg(cursor)
				.arg("MATCH")
				.arg(&pattern)
				.arg("COUNT")
				.arg(SCAN_COUNT)
				.query_async(&mut conn)
				.await?;
			found.extend(batch);
			if next == 0 {
				break;
			}
			cursor = next;
		}
		found.sort();
		found.dedup();
		Ok(found)
	}
}

fn escape_glob(prefix: &str) -> String {
	let mut escaped = String::with_capacity(prefix.len());
	for c in prefix.chars() {
		if matches!(c, '*' | '?' | '[' | ']' | '\\') {
			escaped.push('\\');
		}
		escaped.push(c);
	}
	escaped
}

#[async_trait]
impl CacheStore for RedisCache {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		let mut conn = self.conn.clone();
		Ok(conn.get(key).await?)
	}

	async fn set(&self, key: &str, value: &str) -> Result<()> {
		let mut conn = self.conn.clone();
		conn.set::<_, _, ()>(key, value).await?;
		Ok(())
	}

	async fn delete(&self, keys: &[String]) -> Result<u64> {
		if keys.is_empty() {
			return Ok(0);
		}
		let mut conn = self.conn.clone();
		Ok(conn.del(keys).await?)
	}

	async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
		let keys = self.scan(prefix).await?;
		self.delete(&keys).await
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
		self.scan(prefix).await
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		let mut conn = self.conn.clone();
		Ok(conn.exists(key).await?)
	}

	async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
		let mut conn = self.conn.clone();
		Ok(conn.hget(key, field).await?)
	}

	async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
		let mut conn = self.conn.clone();
		conn.hset::<_, _, _, ()>(key, field, value).await?;
		Ok(())
	}

	async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
		if fields.is_empty() {
			return Ok(0);
		}
		let mut conn = self.conn.clone();
		Ok(conn.hdel(key, fields).await?)
	}

	async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
		let mut conn = self.conn.clone();
		let mut fields: Vec<String> = conn.hkeys(key).await?;
		fields.sort();
		Ok(fields)
	}
}
