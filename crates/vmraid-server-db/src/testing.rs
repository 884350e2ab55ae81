// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test helpers: migrated databases in temporary directories.
//!
//! File-backed WAL databases are used instead of `:memory:` so that several
//! pooled connections (an open site transaction plus the queue) behave as they
//! do in production.

use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::migrations::{run_queue_migrations, run_site_migrations};
use crate::pool::create_pool;

pub struct TestDb {
	pub pool: SqlitePool,
	_dir: TempDir,
}

impl TestDb {
	async fn open(name: &str) -> Self {
		let dir = tempfile::tempdir().expect("create temp dir");
		let url = format!("sqlite:{}", dir.path().join(name).display());
		let pool = create_pool(&url).await.expect("create test pool");
		Self { pool, _dir: dir }
	}

	/// A site database with the site schema applied.
	pub async fn site() -> Self {
		let db = Self::open("site.db").await;
		run_site_migrations(&db.pool)
			.await
			.expect("run site migrations");
		db
	}

	/// A queue database with the queue schema applied.
	pub async fn queue() -> Self {
		let db = Self::open("queue.db").await;
		run_queue_migrations(&db.pool)
			.await
			.expect("run queue migrations");
		db
	}

	/// A site database that also hosts a tree table `name`.
	pub async fn with_tree_table(name: &str, parent_field: &str) -> Self {
		let db = Self::site().await;
		create_tree_table(&db.pool, name, parent_field).await;
		db
	}
}

pub async fn create_tree_table(pool: &SqlitePool, name: &str, parent_field: &str) {
	let sql = format!(
		r#"
		CREATE TABLE IF NOT EXISTS "{name}" (
			name TEXT PRIMARY KEY NOT NULL,
			"{parent_field}" TEXT,
			old_parent TEXT,
			lft INTEGER NOT NULL DEFAULT 0,
			rgt INTEGER NOT NULL DEFAULT 0,
			is_group INTEGER NOT NULL DEFAULT 0
		)
		"#
	);
	sqlx::query(&sql)
		.execute(pool)
		.await
		.expect("create tree table");
}
