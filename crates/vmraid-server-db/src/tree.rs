// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Nested set maintenance for tree-shaped tables.
//!
//! Any table with `name`, a parent column, `old_parent`, `lft` and `rgt`
//! columns can be managed. Inserts shift boundaries in SQL. Moves and
//! rebuilds are planned in memory with [`Forest`] and the staged intervals are
//! written back in the same transaction, so a rejected operation never leaves
//! partial shifts behind.

use sqlx::{SqliteConnection, SqlitePool};
use vmraid_nestedset_core::{validate_loop, Forest, Interval, NestedSetError, Staging, TreeNode};

use crate::error::{DbError, Result};

/// Table and parent column of one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeTable {
	table: String,
	parent_field: String,
	single_root: bool,
}

impl TreeTable {
	pub fn new(table: impl Into<String>, parent_field: impl Into<String>) -> Result<Self> {
		let table = table.into();
		let parent_field = parent_field.into();
		validate_identifier(&table)?;
		validate_identifier(&parent_field)?;
		Ok(Self {
			table,
			parent_field,
			single_root: false,
		})
	}

	/// Reject a second root node.
	pub fn single_root(mut self) -> Self {
		self.single_root = true;
		self
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	pub fn parent_field(&self) -> &str {
		&self.parent_field
	}

	fn t(&self) -> String {
		format!("\"{}\"", self.table)
	}

	fn p(&self) -> String {
		format!("\"{}\"", self.parent_field)
	}
}

fn validate_identifier(ident: &str) -> Result<()> {
	let valid = !ident.is_empty()
		&& ident
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ' || c == '-');
	if !valid {
		return Err(DbError::Internal(format!("invalid identifier: {ident:?}")));
	}
	Ok(())
}

#[derive(Clone)]
pub struct TreeRepository {
	pool: SqlitePool,
	tree: TreeTable,
}

impl TreeRepository {
	pub fn new(pool: SqlitePool, tree: TreeTable) -> Self {
		Self { pool, tree }
	}

	pub fn tree(&self) -> &TreeTable {
		&self.tree
	}

	/// Insert a node row and place it as the last child of `parent`.
	#[tracing::instrument(skip(self), fields(table = %self.tree.table))]
	pub async fn insert_node(&self, name: &str, parent: Option<&str>) -> Result<Interval> {
		let mut tx = self.pool.begin().await?;
		sqlx::query(&format!(
			"INSERT INTO {} (name, {}, old_parent, lft, rgt) VALUES (?, ?, NULL, 0, 0)",
			self.tree.t(),
			self.tree.p()
		))
		.bind(name)
		.bind(parent)
		.execute(&mut *tx)
		.await
		.map_err(|e| match &e {
			sqlx::Error::Database(db) if db.is_unique_violation() => {
				DbError::NestedSet(NestedSetError::Duplicate(name.to_string()))
			}
			_ => DbError::from_query(&self.tree.table, e),
		})?;

		self.validate_one_root(&mut tx, name, parent).await?;
		let interval = self.update_nsm(&mut tx, name).await?;
		tx.commit().await?;
		Ok(interval)
	}

	/// Change a node's parent and move its subtree accordingly.
	#[tracing::instrument(skip(self), fields(table = %self.tree.table))]
	pub async fn set_parent(&self, name: &str, parent: Option<&str>) -> Result<Interval> {
		let mut tx = self.pool.begin().await?;
		let result = sqlx::query(&format!(
			"UPDATE {} SET {} = ? WHERE name = ?",
			self.tree.t(),
			self.tree.p()
		))
		.bind(parent)
		.bind(name)
		.execute(&mut *tx)
		.await
		.map_err(|e| DbError::from_query(&self.tree.table, e))?;
		if result.rows_affected() == 0 {
			return Err(NestedSetError::NotFound(name.to_string()).into());
		}

		self.validate_one_root(&mut tx, name, parent).await?;
		let interval = self.update_nsm(&mut tx, name).await?;
		tx.commit().await?;
		Ok(interval)
	}

	/// Bring `name`'s interval in line with its parent column after a save.
	///
	/// Unplaced nodes are added, nodes whose parent changed since the last
	/// save are moved, and `old_parent` is synced.
	pub async fn update_nsm(&self, conn: &mut SqliteConnection, name: &str) -> Result<Interval> {
		let row = sqlx::query_as::<_, (Option<String>, Option<String>, i64, i64)>(&format!(
			"SELECT {}, old_parent, lft, rgt FROM {} WHERE name = ?",
			self.tree.p(),
			self.tree.t()
		))
		.bind(name)
		.fetch_optional(&mut *conn)
		.await
		.map_err(|e| DbError::from_query(&self.tree.table, e))?
		.ok_or_else(|| NestedSetError::NotFound(name.to_string()))?;

		let (parent, old_parent, lft, rgt) = row;
		let parent = parent.filter(|p| !p.is_empty());
		let old_parent = old_parent.filter(|p| !p.is_empty());

		let interval = if Interval::new(lft, rgt).is_unplaced() {
			self.update_add_node(conn, name, parent.as_deref()).await?
		} else if parent != old_parent {
			self.update_move_node(conn, name, parent.as_deref()).await?
		} else {
			Interval::new(lft, rgt)
		};

		sqlx::query(&format!(
			"UPDATE {} SET old_parent = {} WHERE name = ?",
			self.tree.t(),
			self.tree.p()
		))
		.bind(name)
		.execute(&mut *conn)
		.await?;

		Ok(interval)
	}

	/// Open a two-wide gap at the end of `parent`'s children (or after the
	/// last root) and place `name` in it.
	#[tracing::instrument(skip(self, conn), fields(table = %self.tree.table))]
	pub async fn update_add_node(
		&self,
		conn: &mut SqliteConnection,
		name: &str,
		parent: Option<&str>,
	) -> Result<Interval> {
		self.acquire_write_lock(conn, name).await?;

		let right = match parent {
			Some(parent) => {
				let target = self
					.interval_of(conn, parent)
					.await?
					.ok_or_else(|| NestedSetError::NotFound(parent.to_string()))?;
				let enclosing = self.enclosing(conn, target).await?;
				validate_loop(&enclosing, name, target)?;
				target.rgt
			}
			None => {
				let (max_rgt,): (i64,) = sqlx::query_as(&format!(
					"SELECT COALESCE(MAX(rgt), 0) FROM {} WHERE COALESCE({}, '') = '' AND name != ?",
					self.tree.t(),
					self.tree.p()
				))
				.bind(name)
				.fetch_one(&mut *conn)
				.await?;
				max_rgt + 1
			}
		};

		sqlx::query(&format!(
			"UPDATE {} SET rgt = rgt + 2 WHERE rgt >= ?",
			self.tree.t()
		))
		.bind(right)
		.execute(&mut *conn)
		.await?;
		sqlx::query(&format!(
			"UPDATE {} SET lft = lft + 2 WHERE lft >= ?",
			self.tree.t()
		))
		.bind(right)
		.execute(&mut *conn)
		.await?;

		let (occupied,): (i64,) = sqlx::query_as(&format!(
			"SELECT COUNT(*) FROM {} WHERE (lft = ? OR rgt = ?) AND name != ?",
			self.tree.t()
		))
		.bind(right)
		.bind(right + 1)
		.bind(name)
		.fetch_one(&mut *conn)
		.await?;
		if occupied > 0 {
			return Err(NestedSetError::Corrupt(format!(
				"gap at {right} in {} is occupied",
				self.tree.table
			))
			.into());
		}

		let interval = Interval::new(right, right + 1);
		self.write_interval(conn, name, interval).await?;
		tracing::debug!(node = name, lft = interval.lft, rgt = interval.rgt, "node added");
		Ok(interval)
	}

	/// Move `name` and its subtree under `new_parent` (or to the end as a
	/// root). Nothing is written when the move would create a cycle.
	#[tracing::instrument(skip(self, conn), fields(table = %self.tree.table))]
	pub async fn update_move_node(
		&self,
		conn: &mut SqliteConnection,
		name: &str,
		new_parent: Option<&str>,
	) -> Result<Interval> {
		self.acquire_write_lock(conn, name).await?;

		let forest = self.load_forest_with(conn).await?;
		let staging = forest.plan_move(name, new_parent)?;
		self.apply_staging(conn, &staging).await?;

		let interval = match staging.get(name) {
			Some(interval) => *interval,
			None => forest
				.get(name)
				.map(TreeNode::interval)
				.ok_or_else(|| NestedSetError::NotFound(name.to_string()))?,
		};
		tracing::debug!(
			node = name,
			moved = staging.len(),
			lft = interval.lft,
			rgt = interval.rgt,
			"node moved"
		);
		Ok(interval)
	}

	/// Recompute every interval from the parent column.
	#[tracing::instrument(skip(self), fields(table = %self.tree.table))]
	pub async fn rebuild_tree(&self) -> Result<usize> {
		let mut tx = self.pool.begin().await?;
		sqlx::query(&format!("UPDATE {} SET lft = lft WHERE 1 = 0", self.tree.t()))
			.execute(&mut *tx)
			.await
			.map_err(|e| DbError::from_query(&self.tree.table, e))?;

		let forest = self.load_forest_with(&mut tx).await?;
		let staging = forest.plan_rebuild();
		self.apply_staging(&mut tx, &staging).await?;
		tx.commit().await?;

		tracing::info!(nodes = staging.len(), "tree rebuilt");
		Ok(staging.len())
	}

	/// Delete a leaf node. Roots are kept unless `allow_root_deletion`.
	#[tracing::instrument(skip(self), fields(table = %self.tree.table))]
	pub async fn delete_node(&self, name: &str, allow_root_deletion: bool) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		self.acquire_write_lock(&mut tx, name).await?;

		let forest = self.load_forest_with(&mut tx).await?;
		let node = forest
			.get(name)
			.ok_or_else(|| NestedSetError::NotFound(name.to_string()))?;
		if node.is_root() && !allow_root_deletion {
			return Err(NestedSetError::RootDeletion(name.to_string()).into());
		}
		if !forest.children(name).is_empty() {
			return Err(NestedSetError::ChildExists(name.to_string()).into());
		}

		// Detach to the end first so the remaining boundaries stay contiguous.
		let staging = forest.plan_move(name, None)?;
		self.apply_staging(&mut tx, &staging).await?;

		sqlx::query(&format!("DELETE FROM {} WHERE name = ?", self.tree.t()))
			.bind(name)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(())
	}

	async fn validate_one_root(
		&self,
		conn: &mut SqliteConnection,
		name: &str,
		parent: Option<&str>,
	) -> Result<()> {
		if !self.tree.single_root || parent.is_some_and(|p| !p.is_empty()) {
			return Ok(());
		}
		let (roots,): (i64,) = sqlx::query_as(&format!(
			"SELECT COUNT(*) FROM {} WHERE COALESCE({}, '') = '' AND name != ?",
			self.tree.t(),
			self.tree.p()
		))
		.bind(name)
		.fetch_one(&mut *conn)
		.await?;

		if roots > 0 {
			return Err(NestedSetError::MultipleRoots.into());
		}
		Ok(())
	}

	/// SQLite has no row locks. A no-op write takes the database write lock so
	/// the reads that follow cannot race another writer.
	async fn acquire_write_lock(&self, conn: &mut SqliteConnection, name: &str) -> Result<()> {
		sqlx::query(&format!(
			"UPDATE {} SET lft = lft WHERE name = ?",
			self.tree.t()
		))
		.bind(name)
		.execute(&mut *conn)
		.await
		.map_err(|e| DbError::from_query(&self.tree.table, e))?;
		Ok(())
	}

	async fn interval_of(&self, conn: &mut SqliteConnection, name: &str) -> Result<Option<Interval>> {
		let row = sqlx::query_as::<_, (i64, i64)>(&format!(
			"SELECT lft, rgt FROM {} WHERE name = ?",
			self.tree.t()
		))
		.bind(name)
		.fetch_optional(&mut *conn)
		.await?;
		Ok(row.map(|(lft, rgt)| Interval::new(lft, rgt)))
	}

	/// Nodes whose interval contains `target` (its ancestors-or-self).
	async fn enclosing(&self, conn: &mut SqliteConnection, target: Interval) -> Result<Vec<TreeNode>> {
		let rows = sqlx::query_as::<_, (String, Option<String>, i64, i64)>(&format!(
			"SELECT name, {}, lft, rgt FROM {} WHERE lft <= ? AND rgt >= ?",
			self.tree.p(),
			self.tree.t()
		))
		.bind(target.lft)
		.bind(target.rgt)
		.fetch_all(&mut *conn)
		.await?;
		Ok(rows.into_iter().map(node_from_row).collect())
	}

	async fn write_interval(
		&self,
		conn: &mut SqliteConnection,
		name: &str,
		interval: Interval,
	) -> Result<()> {
		let result = sqlx::query(&format!(
			"UPDATE {} SET lft = ?, rgt = ? WHERE name = ?",
			self.tree.t()
		))
		.bind(interval.lft)
		.bind(interval.rgt)
		.bind(name)
		.execute(&mut *conn)
		.await?;
		if result.rows_affected() == 0 {
			return Err(NestedSetError::NotFound(name.to_string()).into());
		}
		Ok(())
	}

	async fn apply_staging(&self, conn: &mut SqliteConnection, staging: &Staging) -> Result<()> {
		for (name, interval) in staging {
			self.write_interval(conn, name, *interval).await?;
		}
		Ok(())
	}

	async fn load_forest_with(&self, conn: &mut SqliteConnection) -> Result<Forest> {
		let rows = sqlx::query_as::<_, (String, Option<String>, i64, i64)>(&format!(
			"SELECT name, {}, lft, rgt FROM {}",
			self.tree.p(),
			self.tree.t()
		))
		.fetch_all(&mut *conn)
		.await
		.map_err(|e| DbError::from_query(&self.tree.table, e))?;
		Ok(Forest::from_nodes(rows.into_iter().map(node_from_row)))
	}

	/// Snapshot of the whole table.
	pub async fn load_forest(&self) -> Result<Forest> {
		let mut conn = self.pool.acquire().await?;
		self.load_forest_with(&mut conn).await
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_node(&self, name: &str) -> Result<Option<TreeNode>> {
		let row = sqlx::query_as::<_, (String, Option<String>, i64, i64)>(&format!(
			"SELECT name, {}, lft, rgt FROM {} WHERE name = ?",
			self.tree.p(),
			self.tree.t()
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await
		.map_err(|e| DbError::from_query(&self.tree.table, e))?;
		Ok(row.map(node_from_row))
	}

	/// First node that no other node encloses.
	#[tracing::instrument(skip(self))]
	pub async fn get_root_of(&self) -> Result<Option<String>> {
		let t = self.tree.t();
		let row = sqlx::query_as::<_, (String,)>(&format!(
			r#"
			SELECT t1.name FROM {t} t1
			WHERE (SELECT COUNT(*) FROM {t} t2 WHERE t2.lft < t1.lft AND t2.rgt > t1.rgt) = 0
			  AND t1.rgt > t1.lft
			ORDER BY t1.lft
			LIMIT 1
			"#
		))
		.fetch_optional(&self.pool)
		.await
		.map_err(|e| DbError::from_query(&self.tree.table, e))?;
		Ok(row.map(|(name,)| name))
	}

	/// Ancestors nearest first.
	#[tracing::instrument(skip(self))]
	pub async fn get_ancestors_of(&self, name: &str) -> Result<Vec<String>> {
		self
			.names_relative_to(name, "lft < ? AND rgt > ?", "lft DESC")
			.await
	}

	/// Descendants in tree (pre-)order.
	#[tracing::instrument(skip(self))]
	pub async fn get_descendants_of(&self, name: &str) -> Result<Vec<String>> {
		self
			.names_relative_to(name, "lft > ? AND rgt < ?", "lft")
			.await
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_children(&self, name: &str) -> Result<Vec<String>> {
		let rows = sqlx::query_as::<_, (String,)>(&format!(
			"SELECT name FROM {} WHERE {} = ? ORDER BY lft",
			self.tree.t(),
			self.tree.p()
		))
		.bind(name)
		.fetch_all(&self.pool)
		.await
		.map_err(|e| DbError::from_query(&self.tree.table, e))?;
		Ok(rows.into_iter().map(|(name,)| name).collect())
	}

	async fn names_relative_to(&self, name: &str, condition: &str, order: &str) -> Result<Vec<String>> {
		let node = self
			.get_node(name)
			.await?
			.ok_or_else(|| NestedSetError::NotFound(name.to_string()))?;

		let rows = sqlx::query_as::<_, (String,)>(&format!(
			"SELECT name FROM {} WHERE {condition} ORDER BY {order}",
			self.tree.t()
		))
		.bind(node.lft)
		.bind(node.rgt)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.into_iter().map(|(name,)| name).collect())
	}
}

fn node_from_row((name, parent, lft, rgt): (String, Option<String>, i64, i64)) -> TreeNode {
	TreeNode::new(name, parent, Interval::new(lft, rgt))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestDb;

	async fn repo(single_root: bool) -> (TestDb, TreeRepository) {
		let db = TestDb::with_tree_table("tabItem Group", "parent_item_group").await;
		let mut tree = TreeTable::new("tabItem Group", "parent_item_group").unwrap();
		if single_root {
			tree = tree.single_root();
		}
		let repo = TreeRepository::new(db.pool.clone(), tree);
		(db, repo)
	}

	/// R ─ A ─ (A1, A2), R ─ B
	async fn sample(repo: &TreeRepository) {
		repo.insert_node("R", None).await.unwrap();
		repo.insert_node("A", Some("R")).await.unwrap();
		repo.insert_node("B", Some("R")).await.unwrap();
		repo.insert_node("A1", Some("A")).await.unwrap();
		repo.insert_node("A2", Some("A")).await.unwrap();
	}

	async fn interval(repo: &TreeRepository, name: &str) -> Interval {
		repo.get_node(name).await.unwrap().unwrap().interval()
	}

	#[test]
	fn test_identifier_validation() {
		assert!(TreeTable::new("tabCost Center", "parent_cost_center").is_ok());
		assert!(TreeTable::new("tab\"; DROP TABLE x; --", "parent").is_err());
		assert!(TreeTable::new("tabAccount", "").is_err());
	}

	#[tokio::test]
	async fn test_insert_children_in_order() {
		let (_db, repo) = repo(false).await;
		repo.insert_node("R", None).await.unwrap();
		repo.insert_node("C1", Some("R")).await.unwrap();
		repo.insert_node("C2", Some("R")).await.unwrap();

		assert_eq!(interval(&repo, "R").await, Interval::new(1, 6));
		assert_eq!(interval(&repo, "C1").await, Interval::new(2, 3));
		assert_eq!(interval(&repo, "C2").await, Interval::new(4, 5));
		repo.load_forest().await.unwrap().verify().unwrap();
	}

	#[tokio::test]
	async fn test_insert_under_missing_parent_rolls_back() {
		let (_db, repo) = repo(false).await;
		repo.insert_node("R", None).await.unwrap();

		let err = repo.insert_node("X", Some("nope")).await.unwrap_err();
		assert!(matches!(
			err,
			DbError::NestedSet(NestedSetError::NotFound(ref n)) if n == "nope"
		));
		assert!(repo.get_node("X").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_duplicate_insert() {
		let (_db, repo) = repo(false).await;
		repo.insert_node("R", None).await.unwrap();
		let err = repo.insert_node("R", None).await.unwrap_err();
		assert!(matches!(err, DbError::NestedSet(NestedSetError::Duplicate(_))));
	}

	#[tokio::test]
	async fn test_single_root_rejects_second_root() {
		let (_db, repo) = repo(true).await;
		repo.insert_node("R", None).await.unwrap();
		let err = repo.insert_node("R2", None).await.unwrap_err();
		assert!(matches!(err, DbError::NestedSet(NestedSetError::MultipleRoots)));
		assert!(repo.get_node("R2").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_move_subtree() {
		let (_db, repo) = repo(false).await;
		sample(&repo).await;

		repo.set_parent("A", Some("B")).await.unwrap();

		assert_eq!(interval(&repo, "R").await, Interval::new(1, 10));
		assert_eq!(interval(&repo, "B").await, Interval::new(2, 9));
		assert_eq!(interval(&repo, "A").await, Interval::new(3, 8));
		assert_eq!(interval(&repo, "A1").await, Interval::new(4, 5));
		assert_eq!(interval(&repo, "A2").await, Interval::new(6, 7));
		repo.load_forest().await.unwrap().verify().unwrap();
	}

	#[tokio::test]
	async fn test_move_under_descendant_changes_nothing() {
		let (_db, repo) = repo(false).await;
		sample(&repo).await;
		let before = repo.load_forest().await.unwrap();

		let err = repo.set_parent("A", Some("A1")).await.unwrap_err();
		assert!(matches!(
			err,
			DbError::NestedSet(NestedSetError::Recursion { .. })
		));

		let after = repo.load_forest().await.unwrap();
		assert_eq!(before, after);
	}

	#[tokio::test]
	async fn test_move_to_root_and_back() {
		let (_db, repo) = repo(false).await;
		sample(&repo).await;

		repo.set_parent("A", None).await.unwrap();
		assert_eq!(interval(&repo, "R").await, Interval::new(1, 4));
		assert_eq!(interval(&repo, "A").await, Interval::new(5, 10));

		repo.set_parent("A", Some("R")).await.unwrap();
		assert_eq!(interval(&repo, "R").await, Interval::new(1, 10));
		assert_eq!(
			repo.get_children("R").await.unwrap(),
			vec!["B".to_string(), "A".to_string()]
		);
		repo.load_forest().await.unwrap().verify().unwrap();
	}

	#[tokio::test]
	async fn test_queries() {
		let (_db, repo) = repo(false).await;
		sample(&repo).await;

		assert_eq!(repo.get_root_of().await.unwrap().as_deref(), Some("R"));
		assert_eq!(repo.get_ancestors_of("A2").await.unwrap(), vec!["A", "R"]);
		assert_eq!(repo.get_descendants_of("A").await.unwrap(), vec!["A1", "A2"]);
		assert_eq!(repo.get_children("R").await.unwrap(), vec!["A", "B"]);
		assert!(matches!(
			repo.get_ancestors_of("missing").await,
			Err(DbError::NestedSet(NestedSetError::NotFound(_)))
		));
	}

	#[tokio::test]
	async fn test_delete_rules() {
		let (_db, repo) = repo(false).await;
		sample(&repo).await;

		assert!(matches!(
			repo.delete_node("A", false).await,
			Err(DbError::NestedSet(NestedSetError::ChildExists(_)))
		));
		assert!(matches!(
			repo.delete_node("R", false).await,
			Err(DbError::NestedSet(NestedSetError::RootDeletion(_)))
		));

		repo.delete_node("A1", false).await.unwrap();
		assert!(repo.get_node("A1").await.unwrap().is_none());
		assert_eq!(interval(&repo, "A").await, Interval::new(2, 5));
		repo.load_forest().await.unwrap().verify().unwrap();
	}

	#[tokio::test]
	async fn test_rebuild_repairs_corruption() {
		let (db, repo) = repo(false).await;
		sample(&repo).await;
		let descendants = repo.get_descendants_of("R").await.unwrap();

		sqlx::query("UPDATE \"tabItem Group\" SET lft = 0, rgt = 0")
			.execute(&db.pool)
			.await
			.unwrap();
		assert!(repo.load_forest().await.unwrap().verify().is_err());

		assert_eq!(repo.rebuild_tree().await.unwrap(), 5);
		let forest = repo.load_forest().await.unwrap();
		forest.verify().unwrap();

		let mut rebuilt = repo.get_descendants_of("R").await.unwrap();
		let mut expected = descendants;
		rebuilt.sort();
		expected.sort();
		assert_eq!(rebuilt, expected);
	}

	#[tokio::test]
	async fn test_missing_table() {
		let db = TestDb::site().await;
		let repo = TreeRepository::new(
			db.pool.clone(),
			TreeTable::new("tabNothing", "parent_nothing").unwrap(),
		);
		assert!(matches!(
			repo.get_children("x").await,
			Err(DbError::TableMissing(_))
		));
	}
}
