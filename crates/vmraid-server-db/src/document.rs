// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read-only access to document tables (`tab<DocType>`).
//!
//! The document engine itself lives elsewhere. Caches only need filtered
//! reads and the child table relationships declared in `docfields`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};

use crate::error::{DbError, Result};

pub type Filters = BTreeMap<String, Value>;
pub type Document = Map<String, Value>;

pub fn table_name(doctype: &str) -> String {
	format!("tab{doctype}")
}

fn check_identifier(ident: &str) -> Result<&str> {
	let valid = !ident.is_empty()
		&& ident
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ' || c == '-');
	if valid {
		Ok(ident)
	} else {
		Err(DbError::Internal(format!("invalid identifier: {ident:?}")))
	}
}

/// `field` or `field asc|desc`.
fn order_clause(order_by: &str) -> Result<String> {
	let mut parts = order_by.split_whitespace();
	let field = check_identifier(parts.next().unwrap_or_default())?;
	let direction = match parts.next().map(str::to_ascii_lowercase).as_deref() {
		None | Some("asc") => "ASC",
		Some("desc") => "DESC",
		Some(other) => {
			return Err(DbError::Internal(format!("invalid sort direction: {other}")));
		}
	};
	if parts.next().is_some() {
		return Err(DbError::Internal(format!("invalid order by: {order_by}")));
	}
	Ok(format!("\"{field}\" {direction}"))
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
	let mut doc = Map::new();
	for (i, column) in row.columns().iter().enumerate() {
		use sqlx::Column;
		let raw = row.try_get_raw(i)?;
		let value = if raw.is_null() {
			Value::Null
		} else {
			match raw.type_info().name() {
				"INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(i)?),
				"REAL" => Value::from(row.try_get::<f64, _>(i)?),
				"BLOB" => Value::from(
					String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(i)?).into_owned(),
				),
				_ => Value::from(row.try_get::<String, _>(i)?),
			}
		};
		doc.insert(column.name().to_string(), value);
	}
	Ok(doc)
}

#[derive(Clone)]
pub struct DocumentRepository {
	pool: SqlitePool,
}

impl DocumentRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Documents of `doctype` whose columns equal every filter value.
	#[tracing::instrument(skip(self, filters))]
	pub async fn get_all(
		&self,
		doctype: &str,
		filters: &Filters,
		order_by: Option<&str>,
	) -> Result<Vec<Document>> {
		let table = table_name(check_identifier(doctype)?);
		let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT * FROM \"{table}\" WHERE 1 = 1"));

		for (field, value) in filters {
			builder.push(format!(" AND \"{}\"", check_identifier(field)?));
			match value {
				Value::Null => {
					builder.push(" IS NULL");
				}
				Value::Bool(b) => {
					builder.push(" = ").push_bind(i64::from(*b));
				}
				Value::Number(n) => match n.as_i64() {
					Some(i) => {
						builder.push(" = ").push_bind(i);
					}
					None => {
						builder.push(" = ").push_bind(n.as_f64().unwrap_or_default());
					}
				},
				Value::String(s) => {
					builder.push(" = ").push_bind(s.clone());
				}
				other => {
					builder.push(" = ").push_bind(other.to_string());
				}
			}
		}

		if let Some(order_by) = order_by {
			builder.push(" ORDER BY ").push(order_clause(order_by)?);
		}

		let rows = builder
			.build()
			.fetch_all(&self.pool)
			.await
			.map_err(|e| DbError::from_query(&table, e))?;

		rows.iter().map(row_to_document).collect()
	}

	/// Doctypes that embed `doctype` as a child table.
	#[tracing::instrument(skip(self))]
	pub async fn table_parents(&self, doctype: &str) -> Result<Vec<String>> {
		let rows = sqlx::query_as::<_, (String,)>(
			"SELECT DISTINCT parent FROM docfields WHERE fieldtype = 'Table' AND options = ? ORDER BY parent",
		)
		.bind(doctype)
		.fetch_all(&self.pool)
		.await
		.map_err(|e| DbError::from_query("docfields", e))?;
		Ok(rows.into_iter().map(|(parent,)| parent).collect())
	}

	/// Register a child table field of `parent`.
	#[tracing::instrument(skip(self))]
	pub async fn add_table_field(&self, parent: &str, fieldname: &str, child: &str) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO docfields (parent, fieldname, fieldtype, options) VALUES (?, ?, 'Table', ?)
			ON CONFLICT(parent, fieldname) DO UPDATE SET fieldtype = 'Table', options = excluded.options
			"#,
		)
		.bind(parent)
		.bind(fieldname)
		.bind(child)
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
	async fn get_all(
		&self,
		doctype: &str,
		filters: &Filters,
		order_by: Option<&str>,
	) -> Result<Vec<Document>>;
	async fn table_parents(&self, doctype: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl DocumentStore for DocumentRepository {
	async fn get_all(
		&self,
		doctype: &str,
		filters: &Filters,
		order_by: Option<&str>,
	) -> Result<Vec<Document>> {
		self.get_all(doctype, filters, order_by).await
	}

	async fn table_parents(&self, doctype: &str) -> Result<Vec<String>> {
		self.table_parents(doctype).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestDb;
	use serde_json::json;

	async fn with_rules() -> TestDb {
		let db = TestDb::site().await;
		sqlx::query(
			r#"CREATE TABLE "tabAssignment Rule" (name TEXT PRIMARY KEY, document_type TEXT, disabled INTEGER, priority REAL, due_date TEXT)"#,
		)
		.execute(&db.pool)
		.await
		.unwrap();
		for (name, doctype, disabled, priority) in [
			("r1", "ToDo", 0, 1.5),
			("r2", "ToDo", 1, 2.0),
			("r3", "Task", 0, 3.0),
		] {
			sqlx::query(r#"INSERT INTO "tabAssignment Rule" VALUES (?, ?, ?, ?, NULL)"#)
				.bind(name)
				.bind(doctype)
				.bind(disabled)
				.bind(priority)
				.execute(&db.pool)
				.await
				.unwrap();
		}
		db
	}

	#[tokio::test]
	async fn test_get_all_with_filters() {
		let db = with_rules().await;
		let repo = DocumentRepository::new(db.pool.clone());

		let filters: Filters = [
			("document_type".to_string(), json!("ToDo")),
			("disabled".to_string(), json!(false)),
		]
		.into_iter()
		.collect();
		let docs = repo
			.get_all("Assignment Rule", &filters, None)
			.await
			.unwrap();
		assert_eq!(docs.len(), 1);
		assert_eq!(docs[0]["name"], "r1");
		assert_eq!(docs[0]["priority"], 1.5);
		assert_eq!(docs[0]["due_date"], Value::Null);
	}

	#[tokio::test]
	async fn test_get_all_order_by() {
		let db = with_rules().await;
		let repo = DocumentRepository::new(db.pool.clone());

		let docs = repo
			.get_all("Assignment Rule", &Filters::new(), Some("priority desc"))
			.await
			.unwrap();
		let names: Vec<&str> = docs.iter().filter_map(|d| d["name"].as_str()).collect();
		assert_eq!(names, vec!["r3", "r2", "r1"]);

		assert!(repo
			.get_all("Assignment Rule", &Filters::new(), Some("priority; DROP"))
			.await
			.is_err());
	}

	#[tokio::test]
	async fn test_missing_table_is_reported() {
		let db = TestDb::site().await;
		let repo = DocumentRepository::new(db.pool.clone());
		let err = repo
			.get_all("Notification", &Filters::new(), None)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::TableMissing(t) if t == "tabNotification"));
	}

	#[tokio::test]
	async fn test_table_parents() {
		let db = TestDb::site().await;
		let repo = DocumentRepository::new(db.pool.clone());
		repo.add_table_field("Sales Order", "items", "Sales Order Item")
			.await
			.unwrap();
		repo.add_table_field("Quotation", "items", "Sales Order Item")
			.await
			.unwrap();

		assert_eq!(
			repo.table_parents("Sales Order Item").await.unwrap(),
			vec!["Quotation", "Sales Order"]
		);
		assert!(repo.table_parents("ToDo").await.unwrap().is_empty());
	}
}
