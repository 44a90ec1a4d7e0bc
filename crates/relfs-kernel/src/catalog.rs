//! Catalog introspection.
//!
//! Read-only questions about what exists: schemas are the attached databases,
//! relations are tables with exactly one primary-key column, and cells are
//! read back cast to text. Nothing is cached; each call asks SQLite again.
//!
//! Primary-key values always travel as text, and every comparison casts the
//! key column to text first so integer and text keys behave the same way.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};
use std::sync::Arc;

use crate::pool::{BackendResult, ConnectionPool};
use crate::quote::{qualified, quote_identifier, quote_literal};

/// Excludes SQLite's internal tables from relation queries.
const USER_TABLES: &str = r"m.type = 'table' AND m.name NOT LIKE 'sqlite\_%' ESCAPE '\'";

/// Catalog and cell queries over a connection pool.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: Arc<ConnectionPool>,
}

impl Catalog {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Names of every attached database, in catalog order.
    pub async fn list_schemas(&self) -> BackendResult<Vec<String>> {
        let sql = "SELECT name FROM pragma_database_list ORDER BY seq".to_string();
        self.query_names(sql).await
    }

    pub async fn schema_exists(&self, schema: &str) -> BackendResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM pragma_database_list WHERE name = {})",
            quote_literal(schema)
        );
        self.query_bool(sql).await
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// The relation's primary-key column, if it has exactly one.
    ///
    /// `None` for missing relations, views, tables without a declared primary
    /// key and tables with a composite key.
    pub async fn relation_primary_key(
        &self,
        schema: &str,
        relation: &str,
    ) -> BackendResult<Option<String>> {
        let sql = format!(
            "SELECT p.name FROM {master} AS m, pragma_table_info(m.name, {schema}) AS p \
             WHERE {USER_TABLES} AND m.name = {relation} AND p.pk > 0",
            master = qualified(schema, "sqlite_master"),
            schema = quote_literal(schema),
            relation = quote_literal(relation),
        );
        let mut keys = self.query_names(sql).await?;
        if keys.len() == 1 {
            Ok(keys.pop())
        } else {
            Ok(None)
        }
    }

    /// Tables in `schema` with a single-column primary key.
    pub async fn list_navigable_relations(&self, schema: &str) -> BackendResult<Vec<String>> {
        let sql = format!(
            "SELECT m.name FROM {master} AS m WHERE {USER_TABLES} \
             AND (SELECT count(*) FROM pragma_table_info(m.name, {schema}) AS p WHERE p.pk > 0) = 1",
            master = qualified(schema, "sqlite_master"),
            schema = quote_literal(schema),
        );
        self.query_names(sql).await
    }

    // ========================================================================
    // Columns
    // ========================================================================

    pub async fn column_exists(
        &self,
        schema: &str,
        relation: &str,
        column: &str,
    ) -> BackendResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM pragma_table_info({}, {}) WHERE name = {})",
            quote_literal(relation),
            quote_literal(schema),
            quote_literal(column)
        );
        self.query_bool(sql).await
    }

    /// Declared columns, in declaration order.
    pub async fn list_columns(&self, schema: &str, relation: &str) -> BackendResult<Vec<String>> {
        let sql = format!(
            "SELECT name FROM pragma_table_info({}, {}) ORDER BY cid",
            quote_literal(relation),
            quote_literal(schema)
        );
        self.query_names(sql).await
    }

    // ========================================================================
    // Rows and cells
    // ========================================================================

    pub async fn row_exists(&self, row: &RowAddress<'_>) -> BackendResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
            qualified(row.schema, row.relation),
            row.predicate()
        );
        self.query_bool(sql).await
    }

    /// Every primary-key value of the relation, as text. Rows whose key is
    /// NULL or not valid UTF-8 have no name and are skipped.
    pub async fn list_row_keys(
        &self,
        schema: &str,
        relation: &str,
        pk_column: &str,
    ) -> BackendResult<Vec<String>> {
        let sql = format!(
            "SELECT CAST({} AS TEXT) FROM {}",
            quote_identifier(pk_column),
            qualified(schema, relation)
        );
        self.pool
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                let mut keys = Vec::new();
                while let Some(row) = rows.next()? {
                    let name = text_bytes(row.get_ref(0)?)
                        .and_then(|bytes| std::str::from_utf8(bytes).ok());
                    if let Some(name) = name {
                        keys.push(name.to_owned());
                    }
                }
                Ok(keys)
            })
            .await
    }

    /// Byte length of the cell cast to text. A NULL cell or a missing row is 0.
    pub async fn cell_length(&self, row: &RowAddress<'_>, column: &str) -> BackendResult<u64> {
        let sql = format!(
            "SELECT coalesce(length(CAST(CAST({} AS TEXT) AS BLOB)), 0) FROM {} WHERE {}",
            quote_identifier(column),
            qualified(row.schema, row.relation),
            row.predicate()
        );
        let len = self
            .pool
            .run(move |conn| {
                conn.query_row(&sql, [], |r| r.get::<_, i64>(0))
                    .optional()
            })
            .await?;
        Ok(len.map(|n| n.max(0) as u64).unwrap_or(0))
    }

    /// The cell cast to text. `None` when the row no longer exists; a NULL
    /// cell reads as empty.
    pub async fn cell_content(
        &self,
        row: &RowAddress<'_>,
        column: &str,
    ) -> BackendResult<Option<Vec<u8>>> {
        let sql = format!(
            "SELECT CAST({} AS TEXT) FROM {} WHERE {}",
            quote_identifier(column),
            qualified(row.schema, row.relation),
            row.predicate()
        );
        self.pool
            .run(move |conn| {
                conn.query_row(&sql, [], |r| {
                    Ok(text_bytes(r.get_ref(0)?).map(<[u8]>::to_vec).unwrap_or_default())
                })
                .optional()
            })
            .await
    }

    /// `UPDATE ... SET column = content WHERE pk = value`, returning the number
    /// of rows changed.
    pub async fn update_cell(
        &self,
        row: &RowAddress<'_>,
        column: &str,
        content: &str,
    ) -> BackendResult<usize> {
        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {}",
            qualified(row.schema, row.relation),
            quote_identifier(column),
            quote_literal(content),
            row.predicate()
        );
        self.pool.run(move |conn| conn.execute(&sql, [])).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn query_bool(&self, sql: String) -> BackendResult<bool> {
        tracing::debug!(%sql, "catalog query");
        self.pool
            .run(move |conn| conn.query_row(&sql, [], |row| row.get::<_, bool>(0)))
            .await
    }

    async fn query_names(&self, sql: String) -> BackendResult<Vec<String>> {
        tracing::debug!(%sql, "catalog query");
        self.pool.run(move |conn| collect_names(conn, &sql)).await
    }
}

fn collect_names(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn text_bytes(value: ValueRef<'_>) -> Option<&[u8]> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(bytes),
        ValueRef::Null | ValueRef::Integer(_) | ValueRef::Real(_) => None,
    }
}

/// Where a row lives: enough to build its `WHERE` clause.
#[derive(Debug, Clone, Copy)]
pub struct RowAddress<'a> {
    pub schema: &'a str,
    pub relation: &'a str,
    pub pk_column: &'a str,
    pub pk_value: &'a str,
}

impl RowAddress<'_> {
    fn predicate(&self) -> String {
        format!(
            "CAST({} AS TEXT) = {}",
            quote_identifier(self.pk_column),
            quote_literal(self.pk_value)
        )
    }
}
