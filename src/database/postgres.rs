//! `PostgreSQL` implementation of [`Database`].
//!
//! Catalog reads go through `information_schema` and `pg_catalog` with every
//! identifier column cast to `text` so plain `&str` parameters bind. Source
//! tables are streamed through a server-side cursor. Side tables are created
//! with `SeaQuery` DDL.

use super::pg_value::value_from_row;
use super::type_mapping::column_def;
use super::{ColumnKind, ColumnMeta, Database, ForeignKeyMeta, KeyConstraint, RowStream};
use crate::connection::connect;
use crate::error::DbError;
use crate::executor::{MayPostgresExecutor, SqlExecutor};
use crate::value::{Row, Value};
use may_postgres::types::ToSql;
use sea_query::{Alias, Index, PostgresQueryBuilder, Query, Table};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Postgres caps bind parameters per statement at `u16::MAX`.
const MAX_BIND_PARAMS: usize = 65_535;

/// Rows pulled per `FETCH` when no explicit size is configured.
pub const DEFAULT_FETCH_SIZE: usize = 1_000;

/// Quote an identifier for interpolation into SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Select-list expression for a column. Types the value layer cannot decode
/// are read as text.
fn select_expr(meta: Option<&ColumnMeta>, name: &str) -> String {
    match meta.map(ColumnMeta::kind) {
        Some(ColumnKind::Other) => format!("{}::text", quote_ident(name)),
        _ => quote_ident(name),
    }
}

/// Placeholder for a bind parameter targeting `meta`. Undecodable types are
/// bound as text and cast server-side.
fn placeholder(meta: Option<&ColumnMeta>, n: usize) -> String {
    match meta {
        Some(m) if m.kind() == ColumnKind::Other => format!("${n}::text::{}", m.data_type),
        _ => format!("${n}"),
    }
}

/// A [`Database`] over one `may_postgres` connection
pub struct PostgresDatabase {
    executor: MayPostgresExecutor,
    fetch_size: usize,
    cursor_seq: Cell<u64>,
    column_cache: RefCell<HashMap<(String, String), Vec<ColumnMeta>>>,
}

impl PostgresDatabase {
    pub fn new(executor: MayPostgresExecutor) -> Self {
        Self {
            executor,
            fetch_size: DEFAULT_FETCH_SIZE,
            cursor_seq: Cell::new(0),
            column_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Validate `url`, connect and wrap the client
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` for a malformed URL or `DbError::Postgres`
    /// if the server cannot be reached.
    pub fn connect(url: &str) -> Result<Self, DbError> {
        let client = connect(url)?;
        Ok(Self::new(MayPostgresExecutor::new(client)))
    }

    /// Rows pulled per cursor round trip
    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn executor(&self) -> &MayPostgresExecutor {
        &self.executor
    }

    fn cached_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>, DbError> {
        let key = (schema.to_string(), table.to_string());
        if let Some(columns) = self.column_cache.borrow().get(&key) {
            return Ok(columns.clone());
        }
        let columns = self.columns(schema, table)?;
        self.column_cache.borrow_mut().insert(key, columns.clone());
        Ok(columns)
    }

    fn meta_for<'m>(metas: &'m [ColumnMeta], name: &str) -> Option<&'m ColumnMeta> {
        metas.iter().find(|m| m.name == name)
    }

    fn get_text(row: &may_postgres::Row, idx: usize) -> Result<String, DbError> {
        row.try_get(idx)
            .map_err(|e| DbError::Query(format!("catalog column {idx}: {e}")))
    }

    fn get_opt_i32(row: &may_postgres::Row, idx: usize) -> Result<Option<i32>, DbError> {
        row.try_get(idx)
            .map_err(|e| DbError::Query(format!("catalog column {idx}: {e}")))
    }
}

impl Database for PostgresDatabase {
    fn table_names(&self, schema: &str) -> Result<Vec<String>, DbError> {
        let rows = self.executor.query_all(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema::text = $1 AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[&schema],
        )?;
        rows.iter().map(|r| Self::get_text(r, 0)).collect()
    }

    fn columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>, DbError> {
        let rows = self.executor.query_all(
            "SELECT column_name::text, \
                    CASE WHEN data_type IN ('USER-DEFINED', 'ARRAY') THEN udt_name::text \
                         ELSE data_type::text END, \
                    character_maximum_length::int4, \
                    numeric_precision::int4, \
                    numeric_scale::int4, \
                    (is_nullable = 'YES') \
             FROM information_schema.columns \
             WHERE table_schema::text = $1 AND table_name::text = $2 \
             ORDER BY ordinal_position",
            &[&schema, &table],
        )?;
        if rows.is_empty() {
            return Err(DbError::TableNotFound(format!("{schema}.{table}")));
        }
        rows.iter()
            .map(|r| {
                Ok(ColumnMeta {
                    name: Self::get_text(r, 0)?,
                    data_type: Self::get_text(r, 1)?,
                    max_length: Self::get_opt_i32(r, 2)?,
                    numeric_precision: Self::get_opt_i32(r, 3)?,
                    numeric_scale: Self::get_opt_i32(r, 4)?,
                    nullable: r
                        .try_get(5)
                        .map_err(|e| DbError::Query(format!("catalog column 5: {e}")))?,
                })
            })
            .collect()
    }

    fn primary_key(&self, schema: &str, table: &str) -> Result<Option<KeyConstraint>, DbError> {
        let rows = self.executor.query_all(
            "SELECT tc.constraint_name::text, kcu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
              AND tc.table_name = kcu.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema::text = $1 AND tc.table_name::text = $2 \
             ORDER BY kcu.ordinal_position",
            &[&schema, &table],
        )?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let name = Self::get_text(first, 0)?;
        let columns = rows
            .iter()
            .map(|r| Self::get_text(r, 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(KeyConstraint {
            name: Some(name),
            columns,
        }))
    }

    fn foreign_keys(&self, schema: &str) -> Result<Vec<ForeignKeyMeta>, DbError> {
        let rows = self.executor.query_all(
            "SELECT con.conname::text, child.relname::text, ca.attname::text, \
                    parent.relname::text, pa.attname::text, k.pos::int4 \
             FROM pg_catalog.pg_constraint con \
             JOIN pg_catalog.pg_class child ON child.oid = con.conrelid \
             JOIN pg_catalog.pg_namespace ns ON ns.oid = child.relnamespace \
             JOIN pg_catalog.pg_class parent ON parent.oid = con.confrelid \
             CROSS JOIN LATERAL unnest(con.conkey, con.confkey) \
                  WITH ORDINALITY AS k(child_att, parent_att, pos) \
             JOIN pg_catalog.pg_attribute ca \
               ON ca.attrelid = con.conrelid AND ca.attnum = k.child_att \
             JOIN pg_catalog.pg_attribute pa \
               ON pa.attrelid = con.confrelid AND pa.attnum = k.parent_att \
             WHERE con.contype = 'f' AND ns.nspname::text = $1 \
             ORDER BY con.conname, k.pos",
            &[&schema],
        )?;
        rows.iter()
            .map(|r| {
                Ok(ForeignKeyMeta {
                    constraint: Self::get_text(r, 0)?,
                    child_table: Self::get_text(r, 1)?,
                    child_column: Self::get_text(r, 2)?,
                    parent_table: Self::get_text(r, 3)?,
                    parent_column: Self::get_text(r, 4)?,
                    position: Self::get_opt_i32(r, 5)?.unwrap_or(1),
                })
            })
            .collect()
    }

    fn create_schema(&self, schema: &str) -> Result<(), DbError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema));
        self.executor.execute(&sql, &[])?;
        Ok(())
    }

    fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnMeta],
        key_columns: &[String],
    ) -> Result<(), DbError> {
        let mut stmt = Table::create();
        stmt.table((Alias::new(schema), Alias::new(table)))
            .if_not_exists();
        for meta in columns {
            let mut def = column_def(meta);
            if key_columns.contains(&meta.name) {
                def.not_null();
            }
            stmt.col(&mut def);
        }
        if !key_columns.is_empty() {
            let mut pk = Index::create();
            for key in key_columns {
                pk.col(Alias::new(key.as_str()));
            }
            stmt.primary_key(&mut pk);
        }
        let sql = stmt.to_owned().build(PostgresQueryBuilder);
        log::debug!("creating table {schema}.{table}: {sql}");
        self.executor.execute(&sql, &[])?;
        self.column_cache
            .borrow_mut()
            .remove(&(schema.to_string(), table.to_string()));
        Ok(())
    }

    fn truncate(&self, schema: &str, table: &str) -> Result<(), DbError> {
        let sql = Query::delete()
            .from_table((Alias::new(schema), Alias::new(table)))
            .to_owned()
            .to_string(PostgresQueryBuilder);
        self.executor.execute(&sql, &[])?;
        Ok(())
    }

    fn rows<'a>(
        &'a self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<RowStream<'a>, DbError> {
        let metas = self.cached_columns(schema, table)?;
        let select_list = columns
            .iter()
            .map(|c| select_expr(Self::meta_for(&metas, c), c))
            .collect::<Vec<_>>()
            .join(", ");

        let seq = self.cursor_seq.get() + 1;
        self.cursor_seq.set(seq);
        let cursor = format!("veilguard_cursor_{seq}");

        self.executor.execute("BEGIN", &[])?;
        let declare = format!(
            "DECLARE {cursor} NO SCROLL CURSOR FOR SELECT {select_list} FROM {}",
            qualified(schema, table)
        );
        if let Err(e) = self.executor.execute(&declare, &[]) {
            let _ = self.executor.execute("ROLLBACK", &[]);
            return Err(e);
        }

        Ok(Box::new(CursorStream {
            db: self,
            cursor,
            table: Arc::from(table),
            columns: columns.to_vec().into(),
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn find_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        filter: &[(String, Value)],
    ) -> Result<Vec<Row>, DbError> {
        let metas = self.cached_columns(schema, table)?;
        let select_list = columns
            .iter()
            .map(|c| select_expr(Self::meta_for(&metas, c), c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {select_list} FROM {}", qualified(schema, table));
        for (i, (column, _)) in filter.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!(
                "{} IS NOT DISTINCT FROM {}",
                quote_ident(column),
                placeholder(Self::meta_for(&metas, column), i + 1)
            ));
        }
        let params: Vec<&dyn ToSql> = filter.iter().map(|(_, v)| v as &dyn ToSql).collect();
        let rows = self.executor.query_all(&sql, &params)?;

        let table: Arc<str> = Arc::from(table);
        let names: Arc<[String]> = columns.to_vec().into();
        rows.iter()
            .map(|r| {
                let values = (0..names.len())
                    .map(|i| value_from_row(r, i))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Row::new(Arc::clone(&table), Arc::clone(&names), values))
            })
            .collect()
    }

    fn value_counts(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Vec<(Value, u64)>, DbError> {
        let metas = self.cached_columns(schema, table)?;
        let expr = select_expr(Self::meta_for(&metas, column), column);
        let sql = format!(
            "SELECT {expr}, COUNT(*)::int8 FROM {} GROUP BY 1",
            qualified(schema, table)
        );
        let rows = self.executor.query_all(&sql, &[])?;
        rows.iter()
            .map(|r| {
                let value = value_from_row(r, 0)?;
                let count: i64 = r
                    .try_get(1)
                    .map_err(|e| DbError::Query(format!("count column: {e}")))?;
                Ok((value, count.max(0) as u64))
            })
            .collect()
    }

    fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64, DbError> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        let metas = self.cached_columns(schema, table)?;
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);

        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let mut sql = format!("INSERT INTO {} ({column_list}) VALUES ", qualified(schema, table));
            let mut params: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * columns.len());
            for (r, row) in chunk.iter().enumerate() {
                if row.len() != columns.len() {
                    return Err(DbError::Query(format!(
                        "row has {} values for {} columns",
                        row.len(),
                        columns.len()
                    )));
                }
                sql.push_str(if r == 0 { "(" } else { ", (" });
                for (c, value) in row.iter().enumerate() {
                    if c > 0 {
                        sql.push_str(", ");
                    }
                    sql.push_str(&placeholder(
                        Self::meta_for(&metas, &columns[c]),
                        params.len() + 1,
                    ));
                    params.push(value);
                }
                sql.push(')');
            }
            inserted += self.executor.execute(&sql, &params)?;
        }
        Ok(inserted)
    }

    fn begin(&self) -> Result<(), DbError> {
        self.executor.execute("BEGIN", &[])?;
        Ok(())
    }

    fn commit(&self) -> Result<(), DbError> {
        self.executor.execute("COMMIT", &[])?;
        Ok(())
    }

    fn rollback(&self) -> Result<(), DbError> {
        self.executor.execute("ROLLBACK", &[])?;
        Ok(())
    }

    fn set_referential_integrity(&self, enabled: bool) -> Result<(), DbError> {
        let role = if enabled { "origin" } else { "replica" };
        self.executor
            .execute(&format!("SET session_replication_role = {role}"), &[])?;
        Ok(())
    }
}

/// Server-side cursor wrapped as an iterator. The read transaction is closed
/// when the stream is dropped.
struct CursorStream<'a> {
    db: &'a PostgresDatabase,
    cursor: String,
    table: Arc<str>,
    columns: Arc<[String]>,
    buffer: VecDeque<Result<Row, DbError>>,
    exhausted: bool,
}

/// Decode each fetched row on its own, so one undecodable row becomes one
/// buffered error and the rows after it are still yielded.
fn buffer_rows<R>(
    fetched: &[R],
    table: &Arc<str>,
    columns: &Arc<[String]>,
    decode: impl Fn(&R) -> Result<Vec<Value>, DbError>,
    buffer: &mut VecDeque<Result<Row, DbError>>,
) {
    for r in fetched {
        buffer.push_back(decode(r).map(|values| Row::new(Arc::clone(table), Arc::clone(columns), values)));
    }
}

impl CursorStream<'_> {
    fn fetch(&mut self) -> Result<(), DbError> {
        let sql = format!("FETCH FORWARD {} FROM {}", self.db.fetch_size, self.cursor);
        let rows = self.db.executor.query_all(&sql, &[])?;
        if rows.len() < self.db.fetch_size {
            self.exhausted = true;
        }
        let width = self.columns.len();
        buffer_rows(
            &rows,
            &self.table,
            &self.columns,
            |r| (0..width).map(|i| value_from_row(r, i)).collect(),
            &mut self.buffer,
        );
        Ok(())
    }
}

impl Iterator for CursorStream<'_> {
    type Item = Result<Row, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front()
    }
}

impl Drop for CursorStream<'_> {
    fn drop(&mut self) {
        let close = format!("CLOSE {}", self.cursor);
        if let Err(e) = self.db.executor.execute(&close, &[]) {
            log::debug!("closing cursor {} failed: {e}", self.cursor);
        }
        if let Err(e) = self.db.executor.execute("COMMIT", &[]) {
            log::warn!("ending read transaction for {} failed: {e}", self.table);
        }
    }
}
