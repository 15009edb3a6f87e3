//! In-memory [`Database`] for tests and dry runs.
//!
//! Tables live in a `RefCell` so the `&self` trait methods can mutate them.
//! Transactions snapshot every table on `begin` and restore the snapshot on
//! `rollback`. Primary keys are enforced on insert. Identifiers are matched
//! exactly, as quoted identifiers are in Postgres.

use super::{ColumnMeta, Database, ForeignKeyMeta, KeyConstraint, RowStream};
use crate::error::DbError;
use crate::value::{Row, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<ColumnMeta>,
    key: Option<KeyConstraint>,
    rows: Vec<Vec<Value>>,
}

impl MemTable {
    fn index_of(&self, column: &str) -> Result<usize, DbError> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| DbError::Query(format!("column {column} does not exist")))
    }

    fn key_of(&self, row: &[Value]) -> Option<Vec<Value>> {
        let key = self.key.as_ref()?;
        key.columns
            .iter()
            .map(|k| self.index_of(k).ok().map(|i| row[i].clone()))
            .collect()
    }
}

type Tables = BTreeMap<(String, String), MemTable>;

#[derive(Debug, Default)]
struct MemoryState {
    schemas: HashSet<String>,
    /// Insertion order of tables, so `table_names` is stable.
    order: Vec<(String, String)>,
    tables: Tables,
    foreign_keys: Vec<(String, ForeignKeyMeta)>,
    snapshot: Option<Tables>,
    commits: usize,
    rollbacks: usize,
    referential_integrity: bool,
    failing_inserts: HashSet<String>,
    fail_foreign_keys: bool,
}

/// A complete in-memory implementation of [`Database`]
#[derive(Debug)]
pub struct MemoryDatabase {
    state: RefCell<MemoryState>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(MemoryState {
                referential_integrity: true,
                ..MemoryState::default()
            }),
        }
    }

    /// Add a table with the given columns and primary key columns (may be empty)
    pub fn with_table(self, schema: &str, table: &str, columns: Vec<ColumnMeta>, key: &[&str]) -> Self {
        let key_columns: Vec<String> = key.iter().map(|k| (*k).to_string()).collect();
        // a fresh table cannot already exist, so the error path is unreachable
        let _ = self.create_table(schema, table, &columns, &key_columns);
        self
    }

    /// Add a foreign key column pair
    pub fn with_foreign_key(self, schema: &str, fk: ForeignKeyMeta) -> Self {
        self.state
            .borrow_mut()
            .foreign_keys
            .push((schema.to_string(), fk));
        self
    }

    /// Append rows to a table outside of any transaction bookkeeping
    pub fn with_rows(self, schema: &str, table: &str, rows: Vec<Vec<Value>>) -> Self {
        if let Some(t) = self
            .state
            .borrow_mut()
            .tables
            .get_mut(&(schema.to_string(), table.to_string()))
        {
            t.rows.extend(rows);
        }
        self
    }

    /// Make every insert into `table` fail
    pub fn fail_inserts_into(&self, table: &str) {
        self.state
            .borrow_mut()
            .failing_inserts
            .insert(table.to_string());
    }

    /// Make `foreign_keys` fail
    pub fn fail_foreign_key_scan(&self) {
        self.state.borrow_mut().fail_foreign_keys = true;
    }

    /// All rows of a table in insertion order (empty if the table does not exist)
    pub fn rows_of(&self, schema: &str, table: &str) -> Vec<Vec<Value>> {
        self.state
            .borrow()
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, schema: &str, table: &str) -> bool {
        self.state
            .borrow()
            .tables
            .contains_key(&(schema.to_string(), table.to_string()))
    }

    pub fn commits(&self) -> usize {
        self.state.borrow().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.borrow().rollbacks
    }

    pub fn referential_integrity(&self) -> bool {
        self.state.borrow().referential_integrity
    }

    fn with_existing<T>(
        &self,
        schema: &str,
        table: &str,
        f: impl FnOnce(&MemTable) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let state = self.state.borrow();
        let t = state
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .ok_or_else(|| DbError::TableNotFound(format!("{schema}.{table}")))?;
        f(t)
    }
}

impl Database for MemoryDatabase {
    fn table_names(&self, schema: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .state
            .borrow()
            .order
            .iter()
            .filter(|(s, _)| s == schema)
            .map(|(_, t)| t.clone())
            .collect())
    }

    fn columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>, DbError> {
        self.with_existing(schema, table, |t| Ok(t.columns.clone()))
    }

    fn primary_key(&self, schema: &str, table: &str) -> Result<Option<KeyConstraint>, DbError> {
        self.with_existing(schema, table, |t| Ok(t.key.clone()))
    }

    fn foreign_keys(&self, schema: &str) -> Result<Vec<ForeignKeyMeta>, DbError> {
        let state = self.state.borrow();
        if state.fail_foreign_keys {
            return Err(DbError::Query("permission denied for pg_constraint".to_string()));
        }
        Ok(state
            .foreign_keys
            .iter()
            .filter(|(s, _)| s == schema)
            .map(|(_, fk)| fk.clone())
            .collect())
    }

    fn create_schema(&self, schema: &str) -> Result<(), DbError> {
        self.state.borrow_mut().schemas.insert(schema.to_string());
        Ok(())
    }

    fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnMeta],
        key_columns: &[String],
    ) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        let id = (schema.to_string(), table.to_string());
        if state.tables.contains_key(&id) {
            return Ok(());
        }
        let key = (!key_columns.is_empty()).then(|| KeyConstraint {
            name: Some(format!("{table}_pkey")),
            columns: key_columns.to_vec(),
        });
        let columns = columns
            .iter()
            .map(|c| {
                if key_columns.contains(&c.name) {
                    c.clone().not_null()
                } else {
                    c.clone()
                }
            })
            .collect();
        state.schemas.insert(schema.to_string());
        state.order.push(id.clone());
        state.tables.insert(
            id,
            MemTable {
                columns,
                key,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn truncate(&self, schema: &str, table: &str) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        let t = state
            .tables
            .get_mut(&(schema.to_string(), table.to_string()))
            .ok_or_else(|| DbError::TableNotFound(format!("{schema}.{table}")))?;
        t.rows.clear();
        Ok(())
    }

    fn rows<'a>(
        &'a self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<RowStream<'a>, DbError> {
        let (indexes, rows) = self.with_existing(schema, table, |t| {
            let indexes = columns
                .iter()
                .map(|c| t.index_of(c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((indexes, t.rows.clone()))
        })?;
        let table: Arc<str> = Arc::from(table);
        let names: Arc<[String]> = columns.to_vec().into();
        Ok(Box::new(rows.into_iter().map(move |r| {
            let values = indexes.iter().map(|&i| r[i].clone()).collect();
            Ok(Row::new(Arc::clone(&table), Arc::clone(&names), values))
        })))
    }

    fn find_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        filter: &[(String, Value)],
    ) -> Result<Vec<Row>, DbError> {
        self.with_existing(schema, table, |t| {
            let indexes = columns
                .iter()
                .map(|c| t.index_of(c))
                .collect::<Result<Vec<_>, _>>()?;
            let conditions = filter
                .iter()
                .map(|(c, v)| Ok((t.index_of(c)?, v)))
                .collect::<Result<Vec<_>, DbError>>()?;
            let table_name: Arc<str> = Arc::from(table);
            let names: Arc<[String]> = columns.to_vec().into();
            Ok(t.rows
                .iter()
                .filter(|r| conditions.iter().all(|(i, v)| &r[*i] == *v))
                .map(|r| {
                    let values = indexes.iter().map(|&i| r[i].clone()).collect();
                    Row::new(Arc::clone(&table_name), Arc::clone(&names), values)
                })
                .collect())
        })
    }

    fn value_counts(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Vec<(Value, u64)>, DbError> {
        self.with_existing(schema, table, |t| {
            let i = t.index_of(column)?;
            let mut counts: Vec<(Value, u64)> = Vec::new();
            for row in &t.rows {
                match counts.iter_mut().find(|(v, _)| *v == row[i]) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((row[i].clone(), 1)),
                }
            }
            Ok(counts)
        })
    }

    fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64, DbError> {
        let mut state = self.state.borrow_mut();
        if state.failing_inserts.contains(table) {
            return Err(DbError::Query(format!("insert into {table} rejected")));
        }
        let t = state
            .tables
            .get_mut(&(schema.to_string(), table.to_string()))
            .ok_or_else(|| DbError::TableNotFound(format!("{schema}.{table}")))?;
        let indexes = columns
            .iter()
            .map(|c| t.index_of(c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut staged = Vec::with_capacity(rows.len());
        let mut keys: HashSet<Vec<Value>> = t.rows.iter().filter_map(|r| t.key_of(r)).collect();
        for values in rows {
            if values.len() != indexes.len() {
                return Err(DbError::Query(format!(
                    "row has {} values for {} columns",
                    values.len(),
                    indexes.len()
                )));
            }
            let mut full = vec![Value::Null; t.columns.len()];
            for (&i, v) in indexes.iter().zip(values) {
                full[i] = v.clone();
            }
            for (meta, v) in t.columns.iter().zip(&full) {
                if !meta.nullable && v.is_null() {
                    return Err(DbError::Constraint(format!(
                        "null value in column {} of {table}",
                        meta.name
                    )));
                }
            }
            if let Some(key) = t.key_of(&full) {
                if !keys.insert(key.clone()) {
                    let rendered: Vec<String> = key.iter().map(ToString::to_string).collect();
                    return Err(DbError::Constraint(format!(
                        "duplicate key ({}) in {table}",
                        rendered.join(", ")
                    )));
                }
            }
            staged.push(full);
        }
        let inserted = staged.len() as u64;
        t.rows.extend(staged);
        Ok(inserted)
    }

    fn begin(&self) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    fn commit(&self) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        state.snapshot = None;
        state.commits += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        if let Some(snapshot) = state.snapshot.take() {
            state.tables = snapshot;
        }
        state.rollbacks += 1;
        Ok(())
    }

    fn set_referential_integrity(&self, enabled: bool) -> Result<(), DbError> {
        self.state.borrow_mut().referential_integrity = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> MemoryDatabase {
        MemoryDatabase::new().with_table(
            "public",
            "PERSON",
            vec![
                ColumnMeta::new("ID", "integer"),
                ColumnMeta::new("NAME", "character varying").with_max_length(20),
            ],
            &["ID"],
        )
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_insert_and_stream_rows() {
        let db = people();
        let inserted = db
            .insert_rows(
                "public",
                "PERSON",
                &cols(&["ID", "NAME"]),
                &[vec![Value::Int(1), "Ada".into()], vec![Value::Int(2), "Bob".into()]],
            )
            .unwrap();
        assert_eq!(inserted, 2);

        let names: Vec<Value> = db
            .rows("public", "PERSON", &cols(&["NAME"]))
            .unwrap()
            .map(|r| r.unwrap().values()[0].clone())
            .collect();
        assert_eq!(names, vec![Value::from("Ada"), Value::from("Bob")]);
    }

    #[test]
    fn test_duplicate_key_is_rejected_atomically() {
        let db = people();
        let columns = cols(&["ID", "NAME"]);
        db.insert_rows("public", "PERSON", &columns, &[vec![Value::Int(1), "Ada".into()]])
            .unwrap();
        let err = db
            .insert_rows(
                "public",
                "PERSON",
                &columns,
                &[vec![Value::Int(2), "Bob".into()], vec![Value::Int(1), "Eve".into()]],
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
        assert_eq!(db.rows_of("public", "PERSON").len(), 1);
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let db = people();
        db.begin().unwrap();
        db.insert_rows("public", "PERSON", &cols(&["ID", "NAME"]), &[vec![Value::Int(1), "Ada".into()]])
            .unwrap();
        db.rollback().unwrap();
        assert!(db.rows_of("public", "PERSON").is_empty());
        assert_eq!(db.rollbacks(), 1);
    }

    #[test]
    fn test_find_rows_matches_nulls() {
        let db = people().with_rows(
            "public",
            "PERSON",
            vec![vec![Value::Int(1), Value::Null], vec![Value::Int(2), "Bob".into()]],
        );
        let found = db
            .find_rows("public", "PERSON", &cols(&["ID"]), &[("NAME".to_string(), Value::Null)])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].values(), &[Value::Int(1)]);
    }

    #[test]
    fn test_value_counts_groups_null() {
        let db = people().with_rows(
            "public",
            "PERSON",
            vec![
                vec![Value::Int(1), Value::Null],
                vec![Value::Int(2), "Bob".into()],
                vec![Value::Int(3), Value::Null],
            ],
        );
        let counts = db.value_counts("public", "PERSON", "NAME").unwrap();
        assert_eq!(counts, vec![(Value::Null, 2), (Value::from("Bob"), 1)]);
    }

    #[test]
    fn test_missing_table_is_reported() {
        let db = MemoryDatabase::new();
        assert!(matches!(
            db.truncate("public", "NOPE"),
            Err(DbError::TableNotFound(_))
        ));
    }
}
