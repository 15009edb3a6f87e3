//! Mapping from catalog column metadata to `SeaQuery` `ColumnDef` types.
//!
//! Side tables (pseudonym and retention tables) copy the declared type of the
//! column they mirror, so the declared type name, length and precision read
//! from `information_schema` are turned back into a column definition here.

use super::ColumnMeta;
use sea_query::{Alias, ColumnDef};

/// Apply the declared type of `meta` to `def`
///
/// # Type Mapping
///
/// - `smallint` / `integer` / `bigint` → `.small_integer()` / `.integer()` / `.big_integer()`
/// - `character varying(n)` / `character(n)` → `.string_len(n)` / `.char_len(n)`
/// - `text` → `.text()`
/// - `numeric(p, s)` → `.decimal_len(p, s)`, or `.decimal()` when unconstrained
/// - `real` / `double precision` → `.float()` / `.double()`
/// - `timestamp with time zone` → `.timestamp_with_time_zone()`
/// - `json` / `jsonb` → `.json()` / `.json_binary()`
/// - anything else is passed through as a custom type name
pub(crate) fn apply_column_type(meta: &ColumnMeta, def: &mut ColumnDef) {
    let type_lower = meta.data_type.trim().to_lowercase();
    match type_lower.as_str() {
        "smallint" | "int2" => {
            def.small_integer();
        }
        "integer" | "int" | "int4" => {
            def.integer();
        }
        "bigint" | "int8" => {
            def.big_integer();
        }
        "character varying" | "varchar" => match meta.max_length {
            Some(len) if len > 0 => {
                def.string_len(len as u32);
            }
            _ => {
                def.string();
            }
        },
        "character" | "char" | "bpchar" => match meta.max_length {
            Some(len) if len > 0 => {
                def.char_len(len as u32);
            }
            _ => {
                def.char();
            }
        },
        "text" | "name" => {
            def.text();
        }
        "boolean" | "bool" => {
            def.boolean();
        }
        "real" | "float4" => {
            def.float();
        }
        "double precision" | "float8" => {
            def.double();
        }
        "numeric" | "decimal" => match (meta.numeric_precision, meta.numeric_scale) {
            (Some(p), Some(s)) if p > 0 => {
                def.decimal_len(p as u32, s.max(0) as u32);
            }
            _ => {
                def.decimal();
            }
        },
        "date" => {
            def.date();
        }
        "timestamp" | "timestamp without time zone" => {
            def.timestamp();
        }
        "timestamptz" | "timestamp with time zone" => {
            def.timestamp_with_time_zone();
        }
        "time" | "time without time zone" => {
            def.time();
        }
        "uuid" => {
            def.uuid();
        }
        "json" => {
            def.json();
        }
        "jsonb" => {
            def.json_binary();
        }
        "bytea" => {
            def.binary();
        }
        _ => {
            def.custom(Alias::new(meta.data_type.as_str()));
        }
    }
}

/// Full column definition for a side table column
pub(crate) fn column_def(meta: &ColumnMeta) -> ColumnDef {
    let mut def = ColumnDef::new(Alias::new(meta.name.as_str()));
    apply_column_type(meta, &mut def);
    if !meta.nullable {
        def.not_null();
    }
    def
}
