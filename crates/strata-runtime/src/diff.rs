//! Column-level comparison of two live databases.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use sqlx::PgPool;

use strata_core::error::{Result, StrataError};

/// Representation of a database table (from introspection).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseTable {
    pub name: String,
    pub columns: BTreeMap<String, DatabaseColumn>,
}

/// Representation of a database column (from introspection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub max_length: Option<i32>,
}

/// Tables of the `public` schema, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseSchema {
    pub tables: BTreeMap<String, DatabaseTable>,
}

impl DatabaseSchema {
    pub fn from_columns(columns: impl IntoIterator<Item = (String, DatabaseColumn)>) -> Self {
        let mut tables: BTreeMap<String, DatabaseTable> = BTreeMap::new();
        for (table, column) in columns {
            tables
                .entry(table.clone())
                .or_insert_with(|| DatabaseTable {
                    name: table,
                    columns: BTreeMap::new(),
                })
                .columns
                .insert(column.name.clone(), column);
        }
        Self { tables }
    }
}

/// Read the column layout of the `public` schema.
pub async fn fetch_schema(pool: &PgPool) -> Result<DatabaseSchema> {
    let rows: Vec<(String, String, String, String, Option<i32>)> = sqlx::query_as(
        r#"
        SELECT table_name::text, column_name::text, data_type::text, is_nullable::text,
               character_maximum_length::int
        FROM information_schema.columns
        WHERE table_schema = 'public'
        ORDER BY table_name, ordinal_position
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| StrataError::Database(format!("Failed to read schema: {}", e)))?;

    Ok(DatabaseSchema::from_columns(rows.into_iter().map(
        |(table, name, data_type, is_nullable, max_length)| {
            (
                table,
                DatabaseColumn {
                    name,
                    data_type,
                    nullable: is_nullable == "YES",
                    max_length,
                },
            )
        },
    )))
}

/// Type of difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    TableOnlyInLocal,
    TableOnlyInProd,
    ColumnOnlyInLocal,
    ColumnOnlyInProd,
    ColumnMismatch,
}

/// Column property compared between environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnAttribute {
    DataType,
    Nullable,
    MaxLength,
}

impl fmt::Display for ColumnAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnAttribute::DataType => write!(f, "Type"),
            ColumnAttribute::Nullable => write!(f, "Nullable"),
            ColumnAttribute::MaxLength => write!(f, "Max Length"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDifference {
    pub attribute: ColumnAttribute,
    pub local: String,
    pub prod: String,
}

/// A single diff entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub action: DiffAction,
    pub table_name: String,
    pub column_name: Option<String>,
    /// Only set for `ColumnMismatch`.
    pub differences: Vec<ColumnDifference>,
}

impl DiffEntry {
    fn table(action: DiffAction, table: &str) -> Self {
        Self {
            action,
            table_name: table.to_string(),
            column_name: None,
            differences: Vec::new(),
        }
    }

    fn column(action: DiffAction, table: &str, column: &str) -> Self {
        Self {
            column_name: Some(column.to_string()),
            ..Self::table(action, table)
        }
    }
}

/// Represents the difference between two schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    pub entries: Vec<DiffEntry>,
}

impl SchemaDiff {
    /// Compare `local` against `prod`. Entries are ordered by table, then column.
    pub fn compare(local: &DatabaseSchema, prod: &DatabaseSchema) -> Self {
        let mut entries = Vec::new();
        let names: BTreeSet<&String> = local.tables.keys().chain(prod.tables.keys()).collect();

        for name in names {
            match (local.tables.get(name), prod.tables.get(name)) {
                (Some(_), None) => entries.push(DiffEntry::table(DiffAction::TableOnlyInLocal, name)),
                (None, Some(_)) => entries.push(DiffEntry::table(DiffAction::TableOnlyInProd, name)),
                (Some(l), Some(p)) => Self::compare_columns(name, l, p, &mut entries),
                (None, None) => {}
            }
        }

        Self { entries }
    }

    fn compare_columns(
        table: &str,
        local: &DatabaseTable,
        prod: &DatabaseTable,
        entries: &mut Vec<DiffEntry>,
    ) {
        let names: BTreeSet<&String> = local.columns.keys().chain(prod.columns.keys()).collect();

        for name in names {
            match (local.columns.get(name), prod.columns.get(name)) {
                (Some(_), None) => {
                    entries.push(DiffEntry::column(DiffAction::ColumnOnlyInLocal, table, name))
                }
                (None, Some(_)) => {
                    entries.push(DiffEntry::column(DiffAction::ColumnOnlyInProd, table, name))
                }
                (Some(l), Some(p)) => {
                    let differences = column_differences(l, p);
                    if !differences.is_empty() {
                        entries.push(DiffEntry {
                            differences,
                            ..DiffEntry::column(DiffAction::ColumnMismatch, table, name)
                        });
                    }
                }
                (None, None) => {}
            }
        }
    }

    /// Check if the schemas are identical.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn column_differences(local: &DatabaseColumn, prod: &DatabaseColumn) -> Vec<ColumnDifference> {
    let mut differences = Vec::new();
    let mut check = |attribute, l: String, p: String| {
        if l != p {
            differences.push(ColumnDifference {
                attribute,
                local: l,
                prod: p,
            });
        }
    };

    check(
        ColumnAttribute::DataType,
        local.data_type.clone(),
        prod.data_type.clone(),
    );
    check(
        ColumnAttribute::Nullable,
        yes_no(local.nullable),
        yes_no(prod.nullable),
    );
    check(
        ColumnAttribute::MaxLength,
        length(local.max_length),
        length(prod.max_length),
    );

    differences
}

fn yes_no(value: bool) -> String {
    if value { "YES" } else { "NO" }.to_string()
}

fn length(value: Option<i32>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}
