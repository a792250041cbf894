//! Destination table layout and the SQL fragments shared by the backends.

use crate::destination::{ConflictPolicy, SchemaPolicy};
use crate::error::{Result, StorageError};

pub const TIME_COLUMN: &str = "time";
pub const REGION_COLUMN: &str = "region_id";
pub const COUNTRY_COLUMN: &str = "country_code";

/// Key and metadata columns present in every destination table.
pub const FIXED_COLUMNS: [&str; 3] = [TIME_COLUMN, REGION_COLUMN, COUNTRY_COLUMN];

/// Table and column names are spliced into SQL, so only plain lowercase
/// identifiers are accepted.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if valid && name.len() <= 63 {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}

pub fn validate_columns(table: &str, variables: &[String]) -> Result<()> {
    validate_identifier(table)?;
    for variable in variables {
        validate_identifier(variable)?;
        if FIXED_COLUMNS.contains(&variable.as_str()) {
            return Err(StorageError::InvalidIdentifier(variable.clone()));
        }
    }
    Ok(())
}

/// `CREATE TABLE IF NOT EXISTS` with one nullable column per variable.
pub fn create_table_sql(table: &str, variables: &[String], time_type: &str) -> String {
    let mut columns = vec![
        format!("{TIME_COLUMN} {time_type} NOT NULL"),
        format!("{REGION_COLUMN} TEXT NOT NULL"),
        format!("{COUNTRY_COLUMN} TEXT NOT NULL"),
    ];
    columns.extend(variables.iter().map(|v| format!("{v} DOUBLE PRECISION")));
    columns.push(format!("PRIMARY KEY ({TIME_COLUMN}, {REGION_COLUMN})"));

    format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns.join(", "))
}

pub fn add_column_sql(table: &str, column: &str) -> String {
    format!("ALTER TABLE {table} ADD COLUMN {column} DOUBLE PRECISION")
}

/// Required columns absent from `existing`, key columns first.
pub fn missing_columns(existing: &[String], variables: &[String]) -> Vec<String> {
    FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(variables.iter().cloned())
        .filter(|c| !existing.iter().any(|e| e.eq_ignore_ascii_case(c)))
        .collect()
}

/// Columns to add to an existing table, empty if it already fits.
///
/// Only variable columns can be added, and only under [`SchemaPolicy::Widen`].
pub fn columns_to_add(
    table: &str,
    existing: &[String],
    variables: &[String],
    policy: SchemaPolicy,
) -> Result<Vec<String>> {
    let missing = missing_columns(existing, variables);
    let key_missing = missing
        .iter()
        .any(|c| FIXED_COLUMNS.contains(&c.as_str()));
    if !missing.is_empty() && (policy == SchemaPolicy::Reject || key_missing) {
        return Err(StorageError::SchemaMismatch {
            table: table.to_string(),
            missing,
        });
    }
    Ok(missing)
}

/// `INSERT INTO table (columns) ` ready for a VALUES list.
pub fn insert_prefix(table: &str, variables: &[String]) -> String {
    let columns: Vec<&str> = FIXED_COLUMNS
        .iter()
        .copied()
        .chain(variables.iter().map(String::as_str))
        .collect();
    format!("INSERT INTO {} ({}) ", table, columns.join(", "))
}

/// Trailing clause implementing the conflict policy.
///
/// Upserts keep existing values where the incoming row has none.
pub fn conflict_clause(table: &str, variables: &[String], policy: ConflictPolicy) -> String {
    match policy {
        ConflictPolicy::Reject => String::new(),
        ConflictPolicy::Upsert if variables.is_empty() => {
            format!(" ON CONFLICT ({TIME_COLUMN}, {REGION_COLUMN}) DO NOTHING")
        }
        ConflictPolicy::Upsert => {
            let updates: Vec<String> = variables
                .iter()
                .map(|v| format!("{v} = COALESCE(excluded.{v}, {table}.{v})"))
                .collect();
            format!(
                " ON CONFLICT ({TIME_COLUMN}, {REGION_COLUMN}) DO UPDATE SET {}",
                updates.join(", ")
            )
        }
    }
}

/// Rows per INSERT statement that stay under the backend's bind limit.
pub fn rows_per_statement(variables: usize, bind_limit: usize) -> usize {
    (bind_limit / (FIXED_COLUMNS.len() + variables)).max(1)
}
