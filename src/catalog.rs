// used for the table metadata oracle
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::{PartakeError, Result};
use crate::oracle::Tables;
use crate::IdentifierHasher;

lazy_static! {
    // table and column names end up inside SQL text, so only plain identifiers pass
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

fn quoted(name: &str) -> Result<String> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(PartakeError::Catalog(format!("'{name}' is not a plain identifier")))
    }
}

/// Turns a Hive style partition `y=2013/m=04` into a `WHERE` clause and the
/// values bound to it.
fn partition_filter(partition: Option<&str>) -> Result<(String, Vec<String>)> {
    let Some(partition) = partition.filter(|p| !p.is_empty()) else {
        return Ok((String::new(), Vec::new()));
    };
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    for segment in partition.split('/') {
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            PartakeError::Catalog(format!("partition segment '{segment}' is not key=value"))
        })?;
        clauses.push(format!("{} = ?{}", quoted(key)?, values.len() + 1));
        values.push(value.to_string());
    }
    Ok((format!(" WHERE {}", clauses.join(" AND ")), values))
}

/// Reads integer epoch seconds or UTC text timestamps.
fn convert(value: ValueRef) -> Option<DateTime<Utc>> {
    match value {
        ValueRef::Integer(seconds) => DateTime::from_timestamp(seconds, 0),
        ValueRef::Real(seconds) => DateTime::from_timestamp(seconds as i64, 0),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).ok()?.trim();
            DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|t| t.and_utc())
                })
        }
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

// ------------- SqliteTables -------------
/// Table metadata read from a SQLite database.
pub struct SqliteTables {
    connection: Mutex<Connection>,
    existence: Mutex<HashMap<String, bool, IdentifierHasher>>,
}

impl SqliteTables {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(connection),
            existence: Mutex::new(HashMap::default()),
        }
    }
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(Connection::open(path)?))
    }
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }
    /// Runs statements against the underlying database, mostly to seed it.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .execute_batch(sql)?;
        Ok(())
    }
    fn table_present(&self, connection: &Connection, table: &str) -> Result<bool> {
        let present: i64 = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        Ok(present != 0)
    }
}

impl Tables for SqliteTables {
    fn table_exists(&self, table: &str, partition: Option<&str>) -> Result<bool> {
        let key = format!("{table}/{}", partition.unwrap_or_default());
        if let Some(known) = self
            .existence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(*known);
        }
        let connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let mut exists = self.table_present(&connection, table)?;
        if exists && partition.is_some() {
            let (filter, values) = partition_filter(partition)?;
            let sql = format!("SELECT EXISTS(SELECT 1 FROM {}{filter})", quoted(table)?);
            debug!(%sql, "checking partition");
            let found: i64 = connection.query_row(&sql, params_from_iter(values.iter()), |row| {
                row.get(0)
            })?;
            exists = found != 0;
        }
        self.existence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, exists);
        Ok(exists)
    }
    fn table_last_modified_at(
        &self,
        table: &str,
        partition: Option<&str>,
        column: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.table_present(&connection, table)? {
            return Ok(None);
        }
        let (filter, values) = partition_filter(partition)?;
        let sql = format!(
            "SELECT MAX({}) FROM {}{filter}",
            quoted(column)?,
            quoted(table)?
        );
        let newest = connection
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                Ok(convert(row.get_ref(0)?))
            })
            .optional()?;
        Ok(newest.flatten())
    }
    fn clear(&self) {
        self.existence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
