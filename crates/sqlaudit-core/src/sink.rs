// SPDX-License-Identifier: Apache-2.0

//! Audit Sink
//!
//! Persists lifecycle records into an embedded DuckDB store.
//!
//! ## Concurrency Model
//!
//! One `duckdb::Connection` per sink. The connection is `Send` but `!Sync`,
//! so every access goes through a single `parking_lot::Mutex`: concurrent
//! writers are fully serialized and never interleave.
//!
//! ## Schema
//!
//! A single append-only table, created idempotently when the sink opens.
//! Ids come from a sequence; timestamps are assigned by the store at insert.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use chrono::NaiveDateTime;
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::StoreLocation;
use crate::error::{AuditError, AuditResult};
use crate::types::{AuditRecord, AuditStats, HistoryQuery, Stage, StoredRecord};

/// Name of the audit table
pub const AUDIT_TABLE: &str = "sqlite_queries";

const SCHEMA: &str = r#"
    CREATE SEQUENCE IF NOT EXISTS sqlite_queries_id_seq START 1;
    CREATE TABLE IF NOT EXISTS sqlite_queries (
        id BIGINT PRIMARY KEY DEFAULT nextval('sqlite_queries_id_seq'),
        query TEXT,
        "timestamp" TIMESTAMP DEFAULT current_timestamp,
        hostname VARCHAR,
        address VARCHAR,
        thread_id VARCHAR,
        status VARCHAR
    );
"#;

const INSERT: &str = r#"
    INSERT INTO sqlite_queries (query, "timestamp", hostname, address, thread_id, status)
    VALUES (?, current_timestamp, ?, ?, ?, ?)
"#;

/// Rows stamped within `?` seconds of now. Compared in the same zone the
/// insert default writes in.
const WINDOW_CLAUSE: &str =
    "\"timestamp\" >= CAST(current_timestamp AS TIMESTAMP) - to_seconds(CAST(? AS BIGINT))";

/// Buckets a statement by its leading keyword; labels match
/// [`QUERY_TYPES`](crate::types::QUERY_TYPES)
const QUERY_TYPE_CASE: &str = "CASE \
    WHEN ltrim(query) ILIKE 'SELECT%' THEN 'SELECT' \
    WHEN ltrim(query) ILIKE 'INSERT%' THEN 'INSERT' \
    WHEN ltrim(query) ILIKE 'UPDATE%' THEN 'UPDATE' \
    WHEN ltrim(query) ILIKE 'DELETE%' THEN 'DELETE' \
    WHEN ltrim(query) ILIKE 'CREATE%' THEN 'CREATE' \
    ELSE 'OTHER' END";

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    /// Appends one record. Failures are returned, never panicked.
    fn write(&self, record: &AuditRecord) -> AuditResult<()>;
}

/// DuckDB-backed audit sink
pub struct DuckDbSink {
    conn: Mutex<Connection>,
    location: StoreLocation,
}

impl DuckDbSink {
    /// Opens (or creates) the store and makes sure the audit table exists
    pub fn open(location: &StoreLocation) -> AuditResult<Self> {
        let conn = match location {
            StoreLocation::InMemory => Connection::open_in_memory().map_err(|e| {
                AuditError::sink_init(format!("Failed to open in-memory DuckDB: {e}"))
            })?,
            StoreLocation::Path(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| {
                        AuditError::sink_init(format!(
                            "Failed to create audit directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                Connection::open(path).map_err(|e| {
                    AuditError::sink_init(format!(
                        "Failed to open DuckDB file '{}': {e}",
                        path.display()
                    ))
                })?
            }
        };

        conn.execute_batch(SCHEMA)
            .map_err(|e| AuditError::sink_init(format!("Failed to create audit table: {e}")))?;

        info!(location = %location, "Audit sink ready");

        Ok(Self {
            conn: Mutex::new(conn),
            location: location.clone(),
        })
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Reads rows back, filtered and paged
    pub fn history(&self, query: &HistoryQuery) -> AuditResult<Vec<StoredRecord>> {
        let mut sql = format!(
            "SELECT id, query, \"timestamp\", hostname, address, thread_id, status \
             FROM {AUDIT_TABLE}"
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(stage) = query.stage {
            clauses.push("status = ?");
            values.push(Value::Text(stage.as_str().to_string()));
        }

        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            clauses.push(
                "(contains(lower(query), ?) OR contains(lower(hostname), ?) \
                 OR contains(lower(thread_id), ?))",
            );
            values.extend(std::iter::repeat(Value::Text(term)).take(3));
        }

        if let Some(secs) = query.within_secs {
            clauses.push(WINDOW_CLAUSE);
            values.push(window_value(secs));
        }

        sql.push_str(&where_clause(&clauses));
        sql.push_str(if query.newest_first {
            " ORDER BY id DESC"
        } else {
            " ORDER BY id ASC"
        });
        sql.push_str(&format!(" LIMIT {} OFFSET {}", query.limit, query.offset));

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AuditError::read(format!("Failed to prepare history query: {e}")))?;

        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<NaiveDateTime>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(|e| AuditError::read(format!("History query failed: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, text, timestamp, hostname, address, thread_id, status) =
                row.map_err(|e| AuditError::read(format!("Row fetch failed: {e}")))?;

            let status = status.unwrap_or_default();
            let stage = status.parse::<Stage>().map_err(|_| {
                AuditError::read(format!("Row {id} has unknown status '{status}'"))
            })?;

            records.push(StoredRecord {
                id,
                query: text.unwrap_or_default(),
                timestamp,
                hostname: hostname.unwrap_or_default(),
                address: address.unwrap_or_default(),
                thread_id: thread_id.unwrap_or_default(),
                stage,
            });
        }

        debug!("Read {} audit rows", records.len());
        Ok(records)
    }

    /// Statistics over the whole audit table
    pub fn stats(&self) -> AuditResult<AuditStats> {
        self.collect_stats(None)
    }

    /// Statistics over rows written within `window` of now
    pub fn stats_within(&self, window: Duration) -> AuditResult<AuditStats> {
        self.collect_stats(Some(window.as_secs()))
    }

    fn collect_stats(&self, within_secs: Option<u64>) -> AuditResult<AuditStats> {
        let (filter, values) = match within_secs {
            Some(secs) => (where_clause(&[WINDOW_CLAUSE]), vec![window_value(secs)]),
            None => (String::new(), Vec::new()),
        };
        let read_err = |e: duckdb::Error| AuditError::read(format!("Stats query failed: {e}"));

        let conn = self.conn.lock();

        let (total, hosts, threads, first_seen, last_seen) = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*), COUNT(DISTINCT hostname), COUNT(DISTINCT thread_id), \
                     MIN(\"timestamp\"), MAX(\"timestamp\") FROM {AUDIT_TABLE}{filter}"
                ),
                params_from_iter(values.iter().cloned()),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<NaiveDateTime>>(3)?,
                        row.get::<_, Option<NaiveDateTime>>(4)?,
                    ))
                },
            )
            .map_err(read_err)?;

        let by_stage = grouped_counts(
            &conn,
            &format!("SELECT status, COUNT(*) FROM {AUDIT_TABLE}{filter} GROUP BY status"),
            &values,
        )?;
        let by_query_type = grouped_counts(
            &conn,
            &format!(
                "SELECT {QUERY_TYPE_CASE} AS query_type, COUNT(*) \
                 FROM {AUDIT_TABLE}{filter} GROUP BY query_type"
            ),
            &values,
        )?;

        Ok(AuditStats {
            total: total as u64,
            by_stage,
            by_query_type,
            hosts: hosts as u64,
            threads: threads as u64,
            first_seen,
            last_seen,
        })
    }
}

fn where_clause(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn window_value(secs: u64) -> Value {
    Value::BigInt(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Runs a `SELECT key, COUNT(*) ... GROUP BY key` query
fn grouped_counts(
    conn: &Connection,
    sql: &str,
    values: &[Value],
) -> AuditResult<HashMap<String, u64>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| AuditError::read(format!("Stats query failed: {e}")))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter().cloned()), |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| AuditError::read(format!("Stats query failed: {e}")))?;

    let mut counts = HashMap::new();
    for row in rows {
        let (key, count) = row.map_err(|e| AuditError::read(format!("Row fetch failed: {e}")))?;
        counts.insert(key.unwrap_or_default(), count as u64);
    }
    Ok(counts)
}

impl AuditSink for DuckDbSink {
    fn write(&self, record: &AuditRecord) -> AuditResult<()> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(INSERT)
            .map_err(|e| AuditError::write(format!("DuckDB prepare failed: {e}")))?;

        stmt.execute(params![
            record.query,
            record.caller.hostname,
            record.caller.address,
            record.thread_id,
            record.stage.as_str()
        ])
        .map_err(|e| AuditError::write(format!("DuckDB insert failed: {e}")))?;

        Ok(())
    }
}

impl std::fmt::Debug for DuckDbSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbSink")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
