//! SQLite result store.
//!
//! One table per mode. The table starts with only a row id; every other
//! column is added on first use and declared without a type, so values
//! keep the storage class they were bound with.

use super::ResultStore;
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Sqlite;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use sweep_core::{CountQuery, Validity};
use sweep_types::{is_valid_identifier, ParamValue, ResultRecord};
use tracing::debug;

/// SQLite-based result store.
///
/// Uses WAL mode so an operator can query results while a sweep runs.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

/// A value bound into a dynamically built statement.
enum Bind {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<&ParamValue> for Bind {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Int(i) => Bind::Int(*i),
            ParamValue::Float(f) => Bind::Float(*f),
            ParamValue::Bool(b) => Bind::Bool(*b),
            ParamValue::String(s) => Bind::Text(s.clone()),
        }
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path` and use `table` for records.
    pub async fn new(path: &Path, table: &str) -> Result<Self, StoreError> {
        check_identifier(table)?;
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory(table: &str) -> Result<Self, StoreError> {
        check_identifier(table)?;
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .synchronous(SqliteSynchronous::Normal);

        // A single long-lived connection: each connection to :memory: is a
        // separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Table this store reads and writes.
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (_rowid INTEGER PRIMARY KEY AUTOINCREMENT)",
            quote(&self.table)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Lowercased names of the table's current columns.
    async fn columns(&self) -> Result<HashSet<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?1)")
            .bind(&self.table)
            .fetch_all(&self.pool)
            .await?;
        Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
    }

    /// Total number of records, regardless of content.
    pub async fn total(&self) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote(&self.table));
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n as u64)
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn try_count(&self, query: &CountQuery) -> Result<u64, StoreError> {
        let columns = self.columns().await?;
        let mut clauses = Vec::new();
        let mut binds = Vec::new();

        for (field, wanted) in &query.conditions {
            let known = columns.contains(&field.to_lowercase());
            let col = quote(field);
            match wanted {
                // An absent column is null in every row.
                ParamValue::String(s) if s.is_empty() => {
                    if known {
                        clauses.push(format!("({col} = '' OR {col} IS NULL)"));
                    }
                }
                _ if !known => return Ok(0),
                ParamValue::Float(b) if *b == 0.0 => {
                    clauses.push(format!("ABS({col}) < ?"));
                    binds.push(Bind::Float(query.tolerance));
                }
                ParamValue::Float(b) => {
                    clauses.push(format!("ABS({col} - ?) / ? < ?"));
                    binds.push(Bind::Float(*b));
                    binds.push(Bind::Float(b.abs()));
                    binds.push(Bind::Float(query.tolerance));
                }
                other => {
                    clauses.push(format!("{col} = ?"));
                    binds.push(Bind::from(other));
                }
            }
        }

        if let Validity::NotNull(field) = &query.validity {
            if !columns.contains(&field.to_lowercase()) {
                return Ok(0);
            }
            clauses.push(format!("{} IS NOT NULL", quote(field)));
        }

        let mut sql = format!("SELECT COUNT(*) FROM {}", quote(&self.table));
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        debug!(%sql, "count query");

        let mut q = sqlx::query_scalar::<Sqlite, i64>(&sql);
        for b in binds {
            q = match b {
                Bind::Int(v) => q.bind(v),
                Bind::Float(v) => q.bind(v),
                Bind::Bool(v) => q.bind(v),
                Bind::Text(v) => q.bind(v),
            };
        }
        let n = q.fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn insert(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for (key, _) in record.iter() {
            // SQLite column names are case-insensitive; a second spelling
            // would silently write into the first column.
            if key.is_empty() || !seen.insert(key.to_lowercase()) {
                return Err(StoreError::InvalidIdentifier(key.to_string()));
            }
        }

        let mut columns = self.columns().await?;
        for (key, _) in record.iter() {
            if columns.insert(key.to_lowercase()) {
                debug!(column = key, table = %self.table, "adding column");
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote(&self.table),
                    quote(key)
                );
                sqlx::query(&sql).execute(&self.pool).await?;
            }
        }

        if record.is_empty() {
            let sql = format!("INSERT INTO {} DEFAULT VALUES", quote(&self.table));
            sqlx::query(&sql).execute(&self.pool).await?;
            return Ok(());
        }

        let names: Vec<String> = record.iter().map(|(k, _)| quote(k)).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&self.table),
            names.join(", "),
            placeholders
        );

        let mut q = sqlx::query(&sql);
        for (_, value) in record.iter() {
            q = match Bind::from(value) {
                Bind::Int(v) => q.bind(v),
                Bind::Float(v) => q.bind(v),
                Bind::Bool(v) => q.bind(v),
                Bind::Text(v) => q.bind(v),
            };
        }
        q.execute(&self.pool).await?;
        debug!(table = %self.table, fields = record.len(), "record inserted");
        Ok(())
    }
}

fn check_identifier(name: &str) -> Result<(), StoreError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Quote an identifier for SQLite, doubling embedded quotes.
fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_types::{ParamRole, ParameterAssignment};

    fn assignment(consistency: &str, load: i64) -> ParameterAssignment {
        ParameterAssignment::new()
            .with("consistency", ParamRole::Flag, consistency)
            .unwrap()
            .with("load", ParamRole::Flag, load)
            .unwrap()
    }

    fn query(a: &ParameterAssignment, validity: Validity) -> CountQuery {
        CountQuery::for_assignment(a, None, validity, 1e-4)
    }

    #[tokio::test]
    async fn count_on_fresh_table_is_zero() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let a = assignment("strong", 16);
        assert_eq!(store.try_count(&query(&a, Validity::Always)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_then_count() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let a = assignment("strong", 16);
        let b = assignment("weak", 16);

        store.insert(&ResultRecord::from_assignment(&a)).await.unwrap();
        store.insert(&ResultRecord::from_assignment(&a)).await.unwrap();
        store.insert(&ResultRecord::from_assignment(&b)).await.unwrap();

        assert_eq!(store.try_count(&query(&a, Validity::Always)).await.unwrap(), 2);
        assert_eq!(store.try_count(&query(&b, Validity::Always)).await.unwrap(), 1);
        assert_eq!(store.total().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn schema_grows_with_new_metric_keys() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let a = assignment("strong", 16);

        let mut first = ResultRecord::from_assignment(&a);
        first.merge_metric("total_time", "61.0");
        store.insert(&first).await.unwrap();

        let mut second = ResultRecord::from_assignment(&a);
        second.merge_metric("latency_p99", "12");
        store.insert(&second).await.unwrap();

        let q = query(&a, Validity::NotNull("latency_p99".into()));
        assert_eq!(store.try_count(&q).await.unwrap(), 1);
        let q = query(&a, Validity::NotNull("total_time".into()));
        assert_eq!(store.try_count(&q).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_validity_field_counts_zero() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let a = assignment("strong", 16);
        store.insert(&ResultRecord::from_assignment(&a)).await.unwrap();

        let q = query(&a, Validity::NotNull("never_seen".into()));
        assert_eq!(store.try_count(&q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_condition_column_counts_zero() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        store
            .insert(&ResultRecord::from_assignment(&assignment("strong", 16)))
            .await
            .unwrap();

        let a = assignment("strong", 16)
            .with("zipf", ParamRole::Flag, 0.6)
            .unwrap();
        assert_eq!(store.try_count(&query(&a, Validity::Always)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn floats_match_within_relative_tolerance() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let stored = ParameterAssignment::new()
            .with("zipf", ParamRole::Flag, 0.600001)
            .unwrap();
        store.insert(&ResultRecord::from_assignment(&stored)).await.unwrap();

        let close = ParameterAssignment::new()
            .with("zipf", ParamRole::Flag, 0.6)
            .unwrap();
        let far = ParameterAssignment::new()
            .with("zipf", ParamRole::Flag, 0.61)
            .unwrap();
        assert_eq!(store.try_count(&query(&close, Validity::Always)).await.unwrap(), 1);
        assert_eq!(store.try_count(&query(&far, Validity::Always)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_float_uses_absolute_bound() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let zero = ParameterAssignment::new()
            .with("loss", ParamRole::Flag, 0.0)
            .unwrap();
        store.insert(&ResultRecord::from_assignment(&zero)).await.unwrap();
        assert_eq!(store.try_count(&query(&zero, Validity::Always)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_string_matches_null_and_missing() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let a = assignment("strong", 16);
        store.insert(&ResultRecord::from_assignment(&a)).await.unwrap();

        // Column does not exist yet.
        let with_mode = a.clone().with("mode", ParamRole::Context, "").unwrap();
        assert_eq!(
            store.try_count(&query(&with_mode, Validity::Always)).await.unwrap(),
            1
        );

        // Column exists, earlier row is NULL, new row is ''.
        store
            .insert(&ResultRecord::from_assignment(&with_mode))
            .await
            .unwrap();
        assert_eq!(
            store.try_count(&query(&with_mode, Validity::Always)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn bools_round_trip_through_count() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let a = ParameterAssignment::new()
            .with("batching", ParamRole::Flag, true)
            .unwrap();
        store.insert(&ResultRecord::from_assignment(&a)).await.unwrap();

        let off = ParameterAssignment::new()
            .with("batching", ParamRole::Flag, false)
            .unwrap();
        assert_eq!(store.try_count(&query(&a, Validity::Always)).await.unwrap(), 1);
        assert_eq!(store.try_count(&query(&off, Validity::Always)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn allow_list_ignores_other_fields() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        store
            .insert(&ResultRecord::from_assignment(&assignment("strong", 16)))
            .await
            .unwrap();

        let fields = vec!["consistency".to_string()];
        let q = CountQuery::for_assignment(
            &assignment("strong", 128),
            Some(&fields),
            Validity::Always,
            1e-4,
        );
        assert_eq!(store.try_count(&q).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn keys_with_dots_are_quoted() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let mut record = ResultRecord::from_assignment(&assignment("strong", 16));
        record.merge_metric("owl.retwis.op", "3");
        record.merge_metric("say \"hi\"", "1");
        store.insert(&record).await.unwrap();
        assert_eq!(store.total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let mut record = ResultRecord::new();
        record.merge_metric("", "42");
        let err = store.insert(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn case_variant_keys_are_rejected() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let mut record = ResultRecord::from_assignment(&assignment("strong", 16));
        record.set("Load", 0.93);
        let err = store.insert(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(k) if k == "load"));
        assert_eq!(store.total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn case_variant_metric_cannot_overwrite_a_parameter() {
        let store = SqliteStore::in_memory("owl").await.unwrap();
        let a = assignment("strong", 16);
        let metrics = [("Load".to_string(), "0.93".to_string())].into_iter().collect();

        let record = crate::controller::build_record(&a, metrics, "s1");
        store.insert(&record).await.unwrap();

        assert_eq!(store.try_count(&query(&a, Validity::Always)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_table_name_is_rejected() {
        let err = SqliteStore::in_memory("owl; DROP TABLE x").await.err().unwrap();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.db");
        let a = assignment("weak", 128);

        {
            let store = SqliteStore::new(&path, "owl").await.unwrap();
            store.insert(&ResultRecord::from_assignment(&a)).await.unwrap();
        }

        let store = SqliteStore::new(&path, "owl").await.unwrap();
        assert_eq!(store.try_count(&query(&a, Validity::Always)).await.unwrap(), 1);

        // Tables are independent per mode.
        let other = SqliteStore::new(&path, "ipa").await.unwrap();
        assert_eq!(other.try_count(&query(&a, Validity::Always)).await.unwrap(), 0);
    }
}
