//! Destination tables: existence checks, row inserts and the natural-key mapping lookup.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hsync_core::{ColumnValue, DestinationTable, PersonMapping, SyncRow, SyncTarget};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InsertOutcome {
    pub inserted_count: usize,
    pub errors: Vec<String>,
}

impl InsertOutcome {
    pub fn inserted(count: usize) -> Self {
        Self {
            inserted_count: count,
            errors: Vec::new(),
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            inserted_count: 0,
            errors: vec![error.into()],
        }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn has_rows_for(&self, target: &SyncTarget) -> Result<bool>;

    /// Inserts all rows or none of them. Failures come back in the outcome, never as `Err`.
    async fn insert_rows(&self, table: DestinationTable, rows: &[SyncRow]) -> InsertOutcome;

    async fn find_by_natural_key(&self, natural_key: &str) -> Result<Option<PersonMapping>>;
}

fn row_natural_key(table: DestinationTable, row: &SyncRow) -> Result<&str> {
    row.text(table.natural_key_column()).with_context(|| {
        format!(
            "{} row is missing {}",
            table.table_name(),
            table.natural_key_column()
        )
    })
}

fn mapping_from_row(natural_key: &str, row: &SyncRow) -> Option<PersonMapping> {
    Some(PersonMapping {
        natural_key: natural_key.to_string(),
        entity_id: row.get("harmonic_id").and_then(ColumnValue::as_i64)?,
        display_name: row.text("full_name").map(str::to_string),
    })
}

pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .context("connecting to warehouse database")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying warehouse migrations")?;
        info!("warehouse migrations applied");
        Ok(())
    }

    async fn insert_all(&self, table: DestinationTable, rows: &[SyncRow]) -> Result<usize> {
        // Table names come from a closed enum, never from input.
        let sql = format!(
            "INSERT INTO {} (natural_key, row_data) VALUES ($1, $2)",
            table.table_name()
        );
        let mut tx = self.pool.begin().await.context("opening insert transaction")?;
        for row in rows {
            let natural_key = row_natural_key(table, row)?;
            sqlx::query(&sql)
                .bind(natural_key)
                .bind(Json(row))
                .execute(&mut *tx)
                .await
                .with_context(|| format!("inserting into {}", table.table_name()))?;
        }
        tx.commit().await.context("committing insert transaction")?;
        Ok(rows.len())
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn has_rows_for(&self, target: &SyncTarget) -> Result<bool> {
        let SyncTarget { table, natural_key } = target;
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE natural_key = $1)",
            table.table_name()
        );
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(natural_key)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("checking {} for {natural_key}", table.table_name()))
    }

    async fn insert_rows(&self, table: DestinationTable, rows: &[SyncRow]) -> InsertOutcome {
        if rows.is_empty() {
            return InsertOutcome::inserted(0);
        }
        match self.insert_all(table, rows).await {
            Ok(count) => InsertOutcome::inserted(count),
            Err(err) => {
                warn!(table = table.table_name(), error = %format!("{err:#}"), "insert rejected");
                InsertOutcome::rejected(format!("{err:#}"))
            }
        }
    }

    async fn find_by_natural_key(&self, natural_key: &str) -> Result<Option<PersonMapping>> {
        let sql = format!(
            "SELECT row_data FROM {} WHERE natural_key = $1 ORDER BY inserted_at LIMIT 1",
            DestinationTable::Mapping.table_name()
        );
        let row = sqlx::query(&sql)
            .bind(natural_key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("looking up mapping for {natural_key}"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let Json(data): Json<SyncRow> = row.try_get("row_data").context("decoding mapping row")?;
        Ok(mapping_from_row(natural_key, &data))
    }
}

/// Warehouse held in process memory, with switches to simulate failing tables.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<DestinationTable, Vec<SyncRow>>,
    rejecting: HashSet<DestinationTable>,
    unreachable: HashSet<DestinationTable>,
    insert_calls: usize,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed(&self, table: DestinationTable, rows: Vec<SyncRow>) {
        self.state().tables.entry(table).or_default().extend(rows);
    }

    /// Inserts into `table` fail from now on.
    pub fn reject_inserts(&self, table: DestinationTable) {
        self.state().rejecting.insert(table);
    }

    /// Existence checks against `table` fail from now on.
    pub fn fail_checks(&self, table: DestinationTable) {
        self.state().unreachable.insert(table);
    }

    pub fn rows(&self, table: DestinationTable) -> Vec<SyncRow> {
        self.state().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn insert_calls(&self) -> usize {
        self.state().insert_calls
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn has_rows_for(&self, target: &SyncTarget) -> Result<bool> {
        let SyncTarget { table, natural_key } = target;
        let state = self.state();
        if state.unreachable.contains(table) {
            anyhow::bail!("{} is unavailable", table.table_name());
        }
        Ok(state.tables.get(table).is_some_and(|rows| {
            rows.iter()
                .any(|row| row.text(table.natural_key_column()) == Some(natural_key.as_str()))
        }))
    }

    async fn insert_rows(&self, table: DestinationTable, rows: &[SyncRow]) -> InsertOutcome {
        let mut state = self.state();
        state.insert_calls += 1;
        if state.rejecting.contains(&table) {
            return InsertOutcome::rejected(format!("{} rejected the insert", table.table_name()));
        }
        if let Some(err) = rows.iter().find_map(|row| row_natural_key(table, row).err()) {
            return InsertOutcome::rejected(err.to_string());
        }
        state.tables.entry(table).or_default().extend(rows.iter().cloned());
        InsertOutcome::inserted(rows.len())
    }

    async fn find_by_natural_key(&self, natural_key: &str) -> Result<Option<PersonMapping>> {
        let state = self.state();
        let table = DestinationTable::Mapping;
        Ok(state
            .tables
            .get(&table)
            .and_then(|rows| {
                rows.iter()
                    .find(|row| row.text(table.natural_key_column()) == Some(natural_key))
            })
            .and_then(|row| mapping_from_row(natural_key, row)))
    }
}
