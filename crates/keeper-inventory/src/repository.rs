//! Inventory repository over a positional table
//!
//! Records are addressed only by their current row. Anything that deletes
//! several rows must go from the bottom of the table up, otherwise every
//! delete shifts the rows still waiting to be deleted.

use crate::error::{InventoryError, Result};
use crate::store::{RowRef, TableStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Column names of the inventory table
pub const INVENTORY_HEADER: [&str; 4] = ["key", "location", "addedAt", "lastAction"];

/// Format used for every timestamp written to a table
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const KEY: usize = 0;
const LOCATION: usize = 1;
const ADDED_AT: usize = 2;
const LAST_ACTION: usize = 3;

/// Current UTC time in table format
pub fn timestamp_now() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Shelf codes are stored upper-case
pub fn normalize_location(location: &str) -> String {
    location.trim().to_uppercase()
}

/// One inventory row as last read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Position at read time; stale after any delete above it
    pub row: RowRef,
    pub key: String,
    pub location: String,
    pub added_at: Option<String>,
    pub last_action: Option<String>,
}

impl InventoryRecord {
    fn from_cells(row: RowRef, cells: &[String]) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or_default();
        let optional = |i: usize| Some(cell(i)).filter(|c| !c.is_empty()).map(str::to_string);

        let key = cell(KEY);
        if key.is_empty() {
            return None;
        }

        Some(Self {
            row,
            key: key.to_string(),
            location: cell(LOCATION).to_string(),
            added_at: optional(ADDED_AT),
            last_action: optional(LAST_ACTION),
        })
    }
}

/// CRUD over the inventory table. Holds no state between calls.
#[derive(Clone)]
pub struct InventoryRepository {
    table: Arc<dyn TableStore>,
}

impl InventoryRepository {
    /// Create a repository over the given table
    pub fn new(table: Arc<dyn TableStore>) -> Self {
        Self { table }
    }

    /// Every non-blank row in store order
    pub async fn all_records(&self) -> Result<Vec<InventoryRecord>> {
        let rows = self.table.read_rows().await?;
        Ok(rows
            .iter()
            .enumerate()
            .filter_map(|(i, cells)| InventoryRecord::from_cells(RowRef::from_index(i), cells))
            .collect())
    }

    /// All records holding `key`, in store order
    pub async fn find_all_by_key(&self, key: &str) -> Result<Vec<InventoryRecord>> {
        let key = key.trim();
        let matches: Vec<_> = self
            .all_records()
            .await?
            .into_iter()
            .filter(|record| record.key == key)
            .collect();
        debug!(key, count = matches.len(), "Looked up key");
        Ok(matches)
    }

    /// Append a record with empty addedAt and lastAction
    pub async fn insert(&self, key: &str, location: &str) -> Result<()> {
        let key = key.trim();
        let location = normalize_location(location);
        if key.is_empty() || location.is_empty() {
            return Err(InventoryError::Parse(
                "key and location must not be empty".to_string(),
            ));
        }

        self.table
            .append_row(vec![key.to_string(), location.clone(), String::new(), String::new()])
            .await?;
        info!(key, %location, "Inserted record");
        Ok(())
    }

    /// Remove exactly one row
    pub async fn delete_at(&self, row: RowRef) -> Result<()> {
        self.table.delete_row(row).await?;
        info!(%row, "Deleted record");
        Ok(())
    }

    /// Remove every record holding `key`, returning how many were removed
    pub async fn delete_all_by_key(&self, key: &str) -> Result<usize> {
        let mut rows: Vec<RowRef> = self
            .find_all_by_key(key)
            .await?
            .into_iter()
            .map(|record| record.row)
            .collect();
        rows.sort_unstable_by(|a, b| b.cmp(a));

        for row in &rows {
            self.table.delete_row(*row).await?;
        }

        info!(key = key.trim(), count = rows.len(), "Deleted all records for key");
        Ok(rows.len())
    }

    /// Change a record's shelf in place
    pub async fn update_location_at(&self, row: RowRef, location: &str) -> Result<()> {
        let location = normalize_location(location);
        if location.is_empty() {
            return Err(InventoryError::Parse("location must not be empty".to_string()));
        }

        self.table.update_cell(row, LOCATION, location.clone()).await?;
        info!(%row, %location, "Moved record");
        Ok(())
    }

    /// Change a record's key in place
    pub async fn update_key_at(&self, row: RowRef, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(InventoryError::Parse("key must not be empty".to_string()));
        }

        self.table.update_cell(row, KEY, key.to_string()).await?;
        info!(%row, key, "Renamed record");
        Ok(())
    }

    /// Write lastAction on the first record holding `key`
    pub async fn set_last_action(&self, key: &str, text: &str) -> Result<()> {
        let record = self
            .find_all_by_key(key)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| InventoryError::NotFound(key.trim().to_string()))?;
        self.write_last_action(&record, text).await
    }

    /// Write lastAction on the record currently at `row`
    pub async fn set_last_action_at(&self, row: RowRef, text: &str) -> Result<()> {
        let rows = self.table.read_rows().await?;
        let record = row
            .index()
            .and_then(|i| rows.get(i))
            .and_then(|cells| InventoryRecord::from_cells(row, cells))
            .ok_or_else(|| InventoryError::NotFound(row.to_string()))?;
        self.write_last_action(&record, text).await
    }

    async fn write_last_action(&self, record: &InventoryRecord, text: &str) -> Result<()> {
        if record.added_at.is_none() {
            self.table
                .update_cell(record.row, ADDED_AT, timestamp_now())
                .await?;
        }
        self.table
            .update_cell(record.row, LAST_ACTION, text.to_string())
            .await
    }

    /// Re-resolve a cached record against the live table.
    ///
    /// Keeps the cached row if it still holds the same key and location,
    /// otherwise falls back to the first row that does.
    pub async fn revalidate(&self, record: &InventoryRecord) -> Result<Option<RowRef>> {
        let records = self.all_records().await?;
        let same = |r: &InventoryRecord| r.key == record.key && r.location == record.location;

        if records.iter().any(|r| r.row == record.row && same(r)) {
            return Ok(Some(record.row));
        }

        let moved = records.iter().find(|r| same(r)).map(|r| r.row);
        if let Some(row) = moved {
            debug!(key = %record.key, from = %record.row, to = %row, "Cached row shifted");
        }
        Ok(moved)
    }
}
