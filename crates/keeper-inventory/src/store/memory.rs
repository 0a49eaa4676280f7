//! In-process table used by tests and the offline REPL

use super::{RowRef, TableStore};
use crate::error::{InventoryError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory table with spreadsheet row semantics
pub struct MemoryTable {
    header: Vec<String>,
    rows: Arc<RwLock<Vec<Vec<String>>>>,
}

impl MemoryTable {
    /// Create an empty table with the given column names
    pub fn new(header: &[&str]) -> Self {
        Self::with_rows(header, Vec::new())
    }

    /// Create a table pre-filled with data rows
    pub fn with_rows(header: &[&str], rows: Vec<Vec<String>>) -> Self {
        Self {
            header: header.iter().map(ToString::to_string).collect(),
            rows: Arc::new(RwLock::new(rows)),
        }
    }

    /// Column names
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Copy of all data rows
    pub async fn snapshot(&self) -> Vec<Vec<String>> {
        self.rows.read().await.clone()
    }

    /// Number of data rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Check if the table has no data rows
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn out_of_range(row: RowRef) -> InventoryError {
    InventoryError::RemoteStore(format!("{row} is out of range"))
}

#[async_trait]
impl TableStore for MemoryTable {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.snapshot().await)
    }

    async fn append_row(&self, row: Vec<String>) -> Result<()> {
        self.rows.write().await.push(row);
        Ok(())
    }

    async fn delete_row(&self, row: RowRef) -> Result<()> {
        let mut rows = self.rows.write().await;
        let index = row
            .index()
            .filter(|i| *i < rows.len())
            .ok_or_else(|| out_of_range(row))?;
        rows.remove(index);
        Ok(())
    }

    async fn update_cell(&self, row: RowRef, column: usize, value: String) -> Result<()> {
        let mut rows = self.rows.write().await;
        let cells = row
            .index()
            .and_then(|i| rows.get_mut(i))
            .ok_or_else(|| out_of_range(row))?;
        if cells.len() <= column {
            cells.resize(column + 1, String::new());
        }
        cells[column] = value;
        Ok(())
    }
}

impl Clone for MemoryTable {
    fn clone(&self) -> Self {
        Self {
            header: self.header.clone(),
            rows: Arc::clone(&self.rows),
        }
    }
}
