//! Row-oriented table stores
//!
//! Both the inventory and the audit log live in plain tables addressed by row
//! position. There is no transaction, no stable row id and no locking: a row
//! number is only meaningful until someone deletes a row above it.

pub mod memory;
pub mod sheets;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::MemoryTable;
pub use sheets::{SheetsClient, SheetsTable};

/// Positional address of a data row.
///
/// Numbered the way a spreadsheet numbers rows: row 1 is the header, the
/// first data row is row 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowRef(usize);

impl RowRef {
    /// Row number of the first data row
    pub const FIRST_DATA_ROW: usize = 2;

    /// Wrap a 1-based sheet row number
    pub fn new(row: usize) -> Self {
        Self(row)
    }

    /// Row holding the data row at `index` (0-based, header excluded)
    pub fn from_index(index: usize) -> Self {
        Self(index + Self::FIRST_DATA_ROW)
    }

    /// 1-based sheet row number
    pub fn get(self) -> usize {
        self.0
    }

    /// 0-based data index, `None` for the header or row 0
    pub fn index(self) -> Option<usize> {
        self.0.checked_sub(Self::FIRST_DATA_ROW)
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.0)
    }
}

/// A remote table of string cells.
///
/// Implementations never cache: every call goes to the backing store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableStore: Send + Sync {
    /// All data rows in store order, header excluded
    async fn read_rows(&self) -> Result<Vec<Vec<String>>>;

    /// Append a row after the last one
    async fn append_row(&self, row: Vec<String>) -> Result<()>;

    /// Remove one row; every row below it moves up by one
    async fn delete_row(&self, row: RowRef) -> Result<()>;

    /// Overwrite a single cell in place
    async fn update_cell(&self, row: RowRef, column: usize, value: String) -> Result<()>;
}
