//! Google Sheets REST v4 table client

use super::{RowRef, TableStore};
use crate::config::SheetsConfig;
use crate::error::{InventoryError, Result};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use url::Url;

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Shared HTTP client and request budget for one spreadsheet
#[derive(Debug, Clone)]
pub struct SheetsClient {
    client: Client,
    base: Url,
    spreadsheet_id: String,
    access_token: String,
    rate_limiter: SharedRateLimiter,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetsClient {
    /// Create a client from validated configuration
    pub fn new(config: &SheetsConfig) -> Result<Self> {
        config.validate()?;

        let quota = Quota::per_minute(
            NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN),
        );
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base: Url::parse(&config.api_base)?,
            spreadsheet_id: config.spreadsheet_id.clone(),
            access_token: config.access_token.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Handle to one tab of the spreadsheet
    pub fn table(&self, sheet: impl Into<String>, sheet_gid: u32) -> SheetsTable {
        SheetsTable {
            client: self.clone(),
            sheet: sheet.into(),
            sheet_gid,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| InventoryError::Config(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn values_url(&self, range: &str) -> Result<Url> {
        self.endpoint(&["spreadsheets", self.spreadsheet_id.as_str(), "values", range])
    }

    async fn send(&self, request: RequestBuilder) -> Result<serde_json::Value> {
        self.rate_limiter.until_ready().await;

        let response = request.bearer_auth(&self.access_token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::RemoteStore(format!("HTTP {status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

/// One tab of a spreadsheet, first row treated as the header
#[derive(Debug, Clone)]
pub struct SheetsTable {
    client: SheetsClient,
    sheet: String,
    sheet_gid: u32,
}

impl SheetsTable {
    fn whole_sheet(&self) -> String {
        quote_sheet_name(&self.sheet)
    }

    fn cell(&self, row: RowRef, column: usize) -> String {
        format!("{}!{}{}", self.whole_sheet(), column_letter(column), row.get())
    }
}

/// Quote a tab name for A1 notation
fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Spreadsheet column letters for a 0-based column index (0 → A, 26 → AA)
fn column_letter(column: usize) -> String {
    let mut letters = Vec::new();
    let mut n = column + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + u8::try_from(rem).unwrap_or(0)));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn delete_row_request(sheet_gid: u32, row: RowRef) -> serde_json::Value {
    // Sheets dimension ranges are 0-based and end-exclusive.
    json!({
        "requests": [{
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_gid,
                    "dimension": "ROWS",
                    "startIndex": row.get() - 1,
                    "endIndex": row.get(),
                }
            }
        }]
    })
}

#[async_trait]
impl TableStore for SheetsTable {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        let url = self.client.values_url(&self.whole_sheet())?;
        tracing::debug!(sheet = %self.sheet, "Reading all rows");

        let request = self
            .client
            .client
            .get(url)
            .query(&[("majorDimension", "ROWS"), ("valueRenderOption", "FORMATTED_VALUE")]);
        let body = self.client.send(request).await?;
        let range: ValueRange = serde_json::from_value(body)?;

        Ok(range.values.into_iter().skip(1).collect())
    }

    async fn append_row(&self, row: Vec<String>) -> Result<()> {
        let range = format!("{}:append", self.whole_sheet());
        let url = self.client.values_url(&range)?;

        let request = self
            .client
            .client
            .post(url)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "values": [row] }));
        self.client.send(request).await?;
        Ok(())
    }

    async fn delete_row(&self, row: RowRef) -> Result<()> {
        if row.index().is_none() {
            return Err(InventoryError::RemoteStore(format!("refusing to delete {row}")));
        }

        let batch = format!("{}:batchUpdate", self.client.spreadsheet_id);
        let url = self.client.endpoint(&["spreadsheets", batch.as_str()])?;

        let request = self
            .client
            .client
            .post(url)
            .json(&delete_row_request(self.sheet_gid, row));
        self.client.send(request).await?;
        Ok(())
    }

    async fn update_cell(&self, row: RowRef, column: usize, value: String) -> Result<()> {
        let range = self.cell(row, column);
        let url = self.client.values_url(&range)?;

        let request = self
            .client
            .client
            .put(url)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "range": range, "values": [[value]] }));
        self.client.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> SheetsClient {
        let config = SheetsConfig::builder()
            .spreadsheet_id("abc123")
            .access_token("token")
            .build()
            .unwrap();
        SheetsClient::new(&config).unwrap()
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(3), "D");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
    }

    #[test]
    fn test_quote_sheet_name() {
        assert_eq!(quote_sheet_name("Inventory"), "'Inventory'");
        assert_eq!(quote_sheet_name("Bob's"), "'Bob''s'");
    }

    #[test]
    fn test_cell_reference() {
        let table = test_client().table("Inventory", 0);
        assert_eq!(table.cell(RowRef::new(5), 1), "'Inventory'!B5");
    }

    #[test]
    fn test_values_url() {
        let client = test_client();
        let url = client.values_url("'Inventory'").unwrap();
        assert!(url
            .as_str()
            .starts_with("https://sheets.googleapis.com/v4/spreadsheets/abc123/values/"));
        assert!(url.as_str().ends_with("Inventory'"));
    }

    #[test]
    fn test_delete_request_is_zero_based() {
        let body = delete_row_request(77, RowRef::new(4));
        let range = &body["requests"][0]["deleteDimension"]["range"];
        assert_eq!(range["sheetId"], 77);
        assert_eq!(range["startIndex"], 3);
        assert_eq!(range["endIndex"], 4);
        assert_eq!(range["dimension"], "ROWS");
    }

    #[tokio::test]
    async fn test_refuses_to_delete_header() {
        let table = test_client().table("Inventory", 0);
        let result = table.delete_row(RowRef::new(1)).await;
        assert!(matches!(result, Err(InventoryError::RemoteStore(_))));
    }
}
