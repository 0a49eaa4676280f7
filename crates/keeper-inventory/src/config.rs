//! Configuration for the remote spreadsheet store

use crate::error::{InventoryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Google Sheets REST endpoint
pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4/";

/// Configuration for the Google Sheets backed tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// Base URL of the Sheets REST API
    pub api_base: String,

    /// Spreadsheet holding both tables
    pub spreadsheet_id: String,

    /// OAuth bearer token, minted outside this crate
    pub access_token: String,

    /// Tab name of the inventory table
    pub inventory_sheet: String,

    /// Numeric sheet id (gid) of the inventory tab, needed for row deletes
    pub inventory_sheet_gid: u32,

    /// Tab name of the audit table
    pub audit_sheet: String,

    /// Request budget shared by all calls from this process
    pub requests_per_minute: u32,

    /// Request timeout duration
    pub request_timeout: Duration,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            spreadsheet_id: String::new(),
            access_token: String::new(),
            inventory_sheet: "Inventory".to_string(),
            inventory_sheet_gid: 0,
            audit_sheet: "Logs".to_string(),
            requests_per_minute: 60,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SheetsConfig {
    /// Create a new configuration builder
    pub fn builder() -> SheetsConfigBuilder {
        SheetsConfigBuilder::default()
    }

    /// Build a configuration from `KEEPER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::builder().with_env().build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(InventoryError::Config(
                "spreadsheet id is required (KEEPER_SPREADSHEET_ID)".to_string(),
            ));
        }

        if self.access_token.trim().is_empty() {
            return Err(InventoryError::Config(
                "access token is required (KEEPER_SHEETS_TOKEN)".to_string(),
            ));
        }

        if self.requests_per_minute == 0 {
            return Err(InventoryError::Config(
                "requests_per_minute must be greater than 0".to_string(),
            ));
        }

        if self.inventory_sheet == self.audit_sheet {
            return Err(InventoryError::Config(
                "inventory and audit tables must be different tabs".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for SheetsConfig
#[derive(Debug, Default)]
pub struct SheetsConfigBuilder {
    api_base: Option<String>,
    spreadsheet_id: Option<String>,
    access_token: Option<String>,
    inventory_sheet: Option<String>,
    inventory_sheet_gid: Option<u32>,
    audit_sheet: Option<String>,
    requests_per_minute: Option<u32>,
    request_timeout: Option<Duration>,
}

impl SheetsConfigBuilder {
    /// Set the API base URL
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    /// Set the spreadsheet id
    pub fn spreadsheet_id(mut self, id: impl Into<String>) -> Self {
        self.spreadsheet_id = Some(id.into());
        self
    }

    /// Set the bearer token
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the inventory tab name and gid
    pub fn inventory_sheet(mut self, name: impl Into<String>, gid: u32) -> Self {
        self.inventory_sheet = Some(name.into());
        self.inventory_sheet_gid = Some(gid);
        self
    }

    /// Set the audit tab name
    pub fn audit_sheet(mut self, name: impl Into<String>) -> Self {
        self.audit_sheet = Some(name.into());
        self
    }

    /// Set the request budget
    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = Some(rpm);
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, duration: Duration) -> Self {
        self.request_timeout = Some(duration);
        self
    }

    /// Fill unset fields from the environment
    pub fn with_env(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if self.api_base.is_none() {
            self.api_base = var("KEEPER_SHEETS_API_BASE");
        }
        if self.spreadsheet_id.is_none() {
            self.spreadsheet_id = var("KEEPER_SPREADSHEET_ID");
        }
        if self.access_token.is_none() {
            self.access_token = var("KEEPER_SHEETS_TOKEN");
        }
        if self.inventory_sheet.is_none() {
            self.inventory_sheet = var("KEEPER_INVENTORY_SHEET");
        }
        if self.inventory_sheet_gid.is_none() {
            self.inventory_sheet_gid =
                var("KEEPER_INVENTORY_SHEET_GID").and_then(|v| v.parse().ok());
        }
        if self.audit_sheet.is_none() {
            self.audit_sheet = var("KEEPER_AUDIT_SHEET");
        }
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<SheetsConfig> {
        let defaults = SheetsConfig::default();

        let config = SheetsConfig {
            api_base: self.api_base.unwrap_or(defaults.api_base),
            spreadsheet_id: self.spreadsheet_id.unwrap_or(defaults.spreadsheet_id),
            access_token: self.access_token.unwrap_or(defaults.access_token),
            inventory_sheet: self.inventory_sheet.unwrap_or(defaults.inventory_sheet),
            inventory_sheet_gid: self.inventory_sheet_gid.unwrap_or(defaults.inventory_sheet_gid),
            audit_sheet: self.audit_sheet.unwrap_or(defaults.audit_sheet),
            requests_per_minute: self.requests_per_minute.unwrap_or(defaults.requests_per_minute),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_credentials() {
        let config = SheetsConfig::default();
        assert_eq!(config.requests_per_minute, 60);
        assert_eq!(config.inventory_sheet, "Inventory");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = SheetsConfig::builder()
            .spreadsheet_id("sheet-id")
            .access_token("token")
            .inventory_sheet("Springs", 1234)
            .requests_per_minute(30)
            .request_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        assert_eq!(config.inventory_sheet, "Springs");
        assert_eq!(config.inventory_sheet_gid, 1234);
        assert_eq!(config.audit_sheet, "Logs");
        assert_eq!(config.requests_per_minute, 30);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_validation_zero_rate() {
        let result = SheetsConfig::builder()
            .spreadsheet_id("sheet-id")
            .access_token("token")
            .requests_per_minute(0)
            .build();

        assert!(matches!(result, Err(InventoryError::Config(_))));
    }

    #[test]
    fn test_validation_same_tab() {
        let config = SheetsConfig {
            spreadsheet_id: "sheet-id".to_string(),
            access_token: "token".to_string(),
            audit_sheet: "Inventory".to_string(),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }
}
