//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use pd_log_decoder::{CaptureConfig, VendorTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Vendor id (hex) -> vendor name
    #[serde(default)]
    pub vendors: BTreeMap<String, String>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl AppConfig {
    /// Build the vendor lookup table from the `[vendors]` section
    pub fn vendor_table(&self) -> Result<VendorTable> {
        let mut table = VendorTable::new();
        self.merge_vendors(&mut table)?;
        Ok(table)
    }

    /// Add the `[vendors]` entries to an existing table, overriding duplicates
    pub fn merge_vendors(&self, table: &mut VendorTable) -> Result<()> {
        insert_vendors(table, &self.vendors)
    }
}

fn insert_vendors(table: &mut VendorTable, entries: &BTreeMap<String, String>) -> Result<()> {
    for (id, name) in entries {
        let Some(vendor_id) = VendorTable::parse_vendor_id(id) else {
            bail!("Invalid vendor id {:?} (expected 16-bit hex such as 0x05AC)", id);
        };
        table.insert(vendor_id, name.clone());
    }
    Ok(())
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    // Fail early on bad vendor ids
    config
        .vendor_table()
        .with_context(|| format!("Invalid [vendors] table in {:?}", path))?;

    Ok(config)
}

/// Load a standalone vendor file: one `"05AC" = "Apple"` pair per line
pub fn load_vendor_file(path: &Path) -> Result<VendorTable> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read vendor file: {:?}", path))?;

    let entries: BTreeMap<String, String> = toml::from_str(&content)
        .with_context(|| format!("Failed to parse vendor file: {:?}", path))?;

    let mut table = VendorTable::new();
    insert_vendors(&mut table, &entries)
        .with_context(|| format!("Invalid vendor file: {:?}", path))?;
    Ok(table)
}
