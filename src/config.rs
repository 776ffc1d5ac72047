// ============================================
// catalogsetup - config.rs
// ============================================
// All the knobs the tool needs, in one struct that is passed explicitly to
// every operation. Nothing here is global.
//
// Settings come from (first match wins):
//   1. --config <file> on the command line
//   2. catalogsetup.toml next to catalogsetup.exe
//   3. Built-in defaults (the values the Dell update service expects)
//
// Every field has a serde default, so a config file only needs the lines
// that differ from the defaults. Example:
//
//   max_attempts = 3
//   log_level = "debug"
//
//   [[clients]]
//   identity = "command_update"
//   launch_path = 'C:\Program Files\Dell\CommandUpdate\DellCommandUpdate.exe'
// ============================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::{ClientIdentity, ClientProfile};

/// Filename looked up next to the EXE when no --config is given
pub const CONFIG_FILE_NAME: &str = "catalogsetup.toml";

// ============================================
// TOOL CONFIGURATION
// ============================================

/// Everything one run of the tool needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    // ============================================
    // Catalog discovery
    // ============================================
    /// Directory scanned (non-recursively) for the catalog archive.
    /// Empty = the current working directory.
    pub scan_dir: PathBuf,
    /// Extension of the packed catalog, without the dot
    pub archive_extension: String,
    /// Lowercase filename prefix of the inventory collector (e.g. "inv")
    pub collector_prefix: String,
    /// Extension of the inventory collector, without the dot
    pub collector_extension: String,
    /// How many times the operator may fix the scan directory before we give up
    pub max_attempts: u32,

    // ============================================
    // Logging
    // ============================================
    /// Log file, relative paths are resolved against the working directory
    pub log_file: PathBuf,
    /// Level written to the log file (trace, debug, info, warn, error)
    pub log_level: String,

    // ============================================
    // Update service
    // ============================================
    /// Service key below HKLM
    pub service_key: String,
    /// Value holding the catalog hash record (REG_SZ)
    pub hash_value_name: String,
    /// Subkey of the service key that is removed on every run
    pub ignore_list_subkey: String,
    /// Cached timestamps removed on every run
    pub stale_value_names: Vec<String>,
    /// Background process stopped whenever a stale value is removed
    pub service_process: String,
    /// Service temp directory removed whenever a stale value is removed
    pub service_temp_dir: PathBuf,
    /// Install directory of the update service
    pub service_dir: PathBuf,
    /// Name the inventory collector is copied to inside service_dir
    pub collector_target_name: String,

    // ============================================
    // Clients
    // ============================================
    /// One entry per supported update client, probed in order
    pub clients: Vec<ClientProfile>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            scan_dir: PathBuf::new(),
            archive_extension: "cab".to_string(),
            collector_prefix: "inv".to_string(),
            collector_extension: "exe".to_string(),
            max_attempts: 5,

            log_file: PathBuf::from("catalog.log"),
            log_level: "info".to_string(),

            service_key: r"SOFTWARE\Dell\UpdateService\Service".to_string(),
            hash_value_name: "CustomCatalogHashValues".to_string(),
            ignore_list_subkey: "IgnoreList".to_string(),
            stale_value_names: vec![
                "LastCheckTimestamp".to_string(),
                "LastUpdateTimestamp".to_string(),
                "CatalogTimestamp".to_string(),
            ],
            service_process: "ServiceShell.exe".to_string(),
            service_temp_dir: PathBuf::from(r"C:\ProgramData\Dell\UpdateService\Temp"),
            service_dir: PathBuf::from(r"C:\Program Files (x86)\Dell\UpdateService\Service"),
            collector_target_name: "InvColPC.exe".to_string(),

            clients: vec![
                ClientProfile::default_for(ClientIdentity::CommandUpdate),
                ClientProfile::default_for(ClientIdentity::Update),
            ],
        }
    }
}

impl ToolConfig {
    /// The directory to scan, falling back to the working directory.
    pub fn resolved_scan_dir(&self) -> Result<PathBuf> {
        if self.scan_dir.as_os_str().is_empty() {
            std::env::current_dir().context("Failed to read the current directory")
        } else if self.scan_dir.is_absolute() {
            Ok(self.scan_dir.clone())
        } else {
            let cwd = std::env::current_dir().context("Failed to read the current directory")?;
            Ok(cwd.join(&self.scan_dir))
        }
    }

    /// Where the inventory collector ends up
    pub fn collector_target(&self) -> PathBuf {
        self.service_dir.join(&self.collector_target_name)
    }

    /// Profile for a client identity, if the config lists one
    pub fn profile(&self, identity: ClientIdentity) -> Option<&ClientProfile> {
        self.clients.iter().find(|p| p.identity == identity)
    }

    /// Check the things serde can't: values that would make the run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.archive_extension.trim_start_matches('.').is_empty() {
            anyhow::bail!("archive_extension cannot be empty");
        }
        if self.service_key.is_empty() {
            anyhow::bail!("service_key cannot be empty");
        }
        if self.clients.is_empty() {
            anyhow::bail!("at least one client profile is required");
        }
        Ok(())
    }
}

// ============================================
// LOADING
// ============================================

/// Directory of the running EXE (config file lives next to it)
fn get_app_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load configuration.
///
/// An explicit path must exist and parse. The implicit file next to the EXE
/// is optional; when it is missing the defaults are used.
pub fn load_config(explicit: Option<&Path>) -> Result<ToolConfig> {
    let config = match explicit {
        Some(path) => read_config_file(path)?,
        None => {
            let implicit = get_app_directory().join(CONFIG_FILE_NAME);
            if implicit.exists() {
                read_config_file(&implicit)?
            } else {
                ToolConfig::default()
            }
        }
    };

    config.validate()?;
    Ok(config)
}

/// Parse one TOML config file
pub fn read_config_file(path: &Path) -> Result<ToolConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

// ============================================
// TESTS
// ============================================
