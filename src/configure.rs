// ============================================
// catalogsetup - configure.rs
// ============================================
// Points the installed update client at our catalog.
//
// Registry changes (all under HKLM):
//
//   SOFTWARE\Dell\UpdateService\Service
//     CustomCatalogHashValues   REG_SZ   [{"CatalogHashValues": {...}}]
//     IgnoreList                (subkey) deleted
//     LastCheckTimestamp, ...   deleted  (each one also stops ServiceShell.exe
//                                         and clears the service temp folder)
//
//   SOFTWARE\Dell\UpdateService\Clients\<Client>\Preferences\Settings\General
//     CustomCatalogPaths        REG_MULTI_SZ  [<catalog.xml>]
//     EnableCatalogXML          REG_DWORD     1
//     EnableDefaultDellCatalog  REG_DWORD     0   (profiles that ask for it)
//
// Then the inventory collector is copied into the service folder.
//
// Each change is attempted on its own and recorded as a StepResult, so one
// failing value doesn't stop the rest. The caller gets a single report.
// ============================================

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::client::{self, ClientIdentity, ClientProfile};
use crate::config::ToolConfig;
use crate::hashing::HashRecord;
use crate::registry::{RegValue, RegistryStore};
use crate::service::{self, ServiceHost};

pub const CATALOG_PATHS_VALUE: &str = "CustomCatalogPaths";
pub const ENABLE_CATALOG_XML_VALUE: &str = "EnableCatalogXML";
pub const ENABLE_DEFAULT_CATALOG_VALUE: &str = "EnableDefaultDellCatalog";

// ============================================
// REPORT
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Change made
    Done,
    /// Nothing to do (value already absent, no collector, ...)
    Skipped,
    /// Change could not be made
    Failed,
}

/// Result of one configuration step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Short name of the step, e.g. "delete stale value"
    pub step: String,
    /// Registry key\value or file the step worked on
    pub target: String,
    pub status: StepStatus,
    pub message: String,
}

impl StepResult {
    fn new(step: &str, target: impl Into<String>, status: StepStatus, message: impl Into<String>) -> Self {
        let result = StepResult {
            step: step.to_string(),
            target: target.into(),
            status,
            message: message.into(),
        };
        match status {
            StepStatus::Done => tracing::info!(step, target = %result.target, "{}", result.message),
            StepStatus::Skipped => tracing::debug!(step, target = %result.target, "{}", result.message),
            StepStatus::Failed => tracing::error!(step, target = %result.target, "{}", result.message),
        }
        result
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.step, self.target, self.message)
    }
}

/// Overall verdict of a configuration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every step succeeded or had nothing to do
    Applied,
    /// Some steps failed; the configuration may be inconsistent
    Partial(Vec<StepResult>),
    /// Nothing was written
    Skipped(String),
}

/// Everything one configuration run did
#[derive(Debug, Clone)]
pub struct ConfigureReport {
    pub client: Option<ClientIdentity>,
    pub catalog: PathBuf,
    pub hash: Option<HashRecord>,
    pub steps: Vec<StepResult>,
    skipped_reason: Option<String>,
}

impl ConfigureReport {
    pub fn failed(&self) -> Vec<&StepResult> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .collect()
    }

    pub fn outcome(&self) -> Outcome {
        if let Some(reason) = &self.skipped_reason {
            return Outcome::Skipped(reason.clone());
        }
        let failed: Vec<StepResult> = self.failed().into_iter().cloned().collect();
        if failed.is_empty() {
            Outcome::Applied
        } else {
            Outcome::Partial(failed)
        }
    }

    /// One line for the log and the console
    pub fn summary(&self) -> String {
        let count = |status: StepStatus| self.steps.iter().filter(|s| s.status == status).count();
        match self.outcome() {
            Outcome::Skipped(reason) => format!("Nothing written: {}", reason),
            outcome => format!(
                "{}: {} done, {} skipped, {} failed",
                if outcome == Outcome::Applied {
                    "Configuration applied"
                } else {
                    "Configuration partially applied"
                },
                count(StepStatus::Done),
                count(StepStatus::Skipped),
                count(StepStatus::Failed),
            ),
        }
    }
}

// ============================================
// APPLY
// ============================================

/// Make `path` absolute without resolving links (the client wants the path
/// as the operator sees it, not a \\?\ path).
fn absolute_catalog_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir().context("Failed to read the current directory")?;
        Ok(cwd.join(path))
    }
}

/// Write the full configuration for `catalog`.
///
/// Only an unreadable catalog is an error; everything else ends up in the
/// report. When no supported client is installed nothing is written.
pub fn apply_configuration(
    config: &ToolConfig,
    registry: &dyn RegistryStore,
    host: &dyn ServiceHost,
    catalog: &Path,
    collector: Option<&Path>,
) -> Result<ConfigureReport> {
    let catalog = absolute_catalog_path(catalog)?;

    let mut report = ConfigureReport {
        client: None,
        catalog: catalog.clone(),
        hash: None,
        steps: Vec::new(),
        skipped_reason: None,
    };

    let profile = match client::resolve_client(registry, config) {
        Some(profile) => profile,
        None => {
            report.skipped_reason = Some(
                "no supported update client is installed (Dell Command Update or Dell Update)"
                    .to_string(),
            );
            return Ok(report);
        }
    };
    report.client = Some(profile.identity);

    let record = HashRecord::from_file(&catalog)?;
    let json = record.to_registry_json()?;
    report.hash = Some(record);

    write_service_values(config, registry, host, &json, &mut report.steps);
    write_client_values(profile, registry, &catalog, &mut report.steps);
    copy_collector(config, collector, &mut report.steps);

    tracing::info!("{}", report.summary());
    Ok(report)
}

/// Hash record, IgnoreList and stale timestamps on the service key
fn write_service_values(
    config: &ToolConfig,
    registry: &dyn RegistryStore,
    host: &dyn ServiceHost,
    json: &str,
    steps: &mut Vec<StepResult>,
) {
    let key = config.service_key.as_str();

    match registry.key_exists(key) {
        Ok(true) => {}
        Ok(false) => {
            steps.push(StepResult::new("open service key", key, StepStatus::Failed, "key does not exist - is the update service installed?"));
            return;
        }
        Err(e) => {
            steps.push(StepResult::new("open service key", key, StepStatus::Failed, e.to_string()));
            return;
        }
    }

    let hash_target = format!(r"{}\{}", key, config.hash_value_name);
    steps.push(match registry.set_value(key, &config.hash_value_name, &RegValue::Sz(json.to_string())) {
        Ok(()) => StepResult::new("write catalog hash", hash_target, StepStatus::Done, "catalog hash written"),
        Err(e) => StepResult::new("write catalog hash", hash_target, StepStatus::Failed, e.to_string()),
    });

    let ignore_target = format!(r"{}\{}", key, config.ignore_list_subkey);
    steps.push(match registry.delete_subkey(key, &config.ignore_list_subkey) {
        Ok(true) => StepResult::new("delete ignore list", ignore_target, StepStatus::Done, "ignore list removed"),
        Ok(false) => StepResult::new("delete ignore list", ignore_target, StepStatus::Skipped, "no ignore list present"),
        Err(e) => {
            tracing::info!(error = %e, "ignore list could not be removed");
            StepResult::new("delete ignore list", ignore_target, StepStatus::Failed, e.to_string())
        }
    });

    let mut seen: Vec<String> = Vec::new();
    for name in &config.stale_value_names {
        if seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            continue;
        }
        seen.push(name.clone());

        let target = format!(r"{}\{}", key, name);
        match registry.delete_value(key, name) {
            Ok(true) => {
                steps.push(StepResult::new("delete stale value", target, StepStatus::Done, "stale value removed"));
                reset_service_state(config, host, steps);
            }
            Ok(false) => {
                steps.push(StepResult::new("delete stale value", target, StepStatus::Skipped, "value not present"));
            }
            Err(e) => {
                tracing::info!(value = %name, error = %e, "stale value could not be removed");
                steps.push(StepResult::new("delete stale value", target, StepStatus::Failed, e.to_string()));
            }
        }
    }
}

/// Stop the service shell and clear its temp folder after a stale value went away
fn reset_service_state(config: &ToolConfig, host: &dyn ServiceHost, steps: &mut Vec<StepResult>) {
    let process = config.service_process.as_str();
    steps.push(match host.stop_process(process) {
        Ok(true) => StepResult::new("stop service process", process, StepStatus::Done, "process stopped"),
        Ok(false) => StepResult::new("stop service process", process, StepStatus::Skipped, "process not running"),
        Err(e) => StepResult::new("stop service process", process, StepStatus::Failed, format!("{:#}", e)),
    });

    let temp = config.service_temp_dir.display().to_string();
    steps.push(match service::remove_dir_if_present(&config.service_temp_dir) {
        Ok(true) => StepResult::new("clear service temp", temp, StepStatus::Done, "temp directory removed"),
        Ok(false) => StepResult::new("clear service temp", temp, StepStatus::Skipped, "temp directory not present"),
        Err(e) => StepResult::new("clear service temp", temp, StepStatus::Failed, format!("{:#}", e)),
    });
}

/// Catalog path and switches on the client's settings key
fn write_client_values(
    profile: &ClientProfile,
    registry: &dyn RegistryStore,
    catalog: &Path,
    steps: &mut Vec<StepResult>,
) {
    let key = profile.settings_key.as_str();

    match registry.key_exists(key) {
        Ok(true) => {}
        Ok(false) => {
            steps.push(StepResult::new("open client settings", key, StepStatus::Failed, format!("key does not exist - has {} been started once?", profile.identity)));
            return;
        }
        Err(e) => {
            steps.push(StepResult::new("open client settings", key, StepStatus::Failed, e.to_string()));
            return;
        }
    }

    let mut values = vec![
        (CATALOG_PATHS_VALUE, RegValue::MultiSz(vec![catalog.to_string_lossy().to_string()])),
        (ENABLE_CATALOG_XML_VALUE, RegValue::Dword(1)),
    ];
    if profile.disable_default_catalog {
        values.push((ENABLE_DEFAULT_CATALOG_VALUE, RegValue::Dword(0)));
    }

    for (name, value) in values {
        let target = format!(r"{}\{}", key, name);
        steps.push(match registry.set_value(key, name, &value) {
            Ok(()) => StepResult::new("write client setting", target, StepStatus::Done, format!("set to {}", value)),
            Err(e) => StepResult::new("write client setting", target, StepStatus::Failed, e.to_string()),
        });
    }
}

/// Copy the inventory collector, or record why it was skipped
fn copy_collector(config: &ToolConfig, collector: Option<&Path>, steps: &mut Vec<StepResult>) {
    let target = config.collector_target();
    let target_text = target.display().to_string();

    steps.push(match collector {
        None => StepResult::new(
            "install collector",
            target_text,
            StepStatus::Skipped,
            "no inventory collector found - copy skipped",
        ),
        Some(source) => match service::install_collector(source, &target) {
            Ok(_) => StepResult::new("install collector", target_text, StepStatus::Done, format!("copied from {}", source.display())),
            Err(e) => StepResult::new("install collector", target_text, StepStatus::Failed, format!("{:#}", e)),
        },
    });
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::service::RecordingHost;
    use std::fs;
    use tempfile::TempDir;

    const SERVICE_KEY: &str = r"SOFTWARE\Dell\UpdateService\Service";
    const DCU_KEY: &str = r"SOFTWARE\Dell\UpdateService\Clients\CommandUpdate";
    const DCU_SETTINGS: &str =
        r"SOFTWARE\Dell\UpdateService\Clients\CommandUpdate\Preferences\Settings\General";
    const DU_KEY: &str = r"SOFTWARE\Dell\UpdateService\Clients\Update";
    const DU_SETTINGS: &str =
        r"SOFTWARE\Dell\UpdateService\Clients\Update\Preferences\Settings\General";

    /// Temp lab: catalog.xml, a collector, a service folder and a temp folder
    struct Lab {
        dir: TempDir,
        config: ToolConfig,
    }

    impl Lab {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("catalog.xml"), "<Manifest baseLocation=\"\"/>").unwrap();
            fs::write(dir.path().join("invcol.exe"), b"MZ collector").unwrap();
            fs::create_dir_all(dir.path().join("Service")).unwrap();
            fs::create_dir_all(dir.path().join("Temp").join("cache")).unwrap();

            let config = ToolConfig {
                scan_dir: dir.path().to_path_buf(),
                service_dir: dir.path().join("Service"),
                service_temp_dir: dir.path().join("Temp"),
                ..ToolConfig::default()
            };
            Lab { dir, config }
        }

        fn catalog(&self) -> PathBuf {
            self.dir.path().join("catalog.xml")
        }

        fn collector(&self) -> PathBuf {
            self.dir.path().join("invcol.exe")
        }
    }

    fn registry_with(keys: &[&str]) -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        for key in keys {
            registry.create_key(key);
        }
        registry
    }

    #[test]
    fn test_command_update_full_run() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY, DCU_SETTINGS]);
        registry.create_key(&format!(r"{}\IgnoreList\Pkg1", SERVICE_KEY));
        registry.seed_value(SERVICE_KEY, "LastCheckTimestamp", RegValue::Sz("x".into()));
        registry.seed_value(SERVICE_KEY, "CatalogTimestamp", RegValue::Sz("y".into()));
        let host = RecordingHost::default();

        let collector = lab.collector();
        let report =
            apply_configuration(&lab.config, &registry, &host, &lab.catalog(), Some(&collector)).unwrap();

        assert_eq!(report.outcome(), Outcome::Applied);
        assert_eq!(report.client, Some(ClientIdentity::CommandUpdate));

        // Hash record
        let json = match registry.get_value(SERVICE_KEY, "CustomCatalogHashValues") {
            Some(RegValue::Sz(s)) => s,
            other => panic!("unexpected hash value {:?}", other),
        };
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entry = &parsed[0]["CatalogHashValues"];
        assert_eq!(entry["Key"].as_str().unwrap(), lab.catalog().to_string_lossy());
        assert!(!entry["Value"].as_str().unwrap().ends_with('='));

        // Stale state gone
        assert!(!registry.key_exists(&format!(r"{}\IgnoreList", SERVICE_KEY)).unwrap());
        assert!(registry.get_value(SERVICE_KEY, "LastCheckTimestamp").is_none());
        assert!(registry.get_value(SERVICE_KEY, "CatalogTimestamp").is_none());
        assert_eq!(host.stopped.borrow().len(), 2);
        assert!(!lab.config.service_temp_dir.exists());

        // Client settings
        assert_eq!(
            registry.get_value(DCU_SETTINGS, "CustomCatalogPaths"),
            Some(RegValue::MultiSz(vec![lab.catalog().to_string_lossy().to_string()]))
        );
        assert_eq!(registry.get_value(DCU_SETTINGS, "EnableCatalogXML"), Some(RegValue::Dword(1)));
        assert_eq!(
            registry.get_value(DCU_SETTINGS, "EnableDefaultDellCatalog"),
            Some(RegValue::Dword(0))
        );

        // Collector copied
        let installed = lab.config.collector_target();
        assert_eq!(fs::read(installed).unwrap(), b"MZ collector");
    }

    #[test]
    fn test_dell_update_keeps_default_catalog_switch() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY, DU_SETTINGS]);
        let host = RecordingHost::default();

        let report = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();

        assert_eq!(report.client, Some(ClientIdentity::Update));
        assert_eq!(registry.get_value(DU_SETTINGS, "EnableCatalogXML"), Some(RegValue::Dword(1)));
        assert!(registry.get_value(DU_SETTINGS, "EnableDefaultDellCatalog").is_none());
    }

    #[test]
    fn test_no_client_writes_nothing() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY]);
        let host = RecordingHost::default();
        let collector = lab.collector();

        let report =
            apply_configuration(&lab.config, &registry, &host, &lab.catalog(), Some(&collector)).unwrap();

        assert!(matches!(report.outcome(), Outcome::Skipped(_)));
        assert!(report.steps.is_empty());
        assert!(report.hash.is_none());
        assert!(registry.get_value(SERVICE_KEY, "CustomCatalogHashValues").is_none());
        assert!(!lab.config.collector_target().exists());
        assert!(report.summary().starts_with("Nothing written"));
    }

    #[test]
    fn test_absent_stale_values_are_a_no_op() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY, DCU_SETTINGS]);
        let host = RecordingHost::default();

        let report = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();

        assert_eq!(report.outcome(), Outcome::Applied);
        assert!(host.stopped.borrow().is_empty());
        // Temp folder only goes when a stale value was actually removed
        assert!(lab.config.service_temp_dir.exists());
        let skipped = report
            .steps
            .iter()
            .filter(|s| s.step == "delete stale value" && s.status == StepStatus::Skipped)
            .count();
        assert_eq!(skipped, 3);
    }

    #[test]
    fn test_duplicate_stale_names_handled_once() {
        let mut lab = Lab::new();
        lab.config.stale_value_names = vec!["CatalogTimestamp".into(), "catalogtimestamp".into()];
        let registry = registry_with(&[SERVICE_KEY, DCU_SETTINGS]);
        registry.seed_value(SERVICE_KEY, "CatalogTimestamp", RegValue::Sz("y".into()));
        let host = RecordingHost::default();

        let report = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();
        let attempts = report.steps.iter().filter(|s| s.step == "delete stale value").count();
        assert_eq!(attempts, 1);
        assert_eq!(host.stopped.borrow().len(), 1);
    }

    #[test]
    fn test_missing_service_key_is_partial() {
        let lab = Lab::new();
        let registry = registry_with(&[DCU_SETTINGS]);
        let host = RecordingHost::default();

        let report = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();

        match report.outcome() {
            Outcome::Partial(failed) => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].step, "open service key");
            }
            other => panic!("expected partial, got {:?}", other),
        }
        // Client values are still written
        assert_eq!(registry.get_value(DCU_SETTINGS, "EnableCatalogXML"), Some(RegValue::Dword(1)));
        assert!(report.summary().contains("1 failed"));
    }

    #[test]
    fn test_denied_client_settings_are_reported() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY, DCU_KEY]);
        registry.create_key(DCU_SETTINGS);
        registry.deny(DCU_SETTINGS);
        let host = RecordingHost::default();

        let report = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();

        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].target, DCU_SETTINGS);
        // Service side still went through
        assert!(registry.get_value(SERVICE_KEY, "CustomCatalogHashValues").is_some());
    }

    #[test]
    fn test_denied_deletes_are_failures_not_skips() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY, DCU_SETTINGS]);
        registry.create_key(&format!(r"{}\IgnoreList", SERVICE_KEY));
        registry.seed_value(SERVICE_KEY, "LastCheckTimestamp", RegValue::Sz("x".into()));
        registry.deny_deletes(SERVICE_KEY);
        let host = RecordingHost::default();

        let report = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();

        let failed = report.failed();
        assert_eq!(failed.len(), 4);
        assert!(failed.iter().any(|s| s.step == "delete ignore list"));
        assert_eq!(failed.iter().filter(|s| s.step == "delete stale value").count(), 3);
        assert!(matches!(report.outcome(), Outcome::Partial(_)));
        assert!(report.summary().starts_with("Configuration partially applied"));

        // Nothing was removed, so the service is left alone
        assert!(registry.get_value(SERVICE_KEY, "LastCheckTimestamp").is_some());
        assert!(host.stopped.borrow().is_empty());
        assert!(lab.config.service_temp_dir.exists());
    }

    #[test]
    fn test_missing_collector_is_skipped_not_failed() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY, DCU_SETTINGS]);
        let host = RecordingHost::default();

        let report = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();

        let step = report.steps.iter().find(|s| s.step == "install collector").unwrap();
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(report.outcome(), Outcome::Applied);
    }

    #[test]
    fn test_unreadable_catalog_is_error() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY, DCU_SETTINGS]);
        let host = RecordingHost::default();

        let missing = lab.dir.path().join("missing.xml");
        assert!(apply_configuration(&lab.config, &registry, &host, &missing, None).is_err());
        assert!(registry.get_value(SERVICE_KEY, "CustomCatalogHashValues").is_none());
    }

    #[test]
    fn test_reapply_gives_same_hash() {
        let lab = Lab::new();
        let registry = registry_with(&[SERVICE_KEY, DCU_SETTINGS]);
        let host = RecordingHost::default();

        let first = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();
        let second = apply_configuration(&lab.config, &registry, &host, &lab.catalog(), None).unwrap();
        assert_eq!(first.hash, second.hash);
    }
}
