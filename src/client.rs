// ============================================
// catalogsetup - client.rs
// ============================================
// The two update clients that read the custom catalog settings, and how to
// tell which one is installed.
//
// Each client keeps its settings under its own registry subkey:
//   SOFTWARE\Dell\UpdateService\Clients\CommandUpdate\...
//   SOFTWARE\Dell\UpdateService\Clients\Update\...
//
// The per-client differences live in a ClientProfile table (config.rs) so
// nothing has to be inferred from which code path ran.
// ============================================

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ToolConfig;
use crate::registry::RegistryStore;

const CLIENTS_ROOT: &str = r"SOFTWARE\Dell\UpdateService\Clients";
const SETTINGS_SUFFIX: &str = r"Preferences\Settings\General";

/// Which update client is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIdentity {
    /// Dell Command Update (business machines)
    CommandUpdate,
    /// Dell Update (consumer machines)
    Update,
}

impl ClientIdentity {
    /// Name shown in the Start menu and in our messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ClientIdentity::CommandUpdate => "Dell Command Update",
            ClientIdentity::Update => "Dell Update",
        }
    }

    /// Subkey name under ...\UpdateService\Clients
    pub fn registry_name(&self) -> &'static str {
        match self {
            ClientIdentity::CommandUpdate => "CommandUpdate",
            ClientIdentity::Update => "Update",
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Registry layout and behaviour for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawClientProfile")]
pub struct ClientProfile {
    pub identity: ClientIdentity,
    /// Key whose presence means the client is installed
    pub probe_key: String,
    /// Key holding CustomCatalogPaths / EnableCatalogXML
    pub settings_key: String,
    /// Write EnableDefaultDellCatalog = 0 so only our catalog is used
    pub disable_default_catalog: bool,
    /// Optional EXE started when the operator chooses to continue
    pub launch_path: Option<PathBuf>,
}

impl ClientProfile {
    /// Built-in profile. Only Command Update has the default-catalog switch.
    pub fn default_for(identity: ClientIdentity) -> Self {
        let probe_key = format!(r"{}\{}", CLIENTS_ROOT, identity.registry_name());
        let settings_key = format!(r"{}\{}", probe_key, SETTINGS_SUFFIX);
        ClientProfile {
            identity,
            probe_key,
            settings_key,
            disable_default_catalog: identity == ClientIdentity::CommandUpdate,
            launch_path: None,
        }
    }
}

/// Config-file form: only `identity` is required, the rest falls back to
/// the built-in profile for that identity.
#[derive(Deserialize)]
struct RawClientProfile {
    identity: ClientIdentity,
    probe_key: Option<String>,
    settings_key: Option<String>,
    disable_default_catalog: Option<bool>,
    launch_path: Option<PathBuf>,
}

impl From<RawClientProfile> for ClientProfile {
    fn from(raw: RawClientProfile) -> Self {
        let base = ClientProfile::default_for(raw.identity);
        ClientProfile {
            identity: raw.identity,
            probe_key: raw.probe_key.unwrap_or(base.probe_key),
            settings_key: raw.settings_key.unwrap_or(base.settings_key),
            disable_default_catalog: raw
                .disable_default_catalog
                .unwrap_or(base.disable_default_catalog),
            launch_path: raw.launch_path.or(base.launch_path),
        }
    }
}

/// Find the installed client.
///
/// Profiles are probed in table order and the first whose key exists wins,
/// so Command Update takes precedence with the default table. Returns None
/// when no probe key exists (or can't be read).
pub fn resolve_client<'a>(
    registry: &dyn RegistryStore,
    config: &'a ToolConfig,
) -> Option<&'a ClientProfile> {
    for profile in &config.clients {
        match registry.key_exists(&profile.probe_key) {
            Ok(true) => {
                tracing::info!(client = %profile.identity, key = %profile.probe_key, "update client detected");
                return Some(profile);
            }
            Ok(false) => {
                tracing::debug!(key = %profile.probe_key, "client key not present");
            }
            Err(e) => {
                tracing::warn!(key = %profile.probe_key, error = %e, "could not probe client key");
            }
        }
    }
    tracing::warn!("no supported update client found");
    None
}

// ============================================
// TESTS
// ============================================
