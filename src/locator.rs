// ============================================
// catalogsetup - locator.rs
// ============================================
// Finds the catalog the operator dropped next to the tool and turns it into
// a normalized XML file:
//
//   lab/
//   ├── catalog.cab          <- exactly one archive in the scan dir
//   ├── catalog.xml          <- expand.exe output, normalized in place
//   └── tools/
//       └── InvColPC.exe     <- inventory collector, found recursively
//
// Zero or several archives is something only the operator can fix, so we
// ask and scan again, up to `max_attempts` times.
// ============================================

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use thiserror::Error;
use walkdir::WalkDir;

use crate::catalog_xml::{self, NormalizeStats};
use crate::config::ToolConfig;
use crate::operator::{Decision, Operator};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

// ============================================
// TYPES
// ============================================

/// Where the catalog and the collector were found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLocation {
    /// Archive the XML came from (None when an XML was given directly)
    pub cab_path: Option<PathBuf>,
    /// Normalized catalog XML, absolute
    pub xml_path: PathBuf,
    /// Inventory collector, if one was found
    pub collector: Option<PathBuf>,
    /// What normalization changed
    pub stats: NormalizeStats,
}

/// What is wrong with the scan directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogProblem {
    Missing { dir: PathBuf },
    Multiple { dir: PathBuf, found: Vec<PathBuf> },
}

impl CatalogProblem {
    /// Message shown to the operator
    pub fn describe(&self, extension: &str) -> String {
        match self {
            CatalogProblem::Missing { dir } => format!(
                "No .{} catalog found in {}. Place the catalog in this folder.",
                extension,
                dir.display()
            ),
            CatalogProblem::Multiple { dir, found } => format!(
                "{} .{} files found in {} - leave only one catalog in this folder.",
                found.len(),
                extension,
                dir.display()
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("catalog selection cancelled by the operator")]
    Cancelled,

    #[error("no usable catalog after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
}

// ============================================
// EXPANSION
// ============================================

/// Unpacks a catalog archive next to itself.
pub trait CabExpander {
    /// Expand `cab` and return the path of the XML it contained.
    fn expand(&self, cab: &Path) -> Result<PathBuf>;
}

/// expand.exe -R <cab> <dir>
#[derive(Debug, Default)]
pub struct ExpandExe;

impl CabExpander for ExpandExe {
    fn expand(&self, cab: &Path) -> Result<PathBuf> {
        let dest = cab.parent().unwrap_or(Path::new("."));

        let mut command = Command::new("expand.exe");
        command.arg("-R").arg(cab).arg(dest);

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        tracing::debug!(cab = %cab.display(), "running expand.exe");
        let output = command.output().context("Failed to run expand.exe")?;

        if !output.status.success() {
            anyhow::bail!(
                "expand.exe failed for {}: {}",
                cab.display(),
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }

        let xml_path = cab.with_extension("xml");
        if !xml_path.exists() {
            anyhow::bail!(
                "expand.exe did not produce {} - is {} a catalog archive?",
                xml_path.display(),
                cab.display()
            );
        }
        Ok(xml_path)
    }
}

// ============================================
// SCANNING
// ============================================

fn has_extension(path: &Path, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

/// Files in `dir` (not subfolders) with the given extension, sorted.
pub fn scan_catalogs(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && has_extension(&path, extension) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Search `root` recursively for the inventory collector
/// (name starts with `prefix`, ends with `.extension`, case-insensitive).
/// The first match in sorted walk order wins.
pub fn find_collector(root: &Path, prefix: &str, extension: &str) -> Option<PathBuf> {
    let prefix = prefix.to_lowercase();

    let found = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            name.starts_with(&prefix) && has_extension(path, extension)
        });

    match &found {
        Some(path) => tracing::info!(path = %path.display(), "inventory collector found"),
        None => tracing::warn!(root = %root.display(), "no inventory collector found"),
    }
    found
}

/// Check the scan directory once.
pub fn check_scan_dir(dir: &Path, extension: &str) -> Result<std::result::Result<PathBuf, CatalogProblem>> {
    let mut found = scan_catalogs(dir, extension)?;
    Ok(match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(CatalogProblem::Missing {
            dir: dir.to_path_buf(),
        }),
        _ => Err(CatalogProblem::Multiple {
            dir: dir.to_path_buf(),
            found,
        }),
    })
}

// ============================================
// LOCATE
// ============================================

/// Turn a catalog (archive or XML) into a normalized XML
fn prepare_catalog(path: &Path, expander: &dyn CabExpander) -> Result<(Option<PathBuf>, PathBuf, NormalizeStats)> {
    let (cab_path, xml_path) = if has_extension(path, "xml") {
        (None, path.to_path_buf())
    } else {
        let xml = expander.expand(path)?;
        (Some(path.to_path_buf()), xml)
    };

    let stats = catalog_xml::normalize_catalog(&xml_path)?;
    Ok((cab_path, xml_path, stats))
}

/// Find, expand and normalize the catalog.
///
/// `catalog_override` skips the scan (an `.xml` also skips expansion);
/// `collector_override` skips the collector search.
pub fn locate(
    config: &ToolConfig,
    expander: &dyn CabExpander,
    operator: &mut dyn Operator,
    catalog_override: Option<&Path>,
    collector_override: Option<&Path>,
) -> Result<CatalogLocation> {
    let scan_dir = config.resolved_scan_dir()?;

    let catalog = match catalog_override {
        Some(path) => {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                scan_dir.join(path)
            };
            if !path.is_file() {
                anyhow::bail!("Catalog {} does not exist", path.display());
            }
            path
        }
        None => wait_for_single_catalog(config, &scan_dir, operator)?,
    };

    tracing::info!(catalog = %catalog.display(), "catalog selected");
    let (cab_path, xml_path, stats) = prepare_catalog(&catalog, expander)?;

    let collector = match collector_override {
        Some(path) => Some(path.to_path_buf()),
        None => find_collector(&scan_dir, &config.collector_prefix, &config.collector_extension),
    };

    Ok(CatalogLocation {
        cab_path,
        xml_path,
        collector,
        stats,
    })
}

/// Scan until exactly one archive is present, the operator quits, or we run
/// out of attempts.
fn wait_for_single_catalog(
    config: &ToolConfig,
    scan_dir: &Path,
    operator: &mut dyn Operator,
) -> Result<PathBuf> {
    for attempt in 1..=config.max_attempts {
        match check_scan_dir(scan_dir, &config.archive_extension)? {
            Ok(cab) => return Ok(cab),
            Err(problem) => {
                let message = problem.describe(&config.archive_extension);
                tracing::warn!(attempt, max = config.max_attempts, "{}", message);

                if attempt == config.max_attempts {
                    break;
                }
                if operator.fix_and_retry(&message)? == Decision::Quit {
                    return Err(LocateError::Cancelled.into());
                }
            }
        }
    }

    Err(LocateError::AttemptsExhausted {
        attempts: config.max_attempts,
    }
    .into())
}

// ============================================
// TESTS
// ============================================
