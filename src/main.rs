// ============================================
// catalogsetup - main.rs
// ============================================
// Entry point. Points Dell Command Update / Dell Update at a catalog the
// operator dropped next to the tool.
//
// The program flow is:
// 1. Load config, start logging
// 2. Find the single .cab, expand it, normalize the XML   (locator.rs)
// 3. Hash it and write the registry                        (configure.rs)
// 4. Show one report, then: open client / write again / quit
//
// Subcommands `hash`, `detect` and `normalize` run one piece on its own.
// ============================================

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

mod catalog_xml;
mod client;
mod config;
mod configure;
mod hashing;
mod locator;
mod logging;
mod operator;
mod registry;
mod service;

use client::ClientIdentity;
use config::ToolConfig;
use configure::{ConfigureReport, Outcome, StepStatus};
use locator::{CatalogLocation, ExpandExe, LocateError};
use operator::{ConsoleOperator, NextStep, Operator};
use registry::{HklmRegistry, RegistryStore};
use service::{ServiceHost, WindowsServiceHost};

// ============================================
// COMMAND LINE
// ============================================

#[derive(Debug, Parser)]
#[command(name = "catalogsetup", version, about = "Point the Dell update client at a local catalog")]
struct Cli {
    /// Config file (default: catalogsetup.toml next to the EXE)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Find, hash and register the catalog (default)
    Apply {
        /// Use this .cab or .xml instead of scanning
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Use this inventory collector instead of searching
        #[arg(long)]
        collector: Option<PathBuf>,

        /// Scan this folder instead of the working directory
        #[arg(long)]
        scan_dir: Option<PathBuf>,
    },

    /// Print the CustomCatalogHashValues record for a file
    Hash { file: PathBuf },

    /// Show which update client is installed
    Detect,

    /// Normalize a catalog XML in place
    Normalize { file: PathBuf },
}

// ============================================
// MAIN
// ============================================

fn main() {
    if let Err(err) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = config::load_config(cli.config.as_deref())?;
    let _guard = logging::init_logging(&config, cli.verbose)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "catalogsetup started");

    let command = cli.command.unwrap_or(Commands::Apply {
        catalog: None,
        collector: None,
        scan_dir: None,
    });

    let result = match command {
        Commands::Apply {
            catalog,
            collector,
            scan_dir,
        } => {
            if let Some(dir) = scan_dir {
                config.scan_dir = dir;
            }
            run_apply(&config, catalog.as_deref(), collector.as_deref())
        }
        Commands::Hash { file } => run_hash(&file),
        Commands::Detect => run_detect(&config),
        Commands::Normalize { file } => run_normalize(&file),
    };

    match &result {
        Ok(()) => tracing::info!("catalogsetup finished"),
        Err(e) => tracing::error!("catalogsetup failed: {:#}", e),
    }
    result
}

// ============================================
// APPLY
// ============================================

fn run_apply(config: &ToolConfig, catalog: Option<&Path>, collector: Option<&Path>) -> Result<()> {
    println!("============================================");
    println!("catalogsetup v{}", env!("CARGO_PKG_VERSION"));
    println!("============================================");

    if !is_elevated() {
        tracing::warn!("not running elevated");
        operator::problem("Not running as administrator - registry and Program Files writes will fail.");
    }

    let registry = HklmRegistry::new();
    let host = WindowsServiceHost;
    let mut console = ConsoleOperator;

    operator::announce("Handling the catalog archive...");
    let location = match locator::locate(config, &ExpandExe, &mut console, catalog, collector) {
        Ok(location) => location,
        Err(e) => {
            if let Some(LocateError::Cancelled) = e.downcast_ref::<LocateError>() {
                println!("Quit.");
                return Ok(());
            }
            return Err(e);
        }
    };

    if let Some(cab) = &location.cab_path {
        println!("  Archive: {}", cab.display());
    }
    operator::success(&format!("Catalog: {}", location.xml_path.display()));
    println!(
        "  {} of {} components pointed at local files",
        location.stats.rewritten, location.stats.components
    );
    match &location.collector {
        Some(path) => println!("  Inventory collector: {}", path.display()),
        None => operator::problem("  No inventory collector (inv*.exe) found - it will not be installed."),
    }

    match configure_session(config, &registry, &host, &mut console, &location)? {
        SessionEnd::Launch(identity) => launch_client(config, identity),
        SessionEnd::Quit | SessionEnd::NothingToDo => Ok(()),
    }
}

/// How the configure/re-apply loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Operator wants the client opened
    Launch(ClientIdentity),
    Quit,
    /// No client installed, nothing was written
    NothingToDo,
}

/// Write the configuration, show the report, and repeat while the
/// operator asks for it.
fn configure_session(
    config: &ToolConfig,
    registry: &dyn RegistryStore,
    host: &dyn ServiceHost,
    operator: &mut dyn Operator,
    location: &CatalogLocation,
) -> Result<SessionEnd> {
    loop {
        operator::announce("Writing to the registry...");
        let report = configure::apply_configuration(
            config,
            registry,
            host,
            &location.xml_path,
            location.collector.as_deref(),
        )?;
        print_report(&report);

        let identity = match report.client {
            Some(identity) => identity,
            None => return Ok(SessionEnd::NothingToDo),
        };

        match operator.after_configure()? {
            NextStep::Reapply => continue,
            NextStep::Quit => return Ok(SessionEnd::Quit),
            NextStep::Continue => return Ok(SessionEnd::Launch(identity)),
        }
    }
}

fn print_report(report: &ConfigureReport) {
    if let Some(client) = report.client {
        println!("  Client: {}", client);
    }
    println!("  Catalog path: {}", report.catalog.display());
    if let Some(hash) = &report.hash {
        println!("  Catalog hash: {}", hash.digest());
    }
    for step in &report.steps {
        match step.status {
            StepStatus::Done => println!("  {} {}", "ok".green(), step),
            StepStatus::Skipped => println!("  {} {}", "--".dimmed(), step),
            StepStatus::Failed => println!("  {} {}", "FAILED".red().bold(), step),
        }
    }

    let summary = report.summary();
    match report.outcome() {
        Outcome::Applied => operator::success(&summary),
        Outcome::Partial(_) | Outcome::Skipped(_) => operator::problem(&summary),
    }
}

/// Start the client if the profile knows where it lives, otherwise tell the
/// operator what to open.
fn launch_client(config: &ToolConfig, identity: ClientIdentity) -> Result<()> {
    let launch_path = config.profile(identity).and_then(|p| p.launch_path.as_ref());

    match launch_path {
        Some(path) => {
            Command::new(path)
                .spawn()
                .with_context(|| format!("Failed to start {}", path.display()))?;
            tracing::info!(client = %identity, path = %path.display(), "update client started");
            operator::success(&format!("{} started - run CHECK to use the catalog.", identity));
        }
        None => {
            println!("Open {} from the Start menu and run CHECK to use the catalog.", identity);
        }
    }
    Ok(())
}

// ============================================
// SINGLE STEPS
// ============================================

fn run_hash(file: &Path) -> Result<()> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read the current directory")?
            .join(file)
    };
    let record = hashing::HashRecord::from_file(&path)?;
    println!("{}", record.to_registry_json()?);
    Ok(())
}

fn run_detect(config: &ToolConfig) -> Result<()> {
    match client::resolve_client(&HklmRegistry::new(), config) {
        Some(profile) => {
            println!("{}", profile.identity);
            println!("  settings: HKLM\\{}", profile.settings_key);
        }
        None => operator::problem("No supported update client installed (install Dell Command Update or Dell Update)."),
    }
    Ok(())
}

fn run_normalize(file: &Path) -> Result<()> {
    let stats = catalog_xml::normalize_catalog(file)?;
    operator::success(&format!(
        "{}: {} of {} components rewritten",
        file.display(),
        stats.rewritten,
        stats.components
    ));
    Ok(())
}

// ============================================
// ELEVATION
// ============================================

/// Is this process running with an elevated (administrator) token?
#[cfg(windows)]
fn is_elevated() -> bool {
    use winapi::shared::minwindef::LPVOID;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{GetCurrentProcess, OpenProcessToken};
    use winapi::um::securitybaseapi::GetTokenInformation;
    use winapi::um::winnt::{TokenElevation, HANDLE, TOKEN_ELEVATION, TOKEN_QUERY};

    unsafe {
        let mut token: HANDLE = std::ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut returned = 0u32;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut TOKEN_ELEVATION as LPVOID,
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        );
        CloseHandle(token);

        ok != 0 && elevation.TokenIsElevated != 0
    }
}

#[cfg(not(windows))]
fn is_elevated() -> bool {
    true
}

// ============================================
// TESTS
// ============================================
