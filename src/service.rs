// ============================================
// catalogsetup - service.rs
// ============================================
// Touches the update service itself (not its registry keys):
//   - stops the background shell so it re-reads the configuration
//   - clears its temp folder so no cached catalog survives
//   - installs the inventory collector into the service folder
// ============================================

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Process control for the update service.
pub trait ServiceHost {
    /// Force-stop every process with this image name.
    /// Ok(false) when nothing was running.
    fn stop_process(&self, image_name: &str) -> Result<bool>;
}

/// taskkill.exe based host
#[derive(Debug, Default)]
pub struct WindowsServiceHost;

impl ServiceHost for WindowsServiceHost {
    fn stop_process(&self, image_name: &str) -> Result<bool> {
        let mut command = Command::new("taskkill");
        command.args(["/f", "/im", image_name]);

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let output = command.output().context("Failed to run taskkill")?;

        // taskkill exits 128 when no such process is running
        if output.status.success() {
            tracing::info!(process = image_name, "service process stopped");
            Ok(true)
        } else {
            tracing::debug!(
                process = image_name,
                status = %output.status,
                "service process was not running"
            );
            Ok(false)
        }
    }
}

/// Delete a directory tree. Ok(false) when it didn't exist.
pub fn remove_dir_if_present(dir: &Path) -> Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            tracing::info!(dir = %dir.display(), "service temp directory removed");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", dir.display())),
    }
}

/// Copy the inventory collector into place, replacing any existing copy.
/// Returns the number of bytes copied.
pub fn install_collector(source: &Path, target: &Path) -> Result<u64> {
    if !source.is_file() {
        anyhow::bail!("Inventory collector {} does not exist", source.display());
    }
    if let Some(parent) = target.parent() {
        if !parent.exists() {
            anyhow::bail!(
                "Service folder {} does not exist - is the update service installed?",
                parent.display()
            );
        }
    }

    let bytes = fs::copy(source, target).with_context(|| {
        format!("Failed to copy {} to {}", source.display(), target.display())
    })?;
    tracing::info!(source = %source.display(), target = %target.display(), bytes, "collector installed");
    Ok(bytes)
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
pub use recording::RecordingHost;

#[cfg(test)]
mod recording {
    use super::ServiceHost;
    use anyhow::Result;
    use std::cell::RefCell;

    /// Remembers which processes it was asked to stop
    #[derive(Debug, Default)]
    pub struct RecordingHost {
        pub stopped: RefCell<Vec<String>>,
    }

    impl ServiceHost for RecordingHost {
        fn stop_process(&self, image_name: &str) -> Result<bool> {
            self.stopped.borrow_mut().push(image_name.to_string());
            Ok(true)
        }
    }
}
