// ============================================
// catalogsetup - build.rs
// ============================================
// Runs BEFORE the main program is compiled.
// Embeds a manifest that asks Windows to run the EXE as administrator
// (HKLM and Program Files writes need it).
// ============================================

const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v3">
    <security>
      <requestedPrivileges>
        <requestedExecutionLevel level="requireAdministrator" uiAccess="false"/>
      </requestedPrivileges>
    </security>
  </trustInfo>
</assembly>
"#;

fn main() {
    // Only runs on Windows targets (skipped on other platforms)
    #[cfg(target_os = "windows")]
    {
        let mut res = winres::WindowsResource::new();
        res.set_manifest(MANIFEST);
        if let Err(e) = res.compile() {
            eprintln!("Warning: Failed to embed Windows manifest: {}", e);
        }
    }

    #[cfg(not(target_os = "windows"))]
    let _ = MANIFEST;
}
