//! Logon bootstrap script run inside the sandbox.
//!
//! The script links the mapped shared runtime into its well-known location,
//! drops a desktop shortcut to the mapped copy of this application, and starts
//! that copy elevated in embedded mode.

/// Mode switch understood by the in-sandbox companion.
pub const EMBEDDED_MODE_ARGS: &str = "--mode=Spork --sporkMode=Embedded";

/// Desktop shortcut created by the bootstrap script.
pub const SHORTCUT_NAME: &str = "Launch TableCloth.lnk";

/// Inputs for [`render`]. All paths are guest paths.
#[derive(Debug, Clone)]
pub struct BootstrapScript<'a> {
    /// Guest directory holding the mapped installation.
    pub app_dir: &'a str,
    /// File name of the application executable.
    pub exe_name: &'a str,
    /// Folder alias of the mapped shared runtime, if one was mapped.
    pub runtime_alias: Option<&'a str>,
    pub target_uri: Option<&'a str>,
}

/// Command line placed in the profile's `<LogonCommand>`.
pub fn logon_command(script_guest_path: &str) -> String {
    format!(
        "powershell.exe -ExecutionPolicy Bypass -File {}",
        script_guest_path
    )
}

/// Arguments passed to the application inside the sandbox.
pub fn launch_arguments(target_uri: Option<&str>) -> String {
    match target_uri.map(str::trim).filter(|uri| !uri.is_empty()) {
        Some(uri) => format!("{} --targetUri={}", EMBEDDED_MODE_ARGS, uri),
        None => EMBEDDED_MODE_ARGS.to_string(),
    }
}

impl BootstrapScript<'_> {
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = Vec::new();

        if let Some(alias) = self.runtime_alias {
            let alias = escape_ps(alias);
            lines.extend([
                "$desktopPath = [Environment]::GetFolderPath(\"Desktop\")".to_string(),
                format!("$sourcePath = Join-Path $desktopPath \"{}\"", alias),
                "$programFilesPath = [Environment]::GetFolderPath(\"ProgramFiles\")".to_string(),
                format!("$targetPath = Join-Path $programFilesPath \"{}\"", alias),
                String::new(),
                "if (Test-Path $sourcePath) {".to_string(),
                "    if (-Not (Test-Path $targetPath)) {".to_string(),
                "        cmd.exe /c \"mklink /D `\"$targetPath`\" `\"$sourcePath`\"\"".to_string(),
                "    }".to_string(),
                "}".to_string(),
                String::new(),
            ]);
        }

        let app_dir = escape_ps(self.app_dir);
        let exe_path = format!("{}\\{}", app_dir, escape_ps(self.exe_name));
        let arguments = escape_ps(&launch_arguments(self.target_uri));

        lines.extend([
            "$desktopPath = [Environment]::GetFolderPath('Desktop')".to_string(),
            format!("$shortcutPath = Join-Path $desktopPath \"{}\"", SHORTCUT_NAME),
            format!("$targetPath = \"{}\"", exe_path),
            format!("$arguments = \"{}\"", arguments),
            format!("$workingDirectory = \"{}\"", app_dir),
            "$wshShell = New-Object -ComObject WScript.Shell".to_string(),
            String::new(),
            "$shortcut = $wshShell.CreateShortcut($shortcutPath)".to_string(),
            "$shortcut.TargetPath = $targetPath".to_string(),
            "$shortcut.Arguments = $arguments".to_string(),
            "$shortcut.WorkingDirectory = $workingDirectory".to_string(),
            "$shortcut.WindowStyle = 1".to_string(),
            "$shortcut.IconLocation = \"$targetPath,0\"".to_string(),
            "$shortcut.Save()".to_string(),
            String::new(),
            "Start-Process -FilePath $targetPath -ArgumentList $arguments -WorkingDirectory $workingDirectory -Verb RunAs".to_string(),
        ]);

        let mut script = lines.join("\r\n");
        script.push_str("\r\n");
        script
    }
}

/// Escape text for a double-quoted PowerShell string.
fn escape_ps(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '`' | '"' | '$') {
            escaped.push('`');
        }
        escaped.push(c);
    }
    escaped
}
