use std::fmt::Write as _;

use super::mapping::FolderMapping;
use crate::config::LaunchSettings;

/// Memory assigned to every sandbox session.
pub const MEMORY_IN_MB: u32 = 2048;

/// Two-state profile switch, rendered as `Enable` / `Disable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Enable,
    Disable,
}

impl Toggle {
    pub fn from_bool(on: bool) -> Self {
        if on { Toggle::Enable } else { Toggle::Disable }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Toggle::Enable => "Enable",
            Toggle::Disable => "Disable",
        }
    }
}

/// Declarative description of one disposable sandbox session.
///
/// Built fresh for every launch; only its serialized form ever reaches disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationProfile {
    pub gpu: Toggle,
    pub networking: Toggle,
    pub audio_input: Toggle,
    pub video_input: Toggle,
    pub protected_client: Toggle,
    pub printer_redirection: Toggle,
    pub clipboard_redirection: Toggle,
    pub memory_mb: u32,
    pub logon_command: String,
    /// In dependency order: install dir, data dir, runtime, credential store, user folders.
    pub mapped_folders: Vec<FolderMapping>,
}

impl IsolationProfile {
    /// Device toggles come from the user's settings; GPU is always off,
    /// networking and clipboard are always on.
    pub fn new(
        settings: &LaunchSettings,
        mapped_folders: Vec<FolderMapping>,
        logon_command: String,
    ) -> Self {
        Self {
            gpu: Toggle::Disable,
            networking: Toggle::Enable,
            audio_input: Toggle::from_bool(settings.use_microphone),
            video_input: Toggle::from_bool(settings.use_web_camera),
            protected_client: Toggle::Disable,
            printer_redirection: Toggle::from_bool(settings.share_printers),
            clipboard_redirection: Toggle::Enable,
            memory_mb: MEMORY_IN_MB,
            logon_command,
            mapped_folders,
        }
    }

    /// Render the `.wsb` document (no XML declaration, two-space indent).
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<Configuration>\n");

        for (name, toggle) in [
            ("vGPU", self.gpu),
            ("Networking", self.networking),
            ("AudioInput", self.audio_input),
            ("VideoInput", self.video_input),
            ("ProtectedClient", self.protected_client),
            ("PrinterRedirection", self.printer_redirection),
            ("ClipboardRedirection", self.clipboard_redirection),
        ] {
            element(&mut xml, 1, name, toggle.as_str());
        }
        element(&mut xml, 1, "MemoryInMB", &self.memory_mb.to_string());

        xml.push_str("  <LogonCommand>\n");
        element(&mut xml, 2, "Command", &self.logon_command);
        xml.push_str("  </LogonCommand>\n");

        if self.mapped_folders.is_empty() {
            xml.push_str("  <MappedFolders />\n");
        } else {
            xml.push_str("  <MappedFolders>\n");
            for mapping in &self.mapped_folders {
                xml.push_str("    <MappedFolder>\n");
                element(
                    &mut xml,
                    3,
                    "HostFolder",
                    &mapping.host_path.to_string_lossy(),
                );
                if mapping.explicit_guest {
                    element(&mut xml, 3, "SandboxFolder", &mapping.guest_path);
                }
                if let Some(read_only) = mapping.read_only {
                    element(&mut xml, 3, "ReadOnly", if read_only { "true" } else { "false" });
                }
                xml.push_str("    </MappedFolder>\n");
            }
            xml.push_str("  </MappedFolders>\n");
        }

        xml.push_str("</Configuration>");
        xml
    }
}

fn element(out: &mut String, depth: usize, name: &str, value: &str) {
    let _ = writeln!(
        out,
        "{}<{name}>{}</{name}>",
        "  ".repeat(depth),
        escape_xml(value)
    );
}

/// Escape text content for XML.
pub fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
