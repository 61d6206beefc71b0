//! Host → guest folder mappings.
//!
//! Guest paths are Windows paths inside the sandbox regardless of the platform
//! this crate runs on, so they are handled as strings rather than `Path`s.

use std::path::{Path, PathBuf};

/// Desktop of the fixed account every sandbox session logs on with.
pub const SANDBOX_DESKTOP: &str = r"C:\Users\WDAGUtilityAccount\Desktop";

/// One `<MappedFolder>` entry of the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMapping {
    pub host_path: PathBuf,
    /// Path inside the sandbox; the dedup key of a [`MountSet`].
    pub guest_path: String,
    /// Whether `guest_path` was given by the caller rather than derived.
    pub explicit_guest: bool,
    pub read_only: Option<bool>,
}

impl FolderMapping {
    /// Map `host_path` into the sandbox.
    ///
    /// Returns `None` when the host directory does not exist; callers decide
    /// whether that deserves a warning.
    pub fn new(host_path: &Path, guest_path: Option<&str>, read_only: Option<bool>) -> Option<Self> {
        if !host_path.is_dir() {
            return None;
        }

        let explicit = guest_path.map(str::trim).filter(|g| !g.is_empty());
        let guest_path = match explicit {
            Some(guest) => guest.to_string(),
            None => default_guest_path(host_path),
        };

        Some(Self {
            host_path: host_path.to_path_buf(),
            guest_path,
            explicit_guest: explicit.is_some(),
            read_only,
        })
    }
}

/// Final path segment of `host_path`, ignoring trailing separators.
///
/// Both `\` and `/` count as separators so Windows host paths split the same
/// way on every platform.
pub fn folder_alias(host_path: &str) -> &str {
    let trimmed = host_path.trim_end_matches(['\\', '/']);
    trimmed
        .rsplit(['\\', '/'])
        .next()
        .filter(|alias| !alias.is_empty())
        .unwrap_or(trimmed)
}

/// `<sandbox desktop>\<alias>` for a host folder.
pub fn default_guest_path(host_path: &Path) -> String {
    let host = host_path.to_string_lossy();
    format!("{}\\{}", SANDBOX_DESKTOP, folder_alias(&host))
}

/// Ordered set of mappings keyed by guest path.
///
/// Inserting a mapping whose guest path is already present replaces the
/// earlier entry in place (last write wins). Keys compare ASCII
/// case-insensitively, like Windows paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountSet {
    entries: Vec<FolderMapping>,
}

impl MountSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mapping, returning the one it replaced.
    pub fn insert(&mut self, mapping: FolderMapping) -> Option<FolderMapping> {
        match self.position(&mapping.guest_path) {
            Some(index) => Some(std::mem::replace(&mut self.entries[index], mapping)),
            None => {
                self.entries.push(mapping);
                None
            }
        }
    }

    pub fn get(&self, guest_path: &str) -> Option<&FolderMapping> {
        self.position(guest_path).map(|index| &self.entries[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FolderMapping> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<FolderMapping> {
        self.entries
    }

    fn position(&self, guest_path: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|m| m.guest_path.eq_ignore_ascii_case(guest_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_strips_trailing_separators() {
        assert_eq!(folder_alias(r"C:\Program Files\dotnet\"), "dotnet");
        assert_eq!(folder_alias(r"C:\Users\me\Documents"), "Documents");
        assert_eq!(folder_alias("/home/me/projects//"), "projects");
        assert_eq!(folder_alias("plain"), "plain");
    }

    #[test]
    fn default_guest_path_uses_desktop_root() {
        let guest = default_guest_path(Path::new(r"C:\Work\Invoices\"));
        assert_eq!(guest, r"C:\Users\WDAGUtilityAccount\Desktop\Invoices");
    }

    #[test]
    fn missing_host_folder_is_not_mapped() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("absent");
        assert!(FolderMapping::new(&missing, None, None).is_none());
    }

    #[test]
    fn explicit_guest_path_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let mapping = FolderMapping::new(tmp.path(), Some(r"C:\Data"), Some(true)).unwrap();
        assert_eq!(mapping.guest_path, r"C:\Data");
        assert!(mapping.explicit_guest);
        assert_eq!(mapping.read_only, Some(true));

        let blank = FolderMapping::new(tmp.path(), Some("  "), None).unwrap();
        assert!(!blank.explicit_guest);
        assert!(blank.guest_path.starts_with(SANDBOX_DESKTOP));
    }

    #[test]
    fn colliding_guest_paths_keep_last_mapping() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("a").join("shared");
        let second = tmp.path().join("b").join("shared");
        let other = tmp.path().join("c").join("other");
        for dir in [&first, &second, &other] {
            std::fs::create_dir_all(dir).unwrap();
        }

        let mut set = MountSet::new();
        set.insert(FolderMapping::new(&first, None, None).unwrap());
        set.insert(FolderMapping::new(&other, None, None).unwrap());
        let replaced = set.insert(FolderMapping::new(&second, None, None).unwrap());

        assert_eq!(replaced.unwrap().host_path, first);
        assert_eq!(set.len(), 2);

        let entries = set.into_vec();
        assert_eq!(entries[0].host_path, second);
        assert_eq!(entries[1].host_path, other);
    }

    #[test]
    fn guest_keys_compare_case_insensitively() {
        let tmp = tempfile::tempdir().unwrap();
        let upper = tmp.path().join("x").join("Shared");
        let lower = tmp.path().join("y").join("shared");
        std::fs::create_dir_all(&upper).unwrap();
        std::fs::create_dir_all(&lower).unwrap();

        let mut set = MountSet::new();
        set.insert(FolderMapping::new(&upper, None, None).unwrap());
        set.insert(FolderMapping::new(&lower, None, None).unwrap());

        assert_eq!(set.len(), 1);
        let key = format!("{}\\SHARED", SANDBOX_DESKTOP);
        assert_eq!(set.get(&key).unwrap().host_path, lower);
    }
}
