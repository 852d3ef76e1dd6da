//! Extension table routing and extension binary discovery.
//!
//! The query engine only knows the tables an extension adds once the
//! extension process has registered them. Queries are routed to the
//! extension path by a keyword scan for `FROM <table>` / `JOIN <table>`
//! against a fixed table set; this is deliberately not a SQL parser.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use uuid::Uuid;

/// Tables provided by the side-loaded extension.
pub const DEFAULT_EXTENSION_TABLES: &[&str] = &[
    "mdm",
    "macos_profiles",
    "munki_info",
    "munki_installs",
    "file_lines",
    "filevault_users",
    "google_chrome_profiles",
    "alt_system_info",
    "unified_log",
    "pending_apple_updates",
    "macadmins_unified_log",
    "network_quality",
    "wifi_network",
    "energy_impact",
    "authdb",
    "sofa_security_release_info",
    "sofa_unpatched_cves",
    "crowdstrike_falcon",
    "puppet_info",
    "puppet_logs",
    "puppet_state",
    "puppet_facts",
];

/// Extension binary file name.
pub const EXTENSION_FILENAME: &str = "hostfacts.ext";

/// Install location trusted only when root-owned and not group/world writable.
pub const INSTALLED_EXTENSION_PATH: &str = "/usr/local/hostfacts/hostfacts.ext";

static TABLE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});

/// Table names that require the extension to be loaded.
#[derive(Debug, Clone)]
pub struct ExtensionTableSet {
    tables: HashSet<String>,
}

impl Default for ExtensionTableSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION_TABLES.iter().copied())
    }
}

impl ExtensionTableSet {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|t| t.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(&table.to_ascii_lowercase())
    }

    /// Extension tables referenced by `query`, in order of first appearance.
    pub fn referenced_tables(&self, query: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for caps in TABLE_REF.captures_iter(query) {
            if let Some(name) = caps.get(1) {
                let name = name.as_str().to_ascii_lowercase();
                if self.tables.contains(&name) && !seen.contains(&name) {
                    seen.push(name);
                }
            }
        }
        seen
    }

    pub fn requires_extension(&self, query: &str) -> bool {
        !self.referenced_tables(query).is_empty()
    }
}

/// A place the extension binary may live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// Require root ownership and no group/world write bit.
    pub require_trusted_owner: bool,
}

impl Candidate {
    fn plain(path: PathBuf) -> Self {
        Self {
            path,
            require_trusted_owner: false,
        }
    }
}

/// Finds the extension binary.
///
/// Order: explicit path, trusted install path, bundled development path,
/// next to the running executable, then source-tree build outputs. The
/// first existing file wins.
#[derive(Debug, Clone, Default)]
pub struct ExtensionLocator {
    explicit: Option<PathBuf>,
    installed: Option<PathBuf>,
    bundled: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
    source_roots: Vec<PathBuf>,
}

impl ExtensionLocator {
    /// Locator for the running process.
    pub fn for_current_process(explicit: Option<PathBuf>) -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        let source_roots = std::env::current_dir()
            .map(|cwd| {
                let mut roots = vec![cwd.clone()];
                if let Some(parent) = cwd.parent() {
                    roots.push(parent.to_path_buf());
                }
                roots
            })
            .unwrap_or_default();

        Self {
            explicit,
            installed: Some(PathBuf::from(INSTALLED_EXTENSION_PATH)),
            bundled: dirs::data_local_dir().map(|d| d.join("hostfacts").join(EXTENSION_FILENAME)),
            exe_dir,
            source_roots,
        }
    }

    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    pub fn with_installed(mut self, path: impl Into<PathBuf>) -> Self {
        self.installed = Some(path.into());
        self
    }

    pub fn with_bundled(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundled = Some(path.into());
        self
    }

    pub fn with_exe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exe_dir = Some(dir.into());
        self
    }

    pub fn with_source_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_roots.push(dir.into());
        self
    }

    /// All candidate locations in priority order.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut out = Vec::new();
        if let Some(path) = &self.explicit {
            out.push(Candidate::plain(path.clone()));
        }
        if let Some(path) = &self.installed {
            out.push(Candidate {
                path: path.clone(),
                require_trusted_owner: true,
            });
        }
        if let Some(path) = &self.bundled {
            out.push(Candidate::plain(path.clone()));
        }
        if let Some(dir) = &self.exe_dir {
            out.push(Candidate::plain(dir.join(EXTENSION_FILENAME)));
            out.push(Candidate::plain(
                dir.join("..").join("libexec").join(EXTENSION_FILENAME),
            ));
        }
        for root in &self.source_roots {
            out.push(Candidate::plain(
                root.join("extension").join("build").join(EXTENSION_FILENAME),
            ));
        }
        out
    }

    /// First existing candidate, if any.
    pub fn resolve(&self) -> Option<PathBuf> {
        for candidate in self.candidates() {
            if !candidate.path.is_file() {
                trace!(path = %candidate.path.display(), "extension candidate missing");
                continue;
            }
            if candidate.require_trusted_owner && !has_trusted_owner(&candidate.path) {
                debug!(
                    path = %candidate.path.display(),
                    "skipping extension with untrusted ownership"
                );
                continue;
            }
            debug!(path = %candidate.path.display(), "resolved extension binary");
            return Some(candidate.path);
        }
        None
    }
}

#[cfg(unix)]
fn has_trusted_owner(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.uid() == 0 && meta.mode() & 0o022 == 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn has_trusted_owner(_path: &Path) -> bool {
    false
}

/// Unique `--extensions_socket` path, removed when dropped.
#[derive(Debug)]
pub struct ExtensionSocket {
    path: PathBuf,
}

impl ExtensionSocket {
    pub fn new() -> Self {
        let token = Uuid::new_v4().simple().to_string();
        let path = std::env::temp_dir().join(format!(
            "hf-ext-{}-{}.em",
            std::process::id(),
            &token[..12]
        ));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ExtensionSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExtensionSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referenced_tables() {
        let set = ExtensionTableSet::default();
        assert_eq!(
            set.referenced_tables("SELECT * FROM mdm;"),
            vec!["mdm".to_string()]
        );
        assert_eq!(
            set.referenced_tables(
                "select p.identifier from macos_profiles p join MDM m on 1=1 join mdm"
            ),
            vec!["macos_profiles".to_string(), "mdm".to_string()]
        );
    }

    #[test]
    fn test_plain_tables_do_not_require_extension() {
        let set = ExtensionTableSet::default();
        assert!(!set.requires_extension("SELECT enabled FROM gatekeeper;"));
        assert!(!set.requires_extension("SELECT * FROM system_info"));
        // substring of an extension table is not a match
        assert!(!set.requires_extension("SELECT * FROM mdm_history"));
        // keyword must precede the name
        assert!(!set.requires_extension("SELECT mdm FROM users"));
    }

    #[test]
    fn test_custom_set() {
        let set = ExtensionTableSet::new(["Custom_Table"]);
        assert!(set.contains("custom_table"));
        assert!(set.requires_extension("select 1 from CUSTOM_TABLE"));
    }

    #[test]
    fn test_locator_explicit_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.ext");
        let bundled = dir.path().join("bundled.ext");
        std::fs::write(&explicit, b"").unwrap();
        std::fs::write(&bundled, b"").unwrap();

        let locator = ExtensionLocator::default()
            .with_bundled(&bundled)
            .with_explicit(&explicit);
        assert_eq!(locator.resolve(), Some(explicit));
    }

    #[test]
    fn test_locator_falls_through_missing_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let exe_dir = dir.path().join("bin");
        std::fs::create_dir_all(&exe_dir).unwrap();
        std::fs::write(exe_dir.join(EXTENSION_FILENAME), b"").unwrap();

        let locator = ExtensionLocator::default()
            .with_explicit(dir.path().join("missing.ext"))
            .with_bundled(dir.path().join("also-missing.ext"))
            .with_exe_dir(&exe_dir);
        assert_eq!(locator.resolve(), Some(exe_dir.join(EXTENSION_FILENAME)));
    }

    #[test]
    fn test_locator_source_tree_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("extension").join("build");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join(EXTENSION_FILENAME), b"").unwrap();

        let locator = ExtensionLocator::default().with_source_root(dir.path());
        assert_eq!(locator.resolve(), Some(build.join(EXTENSION_FILENAME)));
    }

    #[test]
    fn test_locator_none_when_nothing_exists() {
        let locator = ExtensionLocator::default().with_explicit("/nonexistent/hostfacts.ext");
        assert_eq!(locator.resolve(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_world_writable_install_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let installed = dir.path().join("installed.ext");
        std::fs::write(&installed, b"").unwrap();
        std::fs::set_permissions(&installed, std::fs::Permissions::from_mode(0o666)).unwrap();

        let locator = ExtensionLocator::default().with_installed(&installed);
        assert_eq!(locator.resolve(), None);
    }

    #[test]
    fn test_socket_paths_are_unique() {
        let a = ExtensionSocket::new();
        let b = ExtensionSocket::new();
        assert_ne!(a.path(), b.path());
        let name = a.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("hf-ext-{}-", std::process::id())));
        assert!(name.ends_with(".em"));
    }
}
