//! Dependency scanning for scripts and their `#include` files.
//!
//! The watch session only needs two things from a scanner: rescan one
//! identifier, and report which identifiers depend on each include file.
//! [`IncludeScanner`] is the filesystem implementation used by the CLI.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use parking_lot::RwLock;
use regex::Regex;
use walkdir::WalkDir;

use crate::watcher::resolver::{is_hidden, resolve_include_key, resolve_script_id, root_prefix};

/// Include key -> identifiers whose scripts (transitively) include it.
///
/// Keys are forward-slash relative paths without extension.
pub type IncludeMap = HashMap<String, HashSet<String>>;

/// Failure reported by a scanner. Its cause is scanner-specific.
pub type ScanError = Box<dyn std::error::Error + Send + Sync>;

/// Collaborator that maintains the include dependency graph.
pub trait DependencyScanner: Send + Sync {
    /// Re-derive the includes of one identifier.
    ///
    /// Updates the map returned by later [`DependencyScanner::include_map`]
    /// calls.
    fn scan(&self, identifier: &str) -> Result<(), ScanError>;

    /// Snapshot of the current include map.
    fn include_map(&self) -> IncludeMap;
}

/// Matches `#include name`, `#include <name>` and `#include "name"`.
static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*#include\s+[<"]?([^<>"\s]+)[>"]?"#).expect("valid include regex")
});

/// Scanner that reads script and include files from disk.
#[derive(Debug)]
pub struct IncludeScanner {
    script_root: PathBuf,
    include_root: PathBuf,
    /// File extension of scripts and includes, without the dot.
    extension: String,
    map: RwLock<IncludeMap>,
}

impl IncludeScanner {
    /// Create a scanner with an empty include map.
    pub fn new(
        script_root: impl Into<PathBuf>,
        include_root: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            script_root: script_root.into(),
            include_root: include_root.into(),
            extension: extension.into(),
            map: RwLock::new(IncludeMap::new()),
        }
    }

    /// Scan every script under the script root.
    ///
    /// Scripts that fail to scan are logged and skipped. Returns the number
    /// scanned successfully.
    pub fn scan_all(&self) -> usize {
        let prefix = root_prefix(&self.script_root);
        let mut scanned = 0;

        for entry in WalkDir::new(&self.script_root)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let Some(raw) = path.to_str() else {
                continue;
            };
            if is_hidden(raw.get(prefix.len()..).unwrap_or_default()) {
                continue;
            }

            let id = resolve_script_id(raw, prefix.len());
            match self.scan(&id) {
                Ok(()) => scanned += 1,
                Err(e) => tracing::warn!("[scanner] skipping '{id}': {e}"),
            }
        }

        crate::log_event!(
            "scanner",
            "scanned",
            "{scanned} scripts, {} includes",
            self.map.read().len()
        );
        scanned
    }

    fn script_path(&self, identifier: &str) -> PathBuf {
        self.script_root
            .join(format!("{identifier}.{}", self.extension))
    }

    fn include_path(&self, key: &str) -> PathBuf {
        self.include_root.join(format!("{key}.{}", self.extension))
    }

    /// Include keys referenced directly by `source`.
    fn direct_includes(&self, source: &str) -> Vec<String> {
        INCLUDE_RE
            .captures_iter(source)
            .filter_map(|caps| caps.get(1))
            // Same key rules as a changed include path, so `lib/Zone.ttslua`
            // and `lib\Zone` both map to `lib/Zone`
            .map(|m| resolve_include_key(m.as_str(), 0))
            .filter(|key| !key.is_empty())
            .collect()
    }

    /// Every include key reachable from `source`, following nested includes.
    fn transitive_includes(&self, source: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = self.direct_includes(source);

        while let Some(key) = stack.pop() {
            if !seen.insert(key.clone()) {
                continue;
            }

            let path = self.include_path(&key);
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    stack.extend(
                        self.direct_includes(&content)
                            .into_iter()
                            .filter(|k| !seen.contains(k)),
                    );
                }
                Err(e) => {
                    tracing::warn!("[scanner] include '{key}' unreadable at {}: {e}", path.display());
                }
            }
        }

        seen
    }

    /// Root directory of scripts.
    pub fn script_root(&self) -> &Path {
        &self.script_root
    }

    /// Root directory of include files.
    pub fn include_root(&self) -> &Path {
        &self.include_root
    }
}

impl DependencyScanner for IncludeScanner {
    fn scan(&self, identifier: &str) -> Result<(), ScanError> {
        let path = self.script_path(identifier);
        let source = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let includes = self.transitive_includes(&source);

        let mut map = self.map.write();
        map.retain(|_, ids| {
            ids.remove(identifier);
            !ids.is_empty()
        });
        for key in &includes {
            map.entry(key.clone())
                .or_default()
                .insert(identifier.to_string());
        }

        crate::debug_event!("scanner", "scanned", "{identifier}: {} includes", includes.len());
        Ok(())
    }

    fn include_map(&self) -> IncludeMap {
        self.map.read().clone()
    }
}
