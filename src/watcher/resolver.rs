//! Mapping of raw changed-file paths to script identifiers and include keys.
//!
//! All functions here are pure. They operate on the path as a string and a
//! root prefix length, mirroring how the session sees notify paths: an
//! absolute path that begins with the canonical watched root.

use std::collections::HashSet;
use std::path::{MAIN_SEPARATOR, Path};

use crate::scanner::IncludeMap;

/// Render a watched root as a string ending in exactly one separator.
///
/// The length of the returned string is the prefix length passed to
/// [`resolve_script_id`] and [`resolve_include_key`].
pub fn root_prefix(root: &Path) -> String {
    let mut prefix = root.to_string_lossy().into_owned();
    if !prefix.ends_with(MAIN_SEPARATOR) && !prefix.ends_with('/') {
        prefix.push(MAIN_SEPARATOR);
    }
    prefix
}

/// Strip the root prefix and everything from the first `.` onward.
fn strip_root_and_extension(raw_path: &str, root_prefix_len: usize) -> &str {
    let rest = raw_path.get(root_prefix_len..).unwrap_or("");
    match rest.find('.') {
        Some(dot) => &rest[..dot],
        None => rest,
    }
}

/// Resolve the identifier of a changed script file.
///
/// `/proj/scripts/MyCard.ttslua` with prefix `/proj/scripts/` yields `MyCard`.
/// Multi-dot names cut at the first dot: `Deck.v2.ttslua` yields `Deck`.
pub fn resolve_script_id(raw_path: &str, root_prefix_len: usize) -> String {
    strip_root_and_extension(raw_path, root_prefix_len).to_string()
}

/// Resolve the [`IncludeMap`] lookup key of a changed include file.
///
/// Path separators are normalized to `/`, so `sub\Util.ttslua` and
/// `sub/Util.ttslua` both yield `sub/Util`.
pub fn resolve_include_key(raw_path: &str, root_prefix_len: usize) -> String {
    strip_root_and_extension(raw_path, root_prefix_len)
        .chars()
        .map(|c| if c == '\\' || c == MAIN_SEPARATOR { '/' } else { c })
        .collect()
}

/// Identifiers that depend on `key`.
///
/// `None` means the include is not tracked at all and the event should be
/// ignored. This is distinct from `Some` of an empty set.
pub fn lookup_affected_ids<'a>(map: &'a IncludeMap, key: &str) -> Option<&'a HashSet<String>> {
    map.get(key)
}

/// Whether any component of a root-relative path is dot-prefixed.
pub fn is_hidden(relative: &str) -> bool {
    relative
        .split(['/', '\\', MAIN_SEPARATOR])
        .any(|component| component.starts_with('.'))
}
