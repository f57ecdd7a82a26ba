/*!
 * Path normalization and source-to-destination mapping
 *
 * Convoy speaks the copier's native path grammar: Windows drive paths and
 * UNC shares, backslash-separated, compared case-insensitively with case
 * preserved. Paths are handled as plain strings so the mapping stays a pure
 * function regardless of the host the orchestrator runs on.
 */

use crate::error::{ConvoyError, Result};

pub const SEP: char = '\\';

/// Normalize a path to canonical form: forward slashes become backslashes,
/// trailing separators are trimmed (a bare drive root keeps its single
/// backslash), case is preserved.
pub fn normalize(path: &str) -> String {
    let mut normalized: String = path.trim().replace('/', "\\");

    while normalized.len() > 1 && normalized.ends_with(SEP) {
        // Keep the UNC prefix "\\" intact
        if normalized.len() == 2 && normalized == "\\\\" {
            break;
        }
        normalized.pop();
    }

    // "C:" and "C:\" both mean the drive root; canonical form keeps the slash
    if is_drive_designator(&normalized) {
        normalized.push(SEP);
    }

    normalized
}

fn is_drive_designator(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Case-insensitive equality on normalized forms
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    normalize(a).to_lowercase() == normalize(b).to_lowercase()
}

/// Check whether `path` lives at or under `root` (case-insensitive)
pub fn starts_with_root(path: &str, root: &str) -> bool {
    let path = normalize(path).to_lowercase();
    let root = normalize(root).to_lowercase();

    if !path.starts_with(&root) {
        return false;
    }
    if path.len() == root.len() || root.ends_with(SEP) {
        return true;
    }
    // The match must end on a component boundary: "C:\data2" is not under "C:\data"
    path.as_bytes()[root.len()] == SEP as u8
}

/// Map a source path into the destination tree.
///
/// Strips the normalized `src_root` prefix from `src` and appends the
/// remainder to `dst_root`. Root matching is case-insensitive; the remainder
/// keeps its original case.
pub fn map_to_destination(src: &str, src_root: &str, dst_root: &str) -> Result<String> {
    let n_src = normalize(src);
    let n_root = normalize(src_root);
    let n_dst = normalize(dst_root);

    if !starts_with_root(&n_src, &n_root) {
        return Err(ConvoyError::PathMismatch {
            path: n_src,
            root: n_root,
        });
    }

    let remainder = n_src[n_root.len()..].trim_start_matches(SEP);
    if remainder.is_empty() {
        return Ok(n_dst);
    }

    Ok(join(&n_dst, remainder))
}

/// Join a normalized base with a relative remainder
pub fn join(base: &str, rest: &str) -> String {
    let rest = rest.trim_start_matches(SEP);
    if rest.is_empty() {
        return base.to_string();
    }
    if base.ends_with(SEP) {
        format!("{}{}", base, rest)
    } else {
        format!("{}{}{}", base, SEP, rest)
    }
}

/// Parent directory of a normalized path, or None at a root
pub fn parent(path: &str) -> Option<String> {
    let normalized = normalize(path);
    if is_root(&normalized) {
        return None;
    }
    let idx = normalized.rfind(SEP)?;
    let parent = &normalized[..idx];
    // Splitting "C:\file" yields the drive designator; re-normalize to "C:\"
    Some(normalize(parent))
}

/// Final component of a normalized path
pub fn file_name(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind(SEP) {
        Some(idx) => normalized[idx + 1..].to_string(),
        None => normalized,
    }
}

/// True for drive roots ("C:\") and share roots ("\\server\share")
pub fn is_root(path: &str) -> bool {
    let normalized = normalize(path);
    if normalized.len() == 3 && is_drive_designator(&normalized[..2]) {
        return true;
    }
    if let Some((_server, share)) = unc_parts(&normalized) {
        return !share.contains(SEP);
    }
    false
}

/// True for UNC paths ("\\server\share\...")
pub fn is_unc(path: &str) -> bool {
    path.starts_with("\\\\")
}

/// True for drive-anchored ("C:\...") and UNC paths
pub fn is_absolute(path: &str) -> bool {
    let normalized = normalize(path);
    is_unc(&normalized)
        || (normalized.len() >= 2 && is_drive_designator(&normalized[..2]))
}

/// Split a UNC path into (server, share-and-below)
pub fn unc_parts(path: &str) -> Option<(String, String)> {
    let normalized = normalize(path);
    let body = normalized.strip_prefix("\\\\")?;
    let idx = body.find(SEP)?;
    let server = &body[..idx];
    let rest = &body[idx + 1..];
    if server.is_empty() || rest.is_empty() {
        return None;
    }
    Some((server.to_string(), rest.to_string()))
}

/// The volume that hosts `path`: the drive root for local paths, the share
/// root for UNC paths. Used to decide what a snapshot must cover.
pub fn volume_root(path: &str) -> Result<String> {
    let normalized = normalize(path);
    if normalized.len() >= 2 && is_drive_designator(&normalized[..2]) {
        return Ok(format!("{}{}", &normalized[..2], SEP));
    }
    if let Some((server, rest)) = unc_parts(&normalized) {
        let share = match rest.find(SEP) {
            Some(idx) => &rest[..idx],
            None => rest.as_str(),
        };
        return Ok(format!("\\\\{}\\{}", server, share));
    }
    Err(ConvoyError::Config(format!(
        "cannot derive volume root from {}",
        normalized
    )))
}
