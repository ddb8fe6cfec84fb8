//! Slash-separated path handling for archive members
//!
//! Archive member names are always forward-slash separated and relative.
//! This module handles:
//! - Validating lookup paths (no leading `/`, no `.`/`..` segments)
//! - Canonical directory names (trailing `/` trimmed)
//! - Parent/basename/extension splitting without touching the host filesystem

/// Path of the synthetic root directory.
pub const ROOT: &str = ".";

/// Check that `name` is a clean relative path: slash separated, no empty,
/// `.` or `..` elements, no leading or trailing slash. `"."` alone names
/// the root.
pub fn is_valid_path(name: &str) -> bool {
    if name == ROOT {
        return true;
    }
    if name.is_empty() {
        return false;
    }
    name.split('/')
        .all(|elem| !elem.is_empty() && elem != "." && elem != "..")
}

/// Canonical name of a directory record: `a/b/` -> `a/b`
pub fn trim_dir_name(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT
    } else {
        trimmed
    }
}

/// Parent directory of a member path, `"."` for top-level members
/// `a/b/c.txt` -> `a/b`, `c.txt` -> `.`
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(idx) => &path[..idx],
    }
}

/// Last path element
/// `a/b/c.txt` -> `c.txt`
pub fn base_name(path: &str) -> &str {
    path.rfind('/')
        .map(|idx| &path[idx + 1..])
        .unwrap_or(path)
}

/// Lowercased extension without the dot, if any
pub fn extension(path: &str) -> Option<String> {
    let name = base_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(name[idx + 1..].to_lowercase()),
    }
}

/// Normalize an extension from configuration: `.JPG` -> `jpg`
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Convert Windows separators to forward slashes and strip leading `./` and `/`
/// `.\Data\armor.dds` -> `Data/armor.dds`
pub fn to_member_path(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    let mut rest = slashed.as_str();
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        } else {
            break;
        }
    }
    rest.to_string()
}
