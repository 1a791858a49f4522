//! Slash-path arithmetic for remote paths.
//!
//! Remote paths are protocol paths, not OS paths: always `/`-separated,
//! independent of the local platform. They are kept as plain strings and
//! never routed through `std::path`.

/// Lexically clean a slash path: collapse `//` and `.`, resolve `..`
/// without consulting the remote filesystem. The result never ends with a
/// slash unless it is the root itself.
pub fn clean(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Make `path` absolute and clean; the empty path maps to the root.
pub fn ensure_absolute(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    if path.starts_with('/') {
        clean(path)
    } else {
        clean(&format!("/{path}"))
    }
}

/// Join a relative path under an endpoint root. An empty relative path maps
/// to the root itself.
pub fn join_remote(root: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return root.to_string();
    }
    clean(&format!("{root}/{relative}"))
}

/// Compute the path of `full` relative to the enumeration root. Stripping
/// that yields an empty string (the root itself) falls back to the base
/// name so a single-file enumeration still produces a usable join key.
pub fn relative_path(root: &str, full: &str) -> String {
    if root.is_empty() {
        return full.trim_start_matches('/').to_string();
    }
    let trimmed = full
        .strip_prefix(root)
        .unwrap_or(full)
        .trim_start_matches('/');
    if trimmed.is_empty() && full == root {
        return base_name(full).to_string();
    }
    trimmed.to_string()
}

/// Everything up to the final path component; the parent of a top-level
/// entry is the root.
pub fn parent(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Final path component.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_collapses_dots_and_slashes() {
        assert_eq!(clean("/a//b/./c"), "/a/b/c");
        assert_eq!(clean("/a/b/../c"), "/a/c");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("a/./b"), "a/b");
        assert_eq!(clean(""), ".");
    }

    #[test]
    fn ensure_absolute_normalizes() {
        assert_eq!(ensure_absolute(""), "/");
        assert_eq!(ensure_absolute("data"), "/data");
        assert_eq!(ensure_absolute("/data/"), "/data");
        assert_eq!(ensure_absolute("/a//b/"), "/a/b");
    }

    #[test]
    fn join_remote_handles_root_and_leading_slashes() {
        assert_eq!(join_remote("/dst", "a.txt"), "/dst/a.txt");
        assert_eq!(join_remote("/dst", "/sub/b.txt"), "/dst/sub/b.txt");
        assert_eq!(join_remote("/dst", ""), "/dst");
        assert_eq!(join_remote("/", "a.txt"), "/a.txt");
    }

    #[test]
    fn relative_path_strips_root_prefix() {
        assert_eq!(relative_path("/data", "/data/sub/b.txt"), "sub/b.txt");
        assert_eq!(relative_path("/data", "/data/a.txt"), "a.txt");
        assert_eq!(relative_path("/", "/a.txt"), "a.txt");
        assert_eq!(relative_path("", "/a.txt"), "a.txt");
    }

    #[test]
    fn relative_path_of_root_itself_is_base_name() {
        assert_eq!(relative_path("/data/file.txt", "/data/file.txt"), "file.txt");
    }

    #[test]
    fn parent_of_top_level_is_root() {
        assert_eq!(parent("/a.txt"), "/");
        assert_eq!(parent("/sub/b.txt"), "/sub");
        assert_eq!(parent("/a/b/c"), "/a/b");
    }

    #[test]
    fn base_name_takes_final_component() {
        assert_eq!(base_name("/data/file.txt"), "file.txt");
        assert_eq!(base_name("/data/"), "data");
        assert_eq!(base_name("file"), "file");
    }
}
