//! Slash-delimited paths into the document tree.
//!
//! The empty path addresses the root. Leading, trailing and repeated
//! slashes carry no meaning; normalization is idempotent.

/// Strip leading and trailing slashes. The root normalizes to `""`.
pub fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Split a path into its non-empty segments.
pub fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// Join a base path and a child key, skipping empty components.
pub fn join(base: &str, key: &str) -> String {
    let base = normalize(base);
    let key = normalize(key);
    match (base.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{key}"),
    }
}

/// Render a path for logs, always with a leading slash.
pub fn display(path: &str) -> String {
    let normalized = normalize(path);
    if normalized.is_empty() {
        "/".to_string()
    } else {
        format!("/{normalized}")
    }
}
