//! Path helpers for the synthetic namespace.
//!
//! Paths are absolute, `/`-separated UTF-8 strings. The normalized form has a
//! leading `/`, no trailing `/` (except the root itself), and no empty or `.`
//! segments.

use crate::error::{ProcError, ProcResult};

/// Normalize a caller-supplied path, rejecting `..`.
pub fn normalize(path: &str) -> ProcResult<String> {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(ProcError::invalid_path(path)),
            s if s.contains('\0') => return Err(ProcError::invalid_path(path)),
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Normalize a path that came from a publisher; `..` pops a segment instead
/// of failing.
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Parent directory of a normalized path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a normalized path; `None` for the root.
pub fn file_name(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Join a normalized directory and a single name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// True if `ancestor` is `path` or one of its ancestors. Both normalized.
pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" || ancestor == path {
        return true;
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// The component directly below `ancestor` on the way to `descendant`.
///
/// Returns `None` unless `ancestor` is a strict ancestor of `descendant`.
pub fn next_component<'a>(ancestor: &str, descendant: &'a str) -> Option<&'a str> {
    if ancestor == descendant || !is_ancestor_or_self(ancestor, descendant) {
        return None;
    }
    let rest = if ancestor == "/" {
        &descendant[1..]
    } else {
        &descendant[ancestor.len() + 1..]
    };
    rest.split('/').next().filter(|s| !s.is_empty())
}

/// True if `name` can be used as a single path segment (file or key name).
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}
