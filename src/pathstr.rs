//! Path string decomposition
//!
//! Splits path strings into their parts without touching the file system:
//! the path (everything through the final separator), the name (the last
//! segment up to its final dot), and the extension (what follows that
//! dot). A leading-dot file like `.profile` is all name and no
//! extension, and `.`/`..` are names in their own right.
//!
//! A trailing separator means the whole string is path and there is no
//! name or extension.

use std::ops::Range;

use crate::error::set_last_kernel_error;
use crate::{ErrorKind, Result};

/// The path separator recognized on this host.
pub const SEPARATOR: char = '/';

/// Longest composed path accepted by [`combine`].
pub const MAX_PATH_LEN: usize = 4096;

/// The parts a path string decomposes into.
///
/// `Volume` and `Node` exist for callers that deal in host-portable
/// part lists; on this host paths have no volume and no node, so those
/// parts are never present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPart {
    FullPath,
    Volume,
    Path,
    Name,
    NameExt,
    Extension,
    Node,
}

/// Find the byte range of the requested part within `src`, or `None`
/// when the part is not present.
pub fn find_part(src: &str, part: PathPart) -> Option<Range<usize>> {
    let len = src.len();
    if len == 0 {
        return None;
    }

    if part == PathPart::FullPath {
        return Some(0..len);
    }

    // No volumes or machine nodes on this host
    if part == PathPart::Volume || part == PathPart::Node {
        return None;
    }

    // Root-relative special cases, handled up front so the general walk
    // below never sees them
    match src {
        "/" => {
            return match part {
                PathPart::Path => Some(0..1),
                _ => None,
            };
        }
        "/." => {
            return match part {
                PathPart::Path => Some(0..1),
                PathPart::Name | PathPart::NameExt => Some(1..2),
                _ => None,
            };
        }
        "/.." => {
            return match part {
                PathPart::Path => Some(0..1),
                PathPart::Name | PathPart::NameExt => Some(1..3),
                _ => None,
            };
        }
        "." => {
            return match part {
                PathPart::Name | PathPart::NameExt => Some(0..1),
                _ => None,
            };
        }
        ".." => {
            return match part {
                PathPart::Name | PathPart::NameExt => Some(0..2),
                _ => None,
            };
        }
        _ => {}
    }

    let last_sep = src.rfind(SEPARATOR);

    if part == PathPart::Path {
        return last_sep.map(|index| 0..index + 1);
    }

    // The name (and extension) live after the last separator. A trailing
    // separator leaves nothing behind it.
    let name_start = last_sep.map_or(0, |index| index + 1);
    if name_start >= len {
        return None;
    }

    let segment = &src[name_start..];

    // Dot directories carry no extension
    if segment == "." || segment == ".." {
        return match part {
            PathPart::Name | PathPart::NameExt => Some(name_start..len),
            _ => None,
        };
    }

    if part == PathPart::NameExt {
        return Some(name_start..len);
    }

    // A dot at segment start marks a dot file, which is all name
    let last_dot = match segment.rfind('.') {
        Some(0) | None => None,
        Some(index) => Some(name_start + index),
    };

    match part {
        PathPart::Name => Some(name_start..last_dot.unwrap_or(len)),
        PathPart::Extension => match last_dot {
            Some(dot) if dot + 1 < len => Some(dot + 1..len),
            _ => None,
        },
        _ => None,
    }
}

/// Slice out the requested part of `src`.
pub fn query_part(src: &str, part: PathPart) -> Option<&str> {
    find_part(src, part).map(|range| &src[range])
}

/// The path part of `src`, through the final separator.
pub fn query_path(src: &str) -> Option<&str> {
    query_part(src, PathPart::Path)
}

/// The name part of `src`.
pub fn query_name(src: &str) -> Option<&str> {
    query_part(src, PathPart::Name)
}

/// The name plus extension of `src`.
pub fn query_name_ext(src: &str) -> Option<&str> {
    query_part(src, PathPart::NameExt)
}

/// The extension of `src`, without its dot.
pub fn query_ext(src: &str) -> Option<&str> {
    query_part(src, PathPart::Extension)
}

/// Whether `src` has a path part.
pub fn has_path(src: &str) -> bool {
    find_part(src, PathPart::Path).is_some()
}

/// Whether `src` has a name part.
pub fn has_name(src: &str) -> bool {
    find_part(src, PathPart::Name).is_some()
}

/// Whether `src` has an extension.
pub fn has_ext(src: &str) -> bool {
    find_part(src, PathPart::Extension).is_some()
}

/// Whether `src` names a location from the root of the file system.
pub fn is_fully_qualified(src: &str) -> bool {
    src.starts_with(SEPARATOR)
}

/// Remove the trailing path segment of `src` in place.
///
/// Returns false when there is nothing left to remove. A string without
/// any separator is emptied entirely.
pub fn remove_level(src: &mut String) -> bool {
    if src.is_empty() {
        return false;
    }

    let last_sep = match src.rfind(SEPARATOR) {
        Some(index) => index,
        None => {
            src.clear();
            return true;
        }
    };

    // A separator before the end: cut the segment after it
    if last_sep + 1 < src.len() {
        src.truncate(last_sep + 1);
        return true;
    }

    // The string ends in the separator. The root alone has no level to
    // remove; otherwise cut back to the separator before it.
    if last_sep == 0 {
        return false;
    }
    match src[..last_sep].rfind(SEPARATOR) {
        Some(prev) => {
            src.truncate(prev + 1);
            true
        }
        None => false,
    }
}

/// Join two path strings with exactly one separator between them.
///
/// A separator already ending `first` is kept; one starting `second` is
/// skipped. Fails with [`ErrorKind::InsufficientBuffer`] when the result
/// would exceed [`MAX_PATH_LEN`].
pub fn combine(first: &str, second: &str) -> Result<String> {
    let trailing = second.strip_prefix(SEPARATOR).unwrap_or(second);

    let mut combined = String::with_capacity(first.len() + trailing.len() + 1);
    combined.push_str(first);
    if !first.is_empty() && !first.ends_with(SEPARATOR) {
        combined.push(SEPARATOR);
    }
    combined.push_str(trailing);

    if combined.len() > MAX_PATH_LEN {
        return Err(set_last_kernel_error(ErrorKind::InsufficientBuffer, 0)
            .with_detail("combined path exceeds the host path limit"));
    }
    Ok(combined)
}
