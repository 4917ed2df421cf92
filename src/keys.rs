use std::path::{Component, Path};

use percent_encoding::percent_decode_str;

use crate::error::Result;

/// Remote key for the file at `path` inside the bucket rooted at `base`:
/// the relative path with `/` separators, percent-escapes decoded, and no
/// leading slash.
pub fn object_key(base: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(base)?;
    let mut segments = vec![];
    for component in relative.components() {
        if let Component::Normal(part) = component {
            segments.push(part.to_string_lossy().into_owned());
        }
    }

    let joined = segments.join("/");
    let key = percent_decode_str(&joined).decode_utf8_lossy().into_owned();
    Ok(key)
}

/// Bucket name for `path`: its first segment below the watched root, or
/// `None` when `path` lies outside the root.
pub fn bucket_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    match relative.components().next() {
        Some(Component::Normal(part)) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }
}
