//! Path and key helpers for Hafiz CLI

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Content type for an upload, from the file extension
pub fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Confirm an action with the user
pub fn confirm(message: &str) -> Result<bool> {
    use std::io::{self, Write};

    print!("{} [y/N]: ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Extract filename from a path or key
pub fn extract_filename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join path components (handling trailing slashes)
pub fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, name)
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Determine destination key when copying a file to S3
pub fn determine_dest_key(
    source_path: &str,
    dest_key: Option<&str>,
    dest_is_prefix: bool,
) -> String {
    let filename = extract_filename(source_path);

    match dest_key {
        Some(key) if dest_is_prefix || key.ends_with('/') => join_key(key, filename),
        Some(key) => key.to_string(),
        None => filename.to_string(),
    }
}

/// Object key for a file found under `root` during a recursive upload
pub fn relative_key(root: &Path, file: &Path, prefix: &str) -> Result<String> {
    let relative = file
        .strip_prefix(root)
        .with_context(|| format!("{:?} is not under {:?}", file, root))?;

    let name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    Ok(join_key(prefix, &name))
}

/// Local file path for a downloaded key.
///
/// A destination that is an existing directory, or ends with a separator,
/// receives the key's filename.
pub fn local_dest_path(dest: &str, key: &str) -> PathBuf {
    let path = Path::new(dest);
    if path.is_dir() || dest.ends_with('/') || dest.ends_with(std::path::MAIN_SEPARATOR) {
        path.join(extract_filename(key))
    } else {
        path.to_path_buf()
    }
}
