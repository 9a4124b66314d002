//! Destination naming and creation for uploaded files.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use uuid::Uuid;

/// Reduce a client supplied file name to its last path component.
/// Returns `None` for names that do not denote a file.
pub fn client_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let base: String = base.chars().filter(|c| !c.is_control()).collect();
    match base.as_str() {
        "" | "." | ".." => None,
        _ => Some(base),
    }
}

/// Split at the first dot: `archive.tar.gz` -> (`archive`, `.tar.gz`).
/// A leading dot belongs to the name.
fn split_extension(filename: &str) -> (&str, &str) {
    match filename.find('.') {
        Some(0) | None => (filename, ""),
        Some(pos) => filename.split_at(pos),
    }
}

/// Strip an existing ` (N)` suffix, returning the next counter to try.
fn split_counter(base: &str) -> (&str, u32) {
    if let Some(paren_pos) = base.rfind(" (") {
        if let Some(number) = base[paren_pos + 2..].strip_suffix(')') {
            if let Ok(num) = number.parse::<u32>() {
                // Past u32::MAX the count restarts on the bare stem
                return (&base[..paren_pos], num.checked_add(1).unwrap_or(1));
            }
        }
    }
    (base, 1)
}

/// First name not rejected by `taken`: `name`, then `name (1).ext`, `name (2).ext`, ...
pub fn available_name(filename: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(filename) {
        return filename.to_string();
    }

    let (base, extension) = split_extension(filename);
    let (stem, start) = split_counter(base);
    (start..=u32::MAX)
        .map(|counter| format!("{stem} ({counter}){extension}"))
        .find(|candidate| !taken(candidate.as_str()))
        .unwrap_or_else(|| format!("{stem} ({}){extension}", Uuid::new_v4().simple()))
}

/// Names present in `dir` right now.
pub async fn existing_names(dir: &Path) -> io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Create a new file for `wanted` without ever replacing an existing one.
/// Names lost to a concurrent creator are skipped.
pub async fn create_unique(
    dir: &Path,
    wanted: &str,
    taken: impl Fn(&str) -> bool,
) -> io::Result<(String, File)> {
    let mut raced = HashSet::new();
    loop {
        let name = available_name(wanted, |n| raced.contains(n) || taken(n));
        let open = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&name))
            .await;
        match open {
            Ok(file) => return Ok((name, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(name = %name, "Destination appeared concurrently, picking another");
                raced.insert(name);
            }
            Err(e) => return Err(e),
        }
    }
}
