use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

enum Entry {
    Dir(String),
    File { source: PathBuf, name: String },
}

/// Zip `inputs` into `archive_path`. Directories keep their own name as the top-level folder.
pub fn write_archive(inputs: &[PathBuf], archive_path: &Path) -> Result<u64> {
    let entries = collect_entries(inputs)?;
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create zip archive {}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut files = 0u64;
    for entry in &entries {
        match entry {
            Entry::Dir(name) => {
                writer
                    .add_directory(name.as_str(), options)
                    .with_context(|| format!("Failed to add directory {name} to zip"))?;
            }
            Entry::File { source, name } => {
                let mut reader = File::open(source)
                    .with_context(|| format!("Failed to open {}", source.display()))?;
                writer
                    .start_file(name.as_str(), options)
                    .with_context(|| format!("Failed to start zip entry {name}"))?;
                io::copy(&mut reader, &mut writer)
                    .with_context(|| format!("Failed to add {} to zip", source.display()))?;
                files += 1;
            }
        }
    }

    writer.finish().context("Failed to finalize zip archive")?;
    tracing::debug!(files, archive = %archive_path.display(), "Wrote zip archive");
    Ok(files)
}

fn collect_entries(inputs: &[PathBuf]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut names = HashSet::<String>::new();

    for input in inputs {
        let root = input
            .file_name()
            .and_then(|x| x.to_str())
            .unwrap_or("file")
            .to_string();

        if !input.is_dir() {
            let name = unique_entry_name(&root, &mut names);
            entries.push(Entry::File {
                source: input.clone(),
                name,
            });
            continue;
        }

        let root = unique_entry_name(&root, &mut names);
        for entry in WalkDir::new(input).sort_by_file_name() {
            let entry =
                entry.with_context(|| format!("Failed to walk directory {}", input.display()))?;
            let rel = entry
                .path()
                .strip_prefix(input)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let name = if rel.is_empty() {
                root.clone()
            } else {
                format!("{root}/{rel}")
            };

            if entry.file_type().is_dir() {
                entries.push(Entry::Dir(format!("{name}/")));
            } else if entry.file_type().is_file() {
                entries.push(Entry::File {
                    source: entry.path().to_path_buf(),
                    name,
                });
            }
        }
    }

    if entries.is_empty() {
        anyhow::bail!("No files found for zip archive");
    }
    Ok(entries)
}

fn unique_entry_name(wanted: &str, names: &mut HashSet<String>) -> String {
    if names.insert(wanted.to_string()) {
        return wanted.to_string();
    }

    let (stem, ext) = match wanted.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (wanted, None),
    };

    let mut idx = 2usize;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem}-{idx}.{ext}"),
            None => format!("{stem}-{idx}"),
        };
        if names.insert(candidate.clone()) {
            return candidate;
        }
        idx += 1;
    }
}
