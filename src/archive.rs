//! Unpacking of uploaded invoice archives.

use log::{debug, info};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

use crate::error::ArchiveError;

/// File extensions accepted as invoices inside an archive
const INVOICE_EXTENSIONS: &[&str] = &["pdf", "txt"];

/// One invoice file read from an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Base file name, or the path inside the archive when several entries
    /// share that base name
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Read every invoice file out of a ZIP archive held in memory.
///
/// Nested directories are walked. Directory entries, macOS resource forks,
/// hidden files and entries whose paths escape the archive root are skipped.
/// Entries are returned sorted by file name.
pub fn extract_invoices(bytes: &[u8], max_entry_bytes: u64) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| ArchiveError::InvalidZip(e.to_string()))?;

    // (path inside the archive, base name, contents)
    let mut found: Vec<(String, String, Vec<u8>)> = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| ArchiveError::InvalidZip(e.to_string()))?;

        if file.is_dir() {
            continue;
        }

        let raw_name = file.name().to_string();
        let Some(path) = file.enclosed_name() else {
            debug!("Skipping archive entry with unsafe path: {}", raw_name);
            continue;
        };
        if !is_invoice_path(&path) {
            debug!("Skipping non-invoice archive entry: {}", raw_name);
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
        else {
            continue;
        };

        if file.size() > max_entry_bytes {
            return Err(ArchiveError::EntryTooLarge {
                name: raw_name,
                size: file.size(),
                limit: max_entry_bytes,
            });
        }

        // The declared size can lie, so cap the actual read as well
        let mut buffer = Vec::with_capacity(file.size() as usize);
        (&mut file)
            .take(max_entry_bytes + 1)
            .read_to_end(&mut buffer)
            .map_err(|source| ArchiveError::Read {
                name: raw_name.clone(),
                source,
            })?;
        if buffer.len() as u64 > max_entry_bytes {
            return Err(ArchiveError::EntryTooLarge {
                name: raw_name,
                size: buffer.len() as u64,
                limit: max_entry_bytes,
            });
        }

        let relative = path
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");
        found.push((relative, file_name, buffer));
    }

    if found.is_empty() {
        return Err(ArchiveError::NoInvoices);
    }

    let mut name_counts: HashMap<String, usize> = HashMap::new();
    for (_, file_name, _) in &found {
        *name_counts.entry(file_name.clone()).or_default() += 1;
    }

    let mut entries: Vec<ArchiveEntry> = found
        .into_iter()
        .map(|(relative, file_name, bytes)| {
            let file_name = if name_counts[&file_name] > 1 {
                debug!("Duplicate invoice name {}, keeping path {}", file_name, relative);
                relative
            } else {
                file_name
            };
            ArchiveEntry { file_name, bytes }
        })
        .collect();

    entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    info!("Extracted {} invoice files from archive", entries.len());
    Ok(entries)
}

fn is_invoice_path(path: &Path) -> bool {
    let in_resource_fork = path
        .components()
        .any(|c| c.as_os_str().to_str() == Some("__MACOSX"));
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    let extension_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| INVOICE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false);

    !in_resource_fork && !hidden && extension_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            if name.ends_with('/') {
                writer
                    .add_directory(name.trim_end_matches('/'), SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(content).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extracts_invoices_sorted() {
        let zip = build_zip(&[
            ("b_invoice.txt", b"second"),
            ("nested/", b""),
            ("nested/a_invoice.PDF", b"%PDF-1.4"),
            ("notes.md", b"ignored"),
            ("__MACOSX/._a_invoice.pdf", b"junk"),
            (".DS_Store.txt", b"hidden"),
        ]);

        let entries = extract_invoices(&zip, 1024).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["a_invoice.PDF", "b_invoice.txt"]);
        assert_eq!(entries[1].bytes, b"second");
    }

    #[test]
    fn test_duplicate_names_keep_their_paths() {
        let zip = build_zip(&[
            ("march/inv.pdf", b"%PDF-1.4 march"),
            ("april/inv.pdf", b"%PDF-1.4 april"),
            ("receipt.txt", b"unique"),
        ]);

        let entries = extract_invoices(&zip, 1024).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["april/inv.pdf", "march/inv.pdf", "receipt.txt"]);
        assert_eq!(entries[1].bytes, b"%PDF-1.4 march");
    }

    #[test]
    fn test_invalid_zip() {
        let err = extract_invoices(b"not a zip archive", 1024).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidZip(_)));
    }

    #[test]
    fn test_archive_without_invoices() {
        let zip = build_zip(&[("readme.md", b"nothing here")]);
        let err = extract_invoices(&zip, 1024).unwrap_err();
        assert!(matches!(err, ArchiveError::NoInvoices));
    }

    #[test]
    fn test_entry_size_limit() {
        let big = vec![b'x'; 2048];
        let zip = build_zip(&[("huge.txt", &big)]);
        let err = extract_invoices(&zip, 1024).unwrap_err();
        assert!(matches!(err, ArchiveError::EntryTooLarge { .. }));
    }
}
