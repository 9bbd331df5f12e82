use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::model::SourceId;
use crate::vcard::split_export;

/// File extensions picked up when a source path is a directory.
const EXPORT_EXTENSIONS: &[&str] = &["vcf", "vcard"];

/// The raw text of one record as found in a source export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub source_id: SourceId,
    /// `<source>#<n>`, 1-based over the source's records in file order.
    pub origin: String,
    pub path: PathBuf,
    pub text: String,
}

pub fn compile_patterns(ignore_globs: &[String]) -> Vec<Pattern> {
    ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Export files under `roots`, sorted. A root naming a file is taken as-is;
/// directories are walked for `.vcf`/`.vcard` files. Symlinks, empty files and
/// anything matching an ignore pattern are skipped.
pub fn discover_files(roots: &[String], ignore_patterns: &[Pattern]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for root in roots {
        let root = Path::new(root);
        if is_ignored(root, ignore_patterns) {
            continue;
        }
        if root.is_file() {
            files.push(root.to_path_buf());
            continue;
        }
        if !root.is_dir() {
            warn!("Source path {} does not exist", root.display());
            continue;
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !is_ignored(entry.path(), ignore_patterns));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if err
                        .io_error()
                        .is_some_and(|e| e.kind() == io::ErrorKind::PermissionDenied)
                    {
                        error!("Access denied while walking {}: {}", root.display(), err);
                        continue;
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("Error walking {}: {}", root.display(), err),
                    ));
                }
            };
            if !entry.file_type().is_file() || !has_export_extension(entry.path()) {
                continue;
            }
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if len > 0 {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Discover and split every configured source in parallel. Records come back
/// grouped by source in configuration order, each source in file order.
pub fn scan_sources(sources: &[SourceConfig], ignore_globs: &[String]) -> io::Result<Vec<RawRecord>> {
    let ignore_patterns = compile_patterns(ignore_globs);
    let by_source: DashMap<usize, Vec<RawRecord>> = DashMap::new();

    sources
        .par_iter()
        .enumerate()
        .try_for_each(|(index, source)| -> io::Result<()> {
            let files = discover_files(&source.paths, &ignore_patterns)?;
            let records = read_source(&SourceId::new(&source.id), &files)?;
            debug!(
                "Source '{}': {} file(s), {} raw record(s)",
                source.id,
                files.len(),
                records.len()
            );
            by_source.insert(index, records);
            Ok(())
        })?;

    let mut ordered: Vec<(usize, Vec<RawRecord>)> = by_source.into_iter().collect();
    ordered.sort_by_key(|(index, _)| *index);
    Ok(ordered.into_iter().flat_map(|(_, records)| records).collect())
}

/// Split every file of one source into raw records.
pub fn read_source(source_id: &SourceId, files: &[PathBuf]) -> io::Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    for path in files {
        let bytes = fs::read(path).map_err(|err| {
            io::Error::new(err.kind(), format!("Error reading {}: {}", path.display(), err))
        })?;
        let text = String::from_utf8_lossy(&bytes);
        for chunk in split_export(&text) {
            records.push(RawRecord {
                source_id: source_id.clone(),
                origin: format!("{}#{}", source_id, records.len() + 1),
                path: path.clone(),
                text: chunk,
            });
        }
    }
    Ok(records)
}

fn is_ignored(path: &Path, ignore_patterns: &[Pattern]) -> bool {
    ignore_patterns.iter().any(|pattern| pattern.matches_path(path))
}

fn has_export_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            EXPORT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;

    const CARD: &str = "BEGIN:VCARD\r\nVERSION:3.0\r\nFN:Ann Lee\r\nN:Lee;Ann;;;\r\nEND:VCARD\r\n";

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discover_filters_extension_empty_and_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("a.vcf"), CARD);
        write(&root.join("nested/b.VCF"), CARD);
        write(&root.join("notes.txt"), "not a card");
        write(&root.join("empty.vcf"), "");
        write(&root.join("backup/old.vcf"), CARD);

        let patterns = compile_patterns(&["**/backup".to_string()]);
        let files = discover_files(&[root.to_string_lossy().into_owned()], &patterns).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.vcf", "b.VCF"]);
    }

    #[test]
    fn test_explicit_file_path_is_taken_regardless_of_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("contacts.export");
        write(&file, CARD);
        let files = discover_files(&[file.to_string_lossy().into_owned()], &[]).unwrap();
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn test_scan_sources_numbers_records_per_source() {
        let dir = tempfile::tempdir().unwrap();
        let phone = dir.path().join("phone.vcf");
        let mail = dir.path().join("mail");
        write(&phone, &format!("{}{}", CARD, CARD.replace("Ann", "Bo")));
        write(&mail.join("all.vcf"), CARD);

        let sources = vec![
            SourceConfig {
                id: "phone".to_string(),
                label: None,
                kind: SourceKind::Curated,
                paths: vec![phone.to_string_lossy().into_owned()],
            },
            SourceConfig {
                id: "mail".to_string(),
                label: None,
                kind: SourceKind::AutoCaptured,
                paths: vec![mail.to_string_lossy().into_owned()],
            },
        ];
        let records = scan_sources(&sources, &[]).unwrap();
        let origins: Vec<&str> = records.iter().map(|r| r.origin.as_str()).collect();
        assert_eq!(origins, vec!["phone#1", "phone#2", "mail#1"]);
        assert!(records[1].text.contains("FN:Bo Lee"));
    }

    #[test]
    fn test_missing_source_path_yields_nothing() {
        let files = discover_files(&["/definitely/not/here".to_string()], &[]).unwrap();
        assert!(files.is_empty());
    }
}
