//! Source directory discovery.
//!
//! Walks the source directory, keeps regular files whose path relative to
//! the root matches an include glob and no exclude glob, and returns them in
//! lexicographic path order so runs are deterministic.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::LoaderConfig;
use crate::error::{Error, Result};

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

pub fn discover_files(root: &Path, config: &LoaderConfig) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "source directory does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) || !include_set.is_match(relative) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_finds_pdfs_sorted() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.pdf");
        touch(dir.path(), "a.pdf");
        touch(dir.path(), "sub/c.pdf");
        touch(dir.path(), "notes.txt");

        let files = discover_files(dir.path(), &LoaderConfig::default()).unwrap();
        let rel: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(rel, vec!["a.pdf", "b.pdf", "sub/c.pdf"]);
    }

    #[test]
    fn test_excludes_apply() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "keep.pdf");
        touch(dir.path(), "drafts/skip.pdf");
        touch(dir.path(), "node_modules/pkg/doc.pdf");

        let config = LoaderConfig {
            exclude_globs: vec!["drafts/**".into()],
            ..LoaderConfig::default()
        };
        let files = discover_files(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.pdf"));
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = discover_files(&dir.path().join("absent"), &LoaderConfig::default());
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(discover_files(dir.path(), &LoaderConfig::default())
            .unwrap()
            .is_empty());
    }
}
