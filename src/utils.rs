//! Filesystem helpers shared by the store builder and the CLI

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Ensure a directory exists, creating it if necessary
pub(crate) fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Validate that a file has an allowed extension
pub(crate) fn has_allowed_extension<S: AsRef<str>>(path: &Path, allowed_extensions: &[S]) -> bool {
    if let Some(ext) = path.extension() {
        if let Some(ext_str) = ext.to_str() {
            return allowed_extensions
                .iter()
                .any(|e| e.as_ref().eq_ignore_ascii_case(ext_str));
        }
    }
    false
}

/// List regular files in `dir` with an allowed extension, sorted by file name
pub(crate) fn list_images<S: AsRef<str>>(dir: &Path, allowed_extensions: &[S]) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_allowed_extension(p, allowed_extensions))
        .collect();
    entries.sort();
    Ok(entries)
}

/// File name of `path` as an owned string, `"unknown"` when it has none
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_allowed_extension() {
        let allowed = vec!["jpg", "jpeg", "png"];
        assert!(has_allowed_extension(Path::new("test.jpg"), &allowed));
        assert!(has_allowed_extension(Path::new("test.JPEG"), &allowed));
        assert!(!has_allowed_extension(Path::new("test.txt"), &allowed));
        assert!(!has_allowed_extension(Path::new("test"), &allowed));
    }

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.JPG", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let found = list_images(dir.path(), &["jpg", "png"]).unwrap();
        let names: Vec<String> = found.iter().map(|p| file_name_of(p)).collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of(Path::new("/data/images/cat.png")), "cat.png");
        assert_eq!(file_name_of(Path::new("/")), "unknown");
    }
}
