//! Directory loader for JSON descriptor files.
//!
//! Every `*.json` file of a directory is parsed on its own. Files that cannot
//! be read or parsed are logged and reported back as skipped; they never abort
//! loading of the others.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{RegistryError, RegistryResult};
use crate::constants::system::DESCRIPTOR_EXTENSION;

/// A descriptor file that was not loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDescriptor {
    pub path: PathBuf,
    pub error: RegistryError,
}

/// Outcome of loading a descriptor directory
#[derive(Debug, Clone)]
pub struct DescriptorLoad<T> {
    /// Parsed descriptors with the file each came from, in file-name order
    pub available: Vec<(PathBuf, T)>,
    pub skipped: Vec<SkippedDescriptor>,
}

impl<T> Default for DescriptorLoad<T> {
    fn default() -> Self {
        Self {
            available: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Load every descriptor in `dir`; only an unreadable directory is an error
pub fn load_descriptors<T: DeserializeOwned>(dir: &Path) -> RegistryResult<DescriptorLoad<T>> {
    let entries = std::fs::read_dir(dir).map_err(|e| RegistryError::io(dir, e))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(DESCRIPTOR_EXTENSION))
        })
        .collect();
    paths.sort();

    let mut load = DescriptorLoad::default();
    for path in paths {
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| RegistryError::io(&path, e))
            .and_then(|raw| serde_json::from_str::<T>(&raw).map_err(|e| RegistryError::parse(&path, e)));

        match parsed {
            Ok(descriptor) => {
                debug!(path = %path.display(), "Loaded descriptor");
                load.available.push((path, descriptor));
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Skipping descriptor");
                load.skipped.push(SkippedDescriptor { path, error });
            }
        }
    }

    Ok(load)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Named {
        name: String,
    }

    #[test]
    fn test_bad_files_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"name": "first"}"#).unwrap();
        std::fs::write(dir.path().join("b.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("c.json"), r#"{"name": "third"}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let load: DescriptorLoad<Named> = load_descriptors(dir.path()).unwrap();

        let names: Vec<_> = load.available.iter().map(|(_, d)| d.name.as_str()).collect();
        assert_eq!(names, vec!["first", "third"]);
        assert_eq!(load.skipped.len(), 1);
        assert!(load.skipped[0].path.ends_with("b.json"));
        assert!(matches!(load.skipped[0].error, RegistryError::Parse { .. }));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let result = load_descriptors::<Named>(Path::new("/nonexistent/descriptors"));
        assert!(matches!(result, Err(RegistryError::Io { .. })));
    }
}
