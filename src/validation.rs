//! Input checks that run before any browser work starts.

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::config::ExportConfig;
use crate::naming::expand_path;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Bad input URL. Only {} URLs are supported.", .allowed.join(", "))]
    Hostname { url: String, allowed: Vec<String> },
    #[error("Input is not a file.")]
    NotAFile(PathBuf),
    #[error("Bad input file name. Only {} files are supported.", .allowed.join(", "))]
    Extension { path: PathBuf, allowed: Vec<String> },
    #[error("Could not convert {0} to a local path")]
    FileUrl(String),
}

/// Allow-lists applied to every input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    pub remote_hostnames: Vec<String>,
    /// Extensions including the leading dot, e.g. `.tldr`.
    pub file_extensions: Vec<String>,
}

impl From<&ExportConfig> for ValidationRules {
    fn from(config: &ExportConfig) -> Self {
        Self {
            remote_hostnames: config.remote_hostnames.clone(),
            file_extensions: config.file_extensions.clone(),
        }
    }
}

/// A validated sketch location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SketchSource {
    /// Absolute path of an existing local file.
    Local(PathBuf),
    Remote(Url),
}

/// Classify `input` as a local file or a remote sketch URL and check it
/// against `rules`. `file:` URLs are treated as local paths.
pub fn validate_input(input: &str, rules: &ValidationRules) -> Result<SketchSource, InputError> {
    if let Some(url) = parse_url(input) {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| InputError::FileUrl(input.to_string()))?;
            return validate_path(&path, rules);
        }

        let host = url.host_str().unwrap_or_default();
        if !rules.remote_hostnames.iter().any(|allowed| allowed == host) {
            return Err(InputError::Hostname {
                url: input.to_string(),
                allowed: rules.remote_hostnames.clone(),
            });
        }
        return Ok(SketchSource::Remote(url));
    }

    validate_path(Path::new(input), rules)
}

/// Only inputs with an explicit, multi-letter scheme count as URLs, so
/// Windows drive letters stay paths.
fn parse_url(input: &str) -> Option<Url> {
    Url::parse(input)
        .ok()
        .filter(|url| url.scheme().len() > 1)
}

fn validate_path(path: &Path, rules: &ValidationRules) -> Result<SketchSource, InputError> {
    let normalized = expand_path(&path.to_string_lossy());
    if !normalized.is_file() {
        return Err(InputError::NotAFile(normalized));
    }

    let extension = normalized
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    if !rules.file_extensions.contains(&extension) {
        return Err(InputError::Extension {
            path: normalized,
            allowed: rules.file_extensions.clone(),
        });
    }

    Ok(SketchSource::Local(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ValidationRules {
        ValidationRules::from(&ExportConfig::default())
    }

    #[test]
    fn accepts_allow_listed_remote_urls() {
        let source = validate_input("https://www.tldraw.com/s/v2_c_abc", &rules()).unwrap();
        assert!(matches!(source, SketchSource::Remote(url) if url.path() == "/s/v2_c_abc"));
    }

    #[test]
    fn rejects_other_hosts() {
        let err = validate_input("https://example.com/s/abc", &rules()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bad input URL. Only www.tldraw.com URLs are supported."
        );
    }

    #[test]
    fn accepts_existing_tldr_files_by_path_and_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sketch.tldr");
        std::fs::write(&file, "{}").unwrap();

        let by_path = validate_input(&file.to_string_lossy(), &rules()).unwrap();
        assert_eq!(by_path, SketchSource::Local(file.clone()));

        let url = Url::from_file_path(&file).unwrap();
        let by_url = validate_input(url.as_str(), &rules()).unwrap();
        assert_eq!(by_url, SketchSource::Local(file));
    }

    #[test]
    fn rejects_missing_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.tldr");

        let err = validate_input(&missing.to_string_lossy(), &rules()).unwrap_err();
        assert_eq!(err.to_string(), "Input is not a file.");
        assert!(matches!(
            validate_input(&dir.path().to_string_lossy(), &rules()),
            Err(InputError::NotAFile(_))
        ));
    }

    #[test]
    fn rejects_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sketch.json");
        std::fs::write(&file, "{}").unwrap();

        let err = validate_input(&file.to_string_lossy(), &rules()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bad input file name. Only .tldr files are supported."
        );
    }
}
