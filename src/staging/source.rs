//! Source locations and object discovery.
//!
//! Object-storage locations (`s3://bucket/prefix`) are resolved against a local
//! mirror root where `<root>/<bucket>/<key>` holds each object. Like a bulk copy
//! from object storage, a location names a key *prefix*: every object whose key
//! starts with it is loaded.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Invalid source location: {0}")]
    InvalidLocation(String),

    #[error("Object storage location {0} requires an object_store_root")]
    NoObjectStoreRoot(String),

    #[error("No objects found at {0}")]
    NotFound(String),

    #[error("IO error listing {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: walkdir::Error,
    },
}

/// Where a bulk copy reads its objects from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// `s3://bucket/prefix`
    ObjectStore { bucket: String, prefix: String },
    /// `file:///path` or a plain filesystem path.
    Local(PathBuf),
}

impl SourceLocation {
    pub fn parse(location: &str) -> Result<Self, SourceError> {
        let trimmed = location.trim().trim_matches('\'');
        if trimmed.is_empty() {
            return Err(SourceError::InvalidLocation(location.to_string()));
        }

        if let Some(rest) = trimmed.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(SourceError::InvalidLocation(location.to_string()));
            }
            let prefix = urlencoding::decode(key)
                .map_err(|_| SourceError::InvalidLocation(location.to_string()))?
                .into_owned();
            return Ok(SourceLocation::ObjectStore {
                bucket: bucket.to_string(),
                prefix,
            });
        }

        if let Some(path) = trimmed.strip_prefix("file://") {
            let path = urlencoding::decode(path)
                .map_err(|_| SourceError::InvalidLocation(location.to_string()))?;
            return Ok(SourceLocation::Local(PathBuf::from(path.as_ref())));
        }

        if trimmed.contains("://") {
            return Err(SourceError::InvalidLocation(location.to_string()));
        }

        Ok(SourceLocation::Local(PathBuf::from(trimmed)))
    }

    /// List every object under this location, sorted by key.
    pub fn list_objects(&self, object_store_root: Option<&Path>) -> Result<Vec<PathBuf>, SourceError> {
        let objects = match self {
            SourceLocation::Local(path) => {
                if path.is_file() {
                    vec![path.clone()]
                } else {
                    walk_files(path, &self.to_string())?
                }
            }
            SourceLocation::ObjectStore { bucket, prefix } => {
                let root = object_store_root
                    .ok_or_else(|| SourceError::NoObjectStoreRoot(self.to_string()))?;
                let bucket_dir = root.join(bucket);

                // Walk from the deepest directory named by the prefix.
                let start = match prefix.rfind('/') {
                    Some(idx) => bucket_dir.join(&prefix[..idx]),
                    None => bucket_dir.clone(),
                };
                if !start.exists() {
                    return Err(SourceError::NotFound(self.to_string()));
                }

                walk_files(&start, &self.to_string())?
                    .into_iter()
                    .filter(|path| object_key(&bucket_dir, path).starts_with(prefix.as_str()))
                    .collect()
            }
        };

        if objects.is_empty() {
            return Err(SourceError::NotFound(self.to_string()));
        }
        Ok(objects)
    }

    /// Read a single object, e.g. a layout descriptor.
    pub fn resolve_object(&self, object_store_root: Option<&Path>) -> Result<PathBuf, SourceError> {
        let mut objects = self.list_objects(object_store_root)?;
        let exact = match self {
            SourceLocation::Local(path) => objects.iter().position(|o| o == path),
            SourceLocation::ObjectStore { bucket, prefix } => {
                let bucket_dir = object_store_root
                    .map(|root| root.join(bucket))
                    .unwrap_or_default();
                objects
                    .iter()
                    .position(|o| object_key(&bucket_dir, o) == *prefix)
            }
        };
        match exact {
            Some(idx) => Ok(objects.swap_remove(idx)),
            None if objects.len() == 1 => Ok(objects.swap_remove(0)),
            None => Err(SourceError::NotFound(self.to_string())),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::ObjectStore { bucket, prefix } => write!(f, "s3://{bucket}/{prefix}"),
            SourceLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

fn walk_files(dir: &Path, location: &str) -> Result<Vec<PathBuf>, SourceError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|source| SourceError::Io {
            location: location.to_string(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Object key of a mirrored file, with `/` separators.
fn object_key(bucket_dir: &Path, path: &Path) -> String {
    path.strip_prefix(bucket_dir)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
