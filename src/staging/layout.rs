//! Field layout descriptors mapping JSON records onto staging columns.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Cannot read layout descriptor {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed layout descriptor: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid JSONPath expression {0:?}")]
    InvalidPath(String),

    #[error("Layout has {paths} paths but table {table} has {columns} columns")]
    ColumnCount {
        table: &'static str,
        paths: usize,
        columns: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A single JSONPath expression such as `$['artist']` or `$.song.title[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(expr: &str) -> Result<Self, LayoutError> {
        let invalid = || LayoutError::InvalidPath(expr.to_string());
        let mut rest = expr.trim().strip_prefix('$').ok_or_else(invalid)?;
        let mut segments = Vec::new();

        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
                let key = &after_dot[..end];
                if key.is_empty() {
                    return Err(invalid());
                }
                segments.push(Segment::Key(key.to_string()));
                rest = &after_dot[end..];
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let end = after_bracket.find(']').ok_or_else(invalid)?;
                let inner = after_bracket[..end].trim();
                let quoted = inner
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
                let segment = match quoted {
                    Some(key) => Segment::Key(key.to_string()),
                    None => Segment::Index(inner.parse().map_err(|_| invalid())?),
                };
                segments.push(segment);
                rest = &after_bracket[end + 1..];
            } else {
                return Err(invalid());
            }
        }

        if segments.is_empty() {
            return Err(invalid());
        }
        Ok(Self { segments })
    }

    /// The value at this path, or `None` when any step is missing.
    pub fn select<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(record, |value, segment| match segment {
                Segment::Key(key) => value.get(key.as_str()),
                Segment::Index(idx) => value.get(*idx),
            })
    }
}

#[derive(Debug, Deserialize)]
struct JsonPathsFile {
    jsonpaths: Vec<String>,
}

/// How source record fields map onto staging columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldLayout {
    /// Match top-level keys against each column's source key.
    #[default]
    Auto,
    /// One path per loaded column, in column order.
    JsonPaths(Vec<JsonPath>),
}

impl FieldLayout {
    /// Parse a JSONPaths document: `{"jsonpaths": ["$['artist']", ...]}`.
    pub fn from_json(text: &str) -> Result<Self, LayoutError> {
        let file: JsonPathsFile = serde_json::from_str(text)?;
        let paths = file
            .jsonpaths
            .iter()
            .map(|p| JsonPath::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FieldLayout::JsonPaths(paths))
    }

    pub fn from_file(path: &Path) -> Result<Self, LayoutError> {
        let text = fs::read_to_string(path).map_err(|source| LayoutError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Ensure a positional layout covers exactly the table's loaded columns.
    pub fn check_columns(&self, table: &'static str, columns: usize) -> Result<(), LayoutError> {
        match self {
            FieldLayout::JsonPaths(paths) if paths.len() != columns => {
                Err(LayoutError::ColumnCount {
                    table,
                    paths: paths.len(),
                    columns,
                })
            }
            _ => Ok(()),
        }
    }
}
