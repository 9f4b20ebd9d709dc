//! Api configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Multipart bodies larger than this are spilled to disk.
pub const DEFAULT_MAX_MEMORY: usize = 10 << 20;

/// Settings shared by every endpoint of an [`Api`](crate::Api).
///
/// Deserializable, so it can be read from whatever config format the host
/// application already uses:
///
/// ```rust
/// let opts: apiary::Options = serde_json::from_str(r#"{"base_path":"/v1"}"#).unwrap();
/// assert_eq!(opts.base_path, "/v1");
/// assert_eq!(opts.max_memory, apiary::DEFAULT_MAX_MEMORY);
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Prefix prepended to every endpoint path, e.g. `/v1`.
    pub base_path: String,
    /// In-memory budget for multipart file parts, in bytes.
    pub max_memory: usize,
    /// Directory for multipart spill files. `None` uses the system default.
    pub temp_dir: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            max_memory: DEFAULT_MAX_MEMORY,
            temp_dir: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Joins `base_path` and `path` with exactly one `/` between them.
    pub(crate) fn full_path(&self, path: &str) -> String {
        let base = self.base_path.trim_end_matches('/');
        if base.is_empty() {
            return path.to_owned();
        }
        if path.is_empty() || path == "/" {
            return base.to_owned();
        }
        format!("{base}/{}", path.trim_start_matches('/'))
    }
}
