//! Request parameters: query string, form body, multipart and path variables
//! merged into one [`Values`] view.
//!
//! Precedence is insertion order: query values come first, then form values,
//! then path variables. Path variables live under `:name` so they never
//! collide with a query or form key of the same bare name. Every value is
//! split on `,`, so `?tag=a,b` reads as two values.
//!
//! Multipart file parts stay in memory until [`Options::max_memory`] is used
//! up; later parts are written to temporary files owned by the [`Params`].
//! Those files are removed by [`Params::cleanup`] or, failing that, when the
//! `Params` is dropped.

use std::collections::HashMap;
use std::convert::Infallible;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, warn};

use crate::options::Options;
use crate::values::Values;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// Content type assumed when the request carries none.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Failure to read the request parameters. Always answered with `400`.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("malformed form body: {0}")]
    Form(String),
    #[error("multipart: {0}")]
    Multipart(#[from] multer::Error),
    #[error("multipart spill: {0}")]
    Spill(#[from] io::Error),
}

/// Lower-cased media type of a `Content-Type` header, parameters stripped.
///
/// A missing or blank header yields [`DEFAULT_CONTENT_TYPE`].
pub fn resolve_content_type(header: Option<&str>) -> String {
    match header {
        Some(v) if !v.trim().is_empty() => {
            let media = v.split(';').next().unwrap_or_default();
            media.trim().to_lowercase()
        }
        _ => DEFAULT_CONTENT_TYPE.to_owned(),
    }
}

// ── Files ─────────────────────────────────────────────────────────────────────

/// Where an uploaded file's bytes live.
#[derive(Clone, Debug)]
pub enum FileData {
    Memory(Bytes),
    Disk(PathBuf),
}

/// One file part of a multipart body.
#[derive(Clone, Debug)]
pub struct FileField {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: u64,
    pub data: FileData,
}

impl FileField {
    /// Loads the file content, reading the spill file if there is one.
    pub fn bytes(&self) -> io::Result<Bytes> {
        match &self.data {
            FileData::Memory(b) => Ok(b.clone()),
            FileData::Disk(path) => std::fs::read(path).map(Bytes::from),
        }
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.data, FileData::Disk(_))
    }
}

/// Temporary files created while parsing one request.
#[derive(Debug, Default)]
pub struct Spill {
    files: Vec<TempPath>,
}

impl Spill {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|p| &**p)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Removes every spill file. Later calls are no-ops.
    ///
    /// All files are attempted; the first failure is returned.
    pub fn cleanup(&mut self) -> io::Result<()> {
        let mut first = None;
        for path in self.files.drain(..) {
            let shown = path.to_path_buf();
            if let Err(e) = path.close() {
                warn!(path = %shown.display(), error = %e, "failed to remove spill file");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for Spill {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

// ── Params ────────────────────────────────────────────────────────────────────

/// All parameters of one request.
#[derive(Debug, Default)]
pub struct Params {
    /// Unified view over `query`, `form` and `path`.
    pub values: Values,
    pub query: Values,
    pub form: Values,
    pub path: Values,
    pub files: HashMap<String, Vec<FileField>>,
    spill: Spill,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Params seeded with router path variables, stored under `:name`.
    pub fn with_path_vars<'a, I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = Self::new();
        for (key, value) in vars {
            params.path.append(format!(":{key}"), split_values([value]));
        }
        params.values = params.unify();
        params
    }

    pub fn get(&self, key: &str) -> &str {
        self.values.get(key)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get_all(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.set(key, value);
    }

    pub fn append<I, S>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values.append(key, values);
    }

    /// Names from `required` that have no value.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !self.values.contains(name))
            .map(String::as_str)
            .collect()
    }

    pub fn spill(&self) -> &Spill {
        &self.spill
    }

    /// Removes multipart spill files. Safe to call more than once.
    pub fn cleanup(&mut self) -> io::Result<()> {
        self.spill.cleanup()
    }

    /// Moves the spill files out, leaving this view with none. File entries
    /// keep their paths; the returned guard decides when they go.
    pub fn take_spill(&mut self) -> Spill {
        std::mem::take(&mut self.spill)
    }

    /// Parses the query string and body into this view.
    ///
    /// `content_type` is the already-resolved media type. `content_type_header`
    /// is the raw header, needed for the multipart boundary. Spill files
    /// written before a failure stay registered so the caller can clean up.
    pub async fn parse(
        &mut self,
        query: Option<&str>,
        content_type: &str,
        content_type_header: Option<&str>,
        body: Bytes,
        options: &Options,
    ) -> Result<(), ParamsError> {
        if let Some(q) = query {
            self.query = url::form_urlencoded::parse(q.as_bytes()).into_owned().collect();
        }

        match content_type {
            FORM_URLENCODED => {
                check_urlencoded(&body)?;
                self.form = url::form_urlencoded::parse(&body).into_owned().collect();
            }
            MULTIPART_FORM_DATA => {
                let boundary = multer::parse_boundary(content_type_header.unwrap_or_default())?;
                self.parse_multipart(boundary, body, options).await?;
            }
            _ => {}
        }

        self.values = self.unify();
        Ok(())
    }

    async fn parse_multipart(
        &mut self,
        boundary: String,
        body: Bytes,
        options: &Options,
    ) -> Result<(), ParamsError> {
        let stream = futures::stream::once(async move { Ok::<_, Infallible>(body) });
        let mut multipart = multer::Multipart::new(stream, boundary);
        let mut budget = options.max_memory;

        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_owned();

            let Some(file_name) = field.file_name().map(str::to_owned) else {
                let text = field.text().await?;
                budget = budget.saturating_sub(text.len());
                self.form.append(name, [text]);
                continue;
            };

            let content_type = field.content_type().map(|m| m.to_string());
            let mut buf = BytesMut::new();
            let mut spilled: Option<NamedTempFile> = None;
            let mut size = 0u64;

            while let Some(chunk) = field.chunk().await? {
                size += chunk.len() as u64;
                if let Some(file) = spilled.as_mut() {
                    file.write_all(&chunk)?;
                    continue;
                }
                buf.extend_from_slice(&chunk);
                if buf.len() > budget {
                    let mut file = match &options.temp_dir {
                        Some(dir) => NamedTempFile::new_in(dir)?,
                        None => NamedTempFile::new()?,
                    };
                    file.write_all(&buf)?;
                    buf.clear();
                    spilled = Some(file);
                }
            }

            let data = match spilled {
                Some(mut file) => {
                    file.flush()?;
                    let path = file.into_temp_path();
                    let shown = path.to_path_buf();
                    debug!(field = %name, size, path = %shown.display(), "multipart part spilled to disk");
                    self.spill.files.push(path);
                    FileData::Disk(shown)
                }
                None => {
                    budget -= buf.len();
                    FileData::Memory(buf.freeze())
                }
            };

            self.files.entry(name.clone()).or_default().push(FileField {
                name,
                file_name: Some(file_name),
                content_type,
                size,
                data,
            });
        }
        Ok(())
    }

    fn unify(&self) -> Values {
        let mut values = Values::new();
        for source in [&self.query, &self.form, &self.path] {
            for (key, vs) in source {
                values.append(key.as_str(), split_values(vs.iter().map(String::as_str)));
            }
        }
        values
    }
}

fn split_values<'a>(vs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    vs.into_iter()
        .flat_map(|v| v.split(','))
        .map(str::to_owned)
        .collect()
}

/// Rejects bodies that are not UTF-8 or carry broken percent escapes.
fn check_urlencoded(body: &[u8]) -> Result<(), ParamsError> {
    std::str::from_utf8(body).map_err(|e| ParamsError::Form(e.to_string()))?;
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'%' {
            let escape = body.get(i + 1..i + 3);
            if !escape.is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit)) {
                return Err(ParamsError::Form(format!("invalid escape at byte {i}")));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "Boundary+0xAbCdEfGbOuNdArY";

    fn multipart_header() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Bytes {
        let mut out = Vec::new();
        for (name, file_name, content) in parts {
            out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(f) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Bytes::from(out)
    }

    #[test]
    fn content_type_resolution() {
        let cases = [
            (None, "text/html"),
            (Some(""), "text/html"),
            (Some("Text/HTML"), "text/html"),
            (Some("text/*, text/html, text/html;level=1, */*"), "text/*, text/html, text/html"),
            (Some("text/html;level=2"), "text/html"),
            (Some("text/plain; q=0.5, text/html, text/x-dvi; q=0.8, text/x-c"), "text/plain"),
            (Some(" application/json "), "application/json"),
        ];
        for (header, expected) in cases {
            assert_eq!(resolve_content_type(header), expected, "{header:?}");
        }
    }

    #[tokio::test]
    async fn query_values_are_split_on_commas() {
        let mut p = Params::new();
        p.parse(Some("tag=a,b&limit=5"), "text/html", None, Bytes::new(), &Options::default())
            .await
            .unwrap();
        assert_eq!(p.get("tag"), "a");
        assert_eq!(p.get_all("tag"), ["a", "b"]);
        assert_eq!(p.get("limit"), "5");
    }

    #[tokio::test]
    async fn sources_merge_in_order() {
        let mut p = Params::with_path_vars([("id", "7,8")]);
        p.parse(
            Some("name=q"),
            FORM_URLENCODED,
            Some(FORM_URLENCODED),
            Bytes::from_static(b"name=f&color=red%20ish"),
            &Options::default(),
        )
        .await
        .unwrap();
        assert_eq!(p.get_all("name"), ["q", "f"]);
        assert_eq!(p.get("color"), "red ish");
        assert_eq!(p.get_all(":id"), ["7", "8"]);
        assert_eq!(p.get("id"), "");
        assert_eq!(p.form.get("name"), "f");
        assert_eq!(p.query.get("name"), "q");
    }

    #[tokio::test]
    async fn malformed_form_body_fails() {
        let mut p = Params::new();
        let err = p
            .parse(None, FORM_URLENCODED, None, Bytes::from_static(b"a=%zz"), &Options::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ParamsError::Form(_)));
    }

    #[tokio::test]
    async fn unknown_content_type_leaves_form_empty() {
        let mut p = Params::new();
        p.parse(None, "application/json", None, Bytes::from_static(b"{\"a\":1}"), &Options::default())
            .await
            .unwrap();
        assert!(p.form.is_empty());
        assert!(p.values.is_empty());
    }

    #[tokio::test]
    async fn invalid_multipart_is_a_multipart_error() {
        let mut p = Params::new();
        let header = multipart_header();
        let err = p
            .parse(None, MULTIPART_FORM_DATA, Some(&header), Bytes::from_static(b"blabla"), &Options::default())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("multipart:"), "{err}");
    }

    #[tokio::test]
    async fn missing_boundary_is_a_multipart_error() {
        let mut p = Params::new();
        let err = p
            .parse(None, MULTIPART_FORM_DATA, Some("multipart/form-data"), Bytes::new(), &Options::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ParamsError::Multipart(_)));
    }

    #[tokio::test]
    async fn valid_multipart_keeps_small_files_in_memory() {
        let mut p = Params::new();
        let header = multipart_header();
        let body = multipart_body(&[("test", Some("toto.txt"), b"blabla"), ("name", None, b"rex")]);
        p.parse(None, MULTIPART_FORM_DATA, Some(&header), body, &Options::default())
            .await
            .unwrap();

        let file = &p.files["test"][0];
        assert_eq!(file.file_name.as_deref(), Some("toto.txt"));
        assert_eq!(file.size, 6);
        assert!(!file.is_spilled());
        assert_eq!(file.bytes().unwrap(), Bytes::from_static(b"blabla"));
        assert_eq!(p.get("name"), "rex");
        assert!(p.spill().is_empty());
    }

    #[tokio::test]
    async fn oversized_parts_spill_and_are_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let opts = Options::new().max_memory(8).temp_dir(dir.path());
        let header = multipart_header();
        let big = vec![b'x'; 64];
        let body = multipart_body(&[("small", Some("s.txt"), b"tiny"), ("big", Some("b.bin"), &big)]);

        let mut p = Params::new();
        p.parse(None, MULTIPART_FORM_DATA, Some(&header), body, &opts).await.unwrap();

        assert!(!p.files["small"][0].is_spilled());
        let big_file = &p.files["big"][0];
        assert!(big_file.is_spilled());
        assert_eq!(big_file.bytes().unwrap().len(), 64);

        let paths: Vec<PathBuf> = p.spill().paths().map(Path::to_path_buf).collect();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].exists());

        p.cleanup().unwrap();
        assert!(!paths[0].exists());
        p.cleanup().unwrap();
    }

    #[tokio::test]
    async fn dropping_params_removes_spill_files() {
        let dir = tempfile::tempdir().unwrap();
        let opts = Options::new().max_memory(0).temp_dir(dir.path());
        let header = multipart_header();
        let body = multipart_body(&[("f", Some("f.txt"), b"content")]);

        let mut p = Params::new();
        p.parse(None, MULTIPART_FORM_DATA, Some(&header), body, &opts).await.unwrap();
        let path = p.spill().paths().next().unwrap().to_path_buf();
        assert!(path.exists());

        drop(p);
        assert!(!path.exists());
    }

    #[test]
    fn reports_missing_required_params() {
        let p = Params::with_path_vars([("id", "1")]);
        let required = vec![":id".to_owned(), "name".to_owned()];
        assert_eq!(p.missing(&required), ["name"]);
    }
}
