//! The per-request context handed to middleware and handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::context::Context;
use crate::options::Options;
use crate::params::{Params, ParamsError, resolve_content_type};

/// One in-flight HTTP request.
///
/// Owned by the endpoint for the duration of a dispatch and never shared
/// between requests. Middleware get `&mut Req`; the handler gets it by value.
#[derive(Debug)]
pub struct Req {
    pub id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub params: Params,
    /// Resolved media type, empty until [`Req::resolve_content_type`] runs.
    pub content_type: String,
    /// Values passed forward from middleware to later middleware and the handler.
    pub context: Context,
    log: Mutex<Vec<String>>,
    status: StatusRecorder,
}

impl Req {
    pub fn new(parts: http::request::Parts, body: Bytes, params: Params) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params,
            content_type: String::new(),
            context: Context::new(),
            log: Mutex::new(Vec::new()),
            status: StatusRecorder::default(),
        }
    }

    /// Wraps a plain `http::Request` with no path variables.
    pub fn from_http(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts, body, Params::new())
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// A path variable by its bare name: `param("id")` for a `{id}` segment.
    pub fn param(&self, name: &str) -> Option<&str> {
        let values = self.params.path.get_all(&format!(":{name}"));
        values.first().map(String::as_str)
    }

    /// Sniffs, stores and returns the media type from `Content-Type`.
    pub fn resolve_content_type(&mut self) -> &str {
        self.content_type = resolve_content_type(self.header("content-type"));
        &self.content_type
    }

    /// Fills [`Req::params`] from the query string and body.
    pub async fn parse_params(&mut self, options: &Options) -> Result<(), ParamsError> {
        if self.content_type.is_empty() {
            self.resolve_content_type();
        }
        let header = self
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        self.params
            .parse(
                self.uri.query(),
                &self.content_type,
                header.as_deref(),
                self.body.clone(),
                options,
            )
            .await
    }

    /// The raw body, for handlers that decode it themselves.
    pub fn json_body(&self) -> &[u8] {
        &self.body
    }

    /// Decodes the JSON body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// The form values as a JSON object of arrays.
    pub fn json_form(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.params.form)
    }

    /// Appends a line to the diagnostic log. Callable through `&self`.
    pub fn add_log(&self, line: impl Into<String>) {
        self.log.lock().push(line.into());
    }

    pub fn logs(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Status the endpoint answered with, `0` until the response is built.
    ///
    /// Middleware and the handler always see `0`. Work that keeps the
    /// request past the response, such as a task spawned by the handler,
    /// reads the final status here. The same value is recorded as the
    /// `status` field of the request span.
    pub fn response_status(&self) -> u16 {
        self.status.get()
    }

    pub(crate) fn status_recorder(&self) -> StatusRecorder {
        self.status.clone()
    }
}

/// Remembers the first response status written for a request.
#[derive(Clone, Debug, Default)]
pub(crate) struct StatusRecorder(Arc<AtomicU16>);

impl StatusRecorder {
    /// Records `status` unless one was recorded already.
    pub(crate) fn record(&self, status: u16) {
        let _ = self.0.compare_exchange(0, status, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn get(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }
}
