//! JSON-API error objects.
//!
//! Every request-time failure is reported to the client as a
//! `{"errors":[…]}` document (see <https://jsonapi.org/format/#errors>).
//! Lower layers return an [`Error`]; only the endpoint renders it.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::response::{IntoResponse, Response};

/// Boxed error accepted by [`Error::wrap`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single JSON-API error object.
///
/// `status` is kept as a string, as the format prescribes. Empty fields are
/// left out of the serialized document. The captured backtrace is for logs
/// only and is never serialized.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Error {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub href: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip)]
    pub backtrace: Option<Arc<Backtrace>>,
}

impl Error {
    /// Creates an error and captures a backtrace (honours `RUST_BACKTRACE`).
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            title: title.into(),
            backtrace: Some(Arc::new(Backtrace::capture())),
            ..Self::default()
        }
    }

    /// An error without a status. It renders as `500`.
    pub fn unset(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            backtrace: Some(Arc::new(Backtrace::capture())),
            ..Self::default()
        }
    }

    /// Converts any error into an [`Error`] carrying `status`.
    ///
    /// An [`Error`] keeps every field except its status, which is replaced.
    /// Anything else becomes a fresh error titled with its message.
    pub fn wrap(err: impl Into<BoxError>, status: u16) -> Self {
        match err.into().downcast::<Error>() {
            Ok(e) => (*e).with_status(status),
            Err(other) => Self::new(status, other.to_string()),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = href.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// The status as an integer, `0` when it does not parse.
    pub fn http_status(&self) -> u16 {
        self.status.parse().unwrap_or(0)
    }

    /// The `{"errors":[…]}` document for this error alone.
    pub fn http_body(&self) -> String {
        Errors { errors: vec![self.clone()] }.http_body()
    }

    /// Stacks `other` after `self`.
    pub fn add(self, other: Error) -> Errors {
        Errors { errors: vec![self, other] }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() {
            write!(f, "({}) {}", self.status, self.title)
        } else {
            write!(f, "[{}] ({}) {}", self.code, self.status, self.title)
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error_response(self.http_status(), self.http_body())
    }
}

/// An ordered stack of errors. The last one decides the HTTP status.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Errors {
    pub errors: Vec<Error>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, e: Error) {
        self.errors.push(e);
    }

    /// Appends `e` and returns the stack for chaining.
    pub fn add(mut self, e: Error) -> Self {
        self.errors.push(e);
        self
    }

    pub fn last(&self) -> Option<&Error> {
        self.errors.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.errors.iter()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Status of the most recently added error; `0` for an empty stack.
    pub fn http_status(&self) -> u16 {
        self.last().map_or(0, Error::http_status)
    }

    pub fn http_body(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<Error> for Errors {
    fn from(e: Error) -> Self {
        Self { errors: vec![e] }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(last) = self.last() else {
            return Ok(());
        };
        match self.errors.len() {
            1 => write!(f, "{last}"),
            2 => write!(f, "{last}, and 1 more error"),
            n => write!(f, "{last}, and {} more errors", n - 1),
        }
    }
}

impl std::error::Error for Errors {}

impl IntoResponse for Errors {
    fn into_response(self) -> Response {
        error_response(self.http_status(), self.http_body())
    }
}

fn error_response(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::builder().status(status).json(body.into_bytes())
}
