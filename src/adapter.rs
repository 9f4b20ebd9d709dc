//! Router backends.
//!
//! An [`Api`](crate::Api) can be activated against any backend listed in
//! [`Backend`]. The set is closed: adding a backend means adding a variant,
//! and every `match` below must handle it.
//!
//! | Backend | Router type | Serve with |
//! |---|---|---|
//! | [`Backend::Native`] | [`Router`] | [`Server::serve`](crate::Server::serve) |
//! | [`Backend::Axum`] | [`axum::Router`] | `axum::serve` or any tower stack |

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;

use axum::extract::RawPathParams;
use axum::extract::rejection::RawPathParamsRejection;
use axum::routing::MethodFilter;
use http::Method;
use tracing::{debug, warn};

use crate::endpoint::{PathVars, panic_message};
use crate::error::Error;
use crate::response::IntoResponse;
use crate::router::{RouteFn, Router};

/// Activation failures. Raised before any request is served.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unsupported router backend `{0}` (expected `native` or `axum`)")]
    UnsupportedBackend(String),
    #[error("invalid http method `{0}`")]
    InvalidMethod(String),
    #[error("{backend} backend cannot route method {method}")]
    UnsupportedMethod { backend: BackendKind, method: Method },
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("route {method} {path} conflicts with an existing route: {reason}")]
    Conflict { method: Method, path: String, reason: String },
}

/// Backend selector, parsed from configuration (`"native"`, `"axum"`).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BackendKind {
    Native,
    Axum,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Axum => "axum",
        }
    }
}

impl FromStr for BackendKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "matchit" => Ok(Self::Native),
            "axum" => Ok(Self::Axum),
            _ => Err(AdapterError::UnsupportedBackend(s.to_owned())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutable handle on one concrete router, the target of
/// [`Api::activate`](crate::Api::activate).
pub enum Backend<'a> {
    Native(&'a mut Router),
    Axum(&'a mut axum::Router),
}

impl Backend<'_> {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Native(_) => BackendKind::Native,
            Self::Axum(_) => BackendKind::Axum,
        }
    }

    /// Rejects what the backend would refuse, before anything is registered.
    pub(crate) fn check(&self, method: &Method, path: &str) -> Result<(), AdapterError> {
        match self {
            Self::Native(_) => Ok(()),
            Self::Axum(_) => {
                if MethodFilter::try_from(method.clone()).is_err() {
                    return Err(AdapterError::UnsupportedMethod {
                        backend: BackendKind::Axum,
                        method: method.clone(),
                    });
                }
                if path.split('/').any(|seg| seg.starts_with(':') || seg.starts_with('*')) {
                    return Err(AdapterError::InvalidPath {
                        path: path.to_owned(),
                        reason: "axum expects `{name}` captures, not `:name` or `*name`".to_owned(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Registers `route` for `method` + `path` in the backend's own idiom.
    pub(crate) fn register(
        &mut self,
        method: &Method,
        path: &str,
        route: RouteFn,
    ) -> Result<(), AdapterError> {
        debug!(backend = %self.kind(), %method, path, "registering route");
        match self {
            Self::Native(router) => {
                router
                    .insert(method.clone(), path, route)
                    .map_err(|e| AdapterError::Conflict {
                        method: method.clone(),
                        path: path.to_owned(),
                        reason: e.to_string(),
                    })
            }
            Self::Axum(router) => {
                let filter = MethodFilter::try_from(method.clone()).map_err(|_| {
                    AdapterError::UnsupportedMethod {
                        backend: BackendKind::Axum,
                        method: method.clone(),
                    }
                })?;
                let handler = move |vars: Result<RawPathParams, RawPathParamsRejection>,
                                    req: axum::extract::Request| {
                    let route = route.clone();
                    async move {
                        let vars: PathVars = match vars {
                            Ok(vars) => vars.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect(),
                            Err(rejection) => {
                                return Error::new(400, "invalid path parameters")
                                    .with_detail(rejection.body_text())
                                    .into_response()
                                    .into_http();
                            }
                        };
                        let (parts, body) = req.into_parts();
                        match axum::body::to_bytes(body, usize::MAX).await {
                            Ok(body) => route(parts, body, vars).await.into_http(),
                            Err(e) => Error::new(400, "unreadable request body")
                                .with_detail(e.to_string())
                                .into_response()
                                .into_http(),
                        }
                    }
                };
                // axum panics on overlapping routes; the router is only
                // replaced once `route` returned.
                let current = (**router).clone();
                let next = std::panic::catch_unwind(AssertUnwindSafe(move || {
                    current.route(path, axum::routing::on(filter, handler))
                }));
                match next {
                    Ok(next) => {
                        **router = next;
                        Ok(())
                    }
                    Err(panic) => Err(AdapterError::Conflict {
                        method: method.clone(),
                        path: path.to_owned(),
                        reason: panic_message(&*panic),
                    }),
                }
            }
        }
    }
}

/// A copy of a backend's routes taken before activation touches it.
pub(crate) enum Snapshot {
    Native(Router),
    Axum(axum::Router),
}

impl Backend<'_> {
    pub(crate) fn snapshot(&self) -> Snapshot {
        match self {
            Self::Native(router) => Snapshot::Native((**router).clone()),
            Self::Axum(router) => Snapshot::Axum((**router).clone()),
        }
    }

    /// Puts back the routes captured by [`Backend::snapshot`].
    pub(crate) fn restore(&mut self, snapshot: Snapshot) {
        match (self, snapshot) {
            (Self::Native(router), Snapshot::Native(prev)) => **router = prev,
            (Self::Axum(router), Snapshot::Axum(prev)) => **router = prev,
            (backend, _) => warn!(backend = %backend.kind(), "snapshot from another backend ignored"),
        }
    }
}

/// An owned router of a configured kind.
///
/// ```rust
/// use apiary::{AnyRouter, Api, Options};
///
/// let kind = "axum".parse().unwrap();
/// let mut router = AnyRouter::new(kind);
/// Api::new(Options::default()).activate(router.as_backend()).unwrap();
/// ```
pub enum AnyRouter {
    Native(Router),
    Axum(axum::Router),
}

impl AnyRouter {
    pub fn new(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Native => Self::Native(Router::new()),
            BackendKind::Axum => Self::Axum(axum::Router::new()),
        }
    }

    pub fn as_backend(&mut self) -> Backend<'_> {
        match self {
            Self::Native(r) => Backend::Native(r),
            Self::Axum(r) => Backend::Axum(r),
        }
    }
}
