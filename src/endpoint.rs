//! Endpoint: one verb + path bound to a middleware chain and a handler.
//!
//! # Dispatch
//!
//! ```text
//! RECEIVED ─► PARAMS_RESOLVED ─► CHAIN_RUNNING ─► HANDLER_DISPATCHED
//!     │              │                 │
//!     └──────────────┴─────────────────┴──► FAILED (error rendered, stop)
//! ```
//!
//! Parameter errors answer `400`. A halting middleware answers with its own
//! error. A panic anywhere in the pipeline answers `500` and is contained to
//! the request. Multipart spill files are removed on every one of these
//! paths.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use http::Method;
use tracing::{Instrument, debug, error, info_span};

use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{Chain, ChainOutcome, Middleware, run_units};
use crate::options::Options;
use crate::params::{Params, Spill};
use crate::request::Req;
use crate::response::{IntoResponse, Response};

/// Path variables as matched by a router backend, in path order.
pub type PathVars = Vec<(String, String)>;

/// Api-wide state every endpoint dispatch reads.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) defaults: Chain,
    pub(crate) options: Options,
}

/// An API endpoint.
///
/// Immutable once handed to an [`Api`](crate::Api); many requests are
/// dispatched through the same instance concurrently.
pub struct Endpoint {
    pub verb: Method,
    pub path: String,
    pub middleware: Chain,
    handler: BoxedHandler,
}

impl Endpoint {
    pub fn new(verb: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            verb,
            path: path.into(),
            middleware: Chain::new(),
            handler: handler.into_boxed_handler(),
        }
    }

    /// Appends `mw` to this endpoint's chain. Returns `self` for chaining.
    pub fn with(mut self, mw: impl Middleware) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn use_middleware(&mut self, mw: impl Middleware) {
        self.middleware.push(mw);
    }

    /// Runs the dispatch pipeline for one request.
    pub(crate) async fn dispatch(
        self: Arc<Self>,
        shared: Arc<Shared>,
        parts: http::request::Parts,
        body: Bytes,
        vars: PathVars,
    ) -> Response {
        let params = Params::with_path_vars(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let req = Req::new(parts, body, params);
        let recorder = req.status_recorder();
        let span = info_span!(
            "request",
            id = %req.id,
            method = %req.method,
            path = %req.path(),
            status = tracing::field::Empty,
        );

        // Spill files handed over before the handler runs. Removed here, once
        // the request is answered, whatever the handler did with `req`.
        let mut spill = Spill::default();

        let pipeline = AssertUnwindSafe(self.pipeline(&shared, req, &mut spill)).catch_unwind();
        let response = match pipeline.instrument(span.clone()).await {
            Ok(res) => res,
            Err(panic) => {
                let _enter = span.enter();
                error!(panic = %panic_message(&*panic), "handler panicked");
                Error::new(500, "internal server error").into_response()
            }
        };

        // Failures are logged per file by the guard.
        let _ = spill.cleanup();

        let status = response.status_code().as_u16();
        recorder.record(status);
        span.record("status", status);
        span.in_scope(|| debug!("request completed"));
        response
    }

    async fn pipeline(&self, shared: &Shared, mut req: Req, spill: &mut Spill) -> Response {
        if let Err(e) = req.parse_params(&shared.options).await {
            let err = Error::wrap(e, 400);
            req.add_log(format!("error parsing request params: {err}"));
            debug!(%err, "rejecting request with unreadable params");
            release(&mut req);
            return err.into_response();
        }

        let units = shared.defaults.iter().chain(self.middleware.iter());
        if let ChainOutcome::Halted { error, .. } = run_units(units, &mut req) {
            release(&mut req);
            return error.into_response();
        }

        *spill = req.params.take_spill();
        self.handler.call(req).await
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

fn release(req: &mut Req) {
    if let Err(e) = req.params.cleanup() {
        req.add_log(format!("error removing spill files: {e}"));
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
