//! Middleware layer.
//!
//! A middleware is a named unit that inspects and mutates the [`Req`] before
//! the handler sees it. Units run one after another, synchronously; the first
//! one to return an error halts the chain and that error becomes the
//! response. Units hold no per-request state: anything a later unit or the
//! handler needs goes into [`Req::context`].
//!
//! Plain functions and closures are middleware:
//!
//! ```rust
//! use apiary::{Error, Req};
//!
//! fn auth(req: &mut Req) -> Result<(), Error> {
//!     if req.context.has("userID") {
//!         Ok(())
//!     } else {
//!         Err(Error::new(401, "not authenticated"))
//!     }
//! }
//! ```
//!
//! Built-ins:
//! - [`RequireParams`]: `400` when required params are missing
//! - [`Deadline`]: `408` once the request's `deadline` context value passed

mod deadline;
mod require;

use std::sync::Arc;

use tracing::warn;

use crate::error::Error;
use crate::request::Req;

pub use deadline::{DEADLINE_KEY, Deadline};
pub use require::RequireParams;

/// A unit of the middleware chain.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs when this unit halts a chain.
    fn name(&self) -> &str;

    fn run(&self, req: &mut Req) -> Result<(), Error>;
}

/// Any `fn(&mut Req) -> Result<(), Error>` is a middleware named after its type.
impl<F> Middleware for F
where
    F: Fn(&mut Req) -> Result<(), Error> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        std::any::type_name::<F>()
    }

    fn run(&self, req: &mut Req) -> Result<(), Error> {
        self(req)
    }
}

/// A closure with an explicit name. Build it with [`from_fn`].
pub struct Named<F> {
    name: String,
    f: F,
}

impl<F> Middleware for Named<F>
where
    F: Fn(&mut Req) -> Result<(), Error> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, req: &mut Req) -> Result<(), Error> {
        (self.f)(req)
    }
}

pub fn from_fn<F>(name: impl Into<String>, f: F) -> Named<F>
where
    F: Fn(&mut Req) -> Result<(), Error> + Send + Sync + 'static,
{
    Named { name: name.into(), f }
}

/// Shared, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// How a chain run ended.
#[derive(Debug)]
pub enum ChainOutcome {
    Completed,
    Halted { index: usize, name: String, error: Error },
}

/// An ordered list of middleware.
#[derive(Clone, Default)]
pub struct Chain {
    units: Vec<BoxedMiddleware>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `mw` and returns the chain, for inline construction.
    pub fn with(mut self, mw: impl Middleware) -> Self {
        self.push(mw);
        self
    }

    pub fn push(&mut self, mw: impl Middleware) {
        self.units.push(Arc::new(mw));
    }

    pub fn push_boxed(&mut self, mw: BoxedMiddleware) {
        self.units.push(mw);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, BoxedMiddleware> {
        self.units.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|m| m.name())
    }

    /// Runs every unit in order, stopping at the first error.
    pub fn run(&self, req: &mut Req) -> ChainOutcome {
        run_units(self.units.iter(), req)
    }
}

/// Runs `units` in order against `req`; shared by [`Chain`] and the endpoint,
/// which runs the api-wide defaults and its own units as one sequence.
pub(crate) fn run_units<'a>(
    units: impl Iterator<Item = &'a BoxedMiddleware>,
    req: &mut Req,
) -> ChainOutcome {
    for (index, mw) in units.enumerate() {
        if let Err(error) = mw.run(req) {
            let name = mw.name().to_owned();
            warn!(request_id = %req.id, middleware = %name, %error, "middleware halted the chain");
            req.add_log(format!("middleware {name} failed: {error}"));
            return ChainOutcome::Halted { index, name, error };
        }
    }
    ChainOutcome::Completed
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;

    fn req() -> Req {
        Req::from_http(http::Request::new(Bytes::new()))
    }

    fn login(req: &mut Req) -> Result<(), Error> {
        req.context.set("userID", "1");
        Ok(())
    }

    fn auth(req: &mut Req) -> Result<(), Error> {
        if req.context.has("userid") {
            Ok(())
        } else {
            Err(Error::new(401, "not authenticated"))
        }
    }

    #[test]
    fn fn_middleware_is_named_after_its_type() {
        assert!(Middleware::name(&login).ends_with("login"));
        assert_eq!(from_fn("custom", auth).name(), "custom");
    }

    #[test]
    fn context_flows_forward() {
        let mut chain = Chain::new();
        chain.push(login);
        chain.push(auth);
        let mut r = req();
        assert!(matches!(chain.run(&mut r), ChainOutcome::Completed));
        assert_eq!(r.context.get_str("userID"), Some("1"));
    }

    #[test]
    fn first_error_halts() {
        static LATER: AtomicUsize = AtomicUsize::new(0);

        let mut chain = Chain::new();
        chain.push(auth);
        chain.push(|_: &mut Req| {
            LATER.fetch_add(1, Ordering::SeqCst);
            Ok::<(), Error>(())
        });

        let mut r = req();
        match chain.run(&mut r) {
            ChainOutcome::Halted { index, error, .. } => {
                assert_eq!(index, 0);
                assert_eq!(error.http_status(), 401);
                assert_eq!(error.title, "not authenticated");
            }
            ChainOutcome::Completed => panic!("chain should halt"),
        }
        assert_eq!(LATER.load(Ordering::SeqCst), 0);
        assert_eq!(r.logs().len(), 1);
    }

    #[test]
    fn empty_chain_completes() {
        assert!(matches!(Chain::new().run(&mut req()), ChainOutcome::Completed));
    }
}
