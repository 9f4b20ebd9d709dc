//! Endpoint registry and activation.

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::{info, warn};

use crate::adapter::{AdapterError, Backend};
use crate::endpoint::{Endpoint, PathVars, Shared};
use crate::handler::{BoxFuture, Handler};
use crate::middleware::{Chain, Middleware};
use crate::options::Options;
use crate::response::Response;
use crate::router::RouteFn;

/// A set of endpoints plus the middleware every one of them runs first.
///
/// ```rust
/// use apiary::{Api, Chain, Error, Options, Req, Router, Backend};
///
/// fn auth(req: &mut Req) -> Result<(), Error> {
///     match req.header("authorization") {
///         Some(_) => Ok(()),
///         None => Err(Error::new(401, "not authenticated")),
///     }
/// }
///
/// async fn list_pets(_req: Req) -> &'static str { "[]" }
///
/// let mut api = Api::new(Options::new().base_path("/v1"));
/// api.register("GET", "/pets", Chain::new().with(auth), list_pets).unwrap();
///
/// let mut router = Router::new();
/// api.activate(Backend::Native(&mut router)).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct Api {
    options: Options,
    defaults: Chain,
    endpoints: Vec<Arc<Endpoint>>,
}

impl Api {
    pub fn new(options: Options) -> Self {
        Self { options, defaults: Chain::new(), endpoints: Vec::new() }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().map(|e| &**e)
    }

    /// Appends `mw` to the chain run before every endpoint's own middleware.
    pub fn use_middleware(&mut self, mw: impl Middleware) -> &mut Self {
        self.defaults.push(mw);
        self
    }

    pub fn add(&mut self, endpoint: Endpoint) -> &mut Self {
        self.endpoints.push(Arc::new(endpoint));
        self
    }

    /// Registers `handler` for `verb` + `path` behind `middleware`.
    ///
    /// `verb` is case-insensitive. Path captures use `{name}`.
    pub fn register(
        &mut self,
        verb: &str,
        path: &str,
        middleware: Chain,
        handler: impl Handler,
    ) -> Result<&mut Self, AdapterError> {
        let verb = Method::from_bytes(verb.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| AdapterError::InvalidMethod(verb.to_owned()))?;
        let mut endpoint = Endpoint::new(verb, path, handler);
        endpoint.middleware = middleware;
        Ok(self.add(endpoint))
    }

    /// Registers every endpoint on `backend`.
    ///
    /// Each path gets one route per verb plus a synthetic `OPTIONS` route
    /// answering `204` with an `Allow` header, unless the api registers its
    /// own `OPTIONS` endpoint for that path.
    ///
    /// A failing activation registers nothing: the api's own paths are
    /// validated up front, and a clash with routes the backend already had
    /// puts the backend's previous routes back.
    pub fn activate(&self, mut backend: Backend<'_>) -> Result<(), AdapterError> {
        let groups = self.group_by_path();
        self.validate(&groups, &backend)?;

        let snapshot = backend.snapshot();
        if let Err(e) = self.register_all(&groups, &mut backend) {
            warn!(backend = %backend.kind(), error = %e, "activation failed, routes rolled back");
            backend.restore(snapshot);
            return Err(e);
        }

        info!(
            backend = %backend.kind(),
            endpoints = self.endpoints.len(),
            paths = groups.len(),
            "api activated"
        );
        Ok(())
    }

    fn register_all(
        &self,
        groups: &[(String, Vec<Arc<Endpoint>>)],
        backend: &mut Backend<'_>,
    ) -> Result<(), AdapterError> {
        let shared = Arc::new(Shared {
            defaults: self.defaults.clone(),
            options: self.options.clone(),
        });

        for (path, endpoints) in groups {
            let mut verbs: Vec<Method> = Vec::with_capacity(endpoints.len() + 1);
            for endpoint in endpoints {
                let route = endpoint_route(Arc::clone(endpoint), Arc::clone(&shared));
                backend.register(&endpoint.verb, path, route)?;
                verbs.push(endpoint.verb.clone());
            }
            if !verbs.contains(&Method::OPTIONS) {
                verbs.push(Method::OPTIONS);
                backend.register(&Method::OPTIONS, path, options_route(&verbs))?;
            }
        }
        Ok(())
    }

    /// Endpoints grouped by full path, in registration order.
    fn group_by_path(&self) -> Vec<(String, Vec<Arc<Endpoint>>)> {
        let mut groups: Vec<(String, Vec<Arc<Endpoint>>)> = Vec::new();
        for endpoint in &self.endpoints {
            let path = self.options.full_path(&endpoint.path);
            match groups.iter_mut().find(|(p, _)| *p == path) {
                Some((_, list)) => list.push(Arc::clone(endpoint)),
                None => groups.push((path, vec![Arc::clone(endpoint)])),
            }
        }
        groups
    }

    fn validate(
        &self,
        groups: &[(String, Vec<Arc<Endpoint>>)],
        backend: &Backend<'_>,
    ) -> Result<(), AdapterError> {
        // Both backends route with matchit; a scratch tree catches
        // overlapping paths before either backend is touched.
        let mut scratch = matchit::Router::new();
        for (path, endpoints) in groups {
            if !path.starts_with('/') {
                return Err(AdapterError::InvalidPath {
                    path: path.clone(),
                    reason: "paths must start with `/`".to_owned(),
                });
            }
            let first = &endpoints[0].verb;
            scratch.insert(path.as_str(), ()).map_err(|e| AdapterError::Conflict {
                method: first.clone(),
                path: path.clone(),
                reason: e.to_string(),
            })?;

            let mut seen: Vec<&Method> = Vec::new();
            for endpoint in endpoints {
                if seen.contains(&&endpoint.verb) {
                    return Err(AdapterError::Conflict {
                        method: endpoint.verb.clone(),
                        path: path.clone(),
                        reason: "registered twice".to_owned(),
                    });
                }
                seen.push(&endpoint.verb);
                backend.check(&endpoint.verb, path)?;
            }
        }
        Ok(())
    }
}

fn endpoint_route(endpoint: Arc<Endpoint>, shared: Arc<Shared>) -> RouteFn {
    Arc::new(move |parts: http::request::Parts, body: Bytes, vars: PathVars| -> BoxFuture {
        Box::pin(Arc::clone(&endpoint).dispatch(Arc::clone(&shared), parts, body, vars))
    })
}

fn options_route(verbs: &[Method]) -> RouteFn {
    let allow = verbs.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    Arc::new(move |_: http::request::Parts, _: Bytes, _: PathVars| -> BoxFuture {
        let res = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("allow", &allow)
            .no_body();
        Box::pin(async move { res })
    })
}
