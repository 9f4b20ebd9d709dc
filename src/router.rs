//! Native radix-tree router backend.
//!
//! One matchit tree per HTTP method, O(path-length) lookup. The router knows
//! nothing about endpoints or middleware: an [`Api`](crate::Api) fills it
//! through [`Backend::Native`](crate::Backend::Native) and each stored route
//! is a closure that runs the endpoint pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::endpoint::PathVars;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::response::{IntoResponse, Response};

/// A registered route: request head, collected body and path variables in,
/// response out.
pub(crate) type RouteFn =
    Arc<dyn Fn(http::request::Parts, Bytes, PathVars) -> BoxFuture + Send + Sync + 'static>;

/// The native application router.
///
/// Build it once, [`activate`](crate::Api::activate) an api against it, then
/// pass it to [`Server::serve`](crate::Server::serve) or drive it directly
/// with [`Router::handle`].
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<RouteFn>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        method: Method,
        path: &str,
        route: RouteFn,
    ) -> Result<(), matchit::InsertError> {
        self.routes.entry(method).or_default().insert(path, route)
    }

    /// Methods with a route matching `path`, in no particular order.
    pub fn allowed(&self, path: &str) -> Vec<Method> {
        self.routes
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.clone())
            .collect()
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(RouteFn, PathVars)> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        let vars = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((Arc::clone(matched.value), vars))
    }

    /// Routes and serves one request.
    ///
    /// Unknown paths answer `404`; known paths under another method answer
    /// `405` with an `Allow` header. Both carry a JSON-API error body.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(error = %e, "failed to read request body");
                return Error::new(400, "unreadable request body")
                    .with_detail(e.to_string())
                    .into_response()
                    .into_http();
            }
        };

        let path = parts.uri.path().to_owned();
        let response = match self.lookup(&parts.method, &path) {
            Some((route, vars)) => route(parts, body, vars).await,
            None => self.unmatched(&parts.method, &path),
        };
        response.into_http()
    }

    fn unmatched(&self, method: &Method, path: &str) -> Response {
        let allowed = self.allowed(path);
        if allowed.is_empty() {
            return Error::new(404, "not found").with_detail(path).into_response();
        }

        let mut allow: Vec<&str> = allowed.iter().map(Method::as_str).collect();
        allow.sort_unstable();
        let mut res = Error::new(405, "method not allowed")
            .with_detail(format!("{method} {path}"))
            .into_response();
        res.headers.push(("allow".to_owned(), allow.join(", ")));
        res
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    fn echo_route() -> RouteFn {
        Arc::new(|parts: http::request::Parts, body: Bytes, vars: PathVars| -> BoxFuture {
            Box::pin(async move {
                let id = vars.first().map(|(_, v)| v.clone()).unwrap_or_default();
                Response::text(format!("{} {} {}", parts.method, id, body.len()))
            })
        })
    }

    fn request(method: Method, uri: &str, body: &'static str) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    #[tokio::test]
    async fn routes_by_method_and_path() {
        let mut router = Router::new();
        router.insert(Method::PUT, "/pets/{id}", echo_route()).unwrap();

        let res = router.handle(request(Method::PUT, "/pets/abc", "12345")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"PUT abc 5");
    }

    #[tokio::test]
    async fn unknown_path_is_404_json() {
        let router = Router::new();
        let res = router.handle(request(Method::GET, "/nope", "")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers()["content-type"], "application/json");
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let mut router = Router::new();
        router.insert(Method::GET, "/pets", echo_route()).unwrap();
        router.insert(Method::POST, "/pets", echo_route()).unwrap();

        let res = router.handle(request(Method::DELETE, "/pets", "")).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()["allow"], "GET, POST");
    }

    #[test]
    fn conflicting_insert_fails() {
        let mut router = Router::new();
        router.insert(Method::GET, "/pets/{id}", echo_route()).unwrap();
        assert!(router.insert(Method::GET, "/pets/{id}", echo_route()).is_err());
    }
}
