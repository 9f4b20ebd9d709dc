//! # apiary
//!
//! A small HTTP API toolkit. Register endpoints (verb + path + middleware +
//! handler), activate them on a router backend, and every request gets the
//! same treatment:
//!
//! 1. parameters from the query string, form or multipart body and path
//!    variables merged into one [`Params`] view,
//! 2. a middleware [`Chain`] that may halt with an [`Error`],
//! 3. the handler,
//! 4. panics contained to the request and answered with `500`.
//!
//! Every failure is answered with a JSON-API error document:
//!
//! ```json
//! {"errors":[{"status":"401","title":"not authenticated"}]}
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use apiary::{Api, Backend, Chain, Error, Options, Req, Response, Router, Server};
//!
//! fn auth(req: &mut Req) -> Result<(), Error> {
//!     match req.header("authorization") {
//!         Some(_) => Ok(()),
//!         None => Err(Error::new(401, "not authenticated")),
//!     }
//! }
//!
//! async fn get_pet(req: Req) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut api = Api::new(Options::new().base_path("/v1"));
//!     api.register("GET", "/pets/{id}", Chain::new().with(auth), get_pet)?;
//!
//!     let mut router = Router::new();
//!     api.activate(Backend::Native(&mut router))?;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(router).await?;
//!     Ok(())
//! }
//! ```

mod adapter;
mod api;
mod context;
mod endpoint;
mod error;
mod handler;
mod options;
mod params;
mod request;
mod response;
mod router;
mod server;
mod values;

pub mod middleware;

pub use adapter::{AdapterError, AnyRouter, Backend, BackendKind};
pub use api::Api;
pub use context::{Context, Value};
pub use endpoint::{Endpoint, PathVars};
pub use error::{BoxError, Error, Errors};
pub use handler::Handler;
pub use middleware::{Chain, Middleware};
pub use options::{DEFAULT_MAX_MEMORY, Options};
pub use params::{
    DEFAULT_CONTENT_TYPE, FORM_URLENCODED, FileData, FileField, MULTIPART_FORM_DATA, Params,
    ParamsError, Spill, resolve_content_type,
};
pub use request::Req;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{ServeError, Server};
pub use values::Values;

pub use http::{Method, StatusCode};
