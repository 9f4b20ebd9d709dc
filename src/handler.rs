//! Handlers: the last step of an endpoint.
//!
//! A handler is an async function taking the [`Req`] by value. Each one has
//! its own closure and future types, so an [`Endpoint`](crate::Endpoint)
//! stores it as a [`BoxedHandler`] and pays one virtual call plus one boxed
//! future per request. The conversion happens once, in `Endpoint::new`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Req;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future that resolves to a [`Response`].
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Object-safe face of a handler. Public only because [`Handler`] names it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Req) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Any `Fn(Req) -> impl Future<Output = impl IntoResponse>`.
///
/// Sealed; the blanket impl is the only one.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(AsyncFnHandler(self))
    }
}

struct AsyncFnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for AsyncFnHandler<F>
where
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Req) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
