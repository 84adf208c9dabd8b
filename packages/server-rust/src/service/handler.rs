//! Route handler trait.

use std::future::Future;

use async_trait::async_trait;

use super::request::TcpRequest;
use super::response::TcpResponse;

/// Handles requests for one registered route.
///
/// A handler replies through `res`. Returning `Err` before replying makes
/// the dispatcher send a 500 carrying the error text.
///
/// Async closures implement this trait directly:
///
/// ```
/// use hashwire_server::service::{RouteHandler, TcpRequest, TcpResponse};
/// use serde_json::json;
///
/// fn assert_handler<H: RouteHandler>(_: H) {}
///
/// assert_handler(|_req: TcpRequest, res: TcpResponse| async move {
///     res.json(json!({"permissions": ["VIEW_ONLY"]}));
///     anyhow::Ok(())
/// });
/// ```
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    /// # Errors
    ///
    /// Any error is reported to the caller as a status-500 reply.
    async fn handle(&self, req: TcpRequest, res: TcpResponse) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(TcpRequest, TcpResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, req: TcpRequest, res: TcpResponse) -> anyhow::Result<()> {
        (self)(req, res).await
    }
}
