//! The single delivery contract the outbox depends on.

use crate::error::TransportError;
use crate::response::UserResponse;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Delivers one response to the backend.
///
/// Implementations resolve with the server-assigned id, or fail. They must not
/// retry internally; retries, backoff and dead-lettering belong to the outbox.
/// Timeouts are the transport's job: a call that never resolves keeps the
/// entry in `Sending`.
#[async_trait]
pub trait ResponseTransport: Send + Sync {
    async fn submit(&self, response: &UserResponse) -> Result<String, TransportError>;
}

/// Adapter turning an async closure into a [`ResponseTransport`].
pub struct FnTransport<F> {
    submit_fn: F,
}

#[async_trait]
impl<F, Fut> ResponseTransport for FnTransport<F>
where
    F: Fn(UserResponse) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, TransportError>> + Send,
{
    async fn submit(&self, response: &UserResponse) -> Result<String, TransportError> {
        (self.submit_fn)(response.clone()).await
    }
}

/// Wrap `submit_fn` as a shareable transport.
pub fn transport_fn<F, Fut>(submit_fn: F) -> Arc<dyn ResponseTransport>
where
    F: Fn(UserResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, TransportError>> + Send + 'static,
{
    Arc::new(FnTransport { submit_fn })
}
