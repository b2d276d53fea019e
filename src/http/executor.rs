//! Request executor abstraction
//!
//! The engine only talks to an [`Executor`]; the transport behind it
//! (HTTP/1.1, HTTP/2, proxied) is the implementation's business.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Request, Response};
use crate::error::ExecutorError;

/// Sends one materialized request
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute the request. An `Err` is a transport failure, never a
    /// valid response with an unexpected status code.
    async fn send(&self, request: &Request) -> Result<Response, ExecutorError>;
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for Arc<E> {
    async fn send(&self, request: &Request) -> Result<Response, ExecutorError> {
        (**self).send(request).await
    }
}
