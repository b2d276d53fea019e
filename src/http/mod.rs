//! HTTP module
//!
//! Request/response types, the executor abstraction the engine depends on,
//! and a reqwest-backed executor.

mod client;
mod executor;
mod request;
mod response;

pub use client::{HttpClient, HttpOptions};
pub use executor::Executor;
pub use request::{Request, RequestBuilder};
pub use response::Response;
