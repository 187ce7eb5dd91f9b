//! Reverse proxy adapter: pooled upstream client and request forwarding.

pub mod client;
pub mod forwarding;

pub use client::{create_http_client, HttpClient};
pub use forwarding::forward;
