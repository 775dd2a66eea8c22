//! The running proxy: configuration, backend client, request pipeline, and
//! HTTP surface that together implement the dialect-translating gateway.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod retry;
pub mod stream_processor;

pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use http::build_router;
