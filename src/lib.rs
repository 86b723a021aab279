//! A minimal asynchronous HTTP/1.x connection engine: an incremental
//! request parser driven by a per-connection worker, supporting
//! pipelining, idle timeouts, and a small handler container.
//!
//! The public surface is deliberately small: construct a
//! [`config::ServerConfig`], build a [`container::Container`] around it
//! and a handler closure, `start()` it, and `stop()` it when done. See
//! `src/main.rs` for a complete example.

pub mod config;
pub mod container;
pub mod engine;
pub mod exceptions;
pub mod http;
pub mod net;

pub use config::ServerConfig;
pub use container::{Container, Handler, HandlerFuture};
pub use exceptions::{HandlerError, HttpException};
pub use http::headers::HeaderMap;
pub use http::request::Request;
