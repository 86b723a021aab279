//! Error types a handler can return.
//!
//! The engine replaces the ambient "raise anything" exception machinery of
//! the system it is modeled on with a small sum type: a named
//! [`HttpException`] that a handler obtains from
//! [`Container::create_exception`](crate::container::Container::create_exception),
//! and a catch-all for any other error. Both are converted to a 500
//! response by the worker; neither ever reaches the transport directly.

use std::error::Error;
use std::fmt;

/// The library's named HTTP error kind. A handler raises one of these
/// (by returning `Err(HandlerError::Http(exc))`) to signal a request
/// failure with a specific message.
#[derive(Debug, Clone)]
pub struct HttpException {
    message: String,
}

impl HttpException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HttpException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for HttpException {}

/// What a handler may fail with. Both variants are converted to a 500
/// response by [`crate::engine`]; see its module docs for the exact body
/// text each one produces.
pub enum HandlerError {
    Http(HttpException),
    Other {
        type_name: &'static str,
        message: String,
    },
}

impl HandlerError {
    /// Wraps any other error, capturing its type name the way the
    /// original `type(exc)` diagnostic did.
    pub fn other<E: Error>(err: E) -> Self {
        HandlerError::Other {
            type_name: std::any::type_name::<E>(),
            message: err.to_string(),
        }
    }
}

impl From<HttpException> for HandlerError {
    fn from(exc: HttpException) -> Self {
        HandlerError::Http(exc)
    }
}
