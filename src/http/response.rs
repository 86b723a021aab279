//! Wire-format serialization of the worker's response, bit-exact to the
//! contract: `HTTP/<version> <code> OK`, a `Content-Type` and a
//! `Content-Length` header, and nothing else. The reason phrase is the
//! literal `OK` on every status line, including 500 — preserved from the
//! observed behavior of the system this crate is modeled on.

use crate::http::status::HttpStatus;

pub struct HttpResponse {
    pub status: HttpStatus,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: HttpStatus, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Serializes the response for `http_version` (`"1.0"` or `"1.1"`) as
    /// the exact bytes that go out on the wire.
    pub fn to_bytes(&self, http_version: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(
            format!(
                "HTTP/{} {} OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                http_version,
                self.status.code(),
                self.body.len(),
            )
            .as_bytes(),
        );
        out.extend_from_slice(&self.body);
        out
    }
}
