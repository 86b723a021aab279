//! The immutable view of one parsed HTTP request handed to user handlers.

use std::cell::RefCell;

use async_std::channel::Receiver;

use crate::http::headers::HeaderMap;

/// The one-shot completion token for a request body.
///
/// The parser resolves it exactly once, at `on_message_complete`, with the
/// accumulated body bytes (or an empty vector if the message had none). A
/// handler normally awaits it exactly once via [`Request::body`], but a
/// second call is safe and idempotent: the bytes are cached after the
/// first successful receive.
pub struct BodyFuture {
    receiver: Receiver<Vec<u8>>,
    cached: RefCell<Option<Vec<u8>>>,
}

impl BodyFuture {
    pub(crate) fn new(receiver: Receiver<Vec<u8>>) -> Self {
        Self {
            receiver,
            cached: RefCell::new(None),
        }
    }

    /// Waits for the body to be complete and returns its bytes.
    pub async fn get(&self) -> Vec<u8> {
        if let Some(body) = self.cached.borrow().as_ref() {
            return body.clone();
        }
        let body = self.receiver.recv().await.unwrap_or_default();
        *self.cached.borrow_mut() = Some(body.clone());
        body
    }
}

/// A single parsed HTTP/1.x request.
pub struct Request {
    headers: HeaderMap,
    http_version: String,
    keep_alive: bool,
    body: BodyFuture,
}

impl Request {
    pub(crate) fn new(
        headers: HeaderMap,
        http_version: String,
        keep_alive: bool,
        body: BodyFuture,
    ) -> Self {
        Self {
            headers,
            http_version,
            keep_alive,
            body,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn http_version(&self) -> &str {
        &self.http_version
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Awaits the full request body. Resolves as soon as the parser has
    /// seen the message-complete event for this request, which for a
    /// pipelined request may already have happened by the time a handler
    /// calls this.
    pub async fn body(&self) -> Vec<u8> {
        self.body.get().await
    }
}
