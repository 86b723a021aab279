//! Owns the user-supplied handler and the listener's lifecycle.
//!
//! A [`Container`] is the library's only entry point: construct one with a
//! host, port and handler, `start()` it, and `stop()` it when done. It
//! does not know anything about parsing or pipelining — that is entirely
//! [`crate::engine`]'s job, one instance per accepted connection.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_std::channel::{self, Receiver, Sender};

use crate::config::ServerConfig;
use crate::exceptions::{HandlerError, HttpException};
use crate::http::request::Request;
use crate::net::server;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, HandlerError>> + Send>>;

/// A user-supplied request handler: given a parsed request and the
/// container it arrived through, produce the response body or fail with
/// a [`HandlerError`].
pub type Handler = dyn Fn(Request, Arc<Container>) -> HandlerFuture + Send + Sync;

pub struct Container {
    config: ServerConfig,
    handler: Box<Handler>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl Container {
    pub fn new(config: ServerConfig, handler: Box<Handler>) -> Arc<Self> {
        let (stop_tx, stop_rx) = channel::bounded(1);
        Arc::new(Self {
            config,
            handler,
            stop_tx,
            stop_rx,
            bound_addr: Mutex::new(None),
        })
    }

    /// Binds the listener and serves connections until [`Container::stop`]
    /// is called, then returns once the listener is closed. Each accepted
    /// connection gets its own [`crate::engine::run_connection`] task.
    pub async fn start(self: &Arc<Self>) -> std::io::Result<()> {
        server::accept_loop(Arc::clone(self), self.stop_rx.clone()).await
    }

    /// The address actually bound by the running listener — useful in
    /// tests that bind to port 0 and need the OS-assigned port. `None`
    /// until the listener has finished binding.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().unwrap()
    }

    pub(crate) fn set_bound_addr(&self, addr: SocketAddr) {
        *self.bound_addr.lock().unwrap() = Some(addr);
    }

    /// Signals the accept loop to stop. Idempotent: a second call after
    /// the loop has already drained is a harmless no-op send into a full
    /// channel.
    pub async fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Delegates to the user handler, passing back a reference to this
    /// same container the way the handler's own signature expects.
    pub async fn handle_request(
        self: &Arc<Self>,
        request: Request,
    ) -> Result<Vec<u8>, HandlerError> {
        (self.handler)(request, Arc::clone(self)).await
    }

    /// Constructs (but does not raise) an [`HttpException`] carrying
    /// `msg`, for a handler to return as `Err(exc.into())`.
    pub fn create_exception(&self, msg: impl Into<String>) -> HttpException {
        HttpException::new(msg)
    }

    pub(crate) fn config(&self) -> &ServerConfig {
        &self.config
    }
}
