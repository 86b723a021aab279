//! Listener glue.
//!
//! This module is responsible only for networking concerns: binding the
//! listener, accepting TCP connections, and instantiating a
//! [`crate::engine`] connection for each one. Request parsing, handler
//! dispatch and response generation are delegated entirely to `engine`
//! and `container`.
//!
//! The accept loop races `listener.accept()` against the container's stop
//! signal (rather than polling on an interval) so `Container::stop()`
//! interrupts it without waiting for the next incoming connection.

use std::sync::Arc;

use async_std::channel::Receiver;
use async_std::net::TcpListener;
use async_std::prelude::FutureExt;
use async_std::task;

use log::{debug, info, warn};

use crate::container::Container;
use crate::engine;

enum Next {
    Connection(std::io::Result<(async_std::net::TcpStream, std::net::SocketAddr)>),
    Stop,
}

/// Binds `container`'s configured address and accepts connections until
/// `stop_rx` fires, spawning one [`engine::run_connection`] task per
/// accepted connection.
pub async fn accept_loop(container: Arc<Container>, stop_rx: Receiver<()>) -> std::io::Result<()> {
    let config = container.config().clone();
    let listener = TcpListener::bind((config.address, config.port)).await?;
    let local_addr = listener.local_addr()?;
    container.set_bound_addr(local_addr);
    info!("listening on {local_addr}");

    loop {
        let accept = async { Next::Connection(listener.accept().await) };
        let stop = async {
            let _ = stop_rx.recv().await;
            Next::Stop
        };

        match accept.race(stop).await {
            Next::Connection(Ok((stream, addr))) => {
                debug!("accepted connection from {addr}");
                let container = Arc::clone(&container);
                let config = config.clone();
                task::spawn(async move {
                    engine::run_connection(stream, container, config).await;
                });
            }
            Next::Connection(Err(e)) => warn!("accept error: {e}"),
            Next::Stop => break,
        }
    }

    info!("listener stopped");
    Ok(())
}
