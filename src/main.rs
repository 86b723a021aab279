//! Demonstration binary: an echo handler on 127.0.0.1:8888, stopped with
//! Ctrl+C.

use std::sync::Arc;

use async_std::task;

use pipehttp::container::Container;
use pipehttp::{HandlerError, ServerConfig};

/// Echoes the request body back as the response.
fn handler(
    request: pipehttp::Request,
    _container: Arc<Container>,
) -> pipehttp::HandlerFuture {
    Box::pin(async move {
        let body = request.body().await;
        Ok::<Vec<u8>, HandlerError>(body)
    })
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let config = ServerConfig::default();
    let container = Container::new(config, Box::new(handler));

    let stop_container = Arc::clone(&container);
    ctrlc::set_handler(move || {
        task::block_on(stop_container.stop());
    })
    .expect("failed to install Ctrl+C handler");

    task::block_on(container.start())
}
