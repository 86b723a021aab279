//! End-to-end scenarios driven against a real `Container` over a real
//! TCP socket, bound to port 0 so tests can run concurrently.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_std::io::prelude::*;
use async_std::net::TcpStream;
use async_std::task;

use pipehttp::container::{Container, Handler, HandlerFuture};
use pipehttp::{HandlerError, Request, ServerConfig};

fn echo_handler() -> Box<Handler> {
    Box::new(|request: Request, _container: Arc<Container>| -> HandlerFuture {
        Box::pin(async move {
            let body = request.body().await;
            Ok::<Vec<u8>, HandlerError>(body)
        })
    })
}

fn exception_handler() -> Box<Handler> {
    Box::new(|_request: Request, container: Arc<Container>| -> HandlerFuture {
        Box::pin(async move { Err(container.create_exception("boom").into()) })
    })
}

#[derive(Debug)]
struct BrokenGear;

impl fmt::Display for BrokenGear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gear stripped")
    }
}
impl std::error::Error for BrokenGear {}

fn generic_error_handler() -> Box<Handler> {
    Box::new(|_request: Request, _container: Arc<Container>| -> HandlerFuture {
        Box::pin(async move { Err(HandlerError::other(BrokenGear)) })
    })
}

/// Echoes the body back, but only after `delay` — long enough for a test
/// to close its side of the connection while the handler is still running.
fn delayed_echo_handler(delay: Duration) -> Box<Handler> {
    Box::new(move |request: Request, _container: Arc<Container>| -> HandlerFuture {
        Box::pin(async move {
            task::sleep(delay).await;
            let body = request.body().await;
            Ok::<Vec<u8>, HandlerError>(body)
        })
    })
}

/// Awaits the body twice and only echoes it back if both awaits agree,
/// so a broken one-shot cache shows up as a wrong response body rather
/// than a hang.
fn double_await_body_handler() -> Box<Handler> {
    Box::new(|request: Request, _container: Arc<Container>| -> HandlerFuture {
        Box::pin(async move {
            let first = request.body().await;
            let second = request.body().await;
            let body = if first == second { first } else { b"MISMATCH".to_vec() };
            Ok::<Vec<u8>, HandlerError>(body)
        })
    })
}

async fn spawn_server(handler: Box<Handler>, timeout: Duration) -> (Arc<Container>, SocketAddr) {
    let config = ServerConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).with_timeout(timeout);
    let container = Container::new(config, handler);
    let running = Arc::clone(&container);
    task::spawn(async move {
        let _ = running.start().await;
    });

    loop {
        if let Some(addr) = container.local_addr() {
            return (container, addr);
        }
        task::sleep(Duration::from_millis(5)).await;
    }
}

async fn read_available(stream: &mut TcpStream, at_least: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let read = async_std::future::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                out.extend_from_slice(&buf[..n]);
                if out.len() >= at_least {
                    break;
                }
            }
            _ => break,
        }
    }
    out
}

#[async_std::test]
async fn s1_simple_http_1_1_get() {
    let (container, addr) = spawn_server(echo_handler(), Duration::from_secs(5)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\nContent-Length: 3\r\n\r\nXYZ")
        .await
        .unwrap();

    let response = read_available(&mut stream, 1).await;
    let response = String::from_utf8(response).unwrap();
    assert_eq!(
        response,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 3\r\n\r\nXYZ"
    );

    container.stop().await;
}

#[async_std::test]
async fn body_future_is_idempotent_across_repeated_awaits() {
    let (container, addr) =
        spawn_server(double_await_body_handler(), Duration::from_secs(5)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nContent-Length: 5\r\n\r\nHello")
        .await
        .unwrap();

    let response = read_available(&mut stream, 1).await;
    let response = String::from_utf8(response).unwrap();
    assert_eq!(
        response,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 5\r\n\r\nHello",
        "a second .body().await must return the same cached bytes as the first, not hang or re-read"
    );

    container.stop().await;
}

#[async_std::test]
async fn s2_http_1_0_closes_after_response() {
    let (container, addr) = spawn_server(echo_handler(), Duration::from_secs(5)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET / HTTP/1.0\r\nContent-Length: 3\r\n\r\n123")
        .await
        .unwrap();

    let response = read_available(&mut stream, 1).await;
    let response = String::from_utf8(response).unwrap();
    assert_eq!(
        response,
        "HTTP/1.0 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 3\r\n\r\n123"
    );

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "transport should be closed after a non-keep-alive response");

    container.stop().await;
}

#[async_std::test]
async fn s3_pipelined_pair_is_answered_in_order() {
    let (container, addr) = spawn_server(echo_handler(), Duration::from_secs(5)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let request = b"GET / HTTP/1.1\r\nContent-Length: 3\r\n\r\nXYZGET / HTTP/1.1\r\nContent-Length: 3\r\n\r\n123";
    stream.write_all(request).await.unwrap();

    let expected =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 3\r\n\r\nXYZ\
          HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 3\r\n\r\n123";
    let response = read_available(&mut stream, expected.len()).await;
    assert_eq!(response, expected);

    container.stop().await;
}

#[async_std::test]
async fn s4_handler_http_exception_becomes_500() {
    let (container, addr) = spawn_server(exception_handler(), Duration::from_secs(5)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();

    let response = read_available(&mut stream, 1).await;
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 500 OK\r\n"));
    assert!(response.ends_with("boom"));

    container.stop().await;
}

#[async_std::test]
async fn s5_handler_generic_error_becomes_500_and_connection_stays_open() {
    let (container, addr) = spawn_server(generic_error_handler(), Duration::from_secs(5)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();

    let response = read_available(&mut stream, 1).await;
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 500 OK\r\n"));
    assert!(response.contains("BrokenGear"));
    assert!(response.contains("gear stripped"));

    // Transport stays open: keep_alive is true for HTTP/1.1, and the
    // error doesn't force a close.
    stream
        .write_all(b"GET / HTTP/1.1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let second = read_available(&mut stream, 1).await;
    assert!(!second.is_empty());

    container.stop().await;
}

#[async_std::test]
async fn s6_transport_closed_before_write_drops_response() {
    let (container, addr) = spawn_server(
        delayed_echo_handler(Duration::from_millis(200)),
        Duration::from_secs(5),
    )
    .await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nContent-Length: 3\r\n\r\nXYZ")
        .await
        .unwrap();

    // Half-close the client's write side right after the request is sent,
    // long before the handler's delay elapses: the server's reader loop
    // observes end-of-stream, marks the connection closing and cancels the
    // worker before it ever gets to write a response.
    stream.shutdown(std::net::Shutdown::Write).unwrap();

    let mut buf = [0u8; 16];
    let read = async_std::future::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
    match read {
        Ok(Ok(n)) => assert_eq!(n, 0, "no response should be written once the transport is closing"),
        other => panic!("expected the server to close its side with no bytes written, got {other:?}"),
    }

    container.stop().await;
}

#[async_std::test]
async fn s8_idle_timeout_closes_the_connection() {
    let (container, addr) = spawn_server(echo_handler(), Duration::from_millis(200)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut buf = [0u8; 16];
    let read = async_std::future::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
    match read {
        Ok(Ok(n)) => assert_eq!(n, 0, "idle connection should be closed by the server"),
        other => panic!("expected the server to close the idle connection, got {other:?}"),
    }

    container.stop().await;
}

#[async_std::test]
async fn s9_split_header_across_writes() {
    let (container, addr) = spawn_server(echo_handler(), Duration::from_secs(5)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"GET / HTTP/1.1\r\nHost: ex").await.unwrap();
    task::sleep(Duration::from_millis(20)).await;
    stream
        .write_all(b"ample.com\r\nContent-Length: 5\r\n\r\nHello")
        .await
        .unwrap();

    let response = read_available(&mut stream, 1).await;
    let response = String::from_utf8(response).unwrap();
    assert_eq!(
        response,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 5\r\n\r\nHello"
    );

    container.stop().await;
}
