//! Listener loop and port sharing.
//!
//! Every accepted connection is served by hyper with one axum router. When HTTP and
//! WebSocket share a port, the request head is read first and connections carrying
//! `Upgrade: websocket` go to the WebSocket router; the bytes read are replayed.

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

const MAX_HEAD_BYTES: usize = 8 * 1024;
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Which router(s) a listener serves.
#[derive(Clone)]
pub enum Routes {
    Single(Router),
    Shared { http: Router, ws: Router },
}

/// Accept connections until `shutdown` flips (or its sender is dropped), then let open
/// HTTP connections finish their in-flight request before returning.
pub async fn serve(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    routes: Routes,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer)) => {
                    conns.spawn(serve_connection(tcp, peer, tls.clone(), routes.clone(), shutdown.clone()));
                }
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }
    drop(listener);

    let drain = async { while conns.join_next().await.is_some() {} };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        log::warn!("{} connection(s) still open after {:?}, aborting", conns.len(), DRAIN_TIMEOUT);
        conns.abort_all();
        while conns.join_next().await.is_some() {}
    }
}

async fn serve_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    routes: Routes,
    mut shutdown: watch::Receiver<bool>,
) {
    let stream: Box<dyn Io> = match tls {
        Some(acceptor) => match acceptor.accept(tcp).await {
            Ok(s) => Box::new(s),
            Err(e) => {
                log::debug!("tls handshake with {} failed: {}", peer, e);
                return;
            }
        },
        None => Box::new(tcp),
    };

    let (io, router): (Box<dyn Io>, Router) = match routes {
        Routes::Single(router) => (stream, router),
        Routes::Shared { http, ws } => {
            let mut stream = stream;
            let head = match tokio::time::timeout(HEAD_TIMEOUT, read_head(&mut stream)).await {
                Ok(Ok(head)) if !head.is_empty() => head,
                Ok(Ok(_)) => return,
                Ok(Err(e)) => {
                    log::debug!("reading request head from {} failed: {}", peer, e);
                    return;
                }
                Err(_) => {
                    log::debug!("request head from {} timed out", peer);
                    return;
                }
            };
            let router = if is_websocket_upgrade(&head) { ws } else { http };
            (Box::new(PrefixedStream::new(head, stream)), router)
        }
    };

    let service = TowerToHyperService::new(router);
    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();
    tokio::pin!(conn);
    let res = tokio::select! {
        res = conn.as_mut() => res,
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = res {
        log::debug!("connection from {} ended with error: {}", peer, e);
    }
}

/// Read until the end of the request head, EOF, or `MAX_HEAD_BYTES`.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= MAX_HEAD_BYTES || buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    Ok(buf)
}

/// True when the request head has an `Upgrade` header listing `websocket` (case-insensitive).
pub fn is_websocket_upgrade(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    text.split("\r\n")
        .skip(1)
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value
                    .split(',')
                    .any(|v| v.trim().eq_ignore_ascii_case("websocket"))
        })
}

/// Replays buffered bytes, then delegates to the inner stream.
struct PrefixedStream<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> PrefixedStream<S> {
    fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let remaining = &this.prefix[this.pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn detects_websocket_upgrade_case_insensitively() {
        let head = b"GET /ws HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nupgrade: WebSocket\r\n\r\n";
        assert!(is_websocket_upgrade(head));
        let head = b"GET /ws HTTP/1.1\r\nUpgrade: h2c, websocket\r\n\r\n";
        assert!(is_websocket_upgrade(head));
    }

    #[test]
    fn plain_requests_are_not_upgrades() {
        let head = b"POST /message HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\n\r\n{}";
        assert!(!is_websocket_upgrade(head));
        // Header-like text in the body does not count.
        let head = b"POST /message HTTP/1.1\r\nHost: x\r\n\r\nUpgrade: websocket\r\n";
        assert!(!is_websocket_upgrade(head));
    }

    #[tokio::test]
    async fn read_head_stops_at_blank_line() {
        let data: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut reader = data;
        let head = read_head(&mut reader).await.unwrap();
        assert_eq!(head, data);
    }

    #[tokio::test]
    async fn prefixed_stream_replays_then_delegates() {
        let inner: &[u8] = b" world";
        let mut s = PrefixedStream::new(b"hello".to_vec(), inner);
        let mut out = String::new();
        s.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }
}
