//! Dial capabilities.
//!
//! The detour engine consumes two of these, one for the direct path and one
//! for the detour path, and exposes a third composed from them:
//! - [`AsyncDialer`]: maps `(network, address)` to a connection
//! - [`FnDialer`]: adapts an async closure to `AsyncDialer`
//! - [`TcpDialer`]: plain TCP over the local network

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Result;

mod direct;

pub use direct::{TcpDialer, TcpDialerOptions, DEFAULT_DIALER_TIMEOUT};

/// Async TCP connection interface.
pub trait AsyncTcpConn: AsyncRead + AsyncWrite + Send + Unpin {
    /// Get the local address
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Get the peer address
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

/// Boxed connection returned by every dialer.
pub type BoxedConn = Box<dyn AsyncTcpConn>;

/// Something that can open connections.
///
/// There is no cancel argument: dropping the future returned by `dial`
/// cancels the attempt, and implementations must release whatever they hold
/// when dropped mid-dial.
#[async_trait]
pub trait AsyncDialer: Send + Sync {
    /// Connect to `addr` (`host:port`) over `network` (e.g. `"tcp"`).
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedConn>;
}

/// Dialer backed by an async closure.
///
/// ```
/// use detour_engine::{FnDialer, TcpDialer, AsyncDialer};
///
/// let tcp = TcpDialer::new();
/// let dialer = FnDialer::new(move |network: String, addr: String| {
///     let tcp = tcp.clone();
///     async move { tcp.dial(&network, &addr).await }
/// });
/// # let _ = dialer;
/// ```
pub struct FnDialer<F> {
    f: F,
}

impl<F> FnDialer<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> AsyncDialer for FnDialer<F>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxedConn>> + Send + 'static,
{
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedConn> {
        (self.f)(network.to_string(), addr.to_string()).await
    }
}

/// Tokio TcpStream wrapper implementing AsyncTcpConn
pub struct TokioTcpConn {
    inner: tokio::net::TcpStream,
}

impl TokioTcpConn {
    pub fn new(stream: tokio::net::TcpStream) -> Self {
        Self { inner: stream }
    }

    pub fn into_inner(self) -> tokio::net::TcpStream {
        self.inner
    }
}

impl AsyncRead for TokioTcpConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TokioTcpConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl AsyncTcpConn for TokioTcpConn {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}
