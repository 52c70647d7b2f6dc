//! Direct TCP dialer.
//!
//! Connects to the target using the local network and system DNS.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream as TokioTcpStream;
use tracing::debug;

use crate::error::{DetourError, DialErrorKind, Result};
use crate::types::split_host_port;

use super::{AsyncDialer, BoxedConn, TokioTcpConn};

/// Default connect timeout
pub const DEFAULT_DIALER_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for creating a TcpDialer.
#[derive(Debug, Clone, Default)]
pub struct TcpDialerOptions {
    /// Bind IPv4 address for outgoing connections
    pub bind_ip4: Option<Ipv4Addr>,
    /// Bind IPv6 address for outgoing connections
    pub bind_ip6: Option<Ipv6Addr>,
    /// Connection timeout
    pub timeout: Option<Duration>,
}

/// Dialer that connects straight to the target.
///
/// Every resolved address is tried in turn until one connects, each attempt
/// bounded by the connect timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    bind_ip4: Option<Ipv4Addr>,
    bind_ip6: Option<Ipv6Addr>,
    timeout: Duration,
}

impl TcpDialer {
    /// Create a new TcpDialer with default settings.
    pub fn new() -> Self {
        Self {
            bind_ip4: None,
            bind_ip6: None,
            timeout: DEFAULT_DIALER_TIMEOUT,
        }
    }

    /// Create a new TcpDialer with the given options.
    pub fn with_options(opts: TcpDialerOptions) -> Self {
        Self {
            bind_ip4: opts.bind_ip4,
            bind_ip6: opts.bind_ip6,
            timeout: opts.timeout.unwrap_or(DEFAULT_DIALER_TIMEOUT),
        }
    }

    /// Resolve `host` to the socket addresses allowed by `network`.
    async fn resolve(&self, network: &str, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = if let Ok(ip) = host.parse::<IpAddr>() {
            vec![SocketAddr::new(ip, port)]
        } else {
            tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| {
                    DetourError::dial(
                        DialErrorKind::ConnectionFailed,
                        format!("Failed to resolve {}: {}", host, e),
                    )
                })?
                .collect()
        };

        let addrs: Vec<SocketAddr> = match network {
            "tcp" => addrs,
            "tcp4" => addrs.into_iter().filter(|a| a.is_ipv4()).collect(),
            "tcp6" => addrs.into_iter().filter(|a| a.is_ipv6()).collect(),
            other => {
                return Err(DetourError::dial(
                    DialErrorKind::InvalidInput,
                    format!("Unsupported network: {}", other),
                ))
            }
        };

        if addrs.is_empty() {
            return Err(DetourError::dial(
                DialErrorKind::ConnectionFailed,
                format!("No {} address available for {}", network, host),
            ));
        }
        Ok(addrs)
    }

    /// Get the bind IP for the given target IP.
    fn get_bind_ip(&self, target: &IpAddr) -> Option<IpAddr> {
        match target {
            IpAddr::V4(_) => self.bind_ip4.map(IpAddr::V4),
            IpAddr::V6(_) => self.bind_ip6.map(IpAddr::V6),
        }
    }

    /// Create a TCP socket bound to `bind_ip`.
    fn create_tcp_socket(&self, target: &IpAddr, bind_ip: IpAddr) -> Result<socket2::Socket> {
        let domain = match target {
            IpAddr::V4(_) => socket2::Domain::IPV4,
            IpAddr::V6(_) => socket2::Domain::IPV6,
        };
        let socket =
            socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
                .map_err(|e| {
                    DetourError::dial(DialErrorKind::Io, format!("Failed to create socket: {}", e))
                })?;
        socket
            .bind(&SocketAddr::new(bind_ip, 0).into())
            .map_err(|e| DetourError::dial(DialErrorKind::Io, format!("Failed to bind: {}", e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| DetourError::dial(DialErrorKind::Io, format!("Failed to set nonblocking: {}", e)))?;
        Ok(socket)
    }

    /// Connect to a specific socket address, binding first if configured.
    async fn connect_socket_addr(&self, socket_addr: SocketAddr) -> Result<TokioTcpStream> {
        let ip = socket_addr.ip();
        match self.get_bind_ip(&ip) {
            Some(bind_ip) => {
                let socket = self.create_tcp_socket(&ip, bind_ip)?;
                let std_stream: std::net::TcpStream = socket.into();
                let tokio_socket = tokio::net::TcpSocket::from_std_stream(std_stream);
                Ok(tokio_socket.connect(socket_addr).await?)
            }
            None => Ok(TokioTcpStream::connect(socket_addr).await?),
        }
    }

    /// Dial TCP to a specific socket address under the connect timeout.
    async fn dial_socket_addr(&self, socket_addr: SocketAddr) -> Result<TokioTcpStream> {
        match tokio::time::timeout(self.timeout, self.connect_socket_addr(socket_addr)).await {
            Err(_) => Err(DetourError::dial(
                DialErrorKind::Timeout,
                format!("Connection to {} timed out", socket_addr),
            )),
            Ok(Err(DetourError::IoError(e))) => Err(DetourError::dial(
                DialErrorKind::ConnectionFailed,
                format!("Failed to connect to {}: {}", socket_addr, e),
            )),
            Ok(result) => result,
        }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncDialer for TcpDialer {
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedConn> {
        let (host, port) = split_host_port(addr)
            .ok_or_else(|| DetourError::InvalidAddress(addr.to_string()))?;

        let mut last_err = None;
        for socket_addr in self.resolve(network, &host, port).await? {
            match self.dial_socket_addr(socket_addr).await {
                Ok(stream) => return Ok(Box::new(TokioTcpConn::new(stream))),
                Err(e) => {
                    debug!(%socket_addr, error = %e, "Direct TCP attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            DetourError::dial(DialErrorKind::ConnectionFailed, "No address available")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_dialer_options() {
        let dialer = TcpDialer::with_options(TcpDialerOptions {
            bind_ip4: Some(Ipv4Addr::LOCALHOST),
            bind_ip6: None,
            timeout: Some(Duration::from_secs(3)),
        });
        assert_eq!(dialer.timeout, Duration::from_secs(3));
        assert_eq!(
            dialer.get_bind_ip(&IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(dialer.get_bind_ip(&IpAddr::V6(Ipv6Addr::LOCALHOST)), None);
    }

    #[tokio::test]
    async fn test_dial_localhost() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept_handle = tokio::spawn(async move { listener.accept().await.ok() });

        let dialer = TcpDialer::new();
        let conn = dialer.dial("tcp", &format!("127.0.0.1:{}", port)).await;
        assert!(conn.is_ok());
        assert_eq!(conn.unwrap().peer_addr().unwrap().port(), port);

        accept_handle.await.ok();
    }

    #[tokio::test]
    async fn test_dial_with_bind_ip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept_handle = tokio::spawn(async move { listener.accept().await.ok() });

        let dialer = TcpDialer::with_options(TcpDialerOptions {
            bind_ip4: Some(Ipv4Addr::LOCALHOST),
            ..Default::default()
        });
        let conn = dialer.dial("tcp4", &format!("127.0.0.1:{}", port)).await.unwrap();
        assert_eq!(conn.local_addr().unwrap().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        accept_handle.await.ok();
    }

    #[tokio::test]
    async fn test_dial_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dialer = TcpDialer::new();
        match dialer.dial("tcp", &format!("127.0.0.1:{}", port)).await {
            Err(e) => assert_eq!(e.dial_kind(), Some(DialErrorKind::ConnectionFailed)),
            Ok(_) => panic!("Expected error"),
        }
    }

    #[tokio::test]
    async fn test_dial_invalid_address() {
        let dialer = TcpDialer::new();
        assert!(matches!(
            dialer.dial("tcp", "no-port").await,
            Err(DetourError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_network_mismatch() {
        let dialer = TcpDialer::new();
        match dialer.dial("tcp6", "127.0.0.1:80").await {
            Err(e) => assert_eq!(e.dial_kind(), Some(DialErrorKind::ConnectionFailed)),
            Ok(_) => panic!("Expected error"),
        }
        match dialer.dial("udp", "127.0.0.1:80").await {
            Err(e) => assert_eq!(e.dial_kind(), Some(DialErrorKind::InvalidInput)),
            Ok(_) => panic!("Expected error"),
        }
    }
}
