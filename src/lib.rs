//! Detour Engine - direct-first connection routing around network censorship
//!
//! This library decides, per destination host, whether a connection can go
//! out directly or has to take a detour (a proxy or tunnel supplied by the
//! caller):
//! - Domain/subdomain whitelist with forced, permanent and learned entries
//! - Direct attempts bounded by a combined connect + first-read deadline
//! - Transparent fallback to the detour path with request replay
//! - Country-specific detection of forged block pages and poisoned DNS
//! - Eviction of learned hosts whose detour path fails
//!
//! # Example
//!
//! ```rust,no_run
//! use detour_engine::{Detour, DetourConfig, TcpDialer};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! # async fn run() -> detour_engine::Result<()> {
//! let config = DetourConfig::from_json(r#"{
//!     "country": "IR",
//!     "whitelist": ["twitter.com"]
//! }"#)?;
//! let detour = Detour::from_config(&config);
//!
//! // Both paths are plain dialers; a real detour would tunnel through a proxy
//! let dialer = detour.build_dialer(TcpDialer::new(), TcpDialer::new());
//!
//! let mut conn = dialer.dial("tcp", "example.com:80").await?;
//! conn.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await?;
//! let mut response = Vec::new();
//! conn.read_to_end(&mut response).await?;
//!
//! println!("routed {:?}, learned: {:?}", conn.route(), detour.store().dump_temporary());
//! # Ok(())
//! # }
//! ```
//!
//! # Routing precedence
//!
//! | Overlay | Effect |
//! |---------|--------|
//! | `force_unwhitelist` | always direct, never learned |
//! | `force_whitelist` | always detour |
//! | permanent whitelist | detour |
//! | temporary whitelist | detour until the detour path fails |
//! | none | direct first, learn on failure |
//!
//! Every entry also covers its subdomains.

pub mod config;
pub mod dialer;
pub mod engine;
pub mod error;
pub mod hijack;
pub mod matcher;
pub mod outbound;
pub mod types;
pub mod whitelist;

// Re-export commonly used items
pub use config::{DetourConfig, DetourOptions, DEFAULT_FIRST_READ_TIMEOUT, DEFAULT_MAX_REPLAY_BUFFER};
pub use dialer::{DetourConn, DetourDialer};
pub use engine::Detour;
pub use error::{DetourError, DialErrorKind, Result};
pub use hijack::{Country, HijackDetector, HijackRules};
pub use matcher::{CidrSet, DomainMatcher};
pub use types::{host_only, DialOutcome, Route};
pub use whitelist::WhitelistStore;

// Re-export outbound types
pub use outbound::{
    AsyncDialer, AsyncTcpConn, BoxedConn, FnDialer, TcpDialer, TcpDialerOptions, TokioTcpConn,
    DEFAULT_DIALER_TIMEOUT,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(response).await;
                });
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_full_workflow() {
        let detour_addr = serve_once(b"HTTP/1.1 200 OK\r\n\r\ndetour").await;

        // Direct path: nothing listens there
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = closed.local_addr().unwrap().port();
        drop(closed);

        let detour = Detour::with_options(
            DetourOptions::new().with_first_read_timeout(Duration::from_secs(2)),
        );
        let dialer = detour.build_dialer(
            TcpDialer::new(),
            FnDialer::new(move |network: String, _addr: String| {
                let detour_addr = detour_addr.clone();
                async move { TcpDialer::new().dial(&network, &detour_addr).await }
            }),
        );

        let target = format!("127.0.0.1:{}", dead_port);
        let mut conn = dialer.dial("tcp", &target).await.unwrap();
        assert_eq!(conn.route(), Some(Route::Detour));

        conn.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut body = Vec::new();
        conn.read_to_end(&mut body).await.unwrap();
        assert!(body.ends_with(b"detour"));

        assert!(detour.is_whitelisted(&target));
        assert!(detour.is_temporarily_whitelisted(&target));
        assert!(detour.dump_whitelist().is_empty());
    }
}
