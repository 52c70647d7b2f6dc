//! Detour dialer.
//!
//! Composes a direct dialer and a detour dialer into one. For each
//! connection:
//!
//! 1. Hosts the [`WhitelistStore`] routes through the detour are dialed
//!    there straight away.
//! 2. Everything else is dialed directly. Connecting and receiving the first
//!    response bytes share a single first-read deadline.
//! 3. A refused, stalled, reset or hijacked direct attempt learns the host
//!    into the temporary whitelist and the connection continues over the
//!    detour path, replaying what was already written. A request that cannot
//!    be replayed fails instead; the next one goes straight to the detour.
//! 4. When a detour connection for a temporarily whitelisted host fails, the
//!    host is evicted so direct access gets another chance.

mod conn;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::DetourOptions;
use crate::error::{DetourError, DialErrorKind, Result};
use crate::hijack::HijackDetector;
use crate::outbound::{AsyncDialer, BoxedConn};
use crate::types::{host_only, split_host_port, DialOutcome, Route};
use crate::whitelist::WhitelistStore;

pub use conn::DetourConn;

/// Size of the first read used for hijack classification
const FIRST_READ_BUFFER_SIZE: usize = 4096;

struct Shared {
    direct: Arc<dyn AsyncDialer>,
    detour: Arc<dyn AsyncDialer>,
    store: Arc<WhitelistStore>,
    detector: Arc<HijackDetector>,
    options: DetourOptions,
}

/// Dialer that falls back to the detour path when direct access fails.
///
/// Cheap to clone; clones share the whitelist and hijack detector.
#[derive(Clone)]
pub struct DetourDialer {
    shared: Arc<Shared>,
}

impl DetourDialer {
    pub fn new(
        direct: Arc<dyn AsyncDialer>,
        detour: Arc<dyn AsyncDialer>,
        store: Arc<WhitelistStore>,
        detector: Arc<HijackDetector>,
        options: DetourOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                direct,
                detour,
                store,
                detector,
                options,
            }),
        }
    }

    pub fn store(&self) -> &Arc<WhitelistStore> {
        &self.shared.store
    }

    pub fn options(&self) -> &DetourOptions {
        &self.shared.options
    }

    /// Open a connection to `addr` (`host:port`).
    ///
    /// Only structural errors (a malformed address, an unsupported network)
    /// and detour-path failures are returned here. Direct-path failures are
    /// absorbed by falling back to the detour.
    pub async fn dial(&self, network: &str, addr: &str) -> Result<DetourConn> {
        if split_host_port(addr).is_none() {
            return Err(DetourError::InvalidAddress(addr.to_string()));
        }
        let host = host_only(addr);

        let store = &self.shared.store;
        let attempt = Arc::new(Attempt {
            shared: self.shared.clone(),
            network: network.to_string(),
            addr: addr.to_string(),
            force_excluded: store.is_force_excluded(&host),
            host,
        });

        if store.is_detour_needed(&attempt.host) {
            debug!(host = %attempt.host, "Whitelisted, dialing detour");
            let conn = attempt.dial_detour().await?;
            return Ok(DetourConn::established(attempt, conn, Route::Detour));
        }

        if attempt.force_excluded {
            debug!(host = %attempt.host, "Force unwhitelisted, dialing direct");
            let conn = self.shared.direct.dial(network, addr).await?;
            return Ok(DetourConn::established(attempt, conn, Route::Direct));
        }

        let deadline = Instant::now() + self.shared.options.first_read_timeout;
        let (outcome, error) =
            match tokio::time::timeout_at(deadline, self.shared.direct.dial(network, addr)).await {
                Err(_) => (
                    DialOutcome::DialTimedOut,
                    DetourError::dial(DialErrorKind::Timeout, "direct dial timed out"),
                ),
                Ok(Err(e)) if is_structural(&e) => return Err(e),
                Ok(Err(e)) => (DialOutcome::DialFailed, e),
                Ok(Ok(conn)) => match conn.peer_addr() {
                    Ok(peer) if self.shared.detector.classify_resolved_address(peer.ip()) => {
                        info!(host = %attempt.host, %peer, "DNS hijacked on direct path");
                        (
                            DialOutcome::DnsHijacked,
                            DetourError::dial(DialErrorKind::Hijacked, "connected to a poisoned address"),
                        )
                    }
                    _ => return Ok(DetourConn::probing(attempt, conn, deadline)),
                },
            };

        // Nothing was written yet, so the detour can always take over
        debug!(host = %attempt.host, %outcome, error = %error, "Direct dial failed");
        attempt.learn(outcome);
        let conn = attempt.dial_detour().await?;
        Ok(DetourConn::established(attempt, conn, Route::Detour))
    }
}

#[async_trait]
impl AsyncDialer for DetourDialer {
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedConn> {
        let conn = DetourDialer::dial(self, network, addr).await?;
        Ok(Box::new(conn))
    }
}

fn is_structural(err: &DetourError) -> bool {
    matches!(err, DetourError::InvalidAddress(_))
        || err.dial_kind() == Some(DialErrorKind::InvalidInput)
}

/// State of one `dial` call shared with the connection it produced.
struct Attempt {
    shared: Arc<Shared>,
    network: String,
    addr: String,
    host: String,
    force_excluded: bool,
}

impl Attempt {
    /// Record that the direct path is unusable for this host.
    fn learn(&self, outcome: DialOutcome) {
        if self.force_excluded {
            return;
        }
        let store = &self.shared.store;
        if store.is_detour_needed(&self.host) {
            return;
        }
        debug!(host = %self.host, %outcome, "Adding to temporary whitelist");
        store.add_temporary(&self.host);
    }

    /// Forget a temporary entry after the detour path failed for it.
    fn evict(&self) {
        if self.shared.store.remove_temporary(&self.host) {
            info!(host = %self.host, "Detour failed, removed from temporary whitelist");
        }
    }

    async fn dial_detour(&self) -> Result<BoxedConn> {
        match self.shared.detour.dial(&self.network, &self.addr).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                debug!(host = %self.host, error = %e, "Detour dial failed");
                self.evict();
                Err(e)
            }
        }
    }

    /// React to an I/O error on an established connection.
    fn on_stream_error(&self, route: Route, err: &io::Error) {
        debug!(host = %self.host, %route, error = %err, "Connection failed");
        match route {
            Route::Direct => self.learn(DialOutcome::ReadFailed),
            Route::Detour => self.evict(),
        }
    }
}
