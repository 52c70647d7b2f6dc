use std::fmt;

/// Outcome of one direct connection attempt.
///
/// Every variant other than `Success` means the direct path is unusable for
/// the host right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialOutcome {
    Success,
    /// Connection refused or unreachable
    DialFailed,
    DialTimedOut,
    /// Connected, but no response within the first-read window
    ReadTimedOut,
    /// Connection reset, aborted or closed before any response bytes
    ReadFailed,
    /// Writing the request to the direct connection failed or stalled past
    /// the first-read deadline
    WriteFailed,
    /// First response bytes match a known forged block page
    ContentHijacked,
    /// Connected to a known poisoned DNS address
    DnsHijacked,
}

impl DialOutcome {
    /// Whether the direct path worked.
    pub fn is_success(&self) -> bool {
        matches!(self, DialOutcome::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DialOutcome::Success => "success",
            DialOutcome::DialFailed => "dial failed",
            DialOutcome::DialTimedOut => "dial timed out",
            DialOutcome::ReadTimedOut => "read timed out",
            DialOutcome::ReadFailed => "read failed",
            DialOutcome::WriteFailed => "write failed",
            DialOutcome::ContentHijacked => "content hijacked",
            DialOutcome::DnsHijacked => "dns hijacked",
        }
    }
}

impl fmt::Display for DialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path a connection ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Direct,
    Detour,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => f.write_str("direct"),
            Route::Detour => f.write_str("detour"),
        }
    }
}

/// Extract the host part of `addr` and normalize it for matching.
///
/// Accepts `host:port`, `[v6]:port`, a bare host, or a bare IPv6 literal.
/// The result is lower-cased with a single trailing dot removed.
pub fn host_only(addr: &str) -> String {
    let addr = addr.trim();
    let host = if let Some(rest) = addr.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        match addr.rfind(':') {
            // More than one colon without brackets is a bare IPv6 literal
            Some(pos) if !addr[..pos].contains(':') => &addr[..pos],
            _ => addr,
        }
    };
    let host = host.strip_suffix('.').unwrap_or(host);
    host.to_ascii_lowercase()
}

/// Split `addr` into host and port, requiring both.
pub(crate) fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let addr = addr.trim();
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let end = rest.find(']')?;
        (&rest[..end], rest[end + 1..].strip_prefix(':')?)
    } else {
        let pos = addr.rfind(':')?;
        if addr[..pos].contains(':') {
            return None;
        }
        (&addr[..pos], &addr[pos + 1..])
    };
    if host.is_empty() {
        return None;
    }
    let port = port.parse().ok()?;
    Some((host.to_string(), port))
}
