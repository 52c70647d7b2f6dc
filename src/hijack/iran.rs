//! Iranian block page and DNS redirect.
//!
//! Filtered HTTP requests are answered with a `403 Forbidden` page framing
//! `http://10.10.34.34`, and filtered names resolve to that same address.

use std::net::{IpAddr, Ipv4Addr};

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use super::HijackRules;
use crate::matcher::CidrSet;

/// Address injected by the Iranian DNS filter
pub const REDIRECT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 10, 34, 34));

static BLOCK_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s-u)\AHTTP/1\.[01] 403 Forbidden\r?\n.*<iframe\s+src="https?://10\.10\.34\.34"#)
        .expect("BLOCK_PAGE: hardcoded regex is invalid")
});

pub(super) static RULES: Lazy<IranRules> = Lazy::new(|| IranRules {
    poisoned: CidrSet::from(REDIRECT_IP),
});

pub(super) struct IranRules {
    poisoned: CidrSet,
}

impl HijackRules for IranRules {
    fn is_forged_response(&self, first_bytes: &[u8]) -> bool {
        BLOCK_PAGE.is_match(first_bytes)
    }

    fn is_poisoned_address(&self, ip: IpAddr) -> bool {
        self.poisoned.contains(ip)
    }
}
