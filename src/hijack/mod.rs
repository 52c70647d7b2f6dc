//! Hijack detection.
//!
//! Some censors do not refuse connections; they answer them. A forged block
//! page arrives over a perfectly healthy TCP connection, and a poisoned DNS
//! answer sends the client to an address the censor controls. The
//! [`HijackDetector`] recognizes both for the selected country.

mod iran;

use std::fmt;
use std::net::IpAddr;

use parking_lot::RwLock;
use tracing::debug;

pub use iran::REDIRECT_IP as IRAN_REDIRECT_IP;

/// Signatures of one country's tampering.
pub trait HijackRules: Send + Sync {
    /// Whether the first response bytes are a forged block page.
    fn is_forged_response(&self, first_bytes: &[u8]) -> bool;

    /// Whether `ip` is an address injected by DNS tampering.
    fn is_poisoned_address(&self, ip: IpAddr) -> bool;
}

/// Ruleset with no signatures.
struct GenericRules;

impl HijackRules for GenericRules {
    fn is_forged_response(&self, _first_bytes: &[u8]) -> bool {
        false
    }

    fn is_poisoned_address(&self, _ip: IpAddr) -> bool {
        false
    }
}

/// Country whose hijack signatures are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Country {
    #[default]
    Generic,
    Iran,
}

impl Country {
    /// Parse a two-letter country code. Unknown codes select `Generic`.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "IR" => Country::Iran,
            _ => Country::Generic,
        }
    }

    /// Two-letter code, empty for `Generic`.
    pub fn code(&self) -> &'static str {
        match self {
            Country::Generic => "",
            Country::Iran => "IR",
        }
    }

    pub fn rules(&self) -> &'static dyn HijackRules {
        match self {
            Country::Generic => &GenericRules,
            Country::Iran => &*iran::RULES,
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Country::Generic => f.write_str("generic"),
            Country::Iran => f.write_str("IR"),
        }
    }
}

/// Classifies direct-path responses against the active country's rules.
///
/// The country can be swapped at any time; each classification reads it
/// once, so it runs entirely against either the old or the new ruleset.
#[derive(Debug, Default)]
pub struct HijackDetector {
    country: RwLock<Country>,
}

impl HijackDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_country(country: Country) -> Self {
        Self {
            country: RwLock::new(country),
        }
    }

    /// Select the ruleset by country code.
    pub fn configure(&self, code: &str) {
        let country = Country::from_code(code);
        if country == Country::Generic && !code.trim().is_empty() {
            debug!(code, "No hijack rules for country, using generic rules");
        }
        self.set_country(country);
    }

    pub fn set_country(&self, country: Country) {
        debug!(%country, "Setting hijack detection country");
        *self.country.write() = country;
    }

    pub fn country(&self) -> Country {
        *self.country.read()
    }

    /// Whether `first_bytes` is a forged block page.
    pub fn classify_response(&self, first_bytes: &[u8]) -> bool {
        self.country().rules().is_forged_response(first_bytes)
    }

    /// Whether `ip` is a poisoned DNS answer.
    pub fn classify_resolved_address(&self, ip: IpAddr) -> bool {
        self.country().rules().is_poisoned_address(ip)
    }
}
