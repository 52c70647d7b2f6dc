//! Domain matching over reversed labels.
//!
//! ## Example
//!
//! ```
//! use detour_engine::matcher::DomainMatcher;
//!
//! let mut matcher = DomainMatcher::new();
//! matcher.add("google.com");
//!
//! assert!(matcher.matches_prefix("google.com"));      // the domain itself
//! assert!(matcher.matches_prefix("www.google.com"));  // any subdomain
//! assert!(!matcher.matches_prefix("notgoogle.com"));  // label boundaries hold
//! assert!(!matcher.contains_exactly("www.google.com"));
//! ```

mod matcher;

pub use matcher::DomainMatcher;
