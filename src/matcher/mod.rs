pub mod domain;
mod ip;

pub use domain::DomainMatcher;
pub use ip::CidrSet;
