//! Whitelist store.
//!
//! Tracks which hosts must be reached through the detour path. Four overlays
//! are kept, each a [`DomainMatcher`] so an entry also covers its subdomains:
//!
//! | Overlay | Meaning |
//! |---------|---------|
//! | force-exclude | never detour, whatever else says so |
//! | force-include | always detour |
//! | permanent | configured; replaced wholesale on reload |
//! | temporary | learned at runtime; evicted when the detour fails |
//!
//! Lookups evaluate them in that order.

use parking_lot::RwLock;
use tracing::debug;

use crate::matcher::DomainMatcher;
use crate::types::host_only;

#[derive(Debug, Default)]
struct Overlays {
    force_exclude: DomainMatcher,
    force_include: DomainMatcher,
    permanent: DomainMatcher,
    temporary: DomainMatcher,
}

/// Thread-safe whitelist of hosts routed through the detour path.
///
/// Every operation holds the lock only for the lookup or mutation itself.
#[derive(Debug, Default)]
pub struct WhitelistStore {
    overlays: RwLock<Overlays>,
}

impl WhitelistStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the permanent overlay with `hosts`.
    pub fn set_permanent<I, S>(&self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // Build outside the lock, swap under it
        let permanent: DomainMatcher = hosts.into_iter().collect();
        debug!(count = permanent.len(), "Replacing permanent whitelist");
        self.overlays.write().permanent = permanent;
    }

    /// Add `host` to the permanent or temporary overlay.
    pub fn add(&self, host: &str, permanent: bool) {
        debug!(host = %host_only(host), permanent, "Adding to whitelist");
        let mut overlays = self.overlays.write();
        if permanent {
            overlays.permanent.add(host);
        } else {
            overlays.temporary.add(host);
        }
    }

    pub fn add_temporary(&self, host: &str) {
        self.add(host, false);
    }

    pub fn remove_temporary(&self, host: &str) -> bool {
        let removed = self.overlays.write().temporary.delete(host);
        if removed {
            debug!(host = %host_only(host), "Removed from temporary whitelist");
        }
        removed
    }

    /// Remove `host` from the permanent and temporary overlays.
    ///
    /// Force entries are untouched; use [`clear_force`](Self::clear_force).
    pub fn remove(&self, host: &str) {
        debug!(host = %host_only(host), "Removing from whitelist");
        let mut overlays = self.overlays.write();
        overlays.permanent.delete(host);
        overlays.temporary.delete(host);
    }

    /// Always detour `host` and its subdomains.
    pub fn force_include(&self, host: &str) {
        debug!(host = %host_only(host), "Force whitelisting");
        let mut overlays = self.overlays.write();
        overlays.force_exclude.delete(host);
        overlays.force_include.add(host);
    }

    /// Never detour `host` and its subdomains.
    pub fn force_exclude(&self, host: &str) {
        debug!(host = %host_only(host), "Force unwhitelisting");
        let mut overlays = self.overlays.write();
        overlays.force_include.delete(host);
        overlays.force_exclude.add(host);
    }

    /// Drop any force entry for `host`.
    pub fn clear_force(&self, host: &str) {
        let mut overlays = self.overlays.write();
        overlays.force_include.delete(host);
        overlays.force_exclude.delete(host);
    }

    /// Whether connections to `hostport` should go through the detour path.
    pub fn is_detour_needed(&self, hostport: &str) -> bool {
        let host = host_only(hostport);
        let overlays = self.overlays.read();
        if overlays.force_exclude.matches_prefix(&host) {
            return false;
        }
        overlays.force_include.matches_prefix(&host)
            || overlays.permanent.matches_prefix(&host)
            || overlays.temporary.matches_prefix(&host)
    }

    pub fn is_force_excluded(&self, hostport: &str) -> bool {
        self.overlays.read().force_exclude.matches_prefix(hostport)
    }

    /// True iff `hostport`'s host is an exact temporary entry.
    pub fn is_temporary(&self, hostport: &str) -> bool {
        self.overlays.read().temporary.contains_exactly(hostport)
    }

    /// Permanent entries.
    pub fn dump_permanent(&self) -> Vec<String> {
        self.overlays.read().permanent.iter().collect()
    }

    pub fn dump_temporary(&self) -> Vec<String> {
        self.overlays.read().temporary.iter().collect()
    }

    /// Clear all four overlays.
    pub fn reset(&self) {
        *self.overlays.write() = Overlays::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store() {
        let store = WhitelistStore::new();
        assert!(!store.is_detour_needed("example.com:80"));
        assert!(!store.is_temporary("example.com:80"));
        assert!(store.dump_permanent().is_empty());
    }

    #[test]
    fn test_subdomain_is_whitelisted() {
        let store = WhitelistStore::new();
        store.add("facebook.com", true);

        assert!(store.is_detour_needed("www.facebook.com:80"));
        assert!(store.is_detour_needed("sub2.facebook.com:80"));
        assert!(!store.is_detour_needed("notfacebook.com:80"));
    }

    #[test]
    fn test_force_exclude_wins() {
        let store = WhitelistStore::new();
        store.add("example.com", true);
        store.add_temporary("api.example.com");
        store.force_exclude("example.com");

        assert!(!store.is_detour_needed("example.com:443"));
        assert!(!store.is_detour_needed("api.example.com:443"));
        assert!(store.is_force_excluded("www.example.com:443"));
    }

    #[test]
    fn test_force_include() {
        let store = WhitelistStore::new();
        store.force_include("blocked.org");

        assert!(store.is_detour_needed("blocked.org:80"));
        assert!(store.is_detour_needed("cdn.blocked.org:80"));
        assert!(!store.is_temporary("blocked.org:80"));
        assert!(store.dump_permanent().is_empty());
    }

    #[test]
    fn test_force_setters_are_exclusive() {
        let store = WhitelistStore::new();
        store.force_exclude("example.com");
        store.force_include("example.com");
        assert!(store.is_detour_needed("example.com"));
        assert!(!store.is_force_excluded("example.com"));

        store.force_exclude("example.com");
        assert!(!store.is_detour_needed("example.com"));

        store.clear_force("example.com");
        assert!(!store.is_detour_needed("example.com"));
        assert!(!store.is_force_excluded("example.com"));
    }

    #[test]
    fn test_is_temporary_is_exact() {
        let store = WhitelistStore::new();
        store.add_temporary("example.com:80");

        assert!(store.is_temporary("example.com:443"));
        assert!(!store.is_temporary("www.example.com:443"));
        assert!(store.is_detour_needed("www.example.com:443"));
    }

    #[test]
    fn test_permanent_is_not_temporary() {
        let store = WhitelistStore::new();
        store.add("example.com", true);
        assert!(!store.is_temporary("example.com"));
    }

    #[test]
    fn test_set_permanent_replaces() {
        let store = WhitelistStore::new();
        store.add("old.com", true);
        store.add_temporary("learned.com");
        store.set_permanent(["a.com", "b.com"]);

        assert!(!store.is_detour_needed("old.com"));
        assert!(store.is_detour_needed("a.com"));
        assert!(store.is_detour_needed("learned.com"));
        assert_eq!(store.dump_permanent(), vec!["a.com", "b.com"]);
    }

    #[test]
    fn test_remove() {
        let store = WhitelistStore::new();
        store.add("a.com", true);
        store.add("b.com", false);
        store.force_include("c.com");

        store.remove("a.com:80");
        store.remove("b.com:80");
        store.remove("c.com:80");

        assert!(!store.is_detour_needed("a.com"));
        assert!(!store.is_detour_needed("b.com"));
        assert!(store.is_detour_needed("c.com"));
    }

    #[test]
    fn test_remove_temporary_leaves_permanent() {
        let store = WhitelistStore::new();
        store.add("a.com", true);
        assert!(!store.remove_temporary("a.com"));
        assert!(store.is_detour_needed("a.com"));

        store.add_temporary("b.com");
        assert!(store.remove_temporary("b.com"));
        assert!(!store.is_detour_needed("b.com"));
    }

    #[test]
    fn test_dump_permanent_only() {
        let store = WhitelistStore::new();
        store.add("a.com:80", true);
        store.add("b.com:80", false);

        let dumped = store.dump_permanent();
        assert!(dumped.contains(&"a.com".to_string()));
        assert!(!dumped.contains(&"b.com".to_string()));
        assert_eq!(store.dump_temporary(), vec!["b.com"]);
    }

    #[test]
    fn test_reset() {
        let store = WhitelistStore::new();
        store.add("a.com", true);
        store.add_temporary("b.com");
        store.force_include("c.com");
        store.reset();

        assert!(!store.is_detour_needed("a.com"));
        assert!(!store.is_detour_needed("b.com"));
        assert!(!store.is_detour_needed("c.com"));
    }
}
