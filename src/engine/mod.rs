//! Engine facade.
//!
//! [`Detour`] owns one whitelist store and one hijack detector and exposes
//! the whitelist management entry points together with dialer construction.
//! Dialers built from the same `Detour` share its state, so a host learned by
//! one dialer is detoured by all of them.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::config::{DetourConfig, DetourOptions};
use crate::dialer::DetourDialer;
use crate::error::Result;
use crate::hijack::{Country, HijackDetector};
use crate::outbound::AsyncDialer;
use crate::whitelist::WhitelistStore;

/// Detour decision engine.
///
/// ```
/// use detour_engine::Detour;
///
/// let detour = Detour::new();
/// detour.add_to_whitelist("facebook.com", true);
/// detour.add_to_whitelist("example.org", false);
///
/// assert!(detour.is_whitelisted("www.facebook.com:443"));
/// assert_eq!(detour.dump_whitelist(), vec!["facebook.com".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct Detour {
    store: Arc<WhitelistStore>,
    detector: Arc<HijackDetector>,
    options: RwLock<DetourOptions>,
    /// Force entries installed by the last applied config
    config_force: Mutex<Vec<String>>,
}

impl Detour {
    /// Create an engine with an empty whitelist and default options.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DetourOptions) -> Self {
        Self {
            options: RwLock::new(options),
            ..Default::default()
        }
    }

    /// Create an engine and apply `config` to it.
    pub fn from_config(config: &DetourConfig) -> Self {
        let detour = Self::new();
        detour.apply_config(config);
        detour
    }

    /// Create an engine from a JSON config file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::from_config(&DetourConfig::from_file(path)?))
    }

    /// Reload configuration.
    ///
    /// The permanent whitelist is replaced and the country is switched
    /// (`None` selects the generic ruleset). Force entries from the previous
    /// config are dropped before the new ones are installed; force entries
    /// set through [`force_whitelist`](Self::force_whitelist) and
    /// [`force_unwhitelist`](Self::force_unwhitelist) are kept unless the old
    /// config also named them. Temporary entries are kept. New options apply
    /// to dialers built afterwards.
    pub fn apply_config(&self, config: &DetourConfig) {
        info!(
            whitelist = config.whitelist.len(),
            force_whitelist = config.force_whitelist.len(),
            force_unwhitelist = config.force_unwhitelist.len(),
            country = config.country.as_deref().unwrap_or(""),
            "Applying detour config"
        );
        self.store.set_permanent(&config.whitelist);

        let mut config_force = self.config_force.lock();
        for host in config_force.drain(..) {
            self.store.clear_force(&host);
        }
        for host in &config.force_whitelist {
            self.store.force_include(host);
            config_force.push(host.clone());
        }
        for host in &config.force_unwhitelist {
            self.store.force_exclude(host);
            config_force.push(host.clone());
        }
        drop(config_force);

        self.detector.configure(config.country.as_deref().unwrap_or(""));
        *self.options.write() = config.options();
    }

    /// Replace the permanent whitelist.
    pub fn set_permanent_whitelist<I, S>(&self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store.set_permanent(hosts);
    }

    pub fn add_to_whitelist(&self, host: &str, permanent: bool) {
        self.store.add(host, permanent);
    }

    /// Remove `host` from the permanent and temporary whitelists.
    pub fn remove_from_whitelist(&self, host: &str) {
        self.store.remove(host);
    }

    /// Always route `host` through the detour path.
    pub fn force_whitelist(&self, host: &str) {
        self.store.force_include(host);
    }

    /// Never route `host` through the detour path.
    pub fn force_unwhitelist(&self, host: &str) {
        self.store.force_exclude(host);
    }

    /// Permanent whitelist entries.
    pub fn dump_whitelist(&self) -> Vec<String> {
        self.store.dump_permanent()
    }

    /// Select hijack signatures by two-letter country code.
    pub fn set_country(&self, code: &str) {
        self.detector.configure(code);
    }

    pub fn country(&self) -> Country {
        self.detector.country()
    }

    /// Whether connections to `hostport` currently go through the detour.
    pub fn is_whitelisted(&self, hostport: &str) -> bool {
        self.store.is_detour_needed(hostport)
    }

    pub fn is_temporarily_whitelisted(&self, hostport: &str) -> bool {
        self.store.is_temporary(hostport)
    }

    pub fn store(&self) -> &Arc<WhitelistStore> {
        &self.store
    }

    pub fn detector(&self) -> &Arc<HijackDetector> {
        &self.detector
    }

    pub fn options(&self) -> DetourOptions {
        *self.options.read()
    }

    pub fn set_options(&self, options: DetourOptions) {
        *self.options.write() = options;
    }

    /// Compose `direct` and `detour` into a dialer that falls back to
    /// `detour` when the direct path is unusable.
    pub fn build_dialer<D, T>(&self, direct: D, detour: T) -> DetourDialer
    where
        D: AsyncDialer + 'static,
        T: AsyncDialer + 'static,
    {
        DetourDialer::new(
            Arc::new(direct),
            Arc::new(detour),
            self.store.clone(),
            self.detector.clone(),
            self.options(),
        )
    }
}
