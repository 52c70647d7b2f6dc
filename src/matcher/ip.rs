use std::net::IpAddr;

use ipnet::IpNet;

/// Set of IP networks matched by containment.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are matched as their IPv4
/// form, since a dual-stack socket reports peers that way.
#[derive(Debug, Clone, Default)]
pub struct CidrSet {
    networks: Vec<IpNet>,
}

impl CidrSet {
    pub fn new(networks: Vec<IpNet>) -> Self {
        Self { networks }
    }

    /// Check if `ip` falls into any network of the set
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.networks.iter().any(|net| net.contains(&ip))
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl FromIterator<IpNet> for CidrSet {
    fn from_iter<I: IntoIterator<Item = IpNet>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl From<IpAddr> for CidrSet {
    fn from(ip: IpAddr) -> Self {
        Self::new(vec![IpNet::from(ip)])
    }
}
