pub mod client_classes;
pub mod v4;
pub mod wire;

use std::{path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use kestrel_core::pnet::{self, datalink::NetworkInterface};
use tracing::debug;

/// server config
#[derive(Debug)]
pub struct DhcpConfig {
    v4: v4::Config,
}

impl DhcpConfig {
    /// the v4 config
    pub fn v4(&self) -> &v4::Config {
        &self.v4
    }

    /// consume, returning the v4 config
    pub fn into_v4(self) -> v4::Config {
        self.v4
    }

    /// read & decode the JSON config document at `path`
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::parse_str(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to find config at {}", &path.display()))?,
        )
    }

    /// decode a JSON config document
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let wire: wire::Config =
            serde_json::from_str(s.as_ref()).context("config is not valid JSON")?;
        let config = v4::Config::try_from(wire)?;
        debug!(?config);

        Ok(Self { v4: config })
    }
}

/// Returns:
/// - interfaces matching the list supplied that are 'up' and have an IPv4
/// - OR any 'up' interfaces that also have an IPv4
pub fn v4_find_interfaces(interfaces: Option<Vec<String>>) -> Result<Vec<NetworkInterface>> {
    let found_interfaces = pnet::datalink::interfaces()
        .into_iter()
        .filter(|e| e.is_up() && !e.ips.is_empty() && e.ips.iter().any(|i| i.is_ipv4()))
        .collect::<Vec<_>>();
    found_or_default(found_interfaces, interfaces)
}

fn found_or_default(
    found_interfaces: Vec<NetworkInterface>,
    interfaces: Option<Vec<String>>,
) -> Result<Vec<NetworkInterface>> {
    Ok(match interfaces {
        Some(interfaces) => interfaces
            .iter()
            .map(
                |interface| match found_interfaces.iter().find(|i| &i.name == interface) {
                    Some(i) => Ok(i.clone()),
                    None => bail!("unable to find interface {}", interface),
                },
            )
            .collect::<Result<Vec<_>, _>>()?,
        None => found_interfaces,
    })
}

/// default/min/max lease lifetimes for a subnet
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LeaseTime {
    default: Duration,
    min: Duration,
    max: Duration,
}

impl LeaseTime {
    /// build a triplet; min/max bracket what clients may request
    pub fn new(default: Duration, min: Duration, max: Duration) -> Self {
        Self { default, min, max }
    }
    /// the default lifetime
    pub fn get_default(&self) -> Duration {
        self.default
    }
    /// smallest lifetime a client may request
    pub fn get_min(&self) -> Duration {
        self.min
    }
    /// largest lifetime a client may request
    pub fn get_max(&self) -> Duration {
        self.max
    }
    /// calculate the lease time based on a possible requested time
    pub fn determine_lease(&self, requested: Option<Duration>) -> (Duration, Duration, Duration) {
        let LeaseTime { default, min, max } = *self;
        match requested {
            // time must be larger than `min` and smaller than `max`
            Some(req) => {
                let t = req.clamp(min, max);
                (t, renew(t), rebind(t))
            }
            None => (default, renew(default), rebind(default)),
        }
    }
}

/// T1 default: half the lease
pub fn renew(t: Duration) -> Duration {
    t / 2
}

/// T2 default: 7/8 of the lease
pub fn rebind(t: Duration) -> Duration {
    t * 7 / 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnet::Ipv4Net;
    use std::net::Ipv4Addr;

    #[test]
    fn address_ordering_and_bounds() {
        let net: Ipv4Net = "192.0.2.0/24".parse().unwrap();
        let a = Ipv4Addr::new(192, 0, 2, 77);
        // any address inside the prefix sits between first and last
        assert!(net.contains(&a));
        assert!(net.network() <= a && a <= net.broadcast());
        // a - a == 0
        assert_eq!(u32::from(a) - u32::from(a), 0);
    }

    #[test]
    fn increment_past_last_reaches_next_network() {
        let net: Ipv4Net = "192.0.2.0/24".parse().unwrap();
        let next: Ipv4Net = "192.0.3.0/24".parse().unwrap();
        let stepped = Ipv4Addr::from(u32::from(net.broadcast()) + 1);
        assert_eq!(stepped, next.network());
    }

    #[test]
    fn lease_time_triplet() {
        let lease = LeaseTime::new(
            Duration::from_secs(3600),
            Duration::from_secs(600),
            Duration::from_secs(7200),
        );
        let (t, t1, t2) = lease.determine_lease(None);
        assert_eq!(t, Duration::from_secs(3600));
        assert_eq!(t1, renew(t));
        assert_eq!(t2, rebind(t));
        // requests clamp to [min, max]
        assert_eq!(
            lease.determine_lease(Some(Duration::from_secs(1))).0,
            Duration::from_secs(600)
        );
        assert_eq!(
            lease.determine_lease(Some(Duration::from_secs(86_400))).0,
            Duration::from_secs(7200)
        );
    }
}
