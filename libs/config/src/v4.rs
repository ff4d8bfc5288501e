use std::{
    net::Ipv4Addr,
    ops::RangeInclusive,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use ipnet::Ipv4Net;
use kestrel_core::pnet::{
    datalink::NetworkInterface,
    ipnetwork::{IpNetwork, Ipv4Network},
};
use proto::v4::{dhcp4_space, DataType, DhcpOption, DhcpOptions, Message, OptionData};
use serde_json::Value;
use tracing::debug;

use crate::{client_classes::ClientClasses, wire, LeaseTime};

pub use wire::v4::ReservationMode;

/// server config for dhcpv4
#[derive(Debug)]
pub struct Config {
    /// interfaces that are either explicitly bound by the config or
    /// are up & ipv4
    interfaces: Vec<NetworkInterface>,
    /// subnets in declaration order; shared subnets are walked in this
    /// order too
    subnets: Vec<Arc<Subnet>>,
    client_classes: ClientClasses,
    rpc: RpcConfig,
    ping: PingConfig,
    hooks: Vec<wire::HooksLibrary>,
    /// opaque, owned by the master
    lease_database: Value,
}

impl TryFrom<wire::Config> for Config {
    type Error = anyhow::Error;
    fn try_from(cfg: wire::Config) -> Result<Self> {
        let names = cfg.interfaces_config.interfaces;
        let names = if names.is_empty() || names.iter().any(|n| n == "*") {
            None
        } else {
            Some(names)
        };
        let interfaces = crate::v4_find_interfaces(names)?;
        debug!(?interfaces, "using v4 interfaces");

        let client_classes = ClientClasses::from_wire(cfg.client_classes)
            .context("unable to parse client-classes config")?;

        let mut subnets = Vec::with_capacity(cfg.subnet4.len());
        let mut next_pool_id = 1;
        for (i, net) in cfg.subnet4.into_iter().enumerate() {
            let subnet = Subnet::from_wire(net, i as u32 + 1, &mut next_pool_id)
                .with_context(|| format!("invalid subnet4 entry {i}"))?;
            if subnets.iter().any(|s: &Arc<Subnet>| s.id == subnet.id) {
                bail!("duplicate subnet id {}", subnet.id);
            }
            subnets.push(Arc::new(subnet));
        }

        Ok(Self {
            interfaces,
            subnets,
            client_classes,
            rpc: RpcConfig::from(cfg.rpc_server),
            ping: PingConfig::from(cfg.ping),
            hooks: cfg.hooks_libraries,
            lease_database: cfg.lease_database,
        })
    }
}

impl Config {
    /// the bound interfaces
    pub fn interfaces(&self) -> &[NetworkInterface] {
        self.interfaces.as_slice()
    }

    /// find the interface at index `iface_index`
    pub fn find_interface(&self, iface_index: u32) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|e| e.index == iface_index)
    }

    /// the primary v4 network of the interface at `iface_index`
    pub fn find_network(&self, iface_index: u32) -> Option<Ipv4Network> {
        self.find_interface(iface_index).and_then(|int| {
            int.ips.iter().find_map(|ip| match ip {
                IpNetwork::V4(ip) => Some(*ip),
                _ => None,
            })
        })
    }

    /// the server identifier (option 54) for responses on this link:
    /// our own address on the ingress interface
    pub fn server_id(&self, iface_index: u32) -> Option<Ipv4Addr> {
        self.find_network(iface_index).map(|net| net.ip())
    }

    /// all subnets, declaration order
    pub fn subnets(&self) -> &[Arc<Subnet>] {
        &self.subnets
    }

    /// subnet by configured id
    pub fn subnet_by_id(&self, id: u32) -> Option<&Arc<Subnet>> {
        self.subnets.iter().find(|s| s.id == id)
    }

    /// Subnets a query on `link` may allocate from, in declaration
    /// order. `link` has already been resolved from link-selection /
    /// giaddr / interface (highest priority first); class filtering per
    /// the allow/deny rule happens here.
    pub fn eligible_subnets<'a>(
        &'a self,
        link: Ipv4Addr,
        classes: &'a [String],
    ) -> impl Iterator<Item = &'a Arc<Subnet>> + 'a {
        self.subnets.iter().filter(move |s| {
            (s.prefix.contains(&link) || s.relay == Some(link)) && s.matches_classes(classes)
        })
    }

    /// the first eligible subnet for this link, or `None`
    pub fn select_subnet(&self, link: Ipv4Addr, classes: &[String]) -> Option<Arc<Subnet>> {
        self.eligible_subnets(link, classes).next().cloned()
    }

    /// evaluate every class in insertion order, returning the names
    /// whose predicates matched
    pub fn eval_client_classes(&self, msg: &Message) -> Vec<String> {
        self.client_classes.eval(msg)
    }

    /// compiled classes
    pub fn classes(&self) -> &ClientClasses {
        &self.client_classes
    }

    /// Determine client identity for `msg` on `subnet`: opt 61 when the
    /// subnet matches client ids, otherwise `chaddr`
    pub fn client_id<'a>(&self, msg: &'a Message, subnet: &Subnet) -> &'a [u8] {
        if subnet.match_client_id {
            if let Some(id) = msg
                .opts()
                .get(proto::v4::code::CLIENT_IDENTIFIER)
                .and_then(|opt| opt.data().bytes())
            {
                return id;
            }
        }
        msg.chaddr()
    }

    /// master RPC settings
    pub fn rpc(&self) -> &RpcConfig {
        &self.rpc
    }

    /// conflict probe settings
    pub fn ping(&self) -> &PingConfig {
        &self.ping
    }

    /// configured hook libraries
    pub fn hooks(&self) -> &[wire::HooksLibrary] {
        &self.hooks
    }

    /// opaque lease-database section, forwarded to the master
    pub fn lease_database(&self) -> &Value {
        &self.lease_database
    }
}

/// master RPC client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub host: std::net::IpAddr,
    pub port: u16,
    pub connections: usize,
    pub max_retries: u32,
}

impl From<wire::RpcServer> for RpcConfig {
    fn from(w: wire::RpcServer) -> Self {
        Self {
            host: w.host,
            port: w.port,
            connections: w.connections.max(1),
            max_retries: w.max_retries,
        }
    }
}

impl RpcConfig {
    /// host:port of the master
    pub fn addr(&self) -> std::net::SocketAddr {
        (self.host, self.port).into()
    }
}

/// conflict probe settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingConfig {
    pub enable: bool,
    pub timeout: Duration,
    pub queue_size: usize,
}

impl From<wire::Ping> for PingConfig {
    fn from(w: wire::Ping) -> Self {
        Self {
            enable: w.enable,
            timeout: w.timeout(),
            queue_size: w.queue_size,
        }
    }
}

/// A contiguous range of addresses inside a subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    id: u32,
    addrs: RangeInclusive<Ipv4Addr>,
}

impl Pool {
    /// pool id, monotonically assigned across the configuration
    pub fn id(&self) -> u32 {
        self.id
    }
    /// first address
    pub fn first(&self) -> Ipv4Addr {
        *self.addrs.start()
    }
    /// last address
    pub fn last(&self) -> Ipv4Addr {
        *self.addrs.end()
    }
    /// number of addresses in the range
    pub fn capacity(&self) -> u64 {
        u32::from(self.last()) as u64 - u32::from(self.first()) as u64 + 1
    }
    /// true if the pool holds `ip`
    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.addrs.contains(ip)
    }

    fn parse(text: &str, id: u32, prefix: Ipv4Net) -> Result<Self> {
        let (first, last) = text
            .split_once('-')
            .with_context(|| format!("pool {text:?} is not `first - last`"))?;
        let first: Ipv4Addr = first.trim().parse().context("bad pool start")?;
        let last: Ipv4Addr = last.trim().parse().context("bad pool end")?;
        if first > last {
            bail!("pool {text:?} ends before it starts");
        }
        if !prefix.contains(&first) || !prefix.contains(&last) {
            bail!("pool {text:?} lies outside subnet {prefix}");
        }
        Ok(Self {
            id,
            addrs: first..=last,
        })
    }
}

/// identifier a host reservation matches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostIdentifier {
    HwAddr(Vec<u8>),
    Duid(Vec<u8>),
    ClientId(Vec<u8>),
    CircuitId(Vec<u8>),
}

/// a static host reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReservation {
    identifier: HostIdentifier,
    ip: Ipv4Addr,
    hostname: Option<String>,
    classes: Vec<String>,
}

impl HostReservation {
    /// the reserved address
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }
    /// reserved hostname, if any
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
    /// the identifier this reservation matches
    pub fn identifier(&self) -> &HostIdentifier {
        &self.identifier
    }
    /// if the reservation names classes, at least one must have matched
    pub fn match_class(&self, classes: &[String]) -> bool {
        self.classes.is_empty() || self.classes.iter().any(|c| classes.contains(c))
    }

    fn from_wire(res: wire::v4::Reservation, prefix: Ipv4Net) -> Result<Self> {
        let identifier = match (&res.hw_address, &res.duid, &res.client_id, &res.circuit_id) {
            (Some(hw), None, None, None) => HostIdentifier::HwAddr(parse_hex_bytes(hw)?),
            (None, Some(duid), None, None) => HostIdentifier::Duid(parse_hex_bytes(duid)?),
            (None, None, Some(id), None) => HostIdentifier::ClientId(parse_hex_bytes(id)?),
            (None, None, None, Some(circ)) => HostIdentifier::CircuitId(parse_hex_bytes(circ)?),
            _ => bail!("reservation must carry exactly one identifier"),
        };
        if !prefix.contains(&res.ip_address) {
            bail!(
                "reserved address {} lies outside subnet {prefix}",
                res.ip_address
            );
        }
        Ok(Self {
            identifier,
            ip: res.ip_address,
            hostname: res.hostname,
            classes: res.client_classes,
        })
    }
}

/// A configured subnet. Carries its pools, class gates, reservations,
/// response options and lifetimes; the last-allocated cursor is the
/// only mutable state and lives behind its own lock.
#[derive(Debug)]
pub struct Subnet {
    id: u32,
    prefix: Ipv4Net,
    pools: Vec<Pool>,
    allow_classes: Vec<String>,
    deny_classes: Vec<String>,
    opts: DhcpOptions,
    lease: LeaseTime,
    renew_timer: Option<Duration>,
    rebind_timer: Option<Duration>,
    match_client_id: bool,
    siaddr: Option<Ipv4Addr>,
    relay: Option<Ipv4Addr>,
    shared_subnet_id: Option<u32>,
    reservation_mode: ReservationMode,
    reservations: Vec<HostReservation>,
    /// most recent address the master handed out here
    last_allocated: Mutex<Option<Ipv4Addr>>,
}

impl Subnet {
    fn from_wire(net: wire::v4::Subnet, fallback_id: u32, next_pool_id: &mut u32) -> Result<Self> {
        let prefix = net.subnet;
        let mut pools = Vec::with_capacity(net.pools.len());
        for p in &net.pools {
            let pool = Pool::parse(&p.pool, *next_pool_id, prefix)?;
            *next_pool_id += 1;
            // pools within a subnet must not overlap
            if pools
                .iter()
                .any(|q: &Pool| q.contains(&pool.first()) || pool.contains(&q.first()))
            {
                bail!("pool {:?} overlaps another pool", p.pool);
            }
            pools.push(pool);
        }

        let mut opts = DhcpOptions::new();
        for od in &net.option_data {
            opts.insert(
                parse_option_data(od.code, &od.data)
                    .with_context(|| format!("option-data code {}", od.code))?,
            );
        }

        let mut allow_classes = net.client_classes;
        if let Some(single) = net.client_class {
            if !allow_classes.contains(&single) {
                allow_classes.push(single);
            }
        }

        let reservations = net
            .reservations
            .into_iter()
            .map(|res| HostReservation::from_wire(res, prefix))
            .collect::<Result<Vec<_>>>()?;

        let valid = Duration::from_secs(net.valid_lifetime as u64);
        let lease = LeaseTime::new(
            valid,
            Duration::from_secs(net.min_valid_lifetime.unwrap_or(net.valid_lifetime) as u64),
            Duration::from_secs(net.max_valid_lifetime.unwrap_or(net.valid_lifetime) as u64),
        );

        Ok(Self {
            id: net.id.unwrap_or(fallback_id),
            prefix,
            pools,
            allow_classes,
            deny_classes: net.deny_client_classes,
            opts,
            lease,
            renew_timer: net.renew_timer.map(|t| Duration::from_secs(t as u64)),
            rebind_timer: net.rebind_timer.map(|t| Duration::from_secs(t as u64)),
            match_client_id: net.match_client_id,
            siaddr: net.next_server,
            relay: net.relay.map(|r| r.ip_address),
            shared_subnet_id: net.shared_subnet_id,
            reservation_mode: net.reservation_mode,
            reservations,
            last_allocated: Mutex::new(None),
        })
    }

    /// subnet id, unique within the configuration
    pub fn id(&self) -> u32 {
        self.id
    }
    /// the prefix
    pub fn prefix(&self) -> Ipv4Net {
        self.prefix
    }
    /// pools in declaration order
    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }
    /// options inherited into responses on this subnet
    pub fn opts(&self) -> &DhcpOptions {
        &self.opts
    }
    /// siaddr override for responses
    pub fn siaddr(&self) -> Option<Ipv4Addr> {
        self.siaddr
    }
    /// relay agent address that selects this subnet
    pub fn relay(&self) -> Option<Ipv4Addr> {
        self.relay
    }
    /// shared-subnet group id
    pub fn shared_subnet_id(&self) -> Option<u32> {
        self.shared_subnet_id
    }
    /// whether opt 61 participates in client identity here
    pub fn match_client_id(&self) -> bool {
        self.match_client_id
    }
    /// lifetime triplet
    pub fn lease(&self) -> LeaseTime {
        self.lease
    }

    /// true if `ip` is inside the prefix
    pub fn in_range(&self, ip: Ipv4Addr) -> bool {
        self.prefix.contains(&ip)
    }
    /// true if any pool holds `ip`
    pub fn in_pool(&self, ip: Ipv4Addr) -> bool {
        self.pools.iter().any(|p| p.contains(&ip))
    }

    /// A subnet is eligible iff every class in its deny-list is absent
    /// from the query's class set AND (its allow-list is empty OR at
    /// least one allowed class is present).
    pub fn matches_classes(&self, classes: &[String]) -> bool {
        let denied = self.deny_classes.iter().any(|c| classes.contains(c));
        let allowed =
            self.allow_classes.is_empty() || self.allow_classes.iter().any(|c| classes.contains(c));
        !denied && allowed
    }

    /// (valid, t1, t2) honoring a requested lease time and any
    /// configured timer overrides
    pub fn determine_lease(&self, requested: Option<Duration>) -> (Duration, Duration, Duration) {
        let (valid, t1, t2) = self.lease.determine_lease(requested);
        (
            valid,
            self.renew_timer.unwrap_or(t1),
            self.rebind_timer.unwrap_or(t2),
        )
    }

    /// find a reservation matching any of the query's identifiers,
    /// honoring the subnet's reservation mode
    pub fn find_reservation(
        &self,
        identifiers: &[HostIdentifier],
        classes: &[String],
    ) -> Option<&HostReservation> {
        if self.reservation_mode == ReservationMode::Disabled {
            return None;
        }
        self.reservations.iter().find(|res| {
            identifiers.contains(&res.identifier)
                && res.match_class(classes)
                && (self.reservation_mode == ReservationMode::All || !self.in_pool(res.ip))
        })
    }

    /// reservation lookup by address
    pub fn find_reservation_by_ip(&self, ip: Ipv4Addr) -> Option<&HostReservation> {
        if self.reservation_mode == ReservationMode::Disabled {
            return None;
        }
        self.reservations.iter().find(|res| res.ip == ip)
    }

    /// the most recent address the master allocated on this subnet
    pub fn last_allocated(&self) -> Option<Ipv4Addr> {
        *self.last_allocated.lock().unwrap()
    }

    /// advance the last-allocated cursor
    pub fn set_last_allocated(&self, ip: Ipv4Addr) {
        *self.last_allocated.lock().unwrap() = Some(ip);
    }
}

/// interpret an `option-data` value by its definition in the `dhcp4`
/// space; unknown codes take hex bytes
fn parse_option_data(code: u8, data: &str) -> Result<DhcpOption> {
    let data = data.trim();
    let parsed = match dhcp4_space().get(code).map(|d| (d.data_type(), d.is_array())) {
        Some((DataType::Ipv4, true)) => OptionData::AddrList(
            data.split(',')
                .map(|s| s.trim().parse::<Ipv4Addr>())
                .collect::<Result<Vec<_>, _>>()
                .context("bad address list")?,
        ),
        Some((DataType::Ipv4, false)) => {
            OptionData::AddrList(vec![data.parse().context("bad address")?])
        }
        Some((DataType::U8, _)) => OptionData::U8(data.parse().context("bad u8")?),
        Some((DataType::Bool, _)) => OptionData::U8(match data {
            "true" | "1" => 1,
            "false" | "0" => 0,
            other => bail!("bad bool {other:?}"),
        }),
        Some((DataType::U16, _)) => OptionData::U16(data.parse().context("bad u16")?),
        Some((DataType::U32, _)) => OptionData::U32(data.parse().context("bad u32")?),
        Some((DataType::Str, _)) => {
            if data.is_empty() {
                bail!("string option may not be empty");
            }
            OptionData::Str(data.to_string())
        }
        // binary & anything exotic: hex text
        _ => OptionData::Raw(parse_hex_bytes(data)?),
    };
    Ok(DhcpOption::new(code, parsed))
}

/// parse hex with optional `:`/`-` separators
fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let cleaned: String = text.chars().filter(|c| *c != ':' && *c != '-').collect();
    hex::decode(&cleaned).with_context(|| format!("bad hex bytes {text:?}"))
}

#[cfg(test)]
mod tests {
    use proto::v4::MessageType;

    use super::*;

    pub static SAMPLE_JSON: &str = include_str!("../sample/config.json");

    fn sample() -> Config {
        crate::DhcpConfig::parse_str(SAMPLE_JSON).unwrap().into_v4()
    }

    fn query(class: Option<&str>) -> Message {
        let uns = Ipv4Addr::UNSPECIFIED;
        let mut msg = Message::new(uns, uns, uns, uns, &[0, 1, 2, 3, 4, 5]);
        msg.opts_mut()
            .insert(DhcpOption::message_type(MessageType::Discover));
        if let Some(class) = class {
            msg.opts_mut()
                .insert(DhcpOption::vendor_class_identifier(class));
        }
        msg
    }

    #[test]
    fn test_sample_decodes() {
        let cfg = sample();
        let subnet = cfg.select_subnet([192, 168, 0, 1].into(), &[]).unwrap();
        assert_eq!(subnet.id(), 1);
        assert_eq!(subnet.pools()[0].first(), Ipv4Addr::new(192, 168, 0, 100));
        assert_eq!(
            subnet.opts().get(proto::v4::code::ROUTERS).unwrap(),
            &DhcpOption::routers(vec![[192, 168, 0, 1].into()])
        );
        assert_eq!(subnet.pools()[0].capacity(), 101);
    }

    #[test]
    fn test_class_gate() {
        let cfg = sample();
        // 192.0.2.0/24 allows only `msft`
        let classes = cfg.eval_client_classes(&query(Some("MSFT 5.0")));
        assert_eq!(classes, vec!["msft".to_string()]);
        assert!(cfg.select_subnet([192, 0, 2, 1].into(), &classes).is_some());
        assert!(cfg.select_subnet([192, 0, 2, 1].into(), &[]).is_none());
    }

    #[test]
    fn test_deny_beats_allow() {
        let cfg = sample();
        // 10.5.0.0/16 denies `msft`
        let classes = vec!["msft".to_string()];
        assert!(cfg.select_subnet([10, 5, 0, 1].into(), &classes).is_none());
        assert!(cfg.select_subnet([10, 5, 0, 1].into(), &[]).is_some());
    }

    #[test]
    fn test_subnet_inclusion() {
        let cfg = sample();
        let subnet = cfg.select_subnet([192, 168, 0, 1].into(), &[]).unwrap();
        for pool in subnet.pools() {
            let mut ip = pool.first();
            loop {
                assert!(subnet.in_range(ip) && subnet.in_pool(ip));
                if ip == pool.last() {
                    break;
                }
                ip = Ipv4Addr::from(u32::from(ip) + 1);
            }
        }
        // network address is in range but not in any pool
        assert!(subnet.in_range([192, 168, 0, 5].into()));
        assert!(!subnet.in_pool([192, 168, 0, 5].into()));
    }

    #[test]
    fn test_reservation_lookup() {
        let cfg = sample();
        let subnet = cfg.select_subnet([192, 168, 0, 1].into(), &[]).unwrap();
        let ids = [HostIdentifier::HwAddr(vec![0xaa, 0xbb, 0xcc, 0, 0, 1])];
        let res = subnet.find_reservation(&ids, &[]).unwrap();
        assert_eq!(res.ip(), Ipv4Addr::new(192, 168, 0, 50));
        assert_eq!(res.hostname(), Some("printer"));
        assert!(subnet
            .find_reservation(&[HostIdentifier::HwAddr(vec![1, 2, 3])], &[])
            .is_none());
        assert!(subnet
            .find_reservation_by_ip([192, 168, 0, 50].into())
            .is_some());
    }

    #[test]
    fn test_last_allocated_cursor() {
        let cfg = sample();
        let subnet = cfg.select_subnet([192, 168, 0, 1].into(), &[]).unwrap();
        assert_eq!(subnet.last_allocated(), None);
        subnet.set_last_allocated([192, 168, 0, 100].into());
        subnet.set_last_allocated([192, 168, 0, 101].into());
        assert_eq!(subnet.last_allocated(), Some([192, 168, 0, 101].into()));
    }

    #[test]
    fn test_pool_outside_prefix_rejected() {
        let bad = r#"{
            "rpc-server": {"host": "127.0.0.1", "port": 6901},
            "subnet4": [{
                "subnet": "192.0.2.0/24",
                "pools": [{"pool": "192.0.3.10 - 192.0.3.20"}]
            }]
        }"#;
        assert!(crate::DhcpConfig::parse_str(bad).is_err());
    }

    #[test]
    fn test_overlapping_pools_rejected() {
        let bad = r#"{
            "rpc-server": {"host": "127.0.0.1", "port": 6901},
            "subnet4": [{
                "subnet": "192.0.2.0/24",
                "pools": [
                    {"pool": "192.0.2.10 - 192.0.2.20"},
                    {"pool": "192.0.2.15 - 192.0.2.30"}
                ]
            }]
        }"#;
        assert!(crate::DhcpConfig::parse_str(bad).is_err());
    }

    #[test]
    fn test_bad_class_expression_rejected() {
        let bad = r#"{
            "rpc-server": {"host": "127.0.0.1", "port": 6901},
            "client-classes": [{"name": "broken", "test": "option[nonesuch].exists"}]
        }"#;
        assert!(crate::DhcpConfig::parse_str(bad).is_err());
    }

    #[test]
    fn test_determine_lease_clamps() {
        let cfg = sample();
        let subnet = cfg.select_subnet([192, 168, 0, 1].into(), &[]).unwrap();
        // sample: valid 3600, min 600, max 7200
        let (valid, t1, t2) = subnet.determine_lease(None);
        assert_eq!(valid, Duration::from_secs(3600));
        assert_eq!(t1, Duration::from_secs(1800));
        assert_eq!(t2, Duration::from_secs(3150));
        let (valid, ..) = subnet.determine_lease(Some(Duration::from_secs(60)));
        assert_eq!(valid, Duration::from_secs(600));
        let (valid, ..) = subnet.determine_lease(Some(Duration::from_secs(86_400)));
        assert_eq!(valid, Duration::from_secs(7200));
    }

    #[test]
    fn test_shared_subnets_iterate_in_declaration_order() {
        let cfg = sample();
        // two subnets share link 10.5.0.0/16 via shared-subnet-id
        let eligible: Vec<u32> = cfg
            .eligible_subnets([10, 5, 0, 1].into(), &[])
            .map(|s| s.id())
            .collect();
        assert_eq!(eligible, vec![3, 4]);
        assert_eq!(
            cfg.subnet_by_id(3).unwrap().shared_subnet_id(),
            cfg.subnet_by_id(4).unwrap().shared_subnet_id()
        );
    }
}
