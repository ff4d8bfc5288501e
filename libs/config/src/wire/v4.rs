//! # subnet4 wire format
//!
//! ## Pools
//!
//! Pools are written `"pool": "192.0.2.10 - 192.0.2.20"`; both ends are
//! inclusive and must be inside the subnet prefix.
//!
//! ## Client classes
//!
//! `client-class` (singular) or `client-classes` populate the allow
//! list; `deny-client-classes` the deny list. A subnet is eligible for
//! a query iff no denied class matched AND (the allow list is empty OR
//! at least one allowed class matched).
//!
//! ## Reservations
//!
//! A reservation matches on exactly one identifier: `hw-address`,
//! `duid`, `client-id` or `circuit-id`.
//!
//! ## Lifetimes
//!
//! `valid-lifetime` is the default, optionally bracketed by
//! `min-valid-lifetime`/`max-valid-lifetime` when the client asks for a
//! specific time. `renew-timer`/`rebind-timer` override T1/T2.
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use super::default_valid_lifetime;

/// one `subnet4` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Subnet {
    /// unique within the configuration; assigned from position if absent
    #[serde(default)]
    pub id: Option<u32>,
    /// prefix in CIDR form
    pub subnet: Ipv4Net,
    #[serde(default)]
    pub pools: Vec<Pool>,
    /// singular allow entry (merged into `client-classes`)
    #[serde(rename = "client-class", default)]
    pub client_class: Option<String>,
    /// allow list
    #[serde(rename = "client-classes", default)]
    pub client_classes: Vec<String>,
    /// deny list
    #[serde(rename = "deny-client-classes", default)]
    pub deny_client_classes: Vec<String>,
    /// options copied into responses on this subnet
    #[serde(rename = "option-data", default)]
    pub option_data: Vec<OptionData>,
    #[serde(rename = "valid-lifetime", default = "default_valid_lifetime")]
    pub valid_lifetime: u32,
    #[serde(rename = "min-valid-lifetime", default)]
    pub min_valid_lifetime: Option<u32>,
    #[serde(rename = "max-valid-lifetime", default)]
    pub max_valid_lifetime: Option<u32>,
    /// T1 override, seconds
    #[serde(rename = "renew-timer", default)]
    pub renew_timer: Option<u32>,
    /// T2 override, seconds
    #[serde(rename = "rebind-timer", default)]
    pub rebind_timer: Option<u32>,
    /// whether opt 61 participates in client identity
    #[serde(rename = "match-client-id", default = "default_match_client_id")]
    pub match_client_id: bool,
    /// siaddr override for responses
    #[serde(rename = "next-server", default)]
    pub next_server: Option<Ipv4Addr>,
    #[serde(default)]
    pub relay: Option<Relay>,
    /// subnets sharing a link carry the same id
    #[serde(rename = "shared-subnet-id", default)]
    pub shared_subnet_id: Option<u32>,
    #[serde(rename = "reservation-mode", default)]
    pub reservation_mode: ReservationMode,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

/// `"pool": "<first> - <last>"`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Pool {
    pub pool: String,
}

/// relay agent whose giaddr selects this subnet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Relay {
    #[serde(rename = "ip-address")]
    pub ip_address: Ipv4Addr,
}

/// host reservation lookup mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReservationMode {
    /// no reservation lookups on this subnet
    Disabled,
    /// only reservations outside the pools are honored
    OutOfPool,
    /// every reservation is honored
    #[default]
    All,
}

/// one reservation; exactly one identifier field must be set
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Reservation {
    #[serde(rename = "hw-address", default)]
    pub hw_address: Option<String>,
    #[serde(default)]
    pub duid: Option<String>,
    #[serde(rename = "client-id", default)]
    pub client_id: Option<String>,
    #[serde(rename = "circuit-id", default)]
    pub circuit_id: Option<String>,
    #[serde(rename = "ip-address")]
    pub ip_address: Ipv4Addr,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(rename = "client-classes", default)]
    pub client_classes: Vec<String>,
}

/// one `option-data` entry; `data`'s text form is interpreted by the
/// option's definition in the `dhcp4` space
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OptionData {
    pub code: u8,
    pub data: String,
}

fn default_match_client_id() -> bool {
    true
}
