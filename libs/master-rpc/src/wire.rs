//! protobuf bodies exchanged with the master
//!
//! Frames are a 2-byte big-endian length followed by at most
//! [`MAX_BODY_LEN`] bytes of protobuf.
use std::net::Ipv4Addr;

/// largest body either side may write
pub const MAX_BODY_LEN: usize = 2048;

/// why the slave is talking to the master
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MsgType {
    /// DISCOVER: pick a candidate address
    Discover = 0,
    /// REQUEST: commit an address
    Request = 1,
    /// client released its lease
    Release = 2,
    /// client declined the address
    Decline = 3,
    /// probe saw a reply on the candidate; re-offer
    Conflict = 4,
}

/// outcome of an allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum AllocResult {
    /// yiaddr is valid
    Ok = 0,
    /// the subnet is exhausted
    NoAddress = 1,
    /// the requested address belongs to someone else
    Conflict = 2,
    /// the requested address is not on the client's link
    NotOnLink = 3,
    /// transient master-side failure; client should retry
    Transient = 4,
}

/// one allocation (or notification) request
#[derive(Clone, PartialEq, prost::Message)]
pub struct AllocRequest {
    #[prost(enumeration = "MsgType", tag = "1")]
    pub msg_type: i32,
    #[prost(uint32, tag = "2")]
    pub subnet_id: u32,
    /// 0 when the subnet is not shared
    #[prost(uint32, tag = "3")]
    pub shared_subnet_id: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub client_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub hwaddr: Vec<u8>,
    /// requested address, or the conflicted candidate on retries
    #[prost(fixed32, tag = "6")]
    pub requested_addr: u32,
    #[prost(string, tag = "7")]
    pub hostname: String,
    /// bumped on every re-enqueue so the master can avoid re-offering
    #[prost(uint32, tag = "8")]
    pub retry_count: u32,
}

/// the master's answer
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct AllocResponse {
    #[prost(enumeration = "AllocResult", tag = "1")]
    pub result: i32,
    #[prost(fixed32, tag = "2")]
    pub yiaddr: u32,
    #[prost(uint32, tag = "3")]
    pub valid_lifetime: u32,
    #[prost(uint32, tag = "4")]
    pub t1: u32,
    #[prost(uint32, tag = "5")]
    pub t2: u32,
    #[prost(fixed32, tag = "6")]
    pub server_id: u32,
}

impl AllocRequest {
    /// set the requested/candidate address
    pub fn set_requested_addr(&mut self, ip: Ipv4Addr) -> &mut Self {
        self.requested_addr = u32::from(ip);
        self
    }

    /// typed message kind
    pub fn kind(&self) -> MsgType {
        MsgType::try_from(self.msg_type).unwrap_or(MsgType::Discover)
    }
}

impl AllocResponse {
    /// typed result
    pub fn outcome(&self) -> AllocResult {
        AllocResult::try_from(self.result).unwrap_or(AllocResult::Transient)
    }

    /// allocated address
    pub fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.yiaddr)
    }

    /// the master's server id, if it set one
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        if self.server_id == 0 {
            None
        } else {
            Some(Ipv4Addr::from(self.server_id))
        }
    }
}
