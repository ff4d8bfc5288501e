//! kestrel prelude

pub use crate::{
    anyhow::{self, Context, Result},
    async_trait,
    handler::{Action, Plugin, PostResponse},
    pnet::datalink::{MacAddr, NetworkInterface},
    pnet::ipnetwork::{IpNetwork, Ipv4Network},
    proto,
    server::{context::MsgContext, state::State},
    tokio,
    tracing::{self, debug, error, info, instrument, trace},
    unix_udp_sock,
};

pub use std::{io, net::Ipv4Addr, sync::Arc};
