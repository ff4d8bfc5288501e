//! context of current server message
use pnet::ipnetwork::Ipv4Network;
use proto::v4::{self, relay, Message, MessageType};
use tracing::{error, trace};
use unix_udp_sock::RecvMeta;

use std::{
    fmt,
    io::{self, Error, ErrorKind},
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    metrics::{self, RECV_TYPE_COUNT, SENT_TYPE_COUNT},
    server::{msg::SerialMsg, state::State, typemap::TypeMap},
};

/// Context is what will be passed to the [handler] traits and mutated by
/// the plugins to enrich with data.
///
/// [handler]: crate::handler
pub struct MsgContext {
    /// underlying byte message and address. msg_buf.addr will always be the
    /// address we received the message from
    msg_buf: SerialMsg,
    /// address received. This is initially set to the address of the
    /// UDP packet, but can be overridden with `set_src_addr`.
    src_addr: SocketAddr,
    /// address response sent to
    dst_addr: Option<SocketAddr>,
    /// when this context was created
    received_at: Instant,
    /// decoded from msg_buf
    msg: Message,
    /// decoded response msg -- **CAREFUL** do not call `take()` on this before
    /// logging the query (or we won't have the data for logging)
    resp_msg: Option<Message>,
    /// a type map for use by plugins to store values
    type_map: TypeMap,
    /// unique id we assign to each `MsgContext`
    id: u64,
    /// reference to `State`
    state: Arc<State>,
    /// whether the `MsgContext` counts towards `state.live_msgs`
    is_live: bool,
    /// metadata about the packet we received
    meta: RecvMeta,
    /// contains ip/mask/broadcast where we received msg from
    interface: Option<Ipv4Network>,
}

impl fmt::Debug for MsgContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgContext")
            .field("src_addr", &self.src_addr)
            .field("dst_addr", &self.dst_addr)
            .field("id", &self.id)
            .field("is_live", &self.is_live)
            .field("msg", &self.msg)
            .field("resp_msg", &self.resp_msg)
            .field("interface", &self.interface)
            .finish()
    }
}

impl Drop for MsgContext {
    fn drop(&mut self) {
        if self.is_live {
            self.state.dec_live_msgs();
        }
    }
}

impl MsgContext {
    /// Create a `MsgContext` with state
    pub fn new(msg_buf: SerialMsg, meta: RecvMeta, state: Arc<State>) -> io::Result<Self> {
        let msg: Message = msg_buf.to_msg()?;

        Ok(Self {
            msg_buf,
            src_addr: meta.addr,
            meta,
            dst_addr: None,
            received_at: Instant::now(),
            msg,
            type_map: TypeMap::new(),
            resp_msg: None,
            id: state.inc_id(),
            state,
            is_live: true,
            interface: None,
        })
    }

    /// Get the id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the `SerialMsg` bytes by shared ref
    pub fn bytes(&self) -> &[u8] {
        self.msg_buf.bytes()
    }

    /// return meta data associated with recv'd packet
    pub fn meta(&self) -> RecvMeta {
        self.meta
    }

    /// Get `SerialMsg` by shared ref
    pub fn msg_buf(&self) -> &SerialMsg {
        &self.msg_buf
    }

    /// when the context was created
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Store a value in the current `MsgContext` based on a type.
    /// This value will be available across any step in the lifecycle of a
    /// request
    ///
    /// If this type already exists, it will be returned
    pub fn set_local<U: Send + Sync + 'static>(&mut self, val: U) -> Option<U> {
        self.type_map.insert(val)
    }

    /// Return a value in the current `MsgContext` based on a type, or `None` if
    /// no such value is present.
    pub fn get_local<U: Send + Sync + 'static>(&self) -> Option<&U> {
        self.type_map.get::<U>()
    }

    /// Return a mutable reference to a value in the current `MsgContext` based
    /// on a type, or `None` if no such value is present.
    pub fn get_mut_local<U: Send + Sync + 'static>(&mut self) -> Option<&mut U> {
        self.type_map.get_mut::<U>()
    }

    /// Removes an item from the type map, returning it.
    pub fn remove_local<U: Send + Sync + 'static>(&mut self) -> Option<U> {
        self.type_map.remove::<U>()
    }

    /// Return the source address and port.
    pub fn src_addr(&self) -> SocketAddr {
        self.src_addr
    }

    /// Overrides the `src_addr` with a new address/port.
    pub fn set_src_addr(&mut self, addr: SocketAddr) {
        self.src_addr = addr;
    }

    /// Return the destination address and port IF it has been set.
    ///
    /// `dst_addr` is determined when a response is sent. It will most
    /// often be the IP of the DHCP relay (giaddr).
    pub fn dst_addr(&self) -> Option<SocketAddr> {
        self.dst_addr
    }

    /// Overrides the `dst_addr` with a new address/port.
    pub fn set_dst_addr(&mut self, addr: SocketAddr) {
        self.dst_addr = Some(addr);
    }

    /// Decrement the `state.live_msgs` counter and mark this as not live.
    /// This gets done before passing the `MsgContext` to the postresponse
    /// plugin.
    pub fn mark_as_not_live(&mut self) {
        if self.is_live {
            self.state.dec_live_msgs();
            self.is_live = false;
        }
    }

    /// The deserialized contents of `msg`
    pub fn msg(&self) -> &Message {
        &self.msg
    }

    /// The mutable deserialized contents of `msg`
    pub fn msg_mut(&mut self) -> &mut Message {
        &mut self.msg
    }

    /// The contents of `resp_msg`
    pub fn resp_msg(&self) -> Option<&Message> {
        self.resp_msg.as_ref()
    }

    /// sets the resp_msg with a `Message`
    pub fn set_resp_msg(&mut self, msg: Message) {
        self.resp_msg = Some(msg);
    }

    /// take response message and replace with None
    pub fn resp_msg_take(&mut self) -> Option<Message> {
        self.resp_msg.take()
    }

    /// The mutable deserialized contents of `resp_msg`
    pub fn resp_msg_mut(&mut self) -> Option<&mut Message> {
        self.resp_msg.as_mut()
    }

    /// Takes the decoded response message, encodes into a `SerialMsg`
    pub fn encode_resp_msg(&mut self) -> io::Result<SerialMsg> {
        let msg = self
            .resp_msg
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "no response message"))?;
        SerialMsg::from_msg(msg, self.msg_buf.addr())
    }

    /// set the interface for the message
    pub fn set_interface<I: Into<Ipv4Network>>(&mut self, interface: I) {
        self.interface = Some(interface.into());
    }

    /// get the interface for the message. this should always be set
    pub fn interface(&self) -> Option<Ipv4Network> {
        self.interface
    }

    /// determine the response addr based on request. Sets response giaddr
    /// if we are talking to a relay. Injects into ARP cache if response will be
    /// unicast to yiaddr.
    //
    /// From RFC (https://tools.ietf.org/html/rfc2131):
    //
    // 1. If the 'giaddr' field in a DHCP message from a client is non-zero,
    // the server sends any return messages to the 'DHCP server' port on the
    // BOOTP relay agent whose address appears in 'giaddr'.
    //
    // 2. If the 'giaddr' field is zero and the 'ciaddr' field is nonzero,
    // then the server unicasts DHCPOFFER and DHCPACK messages to the address in 'ciaddr'.
    //
    // 3. If 'giaddr' is zero and 'ciaddr' is zero, and the broadcast bit is
    // set, then the server broadcasts DHCPOFFER and DHCPACK messages to
    // 0xffffffff.
    //
    // 4. If the broadcast bit is not set and 'giaddr' is zero and
    // 'ciaddr' is zero, then the server unicasts DHCPOFFER and DHCPACK
    // messages to the client's hardware address and 'yiaddr' address.
    //
    // 5. In all cases, when 'giaddr' is zero, the server broadcasts any NAK
    // messages to 0xffffffff.
    pub fn resp_addr(&mut self, default_port: bool, soc: socket2::SockRef<'_>) -> SocketAddr {
        let req = self.msg();
        let giaddr = req.giaddr();
        let ciaddr = req.ciaddr();

        let (giaddr_zero, ciaddr_zero, broadcast) = (
            req.giaddr().is_unspecified(),
            req.ciaddr().is_unspecified(),
            req.flags().broadcast(),
        );
        let yiaddr = self.resp_msg().map(|msg| msg.yiaddr());

        if !default_port {
            trace!("using non-default port for response");
            // if we are not on the default v4 port, send the response
            // back to the source ip:port as unicast.
            // This is useful for testing
            self.msg_buf().addr()
        } else if !giaddr_zero {
            // relay situation: giaddr nonzero
            trace!("responding using giaddr");
            if let Some(resp) = self.resp_msg.as_mut() {
                resp.set_giaddr(giaddr);
            }
            (giaddr, v4::SERVER_PORT).into()
        } else if !ciaddr_zero {
            // giaddr zero, ciaddr nonzero
            trace!("responding using ciaddr");
            (ciaddr, v4::CLIENT_PORT).into()
        } else if !broadcast && matches!(yiaddr, Some(ip) if !ip.is_unspecified()) {
            // broadcast false and yiaddr exists
            // INJECT yiaddr IN ARP CACHE:
            trace!("responding using yiaddr");
            let yiaddr = yiaddr.unwrap();
            let htype = self.msg().htype();
            let chaddr = self.msg().chaddr();

            if let Err(err) = super::ioctl::arp_set(soc, yiaddr, htype, chaddr) {
                error!(
                    ?err,
                    "failed to inject into ARP cache-- fall back to broadcast"
                );

                (Ipv4Addr::BROADCAST, v4::CLIENT_PORT).into()
            } else {
                (yiaddr, v4::CLIENT_PORT).into()
            }
        } else {
            // broadcast set & giaddr/ciaddr zero
            // OR
            // otherwise just broadcast
            trace!("use broadcast addr");
            (Ipv4Addr::BROADCAST, v4::CLIENT_PORT).into()
        }
    }

    /// records metrics for recvd DHCP message
    pub fn recv_metrics(&self) {
        metrics::DHCPV4_BYTES_RECV.inc_by(self.bytes().len() as u64);
        match self.msg().opts().msg_type() {
            Some(MessageType::Discover) => RECV_TYPE_COUNT.discover.inc(),
            Some(MessageType::Request) => RECV_TYPE_COUNT.request.inc(),
            Some(MessageType::Decline) => RECV_TYPE_COUNT.decline.inc(),
            Some(MessageType::Release) => RECV_TYPE_COUNT.release.inc(),
            Some(MessageType::Offer) => RECV_TYPE_COUNT.offer.inc(),
            Some(MessageType::Ack) => RECV_TYPE_COUNT.ack.inc(),
            Some(MessageType::Nak) => RECV_TYPE_COUNT.nak.inc(),
            Some(MessageType::Inform) => RECV_TYPE_COUNT.inform.inc(),
            _ => RECV_TYPE_COUNT.unknown.inc(),
        }
    }

    /// records metrics for sent DHCP message
    pub fn sent_metrics(&self, elapsed: Duration) -> io::Result<()> {
        let elapsed = elapsed.as_secs_f64();
        match self
            .resp_msg()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "v4 response not found"))?
            .opts()
            .msg_type()
        {
            Some(MessageType::Offer) => {
                SENT_TYPE_COUNT.offer.inc();
                metrics::DHCPV4_REPLY_DURATION
                    .with_label_values(&["offer"])
                    .observe(elapsed);
            }
            Some(MessageType::Ack) => {
                SENT_TYPE_COUNT.ack.inc();
                metrics::DHCPV4_REPLY_DURATION
                    .with_label_values(&["ack"])
                    .observe(elapsed);
            }
            Some(MessageType::Nak) => {
                SENT_TYPE_COUNT.nak.inc();
                metrics::DHCPV4_REPLY_DURATION
                    .with_label_values(&["nak"])
                    .observe(elapsed);
            }
            Some(MessageType::Discover) => SENT_TYPE_COUNT.discover.inc(),
            Some(MessageType::Request) => SENT_TYPE_COUNT.request.inc(),
            Some(MessageType::Decline) => SENT_TYPE_COUNT.decline.inc(),
            Some(MessageType::Release) => SENT_TYPE_COUNT.release.inc(),
            Some(MessageType::Inform) => SENT_TYPE_COUNT.inform.inc(),
            _ => {
                metrics::DHCPV4_REPLY_DURATION
                    .with_label_values(&["unknown"])
                    .observe(elapsed);
                SENT_TYPE_COUNT.unknown.inc();
            }
        }
        Ok(())
    }

    /// replace `resp_msg` with a new message type
    /// should clear/update corresponding fields in the msg.
    /// for example, if switched to Nak, yiaddr/siaddr/ciaddr will be cleared
    pub fn update_resp_msg(&mut self, msg_type: MessageType) -> Option<()> {
        let resp = self.resp_msg_mut()?;
        let server_id = resp.opts().get(v4::code::SERVER_IDENTIFIER).cloned();
        let client_id = resp.opts().get(v4::code::CLIENT_IDENTIFIER).cloned();

        #[allow(clippy::single_match)]
        match msg_type {
            MessageType::Nak => {
                let giaddr = resp.giaddr();
                resp.clear_addrs();
                resp.clear_fname();
                resp.clear_sname();
                resp.set_giaddr(giaddr);
                // remove all opts. in the future, we may need to remove exclusively
                // what was added in the param req list, for now we will just remove all
                // and add back server identifier
                resp.opts_mut().clear();
                // add back the server identifier
                if let Some(server_opt) = server_id {
                    resp.opts_mut().insert(server_opt);
                }
                if let Some(client_id) = client_id {
                    resp.opts_mut().insert(client_id);
                }
            }
            _ => {}
        };
        resp.opts_mut()
            .insert(v4::DhcpOption::message_type(msg_type));
        Some(())
    }

    /// Look in `msg` and see if there was a lease time requested
    pub fn requested_lease_time(&self) -> Option<Duration> {
        self.msg()
            .opts()
            .get(v4::code::LEASE_TIME)
            .and_then(|opt| opt.data().u32())
            .map(|t| Duration::from_secs(t as u64))
    }

    /// Determine what the requested IP is
    /// If `ciaddr` is not unspecified, return it
    /// else if opts has a requested IP, return it,
    /// otherwise return None, there is no requested IP
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        let req = self.msg();
        if !req.ciaddr().is_unspecified() {
            // renew or rebind
            Some(req.ciaddr())
        } else {
            // recovering previously used IP
            req.opts()
                .get(v4::code::REQUESTED_IP)
                .and_then(|opt| opt.data().ip())
        }
    }

    /// determine the correct subnet of a DHCP message
    /// <https://www.rfc-editor.org/rfc/rfc3527.html>
    ///
    /// > In the event that a DHCP server receives a packet that contains both
    /// >  a subnet-selection option [RFC 3011], as well as a link-selection
    /// > sub-option, the information contained in the link-selection sub-
    /// > option MUST be used to control the allocation of an IP address in
    /// > preference to the information contained in the subnet-selection
    /// > option.
    ///
    /// # Returns
    /// returns an Err if no link/subnet/giaddr/ciaddr available
    pub fn relay_subnet(&self) -> io::Result<Ipv4Addr> {
        // get link-selection relay agent subopt first
        // OR use subnet-selection option
        let link = self
            .msg
            .opts()
            .get(v4::code::RELAY_AGENT_INFORMATION)
            .and_then(|opt| opt.data().bytes())
            .and_then(|payload| relay::RelayAgentInformation::decode(payload).ok())
            .and_then(|info| match info.get(relay::RelayCode::LinkSelection) {
                Some(relay::RelayInfo::LinkSelection(ip)) => Some(*ip),
                _ => None,
            })
            .or_else(|| {
                self.msg
                    .opts()
                    .get(v4::code::SUBNET_SELECTION)
                    .and_then(|opt| opt.data().ip())
            });
        let giaddr = self.msg().giaddr();
        let ciaddr = self.msg().ciaddr();

        if let Some(ip) = link {
            Ok(ip)
        } else if !giaddr.is_unspecified() {
            Ok(giaddr)
        } else if !ciaddr.is_unspecified() {
            Ok(ciaddr)
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "We can't determine which subnet to apply because:
                 - has no link selection relay info
                 - has no subnet selection option
                 - its giaddr is unspecified
                 - ciaddr is unspecified",
            ))
        }
    }

    /// tries to determine the subnet for this MsgContext. calls `relay_subnet` first,
    /// and if there is no relay information, falls back on the IP of the interface
    /// the message was recv'd on
    pub fn subnet(&self) -> io::Result<Ipv4Addr> {
        self.relay_subnet().or_else(|_| {
            self.interface().map(|int| int.ip()).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no interface set for MsgContext",
                )
            })
        })
    }

    /// looks in `msg` for a parameter request list and provides any options
    /// in `resp_msg` that match both in `param_opts` and in the param req list
    ///
    /// Copies over options from request that should be present on response.
    /// Also, looks at `interface` and adds subnetmask/router. If provided by
    /// `param_opts` these will be overwritten.
    pub fn populate_opts(&mut self, param_opts: &v4::DhcpOptions) -> Option<()> {
        let subnet = self.subnet();
        // https://datatracker.ietf.org/doc/html/rfc3046#section-2.2
        // copy opt 82 (relay agent) into response
        let resp = self.resp_msg.as_mut()?;
        if let Some(info) = self.msg.opts().get(v4::code::RELAY_AGENT_INFORMATION) {
            resp.opts_mut().insert(info.clone());
        }

        // https://datatracker.ietf.org/doc/html/rfc6842#section-3
        // copy client id
        if let Some(id) = self.msg.opts().get(v4::code::CLIENT_IDENTIFIER) {
            resp.opts_mut().insert(id.clone());
        }
        let mut interface_match = false;
        // insert router/netmask
        // if the config provides these also, they will be overwritten
        if let Some(interface) = self.interface {
            // if we populate from interface, interface must be on same subnet as packet (local)
            if matches!(subnet, Ok(subnet) if interface.contains(subnet)) {
                resp.opts_mut()
                    .insert(v4::DhcpOption::routers(vec![interface.ip()]));
                resp.opts_mut()
                    .insert(v4::DhcpOption::subnet_mask(interface.mask()));
                interface_match = true;
            }
            // configured router/netmask will override interface
            if let Some(v) = param_opts.get(v4::code::ROUTERS) {
                resp.opts_mut().insert(v.clone());
            }
            if let Some(v) = param_opts.get(v4::code::SUBNET_MASK) {
                resp.opts_mut().insert(v.clone());
            }
        }

        if let Some(requested) = self
            .msg
            .opts()
            .get(v4::code::PARAMETER_REQUEST_LIST)
            .and_then(|opt| opt.data().bytes())
        {
            // if broadcast addr is requested, try to fill from interface
            if let Some(interface) = self.interface {
                if requested.contains(&v4::code::BROADCAST_ADDRESS) && interface_match {
                    resp.opts_mut()
                        .insert(v4::DhcpOption::broadcast_address(interface.broadcast()));
                }
            }
            // look in the requested list of params
            for code in requested {
                // if we have that option, add it to the response
                if let Some(v) = param_opts.get(*code) {
                    resp.opts_mut().insert(v.clone());
                }
            }
        }
        Some(())
    }

    /// Populate the opts with lease times.
    /// looks in `msg` for a parameter request list and provides any options
    /// in `resp_msg` that match both in `param_opts` and in the param req list
    pub fn populate_opts_lease(
        &mut self,
        param_opts: &v4::DhcpOptions,
        lease: Duration,
        renew: Duration,
        rebind: Duration,
    ) -> Option<()> {
        self.populate_opts(param_opts)?;
        let resp = self.resp_msg.as_mut()?;
        resp.opts_mut()
            .insert(v4::DhcpOption::lease_time(whole_seconds(lease)));
        resp.opts_mut()
            .insert(v4::DhcpOption::renewal_time(whole_seconds(renew)));
        resp.opts_mut()
            .insert(v4::DhcpOption::rebinding_time(whole_seconds(rebind)));
        Some(())
    }
}

fn whole_seconds(t: Duration) -> u32 {
    if t.subsec_millis() >= 500 {
        t.as_secs() as u32 + 1
    } else {
        t.as_secs() as u32
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proto::Encodable;

    use super::*;

    fn blank_msg() -> anyhow::Result<(Message, SocketAddr, Arc<State>)> {
        let msg = Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0, 1, 2, 3, 4, 5],
        );
        let state = Arc::new(State::new(10));
        let addr = "1.2.3.4:67".parse()?;
        Ok((msg, addr, state))
    }

    fn ctx_from(msg: &Message, addr: SocketAddr, state: Arc<State>) -> anyhow::Result<MsgContext> {
        let meta = RecvMeta {
            addr,
            ..RecvMeta::default()
        };
        Ok(MsgContext::new(
            SerialMsg::new(Bytes::from(msg.to_vec()?), addr),
            meta,
            state,
        )?)
    }

    fn assert_opt(ctx: &MsgContext, opt: v4::DhcpOption) {
        assert_eq!(
            &opt,
            ctx.resp_msg().unwrap().opts().get(opt.code()).unwrap()
        );
    }

    #[test]
    fn test_subnet_giaddr() -> anyhow::Result<()> {
        let (mut msg, addr, state) = blank_msg()?;
        msg.set_giaddr([1, 2, 3, 4]);

        let ctx = ctx_from(&msg, addr, state)?;
        assert_eq!(ctx.relay_subnet()?, Ipv4Addr::new(1, 2, 3, 4));
        Ok(())
    }

    #[test]
    fn test_subnet_subnet_selection() -> anyhow::Result<()> {
        let (mut msg, addr, state) = blank_msg()?;
        msg.opts_mut()
            .insert(v4::DhcpOption::subnet_selection([1, 2, 3, 4].into()));
        let ctx = ctx_from(&msg, addr, state)?;
        assert_eq!(ctx.relay_subnet()?, Ipv4Addr::new(1, 2, 3, 4));
        Ok(())
    }

    #[test]
    fn test_subnet_relay_link_selection() -> anyhow::Result<()> {
        use relay::{RelayAgentInformation, RelayInfo};
        let (mut msg, addr, state) = blank_msg()?;
        let mut info = RelayAgentInformation::default();
        info.insert(RelayInfo::LinkSelection([1, 2, 3, 4].into()));
        // link-selection must beat the subnet-selection option
        msg.opts_mut()
            .insert(v4::DhcpOption::subnet_selection([9, 9, 9, 9].into()));
        let mut payload = vec![];
        info.encode(&mut proto::Encoder::new(&mut payload)).unwrap();
        msg.opts_mut().insert(v4::DhcpOption::new(
            v4::code::RELAY_AGENT_INFORMATION,
            v4::OptionData::Raw(payload),
        ));

        let ctx = ctx_from(&msg, addr, state)?;
        assert_eq!(ctx.relay_subnet()?, Ipv4Addr::new(1, 2, 3, 4));
        Ok(())
    }

    #[test]
    fn test_giaddr_unspecified() -> anyhow::Result<()> {
        let (msg, addr, state) = blank_msg()?;
        let ctx = ctx_from(&msg, addr, state)?;
        assert!(ctx.relay_subnet().is_err());
        Ok(())
    }

    // tests that the parameters in `msg` get fulfilled with a
    // given `opts` and placed in `resp_msg`
    #[test]
    fn test_param_req_list() -> anyhow::Result<()> {
        let (mut msg, addr, state) = blank_msg()?;
        // opt codes we are requesting
        msg.opts_mut()
            .insert(v4::DhcpOption::parameter_request_list(&[v4::code::ROUTERS]));
        // opts used to serve requests
        let mut opts = v4::DhcpOptions::default();
        opts.insert(v4::DhcpOption::routers(vec![[1, 2, 3, 4].into()]));
        opts.insert(v4::DhcpOption::new(
            v4::code::DOMAIN_NAME_SERVERS,
            v4::OptionData::AddrList(vec![[1, 2, 3, 4].into()]),
        ));
        let mut ctx = ctx_from(&msg, addr, state)?;
        ctx.set_resp_msg(Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[1, 2, 3, 4, 5, 6],
        ));
        // parse param req list, supplying opts
        ctx.populate_opts_lease(
            &opts,
            Duration::from_secs(3600),
            Duration::from_secs(3600 / 2),
            Duration::from_secs(3600 - (3600 * 7 / 8)),
        );
        // expect Router to be avail in ctx
        assert_opt(&ctx, v4::DhcpOption::routers(vec![[1, 2, 3, 4].into()]));
        assert_opt(&ctx, v4::DhcpOption::lease_time(3600));
        assert_opt(&ctx, v4::DhcpOption::renewal_time(3600 / 2));
        assert_opt(&ctx, v4::DhcpOption::rebinding_time(3600 - (3600 * 7 / 8)));
        // DNS was not requested, so it must not appear
        assert!(ctx
            .resp_msg()
            .unwrap()
            .opts()
            .get(v4::code::DOMAIN_NAME_SERVERS)
            .is_none());

        Ok(())
    }

    #[test]
    fn test_relay_agent_echoed() -> anyhow::Result<()> {
        let (mut msg, addr, state) = blank_msg()?;

        let mut rinfo = relay::RelayAgentInformation::default();
        rinfo.insert(relay::RelayInfo::LinkSelection([4, 5, 6, 7].into()));
        let mut payload = vec![];
        rinfo.encode(&mut proto::Encoder::new(&mut payload)).unwrap();
        let opt82 = v4::DhcpOption::new(
            v4::code::RELAY_AGENT_INFORMATION,
            v4::OptionData::Raw(payload),
        );
        // add relay agent info to received msg
        msg.opts_mut().insert(opt82.clone());
        let mut ctx = ctx_from(&msg, addr, state)?;
        ctx.set_resp_msg(Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[1, 2, 3, 4, 5, 6],
        ));
        let opts = v4::DhcpOptions::default();
        ctx.populate_opts(&opts);

        // expect relay agent to be echoed into resp
        assert_opt(&ctx, opt82);
        Ok(())
    }

    #[test]
    fn test_nak_clears_response() -> anyhow::Result<()> {
        let (msg, addr, state) = blank_msg()?;
        let mut ctx = ctx_from(&msg, addr, state)?;
        let mut resp = Message::new(
            Ipv4Addr::UNSPECIFIED,
            [192, 0, 2, 10].into(),
            [192, 0, 2, 1].into(),
            Ipv4Addr::UNSPECIFIED,
            &[1, 2, 3, 4, 5, 6],
        );
        resp.opts_mut()
            .insert(v4::DhcpOption::server_identifier([192, 0, 2, 1].into()));
        resp.opts_mut().insert(v4::DhcpOption::lease_time(3600));
        ctx.set_resp_msg(resp);

        ctx.update_resp_msg(MessageType::Nak).unwrap();
        let resp = ctx.resp_msg().unwrap();
        assert!(resp.yiaddr().is_unspecified());
        assert!(resp.siaddr().is_unspecified());
        assert!(resp.opts().has_msg_type(MessageType::Nak));
        // server id survives, lease time does not
        assert!(resp.opts().get(v4::code::SERVER_IDENTIFIER).is_some());
        assert!(resp.opts().get(v4::code::LEASE_TIME).is_none());
        Ok(())
    }

    #[test]
    fn test_take() -> anyhow::Result<()> {
        let (msg, addr, state) = blank_msg()?;
        let mut ctx = ctx_from(&msg, addr, state)?;
        ctx.set_resp_msg(Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[1, 2, 3, 4, 5, 6],
        ));

        ctx.resp_msg_take();
        assert_eq!(ctx.resp_msg(), None);
        Ok(())
    }
}
