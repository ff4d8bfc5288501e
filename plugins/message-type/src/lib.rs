#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

//! First stage of the plugin chain: pins a config snapshot for the
//! query, classifies the client, selects the subnet, and builds the
//! base response. Later stages (host-reservation, allocation) consume
//! what this stage leaves in the context.

use kestrel_core::{
    prelude::*,
    proto::v4::{self, Message, MessageType, Opcode},
    tokio::sync::watch,
};
use std::fmt::Debug;

use config::{v4::Subnet, DhcpConfig};

/// live-reconfigurable handle to the parsed server config
pub type ConfigRx = watch::Receiver<Arc<DhcpConfig>>;

/// The config snapshot this query runs against. Pinned at intake so a
/// `reconfig` mid-flight never mixes two configurations in one query.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot(pub Arc<DhcpConfig>);

/// a list of matching client classes for this message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedClasses(pub Vec<String>);

/// the subnet the selector picked for this message
#[derive(Debug, Clone)]
pub struct SelectedSubnet(pub Arc<Subnet>);

pub struct MsgType {
    cfg: ConfigRx,
}

impl Debug for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgType").finish()
    }
}

impl MsgType {
    pub fn new(cfg: ConfigRx) -> Result<Self> {
        Ok(Self { cfg })
    }
}

#[async_trait]
impl Plugin for MsgType {
    #[instrument(level = "debug", skip_all)]
    async fn handle(&self, ctx: &mut MsgContext) -> Result<Action> {
        // pin the snapshot; every later stage of this query uses it
        let cfg = self.cfg.borrow().clone();

        // set the interface, using data from config
        // MsgType plugin must run first because future plugins use this data
        let meta = ctx.meta();
        let interface = cfg
            .v4()
            .find_network(meta.ifindex)
            .context("interface message was received on does not exist?")?;
        ctx.set_interface(interface);

        let req = ctx.msg();
        let msg_type = req.opts().msg_type();

        debug!(
            opcode = ?req.opcode(),
            msg_type = ?msg_type,
            src_addr = %ctx.src_addr(),
            req = %ctx.msg(),
        );

        if req.opcode() != Opcode::BootRequest {
            debug!("only BootRequest is served");
            return Ok(Action::NoResponse);
        }

        // otherwise our interface IP is the id
        let server_id = cfg
            .v4()
            .server_id(meta.ifindex)
            .context("cannot find server_id")?;
        // if there is a server identifier it must match ours
        if matches!(
            req.opts().get(v4::code::SERVER_IDENTIFIER).and_then(|opt| opt.data().ip()),
            Some(id) if id != server_id && !id.is_unspecified()
        ) {
            debug!(?server_id, "server identifier in msg doesn't match");
            return Ok(Action::NoResponse);
        }

        // evaluate client classes against the query
        let matched = cfg.v4().eval_client_classes(req);
        debug!(matched_classes = ?matched, "matched classes");

        // pick the subnet: link-selection/giaddr/interface resolved the
        // link, then the class allow/deny gate filters candidates
        let link = ctx.subnet()?;
        let subnet = cfg.v4().select_subnet(link, &matched);

        let Some(subnet) = subnet else {
            // no eligible subnet: NAK a REQUEST, stay silent otherwise
            if msg_type == Some(MessageType::Request) {
                debug!(%link, "no eligible subnet, NAK");
                let mut resp = util::new_msg(ctx.msg(), Ipv4Addr::UNSPECIFIED);
                resp.opts_mut()
                    .insert(v4::DhcpOption::server_identifier(server_id));
                resp.opts_mut()
                    .insert(v4::DhcpOption::message_type(MessageType::Nak));
                ctx.set_resp_msg(resp);
                return Ok(Action::Respond);
            }
            debug!(%link, "no eligible subnet, dropping");
            return Ok(Action::NoResponse);
        };

        // message that will be returned
        let mut resp = util::new_msg(req, subnet.siaddr().unwrap_or(Ipv4Addr::UNSPECIFIED));
        // add server id to response
        resp.opts_mut()
            .insert(v4::DhcpOption::server_identifier(server_id));

        match msg_type {
            Some(MessageType::Discover) => {
                resp.opts_mut()
                    .insert(v4::DhcpOption::message_type(MessageType::Offer));
            }
            Some(MessageType::Request) => {
                if ctx.msg().giaddr().is_unspecified() {
                    let flags = ctx.msg().flags();
                    resp.set_flags(flags.set_broadcast());
                }
                resp.opts_mut()
                    .insert(v4::DhcpOption::message_type(MessageType::Ack));
            }
            // INFORM completes inline: ACK with options, no address
            Some(MessageType::Inform) => {
                resp.opts_mut()
                    .insert(v4::DhcpOption::message_type(MessageType::Ack));
                ctx.set_resp_msg(resp);
                ctx.populate_opts(subnet.opts());
                ctx.set_local(MatchedClasses(matched));
                ctx.set_local(SelectedSubnet(subnet));
                ctx.set_local(ConfigSnapshot(cfg));
                return Ok(Action::Respond);
            }
            // release/decline produce no reply; the allocation stage
            // forwards the notification to the master
            Some(MessageType::Release) | Some(MessageType::Decline) => {}
            _ => {
                debug!("unsupported message type");
                return Ok(Action::NoResponse);
            }
        }

        ctx.set_local(MatchedClasses(matched));
        ctx.set_local(SelectedSubnet(subnet));
        ctx.set_local(ConfigSnapshot(cfg));
        ctx.set_resp_msg(resp);
        Ok(Action::Continue)
    }
}

pub mod util {
    use super::*;

    /// base BOOTREPLY mirroring the query's identity fields
    pub fn new_msg(req: &Message, siaddr: Ipv4Addr) -> Message {
        let mut msg = Message::new_with_id(
            req.xid(),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            siaddr,
            req.giaddr(),
            req.chaddr(),
        );
        msg.set_opcode(Opcode::BootReply)
            .set_htype(req.htype())
            .set_flags(req.flags())
            .set_hops(req.hops());
        msg
    }

    use kestrel_core::proto::Encodable;
    use kestrel_core::server::msg::SerialMsg;
    use kestrel_core::unix_udp_sock::RecvMeta;
    use std::net::SocketAddr;

    /// for testing
    pub fn blank_ctx(
        recv_addr: SocketAddr,
        siaddr: Ipv4Addr,
        giaddr: Ipv4Addr,
        msg_type: MessageType,
    ) -> Result<MsgContext> {
        let uns = Ipv4Addr::UNSPECIFIED;
        let mut msg = Message::new(uns, uns, siaddr, giaddr, &[1, 2, 3, 4, 5, 6]);
        msg.opts_mut()
            .insert(v4::DhcpOption::message_type(msg_type));
        msg.opts_mut()
            .insert(v4::DhcpOption::subnet_selection(giaddr));
        msg.opts_mut()
            .insert(v4::DhcpOption::parameter_request_list(&[
                v4::code::SUBNET_MASK,
                v4::code::ROUTERS,
                v4::code::DOMAIN_NAME_SERVERS,
                v4::code::DOMAIN_NAME,
            ]));
        let buf = msg.to_vec().unwrap();
        let meta = RecvMeta {
            addr: recv_addr,
            len: buf.len(),
            ifindex: 1,
            // recv addr copied here
            dst_ip: Some(recv_addr.ip()),
            ..RecvMeta::default()
        };
        let ctx: MsgContext = MsgContext::new(
            SerialMsg::new(buf.into(), recv_addr),
            meta,
            Arc::new(State::new(10)),
        )?;
        Ok(ctx)
    }

    /// build a watch pair around a parsed config, leaking the sender so
    /// the receiver stays live (tests only)
    pub fn watch_config(cfg: DhcpConfig) -> ConfigRx {
        let (tx, rx) = watch::channel(Arc::new(cfg));
        std::mem::forget(tx);
        rx
    }
}
