#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

//! Static host reservations. Runs after subnet selection; when the
//! client matches a reservation on the selected subnet the reserved
//! address is written into the response and the allocation stage is
//! told to leave the master out of it.

use kestrel_core::{
    prelude::*,
    proto::v4::{self, relay, MessageType},
};

use config::v4::HostIdentifier;
use message_type::{MatchedClasses, SelectedSubnet};

/// left in the context when a reservation assigned the address; the
/// allocation stage skips the master and the probe for these
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StaticAssigned(pub Ipv4Addr);

#[derive(Debug, Default)]
pub struct HostReservations;

impl HostReservations {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }

    /// every identifier the query carries, reservation-lookup order
    fn identifiers(ctx: &MsgContext) -> Vec<HostIdentifier> {
        let req = ctx.msg();
        let mut ids = vec![HostIdentifier::HwAddr(req.chaddr().to_vec())];
        if let Some(id) = req
            .opts()
            .get(v4::code::CLIENT_IDENTIFIER)
            .and_then(|opt| opt.data().bytes())
        {
            ids.push(HostIdentifier::ClientId(id.to_vec()));
            // RFC 4361 client ids carry a DUID after the type byte
            ids.push(HostIdentifier::Duid(id.to_vec()));
        }
        if let Some(circuit) = req
            .opts()
            .get(v4::code::RELAY_AGENT_INFORMATION)
            .and_then(|opt| opt.data().bytes())
            .and_then(|payload| relay::RelayAgentInformation::decode(payload).ok())
            .and_then(|info| match info.get(relay::RelayCode::AgentCircuitId) {
                Some(relay::RelayInfo::CircuitId(id)) => Some(id.clone()),
                _ => None,
            })
        {
            ids.push(HostIdentifier::CircuitId(circuit));
        }
        ids
    }

    fn assign(
        &self,
        ctx: &mut MsgContext,
        ip: Ipv4Addr,
        hostname: Option<&str>,
        opts: &v4::DhcpOptions,
        lease: (std::time::Duration, std::time::Duration, std::time::Duration),
    ) -> Result<()> {
        let (valid, t1, t2) = lease;
        let hostname = hostname.map(str::to_owned);
        let resp = ctx
            .resp_msg_mut()
            .context("response message must be set before host reservations run")?;
        resp.set_yiaddr(ip);
        if let Some(hostname) = hostname {
            resp.opts_mut().insert(v4::DhcpOption::new(
                v4::code::HOST_NAME,
                v4::OptionData::Str(hostname),
            ));
        }
        ctx.populate_opts_lease(opts, valid, t1, t2);
        ctx.set_local(StaticAssigned(ip));
        Ok(())
    }
}

#[async_trait]
impl Plugin for HostReservations {
    #[instrument(level = "debug", skip_all)]
    async fn handle(&self, ctx: &mut MsgContext) -> Result<Action> {
        let msg_type = ctx.msg().opts().msg_type();
        if !matches!(
            msg_type,
            Some(MessageType::Discover) | Some(MessageType::Request)
        ) {
            return Ok(Action::Continue);
        }
        let Some(SelectedSubnet(subnet)) = ctx.get_local::<SelectedSubnet>().cloned() else {
            return Ok(Action::Continue);
        };
        let classes = ctx
            .get_local::<MatchedClasses>()
            .map(|m| m.0.clone())
            .unwrap_or_default();

        let ids = Self::identifiers(ctx);
        let Some(res) = subnet.find_reservation(&ids, &classes) else {
            return Ok(Action::Continue);
        };
        let static_ip = res.ip();
        let hostname = res.hostname().map(str::to_owned);
        debug!(?static_ip, "client matches a host reservation");

        let lease = subnet.determine_lease(ctx.requested_lease_time());
        match msg_type {
            Some(MessageType::Discover) => {
                self.assign(ctx, static_ip, hostname.as_deref(), subnet.opts(), lease)?;
            }
            Some(MessageType::Request) => {
                // the requested address must be the reserved one
                let Some(requested) = ctx.requested_ip() else {
                    ctx.update_resp_msg(MessageType::Nak)
                        .context("failed to set msg type")?;
                    return Ok(Action::Respond);
                };
                if requested != static_ip {
                    debug!(
                        ?requested,
                        ?static_ip,
                        "configured static ip does not match"
                    );
                    ctx.update_resp_msg(MessageType::Nak)
                        .context("failed to set msg type")?;
                    return Ok(Action::Respond);
                }
                self.assign(ctx, static_ip, hostname.as_deref(), subnet.opts(), lease)?;
            }
            _ => {}
        }
        Ok(Action::Continue)
    }
}
