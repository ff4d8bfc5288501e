#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

//! Final stage of the plugin chain: asks the master for an address,
//! probes the candidate for conflicts, and finishes the response.
//!
//! DISCOVER/REQUEST flow: build the allocation request, call the
//! master, and on `ok` run one ICMP probe against the candidate. A
//! probe reply means the address is live on the wire: the master is
//! notified (`conflict`) and re-offers, up to the configured retry
//! cap, after which the client is NAKed. RELEASE and DECLINE forward
//! a notification and produce no reply.

use kestrel_core::{
    prelude::*,
    proto::v4::{self, MessageType},
};
use std::{fmt, time::Duration};

use config::v4::Subnet;
use host_reservation::StaticAssigned;
use icmp_ping::Prober;
use master_rpc::{AllocRequest, AllocResponse, AllocResult, AllocateEngine, MsgType as RpcMsgType};
use message_type::{ConfigSnapshot, SelectedSubnet};

pub struct Allocation {
    engine: Arc<AllocateEngine>,
    /// `None` when the server is configured to skip conflict probes
    prober: Option<Arc<Prober>>,
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("ping", &self.prober.is_some())
            .finish()
    }
}

impl Allocation {
    pub fn new(engine: Arc<AllocateEngine>, prober: Option<Arc<Prober>>) -> Result<Self> {
        Ok(Self { engine, prober })
    }

    /// one probe; a reply before the timeout is a conflict. Queue-full
    /// and probe errors count as "no conflict": the master still owns
    /// the address, the probe is only advisory.
    async fn probe(&self, candidate: Ipv4Addr) -> bool {
        match &self.prober {
            Some(prober) => match prober.probe(candidate).await {
                Ok(conflict) => conflict,
                Err(icmp_ping::Error::QueueFull { capacity }) => {
                    kestrel_core::metrics::ICMP_QUEUE_FULL_COUNT.inc();
                    debug!(capacity, "probe queue full, assuming no conflict");
                    false
                }
                Err(err) => {
                    debug!(?err, "probe failed, assuming no conflict");
                    false
                }
            },
            None => false,
        }
    }

    fn nak(&self, ctx: &mut MsgContext) -> Result<Action> {
        ctx.update_resp_msg(MessageType::Nak)
            .context("failed to set msg type")?;
        Ok(Action::Respond)
    }

    /// an RPC failure: REQUESTs get a NAK so the client retries
    /// quickly, DISCOVERs are dropped
    fn transient(&self, ctx: &mut MsgContext, is_request: bool) -> Result<Action> {
        if is_request {
            self.nak(ctx)
        } else {
            Ok(Action::NoResponse)
        }
    }

    fn base_request(
        &self,
        ctx: &MsgContext,
        subnet: &Subnet,
        cfg: &config::DhcpConfig,
        msg_type: RpcMsgType,
    ) -> AllocRequest {
        let req = ctx.msg();
        AllocRequest {
            msg_type: msg_type as i32,
            subnet_id: subnet.id(),
            shared_subnet_id: subnet.shared_subnet_id().unwrap_or(0),
            client_id: cfg.v4().client_id(req, subnet).to_vec(),
            hwaddr: req.chaddr().to_vec(),
            requested_addr: ctx.requested_ip().map(u32::from).unwrap_or(0),
            hostname: req
                .opts()
                .get(v4::code::HOST_NAME)
                .and_then(|opt| opt.data().text())
                .unwrap_or_default()
                .to_string(),
            retry_count: 0,
        }
    }

    /// write the allocated address and lifetimes into the response.
    /// The master's lifetimes win when it set them; the subnet's
    /// triplet fills the gaps.
    fn finalize(
        &self,
        ctx: &mut MsgContext,
        subnet: &Subnet,
        candidate: Ipv4Addr,
        master: &AllocResponse,
    ) -> Result<Action> {
        let (mut valid, mut t1, mut t2) = subnet.determine_lease(ctx.requested_lease_time());
        if master.valid_lifetime > 0 {
            valid = Duration::from_secs(master.valid_lifetime as u64);
            t1 = config::renew(valid);
            t2 = config::rebind(valid);
        }
        if master.t1 > 0 {
            t1 = Duration::from_secs(master.t1 as u64);
        }
        if master.t2 > 0 {
            t2 = Duration::from_secs(master.t2 as u64);
        }
        ctx.resp_msg_mut()
            .context("response message must be set before allocation runs")?
            .set_yiaddr(candidate);
        ctx.populate_opts_lease(subnet.opts(), valid, t1, t2);
        subnet.set_last_allocated(candidate);
        debug!(%candidate, ?valid, "allocation finished");
        Ok(Action::Respond)
    }

    async fn allocate(&self, ctx: &mut MsgContext, is_request: bool) -> Result<Action> {
        // a reservation already assigned the address; nothing to ask
        // the master and nothing to probe
        if ctx.get_local::<StaticAssigned>().is_some() {
            return Ok(Action::Respond);
        }
        let Some(SelectedSubnet(subnet)) = ctx.get_local::<SelectedSubnet>().cloned() else {
            debug!("no subnet was selected, dropping");
            return Ok(Action::NoResponse);
        };
        let ConfigSnapshot(cfg) = ctx
            .get_local::<ConfigSnapshot>()
            .cloned()
            .context("config snapshot must be set before allocation runs")?;
        let max_retries = cfg.v4().rpc().max_retries;

        let mut request = self.base_request(
            ctx,
            &subnet,
            &cfg,
            if is_request {
                RpcMsgType::Request
            } else {
                RpcMsgType::Discover
            },
        );

        let mut master = match self.engine.allocate(request.clone()).await {
            Ok(resp) => resp,
            Err(err) => {
                debug!(?err, "master unavailable");
                return self.transient(ctx, is_request);
            }
        };

        loop {
            match master.outcome() {
                AllocResult::Ok => {
                    let candidate = master.yiaddr();
                    if !self.probe(candidate).await {
                        return self.finalize(ctx, &subnet, candidate, &master);
                    }
                    // someone answered on the candidate: hand it back
                    // and ask again, carrying the conflicted address
                    request.retry_count += 1;
                    if request.retry_count > max_retries {
                        debug!(%candidate, "conflict retries exhausted, NAK");
                        return self.nak(ctx);
                    }
                    debug!(%candidate, retry = request.retry_count, "probe conflict, retrying");
                    request.msg_type = RpcMsgType::Conflict as i32;
                    request.set_requested_addr(candidate);
                    master = match self.engine.notify(request.clone()).await {
                        Ok(resp) => resp,
                        Err(err) => {
                            debug!(?err, "master unavailable during conflict retry");
                            return self.transient(ctx, is_request);
                        }
                    };
                }
                AllocResult::NoAddress => {
                    debug!("master has no address for this client");
                    return self.transient(ctx, is_request);
                }
                AllocResult::Conflict | AllocResult::NotOnLink => {
                    debug!(outcome = ?master.outcome(), "master refused the requested address");
                    return if is_request {
                        self.nak(ctx)
                    } else {
                        Ok(Action::NoResponse)
                    };
                }
                AllocResult::Transient => {
                    return self.transient(ctx, is_request);
                }
            }
        }
    }

    async fn release(&self, ctx: &mut MsgContext) -> Result<Action> {
        self.notify_master(ctx, RpcMsgType::Release, ctx.msg().ciaddr())
            .await;
        // release has no response
        Ok(Action::NoResponse)
    }

    async fn decline(&self, ctx: &mut MsgContext) -> Result<Action> {
        let Some(declined) = ctx
            .msg()
            .opts()
            .get(v4::code::REQUESTED_IP)
            .and_then(|opt| opt.data().ip())
        else {
            error!("got DECLINE with no option 50 (requested IP)");
            return Ok(Action::NoResponse);
        };
        debug!(%declined, "got DECLINE");
        self.notify_master(ctx, RpcMsgType::Decline, declined).await;
        Ok(Action::NoResponse)
    }

    async fn notify_master(&self, ctx: &MsgContext, msg_type: RpcMsgType, addr: Ipv4Addr) {
        let Some(SelectedSubnet(subnet)) = ctx.get_local::<SelectedSubnet>().cloned() else {
            debug!("notification without a subnet, ignoring");
            return;
        };
        let Some(ConfigSnapshot(cfg)) = ctx.get_local::<ConfigSnapshot>().cloned() else {
            return;
        };
        let mut request = self.base_request(ctx, &subnet, &cfg, msg_type);
        request.set_requested_addr(addr);
        if let Err(err) = self.engine.notify(request).await {
            debug!(?err, "failed to forward notification to master");
        }
    }
}

#[async_trait]
impl Plugin for Allocation {
    #[instrument(level = "debug", skip_all)]
    async fn handle(&self, ctx: &mut MsgContext) -> Result<Action> {
        match ctx.msg().opts().msg_type() {
            Some(MessageType::Discover) => self.allocate(ctx, false).await,
            Some(MessageType::Request) => self.allocate(ctx, true).await,
            Some(MessageType::Release) => self.release(ctx).await,
            Some(MessageType::Decline) => self.decline(ctx).await,
            _ => Ok(Action::Continue),
        }
    }
}
