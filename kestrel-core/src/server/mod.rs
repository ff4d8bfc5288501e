//! # Server
//!
//! Contains the main server code which reads datagrams off the UDP
//! socket, drives the plugin chain and hook callouts for each message,
//! and hands finished responses to the egress task for transmission.
use anyhow::{Context, Result};
use bytes::Bytes;
use hooks::{CalloutHandle, CalloutManager, NextStep, HOOK_PKT4_RECEIVE, HOOK_PKT4_SEND};
use pnet::datalink::NetworkInterface;
use proto::v4::Message;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument, trace};
use unix_udp_sock::{Source, Transmit, UdpSocket};

use std::{
    fmt,
    future::Future,
    net::SocketAddr,
    os::unix::prelude::{FromRawFd, IntoRawFd},
    sync::Arc,
    time::Duration,
};

pub mod context;
pub mod ioctl;
pub mod msg;
pub mod shutdown;
pub mod state;
pub mod typemap;
pub(crate) mod udp;

use crate::{
    config::cli::Config,
    handler::*,
    metrics,
    server::{context::MsgContext, msg::SerialMsg, shutdown::Shutdown, udp::UdpStream},
};

/// Handy type alias for different `handle` traits
pub(crate) type PluginFn = Arc<dyn Plugin>;
pub(crate) type PostResponseFn = Arc<dyn PostResponse>;

/// Holds the ordered list of plugin handlers plus the hook callout
/// registry. Initialized with some `State` which is passed through to
/// handlers via [`MsgContext`].
///
/// [`MsgContext`]: crate::server::context::MsgContext
pub struct Server {
    /// plugins execute in registration order
    plugins: Vec<PluginFn>,
    /// there can only be one post response plugin as it consumes `MsgContext`
    postresponse: Option<PostResponseFn>,
    /// hook callouts, if any libraries were loaded
    callouts: Option<Arc<CalloutManager>>,
    /// additional application state
    state: State,
    /// server config
    config: Config,
    interfaces: Vec<NetworkInterface>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

impl Server {
    /// Make a new instance of kestrel
    pub fn new(config: Config, interfaces: Vec<NetworkInterface>) -> Result<Server> {
        let state = State::new(config.max_live_msgs);

        Ok(Server {
            plugins: Vec::new(),
            postresponse: None,
            callouts: None,
            state,
            config,
            interfaces,
        })
    }

    /// Add plugin to the list of handlers; plugins run in the order they
    /// are added
    pub fn plugin<P, U>(&mut self, plugin: U) -> &mut Self
    where
        U: Into<Arc<P>>,
        P: Plugin,
    {
        self.plugins.push(plugin.into());
        self
    }

    /// Add plugin to the postresponse slot
    pub fn postresponse<P, U>(&mut self, plugin: U) -> &mut Self
    where
        U: Into<Arc<P>>,
        P: PostResponse,
    {
        if self.postresponse.is_some() {
            tracing::warn!("Replacing postresponse plugin. There can only be one.");
        }
        self.postresponse.replace(plugin.into());
        self
    }

    /// Attach the hook callout registry
    pub fn callouts(&mut self, callouts: Arc<CalloutManager>) -> &mut Self {
        self.callouts = Some(callouts);
        self
    }

    /// consume `Server` and return `Service` which has shutdown
    /// handlers, etc
    fn into_service(self) -> Service {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        Service {
            plugins: Arc::new(ServiceInner {
                plugins: self.plugins,
                postresponse: self.postresponse,
                callouts: self.callouts,
                config: self.config,
                interfaces: self.interfaces,
            }),
            state: Arc::new(self.state),
            notify_shutdown,
            shutdown_complete_tx,
            shutdown_complete_rx,
        }
    }

    /// start server with parsed config values
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let mut service = self.into_service();

        tokio::select! {
            res = service.listen() => {
                if let Err(err) = res {
                    error!(?err, "error occurred in UDP listener");
                }
            }
            res = shutdown => {
                info!("caught shutdown signal handler");
                if let Err(err) = res {
                    error!(?err);
                }
            }
        }

        info!("notifying tasks of shutdown...");
        let Service {
            mut shutdown_complete_rx,
            shutdown_complete_tx,
            notify_shutdown,
            ..
        } = service;

        // When `notify_shutdown` is dropped, all tasks which have `subscribe`d will
        // receive the shutdown signal and can exit
        drop(notify_shutdown);
        // Drop final `Sender` so the `Receiver` below can complete
        drop(shutdown_complete_tx);
        // Wait for all active tasks to finish processing. As the `Sender`
        // handle held by the listener has been dropped above, the only remaining
        // `Sender` instances are held by in-flight message tasks. When those drop,
        // the `mpsc` channel will close and `recv()` will return `None`.
        if time::timeout(Duration::from_secs(3), shutdown_complete_rx.recv())
            .await
            .is_err()
        {
            error!("tasks did not finish within 3 seconds-- exiting anyway");
        } else {
            info!("all tasks finished cleanly");
        }

        Ok(())
    }
}

impl ServiceInner {
    /// if Some(()) - an encoded `MsgContext::resp_msg` will be sent to client
    /// if None - No response
    async fn run_handlers(&self, ctx: &mut MsgContext) -> Option<()> {
        for handler in &self.plugins {
            match handler.handle(ctx).await {
                Ok(Action::Respond) => return Some(()),
                Ok(Action::NoResponse) => {
                    // remove the resp_msg if we don't plan to send a response
                    ctx.resp_msg_take();
                    return None;
                }
                Err(ref err) => {
                    tracing::warn!(?err);
                    // The client will not get a response if we encounter an error
                    return None;
                }
                // continue
                _ => {}
            }
        }
        Some(())
    }

    async fn run_post_response_handler(&self, mut ctx: MsgContext) {
        ctx.mark_as_not_live();
        if let Some(ref handler) = self.postresponse {
            handler.handle(ctx).await;
        }
    }
}

/// Service is the type that actually does all the work, it listens
/// to the UDP socket, decodes dhcp messages, spawns tasks, and waits
/// for a shutdown signal
pub(crate) struct Service {
    pub(crate) notify_shutdown: broadcast::Sender<()>,
    pub(crate) shutdown_complete_tx: mpsc::Sender<()>,
    pub(crate) shutdown_complete_rx: mpsc::Receiver<()>,
    pub(crate) plugins: Arc<ServiceInner>,
    /// reference to server state
    pub(crate) state: Arc<State>,
}

pub(crate) struct ServiceInner {
    /// our list of plugins to execute
    plugins: Vec<PluginFn>,
    /// the postresponse plugin
    postresponse: Option<PostResponseFn>,
    /// hook callouts
    callouts: Option<Arc<CalloutManager>>,
    /// reference to server config
    config: Config,
    interfaces: Vec<NetworkInterface>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service").finish()
    }
}

/// a finished response on its way to the egress task
struct Egress {
    contents: Bytes,
    dst: SocketAddr,
    source: Source,
}

/// Abstraction for running handler chains
struct RunTask {
    /// split inner so we can destructure separately
    inner: RunInner,
    /// shutdown notifier
    shutdown: Shutdown,
    /// used to determine when all tasks have exited
    _shutdown_complete: mpsc::Sender<()>,
}

struct RunInner {
    /// the currently processing message
    ctx: MsgContext,
    /// reference to Service
    service: Arc<ServiceInner>,
    /// socket responses go out on (for ARP injection)
    soc: Arc<UdpSocket>,
    /// bounded handoff to the egress task
    egress: mpsc::Sender<Egress>,
}

impl RunInner {
    /// Process callouts & handlers for one message
    #[instrument(name = "v4", level = "debug", skip_all)]
    async fn run(mut self) -> Result<()> {
        self.ctx.recv_metrics();
        let timeout = self.service.config.timeout();
        let ifindex = self.ctx.meta().ifindex;
        let source = self.ctx.meta().dst_local_ip;
        let interface = self
            .service
            .interfaces
            .iter()
            .find(|int| int.index == ifindex)
            .with_context(|| format!("can't find interface {}", ifindex))?;
        trace!(meta = ?self.ctx.meta(), ?interface, "received datagram");

        // pkt4_receive callouts run before the plugin chain
        let mut skip_chain = false;
        if let Some(callouts) = self.service.callouts.as_ref() {
            if callouts.has_callouts(HOOK_PKT4_RECEIVE) {
                let mut handle = CalloutHandle::new();
                handle.set_argument("query4", self.ctx.msg().clone());
                let step = callouts.call(HOOK_PKT4_RECEIVE, &mut handle);
                // a callout may have replaced the query
                if let Some(query) = handle.take_argument::<Message>("query4") {
                    *self.ctx.msg_mut() = query;
                }
                match step {
                    NextStep::Drop => {
                        debug!("pkt4_receive callout dropped packet");
                        return Ok(());
                    }
                    NextStep::Skip => skip_chain = true,
                    NextStep::Continue => {}
                }
            }
        }

        let handled = if skip_chain {
            Ok(None)
        } else {
            time::timeout(timeout, self.service.run_handlers(&mut self.ctx))
                .await
                .map_err(|elapsed| anyhow::anyhow!(elapsed))
        };

        let mut skip_post = false;
        let resp = match handled {
            // WARNING: any use of `?` inside this block will return early and stop post_response from running
            Ok(Some(())) => {
                let iname = interface.name.as_str();
                let dst_addr = self.ctx.resp_addr(
                    self.service.config.is_default_port_v4(),
                    socket2::SockRef::from(&*self.soc),
                );

                // pkt4_send callouts run on the built response, before encoding
                if let Some(callouts) = self.service.callouts.as_ref() {
                    let built = self.ctx.resp_msg().cloned();
                    if let (true, Some(built)) = (callouts.has_callouts(HOOK_PKT4_SEND), built) {
                        let mut handle = CalloutHandle::new();
                        handle.set_argument("response4", built);
                        let step = callouts.call(HOOK_PKT4_SEND, &mut handle);
                        if let Some(resp) = handle.take_argument::<Message>("response4") {
                            self.ctx.set_resp_msg(resp);
                        }
                        match step {
                            NextStep::Drop => {
                                debug!("pkt4_send callout dropped response");
                                self.ctx.resp_msg_take();
                            }
                            NextStep::Skip => skip_post = true,
                            NextStep::Continue => {}
                        }
                    }
                }

                if let Some(resp) = self.ctx.resp_msg() {
                    let msg_type = resp.opts().msg_type();
                    if let Ok(msg) = SerialMsg::from_msg(resp, dst_addr) {
                        // set source IP to the same IP that was used in recv'd destination
                        // (ipi_spec_dst) otherwise use iface idx
                        let packet_src =
                            source.map(Source::Ip).unwrap_or(Source::Interface(ifindex));

                        debug!(
                            msg_type = ?msg_type.context("messages must have a type")?,
                            ?dst_addr,
                            ?iname,
                            source = ?packet_src,
                            %resp,
                        );
                        self.ctx.set_dst_addr(dst_addr);
                        let len = msg.bytes().len() as u64;
                        // blocks when the egress queue is full, back-pressuring
                        // this task rather than dropping the response
                        if self
                            .egress
                            .send(Egress {
                                contents: msg.msg(),
                                dst: dst_addr,
                                source: packet_src,
                            })
                            .await
                            .is_err()
                        {
                            error!("egress task gone, dropping response");
                        } else {
                            metrics::DHCPV4_BYTES_SENT.inc_by(len);
                            if let Err(err) =
                                self.ctx.sent_metrics(self.ctx.received_at().elapsed())
                            {
                                error!(?err, "error counting sent metrics");
                            }
                        }
                    }
                }
                Ok(())
            }
            // no response
            Ok(None) => Ok(()),
            // drop timeouts
            Err(error) => Err(error),
        };

        // run post-response handler, if any
        if !skip_post {
            self.service.run_post_response_handler(self.ctx).await;
        }
        resp
    }
}

impl RunTask {
    async fn run(self) -> Result<()> {
        let RunTask {
            inner,
            mut shutdown,
            _shutdown_complete,
        } = self;
        tokio::select! {
            _ = shutdown.recv() => {
                trace!("task received shutdown notifier");
                Ok(())
            }
            res = inner.run() => {
                res
            }
        }
    }
}

impl Service {
    // handles listening on UDP and spawning a new task per `MsgContext`.
    // A separate task owns transmission so in-flight tasks never contend
    // on the sender.
    async fn listen(&mut self) -> Result<()> {
        let soc = self.create_socket().await?;

        let udp_recv = Arc::new(soc);
        let udp_send = Arc::clone(&udp_recv);
        let udp_state = Arc::new(unix_udp_sock::UdpState::new());

        // egress task: single consumer of the bounded response queue
        let (egress_tx, mut egress_rx) = mpsc::channel::<Egress>(self.plugins.config.channel_size);
        let egress_soc = Arc::clone(&udp_send);
        tokio::spawn(async move {
            while let Some(out) = egress_rx.recv().await {
                let transmit = Transmit::new(out.dst, out.contents).src_ip(out.source);
                if let Err(err) = egress_soc.send_msg(&udp_state, transmit).await {
                    error!(?err, "failed to transmit response");
                }
            }
            debug!("egress task exited");
        });

        let mut ctx_stream = UdpStream::new(udp_recv, self.state.clone());
        while let Some(ctx) = ctx_stream.next().await {
            match ctx {
                Ok(ctx) => {
                    self.state.inc_live_msgs().await;
                    let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
                    let _shutdown_complete = self.shutdown_complete_tx.clone();
                    let task = RunTask {
                        inner: RunInner {
                            ctx,
                            soc: udp_send.clone(),
                            service: self.plugins.clone(),
                            egress: egress_tx.clone(),
                        },
                        shutdown,
                        _shutdown_complete,
                    };
                    tokio::spawn(task.run());
                }
                Err(err) => {
                    // failed parse or over-sized datagram: count & drop
                    metrics::RECV_TYPE_COUNT.unknown.inc();
                    debug!(?err, "dropping undecodable datagram");
                }
            }
        }
        Ok(())
    }

    #[instrument(name = "v4", level = "debug", skip_all)]
    async fn create_socket(&self) -> Result<unix_udp_sock::UdpSocket> {
        let addr = self.plugins.config.v4_addr;
        let interfaces = self.plugins.interfaces.clone();
        debug!(?addr, "binding UDP socket");
        let soc = if interfaces.len() == 1 {
            trace!("binding exactly one interface so use SO_BINDTODEVICE");
            // to bind to an interface, we must create the socket using libc
            let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, None)?;
            // SO_BINDTODEVICE
            socket
                .bind_device(Some(interfaces.first().unwrap().name.as_bytes()))
                .context("failed to find interface")?;
            socket
                .set_nonblocking(true)
                .context("failed to set nonblocking mode on socket")?;
            socket
                .bind(&addr.into())
                .context("failed to bind interface")?;

            unix_udp_sock::UdpSocket::from_std(unsafe {
                std::net::UdpSocket::from_raw_fd(socket.into_raw_fd())
            })?
        } else {
            unix_udp_sock::UdpSocket::bind(addr).await?
        };
        soc.set_broadcast(true).context("failed to set_broadcast")?;
        Ok(soc)
    }
}
