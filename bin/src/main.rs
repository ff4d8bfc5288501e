#![allow(clippy::cognitive_complexity)]
use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};

mod extensions;

use allocation::Allocation;
use config::DhcpConfig;
use host_reservation::HostReservations;
use icmp_ping::Prober;
use kestrel_core::{
    async_trait,
    config::{
        cli::{self, Parser},
        trace,
    },
    control::{CmdHandler, CmdResult, CommandServer, CMD_STOP},
    hooks::HooksManager,
    stats::{LpsCounter, StatsWriter},
    tokio::{self, runtime::Builder, signal, sync::watch, task::JoinHandle},
    tracing::*,
    Server,
};
use master_rpc::{AllocateEngine, EngineConfig};
use message_type::MsgType;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.kestrel_log)?;
    debug!(?config, ?trace_config);

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    // build the runtime
    let rt = builder.build()?;

    // config or bind failures surface here, before the main loop, and
    // exit non-zero
    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => {
                error!(?err, "failed to start server");
                Err(anyhow!(err))
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                Err(err)
            }
            Ok(_) => {
                debug!("exiting...");
                Ok(())
            }
        }
    })
}

async fn start(config: cli::Config) -> Result<()> {
    debug!("parsing DHCP config");
    let dhcp_cfg = Arc::new(DhcpConfig::parse(&config.config_path)?);

    // load the in-process hook libraries named by the config; a
    // version or load failure is fatal at startup
    let hooks_mgr = Arc::new(HooksManager::new());
    for lib in dhcp_cfg.v4().hooks() {
        let library = match extensions::library(&lib.library) {
            Some(library) => library,
            None => bail!("unknown hooks library {:?}", lib.library),
        };
        hooks_mgr
            .load_library(library, &lib.parameters)
            .with_context(|| format!("loading hooks library {:?}", lib.library))?;
    }

    // master RPC engine
    let rpc = dhcp_cfg.v4().rpc().clone();
    info!(addr = %rpc.addr(), connections = rpc.connections, "connecting allocation engine");
    let engine = Arc::new(AllocateEngine::start(EngineConfig {
        addr: rpc.addr(),
        connections: rpc.connections,
        queue_size: config.channel_size,
        max_retries: rpc.max_retries,
    }));

    // conflict probe engine
    let ping = *dhcp_cfg.v4().ping();
    let prober = if ping.enable {
        Some(Arc::new(
            Prober::new(ping.queue_size, ping.timeout).context("failed to open ICMP socket")?,
        ))
    } else {
        info!("ping check disabled by config");
        None
    };

    let token = CancellationToken::new();

    // rolling per-second counters + the per-ACK statistics file
    let lps = LpsCounter::new();
    let lps_task = lps.start(token.clone());

    // config updates propagate through the watch channel; in-flight
    // queries keep the snapshot they started with
    let (cfg_tx, cfg_rx) = watch::channel(Arc::clone(&dhcp_cfg));

    // control socket
    let mut ctrl = CommandServer::new(config.control_addr);
    ctrl.register_handler(CMD_STOP, Arc::new(StopCmd))?;
    ctrl.register_handler(
        "reconfig",
        Arc::new(ReconfigCmd {
            path: config.config_path.clone(),
            tx: cfg_tx,
        }),
    )?;
    ctrl.register_handler(
        "statis_lps",
        Arc::new(LpsCmd {
            lps: Arc::clone(&lps),
        }),
    )?;
    let mut ctrl_task = tokio::spawn(ctrl.serve(token.clone()));

    // v4 server + plugin chain
    debug!("starting v4 server");
    let mut v4 = Server::new(config.clone(), dhcp_cfg.v4().interfaces().to_owned())?;
    debug!("starting v4 plugins");
    v4.plugin(MsgType::new(cfg_rx.clone())?)
        .plugin(HostReservations::new()?)
        .plugin(Allocation::new(Arc::clone(&engine), prober.clone())?)
        .callouts(hooks_mgr.callouts())
        .postresponse(StatsWriter::new(&config.stats_path, Arc::clone(&lps)));

    let mut v4_task = tokio::spawn(v4.start(shutdown_signal(token.clone())));

    // Either side finishing ends the server: the control socket exits
    // on `stop` (or fails to bind), the v4 task on ctrl-c or a socket
    // error. The other side is then wound down via the shared token.
    tokio::select! {
        res = &mut ctrl_task => {
            let ctrl_res = res.map_err(|err| anyhow!(err)).and_then(|r| r);
            token.cancel();
            let v4_res = flatten(v4_task).await;
            ctrl_res.context("control socket failed")?;
            v4_res?;
        }
        res = &mut v4_task => {
            match res {
                Ok(res) => res?,
                Err(err) => return Err(anyhow!(err)),
            }
            token.cancel();
            if let Err(err) = ctrl_task.await {
                error!(?err, "error waiting for control socket");
            }
        }
    }

    info!("shutting down subsystems");
    engine.shutdown();
    hooks_mgr.unload_all();
    if let Err(err) = lps_task.await {
        error!(?err, "error waiting for lps counter");
    }
    Ok(())
}

/// resolves on ctrl-c or when the control socket's `stop` fires
async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    tokio::select! {
        ret = signal::ctrl_c() => {
            token.cancel();
            ret.map_err(|err| anyhow!(err))
        }
        _ = token.cancelled() => Ok(()),
    }
}

async fn flatten<T>(handle: JoinHandle<Result<T, anyhow::Error>>) -> Result<T, anyhow::Error> {
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err),
        Err(err) => Err(anyhow!(err)),
    }
}

/// `stop`: the reply is flushed by the control server, which then
/// cancels the shared token
struct StopCmd;

#[async_trait]
impl CmdHandler for StopCmd {
    async fn handle_cmd(&self, _name: &str, _params: &Value) -> CmdResult {
        info!("stop command received");
        ("server stopping".into(), true)
    }
}

/// `reconfig`: rebuild the subnet & class tables from disk and swap
/// them atomically; a parse error keeps the running config
struct ReconfigCmd {
    path: PathBuf,
    tx: watch::Sender<Arc<DhcpConfig>>,
}

#[async_trait]
impl CmdHandler for ReconfigCmd {
    async fn handle_cmd(&self, _name: &str, _params: &Value) -> CmdResult {
        match DhcpConfig::parse(&self.path) {
            Ok(cfg) => {
                info!("reconfig: new configuration published");
                let _ = self.tx.send(Arc::new(cfg));
                ("reconfig ok".into(), true)
            }
            Err(err) => {
                error!(?err, "reconfig failed, keeping previous configuration");
                (format!("{err:#}"), false)
            }
        }
    }
}

/// `statis_lps`: last completed second of `discover offer request ack`
struct LpsCmd {
    lps: Arc<LpsCounter>,
}

#[async_trait]
impl CmdHandler for LpsCmd {
    async fn handle_cmd(&self, _name: &str, _params: &Value) -> CmdResult {
        (self.lps.snapshot(), true)
    }
}
