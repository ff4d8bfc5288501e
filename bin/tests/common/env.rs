//! builds a full server instance against a scripted master
use std::{
    fs,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use allocation::Allocation;
use anyhow::{Context, Result};
use bytes::Bytes;
use config::DhcpConfig;
use futures::{SinkExt, StreamExt};
use host_reservation::HostReservations;
use kestrel_core::{
    async_trait,
    config::cli,
    control::{framing, CmdHandler, CmdResult, CommandServer, CMD_STOP},
    stats::{LpsCounter, StatsWriter},
    tokio::{
        self,
        net::{TcpListener, TcpStream, UdpSocket},
        sync::watch,
        task::JoinHandle,
    },
    Server,
};
use master_rpc::{
    AllocRequest, AllocResponse, AllocResult, AllocateEngine, EngineConfig, MsgType as RpcMsgType,
};
use message_type::MsgType;
use prost::Message as _;
use serde_json::Value;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

/// config serving 192.168.0.0/24, probes disabled, master on `port`
pub fn config_json(port: u16) -> String {
    format!(
        r#"{{
            "interfaces-config": {{ "interfaces": ["*"] }},
            "subnet4": [{{
                "id": 1,
                "subnet": "192.168.0.0/24",
                "pools": [{{ "pool": "192.168.0.10 - 192.168.0.200" }}],
                "valid-lifetime": 3600,
                "option-data": [
                    {{ "code": 3, "data": "192.168.0.1" }},
                    {{ "code": 15, "data": "test.example" }}
                ]
            }}],
            "rpc-server": {{ "host": "127.0.0.1", "port": {port}, "connections": 2 }},
            "ping": {{ "enable": false }}
        }}"#
    )
}

/// config whose only subnet does not cover the test client
pub fn config_without_subnet(port: u16) -> String {
    format!(
        r#"{{
            "interfaces-config": {{ "interfaces": ["*"] }},
            "subnet4": [{{
                "id": 9,
                "subnet": "10.99.0.0/24",
                "pools": [{{ "pool": "10.99.0.10 - 10.99.0.20" }}]
            }}],
            "rpc-server": {{ "host": "127.0.0.1", "port": {port}, "connections": 2 }},
            "ping": {{ "enable": false }}
        }}"#
    )
}

pub struct TestEnv {
    server_addr: SocketAddr,
    control_addr: SocketAddr,
    config_path: PathBuf,
    master_port: u16,
    saw_release: Arc<AtomicBool>,
    server_task: JoinHandle<Result<()>>,
    token: CancellationToken,
}

impl TestEnv {
    pub async fn start() -> Result<Self> {
        // scripted master
        let master = TcpListener::bind("127.0.0.1:0").await?;
        let master_addr = master.local_addr()?;
        let master_port = master_addr.port();
        let saw_release = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_master(master, Arc::clone(&saw_release)));

        // config file on disk so reconfig can re-read it
        let dir = std::env::temp_dir().join(format!("kestrel-e2e-{}", rand::random::<u32>()));
        fs::create_dir_all(&dir)?;
        let config_path = dir.join("config.json");
        fs::write(&config_path, config_json(master_port))?;

        let server_addr = free_udp_addr().await?;
        let control_addr = free_tcp_addr().await?;

        let dhcp_cfg = Arc::new(DhcpConfig::parse(&config_path)?);
        let (cfg_tx, cfg_rx) = watch::channel(Arc::clone(&dhcp_cfg));

        let engine = Arc::new(AllocateEngine::start(EngineConfig {
            addr: master_addr,
            connections: 2,
            queue_size: 64,
            max_retries: 3,
        }));

        let token = CancellationToken::new();
        let lps = LpsCounter::new();
        let _lps_task = lps.start(token.clone());

        let mut ctrl = CommandServer::new(control_addr);
        ctrl.register_handler(CMD_STOP, Arc::new(StopCmd))?;
        ctrl.register_handler(
            "reconfig",
            Arc::new(ReconfigCmd {
                path: config_path.clone(),
                tx: cfg_tx,
            }),
        )?;
        ctrl.register_handler(
            "statis_lps",
            Arc::new(LpsCmd {
                lps: Arc::clone(&lps),
            }),
        )?;
        tokio::spawn(ctrl.serve(token.clone()));

        let cli = cli::Config {
            config_path: config_path.clone(),
            v4_addr: server_addr,
            control_addr,
            timeout: 3,
            max_live_msgs: 100,
            channel_size: 100,
            thread_name: "kestrel-test".into(),
            threads: None,
            stats_path: dir.join("pkt_statis.log"),
            kestrel_log: "debug".into(),
        };

        let mut srv = Server::new(cli, dhcp_cfg.v4().interfaces().to_owned())?;
        srv.plugin(MsgType::new(cfg_rx.clone())?)
            .plugin(HostReservations::new()?)
            // probes stay off: tests run unprivileged
            .plugin(Allocation::new(Arc::clone(&engine), None)?)
            .postresponse(StatsWriter::new(dir.join("pkt_statis.log"), lps));

        let shutdown = {
            let token = token.clone();
            async move {
                token.cancelled().await;
                Ok(())
            }
        };
        let server_task = tokio::spawn(srv.start(shutdown));
        // give the sockets a beat to bind
        tokio::time::sleep(Duration::from_millis(200)).await;

        Ok(Self {
            server_addr,
            control_addr,
            config_path,
            master_port,
            saw_release,
            server_task,
            token,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn master_port(&self) -> u16 {
        self.master_port
    }

    /// one command over a fresh control session
    pub async fn control_cmd(&self, body: Value) -> Result<Value> {
        let stream = TcpStream::connect(self.control_addr).await?;
        let mut framed = Framed::new(stream, framing());
        framed.send(Bytes::from(body.to_string())).await?;
        let frame = framed
            .next()
            .await
            .context("control session closed without reply")??;
        Ok(serde_json::from_slice(&frame)?)
    }

    pub async fn write_config(&self, contents: &str) -> Result<()> {
        fs::write(&self.config_path, contents)?;
        Ok(())
    }

    /// did the master receive a RELEASE notification yet
    pub async fn master_saw_release(&self) -> bool {
        for _ in 0..20 {
            if self.saw_release.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    /// cancel everything and wait for the server task
    pub async fn stop(self) -> Result<()> {
        self.token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.server_task).await;
        Ok(())
    }

    /// used after a `stop` command: the server must wind down on its own
    pub async fn wait_stopped(self) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), self.server_task)
            .await
            .context("server did not stop")??
            .context("server errored during stop")?;
        Ok(())
    }
}

/// answers every allocation with .10 (or .11 after a conflict) and
/// remembers whether it saw a release
async fn run_master(listener: TcpListener, saw_release: Arc<AtomicBool>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let saw_release = Arc::clone(&saw_release);
        tokio::spawn(async move {
            let mut framed = Framed::new(stream, framing());
            while let Some(Ok(frame)) = framed.next().await {
                let Ok(req) = AllocRequest::decode(&frame[..]) else {
                    break;
                };
                if req.kind() == RpcMsgType::Release {
                    saw_release.store(true, Ordering::SeqCst);
                }
                let yiaddr = if req.kind() == RpcMsgType::Conflict {
                    u32::from(std::net::Ipv4Addr::new(192, 168, 0, 11))
                } else {
                    u32::from(std::net::Ipv4Addr::new(192, 168, 0, 10))
                };
                let resp = AllocResponse {
                    result: AllocResult::Ok as i32,
                    yiaddr,
                    valid_lifetime: 0,
                    t1: 0,
                    t2: 0,
                    server_id: 0,
                };
                if framed
                    .send(Bytes::from(resp.encode_to_vec()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }
}

async fn free_udp_addr() -> Result<SocketAddr> {
    let soc = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = soc.local_addr()?;
    drop(soc);
    Ok(addr)
}

async fn free_tcp_addr() -> Result<SocketAddr> {
    let soc = TcpListener::bind("127.0.0.1:0").await?;
    let addr = soc.local_addr()?;
    drop(soc);
    Ok(addr)
}

struct StopCmd;

#[async_trait]
impl CmdHandler for StopCmd {
    async fn handle_cmd(&self, _name: &str, _params: &Value) -> CmdResult {
        ("server stopping".into(), true)
    }
}

struct ReconfigCmd {
    path: PathBuf,
    tx: watch::Sender<Arc<DhcpConfig>>,
}

#[async_trait]
impl CmdHandler for ReconfigCmd {
    async fn handle_cmd(&self, _name: &str, _params: &Value) -> CmdResult {
        match DhcpConfig::parse(&self.path) {
            Ok(cfg) => {
                let _ = self.tx.send(Arc::new(cfg));
                ("reconfig ok".into(), true)
            }
            Err(err) => (format!("{err:#}"), false),
        }
    }
}

struct LpsCmd {
    lps: Arc<LpsCounter>,
}

#[async_trait]
impl CmdHandler for LpsCmd {
    async fn handle_cmd(&self, _name: &str, _params: &Value) -> CmdResult {
        (self.lps.snapshot(), true)
    }
}
