//! # control socket
//!
//! Text commands over TCP with the same 2-byte big-endian length
//! framing the master RPC uses. Bodies are JSON objects
//! `{"name": <cmd>, ...}`; replies are
//! `{"succeed": bool, "result"|"error_info": string}`.
//!
//! Concurrent sessions are accepted, but command dispatch is
//! serialized by a single mutex so handlers always observe a
//! consistent configuration.
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use std::{collections::HashMap, fmt, net::SocketAddr, sync::Arc};

/// name of the command that shuts the server down
pub const CMD_STOP: &str = "stop";

/// (text result or error info, succeed)
pub type CmdResult = (String, bool);

/// implemented by every registered command
#[async_trait]
pub trait CmdHandler: Send + Sync + 'static {
    /// run the command; `params` is the full JSON body
    async fn handle_cmd(&self, name: &str, params: &Value) -> CmdResult;
}

/// build the length-delimited codec used by the control socket and the
/// master RPC: 2-byte big-endian length prefix
pub fn framing() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u16>()
        .new_codec()
}

/// Accepts control sessions and dispatches commands to registered
/// handlers
pub struct CommandServer {
    addr: SocketAddr,
    handlers: HashMap<String, Arc<dyn CmdHandler>>,
}

impl fmt::Debug for CommandServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandServer")
            .field("addr", &self.addr)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CommandServer {
    /// new server; call [`CommandServer::register_handler`] then
    /// [`CommandServer::serve`]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handlers: HashMap::new(),
        }
    }

    /// register a command by name; duplicate names are a startup error
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn CmdHandler>,
    ) -> Result<&mut Self> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            bail!("duplicate handler for {name}");
        }
        self.handlers.insert(name, handler);
        Ok(self)
    }

    /// bind and accept sessions until `token` is cancelled. A `stop`
    /// command cancels the token after its reply is flushed.
    pub async fn serve(self, token: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind control socket {}", self.addr))?;
        info!(addr = %self.addr, "control socket listening");

        let inner = Arc::new(SessionInner {
            handlers: self.handlers,
            cmd_mutex: Mutex::new(()),
            token: token.clone(),
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "control session opened");
                            let inner = Arc::clone(&inner);
                            tokio::spawn(async move {
                                if let Err(err) = inner.session(stream).await {
                                    debug!(?err, %peer, "control session ended");
                                }
                            });
                        }
                        Err(err) => error!(?err, "control accept failed"),
                    }
                }
                _ = token.cancelled() => {
                    info!("control socket shutting down");
                    return Ok(());
                }
            }
        }
    }
}

struct SessionInner {
    handlers: HashMap<String, Arc<dyn CmdHandler>>,
    cmd_mutex: Mutex<()>,
    token: CancellationToken,
}

impl SessionInner {
    async fn session(&self, stream: TcpStream) -> Result<()> {
        let mut framed = Framed::new(stream, framing());
        while let Some(frame) = framed.next().await {
            let frame = frame.context("framing error on control socket")?;
            let reply = match serde_json::from_slice::<Value>(&frame) {
                Ok(body) => match body.get("name").and_then(Value::as_str) {
                    Some(name) => {
                        let name = name.to_string();
                        let result = self.run_cmd(&name, &body).await;
                        let reply = render_reply(result);
                        if name == CMD_STOP {
                            framed.send(Bytes::from(reply.to_string())).await?;
                            // reply must reach the peer before we bring
                            // the server down
                            framed.flush().await?;
                            self.token.cancel();
                            return Ok(());
                        }
                        reply
                    }
                    None => render_reply(("no key for name".into(), false)),
                },
                Err(err) => render_reply((format!("json parse error: {err}"), false)),
            };
            framed.send(Bytes::from(reply.to_string())).await?;
        }
        Ok(())
    }

    async fn run_cmd(&self, name: &str, params: &Value) -> CmdResult {
        // one command at a time, across all sessions
        let _guard = self.cmd_mutex.lock().await;
        match self.handlers.get(name) {
            Some(handler) => handler.handle_cmd(name, params).await,
            None => (format!("unknown cmd {name}"), false),
        }
    }
}

fn render_reply((text, succeed): CmdResult) -> Value {
    if succeed {
        json!({ "succeed": true, "result": text })
    } else {
        json!({ "succeed": false, "error_info": text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CmdHandler for Echo {
        async fn handle_cmd(&self, _name: &str, params: &Value) -> CmdResult {
            (
                params
                    .get("payload")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                true,
            )
        }
    }

    struct Stopper;

    #[async_trait]
    impl CmdHandler for Stopper {
        async fn handle_cmd(&self, _name: &str, _params: &Value) -> CmdResult {
            ("server stopping".into(), true)
        }
    }

    async fn start_server() -> Result<(SocketAddr, CancellationToken)> {
        // grab an ephemeral port first so the test knows where to dial
        let probe = TcpListener::bind("127.0.0.1:0").await?;
        let addr = probe.local_addr()?;
        drop(probe);

        let mut srv = CommandServer::new(addr);
        srv.register_handler("echo", Arc::new(Echo))?;
        srv.register_handler(CMD_STOP, Arc::new(Stopper))?;
        let token = CancellationToken::new();
        let serve_token = token.clone();
        tokio::spawn(async move {
            let _ = srv.serve(serve_token).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Ok((addr, token))
    }

    async fn roundtrip(framed: &mut Framed<TcpStream, LengthDelimitedCodec>, body: Value) -> Value {
        framed
            .send(Bytes::from(body.to_string()))
            .await
            .expect("send");
        let frame = framed.next().await.expect("reply").expect("frame");
        serde_json::from_slice(&frame).expect("reply json")
    }

    #[tokio::test]
    async fn dispatch_and_unknown() -> Result<()> {
        let (addr, _token) = start_server().await?;
        let mut framed = Framed::new(TcpStream::connect(addr).await?, framing());

        let reply = roundtrip(&mut framed, json!({"name": "echo", "payload": "hi"})).await;
        assert_eq!(reply["succeed"], json!(true));
        assert_eq!(reply["result"], json!("hi"));

        let reply = roundtrip(&mut framed, json!({"name": "nonesuch"})).await;
        assert_eq!(reply["succeed"], json!(false));
        assert_eq!(reply["error_info"], json!("unknown cmd nonesuch"));

        let reply = roundtrip(&mut framed, json!({"payload": "no name"})).await;
        assert_eq!(reply["succeed"], json!(false));
        Ok(())
    }

    #[tokio::test]
    async fn stop_cancels_after_reply() -> Result<()> {
        let (addr, token) = start_server().await?;
        let mut framed = Framed::new(TcpStream::connect(addr).await?, framing());

        let reply = roundtrip(&mut framed, json!({"name": "stop"})).await;
        assert_eq!(reply["succeed"], json!(true));
        // reply arrived first, then the token flipped
        tokio::time::timeout(std::time::Duration::from_secs(1), token.cancelled())
            .await
            .expect("token cancelled");
        Ok(())
    }

    #[test]
    fn duplicate_handler_rejected() {
        let mut srv = CommandServer::new("127.0.0.1:0".parse().unwrap());
        srv.register_handler("echo", Arc::new(Echo)).unwrap();
        assert!(srv.register_handler("echo", Arc::new(Echo)).is_err());
    }
}
