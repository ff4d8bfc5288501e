//! # master-rpc
//!
//! Client for the master lease service. The engine owns `C` persistent
//! TCP connections which all pull from one bounded queue of pending
//! calls. A connection writes one request, reads its one response,
//! completes the caller, then pulls the next record; with no
//! pipelining, correlation needs no per-request ids.
//!
//! On connection errors the in-flight record is re-enqueued with its
//! retry count bumped, up to a cap; beyond the cap (or if the backlog
//! is full) the caller sees [`Error::Transient`]. Shutdown drains
//! everything the same way.
pub mod wire;

pub use wire::{AllocRequest, AllocResponse, AllocResult, MsgType, MAX_BODY_LEN};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use kestrel_core::metrics;
use prost::Message;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use std::{fmt, net::SocketAddr, sync::Arc, time::Duration, time::Instant};

/// how long to wait after the first failed connect; doubles up to
/// [`MAX_BACKOFF`]
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// engine errors surfaced to callers
#[derive(Error, Debug)]
pub enum Error {
    /// retries exhausted or backlog full; the worker NAKs or drops
    #[error("transient master failure")]
    Transient,
    /// the engine is shutting down
    #[error("allocation cancelled by shutdown")]
    Cancelled,
}

/// engine settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// master host:port
    pub addr: SocketAddr,
    /// persistent connection count
    pub connections: usize,
    /// backlog capacity; senders block while it is full
    pub queue_size: usize,
    /// re-enqueue cap per record
    pub max_retries: u32,
}

struct Record {
    request: AllocRequest,
    resp_tx: oneshot::Sender<Result<AllocResponse, Error>>,
    enqueued: Instant,
}

/// 2-byte big-endian length framing, bodies capped at [`MAX_BODY_LEN`]
fn framing() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u16>()
        .max_frame_length(MAX_BODY_LEN)
        .new_codec()
}

/// Owns the connections and the shared backlog
pub struct AllocateEngine {
    tx: mpsc::Sender<Record>,
    token: CancellationToken,
    max_retries: u32,
}

impl fmt::Debug for AllocateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocateEngine")
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl AllocateEngine {
    /// spawn the connection tasks and return the engine handle
    pub fn start(cfg: EngineConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Record>(cfg.queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let token = CancellationToken::new();

        for id in 0..cfg.connections.max(1) {
            let conn = Connection {
                id,
                addr: cfg.addr,
                rx: Arc::clone(&rx),
                requeue: tx.clone(),
                max_retries: cfg.max_retries,
                token: token.clone(),
            };
            tokio::spawn(conn.run());
        }
        info!(addr = %cfg.addr, connections = cfg.connections, "allocate engine started");

        Self {
            tx,
            token,
            max_retries: cfg.max_retries,
        }
    }

    /// Send `request` to the master and wait for its response. Blocks
    /// while the backlog is full, pushing the pressure back to intake.
    pub async fn allocate(&self, request: AllocRequest) -> Result<AllocResponse, Error> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let record = Record {
            request,
            resp_tx,
            enqueued: Instant::now(),
        };
        if self.tx.send(record).await.is_err() {
            return Err(Error::Cancelled);
        }
        // sender dropped without completing = shutdown drained us
        match resp_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Forward a release/decline/conflict notification. Same path and
    /// correlation contract as [`AllocateEngine::allocate`].
    pub async fn notify(&self, request: AllocRequest) -> Result<AllocResponse, Error> {
        self.allocate(request).await
    }

    /// stop the connections; queued and in-flight records drain with
    /// [`Error::Cancelled`]
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for AllocateEngine {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Connection {
    id: usize,
    addr: SocketAddr,
    rx: Arc<Mutex<mpsc::Receiver<Record>>>,
    requeue: mpsc::Sender<Record>,
    max_retries: u32,
    token: CancellationToken,
}

impl Connection {
    async fn run(self) {
        let mut backoff = INITIAL_BACKOFF;
        'reconnect: loop {
            let stream = tokio::select! {
                conn = TcpStream::connect(self.addr) => conn,
                _ = self.token.cancelled() => break 'reconnect,
            };
            let stream = match stream {
                Ok(stream) => {
                    debug!(conn = self.id, addr = %self.addr, "connected to master");
                    backoff = INITIAL_BACKOFF;
                    stream
                }
                Err(err) => {
                    warn!(conn = self.id, ?err, ?backoff, "master connect failed");
                    metrics::RPC_RECONNECT_COUNT.inc();
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.token.cancelled() => break 'reconnect,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue 'reconnect;
                }
            };
            let mut framed = Framed::new(stream, framing());

            // idle -> write -> read -> idle; exactly one record in
            // flight per connection
            loop {
                let record = {
                    let mut rx = self.rx.lock().await;
                    tokio::select! {
                        record = rx.recv() => record,
                        _ = self.token.cancelled() => None,
                    }
                };
                let Some(record) = record else {
                    // channel closed or shutdown: drain whatever is left
                    self.drain().await;
                    break 'reconnect;
                };

                match self.exchange(&mut framed, &record.request).await {
                    Ok(resp) => {
                        metrics::RPC_REPLY_DURATION
                            .with_label_values(&[result_label(resp.outcome())])
                            .observe(record.enqueued.elapsed().as_secs_f64());
                        let _ = record.resp_tx.send(Ok(resp));
                    }
                    Err(err) => {
                        debug!(conn = self.id, ?err, "master connection error, re-queueing");
                        self.requeue_record(record);
                        metrics::RPC_RECONNECT_COUNT.inc();
                        continue 'reconnect;
                    }
                }
            }
        }
        trace!(conn = self.id, "master connection exited");
    }

    /// one request out, one response in
    async fn exchange(
        &self,
        framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
        request: &AllocRequest,
    ) -> std::io::Result<AllocResponse> {
        let body = request.encode_to_vec();
        debug_assert!(body.len() <= MAX_BODY_LEN);
        framed.send(Bytes::from(body)).await?;
        metrics::RPC_REQUEST_COUNT.inc();

        let frame = tokio::select! {
            frame = framed.next() => frame,
            _ = self.token.cancelled() => None,
        };
        match frame {
            Some(Ok(frame)) => {
                metrics::RPC_RESPONSE_COUNT.inc();
                AllocResponse::decode(&frame[..]).map_err(|err| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
                })
            }
            Some(Err(err)) => Err(err),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "master closed connection",
            )),
        }
    }

    /// put a failed record back on the queue with its retry count
    /// bumped; past the cap (or with a full backlog) complete it as
    /// transient
    fn requeue_record(&self, mut record: Record) {
        record.request.retry_count += 1;
        if record.request.retry_count > self.max_retries {
            debug!(
                retry_count = record.request.retry_count,
                "retries exhausted, completing as transient"
            );
            metrics::RPC_TRANSIENT_COUNT.inc();
            let _ = record.resp_tx.send(Err(Error::Transient));
            return;
        }
        metrics::RPC_RETRY_COUNT.inc();
        if let Err(send_err) = self.requeue.try_send(record) {
            // backlog is full; completing transient beats deadlocking
            // every connection on its own re-enqueue
            metrics::RPC_TRANSIENT_COUNT.inc();
            if let mpsc::error::TrySendError::Full(record)
            | mpsc::error::TrySendError::Closed(record) = send_err
            {
                let _ = record.resp_tx.send(Err(Error::Transient));
            }
        }
    }

    /// complete everything still queued so no caller waits forever
    async fn drain(&self) {
        let mut rx = self.rx.lock().await;
        while let Ok(record) = rx.try_recv() {
            let _ = record.resp_tx.send(Err(Error::Cancelled));
        }
    }
}

fn result_label(result: AllocResult) -> &'static str {
    match result {
        AllocResult::Ok => "ok",
        AllocResult::NoAddress => "no_address",
        AllocResult::Conflict => "conflict",
        AllocResult::NotOnLink => "not_on_link",
        AllocResult::Transient => "transient",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn request(subnet_id: u32) -> AllocRequest {
        AllocRequest {
            msg_type: MsgType::Discover as i32,
            subnet_id,
            shared_subnet_id: 0,
            client_id: vec![1, 2, 3],
            hwaddr: vec![0, 1, 2, 3, 4, 5],
            requested_addr: 0,
            hostname: String::new(),
            retry_count: 0,
        }
    }

    /// fake master: answers `responses_before_close` requests, echoing
    /// the subnet id into yiaddr, then drops the connection
    async fn fake_master(listener: TcpListener, responses_before_close: usize) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut framed = Framed::new(stream, framing());
            let mut answered = 0;
            while let Some(Ok(frame)) = framed.next().await {
                let req = AllocRequest::decode(&frame[..]).unwrap();
                if answered >= responses_before_close {
                    break;
                }
                answered += 1;
                let resp = AllocResponse {
                    result: AllocResult::Ok as i32,
                    yiaddr: req.subnet_id,
                    valid_lifetime: 3600,
                    t1: 1800,
                    t2: 3150,
                    server_id: 0,
                };
                framed
                    .send(Bytes::from(resp.encode_to_vec()))
                    .await
                    .unwrap();
            }
        }
    }

    async fn engine_with_master(
        responses_before_close: usize,
        connections: usize,
        max_retries: u32,
    ) -> AllocateEngine {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_master(listener, responses_before_close));
        AllocateEngine::start(EngineConfig {
            addr,
            connections,
            queue_size: 32,
            max_retries,
        })
    }

    #[tokio::test]
    async fn allocate_round_trip() {
        let engine = engine_with_master(usize::MAX, 1, 3).await;
        let resp = engine.allocate(request(42)).await.unwrap();
        assert_eq!(resp.outcome(), AllocResult::Ok);
        assert_eq!(resp.yiaddr, 42);
    }

    #[tokio::test]
    async fn responses_correlate_under_load() {
        let engine = Arc::new(engine_with_master(usize::MAX, 3, 3).await);
        let mut tasks = vec![];
        for subnet_id in 1..=20u32 {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                let resp = engine.allocate(request(subnet_id)).await.unwrap();
                // the fake master echoes subnet_id, so any cross-wired
                // response would show up here
                assert_eq!(resp.yiaddr, subnet_id);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn reconnect_and_retry() {
        // master answers one request per connection then hangs up;
        // a second allocate must survive the re-connect cycle
        let engine = engine_with_master(1, 1, 3).await;
        let first = engine.allocate(request(1)).await.unwrap();
        assert_eq!(first.yiaddr, 1);
        let second = engine.allocate(request(2)).await.unwrap();
        assert_eq!(second.yiaddr, 2);
    }

    #[tokio::test]
    async fn transient_after_retry_cap() {
        // master never answers, just closes
        let engine = engine_with_master(0, 1, 2).await;
        let err = engine.allocate(request(9)).await.unwrap_err();
        assert!(matches!(err, Error::Transient));
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        // nothing listening: backlog only
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let engine = Arc::new(AllocateEngine::start(EngineConfig {
            addr,
            connections: 1,
            queue_size: 8,
            max_retries: 3,
        }));
        let pending = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.allocate(request(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.shutdown();
        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, Err(Error::Cancelled)));
    }
}
