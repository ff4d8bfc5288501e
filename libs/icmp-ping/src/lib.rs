//! # icmp-ping
//!
//! Conflict-detection probe engine. One ICMP socket is opened at
//! startup; a single listener task reads replies and correlates them
//! back to waiting probes through a bounded map keyed by a 32-bit
//! probe id. A probe resolves exactly once: either its reply arrives
//! (the address is in use) or its timeout fires.
mod errors;
mod icmp;
mod shutdown;
mod socket;

pub use crate::errors::Error;
pub use crate::icmp::{EchoReply, EchoRequest, ECHO_BUFFER_SIZE, ICMP_HEADER_SIZE, PAYLOAD_SIZE};
use crate::socket::Socket;

use kestrel_core::metrics;
use parking_lot::Mutex;
use shutdown::Shutdown;
use socket2::{Domain, Protocol, Type};
use tokio::sync::{broadcast, oneshot};
use tokio::task;
use tracing::{debug, error, trace};

use std::{
    collections::HashMap,
    fmt, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// default correlation map capacity
pub const DEFAULT_QUEUE_SIZE: usize = 4096;
/// default per-probe timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

type ProbeMap = Arc<Mutex<HashMap<ProbeId, Probe>>>;

/// 32-bit probe id: `(random << 16) | sequence`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeId(u32);

impl ProbeId {
    /// combine a random ident with the sequence counter
    pub fn new(ident: u16, seq: u16) -> Self {
        Self(((ident as u32) << 16) | seq as u32)
    }
    /// the random upper half (echo ident field)
    pub fn ident(&self) -> u16 {
        (self.0 >> 16) as u16
    }
    /// the sequence lower half (echo seq field)
    pub fn seq(&self) -> u16 {
        self.0 as u16
    }
    /// wire form carried in the echo payload
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
    /// parse from the echo payload
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

/// A socket that knows how to speak ICMP echo
pub struct IcmpEcho {
    inner: Socket,
    decode_header: bool,
}

impl fmt::Debug for IcmpEcho {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcmpEcho")
            .field("decode_header", &self.decode_header)
            .finish()
    }
}

impl IcmpEcho {
    /// create a new ICMPv4 socket, DGRAM first, RAW as fallback
    pub fn new() -> io::Result<Self> {
        let (inner, decode_header) = match Socket::new(Domain::IPV4, Type::DGRAM, Protocol::ICMPV4)
        {
            Ok(s) => (s, false),
            Err(err) => {
                error!(
                    ?err,
                    "error building DGRAM socket, check ping_group_range. trying RAW socket"
                );
                (
                    Socket::new(Domain::IPV4, Type::RAW, Protocol::ICMPV4)?,
                    true,
                )
            }
        };
        debug!("created new icmpv4 socket");
        Ok(Self {
            inner,
            decode_header,
        })
    }

    async fn request(&self, host: Ipv4Addr, req: &EchoRequest) -> io::Result<()> {
        let target = SocketAddr::new(IpAddr::V4(host), 0);
        let mut buf = [0u8; ECHO_BUFFER_SIZE];

        req.encode(&mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        debug!(?target, id = ?req.id, "sending echo request");
        self.inner.send_to(&buf, &target).await?;
        metrics::ICMP_REQUEST_COUNT.inc();
        Ok(())
    }

    /// not cancel-safe
    async fn reply(&self) -> io::Result<(EchoReply, SocketAddr)> {
        let mut buf = [0; 1024];
        loop {
            let (n, addr) = self.inner.recv(&mut buf).await?;
            trace!(buf = ?&buf[..n], ?addr, "received data on socket");
            if let Ok(payload) = EchoReply::decode(&buf[..n], self.decode_header) {
                metrics::ICMP_REPLY_COUNT.inc();
                return Ok((payload, addr));
            }
        }
    }
}

#[derive(Debug)]
struct Probe {
    sent: Instant,
    tx: oneshot::Sender<EchoReply>,
}

/// removes the map entry if the probe future is dropped early, so
/// reply-wins and timeout-wins stay mutually exclusive
struct Guard {
    inner: ProbeMap,
    id: ProbeId,
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.inner.lock().remove(&self.id);
    }
}

/// Owns the ICMP socket and the listener task; issue probes with
/// [`Prober::probe`]. Dropping the prober stops the listener.
#[derive(Debug)]
pub struct Prober {
    inner: Arc<IcmpEcho>,
    map: ProbeMap,
    capacity: usize,
    timeout: Duration,
    seq: AtomicU16,
    // on Drop this stops our spawned task, but it is never read
    #[allow(dead_code)]
    notify_shutdown: broadcast::Sender<()>,
}

impl Prober {
    /// open the socket and start the reply listener
    pub fn new(capacity: usize, timeout: Duration) -> errors::Result<Prober> {
        let soc = Arc::new(IcmpEcho::new()?);
        // when notify_shutdown is dropped, the listener shuts down
        let (notify_shutdown, _) = broadcast::channel(1);

        let r = soc.clone();
        let mut shutdown = Shutdown::new(notify_shutdown.subscribe());
        let map: ProbeMap = Arc::new(Mutex::new(HashMap::new()));

        let task_map = map.clone();
        task::spawn(async move {
            loop {
                tokio::select! {
                    ret = r.reply() => {
                        if let Ok((reply, addr)) = ret {
                            debug!(?addr, ?reply, "received reply");
                            let now = Instant::now();
                            // remove under the lock: the waiter can no longer time out
                            if let Some(probe) = task_map.lock().remove(&reply.id) {
                                let elapsed = now - probe.sent;
                                metrics::ICMP_REPLY_DURATION
                                    .with_label_values(&["reply"])
                                    .observe(elapsed.as_secs_f64());
                                if probe.tx.send(reply).is_err() {
                                    error!(?reply, "probe receiver dropped before reply delivery");
                                }
                            } else {
                                trace!(?reply, ?addr, "reply for a probe that already resolved");
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("ICMP listener shutdown received");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            inner: soc,
            map,
            capacity,
            timeout,
            seq: AtomicU16::new(0),
            notify_shutdown,
        })
    }

    /// explicitly stop the listener task spawned in `new`
    pub fn shutdown(self) {
        drop(self);
    }

    /// send one echo request to `host` and wait up to the configured
    /// timeout. `Ok(true)` means a matching reply arrived (the address
    /// is in use); `Ok(false)` means the timeout fired.
    pub async fn probe(&self, host: Ipv4Addr) -> errors::Result<bool> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = ProbeId::new(rand::random(), seq);
        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.map.lock();
            if map.len() >= self.capacity {
                return Err(Error::QueueFull {
                    capacity: self.capacity,
                });
            }
            map.insert(
                id,
                Probe {
                    sent: Instant::now(),
                    tx,
                },
            );
        }
        // make sure the map is cleaned up even if this future is dropped
        let guard = Guard {
            inner: self.map.clone(),
            id,
        };

        self.inner.request(host, &EchoRequest { id }).await?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => {
                debug!(?reply, %host, "address answered echo request");
                drop(guard);
                Ok(true)
            }
            Ok(Err(err)) => {
                error!(?err, "error in oneshot receiver (sender likely dropped)");
                drop(guard);
                Err(Error::RecvError { id, err })
            }
            Err(_elapsed) => {
                debug!(elapsed = ?self.timeout, ?id, %host, "probe timed out");
                drop(guard);
                Ok(false)
            }
        }
    }

    /// probes currently waiting for a reply or timeout
    pub fn in_flight(&self) -> usize {
        self.map.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn probe_id_halves() {
        let id = ProbeId::new(0xabcd, 0x1234);
        assert_eq!(id.ident(), 0xabcd);
        assert_eq!(id.seq(), 0x1234);
        assert_eq!(ProbeId::from_be_bytes(id.to_be_bytes()), id);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_probe_localhost() -> errors::Result<()> {
        let prober = Prober::new(DEFAULT_QUEUE_SIZE, DEFAULT_TIMEOUT)?;
        // loopback always answers
        let conflict = prober.probe(Ipv4Addr::LOCALHOST).await?;
        assert!(conflict);
        assert_eq!(prober.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_probe_timeout() -> errors::Result<()> {
        // RFC 5737 TEST-NET-1 space never answers; some sandboxes can't
        // even route it, which the caller also treats as no-conflict
        let prober = Prober::new(DEFAULT_QUEUE_SIZE, Duration::from_millis(250))?;
        match prober.probe(Ipv4Addr::new(192, 0, 2, 123)).await {
            Ok(conflict) => assert!(!conflict),
            Err(Error::IoError(_)) => {}
            Err(err) => panic!("unexpected probe error {err:?}"),
        }
        assert_eq!(prober.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_full() -> errors::Result<()> {
        let prober = Prober::new(0, DEFAULT_TIMEOUT)?;
        assert!(matches!(
            prober.probe(Ipv4Addr::LOCALHOST).await,
            Err(Error::QueueFull { capacity: 0 })
        ));
        Ok(())
    }
}
