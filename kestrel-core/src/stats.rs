//! # statistics
//!
//! Two jobs: the rolling per-second message counters served by the
//! `statis_lps` control command, and the append-only per-ACK
//! statistics file (size-rotated).
use async_trait::async_trait;
use proto::v4::{self, MessageType};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::handler::PostResponse;
use crate::server::context::MsgContext;

/// rotate the statistics file beyond this size
pub const ROTATE_SIZE: u64 = 100 * 1024 * 1024;
/// how many rotated generations to keep
pub const ROTATE_GENERATIONS: u32 = 10;

/// Counts discover/offer/request/ack totals and publishes the counts
/// of the last completed second
#[derive(Debug, Default)]
pub struct LpsCounter {
    discover: AtomicU64,
    offer: AtomicU64,
    request: AtomicU64,
    ack: AtomicU64,
    /// formatted "discover offer request ack" for the last whole second
    last_second: Mutex<String>,
}

impl LpsCounter {
    /// fresh counter; remember to call [`LpsCounter::start`]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_second: Mutex::new("0 0 0 0".into()),
            ..Self::default()
        })
    }

    /// count a received query
    pub fn count_recv(&self, ty: MessageType) {
        match ty {
            MessageType::Discover => self.discover.fetch_add(1, Ordering::Relaxed),
            MessageType::Request => self.request.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// count a sent response
    pub fn count_sent(&self, ty: MessageType) {
        match ty {
            MessageType::Offer => self.offer.fetch_add(1, Ordering::Relaxed),
            MessageType::Ack => self.ack.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// the last completed second as `discover offer request ack`
    pub fn snapshot(&self) -> String {
        self.last_second.lock().unwrap().clone()
    }

    fn totals(&self) -> [u64; 4] {
        [
            self.discover.load(Ordering::Relaxed),
            self.offer.load(Ordering::Relaxed),
            self.request.load(Ordering::Relaxed),
            self.ack.load(Ordering::Relaxed),
        ]
    }

    /// sample the totals once per second; the published snapshot is the
    /// delta over the last whole second
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let counter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            let mut prev = counter.totals();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("lps counter stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        let now = counter.totals();
                        let line = format!(
                            "{} {} {} {}",
                            now[0] - prev[0],
                            now[1] - prev[1],
                            now[2] - prev[2],
                            now[3] - prev[3],
                        );
                        *counter.last_second.lock().unwrap() = line;
                        prev = now;
                    }
                }
            }
        })
    }
}

struct StatsFile {
    path: PathBuf,
    file: Option<fs::File>,
    written: u64,
}

impl StatsFile {
    fn open(path: PathBuf) -> Self {
        let (file, written) = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let written = file.metadata().map(|m| m.len()).unwrap_or(0);
                (Some(file), written)
            }
            Err(err) => {
                error!(?err, path = %path.display(), "failed to open statistics file");
                (None, 0)
            }
        };
        Self {
            path,
            file,
            written,
        }
    }

    fn append(&mut self, line: &str) {
        if self.written >= ROTATE_SIZE {
            self.rotate();
        }
        if let Some(file) = self.file.as_mut() {
            if let Err(err) = writeln!(file, "{line}") {
                error!(?err, "failed to append statistics line");
            } else {
                self.written += line.len() as u64 + 1;
            }
        }
    }

    /// shift path.(n) -> path.(n+1), dropping the oldest generation
    fn rotate(&mut self) {
        self.file.take();
        let gen_path = |n: u32| -> PathBuf {
            let mut s = self.path.as_os_str().to_owned();
            s.push(format!(".{n}"));
            PathBuf::from(s)
        };
        let _ = fs::remove_file(gen_path(ROTATE_GENERATIONS));
        for n in (1..ROTATE_GENERATIONS).rev() {
            let _ = fs::rename(gen_path(n), gen_path(n + 1));
        }
        if let Err(err) = fs::rename(&self.path, gen_path(1)) {
            error!(?err, "failed to rotate statistics file");
        }
        let reopened = StatsFile::open(self.path.clone());
        self.file = reopened.file;
        self.written = reopened.written;
    }
}

/// Post-response handler: counts LPS traffic and writes one line per
/// ACK to the statistics file:
/// `<hwaddr>#####<comma-separated-PRL-codes>#####<vendor-class>`
pub struct StatsWriter {
    lps: Arc<LpsCounter>,
    file: Mutex<StatsFile>,
}

impl fmt::Debug for StatsWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsWriter").finish()
    }
}

impl StatsWriter {
    /// open (or create) the statistics file at `path`
    pub fn new(path: impl AsRef<Path>, lps: Arc<LpsCounter>) -> Self {
        Self {
            lps,
            file: Mutex::new(StatsFile::open(path.as_ref().to_path_buf())),
        }
    }

    fn ack_line(ctx: &MsgContext) -> String {
        let query = ctx.msg();
        let hwaddr = query
            .chaddr()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":");
        let prl = query
            .opts()
            .get(v4::code::PARAMETER_REQUEST_LIST)
            .and_then(|opt| opt.data().bytes())
            .map(|codes| {
                codes
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        let vendor = query
            .opts()
            .get(v4::code::VENDOR_CLASS_IDENTIFIER)
            .and_then(|opt| opt.data().text())
            .unwrap_or_default();
        format!("{hwaddr}#####{prl}#####{vendor}")
    }
}

#[async_trait]
impl PostResponse for StatsWriter {
    async fn handle(&self, ctx: MsgContext) {
        if let Some(ty) = ctx.msg().opts().msg_type() {
            self.lps.count_recv(ty);
        }
        let sent = ctx.resp_msg().and_then(|resp| resp.opts().msg_type());
        if let Some(ty) = sent {
            self.lps.count_sent(ty);
        }
        if sent == Some(MessageType::Ack) {
            let line = Self::ack_line(&ctx);
            self.file.lock().unwrap().append(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lps_snapshot_rolls() {
        let counter = LpsCounter::new();
        counter.count_recv(MessageType::Discover);
        counter.count_recv(MessageType::Request);
        counter.count_sent(MessageType::Offer);
        counter.count_sent(MessageType::Ack);
        // release/decline don't count
        counter.count_recv(MessageType::Release);

        assert_eq!(counter.totals(), [1, 1, 1, 1]);
        let token = CancellationToken::new();
        let handle = counter.start(token.clone());
        // first tick fires immediately; give it a moment to publish
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        let _ = handle.await;
        assert_eq!(counter.snapshot().split(' ').count(), 4);
    }

    #[test]
    fn stats_file_appends_and_rotates() {
        let dir = std::env::temp_dir().join(format!("kestrel-stats-{}", std::process::id()));
        let _ = fs::create_dir_all(&dir);
        let path = dir.join("pkt_statis.log");
        let _ = fs::remove_file(&path);

        let mut file = StatsFile::open(path.clone());
        file.append("aa:bb#####1,3#####MSFT 5.0");
        drop(file);
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "aa:bb#####1,3#####MSFT 5.0\n");

        // force a rotation
        let mut file = StatsFile::open(path.clone());
        file.written = ROTATE_SIZE;
        file.append("next line");
        assert!(path.with_extension("log.1").exists() || dir.join("pkt_statis.log.1").exists());
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "next line\n");

        let _ = fs::remove_dir_all(&dir);
    }
}
