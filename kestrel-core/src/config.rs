//! dhcp server configs

pub mod cli {
    //! Parse from either cli or env var

    /// Default dhcpv4 addr
    pub static DEFAULT_V4_ADDR: &str = "0.0.0.0:67"; // default dhcpv4 port is 67
    /// Default control socket addr
    pub static DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:5547";
    /// Default channel size for mpsc chans
    pub const DEFAULT_CHANNEL_SIZE: usize = 10_000;
    /// Max live messages -- Changing this value will effect memory
    /// usage. The more live messages we hold onto the more memory will be
    /// used. At some point, the timeout will be hit and setting the live msg count
    /// higher will not affect % of timeouts
    pub const DEFAULT_MAX_LIVE_MSGS: usize = 1_000;
    /// Default timeout, we must respond within this window or we will time out
    pub const DEFAULT_TIMEOUT: u64 = 3;
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "kestrel-dhcp-worker";
    /// the default path to config
    pub static DEFAULT_CONFIG_PATH: &str = "/var/lib/kestrel/config.json";
    /// the default path for the per-ACK statistics file
    pub static DEFAULT_STATS_PATH: &str = "/var/lib/kestrel/pkt_statis.log";
    /// default log level. Can use this argument or KESTREL_LOG env var
    pub const DEFAULT_KESTREL_LOG: &str = "info";

    use std::{net::SocketAddr, path::PathBuf, time::Duration};

    pub use clap::Parser;
    use proto::v4;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "kestrel", bin_name = "kestrel", about, long_about = None)]
    /// parses from cli & environment var
    pub struct Config {
        /// path to kestrel's config
        #[clap(
            short,
            long,
            value_parser,
            env,
            default_value = DEFAULT_CONFIG_PATH
        )]
        pub config_path: PathBuf,
        /// the v4 address to listen on
        #[clap(long, env, value_parser, default_value = DEFAULT_V4_ADDR)]
        pub v4_addr: SocketAddr,
        /// the control/command socket address
        #[clap(long, env, value_parser, default_value = DEFAULT_CONTROL_ADDR)]
        pub control_addr: SocketAddr,
        /// default timeout, kestrel will respond within this window or drop
        #[clap(long, env, value_parser, default_value_t = DEFAULT_TIMEOUT)]
        pub timeout: u64,
        /// max live messages before new messages will begin to be dropped
        #[clap(long, env, value_parser, default_value_t = DEFAULT_MAX_LIVE_MSGS)]
        pub max_live_msgs: usize,
        /// channel size for various mpsc chans
        #[clap(long, env, value_parser, default_value_t = DEFAULT_CHANNEL_SIZE)]
        pub channel_size: usize,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// number of tokio worker threads; defaults to logical CPUs
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// path of the per-ACK statistics file
        #[clap(long, env, value_parser, default_value = DEFAULT_STATS_PATH)]
        pub stats_path: PathBuf,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_KESTREL_LOG)]
        pub kestrel_log: String,
    }

    impl Config {
        /// Create new timeout as `Duration`
        pub fn timeout(&self) -> Duration {
            Duration::from_secs(self.timeout)
        }

        /// are we bound to the default dhcpv4 port?
        pub fn is_default_port_v4(&self) -> bool {
            self.v4_addr.port() == v4::SERVER_PORT
        }
    }
}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use std::env;

    /// log as "json" or "standard" (unstructured)
    static DEFAULT_LOG_FORMAT: &str = "standard";

    /// Configuration for the tracing subscriber
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// install the global subscriber. Log level comes from KESTREL_LOG
        pub fn parse(kestrel_log: &str) -> Result<Self> {
            let log_frmt = env::var("LOG_FORMAT").unwrap_or_else(|_| DEFAULT_LOG_FORMAT.into());

            let filter =
                EnvFilter::try_new(kestrel_log).or_else(|_| EnvFilter::try_new("info"))?;

            match &log_frmt[..] {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self { log_frmt })
        }
    }
}
