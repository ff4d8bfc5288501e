#![allow(missing_docs)] // proc macros dont play nicely with docstrings

//! # metrics
//!
//! contains statistics for server metrics
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_gauge, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub label_enum MsgType {
        discover,
        request,
        decline,
        release,
        offer,
        ack,
        nak,
        inform,
        unknown,
    }
    pub struct RecvStats: IntCounter {
        "message_type" => MsgType
    }
    pub struct SentStats: IntCounter {
        "message_type" => MsgType
    }
}

lazy_static! {
    /// When the server started
    pub static ref START_TIME: Instant = Instant::now();

    /// bytes sent DHCPv4
    pub static ref DHCPV4_BYTES_SENT: IntCounter = register_int_counter!("dhcpv4_bytes_sent", "DHCPv4 bytes sent").unwrap();

    /// bytes recv DHCPv4
    pub static ref DHCPV4_BYTES_RECV: IntCounter = register_int_counter!("dhcpv4_bytes_recv", "DHCPv4 bytes recv").unwrap();

    /// histogram of response times for DHCPv4 reply
    pub static ref DHCPV4_REPLY_DURATION: HistogramVec = register_histogram_vec!(
        "dhcpv4_duration",
        "dhcpv4 duration (seconds)",
        &["type"]
    )
    .unwrap();

    pub static ref RECV_COUNT_VEC: IntCounterVec = prometheus::register_int_counter_vec!(
        "recv_type_counts",
        "Recv Type Counts",
        &["message_type"]
    )
    .unwrap();
    pub static ref SENT_COUNT_VEC: IntCounterVec = prometheus::register_int_counter_vec!(
        "sent_type_counts",
        "Sent Type Counts",
        &["message_type"]
    )
    .unwrap();

    /// aggregate count of all recv'd messages types
    pub static ref RECV_TYPE_COUNT: RecvStats = RecvStats::from(&RECV_COUNT_VEC);

    /// aggregate count of all sent messages types
    pub static ref SENT_TYPE_COUNT: SentStats = SentStats::from(&SENT_COUNT_VEC);

    /// # of in flight msgs
    pub static ref IN_FLIGHT: IntGauge =
        register_int_gauge!("in_flight", "count of currently processing messages").unwrap();

    /// server uptime
    pub static ref UPTIME: IntGauge = register_int_gauge!("uptime", "server uptime (seconds)").unwrap();

    // ICMP probe metrics

    /// probe request count
    pub static ref ICMP_REQUEST_COUNT: IntCounter = register_int_counter!("icmp_request_count", "count of ICMP echo requests").unwrap();
    /// probe reply count
    pub static ref ICMP_REPLY_COUNT: IntCounter = register_int_counter!("icmp_reply_count", "count of ICMP echo replies").unwrap();
    /// probes refused because the correlation map was full
    pub static ref ICMP_QUEUE_FULL_COUNT: IntCounter = register_int_counter!("icmp_queue_full_count", "count of probes refused at capacity").unwrap();

    /// histogram of response times for probe replies
    pub static ref ICMP_REPLY_DURATION: HistogramVec = register_histogram_vec!(
        "icmp_duration",
        "icmp response time in seconds, only counts received replies",
        &["reply"]
    )
    .unwrap();

    // master RPC metrics

    /// allocation requests written to the master
    pub static ref RPC_REQUEST_COUNT: IntCounter = register_int_counter!("rpc_request_count", "count of RPC requests sent to the master").unwrap();
    /// responses read from the master
    pub static ref RPC_RESPONSE_COUNT: IntCounter = register_int_counter!("rpc_response_count", "count of RPC responses read from the master").unwrap();
    /// records re-queued after a connection error
    pub static ref RPC_RETRY_COUNT: IntCounter = register_int_counter!("rpc_retry_count", "count of RPC records re-queued after connection errors").unwrap();
    /// records that exhausted their retries
    pub static ref RPC_TRANSIENT_COUNT: IntCounter = register_int_counter!("rpc_transient_count", "count of RPC records completed as transient failures").unwrap();
    /// reconnect attempts to the master
    pub static ref RPC_RECONNECT_COUNT: IntCounter = register_int_counter!("rpc_reconnect_count", "count of reconnects to the master").unwrap();

    /// histogram of master RPC round-trip times
    pub static ref RPC_REPLY_DURATION: HistogramVec = register_histogram_vec!(
        "rpc_duration",
        "master RPC round-trip time in seconds",
        &["result"]
    )
    .unwrap();
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use prometheus::gather;

    use super::{DHCPV4_REPLY_DURATION, ICMP_REPLY_DURATION, RPC_REPLY_DURATION};

    #[test]
    fn histograms_are_registered_and_exposed() {
        DHCPV4_REPLY_DURATION
            .with_label_values(&["offer"])
            .observe(0.001);
        ICMP_REPLY_DURATION
            .with_label_values(&["reply"])
            .observe(0.001);
        RPC_REPLY_DURATION.with_label_values(&["ok"]).observe(0.001);

        let families = gather();
        let names = families
            .iter()
            .map(|family| family.get_name().to_string())
            .collect::<HashSet<_>>();

        assert!(
            names.contains("dhcpv4_duration"),
            "registered metric families: {names:?}"
        );
        assert!(
            names.contains("icmp_duration"),
            "registered metric families: {names:?}"
        );
        assert!(
            names.contains("rpc_duration"),
            "registered metric families: {names:?}"
        );
    }
}
