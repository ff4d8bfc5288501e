//! end-to-end tests: a running server, a scripted master, and a
//! client socket talking real datagrams over loopback
mod common;

use std::{net::Ipv4Addr, time::Duration};

use anyhow::Result;
use kestrel_core::proto::v4::{self, MessageType};
use tracing_test::traced_test;

use common::{client::TestClient, env::TestEnv};

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn discover_offer_request_ack() -> Result<()> {
    let env = TestEnv::start().await?;
    let client = TestClient::connect(env.server_addr()).await?;

    // DISCOVER -> OFFER with the master's candidate
    let offer = client
        .send_recv(client.build_msg(MessageType::Discover, None))
        .await?;
    assert!(offer.opts().has_msg_type(MessageType::Offer));
    assert_eq!(offer.yiaddr(), Ipv4Addr::new(192, 168, 0, 10));
    // lease time falls back to the subnet's valid-lifetime
    assert_eq!(
        offer
            .opts()
            .get(v4::code::LEASE_TIME)
            .and_then(|o| o.data().u32()),
        Some(3600)
    );
    assert!(offer.opts().get(v4::code::SERVER_IDENTIFIER).is_some());

    // REQUEST the offered address -> ACK with the same yiaddr
    let ack = client
        .send_recv(client.build_msg(MessageType::Request, Some(offer.yiaddr())))
        .await?;
    assert!(ack.opts().has_msg_type(MessageType::Ack));
    assert_eq!(ack.yiaddr(), offer.yiaddr());
    // requested options answered from subnet option-data
    assert!(ack.opts().get(v4::code::ROUTERS).is_some());

    env.stop().await
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn release_is_silent() -> Result<()> {
    let env = TestEnv::start().await?;
    let client = TestClient::connect(env.server_addr()).await?;

    let mut release = client.build_msg(MessageType::Release, None);
    release.set_ciaddr([192, 168, 0, 10]);
    client.send(release).await?;
    assert!(client.recv_timeout(Duration::from_millis(500)).await.is_none());

    // the master saw the notification
    assert!(env.master_saw_release().await);
    env.stop().await
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn control_socket_lps_and_stop() -> Result<()> {
    let env = TestEnv::start().await?;
    let client = TestClient::connect(env.server_addr()).await?;

    // traffic so the counters have something to count
    let offer = client
        .send_recv(client.build_msg(MessageType::Discover, None))
        .await?;
    assert!(offer.opts().has_msg_type(MessageType::Offer));
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let reply = env.control_cmd(serde_json::json!({"name": "statis_lps"})).await?;
    assert_eq!(reply["succeed"], serde_json::json!(true));
    let counts = reply["result"].as_str().unwrap();
    assert_eq!(counts.split(' ').count(), 4, "lps format: {counts}");

    // unknown command errors but keeps the session usable
    let reply = env.control_cmd(serde_json::json!({"name": "nonesuch"})).await?;
    assert_eq!(reply["succeed"], serde_json::json!(false));

    // stop: reply arrives, then the server winds down
    let reply = env.control_cmd(serde_json::json!({"name": "stop"})).await?;
    assert_eq!(reply["succeed"], serde_json::json!(true));
    env.wait_stopped().await
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn reconfig_swaps_subnets() -> Result<()> {
    let env = TestEnv::start().await?;
    let client = TestClient::connect(env.server_addr()).await?;

    // the initial config serves 192.168.0.0/24
    let offer = client
        .send_recv(client.build_msg(MessageType::Discover, None))
        .await?;
    assert!(offer.opts().has_msg_type(MessageType::Offer));

    // a broken file is rejected and the old config keeps serving
    env.write_config("{ not json").await?;
    let reply = env.control_cmd(serde_json::json!({"name": "reconfig"})).await?;
    assert_eq!(reply["succeed"], serde_json::json!(false));
    let offer = client
        .send_recv(client.build_msg(MessageType::Discover, None))
        .await?;
    assert!(offer.opts().has_msg_type(MessageType::Offer));

    // a config without our subnet drops the discover
    env.write_config(&common::env::config_without_subnet(env.master_port())).await?;
    let reply = env.control_cmd(serde_json::json!({"name": "reconfig"})).await?;
    assert_eq!(reply["succeed"], serde_json::json!(true));
    client.send(client.build_msg(MessageType::Discover, None)).await?;
    assert!(client.recv_timeout(Duration::from_millis(500)).await.is_none());

    env.stop().await
}
