//! minimal DHCP client driving the server over loopback
use std::{net::Ipv4Addr, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use kestrel_core::proto::{
    v4::{self, Message, MessageType},
    Decodable, Encodable,
};
use kestrel_core::tokio::net::UdpSocket;

pub struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
    chaddr: [u8; 6],
}

impl TestClient {
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let chaddr = rand::random();
        Ok(Self {
            socket,
            server,
            chaddr,
        })
    }

    /// a query carrying subnet-selection for the test subnet, so subnet
    /// lookup works no matter which interface loopback traffic takes
    pub fn build_msg(&self, msg_type: MessageType, requested: Option<Ipv4Addr>) -> Message {
        let uns = Ipv4Addr::UNSPECIFIED;
        let mut msg = Message::new_with_id(rand::random(), uns, uns, uns, uns, &self.chaddr);
        msg.opts_mut()
            .insert(v4::DhcpOption::message_type(msg_type));
        msg.opts_mut()
            .insert(v4::DhcpOption::subnet_selection([192, 168, 0, 1].into()));
        msg.opts_mut()
            .insert(v4::DhcpOption::parameter_request_list(&[
                v4::code::SUBNET_MASK,
                v4::code::ROUTERS,
                v4::code::DOMAIN_NAME,
            ]));
        if let Some(ip) = requested {
            msg.opts_mut().insert(v4::DhcpOption::requested_ip(ip));
        }
        msg
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        self.socket.send_to(&msg.to_vec()?, self.server).await?;
        Ok(())
    }

    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        let mut buf = [0u8; 1500];
        let recv = kestrel_core::tokio::time::timeout(timeout, self.socket.recv_from(&mut buf));
        match recv.await {
            Ok(Ok((n, _addr))) => Message::from_bytes(&buf[..n]).ok(),
            _ => None,
        }
    }

    pub async fn send_recv(&self, msg: Message) -> Result<Message> {
        let xid = msg.xid();
        self.send(msg).await?;
        let resp = self
            .recv_timeout(Duration::from_secs(3))
            .await
            .context("no response from server")?;
        anyhow::ensure!(resp.xid() == xid, "response xid mismatch");
        Ok(resp)
    }
}
