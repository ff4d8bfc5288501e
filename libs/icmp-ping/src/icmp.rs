use pnet::packet::{icmp, ipv4, Packet};

use crate::ProbeId;

pub const ICMP_HEADER_SIZE: usize = 8;
/// echo payload carries the probe id so correlation survives the
/// kernel rewriting the ident field on DGRAM sockets
pub const PAYLOAD_SIZE: usize = 4;
pub const ECHO_BUFFER_SIZE: usize = ICMP_HEADER_SIZE + PAYLOAD_SIZE;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid size")]
    InvalidSize,
    #[error("invalid packet")]
    InvalidPacket,
    #[error("ipv4 packet failed")]
    BadIpv4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRequest {
    pub id: ProbeId,
}

impl EchoRequest {
    /// encode into `buffer`, which must hold [`ECHO_BUFFER_SIZE`] bytes.
    /// checksum per RFC 1071 over the whole ICMP message.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<(), Error> {
        let mut packet =
            icmp::echo_request::MutableEchoRequestPacket::new(buffer).ok_or(Error::InvalidSize)?;
        packet.set_icmp_type(icmp::IcmpTypes::EchoRequest);
        packet.set_identifier(self.id.ident());
        packet.set_sequence_number(self.id.seq());
        packet.set_payload(&self.id.to_be_bytes());

        let checksum =
            icmp::checksum(&icmp::IcmpPacket::new(packet.packet()).ok_or(Error::InvalidSize)?);
        packet.set_checksum(checksum);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub id: ProbeId,
}

impl EchoReply {
    /// decode a reply; `decode_header` strips the IPv4 header first
    /// (RAW sockets deliver it, DGRAM sockets do not)
    pub fn decode(buffer: &[u8], decode_header: bool) -> Result<Self, Error> {
        // needed for borrowck
        let ipv4_packet;
        let buffer = if decode_header {
            ipv4_packet = ipv4::Ipv4Packet::new(buffer).ok_or(Error::BadIpv4)?;
            ipv4_packet.payload()
        } else {
            buffer
        };
        let packet = icmp::echo_reply::EchoReplyPacket::new(buffer).ok_or(Error::InvalidPacket)?;
        if !matches!(packet.get_icmp_type(), icmp::IcmpTypes::EchoReply) {
            return Err(Error::InvalidPacket);
        }
        let payload = &buffer[ICMP_HEADER_SIZE..];
        if payload.len() != PAYLOAD_SIZE {
            return Err(Error::InvalidSize);
        }
        Ok(Self {
            id: ProbeId::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
        })
    }
}
