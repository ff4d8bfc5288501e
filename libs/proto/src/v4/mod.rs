//! DHCPv4 message
//!
//! Fixed header (RFC 2131), magic cookie, then the option list. The
//! decoder is strict about the cookie and option typing; the encoder
//! writes options in tag order and always terminates with END.
use std::{fmt, net::Ipv4Addr};

use crate::{
    Decodable, DecodeError, DecodeResult, Decoder, Encodable, EncodeResult, Encoder,
};

pub mod definition;
pub mod options;
pub mod relay;

pub use definition::{
    dhcp4_space, vendor_space, DataType, DefinitionError, OptionDefinition, OptionSpace, Value,
};
pub use options::{code, DhcpOption, DhcpOptions, OptionData};

/// DHCP magic cookie
pub const MAGIC: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
/// server listens here
pub const SERVER_PORT: u16 = 67;
/// clients listen here
pub const CLIENT_PORT: u16 = 68;
/// datagrams larger than this are rejected at intake
pub const MAX_DGRAM_SIZE: usize = 1500;

const CHADDR_LEN: usize = 16;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;

/// BOOTP opcode
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// client -> server
    BootRequest,
    /// server -> client
    BootReply,
    /// anything else
    Unknown(u8),
}

impl From<u8> for Opcode {
    fn from(n: u8) -> Self {
        match n {
            1 => Opcode::BootRequest,
            2 => Opcode::BootReply,
            n => Opcode::Unknown(n),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        match op {
            Opcode::BootRequest => 1,
            Opcode::BootReply => 2,
            Opcode::Unknown(n) => n,
        }
    }
}

/// DHCP message type (option 53)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// client discovery broadcast
    Discover,
    /// server offer
    Offer,
    /// client address request
    Request,
    /// client declines an offered address
    Decline,
    /// server acknowledgement
    Ack,
    /// server negative acknowledgement
    Nak,
    /// client releases its lease
    Release,
    /// client asks for configuration only
    Inform,
    /// unrecognized type byte
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(n: u8) -> Self {
        use MessageType::*;
        match n {
            1 => Discover,
            2 => Offer,
            3 => Request,
            4 => Decline,
            5 => Ack,
            6 => Nak,
            7 => Release,
            8 => Inform,
            n => Unknown(n),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(ty: MessageType) -> Self {
        use MessageType::*;
        match ty {
            Discover => 1,
            Offer => 2,
            Request => 3,
            Decline => 4,
            Ack => 5,
            Nak => 6,
            Release => 7,
            Inform => 8,
            Unknown(n) => n,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// the 16-bit flags field; only the broadcast bit is defined
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Flags(u16);

impl Flags {
    /// build from the raw field
    pub fn new(n: u16) -> Self {
        Flags(n)
    }
    /// is the broadcast bit set
    pub fn broadcast(&self) -> bool {
        self.0 & 0x8000 != 0
    }
    /// return flags with the broadcast bit set
    pub fn set_broadcast(self) -> Self {
        Flags(self.0 | 0x8000)
    }
}

impl From<u16> for Flags {
    fn from(n: u16) -> Self {
        Flags(n)
    }
}

impl From<Flags> for u16 {
    fn from(f: Flags) -> Self {
        f.0
    }
}

/// A DHCPv4 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    opcode: Opcode,
    htype: u8,
    hops: u8,
    xid: u32,
    secs: u16,
    flags: Flags,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    giaddr: Ipv4Addr,
    chaddr: Vec<u8>,
    sname: Option<String>,
    fname: Option<String>,
    opts: DhcpOptions,
}

impl Message {
    /// new message with a zero xid
    pub fn new(
        ciaddr: Ipv4Addr,
        yiaddr: Ipv4Addr,
        siaddr: Ipv4Addr,
        giaddr: Ipv4Addr,
        chaddr: &[u8],
    ) -> Self {
        Self::new_with_id(0, ciaddr, yiaddr, siaddr, giaddr, chaddr)
    }

    /// new message with a given xid
    pub fn new_with_id(
        xid: u32,
        ciaddr: Ipv4Addr,
        yiaddr: Ipv4Addr,
        siaddr: Ipv4Addr,
        giaddr: Ipv4Addr,
        chaddr: &[u8],
    ) -> Self {
        Self {
            opcode: Opcode::BootRequest,
            // 1 == 10mb ethernet
            htype: 1,
            hops: 0,
            xid,
            secs: 0,
            flags: Flags::default(),
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr: chaddr.iter().copied().take(CHADDR_LEN).collect(),
            sname: None,
            fname: None,
            opts: DhcpOptions::new(),
        }
    }

    /// opcode
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }
    /// set the opcode
    pub fn set_opcode(&mut self, opcode: Opcode) -> &mut Self {
        self.opcode = opcode;
        self
    }
    /// hardware type
    pub fn htype(&self) -> u8 {
        self.htype
    }
    /// set hardware type
    pub fn set_htype(&mut self, htype: u8) -> &mut Self {
        self.htype = htype;
        self
    }
    /// hardware address length
    pub fn hlen(&self) -> u8 {
        self.chaddr.len() as u8
    }
    /// relay hop count
    pub fn hops(&self) -> u8 {
        self.hops
    }
    /// set relay hop count
    pub fn set_hops(&mut self, hops: u8) -> &mut Self {
        self.hops = hops;
        self
    }
    /// transaction id
    pub fn xid(&self) -> u32 {
        self.xid
    }
    /// set transaction id
    pub fn set_xid(&mut self, xid: u32) -> &mut Self {
        self.xid = xid;
        self
    }
    /// seconds since client started trying
    pub fn secs(&self) -> u16 {
        self.secs
    }
    /// set secs
    pub fn set_secs(&mut self, secs: u16) -> &mut Self {
        self.secs = secs;
        self
    }
    /// flags field
    pub fn flags(&self) -> Flags {
        self.flags
    }
    /// set flags field
    pub fn set_flags(&mut self, flags: Flags) -> &mut Self {
        self.flags = flags;
        self
    }
    /// client address
    pub fn ciaddr(&self) -> Ipv4Addr {
        self.ciaddr
    }
    /// set client address
    pub fn set_ciaddr<I: Into<Ipv4Addr>>(&mut self, addr: I) -> &mut Self {
        self.ciaddr = addr.into();
        self
    }
    /// your (offered) address
    pub fn yiaddr(&self) -> Ipv4Addr {
        self.yiaddr
    }
    /// set your address
    pub fn set_yiaddr<I: Into<Ipv4Addr>>(&mut self, addr: I) -> &mut Self {
        self.yiaddr = addr.into();
        self
    }
    /// next-server address
    pub fn siaddr(&self) -> Ipv4Addr {
        self.siaddr
    }
    /// set next-server address
    pub fn set_siaddr<I: Into<Ipv4Addr>>(&mut self, addr: I) -> &mut Self {
        self.siaddr = addr.into();
        self
    }
    /// relay agent address
    pub fn giaddr(&self) -> Ipv4Addr {
        self.giaddr
    }
    /// set relay agent address
    pub fn set_giaddr<I: Into<Ipv4Addr>>(&mut self, addr: I) -> &mut Self {
        self.giaddr = addr.into();
        self
    }
    /// client hardware address (hlen bytes)
    pub fn chaddr(&self) -> &[u8] {
        &self.chaddr
    }
    /// set client hardware address
    pub fn set_chaddr(&mut self, chaddr: &[u8]) -> &mut Self {
        self.chaddr = chaddr.iter().copied().take(CHADDR_LEN).collect();
        self
    }
    /// server host name field
    pub fn sname(&self) -> Option<&str> {
        self.sname.as_deref()
    }
    /// set server host name field
    pub fn set_sname_str(&mut self, sname: impl Into<String>) -> &mut Self {
        self.sname = Some(sname.into());
        self
    }
    /// clear server host name field
    pub fn clear_sname(&mut self) -> &mut Self {
        self.sname = None;
        self
    }
    /// boot file name field
    pub fn fname(&self) -> Option<&str> {
        self.fname.as_deref()
    }
    /// set boot file name field
    pub fn set_fname_str(&mut self, fname: impl Into<String>) -> &mut Self {
        self.fname = Some(fname.into());
        self
    }
    /// clear boot file name field
    pub fn clear_fname(&mut self) -> &mut Self {
        self.fname = None;
        self
    }
    /// zero ciaddr/yiaddr/siaddr/giaddr
    pub fn clear_addrs(&mut self) -> &mut Self {
        self.ciaddr = Ipv4Addr::UNSPECIFIED;
        self.yiaddr = Ipv4Addr::UNSPECIFIED;
        self.siaddr = Ipv4Addr::UNSPECIFIED;
        self.giaddr = Ipv4Addr::UNSPECIFIED;
        self
    }
    /// option list
    pub fn opts(&self) -> &DhcpOptions {
        &self.opts
    }
    /// mutable option list
    pub fn opts_mut(&mut self) -> &mut DhcpOptions {
        &mut self.opts
    }
}

impl Decodable for Message {
    fn decode(d: &mut Decoder<'_>) -> DecodeResult<Self> {
        let opcode = Opcode::from(d.read_u8()?);
        let htype = d.read_u8()?;
        let hlen = d.read_u8()? as usize;
        let hops = d.read_u8()?;
        let xid = d.read_u32()?;
        let secs = d.read_u16()?;
        let flags = Flags::from(d.read_u16()?);
        let ciaddr = d.read_ipv4()?;
        let yiaddr = d.read_ipv4()?;
        let siaddr = d.read_ipv4()?;
        let giaddr = d.read_ipv4()?;
        let chaddr_field = d.read_slice(CHADDR_LEN)?;
        let chaddr = chaddr_field[..hlen.min(CHADDR_LEN)].to_vec();
        let sname = d.read_cstring(SNAME_LEN)?;
        let fname = d.read_cstring(FILE_LEN)?;

        let magic = d.read_slice(4)?;
        if magic != MAGIC {
            return Err(DecodeError::BadMagic {
                got: [magic[0], magic[1], magic[2], magic[3]],
            });
        }
        let opts = DhcpOptions::decode(d)?;

        Ok(Message {
            opcode,
            htype,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            fname,
            opts,
        })
    }
}

impl Encodable for Message {
    fn encode(&self, e: &mut Encoder<'_>) -> EncodeResult<()> {
        e.write_u8(self.opcode.into())?;
        e.write_u8(self.htype)?;
        e.write_u8(self.hlen())?;
        e.write_u8(self.hops)?;
        e.write_u32(self.xid)?;
        e.write_u16(self.secs)?;
        e.write_u16(self.flags.into())?;
        e.write_slice(&self.ciaddr.octets())?;
        e.write_slice(&self.yiaddr.octets())?;
        e.write_slice(&self.siaddr.octets())?;
        e.write_slice(&self.giaddr.octets())?;
        e.write_slice(&self.chaddr)?;
        e.write_fill(CHADDR_LEN - self.chaddr.len(), 0)?;
        e.write_cstring(self.sname.as_deref(), SNAME_LEN)?;
        e.write_cstring(self.fname.as_deref(), FILE_LEN)?;
        e.write_slice(&MAGIC)?;
        self.opts.encode(e)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "xid={:#010x} type={} ciaddr={} yiaddr={} giaddr={} chaddr={} opts=[{}]",
            self.xid,
            self.opts
                .msg_type()
                .map(|ty| ty.to_string())
                .unwrap_or_else(|| "bootp".into()),
            self.ciaddr,
            self.yiaddr,
            self.giaddr,
            hex::encode(&self.chaddr),
            self.opts
                .iter()
                .map(|opt| opt.code().to_string())
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let mut msg = Message::new_with_id(
            0x2a2a2a2a,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0, 1, 2, 3, 4, 5],
        );
        msg.opts_mut()
            .insert(DhcpOption::message_type(MessageType::Discover));
        msg.opts_mut()
            .insert(DhcpOption::parameter_request_list(&[1, 3, 6, 15]));
        msg.opts_mut()
            .insert(DhcpOption::vendor_class_identifier("MSFT 5.0"));
        msg
    }

    #[test]
    fn round_trip_message() {
        let msg = sample();
        let buf = msg.to_vec().unwrap();
        let back = Message::from_bytes(&buf).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn round_trip_bytes() {
        // options already in tag order + no PAD, so bytes survive both ways
        let buf = sample().to_vec().unwrap();
        let decoded = Message::from_bytes(&buf).unwrap();
        assert_eq!(decoded.to_vec().unwrap(), buf);
    }

    #[test]
    fn bad_magic() {
        let mut buf = sample().to_vec().unwrap();
        buf[236] = 0x6b;
        assert!(matches!(
            Message::from_bytes(&buf),
            Err(DecodeError::BadMagic { .. })
        ));
    }

    #[test]
    fn truncated_header() {
        let buf = sample().to_vec().unwrap();
        assert!(matches!(
            Message::from_bytes(&buf[..100]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn pad_skipped_end_terminates() {
        let mut buf = sample().to_vec().unwrap();
        // splice PAD bytes ahead of the option list
        let opts_at = 240;
        buf.splice(opts_at..opts_at, [0u8, 0, 0]);
        let decoded = Message::from_bytes(&buf).unwrap();
        assert!(decoded.opts().has_msg_type(MessageType::Discover));
        // trailing garbage after END is ignored
        buf.extend([0xde, 0xad]);
        assert!(Message::from_bytes(&buf).is_ok());
    }

    #[test]
    fn repeats_keep_insertion_order() {
        let mut msg = sample();
        msg.opts_mut()
            .push(DhcpOption::new(77, OptionData::Raw(b"first".to_vec())));
        msg.opts_mut()
            .push(DhcpOption::new(77, OptionData::Raw(b"second".to_vec())));
        let buf = msg.to_vec().unwrap();
        let decoded = Message::from_bytes(&buf).unwrap();
        let both = decoded.opts().get_all(77).collect::<Vec<_>>();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].data().bytes().unwrap(), b"first");
        assert_eq!(both[1].data().bytes().unwrap(), b"second");
    }

    #[test]
    fn scalar_length_mismatch() {
        let mut buf = sample().to_vec().unwrap();
        // opt 53 with a 2-byte payload is malformed
        let opts_at = 240;
        buf.splice(opts_at..opts_at, [53u8, 2, 1, 1]);
        assert!(matches!(
            Message::from_bytes(&buf),
            Err(DecodeError::LengthMismatch { code: 53, len: 2 })
        ));
    }

    #[test]
    fn addr_list_multiple_of_four() {
        let mut buf = sample().to_vec().unwrap();
        let opts_at = 240;
        buf.splice(opts_at..opts_at, [3u8, 5, 1, 2, 3, 4, 5]);
        assert!(matches!(
            Message::from_bytes(&buf),
            Err(DecodeError::LengthMismatch { code: 3, len: 5 })
        ));
    }

    #[test]
    fn addr_list_too_long_to_encode() {
        let mut msg = sample();
        msg.opts_mut().insert(DhcpOption::routers(
            (0..64).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect(),
        ));
        assert!(matches!(
            msg.to_vec(),
            Err(crate::EncodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn tuple_encoding() {
        let mut msg = sample();
        msg.opts_mut().insert(DhcpOption::new(
            code::VIVCO,
            OptionData::VendorClass {
                enterprise_id: 4491,
                tuples: vec![b"docsis3.0".to_vec()],
            },
        ));
        let buf = msg.to_vec().unwrap();
        let decoded = Message::from_bytes(&buf).unwrap();
        match decoded.opts().get(code::VIVCO).unwrap().data() {
            OptionData::VendorClass {
                enterprise_id,
                tuples,
            } => {
                assert_eq!(*enterprise_id, 4491);
                assert_eq!(tuples[0], b"docsis3.0");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn custom_record_option() {
        // a record definition drives decode of an unregistered tag
        let def = OptionDefinition::record(
            "client-fqdn",
            81,
            vec![DataType::U8, DataType::U8, DataType::U8, DataType::Str],
        )
        .unwrap();
        let payload = [0u8, 255, 255, b'h', b'o', b's', b't'];
        let opt = OptionData::unpack_with_def(81, &payload, &def).unwrap();
        match &opt {
            OptionData::Custom(values) => {
                assert_eq!(values[0], Value::U8(0));
                assert_eq!(values[3], Value::Str("host".into()));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        // and packs back to the same bytes
        let mut buf = vec![];
        opt.pack(&mut crate::Encoder::new(&mut buf)).unwrap();
        assert_eq!(buf, payload);
    }

    #[test]
    fn vendor_space_recursion() {
        // enterprise 4491 has a registered space: sub-opt 2 is an addr list
        let mut msg = sample();
        let mut sub = DhcpOptions::new();
        sub.insert(DhcpOption::new(
            2,
            OptionData::AddrList(vec![Ipv4Addr::new(10, 1, 1, 1)]),
        ));
        msg.opts_mut().insert(DhcpOption::new(
            code::VIVSO,
            OptionData::Vendor {
                enterprise_id: 4491,
                opts: sub,
            },
        ));
        let buf = msg.to_vec().unwrap();
        let decoded = Message::from_bytes(&buf).unwrap();
        match decoded.opts().get(code::VIVSO).unwrap().data() {
            OptionData::Vendor {
                enterprise_id,
                opts,
            } => {
                assert_eq!(*enterprise_id, 4491);
                assert_eq!(
                    opts.get(2).unwrap().data().ip(),
                    Some(Ipv4Addr::new(10, 1, 1, 1))
                );
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
