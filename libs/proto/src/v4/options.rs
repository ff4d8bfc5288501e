//! DHCPv4 options
//!
//! Options are a tag-length-value list. Each decoded option is held as
//! its tag plus a typed payload ([`OptionData`]); the typing is driven
//! by the option space the message was decoded against, and unknown
//! tags stay raw. Options may repeat on the wire; repeats keep their
//! insertion order under the tag.
use std::{fmt, net::Ipv4Addr, slice};

use crate::{
    Decodable, DecodeError, DecodeResult, Decoder, Encodable, EncodeError, EncodeResult, Encoder,
};

use super::definition::{dhcp4_space, raw_space, vendor_space, DataType, OptionDefinition, OptionSpace, Value};
use super::MessageType;

/// well-known option tags used around the server
pub mod code {
    /// 0 padding, skipped by the decoder
    pub const PAD: u8 = 0;
    /// 1 subnet mask
    pub const SUBNET_MASK: u8 = 1;
    /// 3 routers
    pub const ROUTERS: u8 = 3;
    /// 6 domain name servers
    pub const DOMAIN_NAME_SERVERS: u8 = 6;
    /// 12 host name
    pub const HOST_NAME: u8 = 12;
    /// 15 domain name
    pub const DOMAIN_NAME: u8 = 15;
    /// 28 broadcast address
    pub const BROADCAST_ADDRESS: u8 = 28;
    /// 43 vendor encapsulated options
    pub const VENDOR_ENCAPSULATED: u8 = 43;
    /// 50 requested IP address
    pub const REQUESTED_IP: u8 = 50;
    /// 51 address lease time
    pub const LEASE_TIME: u8 = 51;
    /// 53 DHCP message type
    pub const MESSAGE_TYPE: u8 = 53;
    /// 54 server identifier
    pub const SERVER_IDENTIFIER: u8 = 54;
    /// 55 parameter request list
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    /// 56 server message
    pub const MESSAGE: u8 = 56;
    /// 57 maximum DHCP message size
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    /// 58 renewal (T1)
    pub const RENEWAL_TIME: u8 = 58;
    /// 59 rebinding (T2)
    pub const REBINDING_TIME: u8 = 59;
    /// 60 vendor class identifier
    pub const VENDOR_CLASS_IDENTIFIER: u8 = 60;
    /// 61 client identifier
    pub const CLIENT_IDENTIFIER: u8 = 61;
    /// 82 relay agent information
    pub const RELAY_AGENT_INFORMATION: u8 = 82;
    /// 118 subnet selection
    pub const SUBNET_SELECTION: u8 = 118;
    /// 124 vendor-identifying vendor class
    pub const VIVCO: u8 = 124;
    /// 125 vendor-identifying vendor-specific information
    pub const VIVSO: u8 = 125;
    /// 255 end of options
    pub const END: u8 = 255;
}

/// One decoded option: tag + typed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    code: u8,
    data: OptionData,
}

/// The typed payload of an option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionData {
    /// unregistered or opaque payload
    Raw(Vec<u8>),
    /// single byte scalar
    U8(u8),
    /// two byte scalar, network order
    U16(u16),
    /// four byte scalar, network order
    U32(u32),
    /// non-empty text
    Str(String),
    /// k addresses, 4 bytes each
    AddrList(Vec<Ipv4Addr>),
    /// (1-byte length, bytes) tuples
    Tuples(Vec<Vec<u8>>),
    /// enterprise-id + opaque tuples
    VendorClass {
        /// IANA enterprise number
        enterprise_id: u32,
        /// opaque class tuples
        tuples: Vec<Vec<u8>>,
    },
    /// enterprise-id + nested vendor space options
    Vendor {
        /// IANA enterprise number
        enterprise_id: u32,
        /// sub-options decoded against the enterprise's space
        opts: DhcpOptions,
    },
    /// record/array payload driven by an [`OptionDefinition`]
    Custom(Vec<Value>),
}

impl DhcpOption {
    /// make an option from a tag and payload
    pub fn new(code: u8, data: OptionData) -> Self {
        Self { code, data }
    }

    /// the option tag
    pub fn code(&self) -> u8 {
        self.code
    }

    /// the typed payload
    pub fn data(&self) -> &OptionData {
        &self.data
    }

    /// consume, returning the payload
    pub fn into_data(self) -> OptionData {
        self.data
    }

    /// opt 53
    pub fn message_type(ty: MessageType) -> Self {
        Self::new(code::MESSAGE_TYPE, OptionData::U8(ty.into()))
    }
    /// opt 54
    pub fn server_identifier(ip: Ipv4Addr) -> Self {
        Self::new(code::SERVER_IDENTIFIER, OptionData::AddrList(vec![ip]))
    }
    /// opt 50
    pub fn requested_ip(ip: Ipv4Addr) -> Self {
        Self::new(code::REQUESTED_IP, OptionData::AddrList(vec![ip]))
    }
    /// opt 51
    pub fn lease_time(secs: u32) -> Self {
        Self::new(code::LEASE_TIME, OptionData::U32(secs))
    }
    /// opt 58
    pub fn renewal_time(secs: u32) -> Self {
        Self::new(code::RENEWAL_TIME, OptionData::U32(secs))
    }
    /// opt 59
    pub fn rebinding_time(secs: u32) -> Self {
        Self::new(code::REBINDING_TIME, OptionData::U32(secs))
    }
    /// opt 1
    pub fn subnet_mask(mask: Ipv4Addr) -> Self {
        Self::new(code::SUBNET_MASK, OptionData::AddrList(vec![mask]))
    }
    /// opt 28
    pub fn broadcast_address(ip: Ipv4Addr) -> Self {
        Self::new(code::BROADCAST_ADDRESS, OptionData::AddrList(vec![ip]))
    }
    /// opt 3
    pub fn routers(ips: Vec<Ipv4Addr>) -> Self {
        Self::new(code::ROUTERS, OptionData::AddrList(ips))
    }
    /// opt 61
    pub fn client_identifier(id: &[u8]) -> Self {
        Self::new(code::CLIENT_IDENTIFIER, OptionData::Raw(id.to_vec()))
    }
    /// opt 60
    pub fn vendor_class_identifier(s: impl Into<String>) -> Self {
        Self::new(code::VENDOR_CLASS_IDENTIFIER, OptionData::Str(s.into()))
    }
    /// opt 55
    pub fn parameter_request_list(codes: &[u8]) -> Self {
        Self::new(code::PARAMETER_REQUEST_LIST, OptionData::Raw(codes.to_vec()))
    }
    /// opt 118
    pub fn subnet_selection(ip: Ipv4Addr) -> Self {
        Self::new(code::SUBNET_SELECTION, OptionData::AddrList(vec![ip]))
    }

    fn decode_with(d: &mut Decoder<'_>, space: &OptionSpace) -> DecodeResult<Self> {
        let code = d.read_u8()?;
        let len = d.read_u8()? as usize;
        let payload = d.read_slice(len)?;
        Ok(Self {
            code,
            data: OptionData::unpack(code, payload, space)?,
        })
    }
}

impl Encodable for DhcpOption {
    fn encode(&self, e: &mut Encoder<'_>) -> EncodeResult<()> {
        let mut payload = Vec::with_capacity(32);
        self.data.pack(&mut Encoder::new(&mut payload))?;
        if payload.len() > u8::MAX as usize {
            return Err(EncodeError::OutOfRange {
                what: "option payload",
            });
        }
        e.write_u8(self.code)?;
        e.write_u8(payload.len() as u8)?;
        e.write_slice(&payload)
    }
}

impl fmt::Display for DhcpOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.data)
    }
}

impl OptionData {
    /// interpret the payload using `def`, which the decoder found in the
    /// option space it was handed
    pub fn unpack_with_def(
        code: u8,
        payload: &[u8],
        def: &OptionDefinition,
    ) -> DecodeResult<Self> {
        let mismatch = DecodeError::LengthMismatch {
            code,
            len: payload.len(),
        };
        if !def.record_fields().is_empty() {
            let mut d = Decoder::new(payload);
            let n = def.record_fields().len();
            let mut values = Vec::with_capacity(n);
            for (i, ty) in def.record_fields().iter().enumerate() {
                values.push(Value::decode(*ty, &mut d, i + 1 == n)?);
            }
            return Ok(OptionData::Custom(values));
        }
        Ok(match (def.data_type(), def.is_array()) {
            (DataType::U8, false) | (DataType::Bool, false) => {
                if payload.len() != 1 {
                    return Err(mismatch);
                }
                OptionData::U8(payload[0])
            }
            (DataType::U16, false) => {
                if payload.len() != 2 {
                    return Err(mismatch);
                }
                OptionData::U16(u16::from_be_bytes([payload[0], payload[1]]))
            }
            (DataType::U32, false) => {
                if payload.len() != 4 {
                    return Err(mismatch);
                }
                OptionData::U32(u32::from_be_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]))
            }
            (DataType::Str, _) => {
                if payload.is_empty() {
                    return Err(mismatch);
                }
                OptionData::Str(String::from_utf8_lossy(payload).into_owned())
            }
            (DataType::Ipv4, array) => {
                if payload.len() % 4 != 0 || (!array && payload.len() != 4) || payload.is_empty() {
                    return Err(mismatch);
                }
                OptionData::AddrList(
                    payload
                        .chunks_exact(4)
                        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                        .collect(),
                )
            }
            (DataType::Tuple, _) => OptionData::Tuples(unpack_tuples(payload)?),
            (DataType::VendorClass, _) => {
                let mut d = Decoder::new(payload);
                let enterprise_id = d.read_u32()?;
                let tuples = unpack_tuples(d.buffer())?;
                OptionData::VendorClass {
                    enterprise_id,
                    tuples,
                }
            }
            (DataType::Vendor, _) => {
                let mut d = Decoder::new(payload);
                let enterprise_id = d.read_u32()?;
                let space = vendor_space(enterprise_id).unwrap_or_else(raw_space);
                let opts = DhcpOptions::decode_with(&mut d, space)?;
                OptionData::Vendor {
                    enterprise_id,
                    opts,
                }
            }
            (DataType::Empty, _) | (DataType::Binary, _) | (DataType::U8, true)
            | (DataType::Bool, true) | (DataType::U16, true) | (DataType::U32, true) => {
                OptionData::Raw(payload.to_vec())
            }
        })
    }

    fn unpack(code: u8, payload: &[u8], space: &OptionSpace) -> DecodeResult<Self> {
        match space.get(code) {
            Some(def) => Self::unpack_with_def(code, payload, def),
            None => Ok(OptionData::Raw(payload.to_vec())),
        }
    }

    /// write the payload bytes (no tag/length) into the encoder
    pub fn pack(&self, e: &mut Encoder<'_>) -> EncodeResult<()> {
        match self {
            OptionData::Raw(bytes) => e.write_slice(bytes),
            OptionData::U8(n) => e.write_u8(*n),
            OptionData::U16(n) => e.write_u16(*n),
            OptionData::U32(n) => e.write_u32(*n),
            OptionData::Str(s) => {
                if s.is_empty() {
                    return Err(EncodeError::OutOfRange {
                        what: "empty string option",
                    });
                }
                e.write_slice(s.as_bytes())
            }
            OptionData::AddrList(ips) => {
                if ips.len() * 4 > u8::MAX as usize {
                    return Err(EncodeError::OutOfRange {
                        what: "address list",
                    });
                }
                for ip in ips {
                    e.write_slice(&ip.octets())?;
                }
                Ok(())
            }
            OptionData::Tuples(tuples) => pack_tuples(tuples, e),
            OptionData::VendorClass {
                enterprise_id,
                tuples,
            } => {
                e.write_u32(*enterprise_id)?;
                pack_tuples(tuples, e)
            }
            OptionData::Vendor {
                enterprise_id,
                opts,
            } => {
                e.write_u32(*enterprise_id)?;
                opts.encode_inner(e, false)
            }
            OptionData::Custom(values) => {
                let n = values.len();
                for (i, val) in values.iter().enumerate() {
                    val.encode(e, i + 1 == n)?;
                }
                Ok(())
            }
        }
    }

    /// the payload in wire form; used where options are compared or
    /// matched bytewise
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        // pack can only fail on over-long payloads, which can't have
        // come off the wire
        let _ = self.pack(&mut Encoder::new(&mut buf));
        buf
    }

    /// scalar accessor
    pub fn u8(&self) -> Option<u8> {
        match self {
            OptionData::U8(n) => Some(*n),
            _ => None,
        }
    }
    /// scalar accessor
    pub fn u16(&self) -> Option<u16> {
        match self {
            OptionData::U16(n) => Some(*n),
            _ => None,
        }
    }
    /// scalar accessor
    pub fn u32(&self) -> Option<u32> {
        match self {
            OptionData::U32(n) => Some(*n),
            _ => None,
        }
    }
    /// text accessor
    pub fn text(&self) -> Option<&str> {
        match self {
            OptionData::Str(s) => Some(s),
            _ => None,
        }
    }
    /// first address of an address-list payload
    pub fn ip(&self) -> Option<Ipv4Addr> {
        match self {
            OptionData::AddrList(ips) => ips.first().copied(),
            _ => None,
        }
    }
    /// all addresses of an address-list payload
    pub fn addrs(&self) -> Option<&[Ipv4Addr]> {
        match self {
            OptionData::AddrList(ips) => Some(ips),
            _ => None,
        }
    }
    /// raw payload accessor
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            OptionData::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for OptionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionData::Raw(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            OptionData::U8(n) => write!(f, "{n}"),
            OptionData::U16(n) => write!(f, "{n}"),
            OptionData::U32(n) => write!(f, "{n}"),
            OptionData::Str(s) => write!(f, "{s:?}"),
            OptionData::AddrList(ips) => {
                let list = ips
                    .iter()
                    .map(|ip| ip.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "{list}")
            }
            OptionData::Tuples(tuples) => {
                let list = tuples
                    .iter()
                    .map(hex::encode)
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "{list}")
            }
            OptionData::VendorClass {
                enterprise_id,
                tuples,
            } => {
                let list = tuples
                    .iter()
                    .map(hex::encode)
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "enterprise={enterprise_id} {list}")
            }
            OptionData::Vendor {
                enterprise_id,
                opts,
            } => write!(f, "enterprise={enterprise_id} ({} sub-opts)", opts.len()),
            OptionData::Custom(values) => {
                let list = values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "{list}")
            }
        }
    }
}

fn unpack_tuples(payload: &[u8]) -> DecodeResult<Vec<Vec<u8>>> {
    let mut d = Decoder::new(payload);
    let mut tuples = vec![];
    while !d.is_empty() {
        let len = d.read_u8()? as usize;
        tuples.push(d.read_slice(len)?.to_vec());
    }
    Ok(tuples)
}

fn pack_tuples(tuples: &[Vec<u8>], e: &mut Encoder<'_>) -> EncodeResult<()> {
    for tuple in tuples {
        if tuple.len() > u8::MAX as usize {
            return Err(EncodeError::OutOfRange { what: "tuple" });
        }
        e.write_u8(tuple.len() as u8)?;
        e.write_slice(tuple)?;
    }
    Ok(())
}

/// The option list of a message. Options may repeat; insertion order is
/// preserved under each tag.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DhcpOptions(Vec<DhcpOption>);

impl DhcpOptions {
    /// create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// first option with the tag
    pub fn get(&self, code: u8) -> Option<&DhcpOption> {
        self.0.iter().find(|opt| opt.code == code)
    }

    /// every option with the tag, in insertion order
    pub fn get_all(&self, code: u8) -> impl Iterator<Item = &DhcpOption> {
        self.0.iter().filter(move |opt| opt.code == code)
    }

    /// replace the first option with this tag, or append
    pub fn insert(&mut self, opt: DhcpOption) {
        match self.0.iter_mut().find(|o| o.code == opt.code) {
            Some(slot) => *slot = opt,
            None => self.0.push(opt),
        }
    }

    /// append unconditionally (repeated tags allowed)
    pub fn push(&mut self, opt: DhcpOption) {
        self.0.push(opt);
    }

    /// drop every option with the tag, returning the first
    pub fn remove(&mut self, code: u8) -> Option<DhcpOption> {
        let first = self.0.iter().position(|opt| opt.code == code)?;
        let removed = self.0.remove(first);
        self.0.retain(|opt| opt.code != code);
        Some(removed)
    }

    /// drop everything
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// iterate in insertion order
    pub fn iter(&self) -> slice::Iter<'_, DhcpOption> {
        self.0.iter()
    }

    /// option count
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// true when no options are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// the message type from opt 53, if present and well-typed
    pub fn msg_type(&self) -> Option<MessageType> {
        self.get(code::MESSAGE_TYPE)
            .and_then(|opt| opt.data.u8())
            .map(MessageType::from)
    }

    /// does opt 53 carry this message type
    pub fn has_msg_type(&self, ty: MessageType) -> bool {
        self.msg_type() == Some(ty)
    }

    /// decode against a specific option space
    pub fn decode_with(d: &mut Decoder<'_>, space: &OptionSpace) -> DecodeResult<Self> {
        let mut opts = DhcpOptions::default();
        loop {
            match d.peek_u8() {
                // list exhausted without END; relays routinely truncate
                // trailing padding, so accept it
                None => break,
                Some(code::PAD) => {
                    d.read_u8()?;
                }
                Some(code::END) => {
                    d.read_u8()?;
                    break;
                }
                Some(_) => opts.0.push(DhcpOption::decode_with(d, space)?),
            }
        }
        Ok(opts)
    }

    fn encode_inner(&self, e: &mut Encoder<'_>, with_end: bool) -> EncodeResult<()> {
        // emitted in tag order; repeats keep insertion order (stable sort)
        let mut sorted: Vec<&DhcpOption> = self.0.iter().collect();
        sorted.sort_by_key(|opt| opt.code);
        for opt in sorted {
            opt.encode(e)?;
        }
        if with_end {
            e.write_u8(code::END)?;
        }
        Ok(())
    }
}

impl Decodable for DhcpOptions {
    fn decode(d: &mut Decoder<'_>) -> DecodeResult<Self> {
        Self::decode_with(d, dhcp4_space())
    }
}

impl Encodable for DhcpOptions {
    fn encode(&self, e: &mut Encoder<'_>) -> EncodeResult<()> {
        self.encode_inner(e, true)
    }
}

impl FromIterator<DhcpOption> for DhcpOptions {
    fn from_iter<T: IntoIterator<Item = DhcpOption>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for DhcpOptions {
    type Item = DhcpOption;
    type IntoIter = std::vec::IntoIter<DhcpOption>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
