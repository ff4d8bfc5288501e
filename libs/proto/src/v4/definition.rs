//! option definitions and named option spaces
//!
//! A definition describes how an option's payload is typed; definitions
//! live in named spaces (`dhcp4` for standard options, one space per
//! vendor enterprise-id). The decoder consults the space to pick a
//! typed representation, falling back to raw bytes for unknown tags.
use std::{collections::HashMap, fmt, net::Ipv4Addr};

use lazy_static::lazy_static;
use thiserror::Error;

use crate::{DecodeError, DecodeResult, Decoder, EncodeResult, Encoder};

/// name of the standard DHCPv4 option space
pub const DHCP4_SPACE: &str = "dhcp4";

/// wire data type of an option payload or record field
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataType {
    /// zero-length payload
    Empty,
    /// one byte
    U8,
    /// two bytes, network order
    U16,
    /// four bytes, network order
    U32,
    /// one byte, 0 or 1
    Bool,
    /// four bytes, dotted-quad text form
    Ipv4,
    /// non-empty text
    Str,
    /// opaque bytes
    Binary,
    /// (1-byte length, bytes) tuples
    Tuple,
    /// enterprise-id + tuples (vendor class)
    VendorClass,
    /// enterprise-id + encapsulated vendor space
    Vendor,
}

/// a typed scalar produced by a record or array definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// one byte
    U8(u8),
    /// two bytes
    U16(u16),
    /// four bytes
    U32(u32),
    /// boolean byte
    Bool(bool),
    /// address
    Ipv4(Ipv4Addr),
    /// text
    Str(String),
    /// raw bytes (always last in a record)
    Binary(Vec<u8>),
}

impl Value {
    pub(crate) fn decode(ty: DataType, d: &mut Decoder<'_>, last: bool) -> DecodeResult<Self> {
        Ok(match ty {
            DataType::U8 => Value::U8(d.read_u8()?),
            DataType::U16 => Value::U16(d.read_u16()?),
            DataType::U32 => Value::U32(d.read_u32()?),
            DataType::Bool => Value::Bool(d.read_u8()? != 0),
            DataType::Ipv4 => Value::Ipv4(d.read_ipv4()?),
            DataType::Str | DataType::Binary if last => {
                // the final field of a record absorbs the remainder
                let rest = d.read_slice(d.buffer().len())?;
                if ty == DataType::Str {
                    Value::Str(String::from_utf8_lossy(rest).into_owned())
                } else {
                    Value::Binary(rest.to_vec())
                }
            }
            // a non-final text/binary field carries its own length byte
            DataType::Str | DataType::Binary => {
                let len = d.read_u8()? as usize;
                let bytes = d.read_slice(len)?;
                if ty == DataType::Str {
                    Value::Str(String::from_utf8_lossy(bytes).into_owned())
                } else {
                    Value::Binary(bytes.to_vec())
                }
            }
            DataType::Empty | DataType::Tuple | DataType::VendorClass | DataType::Vendor => {
                // these never appear as record fields
                return Err(DecodeError::UnknownTypeForDefinition {
                    name: format!("{ty:?}"),
                });
            }
        })
    }

    pub(crate) fn encode(&self, e: &mut Encoder<'_>, last: bool) -> EncodeResult<()> {
        match self {
            Value::U8(n) => e.write_u8(*n),
            Value::U16(n) => e.write_u16(*n),
            Value::U32(n) => e.write_u32(*n),
            Value::Bool(b) => e.write_u8(*b as u8),
            Value::Ipv4(ip) => e.write_slice(&ip.octets()),
            Value::Str(s) if last => e.write_slice(s.as_bytes()),
            Value::Binary(b) if last => e.write_slice(b),
            Value::Str(s) => {
                e.write_u8(s.len() as u8)?;
                e.write_slice(s.as_bytes())
            }
            Value::Binary(b) => {
                e.write_u8(b.len() as u8)?;
                e.write_slice(b)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(n) => write!(f, "{n}"),
            Value::U16(n) => write!(f, "{n}"),
            Value::U32(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Ipv4(ip) => write!(f, "{ip}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Binary(b) => write!(f, "{}", hex::encode(b)),
        }
    }
}

/// errors raised while building a definition
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// array definitions cannot also encapsulate a space
    #[error("definition {0:?} is an array and encapsulates a space")]
    ArrayEncapsulated(String),
    /// record definitions need at least one field
    #[error("record definition {0:?} has no fields")]
    EmptyRecord(String),
}

/// Describes an option: its name, tag, payload typing, whether the
/// payload repeats (array), optional record layout and an optional
/// encapsulated sub-space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDefinition {
    name: String,
    code: u8,
    data_type: DataType,
    array: bool,
    record_fields: Vec<DataType>,
    encapsulated_space: Option<String>,
}

impl OptionDefinition {
    /// build a scalar/array definition
    pub fn new(
        name: impl Into<String>,
        code: u8,
        data_type: DataType,
        array: bool,
    ) -> Result<Self, DefinitionError> {
        Self::build(name.into(), code, data_type, array, vec![], None)
    }

    /// build a record definition; `fields` must be non-empty
    pub fn record(
        name: impl Into<String>,
        code: u8,
        fields: Vec<DataType>,
    ) -> Result<Self, DefinitionError> {
        let name = name.into();
        if fields.is_empty() {
            return Err(DefinitionError::EmptyRecord(name));
        }
        Self::build(name, code, DataType::Binary, false, fields, None)
    }

    /// build a definition that encapsulates a sub-space
    pub fn encapsulating(
        name: impl Into<String>,
        code: u8,
        data_type: DataType,
        space: impl Into<String>,
    ) -> Result<Self, DefinitionError> {
        Self::build(name.into(), code, data_type, false, vec![], Some(space.into()))
    }

    fn build(
        name: String,
        code: u8,
        data_type: DataType,
        array: bool,
        record_fields: Vec<DataType>,
        encapsulated_space: Option<String>,
    ) -> Result<Self, DefinitionError> {
        if array && encapsulated_space.is_some() {
            return Err(DefinitionError::ArrayEncapsulated(name));
        }
        Ok(Self {
            name,
            code,
            data_type,
            array,
            record_fields,
            encapsulated_space,
        })
    }

    /// the definition name
    pub fn name(&self) -> &str {
        &self.name
    }
    /// the option tag
    pub fn code(&self) -> u8 {
        self.code
    }
    /// the payload type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
    /// does the payload repeat
    pub fn is_array(&self) -> bool {
        self.array
    }
    /// record field layout, empty for non-records
    pub fn record_fields(&self) -> &[DataType] {
        &self.record_fields
    }
    /// name of the encapsulated space, if any
    pub fn encapsulated_space(&self) -> Option<&str> {
        self.encapsulated_space.as_deref()
    }
}

/// A named collection of option definitions, indexed by code and name
#[derive(Debug, Clone, Default)]
pub struct OptionSpace {
    name: String,
    by_code: HashMap<u8, OptionDefinition>,
    by_name: HashMap<String, u8>,
}

impl OptionSpace {
    /// create an empty space
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            by_code: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// the space name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// add a definition, replacing any previous definition of the code
    pub fn add(&mut self, def: OptionDefinition) {
        self.by_name.insert(def.name.clone(), def.code);
        self.by_code.insert(def.code, def);
    }

    /// definition for a code
    pub fn get(&self, code: u8) -> Option<&OptionDefinition> {
        self.by_code.get(&code)
    }

    /// definition by name
    pub fn find(&self, name: &str) -> Option<&OptionDefinition> {
        self.by_name.get(name).and_then(|code| self.by_code.get(code))
    }

    /// resolve an `option[..]` operand: numeric tag or a name in this space
    pub fn resolve(&self, name_or_code: &str) -> Option<u8> {
        match name_or_code.parse::<u8>() {
            Ok(code) => Some(code),
            Err(_) => self.by_name.get(name_or_code).copied(),
        }
    }

    /// iterate definitions
    pub fn iter(&self) -> impl Iterator<Item = &OptionDefinition> {
        self.by_code.values()
    }
}

macro_rules! std_defs {
    ($space:ident, $(($name:literal, $code:literal, $ty:ident, $array:literal)),+ $(,)?) => {
        $($space.add(
            OptionDefinition::new($name, $code, DataType::$ty, $array)
                .expect("static definition table is valid"),
        );)+
    };
}

lazy_static! {
    static ref DHCP4: OptionSpace = {
        let mut space = OptionSpace::new(DHCP4_SPACE);
        std_defs!(
            space,
            ("subnet-mask", 1, Ipv4, false),
            ("time-offset", 2, U32, false),
            ("routers", 3, Ipv4, true),
            ("time-servers", 4, Ipv4, true),
            ("name-servers", 5, Ipv4, true),
            ("domain-name-servers", 6, Ipv4, true),
            ("log-servers", 7, Ipv4, true),
            ("host-name", 12, Str, false),
            ("boot-size", 13, U16, false),
            ("domain-name", 15, Str, false),
            ("swap-server", 16, Ipv4, false),
            ("root-path", 17, Str, false),
            ("ip-forwarding", 19, Bool, false),
            ("interface-mtu", 26, U16, false),
            ("broadcast-address", 28, Ipv4, false),
            ("router-solicitation-address", 32, Ipv4, false),
            ("arp-cache-timeout", 35, U32, false),
            ("default-tcp-ttl", 37, U8, false),
            ("ntp-servers", 42, Ipv4, true),
            ("vendor-encapsulated-options", 43, Binary, false),
            ("netbios-name-servers", 44, Ipv4, true),
            ("netbios-node-type", 46, U8, false),
            ("netbios-scope", 47, Str, false),
            ("dhcp-requested-address", 50, Ipv4, false),
            ("dhcp-lease-time", 51, U32, false),
            ("dhcp-option-overload", 52, U8, false),
            ("dhcp-message-type", 53, U8, false),
            ("dhcp-server-identifier", 54, Ipv4, false),
            ("dhcp-parameter-request-list", 55, Binary, false),
            ("dhcp-message", 56, Str, false),
            ("dhcp-max-message-size", 57, U16, false),
            ("dhcp-renewal-time", 58, U32, false),
            ("dhcp-rebinding-time", 59, U32, false),
            ("vendor-class-identifier", 60, Str, false),
            ("dhcp-client-identifier", 61, Binary, false),
            ("nwip-domain-name", 62, Str, false),
            ("nisplus-domain-name", 64, Str, false),
            ("tftp-server-name", 66, Str, false),
            ("boot-file-name", 67, Str, false),
            ("dhcp-agent-options", 82, Binary, false),
            ("client-last-transaction-time", 91, U32, false),
            ("subnet-selection", 118, Ipv4, false),
            ("domain-search", 119, Binary, false),
            ("vivco-suboptions", 124, VendorClass, false),
            ("vivso-suboptions", 125, Vendor, false),
        );
        space
    };
    static ref VENDOR_SPACES: HashMap<u32, OptionSpace> = {
        let mut spaces = HashMap::new();
        // CableLabs is the one enterprise space the server ships defs for
        let mut cablelabs = OptionSpace::new("vendor-4491");
        std_defs!(
            cablelabs,
            ("oro", 1, Binary, false),
            ("tftp-servers", 2, Ipv4, true),
        );
        spaces.insert(4491, cablelabs);
        spaces
    };
}

lazy_static! {
    static ref RAW_SPACE: OptionSpace = OptionSpace::new("raw");
}

/// the built-in standard `dhcp4` option space
pub fn dhcp4_space() -> &'static OptionSpace {
    &DHCP4
}

/// an empty space; every option decoded against it stays raw
pub(crate) fn raw_space() -> &'static OptionSpace {
    &RAW_SPACE
}

/// the vendor space for an enterprise id, if one is registered
pub fn vendor_space(enterprise_id: u32) -> Option<&'static OptionSpace> {
    VENDOR_SPACES.get(&enterprise_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_cannot_encapsulate() {
        let err = OptionDefinition::build(
            "bad".into(),
            200,
            DataType::Binary,
            true,
            vec![],
            Some("sub".into()),
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::ArrayEncapsulated(_)));
    }

    #[test]
    fn record_needs_fields() {
        let err = OptionDefinition::record("empty", 201, vec![]).unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyRecord(_)));
    }

    #[test]
    fn std_space_lookups() {
        let space = dhcp4_space();
        assert_eq!(space.get(53).unwrap().name(), "dhcp-message-type");
        assert_eq!(space.find("routers").unwrap().code(), 3);
        // numeric and named resolution both work
        assert_eq!(space.resolve("60"), Some(60));
        assert_eq!(space.resolve("vendor-class-identifier"), Some(60));
        assert_eq!(space.resolve("no-such-option"), None);
    }

    #[test]
    fn record_value_round_trip() {
        let mut buf = vec![];
        let mut e = Encoder::new(&mut buf);
        Value::U16(0x0102).encode(&mut e, false).unwrap();
        Value::Ipv4([192, 0, 2, 1].into()).encode(&mut e, false).unwrap();
        Value::Binary(vec![9, 9]).encode(&mut e, true).unwrap();

        let mut d = Decoder::new(&buf);
        assert_eq!(
            Value::decode(DataType::U16, &mut d, false).unwrap(),
            Value::U16(0x0102)
        );
        assert_eq!(
            Value::decode(DataType::Ipv4, &mut d, false).unwrap(),
            Value::Ipv4([192, 0, 2, 1].into())
        );
        assert_eq!(
            Value::decode(DataType::Binary, &mut d, true).unwrap(),
            Value::Binary(vec![9, 9])
        );
    }
}
