//! relay agent information (option 82) sub-options
//!
//! Only the sub-options the server acts on get typed variants; the
//! rest are carried opaquely so the whole container can be echoed
//! back to the relay untouched.
use std::net::Ipv4Addr;

use crate::{DecodeResult, Decoder, EncodeResult, Encoder};

/// sub-option tags within option 82
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RelayCode {
    /// 1 agent circuit id
    AgentCircuitId,
    /// 2 agent remote id
    AgentRemoteId,
    /// 5 link selection
    LinkSelection,
    /// anything else
    Unknown(u8),
}

impl From<u8> for RelayCode {
    fn from(n: u8) -> Self {
        match n {
            1 => RelayCode::AgentCircuitId,
            2 => RelayCode::AgentRemoteId,
            5 => RelayCode::LinkSelection,
            n => RelayCode::Unknown(n),
        }
    }
}

impl From<RelayCode> for u8 {
    fn from(code: RelayCode) -> Self {
        match code {
            RelayCode::AgentCircuitId => 1,
            RelayCode::AgentRemoteId => 2,
            RelayCode::LinkSelection => 5,
            RelayCode::Unknown(n) => n,
        }
    }
}

/// one decoded sub-option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayInfo {
    /// sub-opt 1
    CircuitId(Vec<u8>),
    /// sub-opt 2
    RemoteId(Vec<u8>),
    /// sub-opt 5
    LinkSelection(Ipv4Addr),
    /// opaque sub-option
    Unknown(u8, Vec<u8>),
}

impl RelayInfo {
    fn code(&self) -> RelayCode {
        match self {
            RelayInfo::CircuitId(_) => RelayCode::AgentCircuitId,
            RelayInfo::RemoteId(_) => RelayCode::AgentRemoteId,
            RelayInfo::LinkSelection(_) => RelayCode::LinkSelection,
            RelayInfo::Unknown(code, _) => RelayCode::Unknown(*code),
        }
    }
}

/// The decoded contents of option 82
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayAgentInformation(Vec<RelayInfo>);

impl RelayAgentInformation {
    /// parse the payload of option 82
    pub fn decode(payload: &[u8]) -> DecodeResult<Self> {
        let mut d = Decoder::new(payload);
        let mut infos = vec![];
        while !d.is_empty() {
            let code = d.read_u8()?;
            let len = d.read_u8()? as usize;
            let data = d.read_slice(len)?;
            infos.push(match RelayCode::from(code) {
                RelayCode::AgentCircuitId => RelayInfo::CircuitId(data.to_vec()),
                RelayCode::AgentRemoteId => RelayInfo::RemoteId(data.to_vec()),
                RelayCode::LinkSelection if data.len() == 4 => RelayInfo::LinkSelection(
                    Ipv4Addr::new(data[0], data[1], data[2], data[3]),
                ),
                RelayCode::LinkSelection => RelayInfo::Unknown(code, data.to_vec()),
                RelayCode::Unknown(code) => RelayInfo::Unknown(code, data.to_vec()),
            });
        }
        Ok(Self(infos))
    }

    /// write back into option-82 payload form
    pub fn encode(&self, e: &mut Encoder<'_>) -> EncodeResult<()> {
        for info in &self.0 {
            e.write_u8(info.code().into())?;
            match info {
                RelayInfo::CircuitId(data)
                | RelayInfo::RemoteId(data)
                | RelayInfo::Unknown(_, data) => {
                    e.write_u8(data.len() as u8)?;
                    e.write_slice(data)?;
                }
                RelayInfo::LinkSelection(ip) => {
                    e.write_u8(4)?;
                    e.write_slice(&ip.octets())?;
                }
            }
        }
        Ok(())
    }

    /// first sub-option with this tag
    pub fn get(&self, code: RelayCode) -> Option<&RelayInfo> {
        self.0.iter().find(|info| info.code() == code)
    }

    /// append a sub-option
    pub fn insert(&mut self, info: RelayInfo) {
        self.0.push(info);
    }

    /// iterate sub-options in wire order
    pub fn iter(&self) -> std::slice::Iter<'_, RelayInfo> {
        self.0.iter()
    }
}
