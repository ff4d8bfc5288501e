//! # proto
//!
//! DHCPv4 wire codec: fixed-header message, tag-length-value options
//! (including vendor and definition-driven custom options), and the
//! byte-level `Decoder`/`Encoder` the rest of the server builds on.
//!
//! Failures never panic across the codec boundary; everything surfaces
//! as [`DecodeError`] or [`EncodeError`].
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod v4;

pub use error::{DecodeError, DecodeResult, EncodeError, EncodeResult};

use std::net::Ipv4Addr;

/// A type which can be decoded from a byte buffer
pub trait Decodable: Sized {
    /// read the type from the decoder
    fn decode(decoder: &mut Decoder<'_>) -> DecodeResult<Self>;

    /// decode from a byte slice
    fn from_bytes(bytes: &[u8]) -> DecodeResult<Self> {
        Self::decode(&mut Decoder::new(bytes))
    }
}

/// A type which can be encoded to a byte buffer
pub trait Encodable {
    /// write the type to the encoder
    fn encode(&self, e: &mut Encoder<'_>) -> EncodeResult<()>;

    /// encode into a fresh buffer
    fn to_vec(&self) -> EncodeResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(512);
        self.encode(&mut Encoder::new(&mut buf))?;
        Ok(buf)
    }
}

/// Reads numbers & slices out of a borrowed byte buffer, tracking position
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// make a new decoder over a borrowed buffer
    pub fn new(buffer: &'a [u8]) -> Self {
        Decoder { buffer }
    }

    /// the unread portion of the buffer
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// true if every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// look at the next byte without consuming it
    pub fn peek_u8(&self) -> Option<u8> {
        self.buffer.first().copied()
    }

    /// read `len` bytes, advancing the decoder
    pub fn read_slice(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        if self.buffer.len() < len {
            return Err(DecodeError::Truncated { needed: len });
        }
        let (head, rest) = self.buffer.split_at(len);
        self.buffer = rest;
        Ok(head)
    }

    /// read a single byte
    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.read_slice(1)?[0])
    }

    /// read a big-endian u16
    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        let s = self.read_slice(2)?;
        Ok(u16::from_be_bytes([s[0], s[1]]))
    }

    /// read a big-endian u32
    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        let s = self.read_slice(4)?;
        Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }

    /// read 4 bytes as an IPv4 address
    pub fn read_ipv4(&mut self) -> DecodeResult<Ipv4Addr> {
        let s = self.read_slice(4)?;
        Ok(Ipv4Addr::new(s[0], s[1], s[2], s[3]))
    }

    /// read a fixed-size NUL-padded text field (sname/file)
    pub fn read_cstring(&mut self, len: usize) -> DecodeResult<Option<String>> {
        let bytes = self.read_slice(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
        if end == 0 {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&bytes[..end]).into_owned(),
        ))
    }
}

/// Writes numbers & slices into a growable byte buffer
#[derive(Debug)]
pub struct Encoder<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    /// make a new encoder over a target buffer
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Encoder { buffer }
    }

    /// bytes written so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// true if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// append a byte slice
    pub fn write_slice(&mut self, bytes: &[u8]) -> EncodeResult<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// append a single byte
    pub fn write_u8(&mut self, n: u8) -> EncodeResult<()> {
        self.write_slice(&[n])
    }

    /// append a big-endian u16
    pub fn write_u16(&mut self, n: u16) -> EncodeResult<()> {
        self.write_slice(&n.to_be_bytes())
    }

    /// append a big-endian u32
    pub fn write_u32(&mut self, n: u32) -> EncodeResult<()> {
        self.write_slice(&n.to_be_bytes())
    }

    /// append `count` copies of `byte`
    pub fn write_fill(&mut self, count: usize, byte: u8) -> EncodeResult<()> {
        self.buffer.extend(std::iter::repeat(byte).take(count));
        Ok(())
    }

    /// write a text field NUL-padded to `len`; fails if the text is longer
    pub fn write_cstring(&mut self, text: Option<&str>, len: usize) -> EncodeResult<()> {
        let bytes = text.map(str::as_bytes).unwrap_or_default();
        if bytes.len() > len {
            return Err(EncodeError::OutOfRange {
                what: "fixed text field",
            });
        }
        self.write_slice(bytes)?;
        self.write_fill(len - bytes.len(), 0)
    }
}
