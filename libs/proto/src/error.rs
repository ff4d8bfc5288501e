//! codec error types
use thiserror::Error;

/// result of decoding
pub type DecodeResult<T> = Result<T, DecodeError>;
/// result of encoding
pub type EncodeResult<T> = Result<T, EncodeError>;

/// errors returned while reading from the wire
#[derive(Error, Debug)]
pub enum DecodeError {
    /// ran off the end of the buffer
    #[error("buffer exhausted reading {needed} more bytes")]
    Truncated {
        /// bytes the read needed
        needed: usize,
    },
    /// the four-byte DHCP magic was wrong
    #[error("bad magic cookie {got:02x?}")]
    BadMagic {
        /// the bytes found where the cookie belongs
        got: [u8; 4],
    },
    /// an option payload length disagrees with its registered type
    #[error("option {code} length {len} does not fit its type")]
    LengthMismatch {
        /// option tag
        code: u8,
        /// payload length on the wire
        len: usize,
    },
    /// an option definition names a type the decoder has no parser for
    #[error("definition {name:?} carries an unknown data type")]
    UnknownTypeForDefinition {
        /// definition name
        name: String,
    },
}

/// errors returned while writing to the wire
#[derive(Error, Debug)]
pub enum EncodeError {
    /// a field or payload exceeds its wire representation
    #[error("{what} exceeds its wire range")]
    OutOfRange {
        /// which field overflowed
        what: &'static str,
    },
}
