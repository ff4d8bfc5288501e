//! # client-classification
//!
//! Boolean predicates over a DHCPv4 packet. Each class expression is
//! parsed once at configuration time into an [`Expr`] tree; evaluation
//! is a short-circuiting walk, so matching a packet against a class is
//! O(depth).
use thiserror::Error;

pub mod ast;

/// a resolved `option[..]` operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionRef(pub u8);

/// the third argument of `substring(...)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstringLen {
    /// take bytes to the end of the value
    All,
    /// take this many bytes
    Len(usize),
}

/// a comparison literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// single-quoted string, compared as its bytes
    Str(String),
    /// `0x` literal, compared as decoded bytes
    Hex(Vec<u8>),
}

impl Literal {
    /// the bytes this literal compares against
    pub fn bytes(&self) -> &[u8] {
        match self {
            Literal::Str(s) => s.as_bytes(),
            Literal::Hex(b) => b,
        }
    }
}

/// a compiled class predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// `option[N].exists`
    Exists(OptionRef),
    /// `option[N] == literal` / `option[N] != literal`
    Compare {
        /// option operand
        opt: OptionRef,
        /// true for `!=`
        negated: bool,
        /// right-hand side
        literal: Literal,
    },
    /// `substring(option[N], start, all|len) == literal`
    Substring {
        /// option operand
        opt: OptionRef,
        /// first byte of the slice
        start: usize,
        /// slice length
        len: SubstringLen,
        /// right-hand side
        literal: Literal,
    },
    /// both sides true; `and` binds tighter than `or`
    And(Box<Expr>, Box<Expr>),
    /// either side true
    Or(Box<Expr>, Box<Expr>),
}

/// result of parsing a class expression
pub type ParseResult<T> = Result<T, ParseErr>;

/// parse-time failures; these surface as configuration errors
#[derive(Error, Debug)]
pub enum ParseErr {
    /// a start/length argument was not an integer
    #[error("int parse error")]
    Int(#[from] std::num::ParseIntError),
    /// a `0x` literal held non-hex digits
    #[error("hex literal error")]
    Hex(#[from] hex::FromHexError),
    /// `option[name]` named an option missing from the space
    #[error("unknown option name: {0}")]
    UnknownOption(String),
    /// grammar rule reached that the builder does not handle
    #[error("undefined rule: {0:?}")]
    Undefined(ast::Rule),
    /// the expression failed to lex/parse
    #[error("parse error: {0}")]
    Pest(#[from] Box<pest::error::Error<ast::Rule>>),
}
