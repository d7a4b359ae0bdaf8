//! Error types for encoding, decoding, and schema validation.

use thiserror::Error;

/// Coarse status taxonomy, as reported across the call boundary.
///
/// The success status has no variant here: a successful operation returns
/// `Ok`. Every [`Error`] maps onto exactly one of these via
/// [`Error::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Arena allocation failed; the current operation must be abandoned.
    AllocationFailed,
    /// A value does not fit its declared integer width.
    IntegerOverflow,
    /// A schema, value, or buffer violates the format's rules.
    InvalidArgument,
    /// The input ended before the declared structure was complete.
    TruncatedInput,
    /// The input is well-formed but cannot be reconciled or represented.
    UnsupportedOperation,
}

impl StatusCode {
    /// Returns the status name as reported at the boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::AllocationFailed => "allocation-failed",
            StatusCode::IntegerOverflow => "integer-overflow",
            StatusCode::InvalidArgument => "invalid-argument",
            StatusCode::TruncatedInput => "truncated-input",
            StatusCode::UnsupportedOperation => "unsupported-operation",
        }
    }
}

/// Error produced by any codec operation.
///
/// There is no partial success: an operation that returns an error leaves
/// no usable bytes or value behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // === Resource exhaustion ===
    #[error("arena allocation failed while allocating {context}")]
    ArenaExhausted { context: &'static str },

    // === Malformed input ===
    #[error("unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("invalid magic bytes: expected DIDL, found {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("{field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid presence tag {value:#04x} (expected 0x00 or 0x01)")]
    InvalidPresenceTag { value: u8 },

    #[error("invalid bool value {value:#04x} (expected 0x00 or 0x01)")]
    InvalidBool { value: u8 },

    #[error("variant index {index} out of bounds ({size} declared fields)")]
    VariantIndexOutOfBounds { index: u64, size: usize },

    #[error("type table entry {index} holds primitive opcode {opcode}")]
    PrimitiveInTable { index: usize, opcode: i64 },

    #[error("type reference {reference} out of bounds (table size {size})")]
    TableIndexOutOfBounds { reference: i64, size: usize },

    #[error("trailing bytes after final argument ({remaining} bytes unread)")]
    TrailingBytes { remaining: usize },

    #[error("{count} declared arguments left unconsumed")]
    UnconsumedArguments { count: usize },

    #[error("decoder previously failed and is terminal")]
    Poisoned,

    #[error("no arguments left to fetch")]
    NoArgumentsLeft,

    // === Numeric overflow ===
    #[error("varint exceeds maximum length (10 bytes)")]
    VarintTooLong,

    #[error("varint overflows {target}")]
    VarintOverflow { target: &'static str },

    #[error("value {value} does not fit declared width {width}")]
    NatOutOfRange { value: u64, width: &'static str },

    #[error("value {value} does not fit declared width {width}")]
    IntOutOfRange { value: i64, width: &'static str },

    // === Schema violations ===
    #[error("duplicate field hash {hash} in {container}")]
    DuplicateFieldHash { container: &'static str, hash: u32 },

    #[error("{container} fields are not sorted by label hash")]
    FieldsNotSorted { container: &'static str },

    #[error("unbound type variable {name:?}")]
    UnboundTypeVar { name: String },

    #[error("type variable {name:?} resolves through a cycle of variables")]
    TypeVarCycle { name: String },

    #[error("duplicate type name {name:?} in environment")]
    DuplicateTypeName { name: String },

    #[error("type mismatch: {expected} declared but {found} value supplied")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("record value is missing declared field with hash {hash}")]
    MissingField { hash: u32 },

    #[error("value field with hash {hash} is not declared in the type")]
    UndeclaredField { hash: u32 },

    #[error("duplicate method name {name:?} in service")]
    DuplicateMethod { name: String },

    #[error("service methods are not sorted by name")]
    MethodsNotSorted,

    #[error("method {name:?} does not resolve to a function type")]
    MethodNotFunction { name: String },

    // === Irreconcilable or unsupported ===
    #[error("unknown type opcode {opcode}")]
    UnknownOpcode { opcode: i64 },

    #[error("unknown function annotation {mode}")]
    UnknownFuncMode { mode: u8 },

    #[error("wire type {wire} is not compatible with expected type {expected}")]
    IncompatibleType {
        expected: &'static str,
        wire: &'static str,
    },

    #[error("expected field with hash {hash} is absent from the wire type")]
    FieldNotOnWire { hash: u32 },

    #[error("active variant field with hash {hash} is not declared in the expected variant")]
    UnexpectedVariantField { hash: u32 },

    #[error("values of type {kind} cannot cross the wire")]
    UnsupportedValue { kind: &'static str },

    #[error("nesting depth exceeds maximum {max}")]
    DepthLimitExceeded { max: usize },
}

impl Error {
    /// Returns the coarse status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::ArenaExhausted { .. } => StatusCode::AllocationFailed,

            Error::UnexpectedEof { .. } => StatusCode::TruncatedInput,

            Error::VarintTooLong
            | Error::VarintOverflow { .. }
            | Error::NatOutOfRange { .. }
            | Error::IntOutOfRange { .. } => StatusCode::IntegerOverflow,

            Error::UnknownOpcode { .. }
            | Error::UnknownFuncMode { .. }
            | Error::IncompatibleType { .. }
            | Error::FieldNotOnWire { .. }
            | Error::UnexpectedVariantField { .. }
            | Error::UnsupportedValue { .. }
            | Error::DepthLimitExceeded { .. } => StatusCode::UnsupportedOperation,

            Error::InvalidMagic { .. }
            | Error::InvalidUtf8 { .. }
            | Error::LengthExceedsLimit { .. }
            | Error::InvalidPresenceTag { .. }
            | Error::InvalidBool { .. }
            | Error::VariantIndexOutOfBounds { .. }
            | Error::PrimitiveInTable { .. }
            | Error::TableIndexOutOfBounds { .. }
            | Error::TrailingBytes { .. }
            | Error::UnconsumedArguments { .. }
            | Error::Poisoned
            | Error::NoArgumentsLeft
            | Error::DuplicateFieldHash { .. }
            | Error::FieldsNotSorted { .. }
            | Error::UnboundTypeVar { .. }
            | Error::TypeVarCycle { .. }
            | Error::DuplicateTypeName { .. }
            | Error::TypeMismatch { .. }
            | Error::MissingField { .. }
            | Error::UndeclaredField { .. }
            | Error::DuplicateMethod { .. }
            | Error::MethodsNotSorted
            | Error::MethodNotFunction { .. } => StatusCode::InvalidArgument,
        }
    }
}
