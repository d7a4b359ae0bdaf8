//! DIDL: a binary interface-description-language codec.
//!
//! This crate encodes typed, structured values into a compact
//! self-describing binary format and decodes that format back into typed
//! values, verifying the payload against an inferred or caller-supplied
//! schema. It is the marshalling layer for call boundaries where caller
//! and callee share neither memory nor a type system.
//!
//! # Overview
//!
//! - **Arena-owned nodes**: every type and value node of one
//!   encode/decode session lives in one [`Arena`] and is dropped with it.
//! - **Hash-canonical fields**: record/variant fields are identified on
//!   the wire by a 32-bit name hash and always laid out in ascending hash
//!   order, so independently-built schemas agree byte-for-byte.
//! - **Recursive schemas**: self-referential types are expressed with
//!   named back-references ([`Type::Var`]) resolved against an explicit
//!   [`TypeEnv`] and the message's type table, never by expansion.
//!
//! # Quick Start
//!
//! ```rust
//! use didl::{Arena, Builder, Deserializer, Label, Type, Value};
//!
//! let arena = Arena::new();
//!
//! // Schema: record { city : text; zip : nat }
//! let address = Type::record(&arena, &[
//!     (Label::Named("city"), &Type::Text),
//!     (Label::Named("zip"), &Type::Nat),
//! ]).unwrap();
//!
//! // Fields may be supplied in any order; encoding canonicalizes them.
//! let city = Value::text(&arena, "SF").unwrap();
//! let value = Value::record(&arena, &[
//!     (Label::Named("zip"), &Value::Nat(94102)),
//!     (Label::Named("city"), city),
//! ]).unwrap();
//!
//! let bytes = Builder::new(&arena).arg(address, value).serialize().unwrap();
//!
//! // The receiving side decodes into its own arena.
//! let arena2 = Arena::new();
//! let mut de = Deserializer::from_bytes(&bytes, &arena2).unwrap();
//! let decoded = de.fetch(address).unwrap();
//! assert_eq!(decoded, value);
//! de.finish().unwrap();
//! ```
//!
//! # Modules
//!
//! - [`model`]: core data types (Label, Type, Value, TypeEnv)
//! - [`codec`]: binary encoding/decoding (Builder, Deserializer)
//! - [`arena`]: the bump-allocated session arena
//! - [`validate`]: schema well-formedness checks
//! - [`error`]: error types and the status taxonomy
//! - [`limits`]: security limits for decoding
//!
//! # Security
//!
//! The decoder is designed to safely handle untrusted input:
//! - all allocations and loops are bounded by the limits in [`limits`]
//! - varints are length- and range-checked to prevent overflow
//! - truncated or malformed data is rejected with a descriptive error,
//!   and a failed deserializer refuses further use
//!
//! # Wire Format
//!
//! A message is the 4-byte magic `DIDL`, a de-duplicated type table
//! (composite types only, LEB128/SLEB128-encoded), the argument type
//! references, and the argument values in declared order. Field identity
//! on the wire is exclusively the 32-bit label hash.

pub mod arena;
pub mod codec;
pub mod error;
pub mod limits;
pub mod model;
pub mod validate;

// Re-export commonly used types at crate root
pub use arena::Arena;
pub use codec::{encode_args, Builder, Deserializer};
pub use error::{Error, StatusCode};
pub use model::{
    label_hash, Field, FieldValue, FuncMode, FuncSig, Label, Method, Type, TypeEnv, Value,
    VariantValue,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
