//! Binary encoding and decoding.
//!
//! - [`primitives`]: Reader/Writer with varints and fixed-width scalars
//! - [`types`]: type-table construction and parsing
//! - [`value`]: per-kind value encoding and typed reconciliation
//! - [`message`]: the Builder/Deserializer message pair

pub mod message;
pub mod primitives;
pub(crate) mod types;
pub(crate) mod value;

pub use message::{encode_args, Builder, Deserializer};
