//! Core data model: labels, schema types, and values.

pub mod label;
pub mod types;
pub mod value;

pub use label::{label_hash, Field, FieldValue, Label};
pub use types::{FuncMode, FuncSig, Method, Type, TypeEnv};
pub use value::{Value, VariantValue};
