//! Concrete values mirroring the schema types.
//!
//! Like types, values are arena-allocated and immutable once built. Record
//! values are canonicalized (sorted by label hash) at construction so that
//! any permutation of supplied fields encodes to identical bytes.

use crate::arena::Arena;
use crate::error::Error;
use crate::model::label::{
    check_canonical_field_values, sort_field_values_by_hash, Field, FieldValue, Label,
};
use crate::model::types::Type;

static NULL_TYPE: Type<'static> = Type::Null;
static NAT8_TYPE: Type<'static> = Type::Nat8;
static OPT_NULL_TYPE: Type<'static> = Type::Opt(&NULL_TYPE);
static VEC_NULL_TYPE: Type<'static> = Type::Vec(&NULL_TYPE);
static VEC_NAT8_TYPE: Type<'static> = Type::Vec(&NAT8_TYPE);

/// A concrete value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Null,
    /// Value of the `reserved` type; carries nothing.
    Reserved,
    Bool(bool),
    Nat(u64),
    Nat8(u8),
    Nat16(u16),
    Nat32(u32),
    Nat64(u64),
    Int(i64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(&'a str),
    /// Byte span; semantically a vector of nat8.
    Blob(&'a [u8]),
    /// Opaque identity byte-string.
    Principal(&'a [u8]),
    Opt(Option<&'a Value<'a>>),
    Vec(&'a [Value<'a>]),
    /// Canonically sorted labeled values.
    Record(&'a [FieldValue<'a>]),
    Variant(&'a VariantValue<'a>),
}

/// The active field of a variant value plus its position among the
/// variant's declared (canonically sorted) fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantValue<'a> {
    pub index: u64,
    pub field: FieldValue<'a>,
}

impl<'a> Value<'a> {
    /// Returns a short name for this value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Reserved => "reserved",
            Value::Bool(_) => "bool",
            Value::Nat(_) => "nat",
            Value::Nat8(_) => "nat8",
            Value::Nat16(_) => "nat16",
            Value::Nat32(_) => "nat32",
            Value::Nat64(_) => "nat64",
            Value::Int(_) => "int",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Principal(_) => "principal",
            Value::Opt(_) => "opt",
            Value::Vec(_) => "vec",
            Value::Record(_) => "record",
            Value::Variant(_) => "variant",
        }
    }

    /// Allocates a text value.
    pub fn text(arena: &'a Arena, s: &str) -> Result<&'a Value<'a>, Error> {
        let s = arena.try_alloc_str(s, "text value")?;
        Ok(arena.try_alloc(Value::Text(s), "text node")?)
    }

    /// Allocates a blob value.
    pub fn blob(arena: &'a Arena, bytes: &[u8]) -> Result<&'a Value<'a>, Error> {
        let bytes = arena.try_alloc_slice(bytes, "blob value")?;
        Ok(arena.try_alloc(Value::Blob(bytes), "blob node")?)
    }

    /// Allocates a principal value.
    pub fn principal(arena: &'a Arena, bytes: &[u8]) -> Result<&'a Value<'a>, Error> {
        let bytes = arena.try_alloc_slice(bytes, "principal value")?;
        Ok(arena.try_alloc(Value::Principal(bytes), "principal node")?)
    }

    /// Allocates an optional value.
    pub fn opt(arena: &'a Arena, inner: Option<&'a Value<'a>>) -> Result<&'a Value<'a>, Error> {
        Ok(arena.try_alloc(Value::Opt(inner), "opt node")?)
    }

    /// Allocates a vector value.
    pub fn vec(arena: &'a Arena, items: &[Value<'a>]) -> Result<&'a Value<'a>, Error> {
        let items = arena.try_alloc_slice(items, "vec items")?;
        Ok(arena.try_alloc(Value::Vec(items), "vec node")?)
    }

    /// Allocates a record value with fields canonicalized by label hash.
    pub fn record(
        arena: &'a Arena,
        fields: &[(Label<'a>, &'a Value<'a>)],
    ) -> Result<&'a Value<'a>, Error> {
        let mut fs: Vec<FieldValue<'a>> = fields
            .iter()
            .map(|&(label, value)| FieldValue { label, value })
            .collect();
        sort_field_values_by_hash(&mut fs);
        check_canonical_field_values(&fs, "record value")?;
        let fs = arena.try_alloc_slice(&fs, "record value fields")?;
        Ok(arena.try_alloc(Value::Record(fs), "record node")?)
    }

    /// Allocates a variant value for the given variant type, locating the
    /// active field's position by label hash.
    pub fn variant(
        arena: &'a Arena,
        ty: &'a Type<'a>,
        label: Label<'a>,
        value: &'a Value<'a>,
    ) -> Result<&'a Value<'a>, Error> {
        let fields = match ty {
            Type::Variant(fields) => *fields,
            other => {
                return Err(Error::TypeMismatch {
                    expected: "variant",
                    found: other.kind_name(),
                });
            }
        };
        let hash = label.hash();
        let index = fields
            .binary_search_by(|f| f.label.hash().cmp(&hash))
            .map_err(|_| Error::UndeclaredField { hash })?;
        let vv = VariantValue {
            index: index as u64,
            field: FieldValue { label, value },
        };
        let vv = arena.try_alloc(vv, "variant value")?;
        Ok(arena.try_alloc(Value::Variant(vv), "variant node")?)
    }

    /// Infers a schema type from this value.
    ///
    /// Empty vectors and absent optionals carry no evidence of their inner
    /// type, which defaults to `null`. That is an approximation: callers
    /// that need precise schemas for such values must supply an explicit
    /// type instead of relying on inference.
    pub fn infer_type(&self, arena: &'a Arena) -> Result<&'a Type<'a>, Error> {
        Ok(match *self {
            Value::Null => &NULL_TYPE,
            Value::Reserved => &Type::Reserved,
            Value::Bool(_) => &Type::Bool,
            Value::Nat(_) => &Type::Nat,
            Value::Nat8(_) => &NAT8_TYPE,
            Value::Nat16(_) => &Type::Nat16,
            Value::Nat32(_) => &Type::Nat32,
            Value::Nat64(_) => &Type::Nat64,
            Value::Int(_) => &Type::Int,
            Value::Int8(_) => &Type::Int8,
            Value::Int16(_) => &Type::Int16,
            Value::Int32(_) => &Type::Int32,
            Value::Int64(_) => &Type::Int64,
            Value::Float32(_) => &Type::Float32,
            Value::Float64(_) => &Type::Float64,
            Value::Text(_) => &Type::Text,
            Value::Blob(_) => &VEC_NAT8_TYPE,
            Value::Principal(_) => &Type::Principal,
            Value::Opt(None) => &OPT_NULL_TYPE,
            Value::Opt(Some(inner)) => {
                let inner = inner.infer_type(arena)?;
                arena.try_alloc(Type::Opt(inner), "inferred opt")?
            }
            Value::Vec(items) => match items.first() {
                None => &VEC_NULL_TYPE,
                Some(first) => {
                    let inner = first.infer_type(arena)?;
                    arena.try_alloc(Type::Vec(inner), "inferred vec")?
                }
            },
            Value::Record(fields) => {
                let mut fs = Vec::with_capacity(fields.len());
                for fv in fields {
                    fs.push(Field {
                        label: fv.label,
                        ty: fv.value.infer_type(arena)?,
                    });
                }
                let fs = arena.try_alloc_slice(&fs, "inferred record fields")?;
                arena.try_alloc(Type::Record(fs), "inferred record")?
            }
            Value::Variant(vv) => {
                let field = Field {
                    label: vv.field.label,
                    ty: vv.field.value.infer_type(arena)?,
                };
                let fs = arena.try_alloc_slice(&[field], "inferred variant field")?;
                arena.try_alloc(Type::Variant(fs), "inferred variant")?
            }
        })
    }
}
