//! Value encoding/decoding.
//!
//! Encoding walks a value under the shape its declared type dictates.
//! Decoding walks the wire type, optionally in lockstep with a
//! caller-expected type; reconciliation (integer widening, record
//! supersets, variant remapping) happens during that walk, so recursive
//! types never need a standalone structural comparison.

use crate::arena::Arena;
use crate::codec::primitives::{Reader, Writer};
use crate::error::Error;
use crate::limits::{
    MAX_BLOB_LEN, MAX_PRINCIPAL_LEN, MAX_TEXT_LEN, MAX_VALUE_DEPTH, MAX_VEC_ITEMS,
};
use crate::model::label::{check_canonical_field_values, Field, FieldValue};
use crate::model::types::{Type, TypeEnv};
use crate::model::value::{Value, VariantValue};

static OPT_NONE: Value<'static> = Value::Opt(None);
static RESERVED_VALUE: Value<'static> = Value::Reserved;

// =============================================================================
// ENCODING
// =============================================================================

/// Encodes one value under its declared type.
pub(crate) fn encode_value<'a>(
    w: &mut Writer,
    env: &TypeEnv<'a>,
    ty: &'a Type<'a>,
    value: &'a Value<'a>,
    depth: usize,
) -> Result<(), Error> {
    if depth > MAX_VALUE_DEPTH {
        return Err(Error::DepthLimitExceeded {
            max: MAX_VALUE_DEPTH,
        });
    }
    let ty = env.resolve(ty)?;
    match (*ty, *value) {
        (Type::Null, Value::Null) => {}
        // Reserved accepts any value and writes nothing.
        (Type::Reserved, _) => {}
        (Type::Empty, _) => return Err(Error::UnsupportedValue { kind: "empty" }),

        (Type::Bool, Value::Bool(b)) => w.write_byte(u8::from(b)),

        (Type::Nat, Value::Nat(n)) => w.write_leb128(n),
        (Type::Nat8, Value::Nat8(n)) => w.write_leb128(u64::from(n)),
        (Type::Nat16, Value::Nat16(n)) => w.write_leb128(u64::from(n)),
        (Type::Nat32, Value::Nat32(n)) => w.write_leb128(u64::from(n)),
        (Type::Nat64, Value::Nat64(n)) => w.write_leb128(n),
        // The unbounded value form is accepted at any declared width,
        // range-checked against it.
        (Type::Nat8, Value::Nat(n)) => w.write_leb128(check_nat(n, u8::MAX.into(), "nat8")?),
        (Type::Nat16, Value::Nat(n)) => w.write_leb128(check_nat(n, u16::MAX.into(), "nat16")?),
        (Type::Nat32, Value::Nat(n)) => w.write_leb128(check_nat(n, u32::MAX.into(), "nat32")?),
        (Type::Nat64, Value::Nat(n)) => w.write_leb128(n),

        (Type::Int, Value::Int(i)) => w.write_sleb128(i),
        (Type::Int8, Value::Int8(i)) => w.write_sleb128(i64::from(i)),
        (Type::Int16, Value::Int16(i)) => w.write_sleb128(i64::from(i)),
        (Type::Int32, Value::Int32(i)) => w.write_sleb128(i64::from(i)),
        (Type::Int64, Value::Int64(i)) => w.write_sleb128(i),
        (Type::Int8, Value::Int(i)) => {
            w.write_sleb128(check_int(i, i8::MIN.into(), i8::MAX.into(), "int8")?)
        }
        (Type::Int16, Value::Int(i)) => {
            w.write_sleb128(check_int(i, i16::MIN.into(), i16::MAX.into(), "int16")?)
        }
        (Type::Int32, Value::Int(i)) => {
            w.write_sleb128(check_int(i, i32::MIN.into(), i32::MAX.into(), "int32")?)
        }
        (Type::Int64, Value::Int(i)) => w.write_sleb128(i),

        (Type::Float32, Value::Float32(f)) => w.write_f32(f),
        (Type::Float64, Value::Float64(f)) => w.write_f64(f),

        (Type::Text, Value::Text(s)) => {
            if s.len() > MAX_TEXT_LEN {
                return Err(Error::LengthExceedsLimit {
                    field: "text",
                    len: s.len(),
                    max: MAX_TEXT_LEN,
                });
            }
            w.write_text(s);
        }
        (Type::Principal, Value::Principal(p)) => {
            if p.len() > MAX_PRINCIPAL_LEN {
                return Err(Error::LengthExceedsLimit {
                    field: "principal",
                    len: p.len(),
                    max: MAX_PRINCIPAL_LEN,
                });
            }
            w.write_bytes_prefixed(p);
        }

        (Type::Opt(_), Value::Opt(None)) => w.write_byte(0x00),
        (Type::Opt(inner), Value::Opt(Some(v))) => {
            w.write_byte(0x01);
            encode_value(w, env, inner, v, depth + 1)?;
        }

        (Type::Vec(inner), Value::Blob(bytes)) => {
            if !matches!(env.resolve(inner)?, Type::Nat8) {
                return Err(Error::TypeMismatch {
                    expected: "vec nat8",
                    found: "blob",
                });
            }
            if bytes.len() > MAX_BLOB_LEN {
                return Err(Error::LengthExceedsLimit {
                    field: "blob",
                    len: bytes.len(),
                    max: MAX_BLOB_LEN,
                });
            }
            w.write_bytes_prefixed(bytes);
        }
        (Type::Vec(inner), Value::Vec(items)) => {
            if items.len() > MAX_VEC_ITEMS {
                return Err(Error::LengthExceedsLimit {
                    field: "vec",
                    len: items.len(),
                    max: MAX_VEC_ITEMS,
                });
            }
            w.write_leb128(items.len() as u64);
            for item in items {
                encode_value(w, env, inner, item, depth + 1)?;
            }
        }

        (Type::Record(tfs), Value::Record(vfs)) => {
            check_canonical_field_values(vfs, "record value")?;
            let mut vi = 0usize;
            for tf in tfs {
                let th = tf.label.hash();
                if vi < vfs.len() && vfs[vi].label.hash() < th {
                    return Err(Error::UndeclaredField {
                        hash: vfs[vi].label.hash(),
                    });
                }
                if vi >= vfs.len() || vfs[vi].label.hash() > th {
                    return Err(Error::MissingField { hash: th });
                }
                encode_value(w, env, tf.ty, vfs[vi].value, depth + 1)?;
                vi += 1;
            }
            if vi < vfs.len() {
                return Err(Error::UndeclaredField {
                    hash: vfs[vi].label.hash(),
                });
            }
        }

        (Type::Variant(tfs), Value::Variant(vv)) => {
            let hash = vv.field.label.hash();
            let index = tfs
                .binary_search_by(|f| f.label.hash().cmp(&hash))
                .map_err(|_| Error::UndeclaredField { hash })?;
            w.write_leb128(index as u64);
            encode_value(w, env, tfs[index].ty, vv.field.value, depth + 1)?;
        }

        // Function and service signatures exist only inside type
        // structure; their values never cross the wire.
        (Type::Func(_), _) => return Err(Error::UnsupportedValue { kind: "func" }),
        (Type::Service(_), _) => return Err(Error::UnsupportedValue { kind: "service" }),

        (t, v) => {
            return Err(Error::TypeMismatch {
                expected: t.kind_name(),
                found: v.kind_name(),
            });
        }
    }
    Ok(())
}

fn check_nat(value: u64, max: u64, width: &'static str) -> Result<u64, Error> {
    if value > max {
        return Err(Error::NatOutOfRange { value, width });
    }
    Ok(value)
}

fn check_int(value: i64, min: i64, max: i64, width: &'static str) -> Result<i64, Error> {
    if value < min || value > max {
        return Err(Error::IntOutOfRange { value, width });
    }
    Ok(value)
}

// =============================================================================
// DECODING
// =============================================================================

/// Shared context for decoding values: the session arena, the wire type
/// environment (synthesized from the type table), and the caller's
/// environment for expected types.
pub(crate) struct ValueDecoder<'a, 'e> {
    pub arena: &'a Arena,
    pub wire_env: &'e TypeEnv<'a>,
    pub expect_env: Option<&'e TypeEnv<'a>>,
}

impl<'a> ValueDecoder<'a, '_> {
    /// Decodes one value of the given wire type, reconciled against
    /// `expected` when one is supplied.
    pub fn decode(
        &self,
        r: &mut Reader<'a>,
        wire: &'a Type<'a>,
        expected: Option<&'a Type<'a>>,
        depth: usize,
    ) -> Result<Value<'a>, Error> {
        if depth > MAX_VALUE_DEPTH {
            return Err(Error::DepthLimitExceeded {
                max: MAX_VALUE_DEPTH,
            });
        }
        let wire = self.wire_env.resolve(wire)?;
        match expected {
            None => self.decode_untyped(r, wire, depth),
            Some(e) => {
                let e = self.resolve_expected(e)?;
                self.decode_typed(r, wire, e, depth)
            }
        }
    }

    fn resolve_expected(&self, ty: &'a Type<'a>) -> Result<&'a Type<'a>, Error> {
        match self.expect_env {
            Some(env) => env.resolve(ty),
            None => match *ty {
                Type::Var(name) => Err(Error::UnboundTypeVar {
                    name: name.to_string(),
                }),
                _ => Ok(ty),
            },
        }
    }

    fn alloc(&self, v: Value<'a>) -> Result<&'a Value<'a>, Error> {
        Ok(self.arena.try_alloc(v, "value node")?)
    }

    /// Value-only fast path: decode by the wire type alone.
    fn decode_untyped(
        &self,
        r: &mut Reader<'a>,
        wire: &'a Type<'a>,
        depth: usize,
    ) -> Result<Value<'a>, Error> {
        match *wire {
            Type::Null => Ok(Value::Null),
            Type::Reserved => Ok(Value::Reserved),
            Type::Empty => Err(Error::UnsupportedValue { kind: "empty" }),
            Type::Bool => Ok(Value::Bool(read_bool(r)?)),

            Type::Nat => Ok(Value::Nat(r.read_leb128("nat")?)),
            Type::Nat8 => Ok(Value::Nat8(read_wire_nat(r, Some(8))? as u8)),
            Type::Nat16 => Ok(Value::Nat16(read_wire_nat(r, Some(16))? as u16)),
            Type::Nat32 => Ok(Value::Nat32(read_wire_nat(r, Some(32))? as u32)),
            Type::Nat64 => Ok(Value::Nat64(r.read_leb128("nat64")?)),
            Type::Int => Ok(Value::Int(r.read_sleb128("int")?)),
            Type::Int8 => Ok(Value::Int8(read_wire_int(r, Some(8))? as i8)),
            Type::Int16 => Ok(Value::Int16(read_wire_int(r, Some(16))? as i16)),
            Type::Int32 => Ok(Value::Int32(read_wire_int(r, Some(32))? as i32)),
            Type::Int64 => Ok(Value::Int64(r.read_sleb128("int64")?)),

            Type::Float32 => Ok(Value::Float32(r.read_f32("float32")?)),
            Type::Float64 => Ok(Value::Float64(r.read_f64("float64")?)),
            Type::Text => Ok(Value::Text(r.read_text(MAX_TEXT_LEN, "text")?)),
            Type::Principal => Ok(Value::Principal(
                r.read_bytes_prefixed(MAX_PRINCIPAL_LEN, "principal")?,
            )),

            Type::Opt(inner) => match r.read_byte("opt tag")? {
                0x00 => Ok(Value::Opt(None)),
                0x01 => {
                    let v = self.decode(r, inner, None, depth + 1)?;
                    Ok(Value::Opt(Some(self.alloc(v)?)))
                }
                value => Err(Error::InvalidPresenceTag { value }),
            },

            Type::Vec(inner) => {
                if matches!(self.wire_env.resolve(inner)?, Type::Nat8) {
                    return Ok(Value::Blob(r.read_bytes_prefixed(MAX_BLOB_LEN, "blob")?));
                }
                let count = read_vec_count(r)?;
                let mut items = Vec::with_capacity(count.min(r.remaining_len() + 1));
                for _ in 0..count {
                    items.push(self.decode(r, inner, None, depth + 1)?);
                }
                Ok(Value::Vec(self.arena.try_alloc_slice(&items, "vec items")?))
            }

            Type::Record(fields) => {
                let mut out = Vec::with_capacity(fields.len().min(r.remaining_len() + 1));
                for f in fields {
                    let v = self.decode(r, f.ty, None, depth + 1)?;
                    out.push(FieldValue {
                        label: f.label,
                        value: self.alloc(v)?,
                    });
                }
                Ok(Value::Record(
                    self.arena.try_alloc_slice(&out, "record fields")?,
                ))
            }

            Type::Variant(fields) => {
                let index = r.read_leb128("variant index")?;
                let f = usize::try_from(index)
                    .ok()
                    .and_then(|i| fields.get(i))
                    .ok_or(Error::VariantIndexOutOfBounds {
                        index,
                        size: fields.len(),
                    })?;
                let v = self.decode(r, f.ty, None, depth + 1)?;
                let vv = VariantValue {
                    index,
                    field: FieldValue {
                        label: f.label,
                        value: self.alloc(v)?,
                    },
                };
                Ok(Value::Variant(self.arena.try_alloc(vv, "variant value")?))
            }

            Type::Func(_) => Err(Error::UnsupportedValue { kind: "func" }),
            Type::Service(_) => Err(Error::UnsupportedValue { kind: "service" }),
            // Entered resolved; resolve again if a caller hands us a bare Var.
            Type::Var(_) => self.decode(r, wire, None, depth),
        }
    }

    /// Typed path: decode the wire value while structurally reconciling it
    /// against the expected type. Irreconcilable shapes are errors, never
    /// silent reinterpretation.
    fn decode_typed(
        &self,
        r: &mut Reader<'a>,
        wire: &'a Type<'a>,
        expected: &'a Type<'a>,
        depth: usize,
    ) -> Result<Value<'a>, Error> {
        // Reserved accepts any wire value; the bytes are consumed and
        // dropped.
        if matches!(expected, Type::Reserved) {
            let _ = self.decode_untyped(r, wire, depth)?;
            return Ok(Value::Reserved);
        }
        match (*wire, *expected) {
            (Type::Null, Type::Null) => Ok(Value::Null),
            // A null wire value reconciles with an expected optional as
            // "absent".
            (Type::Null, Type::Opt(_)) => Ok(Value::Opt(None)),

            (Type::Bool, Type::Bool) => Ok(Value::Bool(read_bool(r)?)),
            (Type::Float32, Type::Float32) => Ok(Value::Float32(r.read_f32("float32")?)),
            (Type::Float64, Type::Float64) => Ok(Value::Float64(r.read_f64("float64")?)),
            (Type::Text, Type::Text) => Ok(Value::Text(r.read_text(MAX_TEXT_LEN, "text")?)),
            (Type::Principal, Type::Principal) => Ok(Value::Principal(
                r.read_bytes_prefixed(MAX_PRINCIPAL_LEN, "principal")?,
            )),

            (Type::Opt(wi), Type::Opt(ei)) => match r.read_byte("opt tag")? {
                0x00 => Ok(Value::Opt(None)),
                0x01 => {
                    let v = self.decode(r, wi, Some(ei), depth + 1)?;
                    Ok(Value::Opt(Some(self.alloc(v)?)))
                }
                value => Err(Error::InvalidPresenceTag { value }),
            },

            (Type::Vec(wi), Type::Vec(ei)) => {
                let wi_res = self.wire_env.resolve(wi)?;
                let ei_res = self.resolve_expected(ei)?;
                if matches!(wi_res, Type::Nat8) && matches!(ei_res, Type::Nat8) {
                    return Ok(Value::Blob(r.read_bytes_prefixed(MAX_BLOB_LEN, "blob")?));
                }
                let count = read_vec_count(r)?;
                let mut items = Vec::with_capacity(count.min(r.remaining_len() + 1));
                for _ in 0..count {
                    items.push(self.decode(r, wi, Some(ei), depth + 1)?);
                }
                Ok(Value::Vec(self.arena.try_alloc_slice(&items, "vec items")?))
            }

            // The wire record must carry a superset of the expected
            // fields: extras are skipped, absent expected fields decode as
            // absent optionals (or reserved), and anything else missing is
            // irreconcilable.
            (Type::Record(wfs), Type::Record(efs)) => {
                let mut out: Vec<FieldValue<'a>> = Vec::with_capacity(efs.len());
                let mut ei = 0usize;
                for wf in wfs {
                    let wh = wf.label.hash();
                    while ei < efs.len() && efs[ei].label.hash() < wh {
                        out.push(self.missing_field(&efs[ei])?);
                        ei += 1;
                    }
                    if ei < efs.len() && efs[ei].label.hash() == wh {
                        let v = self.decode(r, wf.ty, Some(efs[ei].ty), depth + 1)?;
                        out.push(FieldValue {
                            label: efs[ei].label,
                            value: self.alloc(v)?,
                        });
                        ei += 1;
                    } else {
                        let _ = self.decode(r, wf.ty, None, depth + 1)?;
                    }
                }
                while ei < efs.len() {
                    out.push(self.missing_field(&efs[ei])?);
                    ei += 1;
                }
                Ok(Value::Record(
                    self.arena.try_alloc_slice(&out, "record fields")?,
                ))
            }

            // The wire's active field must be declared in the expected
            // variant; the decoded index is its position there.
            (Type::Variant(wfs), Type::Variant(efs)) => {
                let index = r.read_leb128("variant index")?;
                let wf = usize::try_from(index)
                    .ok()
                    .and_then(|i| wfs.get(i))
                    .ok_or(Error::VariantIndexOutOfBounds {
                        index,
                        size: wfs.len(),
                    })?;
                let hash = wf.label.hash();
                let ei = efs
                    .binary_search_by(|f| f.label.hash().cmp(&hash))
                    .map_err(|_| Error::UnexpectedVariantField { hash })?;
                let v = self.decode(r, wf.ty, Some(efs[ei].ty), depth + 1)?;
                let vv = VariantValue {
                    index: ei as u64,
                    field: FieldValue {
                        label: efs[ei].label,
                        value: self.alloc(v)?,
                    },
                };
                Ok(Value::Variant(self.arena.try_alloc(vv, "variant value")?))
            }

            (w, e) => {
                if let (Some(wc), Some(ec)) = (int_class(&w), int_class(&e)) {
                    return self.decode_int(r, wc, ec, w, e);
                }
                Err(Error::IncompatibleType {
                    expected: e.kind_name(),
                    wire: w.kind_name(),
                })
            }
        }
    }

    fn missing_field(&self, field: &Field<'a>) -> Result<FieldValue<'a>, Error> {
        let ty = self.resolve_expected(field.ty)?;
        match ty {
            Type::Opt(_) => Ok(FieldValue {
                label: field.label,
                value: &OPT_NONE,
            }),
            Type::Reserved => Ok(FieldValue {
                label: field.label,
                value: &RESERVED_VALUE,
            }),
            _ => Err(Error::FieldNotOnWire {
                hash: field.label.hash(),
            }),
        }
    }

    /// Integer reconciliation: a narrower wire integer widens into a
    /// wider (or unbounded) expected slot; narrowing never happens.
    fn decode_int(
        &self,
        r: &mut Reader<'a>,
        wire: IntClass,
        expected: IntClass,
        wire_ty: Type<'a>,
        expected_ty: Type<'a>,
    ) -> Result<Value<'a>, Error> {
        if !widens_into(wire, expected) {
            return Err(Error::IncompatibleType {
                expected: expected_ty.kind_name(),
                wire: wire_ty.kind_name(),
            });
        }
        if wire.signed {
            let v = read_wire_int(r, wire.bits)?;
            Ok(make_int_value(&expected_ty, v))
        } else {
            let v = read_wire_nat(r, wire.bits)?;
            if expected.signed {
                let v = i64::try_from(v).map_err(|_| Error::NatOutOfRange {
                    value: v,
                    width: "int",
                })?;
                Ok(make_int_value(&expected_ty, v))
            } else {
                Ok(make_nat_value(&expected_ty, v))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IntClass {
    signed: bool,
    /// None marks the unbounded kind.
    bits: Option<u8>,
}

fn int_class(ty: &Type<'_>) -> Option<IntClass> {
    let (signed, bits) = match ty {
        Type::Nat => (false, None),
        Type::Nat8 => (false, Some(8)),
        Type::Nat16 => (false, Some(16)),
        Type::Nat32 => (false, Some(32)),
        Type::Nat64 => (false, Some(64)),
        Type::Int => (true, None),
        Type::Int8 => (true, Some(8)),
        Type::Int16 => (true, Some(16)),
        Type::Int32 => (true, Some(32)),
        Type::Int64 => (true, Some(64)),
        _ => return None,
    };
    Some(IntClass { signed, bits })
}

fn widens_into(wire: IntClass, expected: IntClass) -> bool {
    match (wire.signed, expected.signed) {
        (false, false) | (true, true) => match (wire.bits, expected.bits) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(w), Some(e)) => e >= w,
        },
        // Unsigned fits a strictly wider signed slot; into the unbounded
        // signed kind the fit is checked at runtime.
        (false, true) => match (wire.bits, expected.bits) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(w), Some(e)) => e > w,
        },
        (true, false) => false,
    }
}

fn read_bool(r: &mut Reader<'_>) -> Result<bool, Error> {
    match r.read_byte("bool")? {
        0x00 => Ok(false),
        0x01 => Ok(true),
        value => Err(Error::InvalidBool { value }),
    }
}

fn read_wire_nat(r: &mut Reader<'_>, bits: Option<u8>) -> Result<u64, Error> {
    let (max, width) = match bits {
        None | Some(64) => return r.read_leb128("nat"),
        Some(8) => (u64::from(u8::MAX), "nat8"),
        Some(16) => (u64::from(u16::MAX), "nat16"),
        Some(32) => (u64::from(u32::MAX), "nat32"),
        _ => unreachable!("int_class yields widths of 8, 16, 32 or 64"),
    };
    let value = r.read_leb128(width)?;
    if value > max {
        return Err(Error::NatOutOfRange { value, width });
    }
    Ok(value)
}

fn read_wire_int(r: &mut Reader<'_>, bits: Option<u8>) -> Result<i64, Error> {
    let (min, max, width) = match bits {
        None | Some(64) => return r.read_sleb128("int"),
        Some(8) => (i64::from(i8::MIN), i64::from(i8::MAX), "int8"),
        Some(16) => (i64::from(i16::MIN), i64::from(i16::MAX), "int16"),
        Some(32) => (i64::from(i32::MIN), i64::from(i32::MAX), "int32"),
        _ => unreachable!("int_class yields widths of 8, 16, 32 or 64"),
    };
    let value = r.read_sleb128(width)?;
    if value < min || value > max {
        return Err(Error::IntOutOfRange { value, width });
    }
    Ok(value)
}

fn make_nat_value<'a>(expected: &Type<'a>, v: u64) -> Value<'a> {
    match expected {
        Type::Nat => Value::Nat(v),
        Type::Nat8 => Value::Nat8(v as u8),
        Type::Nat16 => Value::Nat16(v as u16),
        Type::Nat32 => Value::Nat32(v as u32),
        Type::Nat64 => Value::Nat64(v),
        _ => unreachable!("admissibility checked by widens_into"),
    }
}

fn make_int_value<'a>(expected: &Type<'a>, v: i64) -> Value<'a> {
    match expected {
        Type::Int => Value::Int(v),
        Type::Int8 => Value::Int8(v as i8),
        Type::Int16 => Value::Int16(v as i16),
        Type::Int32 => Value::Int32(v as i32),
        Type::Int64 => Value::Int64(v),
        _ => unreachable!("admissibility checked by widens_into"),
    }
}

fn read_vec_count(r: &mut Reader<'_>) -> Result<usize, Error> {
    let count = r.read_leb128("vec length")? as usize;
    if count > MAX_VEC_ITEMS {
        return Err(Error::LengthExceedsLimit {
            field: "vec",
            len: count,
            max: MAX_VEC_ITEMS,
        });
    }
    Ok(count)
}
