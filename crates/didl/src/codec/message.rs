//! Message encoding/decoding: magic header, type table, argument list.
//!
//! A message is `DIDL` + type table + argument type references + argument
//! values. [`Builder`] produces one from (type, value) pairs;
//! [`Deserializer`] parses the header eagerly and then yields one decoded
//! value per `fetch` call, tracking exactly how much of the input has been
//! consumed.

use tracing::trace;

use crate::arena::Arena;
use crate::codec::primitives::{Reader, Writer};
use crate::codec::types::{TypeTable, TypeTableBuilder};
use crate::codec::value::{encode_value, ValueDecoder};
use crate::error::Error;
use crate::limits::{MAGIC, MAX_ARGS};
use crate::model::types::{Type, TypeEnv};
use crate::model::value::Value;
use crate::validate;

// =============================================================================
// ENCODING
// =============================================================================

/// Builds an encoded message from argument (type, value) pairs.
///
/// Arguments are wired in the order they are added. A `None` type is
/// inferred from the value at serialization time.
#[derive(Debug)]
pub struct Builder<'a> {
    arena: &'a Arena,
    env: Option<&'a TypeEnv<'a>>,
    args: Vec<(Option<&'a Type<'a>>, &'a Value<'a>)>,
}

impl<'a> Builder<'a> {
    /// Creates a builder with no type-variable bindings.
    pub fn new(arena: &'a Arena) -> Builder<'a> {
        Builder {
            arena,
            env: None,
            args: Vec::new(),
        }
    }

    /// Creates a builder whose argument types may reference `env`.
    pub fn with_env(arena: &'a Arena, env: &'a TypeEnv<'a>) -> Builder<'a> {
        Builder {
            arena,
            env: Some(env),
            args: Vec::new(),
        }
    }

    /// Appends a typed argument.
    pub fn arg(mut self, ty: &'a Type<'a>, value: &'a Value<'a>) -> Builder<'a> {
        self.args.push((Some(ty), value));
        self
    }

    /// Appends an argument whose type is inferred from the value.
    ///
    /// Inference cannot recover the element type of an empty vector or the
    /// inner type of an absent optional (both default to `null`); supply
    /// an explicit type when that matters.
    pub fn value_arg(mut self, value: &'a Value<'a>) -> Builder<'a> {
        self.args.push((None, value));
        self
    }

    /// Serializes the message to bytes.
    ///
    /// Encoding the same arguments twice yields byte-identical output.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        if self.args.len() > MAX_ARGS {
            return Err(Error::LengthExceedsLimit {
                field: "arguments",
                len: self.args.len(),
                max: MAX_ARGS,
            });
        }
        let default_env = TypeEnv::new();
        let env = self.env.unwrap_or(&default_env);

        let mut types: Vec<&'a Type<'a>> = Vec::with_capacity(self.args.len());
        for (ty, value) in &self.args {
            let ty = match *ty {
                Some(t) => t,
                None => value.infer_type(self.arena)?,
            };
            validate::check_type(env, ty)?;
            types.push(ty);
        }

        let mut table = TypeTableBuilder::new(env);
        let mut refs = Vec::with_capacity(types.len());
        for &ty in &types {
            refs.push(table.type_ref(ty)?);
        }

        let mut w = Writer::with_capacity(16 + self.args.len() * 16);
        w.write_bytes(MAGIC);
        table.write_table(&mut w);
        w.write_leb128(self.args.len() as u64);
        for r in &refs {
            w.write_sleb128(*r);
        }
        for (&ty, &(_, value)) in types.iter().zip(self.args.iter()) {
            encode_value(&mut w, env, ty, value, 0)?;
        }
        trace!(
            args = self.args.len(),
            table_entries = table.len(),
            bytes = w.len(),
            "encoded message"
        );
        Ok(w.into_bytes())
    }

    /// Serializes the message to a lowercase hexadecimal string.
    pub fn serialize_hex(&self) -> Result<String, Error> {
        Ok(hex::encode(self.serialize()?))
    }
}

/// Encodes typed arguments in one call. See [`Builder`] for the long form.
pub fn encode_args<'a>(
    arena: &'a Arena,
    args: &[(&'a Type<'a>, &'a Value<'a>)],
) -> Result<Vec<u8>, Error> {
    let mut builder = Builder::new(arena);
    for &(ty, value) in args {
        builder = builder.arg(ty, value);
    }
    builder.serialize()
}

// =============================================================================
// DECODING
// =============================================================================

/// Decodes an encoded message argument by argument.
///
/// Construction parses magic, type table, and the argument type list; each
/// [`fetch`](Deserializer::fetch) then decodes one value. Any failure is
/// terminal: the deserializer poisons itself and every later call errors.
/// State machine: header parsed → table parsed → ready (0..N consumed) →
/// done, with no transition reachable after a failure.
#[derive(Debug)]
pub struct Deserializer<'a> {
    reader: Reader<'a>,
    arena: &'a Arena,
    table: TypeTable<'a>,
    arg_types: Vec<&'a Type<'a>>,
    next_arg: usize,
    expect_env: Option<&'a TypeEnv<'a>>,
    poisoned: bool,
}

impl<'a> Deserializer<'a> {
    /// Parses the header of an encoded message.
    pub fn from_bytes(input: &'a [u8], arena: &'a Arena) -> Result<Deserializer<'a>, Error> {
        Self::build(input, arena, None)
    }

    /// Parses the header; expected types passed to `fetch` may reference
    /// `env`.
    pub fn with_env(
        input: &'a [u8],
        arena: &'a Arena,
        env: &'a TypeEnv<'a>,
    ) -> Result<Deserializer<'a>, Error> {
        Self::build(input, arena, Some(env))
    }

    fn build(
        input: &'a [u8],
        arena: &'a Arena,
        expect_env: Option<&'a TypeEnv<'a>>,
    ) -> Result<Deserializer<'a>, Error> {
        let mut reader = Reader::new(input);
        let magic = reader.read_bytes(MAGIC.len(), "magic")?;
        if magic != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(magic);
            return Err(Error::InvalidMagic { found });
        }

        let table = TypeTable::parse(&mut reader, arena)?;

        let arg_count = reader.read_leb128("argument count")? as usize;
        if arg_count > MAX_ARGS {
            return Err(Error::LengthExceedsLimit {
                field: "arguments",
                len: arg_count,
                max: MAX_ARGS,
            });
        }
        let mut arg_types = Vec::with_capacity(arg_count.min(reader.remaining_len() + 1));
        for _ in 0..arg_count {
            let reference = reader.read_sleb128("argument type")?;
            arg_types.push(table.lookup(reference)?);
        }
        trace!(
            args = arg_count,
            header_bytes = reader.position(),
            "parsed message header"
        );

        Ok(Deserializer {
            reader,
            arena,
            table,
            arg_types,
            next_arg: 0,
            expect_env,
            poisoned: false,
        })
    }

    /// Returns true once every declared argument has been fetched.
    pub fn is_done(&self) -> bool {
        self.next_arg >= self.arg_types.len()
    }

    /// Returns the number of arguments not yet fetched.
    pub fn remaining_args(&self) -> usize {
        self.arg_types.len() - self.next_arg
    }

    /// Returns the declared argument types, as parsed from the wire.
    pub fn arg_types(&self) -> &[&'a Type<'a>] {
        &self.arg_types
    }

    /// Decodes the next argument, reconciled against `expected`.
    pub fn fetch(&mut self, expected: &'a Type<'a>) -> Result<&'a Value<'a>, Error> {
        self.fetch_inner(Some(expected))
    }

    /// Decodes the next argument by its wire type alone.
    pub fn fetch_any(&mut self) -> Result<&'a Value<'a>, Error> {
        self.fetch_inner(None)
    }

    fn fetch_inner(&mut self, expected: Option<&'a Type<'a>>) -> Result<&'a Value<'a>, Error> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        if self.is_done() {
            return Err(Error::NoArgumentsLeft);
        }
        if let Some(expected) = expected {
            // A malformed expectation is the caller's mistake, reported
            // before any input is consumed; the decoder stays usable.
            let empty = TypeEnv::new();
            validate::check_type(self.expect_env.unwrap_or(&empty), expected)?;
        }
        let wire = self.arg_types[self.next_arg];
        let decoder = ValueDecoder {
            arena: self.arena,
            wire_env: self.table.env(),
            expect_env: self.expect_env,
        };
        match decoder.decode(&mut self.reader, wire, expected, 0) {
            Ok(value) => match self.arena.try_alloc(value, "decoded argument") {
                Ok(value) => {
                    self.next_arg += 1;
                    Ok(value)
                }
                Err(e) => {
                    self.poisoned = true;
                    Err(e)
                }
            },
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Asserts the message was fully consumed: every declared argument
    /// fetched and no trailing bytes left.
    pub fn finish(&self) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        if !self.is_done() {
            return Err(Error::UnconsumedArguments {
                count: self.remaining_args(),
            });
        }
        if !self.reader.is_empty() {
            return Err(Error::TrailingBytes {
                remaining: self.reader.remaining_len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::label::Label;
    use crate::model::types::FuncMode;
    use proptest::prelude::*;

    // Scenario fixtures, independently computed from the wire rules.
    const SCENARIO_A_HEX: &str =
        "4449444c016c03e1ddf3027d83b0b4890171abe3808e0471010096df050b313233204d61696e205374025346";
    const SCENARIO_B_HEX: &str =
        "4449444c016b038ba7879f047fe6ebead6047ffebbd5b30871010002047370616d";
    const SCENARIO_C_HEX: &str = "4449444c0a6c07efd6e40271e1edeb4a01e8d6d8930102a2f5ed880403ecdaccac0405c6a4a1980607b0f1b99806096b039681ba027fa0d2aca8047fe088f2d2047f6e786e046d7b6e066a000001016d086c02f1fee18d0371cbe4fdc704716e7a01001368747470733a2f2f6578616d706c652e636f6d00000000010e69632d687474702d632d64656d6f0a557365722d4167656e7400";

    fn address_type<'a>(arena: &'a Arena) -> &'a Type<'a> {
        Type::record(
            arena,
            &[
                (Label::Named("street"), &Type::Text),
                (Label::Named("city"), &Type::Text),
                (Label::Named("zip"), &Type::Nat),
            ],
        )
        .unwrap()
    }

    fn address_value<'a>(arena: &'a Arena) -> &'a Value<'a> {
        let street = Value::text(arena, "123 Main St").unwrap();
        let city = Value::text(arena, "SF").unwrap();
        let zip: &Value = arena.try_alloc(Value::Nat(94_102), "test").unwrap();
        Value::record(
            arena,
            &[
                (Label::Named("street"), street),
                (Label::Named("city"), city),
                (Label::Named("zip"), zip),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_scenario_a_exact_bytes() {
        let arena = Arena::new();
        let ty = address_type(&arena);
        let value = address_value(&arena);
        let hex_out = Builder::new(&arena).arg(ty, value).serialize_hex().unwrap();
        assert_eq!(hex_out, SCENARIO_A_HEX);
    }

    #[test]
    fn test_scenario_a_roundtrip_any_declaration_order() {
        let arena = Arena::new();
        let ty = address_type(&arena);
        let value = address_value(&arena);
        let bytes = encode_args(&arena, &[(ty, value)]).unwrap();

        // A permutation of the same fields produces identical bytes.
        let street = Value::text(&arena, "123 Main St").unwrap();
        let city = Value::text(&arena, "SF").unwrap();
        let zip: &Value = arena.try_alloc(Value::Nat(94_102), "test").unwrap();
        let permuted = Value::record(
            &arena,
            &[
                (Label::Named("zip"), zip),
                (Label::Named("city"), city),
                (Label::Named("street"), street),
            ],
        )
        .unwrap();
        let ty2 = Type::record(
            &arena,
            &[
                (Label::Named("zip"), &Type::Nat),
                (Label::Named("street"), &Type::Text),
                (Label::Named("city"), &Type::Text),
            ],
        )
        .unwrap();
        assert_eq!(encode_args(&arena, &[(ty2, permuted)]).unwrap(), bytes);

        let arena2 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        assert!(!d.is_done());
        let decoded = d.fetch(ty).unwrap();
        assert_eq!(decoded, value);
        assert!(d.is_done());
        d.finish().unwrap();
    }

    #[test]
    fn test_scenario_a_untyped_fast_path() {
        let arena = Arena::new();
        let ty = address_type(&arena);
        let value = address_value(&arena);
        let bytes = encode_args(&arena, &[(ty, value)]).unwrap();

        let arena2 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        // Labels decode as raw hashes, which are the same labels.
        let decoded = d.fetch_any().unwrap();
        assert_eq!(decoded, value);
        d.finish().unwrap();
    }

    #[test]
    fn test_scenario_b_variant() {
        let arena = Arena::new();
        let ty = Type::variant(
            &arena,
            &[
                (Label::Named("Active"), &Type::Null),
                (Label::Named("Inactive"), &Type::Null),
                (Label::Named("Banned"), &Type::Text),
            ],
        )
        .unwrap();
        let payload = Value::text(&arena, "spam").unwrap();
        let value = Value::variant(&arena, ty, Label::Named("Banned"), payload).unwrap();

        let hex_out = Builder::new(&arena).arg(ty, value).serialize_hex().unwrap();
        assert_eq!(hex_out, SCENARIO_B_HEX);

        let bytes = hex::decode(SCENARIO_B_HEX).unwrap();
        let arena2 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        let decoded = d.fetch(ty).unwrap();
        match decoded {
            Value::Variant(vv) => {
                // Hash order: Inactive < Active < Banned.
                assert_eq!(vv.index, 2);
                assert_eq!(vv.field.label, Label::Named("Banned"));
                assert_eq!(vv.field.value, &Value::Text("spam"));
            }
            other => panic!("expected variant, got {other:?}"),
        }
        d.finish().unwrap();
    }

    fn http_request_type<'a>(arena: &'a Arena) -> &'a Type<'a> {
        let header = Type::record(
            arena,
            &[
                (Label::Named("name"), &Type::Text),
                (Label::Named("value"), &Type::Text),
            ],
        )
        .unwrap();
        let method = Type::variant(
            arena,
            &[
                (Label::Named("get"), &Type::Null),
                (Label::Named("head"), &Type::Null),
                (Label::Named("post"), &Type::Null),
            ],
        )
        .unwrap();
        let transform = Type::func(arena, &[], &[], &[FuncMode::Query]).unwrap();
        Type::record(
            arena,
            &[
                (Label::Named("url"), &Type::Text),
                (
                    Label::Named("max_response_bytes"),
                    Type::opt(arena, &Type::Nat64).unwrap(),
                ),
                (Label::Named("headers"), Type::vec(arena, header).unwrap()),
                (
                    Label::Named("body"),
                    Type::opt(arena, Type::vec(arena, &Type::Nat8).unwrap()).unwrap(),
                ),
                (Label::Named("method"), method),
                (Label::Named("transform"), Type::opt(arena, transform).unwrap()),
                (
                    Label::Named("certificate_version"),
                    Type::opt(arena, &Type::Nat16).unwrap(),
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_scenario_c_http_request_interop_bytes() {
        let arena = Arena::new();
        let req = http_request_type(&arena);
        let method = match req {
            Type::Record(fields) => fields
                .iter()
                .find(|f| f.label == Label::Named("method"))
                .unwrap()
                .ty,
            other => panic!("expected record, got {other:?}"),
        };

        let url = Value::text(&arena, "https://example.com").unwrap();
        let name = Value::text(&arena, "User-Agent").unwrap();
        let value = Value::text(&arena, "ic-http-c-demo").unwrap();
        let header = Value::record(
            &arena,
            &[(Label::Named("name"), name), (Label::Named("value"), value)],
        )
        .unwrap();
        let headers = Value::vec(&arena, &[*header]).unwrap();
        let get = Value::variant(&arena, method, Label::Named("get"), &Value::Null).unwrap();
        let absent = Value::opt(&arena, None).unwrap();
        let request = Value::record(
            &arena,
            &[
                (Label::Named("url"), url),
                (Label::Named("max_response_bytes"), absent),
                (Label::Named("headers"), headers),
                (Label::Named("body"), absent),
                (Label::Named("method"), get),
                (Label::Named("transform"), absent),
                (Label::Named("certificate_version"), absent),
            ],
        )
        .unwrap();

        let hex_out = Builder::new(&arena)
            .arg(req, request)
            .serialize_hex()
            .unwrap();
        assert_eq!(hex_out, SCENARIO_C_HEX);

        // Typed round-trip through a fresh arena recovers the value.
        let bytes = hex::decode(SCENARIO_C_HEX).unwrap();
        let arena2 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        let decoded = d.fetch(req).unwrap();
        assert_eq!(decoded, request);
        d.finish().unwrap();
    }

    #[test]
    fn test_determinism_across_fresh_arenas() {
        let first = {
            let arena = Arena::new();
            encode_args(&arena, &[(address_type(&arena), address_value(&arena))]).unwrap()
        };
        let second = {
            let arena = Arena::new();
            encode_args(&arena, &[(address_type(&arena), address_value(&arena))]).unwrap()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_message() {
        let arena = Arena::new();
        let bytes = Builder::new(&arena).serialize().unwrap();
        assert_eq!(hex::encode(&bytes), "4449444c0000");

        let mut d = Deserializer::from_bytes(&bytes, &arena).unwrap();
        assert!(d.is_done());
        assert!(matches!(d.fetch_any(), Err(Error::NoArgumentsLeft)));
        d.finish().unwrap();
    }

    #[test]
    fn test_recursive_list_roundtrip() {
        let arena = Arena::new();
        let mut env = TypeEnv::new();
        // type list = opt record { head : int; tail : list }
        let tail = Type::var(&arena, "list").unwrap();
        let node = Type::record(
            &arena,
            &[(Label::Named("head"), &Type::Int), (Label::Named("tail"), tail)],
        )
        .unwrap();
        let list = Type::opt(&arena, node).unwrap();
        env.insert("list", list).unwrap();

        // 1 -> 2 -> nil
        let one: &Value = arena.try_alloc(Value::Int(1), "test").unwrap();
        let two: &Value = arena.try_alloc(Value::Int(2), "test").unwrap();
        let nil = Value::opt(&arena, None).unwrap();
        let node2 = Value::record(
            &arena,
            &[(Label::Named("head"), two), (Label::Named("tail"), nil)],
        )
        .unwrap();
        let cons2 = Value::opt(&arena, Some(node2)).unwrap();
        let node1 = Value::record(
            &arena,
            &[(Label::Named("head"), one), (Label::Named("tail"), cons2)],
        )
        .unwrap();
        let cons1 = Value::opt(&arena, Some(node1)).unwrap();

        let bytes = Builder::with_env(&arena, &env)
            .arg(tail, cons1)
            .serialize()
            .unwrap();

        let arena2 = Arena::new();
        let mut d = Deserializer::with_env(&bytes, &arena2, &env).unwrap();
        let decoded = d.fetch(tail).unwrap();
        assert_eq!(decoded, cons1);
        d.finish().unwrap();
    }

    #[test]
    fn test_integer_widening_through_message() {
        let arena = Arena::new();
        let v: &Value = arena.try_alloc(Value::Nat8(7), "test").unwrap();
        let bytes = encode_args(&arena, &[(&Type::Nat8, v)]).unwrap();

        for (expected_ty, expected_value) in [
            (&Type::Nat16, Value::Nat16(7)),
            (&Type::Nat64, Value::Nat64(7)),
            (&Type::Nat, Value::Nat(7)),
            (&Type::Int16, Value::Int16(7)),
            (&Type::Int, Value::Int(7)),
        ] {
            let arena2 = Arena::new();
            let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
            assert_eq!(d.fetch(expected_ty).unwrap(), &expected_value);
            d.finish().unwrap();
        }

        // Narrowing and sign-stripping are refused.
        for expected_ty in [&Type::Int8, &Type::Bool, &Type::Text] {
            let arena2 = Arena::new();
            let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
            assert!(matches!(
                d.fetch(expected_ty),
                Err(Error::IncompatibleType { .. })
            ));
        }
    }

    #[test]
    fn test_record_superset_and_absent_optionals() {
        let arena = Arena::new();
        let wire_ty = Type::record(
            &arena,
            &[
                (Label::Named("a"), &Type::Nat),
                (Label::Named("b"), &Type::Text),
            ],
        )
        .unwrap();
        let a: &Value = arena.try_alloc(Value::Nat(5), "test").unwrap();
        let b = Value::text(&arena, "x").unwrap();
        let value = Value::record(
            &arena,
            &[(Label::Named("a"), a), (Label::Named("b"), b)],
        )
        .unwrap();
        let bytes = encode_args(&arena, &[(wire_ty, value)]).unwrap();

        // Extra wire fields are skipped.
        let subset = Type::record(&arena, &[(Label::Named("b"), &Type::Text)]).unwrap();
        let arena2 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        let decoded = d.fetch(subset).unwrap();
        match decoded {
            Value::Record(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].label, Label::Named("b"));
                assert_eq!(fields[0].value, &Value::Text("x"));
            }
            other => panic!("expected record, got {other:?}"),
        }
        d.finish().unwrap();

        // Expected optional fields absent from the wire decode as absent.
        let widened = Type::record(
            &arena,
            &[
                (Label::Named("b"), &Type::Text),
                (Label::Named("c"), Type::opt(&arena, &Type::Nat).unwrap()),
            ],
        )
        .unwrap();
        let arena3 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena3).unwrap();
        let decoded = d.fetch(widened).unwrap();
        match decoded {
            Value::Record(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[1].label, Label::Named("c"));
                assert_eq!(fields[1].value, &Value::Opt(None));
            }
            other => panic!("expected record, got {other:?}"),
        }
        d.finish().unwrap();

        // A required expected field missing from the wire is refused.
        let demanding = Type::record(
            &arena,
            &[
                (Label::Named("b"), &Type::Text),
                (Label::Named("c"), &Type::Nat),
            ],
        )
        .unwrap();
        let arena4 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena4).unwrap();
        assert!(matches!(
            d.fetch(demanding),
            Err(Error::FieldNotOnWire { .. })
        ));
    }

    #[test]
    fn test_unsorted_raw_type_rejected_at_encode() {
        let arena = Arena::new();
        // Bypass the sorted constructor on purpose.
        let fields = arena
            .try_alloc_slice(
                &[
                    crate::model::label::Field {
                        label: Label::Id(9),
                        ty: &Type::Nat,
                    },
                    crate::model::label::Field {
                        label: Label::Id(3),
                        ty: &Type::Nat,
                    },
                ],
                "test",
            )
            .unwrap();
        let ty: &Type = arena.try_alloc(Type::Record(fields), "test").unwrap();
        let a: &Value = arena.try_alloc(Value::Nat(1), "test").unwrap();
        let value = Value::record(&arena, &[(Label::Id(3), a), (Label::Id(9), a)]).unwrap();
        assert!(matches!(
            encode_args(&arena, &[(ty, value)]),
            Err(Error::FieldsNotSorted { .. })
        ));
    }

    #[test]
    fn test_type_inference_roundtrip() {
        let arena = Arena::new();
        let blob = Value::blob(&arena, b"\x00\x01\x02").unwrap();
        let text = Value::text(&arena, "hi").unwrap();
        let rec = Value::record(
            &arena,
            &[(Label::Named("data"), blob), (Label::Named("note"), text)],
        )
        .unwrap();
        let bytes = Builder::new(&arena).value_arg(rec).serialize().unwrap();

        let arena2 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        let decoded = d.fetch_any().unwrap();
        assert_eq!(decoded, rec);
        d.finish().unwrap();
    }

    #[test]
    fn test_fetch_with_wrong_expectation() {
        let arena = Arena::new();
        let v: &Value = arena.try_alloc(Value::Nat(5), "test").unwrap();
        let bytes = encode_args(&arena, &[(&Type::Nat, v)]).unwrap();

        let arena2 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        assert!(matches!(
            d.fetch(&Type::Text),
            Err(Error::IncompatibleType { expected: "text", wire: "nat" })
        ));
        // The failure is terminal.
        assert!(matches!(d.fetch(&Type::Nat), Err(Error::Poisoned)));
        assert!(matches!(d.finish(), Err(Error::Poisoned)));
    }

    #[test]
    fn test_invalid_magic() {
        let arena = Arena::new();
        let data = *b"NOPE\x00\x00";
        assert!(matches!(
            Deserializer::from_bytes(&data, &arena),
            Err(Error::InvalidMagic { found: [b'N', b'O', b'P', b'E'] })
        ));
    }

    #[test]
    fn test_short_buffer() {
        let arena = Arena::new();
        assert!(matches!(
            Deserializer::from_bytes(b"DI", &arena),
            Err(Error::UnexpectedEof { .. })
        ));
        assert!(matches!(
            Deserializer::from_bytes(b"", &arena),
            Err(Error::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let arena = Arena::new();
        let v: &Value = arena.try_alloc(Value::Nat(5), "test").unwrap();
        let mut bytes = encode_args(&arena, &[(&Type::Nat, v)]).unwrap();
        bytes.push(0xFF);

        let arena2 = Arena::new();
        let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        let _ = d.fetch(&Type::Nat).unwrap();
        assert!(matches!(
            d.finish(),
            Err(Error::TrailingBytes { remaining: 1 })
        ));
    }

    #[test]
    fn test_unconsumed_arguments_detected() {
        let arena = Arena::new();
        let v: &Value = arena.try_alloc(Value::Nat(5), "test").unwrap();
        let bytes = encode_args(&arena, &[(&Type::Nat, v)]).unwrap();

        let arena2 = Arena::new();
        let d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
        assert!(matches!(
            d.finish(),
            Err(Error::UnconsumedArguments { count: 1 })
        ));
    }

    #[test]
    fn test_truncation_at_every_offset() {
        let arena = Arena::new();
        let ty = address_type(&arena);
        let value = address_value(&arena);
        let bytes = encode_args(&arena, &[(ty, value)]).unwrap();

        for len in 0..bytes.len() {
            let prefix = &bytes[..len];
            let arena2 = Arena::new();
            let outcome = (|| {
                let mut d = Deserializer::from_bytes(prefix, &arena2)?;
                while !d.is_done() {
                    d.fetch(ty)?;
                }
                d.finish()
            })();
            assert!(outcome.is_err(), "prefix of {len} bytes decoded cleanly");
        }
    }

    proptest! {
        #[test]
        fn prop_nat_roundtrip(n in any::<u64>()) {
            let arena = Arena::new();
            let v: &Value = arena.try_alloc(Value::Nat(n), "test").unwrap();
            let bytes = encode_args(&arena, &[(&Type::Nat, v)]).unwrap();
            let arena2 = Arena::new();
            let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
            prop_assert_eq!(d.fetch(&Type::Nat).unwrap(), &Value::Nat(n));
            d.finish().unwrap();
        }

        #[test]
        fn prop_int_roundtrip(n in any::<i64>()) {
            let arena = Arena::new();
            let v: &Value = arena.try_alloc(Value::Int(n), "test").unwrap();
            let bytes = encode_args(&arena, &[(&Type::Int, v)]).unwrap();
            let arena2 = Arena::new();
            let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
            prop_assert_eq!(d.fetch(&Type::Int).unwrap(), &Value::Int(n));
            d.finish().unwrap();
        }

        #[test]
        fn prop_text_roundtrip(s in ".*") {
            let arena = Arena::new();
            let v = Value::text(&arena, &s).unwrap();
            let bytes = encode_args(&arena, &[(&Type::Text, v)]).unwrap();
            let arena2 = Arena::new();
            let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
            prop_assert_eq!(d.fetch(&Type::Text).unwrap(), v);
            d.finish().unwrap();
        }

        #[test]
        fn prop_blob_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let arena = Arena::new();
            let v = Value::blob(&arena, &data).unwrap();
            let vec_nat8 = Type::vec(&arena, &Type::Nat8).unwrap();
            let bytes = encode_args(&arena, &[(vec_nat8, v)]).unwrap();
            let arena2 = Arena::new();
            let mut d = Deserializer::from_bytes(&bytes, &arena2).unwrap();
            prop_assert_eq!(d.fetch_any().unwrap(), v);
            d.finish().unwrap();
        }

        #[test]
        fn prop_arbitrary_input_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let arena = Arena::new();
            if let Ok(mut d) = Deserializer::from_bytes(&data, &arena) {
                while !d.is_done() {
                    if d.fetch_any().is_err() {
                        break;
                    }
                }
                let _ = d.finish();
            }
        }
    }
}
