//! Type-table encoding/decoding.
//!
//! The type table is the de-duplicated list of composite type definitions
//! written once per message. Primitives are inlined as negative opcodes at
//! use sites; composites are assigned a table index at first encounter and
//! referenced by index thereafter — including from inside their own
//! definition, which is what lets recursive schemas terminate.

use rustc_hash::FxHashMap;

use crate::arena::Arena;
use crate::codec::primitives::{Reader, Writer};
use crate::error::Error;
use crate::limits::{
    MAX_FIELDS, MAX_FUNC_MODES, MAX_FUNC_PARAMS, MAX_METHODS, MAX_METHOD_NAME_LEN,
    MAX_TYPE_TABLE_ENTRIES,
};
use crate::model::label::{Field, Label};
use crate::model::types::{FuncMode, FuncSig, Method, Type, TypeEnv};

/// Wire opcodes for type kinds (SLEB128-encoded, always negative).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub(crate) enum Opcode {
    Null = -1,
    Bool = -2,
    Nat = -3,
    Int = -4,
    Nat8 = -5,
    Nat16 = -6,
    Nat32 = -7,
    Nat64 = -8,
    Int8 = -9,
    Int16 = -10,
    Int32 = -11,
    Int64 = -12,
    Float32 = -13,
    Float64 = -14,
    Text = -15,
    Reserved = -16,
    Empty = -17,
    Opt = -18,
    Vec = -19,
    Record = -20,
    Variant = -21,
    Func = -22,
    Service = -23,
    Principal = -24,
}

/// Returns the inline opcode for a primitive type, or None for composites
/// and type variables.
pub(crate) fn primitive_opcode(ty: &Type<'_>) -> Option<i64> {
    let op = match ty {
        Type::Null => Opcode::Null,
        Type::Bool => Opcode::Bool,
        Type::Nat => Opcode::Nat,
        Type::Int => Opcode::Int,
        Type::Nat8 => Opcode::Nat8,
        Type::Nat16 => Opcode::Nat16,
        Type::Nat32 => Opcode::Nat32,
        Type::Nat64 => Opcode::Nat64,
        Type::Int8 => Opcode::Int8,
        Type::Int16 => Opcode::Int16,
        Type::Int32 => Opcode::Int32,
        Type::Int64 => Opcode::Int64,
        Type::Float32 => Opcode::Float32,
        Type::Float64 => Opcode::Float64,
        Type::Text => Opcode::Text,
        Type::Reserved => Opcode::Reserved,
        Type::Empty => Opcode::Empty,
        Type::Principal => Opcode::Principal,
        Type::Opt(_)
        | Type::Vec(_)
        | Type::Record(_)
        | Type::Variant(_)
        | Type::Func(_)
        | Type::Service(_)
        | Type::Var(_) => return None,
    };
    Some(op as i64)
}

/// Returns the primitive type for an inline opcode, or None for composite
/// opcodes and unknown values.
pub(crate) fn primitive_type(opcode: i64) -> Option<&'static Type<'static>> {
    Some(match opcode {
        -1 => &Type::Null,
        -2 => &Type::Bool,
        -3 => &Type::Nat,
        -4 => &Type::Int,
        -5 => &Type::Nat8,
        -6 => &Type::Nat16,
        -7 => &Type::Nat32,
        -8 => &Type::Nat64,
        -9 => &Type::Int8,
        -10 => &Type::Int16,
        -11 => &Type::Int32,
        -12 => &Type::Int64,
        -13 => &Type::Float32,
        -14 => &Type::Float64,
        -15 => &Type::Text,
        -16 => &Type::Reserved,
        -17 => &Type::Empty,
        -24 => &Type::Principal,
        _ => return None,
    })
}

// =============================================================================
// ENCODING
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum VarSlot {
    /// The variable is being resolved through a chain of other variables.
    InProgress,
    /// The variable resolves to this type reference.
    Ref(i64),
}

/// Builds the de-duplicated type table for one message.
#[derive(Debug)]
pub(crate) struct TypeTableBuilder<'a, 'e> {
    env: &'e TypeEnv<'a>,
    /// Payload bytes per table entry, in index order.
    entries: Vec<Vec<u8>>,
    /// Structural-identity de-duplication of composite types.
    type_index: FxHashMap<&'a Type<'a>, i64>,
    /// Resolution state per type-variable name.
    var_index: FxHashMap<&'a str, VarSlot>,
}

impl<'a, 'e> TypeTableBuilder<'a, 'e> {
    pub fn new(env: &'e TypeEnv<'a>) -> Self {
        Self {
            env,
            entries: Vec::new(),
            type_index: FxHashMap::default(),
            var_index: FxHashMap::default(),
        }
    }

    /// Returns the number of table entries built so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the type reference for `ty`: a negative primitive opcode or
    /// a non-negative table index, entering `ty` into the table if needed.
    pub fn type_ref(&mut self, ty: &'a Type<'a>) -> Result<i64, Error> {
        if let Some(op) = primitive_opcode(ty) {
            return Ok(op);
        }
        if let Type::Var(name) = *ty {
            return self.var_ref(name);
        }
        if let Some(&index) = self.type_index.get(ty) {
            return Ok(index);
        }
        self.push_entry(ty)
    }

    /// Resolves a named type variable to a type reference, binding the
    /// name to its table index before the definition is walked so that
    /// self-references terminate.
    fn var_ref(&mut self, name: &'a str) -> Result<i64, Error> {
        match self.var_index.get(name) {
            Some(VarSlot::Ref(r)) => return Ok(*r),
            Some(VarSlot::InProgress) => {
                return Err(Error::TypeVarCycle {
                    name: name.to_string(),
                });
            }
            None => {}
        }
        let def = self.env.get(name).ok_or_else(|| Error::UnboundTypeVar {
            name: name.to_string(),
        })?;

        if let Some(op) = primitive_opcode(def) {
            // A variable bound to a primitive aliases the inline opcode.
            self.var_index.insert(name, VarSlot::Ref(op));
            return Ok(op);
        }
        if let Type::Var(next) = *def {
            self.var_index.insert(name, VarSlot::InProgress);
            let r = self.var_ref(next)?;
            self.var_index.insert(name, VarSlot::Ref(r));
            return Ok(r);
        }
        if let Some(&index) = self.type_index.get(def) {
            self.var_index.insert(name, VarSlot::Ref(index));
            return Ok(index);
        }
        let index = self.reserve_entry(def)?;
        self.var_index.insert(name, VarSlot::Ref(index));
        let payload = self.build_entry(def)?;
        self.entries[index as usize] = payload;
        Ok(index)
    }

    fn push_entry(&mut self, ty: &'a Type<'a>) -> Result<i64, Error> {
        let index = self.reserve_entry(ty)?;
        let payload = self.build_entry(ty)?;
        self.entries[index as usize] = payload;
        Ok(index)
    }

    /// Assigns the next table index to `ty` with an empty placeholder
    /// payload; the payload is filled in after its references are walked.
    fn reserve_entry(&mut self, ty: &'a Type<'a>) -> Result<i64, Error> {
        if self.entries.len() >= MAX_TYPE_TABLE_ENTRIES {
            return Err(Error::LengthExceedsLimit {
                field: "type table",
                len: self.entries.len() + 1,
                max: MAX_TYPE_TABLE_ENTRIES,
            });
        }
        let index = self.entries.len() as i64;
        self.entries.push(Vec::new());
        self.type_index.insert(ty, index);
        Ok(index)
    }

    fn build_entry(&mut self, ty: &'a Type<'a>) -> Result<Vec<u8>, Error> {
        let mut w = Writer::new();
        match *ty {
            Type::Opt(inner) => {
                w.write_sleb128(Opcode::Opt as i64);
                let r = self.type_ref(inner)?;
                w.write_sleb128(r);
            }
            Type::Vec(inner) => {
                w.write_sleb128(Opcode::Vec as i64);
                let r = self.type_ref(inner)?;
                w.write_sleb128(r);
            }
            Type::Record(fields) => {
                w.write_sleb128(Opcode::Record as i64);
                self.write_fields(&mut w, fields, "record fields")?;
            }
            Type::Variant(fields) => {
                w.write_sleb128(Opcode::Variant as i64);
                self.write_fields(&mut w, fields, "variant fields")?;
            }
            Type::Func(sig) => {
                w.write_sleb128(Opcode::Func as i64);
                self.write_func_sig(&mut w, sig)?;
            }
            Type::Service(methods) => {
                w.write_sleb128(Opcode::Service as i64);
                if methods.len() > MAX_METHODS {
                    return Err(Error::LengthExceedsLimit {
                        field: "service methods",
                        len: methods.len(),
                        max: MAX_METHODS,
                    });
                }
                w.write_leb128(methods.len() as u64);
                for m in methods {
                    w.write_text(m.name);
                    let r = self.type_ref(m.ty)?;
                    w.write_sleb128(r);
                }
            }
            // Primitives and variables are filtered out by type_ref.
            _ => unreachable!("primitives and type variables never enter the type table"),
        }
        Ok(w.into_bytes())
    }

    fn write_fields(
        &mut self,
        w: &mut Writer,
        fields: &'a [Field<'a>],
        what: &'static str,
    ) -> Result<(), Error> {
        if fields.len() > MAX_FIELDS {
            return Err(Error::LengthExceedsLimit {
                field: what,
                len: fields.len(),
                max: MAX_FIELDS,
            });
        }
        w.write_leb128(fields.len() as u64);
        for f in fields {
            w.write_leb128(u64::from(f.label.hash()));
            let r = self.type_ref(f.ty)?;
            w.write_sleb128(r);
        }
        Ok(())
    }

    fn write_func_sig(&mut self, w: &mut Writer, sig: &'a FuncSig<'a>) -> Result<(), Error> {
        for (list, what) in [(sig.args, "func args"), (sig.rets, "func rets")] {
            if list.len() > MAX_FUNC_PARAMS {
                return Err(Error::LengthExceedsLimit {
                    field: what,
                    len: list.len(),
                    max: MAX_FUNC_PARAMS,
                });
            }
            w.write_leb128(list.len() as u64);
            for ty in list {
                let r = self.type_ref(ty)?;
                w.write_sleb128(r);
            }
        }
        if sig.modes.len() > MAX_FUNC_MODES {
            return Err(Error::LengthExceedsLimit {
                field: "func modes",
                len: sig.modes.len(),
                max: MAX_FUNC_MODES,
            });
        }
        w.write_leb128(sig.modes.len() as u64);
        for mode in sig.modes {
            w.write_byte(*mode as u8);
        }
        Ok(())
    }

    /// Writes the table length followed by every entry.
    pub fn write_table(&self, w: &mut Writer) {
        w.write_leb128(self.entries.len() as u64);
        for entry in &self.entries {
            w.write_bytes(entry);
        }
    }
}

// =============================================================================
// DECODING
// =============================================================================

/// One table entry as read off the wire, with unresolved integer
/// references.
#[derive(Debug)]
enum RawEntry<'a> {
    Opt(i64),
    Vec(i64),
    Record(Vec<(u32, i64)>),
    Variant(Vec<(u32, i64)>),
    Func {
        args: Vec<i64>,
        rets: Vec<i64>,
        modes: Vec<FuncMode>,
    },
    Service(Vec<(&'a str, i64)>),
}

/// The parsed type table of one message.
///
/// Cross-entry references are materialized as `Type::Var("tableN")` bound
/// in the table's own environment, reconstructing recursive shapes without
/// expansion.
#[derive(Debug)]
pub(crate) struct TypeTable<'a> {
    types: Vec<&'a Type<'a>>,
    env: TypeEnv<'a>,
}

impl<'a> TypeTable<'a> {
    /// Parses the type table from the reader, which must be positioned
    /// just past the magic bytes.
    pub fn parse(reader: &mut Reader<'a>, arena: &'a Arena) -> Result<TypeTable<'a>, Error> {
        let count = reader.read_leb128("type table length")? as usize;
        if count > MAX_TYPE_TABLE_ENTRIES {
            return Err(Error::LengthExceedsLimit {
                field: "type table",
                len: count,
                max: MAX_TYPE_TABLE_ENTRIES,
            });
        }

        // Pass 1: raw entries with bounds-checked references.
        let mut raw = Vec::with_capacity(count.min(reader.remaining_len() + 1));
        for index in 0..count {
            raw.push(RawEntry::parse(reader, count, index)?);
        }

        // Service methods must point at function entries.
        for entry in &raw {
            if let RawEntry::Service(methods) = entry {
                for (name, r) in methods {
                    let target = usize::try_from(*r).ok().map(|i| &raw[i]);
                    if !matches!(target, Some(RawEntry::Func { .. })) {
                        return Err(Error::MethodNotFunction {
                            name: (*name).to_string(),
                        });
                    }
                }
            }
        }

        // Pass 2: materialize arena-allocated types; references become
        // named back-references into this table's environment.
        let mut names = Vec::with_capacity(count);
        for index in 0..count {
            names.push(arena.try_alloc_str(&format!("table{index}"), "table entry name")?);
        }
        let mut types = Vec::with_capacity(count);
        for entry in &raw {
            types.push(entry.materialize(&names, arena)?);
        }
        let mut env = TypeEnv::new();
        for (&name, &ty) in names.iter().zip(types.iter()) {
            env.insert(name, ty)?;
        }

        Ok(TypeTable { types, env })
    }

    /// Resolves an argument type reference: a negative primitive opcode or
    /// a table index.
    pub fn lookup(&self, reference: i64) -> Result<&'a Type<'a>, Error> {
        if reference < 0 {
            return primitive_type(reference).ok_or(Error::UnknownOpcode { opcode: reference });
        }
        usize::try_from(reference)
            .ok()
            .and_then(|i| self.types.get(i).copied())
            .ok_or(Error::TableIndexOutOfBounds {
                reference,
                size: self.types.len(),
            })
    }

    /// Returns the table's type-variable environment.
    pub fn env(&self) -> &TypeEnv<'a> {
        &self.env
    }

    /// Returns the materialized table entries.
    #[cfg(test)]
    pub fn types(&self) -> &[&'a Type<'a>] {
        &self.types
    }
}

impl<'a> RawEntry<'a> {
    fn parse(reader: &mut Reader<'a>, table_len: usize, index: usize) -> Result<Self, Error> {
        let opcode = reader.read_sleb128("type opcode")?;
        match opcode {
            op if op == Opcode::Opt as i64 => {
                Ok(RawEntry::Opt(read_type_ref(reader, table_len)?))
            }
            op if op == Opcode::Vec as i64 => {
                Ok(RawEntry::Vec(read_type_ref(reader, table_len)?))
            }
            op if op == Opcode::Record as i64 => {
                Ok(RawEntry::Record(read_raw_fields(reader, table_len, "record")?))
            }
            op if op == Opcode::Variant as i64 => {
                Ok(RawEntry::Variant(read_raw_fields(reader, table_len, "variant")?))
            }
            op if op == Opcode::Func as i64 => {
                let args = read_ref_list(reader, table_len, "func args")?;
                let rets = read_ref_list(reader, table_len, "func rets")?;
                let mode_count = reader.read_leb128("func mode count")? as usize;
                if mode_count > MAX_FUNC_MODES {
                    return Err(Error::LengthExceedsLimit {
                        field: "func modes",
                        len: mode_count,
                        max: MAX_FUNC_MODES,
                    });
                }
                let mut modes = Vec::with_capacity(mode_count);
                for _ in 0..mode_count {
                    let byte = reader.read_byte("func mode")?;
                    modes.push(FuncMode::from_u8(byte).ok_or(Error::UnknownFuncMode { mode: byte })?);
                }
                Ok(RawEntry::Func { args, rets, modes })
            }
            op if op == Opcode::Service as i64 => {
                let count = reader.read_leb128("service method count")? as usize;
                if count > MAX_METHODS {
                    return Err(Error::LengthExceedsLimit {
                        field: "service methods",
                        len: count,
                        max: MAX_METHODS,
                    });
                }
                let mut methods = Vec::with_capacity(count.min(reader.remaining_len() + 1));
                let mut prev: Option<&str> = None;
                for _ in 0..count {
                    let name = reader.read_text(MAX_METHOD_NAME_LEN, "method name")?;
                    if let Some(p) = prev {
                        if p == name {
                            return Err(Error::DuplicateMethod {
                                name: name.to_string(),
                            });
                        }
                        if p > name {
                            return Err(Error::MethodsNotSorted);
                        }
                    }
                    prev = Some(name);
                    methods.push((name, read_type_ref(reader, table_len)?));
                }
                Ok(RawEntry::Service(methods))
            }
            op if primitive_type(op).is_some() => {
                Err(Error::PrimitiveInTable { index, opcode: op })
            }
            op => Err(Error::UnknownOpcode { opcode: op }),
        }
    }

    fn materialize(
        &self,
        names: &[&'a str],
        arena: &'a Arena,
    ) -> Result<&'a Type<'a>, Error> {
        match self {
            RawEntry::Opt(r) => {
                let inner = ref_to_type(*r, names, arena)?;
                Ok(arena.try_alloc(Type::Opt(inner), "opt type")?)
            }
            RawEntry::Vec(r) => {
                let inner = ref_to_type(*r, names, arena)?;
                Ok(arena.try_alloc(Type::Vec(inner), "vec type")?)
            }
            RawEntry::Record(fields) => {
                let fields = materialize_fields(fields, names, arena)?;
                Ok(arena.try_alloc(Type::Record(fields), "record type")?)
            }
            RawEntry::Variant(fields) => {
                let fields = materialize_fields(fields, names, arena)?;
                Ok(arena.try_alloc(Type::Variant(fields), "variant type")?)
            }
            RawEntry::Func { args, rets, modes } => {
                let mut arg_types = Vec::with_capacity(args.len());
                for r in args {
                    arg_types.push(ref_to_type(*r, names, arena)?);
                }
                let mut ret_types = Vec::with_capacity(rets.len());
                for r in rets {
                    ret_types.push(ref_to_type(*r, names, arena)?);
                }
                let sig = FuncSig {
                    args: arena.try_alloc_slice(&arg_types, "func args")?,
                    rets: arena.try_alloc_slice(&ret_types, "func rets")?,
                    modes: arena.try_alloc_slice(modes, "func modes")?,
                };
                let sig = arena.try_alloc(sig, "func signature")?;
                Ok(arena.try_alloc(Type::Func(sig), "func type")?)
            }
            RawEntry::Service(raw_methods) => {
                let mut methods = Vec::with_capacity(raw_methods.len());
                for &(name, r) in raw_methods {
                    methods.push(Method {
                        name,
                        ty: ref_to_type(r, names, arena)?,
                    });
                }
                let methods = arena.try_alloc_slice(&methods, "service methods")?;
                Ok(arena.try_alloc(Type::Service(methods), "service type")?)
            }
        }
    }
}

fn read_type_ref(reader: &mut Reader<'_>, table_len: usize) -> Result<i64, Error> {
    let r = reader.read_sleb128("type reference")?;
    if r < 0 {
        if primitive_type(r).is_none() {
            return Err(Error::UnknownOpcode { opcode: r });
        }
    } else if r as u64 >= table_len as u64 {
        return Err(Error::TableIndexOutOfBounds {
            reference: r,
            size: table_len,
        });
    }
    Ok(r)
}

fn read_ref_list(
    reader: &mut Reader<'_>,
    table_len: usize,
    field: &'static str,
) -> Result<Vec<i64>, Error> {
    let count = reader.read_leb128(field)? as usize;
    if count > MAX_FUNC_PARAMS {
        return Err(Error::LengthExceedsLimit {
            field,
            len: count,
            max: MAX_FUNC_PARAMS,
        });
    }
    let mut refs = Vec::with_capacity(count);
    for _ in 0..count {
        refs.push(read_type_ref(reader, table_len)?);
    }
    Ok(refs)
}

fn read_raw_fields(
    reader: &mut Reader<'_>,
    table_len: usize,
    container: &'static str,
) -> Result<Vec<(u32, i64)>, Error> {
    let count = reader.read_leb128("field count")? as usize;
    if count > MAX_FIELDS {
        return Err(Error::LengthExceedsLimit {
            field: "fields",
            len: count,
            max: MAX_FIELDS,
        });
    }
    let mut fields = Vec::with_capacity(count.min(reader.remaining_len() + 1));
    let mut prev: Option<u32> = None;
    for _ in 0..count {
        let hash = reader.read_leb128("field hash")?;
        let hash = u32::try_from(hash).map_err(|_| Error::VarintOverflow { target: "u32" })?;
        if let Some(p) = prev {
            if p == hash {
                return Err(Error::DuplicateFieldHash { container, hash });
            }
            if p > hash {
                return Err(Error::FieldsNotSorted { container });
            }
        }
        prev = Some(hash);
        fields.push((hash, read_type_ref(reader, table_len)?));
    }
    Ok(fields)
}

fn ref_to_type<'a>(
    r: i64,
    names: &[&'a str],
    arena: &'a Arena,
) -> Result<&'a Type<'a>, Error> {
    if r < 0 {
        return primitive_type(r).ok_or(Error::UnknownOpcode { opcode: r });
    }
    // Bounds were checked during pass 1.
    let name = names[r as usize];
    Ok(arena.try_alloc(Type::Var(name), "table back-reference")?)
}

fn materialize_fields<'a>(
    raw: &[(u32, i64)],
    names: &[&'a str],
    arena: &'a Arena,
) -> Result<&'a [Field<'a>], Error> {
    let mut fields = Vec::with_capacity(raw.len());
    for &(hash, r) in raw {
        fields.push(Field {
            label: Label::Id(hash),
            ty: ref_to_type(r, names, arena)?,
        });
    }
    Ok(arena.try_alloc_slice(&fields, "field list")?)
}
