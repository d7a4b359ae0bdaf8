//! Schema types: the closed `Type` sum, function/service signatures, and
//! the type-variable environment used for recursive schemas.
//!
//! All composite types hold arena-allocated nodes; a schema is immutable
//! once constructed and lives as long as its arena. Recursion is expressed
//! with [`Type::Var`] — a named back-reference resolved against a
//! [`TypeEnv`], never by eager expansion.

use rustc_hash::FxHashMap;

use crate::arena::Arena;
use crate::error::Error;
use crate::model::label::{check_canonical_fields, sort_fields_by_hash, Field, Label};

/// A schema type.
///
/// Record and variant field lists are canonical: sorted ascending by label
/// hash with no duplicates. The bare enum does not enforce this — the
/// sorted constructors ([`Type::record`], [`Type::variant`]) and
/// [`crate::validate::check_type`] do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type<'a> {
    Null,
    Bool,
    /// Unbounded natural (carried as u64).
    Nat,
    Nat8,
    Nat16,
    Nat32,
    Nat64,
    /// Unbounded integer (carried as i64).
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    /// Accepts any value; carries none.
    Reserved,
    /// Has no values at all.
    Empty,
    /// Opaque identity byte-string.
    Principal,
    Opt(&'a Type<'a>),
    Vec(&'a Type<'a>),
    Record(&'a [Field<'a>]),
    Variant(&'a [Field<'a>]),
    Func(&'a FuncSig<'a>),
    Service(&'a [Method<'a>]),
    /// Named back-reference for recursive schemas; resolved against a
    /// [`TypeEnv`], carries no payload of its own.
    Var(&'a str),
}

/// A function signature: argument types, result types, annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncSig<'a> {
    pub args: &'a [&'a Type<'a>],
    pub rets: &'a [&'a Type<'a>],
    pub modes: &'a [FuncMode],
}

/// Function annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FuncMode {
    Query = 1,
    Oneway = 2,
    CompositeQuery = 3,
}

impl FuncMode {
    /// Creates a FuncMode from its wire representation.
    pub fn from_u8(v: u8) -> Option<FuncMode> {
        match v {
            1 => Some(FuncMode::Query),
            2 => Some(FuncMode::Oneway),
            3 => Some(FuncMode::CompositeQuery),
            _ => None,
        }
    }
}

/// One method of a service signature.
///
/// Method identity is the literal name (methods are API surface, not
/// record fields); `ty` must resolve to a [`Type::Func`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Method<'a> {
    pub name: &'a str,
    pub ty: &'a Type<'a>,
}

impl<'a> Type<'a> {
    /// Returns a short name for this type's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Type::Null => "null",
            Type::Bool => "bool",
            Type::Nat => "nat",
            Type::Nat8 => "nat8",
            Type::Nat16 => "nat16",
            Type::Nat32 => "nat32",
            Type::Nat64 => "nat64",
            Type::Int => "int",
            Type::Int8 => "int8",
            Type::Int16 => "int16",
            Type::Int32 => "int32",
            Type::Int64 => "int64",
            Type::Float32 => "float32",
            Type::Float64 => "float64",
            Type::Text => "text",
            Type::Reserved => "reserved",
            Type::Empty => "empty",
            Type::Principal => "principal",
            Type::Opt(_) => "opt",
            Type::Vec(_) => "vec",
            Type::Record(_) => "record",
            Type::Variant(_) => "variant",
            Type::Func(_) => "func",
            Type::Service(_) => "service",
            Type::Var(_) => "var",
        }
    }

    /// Returns true for primitive kinds, which are inlined at use sites and
    /// never entered into a type table.
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            Type::Opt(_)
                | Type::Vec(_)
                | Type::Record(_)
                | Type::Variant(_)
                | Type::Func(_)
                | Type::Service(_)
                | Type::Var(_)
        )
    }

    /// Allocates an optional type.
    pub fn opt(arena: &'a Arena, inner: &'a Type<'a>) -> Result<&'a Type<'a>, Error> {
        Ok(arena.try_alloc(Type::Opt(inner), "opt type")?)
    }

    /// Allocates a vector type.
    pub fn vec(arena: &'a Arena, inner: &'a Type<'a>) -> Result<&'a Type<'a>, Error> {
        Ok(arena.try_alloc(Type::Vec(inner), "vec type")?)
    }

    /// Allocates a record type with fields canonicalized by label hash.
    ///
    /// Fields may be supplied in any order; a duplicate hash is rejected.
    pub fn record(
        arena: &'a Arena,
        fields: &[(Label<'a>, &'a Type<'a>)],
    ) -> Result<&'a Type<'a>, Error> {
        let fields = canonical_fields(arena, fields, "record")?;
        Ok(arena.try_alloc(Type::Record(fields), "record type")?)
    }

    /// Allocates a variant type with fields canonicalized by label hash.
    pub fn variant(
        arena: &'a Arena,
        fields: &[(Label<'a>, &'a Type<'a>)],
    ) -> Result<&'a Type<'a>, Error> {
        let fields = canonical_fields(arena, fields, "variant")?;
        Ok(arena.try_alloc(Type::Variant(fields), "variant type")?)
    }

    /// Allocates a function signature type.
    pub fn func(
        arena: &'a Arena,
        args: &[&'a Type<'a>],
        rets: &[&'a Type<'a>],
        modes: &[FuncMode],
    ) -> Result<&'a Type<'a>, Error> {
        let sig = FuncSig {
            args: arena.try_alloc_slice(args, "func args")?,
            rets: arena.try_alloc_slice(rets, "func rets")?,
            modes: arena.try_alloc_slice(modes, "func modes")?,
        };
        let sig = arena.try_alloc(sig, "func signature")?;
        Ok(arena.try_alloc(Type::Func(sig), "func type")?)
    }

    /// Allocates a service signature type with methods sorted by name.
    pub fn service(
        arena: &'a Arena,
        methods: &[(&'a str, &'a Type<'a>)],
    ) -> Result<&'a Type<'a>, Error> {
        let mut ms: Vec<Method<'a>> = methods
            .iter()
            .map(|&(name, ty)| Method { name, ty })
            .collect();
        ms.sort_by(|a, b| a.name.cmp(b.name));
        for pair in ms.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(Error::DuplicateMethod {
                    name: pair[1].name.to_string(),
                });
            }
        }
        let ms = arena.try_alloc_slice(&ms, "service methods")?;
        Ok(arena.try_alloc(Type::Service(ms), "service type")?)
    }

    /// Allocates a named type variable.
    pub fn var(arena: &'a Arena, name: &str) -> Result<&'a Type<'a>, Error> {
        let name = arena.try_alloc_str(name, "type variable name")?;
        Ok(arena.try_alloc(Type::Var(name), "type variable")?)
    }
}

fn canonical_fields<'a>(
    arena: &'a Arena,
    fields: &[(Label<'a>, &'a Type<'a>)],
    container: &'static str,
) -> Result<&'a [Field<'a>], Error> {
    let mut fs: Vec<Field<'a>> = fields
        .iter()
        .map(|&(label, ty)| Field { label, ty })
        .collect();
    sort_fields_by_hash(&mut fs);
    check_canonical_fields(&fs, container)?;
    Ok(arena.try_alloc_slice(&fs, "field list")?)
}

/// Named type bindings for recursive schemas.
///
/// Always passed explicitly — there is no process-wide registry. The
/// encoder resolves caller [`Type::Var`]s here; the decoder builds its own
/// environment from the parsed type table.
#[derive(Debug, Default, Clone)]
pub struct TypeEnv<'a> {
    names: Vec<&'a str>,
    defs: FxHashMap<&'a str, &'a Type<'a>>,
}

impl<'a> TypeEnv<'a> {
    /// Creates an empty environment.
    pub fn new() -> TypeEnv<'a> {
        TypeEnv::default()
    }

    /// Binds `name` to a definition. Duplicate names are rejected.
    pub fn insert(&mut self, name: &'a str, ty: &'a Type<'a>) -> Result<(), Error> {
        if self.defs.contains_key(name) {
            return Err(Error::DuplicateTypeName {
                name: name.to_string(),
            });
        }
        self.defs.insert(name, ty);
        self.names.push(name);
        Ok(())
    }

    /// Looks up a binding.
    pub fn get(&self, name: &str) -> Option<&'a Type<'a>> {
        self.defs.get(name).copied()
    }

    /// Returns the number of bindings.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the environment holds no bindings.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the bound names in insertion order.
    pub fn names(&self) -> &[&'a str] {
        &self.names
    }

    /// Follows a chain of type variables down to a non-variable type.
    ///
    /// Returns the input unchanged if it is not a variable. An unbound name
    /// or a pure variable cycle (one that never reaches a composite) is an
    /// error.
    pub fn resolve(&self, ty: &'a Type<'a>) -> Result<&'a Type<'a>, Error> {
        let mut current = ty;
        let mut hops = 0usize;
        while let Type::Var(name) = *current {
            if hops > self.defs.len() {
                return Err(Error::TypeVarCycle {
                    name: name.to_string(),
                });
            }
            current = self.get(name).ok_or_else(|| Error::UnboundTypeVar {
                name: name.to_string(),
            })?;
            hops += 1;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::label::label_hash;

    #[test]
    fn test_record_constructor_sorts_fields() {
        let arena = Arena::new();
        let ty = Type::record(
            &arena,
            &[
                (Label::Named("city"), &Type::Text),
                (Label::Named("zip"), &Type::Nat),
                (Label::Named("street"), &Type::Text),
            ],
        )
        .unwrap();
        match ty {
            Type::Record(fields) => {
                let hashes: Vec<u32> = fields.iter().map(|f| f.label.hash()).collect();
                assert_eq!(
                    hashes,
                    vec![label_hash("zip"), label_hash("street"), label_hash("city")]
                );
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let arena = Arena::new();
        let result = Type::record(
            &arena,
            &[
                (Label::Named("a"), &Type::Nat),
                (Label::Named("a"), &Type::Text),
            ],
        );
        assert!(matches!(result, Err(Error::DuplicateFieldHash { .. })));
    }

    #[test]
    fn test_id_colliding_with_name_rejected() {
        let arena = Arena::new();
        // A raw id equal to a name's hash is the same label on the wire.
        let result = Type::variant(
            &arena,
            &[
                (Label::Id(label_hash("name")), &Type::Nat),
                (Label::Named("name"), &Type::Text),
            ],
        );
        assert!(matches!(result, Err(Error::DuplicateFieldHash { .. })));
    }

    #[test]
    fn test_service_methods_sorted_and_unique() {
        let arena = Arena::new();
        let f = Type::func(&arena, &[], &[], &[]).unwrap();
        let ty = Type::service(&arena, &[("zeta", f), ("alpha", f)]).unwrap();
        match ty {
            Type::Service(methods) => {
                assert_eq!(methods[0].name, "alpha");
                assert_eq!(methods[1].name, "zeta");
            }
            other => panic!("expected service, got {other:?}"),
        }
        assert!(matches!(
            Type::service(&arena, &[("m", f), ("m", f)]),
            Err(Error::DuplicateMethod { .. })
        ));
    }

    #[test]
    fn test_env_resolve() {
        let arena = Arena::new();
        let mut env = TypeEnv::new();
        let inner = Type::vec(&arena, &Type::Nat).unwrap();
        env.insert("bytes", inner).unwrap();
        let var = Type::var(&arena, "bytes").unwrap();
        assert_eq!(env.resolve(var).unwrap(), inner);
        assert_eq!(env.resolve(&Type::Bool).unwrap(), &Type::Bool);
    }

    #[test]
    fn test_env_rejects_unbound_and_cycles() {
        let arena = Arena::new();
        let mut env = TypeEnv::new();
        let a = Type::var(&arena, "b").unwrap();
        let b = Type::var(&arena, "a").unwrap();
        env.insert("a", a).unwrap();
        env.insert("b", b).unwrap();
        assert!(matches!(env.resolve(a), Err(Error::TypeVarCycle { .. })));

        let unbound = Type::var(&arena, "missing").unwrap();
        assert!(matches!(
            env.resolve(unbound),
            Err(Error::UnboundTypeVar { .. })
        ));
    }

    #[test]
    fn test_env_duplicate_name() {
        let mut env = TypeEnv::new();
        env.insert("t", &Type::Nat).unwrap();
        assert!(matches!(
            env.insert("t", &Type::Int),
            Err(Error::DuplicateTypeName { .. })
        ));
    }
}
