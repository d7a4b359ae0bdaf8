//! Schema well-formedness checks.
//!
//! Structural validation of wire input happens during decode; this module
//! checks caller-constructed schemas before they are encoded. The sorted
//! constructors already enforce canonical field order, but nothing stops a
//! caller from assembling the bare enums by hand, so the encoder runs
//! every argument type through [`check_type`] first.

use rustc_hash::FxHashSet;

use crate::error::Error;
use crate::model::label::check_canonical_fields;
use crate::model::types::{Type, TypeEnv};

/// Checks that a type (and everything reachable from it through `env`) is
/// well-formed: field lists canonical, type variables bound and free of
/// pure cycles, service methods sorted and function-typed.
pub fn check_type<'a>(env: &TypeEnv<'a>, ty: &'a Type<'a>) -> Result<(), Error> {
    let mut seen = FxHashSet::default();
    check_type_inner(env, ty, &mut seen)
}

fn check_type_inner<'a>(
    env: &TypeEnv<'a>,
    ty: &'a Type<'a>,
    seen: &mut FxHashSet<&'a str>,
) -> Result<(), Error> {
    match *ty {
        Type::Opt(inner) | Type::Vec(inner) => check_type_inner(env, inner, seen),

        Type::Record(fields) => {
            check_canonical_fields(fields, "record")?;
            for f in fields {
                check_type_inner(env, f.ty, seen)?;
            }
            Ok(())
        }
        Type::Variant(fields) => {
            check_canonical_fields(fields, "variant")?;
            for f in fields {
                check_type_inner(env, f.ty, seen)?;
            }
            Ok(())
        }

        Type::Func(sig) => {
            for &t in sig.args {
                check_type_inner(env, t, seen)?;
            }
            for &t in sig.rets {
                check_type_inner(env, t, seen)?;
            }
            Ok(())
        }

        Type::Service(methods) => {
            for pair in methods.windows(2) {
                if pair[0].name == pair[1].name {
                    return Err(Error::DuplicateMethod {
                        name: pair[1].name.to_string(),
                    });
                }
                if pair[0].name > pair[1].name {
                    return Err(Error::MethodsNotSorted);
                }
            }
            for m in methods {
                if !matches!(env.resolve(m.ty)?, Type::Func(_)) {
                    return Err(Error::MethodNotFunction {
                        name: m.name.to_string(),
                    });
                }
                check_type_inner(env, m.ty, seen)?;
            }
            Ok(())
        }

        Type::Var(name) => {
            // Unbound names and variable-only cycles surface here.
            let def = env.resolve(ty)?;
            if seen.insert(name) {
                check_type_inner(env, def, seen)
            } else {
                // Already being checked further up the walk: recursion.
                Ok(())
            }
        }

        // Primitives carry no structure.
        _ => Ok(()),
    }
}
