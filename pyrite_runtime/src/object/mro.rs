//! C3 method resolution order.
//!
//! `compute_mro` performs the C3 merge over the bases' own linearizations
//! plus the local precedence list. The result is monotonic: if a class's MRO
//! orders A before B, every subclass preserves that order (or fails to
//! linearize).
//!
//! `mro_internal` is the installation path used by the builder and by bases
//! reassignment. It honors a custom metaclass linearization hook, validates
//! the hook's output, and detects preemption: computing one type's MRO can
//! run managed code that recomputes another (or the same) type's MRO
//! mid-flight, in which case the first writer wins and the in-flight result
//! is discarded without error.

use crate::object::runtime::TypeRuntime;
use crate::object::type_obj::{solid_base, Mro, TypeId, TypeObject};
use crate::object::value::Value;
use pyrite_core::{intern, ObjectError};
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Compute the C3 linearization of `ty` from its current bases.
///
/// Single-base types reuse the base's MRO with self prepended (no merge).
/// Duplicate bases are a hard error. On an unlinearizable hierarchy the
/// error names *every* class that could not be ordered.
pub fn compute_mro(ty: &Arc<TypeObject>) -> Result<Mro, ObjectError> {
    let bases = ty.bases();

    let mut seen = FxHashSet::default();
    for base in bases.iter() {
        if !seen.insert(base.id()) {
            return Err(ObjectError::InvalidBasesSpec(format!(
                "duplicate base class '{}'",
                base.name()
            )));
        }
    }

    let mut result = Mro::new();
    result.push(ty.clone());

    match bases.len() {
        0 => Ok(result),
        1 => {
            // Fast path: extension of the single base's linearization.
            for member in bases[0].mro().iter() {
                result.push(member.clone());
            }
            Ok(result)
        }
        _ => {
            let mut sequences: Vec<Vec<Arc<TypeObject>>> = bases
                .iter()
                .map(|b| b.mro().iter().cloned().collect())
                .collect();
            sequences.push(bases.iter().cloned().collect());
            merge(&mut sequences, &mut result)?;
            Ok(result)
        }
    }
}

/// C3 merge: repeatedly take the head of the first sequence whose head
/// appears in no other sequence's tail.
fn merge(sequences: &mut Vec<Vec<Arc<TypeObject>>>, out: &mut Mro) -> Result<(), ObjectError> {
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Ok(());
        }

        let winner = sequences
            .iter()
            .map(|s| &s[0])
            .find(|head| {
                !sequences
                    .iter()
                    .any(|s| s.iter().skip(1).any(|t| t.id() == head.id()))
            })
            .cloned();

        match winner {
            Some(head) => {
                out.push(head.clone());
                for seq in sequences.iter_mut() {
                    if seq[0].id() == head.id() {
                        seq.remove(0);
                    }
                }
            }
            None => {
                // Report every class still blocking the order, in first
                // appearance order, deduplicated.
                let mut reported = FxHashSet::default();
                let mut names = Vec::new();
                for seq in sequences.iter() {
                    let head = &seq[0];
                    if reported.insert(head.id()) {
                        names.push(head.name().to_string());
                    }
                }
                return Err(ObjectError::hierarchy(
                    "cannot create a consistent method resolution order (MRO) for bases",
                    names,
                ));
            }
        }
    }
}

/// Recompute and install `ty`'s MRO.
///
/// Consults the metaclass's custom linearization hook if one exists; the
/// hook's result is validated and disables the attribute cache for the type.
/// If managed code run by the hook already installed a newer MRO, the
/// in-flight result is dropped (first writer wins).
pub fn mro_internal(rt: &TypeRuntime, ty: &Arc<TypeObject>) -> Result<(), ObjectError> {
    let before = ty.mro();

    let new_mro = match custom_linearization(rt, ty)? {
        Some(seq) => {
            validate_custom_mro(ty, &seq)?;
            ty.disable_attribute_cache();
            Arc::new(seq)
        }
        None => Arc::new(compute_mro(ty)?),
    };

    // Preempted: another recomputation won while managed code ran.
    if !Arc::ptr_eq(&before, &ty.mro()) {
        pyrite_core::obj::release(new_mro);
        return Ok(());
    }

    ty.set_mro(new_mro);
    Ok(())
}

/// Invoke the metaclass's `mro` hook, if the metaclass overrides it.
fn custom_linearization(
    rt: &TypeRuntime,
    ty: &Arc<TypeObject>,
) -> Result<Option<Mro>, ObjectError> {
    if ty.metaclass() == TypeId::TYPE {
        return Ok(None);
    }
    let meta = match rt.get_type(ty.metaclass()) {
        Some(meta) => meta,
        None => return Ok(None),
    };
    let hook = match rt.find_in_mro(&meta, &intern("mro")) {
        Some(Value::Function(f)) => f,
        _ => return Ok(None),
    };

    let result = hook.call(rt, &[Value::Type(ty.id())])?;
    let items = match result {
        Value::Tuple(items) => items,
        _ => {
            return Err(ObjectError::InvalidBasesSpec(
                "custom mro() must return a sequence of types".into(),
            ))
        }
    };
    if items.is_empty() {
        return Err(ObjectError::InvalidBasesSpec(
            "custom mro() returned an empty sequence".into(),
        ));
    }

    let mut mro = Mro::new();
    for item in items.iter() {
        match item {
            Value::Type(id) => match rt.get_type(*id) {
                Some(member) => mro.push(member),
                None => {
                    return Err(ObjectError::InvalidBasesSpec(
                        "custom mro() returned a dead type".into(),
                    ))
                }
            },
            _ => {
                return Err(ObjectError::InvalidBasesSpec(
                    "custom mro() must contain only types".into(),
                ))
            }
        }
    }
    Ok(Some(mro))
}

/// Validate a metaclass-supplied linearization: self first, every direct
/// base present, and every base's solid base still reachable.
fn validate_custom_mro(ty: &Arc<TypeObject>, mro: &Mro) -> Result<(), ObjectError> {
    if mro[0].id() != ty.id() {
        return Err(ObjectError::InvalidBasesSpec(
            "custom mro() must start with the type itself".into(),
        ));
    }
    let ids: FxHashSet<TypeId> = mro.iter().map(|t| t.id()).collect();
    let mut missing = Vec::new();
    for base in ty.bases().iter() {
        if !ids.contains(&base.id()) {
            missing.push(base.name().to_string());
            continue;
        }
        let solid = solid_base(base);
        if !ids.contains(&solid.id()) {
            missing.push(solid.name().to_string());
        }
    }
    if !missing.is_empty() {
        return Err(ObjectError::hierarchy(
            "custom mro() drops required bases",
            missing,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::type_obj::{Bases, Layout, TypeFlags};

    fn make(name: &str, id: u32, bases: &[&Arc<TypeObject>]) -> Arc<TypeObject> {
        let base_vec: Bases = bases.iter().map(|b| Arc::clone(b)).collect();
        let ty = Arc::new(TypeObject::new(
            intern(name),
            TypeId::from_raw(id),
            TypeId::TYPE,
            Layout::OBJECT,
            TypeFlags::BASETYPE,
            bases.first().map(|b| Arc::clone(b)),
            base_vec,
            None,
        ));
        let mro = compute_mro(&ty).unwrap();
        ty.set_mro(Arc::new(mro));
        ty
    }

    fn names(mro: &Mro) -> Vec<String> {
        mro.iter().map(|t| t.name().to_string()).collect()
    }

    #[test]
    fn test_no_bases() {
        let object = make("object", 1, &[]);
        assert_eq!(names(&object.mro()), ["object"]);
    }

    #[test]
    fn test_single_base_fast_path() {
        let object = make("object", 1, &[]);
        let a = make("A", 300, &[&object]);
        assert_eq!(names(&a.mro()), ["A", "object"]);
    }

    #[test]
    fn test_local_precedence() {
        // class C(B1, B2): B1 must come before B2.
        let object = make("object", 1, &[]);
        let b1 = make("B1", 301, &[&object]);
        let b2 = make("B2", 302, &[&object]);
        let c = make("C", 303, &[&b1, &b2]);
        assert_eq!(names(&c.mro()), ["C", "B1", "B2", "object"]);
    }

    #[test]
    fn test_diamond() {
        // A; B(A); C(A); D(B, C) -> [D, B, C, A, object]
        let object = make("object", 1, &[]);
        let a = make("A", 304, &[&object]);
        let b = make("B", 305, &[&a]);
        let c = make("C", 306, &[&a]);
        let d = make("D", 307, &[&b, &c]);
        assert_eq!(names(&d.mro()), ["D", "B", "C", "A", "object"]);
    }

    #[test]
    fn test_monotonicity_preserved_in_subclass() {
        let object = make("object", 1, &[]);
        let a = make("A", 308, &[&object]);
        let b = make("B", 309, &[&a]);
        let c = make("C", 310, &[&a]);
        let d = make("D", 311, &[&b, &c]);
        let e = make("E", 312, &[&d]);

        let d_mro = d.mro();
        let e_mro = e.mro();
        let pos = |mro: &Mro, name: &str| {
            mro.iter()
                .position(|t| t.name().as_str() == name)
                .unwrap()
        };
        // D orders B before C; E must too.
        assert!(pos(&d_mro, "B") < pos(&d_mro, "C"));
        assert!(pos(&e_mro, "B") < pos(&e_mro, "C"));
    }

    #[test]
    fn test_unorderable_hierarchy_reports_all_classes() {
        // Classic conflict: order disagreement between X(A, B) and Y(B, A).
        let object = make("object", 1, &[]);
        let a = make("A", 313, &[&object]);
        let b = make("B", 314, &[&a]);
        // C(A, B): A precedes B locally, but B's MRO needs B before A.
        let base_vec: Bases = [a.clone(), b.clone()].into_iter().collect();
        let c = Arc::new(TypeObject::new(
            intern("C"),
            TypeId::from_raw(315),
            TypeId::TYPE,
            Layout::OBJECT,
            TypeFlags::BASETYPE,
            Some(a.clone()),
            base_vec,
            None,
        ));
        let err = compute_mro(&c).unwrap_err();
        match err {
            ObjectError::InconsistentHierarchy { classes, .. } => {
                assert!(classes.contains(&"A".to_string()));
                assert!(classes.contains(&"B".to_string()));
            }
            other => panic!("expected InconsistentHierarchy, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_base_rejected() {
        let object = make("object", 1, &[]);
        let a = make("A", 316, &[&object]);
        let base_vec: Bases = [a.clone(), a.clone()].into_iter().collect();
        let c = Arc::new(TypeObject::new(
            intern("C"),
            TypeId::from_raw(317),
            TypeId::TYPE,
            Layout::OBJECT,
            TypeFlags::BASETYPE,
            Some(a.clone()),
            base_vec,
            None,
        ));
        assert!(matches!(
            compute_mro(&c),
            Err(ObjectError::InvalidBasesSpec(_))
        ));
    }

    #[test]
    fn test_every_direct_base_appears() {
        let object = make("object", 1, &[]);
        let a = make("A", 318, &[&object]);
        let b = make("B", 319, &[&object]);
        let c = make("C", 320, &[&a, &b]);
        let mro = c.mro();
        for base in c.bases().iter() {
            assert!(mro.iter().any(|t| t.id() == base.id()));
        }
        assert_eq!(mro[0].id(), c.id());
    }
}
