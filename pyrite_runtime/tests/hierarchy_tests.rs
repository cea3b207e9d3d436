//! Hierarchy construction, linearization, and bases reassignment.

use pyrite_core::ObjectError;
use pyrite_runtime::{
    ManagedFn, TypeBuilder, TypeId, TypeObject, TypeRuntime, Value,
};
use std::sync::Arc;

fn names(mro: &[Arc<TypeObject>]) -> Vec<String> {
    mro.iter().map(|t| t.name().to_string()).collect()
}

#[test]
fn test_single_inheritance_chain() {
    let rt = TypeRuntime::new();
    let a = TypeBuilder::new("A").build(&rt).unwrap();
    let b = TypeBuilder::new("B").base(a.clone()).build(&rt).unwrap();
    let c = TypeBuilder::new("C").base(b.clone()).build(&rt).unwrap();

    assert_eq!(names(&rt.get_mro(&c)), ["C", "B", "A", "object"]);
}

#[test]
fn test_diamond_linearization() {
    let rt = TypeRuntime::new();
    let a = TypeBuilder::new("A").build(&rt).unwrap();
    let b = TypeBuilder::new("B").base(a.clone()).build(&rt).unwrap();
    let c = TypeBuilder::new("C").base(a.clone()).build(&rt).unwrap();
    let d = TypeBuilder::new("D")
        .base(b.clone())
        .base(c.clone())
        .build(&rt)
        .unwrap();

    assert_eq!(names(&rt.get_mro(&d)), ["D", "B", "C", "A", "object"]);
}

#[test]
fn test_lookup_prefers_the_leftmost_base() {
    let rt = TypeRuntime::new();
    let b1 = TypeBuilder::new("B1")
        .namespace("f", Value::Int(1))
        .build(&rt)
        .unwrap();
    let b2 = TypeBuilder::new("B2")
        .namespace("f", Value::Int(2))
        .build(&rt)
        .unwrap();
    let c = TypeBuilder::new("C")
        .base(b1.clone())
        .base(b2.clone())
        .build(&rt)
        .unwrap();

    assert_eq!(names(&rt.get_mro(&c)), ["C", "B1", "B2", "object"]);
    // Both bases define "f"; linearization order decides which one wins.
    assert_eq!(
        rt.lookup(&c, &pyrite_core::intern("f")),
        Some(Value::Int(1))
    );
    // B2's own definition is untouched.
    assert_eq!(
        rt.lookup(&b2, &pyrite_core::intern("f")),
        Some(Value::Int(2))
    );
}

#[test]
fn test_mro_structural_invariants() {
    let rt = TypeRuntime::new();
    let a = TypeBuilder::new("A").build(&rt).unwrap();
    let b = TypeBuilder::new("B").build(&rt).unwrap();
    let c = TypeBuilder::new("C")
        .base(a.clone())
        .base(b.clone())
        .build(&rt)
        .unwrap();

    let mro = rt.get_mro(&c);
    assert_eq!(mro[0].id(), c.id());
    for base in rt.get_bases(&c) {
        assert!(mro.iter().any(|t| t.id() == base.id()));
    }
}

#[test]
fn test_monotonicity_through_deep_subclassing() {
    let rt = TypeRuntime::new();
    let a = TypeBuilder::new("A").build(&rt).unwrap();
    let b = TypeBuilder::new("B").base(a.clone()).build(&rt).unwrap();
    let c = TypeBuilder::new("C").base(a.clone()).build(&rt).unwrap();
    let d = TypeBuilder::new("D")
        .base(b.clone())
        .base(c.clone())
        .build(&rt)
        .unwrap();
    let e = TypeBuilder::new("E").base(d.clone()).build(&rt).unwrap();

    let pos = |ty: &Arc<TypeObject>, name: &str| {
        rt.get_mro(ty)
            .iter()
            .position(|t| t.name().as_str() == name)
            .unwrap()
    };
    assert!(pos(&d, "B") < pos(&d, "C"));
    assert!(pos(&e, "B") < pos(&e, "C"));
}

#[test]
fn test_unorderable_bases_report_every_offender() {
    let rt = TypeRuntime::new();
    let a = TypeBuilder::new("A").build(&rt).unwrap();
    let b = TypeBuilder::new("B").base(a.clone()).build(&rt).unwrap();

    // A before B locally, but B's own MRO needs B before A.
    let err = TypeBuilder::new("Clash")
        .base(a.clone())
        .base(b.clone())
        .build(&rt)
        .unwrap_err();
    match err {
        ObjectError::InconsistentHierarchy { classes, .. } => {
            assert!(classes.contains(&"A".to_string()));
            assert!(classes.contains(&"B".to_string()));
        }
        other => panic!("expected InconsistentHierarchy, got {:?}", other),
    }
}

#[test]
fn test_layout_conflict_between_unrelated_solids() {
    let rt = TypeRuntime::new();
    let err = TypeBuilder::new("Impossible")
        .base(rt.builtins().int_.clone())
        .base(rt.builtins().str_.clone())
        .build(&rt)
        .unwrap_err();
    match err {
        ObjectError::InconsistentHierarchy { classes, .. } => {
            assert_eq!(classes, vec!["int".to_string(), "str".to_string()]);
        }
        other => panic!("expected layout conflict, got {:?}", other),
    }
}

#[test]
fn test_metaclass_conflict() {
    let rt = TypeRuntime::new();
    let meta1 = TypeBuilder::new("Meta1")
        .base(rt.builtins().type_.clone())
        .build(&rt)
        .unwrap();
    let meta2 = TypeBuilder::new("Meta2")
        .base(rt.builtins().type_.clone())
        .build(&rt)
        .unwrap();
    let with1 = TypeBuilder::new("With1")
        .metaclass(meta1.id())
        .build(&rt)
        .unwrap();
    let with2 = TypeBuilder::new("With2")
        .metaclass(meta2.id())
        .build(&rt)
        .unwrap();

    let err = TypeBuilder::new("Torn")
        .base(with1.clone())
        .base(with2.clone())
        .build(&rt)
        .unwrap_err();
    assert!(matches!(err, ObjectError::InvalidBasesSpec(_)));
}

#[test]
fn test_derived_metaclass_wins() {
    let rt = TypeRuntime::new();
    let meta = TypeBuilder::new("Meta")
        .base(rt.builtins().type_.clone())
        .build(&rt)
        .unwrap();
    let base = TypeBuilder::new("Base")
        .metaclass(meta.id())
        .build(&rt)
        .unwrap();
    // No explicit metaclass: the base's wins over plain `type`.
    let child = TypeBuilder::new("Child").base(base.clone()).build(&rt).unwrap();
    assert_eq!(child.metaclass(), meta.id());
}

#[test]
fn test_custom_metaclass_linearization_hook() {
    let rt = TypeRuntime::new();
    let hook = ManagedFn::new("mro", |_rt, args| match args {
        [Value::Type(id)] => Ok(Value::tuple(vec![
            Value::Type(*id),
            Value::Type(TypeId::OBJECT),
        ])),
        _ => Err(ObjectError::CallFailed("expected a type".into())),
    });
    let meta = TypeBuilder::new("LinearMeta")
        .base(rt.builtins().type_.clone())
        .namespace("mro", Value::Function(hook))
        .build(&rt)
        .unwrap();

    let custom = TypeBuilder::new("Custom")
        .metaclass(meta.id())
        .build(&rt)
        .unwrap();
    assert_eq!(names(&rt.get_mro(&custom)), ["Custom", "object"]);

    // A custom linearization permanently opts the type out of caching.
    rt.lookup(&custom, &pyrite_core::intern("__repr__"));
    assert_eq!(rt.version_of(&custom), 0);
}

#[test]
fn test_custom_linearization_must_keep_self_and_bases() {
    let rt = TypeRuntime::new();
    let hook = ManagedFn::new("mro", |_rt, _args| {
        // Drops everything, including the type itself.
        Ok(Value::tuple(vec![Value::Type(TypeId::OBJECT)]))
    });
    let meta = TypeBuilder::new("BadMeta")
        .base(rt.builtins().type_.clone())
        .namespace("mro", Value::Function(hook))
        .build(&rt)
        .unwrap();

    let err = TypeBuilder::new("Broken")
        .metaclass(meta.id())
        .build(&rt)
        .unwrap_err();
    assert!(matches!(err, ObjectError::InvalidBasesSpec(_)));
    // The failed build left no subclass link behind.
    let object_children =
        pyrite_runtime::object::subclass::children_of(&rt.builtins().object_.clone());
    assert!(!object_children.iter().any(|t| t.name().as_str() == "Broken"));
}

#[test]
fn test_init_subclass_hook_runs() {
    use std::sync::atomic::{AtomicBool, Ordering};
    static FIRED: AtomicBool = AtomicBool::new(false);

    let rt = TypeRuntime::new();
    let hook = ManagedFn::new("__init_subclass__", |_rt, args| {
        assert!(matches!(args, [Value::Type(_)]));
        FIRED.store(true, Ordering::SeqCst);
        Ok(Value::None)
    });
    let base = TypeBuilder::new("Hooked")
        .namespace("__init_subclass__", Value::Function(hook))
        .build(&rt)
        .unwrap();
    assert!(!FIRED.load(Ordering::SeqCst));

    TypeBuilder::new("Sub").base(base.clone()).build(&rt).unwrap();
    assert!(FIRED.load(Ordering::SeqCst));
}

#[test]
fn test_bases_roundtrip_is_stable() {
    let rt = TypeRuntime::new();
    let a = TypeBuilder::new("A").build(&rt).unwrap();
    let b = TypeBuilder::new("B").build(&rt).unwrap();
    let c = TypeBuilder::new("C")
        .base(a.clone())
        .base(b.clone())
        .build(&rt)
        .unwrap();

    let before = names(&rt.get_mro(&c));
    rt.set_bases(&c, rt.get_bases(&c)).unwrap();
    assert_eq!(names(&rt.get_mro(&c)), before);
}

#[test]
fn test_rebase_rewrites_subtree_mros() {
    let rt = TypeRuntime::new();
    let a = TypeBuilder::new("A").build(&rt).unwrap();
    let a2 = TypeBuilder::new("A2").build(&rt).unwrap();
    let b = TypeBuilder::new("B").base(a.clone()).build(&rt).unwrap();
    let c = TypeBuilder::new("C").base(b.clone()).build(&rt).unwrap();

    rt.set_bases(&b, vec![a2.clone()]).unwrap();
    assert_eq!(names(&rt.get_mro(&b)), ["B", "A2", "object"]);
    assert_eq!(names(&rt.get_mro(&c)), ["C", "B", "A2", "object"]);
    // Subtype relationships track the new bases.
    assert!(b.is_subtype_of(&a2));
    assert!(!b.is_subtype_of(&a));
}

#[test]
fn test_failed_rebase_restores_everything() {
    let rt = TypeRuntime::new();
    let a = TypeBuilder::new("A").build(&rt).unwrap();
    let b = TypeBuilder::new("B").build(&rt).unwrap();
    let t = TypeBuilder::new("T").base(b.clone()).build(&rt).unwrap();
    // C(A, T) is linearizable while T's MRO does not mention A.
    let c = TypeBuilder::new("C")
        .base(a.clone())
        .base(t.clone())
        .build(&rt)
        .unwrap();

    let t_mro_before = names(&rt.get_mro(&t));
    let c_mro_before = names(&rt.get_mro(&c));

    // Rebasing T onto A would force C to order A both before and after T.
    let err = rt.set_bases(&t, vec![a.clone()]).unwrap_err();
    assert!(matches!(err, ObjectError::InconsistentHierarchy { .. }));

    assert_eq!(names(&rt.get_bases(&t)), ["B"]);
    assert_eq!(names(&rt.get_mro(&t)), t_mro_before);
    assert_eq!(names(&rt.get_mro(&c)), c_mro_before);
    // A later, valid rebase still works: links were restored.
    rt.set_bases(&t, vec![b.clone()]).unwrap();
}

#[test]
fn test_reclass_instance_between_compatible_types() {
    let rt = TypeRuntime::new();
    let p1 = TypeBuilder::new("P1").build(&rt).unwrap();
    let p2 = TypeBuilder::new("P2").build(&rt).unwrap();

    let instance = rt.new_instance(&p1, &[]).unwrap();
    rt.reclass_instance(&instance, &p2).unwrap();
    assert_eq!(rt.type_of(&instance).id(), p2.id());
}

#[test]
fn test_reclass_instance_layout_mismatch() {
    let rt = TypeRuntime::new();
    let plain = TypeBuilder::new("Plain").build(&rt).unwrap();
    let slotted = TypeBuilder::new("Slotted").member("x").build(&rt).unwrap();

    let instance = rt.new_instance(&plain, &[]).unwrap();
    let err = rt.reclass_instance(&instance, &slotted).unwrap_err();
    assert!(matches!(err, ObjectError::InconsistentHierarchy { .. }));
    assert_eq!(rt.type_of(&instance).id(), plain.id());
}
