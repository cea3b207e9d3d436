//! Slot synthesis and protocol dispatch across native and managed types.

use pyrite_core::{intern, ObjectError};
use pyrite_runtime::{
    CmpOp, ManagedFn, SlotId, SlotState, TypeBuilder, TypeRuntime, Value,
};

#[test]
fn test_subclass_inherits_native_slot_state() {
    let rt = TypeRuntime::new();
    let int = rt.builtins().int_.clone();
    let child = TypeBuilder::new("Tagged").base(int.clone()).build(&rt).unwrap();

    assert!(matches!(int.slot(SlotId::NbAdd), SlotState::Native(_)));
    assert_eq!(child.slot(SlotId::NbAdd), int.slot(SlotId::NbAdd));
    assert_eq!(child.slot(SlotId::Repr), int.slot(SlotId::Repr));

    assert_eq!(
        rt.binary(SlotId::NbAdd, &Value::Int(2), &Value::Int(3)).unwrap(),
        Value::Int(5)
    );
}

#[test]
fn test_managed_add_demotes_the_slot_and_dispatches() {
    let rt = TypeRuntime::new();
    let add = ManagedFn::new("__add__", |_rt, args| match args {
        [Value::Instance(_), Value::Instance(_)] => Ok(Value::Int(42)),
        _ => Err(ObjectError::CallFailed("expected two instances".into())),
    });
    let ty = TypeBuilder::new("Pair")
        .namespace("__add__", Value::Function(add))
        .build(&rt)
        .unwrap();

    assert_eq!(ty.slot(SlotId::NbAdd), SlotState::Generic);

    let a = rt.new_instance(&ty, &[]).unwrap();
    let b = rt.new_instance(&ty, &[]).unwrap();
    assert_eq!(rt.binary(SlotId::NbAdd, &a, &b).unwrap(), Value::Int(42));
}

#[test]
fn test_reflected_operand_goes_first_for_subtypes() {
    let rt = TypeRuntime::new();
    let base = TypeBuilder::new("Plain").build(&rt).unwrap();
    let radd = ManagedFn::new("__radd__", |_rt, _args| Ok(Value::Int(7)));
    let sub = TypeBuilder::new("Absorbing")
        .base(base.clone())
        .namespace("__radd__", Value::Function(radd))
        .build(&rt)
        .unwrap();

    let lhs = rt.new_instance(&base, &[]).unwrap();
    let rhs = rt.new_instance(&sub, &[]).unwrap();
    // rhs's type is a proper subtype of lhs's, so its reflected method
    // is consulted before lhs gets a chance.
    assert_eq!(rt.binary(SlotId::NbAdd, &lhs, &rhs).unwrap(), Value::Int(7));
}

#[test]
fn test_richcompare_partial_implementation() {
    let rt = TypeRuntime::new();
    let eq = ManagedFn::new("__eq__", |_rt, _args| Ok(Value::Bool(true)));
    let ty = TypeBuilder::new("AlwaysEqual")
        .namespace("__eq__", Value::Function(eq))
        .build(&rt)
        .unwrap();
    assert_eq!(ty.slot(SlotId::RichCompare), SlotState::Generic);

    let a = rt.new_instance(&ty, &[]).unwrap();
    let b = rt.new_instance(&ty, &[]).unwrap();
    assert_eq!(rt.richcompare(&a, &b, CmpOp::Eq).unwrap(), Value::Bool(true));
    // No ordering methods anywhere in the MRO.
    let err = rt.richcompare(&a, &b, CmpOp::Lt).unwrap_err();
    assert!(matches!(err, ObjectError::UnsupportedOperation { .. }));
    // Inequality falls back to identity when __ne__ is absent.
    assert_eq!(rt.richcompare(&a, &b, CmpOp::Ne).unwrap(), Value::Bool(true));
}

#[test]
fn test_slot_wrapper_is_a_callable_attribute() {
    let rt = TypeRuntime::new();
    let ty = TypeBuilder::new("Plain").build(&rt).unwrap();
    let inst = rt.new_instance(&ty, &[]).unwrap();

    let wrapper = rt.get_attr(&inst, &intern("__repr__")).unwrap();
    assert!(matches!(wrapper, Value::Bound(_)));
    let repr = rt.call_value(&wrapper, &[]).unwrap();
    assert_eq!(repr, Value::str("<Plain object>"));
}

#[test]
fn test_str_falls_back_through_repr() {
    let rt = TypeRuntime::new();
    let repr = ManagedFn::new("__repr__", |_rt, _args| Ok(Value::str("custom!")));
    let ty = TypeBuilder::new("Shouty")
        .namespace("__repr__", Value::Function(repr))
        .build(&rt)
        .unwrap();

    let inst = rt.new_instance(&ty, &[]).unwrap();
    assert_eq!(rt.repr_of(&inst).unwrap(), Value::str("custom!"));
    // __str__ was never defined; the str protocol reaches the managed repr.
    assert_eq!(rt.str_of(&inst).unwrap(), Value::str("custom!"));
}

#[test]
fn test_managed_len() {
    let rt = TypeRuntime::new();
    let len = ManagedFn::new("__len__", |_rt, _args| Ok(Value::Int(3)));
    let ty = TypeBuilder::new("Triple")
        .namespace("__len__", Value::Function(len))
        .build(&rt)
        .unwrap();

    let inst = rt.new_instance(&ty, &[]).unwrap();
    assert_eq!(rt.len_of(&inst).unwrap(), 3);
    // A non-zero length also makes the value truthy.
    assert!(rt.truthy(&inst).unwrap());
}

#[test]
fn test_propagation_stops_at_overriding_subclass() {
    let rt = TypeRuntime::new();
    let b_repr = ManagedFn::new("__repr__", |_rt, _args| Ok(Value::str("B!")));
    let c_repr = ManagedFn::new("__repr__", |_rt, _args| Ok(Value::str("C!")));
    let b = TypeBuilder::new("B")
        .namespace("__repr__", Value::Function(b_repr))
        .build(&rt)
        .unwrap();
    let c = TypeBuilder::new("C")
        .base(b.clone())
        .namespace("__repr__", Value::Function(c_repr))
        .build(&rt)
        .unwrap();

    let b_inst = rt.new_instance(&b, &[]).unwrap();
    let c_inst = rt.new_instance(&c, &[]).unwrap();
    assert_eq!(rt.repr_of(&b_inst).unwrap(), Value::str("B!"));
    assert_eq!(rt.repr_of(&c_inst).unwrap(), Value::str("C!"));

    let b_repr2 = ManagedFn::new("__repr__", |_rt, _args| Ok(Value::str("B2!")));
    rt.set_type_attr(&b, &intern("__repr__"), Value::Function(b_repr2))
        .unwrap();
    assert_eq!(rt.repr_of(&b_inst).unwrap(), Value::str("B2!"));
    // C defines its own __repr__, so the update does not reach it.
    assert_eq!(rt.repr_of(&c_inst).unwrap(), Value::str("C!"));
}

#[test]
fn test_property_read_and_write() {
    let rt = TypeRuntime::new();
    let getter = ManagedFn::new("get_x", |_rt, args| match args {
        [Value::Instance(i)] => Ok(i.get(&intern("_x")).unwrap_or(Value::Int(0))),
        _ => Err(ObjectError::CallFailed("expected an instance".into())),
    });
    let setter = ManagedFn::new("set_x", |_rt, args| match args {
        [Value::Instance(i), v] => {
            i.set(intern("_x"), v.clone());
            Ok(Value::None)
        }
        _ => Err(ObjectError::CallFailed("expected an instance and a value".into())),
    });
    let ty = TypeBuilder::new("WithProp")
        .getset("x", Some(getter), Some(setter))
        .build(&rt)
        .unwrap();

    let inst = rt.new_instance(&ty, &[]).unwrap();
    assert_eq!(rt.get_attr(&inst, &intern("x")).unwrap(), Value::Int(0));
    rt.set_attr(&inst, &intern("x"), Some(&Value::Int(11))).unwrap();
    assert_eq!(rt.get_attr(&inst, &intern("x")).unwrap(), Value::Int(11));
    // The property shadows the instance dictionary: backing storage is
    // under a different key.
    assert_eq!(rt.get_attr(&inst, &intern("_x")).unwrap(), Value::Int(11));
}

#[test]
fn test_member_descriptor() {
    let rt = TypeRuntime::new();
    let ty = TypeBuilder::new("Counted").member("count").build(&rt).unwrap();
    let inst = rt.new_instance(&ty, &[]).unwrap();

    // Unset members read as absent, not as a default.
    let err = rt.get_attr(&inst, &intern("count")).unwrap_err();
    assert!(matches!(err, ObjectError::AttributeNotFound { .. }));

    rt.set_attr(&inst, &intern("count"), Some(&Value::Int(3))).unwrap();
    assert_eq!(rt.get_attr(&inst, &intern("count")).unwrap(), Value::Int(3));

    rt.set_attr(&inst, &intern("count"), None).unwrap();
    let err = rt.get_attr(&inst, &intern("count")).unwrap_err();
    assert!(matches!(err, ObjectError::AttributeNotFound { .. }));
}

#[test]
fn test_native_method_binds_its_receiver() {
    fn ping(
        _rt: &TypeRuntime,
        _recv: &Value,
        _args: &[Value],
    ) -> Result<Value, ObjectError> {
        Ok(Value::str("pong"))
    }

    let rt = TypeRuntime::new();
    let ty = TypeBuilder::new("Server").method("ping", ping).build(&rt).unwrap();
    let inst = rt.new_instance(&ty, &[]).unwrap();

    let bound = rt.get_attr(&inst, &intern("ping")).unwrap();
    assert!(matches!(bound, Value::Bound(_)));
    assert_eq!(rt.call_value(&bound, &[]).unwrap(), Value::str("pong"));
}

#[test]
fn test_calling_a_type_runs_init() {
    let rt = TypeRuntime::new();
    let init = ManagedFn::new("__init__", |_rt, args| match args {
        [Value::Instance(i), value] => {
            i.set(intern("n"), value.clone());
            Ok(Value::None)
        }
        _ => Err(ObjectError::CallFailed("expected an instance and a value".into())),
    });
    let ty = TypeBuilder::new("Box")
        .namespace("__init__", Value::Function(init))
        .build(&rt)
        .unwrap();

    let inst = rt.call_value(&Value::Type(ty.id()), &[Value::Int(9)]).unwrap();
    assert_eq!(rt.type_of(&inst).id(), ty.id());
    assert_eq!(rt.get_attr(&inst, &intern("n")).unwrap(), Value::Int(9));
}

#[test]
fn test_getattr_hook_catches_missing_attributes() {
    let rt = TypeRuntime::new();
    let hook = ManagedFn::new("__getattr__", |_rt, args| match args {
        [Value::Instance(_), Value::Str(name)] => {
            Ok(Value::str(&format!("made:{}", name.as_str())))
        }
        _ => Err(ObjectError::CallFailed("expected an instance and a name".into())),
    });
    let ty = TypeBuilder::new("Elastic")
        .namespace("__getattr__", Value::Function(hook))
        .build(&rt)
        .unwrap();

    let inst = rt.new_instance(&ty, &[]).unwrap();
    // The hook only runs after the default lookup fails.
    rt.set_attr(&inst, &intern("real"), Some(&Value::Int(1))).unwrap();
    assert_eq!(rt.get_attr(&inst, &intern("real")).unwrap(), Value::Int(1));
    assert_eq!(
        rt.get_attr(&inst, &intern("ghost")).unwrap(),
        Value::str("made:ghost")
    );
}

#[test]
fn test_managed_subscript_and_contains() {
    let rt = TypeRuntime::new();
    let getitem = ManagedFn::new("__getitem__", |_rt, args| match args {
        [Value::Instance(i), Value::Str(key)] => i.get(key).ok_or_else(|| {
            ObjectError::CallFailed(format!("no key {}", key))
        }),
        _ => Err(ObjectError::CallFailed("expected a string key".into())),
    });
    let setitem = ManagedFn::new("__setitem__", |_rt, args| match args {
        [Value::Instance(i), Value::Str(key), value] => {
            i.set(key.clone(), value.clone());
            Ok(Value::None)
        }
        _ => Err(ObjectError::CallFailed("expected a string key and a value".into())),
    });
    let contains = ManagedFn::new("__contains__", |_rt, args| match args {
        [Value::Instance(i), Value::Str(key)] => Ok(Value::Bool(i.get(key).is_some())),
        _ => Err(ObjectError::CallFailed("expected a string key".into())),
    });
    let ty = TypeBuilder::new("Record")
        .namespace("__getitem__", Value::Function(getitem))
        .namespace("__setitem__", Value::Function(setitem))
        .namespace("__contains__", Value::Function(contains))
        .build(&rt)
        .unwrap();

    let inst = rt.new_instance(&ty, &[]).unwrap();
    let key = Value::str("field");
    rt.set_subscript(&inst, &key, &Value::Int(5)).unwrap();
    assert_eq!(rt.subscript(&inst, &key).unwrap(), Value::Int(5));
    assert!(rt.contains(&inst, &key).unwrap());
    assert!(!rt.contains(&inst, &Value::str("other")).unwrap());
}

#[test]
fn test_managed_iteration() {
    let rt = TypeRuntime::new();
    let iter = ManagedFn::new("__iter__", |_rt, args| match args {
        [this @ Value::Instance(_)] => Ok(this.clone()),
        _ => Err(ObjectError::CallFailed("expected an instance".into())),
    });
    let next = ManagedFn::new("__next__", |_rt, args| match args {
        [Value::Instance(i)] => match i.get(&intern("remaining")) {
            Some(Value::Int(n)) if n > 0 => {
                i.set(intern("remaining"), Value::Int(n - 1));
                Ok(Value::Int(n))
            }
            _ => Err(ObjectError::CallFailed("exhausted".into())),
        },
        _ => Err(ObjectError::CallFailed("expected an instance".into())),
    });
    let ty = TypeBuilder::new("Countdown")
        .namespace("__iter__", Value::Function(iter))
        .namespace("__next__", Value::Function(next))
        .build(&rt)
        .unwrap();

    let inst = rt.new_instance(&ty, &[]).unwrap();
    rt.set_attr(&inst, &intern("remaining"), Some(&Value::Int(2))).unwrap();

    let it = rt.iterate(&inst).unwrap();
    assert_eq!(it, inst);
    assert_eq!(rt.iter_next(&it).unwrap(), Value::Int(2));
    assert_eq!(rt.iter_next(&it).unwrap(), Value::Int(1));
    assert!(rt.iter_next(&it).is_err());
}

#[test]
fn test_managed_unary_negation() {
    let rt = TypeRuntime::new();
    let neg = ManagedFn::new("__neg__", |_rt, args| match args {
        [Value::Instance(i)] => match i.get(&intern("value")) {
            Some(Value::Int(n)) => Ok(Value::Int(-n)),
            _ => Err(ObjectError::CallFailed("no value".into())),
        },
        _ => Err(ObjectError::CallFailed("expected an instance".into())),
    });
    let ty = TypeBuilder::new("Signed")
        .namespace("__neg__", Value::Function(neg))
        .build(&rt)
        .unwrap();

    let inst = rt.new_instance(&ty, &[]).unwrap();
    rt.set_attr(&inst, &intern("value"), Some(&Value::Int(8))).unwrap();
    assert_eq!(rt.unary(SlotId::NbNegative, &inst).unwrap(), Value::Int(-8));
}

#[test]
fn test_default_hash_is_identity_based() {
    let rt = TypeRuntime::new();
    let ty = TypeBuilder::new("Opaque").build(&rt).unwrap();
    let a = rt.new_instance(&ty, &[]).unwrap();
    let b = rt.new_instance(&ty, &[]).unwrap();

    assert_eq!(rt.hash_of(&a).unwrap(), rt.hash_of(&a).unwrap());
    assert_ne!(rt.hash_of(&a).unwrap(), rt.hash_of(&b).unwrap());
    assert_eq!(rt.hash_of(&Value::Int(7)).unwrap(), 7);
}

#[test]
fn test_native_init_rejects_arguments() {
    let rt = TypeRuntime::new();
    let ty = TypeBuilder::new("Strict").build(&rt).unwrap();

    // Allocation succeeds, the inherited initializer rejects the args.
    let err = rt.new_instance(&ty, &[Value::Int(1)]).unwrap_err();
    assert!(matches!(err, ObjectError::CallFailed(_)));
    assert!(rt.new_instance(&ty, &[]).is_ok());
}

#[test]
fn test_builtin_arithmetic_and_comparison() {
    let rt = TypeRuntime::new();
    assert_eq!(
        rt.binary(SlotId::NbSubtract, &Value::Int(10), &Value::Int(4)).unwrap(),
        Value::Int(6)
    );
    assert_eq!(
        rt.binary(SlotId::NbMultiply, &Value::Float(1.5), &Value::Int(2)).unwrap(),
        Value::Float(3.0)
    );
    assert_eq!(
        rt.richcompare(&Value::Int(1), &Value::Int(2), CmpOp::Lt).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        rt.binary(
            SlotId::NbAdd,
            &Value::str("ab"),
            &Value::str("cd"),
        )
        .unwrap(),
        Value::str("abcd")
    );
    let err = rt
        .binary(SlotId::NbAdd, &Value::Int(1), &Value::str("x"))
        .unwrap_err();
    assert!(matches!(err, ObjectError::UnsupportedOperation { .. }));
}
