//! Script → native dispatch through the stack-level entry point
//!
//! These tests drive `call` against the in-memory host runtime:
//! - Resolution with and without type flags
//! - Argument and return marshalling
//! - Stack balance on success and on every failure path
//! - Host exceptions and panics surfacing as script errors

use std::sync::Arc;
use tallow_core::testing::MockRuntime;
use tallow_core::{
    call, ClassRef, Context, ErrorKind, ExecutionLock, HostException, HostRuntime, MethodKind, NativeValue,
    Ownership, PointerWidth, ProxyRef, ScriptState, ScriptValue,
};

struct Fixture {
    host: Arc<MockRuntime>,
    cx: Context,
    widget: ClassRef,
}

fn fixture() -> Fixture {
    let host = Arc::new(MockRuntime::with_foundation());
    let widget = host.define_class("Widget", Some("NSObject"));

    host.add_method(widget, MethodKind::Instance, "setCount:", "v20@0:8i16", |call, _| {
        let value = call.arg_i64(0).unwrap_or_default();
        call.runtime().set_slot(call.this()?, "count", NativeValue::i32(value as i32));
        Ok(NativeValue::void())
    });
    host.add_method(widget, MethodKind::Instance, "count", "i16@0:8", |call, _| {
        Ok(call
            .runtime()
            .slot(call.this()?, "count")
            .unwrap_or_else(|| NativeValue::i32(0)))
    });
    host.add_method(widget, MethodKind::Instance, "scale:by:", "d32@0:8d16f24", |call, _| {
        let a = call.arg_f64(0).unwrap_or_default();
        let b = call.arg_f64(1).unwrap_or_default();
        Ok(NativeValue::f64(a * b))
    });
    host.add_method(widget, MethodKind::Instance, "explode", "v16@0:8", |_, _| {
        Err(HostException::new("NSRangeException", "index 3 beyond bounds"))
    });
    host.add_method(widget, MethodKind::Instance, "panicky", "v16@0:8", |_, _| {
        panic!("native code panicked")
    });
    host.declare_method(widget, MethodKind::Instance, "missingImp", "v16@0:8");
    host.add_method(widget, MethodKind::Instance, "greeting", "*16@0:8", |call, _| {
        let address = call.runtime().host_c_string("hello from host");
        Ok(NativeValue::pointer(PointerWidth::native(), address))
    });

    let cx = Context::new(host.clone());
    Fixture { host, cx, widget }
}

fn instance(f: &Fixture) -> ProxyRef {
    let object = f.host.create_object(f.widget);
    f.cx.proxies().wrap(object, Ownership::Owned)
}

fn push_all(state: &mut ScriptState, values: Vec<ScriptValue>) {
    for v in values {
        state.push(v).unwrap();
    }
}

#[test]
fn test_setter_with_colon_spelling_marshals_integer() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();
    push_all(&mut state, vec![ScriptValue::Integer(42)]);

    let results = call(&f.cx, &mut state, &widget, "setCount:", 1).unwrap();

    assert_eq!(results, 0);
    assert_eq!(state.depth(), 1);
    let sent = f.host.last_call("setCount:").unwrap();
    assert_eq!(sent.args.len(), 1);
    assert_eq!(sent.args[0].len(), 4);
    assert_eq!(sent.args[0].as_i64(), Some(42));
}

#[test]
fn test_getter_pushes_one_result_above_args() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();
    push_all(&mut state, vec![ScriptValue::Integer(7)]);
    call(&f.cx, &mut state, &widget, "setCount", 1).unwrap();
    state.stack_mut().truncate(0);

    state.push(ScriptValue::string("sentinel")).unwrap();
    let results = call(&f.cx, &mut state, &widget, "count", 0).unwrap();

    assert_eq!(results, 1);
    assert_eq!(state.depth(), 2);
    assert_eq!(state.stack().peek().unwrap(), &ScriptValue::Integer(7));
    assert_eq!(state.stack().get(0).unwrap(), &ScriptValue::string("sentinel"));
}

#[test]
fn test_multi_keyword_selector_with_float_promotion() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();
    push_all(&mut state, vec![ScriptValue::Number(1.5), ScriptValue::Integer(4)]);

    let results = call(&f.cx, &mut state, &widget, "scale_by", 2).unwrap();

    assert_eq!(results, 1);
    assert_eq!(state.stack().peek().unwrap(), &ScriptValue::Number(6.0));
    assert_eq!(state.depth(), 3);
}

#[test]
fn test_host_exception_becomes_script_error_and_keeps_balance() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();
    state.push(ScriptValue::Nil).unwrap();

    let err = call(&f.cx, &mut state, &widget, "explode", 0).unwrap_err();

    assert_eq!(err.kind, ErrorKind::Host);
    assert!(err.message.contains("-[Widget explode]"));
    assert!(err.message.contains("index 3 beyond bounds"));
    assert!(err.traceback.starts_with("stack traceback:"));
    assert_eq!(state.depth(), 1);
}

#[test]
fn test_panic_in_native_code_is_contained() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();

    let err = call(&f.cx, &mut state, &widget, "panicky", 0).unwrap_err();

    assert_eq!(err.kind, ErrorKind::Host);
    assert!(err.message.contains("native code panicked"));
    assert_eq!(state.depth(), 0);
}

#[test]
fn test_unimplemented_selector_is_host_error() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();

    let err = call(&f.cx, &mut state, &widget, "missingImp", 0).unwrap_err();

    assert_eq!(err.kind, ErrorKind::Host);
    assert!(err.message.contains("unrecognized selector"));
}

#[test]
fn test_arity_mismatch_is_conversion_error() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();
    push_all(&mut state, vec![ScriptValue::Integer(1), ScriptValue::Integer(2)]);

    let err = call(&f.cx, &mut state, &widget, "setCount", 2).unwrap_err();

    assert_eq!(err.kind, ErrorKind::Conversion);
    assert_eq!(state.depth(), 2);
    assert!(f.host.last_call("setCount:").is_none());
}

#[test]
fn test_type_mismatch_names_both_types() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();
    state.push(ScriptValue::Table(Vec::new())).unwrap();

    let err = call(&f.cx, &mut state, &widget, "setCount", 1).unwrap_err();

    assert_eq!(err.kind, ErrorKind::Conversion);
    assert!(err.message.contains("expected i"));
    assert!(err.message.contains("got table"));
}

#[test]
fn test_host_c_string_return() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();

    call(&f.cx, &mut state, &widget, "greeting", 0).unwrap();

    assert_eq!(state.stack().peek().unwrap(), &ScriptValue::string("hello from host"));
}

#[test]
fn test_unknown_method_is_not_found() {
    let f = fixture();
    let widget = instance(&f);
    let mut state = ScriptState::new();

    let err = call(&f.cx, &mut state, &widget, "frobnicate", 0).unwrap_err();

    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.message.contains("frobnicate"));
    assert!(err.candidates.is_empty());
}

#[test]
fn test_ambiguous_setter_needs_flag() {
    let f = fixture();
    f.host.add_method(f.widget, MethodKind::Instance, "setValue:", "v20@0:8i16", |call, _| {
        call.runtime().set_slot(call.this()?, "int", NativeValue::i64(call.arg_i64(0).unwrap_or(0)));
        Ok(NativeValue::void())
    });
    f.host.add_method(f.widget, MethodKind::Instance, "setValue:", "v24@0:8d16", |call, _| {
        call.runtime().set_slot(call.this()?, "double", NativeValue::f64(call.arg_f64(0).unwrap_or(0.0)));
        Ok(NativeValue::void())
    });
    let widget = instance(&f);
    let mut state = ScriptState::new();
    state.push(ScriptValue::Integer(5)).unwrap();

    let err = call(&f.cx, &mut state, &widget, "setValue", 1).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.candidates.len(), 2);
    let names: Vec<&str> = err.candidates.iter().map(|c| c.call_name.as_str()).collect();
    assert!(names.contains(&"setValue2"));
    assert!(names.contains(&"setValue3"));
    assert_eq!(state.depth(), 1);

    call(&f.cx, &mut state, &widget, "setValue2", 1).unwrap();
    let object = widget.unwrap_instance().unwrap();
    assert_eq!(f.host.slot(object, "int").and_then(|v| v.as_i64()), Some(5));
    assert!(f.host.slot(object, "double").is_none());

    call(&f.cx, &mut state, &widget, "setValue3", 1).unwrap();
    assert_eq!(f.host.slot(object, "double").and_then(|v| v.as_f64()), Some(5.0));
}

#[test]
fn test_call_under_execution_lock() {
    let f = fixture();
    let widget = instance(&f);
    let lock = ExecutionLock::new(ScriptState::new());

    let depth = lock.with(|state| {
        state.push(ScriptValue::Integer(3)).unwrap();
        call(&f.cx, state, &widget, "setCount", 1).unwrap();
        state.depth()
    });

    assert_eq!(depth, 1);
    assert!(!lock.is_locked());
}

#[test]
fn test_stale_receiver_is_invalid_proxy() {
    let f = fixture();
    let widget = instance(&f);
    widget.finalize();
    let mut state = ScriptState::new();

    let err = call(&f.cx, &mut state, &widget, "count", 0).unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidProxy);
    assert_eq!(state.depth(), 0);
    assert_eq!(f.host.live_objects(), 0);
}

#[test]
fn test_variadic_call_appends_nil() {
    let f = fixture();
    f.host.add_variadic_method(f.widget, MethodKind::Class, "arrayWithObjects:", "@24@0:8@16", |call, _| {
        let n = call.args().len() as i64;
        call.runtime().box_primitive(&tallow_core::HostPrimitive::Integer(n)).map_or_else(
            || Err(HostException::new("NSMallocException", "no memory")),
            |o| Ok(NativeValue::object(PointerWidth::native(), Some(o))),
        )
    });
    let class = f.cx.class_named("Widget").unwrap();
    let mut state = ScriptState::new();
    push_all(&mut state, vec!["a".into(), "b".into(), "c".into()]);

    let results = call(&f.cx, &mut state, &class, "arrayWithObjects", 3).unwrap();

    assert_eq!(results, 1);
    // three objects plus the terminator
    assert_eq!(state.stack().peek().unwrap(), &ScriptValue::Integer(4));
    let sent = f.host.last_call("arrayWithObjects:").unwrap();
    assert_eq!(sent.args.last().and_then(|v| v.as_address()), Some(0));
}
