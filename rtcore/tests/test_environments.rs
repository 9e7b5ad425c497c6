use pretty_assertions::assert_eq;
use rtcore::ast::{Expression as E, Symbol};
use rtcore::runtime::{Binding, Evaluator, LookupMode, RuntimeError, Scalar, Value, ValueId};

fn int(ev: &mut Evaluator, n: i64) -> ValueId {
    ev.heap_mut()
        .alloc_value(Value::Scalar(Scalar::Integer(n)))
        .unwrap()
}

fn run(ev: &mut Evaluator, program: E) -> Value {
    let id = ev.evaluate(&program).unwrap();
    ev.heap().value(id).unwrap().clone()
}

#[test]
fn innermost_binding_wins() {
    let mut ev = Evaluator::new().unwrap();
    let global = ev.global();
    let f_frame = ev.heap_mut().new_environment(global).unwrap();
    let g_frame = ev.heap_mut().new_environment(f_frame).unwrap();
    let outer = int(&mut ev, 1);
    ev.assign("x", outer, f_frame).unwrap();
    let inner = int(&mut ev, 2);
    ev.assign("x", inner, g_frame).unwrap();

    assert_eq!(ev.lookup("x", g_frame, LookupMode::Value).unwrap(), inner);
    assert_eq!(ev.lookup("x", f_frame, LookupMode::Value).unwrap(), outer);
    assert_eq!(
        ev.lookup("x", global, LookupMode::Value),
        Err(RuntimeError::NameNotFound("x".to_string()))
    );
}

#[test]
fn callable_lookup_skips_non_functions() {
    let mut ev = Evaluator::new().unwrap();
    let global = ev.global();
    let inner = ev.heap_mut().new_environment(global).unwrap();
    let shadow = int(&mut ev, 3);
    ev.assign("length", shadow, inner).unwrap();

    assert_eq!(ev.lookup("length", inner, LookupMode::Value).unwrap(), shadow);
    let found = ev.lookup("length", inner, LookupMode::Callable).unwrap();
    assert!(ev.heap().value(found).unwrap().is_callable());
}

#[test]
fn two_handles_observe_one_environment() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign("e1", E::call("new.env", vec![])),
        E::assign("e2", E::symbol("e1")),
        E::assign("v", E::call("c", vec![E::int(4), E::int(5)])),
        E::call("assign", vec![E::string("k"), E::symbol("v"), E::symbol("e1")]),
    ]))
    .unwrap();

    let global = ev.global();
    let v = ev.identity_of("v", global).unwrap();
    let seen = ev
        .evaluate(&E::call("get", vec![E::string("k"), E::symbol("e2")]))
        .unwrap();
    assert_eq!(seen, v);
}

#[test]
fn escape_assignment_shares_state_across_calls() {
    let mut ev = Evaluator::new().unwrap();
    let make_counter = E::function(
        &[],
        E::block(vec![
            E::assign("count", E::int(0)),
            E::function(
                &[],
                E::block(vec![
                    E::assign_parent(
                        "count",
                        E::call("+", vec![E::symbol("count"), E::int(1)]),
                    ),
                    E::symbol("count"),
                ]),
            ),
        ]),
    );
    ev.evaluate(&E::block(vec![
        E::assign("make_counter", make_counter),
        E::assign("counter", E::call("make_counter", vec![])),
        E::call("counter", vec![]),
        E::call("counter", vec![]),
    ]))
    .unwrap();

    assert_eq!(
        run(&mut ev, E::call("counter", vec![])),
        Value::Scalar(Scalar::Integer(3))
    );
    assert_eq!(
        run(&mut ev, E::call("exists", vec![E::string("count")])),
        Value::Scalar(Scalar::Logical(false))
    );
}

#[test]
fn escape_assignment_without_existing_binding_lands_in_root() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign(
            "f",
            E::function(&[], E::assign_parent("created", E::string("here"))),
        ),
        E::call("f", vec![]),
    ]))
    .unwrap();
    assert_eq!(
        run(&mut ev, E::symbol("created")),
        Value::Scalar(Scalar::Str(rtcore::runtime::intern("here")))
    );
}

#[test]
fn local_assignment_never_reaches_parent() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign("x", E::int(1)),
        E::assign("f", E::function(&[], E::assign("x", E::int(2)))),
        E::call("f", vec![]),
    ]))
    .unwrap();
    assert_eq!(run(&mut ev, E::symbol("x")), Value::Scalar(Scalar::Integer(1)));
}

#[test]
fn environment_can_contain_itself() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign("e", E::call("new.env", vec![])),
        E::call("assign", vec![E::string("self"), E::symbol("e"), E::symbol("e")]),
        E::call("assign", vec![E::string("n"), E::int(42), E::symbol("e")]),
    ]))
    .unwrap();

    let through_cycle = E::call(
        "get",
        vec![
            E::string("n"),
            E::call(
                "get",
                vec![
                    E::string("self"),
                    E::call("get", vec![E::string("self"), E::symbol("e")]),
                ],
            ),
        ],
    );
    assert_eq!(run(&mut ev, through_cycle), Value::Scalar(Scalar::Integer(42)));
    assert_eq!(
        run(
            &mut ev,
            E::call(
                "identical",
                vec![
                    E::symbol("e"),
                    E::call("get", vec![E::string("self"), E::symbol("e")]),
                ],
            ),
        ),
        Value::Scalar(Scalar::Logical(true))
    );
}

#[test]
fn removal_and_binding_order() {
    let mut ev = Evaluator::new().unwrap();
    let global = ev.global();
    let env = ev.heap_mut().new_environment(global).unwrap();
    for (name, n) in [("b", 1), ("a", 2), ("c", 3)] {
        let v = int(&mut ev, n);
        ev.bind(name, v, env).unwrap();
    }
    assert!(ev.remove("a", env).unwrap());
    assert!(!ev.remove("a", env).unwrap());

    let names: Vec<String> = ev
        .heap()
        .binding_names(env)
        .unwrap()
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(ev.heap().binding(env, &Symbol::new("a")).unwrap(), None);
    assert!(matches!(
        ev.heap().binding(env, &Symbol::new("b")).unwrap(),
        Some(Binding::Value(_))
    ));
}

#[test]
fn missing_name_reports_the_name() {
    let mut ev = Evaluator::new().unwrap();
    let err = ev.evaluate(&E::symbol("nowhere")).unwrap_err();
    assert_eq!(err.to_string(), "object 'nowhere' not found");
}
