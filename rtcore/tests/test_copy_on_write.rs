use pretty_assertions::assert_eq;
use rtcore::ast::Expression as E;
use rtcore::runtime::{AtomicVector, Evaluator, RefCount, RuntimeError, Scalar, Value, ValueId};

fn ints(items: &[i64]) -> Value {
    Value::Vector(AtomicVector::from_scalars(
        items.iter().map(|n| Scalar::Integer(*n)).collect(),
    ))
}

fn c(items: &[i64]) -> E {
    E::call("c", items.iter().map(|n| E::int(*n)).collect())
}

fn value_of(ev: &mut Evaluator, name: &str) -> Value {
    let global = ev.global();
    let id = ev.identity_of(name, global).unwrap();
    ev.heap().value(id).unwrap().clone()
}

fn id_of(ev: &mut Evaluator, name: &str) -> ValueId {
    let global = ev.global();
    ev.identity_of(name, global).unwrap()
}

#[test]
fn sole_binding_is_mutated_in_place() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::assign("x", c(&[1, 2, 3]))).unwrap();
    let before = id_of(&mut ev, "x");
    assert_eq!(ev.refcount_state(before).unwrap(), RefCount::One);

    ev.evaluate(&E::assign_index("x", vec![E::int(2)], E::int(9)))
        .unwrap();
    assert_eq!(id_of(&mut ev, "x"), before);
    assert_eq!(value_of(&mut ev, "x"), ints(&[1, 9, 3]));
}

#[test]
fn shared_value_is_copied_and_other_binding_unchanged() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign("x", c(&[1, 2, 3])),
        E::assign("y", E::symbol("x")),
    ]))
    .unwrap();
    let before = id_of(&mut ev, "x");
    assert_eq!(ev.refcount_state(before).unwrap(), RefCount::Many);

    ev.evaluate(&E::assign_index("x", vec![E::int(2)], E::int(9)))
        .unwrap();
    assert_ne!(id_of(&mut ev, "x"), before);
    assert_eq!(id_of(&mut ev, "y"), before);
    assert_eq!(value_of(&mut ev, "x"), ints(&[1, 9, 3]));
    assert_eq!(value_of(&mut ev, "y"), ints(&[1, 2, 3]));
}

#[test]
fn list_copy_is_shallow() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign("l", E::call("list", vec![c(&[1, 2]), c(&[3, 4])])),
        E::assign("m", E::symbol("l")),
        E::assign_index("m", vec![E::int(1), E::int(1)], E::int(99)),
    ]))
    .unwrap();

    let element = |ev: &mut Evaluator, name: &str, i: i64| {
        ev.evaluate(&E::index(E::symbol(name), E::int(i))).unwrap()
    };
    let l1 = element(&mut ev, "l", 1);
    let l2 = element(&mut ev, "l", 2);
    let m1 = element(&mut ev, "m", 1);
    let m2 = element(&mut ev, "m", 2);

    assert_eq!(l2, m2);
    assert_ne!(l1, m1);
    assert_eq!(ev.heap().value(l1).unwrap(), &ints(&[1, 2]));
    assert_eq!(ev.heap().value(m1).unwrap(), &ints(&[99, 2]));
}

#[test]
fn saturated_count_keeps_copying_until_rebound() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign("x", c(&[1, 2])),
        E::assign("y", E::symbol("x")),
        E::call("rm", vec![E::string("y")]),
    ]))
    .unwrap();
    let shared = id_of(&mut ev, "x");
    assert_eq!(ev.refcount_state(shared).unwrap(), RefCount::Many);

    // Only `x` refers to it now, but the count never comes back down.
    ev.evaluate(&E::assign_index("x", vec![E::int(1)], E::int(5)))
        .unwrap();
    let copy = id_of(&mut ev, "x");
    assert_ne!(copy, shared);

    ev.evaluate(&E::assign_index("x", vec![E::int(1)], E::int(6)))
        .unwrap();
    assert_eq!(id_of(&mut ev, "x"), copy);
    assert_eq!(value_of(&mut ev, "x"), ints(&[6, 2]));
}

#[test]
fn dropping_the_last_binding_frees_immediately() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::assign("x", c(&[1, 2]))).unwrap();
    let id = id_of(&mut ev, "x");
    let reclaimed = ev.heap_stats().refcount_reclaimed;

    ev.evaluate(&E::call("rm", vec![E::string("x")])).unwrap();
    assert!(!ev.heap().contains_value(id));
    assert_eq!(ev.heap_stats().refcount_reclaimed, reclaimed + 1);

    let replacement = ev.heap_mut().alloc_value(Value::Null).unwrap();
    assert!(matches!(
        ev.heap_mut().mutate(id, &[0], replacement),
        Err(RuntimeError::InvalidMutation(_))
    ));
}

#[test]
fn element_writes_coerce_and_append() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign("x", c(&[1, 2])),
        E::assign_index("x", vec![E::int(3)], E::double(2.5)),
    ]))
    .unwrap();
    assert_eq!(
        value_of(&mut ev, "x"),
        Value::Vector(AtomicVector::from_scalars(vec![
            Scalar::Double(1.0),
            Scalar::Double(2.0),
            Scalar::Double(2.5),
        ]))
    );

    assert_eq!(
        ev.evaluate(&E::assign_index("x", vec![E::int(10)], E::int(0))),
        Err(RuntimeError::IndexOutOfBounds {
            index: 9,
            length: 3
        })
    );
}

#[test]
fn local_indexed_assignment_copies_inherited_value() {
    let mut ev = Evaluator::new().unwrap();
    let program = E::block(vec![
        E::assign("x", c(&[1, 2, 3])),
        E::assign(
            "f",
            E::function(
                &[],
                E::block(vec![
                    E::assign_index("x", vec![E::int(1)], E::int(100)),
                    E::symbol("x"),
                ]),
            ),
        ),
        E::assign("r", E::call("f", vec![])),
    ]);
    ev.evaluate(&program).unwrap();
    assert_eq!(value_of(&mut ev, "x"), ints(&[1, 2, 3]));
    assert_eq!(value_of(&mut ev, "r"), ints(&[100, 2, 3]));
}

#[test]
fn escape_indexed_assignment_updates_enclosing_binding() {
    let mut ev = Evaluator::new().unwrap();
    let program = E::block(vec![
        E::assign("x", c(&[1, 2, 3])),
        E::assign(
            "f",
            E::function(
                &[],
                E::assign_parent_index("x", vec![E::int(3)], E::int(30)),
            ),
        ),
        E::call("f", vec![]),
    ]);
    ev.evaluate(&program).unwrap();
    assert_eq!(value_of(&mut ev, "x"), ints(&[1, 2, 30]));
}

#[test]
fn environments_are_never_copied() {
    let mut ev = Evaluator::new().unwrap();
    let program = E::block(vec![
        E::assign("e", E::call("new.env", vec![])),
        E::assign("l", E::call("list", vec![E::symbol("e")])),
        E::assign("k", E::call("list", vec![E::symbol("e")])),
        E::call("assign", vec![E::string("v"), E::int(1), E::index(E::symbol("l"), E::int(1))]),
        E::call("get", vec![E::string("v"), E::index(E::symbol("k"), E::int(1))]),
    ]);
    let id = ev.evaluate(&program).unwrap();
    assert_eq!(ev.heap().value(id).unwrap(), &Value::Scalar(Scalar::Integer(1)));
}

#[test]
fn list_assigned_into_itself_keeps_its_old_value() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign("x", E::call("list", vec![E::int(1)])),
        E::assign_index("x", vec![E::int(1)], E::symbol("x")),
    ]))
    .unwrap();

    let x = id_of(&mut ev, "x");
    let inner = ev.evaluate(&E::index(E::symbol("x"), E::int(1))).unwrap();
    assert_ne!(inner, x);
    let innermost = ev
        .evaluate(&E::index(E::index(E::symbol("x"), E::int(1)), E::int(1)))
        .unwrap();
    assert_eq!(
        ev.heap().value(innermost).unwrap(),
        &Value::Scalar(Scalar::Integer(1))
    );

    ev.evaluate(&E::call("emit", vec![E::symbol("x")])).unwrap();
    assert_eq!(ev.emitted(), &["list(list(1))".to_string()]);
    let same = ev
        .evaluate(&E::call(
            "identical",
            vec![E::symbol("x"), E::index(E::symbol("x"), E::int(1))],
        ))
        .unwrap();
    assert_eq!(
        ev.heap().value(same).unwrap(),
        &Value::Scalar(Scalar::Logical(false))
    );
}

#[test]
fn element_assigned_into_itself_is_copied() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::block(vec![
        E::assign(
            "x",
            E::call("list", vec![E::call("list", vec![E::int(1)])]),
        ),
        E::assign_index(
            "x",
            vec![E::int(1), E::int(1)],
            E::index(E::symbol("x"), E::int(1)),
        ),
        E::call("emit", vec![E::symbol("x")]),
    ]))
    .unwrap();
    assert_eq!(ev.emitted(), &["list(list(list(1)))".to_string()]);
}

#[test]
fn value_identity_is_the_handle_while_live() {
    let mut ev = Evaluator::new().unwrap();
    ev.evaluate(&E::assign("x", c(&[1, 2]))).unwrap();
    let x = id_of(&mut ev, "x");
    assert_eq!(ev.identity(x), Ok(x));

    ev.evaluate(&E::call("rm", vec![E::string("x")])).unwrap();
    assert!(matches!(ev.identity(x), Err(RuntimeError::InternalError(_))));
}
