use std::cell::RefCell;
use std::collections::BTreeSet;

use insta::assert_snapshot;
use symbolize::{
    fresh, BinOp, Config, Conflicts, Env, Error, HostObject, Node, Result, Value, Vm,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A binary relation over integers.
#[derive(Debug, Default)]
struct Relation {
    pairs: RefCell<BTreeSet<(i64, i64)>>,
}

fn int(v: &Value) -> Result<i64> {
    match v {
        Value::Int(n) => Ok(*n),
        v => Err(Error::Host(format!("expected an int, got {v}"))),
    }
}

impl HostObject for Relation {
    fn type_name(&self) -> &str {
        "Relation"
    }

    /// Membership test.
    fn call(&self, args: &[Value]) -> Result<Value> {
        let [a, b] = args else {
            return Err(Error::Host("a relation takes two arguments".to_owned()));
        };
        Ok(Value::Bool(self.pairs.borrow().contains(&(int(a)?, int(b)?))))
    }

    /// `r |= n` adds the pair `(n, n)`.
    fn binary_assign(&self, op: BinOp, rhs: &Value) -> Result<bool> {
        match (op, rhs) {
            (BinOp::BitOr, Value::Int(n)) => {
                self.pairs.borrow_mut().insert((*n, *n));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn insert(&self, row: Vec<Value>) -> Result<()> {
        let [a, b] = row.as_slice() else {
            return Err(Error::Host("a relation row has two cells".to_owned()));
        };
        self.pairs.borrow_mut().insert((int(a)?, int(b)?));
        Ok(())
    }
}

#[test]
fn rendering_is_canonical() {
    let mut vm = Vm::new();
    for (src, canonical) in [
        ("f(x,y)+1", "f(x, y) + 1"),
        ("(a + b)*c", "(a + b) * c"),
        ("a - (b + c)", "a - (b + c)"),
        ("(lambda x:x*2)(4)", "(lambda x: x * 2)(4)"),
        ("x <= (y | z)", "x <= y | z"),
        ("(x < y) == True", "(x < y) == True"),
        ("g(lambda: 0,)", "g(lambda: 0)"),
        ("1.50 // -2", "1.5 // -2"),
    ] {
        assert_eq!(vm.unparse(src).unwrap(), canonical);
        assert_eq!(vm.unparse(canonical).unwrap(), canonical);
    }
    assert!(matches!(vm.unparse("f(x"), Err(Error::Syntax { .. })));
}

#[test]
fn equality_ignores_attached_values() {
    let a = Node::named("x", Value::Int(1)) + 1;
    let b = Node::named("x", Value::Int(2)) + 1;
    assert_eq!(a, b);
    assert_ne!(a, Node::parse("1 + x").unwrap());
}

#[test]
fn concrete_trees_match_direct_evaluation() {
    init();
    let mut vm = Vm::new();
    vm.define_builtin("max", |args| {
        let mut best = int(&args[0])?;
        for arg in &args[1..] {
            best = best.max(int(arg)?);
        }
        Ok(Value::Int(best))
    });
    let a = Node::named("a", Value::Int(2));
    let b = Node::named("b", Value::Int(3));
    let max = Node::symbol("max");
    let e = max.call([&a, &b]) * (&a - &b) % 4;
    assert!(e.are_calls_concrete(&mut vm, &Env::new()).unwrap());
    let direct = vm.eval("max(2, 3) * (2 - 3) % 4", None).unwrap();
    assert_eq!(e.eval(&mut vm).unwrap(), Some(direct));
    assert_eq!(e.eval(&mut vm).unwrap(), Some(Value::Int(1)));
}

#[test]
fn placeholders_stay_symbolic() {
    init();
    let mut vm = Vm::new();
    let [f, x] = <[Node; 2]>::try_from(Node::symbols("f x")).unwrap();
    let e = f.call([&x]);
    assert_eq!(e.eval(&mut vm), Ok(None));
    assert_eq!(e.display(&mut vm).unwrap(), "f(x)");

    // An unbound callee is not an error either.
    let e = Node::symbol("g").call([&x]);
    assert_eq!(e.eval(&mut vm), Ok(None));
}

#[test]
fn lifting_renames_captured_parameters() {
    init();
    let mut vm = Vm::new();
    let a_free = Node::symbol("a") * 2;
    let captured = [("a_free", Value::Node(a_free.clone()))];
    let lam = Node::lift(&mut vm, &["a", "b"], &captured, |args| &args[0] + &a_free).unwrap();
    assert_eq!(lam.render(), "lambda a1, b: a1 + a * 2");

    // With the outer `a` at 10, the closure as written gives 3 + 10 * 2.
    vm.define("a", Value::Int(10));
    assert_eq!(lam.call([3, 0]).eval(&mut vm), Ok(Some(Value::Int(23))));
}

#[test]
fn fresh_names_take_the_next_suffix() {
    let taken: BTreeSet<String> = ["a", "a1", "a2"].map(str::to_owned).into();
    assert_eq!(fresh("a", &taken), "a3");
}

#[test]
fn calling_an_opaque_object_once_it_has_a_value() {
    init();
    let mut vm = Vm::new();
    let three = Node::reify(&mut vm, 3).unwrap();
    let obj = Node::placeholder("obj");
    let e = obj.call([&three]);
    assert_eq!(e.render(), "obj(3)");
    assert!(!e.are_calls_concrete(&mut vm, &Env::new()).unwrap());
    assert_eq!(e.eval(&mut vm), Ok(None));

    let double = vm.eval("lambda v: v * 2", None).unwrap();
    obj.set_value(double).unwrap();
    assert_eq!(e.eval(&mut vm), Ok(Some(Value::Int(6))));
    assert_eq!(e.display(&mut vm).unwrap(), "obj(3) = 6");

    obj.set_value(Value::builtin("double", |args| Ok(Value::Int(int(&args[0])? * 2))))
        .unwrap();
    assert_eq!(e.eval(&mut vm), Ok(Some(Value::Int(6))));
}

#[test]
fn host_objects_flow_through_names() {
    init();
    let mut vm = Vm::new();
    let edge = Node::reify(&mut vm, Value::object(Relation::default())).unwrap();
    assert_eq!(edge.render(), "_0");
    let edge = Node::with_value(Node::symbol("edge").exp().clone(), edge.value()).unwrap();

    edge.call([1, 2]).assert_fact(&mut vm).unwrap();
    edge.call([2, 3]).assert_fact(&mut vm).unwrap();
    assert_eq!(edge.call([1, 2]).eval(&mut vm), Ok(Some(Value::Bool(true))));
    assert_eq!(edge.call([3, 1]).eval(&mut vm), Ok(Some(Value::Bool(false))));

    edge.update(&mut vm, BinOp::BitOr, 3).unwrap();
    assert_eq!(edge.call([3, 3]).eval(&mut vm), Ok(Some(Value::Bool(true))));
    assert!(matches!(
        edge.update(&mut vm, BinOp::Add, 3),
        Err(Error::Unsupported { .. }),
    ));

    let bad = edge.call([1]).assert_fact(&mut vm);
    assert!(matches!(bad, Err(Error::Host(_))));
}

#[test]
fn conflicting_leaves_follow_the_configured_policy() {
    let tree = Node::named("n", Value::Int(1)) + Node::named("n", Value::Int(2));
    assert_eq!(
        tree.eval(&mut Vm::new()),
        Err(Error::ConflictingBinding("n".to_owned())),
    );
    let mut vm = Vm::with_config(Config::default().conflicts(Conflicts::LastWins));
    assert_eq!(tree.eval(&mut vm), Ok(Some(Value::Int(4))));
}

#[test]
fn outline_of_a_partially_resolved_tree() {
    init();
    let mut vm = Vm::new();
    vm.define_builtin("inc", |args| Ok(Value::Int(int(&args[0])? + 1)));
    let [x, inc] = <[Node; 2]>::try_from(Node::symbols("x inc")).unwrap();
    inc.set_value(vm.globals().get("inc").cloned().unwrap()).unwrap();
    let k = Node::named("k", Value::Int(4));
    let e = inc.call([&k]) * 2 + inc.call([&x]);
    assert_snapshot!(e.outline(&mut vm).unwrap(), @r"
    inc(k) * 2 + inc(x)
      inc(k) * 2 = 10
        inc(k) = 5
          inc = <built-in function inc>
          k = 4
        2 = 2
      inc(x)
        inc = <built-in function inc>
        x
    ");
}
