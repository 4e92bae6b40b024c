use std::fmt::{self, Debug, Display, Formatter};
use std::ops;
use std::rc::Rc;

use log::{trace, warn};

use crate::base::{BinOp, Closure, Exp, Literal, Value};
use crate::error::{Error, Result};
use crate::eval::{host_binary, Env, Vm};
use crate::lambda;
use crate::parse::parse_exp;
use crate::reify::Reify;

/// A symbolic expression: a tree that composes with operators and evaluates
/// only the parts whose calls can be resolved.
///
/// Composition never changes the operands; the only mutable state is the
/// value attached to a `Name` root.
#[derive(Clone)]
pub struct Node {
    exp: Rc<Exp>,
}

/// A node's display label together with the outlines of its children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outline {
    pub label: String,
    pub children: Vec<Outline>,
}

impl Node {
    pub fn new(exp: Rc<Exp>) -> Self {
        Node { exp }
    }

    /// Wrap `exp`, attaching `value` if one is given. A value already attached
    /// to `exp` is kept when `value` is `None`.
    pub fn with_value(exp: Rc<Exp>, value: Option<Value>) -> Result<Self> {
        let node = Node::new(exp);
        if let Some(value) = value {
            node.set_value(value)?;
        }
        Ok(node)
    }

    pub fn reify<T: Reify>(vm: &mut Vm, x: T) -> Result<Self> {
        Ok(Node::new(x.reify(vm)?))
    }

    pub fn parse(src: &str) -> Result<Self> {
        Ok(Node::new(parse_exp(src)?))
    }

    /// A name with no attached value.
    pub fn symbol(name: &str) -> Self {
        Node::new(Exp::name(name))
    }

    /// A name standing for `value`.
    pub fn named(name: &str, value: Value) -> Self {
        let node = Node::symbol(name);
        node.attach(value);
        node
    }

    /// A name whose value is the node itself. Operators applied to its value
    /// build trees instead of failing.
    pub fn placeholder(name: &str) -> Self {
        let node = Node::symbol(name);
        node.attach(Value::Node(node.clone()));
        node
    }

    /// One placeholder per whitespace-separated name.
    pub fn symbols(names: &str) -> Vec<Node> {
        names.split_whitespace().map(Node::placeholder).collect()
    }

    /// Lift a closure into a lambda node, renaming parameters that would
    /// capture names free in `captured`. See [`lambda::lift`].
    pub fn lift<F, R>(
        vm: &mut Vm,
        params: &[&str],
        captured: &[(&str, Value)],
        body: F,
    ) -> Result<Self>
    where
        F: FnOnce(&[Node]) -> R,
        R: Reify,
    {
        Ok(Node::new(lambda::lift(vm, params, captured, body)?))
    }

    pub fn from_closure(vm: &mut Vm, closure: &Closure) -> Result<Self> {
        Ok(Node::new(lambda::lift_closure(vm, closure)?))
    }

    pub fn exp(&self) -> &Rc<Exp> {
        &self.exp
    }

    /// The value attached to the root, if the root is a name carrying one.
    pub fn value(&self) -> Option<Value> {
        match &*self.exp {
            Exp::Name(_, slot) => slot.get(&self.exp),
            _ => None,
        }
    }

    /// Attach `value` to the root, which must be a name.
    pub fn set_value(&self, value: Value) -> Result<()> {
        match &*self.exp {
            Exp::Name(_, slot) => {
                slot.set(&self.exp, value);
                Ok(())
            }
            _ => Err(Error::InvalidOperand(format!(
                "cannot attach a value to '{self}', which is not a name",
            ))),
        }
    }

    fn attach(&self, value: Value) {
        if let Exp::Name(_, slot) = &*self.exp {
            slot.set(&self.exp, value);
        }
    }

    /// Canonical text. Two nodes are equal exactly when this text is.
    pub fn render(&self) -> String {
        self.exp.to_string()
    }

    pub fn call<I>(&self, args: I) -> Node
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        let args = args.into_iter().map(|arg| arg.into().exp).collect();
        Node::new(Exp::call(self.exp.clone(), args))
    }

    pub fn binary<T: Into<Node>>(&self, op: BinOp, rhs: T) -> Node {
        Node::new(Exp::binop(op, self.exp.clone(), rhs.into().exp))
    }

    /// Apply `op` in place to the attached value, e.g. `+=` or `&=`. Host
    /// objects may update themselves; other values are replaced. A symbolic
    /// value is replaced by the composed node, so a placeholder can
    /// accumulate a tree.
    pub fn update<V: Into<Value>>(&self, vm: &mut Vm, op: BinOp, rhs: V) -> Result<()> {
        if op.is_comparison() {
            return Err(Error::InvalidOperand(format!("'{op}' has no in-place form")));
        }
        let rhs = rhs.into();
        let current = self.value().ok_or_else(|| {
            Error::InvalidOperand(format!("'{self}' has no value to update"))
        })?;
        let updated = match current {
            Value::Object(obj) => {
                if obj.binary_assign(op, &rhs)? {
                    return Ok(());
                }
                obj.binary(op, &rhs)?
            }
            Value::Node(node) => {
                let rhs = vm.reify_value(rhs);
                Value::Node(Node::new(Exp::binop(op, node.exp, rhs)))
            }
            v => host_binary(op, &v, &rhs)?,
        };
        self.set_value(updated)
    }

    /// Whether evaluating this node resolves every call in it.
    ///
    /// A lambda always passes: its body is only run when applied. A call
    /// fails when its callee evaluates to a symbolic node. When the callee is
    /// a host function, it also fails if any argument evaluates to a node.
    /// A callee that evaluates to a closure is not pending: the call falls
    /// through to the check on its children, and symbolic arguments are
    /// substituted into the body, which composes them. Any other node passes
    /// when all of its children do.
    pub fn are_calls_concrete(&self, vm: &mut Vm, env: &Env) -> Result<bool> {
        match &*self.exp {
            Exp::Lambda(..) => return Ok(true),
            Exp::Call(func, args) => match vm.eval(func, Some(env.clone()))? {
                Value::Node(_) => {
                    trace!("{self}: callee is symbolic");
                    return Ok(false);
                }
                Value::Closure(_) => {}
                _ => {
                    for arg in args {
                        if let Value::Node(_) = vm.eval(arg, Some(env.clone()))? {
                            trace!("{self}: argument {arg} is symbolic");
                            return Ok(false);
                        }
                    }
                }
            },
            _ => {}
        }
        for child in self.children() {
            if !child.are_calls_concrete(vm, env)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate if every call resolves. `None` means the node is still
    /// symbolic, including when it mentions a name nothing defines.
    pub fn eval(&self, vm: &mut Vm) -> Result<Option<Value>> {
        self.eval_in(vm, &Env::new())
    }

    /// Like [`Node::eval`], with `env` as additional locals.
    pub fn eval_in(&self, vm: &mut Vm, env: &Env) -> Result<Option<Value>> {
        match self.resolve(vm, env) {
            Err(Error::Unbound(name)) => {
                warn!("leaving {self} symbolic: name '{name}' is not defined");
                Ok(None)
            }
            res => res,
        }
    }

    fn resolve(&self, vm: &mut Vm, env: &Env) -> Result<Option<Value>> {
        if !self.are_calls_concrete(vm, env)? {
            return Ok(None);
        }
        match vm.eval(self, Some(env.clone()))? {
            Value::Closure(c) => Ok(Some(Value::Node(Node::from_closure(vm, &c)?))),
            v => Ok(Some(v)),
        }
    }

    /// Immediate subexpressions. They share leaves, and so attached values,
    /// with this node.
    pub fn children(&self) -> Vec<Node> {
        self.exp
            .children()
            .into_iter()
            .map(|e| Node::new(e.clone()))
            .collect()
    }

    /// `expression = value`, or just the expression while it is symbolic.
    /// Lambdas are never evaluated for display.
    pub fn display(&self, vm: &mut Vm) -> Result<String> {
        let text = self.render();
        if let Exp::Lambda(..) = &*self.exp {
            return Ok(text);
        }
        Ok(match self.eval(vm)? {
            Some(Value::Node(node)) if node == *self => text,
            Some(v) => format!("{text} = {v}"),
            None => text,
        })
    }

    pub fn outline(&self, vm: &mut Vm) -> Result<Outline> {
        let label = self.display(vm)?;
        let children = self
            .children()
            .iter()
            .map(|child| child.outline(vm))
            .collect::<Result<_>>()?;
        Ok(Outline { label, children })
    }

    /// For `r(a, b)` with `r` bound to a host object, insert the values of
    /// `a` and `b` into it as one row.
    pub fn assert_fact(&self, vm: &mut Vm) -> Result<()> {
        let Exp::Call(func, args) = &*self.exp else {
            return Err(Error::InvalidOperand(format!("'{self}' is not a call")));
        };
        let Some(Value::Object(target)) = Node::new(func.clone()).value() else {
            return Err(Error::InvalidOperand(format!(
                "'{func}' is not bound to a host object",
            )));
        };
        let row = args
            .iter()
            .map(|arg| vm.eval(arg, None))
            .collect::<Result<Vec<_>>>()?;
        target.insert(row)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.exp, &other.exp) || self.render() == other.render()
    }
}

impl Eq for Node {}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.exp)
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.exp)
    }
}

impl Outline {
    fn write(&self, f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:width$}{}", "", self.label, width = depth * 2)?;
        for child in &self.children {
            f.write_str("\n")?;
            child.write(f, depth + 1)?;
        }
        Ok(())
    }
}

impl Display for Outline {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.write(f, 0)
    }
}

impl From<Rc<Exp>> for Node {
    fn from(exp: Rc<Exp>) -> Self {
        Node::new(exp)
    }
}

impl From<&Node> for Node {
    fn from(node: &Node) -> Self {
        node.clone()
    }
}

impl From<Literal> for Node {
    fn from(lit: Literal) -> Self {
        Node::new(Exp::lit(lit))
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::new(Exp::int(n))
    }
}

impl From<i32> for Node {
    fn from(n: i32) -> Self {
        Node::new(Exp::int(n.into()))
    }
}

impl From<f64> for Node {
    fn from(x: f64) -> Self {
        Literal::Float(x).into()
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Literal::Bool(b).into()
    }
}

macro_rules! compose_ops(($($trait:ident::$method:ident => $op:ident,)+) => {
    $(
        impl<T: Into<Node>> ops::$trait<T> for Node {
            type Output = Node;
            fn $method(self, rhs: T) -> Node {
                self.binary(BinOp::$op, rhs)
            }
        }

        impl<T: Into<Node>> ops::$trait<T> for &Node {
            type Output = Node;
            fn $method(self, rhs: T) -> Node {
                self.binary(BinOp::$op, rhs)
            }
        }
    )+
});

compose_ops! {
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
    Rem::rem => Mod,
    BitAnd::bitand => BitAnd,
    BitOr::bitor => BitOr,
    BitXor::bitxor => BitXor,
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    use insta::assert_snapshot;

    use super::*;
    use crate::base::HostObject;

    /// A set of rows, enough to stand in for a relation.
    #[derive(Debug, Default)]
    struct Rows(RefCell<BTreeSet<Vec<i64>>>);

    impl HostObject for Rows {
        fn type_name(&self) -> &str {
            "Rows"
        }

        fn call(&self, args: &[Value]) -> Result<Value> {
            let key: Vec<i64> = args
                .iter()
                .map(|v| match v {
                    Value::Int(n) => Ok(*n),
                    v => Err(Error::Host(format!("bad key {v}"))),
                })
                .collect::<Result<_>>()?;
            let hits = self.0.borrow().iter().filter(|row| row.starts_with(&key)).count();
            Ok(Value::Int(hits as i64))
        }

        fn binary_assign(&self, op: BinOp, rhs: &Value) -> Result<bool> {
            match (op, rhs) {
                (BinOp::Add, Value::Int(n)) => {
                    self.0.borrow_mut().insert(vec![*n]);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        fn insert(&self, row: Vec<Value>) -> Result<()> {
            let row = row
                .into_iter()
                .map(|v| match v {
                    Value::Int(n) => Ok(n),
                    v => Err(Error::Host(format!("bad cell {v}"))),
                })
                .collect::<Result<_>>()?;
            self.0.borrow_mut().insert(row);
            Ok(())
        }
    }

    fn rows(node: &Node) -> Rc<dyn HostObject> {
        match node.value() {
            Some(Value::Object(obj)) => obj,
            v => panic!("expected an object, got {v:?}"),
        }
    }

    #[test]
    fn composition_leaves_operands_untouched() {
        let [f, x] = <[Node; 2]>::try_from(Node::symbols("f x")).unwrap();
        let g = Node::symbol("g");
        let e = f.call([&x, &Node::from(3)]) & &g;
        assert_eq!(e.render(), "f(x, 3) & g");
        assert_eq!(f.render(), "f");
        assert_eq!((&x + 1) * 2, Node::parse("(x + 1) * 2").unwrap());
        assert_eq!((&x - (&x - 1)).render(), "x - (x - 1)");
        assert_eq!((x.clone() % 2 ^ 1 | 4).render(), "x % 2 ^ 1 | 4");
        assert_eq!(x.binary(BinOp::LtE, 2.5).render(), "x <= 2.5");
    }

    #[test]
    fn equality_is_textual() {
        let a = Node::named("x", Value::Int(1));
        let b = Node::named("x", Value::Int(2));
        assert_eq!(a, b);
        assert_ne!(a, Node::symbol("y"));
        assert_eq!(Node::parse("f( a,b )").unwrap(), Node::parse("f(a, b)").unwrap());
    }

    #[test]
    fn values_are_not_clobbered() {
        let node = Node::named("x", Value::Int(1));
        let same = Node::with_value(node.exp().clone(), None).unwrap();
        assert_eq!(same.value(), Some(Value::Int(1)));
        Node::with_value(node.exp().clone(), Some(Value::Int(5))).unwrap();
        assert_eq!(node.value(), Some(Value::Int(5)));
        assert!(matches!(
            (&node + 1).set_value(Value::Int(0)),
            Err(Error::InvalidOperand(_)),
        ));
    }

    #[test]
    fn concrete_leaves_evaluate() {
        let mut vm = Vm::new();
        let a = Node::named("a", Value::Int(2));
        let b = Node::named("b", Value::Int(3));
        let e = (&a + &b) * &a - 1;
        assert!(e.are_calls_concrete(&mut vm, &Env::new()).unwrap());
        assert_eq!(e.eval(&mut vm), Ok(Some(Value::Int(9))));
        assert_eq!(vm.eval("(2 + 3) * 2 - 1", None), Ok(Value::Int(9)));
    }

    #[test]
    fn symbolic_arguments_block_evaluation() {
        let mut vm = Vm::new();
        vm.define_builtin("neg", |args| match args {
            [Value::Int(n)] => Ok(Value::Int(-n)),
            _ => Err(Error::Host("neg expects an int".to_owned())),
        });
        let f = Node::parse("neg").unwrap();
        let x = Node::placeholder("x");
        let e = f.call([&x]);
        assert!(!e.are_calls_concrete(&mut vm, &Env::new()).unwrap());
        assert_eq!(e.eval(&mut vm), Ok(None));
        let e = f.call([4]);
        assert_eq!(e.eval(&mut vm), Ok(Some(Value::Int(-4))));
        // Concreteness looks below the root too.
        let e = f.call([&x]) + 1;
        assert_eq!(e.eval(&mut vm), Ok(None));
    }

    #[test]
    fn unbound_names_stay_symbolic() {
        let mut vm = Vm::new();
        let e = Node::parse("h(1) + y").unwrap();
        assert_eq!(e.eval(&mut vm), Ok(None));
        assert_eq!(e.display(&mut vm).unwrap(), "h(1) + y");
        let env: Env = [("y", Value::Int(1))].into_iter().collect();
        vm.define_builtin("h", |_| Ok(Value::Int(10)));
        assert_eq!(e.eval_in(&mut vm, &env), Ok(Some(Value::Int(11))));
    }

    #[test]
    fn other_errors_propagate() {
        let mut vm = Vm::new();
        let e = Node::from(1) / 0;
        assert_eq!(e.eval(&mut vm), Err(Error::DivisionByZero));
    }

    #[test]
    fn applying_lambdas() {
        let mut vm = Vm::new();
        let inc = Node::parse("lambda n: n + 1").unwrap();
        assert_eq!(inc.call([41]).eval(&mut vm), Ok(Some(Value::Int(42))));
        let y = Node::placeholder("y");
        let e = inc.call([&y]);
        assert!(e.are_calls_concrete(&mut vm, &Env::new()).unwrap());
        assert_eq!(e.display(&mut vm).unwrap(), "(lambda n: n + 1)(y) = y + 1");
    }

    #[test]
    fn closures_come_back_as_nodes() {
        let mut vm = Vm::new();
        let adder = Node::parse("(lambda a: lambda b: a + b)(10)").unwrap();
        let Some(Value::Node(lifted)) = adder.eval(&mut vm).unwrap() else {
            panic!("expected a node");
        };
        assert_eq!(lifted.render(), "lambda b: 10 + b");
        assert_eq!(lifted.call([5]).eval(&mut vm), Ok(Some(Value::Int(15))));
    }

    #[test]
    fn display_forms() {
        let mut vm = Vm::new();
        let x = Node::placeholder("x");
        assert_eq!(x.display(&mut vm).unwrap(), "x");
        let lam = Node::parse("lambda: 1").unwrap();
        assert_eq!(lam.display(&mut vm).unwrap(), "lambda: 1");
        let e = Node::named("k", Value::Int(4)) * 2;
        assert_eq!(e.display(&mut vm).unwrap(), "k * 2 = 8");
    }

    #[test]
    fn outline_labels_every_subexpression() {
        let mut vm = Vm::new();
        vm.define_builtin("inc", |args| match args {
            [Value::Int(n)] => Ok(Value::Int(n + 1)),
            _ => Err(Error::Host("inc expects an int".to_owned())),
        });
        let a = Node::named("a", Value::Int(1));
        let q = Node::placeholder("q");
        let e = Node::parse("inc").unwrap().call([&a]) & &q;
        assert_snapshot!(e.outline(&mut vm).unwrap(), @r"
        inc(a) & q = 2 & q
          inc(a) = 2
            inc = <built-in function inc>
            a = 1
          q
        ");
    }

    #[test]
    fn in_place_updates() {
        let mut vm = Vm::new();
        let total = Node::named("total", Value::Int(1));
        let sum = &total + 1;
        total.update(&mut vm, BinOp::Add, 4).unwrap();
        total.update(&mut vm, BinOp::Mul, 2).unwrap();
        assert_eq!(total.value(), Some(Value::Int(10)));
        assert_eq!(sum.eval(&mut vm), Ok(Some(Value::Int(11))));

        let flags = Node::named("flags", Value::Bool(true));
        flags.update(&mut vm, BinOp::BitAnd, false).unwrap();
        assert_eq!(flags.value(), Some(Value::Bool(false)));

        assert!(matches!(
            Node::symbol("u").update(&mut vm, BinOp::Add, 1),
            Err(Error::InvalidOperand(_)),
        ));
        assert!(matches!(
            total.update(&mut vm, BinOp::Lt, 1),
            Err(Error::InvalidOperand(_)),
        ));
    }

    #[test]
    fn placeholders_accumulate_in_place() {
        let mut vm = Vm::new();
        let [p, q] = <[Node; 2]>::try_from(Node::symbols("p q")).unwrap();
        p.update(&mut vm, BinOp::BitAnd, q.clone()).unwrap();
        let Some(Value::Node(acc)) = p.value() else {
            panic!("expected a node");
        };
        assert_eq!(acc.render(), "p & q");
        p.update(&mut vm, BinOp::Add, 1).unwrap();
        assert_eq!(p.value().map(|v| v.to_string()), Some("(p & q) + 1".to_owned()));
        // The leaf itself is unchanged; only its value grew.
        assert_eq!(p.render(), "p");
        assert_eq!(vm.fresh, 0);
    }

    #[test]
    fn host_objects_update_in_place() {
        let mut vm = Vm::new();
        let r = Node::named("r", Value::object(Rows::default()));
        let before = rows(&r);
        r.update(&mut vm, BinOp::Add, 7).unwrap();
        assert!(Rc::ptr_eq(&before, &rows(&r)));
        assert_eq!(r.call([7]).eval(&mut vm), Ok(Some(Value::Int(1))));
    }

    #[test]
    fn asserting_facts() {
        let mut vm = Vm::new();
        let parent = Node::named("parent", Value::object(Rows::default()));
        let one = Node::named("one", Value::Int(1));
        parent.call([&one, &Node::from(2)]).assert_fact(&mut vm).unwrap();
        parent.call([1, 3]).assert_fact(&mut vm).unwrap();
        parent.call([4, 5]).assert_fact(&mut vm).unwrap();
        assert_eq!(parent.call([1]).eval(&mut vm), Ok(Some(Value::Int(2))));

        assert!(matches!(parent.assert_fact(&mut vm), Err(Error::InvalidOperand(_))));
        assert!(matches!(
            Node::symbol("q").call([1]).assert_fact(&mut vm),
            Err(Error::InvalidOperand(_)),
        ));
    }

    #[test]
    fn children_share_leaves() {
        let x = Node::symbol("x");
        let e = &x * 3;
        let [left, right] = <[Node; 2]>::try_from(e.children()).unwrap();
        assert_eq!(right.render(), "3");
        left.set_value(Value::Int(5)).unwrap();
        assert_eq!(x.value(), Some(Value::Int(5)));
        assert_eq!(e.eval(&mut Vm::new()), Ok(Some(Value::Int(15))));
    }
}
