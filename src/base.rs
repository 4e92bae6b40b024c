use std::cell::RefCell;
use std::fmt::{self, Debug, Display, Formatter, Write};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::eval::Env;
use crate::node::Node;

/// An expression tree. Trees are persistent and shared through `Rc`; the only
/// mutable part is the attached-value slot of `Name` leaves.
#[derive(Clone, Debug)]
pub enum Exp {
    Name(String, Slot),
    Lit(Literal),
    Call(Rc<Exp>, Vec<Rc<Exp>>),
    BinOp(BinOp, Rc<Exp>, Rc<Exp>),
    Lambda(Vec<String>, Rc<Exp>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<str>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

/// Binding strength used by the printer, weakest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Prec {
    Lambda,
    Compare,
    BitOr,
    BitXor,
    BitAnd,
    Arith,
    Term,
    Factor,
    Atom,
}

/// Out-of-band value attached to a `Name` leaf. Clones share the slot, so
/// every tree containing the leaf observes updates.
#[derive(Clone, Default)]
pub struct Slot(Rc<RefCell<Option<Attached>>>);

#[derive(Clone)]
enum Attached {
    Value(Value),
    /// The leaf stands for itself (a placeholder). Stored as a marker so the
    /// slot never owns its own leaf.
    Itself,
}

/// A runtime value.
#[derive(Clone, Debug)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<str>),
    Builtin(Builtin),
    Closure(Closure),
    Object(Rc<dyn HostObject>),
    Node(Node),
}

/// A named native function.
#[derive(Clone)]
pub struct Builtin {
    name: Rc<str>,
    func: Rc<dyn Fn(&[Value]) -> Result<Value>>,
}

/// The value of a `Lambda` expression. Its frame holds only the parameters of
/// enclosing lambdas, never the bindings collected from leaves.
#[derive(Clone)]
pub struct Closure {
    pub(crate) params: Rc<[String]>,
    pub(crate) body: Rc<Exp>,
    pub(crate) frame: Env,
}

/// An opaque value owned by the embedding application, e.g. a relation.
///
/// Every operation is optional; the defaults fail the way an unsupported
/// operator would.
pub trait HostObject: Debug {
    fn type_name(&self) -> &str;

    fn call(&self, _args: &[Value]) -> Result<Value> {
        Err(Error::NotCallable(self.type_name().to_owned()))
    }

    fn binary(&self, op: BinOp, rhs: &Value) -> Result<Value> {
        Err(Error::Unsupported {
            op: op.to_string(),
            lhs: self.type_name().to_owned(),
            rhs: rhs.type_name().to_owned(),
        })
    }

    /// Update the object in place. Returns `false` when the object has no
    /// in-place form of `op`, in which case `binary` is used instead.
    fn binary_assign(&self, _op: BinOp, _rhs: &Value) -> Result<bool> {
        Ok(false)
    }

    /// Add one row of values.
    fn insert(&self, _row: Vec<Value>) -> Result<()> {
        Err(Error::Host(format!(
            "'{}' object does not accept rows",
            self.type_name(),
        )))
    }
}

/// Pre-order iterator over a tree.
pub struct Preorder {
    stack: Vec<Rc<Exp>>,
}

impl Exp {
    pub fn name<S: Into<String>>(id: S) -> Rc<Self> {
        Rc::new(Exp::Name(id.into(), Slot::default()))
    }
    pub fn lit(lit: Literal) -> Rc<Self> {
        Rc::new(Exp::Lit(lit))
    }
    pub fn int(n: i64) -> Rc<Self> {
        Exp::lit(Literal::Int(n))
    }
    pub fn call(func: Rc<Exp>, args: Vec<Rc<Exp>>) -> Rc<Self> {
        Rc::new(Exp::Call(func, args))
    }
    pub fn binop(op: BinOp, e1: Rc<Exp>, e2: Rc<Exp>) -> Rc<Self> {
        Rc::new(Exp::BinOp(op, e1, e2))
    }
    pub fn lambda(params: Vec<String>, body: Rc<Exp>) -> Rc<Self> {
        Rc::new(Exp::Lambda(params, body))
    }

    pub fn add(e1: Rc<Exp>, e2: Rc<Exp>) -> Rc<Self> {
        Exp::binop(BinOp::Add, e1, e2)
    }
    pub fn mul(e1: Rc<Exp>, e2: Rc<Exp>) -> Rc<Self> {
        Exp::binop(BinOp::Mul, e1, e2)
    }
    pub fn bit_and(e1: Rc<Exp>, e2: Rc<Exp>) -> Rc<Self> {
        Exp::binop(BinOp::BitAnd, e1, e2)
    }

    /// Immediate subexpressions, function position first.
    pub fn children(&self) -> Vec<&Rc<Exp>> {
        match self {
            Exp::Name(..) | Exp::Lit(_) => Vec::new(),
            Exp::Call(func, args) => {
                let mut children = Vec::with_capacity(args.len() + 1);
                children.push(func);
                children.extend(args);
                children
            }
            Exp::BinOp(_, e1, e2) => vec![e1, e2],
            Exp::Lambda(_, body) => vec![body],
        }
    }

    pub fn preorder(root: &Rc<Exp>) -> Preorder {
        Preorder {
            stack: vec![root.clone()],
        }
    }

    fn prec(&self) -> Prec {
        match self {
            Exp::Lit(lit) if lit.is_negative() => Prec::Factor,
            Exp::Name(..) | Exp::Lit(_) | Exp::Call(..) => Prec::Atom,
            Exp::BinOp(op, _, _) => op.prec(),
            Exp::Lambda(..) => Prec::Lambda,
        }
    }

    /// Print with the fewest parentheses that still read back as the same
    /// tree, given the binding strength the context requires.
    fn pretty(&self, f: &mut Formatter<'_>, ctx: Prec) -> fmt::Result {
        let wrap = self.prec() < ctx;
        if wrap {
            f.write_char('(')?;
        }
        match self {
            Exp::Name(id, _) => f.write_str(id)?,
            Exp::Lit(lit) => write!(f, "{lit}")?,
            Exp::Call(func, args) => {
                func.pretty(f, Prec::Atom)?;
                f.write_char('(')?;
                for (i, arg) in args.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    arg.pretty(f, Prec::Lambda)?;
                }
                f.write_char(')')?;
            }
            Exp::BinOp(op, e1, e2) => {
                let prec = op.prec();
                // Comparisons do not chain, so both sides bind tighter.
                let left = if prec == Prec::Compare { prec.next() } else { prec };
                e1.pretty(f, left)?;
                write!(f, " {op} ")?;
                e2.pretty(f, prec.next())?;
            }
            Exp::Lambda(params, body) => {
                f.write_str("lambda")?;
                if !params.is_empty() {
                    write!(f, " {}", params.join(", "))?;
                }
                f.write_str(": ")?;
                body.pretty(f, Prec::Lambda)?;
            }
        }
        if wrap {
            f.write_char(')')?;
        }
        Ok(())
    }
}

impl Iterator for Preorder {
    type Item = Rc<Exp>;

    fn next(&mut self) -> Option<Rc<Exp>> {
        let e = self.stack.pop()?;
        self.stack.extend(e.children().into_iter().rev().cloned());
        Some(e)
    }
}

impl Literal {
    fn is_negative(&self) -> bool {
        match self {
            Literal::Int(n) => *n < 0,
            Literal::Float(x) => x.is_sign_negative(),
            Literal::Bool(_) | Literal::Str(_) => false,
        }
    }
}

impl BinOp {
    pub(crate) fn prec(self) -> Prec {
        match self {
            BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => Prec::Term,
            BinOp::Add | BinOp::Sub => Prec::Arith,
            BinOp::BitAnd => Prec::BitAnd,
            BinOp::BitXor => Prec::BitXor,
            BinOp::BitOr => Prec::BitOr,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtE | BinOp::Gt | BinOp::GtE => {
                Prec::Compare
            }
        }
    }

    pub fn is_comparison(self) -> bool {
        self.prec() == Prec::Compare
    }
}

impl Prec {
    fn next(self) -> Prec {
        match self {
            Prec::Lambda => Prec::Compare,
            Prec::Compare => Prec::BitOr,
            Prec::BitOr => Prec::BitXor,
            Prec::BitXor => Prec::BitAnd,
            Prec::BitAnd => Prec::Arith,
            Prec::Arith => Prec::Term,
            Prec::Term => Prec::Factor,
            Prec::Factor | Prec::Atom => Prec::Atom,
        }
    }
}

impl Slot {
    /// Read the attached value of `owner`, the leaf holding this slot.
    pub(crate) fn get(&self, owner: &Rc<Exp>) -> Option<Value> {
        match &*self.0.borrow() {
            Some(Attached::Value(v)) => Some(v.clone()),
            Some(Attached::Itself) => Some(Value::Node(Node::new(owner.clone()))),
            None => None,
        }
    }

    pub(crate) fn set(&self, owner: &Rc<Exp>, value: Value) {
        let attached = match value {
            Value::Node(node) if Rc::ptr_eq(node.exp(), owner) => Attached::Itself,
            v => Attached::Value(v),
        };
        *self.0.borrow_mut() = Some(attached);
    }
}

impl Debug for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &*self.0.borrow() {
            Some(Attached::Value(v)) => write!(f, "Slot({v})"),
            Some(Attached::Itself) => f.write_str("Slot(<itself>)"),
            None => f.write_str("Slot(<empty>)"),
        }
    }
}

impl Value {
    pub fn str<S: Into<Rc<str>>>(s: S) -> Self {
        Value::Str(s.into())
    }

    pub fn builtin<S, F>(name: S, func: F) -> Self
    where
        S: Into<Rc<str>>,
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Value::Builtin(Builtin {
            name: name.into(),
            func: Rc::new(func),
        })
    }

    pub fn object<T: HostObject + 'static>(obj: T) -> Self {
        Value::Object(Rc::new(obj))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::Builtin(_) => "builtin_function",
            Value::Closure(_) => "function",
            Value::Object(obj) => obj.type_name(),
            Value::Node(_) => "Node",
        }
    }

    pub(crate) fn as_literal(&self) -> Option<Literal> {
        match self {
            Value::Int(n) => Some(Literal::Int(*n)),
            Value::Float(x) => Some(Literal::Float(*x)),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Str(s) => Some(Literal::Str(s.clone())),
            _ => None,
        }
    }

    /// Identity for reference values, equality for scalars, rendering for
    /// nodes.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(&a.func, &b.func),
            (Value::Closure(a), Value::Closure(b)) => {
                Rc::ptr_eq(&a.body, &b.body) && a.params == b.params
            }
            (Value::Object(a), Value::Object(b)) => {
                Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>()
            }
            (Value::Node(a), Value::Node(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.same(other)
    }
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        match lit {
            Literal::Int(n) => Value::Int(n),
            Literal::Float(x) => Value::Float(x),
            Literal::Bool(b) => Value::Bool(b),
            Literal::Str(s) => Value::Str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Value::Node(node)
    }
}

impl Builtin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn apply(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

impl Closure {
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn body(&self) -> &Rc<Exp> {
        &self.body
    }
}

impl Debug for Builtin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

impl Debug for Closure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({self})")
    }
}

impl Display for Exp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.pretty(f, Prec::Lambda)
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            // Debug switches to exponent form at the same magnitudes as
            // Python's repr; the exponent is signed and at least two digits.
            Literal::Float(x) => {
                let text = format!("{x:?}");
                match text.split_once('e') {
                    Some((mantissa, exp)) => {
                        let (sign, digits) = match exp.strip_prefix('-') {
                            Some(digits) => ('-', digits),
                            None => ('+', exp),
                        };
                        write!(f, "{mantissa}e{sign}{digits:0>2}")
                    }
                    None => f.write_str(&text),
                }
            }
            Literal::Bool(true) => f.write_str("True"),
            Literal::Bool(false) => f.write_str("False"),
            Literal::Str(s) => {
                let quote = if s.contains('\'') && !s.contains('"') {
                    '"'
                } else {
                    '\''
                };
                f.write_char(quote)?;
                for ch in s.chars() {
                    match ch {
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        ch if ch == quote => write!(f, "\\{ch}")?,
                        ch => f.write_char(ch)?,
                    }
                }
                f.write_char(quote)
            }
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::LtE => "<=",
            BinOp::Gt => ">",
            BinOp::GtE => ">=",
        })
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", Literal::Int(*n)),
            Value::Float(x) => write!(f, "{}", Literal::Float(*x)),
            Value::Bool(b) => write!(f, "{}", Literal::Bool(*b)),
            Value::Str(s) => write!(f, "{}", Literal::Str(s.clone())),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name),
            Value::Closure(c) => write!(f, "{c}"),
            Value::Object(obj) => write!(f, "{obj:?}"),
            Value::Node(node) => write!(f, "{node}"),
        }
    }
}

impl Display for Closure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Exp::Lambda(self.params.to_vec(), self.body.clone()).pretty(f, Prec::Lambda)
    }
}
