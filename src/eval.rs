use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use im_rc::OrdMap;

use crate::base::{BinOp, Closure, Exp, Value};
use crate::config::{Config, Conflicts};
use crate::error::{Error, Result};
use crate::node::Node;
use crate::reify::Reify;

/// Name to value bindings.
#[derive(Clone, Default, PartialEq)]
pub struct Env {
    bindings: OrdMap<String, Value>,
}

/// The engine: evaluates trees and mints names for opaque values.
#[derive(Clone, Debug)]
pub struct Vm {
    pub(crate) config: Config,
    pub(crate) fresh: usize,
    pub(crate) globals: Env,
}

/// Where names are looked up while evaluating: the parameters of enclosing
/// lambdas, then the locals of a top-level evaluation, then the globals.
///
/// A lambda body runs without locals, so values attached to leaves inside it
/// are only seen through globals.
struct Scope<'a> {
    frame: Env,
    locals: Option<&'a Env>,
}

impl Env {
    pub fn new() -> Self {
        Env {
            bindings: OrdMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings of `self`, replaced by those of `other` where both are bound.
    pub fn overlay(self, other: &Env) -> Env {
        Env {
            bindings: other.bindings.clone().union(self.bindings),
        }
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Env {
    fn from_iter<T: IntoIterator<Item = (S, Value)>>(iter: T) -> Self {
        let mut env = Env::new();
        for (name, value) in iter {
            env.insert(name, value);
        }
        env
    }
}

impl Debug for Env {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.iter()
                    .map(|(name, value)| (name, format!("{value}"), value.type_name())),
            )
            .finish()
    }
}

/// Collect the values attached to the `Name` leaves of `exp` into `env`
/// (or a new environment). Leaf bindings replace bindings already in `env`.
pub fn build_env(exp: &Rc<Exp>, env: Option<Env>, conflicts: Conflicts) -> Result<Env> {
    let mut leaves = Env::new();
    for e in Exp::preorder(exp) {
        let Exp::Name(id, slot) = &*e else {
            continue;
        };
        let Some(value) = slot.get(&e) else {
            continue;
        };
        if conflicts == Conflicts::Reject {
            if let Some(prev) = leaves.get(id) {
                if !prev.same(&value) {
                    return Err(Error::ConflictingBinding(id.clone()));
                }
            }
        }
        leaves.insert(id.clone(), value);
    }
    Ok(match env {
        Some(env) => env.overlay(&leaves),
        None => leaves,
    })
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Vm {
            fresh: config.first_id,
            config,
            globals: Env::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bindings visible everywhere, including inside lambda bodies.
    pub fn globals(&self) -> &Env {
        &self.globals
    }

    pub fn define<S: Into<String>>(&mut self, name: S, value: Value) {
        self.globals.insert(name, value);
    }

    pub fn define_builtin<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        self.define(name, Value::builtin(name, func));
    }

    /// Evaluate `x` with `env` as locals, after adding the values attached to
    /// its leaves.
    pub fn eval<T: Reify>(&mut self, x: T, env: Option<Env>) -> Result<Value> {
        let exp = x.reify(self)?;
        let locals = build_env(&exp, env, self.config.conflicts)?;
        let scope = Scope {
            frame: Env::new(),
            locals: Some(&locals),
        };
        self.eval_scoped(&exp, &scope)
    }

    /// Canonical text of `x`.
    pub fn unparse<T: Reify>(&mut self, x: T) -> Result<String> {
        Ok(x.reify(self)?.to_string())
    }

    fn eval_scoped(&mut self, e: &Rc<Exp>, scope: &Scope<'_>) -> Result<Value> {
        match &**e {
            Exp::Name(id, _) => self.lookup(id, scope),
            Exp::Lit(lit) => Ok(Value::from(lit.clone())),
            Exp::Call(func, args) => {
                let func = self.eval_scoped(func, scope)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval_scoped(arg, scope))
                    .collect::<Result<Vec<_>>>()?;
                self.apply(func, args)
            }
            Exp::BinOp(op, e1, e2) => {
                let v1 = self.eval_scoped(e1, scope)?;
                let v2 = self.eval_scoped(e2, scope)?;
                self.binary(*op, v1, v2)
            }
            Exp::Lambda(params, body) => Ok(Value::Closure(Closure {
                params: params.as_slice().into(),
                body: body.clone(),
                frame: scope.frame.clone(),
            })),
        }
    }

    fn lookup(&self, id: &str, scope: &Scope<'_>) -> Result<Value> {
        scope
            .frame
            .get(id)
            .or_else(|| scope.locals.and_then(|locals| locals.get(id)))
            .or_else(|| self.globals.get(id))
            .cloned()
            .ok_or_else(|| Error::Unbound(id.to_owned()))
    }

    /// Call `func`. Calling a symbolic node builds a call node instead.
    pub(crate) fn apply(&mut self, func: Value, args: Vec<Value>) -> Result<Value> {
        match func {
            Value::Builtin(b) => b.apply(&args),
            Value::Closure(c) => {
                if c.params.len() != args.len() {
                    return Err(Error::Arity {
                        name: "<lambda>".to_owned(),
                        expected: c.params.len(),
                        found: args.len(),
                    });
                }
                let mut frame = c.frame.clone();
                for (param, arg) in c.params.iter().zip(args) {
                    frame.insert(param.clone(), arg);
                }
                let scope = Scope {
                    frame,
                    locals: None,
                };
                self.eval_scoped(&c.body, &scope)
            }
            Value::Object(obj) => obj.call(&args),
            Value::Node(node) => {
                let args = args.into_iter().map(|arg| self.reify_value(arg)).collect();
                Ok(Value::Node(Node::new(Exp::call(node.exp().clone(), args))))
            }
            v => Err(Error::NotCallable(v.type_name().to_owned())),
        }
    }

    /// Apply `op`, composing a new node when either side is symbolic.
    fn binary(&mut self, op: BinOp, v1: Value, v2: Value) -> Result<Value> {
        if matches!(v1, Value::Node(_)) || matches!(v2, Value::Node(_)) {
            let e1 = self.reify_value(v1);
            let e2 = self.reify_value(v2);
            return Ok(Value::Node(Node::new(Exp::binop(op, e1, e2))));
        }
        host_binary(op, &v1, &v2)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

/// Apply `op` to two concrete values.
pub(crate) fn host_binary(op: BinOp, v1: &Value, v2: &Value) -> Result<Value> {
    if let Value::Object(obj) = v1 {
        return obj.binary(op, v2);
    }
    let res = match (op, v1, v2) {
        (BinOp::Eq, _, _) => Some(Ok(Value::Bool(loose_eq(v1, v2)))),
        (BinOp::NotEq, _, _) => Some(Ok(Value::Bool(!loose_eq(v1, v2)))),
        (BinOp::BitAnd, Value::Bool(a), Value::Bool(b)) => Some(Ok(Value::Bool(a & b))),
        (BinOp::BitOr, Value::Bool(a), Value::Bool(b)) => Some(Ok(Value::Bool(a | b))),
        (BinOp::BitXor, Value::Bool(a), Value::Bool(b)) => Some(Ok(Value::Bool(a ^ b))),
        (op, Value::Str(a), Value::Str(b)) => str_binary(op, a, b),
        _ => match (as_int(v1), as_int(v2)) {
            (Some(a), Some(b)) => Some(int_binary(op, a, b)),
            _ => match (as_float(v1), as_float(v2)) {
                (Some(a), Some(b)) => float_binary(op, a, b),
                _ => None,
            },
        },
    };
    res.unwrap_or_else(|| {
        Err(Error::Unsupported {
            op: op.to_string(),
            lhs: v1.type_name().to_owned(),
            rhs: v2.type_name().to_owned(),
        })
    })
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(*n),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Float(x) => Some(*x),
        v => as_int(v).map(|n| n as f64),
    }
}

fn loose_eq(v1: &Value, v2: &Value) -> bool {
    match (as_int(v1), as_int(v2)) {
        (Some(a), Some(b)) => a == b,
        _ => match (as_float(v1), as_float(v2)) {
            (Some(a), Some(b)) => a == b,
            _ => v1.same(v2),
        },
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value> {
    let n = match op {
        BinOp::Add => a.checked_add(b).ok_or(Error::Overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or(Error::Overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or(Error::Overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(Error::DivisionByZero);
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(Error::DivisionByZero);
            }
            let q = a.checked_div(b).ok_or(Error::Overflow)?;
            if a % b != 0 && (a < 0) != (b < 0) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(Error::DivisionByZero);
            }
            // The result takes the sign of the divisor.
            let r = a.wrapping_rem(b);
            if r != 0 && (r < 0) != (b < 0) {
                r + b
            } else {
                r
            }
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Eq => return Ok(Value::Bool(a == b)),
        BinOp::NotEq => return Ok(Value::Bool(a != b)),
        BinOp::Lt => return Ok(Value::Bool(a < b)),
        BinOp::LtE => return Ok(Value::Bool(a <= b)),
        BinOp::Gt => return Ok(Value::Bool(a > b)),
        BinOp::GtE => return Ok(Value::Bool(a >= b)),
    };
    Ok(Value::Int(n))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Option<Result<Value>> {
    let x = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Some(Err(Error::DivisionByZero));
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => return None,
        BinOp::Eq => return Some(Ok(Value::Bool(a == b))),
        BinOp::NotEq => return Some(Ok(Value::Bool(a != b))),
        BinOp::Lt => return Some(Ok(Value::Bool(a < b))),
        BinOp::LtE => return Some(Ok(Value::Bool(a <= b))),
        BinOp::Gt => return Some(Ok(Value::Bool(a > b))),
        BinOp::GtE => return Some(Ok(Value::Bool(a >= b))),
    };
    Some(Ok(Value::Float(x)))
}

fn str_binary(op: BinOp, a: &str, b: &str) -> Option<Result<Value>> {
    let v = match op {
        BinOp::Add => Value::str(format!("{a}{b}")),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::LtE => Value::Bool(a <= b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::GtE => Value::Bool(a >= b),
        _ => return None,
    };
    Some(Ok(v))
}
