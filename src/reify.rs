use std::rc::Rc;

use log::trace;

use crate::base::{Exp, Literal, Value};
use crate::error::Result;
use crate::eval::Vm;
use crate::node::Node;
use crate::parse::parse_exp;

/// Anything that can be turned into an expression tree.
pub trait Reify {
    fn reify(self, vm: &mut Vm) -> Result<Rc<Exp>>;
}

impl Reify for Rc<Exp> {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(self)
    }
}

impl Reify for &Rc<Exp> {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(self.clone())
    }
}

impl Reify for Node {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(self.exp().clone())
    }
}

impl Reify for &Node {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(self.exp().clone())
    }
}

/// Source text, parsed as a single expression.
impl Reify for &str {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        parse_exp(self)
    }
}

impl Reify for String {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        parse_exp(&self)
    }
}

impl Reify for Literal {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(Exp::lit(self))
    }
}

impl Reify for i64 {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(Exp::int(self))
    }
}

impl Reify for i32 {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(Exp::int(self.into()))
    }
}

impl Reify for f64 {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(Exp::lit(Literal::Float(self)))
    }
}

impl Reify for bool {
    fn reify(self, _vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(Exp::lit(Literal::Bool(self)))
    }
}

/// Scalars become literals, nodes give up their tree and everything else
/// becomes a fresh name carrying the value.
impl Reify for Value {
    fn reify(self, vm: &mut Vm) -> Result<Rc<Exp>> {
        Ok(vm.reify_value(self))
    }
}

impl Vm {
    pub fn reify<T: Reify>(&mut self, x: T) -> Result<Rc<Exp>> {
        x.reify(self)
    }

    pub fn reify_value(&mut self, value: Value) -> Rc<Exp> {
        if let Value::Node(node) = value {
            return node.exp().clone();
        }
        match value.as_literal() {
            Some(lit) => Exp::lit(lit),
            None => self.opaque(value),
        }
    }

    /// A leaf with a never-used name, standing for `value`.
    pub fn opaque(&mut self, value: Value) -> Rc<Exp> {
        let name = self.fresh();
        trace!("naming {} value {name}", value.type_name());
        let leaf = Exp::name(name);
        if let Exp::Name(_, slot) = &*leaf {
            slot.set(&leaf, value);
        }
        leaf
    }

    fn fresh(&mut self) -> String {
        self.fresh += 1;
        format!("{}{}", self.config.name_prefix, self.fresh - 1)
    }
}
