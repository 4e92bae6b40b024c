//! Turning closures into `Lambda` trees without capturing names.
//!
//! Rust closures cannot be inspected, so a closure is lifted from an explicit
//! description: its parameter names, the values it captures, and a body that
//! is run once on placeholder nodes. Values of `Lambda` expressions
//! ([`Closure`]) carry all of this already.

use std::collections::BTreeSet;
use std::rc::Rc;

use log::debug;

use crate::base::{Closure, Exp, Value};
use crate::error::{Error, Result};
use crate::eval::Vm;
use crate::node::Node;
use crate::reify::Reify;

/// Names occurring free in `exp`.
pub fn free_vars(exp: &Exp) -> BTreeSet<String> {
    match exp {
        Exp::Name(id, _) => BTreeSet::from([id.clone()]),
        Exp::Lambda(params, body) => {
            let mut vars = free_vars(body);
            for param in params {
                vars.remove(param);
            }
            vars
        }
        _ => exp
            .children()
            .into_iter()
            .flat_map(|child| free_vars(child))
            .collect(),
    }
}

/// `base` itself when it is not taken. Otherwise `base` stripped of trailing
/// digits, followed by the smallest positive integer giving a free name.
pub fn fresh(base: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_owned();
    }
    let stem = base.trim_end_matches(|ch: char| ch.is_ascii_digit());
    let mut i = 1usize;
    loop {
        let candidate = format!("{stem}{i}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

/// Lift a closure with parameters `params` that captures `captured`. `body`
/// is called once with a placeholder node per parameter and its result
/// becomes the lambda body.
pub fn lift<F, R>(
    vm: &mut Vm,
    params: &[&str],
    captured: &[(&str, Value)],
    body: F,
) -> Result<Rc<Exp>>
where
    F: FnOnce(&[Node]) -> R,
    R: Reify,
{
    check_params(params)?;
    let params: Vec<String> = params.iter().map(|&p| p.to_owned()).collect();
    let free = free_in_values(captured.iter().map(|(_, v)| v));
    let globals: Vec<String> = vm.globals().names().map(str::to_owned).collect();
    let params = hygienic_params(&params, &free, globals);
    let args = placeholders(&params);
    let body = body(&args).reify(vm)?;
    Ok(Exp::lambda(params, body))
}

/// Lift the value of a `Lambda` expression, re-running its body on
/// placeholders.
pub fn lift_closure(vm: &mut Vm, closure: &Closure) -> Result<Rc<Exp>> {
    let mut referenced = free_vars(closure.body());
    for param in closure.params() {
        referenced.remove(param);
    }
    let free = free_in_values(referenced.iter().filter_map(|name| closure.frame.get(name)));
    let globals: Vec<String> = referenced
        .iter()
        .filter(|name| vm.globals().contains(name.as_str()))
        .cloned()
        .collect();
    let params = hygienic_params(closure.params(), &free, globals);
    let args = placeholders(&params).into_iter().map(Value::Node).collect();
    let body = vm.apply(Value::Closure(closure.clone()), args)?;
    Ok(Exp::lambda(params, vm.reify_value(body)))
}

/// Rename every parameter that also occurs free in a captured value. New names
/// avoid the captured free names, the globals and the other parameters.
fn hygienic_params(
    params: &[String],
    free: &BTreeSet<String>,
    globals: impl IntoIterator<Item = String>,
) -> Vec<String> {
    let mut taken = free.clone();
    taken.extend(globals);
    taken.extend(params.iter().cloned());
    params
        .iter()
        .map(|param| {
            if !free.contains(param) {
                return param.clone();
            }
            let renamed = fresh(param, &taken);
            debug!("renaming parameter {param} to {renamed}");
            taken.insert(renamed.clone());
            renamed
        })
        .collect()
}

fn free_in_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> BTreeSet<String> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::Node(node) => Some(free_vars(node.exp())),
            _ => None,
        })
        .flatten()
        .collect()
}

fn placeholders(params: &[String]) -> Vec<Node> {
    params.iter().map(|p| Node::placeholder(p.as_str())).collect()
}

fn check_params(params: &[&str]) -> Result<()> {
    for (i, param) in params.iter().enumerate() {
        let mut chars = param.chars();
        let valid = chars
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
            && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            && *param != "lambda";
        if !valid {
            return Err(Error::InvalidOperand(format!(
                "'{param}' is not a valid parameter name",
            )));
        }
        if params[..i].contains(param) {
            return Err(Error::InvalidOperand(format!(
                "duplicate parameter '{param}'",
            )));
        }
    }
    Ok(())
}
