//! Reify values into expression trees, compose the trees with ordinary
//! operators, and evaluate whatever parts of them can already be resolved.
//!
//! ```
//! use symbolize::{Node, Value, Vm};
//!
//! let mut vm = Vm::new();
//! let x = Node::placeholder("x");
//! let f = Node::symbol("f");
//! let e = f.call([&x]) + 1;
//! assert_eq!(e.render(), "f(x) + 1");
//! assert_eq!(e.eval(&mut vm).unwrap(), None);
//!
//! vm.define_builtin("f", |args| Ok(args[0].clone()));
//! x.set_value(Value::Int(2)).unwrap();
//! assert_eq!(e.eval(&mut vm).unwrap(), Some(Value::Int(3)));
//! ```

mod base;
mod config;
mod error;
mod eval;
pub mod lambda;
mod node;
pub mod parse;
mod reify;

pub use base::{BinOp, Builtin, Closure, Exp, HostObject, Literal, Preorder, Slot, Value};
pub use config::{Config, Conflicts};
pub use error::{Error, Result};
pub use eval::{build_env, Env, Vm};
pub use lambda::{free_vars, fresh};
pub use node::{Node, Outline};
pub use parse::parse_exp;
pub use reify::Reify;
