use thiserror::Error;

/// Errors raised while reifying, composing or evaluating expressions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Malformed source text handed to the reifier.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// A free identifier with neither an attached value nor a binding.
    #[error("name '{0}' is not defined")]
    Unbound(String),

    #[error("'{0}' object is not callable")]
    NotCallable(String),

    #[error("{name}() takes {expected} positional arguments but {found} were given")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unsupported operand type(s) for {op}: '{lhs}' and '{rhs}'")]
    Unsupported {
        op: String,
        lhs: String,
        rhs: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    /// Two leaves of one tree share a name but carry different values.
    #[error("name '{0}' is bound to conflicting values within one expression")]
    ConflictingBinding(String),

    /// A tree of the wrong shape was passed where a specific kind is required.
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// Raised by a builtin or a host object.
    #[error("{0}")]
    Host(String),
}

pub type Result<T> = std::result::Result<T, Error>;
