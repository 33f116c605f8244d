use crate::registry::{Token, TokenKind};
use thiserror::Error;

/// Raised synchronously when a callable is registered; the binding is never installed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("only functions can be bound")]
    NotCallable,

    #[error("function may only return a value or a value+error, got {0} return values")]
    TooManyReturns(usize),

    #[error("second return value must be an error")]
    SecondReturnNotError,

    #[error("a binding named '{0}' already exists")]
    DuplicateName(String),

    #[error("binding name must not be empty")]
    EmptyName,

    #[error("surface has been destroyed")]
    Destroyed,
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("malformed call arguments: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("function arguments mismatch: expected {expected}, got {got}")]
    Arity { expected: Arity, got: usize },

    #[error("argument {index}: {source}")]
    Argument {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("argument {index}: expected {expected}, got {got}")]
    ArgumentKind {
        index: usize,
        expected: &'static str,
        got: &'static str,
    },

    #[error("unexpected number of return values: {0}")]
    ReturnShape(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exactly(count) => write!(f, "{count}"),
            Arity::AtLeast(count) => write!(f, "at least {count}"),
        }
    }
}

/// A token reported by the native layer that the registry does not know.
///
/// The native side either reported a one-shot token twice or invented one;
/// neither can be recovered from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown {kind} token {token}")]
    UnknownToken { kind: TokenKind, token: Token },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("surface has been destroyed")]
    Destroyed,

    #[error("surface is already running")]
    AlreadyRunning,

    #[error("native surface could not be created")]
    CreateFailed,

    #[error("this native layer only resolves tokens in the global registry")]
    RegistryMismatch,

    #[error("bindings are added and removed through bind, not posted")]
    ReservedOperation,

    #[error(transparent)]
    Bind(#[from] BindError),
}
