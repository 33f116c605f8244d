//! Bindings whose shape is only known at runtime.
//!
//! Embedders that host another language (a plugin runtime, a scripting
//! engine) describe each function by a declared signature instead of a Rust
//! type. The signature is validated when the value is bound, which is where
//! `NotCallable`, `TooManyReturns` and `SecondReturnNotError` come from.

use crate::error::{BindError, CallError};
use crate::invoker::{Binding, InvocationDescriptor, Outcome, ReturnShape};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Any,
    Bool,
    Number,
    Integer,
    String,
    Array,
    Object,
}

impl ParamKind {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::Any => true,
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::String => value.is_string(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Any => "any",
            ParamKind::Bool => "bool",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::String => "string",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Value,
    /// `null` means no error; a string is the error message; anything else
    /// is rendered as JSON text.
    Error,
}

pub type ForeignBody = Arc<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync>;

#[derive(Clone)]
pub struct ForeignFunction {
    params: Vec<ParamKind>,
    rest: Option<ParamKind>,
    returns: Vec<ReturnKind>,
    body: ForeignBody,
}

impl ForeignFunction {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'static,
    {
        Self {
            params: Vec::new(),
            rest: None,
            returns: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn param(mut self, kind: ParamKind) -> Self {
        self.params.push(kind);
        self
    }

    pub fn rest(mut self, kind: ParamKind) -> Self {
        self.rest = Some(kind);
        self
    }

    pub fn returns(mut self, kind: ReturnKind) -> Self {
        self.returns.push(kind);
        self
    }

    fn shape(&self) -> Result<ReturnShape, BindError> {
        match self.returns.as_slice() {
            [] => Ok(ReturnShape::Nothing),
            [ReturnKind::Value] => Ok(ReturnShape::Value),
            [ReturnKind::Error] => Ok(ReturnShape::Error),
            [_, ReturnKind::Error] => Ok(ReturnShape::ValueAndError),
            [_, _] => Err(BindError::SecondReturnNotError),
            more => Err(BindError::TooManyReturns(more.len())),
        }
    }

    fn call(&self, args: Vec<Value>) -> Result<Outcome, CallError> {
        for (index, arg) in args.iter().enumerate() {
            let kind = self
                .params
                .get(index)
                .copied()
                .or(self.rest)
                .unwrap_or(ParamKind::Any);

            if !kind.accepts(arg) {
                return Err(CallError::ArgumentKind {
                    index,
                    expected: kind.name(),
                    got: kind_of(arg),
                });
            }
        }

        let results = (self.body)(args);
        if results.len() != self.returns.len() {
            return Err(CallError::ReturnShape(results.len()));
        }

        let mut value = Value::Null;
        for (kind, result) in self.returns.iter().zip(results) {
            match kind {
                ReturnKind::Value => value = result,
                ReturnKind::Error => match result {
                    Value::Null => {}
                    Value::String(message) => return Ok(Outcome::Failed(message)),
                    other => return Ok(Outcome::Failed(other.to_string())),
                },
            }
        }

        Ok(Outcome::Value(value))
    }
}

impl fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignFunction")
            .field("params", &self.params)
            .field("rest", &self.rest)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum HostValue {
    Function(ForeignFunction),
    Data(Value),
}

impl Binding {
    /// Validates a runtime-described callable and erases it into a binding.
    pub fn foreign(name: impl Into<String>, value: HostValue) -> Result<Binding, BindError> {
        let HostValue::Function(function) = value else {
            return Err(BindError::NotCallable);
        };

        let descriptor = InvocationDescriptor {
            params: function.params.len(),
            variadic: function.rest.is_some(),
            returns: function.shape()?,
        };

        Ok(Binding::from_parts(
            name.into(),
            descriptor,
            Box::new(move |args| function.call(args)),
        ))
    }
}
