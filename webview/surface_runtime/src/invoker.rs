//! Type erasure for bound host functions.
//!
//! A Rust function becomes a [`Binding`] through the [`Handler`] trait, which
//! is implemented for every `Fn` of up to eight parameters whose arguments
//! implement `DeserializeOwned` and whose return type implements
//! [`IntoOutcome`]. A trailing [`Rest<T>`] parameter makes the function
//! variadic. The shape of the function is captured once, at bind time, in an
//! [`InvocationDescriptor`]; each script call is then decoded against it.

use crate::error::{Arity, CallError};
use crate::protocol::{self, Reply};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    Nothing,
    Value,
    Error,
    ValueAndError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationDescriptor {
    pub params: usize,
    pub variadic: bool,
    pub returns: ReturnShape,
}

impl InvocationDescriptor {
    pub fn arity(&self) -> Arity {
        if self.variadic {
            Arity::AtLeast(self.params)
        } else {
            Arity::Exactly(self.params)
        }
    }

    pub fn check_arity(&self, got: usize) -> Result<(), CallError> {
        let fits = if self.variadic {
            got >= self.params
        } else {
            got == self.params
        };

        if fits {
            Ok(())
        } else {
            Err(CallError::Arity {
                expected: self.arity(),
                got,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Value),
    Failed(String),
}

impl Outcome {
    fn from_wire(value: Result<Value, serde_json::Error>) -> Self {
        match value {
            Ok(value) => Outcome::Value(value),
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }

    pub fn into_reply(self) -> Reply {
        match self {
            Outcome::Value(value) => Reply::value(&value),
            Outcome::Failed(message) => Reply::error(message),
        }
    }
}

/// Trailing variadic parameter: collects every argument past the fixed ones.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rest<T>(pub Vec<T>);

impl<T> Rest<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Deref for Rest<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

pub trait ReplyValue {
    const UNIT: bool = false;

    fn into_wire(self) -> Result<Value, serde_json::Error>;
}

pub trait IntoOutcome {
    const SHAPE: ReturnShape;

    fn into_outcome(self) -> Outcome;
}

impl ReplyValue for () {
    const UNIT: bool = true;

    fn into_wire(self) -> Result<Value, serde_json::Error> {
        Ok(Value::Null)
    }
}

impl IntoOutcome for () {
    const SHAPE: ReturnShape = ReturnShape::Nothing;

    fn into_outcome(self) -> Outcome {
        Outcome::Value(Value::Null)
    }
}

impl<T: ReplyValue, E: fmt::Display> IntoOutcome for Result<T, E> {
    const SHAPE: ReturnShape = if T::UNIT {
        ReturnShape::Error
    } else {
        ReturnShape::ValueAndError
    };

    fn into_outcome(self) -> Outcome {
        match self {
            Ok(value) => Outcome::from_wire(value.into_wire()),
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }
}

macro_rules! reply_value {
    ($($ty:ty),* $(,)?) => {$(
        impl ReplyValue for $ty {
            fn into_wire(self) -> Result<Value, serde_json::Error> {
                serde_json::to_value(self)
            }
        }

        impl IntoOutcome for $ty {
            const SHAPE: ReturnShape = ReturnShape::Value;

            fn into_outcome(self) -> Outcome {
                Outcome::from_wire(self.into_wire())
            }
        }
    )*};
}

macro_rules! generic_reply_value {
    ($(impl<$gen:ident> for $ty:ty;)*) => {$(
        impl<$gen: Serialize> ReplyValue for $ty {
            fn into_wire(self) -> Result<Value, serde_json::Error> {
                serde_json::to_value(self)
            }
        }

        impl<$gen: Serialize> IntoOutcome for $ty {
            const SHAPE: ReturnShape = ReturnShape::Value;

            fn into_outcome(self) -> Outcome {
                Outcome::from_wire(self.into_wire())
            }
        }
    )*};
}

reply_value!(
    bool,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    char,
    String,
    &'static str,
    Value,
);

generic_reply_value! {
    impl<T> for Vec<T>;
    impl<T> for Option<T>;
    impl<T> for HashMap<String, T>;
    impl<T> for BTreeMap<String, T>;
    impl<T> for Json<T>;
}

pub struct Variadic<P, T>(PhantomData<fn() -> (P, T)>);

/// A host function that can be called from script.
///
/// `M` is a marker describing the parameter list; it is inferred and never
/// named by callers.
pub trait Handler<M>: Send + Sync + 'static {
    fn descriptor() -> InvocationDescriptor;

    /// Decodes `args` and runs the function. The caller has already checked
    /// the argument count against [`Handler::descriptor`].
    fn call(&self, args: Vec<Value>) -> Result<Outcome, CallError>;
}

struct ArgCursor {
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl ArgCursor {
    fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter(),
            index: 0,
        }
    }

    fn next<T: DeserializeOwned>(&mut self) -> Result<T, CallError> {
        let index = self.index;
        self.index += 1;
        let raw = self.values.next().unwrap_or(Value::Null);
        serde_json::from_value(raw).map_err(|source| CallError::Argument { index, source })
    }

    fn rest<T: DeserializeOwned>(self) -> Result<Rest<T>, CallError> {
        let start = self.index;
        self.values
            .enumerate()
            .map(|(offset, raw)| {
                serde_json::from_value(raw).map_err(|source| CallError::Argument {
                    index: start + offset,
                    source,
                })
            })
            .collect::<Result<Vec<T>, CallError>>()
            .map(Rest)
    }
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoOutcome,
            $($arg: DeserializeOwned,)*
        {
            fn descriptor() -> InvocationDescriptor {
                InvocationDescriptor {
                    params: count!($($arg)*),
                    variadic: false,
                    returns: R::SHAPE,
                }
            }

            fn call(&self, args: Vec<Value>) -> Result<Outcome, CallError> {
                let mut cursor = ArgCursor::new(args);
                $(let $arg: $arg = cursor.next()?;)*
                Ok((self)($($arg),*).into_outcome())
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, $($arg,)* T> Handler<Variadic<($($arg,)*), T>> for F
        where
            F: Fn($($arg,)* Rest<T>) -> R + Send + Sync + 'static,
            R: IntoOutcome,
            $($arg: DeserializeOwned,)*
            T: DeserializeOwned,
        {
            fn descriptor() -> InvocationDescriptor {
                InvocationDescriptor {
                    params: count!($($arg)*),
                    variadic: true,
                    returns: R::SHAPE,
                }
            }

            fn call(&self, args: Vec<Value>) -> Result<Outcome, CallError> {
                let mut cursor = ArgCursor::new(args);
                $(let $arg: $arg = cursor.next()?;)*
                let rest = cursor.rest::<T>()?;
                Ok((self)($($arg,)* rest).into_outcome())
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

type ErasedCall = Box<dyn Fn(Vec<Value>) -> Result<Outcome, CallError> + Send + Sync>;

pub struct Binding {
    name: String,
    descriptor: InvocationDescriptor,
    call: ErasedCall,
}

impl Binding {
    pub fn new<M, H>(name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<M>,
    {
        Self {
            name: name.into(),
            descriptor: H::descriptor(),
            call: Box::new(move |args| handler.call(args)),
        }
    }

    pub(crate) fn from_parts(
        name: String,
        descriptor: InvocationDescriptor,
        call: ErasedCall,
    ) -> Self {
        Self {
            name,
            descriptor,
            call,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> InvocationDescriptor {
        self.descriptor
    }

    /// Runs one script call. Decode and arity failures never reach the function.
    pub fn invoke(&self, request_id: &str, args: &str) -> Reply {
        match self.try_invoke(args) {
            Ok(outcome) => outcome.into_reply(),
            Err(err) => {
                tracing::debug!(binding = %self.name, request_id, "call rejected: {err}");
                Reply::error(err)
            }
        }
    }

    fn try_invoke(&self, args: &str) -> Result<Outcome, CallError> {
        let values = protocol::decode_args(args).map_err(CallError::Malformed)?;
        self.descriptor.check_arity(values.len())?;
        (self.call)(values)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn message(reply: &Reply) -> String {
        protocol::decode_value(&reply.payload).expect("error payload is a json string")
    }

    #[test]
    fn descriptor_is_taken_from_the_signature() {
        let binding = Binding::new("add", |a: i64, b: i64| a + b);
        assert_eq!(
            binding.descriptor(),
            InvocationDescriptor {
                params: 2,
                variadic: false,
                returns: ReturnShape::Value
            }
        );

        let binding = Binding::new("log", |_line: String, _rest: Rest<Value>| {});
        assert_eq!(binding.descriptor().params, 1);
        assert!(binding.descriptor().variadic);
        assert_eq!(binding.descriptor().returns, ReturnShape::Nothing);

        let binding = Binding::new("check", || -> Result<(), String> { Ok(()) });
        assert_eq!(binding.descriptor().returns, ReturnShape::Error);

        let binding = Binding::new("load", || -> Result<u32, String> { Ok(1) });
        assert_eq!(binding.descriptor().returns, ReturnShape::ValueAndError);
    }

    #[test]
    fn wrong_argument_type_never_enters_the_function() {
        let entered = Arc::new(AtomicBool::new(false));
        let flag = entered.clone();
        let binding = Binding::new("f", move |a: i64, b: String| -> Result<String, String> {
            flag.store(true, Ordering::SeqCst);
            Ok(format!("{a}{b}"))
        });

        let reply = binding.invoke("1", r#"["5","hi"]"#);
        assert_eq!(reply.status, Status::Error);
        assert!(message(&reply).starts_with("argument 0:"));
        assert!(!entered.load(Ordering::SeqCst));

        let reply = binding.invoke("2", r#"[5,"hi"]"#);
        assert_eq!(reply, Reply::value("5hi"));
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn later_argument_failure_aborts_the_whole_call() {
        let entered = Arc::new(AtomicBool::new(false));
        let flag = entered.clone();
        let binding = Binding::new("f", move |_a: String, _b: bool| {
            flag.store(true, Ordering::SeqCst);
        });

        let reply = binding.invoke("1", r#"["ok", "not a bool"]"#);
        assert!(message(&reply).starts_with("argument 1:"));
        assert!(!entered.load(Ordering::SeqCst));
    }

    #[test]
    fn variadic_tail_collects_extra_arguments() {
        let binding = Binding::new("f", |prefix: String, rest: Rest<i64>| {
            format!("{prefix}:{:?}", rest.into_inner())
        });

        assert_eq!(binding.invoke("1", r#"["x",1,2,3]"#), Reply::value("x:[1, 2, 3]"));
        assert_eq!(binding.invoke("2", r#"["x"]"#), Reply::value("x:[]"));

        let reply = binding.invoke("3", "[]");
        assert_eq!(reply.status, Status::Error);
        assert_eq!(
            message(&reply),
            "function arguments mismatch: expected at least 1, got 0"
        );
    }

    #[test]
    fn variadic_element_decode_failure_is_positional() {
        let binding = Binding::new("sum", |rest: Rest<i64>| rest.iter().sum::<i64>());
        assert_eq!(binding.invoke("1", "[1,2,3]"), Reply::value(&6));

        let reply = binding.invoke("2", r#"[1,"two"]"#);
        assert!(message(&reply).starts_with("argument 1:"));
    }

    #[test]
    fn fixed_arity_must_match_exactly() {
        let binding = Binding::new("pair", |a: u8, b: u8| u16::from(a) + u16::from(b));

        for args in ["[]", "[1]", "[1,2,3]"] {
            let reply = binding.invoke("1", args);
            assert_eq!(reply.status, Status::Error, "args {args}");
            assert!(message(&reply).starts_with("function arguments mismatch"));
        }
    }

    #[test]
    fn malformed_request_is_reported() {
        let binding = Binding::new("noop", || {});
        let reply = binding.invoke("1", "{not json");
        assert_eq!(reply.status, Status::Error);
        assert!(message(&reply).starts_with("malformed call arguments"));
    }

    #[test]
    fn return_shapes_are_normalized() {
        let nothing = Binding::new("nothing", || {});
        assert_eq!(nothing.invoke("1", "[]"), Reply::null());

        let value = Binding::new("value", || vec![1, 2]);
        assert_eq!(value.invoke("1", "[]").payload, "[1,2]");

        let ok_unit = Binding::new("ok", || -> Result<(), String> { Ok(()) });
        assert_eq!(ok_unit.invoke("1", "[]"), Reply::null());

        let failed_unit = Binding::new("fail", || -> Result<(), String> { Err("nope".into()) });
        let reply = failed_unit.invoke("1", "[]");
        assert_eq!(reply.status, Status::Error);
        assert_eq!(message(&reply), "nope");

        let pair = Binding::new("pair", |fail: bool| -> Result<Option<String>, String> {
            if fail {
                Err("bad input".to_string())
            } else {
                Ok(Some("fine".to_string()))
            }
        });
        assert_eq!(pair.invoke("1", "[false]"), Reply::value("fine"));
        assert_eq!(message(&pair.invoke("2", "[true]")), "bad input");
    }

    #[test]
    fn structured_arguments_and_results() {
        #[derive(Deserialize)]
        struct Point {
            x: f64,
            y: f64,
        }

        #[derive(Serialize)]
        struct Length {
            value: f64,
        }

        let binding = Binding::new("len", |p: Point| {
            Json(Length {
                value: (p.x * p.x + p.y * p.y).sqrt(),
            })
        });

        let reply = binding.invoke("1", r#"[{"x":3,"y":4}]"#);
        assert_eq!(reply.payload, r#"{"value":5.0}"#);
    }

    #[test]
    fn optional_parameters_accept_null() {
        let binding = Binding::new("greet", |name: Option<String>| {
            format!("hello {}", name.unwrap_or_else(|| "world".to_string()))
        });
        assert_eq!(binding.invoke("1", "[null]"), Reply::value("hello world"));
        assert_eq!(binding.invoke("2", r#"["ann"]"#), Reply::value("hello ann"));
    }

    #[test]
    fn non_finite_floats_encode_as_null() {
        let binding = Binding::new("nan_map", || {
            let mut map = HashMap::new();
            map.insert("bad".to_string(), f64::NAN);
            map
        });
        assert_eq!(binding.invoke("1", "[]").payload, r#"{"bad":null}"#);
    }
}
