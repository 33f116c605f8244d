//! Host side of a webview surface: bind Rust functions as script globals and
//! schedule work onto the surface's UI thread from anywhere.
//!
//! The native layer only ever sees integer [`Token`]s. A token either names
//! a queued [`Dispatcher::dispatch`] closure or a [`Binding`]; the
//! [`Trampoline`] turns the token back into host state on the UI thread.

pub mod bridge;
pub mod error;
#[cfg(feature = "webview-ffi")]
pub mod ffi;
pub mod foreign;
pub mod headless;
pub mod invoker;
pub mod native;
pub mod protocol;
pub mod registry;
pub mod surface;

pub use crate::bridge::{Dispatcher, SurfaceState, Trampoline};
pub use crate::error::{Arity, BindError, CallError, RegistryError, SurfaceError};
#[cfg(feature = "webview-ffi")]
pub use crate::ffi::WebviewLayer;
pub use crate::foreign::{ForeignFunction, HostValue, ParamKind, ReturnKind};
pub use crate::headless::{HeadlessLayer, HeadlessProbe};
pub use crate::invoker::{
    Binding, Handler, IntoOutcome, InvocationDescriptor, Json, Outcome, ReplyValue, Rest,
    ReturnShape,
};
pub use crate::native::{NativeLayer, NativeRemote, SizeHint, SurfaceOp};
pub use crate::protocol::{Reply, Status, escape_js, html_data_url};
pub use crate::registry::{Registry, SurfaceId, Token, TokenKind};
pub use crate::surface::Surface;
pub use serde_json;
