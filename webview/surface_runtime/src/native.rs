use crate::bridge::Trampoline;
use crate::registry::Token;
use std::ffi::c_void;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeHint {
    #[default]
    None,
    Fixed,
    Min,
    Max,
}

impl SizeHint {
    pub fn code(self) -> i32 {
        match self {
            SizeHint::None => 0,
            SizeHint::Min => 1,
            SizeHint::Max => 2,
            SizeHint::Fixed => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Navigate(String),
    /// Script injected before every page load, ahead of `window.onload`.
    Init(String),
    Eval(String),
    SetTitle(String),
    SetSize {
        width: i32,
        height: i32,
        hint: SizeHint,
    },
    SetPosition {
        x: i32,
        y: i32,
    },
    Center,
    Topmost(bool),
    DisableContextMenu,
    Bind {
        name: String,
        token: Token,
    },
    Unbind(String),
}

/// The native webview as seen from the UI thread.
///
/// Implementations own exactly one native handle. Every method except those
/// on the [`NativeRemote`] must be called on the thread that runs the loop.
pub trait NativeLayer {
    fn attach(&mut self, trampoline: Trampoline);

    /// True when native callbacks can only reach [`crate::Registry::global`]
    /// because they carry nothing but a token.
    fn global_registry_only(&self) -> bool {
        false
    }

    fn remote(&self) -> Arc<dyn NativeRemote>;

    fn apply(&mut self, op: SurfaceOp);

    /// Blocks until the loop is terminated or the window is closed.
    fn run(&mut self);

    /// Native window pointer (GtkWindow, NSWindow or HWND), null when there is none.
    fn window(&self) -> *mut c_void {
        std::ptr::null_mut()
    }

    fn destroy(&mut self);
}

pub trait NativeRemote: Send + Sync {
    /// Wakes the UI thread, which then calls `Trampoline::on_dispatch(token)`.
    /// After the loop has stopped this may silently do nothing.
    fn wake(&self, token: Token);

    fn post(&self, op: SurfaceOp);

    fn terminate(&self);
}
