//! Native layer backed by the C `webview` library.
//!
//! The only callback argument C ever sees is a token. Binding callbacks
//! still need the handle to answer with, so the UI thread keeps a
//! token-to-handle table next to the loop.

use crate::bridge::{Trampoline, contract_violation};
use crate::error::{RegistryError, SurfaceError};
use crate::native::{NativeLayer, NativeRemote, SurfaceOp};
use crate::registry::{Registry, Token, TokenKind};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::sync::Arc;

#[allow(non_camel_case_types)]
type webview_t = *mut c_void;

type DispatchCallback = unsafe extern "C" fn(w: webview_t, arg: *mut c_void);
type BindCallback = unsafe extern "C" fn(seq: *const c_char, req: *const c_char, arg: *mut c_void);

unsafe extern "C" {
    fn webview_create(debug: c_int, window: *mut c_void) -> webview_t;
    fn webview_destroy(w: webview_t);
    fn webview_run(w: webview_t);
    fn webview_terminate(w: webview_t);
    fn webview_dispatch(w: webview_t, f: DispatchCallback, arg: *mut c_void);
    fn webview_get_window(w: webview_t) -> *mut c_void;
    fn webview_set_title(w: webview_t, title: *const c_char);
    fn webview_set_size(w: webview_t, width: c_int, height: c_int, hints: c_int);
    fn webview_navigate(w: webview_t, url: *const c_char);
    fn webview_init(w: webview_t, js: *const c_char);
    fn webview_eval(w: webview_t, js: *const c_char);
    fn webview_bind(w: webview_t, name: *const c_char, f: BindCallback, arg: *mut c_void);
    fn webview_unbind(w: webview_t, name: *const c_char);
    fn webview_return(w: webview_t, seq: *const c_char, status: c_int, result: *const c_char);
    fn webview_set_position(w: webview_t, x: c_int, y: c_int);
    fn webview_center(w: webview_t);
    fn webview_topmost(w: webview_t, topmost: c_int);
    fn webview_no_ctx(w: webview_t);
}

/// Native handle that may be carried to other threads but is only
/// dereferenced by C on the UI thread.
#[derive(Debug, Clone, Copy)]
struct Handle(webview_t);

// SAFETY: the pointer is only passed to C functions that are documented as
// thread-safe (`webview_dispatch`, `webview_terminate`) or from closures that
// run on the UI thread.
unsafe impl Send for Handle {}
// SAFETY: see `Send`; the handle itself is never mutated.
unsafe impl Sync for Handle {}

struct BoundName {
    handle: Handle,
    name: String,
}

thread_local! {
    static BOUND: RefCell<HashMap<Token, BoundName>> = RefCell::new(HashMap::new());
}

fn bound_handle(token: Token) -> Option<Handle> {
    BOUND.with(|bound| bound.borrow().get(&token).map(|entry| entry.handle))
}

fn c_string(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

unsafe extern "C" fn dispatch_trampoline(_w: webview_t, arg: *mut c_void) {
    Trampoline::global().on_dispatch(Token::from_usize(arg as usize));
}

unsafe extern "C" fn binding_trampoline(seq: *const c_char, req: *const c_char, arg: *mut c_void) {
    let token = Token::from_usize(arg as usize);
    let Some(handle) = bound_handle(token) else {
        contract_violation(RegistryError::UnknownToken {
            kind: TokenKind::Binding,
            token,
        });
    };

    // SAFETY: the library passes NUL-terminated strings valid for this call.
    let (seq_text, req_text) = unsafe {
        (
            CStr::from_ptr(seq).to_string_lossy().into_owned(),
            CStr::from_ptr(req).to_string_lossy().into_owned(),
        )
    };

    let reply = Trampoline::global().on_binding_call(&seq_text, &req_text, token);
    let payload = c_string(&reply.payload);

    // SAFETY: `seq` is still valid and the handle is live while callbacks fire.
    unsafe {
        webview_return(handle.0, seq, reply.status.code(), payload.as_ptr());
    }
}

fn apply_op(handle: Handle, op: SurfaceOp) {
    let w = handle.0;

    // SAFETY: called on the UI thread with a live handle; every string
    // argument outlives the call it is passed to.
    unsafe {
        match op {
            SurfaceOp::Navigate(url) => webview_navigate(w, c_string(&url).as_ptr()),
            SurfaceOp::Init(js) => webview_init(w, c_string(&js).as_ptr()),
            SurfaceOp::Eval(js) => webview_eval(w, c_string(&js).as_ptr()),
            SurfaceOp::SetTitle(title) => webview_set_title(w, c_string(&title).as_ptr()),
            SurfaceOp::SetSize {
                width,
                height,
                hint,
            } => webview_set_size(w, width, height, hint.code()),
            SurfaceOp::SetPosition { x, y } => webview_set_position(w, x, y),
            SurfaceOp::Center => webview_center(w),
            SurfaceOp::Topmost(on) => webview_topmost(w, c_int::from(on)),
            SurfaceOp::DisableContextMenu => webview_no_ctx(w),
            SurfaceOp::Bind { name, token } => {
                let c_name = c_string(&name);
                BOUND.with(|bound| {
                    bound.borrow_mut().insert(token, BoundName { handle, name });
                });
                webview_bind(
                    w,
                    c_name.as_ptr(),
                    binding_trampoline,
                    token.as_usize() as *mut c_void,
                );
            }
            SurfaceOp::Unbind(name) => {
                webview_unbind(w, c_string(&name).as_ptr());
                BOUND.with(|bound| {
                    bound
                        .borrow_mut()
                        .retain(|_, entry| entry.handle.0 != w || entry.name != name);
                });
            }
        }
    }
}

pub struct WebviewLayer {
    handle: Handle,
}

impl WebviewLayer {
    /// Creates a new window. With `debug` the developer tools are enabled
    /// where the platform supports them.
    pub fn new(debug: bool) -> Result<Self, SurfaceError> {
        Self::with_parent(debug, std::ptr::null_mut())
    }

    /// Embeds the webview into `parent` (GtkWindow, NSWindow or HWND) when
    /// it is non-null.
    pub fn with_parent(debug: bool, parent: *mut c_void) -> Result<Self, SurfaceError> {
        // SAFETY: `parent` is null or a native window owned by the caller.
        let w = unsafe { webview_create(c_int::from(debug), parent) };
        if w.is_null() {
            return Err(SurfaceError::CreateFailed);
        }

        Ok(Self { handle: Handle(w) })
    }
}

impl NativeLayer for WebviewLayer {
    fn attach(&mut self, trampoline: Trampoline) {
        // `Surface::with_registry` refuses any other registry for this layer.
        debug_assert!(Arc::ptr_eq(trampoline.registry(), Registry::global()));
    }

    fn global_registry_only(&self) -> bool {
        true
    }

    fn remote(&self) -> Arc<dyn NativeRemote> {
        Arc::new(WebviewRemote {
            handle: self.handle,
            registry: Registry::global().clone(),
        })
    }

    fn apply(&mut self, op: SurfaceOp) {
        apply_op(self.handle, op);
    }

    fn run(&mut self) {
        // SAFETY: called on the thread that created the webview.
        unsafe { webview_run(self.handle.0) }
    }

    fn window(&self) -> *mut c_void {
        // SAFETY: the handle is live until `destroy`.
        unsafe { webview_get_window(self.handle.0) }
    }

    fn destroy(&mut self) {
        let w = self.handle.0;
        // SAFETY: `Surface` calls this exactly once.
        unsafe { webview_destroy(w) }
        BOUND.with(|bound| {
            bound.borrow_mut().retain(|_, entry| entry.handle.0 != w);
        });
    }
}

struct WebviewRemote {
    handle: Handle,
    registry: Arc<Registry>,
}

impl NativeRemote for WebviewRemote {
    fn wake(&self, token: Token) {
        // SAFETY: `webview_dispatch` may be called from any thread.
        unsafe {
            webview_dispatch(
                self.handle.0,
                dispatch_trampoline,
                token.as_usize() as *mut c_void,
            );
        }
    }

    fn post(&self, op: SurfaceOp) {
        let handle = self.handle;
        let token = self
            .registry
            .insert_dispatch(Box::new(move || apply_op(handle, op)));
        self.wake(token);
    }

    fn terminate(&self) {
        // SAFETY: `webview_terminate` may be called from any thread.
        unsafe { webview_terminate(self.handle.0) }
    }
}
