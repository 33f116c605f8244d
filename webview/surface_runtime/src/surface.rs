use crate::bridge::{Dispatcher, Lifecycle, SurfaceState, Trampoline};
use crate::error::{BindError, SurfaceError};
use crate::foreign::HostValue;
use crate::invoker::{Binding, Handler};
use crate::native::{NativeLayer, NativeRemote, SizeHint, SurfaceOp};
use crate::registry::{Registry, SurfaceId};
use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Owns one native surface for its whole life.
///
/// Configuration methods run on the UI thread (the thread that owns the
/// surface). Work from other threads goes through [`Surface::dispatcher`].
/// Dropping the surface destroys the native handle exactly once and releases
/// its bindings.
pub struct Surface<L: NativeLayer> {
    layer: L,
    id: SurfaceId,
    registry: Arc<Registry>,
    remote: Arc<dyn NativeRemote>,
    lifecycle: Arc<Lifecycle>,
}

impl<L: NativeLayer> Surface<L> {
    pub fn new(layer: L) -> Self {
        Self::attach(layer, Registry::global().clone())
    }

    /// Wraps `layer` with a private registry. Layers whose callbacks only
    /// know the global registry refuse this and are destroyed.
    pub fn with_registry(mut layer: L, registry: Arc<Registry>) -> Result<Self, SurfaceError> {
        if layer.global_registry_only() && !Arc::ptr_eq(&registry, Registry::global()) {
            layer.destroy();
            return Err(SurfaceError::RegistryMismatch);
        }

        Ok(Self::attach(layer, registry))
    }

    fn attach(mut layer: L, registry: Arc<Registry>) -> Self {
        layer.attach(Trampoline::new(registry.clone()));
        let remote = layer.remote();

        Self {
            layer,
            id: SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed)),
            registry,
            remote,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn state(&self) -> SurfaceState {
        self.lifecycle.state()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.id,
            self.registry.clone(),
            self.remote.clone(),
            self.lifecycle.clone(),
        )
    }

    pub fn set_title(&mut self, title: &str) {
        self.layer.apply(SurfaceOp::SetTitle(title.to_string()));
    }

    pub fn set_size(&mut self, width: i32, height: i32, hint: SizeHint) {
        self.layer.apply(SurfaceOp::SetSize {
            width,
            height,
            hint,
        });
    }

    pub fn set_position(&mut self, x: i32, y: i32) {
        self.layer.apply(SurfaceOp::SetPosition { x, y });
    }

    pub fn center(&mut self) {
        self.layer.apply(SurfaceOp::Center);
    }

    pub fn topmost(&mut self, on: bool) {
        self.layer.apply(SurfaceOp::Topmost(on));
    }

    pub fn disable_context_menu(&mut self) {
        self.layer.apply(SurfaceOp::DisableContextMenu);
    }

    pub fn navigate(&mut self, url: &str) {
        self.layer.apply(SurfaceOp::Navigate(url.to_string()));
    }

    /// Injects `js` into every page before `window.onload`.
    pub fn init(&mut self, js: &str) {
        self.layer.apply(SurfaceOp::Init(js.to_string()));
    }

    pub fn eval(&mut self, js: &str) {
        self.layer.apply(SurfaceOp::Eval(js.to_string()));
    }

    /// Exposes `handler` to script as a global function named `name`.
    ///
    /// The script-side function returns a promise resolving to the handler's
    /// value or rejecting with its error text.
    pub fn bind<M, H>(&mut self, name: &str, handler: H) -> Result<(), BindError>
    where
        H: Handler<M>,
    {
        self.install(Binding::new(name, handler))
    }

    pub fn bind_foreign(&mut self, name: &str, value: HostValue) -> Result<(), BindError> {
        self.install(Binding::foreign(name, value)?)
    }

    fn install(&mut self, binding: Binding) -> Result<(), BindError> {
        if binding.name().is_empty() {
            return Err(BindError::EmptyName);
        }

        let name = binding.name().to_string();
        let token = self.registry.insert_binding(self.id, binding)?;
        tracing::debug!(%token, name = %name, "binding installed");
        self.layer.apply(SurfaceOp::Bind { name, token });
        Ok(())
    }

    pub fn unbind(&mut self, name: &str) -> bool {
        match self.registry.remove_binding(self.id, name) {
            Some(token) => {
                tracing::debug!(%token, name = %name, "binding removed");
                self.layer.apply(SurfaceOp::Unbind(name.to_string()));
                true
            }
            None => false,
        }
    }

    pub fn window(&self) -> *mut c_void {
        self.layer.window()
    }

    pub fn run(&mut self) -> Result<(), SurfaceError> {
        self.lifecycle.start()?;
        self.layer.run();
        Ok(())
    }

    pub fn terminate(&self) {
        self.remote.terminate();
    }

    pub fn destroy(self) {
        drop(self);
    }
}

impl<L: NativeLayer> Drop for Surface<L> {
    fn drop(&mut self) {
        let Some(_destroyed) = self.lifecycle.finish() else {
            return;
        };

        let released = self.registry.release_surface(self.id);
        tracing::debug!(surface = self.id.0, bindings = released.len(), "surface destroyed");
        self.layer.destroy();
    }
}
