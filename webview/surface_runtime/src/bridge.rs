use crate::error::{BindError, RegistryError, SurfaceError};
use crate::invoker::{Binding, Handler};
use crate::native::{NativeRemote, SurfaceOp};
use crate::protocol::Reply;
use crate::registry::{Registry, SurfaceId, Token};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Created,
    Running,
    Destroyed,
}

// Readers hold the guard across each native call they make; teardown takes
// the write side, so the handle is never freed under an in-flight call.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: RwLock<SurfaceState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(SurfaceState::Created),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SurfaceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SurfaceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> SurfaceState {
        *self.read()
    }

    pub(crate) fn start(&self) -> Result<(), SurfaceError> {
        let mut state = self.write();
        match *state {
            SurfaceState::Created => {
                *state = SurfaceState::Running;
                Ok(())
            }
            SurfaceState::Running => Err(SurfaceError::AlreadyRunning),
            SurfaceState::Destroyed => Err(SurfaceError::Destroyed),
        }
    }

    /// Marks the surface destroyed. Only the first caller gets the guard,
    /// and no reader can be mid-call while it is held.
    pub(crate) fn finish(&self) -> Option<RwLockWriteGuard<'_, SurfaceState>> {
        let mut state = self.write();
        if *state == SurfaceState::Destroyed {
            return None;
        }
        *state = SurfaceState::Destroyed;
        Some(state)
    }

    pub(crate) fn alive(&self) -> Result<RwLockReadGuard<'_, SurfaceState>, SurfaceError> {
        let state = self.read();
        match *state {
            SurfaceState::Destroyed => Err(SurfaceError::Destroyed),
            _ => Ok(state),
        }
    }
}

#[derive(Clone)]
pub struct Trampoline {
    registry: Arc<Registry>,
}

impl Trampoline {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Trampoline over [`Registry::global`], for callbacks that carry nothing but a token.
    pub fn global() -> Self {
        Self::new(Registry::global().clone())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Removes the closure stored under `token` and runs it.
    ///
    /// # Panics
    ///
    /// When `token` is unknown: the native layer reported a one-shot token
    /// twice or made one up.
    pub fn on_dispatch(&self, token: Token) {
        let task = self
            .registry
            .take_dispatch(token)
            .unwrap_or_else(|err| contract_violation(err));

        tracing::trace!(%token, "running dispatched task");
        task();
    }

    pub fn on_binding_call(&self, request_id: &str, args: &str, token: Token) -> Reply {
        let binding = self
            .registry
            .binding(token)
            .unwrap_or_else(|err| contract_violation(err));

        binding.invoke(request_id, args)
    }
}

pub(crate) fn contract_violation(err: RegistryError) -> ! {
    tracing::error!("native callback contract violated: {err}");
    panic!("native callback contract violated: {err}");
}

/// Thread-safe handle for scheduling work on a surface's UI thread.
///
/// Delivery is best effort: work queued after the loop has stopped is never
/// run. Once the surface is destroyed every method fails with
/// [`SurfaceError::Destroyed`].
#[derive(Clone)]
pub struct Dispatcher {
    surface: SurfaceId,
    registry: Arc<Registry>,
    remote: Arc<dyn NativeRemote>,
    lifecycle: Arc<Lifecycle>,
}

impl Dispatcher {
    pub(crate) fn new(
        surface: SurfaceId,
        registry: Arc<Registry>,
        remote: Arc<dyn NativeRemote>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            surface,
            registry,
            remote,
            lifecycle,
        }
    }

    pub fn dispatch<F>(&self, task: F) -> Result<(), SurfaceError>
    where
        F: FnOnce() + Send + 'static,
    {
        let _alive = self.lifecycle.alive()?;
        let token = self.registry.insert_dispatch(Box::new(task));
        tracing::trace!(%token, "dispatch queued");
        self.remote.wake(token);
        Ok(())
    }

    /// Queues a surface operation. Bindings are managed through
    /// [`Dispatcher::bind`] only, so `Bind` and `Unbind` are refused here.
    pub fn post(&self, op: SurfaceOp) -> Result<(), SurfaceError> {
        if matches!(op, SurfaceOp::Bind { .. } | SurfaceOp::Unbind(_)) {
            return Err(SurfaceError::ReservedOperation);
        }

        let _alive = self.lifecycle.alive()?;
        self.remote.post(op);
        Ok(())
    }

    pub fn eval(&self, js: impl Into<String>) -> Result<(), SurfaceError> {
        self.post(SurfaceOp::Eval(js.into()))
    }

    pub fn bind<M, H>(&self, name: &str, handler: H) -> Result<(), SurfaceError>
    where
        H: Handler<M>,
    {
        self.bind_entry(Binding::new(name, handler))
    }

    pub(crate) fn bind_entry(&self, binding: Binding) -> Result<(), SurfaceError> {
        if binding.name().is_empty() {
            return Err(BindError::EmptyName.into());
        }

        let _alive = self.lifecycle.alive()?;
        let name = binding.name().to_string();
        let token = self.registry.insert_binding(self.surface, binding)?;
        self.remote.post(SurfaceOp::Bind { name, token });
        Ok(())
    }

    pub fn terminate(&self) -> Result<(), SurfaceError> {
        let _alive = self.lifecycle.alive()?;
        self.remote.terminate();
        Ok(())
    }

    pub fn state(&self) -> SurfaceState {
        self.lifecycle.state()
    }

    pub fn is_alive(&self) -> bool {
        self.lifecycle.alive().is_ok()
    }
}
