use crate::error::{BindError, RegistryError};
use crate::invoker::Binding;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

/// Opaque integer handed to the native layer in place of host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

// Tokens travel through C as pointer-sized integers.
const TOKEN_LIMIT: u64 = usize::MAX as u64;

impl Token {
    pub fn as_usize(self) -> usize {
        match usize::try_from(self.0) {
            Ok(raw) => raw,
            Err(_) => panic!("token {} does not fit in a native pointer", self.0),
        }
    }

    pub fn from_usize(raw: usize) -> Self {
        Token(raw as u64)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Dispatch,
    Binding,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Dispatch => f.write_str("dispatch"),
            TokenKind::Binding => f.write_str("binding"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

pub type DispatchFn = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::new()));

/// Token table shared by every thread that dispatches or binds.
///
/// One mutex guards both tables and the probe cursor. Closures are stored
/// and handed out under the lock but never run while it is held, so code
/// running on the UI thread may re-enter the registry freely.
pub struct Registry {
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    next_probe: u64,
    dispatch: HashMap<Token, DispatchFn>,
    bindings: HashMap<Token, Arc<Binding>>,
    names: HashMap<(SurfaceId, String), Token>,
}

impl Slots {
    // The cursor stops on the token it hands out; the next probe starts there
    // and steps over it once it is live.
    fn allocate(&mut self) -> Token {
        loop {
            let candidate = Token(self.next_probe);
            if !self.dispatch.contains_key(&candidate) && !self.bindings.contains_key(&candidate) {
                return candidate;
            }
            self.next_probe = if self.next_probe >= TOKEN_LIMIT {
                0
            } else {
                self.next_probe + 1
            };
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn global() -> &'static Arc<Registry> {
        &GLOBAL
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Nothing user-supplied runs under this lock, so a poisoned guard
        // still holds consistent tables.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_dispatch(&self, task: DispatchFn) -> Token {
        let mut slots = self.lock();
        let token = slots.allocate();
        slots.dispatch.insert(token, task);
        token
    }

    pub fn take_dispatch(&self, token: Token) -> Result<DispatchFn, RegistryError> {
        self.lock()
            .dispatch
            .remove(&token)
            .ok_or(RegistryError::UnknownToken {
                kind: TokenKind::Dispatch,
                token,
            })
    }

    /// Installs a binding for `surface`. Names are unique per surface; a
    /// second registration under a live name is rejected and allocates nothing.
    pub fn insert_binding(&self, surface: SurfaceId, binding: Binding) -> Result<Token, BindError> {
        let mut slots = self.lock();
        let key = (surface, binding.name().to_string());

        if slots.names.contains_key(&key) {
            return Err(BindError::DuplicateName(key.1));
        }

        let token = slots.allocate();
        slots.bindings.insert(token, Arc::new(binding));
        slots.names.insert(key, token);
        Ok(token)
    }

    pub fn binding(&self, token: Token) -> Result<Arc<Binding>, RegistryError> {
        self.lock()
            .bindings
            .get(&token)
            .cloned()
            .ok_or(RegistryError::UnknownToken {
                kind: TokenKind::Binding,
                token,
            })
    }

    pub fn binding_token(&self, surface: SurfaceId, name: &str) -> Option<Token> {
        self.lock().names.get(&(surface, name.to_string())).copied()
    }

    pub fn remove_binding(&self, surface: SurfaceId, name: &str) -> Option<Token> {
        let mut slots = self.lock();
        let token = slots.names.remove(&(surface, name.to_string()))?;
        let removed = slots.bindings.remove(&token);
        // Captured state may re-enter the registry when dropped.
        drop(slots);
        drop(removed);
        Some(token)
    }

    pub fn release_surface(&self, surface: SurfaceId) -> Vec<Token> {
        let mut slots = self.lock();
        let Slots {
            names, bindings, ..
        } = &mut *slots;

        let mut released = Vec::new();
        let mut removed = Vec::new();
        names.retain(|(owner, _name), token| {
            if *owner == surface {
                removed.extend(bindings.remove(token));
                released.push(*token);
                false
            } else {
                true
            }
        });
        drop(slots);
        drop(removed);

        released.sort();
        released
    }

    pub fn pending_dispatches(&self) -> usize {
        self.lock().dispatch.len()
    }

    pub fn live_bindings(&self) -> usize {
        self.lock().bindings.len()
    }
}
