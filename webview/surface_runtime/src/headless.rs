//! An in-process stand-in for the native webview.
//!
//! [`HeadlessLayer`] runs a real event loop on whichever thread calls
//! `run`, honours the same threading contract as the C library, and records
//! every surface operation. A [`HeadlessProbe`] plays the part of the page:
//! it calls bound names, watches what the host did and closes the window.

use crate::bridge::Trampoline;
use crate::native::{NativeLayer, NativeRemote, SurfaceOp};
use crate::protocol::Reply;
use crate::registry::Token;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

enum Event {
    Dispatch(Token),
    Op(SurfaceOp),
    Call {
        name: String,
        request_id: String,
        args: String,
        reply: Sender<Reply>,
    },
    Terminate,
}

#[derive(Default)]
struct Observed {
    ops: Vec<SurfaceOp>,
    ui_thread: Option<ThreadId>,
    running: bool,
    destroyed: bool,
}

#[derive(Default)]
struct Shared {
    observed: Mutex<Observed>,
    changed: Condvar,
    next_request: AtomicU64,
}

impl Shared {
    fn observed(&self) -> MutexGuard<'_, Observed> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, change: impl FnOnce(&mut Observed)) {
        change(&mut self.observed());
        self.changed.notify_all();
    }
}

pub struct HeadlessLayer {
    tx: Sender<Event>,
    rx: Receiver<Event>,
    trampoline: Option<Trampoline>,
    bindings: HashMap<String, Token>,
    shared: Arc<Shared>,
}

impl Default for HeadlessLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessLayer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            trampoline: None,
            bindings: HashMap::new(),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }

    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Dispatch(token) => {
                if let Some(trampoline) = &self.trampoline {
                    trampoline.on_dispatch(token);
                }
            }
            Event::Op(op) => self.apply(op),
            Event::Call {
                name,
                request_id,
                args,
                reply,
            } => {
                let result = match (self.bindings.get(&name), &self.trampoline) {
                    (Some(token), Some(trampoline)) => {
                        trampoline.on_binding_call(&request_id, &args, *token)
                    }
                    _ => Reply::error(format!("{name} is not defined")),
                };
                // The page may have stopped waiting.
                let _ = reply.send(result);
            }
            Event::Terminate => return false,
        }

        true
    }
}

impl NativeLayer for HeadlessLayer {
    fn attach(&mut self, trampoline: Trampoline) {
        self.trampoline = Some(trampoline);
    }

    fn remote(&self) -> Arc<dyn NativeRemote> {
        Arc::new(HeadlessRemote {
            tx: self.tx.clone(),
        })
    }

    fn apply(&mut self, op: SurfaceOp) {
        match &op {
            SurfaceOp::Bind { name, token } => {
                self.bindings.insert(name.clone(), *token);
            }
            SurfaceOp::Unbind(name) => {
                self.bindings.remove(name);
            }
            _ => {}
        }

        self.shared.update(|observed| observed.ops.push(op));
    }

    fn run(&mut self) {
        self.shared.update(|observed| {
            observed.ui_thread = Some(thread::current().id());
            observed.running = true;
        });

        while let Ok(event) = self.rx.recv() {
            if !self.handle(event) {
                break;
            }
        }

        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            tracing::debug!(dropped, "headless loop stopped with events still queued");
        }

        self.shared.update(|observed| observed.running = false);
    }

    fn destroy(&mut self) {
        self.bindings.clear();
        self.shared.update(|observed| observed.destroyed = true);
    }
}

struct HeadlessRemote {
    tx: Sender<Event>,
}

impl HeadlessRemote {
    fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!("headless loop is gone; event dropped");
        }
    }
}

impl NativeRemote for HeadlessRemote {
    fn wake(&self, token: Token) {
        self.send(Event::Dispatch(token));
    }

    fn post(&self, op: SurfaceOp) {
        self.send(Event::Op(op));
    }

    fn terminate(&self) {
        self.send(Event::Terminate);
    }
}

/// The page side of a [`HeadlessLayer`]. Cloneable and usable from any thread.
#[derive(Clone)]
pub struct HeadlessProbe {
    tx: Sender<Event>,
    shared: Arc<Shared>,
}

impl HeadlessProbe {
    /// Calls a bound name the way script would; the reply arrives once the
    /// loop has processed the call.
    pub fn call(&self, name: &str, args: &str) -> Receiver<Reply> {
        let (reply, rx) = mpsc::channel();
        let request_id = self.shared.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        let event = Event::Call {
            name: name.to_string(),
            request_id: request_id.to_string(),
            args: args.to_string(),
            reply,
        };

        if self.tx.send(event).is_err() {
            tracing::debug!(name, "headless loop is gone; call dropped");
        }
        rx
    }

    pub fn call_blocking(&self, name: &str, args: &str, timeout: Duration) -> Option<Reply> {
        match self.call(name, args).recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn close(&self) {
        let _ = self.tx.send(Event::Terminate);
    }

    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.shared.observed().ops.clone()
    }

    pub fn ui_thread(&self) -> Option<ThreadId> {
        self.shared.observed().ui_thread
    }

    pub fn is_running(&self) -> bool {
        self.shared.observed().running
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.observed().destroyed
    }

    /// Blocks until `ready` holds for the recorded operations or `timeout` passes.
    pub fn wait_for_ops<F>(&self, timeout: Duration, ready: F) -> bool
    where
        F: Fn(&[SurfaceOp]) -> bool,
    {
        self.wait(timeout, |observed| ready(&observed.ops))
    }

    pub fn wait_until_running(&self, timeout: Duration) -> bool {
        self.wait(timeout, |observed| observed.running)
    }

    fn wait<F>(&self, timeout: Duration, ready: F) -> bool
    where
        F: Fn(&Observed) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut observed = self.shared.observed();

        loop {
            if ready(&observed) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            observed = match self.shared.changed.wait_timeout(observed, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
