use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::ffi::c_void;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use webview_surface_runtime::{
    BindError, Dispatcher, HeadlessLayer, HeadlessProbe, NativeLayer, NativeRemote, Registry,
    Reply, Rest, SizeHint, Status, Surface, SurfaceError, SurfaceOp, SurfaceState, Trampoline,
};

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    probe: HeadlessProbe,
    dispatcher: Dispatcher,
    registry: Arc<Registry>,
    ui: JoinHandle<Surface<HeadlessLayer>>,
}

impl Running {
    fn stop(self) -> (Surface<HeadlessLayer>, HeadlessProbe, Dispatcher, Arc<Registry>) {
        self.probe.close();
        let surface = self.ui.join().expect("ui thread panicked");
        (surface, self.probe, self.dispatcher, self.registry)
    }
}

fn start(setup: impl FnOnce(&mut Surface<HeadlessLayer>)) -> Running {
    let layer = HeadlessLayer::new();
    let probe = layer.probe();
    let registry = Arc::new(Registry::new());
    let mut surface = Surface::with_registry(layer, registry.clone()).expect("surface");
    setup(&mut surface);
    let dispatcher = surface.dispatcher();

    let ui = thread::spawn(move || {
        surface.run().expect("run");
        surface
    });
    assert!(probe.wait_until_running(WAIT), "loop never started");

    Running {
        probe,
        dispatcher,
        registry,
        ui,
    }
}

fn error_text(reply: &Reply) -> String {
    serde_json::from_str(&reply.payload).expect("error payload is a json string")
}

#[test]
fn hundred_concurrent_dispatches_run_once_each_on_the_ui_thread() {
    let running = start(|_| {});
    let ui_thread = running.probe.ui_thread().expect("ui thread recorded");

    let counter = Arc::new(AtomicUsize::new(0));
    let seen_threads = Arc::new(Mutex::new(Vec::<ThreadId>::new()));
    let done = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Barrier::new(100));

    let callers: Vec<_> = (0..100)
        .map(|_| {
            let dispatcher = running.dispatcher.clone();
            let counter = counter.clone();
            let seen_threads = seen_threads.clone();
            let done = done.clone();
            let gate = gate.clone();
            thread::spawn(move || {
                gate.wait();
                dispatcher
                    .dispatch(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        seen_threads
                            .lock()
                            .expect("seen threads")
                            .push(thread::current().id());
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .expect("dispatch");
            })
        })
        .collect();

    for caller in callers {
        caller.join().expect("caller panicked");
    }

    let (tx, rx) = mpsc::channel();
    running
        .dispatcher
        .dispatch(move || tx.send(()).expect("signal"))
        .expect("sentinel dispatch");
    rx.recv_timeout(WAIT).expect("sentinel ran");

    assert_eq!(counter.load(Ordering::SeqCst), 100);
    let seen = seen_threads.lock().expect("seen threads").clone();
    assert_eq!(seen.len(), 100);
    assert!(seen.iter().all(|id| *id == ui_thread));

    let (_surface, _probe, _dispatcher, registry) = running.stop();
    assert_eq!(registry.pending_dispatches(), 0);
}

#[test]
fn script_calls_run_bound_functions_on_the_ui_thread() {
    let called_on = Arc::new(Mutex::new(None));
    let record = called_on.clone();

    let running = start(move |surface| {
        surface
            .bind("add", move |a: i64, b: i64| {
                *record.lock().expect("record") = Some(thread::current().id());
                a + b
            })
            .expect("bind add");
    });

    let reply = running
        .probe
        .call_blocking("add", "[2,3]", WAIT)
        .expect("reply");
    assert_eq!(reply, Reply::value(&5));
    assert_eq!(
        *called_on.lock().expect("record"),
        running.probe.ui_thread()
    );

    running.stop();
}

#[test]
fn decode_errors_reach_the_script_and_skip_the_function() {
    let entered = Arc::new(AtomicBool::new(false));
    let flag = entered.clone();

    let running = start(move |surface| {
        surface
            .bind("f", move |a: i64, b: String| -> Result<String, String> {
                flag.store(true, Ordering::SeqCst);
                Ok(format!("{a}{b}"))
            })
            .expect("bind f");
        surface
            .bind("join", |prefix: String, rest: Rest<i64>| {
                format!("{prefix}{}", rest.len())
            })
            .expect("bind join");
    });

    let reply = running
        .probe
        .call_blocking("f", r#"["5","hi"]"#, WAIT)
        .expect("reply");
    assert_eq!(reply.status, Status::Error);
    assert!(!entered.load(Ordering::SeqCst));

    let reply = running
        .probe
        .call_blocking("join", "[]", WAIT)
        .expect("reply");
    assert_eq!(reply.status, Status::Error);
    assert!(error_text(&reply).contains("function arguments mismatch"));

    let reply = running
        .probe
        .call_blocking("join", r#"["n",1,2,3]"#, WAIT)
        .expect("reply");
    assert_eq!(reply, Reply::value("n3"));

    running.stop();
}

#[test]
fn bound_functions_may_reenter_the_surface() {
    let running = start(|surface| {
        let dispatcher = surface.dispatcher();
        surface
            .bind("paint", move || -> Result<(), String> {
                dispatcher
                    .eval("ctx.fillRect(200,300,30,30)")
                    .map_err(|err| err.to_string())?;
                let nested = dispatcher.clone();
                dispatcher
                    .dispatch(move || {
                        nested.eval("draw()").expect("nested eval");
                    })
                    .map_err(|err| err.to_string())
            })
            .expect("bind paint");
    });

    let reply = running
        .probe
        .call_blocking("paint", "[]", WAIT)
        .expect("reply");
    assert!(reply.is_success());

    assert!(running.probe.wait_for_ops(WAIT, |ops| {
        ops.contains(&SurfaceOp::Eval("ctx.fillRect(200,300,30,30)".to_string()))
            && ops.contains(&SurfaceOp::Eval("draw()".to_string()))
    }));

    running.stop();
}

#[test]
fn bindings_can_be_added_from_other_threads_while_running() {
    let running = start(|_| {});

    let dispatcher = running.dispatcher.clone();
    thread::spawn(move || dispatcher.bind("late", || "here").expect("late bind"))
        .join()
        .expect("binder thread");

    assert!(running.probe.wait_for_ops(WAIT, |ops| {
        ops.iter()
            .any(|op| matches!(op, SurfaceOp::Bind { name, .. } if name == "late"))
    }));

    let reply = running
        .probe
        .call_blocking("late", "[]", WAIT)
        .expect("reply");
    assert_eq!(reply, Reply::value("here"));

    assert_eq!(
        running.dispatcher.bind("late", || "again"),
        Err(SurfaceError::Bind(BindError::DuplicateName(
            "late".to_string()
        )))
    );

    running.stop();
}

#[test]
fn configuration_operations_reach_the_native_layer_in_order() {
    let running = start(|surface| {
        surface.set_title("Canvas");
        surface.set_size(500, 400, SizeHint::Fixed);
        surface.set_position(10, 20);
        surface.center();
        surface.topmost(true);
        surface.disable_context_menu();
        surface.init("window.ready = true");
        surface.navigate("http://localhost:1/");
    });

    let ops = running.probe.ops();
    assert_eq!(
        ops,
        vec![
            SurfaceOp::SetTitle("Canvas".to_string()),
            SurfaceOp::SetSize {
                width: 500,
                height: 400,
                hint: SizeHint::Fixed
            },
            SurfaceOp::SetPosition { x: 10, y: 20 },
            SurfaceOp::Center,
            SurfaceOp::Topmost(true),
            SurfaceOp::DisableContextMenu,
            SurfaceOp::Init("window.ready = true".to_string()),
            SurfaceOp::Navigate("http://localhost:1/".to_string()),
        ]
    );

    running.stop();
}

#[test]
fn unbind_removes_the_name_from_script_and_registry() {
    let layer = HeadlessLayer::new();
    let probe = layer.probe();
    let registry = Arc::new(Registry::new());
    let mut surface = Surface::with_registry(layer, registry.clone()).expect("surface");

    surface.bind("gone", || 1).expect("bind");
    assert_eq!(registry.live_bindings(), 1);
    assert!(surface.unbind("gone"));
    assert!(!surface.unbind("gone"));
    assert_eq!(registry.live_bindings(), 0);

    let dispatcher = surface.dispatcher();
    let ui = thread::spawn(move || {
        surface.run().expect("run");
        surface
    });

    let reply = probe.call_blocking("gone", "[]", WAIT).expect("reply");
    assert_eq!(reply.status, Status::Error);
    assert_eq!(error_text(&reply), "gone is not defined");

    dispatcher.terminate().expect("terminate");
    ui.join().expect("ui thread");
}

#[test]
fn work_queued_after_the_loop_ends_is_dropped() {
    let running = start(|_| {});
    let (surface, probe, dispatcher, registry) = running.stop();
    assert!(!probe.is_running());

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    dispatcher
        .dispatch(move || flag.store(true, Ordering::SeqCst))
        .expect("still accepted before destroy");

    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(registry.pending_dispatches(), 1);
    drop(surface);
}

#[test]
fn run_is_only_entered_once() {
    let running = start(|_| {});
    let (mut surface, _probe, _dispatcher, _registry) = running.stop();
    assert_eq!(surface.state(), SurfaceState::Running);
    assert_eq!(surface.run(), Err(SurfaceError::AlreadyRunning));
}

#[test]
fn destroy_releases_bindings_and_invalidates_dispatchers() {
    let running = start(|surface| {
        surface.bind("a", || {}).expect("a");
        surface.bind("b", || {}).expect("b");
    });
    let (surface, probe, dispatcher, registry) = running.stop();
    assert_eq!(registry.live_bindings(), 2);

    surface.destroy();
    assert!(probe.is_destroyed());
    assert_eq!(registry.live_bindings(), 0);
    assert_eq!(dispatcher.state(), SurfaceState::Destroyed);
    assert_eq!(dispatcher.dispatch(|| {}), Err(SurfaceError::Destroyed));
    assert_eq!(dispatcher.terminate(), Err(SurfaceError::Destroyed));
}

#[test]
fn duplicate_names_are_rejected_on_the_surface() {
    let layer = HeadlessLayer::new();
    let registry = Arc::new(Registry::new());
    let mut surface = Surface::with_registry(layer, registry.clone()).expect("surface");

    surface.bind("log", |_line: String| {}).expect("first");
    assert_eq!(
        surface.bind("log", |_line: String| {}),
        Err(BindError::DuplicateName("log".to_string()))
    );
    assert_eq!(registry.live_bindings(), 1);
}

// A layer whose callbacks, like the C library's, can only find the global
// registry.
struct GlobalOnly(HeadlessLayer);

impl NativeLayer for GlobalOnly {
    fn attach(&mut self, trampoline: Trampoline) {
        self.0.attach(trampoline);
    }

    fn global_registry_only(&self) -> bool {
        true
    }

    fn remote(&self) -> Arc<dyn NativeRemote> {
        self.0.remote()
    }

    fn apply(&mut self, op: SurfaceOp) {
        self.0.apply(op);
    }

    fn run(&mut self) {
        self.0.run();
    }

    fn window(&self) -> *mut c_void {
        self.0.window()
    }

    fn destroy(&mut self) {
        self.0.destroy();
    }
}

#[test]
fn global_only_layers_refuse_private_registries() {
    let layer = HeadlessLayer::new();
    let probe = layer.probe();

    let refused = Surface::with_registry(GlobalOnly(layer), Arc::new(Registry::new()));
    assert!(matches!(refused, Err(SurfaceError::RegistryMismatch)));
    assert!(probe.is_destroyed());

    let layer = HeadlessLayer::new();
    let probe = layer.probe();
    let mut surface = Surface::with_registry(GlobalOnly(layer), Registry::global().clone())
        .expect("global registry is accepted");
    surface.set_title("global");
    assert_eq!(probe.ops(), [SurfaceOp::SetTitle("global".to_string())]);

    drop(surface);
    assert!(probe.is_destroyed());
}
