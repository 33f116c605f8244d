//! Ready-made shell around a webview surface: a loopback server for the
//! page, a sized and titled window, and a small `_webview` object in script
//! for logging and the readiness handshake.

pub mod content;
pub mod error;
pub mod server;

pub use crate::content::{Content, EmbeddedFiles};
pub use crate::error::{AppError, ContentError};
pub use crate::server::{ContentServer, Route, RouteHandler, ServerInit, Site};
pub use axum::Router;
pub use axum::body::Bytes;
pub use axum::http::{Method, Request, Response, StatusCode};

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use webview_surface_runtime::{Dispatcher, NativeLayer, SizeHint, Surface};

pub const DEFAULT_WIDTH: i32 = 500;
pub const DEFAULT_HEIGHT: i32 = 500;

/// Binding the page calls once its runtime is up.
pub const READY_BINDING: &str = "_webview_ready";
pub const LOG_BINDING: &str = "_webview_log";
pub const SCRIPT_LOG_TARGET: &str = "webview::script";

pub type InitHook = Box<dyn FnOnce(&Dispatcher) -> Result<(), AppError>>;
pub type ReadyHook = Arc<dyn Fn(&Dispatcher) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub title: String,
    pub width: i32,
    pub height: i32,
    pub debug: bool,
    pub topmost: bool,
    pub content: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            debug: false,
            topmost: false,
            content: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            title: lookup("APP_HOST_TITLE").unwrap_or_default(),
            width: parse_dimension(lookup("APP_HOST_WIDTH").as_deref(), DEFAULT_WIDTH),
            height: parse_dimension(lookup("APP_HOST_HEIGHT").as_deref(), DEFAULT_HEIGHT),
            debug: parse_flag(lookup("APP_HOST_DEBUG").as_deref()),
            topmost: parse_flag(lookup("APP_HOST_TOPMOST").as_deref()),
            content: lookup("APP_HOST_CONTENT")
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

fn parse_dimension(raw: Option<&str>, default: i32) -> i32 {
    raw.and_then(|value| value.trim().parse::<i32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(|value| {
        let value = value.trim();
        value == "1" || value.eq_ignore_ascii_case("true")
    })
    .unwrap_or(false)
}

pub struct App {
    pub width: i32,
    pub height: i32,
    pub title: String,
    pub content: Content,
    /// Subdirectory of `content` that maps to `/`.
    pub content_root: String,
    pub routes: Vec<Route>,
    pub server_init: Option<ServerInit>,
    pub topmost: bool,
    pub debug: bool,
    /// Runs before navigation; the place to add bindings of your own.
    pub init: Option<InitHook>,
    pub on_ready: Option<ReadyHook>,
}

impl Default for App {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: String::new(),
            content: Content::Empty,
            content_root: String::new(),
            routes: Vec::new(),
            server_init: None,
            topmost: false,
            debug: false,
            init: None,
            on_ready: None,
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("title", &self.title)
            .field("content", &self.content)
            .field("content_root", &self.content_root)
            .field("routes", &self.routes)
            .field("topmost", &self.topmost)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl App {
    pub fn from_config(config: AppConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            title: config.title,
            content: config.content.map(Content::Directory).unwrap_or_default(),
            topmost: config.topmost,
            debug: config.debug,
            ..Self::default()
        }
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Adjusts the server's router after the content is mounted and before
    /// any [`Route`] is.
    pub fn server_init<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        self.server_init = Some(Box::new(hook));
        self
    }

    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&Dispatcher) -> Result<(), AppError> + 'static,
    {
        self.init = Some(Box::new(hook));
        self
    }

    pub fn on_ready<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Dispatcher) + Send + Sync + 'static,
    {
        self.on_ready = Some(Arc::new(hook));
        self
    }

    #[cfg(feature = "webview-ffi")]
    pub fn run(self) -> Result<(), AppError> {
        let layer = webview_surface_runtime::WebviewLayer::new(self.debug)?;
        self.run_with(layer)
    }

    /// Serves the content, shows it on a surface over `layer` and blocks in
    /// the surface loop. The server is stopped once the loop returns.
    pub fn run_with<L: NativeLayer>(self, layer: L) -> Result<(), AppError> {
        let width = positive_or(self.width, DEFAULT_WIDTH);
        let height = positive_or(self.height, DEFAULT_HEIGHT);

        let server = ContentServer::start(Site {
            content: self.content,
            content_root: self.content_root,
            routes: self.routes,
            init: self.server_init,
        })?;
        let address = server.address();

        let mut surface = Surface::new(layer);
        surface.set_size(width, height, SizeHint::Fixed);
        surface.center();
        if !self.debug {
            surface.disable_context_menu();
        }
        surface.set_title(&self.title);
        if self.topmost {
            surface.topmost(true);
        }

        let dispatcher = surface.dispatcher();
        if let Some(init) = self.init {
            init(&dispatcher)?;
        }

        surface.bind(LOG_BINDING, |lines: Vec<Value>| {
            tracing::info!(target: SCRIPT_LOG_TARGET, "{}", join_log_line(&lines));
        })?;

        let on_ready = self.on_ready;
        let ready_dispatcher = dispatcher.clone();
        surface.bind(READY_BINDING, move || {
            tracing::debug!("page reported ready");
            if let Some(hook) = &on_ready {
                hook(&ready_dispatcher);
            }
        })?;

        surface.navigate(&address);
        surface.init(&init_script(width, height, &self.title, &address));

        tracing::info!(%address, width, height, "showing surface");
        surface.run()?;

        drop(surface);
        drop(server);
        Ok(())
    }
}

fn positive_or(value: i32, default: i32) -> i32 {
    if value > 0 { value } else { default }
}

fn join_log_line(values: &[Value]) -> String {
    values
        .iter()
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn init_script(width: i32, height: i32, title: &str, address: &str) -> String {
    let title = Value::String(title.to_string());
    let address = Value::String(address.to_string());

    format!(
        r#"(function () {{
  const env = Object.freeze({{
    width: {width},
    height: {height},
    title: {title},
    address: {address},
    log: function (...args) {{
      return window.{LOG_BINDING}(args.map((arg) =>
        typeof arg === "object" && arg !== null ? JSON.stringify(arg) : String(arg)));
    }},
    ready: function () {{
      return window.{READY_BINDING}();
    }},
  }});
  Object.defineProperty(window, "_webview", {{ value: env, enumerable: true }});
  window.addEventListener("load", function () {{
    document.body.style.margin = "0px";
    document.body.style.overflow = "hidden";
  }});
}})();"#
    )
}
