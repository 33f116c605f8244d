//! Loopback HTTP server feeding the surface.
//!
//! The server runs on its own thread with a private tokio runtime so the UI
//! thread stays free for the native loop. It listens on `127.0.0.1:0`;
//! [`ContentServer::start`] blocks until the kernel has picked a port.
//! Dropping the handle shuts the server down and joins the thread.

use crate::content::Content;
use crate::error::AppError;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderName, Method, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{MethodFilter, MethodRouter, any, on};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

pub type RouteHandler = Arc<dyn Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync>;

/// Runs once the content fallback is mounted and before [`Route`]s are added.
pub type ServerInit = Box<dyn FnOnce(Router) -> Router + Send>;

const ALLOW_METHODS: [Method; 5] = [
    Method::POST,
    Method::GET,
    Method::OPTIONS,
    Method::PUT,
    Method::DELETE,
];
const ALLOW_HEADERS: [HeaderName; 6] = [
    header::ACCEPT,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::ACCEPT_ENCODING,
    HeaderName::from_static("x-csrftoken"),
    header::AUTHORIZATION,
];

/// An extra endpoint next to the content tree. Responses carry permissive
/// CORS headers so pages loaded from elsewhere can call it too.
#[derive(Clone)]
pub struct Route {
    method: Option<Method>,
    path: String,
    handler: RouteHandler,
}

impl Route {
    pub fn any<F>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync + 'static,
    {
        Self {
            method: None,
            path: path.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn new<F>(method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync + 'static,
    {
        Self {
            method: Some(method),
            ..Self::any(path, handler)
        }
    }

    pub fn get<F>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync + 'static,
    {
        Self::new(Method::GET, path, handler)
    }

    pub fn post<F>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync + 'static,
    {
        Self::new(Method::POST, path, handler)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn method_router(&self) -> Option<MethodRouter> {
        let handler = self.handler.clone();
        let call = move |req: Request<Body>| {
            let handler = handler.clone();
            async move {
                let (parts, body) = req.into_parts();
                match axum::body::to_bytes(body, usize::MAX).await {
                    Ok(body) => handler(Request::from_parts(parts, body))
                        .map(Body::from)
                        .into_response(),
                    Err(err) => {
                        tracing::warn!(path = %parts.uri.path(), "failed to read request body: {err}");
                        (StatusCode::BAD_REQUEST, "unreadable body").into_response()
                    }
                }
            }
        };

        match &self.method {
            None => Some(any(call)),
            Some(method) => match MethodFilter::try_from(method.clone()) {
                Ok(filter) => Some(on(filter, call)),
                Err(_) => {
                    tracing::warn!(%method, path = %self.path, "method cannot be routed");
                    None
                }
            },
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct Site {
    pub content: Content,
    pub content_root: String,
    pub routes: Vec<Route>,
    pub init: Option<ServerInit>,
}

impl std::fmt::Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Site")
            .field("content", &self.content)
            .field("content_root", &self.content_root)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl Site {
    fn into_router(self) -> Router {
        let mut router = self.content.router(&self.content_root);
        if let Some(init) = self.init {
            router = init(router);
        }
        router.merge(routes_router(&self.routes))
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(ALLOW_METHODS)
        .allow_headers(ALLOW_HEADERS)
}

// Earlier routes win; a later route claiming a method already taken on its
// path is skipped.
fn routes_router(routes: &[Route]) -> Router {
    let mut by_path: Vec<(&str, MethodRouter, Vec<Option<&Method>>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for route in routes {
        if !route.path().starts_with('/') {
            tracing::warn!(path = route.path(), "route paths must start with '/'");
            continue;
        }
        let Some(method_router) = route.method_router() else {
            continue;
        };

        let Some(&at) = index.get(route.path()) else {
            index.insert(route.path(), by_path.len());
            by_path.push((route.path(), method_router, vec![route.method.as_ref()]));
            continue;
        };

        let (_, existing, claimed) = &mut by_path[at];
        let overlaps = route.method.is_none()
            || claimed
                .iter()
                .any(|taken| taken.is_none() || *taken == route.method.as_ref());
        if overlaps {
            tracing::warn!(method = ?route.method, path = route.path(), "route shadowed by an earlier one");
            continue;
        }

        claimed.push(route.method.as_ref());
        let merged = std::mem::replace(existing, MethodRouter::new()).merge(method_router);
        *existing = merged;
    }

    if by_path.is_empty() {
        return Router::new();
    }

    by_path
        .into_iter()
        .fold(Router::new(), |router, (path, method_router, _)| {
            router.route(path, method_router)
        })
        .route_layer(cors())
}

pub struct ContentServer {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ContentServer {
    pub fn start(site: Site) -> Result<Self, AppError> {
        site.content.validate(&site.content_root)?;
        let router = site.into_router();

        let (port_tx, port_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let thread = thread::Builder::new()
            .name("content-server".to_string())
            .spawn(move || serve(router, port_tx, shutdown_rx))
            .map_err(AppError::Runtime)?;

        let port = port_rx.recv().map_err(|_| AppError::ServerGone)??;

        Ok(Self {
            port,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address the surface navigates to.
    pub fn address(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }
}

impl Drop for ContentServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!(port = self.port, "content server thread panicked");
        }
    }
}

fn serve(
    router: Router,
    port_tx: mpsc::Sender<Result<u16, AppError>>,
    shutdown: oneshot::Receiver<()>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = port_tx.send(Err(AppError::Runtime(err)));
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await {
            Ok(listener) => listener,
            Err(err) => {
                let _ = port_tx.send(Err(AppError::Listen(err)));
                return;
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(err) => {
                let _ = port_tx.send(Err(AppError::Listen(err)));
                return;
            }
        };
        if port_tx.send(Ok(port)).is_err() {
            return;
        }
        tracing::info!(port, "content server listening");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.await;
            })
            .await;
        if let Err(err) = served {
            tracing::error!(port, "content server failed: {err}");
        }

        tracing::info!(port, "content server stopped");
    });
}
