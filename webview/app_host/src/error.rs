use std::path::PathBuf;
use thiserror::Error;
use webview_surface_runtime::{BindError, SurfaceError};

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("content directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("content root '{0}' leaves the content tree")]
    InvalidRoot(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("failed to bind content server: {0}")]
    Listen(#[source] std::io::Error),

    #[error("failed to start content server runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("content server stopped before reporting its port")]
    ServerGone,

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Bind(#[from] BindError),
}
