use app_host::{App, AppConfig, Bytes, Response, Route};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(err) = run() {
        eprintln!("app_host fatal error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env();
    tracing::debug!(?config, "starting");

    App::from_config(config)
        .route(Route::get("/health", |_| {
            Response::new(Bytes::from_static(b"ok"))
        }))
        .on_ready(|_| tracing::info!("page ready"))
        .run()?;

    Ok(())
}
