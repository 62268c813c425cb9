use std::net::SocketAddr;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;

use crate::layout::Layout;

/// Serves the output root over HTTP on the layout's fixed port. Blocks the
/// calling thread until the process is interrupted.
pub fn serve(layout: &Layout) -> anyhow::Result<()> {
    let port = layout.http_port;
    let url = style(format!("http://localhost:{port}/")).yellow();
    eprintln!("Serving {} on {url}", layout.dist);

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(serve_dir(layout.dist.clone(), port))
}

async fn serve_dir(dist: Utf8PathBuf, port: u16) -> anyhow::Result<()> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(address).await?;

    let router = Router::new().fallback_service(ServeDir::new(dist));

    axum::serve(listener, router).await?;

    Ok(())
}
