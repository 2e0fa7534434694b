// src/commands/server.rs

//! Serve an existing mirror directory over HTTP

use anyhow::Result;
use forgeron::mirror::server::create_router;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

pub fn run(mirror_dir: &Path, bind: SocketAddr) -> Result<()> {
    let root = mirror_dir.to_path_buf();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(bind).await?;
        info!("serving {} at http://{}/simple/", root.display(), listener.local_addr()?);
        axum::serve(listener, create_router(root)).await?;
        Ok(())
    })
}
