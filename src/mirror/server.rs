// src/mirror/server.rs

//! HTTP mirror serving the local artifact repository
//!
//! Implements the minimal package-index protocol consumed by build
//! environments: a per-package listing page and a file retrieval
//! endpoint. Listings re-scan the store on every request, so artifacts
//! published mid-run become visible without a restart.

use axum::extract::{Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::info;

/// Shared router state: the repository root directory
#[derive(Clone)]
struct MirrorState {
    root: Arc<PathBuf>,
}

/// Create the mirror application router
pub fn create_router(root: PathBuf) -> Router {
    let state = MirrorState {
        root: Arc::new(root),
    };
    Router::new()
        .route("/", get(root_redirect))
        .route("/simple", get(index_page))
        .route("/simple/", get(index_page))
        .route("/simple/:project", get(project_page))
        .route("/simple/:project/", get(project_page))
        .route("/simple/:project/:filename", get(serve_file))
        .with_state(state)
}

async fn root_redirect() -> Redirect {
    Redirect::permanent("/simple/")
}

fn html_page(title: &str, entries: &[String]) -> Html<String> {
    let mut body = String::new();
    body.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    body.push_str("  <meta name=\"repository-version\" content=\"1.0\">\n");
    body.push_str(&format!("  <title>{title}</title>\n</head>\n<body>\n"));
    for entry in entries {
        body.push_str(entry);
        body.push('\n');
    }
    body.push_str("</body>\n</html>\n");
    Html(body)
}

/// `GET /simple/`: list known packages
async fn index_page(State(state): State<MirrorState>) -> Response {
    let mut entries = Vec::new();
    let mut dir = match tokio::fs::read_dir(state.root.as_ref()).await {
        Ok(dir) => dir,
        Err(_) => return (StatusCode::NOT_FOUND, "mirror root missing").into_response(),
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(format!("<a href=\"/simple/{name}/\">{name}</a><br/>"));
        }
    }
    entries.sort();
    html_page("Simple index", &entries).into_response()
}

/// `GET /simple/{project}/`: list artifact filenames for one package
async fn project_page(
    State(state): State<MirrorState>,
    AxumPath(project): AxumPath<String>,
) -> Response {
    let project_dir = state.root.join(&project);
    let mut entries = Vec::new();
    let mut dir = match tokio::fs::read_dir(&project_dir).await {
        Ok(dir) => dir,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                format!("no artifacts for '{project}'"),
            )
                .into_response()
        }
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        // skip in-flight writes; publishing renames them into place
        if name.ends_with(".tmp") {
            continue;
        }
        entries.push(format!(
            "<a href=\"/simple/{project}/{name}\">{name}</a><br/>"
        ));
    }
    entries.sort();
    html_page(&format!("Links for {project}"), &entries).into_response()
}

/// `GET /simple/{project}/{filename}`: artifact bytes
async fn serve_file(
    State(state): State<MirrorState>,
    AxumPath((project, filename)): AxumPath<(String, String)>,
) -> Response {
    // reject traversal attempts before touching the filesystem
    if project.contains("..")
        || project.contains('/')
        || filename.contains("..")
        || filename.contains('/')
        || filename.ends_with(".tmp")
    {
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    }

    let path = state.root.join(&project).join(&filename);
    let media_type = if filename.ends_with(".tar.gz") {
        "application/x-tar"
    } else if filename.ends_with(".whl") {
        "application/zip"
    } else if filename.ends_with(".metadata.json") {
        "application/json"
    } else {
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, media_type)], bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}

/// A mirror server running on a background thread
pub struct MirrorServer {
    /// Base URL of the index, ending in `/simple/`
    pub url: String,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MirrorServer {
    /// Start serving `root` on a background thread. Binding port 0 picks
    /// a free port; the bound address is reported back before returning.
    pub fn start(root: PathBuf, addr: SocketAddr) -> crate::error::Result<MirrorServer> {
        let (addr_tx, addr_rx) = mpsc::channel::<std::io::Result<SocketAddr>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = addr_tx.send(Err(e));
                    return;
                }
            };
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::bind(addr).await {
                    Ok(l) => l,
                    Err(e) => {
                        let _ = addr_tx.send(Err(e));
                        return;
                    }
                };
                let local = match listener.local_addr() {
                    Ok(a) => a,
                    Err(e) => {
                        let _ = addr_tx.send(Err(e));
                        return;
                    }
                };
                let _ = addr_tx.send(Ok(local));
                let app = create_router(root);
                let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                });
                if let Err(e) = serve.await {
                    tracing::error!("mirror server error: {}", e);
                }
            });
        });

        let local = addr_rx
            .recv()
            .map_err(|e| crate::error::Error::Other(format!("mirror server did not start: {e}")))??;
        let url = format!("http://{local}/simple/");
        info!("started mirror server at {}", url);
        Ok(MirrorServer {
            url,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Stop the server and wait for the background thread to exit
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MirrorServer {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
