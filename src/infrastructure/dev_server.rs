use crate::core::context::BuildContext;
use crate::core::interfaces::FileSystemService;
use crate::core::models::{mime_from_filename, ChunkKind, EmittedFile, EmittedFileSet};
use crate::core::emitter::DOCUMENT_FILENAME;
use crate::core::orchestrator::DevSnapshot;
use crate::infrastructure::hmr_client::client_script;
use crate::utils::{KilnError, Logger, Result};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use flate2::{write::GzEncoder, Compression};
use percent_encoding::percent_decode_str;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Where the server takes its files from
#[derive(Clone)]
pub enum FileSource {
    /// The dev orchestrator's current build, swapped on every rebuild
    Live(Arc<DevSnapshot>),
    /// A finished output directory, loaded once
    Static(Arc<EmittedFileSet>),
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub base_path: String,
    pub history_fallback: bool,
    pub compress: bool,
    /// Push client included in the error page served before the first build
    pub hmr_port: Option<u16>,
}

impl ServeOptions {
    pub fn dev(context: &BuildContext) -> Self {
        Self {
            base_path: context.public_base_path.clone(),
            history_fallback: context.history_api_fallback,
            compress: false,
            hmr_port: context.hot_reload.then(|| context.hmr_port()),
        }
    }

    pub fn preview(context: &BuildContext) -> Self {
        Self {
            base_path: context.public_base_path.clone(),
            history_fallback: context.history_api_fallback,
            compress: context.compress,
            hmr_port: None,
        }
    }
}

#[derive(Clone)]
struct ServerState {
    source: FileSource,
    options: Arc<ServeOptions>,
}

/// Every GET is answered from the file set; there are no other routes
pub fn router(source: FileSource, options: ServeOptions) -> Router {
    Router::new().fallback(handle_request).with_state(ServerState {
        source,
        options: Arc::new(options),
    })
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| KilnError::Server(format!("Failed to bind HTTP server to port {}: {}", port, e)))
}

pub async fn serve(listener: TcpListener, router: Router, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| KilnError::Server(format!("HTTP server error: {}", e)))
}

/// Read a build output directory into memory for previewing
pub async fn load_output_dir(fs: &dyn FileSystemService, dir: &Path) -> Result<EmittedFileSet> {
    if !dir.is_dir() {
        return Err(KilnError::config(format!(
            "Nothing to serve at {}; run `kiln build` first",
            dir.display()
        )));
    }

    let mut set = EmittedFileSet::default();
    for path in fs.list_files(dir).await? {
        let Ok(relative) = path.strip_prefix(dir) else { continue };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let contents = fs.read_bytes(&path).await?;
        set.files.insert(
            name.clone(),
            EmittedFile {
                kind: ChunkKind::StaticFile,
                mime_type: mime_from_filename(&name),
                contents: Arc::new(contents),
            },
        );
    }

    Logger::debug(&format!("📂 Loaded {} file(s) from {}", set.files.len(), dir.display()));
    Ok(set)
}

async fn handle_request(State(state): State<ServerState>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let files = match &state.source {
        FileSource::Static(files) => files.clone(),
        FileSource::Live(snapshot) => match snapshot.current() {
            Some(files) => files,
            None => {
                let message = snapshot.last_error().unwrap_or_else(|| "The first build is still running".to_string());
                return error_page(&message, state.options.hmr_port);
            }
        },
    };

    let options = &state.options;
    let Some(name) = resolve_request(&files, uri.path(), &options.base_path, options.history_fallback) else {
        return (StatusCode::NOT_FOUND, format!("{} not found", uri.path())).into_response();
    };
    let Some(file) = files.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(file.mime_type));
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    let mut body = file.contents.to_vec();
    if options.compress && is_compressible(file.mime_type) {
        response_headers.insert(header::VARY, HeaderValue::from_static("accept-encoding"));
        if accepts_gzip(&headers) {
            match gzip(&body) {
                Ok(compressed) => {
                    body = compressed;
                    response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                }
                Err(e) => Logger::warn(&format!("gzip failed for {}: {}", name, e)),
            }
        }
    }

    (StatusCode::OK, response_headers, body).into_response()
}

/// File name for a request path below `base_path`. Directory paths map to
/// their `index.html`; with history fallback, unknown extension-less paths
/// map to the document. Percent-escapes are decoded first.
pub fn resolve_request(files: &EmittedFileSet, path: &str, base_path: &str, history_fallback: bool) -> Option<String> {
    let path = percent_decode_str(path).decode_utf8().ok()?;
    let path = path.as_ref();
    let relative = if path == base_path.trim_end_matches('/') {
        ""
    } else {
        path.strip_prefix(base_path)?
    };
    let relative = relative.trim_start_matches('/');

    let name = if relative.is_empty() || relative.ends_with('/') {
        format!("{}{}", relative, DOCUMENT_FILENAME)
    } else {
        relative.to_string()
    };

    if files.get(&name).is_some() {
        return Some(name);
    }

    let last_segment = relative.rsplit('/').next().unwrap_or("");
    if history_fallback && !last_segment.contains('.') && files.get(DOCUMENT_FILENAME).is_some() {
        return Some(DOCUMENT_FILENAME.to_string());
    }

    None
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|enc| enc.trim().starts_with("gzip")))
}

fn is_compressible(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime.contains("javascript")
        || mime.contains("json")
        || mime.contains("wasm")
        || mime.contains("svg")
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn error_page(message: &str, hmr_port: Option<u16>) -> Response {
    let client = hmr_port
        .map(|port| format!("<script>\n{}\n</script>\n", client_script(port)))
        .unwrap_or_default();
    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Build failed</title>\n</head>\n\
<body style=\"margin:0;background:#1e1e1e;color:#f5f5f5;font-family:monospace\">\n\
<h1 style=\"color:#ff6b6b;padding:0 24px\">Build failed</h1>\n\
<pre style=\"padding:0 24px;white-space:pre-wrap\">{}</pre>\n{}</body>\n</html>\n",
        escape_html(message),
        client
    );

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    (StatusCode::SERVICE_UNAVAILABLE, headers, html).into_response()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
