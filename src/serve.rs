use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{Path as UrlPath, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use tokio::signal;
use tower_http::compression::CompressionLayer;

use crate::handbook;
use crate::html;
use crate::interpret;
use crate::nav::{self, Manifest};
use crate::source::{fetch_first, BookStore, LoadError};
use crate::web_assets;

/// Maximum number of consecutive ports to try before giving up.
const MAX_PORT_ATTEMPTS: u16 = 100;

/// Maximum file size served by the static passthrough (16 MiB).
pub const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Shared application state passed to all request handlers via `Arc<AppState>`.
pub struct AppState {
    /// The book directory all content is read from.
    pub book_root: PathBuf,
    /// Canonicalized `book_root` used for symlink-safe containment checks.
    pub canonical_root: PathBuf,
}

/// Bind a TCP listener on `bind_addr`, starting at `start_port` and walking
/// forward past ports already in use, up to `MAX_PORT_ATTEMPTS` candidates.
/// Errors other than `EADDRINUSE` abort immediately.
pub fn bind_with_retry(bind_addr: &str, start_port: u16) -> Result<(TcpListener, u16), String> {
    let mut attempts: u16 = 0;
    let mut port = start_port;
    eprintln!("[bind] addr={bind_addr} port={port}");
    loop {
        match TcpListener::bind((bind_addr, port)) {
            Ok(listener) => {
                eprintln!("[bind] bound port={port}");
                return Ok((listener, port));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                attempts += 1;
                if attempts >= MAX_PORT_ATTEMPTS {
                    return Err(format!(
                        "no free port within {MAX_PORT_ATTEMPTS} candidates from {start_port}"
                    ));
                }
                port = port.wrapping_add(1);
                eprintln!("[bind] port in use, next={port}");
            }
            Err(e) => return Err(format!("could not bind {bind_addr}:{port}: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Path resolution helpers (static passthrough)
// ---------------------------------------------------------------------------

/// Percent-decode a URL path (RFC 3986 §2.1).
///
/// Malformed input is an error: a `%` not followed by two hex digits, or a
/// decoded byte sequence that is not valid UTF-8.
pub fn percent_decode(encoded: &str) -> Result<String, ()> {
    fn hex_pair(pair: &[u8]) -> Option<u8> {
        if !pair.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        let digits = std::str::from_utf8(pair).ok()?;
        u8::from_str_radix(digits, 16).ok()
    }

    let mut decoded = Vec::with_capacity(encoded.len());
    let mut rest = encoded.as_bytes();
    while let Some(&byte) = rest.first() {
        if byte == b'%' {
            let pair = rest.get(1..3).ok_or(())?;
            decoded.push(hex_pair(pair).ok_or(())?);
            rest = &rest[3..];
        } else {
            decoded.push(byte);
            rest = &rest[1..];
        }
    }
    String::from_utf8(decoded).map_err(|_| ())
}

/// Resolve `.` and `..` segments of a decoded URL path without touching the
/// filesystem. `None` means a `..` tried to climb above the root, which is
/// a traversal attempt.
pub fn normalize_path(decoded: &str) -> Option<PathBuf> {
    let mut stack: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                stack.pop()?;
            }
            name => stack.push(name),
        }
    }
    Some(stack.into_iter().collect())
}

/// `Content-Type` for a file extension, case-insensitive.
///
/// Source files (`.md`/`.txt`) pass through as plain text; rendering happens
/// only behind `/sections/`. Unrecognized extensions are served as opaque
/// octet streams.
pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "md" | "txt" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "css" => "text/css",
        "js" => "text/javascript",
        "pdf" => "application/pdf",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Every plain response goes through here so the `nosniff` header cannot be
/// forgotten on a branch.
fn respond(status: StatusCode, content_type: &str, body: Body) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header("X-Content-Type-Options", "nosniff")
        .body(body)
        .expect("response builder with static headers is infallible")
}

/// A 200 carrying cache validators alongside the standard headers.
fn respond_validated(
    content_type: &str,
    etag: &str,
    last_modified: &str,
    body: Body,
) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ETAG, etag)
        .header(header::LAST_MODIFIED, last_modified)
        .header("X-Content-Type-Options", "nosniff")
        .body(body)
        .expect("validated response builder is infallible")
}

fn not_found_response() -> Response {
    respond(
        StatusCode::NOT_FOUND,
        "text/plain; charset=utf-8",
        Body::from("Not Found"),
    )
}

fn too_large_response(norm_path: &str, size: u64) -> Response {
    let body = format!(
        "Content Too Large: {} ({} bytes exceeds {} byte limit)",
        norm_path, size, MAX_FILE_SIZE
    );
    respond(
        StatusCode::PAYLOAD_TOO_LARGE,
        "text/plain; charset=utf-8",
        Body::from(body),
    )
}

fn html_response(status: StatusCode, body: String) -> Response {
    respond(status, "text/html; charset=utf-8", Body::from(body))
}

/// An error block as an HTML fragment, inserted by the client into the
/// affected container.
fn fragment_error_response(status: StatusCode, message: &str) -> Response {
    html_response(status, html::error_fragment(message))
}

/// 304 Not Modified carrying the current validators.
fn not_modified_response(etag: &str, last_modified: &str) -> Response {
    Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header(header::ETAG, etag)
        .header(header::LAST_MODIFIED, last_modified)
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::empty())
        .expect("not_modified_response builder is infallible")
}

// ---------------------------------------------------------------------------
// Conditional GET
// ---------------------------------------------------------------------------

/// ETag and Last-Modified values derived from file metadata. `None` when the
/// filesystem withholds a modification time.
fn validators(meta: &std::fs::Metadata) -> Option<(String, String, SystemTime)> {
    let mtime = meta.modified().ok()?;
    let secs = mtime.duration_since(UNIX_EPOCH).ok()?.as_secs();
    let etag = format!("\"{:x}-{:x}\"", meta.len(), secs);
    Some((etag, httpdate::fmt_http_date(mtime), mtime))
}

/// True when the client's validators show its copy is current.
/// `If-None-Match` wins over `If-Modified-Since`, per RFC 9110.
fn is_fresh(headers: &HeaderMap, etag: &str, mtime: SystemTime) -> bool {
    if let Some(inm) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        return inm
            .split(',')
            .map(|tag| tag.trim().trim_start_matches("W/"))
            .any(|tag| tag == etag || tag == "*");
    }
    if let Some(ims) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
    {
        if let Ok(since) = httpdate::parse_http_date(ims) {
            // HTTP dates have one-second resolution; compare floored values.
            let mtime_secs = mtime
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let since_secs = since
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            return mtime_secs <= since_secs;
        }
    }
    false
}

/// Wrap a cacheable HTML body: 304 when the client is current, otherwise a
/// 200 carrying validators.
fn cacheable_html(
    headers: &HeaderMap,
    body: String,
    meta: Option<&std::fs::Metadata>,
) -> Response {
    match meta.and_then(validators) {
        Some((etag, last_modified, mtime)) if is_fresh(headers, &etag, mtime) => {
            not_modified_response(&etag, &last_modified)
        }
        Some((etag, last_modified, _)) => respond_validated(
            "text/html; charset=utf-8",
            &etag,
            &last_modified,
            Body::from(body),
        ),
        None => html_response(StatusCode::OK, body),
    }
}

// ---------------------------------------------------------------------------
// Section pipeline (blocking; runs under spawn_blocking)
// ---------------------------------------------------------------------------

struct LoadedSection {
    body: String,
    key: String,
    source: String,
    meta: Option<std::fs::Metadata>,
}

enum SectionError {
    Manifest(io::Error),
    Load(LoadError),
}

/// The full load pipeline for one target: manifest → key → fetch →
/// interpret → HTML fragment. The manifest is re-read per request so edits
/// to the book show up on reload.
fn load_section(book_root: &Path, target: &str) -> Result<LoadedSection, SectionError> {
    let manifest = Manifest::load(book_root).map_err(SectionError::Manifest)?;
    let key = manifest.resolve_key(target);
    let store = BookStore::new(book_root.to_path_buf());
    let payload = fetch_first(&store, &key).map_err(SectionError::Load)?;
    let tree = interpret::interpret(&payload);
    let body = html::tree_html(&tree);
    let meta = std::fs::metadata(store.candidate_path(&payload.candidate)).ok();
    Ok(LoadedSection {
        body,
        key,
        source: payload.candidate.rel_path(),
        meta,
    })
}

// ---------------------------------------------------------------------------
// Axum request handlers
// ---------------------------------------------------------------------------

async fn page_handler(State(state): State<Arc<AppState>>) -> Response {
    let root = state.book_root.clone();
    let built = tokio::task::spawn_blocking(move || {
        Manifest::load(&root).map(|manifest| html::build_page_shell(&manifest))
    })
    .await;
    match built {
        Ok(Ok(page)) => {
            eprintln!("[request] path=/ mode=shell");
            html_response(StatusCode::OK, page)
        }
        Ok(Err(err)) => {
            eprintln!("[request] path=/ status=manifest-error err={err}");
            fragment_error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
        Err(err) => {
            eprintln!("[request] path=/ status=worker-error err={err}");
            fragment_error_response(StatusCode::INTERNAL_SERVER_ERROR, "page build failed")
        }
    }
}

/// `GET /sections/{target}` — the rendered fragment for one section body.
/// The client inserts the response body into the reader container either
/// way; the status code tells it which state flag to set.
async fn section_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(target): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    if !nav::is_valid_target(&target) {
        eprintln!("[request] target={target} status=bad-target");
        let err = LoadError::BadTarget { target };
        return fragment_error_response(StatusCode::NOT_FOUND, &err.to_string());
    }
    let root = state.book_root.clone();
    let requested = target.clone();
    let outcome = tokio::task::spawn_blocking(move || load_section(&root, &requested)).await;
    match outcome {
        Ok(Ok(section)) => {
            eprintln!(
                "[request] target={target} key={} source={} status=ok",
                section.key, section.source
            );
            cacheable_html(&headers, section.body, section.meta.as_ref())
        }
        Ok(Err(SectionError::Load(err))) => {
            eprintln!("[request] target={target} status=unavailable err={err}");
            fragment_error_response(StatusCode::NOT_FOUND, &err.to_string())
        }
        Ok(Err(SectionError::Manifest(err))) => {
            eprintln!("[request] target={target} status=manifest-error err={err}");
            fragment_error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
        Err(err) => {
            eprintln!("[request] target={target} status=worker-error err={err}");
            fragment_error_response(StatusCode::INTERNAL_SERVER_ERROR, "section worker failed")
        }
    }
}

/// `GET /handbook` — the handbook document as trusted HTML. On failure the
/// fragment is an error block; the overlay still shows it.
async fn handbook_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let root = state.book_root.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let store = BookStore::new(root);
        let meta = std::fs::metadata(store.handbook_path()).ok();
        handbook::load_document(&store).map(|markdown| (html::document_html(&markdown), meta))
    })
    .await;
    match outcome {
        Ok(Ok((body, meta))) => {
            eprintln!("[handbook] status=ok");
            cacheable_html(&headers, body, meta.as_ref())
        }
        Ok(Err(message)) => {
            eprintln!("[handbook] status=missing err={message}");
            fragment_error_response(StatusCode::NOT_FOUND, &message)
        }
        Err(err) => {
            eprintln!("[handbook] status=worker-error err={err}");
            fragment_error_response(StatusCode::INTERNAL_SERVER_ERROR, "handbook worker failed")
        }
    }
}

async fn css_handler() -> Response {
    eprintln!("[request] path=/assets/lorebook.css mode=asset");
    respond(
        StatusCode::OK,
        "text/css; charset=utf-8",
        Body::from(web_assets::CSS),
    )
}

async fn js_handler() -> Response {
    eprintln!("[request] path=/assets/lorebook.js mode=asset");
    respond(
        StatusCode::OK,
        "text/javascript; charset=utf-8",
        Body::from(web_assets::JS),
    )
}

/// Fallback: static passthrough for other files under the book directory
/// (images and similar referenced from section content).
///
/// Steps:
/// 1. Percent-decode the raw request path (before any normalisation).
/// 2. Normalise: strip `.`/`..` via component iteration; reject traversal.
/// 3. Construct candidate = `book_root` + normalised path; regular files only.
/// 4. Canonicalise and re-verify containment in `canonical_root`
///    (symlink-safe).
/// 5. Stat the file; reject with 413 if size exceeds `MAX_FILE_SIZE`.
/// 6. Serve bytes with the extension's MIME type and validators.
///
/// All responses include `X-Content-Type-Options: nosniff`.
async fn files_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let raw_path = req.uri().path().to_owned();

    let Ok(decoded) = percent_decode(&raw_path) else {
        eprintln!("[resolve] path={raw_path} branch=denied reason=invalid-percent-encoding");
        return not_found_response();
    };
    if decoded.contains('\0') {
        eprintln!("[resolve] path={raw_path} branch=denied reason=null-byte");
        return not_found_response();
    }

    let Some(normalized) = normalize_path(&decoded) else {
        eprintln!("[resolve] path={raw_path} branch=denied reason=path-traversal");
        return not_found_response();
    };
    if normalized.as_os_str().is_empty() {
        return not_found_response();
    }
    let norm_display = normalized.display().to_string();

    let candidate = state.book_root.join(&normalized);
    let is_file = tokio::fs::metadata(&candidate)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        eprintln!("[resolve] path={norm_display} branch=denied reason=not-found");
        return not_found_response();
    }

    // Containment is re-checked on the canonical path so a symlink inside
    // the book cannot point outside it.
    let Ok(canonical) = tokio::fs::canonicalize(&candidate).await else {
        eprintln!("[resolve] path={norm_display} branch=denied reason=canonicalize-failed");
        return not_found_response();
    };
    if !canonical.starts_with(&state.canonical_root) {
        eprintln!("[resolve] path={norm_display} branch=denied reason=outside-root");
        return not_found_response();
    }

    let Ok(meta) = tokio::fs::metadata(&canonical).await else {
        eprintln!("[resolve] path={norm_display} branch=denied reason=metadata-failed");
        return not_found_response();
    };
    let size = meta.len();
    if size > MAX_FILE_SIZE {
        eprintln!("[resolve] path={norm_display} branch=denied reason=too-large size={size}");
        return too_large_response(&norm_display, size);
    }
    eprintln!("[resolve] path={norm_display} branch=file size={size}");

    let ext = canonical.extension().and_then(|e| e.to_str()).unwrap_or("");
    let content_type = mime_for_ext(ext);

    let validated = validators(&meta);
    if let Some((etag, last_modified, mtime)) = &validated {
        if is_fresh(req.headers(), etag, *mtime) {
            return not_modified_response(etag, last_modified);
        }
    }
    let Ok(bytes) = tokio::fs::read(&canonical).await else {
        return not_found_response();
    };
    match validated {
        Some((etag, last_modified, _)) => {
            respond_validated(content_type, &etag, &last_modified, Body::from(bytes))
        }
        None => respond(StatusCode::OK, content_type, Body::from(bytes)),
    }
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Start the HTTP server for the given book directory.
///
/// Binds to `bind_addr` starting at `start_port`, retrying on `EADDRINUSE`
/// up to 100 times. The server shuts down cleanly on SIGINT (Ctrl+C).
pub async fn run_serve(book_dir: String, bind_addr: String, start_port: u16) -> io::Result<()> {
    let book_root = std::fs::canonicalize(&book_dir).unwrap_or_else(|_| PathBuf::from(&book_dir));
    // Validate the book up front; handlers re-read it per request.
    let manifest = Manifest::load(&book_root)?;
    let canonical_root = book_root.clone();

    let state = Arc::new(AppState {
        book_root: book_root.clone(),
        canonical_root,
    });

    let (std_listener, bound_port) = bind_with_retry(&bind_addr, start_port).map_err(|msg| {
        eprintln!("Error: {}", msg);
        io::Error::new(io::ErrorKind::AddrInUse, msg)
    })?;

    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;

    let app = Router::new()
        .route("/", get(page_handler))
        .route("/sections/{target}", get(section_handler))
        .route("/handbook", get(handbook_handler))
        .route("/assets/lorebook.css", get(css_handler))
        .route("/assets/lorebook.js", get(js_handler))
        .fallback(files_handler)
        .layer(CompressionLayer::new())
        .with_state(state);

    println!("lorebook serve");
    println!("root:  {}", book_root.display());
    println!(
        "toc:   {} groups, {} sections",
        manifest.groups.len(),
        manifest.section_count()
    );
    println!("url:   http://{}:{}/", bind_addr, bound_port);
    eprintln!("[serve] listening addr={bind_addr} port={bound_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(io::Error::other)?;

    Ok(())
}

async fn shutdown_signal() {
    signal::ctrl_c()
        .await
        .expect("failed to install SIGINT handler");
    eprintln!("[shutdown] complete");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // --- percent_decode ---

    #[test]
    fn decode_passes_plain_paths_and_resolves_escapes() {
        assert_eq!(percent_decode("/image.png").unwrap(), "/image.png");
        assert_eq!(percent_decode("/qi%20notes.txt").unwrap(), "/qi notes.txt");
        assert_eq!(percent_decode("%2e%2e").unwrap(), "..");
        assert_eq!(percent_decode("%2E%2E").unwrap(), "..");
        assert_eq!(percent_decode("%2f").unwrap(), "/");
    }

    #[test]
    fn decode_rejects_malformed_escapes() {
        assert!(percent_decode("%").is_err());
        assert!(percent_decode("%2").is_err());
        assert!(percent_decode("%zz").is_err());
        assert!(percent_decode("%+1").is_err());
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        // well-formed escape, but a lone continuation byte
        assert!(percent_decode("%80").is_err());
    }

    // --- normalize_path ---

    #[test]
    fn normalize_resolves_dots_within_root() {
        assert_eq!(
            normalize_path("/data/qi.json").unwrap(),
            PathBuf::from("data/qi.json")
        );
        assert_eq!(
            normalize_path("/./data//qi.json").unwrap(),
            PathBuf::from("data/qi.json")
        );
        assert_eq!(normalize_path("/a/b/../c").unwrap(), PathBuf::from("a/c"));
        assert_eq!(normalize_path("/").unwrap(), PathBuf::new());
    }

    #[test]
    fn normalize_refuses_to_climb_out() {
        assert!(normalize_path("/../etc/passwd").is_none());
        assert!(normalize_path("/a/../../etc/passwd").is_none());
        for encoded in ["/%2e%2e/etc/passwd", "/%2e%2e%2fetc%2fpasswd"] {
            let decoded = percent_decode(encoded).unwrap();
            assert!(normalize_path(&decoded).is_none(), "escaped via {encoded}");
        }
    }

    // --- mime_for_ext ---

    #[test]
    fn mime_covers_book_file_types() {
        assert_eq!(mime_for_ext("png"), "image/png");
        assert_eq!(mime_for_ext("jpg"), "image/jpeg");
        assert_eq!(mime_for_ext("svg"), "image/svg+xml");
        assert_eq!(mime_for_ext("md"), "text/plain; charset=utf-8");
        assert_eq!(mime_for_ext("txt"), "text/plain; charset=utf-8");
        assert_eq!(mime_for_ext("json"), "application/json");
    }

    #[test]
    fn mime_defaults_to_octet_stream_and_ignores_case() {
        assert_eq!(mime_for_ext("xyz"), "application/octet-stream");
        assert_eq!(mime_for_ext(""), "application/octet-stream");
        assert_eq!(mime_for_ext("PNG"), "image/png");
        assert_eq!(mime_for_ext("MD"), "text/plain; charset=utf-8");
    }

    // --- validators / is_fresh ---

    fn meta_for(path: &std::path::Path) -> std::fs::Metadata {
        std::fs::metadata(path).unwrap()
    }

    #[test]
    fn validators_shape() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.json");
        std::fs::write(&file, "[]").unwrap();
        let (etag, last_modified, _) = validators(&meta_for(&file)).unwrap();
        assert!(etag.starts_with('"') && etag.ends_with('"'), "etag: {etag}");
        assert!(last_modified.contains("GMT"), "date: {last_modified}");
    }

    #[test]
    fn fresh_on_matching_etag() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.json");
        std::fs::write(&file, "[]").unwrap();
        let (etag, _, mtime) = validators(&meta_for(&file)).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, etag.parse().unwrap());
        assert!(is_fresh(&headers, &etag, mtime));

        let mut wildcard = HeaderMap::new();
        wildcard.insert(header::IF_NONE_MATCH, "*".parse().unwrap());
        assert!(is_fresh(&wildcard, &etag, mtime));
    }

    #[test]
    fn stale_on_mismatched_etag() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.json");
        std::fs::write(&file, "[]").unwrap();
        let (etag, _, mtime) = validators(&meta_for(&file)).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, "\"deadbeef-0\"".parse().unwrap());
        assert!(!is_fresh(&headers, &etag, mtime));
    }

    #[test]
    fn fresh_on_if_modified_since_at_or_after_mtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.json");
        std::fs::write(&file, "[]").unwrap();
        let (etag, last_modified, mtime) = validators(&meta_for(&file)).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MODIFIED_SINCE, last_modified.parse().unwrap());
        assert!(is_fresh(&headers, &etag, mtime));

        let mut old = HeaderMap::new();
        old.insert(
            header::IF_MODIFIED_SINCE,
            "Mon, 01 Jan 1990 00:00:00 GMT".parse().unwrap(),
        );
        assert!(!is_fresh(&old, &etag, mtime));
    }

    #[test]
    fn if_none_match_wins_over_if_modified_since() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.json");
        std::fs::write(&file, "[]").unwrap();
        let (etag, last_modified, mtime) = validators(&meta_for(&file)).unwrap();

        // Mismatched ETag forces a refetch even though the date matches.
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, "\"other\"".parse().unwrap());
        headers.insert(header::IF_MODIFIED_SINCE, last_modified.parse().unwrap());
        assert!(!is_fresh(&headers, &etag, mtime));
    }

    // --- load_section (blocking pipeline) ---

    fn book_with(sections: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("toc.json"),
            r#"{
                "title": "Test Book",
                "groups": [
                    { "label": "G", "sections": [ { "id": "qi", "label": "Qi" } ] }
                ],
                "aliases": { "ref-old": "qi" }
            }"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        for (rel, contents) in sections {
            std::fs::write(dir.path().join("data").join(rel), contents).unwrap();
        }
        dir
    }

    #[test]
    fn load_section_renders_structured_content() {
        let book = book_with(&[("qi.json", r#"["a","b"]"#)]);
        let section = load_section(book.path(), "qi").unwrap_or_else(|_| panic!("load failed"));
        assert_eq!(section.key, "qi");
        assert_eq!(section.source, "data/qi.json");
        assert!(section.body.contains("<p>a</p>"), "got: {}", section.body);
        assert!(section.meta.is_some());
    }

    #[test]
    fn load_section_resolves_aliases() {
        let book = book_with(&[("qi.md", "# Qi\n")]);
        let section = load_section(book.path(), "ref-old").unwrap_or_else(|_| panic!("load failed"));
        assert_eq!(section.key, "qi");
        assert_eq!(section.source, "data/qi.md");
        assert!(section.body.contains("<h1>Qi</h1>"), "got: {}", section.body);
    }

    #[test]
    fn load_section_fails_without_sources() {
        let book = book_with(&[]);
        match load_section(book.path(), "ghost") {
            Err(SectionError::Load(LoadError::NoAvailableSource { attempted, .. })) => {
                assert_eq!(attempted.len(), 3);
            }
            _ => panic!("expected NoAvailableSource"),
        }
    }

    #[test]
    fn load_section_requires_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            load_section(dir.path(), "qi"),
            Err(SectionError::Manifest(_))
        ));
    }

    // --- bind_with_retry ---

    #[test]
    fn bind_retries_past_occupied_port() {
        // Occupy an OS-assigned port, then ask bind_with_retry for that same
        // port; it must advance past the collision.
        let occupied = TcpListener::bind("127.0.0.1:0").expect("bind any port");
        let taken = occupied.local_addr().expect("local addr").port();
        let (listener, port) = bind_with_retry("127.0.0.1", taken).expect("retry bind");
        assert_ne!(port, taken);
        assert_eq!(listener.local_addr().expect("local addr").port(), port);
        drop(occupied);
    }
}
