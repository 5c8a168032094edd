//! Axum dispatch for the WebDAV namespace.
//!
//! PROPFIND has no route support in axum, so the whole namespace is served
//! by one fallback handler dispatching on the method. URL layout:
//! `<url-base>/webdav/<provider>/<parent>/<entity>[/<file…>]`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, Request, Response, StatusCode, header};
use chrono::Utc;
use nimbus_core::FileInfo;
use nimbus_telemetry::Metrics;
use tower_http::compression::{CompressionLayer, Predicate};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::backend::{DavBackend, DavNode, DavPath, ServeOutcome};
use crate::error::{DavError, DavResult};
use crate::html::{format_http_date, render_listing};
use crate::propfind::render_multistatus;
use crate::range::parse_range;

/// Methods advertised in `Allow`.
const ALLOW: &str = "OPTIONS, GET, HEAD, PROPFIND, DELETE";
/// Bulk deletion pseudo-entity under a provider root.
const DELETE_ALL_BAD: &str = "DELETE_ALL_BAD_TORRENTS";

/// Shared server state: the provider backends and the URL prefix.
pub struct DavServer {
    url_base: String,
    backends: Vec<Arc<dyn DavBackend>>,
    metrics: Metrics,
}

impl DavServer {
    /// Assemble a server over the given backends.
    #[must_use]
    pub fn new(url_base: String, backends: Vec<Arc<dyn DavBackend>>, metrics: Metrics) -> Self {
        Self {
            url_base: url_base.trim_end_matches('/').to_owned(),
            backends,
            metrics,
        }
    }

    fn backend(&self, provider: &str) -> Option<&Arc<dyn DavBackend>> {
        self.backends
            .iter()
            .find(|backend| backend.provider() == provider)
    }
}

/// Compress multistatus XML only; media bodies pass through untouched.
#[derive(Clone, Copy)]
struct MultistatusOnly;

impl Predicate for MultistatusOnly {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: axum::body::HttpBody,
    {
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .is_some_and(|value| value.as_bytes().starts_with(b"application/xml"))
    }
}

/// Build the router serving the WebDAV namespace.
pub fn router(server: Arc<DavServer>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(CompressionLayer::new().compress_when(MultistatusOnly))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn dispatch(
    State(server): State<Arc<DavServer>>,
    request: Request<Body>,
) -> Response<Body> {
    let method = request.method().clone();
    let response = handle(&server, request).await;
    let status = response.status().as_u16();
    server.metrics.inc_webdav_request(method.as_str(), status);
    response
}

async fn handle(server: &DavServer, request: Request<Body>) -> Response<Body> {
    let raw_path = request.uri().path().to_owned();
    let decoded = urlencoding::decode(&raw_path)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| raw_path.clone());

    let Some(below_base) = decoded.strip_prefix(&server.url_base) else {
        return simple(StatusCode::NOT_FOUND, "outside url base");
    };
    let Some(below_webdav) = below_base
        .strip_prefix("/webdav")
        .map(|rest| rest.trim_start_matches('/'))
    else {
        return simple(StatusCode::NOT_FOUND, "outside /webdav");
    };

    let method = request.method().clone();
    let (provider, sub_path) = match below_webdav.split_once('/') {
        Some((provider, rest)) => (provider, format!("/{rest}")),
        None => (below_webdav, String::new()),
    };

    if provider.is_empty() {
        return namespace_root(server, &method);
    }
    let Some(backend) = server.backend(provider) else {
        return simple(StatusCode::NOT_FOUND, "unknown provider");
    };

    // Readiness gate: hold clients off until the initial sync completes.
    if !*backend.readiness().borrow() {
        let mut response = simple(StatusCode::SERVICE_UNAVAILABLE, "starting up");
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
        return response;
    }

    let path = DavPath::parse(&sub_path);
    let result = match method {
        Method::OPTIONS => Ok(options_response()),
        Method::GET => serve_get(backend, &raw_path, &path, &request, false).await,
        Method::HEAD => serve_get(backend, &raw_path, &path, &request, true).await,
        Method::DELETE => serve_delete(backend, &path).await,
        Method::POST => serve_post(backend, &path, request).await,
        _ if method.as_str() == "PROPFIND" => {
            serve_propfind(backend, &raw_path, &path, &request).await
        }
        _ if matches!(
            method.as_str(),
            "PUT" | "MKCOL" | "MOVE" | "COPY" | "PROPPATCH" | "LOCK" | "UNLOCK"
        ) =>
        {
            Err(DavError::permission("filesystem is read-only"))
        }
        _ => Ok(simple(StatusCode::METHOD_NOT_ALLOWED, "unsupported method")),
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            debug!(provider, error = %err, "webdav request failed");
            error_response(&err)
        }
    }
}

fn namespace_root(server: &DavServer, method: &Method) -> Response<Body> {
    let entries: Vec<FileInfo> = server
        .backends
        .iter()
        .map(|backend| FileInfo::dir(backend.provider().to_owned(), Utc::now()))
        .collect();
    let base = format!("{}/webdav/", server.url_base);
    match *method {
        Method::OPTIONS => options_response(),
        Method::GET => html_response(&render_listing("webdav", &base, None, &entries)),
        _ if method.as_str() == "PROPFIND" => {
            let own = FileInfo::dir("webdav", Utc::now());
            xml_response(&render_multistatus(&base, &own, Some(&entries), ""))
        }
        _ => simple(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
    }
}

fn options_response() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("DAV", "1, 2")
        .header(header::ALLOW, ALLOW)
        .header(header::CONTENT_LENGTH, "0")
        .body(Body::empty())
        .expect("static response")
}

async fn serve_propfind(
    backend: &Arc<dyn DavBackend>,
    raw_path: &str,
    path: &DavPath,
    request: &Request<Body>,
) -> DavResult<Response<Body>> {
    let depth = request
        .headers()
        .get("Depth")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("1");
    if depth.eq_ignore_ascii_case("infinity") {
        return Err(DavError::permission("Depth: infinity is not served"));
    }

    let node = backend.open(path).await?;
    let href = directory_href(raw_path, matches!(node, DavNode::Dir { .. }));

    let xml = match node {
        DavNode::Dir {
            name,
            entries,
            mod_time,
        } => {
            let own = FileInfo::dir(name, mod_time);
            let children = (depth == "1").then_some(entries.as_slice());
            render_multistatus(&href, &own, children, "")
        }
        DavNode::File { info, content_type } => {
            render_multistatus(&href, &info, None, content_type)
        }
    };
    Ok(xml_response(&xml))
}

async fn serve_get(
    backend: &Arc<dyn DavBackend>,
    raw_path: &str,
    path: &DavPath,
    request: &Request<Body>,
    head_only: bool,
) -> DavResult<Response<Body>> {
    match backend.open(path).await? {
        DavNode::Dir { name, entries, .. } => {
            let href = directory_href(raw_path, true);
            Ok(html_response(&render_listing(
                &name,
                &href,
                path.parent.as_deref(),
                &entries,
            )))
        }
        DavNode::File { info, content_type } => {
            serve_file(backend, path, request, &info, content_type, head_only).await
        }
    }
}

async fn serve_file(
    backend: &Arc<dyn DavBackend>,
    path: &DavPath,
    request: &Request<Body>,
    info: &FileInfo,
    content_type: &'static str,
    head_only: bool,
) -> DavResult<Response<Body>> {
    let etag = format!("\"{:x}-{:x}\"", info.mod_time.timestamp(), info.size);
    let last_modified = format_http_date(info.mod_time);

    let range = match request
        .headers()
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
    {
        Some(raw) => match parse_range(raw, info.size) {
            Ok(range) => Some(range),
            Err(_) => {
                // 416 carries the entity size so the client can recover.
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes */{}", info.size),
                    )
                    .body(Body::empty())
                    .map_err(|err| {
                        DavError::new(nimbus_core::ErrorKind::Protocol, err.to_string())
                    });
            }
        },
        None => None,
    };

    let (start, end) = range.unwrap_or((0, info.size.saturating_sub(1)));
    let status = if range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let content_length = end.saturating_sub(start) + 1;

    let mut builder = Response::builder()
        .status(if head_only { StatusCode::OK } else { status })
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, etag)
        .header(header::LAST_MODIFIED, last_modified);

    if head_only {
        return builder
            .header(header::CONTENT_LENGTH, info.size.to_string())
            .body(Body::empty())
            .map_err(|err| DavError::new(nimbus_core::ErrorKind::Protocol, err.to_string()));
    }

    if range.is_some() {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", info.size),
        );
    }

    match backend.serve(path, start, end).await? {
        ServeOutcome::Preloaded(bytes) => {
            let end = end.min(bytes.len().saturating_sub(1) as u64);
            let slice = bytes
                .get(usize::try_from(start).unwrap_or(usize::MAX)..=usize::try_from(end).unwrap_or(usize::MAX))
                .unwrap_or_default()
                .to_vec();
            builder
                .header(header::CONTENT_LENGTH, slice.len().to_string())
                .body(Body::from(slice))
                .map_err(|err| DavError::new(nimbus_core::ErrorKind::Protocol, err.to_string()))
        }
        ServeOutcome::Stream(body) => builder
            .header(header::CONTENT_LENGTH, content_length.to_string())
            .body(body)
            .map_err(|err| DavError::new(nimbus_core::ErrorKind::Protocol, err.to_string())),
        ServeOutcome::Redirect { location } => Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, location.clone())
            .header("X-Accel-Redirect", location)
            .body(Body::empty())
            .map_err(|err| DavError::new(nimbus_core::ErrorKind::Protocol, err.to_string())),
    }
}

async fn serve_delete(
    backend: &Arc<dyn DavBackend>,
    path: &DavPath,
) -> DavResult<Response<Body>> {
    if path.parent.as_deref() == Some(DELETE_ALL_BAD) {
        let ids = backend.bad_ids().await;
        let count = ids.len();
        for id in ids {
            if let Err(err) = backend.remove_by_id(&id).await {
                warn!(id, error = %err, "bulk bad-torrent delete failed");
            }
        }
        debug!(count, "bulk bad-torrent delete complete");
        return Ok(simple(StatusCode::NO_CONTENT, ""));
    }

    // A single root-level segment that is not a parent addresses a torrent
    // by backend id.
    if path.entity.is_none() {
        if let Some(candidate) = path.parent.as_deref() {
            if !backend.parents().iter().any(|parent| parent == candidate)
                && candidate != "version.txt"
            {
                backend.remove_by_id(candidate).await?;
                return Ok(simple(StatusCode::NO_CONTENT, ""));
            }
        }
    }

    backend.remove(path).await?;
    Ok(simple(StatusCode::NO_CONTENT, ""))
}

/// Browser delete buttons post a `_method=DELETE` override.
async fn serve_post(
    backend: &Arc<dyn DavBackend>,
    path: &DavPath,
    request: Request<Body>,
) -> DavResult<Response<Body>> {
    let body = axum::body::to_bytes(request.into_body(), 1_024)
        .await
        .unwrap_or_default();
    if body.as_ref() == b"_method=DELETE" {
        return serve_delete(backend, path).await;
    }
    Err(DavError::permission("filesystem is read-only"))
}

fn directory_href(raw_path: &str, is_dir: bool) -> String {
    if is_dir && !raw_path.ends_with('/') {
        format!("{raw_path}/")
    } else {
        raw_path.to_owned()
    }
}

fn error_response(err: &DavError) -> Response<Body> {
    simple(err.status(), err.kind.as_str())
}

fn simple(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body.to_owned()))
        .expect("static response")
}

fn html_response(body: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body.to_owned()))
        .expect("static response")
}

fn xml_response(body: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .body(Body::from(body.to_owned()))
        .expect("static response")
}
