//! Pass-through for every request that is not a WebSocket upgrade.

use hyper::header::{HeaderName, HeaderValue};
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode, Uri};
use thiserror::Error;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

const CORS_HEADERS: &[(&str, &str)] = &[
    ("access-control-allow-origin", "*"),
    (
        "access-control-allow-methods",
        "GET, POST, PUT, PATCH, DELETE, OPTIONS",
    ),
    ("access-control-allow-headers", "*"),
];

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("proxy target must be an http(s) origin, got {0}")]
    InvalidTarget(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct ReverseProxy {
    client: reqwest::Client,
    target: String,
    strip_prefix: Option<String>,
}

impl ReverseProxy {
    pub fn new(target: &str, strip_prefix: Option<String>) -> Result<Self, ProxyError> {
        let target = target.trim_end_matches('/');
        if !(target.starts_with("http://") || target.starts_with("https://")) {
            return Err(ProxyError::InvalidTarget(target.to_string()));
        }
        let strip_prefix = strip_prefix
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            target: target.to_string(),
            strip_prefix,
        })
    }

    /// Upstream URL for a request URI, with the configured prefix removed.
    pub fn target_url(&self, uri: &Uri) -> String {
        let mut path = uri.path();
        if let Some(prefix) = &self.strip_prefix {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    path = rest;
                }
            }
        }
        let path = if path.is_empty() { "/" } else { path };
        match uri.query() {
            Some(query) => format!("{}{path}?{query}", self.target),
            None => format!("{}{path}", self.target),
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        if req.method() == Method::OPTIONS {
            return preflight();
        }

        let url = self.target_url(req.uri());
        let Ok(method) = reqwest::Method::from_bytes(req.method().as_str().as_bytes()) else {
            return json_error(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method");
        };
        let headers = forward_headers(req.headers());
        let body = match hyper::body::to_bytes(req.into_body()).await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Failed to read request body for {url}: {e}");
                return json_error(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        };

        log::debug!("Proxying {method} {url}");
        let upstream = match self
            .client
            .request(method, &url)
            .headers(headers)
            .body(body.to_vec())
            .send()
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                log::warn!("Upstream request to {url} failed: {e}");
                return json_error(StatusCode::BAD_GATEWAY, "Upstream request failed");
            }
        };

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response_headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            copy_header(&mut response_headers, name.as_str(), value.as_bytes());
        }
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Failed to read upstream body from {url}: {e}");
                return json_error(StatusCode::BAD_GATEWAY, "Upstream request failed");
            }
        };

        let mut response = Response::new(Body::from(body.to_vec()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        with_cors(response)
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Copies one upstream header, skipping hop-by-hop and CORS headers.
fn copy_header(into: &mut HeaderMap, name: &str, value: &[u8]) {
    if is_hop_by_hop(name) || name.to_ascii_lowercase().starts_with("access-control-") {
        return;
    }
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_bytes(value),
    ) {
        into.append(name, value);
    }
}

fn forward_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut forwarded = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            forwarded.append(name, value);
        }
    }
    forwarded
}

fn with_cors(mut response: Response<Body>) -> Response<Body> {
    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        headers.insert(*name, HeaderValue::from_static(*value));
    }
    response
}

fn preflight() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    with_cors(response)
}

/// JSON `{"error": ...}` response with CORS headers.
pub fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(
        serde_json::json!({ "error": message }).to_string(),
    ));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    with_cors(response)
}
