//! Catch-all forwarding handler.
//!
//! Every request goes upstream over HTTP/1.1 with bodies streamed both ways.
//! `Upgrade` requests are tunnelled once the upstream answers `101`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Version};
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub(crate) struct Forwarder {
    client: reqwest::Client,
    /// Upstream base without trailing slash.
    base: String,
}

impl Forwarder {
    pub(crate) fn new(target: &str) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(target)?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Unsupported upstream scheme '{}'", url.scheme());
        }

        let client = reqwest::Client::builder()
            .http1_only()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn base(&self) -> &str {
        &self.base
    }

    fn upstream_url(&self, request: &Request) -> String {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.base, path)
    }
}

pub(crate) async fn forward(State(forwarder): State<Arc<Forwarder>>, mut request: Request) -> Response {
    let url = forwarder.upstream_url(&request);
    let upgrade = request.headers().get(header::UPGRADE).cloned();
    let client_upgrade = upgrade.as_ref().map(|_| hyper::upgrade::on(&mut request));

    let (parts, body) = request.into_parts();
    let mut headers = strip_hop_by_hop(&parts.headers);
    headers.remove(header::HOST);

    let has_body = parts.headers.contains_key(header::TRANSFER_ENCODING)
        || parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() != "0");

    if let Some(protocol) = &upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        headers.insert(header::UPGRADE, protocol.clone());
    }

    let mut upstream = forwarder
        .client
        .request(parts.method, &url)
        .version(Version::HTTP_11)
        .headers(headers);
    if has_body && upgrade.is_none() {
        upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, "Upstream request failed: {}", e);
            return (StatusCode::BAD_GATEWAY, format!("Upstream unavailable: {}", e)).into_response();
        }
    };

    let status = response.status();
    let mut response_headers = strip_hop_by_hop(response.headers());

    if status == StatusCode::SWITCHING_PROTOCOLS {
        let Some(client_upgrade) = client_upgrade else {
            warn!(url = %url, "Upstream switched protocols without an upgrade request");
            return StatusCode::BAD_GATEWAY.into_response();
        };

        if let Some(protocol) = response.headers().get(header::UPGRADE) {
            response_headers.insert(header::UPGRADE, protocol.clone());
        }
        response_headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));

        tokio::spawn(async move {
            let mut upstream_io = match response.upgrade().await {
                Ok(io) => io,
                Err(e) => {
                    warn!("Upstream upgrade failed: {}", e);
                    return;
                }
            };
            let mut client_io = match client_upgrade.await {
                Ok(io) => TokioIo::new(io),
                Err(e) => {
                    warn!("Client upgrade failed: {}", e);
                    return;
                }
            };
            match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
                Ok((sent, received)) => debug!(sent, received, "Upgraded connection closed"),
                Err(e) => debug!("Upgraded connection ended: {}", e),
            }
        });

        return build_response(status, response_headers, Body::empty());
    }

    build_response(status, response_headers, Body::from_stream(response.bytes_stream()))
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Copy `headers` minus hop-by-hop headers and any listed in `Connection`.
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name) || listed.iter().any(|l| l == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
