/*
 * Copyright (C) 2024 The Rexec Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::{HeaderMap, HeaderName, Request, Response};
use axum::response::IntoResponse;

use crate::rexec::auth::{Identity, EXTRA_HEADER_PREFIX, GROUP_HEADER, USER_HEADER};
use crate::rexec::logger;
use crate::rexec::server::upstream::impersonation_headers;
use crate::rexec::server::AppState;

use super::error::ApiError;

/// Hop-by-hop headers, stripped explicitly in both directions.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards any non-intercepted request to the upstream API server: same
/// method, path, query, and body, with the caller's authentication replaced
/// by the proxy's bearer token and the caller re-expressed through
/// impersonation headers.
pub async fn forward(State(state): State<AppState>, req: Request<Body>) -> Response<Body> {
    let Some(identity) = Identity::from_headers(req.headers()) else {
        return ApiError::no_user().into_response();
    };

    let (parts, body) = req.into_parts();

    let mut url = state.config.upstream.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());

    let mut headers = HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if should_strip(&parts.headers, name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    for (name, value) in impersonation_headers(&identity) {
        headers.append(name, value);
    }

    let path_text = parts.uri.path().to_string();
    let request = state
        .config
        .client
        .request(parts.method.clone(), url)
        .headers(headers)
        .bearer_auth(&state.config.token)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let upstream_response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            let error_text = err.to_string();
            logger::sys_error(
                "upstream request failed",
                &[("path", path_text.as_str()), ("error", error_text.as_str())],
            );
            return ApiError::bad_gateway(format!("upstream request failed: {}", error_text))
                .into_response();
        }
    };

    let status = upstream_response.status();
    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream_response.headers().iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            response_headers.append(name.clone(), value.clone());
        }
    }

    match builder.body(Body::from_stream(upstream_response.bytes_stream())) {
        Ok(response) => response,
        Err(err) => {
            let error_text = err.to_string();
            logger::sys_error(
                "failed to assemble upstream response",
                &[("path", path_text.as_str()), ("error", error_text.as_str())],
            );
            ApiError::internal().into_response()
        }
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// A header is dropped when it is hop-by-hop (including those the inbound
/// `Connection` header names), caller authentication, or one of the trusted
/// identity headers the proxy re-expresses through impersonation.
fn should_strip(headers: &HeaderMap, name: &HeaderName) -> bool {
    let name_str = name.as_str();
    if is_hop_by_hop(name) || name == AUTHORIZATION || name == HOST {
        return true;
    }
    if name_str == USER_HEADER
        || name_str == GROUP_HEADER
        || name_str.starts_with(EXTRA_HEADER_PREFIX)
    {
        return true;
    }
    if let Some(connection) = headers.get("connection").and_then(|value| value.to_str().ok()) {
        if connection
            .split(',')
            .map(|token| token.trim())
            .any(|token| token.eq_ignore_ascii_case(name_str))
        {
            return true;
        }
    }
    false
}
