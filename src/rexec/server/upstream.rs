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

use std::error::Error;
use std::io;
use std::pin::Pin;

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderName, HeaderValue, AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL,
};
use url::Url;

use crate::rexec::auth::Identity;
use crate::rexec::config::ProxyConfig;
use crate::rexec::logger;
use crate::rexec::server::handlers::exec_common::ExecOptions;
use crate::rexec::util::error::{new_error, with_context};

pub type UpstreamWebSocket = tokio_tungstenite::WebSocketStream<SslStream<TcpStream>>;

pub const EXEC_PROTOCOL_HEADER_VALUE: &str = "v4.channel.k8s.io, channel.k8s.io";

pub const IMPERSONATE_USER_HEADER: &str = "impersonate-user";
pub const IMPERSONATE_GROUP_HEADER: &str = "impersonate-group";
pub const IMPERSONATE_EXTRA_PREFIX: &str = "impersonate-extra-";

/// Impersonation headers reconstructing the caller for the upstream, so its
/// audit log attributes the exec to the real user instead of the proxy.
pub fn impersonation_headers(identity: &Identity) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = Vec::with_capacity(1 + identity.groups.len());
    if let Ok(value) = HeaderValue::from_str(&identity.user) {
        headers.push((HeaderName::from_static(IMPERSONATE_USER_HEADER), value));
    }
    for group in &identity.groups {
        if let Ok(value) = HeaderValue::from_str(group) {
            headers.push((HeaderName::from_static(IMPERSONATE_GROUP_HEADER), value));
        }
    }
    for (key, values) in &identity.extras {
        let Ok(name) = HeaderName::from_bytes(format!("{}{}", IMPERSONATE_EXTRA_PREFIX, key).as_bytes())
        else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.push((name.clone(), value));
            }
        }
    }
    headers
}

/// The real exec resource on the upstream API server.
pub fn upstream_exec_url(
    base: &Url,
    options: &ExecOptions,
) -> Result<Url, Box<dyn Error + Send + Sync>> {
    let mut url = base.clone();
    url.set_path(&format!(
        "/api/v1/namespaces/{}/pods/{}/exec",
        options.namespace, options.pod
    ));
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        if let Some(ref container) = options.container {
            query.append_pair("container", container);
        }
        for part in &options.command {
            query.append_pair("command", part);
        }
        query.append_pair("stdin", bool_str(options.stdin));
        query.append_pair("stdout", bool_str(options.stdout));
        query.append_pair("stderr", bool_str(options.stderr));
        query.append_pair("tty", bool_str(options.tty));
    }
    url.set_scheme("wss")
        .map_err(|_| new_error("failed to convert upstream URL to wss scheme"))?;
    Ok(url)
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Opens the upstream half of an exec session: TCP, CA-pinned TLS, then a
/// `channel.k8s.io` WebSocket upgrade authenticated as the proxy with the
/// caller impersonated.
pub async fn open_exec_stream(
    config: &ProxyConfig,
    identity: &Identity,
    options: &ExecOptions,
) -> Result<UpstreamWebSocket, Box<dyn Error + Send + Sync>> {
    let url = upstream_exec_url(&config.upstream, options)?;
    let host = url
        .host_str()
        .ok_or_else(|| new_error("upstream URL is missing a host"))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| new_error("upstream URL is missing a port"))?;

    let mut address = host.clone();
    if address.contains(':') && !address.starts_with('[') {
        address = format!("[{}]", address);
    }
    address.push(':');
    address.push_str(&port.to_string());

    let tcp_stream = TcpStream::connect(&address).await.map_err(|err| {
        with_context(
            io::Error::new(err.kind(), err.to_string()),
            format!("failed to connect to upstream exec endpoint {}", address),
        )
    })?;

    let connector = build_upstream_ssl_connector(&config.ca_bundle)?;
    let ssl = connector
        .configure()
        .map_err(|e| with_context(e, "failed to configure upstream TLS"))?
        .into_ssl(&host)
        .map_err(|e| with_context(e, "failed to prepare upstream TLS session"))?;
    let mut tls_stream = SslStream::new(ssl, tcp_stream)
        .map_err(|e| with_context(e, "failed to bind upstream TLS stream"))?;
    Pin::new(&mut tls_stream)
        .connect()
        .await
        .map_err(|e| with_context(e, "upstream TLS handshake failed"))?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| with_context(e, "failed to build upstream upgrade request"))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(EXEC_PROTOCOL_HEADER_VALUE),
    );
    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
        .map_err(|e| with_context(e, "proxy token is not a valid header value"))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    for (name, value) in impersonation_headers(identity) {
        request.headers_mut().append(name, value);
    }

    let (stream, response) = client_async(request, tls_stream)
        .await
        .map_err(|e| with_context(e, "upstream exec upgrade failed"))?;

    if let Some(protocol) = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
    {
        logger::sys_debug(
            "upstream exec stream established",
            &[("protocol", protocol), ("host", host.as_str())],
        );
    }

    Ok(stream)
}

fn build_upstream_ssl_connector(
    ca_bundle: &[u8],
) -> Result<SslConnector, Box<dyn Error + Send + Sync>> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| with_context(e, "failed to initialize upstream TLS connector"))?;
    let ca_chain = X509::stack_from_pem(ca_bundle)
        .map_err(|e| with_context(e, "cluster CA bundle is not valid PEM"))?;
    let store = builder.cert_store_mut();
    for cert in ca_chain {
        store
            .add_cert(cert)
            .map_err(|e| with_context(e, "failed to add cluster CA to upstream store"))?;
    }
    builder.set_verify(SslVerifyMode::PEER);
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ExecOptions {
        ExecOptions {
            namespace: "default".to_string(),
            pod: "kafka-0".to_string(),
            container: Some("broker".to_string()),
            command: vec!["ls".to_string(), "/".to_string()],
            stdin: true,
            stdout: true,
            stderr: false,
            tty: true,
        }
    }

    #[test]
    fn exec_url_targets_the_real_resource() {
        let base = Url::parse("https://kubernetes.default.svc").unwrap();
        let url = upstream_exec_url(&base, &options()).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/api/v1/namespaces/default/pods/kafka-0/exec");
        let query = url.query().unwrap();
        assert!(query.contains("container=broker"));
        assert!(query.contains("command=ls"));
        assert!(query.contains("command=%2F"));
        assert!(query.contains("tty=true"));
        assert!(query.contains("stderr=false"));
    }

    #[test]
    fn impersonation_covers_user_groups_and_extras() {
        let mut identity = Identity::new("alice");
        identity.groups = vec!["dev".to_string(), "ops".to_string()];
        identity
            .extras
            .insert("secret-sauce".to_string(), vec!["proof".to_string()]);

        let headers = impersonation_headers(&identity);
        let rendered: Vec<(String, String)> = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert!(rendered.contains(&("impersonate-user".to_string(), "alice".to_string())));
        assert!(rendered.contains(&("impersonate-group".to_string(), "dev".to_string())));
        assert!(rendered.contains(&("impersonate-group".to_string(), "ops".to_string())));
        assert!(rendered.contains(&(
            "impersonate-extra-secret-sauce".to_string(),
            "proof".to_string()
        )));
    }
}
