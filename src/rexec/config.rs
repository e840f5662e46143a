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

use std::collections::HashSet;
use std::env;
use std::error::Error;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;
use uuid::Uuid;

use crate::rexec::cli::args::ServerArgs;
use crate::rexec::logger;
use crate::rexec::util::error::{new_error, with_context};

const SERVICEACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const SERVICEACCOUNT_DIR_ENV: &str = "REXEC_SERVICEACCOUNT_DIR";

/// Immutable process-wide configuration, built once by [`ProxyConfig::load`]
/// and shared behind an `Arc`. Everything here is read-only after startup.
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    pub upstream: Url,
    pub bypass_users: HashSet<String>,
    pub secret_sauce: String,
    pub max_strokes_per_line: usize,
    pub grace_period: Duration,
    pub upstream_timeout: Duration,
    pub audit_trace: bool,
    /// Cluster CA bundle, PEM. Pins upstream TLS and verifies webhook
    /// client certificates.
    pub ca_bundle: Vec<u8>,
    /// Bearer token of the proxy's own service identity.
    pub token: String,
    /// CA-pinned client used by the transparent passthrough path.
    pub client: reqwest::Client,
}

impl ProxyConfig {
    pub fn load(args: &ServerArgs) -> Result<ProxyConfig, Box<dyn Error + Send + Sync>> {
        logger::init(args.audit_trace, args.debug);

        let listen = parse_listen_addr(&args.listen)
            .map_err(|e| with_context(e, format!("invalid listen address {:?}", args.listen)))?;

        let upstream = Url::parse(&args.upstream)
            .map_err(|e| with_context(e, format!("invalid upstream URL {:?}", args.upstream)))?;
        if upstream.scheme() != "https" {
            return Err(new_error(format!(
                "upstream must use https, got {:?}",
                args.upstream
            )));
        }

        let sa_dir = env::var(SERVICEACCOUNT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(SERVICEACCOUNT_DIR));
        let ca_bundle = read_credential(&sa_dir.join("ca.crt"), "cluster CA bundle")?;
        let token_raw = read_credential(&sa_dir.join("token"), "service account token")?;
        let token = String::from_utf8(token_raw)
            .map_err(|e| with_context(e, "service account token is not valid UTF-8"))?
            .trim()
            .to_string();
        if token.is_empty() {
            return Err(new_error("service account token is empty"));
        }

        let secret_sauce = resolve_secret(args.secret_sauce.as_deref())?;

        let client = build_upstream_client(&ca_bundle)?;

        Ok(ProxyConfig {
            listen,
            tls_cert: args.tls_cert.clone(),
            tls_key: args.tls_key.clone(),
            upstream,
            bypass_users: args.by_pass_user.iter().cloned().collect(),
            secret_sauce,
            max_strokes_per_line: if args.max_strokes_per_line == 0 {
                2000
            } else {
                args.max_strokes_per_line
            },
            grace_period: Duration::from_secs(args.grace_period_seconds),
            upstream_timeout: Duration::from_secs(30),
            audit_trace: args.audit_trace,
            ca_bundle,
            token,
            client,
        })
    }
}

fn read_credential(path: &Path, what: &str) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    fs::read(path).map_err(|e| with_context(e, format!("failed to read {} at {}", what, path.display())))
}

/// The secret must be a well-formed UUID. When unset, a fresh one is
/// generated and logged to the sys facility only, so operators can recover
/// it from the system log without it ever reaching callers.
fn resolve_secret(configured: Option<&str>) -> Result<String, Box<dyn Error + Send + Sync>> {
    match configured {
        Some(value) => {
            Uuid::parse_str(value)
                .map_err(|e| with_context(e, "secret-sauce must be a well-formed UUID"))?;
            Ok(value.to_string())
        }
        None => {
            let generated = Uuid::new_v4().to_string();
            logger::sys_info(
                "no session-proof secret configured; generated one",
                &[("secret", generated.as_str())],
            );
            Ok(generated)
        }
    }
}

fn build_upstream_client(ca_bundle: &[u8]) -> Result<reqwest::Client, Box<dyn Error + Send + Sync>> {
    let mut builder = reqwest::Client::builder()
        .use_native_tls()
        .tls_built_in_root_certs(false)
        .connect_timeout(Duration::from_secs(30));
    for certificate in reqwest::Certificate::from_pem_bundle(ca_bundle)
        .map_err(|e| with_context(e, "cluster CA bundle is not valid PEM"))?
    {
        builder = builder.add_root_certificate(certificate);
    }
    builder
        .build()
        .map_err(|e| with_context(e, "failed to build upstream HTTP client"))
}

/// Accepts `:8443` style bind addresses alongside full socket addresses.
fn parse_listen_addr(value: &str) -> Result<SocketAddr, Box<dyn Error + Send + Sync>> {
    let candidate = if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value.to_string()
    };
    candidate
        .parse::<SocketAddr>()
        .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
}
