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

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Auditing exec interception proxy for Kubernetes clusters.
#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Rexec {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the interception proxy server
    Server(ServerArgs),

    /// Copy files from a pod through the audited exec endpoint
    Cp(CpArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Bind address for the TLS listener
    #[arg(long, default_value = ":8443")]
    pub listen: String,

    /// Path to the serving certificate
    #[arg(long, default_value = "/etc/pki/rexec/tls.crt")]
    pub tls_cert: PathBuf,

    /// Path to the serving private key
    #[arg(long, default_value = "/etc/pki/rexec/tls.key")]
    pub tls_key: PathBuf,

    /// User allowed to exec without a session proof (repeatable)
    #[arg(long = "by-pass-user")]
    pub by_pass_user: Vec<String>,

    /// Shared session-proof secret; a random one is generated when absent
    #[arg(long = "secret-sauce")]
    pub secret_sauce: Option<String>,

    /// Emit trace-level audit output, including raw tapped traffic
    #[arg(long)]
    pub audit_trace: bool,

    /// Emit debug output on the sys facility
    #[arg(long)]
    pub debug: bool,

    /// Upper bound on buffered strokes per reconstructed input line
    #[arg(long, default_value_t = 2000)]
    pub max_strokes_per_line: usize,

    /// Upstream API server the proxy forwards to
    #[arg(long, default_value = "https://kubernetes.default.svc")]
    pub upstream: String,

    /// Seconds to wait for in-flight sessions on shutdown
    #[arg(long, default_value_t = 10)]
    pub grace_period_seconds: u64,
}

#[derive(Args, Debug, Clone)]
pub struct CpArgs {
    /// Source file spec, `[[namespace/]pod:]path`
    #[arg()]
    pub src: String,

    /// Local destination path
    #[arg()]
    pub dest: String,

    /// Container name; the pod default is used when omitted
    #[arg(short, long)]
    pub container: Option<String>,

    /// Namespace of the source pod (defaults to "default")
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Base URL of the rexec proxy (env: REXEC_SERVER)
    #[arg(long, env = "REXEC_SERVER")]
    pub server: Option<String>,

    /// Bearer token presented to the proxy (env: REXEC_TOKEN)
    #[arg(long, env = "REXEC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// CA bundle used to verify the proxy certificate
    #[arg(long, env = "REXEC_CA")]
    pub ca_cert: Option<PathBuf>,
}
