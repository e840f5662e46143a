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
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HyperAcceptor;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub mod handlers;
mod tls;
pub mod upstream;

use crate::rexec::audit::{self, AuditSink, AUDIT_QUEUE_DEPTH};
use crate::rexec::config::ProxyConfig;
use crate::rexec::logger;
use crate::rexec::session::SessionRegistry;
use crate::rexec::util::error::with_context;
use tls::{accept_with_tls, build_tls_acceptor};

/// Shared per-server state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub audit: AuditSink,
    pub sessions: Arc<SessionRegistry>,
    pub shutdown: CancellationToken,
}

/// Runs the proxy until SIGINT/SIGTERM: accept loop, grace period for
/// in-flight sessions, audit drain. Returns once the sink is drained.
pub async fn serve(config: Arc<ProxyConfig>) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (audit_sink, audit_task) = audit::spawn_sink(AUDIT_QUEUE_DEPTH);
    let shutdown = CancellationToken::new();
    let state = AppState {
        config: Arc::clone(&config),
        audit: audit_sink,
        sessions: Arc::new(SessionRegistry::new()),
        shutdown: shutdown.clone(),
    };
    let app = build_router(state.clone());

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| with_context(e, format!("failed to bind listener at {}", config.listen)))?;
    let tls_acceptor = Arc::new(
        build_tls_acceptor(&config)
            .map_err(|e| with_context(e, format!("failed to prepare TLS acceptor for {}", config.listen)))?,
    );

    let (stop_tx, mut stop_rx) = watch::channel(());
    tokio::spawn(shutdown_signal(stop_tx));

    let listen_text = config.listen.to_string();
    logger::sys_info("proxy listening", &[("addr", listen_text.as_str())]);

    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok(connection) => connection,
                    Err(err) => {
                        let error_text = err.to_string();
                        logger::sys_warn(
                            "failed to accept connection",
                            &[("error", error_text.as_str())],
                        );
                        continue;
                    }
                }
            }
            _ = stop_rx.changed() => {
                logger::sys_info("stopping accept loop", &[]);
                break;
            }
        };

        let service = app.clone();
        let tls_acceptor = Arc::clone(&tls_acceptor);
        tokio::spawn(async move {
            let remote_text = remote_addr.to_string();
            match accept_with_tls(tls_acceptor.as_ref(), stream).await {
                Ok(tls_stream) => {
                    let io = TokioIo::new(tls_stream);
                    let service = TowerToHyperService::new(service);
                    if let Err(err) = HyperAcceptor::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(io, service)
                        .await
                    {
                        let should_log = err
                            .downcast_ref::<hyper::Error>()
                            .map(|hyper_err| {
                                !(hyper_err.is_closed() || hyper_err.is_incomplete_message())
                            })
                            .unwrap_or(true);
                        if should_log {
                            let error_text = err.to_string();
                            logger::sys_warn(
                                "HTTP serving error",
                                &[
                                    ("remote_addr", remote_text.as_str()),
                                    ("error", error_text.as_str()),
                                ],
                            );
                        }
                    }
                }
                Err(err) => {
                    let error_text = err.to_string();
                    logger::sys_warn(
                        "TLS handshake failed",
                        &[
                            ("remote_addr", remote_text.as_str()),
                            ("error", error_text.as_str()),
                        ],
                    );
                }
            }
        });
    }

    drop(listener);
    let active = state.sessions.active_sessions();
    if active > 0 {
        let active_text = active.to_string();
        let grace_text = config.grace_period.as_secs().to_string();
        logger::sys_info(
            "waiting for in-flight sessions",
            &[
                ("sessions", active_text.as_str()),
                ("grace_seconds", grace_text.as_str()),
            ],
        );
        for session in state.sessions.open_sessions() {
            let user = state.sessions.user_for(&session).unwrap_or_default();
            let pending = state
                .sessions
                .residue_for(&session)
                .map(|fragment| fragment.len())
                .unwrap_or(0);
            let pending_text = pending.to_string();
            logger::sys_info(
                "session still in flight",
                &[
                    ("session", session.as_str()),
                    ("user", user.as_str()),
                    ("pending_input_bytes", pending_text.as_str()),
                ],
            );
        }
        tokio::time::sleep(config.grace_period).await;
    }
    shutdown.cancel();

    let dropped = state.audit.dropped();
    if dropped > 0 {
        let dropped_text = dropped.to_string();
        logger::sys_warn(
            "audit records were dropped this run",
            &[("dropped_total", dropped_text.as_str())],
        );
    }

    // Releasing our producer handles lets the consumer drain and exit.
    drop(state);
    drop(app);
    let _ = tokio::time::timeout(Duration::from_secs(5), audit_task).await;

    logger::sys_info("shutdown complete", &[]);
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/apis", get(handlers::discovery::api_groups))
        .route(
            "/apis/audit.rexec.io/v1beta1",
            get(handlers::discovery::audit_api_resources),
        )
        .route(
            "/apis/audit.rexec.io/v1beta1/namespaces/{namespace}/pods/{pod}/exec",
            get(handlers::exec::exec_ws).post(handlers::exec::exec_post),
        )
        .route("/admission", post(handlers::admission::review))
        .fallback(handlers::passthrough::forward)
        .with_state(state)
}

async fn shutdown_signal(stop_tx: watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(err) => {
            let error_text = err.to_string();
            logger::sys_error(
                "failed to install SIGTERM handler",
                &[("error", error_text.as_str())],
            );
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c => logger::sys_info("received SIGINT; shutting down", &[]),
        _ = sigterm.recv() => logger::sys_info("received SIGTERM; shutting down", &[]),
    }
    let _ = stop_tx.send(());
}

/// Readiness probe helper: a TCP dial to the listen address must succeed
/// within the retry window once `serve` has bound.
pub async fn wait_until_ready(
    addr: SocketAddr,
    window: Duration,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let deadline = Instant::now() + window;
    loop {
        match TcpStream::connect(addr).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                if Instant::now() >= deadline {
                    return Err(with_context(
                        err,
                        format!("listener at {} not ready within {:?}", addr, window),
                    ));
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
