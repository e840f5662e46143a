use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use axum::http::{HeaderMap, Request, Response, StatusCode};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_util::sync::CancellationToken;

use crate::rexec::audit::AuditRecord;
use crate::rexec::auth::{self, Identity};
use crate::rexec::extract::{Extraction, LineBuffer};
use crate::rexec::logger::{self, Facility, LogLevel};
use crate::rexec::server::upstream::{self, UpstreamWebSocket};
use crate::rexec::server::AppState;
use crate::rexec::session::allocate_session_id;

use super::error::{ApiError, NO_USER_BODY};
use super::exec_common::{
    parse_resize_payload, validate_query, RawExecQuery, CHANNEL_ERROR, CHANNEL_RESIZE,
    CHANNEL_STDIN, CHANNEL_STDOUT,
};

const SUPPORTED_SUBPROTOCOLS: &[&str] = &["v4.channel.k8s.io", "channel.k8s.io"];

pub(crate) async fn exec_ws(
    State(state): State<AppState>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(mut raw): Query<RawExecQuery>,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError> {
    raw.namespace = namespace;
    raw.pod = pod;
    exec_impl(state, raw, req).await
}

/// SPDY-era clients POST the exec resource before upgrading; the WebSocket
/// handshake itself is method-agnostic once the upgrade headers are there.
pub(crate) async fn exec_post(
    State(state): State<AppState>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(mut raw): Query<RawExecQuery>,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError> {
    raw.namespace = namespace;
    raw.pod = pod;
    exec_impl(state, raw, req).await
}

/// Authorization runs strictly before the protocol upgrade: an unauthorized
/// caller is turned away with a plain HTTP status and never reaches the
/// streaming path.
async fn exec_impl(
    state: AppState,
    mut raw: RawExecQuery,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError> {
    if raw.namespace.trim().is_empty() {
        raw.namespace = "default".to_string();
    }
    let command_preview = raw.command.join(" ");
    let (mut parts, _) = req.into_parts();
    let headers = parts.headers.clone();

    let Some(identity) = Identity::from_headers(&headers) else {
        state
            .audit
            .submit(AuditRecord::denied("", command_preview, NO_USER_BODY));
        return Err(ApiError::no_user());
    };

    let verdict = auth::authorize(&identity, &state.config.bypass_users, &state.config.secret_sauce);
    if !verdict.allowed() {
        let reason = auth::deny_reason(&identity);
        state.audit.submit(AuditRecord::denied(
            identity.user.clone(),
            command_preview,
            reason.clone(),
        ));
        return Err(ApiError::forbidden(reason));
    }

    let options = validate_query(raw)?;
    let protocol = select_subprotocol(&headers)?;

    parts.method = axum::http::Method::GET;
    let ws = WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .map_err(|rejection| {
            ApiError::new(
                StatusCode::UPGRADE_REQUIRED,
                format!("exec requires a WebSocket upgrade: {}", rejection),
            )
        })?;

    let session_id = allocate_session_id(options.interactive());
    state.sessions.begin(&session_id, &identity.user);
    logger::sys_info(
        "exec session authorized",
        &[
            ("user", identity.user.as_str()),
            ("session", session_id.as_str()),
            ("verdict", verdict.as_str()),
            ("namespace", options.namespace.as_str()),
            ("pod", options.pod.as_str()),
            ("tty", if options.tty { "true" } else { "false" }),
        ],
    );
    // The argv itself is the first audit record of the session; line records
    // follow in stream order.
    state.audit.submit(AuditRecord::line(
        identity.user.clone(),
        session_id.clone(),
        options.command_line(),
    ));

    let session_state = state.clone();
    let mut response = ws.protocols([protocol]).on_upgrade(move |socket| {
        run_session(session_state, socket, options, identity, session_id)
    });
    if let Ok(value) = HeaderValue::from_str(protocol) {
        response
            .headers_mut()
            .insert("X-Stream-Protocol-Version", value);
    }
    Ok(response)
}

fn select_subprotocol(headers: &HeaderMap) -> Result<&'static str, ApiError> {
    let offered = headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request(
                "client must include Sec-WebSocket-Protocol with a supported channel.k8s.io protocol",
            )
        })?;

    let tokens: Vec<&str> = offered
        .split(',')
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .collect();
    for candidate in SUPPORTED_SUBPROTOCOLS {
        if tokens.iter().any(|token| token.eq_ignore_ascii_case(candidate)) {
            return Ok(candidate);
        }
    }

    Err(ApiError::bad_request(format!(
        "none of the requested Sec-WebSocket-Protocol values are supported: {}",
        offered
    )))
}

async fn run_session(
    state: AppState,
    mut client: WebSocket,
    options: super::exec_common::ExecOptions,
    identity: Identity,
    session_id: String,
) {
    let dial = tokio::time::timeout(
        state.config.upstream_timeout,
        upstream::open_exec_stream(&state.config, &identity, &options),
    )
    .await;

    let upstream_ws = match dial {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            fail_before_splice(&state, &mut client, &identity, &session_id, &options, &err.to_string())
                .await;
            return;
        }
        Err(_) => {
            fail_before_splice(
                &state,
                &mut client,
                &identity,
                &session_id,
                &options,
                "upstream exec dial timed out",
            )
            .await;
            return;
        }
    };

    splice_streams(&state, client, upstream_ws, &options, &identity, &session_id).await;

    state.sessions.end(&session_id);
    logger::sys_info(
        "exec session finished",
        &[
            ("user", identity.user.as_str()),
            ("session", session_id.as_str()),
        ],
    );
}

async fn fail_before_splice(
    state: &AppState,
    client: &mut WebSocket,
    identity: &Identity,
    session_id: &str,
    options: &super::exec_common::ExecOptions,
    error: &str,
) {
    logger::sys_error(
        "failed to open upstream exec stream",
        &[
            ("user", identity.user.as_str()),
            ("session", session_id),
            ("namespace", options.namespace.as_str()),
            ("pod", options.pod.as_str()),
            ("error", error),
        ],
    );
    state.audit.submit(AuditRecord::failed(
        identity.user.clone(),
        session_id.to_string(),
        options.command_line(),
        error,
    ));
    let _ = client
        .send(Message::Binary(build_error_frame(error)))
        .await;
    let _ = client.send(Message::Close(None)).await;
    state.sessions.end(session_id);
}

/// Splices the caller and upstream stream sets until either side closes,
/// the upstream reports a terminal status, an I/O error occurs, or the
/// session is cancelled. One copy task runs per direction (the frames of
/// every pipe flowing that way share one socket) and each tapped stream
/// feeds its own extractor task; all of them are joined before the session
/// returns. Stdin is always tapped; stdout only without a tty, where the
/// stream carries no keystroke echo.
async fn splice_streams(
    state: &AppState,
    client: WebSocket,
    upstream_ws: UpstreamWebSocket,
    options: &super::exec_common::ExecOptions,
    identity: &Identity,
    session_id: &str,
) {
    let session_cancel = state.shutdown.child_token();
    let (client_tx, client_rx) = client.split();
    let (up_tx, up_rx) = upstream_ws.split();

    let (stdin_tap, stdin_chunks) = mpsc::unbounded_channel::<Bytes>();
    let stdin_extractor = tokio::spawn(run_extractor(
        state.clone(),
        identity.user.clone(),
        session_id.to_string(),
        "stdin",
        true,
        stdin_chunks,
    ));

    let (stdout_tap, stdout_extractor) = if options.tty {
        (None, None)
    } else {
        let (tap, chunks) = mpsc::unbounded_channel::<Bytes>();
        let task = tokio::spawn(run_extractor(
            state.clone(),
            identity.user.clone(),
            session_id.to_string(),
            "stdout",
            false,
            chunks,
        ));
        (Some(tap), Some(task))
    };

    let caller_to_upstream = tokio::spawn(copy_caller_to_upstream(
        identity.user.clone(),
        session_id.to_string(),
        session_cancel.clone(),
        client_rx,
        up_tx,
        stdin_tap,
    ));
    let upstream_to_caller = tokio::spawn(copy_upstream_to_caller(
        identity.user.clone(),
        session_id.to_string(),
        session_cancel.clone(),
        up_rx,
        client_tx,
        stdout_tap,
    ));

    let _ = caller_to_upstream.await;
    let _ = upstream_to_caller.await;
    // The copy tasks dropped their tap senders, so the extractors drain
    // their channels, flush any residue, and return.
    let _ = stdin_extractor.await;
    if let Some(task) = stdout_extractor {
        let _ = task.await;
    }
}

/// The caller → upstream half: stdin and resize frames. Stdin payloads are
/// mirrored to the extractor before forwarding; resize frames pass through
/// verbatim and are parsed only for the session diagnostics.
async fn copy_caller_to_upstream(
    user: String,
    session_id: String,
    cancel: CancellationToken,
    mut client_rx: SplitStream<WebSocket>,
    mut up_tx: SplitSink<UpstreamWebSocket, UpstreamMessage>,
    stdin_tap: mpsc::UnboundedSender<Bytes>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                logger::sys_debug(
                    "caller stream unwound by cancellation",
                    &[("user", user.as_str()), ("session", session_id.as_str())],
                );
                let _ = up_tx.send(UpstreamMessage::Close(None)).await;
                break;
            }
            incoming = client_rx.next() => {
                match incoming {
                    Some(Ok(Message::Binary(frame))) => {
                        if frame.is_empty() {
                            continue;
                        }
                        if frame[0] == CHANNEL_STDIN {
                            let _ = stdin_tap.send(frame.slice(1..));
                        } else if frame[0] == CHANNEL_RESIZE {
                            if let Ok(event) = parse_resize_payload(&frame[1..]) {
                                let width = event.width.to_string();
                                let height = event.height.to_string();
                                logger::sys_debug(
                                    "terminal resized",
                                    &[
                                        ("session", session_id.as_str()),
                                        ("width", width.as_str()),
                                        ("height", height.as_str()),
                                    ],
                                );
                            }
                        }
                        if up_tx.send(UpstreamMessage::Binary(frame)).await.is_err() {
                            logger::sys_warn(
                                "failed to forward frame upstream",
                                &[("user", user.as_str()), ("session", session_id.as_str())],
                            );
                            cancel.cancel();
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = up_tx.send(UpstreamMessage::Close(None)).await;
                        cancel.cancel();
                        break;
                    }
                    // Pings are answered by the transport layer.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let error_text = err.to_string();
                        logger::sys_warn(
                            "error reading caller frame",
                            &[
                                ("user", user.as_str()),
                                ("session", session_id.as_str()),
                                ("error", error_text.as_str()),
                            ],
                        );
                        let _ = up_tx.send(UpstreamMessage::Close(None)).await;
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
}

/// The upstream → caller half: stdout, stderr, and the error stream. A
/// non-empty error-stream payload is the terminal status and closes the
/// session.
async fn copy_upstream_to_caller(
    user: String,
    session_id: String,
    cancel: CancellationToken,
    mut up_rx: SplitStream<UpstreamWebSocket>,
    mut client_tx: SplitSink<WebSocket, Message>,
    stdout_tap: Option<mpsc::UnboundedSender<Bytes>>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                logger::sys_debug(
                    "upstream stream unwound by cancellation",
                    &[("user", user.as_str()), ("session", session_id.as_str())],
                );
                let _ = client_tx.send(Message::Close(None)).await;
                break;
            }
            incoming = up_rx.next() => {
                match incoming {
                    Some(Ok(UpstreamMessage::Binary(frame))) => {
                        if frame.is_empty() {
                            continue;
                        }
                        let channel = frame[0];
                        if channel == CHANNEL_STDOUT {
                            if let Some(tap) = stdout_tap.as_ref() {
                                let _ = tap.send(frame.slice(1..));
                            }
                        }
                        let terminal = channel == CHANNEL_ERROR && frame.len() > 1;
                        if client_tx.send(Message::Binary(frame)).await.is_err() {
                            logger::sys_warn(
                                "failed to forward frame to caller",
                                &[("user", user.as_str()), ("session", session_id.as_str())],
                            );
                            cancel.cancel();
                            break;
                        }
                        if terminal {
                            let _ = client_tx.send(Message::Close(None)).await;
                            cancel.cancel();
                            break;
                        }
                    }
                    Some(Ok(UpstreamMessage::Close(_))) | None => {
                        let _ = client_tx.send(Message::Close(None)).await;
                        cancel.cancel();
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let error_text = err.to_string();
                        logger::sys_warn(
                            "error reading upstream frame",
                            &[
                                ("user", user.as_str()),
                                ("session", session_id.as_str()),
                                ("error", error_text.as_str()),
                            ],
                        );
                        let _ = client_tx.send(Message::Close(None)).await;
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
}

/// One extractor task per tapped stream: consumes raw payload chunks in
/// pipe order, emits an audit record per completed line, and flushes any
/// unterminated residue once the copy task drops the channel.
async fn run_extractor(
    state: AppState,
    user: String,
    session_id: String,
    stream_name: &'static str,
    track_residue: bool,
    mut chunks: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut buffer = LineBuffer::new(state.config.max_strokes_per_line);
    while let Some(chunk) = chunks.recv().await {
        trace_tap(&state, &session_id, stream_name, &chunk);
        let lines = buffer.feed(&chunk);
        if track_residue {
            state.sessions.record_residue(&session_id, buffer.residue());
        }
        submit_lines(&state, &user, &session_id, lines);
    }
    if let Some(residue) = buffer.flush() {
        submit_lines(&state, &user, &session_id, vec![residue]);
    }
}

fn submit_lines(state: &AppState, user: &str, session_id: &str, lines: Vec<Extraction>) {
    for extraction in lines {
        let mut record = AuditRecord::line(user, session_id, extraction.line);
        if extraction.truncated {
            record = record.truncated();
        }
        state.audit.submit(record);
    }
}

fn trace_tap(state: &AppState, session_id: &str, stream: &str, payload: &[u8]) {
    if !state.config.audit_trace {
        return;
    }
    let raw = String::from_utf8_lossy(payload);
    logger::log_event(
        Facility::Audit,
        LogLevel::Trace,
        "",
        &[("session", session_id), ("stream", stream), ("raw", raw.as_ref())],
    );
}

/// A `metav1.Status` document on the error channel, the protocol's way of
/// reporting a failure before any process output exists.
fn build_error_frame(message: &str) -> Bytes {
    let status = serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": "InternalError",
        "code": 500,
    });
    let mut frame = Vec::new();
    frame.push(CHANNEL_ERROR);
    match serde_json::to_vec(&status) {
        Ok(mut payload) => frame.append(&mut payload),
        Err(_) => frame.extend_from_slice(br#"{"status":"Failure","message":"encoding error"}"#),
    }
    Bytes::from(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn error_frame_rides_the_error_channel() {
        let frame = build_error_frame("upstream exec dial timed out");
        assert_eq!(frame[0], CHANNEL_ERROR);
        let payload: serde_json::Value =
            serde_json::from_slice(&frame[1..]).expect("status payload");
        assert_eq!(payload["status"], "Failure");
        assert_eq!(payload["message"], "upstream exec dial timed out");
    }

    #[test]
    fn subprotocol_negotiation_prefers_v4() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("channel.k8s.io, v4.channel.k8s.io"),
        );
        assert_eq!(select_subprotocol(&headers).unwrap(), "v4.channel.k8s.io");

        let mut headers = HeaderMap::new();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("channel.k8s.io"),
        );
        assert_eq!(select_subprotocol(&headers).unwrap(), "channel.k8s.io");
    }

    #[test]
    fn unsupported_subprotocols_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("base64.channel.k8s.io"),
        );
        assert!(select_subprotocol(&headers).is_err());
        assert!(select_subprotocol(&HeaderMap::new()).is_err());
    }
}
