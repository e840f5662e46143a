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

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub mod admission;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod exec_common;
pub mod passthrough;

pub(super) async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

// Serving this handler at all means the TLS listener accepted the probe's
// connection, which is the readiness condition.
pub(super) async fn readyz() -> Response {
    (StatusCode::OK, "ok").into_response()
}
