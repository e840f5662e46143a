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

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::rexec::audit::AuditRecord;
use crate::rexec::auth::{self, Identity};
use crate::rexec::logger;
use crate::rexec::server::AppState;

use super::error::{ApiError, NO_USER_BODY};

#[derive(Debug, Deserialize)]
struct AdmissionReview {
    request: Option<AdmissionRequest>,
}

#[derive(Debug, Deserialize)]
struct AdmissionRequest {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    resource: GroupVersionResource,
    #[serde(default, rename = "subResource")]
    sub_resource: String,
    #[serde(default, rename = "userInfo")]
    user_info: UserInfo,
    #[serde(default)]
    object: Value,
}

#[derive(Debug, Default, Deserialize)]
struct GroupVersionResource {
    #[serde(default)]
    group: String,
    #[serde(default)]
    resource: String,
}

#[derive(Debug, Default, Deserialize)]
struct UserInfo {
    #[serde(default)]
    username: String,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    fn into_identity(self) -> Option<Identity> {
        if self.username.trim().is_empty() {
            return None;
        }
        Some(Identity {
            user: self.username,
            groups: self.groups,
            extras: self
                .extra
                .into_iter()
                .map(|(key, values)| (key.to_ascii_lowercase(), values))
                .collect(),
        })
    }
}

/// The admission webhook. A verdict here gates the caller's original exec
/// call at the control plane; everything that is not a well-formed exec
/// review is allowed so a broken webhook cannot brick unrelated traffic.
pub async fn review(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !is_json_content(&headers) {
        return Err(ApiError::unsupported_media_type(
            "admission review must be application/json",
        ));
    }

    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(err) => {
            let error_text = err.to_string();
            logger::sys_warn(
                "admission review did not parse; allowing",
                &[("error", error_text.as_str())],
            );
            return Ok(allow_with_warning("", "admission review did not parse"));
        }
    };

    let Some(request) = review.request else {
        logger::sys_warn("admission review carries no request; allowing", &[]);
        return Ok(allow_with_warning("", "admission review carries no request"));
    };

    if !is_exec_request(&request) {
        return Ok(allow(&request.uid));
    }

    let command = command_from_object(&request.object);
    let Some(identity) = request.user_info.into_identity() else {
        state
            .audit
            .submit(AuditRecord::denied("", command, NO_USER_BODY));
        return Ok(deny(&request.uid, NO_USER_BODY));
    };

    let verdict = auth::authorize(&identity, &state.config.bypass_users, &state.config.secret_sauce);
    logger::sys_debug(
        "admission verdict for exec request",
        &[
            ("user", identity.user.as_str()),
            ("verdict", verdict.as_str()),
        ],
    );

    if verdict.allowed() {
        return Ok(allow(&request.uid));
    }

    let reason = auth::deny_reason(&identity);
    state
        .audit
        .submit(AuditRecord::denied(identity.user.clone(), command, reason.clone()));
    Ok(deny(&request.uid, &reason))
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .eq_ignore_ascii_case("application/json")
        })
        .unwrap_or(false)
}

fn is_exec_request(request: &AdmissionRequest) -> bool {
    request.resource.resource == "pods" && request.sub_resource == "exec"
        || request.resource.group.starts_with("audit.") && request.sub_resource == "exec"
}

fn command_from_object(object: &Value) -> String {
    match object.get("command") {
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        Some(Value::String(command)) => command.clone(),
        _ => String::new(),
    }
}

fn allow(uid: &str) -> Response {
    review_response(uid, true, None, &[])
}

fn allow_with_warning(uid: &str, warning: &str) -> Response {
    review_response(uid, true, None, &[warning])
}

fn deny(uid: &str, message: &str) -> Response {
    review_response(uid, false, Some(message), &[])
}

fn review_response(uid: &str, allowed: bool, message: Option<&str>, warnings: &[&str]) -> Response {
    let mut response = json!({
        "uid": uid,
        "allowed": allowed,
    });
    if let Some(message) = message {
        response["status"] = json!({
            "message": message,
            "code": 403,
        });
    }
    if !warnings.is_empty() {
        response["warnings"] = json!(warnings);
    }
    Json(json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "response": response,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_detection_matches_pods_exec_only() {
        let request = AdmissionRequest {
            uid: "1".into(),
            resource: GroupVersionResource {
                group: String::new(),
                resource: "pods".into(),
            },
            sub_resource: "exec".into(),
            user_info: UserInfo::default(),
            object: Value::Null,
        };
        assert!(is_exec_request(&request));

        let request = AdmissionRequest {
            uid: "2".into(),
            resource: GroupVersionResource {
                group: String::new(),
                resource: "pods".into(),
            },
            sub_resource: String::new(),
            user_info: UserInfo::default(),
            object: Value::Null,
        };
        assert!(!is_exec_request(&request));
    }

    #[test]
    fn command_extraction_handles_both_shapes() {
        assert_eq!(
            command_from_object(&json!({"command": ["ls", "-la"]})),
            "ls -la"
        );
        assert_eq!(command_from_object(&json!({"command": "whoami"})), "whoami");
        assert_eq!(command_from_object(&json!({})), "");
    }

    #[test]
    fn content_type_check_accepts_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert!(is_json_content(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json_content(&headers));

        assert!(!is_json_content(&HeaderMap::new()));
    }

    #[test]
    fn userinfo_without_a_name_has_no_identity() {
        assert!(UserInfo::default().into_identity().is_none());

        let info = UserInfo {
            username: "alice".into(),
            groups: vec!["dev".into()],
            extra: BTreeMap::from([(
                "Secret-Sauce".to_string(),
                vec!["proof".to_string()],
            )]),
        };
        let identity = info.into_identity().expect("identity");
        assert_eq!(identity.user, "alice");
        assert_eq!(identity.session_proof(), Some("proof"));
    }
}
