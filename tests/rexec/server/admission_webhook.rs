use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use rexec::rexec::auth::{self, Identity};
use rexec::rexec::server::build_router;

use crate::common;

fn admission_request(body: Value, content_type: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/admission")
        .header("content-type", content_type)
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn exec_review(uid: &str, username: Option<&str>, extra: Value) -> Value {
    let mut user_info = json!({});
    if let Some(username) = username {
        user_info["username"] = json!(username);
    }
    user_info["extra"] = extra;
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "subResource": "exec",
            "userInfo": user_info,
            "object": {"command": ["sh", "-c", "id"]},
        }
    })
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn non_json_content_type_is_rejected_with_415() {
    let router = build_router(common::app_state(&[]));
    let request = Request::builder()
        .method("POST")
        .uri("/admission")
        .header("content-type", "text/plain")
        .body(Body::from("hello"))
        .expect("request");

    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn malformed_json_fails_open_with_a_warning() {
    let router = build_router(common::app_state(&[]));
    let request = Request::builder()
        .method("POST")
        .uri("/admission")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request");

    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["response"]["allowed"], json!(true));
    assert!(body["response"]["warnings"].is_array());
}

#[tokio::test]
async fn non_exec_resources_are_allowed_unconditionally() {
    let router = build_router(common::app_state(&[]));
    let review = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "42",
            "resource": {"group": "apps", "version": "v1", "resource": "deployments"},
            "userInfo": {"username": "eve"},
            "object": {},
        }
    });

    let response = router
        .oneshot(admission_request(review, "application/json"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["response"]["uid"], json!("42"));
    assert_eq!(body["response"]["allowed"], json!(true));
}

#[tokio::test]
async fn exec_without_proof_is_denied_with_a_reason() {
    let router = build_router(common::app_state(&[]));
    let review = exec_review("deny-1", Some("eve"), json!({}));

    let response = router
        .oneshot(admission_request(review, "application/json"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["response"]["uid"], json!("deny-1"));
    assert_eq!(body["response"]["allowed"], json!(false));
    let message = body["response"]["status"]["message"]
        .as_str()
        .expect("deny message");
    assert!(message.contains("eve"));
    assert!(message.contains("secret-sauce"));
}

#[tokio::test]
async fn exec_with_valid_proof_is_allowed() {
    let router = build_router(common::app_state(&[]));
    let review = exec_review(
        "allow-1",
        Some("alice"),
        json!({"secret-sauce": [common::TEST_SECRET]}),
    );

    let response = router
        .oneshot(admission_request(review, "application/json"))
        .await
        .expect("response");
    let body = response_json(response).await;
    assert_eq!(body["response"]["allowed"], json!(true));
}

#[tokio::test]
async fn bypass_user_is_allowed_without_proof() {
    let router = build_router(common::app_state(&["system:admin"]));
    let review = exec_review("bypass-1", Some("system:admin"), json!({}));

    let response = router
        .oneshot(admission_request(review, "application/json"))
        .await
        .expect("response");
    let body = response_json(response).await;
    assert_eq!(body["response"]["allowed"], json!(true));
}

#[tokio::test]
async fn exec_without_identity_is_denied() {
    let router = build_router(common::app_state(&[]));
    let review = exec_review("nouser-1", None, json!({}));

    let response = router
        .oneshot(admission_request(review, "application/json"))
        .await
        .expect("response");
    let body = response_json(response).await;
    assert_eq!(body["response"]["allowed"], json!(false));
    assert_eq!(body["response"]["status"]["message"], json!("No User found"));
}

#[tokio::test]
async fn webhook_verdicts_match_the_pure_predicate() {
    // The webhook's allow/deny must be exactly the authorization predicate
    // over the same identity, for every combination in the grid.
    let state = common::app_state(&["root"]);
    let bypass = state.config.bypass_users.clone();
    let secret = state.config.secret_sauce.clone();
    let router = build_router(state);

    let users = ["root", "alice", "eve"];
    let proofs: [Option<&str>; 3] = [None, Some(common::TEST_SECRET), Some("wrong")];
    for (index, user) in users.iter().enumerate() {
        for (jndex, proof) in proofs.iter().enumerate() {
            let extra = match proof {
                Some(value) => json!({"secret-sauce": [value]}),
                None => json!({}),
            };
            let uid = format!("grid-{index}-{jndex}");
            let review = exec_review(&uid, Some(user), extra);
            let response = router
                .clone()
                .oneshot(admission_request(review, "application/json"))
                .await
                .expect("response");
            let body = response_json(response).await;

            let mut identity = Identity::new(*user);
            if let Some(value) = proof {
                identity
                    .extras
                    .insert("secret-sauce".to_string(), vec![value.to_string()]);
            }
            let expected = auth::authorize(&identity, &bypass, &secret).allowed();
            assert_eq!(
                body["response"]["allowed"],
                json!(expected),
                "user={user} proof={proof:?}"
            );
        }
    }
}
