use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use rexec::rexec::server::build_router;

use crate::common;

const EXEC_PATH: &str =
    "/apis/audit.rexec.io/v1beta1/namespaces/default/pods/kafka-0/exec?command=ls&command=-la&stdout=true";

fn exec_request(identity: Option<(&str, Option<&str>)>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(EXEC_PATH);
    if let Some((user, proof)) = identity {
        builder = builder.header("x-remote-user", user);
        if let Some(proof) = proof {
            builder = builder.header("x-remote-extra-secret-sauce", proof);
        }
    }
    builder.body(Body::empty()).expect("request")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn missing_identity_yields_the_exact_no_user_body() {
    let router = build_router(common::app_state(&[]));
    let response = router.oneshot(exec_request(None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "No User found");
}

#[tokio::test]
async fn denied_exec_names_the_missing_credential() {
    let router = build_router(common::app_state(&[]));
    let response = router
        .oneshot(exec_request(Some(("eve", None))))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_text(response).await;
    assert!(body.contains("eve"));
    assert!(body.contains("secret-sauce"));
}

#[tokio::test]
async fn wrong_proof_is_denied() {
    let router = build_router(common::app_state(&[]));
    let response = router
        .oneshot(exec_request(Some(("eve", Some("wrong")))))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_text(response).await;
    assert!(body.contains("invalid session proof"));
}

#[tokio::test]
async fn authorized_exec_without_upgrade_headers_is_asked_to_upgrade() {
    // Authorization passes first; the request then fails only because it
    // never asked for the stream upgrade.
    let router = build_router(common::app_state(&["system:admin"]));
    let mut request = exec_request(Some(("system:admin", None)));
    request.headers_mut().insert(
        "sec-websocket-protocol",
        "v4.channel.k8s.io".parse().unwrap(),
    );
    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
}

#[tokio::test]
async fn exec_with_unsupported_subprotocol_is_rejected() {
    let router = build_router(common::app_state(&["system:admin"]));
    let mut request = exec_request(Some(("system:admin", None)));
    request.headers_mut().insert(
        "sec-websocket-protocol",
        "base64.channel.k8s.io".parse().unwrap(),
    );
    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exec_without_command_is_a_bad_request() {
    let router = build_router(common::app_state(&["system:admin"]));
    let uri = "/apis/audit.rexec.io/v1beta1/namespaces/default/pods/kafka-0/exec?stdout=true";
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-remote-user", "system:admin")
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("command"));
}

#[tokio::test]
async fn discovery_documents_advertise_the_exec_resource() {
    let router = build_router(common::app_state(&[]));

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/apis")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("audit.rexec.io"));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/apis/audit.rexec.io/v1beta1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("pods/exec"));
    assert!(body.contains("PodExecOptions"));
}

#[tokio::test]
async fn passthrough_requires_a_caller_identity() {
    let router = build_router(common::app_state(&[]));
    let request = Request::builder()
        .uri("/api/v1/namespaces/default/pods")
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "No User found");
}

#[tokio::test]
async fn probes_answer_without_identity() {
    let router = build_router(common::app_state(&[]));
    for path in ["/healthz", "/readyz"] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK, "{path}");
    }
}
