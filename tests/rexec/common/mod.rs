use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rexec::rexec::audit;
use rexec::rexec::cli::args::ServerArgs;
use rexec::rexec::config::ProxyConfig;
use rexec::rexec::server::AppState;
use rexec::rexec::session::SessionRegistry;
use rexec::rexec::test_support;

pub const TEST_SECRET: &str = "4f2f2e9a-9f4d-41f1-a0f4-5a2b55a1c0de";

pub fn server_args(bypass_users: &[&str]) -> ServerArgs {
    ServerArgs {
        listen: "127.0.0.1:0".to_string(),
        tls_cert: PathBuf::from("/etc/pki/rexec/tls.crt"),
        tls_key: PathBuf::from("/etc/pki/rexec/tls.key"),
        by_pass_user: bypass_users.iter().map(|user| user.to_string()).collect(),
        secret_sauce: Some(TEST_SECRET.to_string()),
        audit_trace: false,
        debug: false,
        max_strokes_per_line: 2000,
        upstream: "https://kubernetes.default.svc".to_string(),
        grace_period_seconds: 1,
    }
}

/// Builds a fully wired AppState against a synthetic service-account mount.
pub fn app_state(bypass_users: &[&str]) -> AppState {
    let _env = test_support::env_lock();
    let fixture = test_support::serviceaccount_fixture();
    std::env::set_var("REXEC_SERVICEACCOUNT_DIR", fixture.path());
    let config = ProxyConfig::load(&server_args(bypass_users)).expect("config loads");
    std::env::remove_var("REXEC_SERVICEACCOUNT_DIR");

    let (audit_sink, _consumer) = audit::spawn_sink(64);
    AppState {
        config: Arc::new(config),
        audit: audit_sink,
        sessions: Arc::new(SessionRegistry::new()),
        shutdown: CancellationToken::new(),
    }
}
