#![allow(dead_code)]

//! Shared fixtures for unit and integration tests.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard, OnceLock,
};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Builder, X509NameBuilder};

pub const FIXTURE_TOKEN: &str = "test-proxy-token";

/// Global mutex for tests that manipulate process environment variables, so
/// parallel tests do not observe each other's overrides.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn target_dir() -> PathBuf {
    if let Ok(dir) = env::var("CARGO_TARGET_DIR") {
        PathBuf::from(dir)
    } else {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("target")
    }
}

/// Returns a unique directory under `target/test-output/`.
pub fn test_output_dir(component: &str) -> PathBuf {
    static COUNTER: OnceLock<AtomicU64> = OnceLock::new();
    let counter = COUNTER.get_or_init(|| AtomicU64::new(0));
    let mut path = target_dir();
    path.push("test-output");
    path.push(component);
    path.push(format!(
        "{}-{}",
        std::process::id(),
        counter.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("create test output dir");
    path
}

/// A directory shaped like the in-cluster service account mount: a CA
/// bundle and a bearer token.
pub struct ServiceAccountFixture {
    dir: PathBuf,
}

impl ServiceAccountFixture {
    pub fn path(&self) -> &PathBuf {
        &self.dir
    }

    pub fn ca_pem(&self) -> Vec<u8> {
        fs::read(self.dir.join("ca.crt")).expect("fixture ca.crt")
    }
}

pub fn serviceaccount_fixture() -> ServiceAccountFixture {
    let dir = test_output_dir("serviceaccount");
    fs::write(dir.join("ca.crt"), self_signed_ca_pem()).expect("write fixture ca.crt");
    fs::write(dir.join("token"), format!("{}\n", FIXTURE_TOKEN)).expect("write fixture token");
    ServiceAccountFixture { dir }
}

/// Generates a throwaway self-signed CA certificate, PEM encoded.
pub fn self_signed_ca_pem() -> Vec<u8> {
    let rsa = Rsa::generate(2048).expect("generate RSA key");
    let key = PKey::from_rsa(rsa).expect("wrap RSA key");

    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("CN", "rexec-test-ca")
        .expect("set CN");
    let name = name.build();

    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("set version");
    let mut serial = BigNum::new().expect("serial");
    serial
        .rand(128, MsbOption::MAYBE_ZERO, false)
        .expect("random serial");
    builder
        .set_serial_number(&serial.to_asn1_integer().expect("asn1 serial"))
        .expect("set serial");
    builder.set_subject_name(&name).expect("set subject");
    builder.set_issuer_name(&name).expect("set issuer");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
        .expect("set not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(1).expect("not after"))
        .expect("set not after");
    builder.set_pubkey(&key).expect("set pubkey");
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().expect("bc"))
        .expect("append bc");
    builder
        .sign(&key, MessageDigest::sha256())
        .expect("sign certificate");

    builder.build().to_pem().expect("encode certificate")
}
