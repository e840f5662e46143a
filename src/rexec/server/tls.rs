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
use std::fs;
use std::pin::Pin;

use openssl::pkey::PKey;
use openssl::ssl::{
    select_next_proto, AlpnError, Ssl, SslAcceptor as OpenSslAcceptor, SslMethod, SslVerifyMode,
};
use openssl::stack::Stack;
use openssl::x509::{X509Name, X509};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::rexec::config::ProxyConfig;
use crate::rexec::util::error::{new_error, with_context};

pub(super) fn build_tls_acceptor(
    config: &ProxyConfig,
) -> Result<OpenSslAcceptor, Box<dyn Error + Send + Sync>> {
    let cert_pem = fs::read(&config.tls_cert).map_err(|e| {
        with_context(
            e,
            format!("failed to read serving certificate at {}", config.tls_cert.display()),
        )
    })?;
    let key_pem = fs::read(&config.tls_key).map_err(|e| {
        with_context(
            e,
            format!("failed to read serving key at {}", config.tls_key.display()),
        )
    })?;

    let mut certificates = X509::stack_from_pem(&cert_pem)
        .map_err(|e| with_context(e, "failed to parse serving certificate PEM"))?;
    if certificates.is_empty() {
        return Err(new_error("serving certificate PEM contains no certificates"));
    }
    let server_cert = certificates.remove(0);
    let server_key = PKey::private_key_from_pem(&key_pem)
        .map_err(|e| with_context(e, "failed to parse serving key PEM"))?;
    let ca_certs = X509::stack_from_pem(&config.ca_bundle)
        .map_err(|e| with_context(e, "failed to parse cluster CA bundle PEM"))?;

    let mut builder = OpenSslAcceptor::mozilla_modern(SslMethod::tls())
        .map_err(|e| with_context(e, "failed to initialize TLS acceptor builder"))?;
    builder
        .set_private_key(&server_key)
        .map_err(|e| with_context(e, "failed to attach serving key"))?;
    builder
        .set_certificate(&server_cert)
        .map_err(|e| with_context(e, "failed to attach serving certificate"))?;
    for chained in certificates {
        builder
            .add_extra_chain_cert(chained)
            .map_err(|e| with_context(e, "failed to attach certificate chain"))?;
    }
    builder
        .check_private_key()
        .map_err(|e| with_context(e, "serving certificate and key mismatch"))?;

    // The cluster CA authenticates webhook calls from the control plane;
    // operator clients authenticate with bearer tokens instead, so a peer
    // certificate stays optional.
    let mut name_stack = Stack::<X509Name>::new()
        .map_err(|e| with_context(e, "failed to prepare client CA stack"))?;
    for ca_cert in &ca_certs {
        builder
            .cert_store_mut()
            .add_cert(ca_cert.clone())
            .map_err(|e| with_context(e, "failed to add cluster CA to certificate store"))?;
        name_stack
            .push(
                ca_cert
                    .subject_name()
                    .to_owned()
                    .map_err(|e| with_context(e, "failed to copy cluster CA subject"))?,
            )
            .map_err(|e| with_context(e, "failed to register client CA subject"))?;
    }
    builder.set_client_ca_list(name_stack);
    builder.set_verify(SslVerifyMode::PEER);

    const ALPN_PROTO_LIST: &[u8] = b"\x08http/1.1";
    builder
        .set_alpn_protos(ALPN_PROTO_LIST)
        .map_err(|e| with_context(e, "failed to configure ALPN protocols"))?;
    builder.set_alpn_select_callback(|_, client| {
        select_next_proto(client, ALPN_PROTO_LIST).ok_or(AlpnError::NOACK)
    });

    Ok(builder.build())
}

pub(super) async fn accept_with_tls(
    acceptor: &OpenSslAcceptor,
    stream: TcpStream,
) -> Result<SslStream<TcpStream>, Box<dyn Error + Send + Sync>> {
    let ssl = Ssl::new(acceptor.context())
        .map_err(|e| with_context(e, "failed to initialize TLS session"))?;
    let mut tls_stream = SslStream::new(ssl, stream)
        .map_err(|e| with_context(e, "failed to bind TLS stream to socket"))?;
    Pin::new(&mut tls_stream)
        .accept()
        .await
        .map_err(|e| with_context(e, "TLS handshake failed"))?;
    Ok(tls_stream)
}
