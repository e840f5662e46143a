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

use std::collections::{BTreeMap, HashSet};

use axum::http::HeaderMap;
use openssl::memcmp;

/// Header carrying the authenticated user name, placed by the fronting
/// control plane. Trusted ground truth; never echoed back to callers.
pub const USER_HEADER: &str = "x-remote-user";
pub const GROUP_HEADER: &str = "x-remote-group";
pub const EXTRA_HEADER_PREFIX: &str = "x-remote-extra-";

/// Extras key under which the client helper presents the session proof.
pub const SESSION_PROOF_KEY: &str = "secret-sauce";

/// Caller identity as asserted by the fronting control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub groups: Vec<String>,
    pub extras: BTreeMap<String, Vec<String>>,
}

impl Identity {
    pub fn new(user: impl Into<String>) -> Self {
        Identity {
            user: user.into(),
            groups: Vec::new(),
            extras: BTreeMap::new(),
        }
    }

    /// Reconstructs the identity from the trusted request headers. Returns
    /// `None` when no user header is present; group and extras headers
    /// without a user are meaningless and ignored.
    pub fn from_headers(headers: &HeaderMap) -> Option<Identity> {
        let user = headers.get(USER_HEADER)?.to_str().ok()?.trim();
        if user.is_empty() {
            return None;
        }

        let groups = headers
            .get_all(GROUP_HEADER)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .collect();

        let mut extras: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers.iter() {
            let name = name.as_str();
            let Some(key) = name.strip_prefix(EXTRA_HEADER_PREFIX) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            extras
                .entry(key.to_ascii_lowercase())
                .or_default()
                .push(value.to_string());
        }

        Some(Identity {
            user: user.to_string(),
            groups,
            extras,
        })
    }

    pub fn session_proof(&self) -> Option<&str> {
        self.extras
            .get(SESSION_PROOF_KEY)
            .and_then(|values| values.first())
            .map(|value| value.as_str())
    }
}

/// Outcome of the authorization predicate. Exactly one verdict is chosen
/// for every exec request before any upstream byte is exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    AllowBypass,
    AllowSession,
    Deny,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::AllowBypass => "allow-bypass",
            Verdict::AllowSession => "allow-session",
            Verdict::Deny => "deny",
        }
    }

    pub fn allowed(self) -> bool {
        !matches!(self, Verdict::Deny)
    }
}

/// The pure authorization predicate. Bypass membership wins over any
/// session-proof header content; otherwise the proof must match the
/// configured secret byte for byte.
pub fn authorize(identity: &Identity, bypass_users: &HashSet<String>, secret: &str) -> Verdict {
    if bypass_users.contains(&identity.user) {
        return Verdict::AllowBypass;
    }
    if let Some(proof) = identity.session_proof() {
        if secret_matches(proof, secret) {
            return Verdict::AllowSession;
        }
    }
    Verdict::Deny
}

/// Human-readable reason for a deny verdict, naming the missing credential.
pub fn deny_reason(identity: &Identity) -> String {
    match identity.session_proof() {
        Some(_) => format!(
            "user {} presented an invalid session proof ({}) and is not in the bypass list",
            identity.user, SESSION_PROOF_KEY
        ),
        None => format!(
            "user {} presented no session proof ({}) and is not in the bypass list",
            identity.user, SESSION_PROOF_KEY
        ),
    }
}

// Length equality leaks only the secret's length, which is fixed for UUID
// secrets; the content comparison must not short-circuit.
fn secret_matches(presented: &str, secret: &str) -> bool {
    let presented = presented.as_bytes();
    let secret = secret.as_bytes();
    if presented.len() != secret.len() || secret.is_empty() {
        return false;
    }
    memcmp::eq(presented, secret)
}
