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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::rexec::logger::{self, Facility, LogLevel};

pub const AUDIT_QUEUE_DEPTH: usize = 1024;

/// One append-only audit entry. Records are immutable after submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub user: String,
    pub session: String,
    pub command: String,
    pub error: Option<String>,
    pub truncated: bool,
}

impl AuditRecord {
    pub fn line(user: impl Into<String>, session: impl Into<String>, command: impl Into<String>) -> Self {
        AuditRecord {
            user: user.into(),
            session: session.into(),
            command: command.into(),
            error: None,
            truncated: false,
        }
    }

    pub fn denied(user: impl Into<String>, command: impl Into<String>, reason: impl Into<String>) -> Self {
        AuditRecord {
            user: user.into(),
            session: "denied".to_string(),
            command: command.into(),
            error: Some(reason.into()),
            truncated: false,
        }
    }

    pub fn failed(
        user: impl Into<String>,
        session: impl Into<String>,
        command: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        AuditRecord {
            user: user.into(),
            session: session.into(),
            command: command.into(),
            error: Some(error.into()),
            truncated: false,
        }
    }

    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }
}

/// Producer handle for the async audit pipeline. Cheap to clone; submission
/// never blocks the calling session.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

/// Starts the single consumer task. The task drains the channel and exits
/// once every producer handle has been dropped, so awaiting the returned
/// handle at shutdown guarantees all accepted records reached the sink.
pub fn spawn_sink(capacity: usize) -> (AuditSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity);
    let consumer = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            emit(&record);
        }
    });
    (
        AuditSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        consumer,
    )
}

impl AuditSink {
    pub fn submit(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                let total_text = total.to_string();
                logger::sys_warn(
                    "audit channel full; record dropped",
                    &[
                        ("session", record.session.as_str()),
                        ("dropped_total", total_text.as_str()),
                    ],
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                logger::sys_error("audit sink is gone; record lost", &[]);
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn emit(record: &AuditRecord) {
    let mut metadata: Vec<(&str, &str)> = vec![
        ("user", record.user.as_str()),
        ("session", record.session.as_str()),
        ("command", record.command.as_str()),
    ];
    if let Some(ref error) = record.error {
        metadata.push(("error", error.as_str()));
    }
    if record.truncated {
        metadata.push(("truncated", "true"));
    }
    logger::log_event(Facility::Audit, LogLevel::Info, "", &metadata);
}
