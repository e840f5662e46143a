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

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
#[cfg(not(test))]
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn from_u8(value: u8) -> LogLevel {
        match value {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Facility {
    Audit,
    Sys,
}

impl Facility {
    fn as_str(self) -> &'static str {
        match self {
            Facility::Audit => "audit",
            Facility::Sys => "sys",
        }
    }
}

static AUDIT_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static SYS_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Error as u8);

/// Sets the per-facility level gates. Trace on the audit facility enables
/// per-chunk raw traffic records; debug on the sys facility enables
/// per-session diagnostics.
pub fn init(audit_trace: bool, debug: bool) {
    let audit_level = if audit_trace {
        LogLevel::Trace
    } else {
        LogLevel::Info
    };
    let sys_level = if debug {
        LogLevel::Debug
    } else {
        LogLevel::Error
    };
    AUDIT_LEVEL.store(audit_level as u8, Ordering::Relaxed);
    SYS_LEVEL.store(sys_level as u8, Ordering::Relaxed);
}

fn enabled(facility: Facility, level: LogLevel) -> bool {
    let gate = match facility {
        Facility::Audit => LogLevel::from_u8(AUDIT_LEVEL.load(Ordering::Relaxed)),
        Facility::Sys => LogLevel::from_u8(SYS_LEVEL.load(Ordering::Relaxed)),
    };
    level >= gate
}

/// Emits one newline-delimited JSON record on the shared sink. Every record
/// carries `level`, `facility`, and an RFC 3339 `time`; metadata pairs land
/// as top-level string fields.
pub fn log_event(facility: Facility, level: LogLevel, message: &str, metadata: &[(&str, &str)]) {
    if !enabled(facility, level) {
        return;
    }

    let mut payload = serde_json::Map::new();
    payload.insert("level".into(), Value::String(level.as_str().to_string()));
    payload.insert(
        "facility".into(),
        Value::String(facility.as_str().to_string()),
    );
    payload.insert(
        "time".into(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    for (key, value) in metadata {
        if key.is_empty() {
            continue;
        }
        payload.insert((*key).to_string(), Value::String((*value).to_string()));
    }
    if !message.is_empty() {
        payload.insert("message".into(), Value::String(message.to_string()));
    }

    write_line(facility, &Value::Object(payload).to_string());
}

pub fn sys_debug(message: &str, metadata: &[(&str, &str)]) {
    log_event(Facility::Sys, LogLevel::Debug, message, metadata);
}

pub fn sys_info(message: &str, metadata: &[(&str, &str)]) {
    log_event(Facility::Sys, LogLevel::Info, message, metadata);
}

pub fn sys_warn(message: &str, metadata: &[(&str, &str)]) {
    log_event(Facility::Sys, LogLevel::Warn, message, metadata);
}

pub fn sys_error(message: &str, metadata: &[(&str, &str)]) {
    log_event(Facility::Sys, LogLevel::Error, message, metadata);
}

#[cfg(not(test))]
fn write_line(_facility: Facility, line: &str) {
    // Both facilities share one ordered stream; the log shipper splits them
    // on the facility field.
    let mut stdout = io::stdout().lock();
    let write_result = writeln!(stdout, "{}", line).and_then(|_| stdout.flush());

    if let Err(error) = write_result {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(
            stderr,
            "rexec: failed to write log line: {} (original: {})",
            error, line
        );
    }
}

#[cfg(test)]
fn write_line(facility: Facility, line: &str) {
    let store = test_log_store();
    let mut guard = store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.push((facility, line.to_string()));
}

#[cfg(test)]
fn test_log_store() -> &'static Mutex<Vec<(Facility, String)>> {
    static STORE: OnceLock<Mutex<Vec<(Facility, String)>>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(Vec::new()))
}

#[cfg(test)]
pub fn take_test_logs() -> Vec<(Facility, String)> {
    let store = test_log_store();
    let mut guard = store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.drain(..).collect()
}

#[cfg(test)]
pub fn test_gate_lock() -> std::sync::MutexGuard<'static, ()> {
    static GATE: OnceLock<Mutex<()>> = OnceLock::new();
    GATE.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
