use std::fmt;

use serde::Deserialize;

use super::error::ApiError;

pub const CHANNEL_STDIN: u8 = 0;
pub const CHANNEL_STDOUT: u8 = 1;
pub const CHANNEL_STDERR: u8 = 2;
pub const CHANNEL_ERROR: u8 = 3;
pub const CHANNEL_RESIZE: u8 = 4;

#[derive(Debug, Clone)]
pub struct ResizeEvent {
    pub width: u16,
    pub height: u16,
}

/// Validated exec parameters, preserved verbatim for audit.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub command: Vec<String>,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

impl ExecOptions {
    /// True when the caller drives the session interactively; such sessions
    /// get a dedicated session id.
    pub fn interactive(&self) -> bool {
        self.tty || self.stdin
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[derive(Debug, Default)]
pub struct RawExecQuery {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub command: Vec<String>,
    pub stdin: Option<bool>,
    pub stdout: Option<bool>,
    pub stderr: Option<bool>,
    pub tty: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandField {
    Single(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeBool {
    Bool(bool),
    String(String),
}

#[derive(Deserialize)]
#[serde(field_identifier, rename_all = "camelCase")]
enum RawExecField {
    Namespace,
    Pod,
    Container,
    Command,
    Stdin,
    Stdout,
    Stderr,
    Tty,
}

// The `command` query parameter repeats once per argv element, which the
// plain urlencoded deserializer cannot collect; a manual visitor folds the
// repeats into one vector.
impl<'de> Deserialize<'de> for RawExecQuery {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = RawExecQuery;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("exec query parameters")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut raw = RawExecQuery::default();

                while let Some(field) = map.next_key::<RawExecField>()? {
                    match field {
                        // The path segments are authoritative for namespace
                        // and pod; query copies are tolerated but ignored
                        // unless the path left them empty.
                        RawExecField::Namespace => {
                            let value: String = map.next_value()?;
                            if raw.namespace.is_empty() {
                                raw.namespace = value;
                            }
                        }
                        RawExecField::Pod => {
                            let value: String = map.next_value()?;
                            if raw.pod.is_empty() {
                                raw.pod = value;
                            }
                        }
                        RawExecField::Container => {
                            raw.container = map.next_value()?;
                        }
                        RawExecField::Command => {
                            let value: CommandField = map.next_value()?;
                            match value {
                                CommandField::Single(part) => raw.command.push(part),
                                CommandField::Many(parts) => raw.command.extend(parts),
                            }
                        }
                        RawExecField::Stdin => {
                            let value: MaybeBool = map.next_value()?;
                            raw.stdin = parse_bool_param::<A::Error>(value)?;
                        }
                        RawExecField::Stdout => {
                            let value: MaybeBool = map.next_value()?;
                            raw.stdout = parse_bool_param::<A::Error>(value)?;
                        }
                        RawExecField::Stderr => {
                            let value: MaybeBool = map.next_value()?;
                            raw.stderr = parse_bool_param::<A::Error>(value)?;
                        }
                        RawExecField::Tty => {
                            let value: MaybeBool = map.next_value()?;
                            raw.tty = parse_bool_param::<A::Error>(value)?;
                        }
                    }
                }

                Ok(raw)
            }
        }

        deserializer.deserialize_map(Visitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecValidationError {
    MissingPod,
    MissingCommand,
    NoStreamsRequested,
}

impl fmt::Display for ExecValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecValidationError::MissingPod => {
                write!(f, "pod name is required")
            }
            ExecValidationError::MissingCommand => {
                write!(f, "at least one `command` query parameter must be provided")
            }
            ExecValidationError::NoStreamsRequested => {
                write!(
                    f,
                    "at least one of stdin, stdout, stderr, or tty must be enabled"
                )
            }
        }
    }
}

impl From<ExecValidationError> for ApiError {
    fn from(value: ExecValidationError) -> Self {
        ApiError::bad_request(value.to_string())
    }
}

pub fn validate_query(raw: RawExecQuery) -> Result<ExecOptions, ExecValidationError> {
    if raw.pod.trim().is_empty() {
        return Err(ExecValidationError::MissingPod);
    }
    if raw.command.is_empty() {
        return Err(ExecValidationError::MissingCommand);
    }

    let tty = raw.tty.unwrap_or(false);
    let stdin = raw.stdin.unwrap_or(false);
    let stdout = if tty { true } else { raw.stdout.unwrap_or(false) };
    let stderr = if tty { false } else { raw.stderr.unwrap_or(false) };

    if !(stdin || stdout || stderr || tty) {
        return Err(ExecValidationError::NoStreamsRequested);
    }

    Ok(ExecOptions {
        namespace: raw.namespace,
        pod: raw.pod,
        container: raw.container,
        command: raw.command,
        stdin,
        stdout,
        stderr,
        tty,
    })
}

pub fn parse_resize_payload(payload: &[u8]) -> Result<ResizeEvent, String> {
    #[derive(Deserialize)]
    struct Body {
        #[serde(alias = "Width")]
        width: u16,
        #[serde(alias = "Height")]
        height: u16,
    }

    let body: Body = serde_json::from_slice(payload)
        .map_err(|err| format!("invalid resize payload: {}", err))?;
    if body.width == 0 || body.height == 0 {
        return Err("resize width and height must be greater than zero".into());
    }
    Ok(ResizeEvent {
        width: body.width,
        height: body.height,
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_bool_param<E>(value: MaybeBool) -> Result<Option<bool>, E>
where
    E: serde::de::Error,
{
    match value {
        MaybeBool::Bool(b) => Ok(Some(b)),
        MaybeBool::String(s) => parse_bool(&s).map(Some).ok_or_else(|| {
            serde::de::Error::invalid_value(
                serde::de::Unexpected::Str(&s),
                &"a boolean value such as true/false/1/0",
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pod: &str, command: &[&str]) -> RawExecQuery {
        RawExecQuery {
            namespace: "default".into(),
            pod: pod.into(),
            container: None,
            command: command.iter().map(|part| part.to_string()).collect(),
            stdin: None,
            stdout: Some(true),
            stderr: None,
            tty: None,
        }
    }

    #[test]
    fn rejects_missing_command() {
        let err = validate_query(raw("kafka", &[])).unwrap_err();
        assert_eq!(err, ExecValidationError::MissingCommand);
    }

    #[test]
    fn rejects_missing_pod() {
        let err = validate_query(raw("", &["ls"])).unwrap_err();
        assert_eq!(err, ExecValidationError::MissingPod);
    }

    #[test]
    fn requires_at_least_one_stream() {
        let mut query = raw("kafka", &["ls"]);
        query.stdout = Some(false);
        let err = validate_query(query).unwrap_err();
        assert_eq!(err, ExecValidationError::NoStreamsRequested);
    }

    #[test]
    fn tty_forces_stdout_and_drops_stderr() {
        let mut query = raw("kafka", &["sh"]);
        query.tty = Some(true);
        query.stdout = Some(false);
        query.stderr = Some(true);
        let options = validate_query(query).expect("valid options");
        assert!(options.tty);
        assert!(options.stdout);
        assert!(!options.stderr);
        assert!(options.interactive());
    }

    #[test]
    fn stdin_alone_is_interactive() {
        let mut query = raw("kafka", &["cat"]);
        query.stdin = Some(true);
        let options = validate_query(query).expect("valid options");
        assert!(options.interactive());

        let options = validate_query(raw("kafka", &["ls", "-la"])).expect("valid options");
        assert!(!options.interactive());
        assert_eq!(options.command_line(), "ls -la");
    }

    #[test]
    fn parses_repeated_command_query_params() {
        let raw: RawExecQuery =
            serde_urlencoded::from_str("command=ls&command=%2Ftmp&stdin=true&stdout=true&tty=1")
                .expect("should parse query");
        assert_eq!(raw.command, vec!["ls", "/tmp"]);
        assert_eq!(raw.stdin, Some(true));
        assert_eq!(raw.tty, Some(true));
    }

    #[test]
    fn parses_resize_payload() {
        let event = parse_resize_payload(br#"{"width":80,"height":24}"#).expect("resize event");
        assert_eq!(event.width, 80);
        assert_eq!(event.height, 24);
        assert!(parse_resize_payload(br#"{"width":0,"height":10}"#).is_err());
        assert!(parse_resize_payload(b"garbage").is_err());
    }
}
