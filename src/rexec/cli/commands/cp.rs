//! Audited file download: drives `tar` in the target container through the
//! proxy's exec endpoint and extracts the stream locally. Only pod → local
//! copies are supported.

use std::error::Error;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::mpsc::{Receiver, Sender};

use futures_util::StreamExt;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use tar::{Archive, EntryType};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::rexec::cli::args::CpArgs;
use crate::rexec::server::handlers::discovery::audit_group_version;
use crate::rexec::server::handlers::exec_common::{CHANNEL_ERROR, CHANNEL_STDERR, CHANNEL_STDOUT};
use crate::rexec::util::error::{new_error, with_context};

/// A `[[namespace/]pod:]path` source or destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub pod: Option<String>,
    pub namespace: String,
    pub path: String,
}

pub fn parse_file_spec(
    spec: &str,
    default_namespace: &str,
) -> Result<FileSpec, Box<dyn Error + Send + Sync>> {
    let Some((pod_part, file_path)) = spec.split_once(':') else {
        return Ok(FileSpec {
            pod: None,
            namespace: default_namespace.to_string(),
            path: spec.to_string(),
        });
    };

    if pod_part.is_empty() {
        return Err(new_error(format!("invalid file spec: {}", spec)));
    }

    let (namespace, pod) = match pod_part.split_once('/') {
        Some((namespace, pod)) => (namespace.to_string(), pod.to_string()),
        None => (default_namespace.to_string(), pod_part.to_string()),
    };

    Ok(FileSpec {
        pod: Some(pod),
        namespace,
        path: file_path.to_string(),
    })
}

pub fn validate_copy_specs(
    src: &FileSpec,
    dest: &FileSpec,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    match (&src.pod, &dest.pod) {
        (None, None) => Err(new_error(
            "source must be a pod file spec (pod:path); only pod to local copy is supported",
        )),
        (None, Some(_)) => Err(new_error(
            "copying to pods is not supported for security reasons; only pod to local copy is allowed",
        )),
        (Some(_), Some(_)) => Err(new_error(
            "destination must be a local path, not a pod path; only pod to local copy is supported",
        )),
        (Some(_), None) => {
            if src.path.is_empty() {
                Err(new_error("remote path cannot be empty"))
            } else {
                Ok(())
            }
        }
    }
}

pub fn validate_local_destination(dest: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
    if dest.exists() {
        return Ok(());
    }
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.is_dir() {
        return Err(new_error(format!(
            "local directory does not exist: {}",
            parent.display()
        )));
    }
    Ok(())
}

/// Cleans a tar entry name, rejecting absolute names and any `..` segment.
/// A literal `..` inside a file name (`file..txt`) stays legal.
fn sanitize_entry_name(name: &str) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(new_error(format!(
            "illegal file path in tar: {} (path traversal attempt)",
            name
        )));
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(new_error(format!(
                    "illegal file path in tar: {} (path traversal attempt)",
                    name
                )))
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(new_error(format!("invalid tar entry name: {}", name)));
    }
    Ok(clean)
}

fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    let mut clean = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                clean.pop();
            }
            Component::CurDir => {}
            other => clean.push(other),
        }
    }
    clean
}

/// Extracts a tar stream under `dest_path` with strict containment: every
/// resolved target must stay inside the destination root. Symlink, hardlink,
/// and device entries are skipped with a warning.
pub fn extract_archive<R: Read>(
    reader: R,
    dest_path: &Path,
    src_base: &str,
    warnings: &mut dyn Write,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let dest_is_dir = dest_path.is_dir();
    let base_dir = if dest_is_dir {
        dest_path.to_path_buf()
    } else {
        match dest_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    };
    let base_abs = absolutize(&base_dir);
    let dest_abs = absolutize(dest_path);

    let mut archive = Archive::new(reader);
    for entry in archive
        .entries()
        .map_err(|e| with_context(e, "failed to read tar stream"))?
    {
        let mut entry = entry.map_err(|e| with_context(e, "failed to read tar entry"))?;
        let raw_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let clean = sanitize_entry_name(&raw_name)?;

        let target = if dest_is_dir {
            dest_path.join(&clean)
        } else if clean == Path::new(src_base) {
            dest_path.to_path_buf()
        } else if let Ok(rel) = clean.strip_prefix(src_base) {
            dest_path.join(rel)
        } else {
            base_dir.join(&clean)
        };

        let target_abs = absolutize(&target);
        if target_abs != base_abs && target_abs != dest_abs && !target_abs.starts_with(&base_abs) {
            return Err(new_error(format!(
                "illegal file path in tar: {} (path traversal attempt)",
                raw_name
            )));
        }

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target_abs)
                    .map_err(|e| with_context(e, "failed to create directory"))?;
            }
            EntryType::Regular => {
                if let Some(parent) = target_abs.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| with_context(e, "failed to create parent directory"))?;
                }
                let mut file = File::create(&target_abs)
                    .map_err(|e| with_context(e, "failed to create file"))?;
                io::copy(&mut entry, &mut file)
                    .map_err(|e| with_context(e, "failed to write file"))?;
                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode() {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = fs::set_permissions(
                        &target_abs,
                        fs::Permissions::from_mode(mode & 0o777),
                    );
                }
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .ok()
                    .flatten()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default();
                let _ = writeln!(
                    warnings,
                    "Warning: skipping symlink {} -> {} (symlinks not supported for security)",
                    raw_name, link
                );
            }
            other => {
                let _ = writeln!(
                    warnings,
                    "Warning: skipping unsupported entry type {:?} for {}",
                    other, raw_name
                );
            }
        }
    }

    Ok(())
}

/// Splits a remote path into the directory `tar` changes into and the base
/// name it archives.
fn split_remote_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return ("/".to_string(), ".".to_string());
    }
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(index) => (trimmed[..index].to_string(), trimmed[index + 1..].to_string()),
        None => (".".to_string(), trimmed.to_string()),
    }
}

/// Maps remote tar failures onto actionable messages, with pod context.
fn classify_remote_error(
    stderr_text: &str,
    pod_ref: &str,
    fallback: Option<String>,
) -> Option<Box<dyn Error + Send + Sync>> {
    if stderr_text.contains("tar: not found")
        || stderr_text.contains("executable file not found")
        || stderr_text.contains("sh: tar")
    {
        return Some(new_error(format!(
            "pod {}: tar binary not found in container",
            pod_ref
        )));
    }
    if stderr_text.contains("No such file or directory") {
        return Some(new_error(format!(
            "pod {}: remote path not found: {}",
            pod_ref,
            extract_remote_path(stderr_text)
        )));
    }
    if stderr_text.contains("Permission denied") || stderr_text.contains("cannot open") {
        return Some(new_error(format!(
            "pod {}: permission denied reading remote path",
            pod_ref
        )));
    }
    if !stderr_text.trim().is_empty() {
        return Some(new_error(format!(
            "pod {}: remote tar failed: {}",
            pod_ref,
            stderr_text.trim()
        )));
    }
    fallback.map(|message| new_error(format!("pod {}: {}", pod_ref, message)))
}

/// Pulls the failing path out of tar's `tar: foo: No such file or directory`
/// stderr lines.
fn extract_remote_path(stderr_text: &str) -> String {
    for line in stderr_text.lines() {
        if line.contains("No such file or directory") {
            let parts: Vec<&str> = line.splitn(3, ':').collect();
            if parts.len() >= 2 {
                return parts[1].trim().to_string();
            }
        }
    }
    "unknown".to_string()
}

/// Adapts the frame channel to `std::io::Read` for the blocking extractor.
struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    offset: usize,
}

impl ChannelReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        ChannelReader {
            rx,
            buffer: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.buffer.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buffer = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = &self.buffer[self.offset..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

pub async fn run(args: &CpArgs) -> Result<i32, Box<dyn Error + Send + Sync>> {
    let default_namespace = args.namespace.clone().unwrap_or_else(|| "default".to_string());
    let src = parse_file_spec(&args.src, &default_namespace)?;
    let dest = parse_file_spec(&args.dest, &default_namespace)?;
    validate_copy_specs(&src, &dest)?;
    let dest_path = PathBuf::from(&dest.path);
    validate_local_destination(&dest_path)?;

    let server = args
        .server
        .as_deref()
        .ok_or_else(|| new_error("--server (or REXEC_SERVER) is required"))?;
    let token = args
        .token
        .as_deref()
        .ok_or_else(|| new_error("--token (or REXEC_TOKEN) is required"))?;

    let pod = src.pod.clone().unwrap_or_default();
    let pod_ref = format!("{}/{}", src.namespace, pod);
    let (src_dir, src_base) = split_remote_path(&src.path);

    let url = exec_url(server, &src, args.container.as_deref(), &src_dir, &src_base)?;
    let mut ws = connect(&url, token, args.ca_cert.as_deref()).await?;

    let (byte_tx, byte_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = std::sync::mpsc::channel();
    let extract_dest = dest_path.clone();
    let extract_base = src_base.clone();
    let extract_task = tokio::task::spawn_blocking(move || {
        let reader = ChannelReader::new(byte_rx);
        let mut warnings = io::stderr();
        extract_archive(reader, &extract_dest, &extract_base, &mut warnings)
    });

    let mut stderr_text = String::new();
    let mut remote_failure: Option<String> = None;
    while let Some(frame) = ws.next().await {
        let frame = match frame {
            Ok(Message::Binary(frame)) => frame,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                remote_failure.get_or_insert_with(|| err.to_string());
                break;
            }
        };
        if frame.is_empty() {
            continue;
        }
        match frame[0] {
            CHANNEL_STDOUT => {
                // A send error means the extractor bailed; keep draining the
                // socket so stderr still arrives for the error report.
                let _ = byte_tx.send(frame[1..].to_vec());
            }
            CHANNEL_STDERR => {
                stderr_text.push_str(&String::from_utf8_lossy(&frame[1..]));
            }
            CHANNEL_ERROR => {
                if frame.len() > 1 {
                    let status = String::from_utf8_lossy(&frame[1..]).into_owned();
                    if !status.contains("\"status\":\"Success\"") {
                        remote_failure.get_or_insert(status);
                    }
                }
            }
            _ => {}
        }
    }
    drop(byte_tx);

    let extract_result = extract_task
        .await
        .map_err(|e| with_context(e, "tar extraction task failed"))?;

    // Traversal rejections outrank remote noise; a poisoned archive must
    // never be reported as a tar hiccup.
    if let Err(extract_err) = extract_result {
        let message = extract_err.to_string();
        if message.contains("illegal file path") {
            return Err(extract_err);
        }
        if let Some(remote) = classify_remote_error(&stderr_text, &pod_ref, remote_failure) {
            return Err(remote);
        }
        return Err(extract_err);
    }

    if let Some(remote) = classify_remote_error(&stderr_text, &pod_ref, remote_failure) {
        return Err(remote);
    }

    println!("Copied {}:{} to {}", pod, src.path, dest.path);
    Ok(0)
}

fn exec_url(
    server: &str,
    src: &FileSpec,
    container: Option<&str>,
    src_dir: &str,
    src_base: &str,
) -> Result<Url, Box<dyn Error + Send + Sync>> {
    let mut url = Url::parse(server).map_err(|e| with_context(e, "invalid --server URL"))?;
    let pod = src.pod.as_deref().unwrap_or_default();
    url.set_path(&format!(
        "/apis/{}/namespaces/{}/pods/{}/exec",
        audit_group_version(),
        src.namespace,
        pod
    ));
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        if let Some(container) = container {
            query.append_pair("container", container);
        }
        for part in ["tar", "cf", "-", "-C", src_dir, "--", src_base] {
            query.append_pair("command", part);
        }
        query.append_pair("stdin", "false");
        query.append_pair("stdout", "true");
        query.append_pair("stderr", "true");
        query.append_pair("tty", "false");
    }
    url.set_scheme("wss")
        .map_err(|_| new_error("--server must use https"))?;
    Ok(url)
}

async fn connect(
    url: &Url,
    token: &str,
    ca_cert: Option<&Path>,
) -> Result<tokio_tungstenite::WebSocketStream<SslStream<TcpStream>>, Box<dyn Error + Send + Sync>>
{
    let host = url
        .host_str()
        .ok_or_else(|| new_error("--server URL is missing a host"))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| new_error("--server URL is missing a port"))?;
    let mut address = host.clone();
    if address.contains(':') && !address.starts_with('[') {
        address = format!("[{}]", address);
    }
    address.push(':');
    address.push_str(&port.to_string());

    let tcp_stream = TcpStream::connect(&address)
        .await
        .map_err(|e| with_context(e, format!("failed to connect to {}", address)))?;

    let mut builder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| with_context(e, "failed to initialize TLS connector"))?;
    if let Some(ca_path) = ca_cert {
        let ca_pem = fs::read(ca_path)
            .map_err(|e| with_context(e, format!("failed to read CA bundle at {}", ca_path.display())))?;
        let certs = X509::stack_from_pem(&ca_pem)
            .map_err(|e| with_context(e, "CA bundle is not valid PEM"))?;
        let store = builder.cert_store_mut();
        for cert in certs {
            store
                .add_cert(cert)
                .map_err(|e| with_context(e, "failed to add CA certificate"))?;
        }
    }
    builder.set_verify(SslVerifyMode::PEER);
    let connector = builder.build();

    let ssl = connector
        .configure()
        .map_err(|e| with_context(e, "failed to configure TLS"))?
        .into_ssl(&host)
        .map_err(|e| with_context(e, "failed to prepare TLS session"))?;
    let mut tls_stream = SslStream::new(ssl, tcp_stream)
        .map_err(|e| with_context(e, "failed to bind TLS stream"))?;
    Pin::new(&mut tls_stream)
        .connect()
        .await
        .map_err(|e| with_context(e, "TLS handshake failed"))?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| with_context(e, "failed to build upgrade request"))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static("v4.channel.k8s.io, channel.k8s.io"),
    );
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| with_context(e, "token is not a valid header value"))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (stream, _) = client_async(request, tls_stream)
        .await
        .map_err(|e| with_context(e, "exec upgrade failed"))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, Header};

    #[test]
    fn parses_plain_local_paths() {
        let spec = parse_file_spec("/tmp/out", "default").unwrap();
        assert_eq!(spec.pod, None);
        assert_eq!(spec.path, "/tmp/out");
    }

    #[test]
    fn parses_pod_and_namespaced_pod_specs() {
        let spec = parse_file_spec("kafka-0:/var/log/app.log", "default").unwrap();
        assert_eq!(spec.pod.as_deref(), Some("kafka-0"));
        assert_eq!(spec.namespace, "default");
        assert_eq!(spec.path, "/var/log/app.log");

        let spec = parse_file_spec("prod/kafka-0:/var/log", "default").unwrap();
        assert_eq!(spec.pod.as_deref(), Some("kafka-0"));
        assert_eq!(spec.namespace, "prod");
    }

    #[test]
    fn copy_direction_is_download_only() {
        let local = parse_file_spec("/tmp/out", "default").unwrap();
        let remote = parse_file_spec("pod:/var/log", "default").unwrap();

        assert!(validate_copy_specs(&remote, &local).is_ok());
        assert!(validate_copy_specs(&local, &local).is_err());
        assert!(validate_copy_specs(&local, &remote).is_err());
        assert!(validate_copy_specs(&remote, &remote).is_err());

        let empty = parse_file_spec("pod:", "default").unwrap();
        assert!(validate_copy_specs(&empty, &local).is_err());
    }

    #[test]
    fn sanitizer_rejects_traversal_names() {
        for name in ["../evil", "a/../../evil", "/etc/passwd", ".."] {
            let err = sanitize_entry_name(name).unwrap_err();
            assert!(
                err.to_string().contains("illegal file path")
                    || err.to_string().contains("invalid tar entry"),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn literal_dot_dot_in_file_names_is_legal() {
        let clean = sanitize_entry_name("logs/file..txt").unwrap();
        assert_eq!(clean, PathBuf::from("logs/file..txt"));
        // `..` as a full segment is not.
        assert!(sanitize_entry_name("logs/../file.txt").is_err());
    }

    #[test]
    fn remote_path_splitting_matches_tar_invocation() {
        assert_eq!(
            split_remote_path("/var/log/app.log"),
            ("/var/log".to_string(), "app.log".to_string())
        );
        assert_eq!(
            split_remote_path("/app.log"),
            ("/".to_string(), "app.log".to_string())
        );
        assert_eq!(
            split_remote_path("relative.txt"),
            (".".to_string(), "relative.txt".to_string())
        );
        assert_eq!(
            split_remote_path("/var/log/"),
            ("/var".to_string(), "log".to_string())
        );
    }

    #[test]
    fn extracts_a_single_file_onto_the_destination_path() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("copied.log");

        let mut builder = Builder::new(Vec::new());
        let payload = b"line one\nline two\n";
        let mut header = Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "app.log", payload.as_slice())
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let mut warnings = Vec::new();
        extract_archive(archive.as_slice(), &dest, "app.log", &mut warnings).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), payload);
        assert!(warnings.is_empty());
    }

    #[test]
    fn extracts_a_directory_tree_into_an_existing_directory() {
        let dir = tempfile::tempdir().unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut dir_header = Header::new_gnu();
        dir_header.set_entry_type(EntryType::Directory);
        dir_header.set_size(0);
        dir_header.set_mode(0o755);
        dir_header.set_cksum();
        builder
            .append_data(&mut dir_header, "log", io::empty())
            .unwrap();

        let payload = b"hello";
        let mut file_header = Header::new_gnu();
        file_header.set_size(payload.len() as u64);
        file_header.set_mode(0o600);
        file_header.set_cksum();
        builder
            .append_data(&mut file_header, "log/a.txt", payload.as_slice())
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let mut warnings = Vec::new();
        extract_archive(archive.as_slice(), dir.path(), "log", &mut warnings).unwrap();
        assert_eq!(fs::read(dir.path().join("log/a.txt")).unwrap(), payload);
    }

    #[test]
    fn symlink_entries_are_skipped_with_a_warning() {
        let dir = tempfile::tempdir().unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_link_name("/etc/passwd").unwrap();
        header.set_cksum();
        builder
            .append_data(&mut header, "sneaky", io::empty())
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let mut warnings = Vec::new();
        extract_archive(archive.as_slice(), dir.path(), "sneaky", &mut warnings).unwrap();
        let warning_text = String::from_utf8_lossy(&warnings).into_owned();
        assert!(warning_text.contains("skipping symlink"));
        assert!(!dir.path().join("sneaky").exists());
    }

    #[test]
    fn remote_errors_are_classified_with_pod_context() {
        let err = classify_remote_error("sh: tar: not found\n", "default/kafka-0", None).unwrap();
        assert!(err.to_string().contains("tar binary not found"));

        let err = classify_remote_error(
            "tar: /var/log/missing: No such file or directory\n",
            "default/kafka-0",
            None,
        )
        .unwrap();
        assert!(err.to_string().contains("remote path not found"));
        assert!(err.to_string().contains("/var/log/missing"));

        let err =
            classify_remote_error("tar: Permission denied\n", "default/kafka-0", None).unwrap();
        assert!(err.to_string().contains("permission denied"));

        assert!(classify_remote_error("", "default/kafka-0", None).is_none());
        let err = classify_remote_error("", "default/kafka-0", Some("boom".to_string())).unwrap();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn exec_url_targets_the_audit_group() {
        let src = parse_file_spec("prod/kafka-0:/var/log/app.log", "default").unwrap();
        let url = exec_url(
            "https://rexec.example:8443",
            &src,
            Some("broker"),
            "/var/log",
            "app.log",
        )
        .unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(
            url.path(),
            "/apis/audit.rexec.io/v1beta1/namespaces/prod/pods/kafka-0/exec"
        );
        let query = url.query().unwrap();
        assert!(query.contains("command=tar"));
        assert!(query.contains("container=broker"));
        assert!(query.contains("tty=false"));
    }
}
