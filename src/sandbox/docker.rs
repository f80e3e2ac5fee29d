//! Docker Engine API client
//!
//! Talks HTTP/1.1 to the Docker daemon over its Unix domain socket and
//! implements [`ContainerRuntime`] on top of it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, StatusCode};
use hyper_util::client::legacy::Client;
use hyperlocal::UnixConnector;
use serde::Deserialize;
use serde_json::json;

use super::runtime::{
    ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, MountKind, RuntimeError,
};

type HyperClient = Client<UnixConnector, Full<Bytes>>;

/// Pinned API version; every daemon since Docker 24 accepts it
const API_PREFIX: &str = "/v1.43";

/// Client for the Docker Engine API
pub struct DockerClient {
    client: HyperClient,
    socket_path: String,
}

#[derive(Deserialize)]
struct IdResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Deserialize)]
struct ExecInspect {
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "ExitCode")]
    exit_code: Option<i64>,
}

#[derive(Deserialize)]
struct ContainerInspect {
    #[serde(rename = "State")]
    state: ContainerStateInfo,
}

#[derive(Deserialize)]
struct ContainerStateInfo {
    #[serde(rename = "Running", default)]
    running: bool,
}

#[derive(Deserialize)]
struct ListEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Created", default)]
    created: i64,
    #[serde(rename = "State", default)]
    state: String,
}

impl DockerClient {
    /// Create a new Docker API client
    ///
    /// # Arguments
    /// * `socket_path` - Path to the daemon socket (usually `/var/run/docker.sock`)
    pub fn new(socket_path: impl Into<String>) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(UnixConnector);

        Self {
            client,
            socket_path: socket_path.into(),
        }
    }

    /// Send one request and collect the whole response body
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<(StatusCode, Bytes), RuntimeError> {
        let path = format!("{}{}", API_PREFIX, endpoint);
        let uri: hyper::Uri = hyperlocal::Uri::new(&self.socket_path, &path).into();

        let payload = match body {
            Some(value) => Bytes::from(serde_json::to_vec(value).map_err(transport)?),
            None => Bytes::new(),
        };

        let req = hyper::Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Full::new(payload))
            .map_err(transport)?;

        let res = self.client.request(req).await.map_err(transport)?;
        let status = res.status();
        let bytes = res.into_body().collect().await.map_err(transport)?.to_bytes();

        Ok((status, bytes))
    }

    /// Send a request and map non-2xx answers to [`RuntimeError`]
    async fn call(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
        subject: &str,
    ) -> Result<Bytes, RuntimeError> {
        let (status, bytes) = self.send(method, endpoint, body).await?;
        // 304: start/stop on a container already in that state
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(bytes);
        }
        Err(error_for(status, &bytes, subject))
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<i64, RuntimeError> {
        let endpoint = format!("/exec/{}/json", exec_id);
        for _ in 0..20 {
            let bytes = self.call(Method::GET, &endpoint, None, exec_id).await?;
            let inspect: ExecInspect = serde_json::from_slice(&bytes).map_err(transport)?;
            if let (false, Some(code)) = (inspect.running, inspect.exit_code) {
                return Ok(code);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Err(RuntimeError::Api {
            status: 0,
            message: format!("exec {} did not report an exit code", exec_id),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mounts: Vec<serde_json::Value> = spec
            .mounts
            .iter()
            .map(|m| {
                let mut mount = json!({
                    "Type": match m.kind {
                        MountKind::Volume => "volume",
                        MountKind::Bind => "bind",
                    },
                    "Target": m.target,
                    "ReadOnly": m.read_only,
                });
                if !m.source.is_empty() {
                    mount["Source"] = json!(m.source);
                }
                mount
            })
            .collect();

        let mut host_config = spec.limits.host_config();
        host_config["CapDrop"] = json!(["ALL"]);
        host_config["SecurityOpt"] = json!(["no-new-privileges"]);
        host_config["NetworkMode"] = json!(spec.network_mode);
        host_config["Mounts"] = json!(mounts);

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let labels: HashMap<&str, &str> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let body = json!({
            "Image": spec.image,
            "Tty": true,
            "OpenStdin": true,
            "Env": env,
            "Labels": labels,
            "WorkingDir": spec.working_dir,
            "HostConfig": host_config,
        });

        let endpoint = format!("/containers/create?name={}", spec.name);
        let (status, bytes) = self.send(Method::POST, &endpoint, Some(&body)).await?;
        match status {
            s if s.is_success() => {
                let created: IdResponse = serde_json::from_slice(&bytes).map_err(transport)?;
                Ok(created.id)
            }
            StatusCode::CONFLICT => Err(RuntimeError::Conflict(spec.name.clone())),
            // 404 here means the image is missing, not the container
            s => Err(RuntimeError::Api {
                status: s.as_u16(),
                message: error_message(&bytes),
            }),
        }
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.call(Method::POST, &format!("/containers/{}/start", id), None, id)
            .await
            .map(|_| ())
    }

    async fn exec(&self, id: &str, argv: &[String], workdir: Option<&str>) -> Result<ExecOutput, RuntimeError> {
        let mut body = json!({
            "AttachStdout": true,
            "AttachStderr": true,
            "Tty": false,
            "Cmd": argv,
        });
        if let Some(dir) = workdir {
            body["WorkingDir"] = json!(dir);
        }

        let bytes = self
            .call(Method::POST, &format!("/containers/{}/exec", id), Some(&body), id)
            .await?;
        let exec: IdResponse = serde_json::from_slice(&bytes).map_err(transport)?;

        let raw = self
            .call(
                Method::POST,
                &format!("/exec/{}/start", exec.id),
                Some(&json!({ "Detach": false, "Tty": false })),
                id,
            )
            .await?;
        let (stdout, stderr) = demux(&raw);
        let exit_code = self.exec_exit_code(&exec.id).await?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    async fn is_running(&self, id: &str) -> Result<bool, RuntimeError> {
        let bytes = self
            .call(Method::GET, &format!("/containers/{}/json", id), None, id)
            .await?;
        let inspect: ContainerInspect = serde_json::from_slice(&bytes).map_err(transport)?;
        Ok(inspect.state.running)
    }

    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<(), RuntimeError> {
        self.call(
            Method::POST,
            &format!("/containers/{}/stop?t={}", id, timeout_secs),
            None,
            id,
        )
        .await
        .map(|_| ())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.call(
            Method::DELETE,
            &format!("/containers/{}?force={}&v=true", id, force),
            None,
            id,
        )
        .await
        .map(|_| ())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        let (status, bytes) = self
            .send(
                Method::POST,
                &format!("/containers/{}/rename?name={}", id, new_name),
                None,
            )
            .await?;
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(RuntimeError::Conflict(new_name.to_string())),
            s => Err(error_for(s, &bytes, id)),
        }
    }

    async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filters = json!({ "name": [name_prefix] }).to_string();
        let url = reqwest::Url::parse_with_params(
            "http://docker/containers/json",
            &[("all", "true"), ("filters", filters.as_str())],
        )
        .map_err(transport)?;
        let endpoint = format!("/containers/json?{}", url.query().unwrap_or_default());

        let bytes = self.call(Method::GET, &endpoint, None, name_prefix).await?;
        let entries: Vec<ListEntry> = serde_json::from_slice(&bytes).map_err(transport)?;

        // The daemon's name filter is a substring match
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let name = entry
                    .names
                    .iter()
                    .map(|n| n.trim_start_matches('/'))
                    .find(|n| n.starts_with(name_prefix))?
                    .to_string();
                Some(ContainerSummary {
                    id: entry.id,
                    name,
                    created_unix: entry.created,
                    running: entry.state == "running",
                })
            })
            .collect())
    }
}

fn transport(e: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::Transport(e.to_string())
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

fn error_for(status: StatusCode, body: &[u8], subject: &str) -> RuntimeError {
    let message = error_message(body);
    match status {
        StatusCode::NOT_FOUND => RuntimeError::NotFound(subject.to_string()),
        StatusCode::CONFLICT if message.contains("is not running") || message.contains("is paused") => {
            RuntimeError::NotRunning(subject.to_string())
        }
        StatusCode::CONFLICT => RuntimeError::Conflict(subject.to_string()),
        _ => RuntimeError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Split Docker's multiplexed exec stream into stdout and stderr.
///
/// Each frame is an 8-byte header `[stream, 0, 0, 0, len_be32]` followed by
/// `len` bytes of payload (stream 1 = stdout, 2 = stderr). A body that does
/// not start with a frame header is raw TTY output and goes to stdout.
pub(crate) fn demux(raw: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let framed = raw.len() >= 8 && raw[0] <= 2 && raw[1..4] == [0, 0, 0];
    if !framed {
        return (raw.to_vec(), Vec::new());
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut rest = raw;
    while rest.len() >= 8 {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        let payload = &rest[8..end];
        match rest[0] {
            2 => stderr.extend_from_slice(payload),
            _ => stdout.extend_from_slice(payload),
        }
        rest = &rest[end..];
    }
    (stdout, stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_demux_interleaved_frames() {
        let mut raw = frame(1, b"hello ");
        raw.extend(frame(2, b"oops\n"));
        raw.extend(frame(1, b"world\n"));

        let (stdout, stderr) = demux(&raw);
        assert_eq!(stdout, b"hello world\n");
        assert_eq!(stderr, b"oops\n");
    }

    #[test]
    fn test_demux_truncated_frame() {
        let mut raw = frame(1, b"complete");
        raw.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 10, b'p', b'a']);

        let (stdout, _) = demux(&raw);
        assert_eq!(stdout, b"completepa");
    }

    #[test]
    fn test_demux_raw_tty_output() {
        let (stdout, stderr) = demux(b"plain text output");
        assert_eq!(stdout, b"plain text output");
        assert!(stderr.is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let body = br#"{"message":"Container abc is not running"}"#;
        assert_eq!(
            error_for(StatusCode::CONFLICT, body, "abc"),
            RuntimeError::NotRunning("abc".to_string())
        );
        assert_eq!(
            error_for(StatusCode::NOT_FOUND, b"{}", "abc"),
            RuntimeError::NotFound("abc".to_string())
        );
        assert!(matches!(
            error_for(StatusCode::INTERNAL_SERVER_ERROR, br#"{"message":"boom"}"#, "abc"),
            RuntimeError::Api { status: 500, ref message } if message == "boom"
        ));
    }
}
