//! Workflow engine client speaking a small JSON-over-HTTP protocol.
//!
//! `POST {base}/executions` with `{"name", "input"}` starts an execution and
//! answers `{"execution_id"}`. `GET {base}/executions/{id}` answers
//! `{"status", "output"?}`; any further fields are kept in the raw record.

use async_trait::async_trait;
use at_types::{DispatchError, DispatchResult, ExecutionStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::workflow::{ExecutionDescription, WorkflowEngine};

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    name: &'a str,
    input: String,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    execution_id: String,
}

/// HTTP client for a remote workflow engine.
#[derive(Debug, Clone)]
pub struct HttpWorkflowEngine {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl HttpWorkflowEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Client with a per-request timeout, so a stuck connection surfaces as a
    /// transport error instead of hanging the poll loop.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (e.g. no TLS backend).
    pub fn with_request_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    fn executions_url(&self) -> String {
        format!("{}/executions", self.base_url)
    }

    /// Split a describe response into status, output, and the raw record.
    fn parse_description(
        execution_id: &str,
        raw: serde_json::Value,
    ) -> DispatchResult<ExecutionDescription> {
        let status = raw
            .get("status")
            .and_then(|s| s.as_str())
            .map(ExecutionStatus::parse)
            .ok_or_else(|| DispatchError::Transport {
                execution_id: execution_id.to_string(),
                message: format!("describe response has no status field: {raw}"),
            })?;

        let output = match raw.get("output") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(ExecutionDescription {
            status,
            output,
            raw,
        })
    }
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn start(&self, name: &str, payload: String) -> DispatchResult<String> {
        let submission_failed = |message: String| DispatchError::SubmissionFailed {
            name: name.to_string(),
            message,
        };

        let response = self
            .client
            .post(self.executions_url())
            .json(&StartRequest {
                name,
                input: payload,
            })
            .send()
            .await
            .map_err(|e| submission_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(submission_failed(format!("HTTP {status}: {body}")));
        }

        let body: StartResponse = response
            .json()
            .await
            .map_err(|e| submission_failed(format!("invalid start response: {e}")))?;

        debug!(execution_id = %body.execution_id, name, "execution started");
        Ok(body.execution_id)
    }

    async fn describe(&self, execution_id: &str) -> DispatchResult<ExecutionDescription> {
        let transport = |message: String| DispatchError::Transport {
            execution_id: execution_id.to_string(),
            message,
        };

        let response = self
            .client
            .get(format!("{}/{}", self.executions_url(), execution_id))
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(transport(format!("HTTP {status}: {body}")));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport(format!("invalid describe response: {e}")))?;

        Self::parse_description(execution_id, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned JSON bodies: POST requests get `start_body`, everything
    /// else gets `describe_body`.
    async fn serve(start_body: &'static str, describe_body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let request = read_request(&mut socket).await;
                    let body = if request.starts_with("POST") {
                        start_body
                    } else {
                        describe_body
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{addr}")
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buffer = [0u8; 1024];
        loop {
            let n = match socket.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            data.extend_from_slice(&buffer[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (key, value) = line.split_once(':')?;
                        key.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    #[tokio::test]
    async fn start_returns_execution_id() {
        let url = serve(r#"{"execution_id":"exec-42"}"#, r#"{"status":"RUNNING"}"#).await;
        let engine = HttpWorkflowEngine::new(format!("{url}/"));
        let id = engine.start("run-1", "[]".to_string()).await.unwrap();
        assert_eq!(id, "exec-42");
    }

    #[tokio::test]
    async fn describe_parses_status_and_output() {
        let url = serve(
            r#"{"execution_id":"exec-42"}"#,
            r#"{"status":"SUCCEEDED","output":"[]","startDate":"2026-01-01"}"#,
        )
        .await;
        let engine = HttpWorkflowEngine::new(url);
        let desc = engine.describe("exec-42").await.unwrap();
        assert_eq!(desc.status, ExecutionStatus::Succeeded);
        assert_eq!(desc.output.as_deref(), Some("[]"));
        assert_eq!(desc.raw["startDate"], "2026-01-01");
    }

    #[tokio::test]
    async fn unreachable_engine_fails_submission() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = HttpWorkflowEngine::new(format!("http://{addr}"));
        let err = engine.start("run-1", "[]".to_string()).await.unwrap_err();
        assert!(matches!(err, DispatchError::SubmissionFailed { .. }));
    }

    #[tokio::test]
    async fn request_timeout_bounds_a_silent_engine() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold connections without ever answering.
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let engine =
            HttpWorkflowEngine::with_request_timeout(format!("http://{addr}"), Duration::from_millis(200))
                .unwrap();
        let started = std::time::Instant::now();
        let err = engine.start("run-1", "[]".to_string()).await.unwrap_err();
        assert!(matches!(err, DispatchError::SubmissionFailed { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));

        let err = engine.describe("exec-1").await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport { .. }));
    }

    #[test]
    fn structured_output_is_reserialized() {
        let raw = serde_json::json!({"status": "SUCCEEDED", "output": [{"a": 1}]});
        let desc = HttpWorkflowEngine::parse_description("e", raw).unwrap();
        assert_eq!(desc.output.as_deref(), Some(r#"[{"a":1}]"#));
    }

    #[test]
    fn missing_status_is_a_transport_error() {
        let raw = serde_json::json!({"output": "[]"});
        let err = HttpWorkflowEngine::parse_description("e", raw).unwrap_err();
        assert!(matches!(err, DispatchError::Transport { .. }));
    }
}
