//! Scenario recorder: an optional tap that captures the request, the
//! streamed events, and the assembled response for later replay.
//!
//! Writes are asynchronous and best-effort; nothing in here may ever
//! affect request handling.

use std::{path::PathBuf, sync::Arc};

use jiff::Timestamp;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// The captured request, credentials already removed by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Headers, minus credential-bearing ones.
    pub headers: Vec<(String, String)>,
    /// Parsed JSON body.
    pub body: Value,
}

/// Headers never written to disk.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "x-api-key", "proxy-authorization", "cookie"];

impl RecordedRequest {
    /// Capture method, URL and headers, dropping credential material.
    pub fn capture(method: &http::Method, uri: &http::Uri, headers: &http::HeaderMap, body: Value) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| !CREDENTIAL_HEADERS.contains(&name.as_str()))
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or("<binary>").to_string(),
                )
            })
            .collect();

        RecordedRequest {
            method: method.to_string(),
            url: uri.to_string(),
            headers,
            body,
        }
    }
}

#[derive(Debug, Serialize)]
struct RecordedChunk {
    kind: String,
    data: Value,
}

#[derive(Debug, Serialize)]
struct Recording {
    scenario: String,
    request_id: String,
    recorded_at: Timestamp,
    request: RecordedRequest,
    chunks: Vec<RecordedChunk>,
    response: Option<Value>,
}

enum RecorderMessage {
    Chunk { kind: String, data: Value },
    Complete { response: Value },
}

/// Factory for per-request recorder handles.
pub struct Recorder {
    directory: PathBuf,
}

impl Recorder {
    /// Create a recorder writing under `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Recorder {
            directory: directory.into(),
        })
    }

    /// Open a recording for one request. The returned handle is cheap to
    /// clone into the stream pipeline; the file is written when the
    /// handle completes (or is dropped, for partial streams).
    pub fn start(&self, scenario: &str, request: RecordedRequest) -> RecorderHandle {
        let request_id = Uuid::new_v4().simple().to_string();
        let recorded_at = Timestamp::now();

        let file_name = format!(
            "{scenario}-{}-{request_id}.json",
            recorded_at.as_millisecond()
        );
        let path = self.directory.join(file_name);
        let directory = self.directory.clone();

        let (tx, mut rx) = mpsc::unbounded_channel::<RecorderMessage>();

        let scenario = scenario.to_string();

        tokio::spawn(async move {
            let mut chunks = Vec::new();
            let mut response = None;

            while let Some(message) = rx.recv().await {
                match message {
                    RecorderMessage::Chunk { kind, data } => chunks.push(RecordedChunk { kind, data }),
                    RecorderMessage::Complete { response: assembled } => {
                        response = Some(assembled);
                        break;
                    }
                }
            }

            let recording = Recording {
                scenario,
                request_id,
                recorded_at,
                request,
                chunks,
                response,
            };

            if let Err(error) = write_recording(&directory, &path, &recording).await {
                log::warn!("Failed to write recording {}: {error}", path.display());
            }
        });

        RecorderHandle { tx }
    }
}

async fn write_recording(
    directory: &std::path::Path,
    path: &std::path::Path,
    recording: &Recording,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(directory).await?;

    let json = serde_json::to_vec_pretty(recording)?;
    tokio::fs::write(path, json).await?;

    Ok(())
}

/// Handle feeding one in-flight recording.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<RecorderMessage>,
}

impl RecorderHandle {
    /// Record one streamed event. Errors are ignored: the writer task may
    /// already be gone, and recording never affects the request.
    pub fn chunk(&self, kind: &str, data: Value) {
        let _ = self.tx.send(RecorderMessage::Chunk {
            kind: kind.to_string(),
            data,
        });
    }

    /// Record the assembled response and flush the file.
    pub fn complete(&self, response: Value) {
        let _ = self.tx.send(RecorderMessage::Complete { response });
    }
}
