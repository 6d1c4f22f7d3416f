use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::message::{ErrorPayload, Message, MessageType};
use crate::packet::{PacketReader, PacketWriter};

/// Specification for a plugin command to execute.
///
/// Arguments are discrete `OsString` elements, never shell strings, so
/// nothing a cap argument contains can be interpreted by a shell.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<OsString, OsString>>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Convert into a `tokio::process::Command` with piped stdio.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &self.env {
            for (key, value) in env {
                cmd.env(key, value);
            }
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }
}

/// One progress event surfaced during a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: String,
    pub percent: Option<u8>,
    pub message: Option<String>,
}

/// The outcome of one completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginResponse {
    /// Final payload: the `cap_response` payload, or the `stream_end`
    /// payload for streamed replies.
    pub payload: Value,
    /// Stream chunks in arrival order; empty for single responses.
    pub chunks: Vec<Value>,
    /// Progress events in arrival order.
    pub progress: Vec<ProgressEvent>,
}

/// A message-level conversation over a pair of packet streams.
///
/// One request is in flight at a time; the `&mut self` receiver enforces
/// the no-interleaving rule. Every reply must carry the request's id;
/// anything else is a correlation failure that closes the conversation.
pub struct PluginConnection<R, W> {
    reader: PacketReader<R>,
    writer: PacketWriter<W>,
}

impl<R, W> PluginConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: PacketReader::new(reader),
            writer: PacketWriter::new(writer),
        }
    }

    /// Send a cap request and drive the conversation to its terminal
    /// message.
    pub async fn request(
        &mut self,
        cap_urn: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<PluginResponse, TransportError> {
        let request = Message::cap_request(cap_urn, payload);
        match tokio::time::timeout(timeout, self.converse(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn converse(&mut self, request: Message) -> Result<PluginResponse, TransportError> {
        let id = request.id.clone();
        self.writer.write(&request.to_bytes()?).await?;
        debug!(%id, cap = request.cap.as_deref().unwrap_or(""), "sent cap request");

        let mut acked = false;
        let mut chunks: Vec<Value> = Vec::new();
        let mut progress: Vec<ProgressEvent> = Vec::new();

        loop {
            let packet = self
                .reader
                .read()
                .await?
                .ok_or(TransportError::ConnectionClosed)?;
            let message = Message::from_bytes(&packet)?;

            // Idle markers announce readiness between requests and are
            // not correlated.
            if message.is_idle() {
                continue;
            }
            if message.id != id {
                return Err(TransportError::CorrelationMismatch {
                    expected: id,
                    actual: message.id,
                });
            }

            match message.message_type {
                MessageType::Ack => {
                    acked = true;
                }
                MessageType::Progress => {
                    progress.push(ProgressEvent {
                        stage: message.payload["stage"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        percent: message.payload["percent"].as_u64().map(|p| p as u8),
                        message: message.payload["message"].as_str().map(str::to_string),
                    });
                }
                MessageType::CapResponse => {
                    if !acked {
                        warn!(%id, "cap_response arrived without a preceding ack");
                    }
                    return Ok(PluginResponse {
                        payload: message.payload,
                        chunks,
                        progress,
                    });
                }
                MessageType::StreamChunk => {
                    chunks.push(message.payload);
                }
                MessageType::StreamEnd => {
                    return Ok(PluginResponse {
                        payload: message.payload,
                        chunks,
                        progress,
                    });
                }
                MessageType::Error => {
                    let payload = ErrorPayload::from_value(&message.payload);
                    return Err(TransportError::Remote {
                        code: payload.code,
                        message: payload.message,
                        details: payload.details,
                    });
                }
                MessageType::CapRequest | MessageType::Idle => {
                    return Err(TransportError::ProtocolViolation {
                        reason: format!("unexpected {:?} from plugin", message.message_type),
                    });
                }
            }
        }
    }
}

/// A spawned plugin process with its packet connection over
/// stdin/stdout.
pub struct PluginProcess {
    child: Child,
    connection: PluginConnection<ChildStdout, ChildStdin>,
}

impl PluginProcess {
    /// Spawn the plugin described by `spec` with piped stdio.
    pub fn spawn(spec: &CommandSpec) -> Result<Self, TransportError> {
        let mut child = spec
            .to_command()
            .spawn()
            .map_err(|e| TransportError::Spawn {
                program: spec.program.to_string_lossy().into_owned(),
                reason: e.to_string(),
            })?;
        let stdin = child.stdin.take().ok_or_else(|| TransportError::Spawn {
            program: spec.program.to_string_lossy().into_owned(),
            reason: "stdin not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            program: spec.program.to_string_lossy().into_owned(),
            reason: "stdout not piped".to_string(),
        })?;
        Ok(Self {
            child,
            connection: PluginConnection::new(stdout, stdin),
        })
    }

    /// Send a request to the plugin and await its terminal reply.
    pub async fn request(
        &mut self,
        cap_urn: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<PluginResponse, TransportError> {
        self.connection.request(cap_urn, payload, timeout).await
    }

    /// Terminate the plugin process.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        self.child.kill().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{read_packet, write_packet};
    use serde_json::json;

    /// Run a scripted plugin on the far side of a duplex pipe: read one
    /// request, then send each reply produced by `script`.
    fn scripted_plugin(
        script: impl Fn(Message) -> Vec<Message> + Send + 'static,
    ) -> PluginConnection<tokio::io::DuplexStream, tokio::io::DuplexStream> {
        let (host_read, mut plugin_write) = tokio::io::duplex(64 * 1024);
        let (mut plugin_read, host_write) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            if let Ok(Some(packet)) = read_packet(&mut plugin_read).await {
                let request = Message::from_bytes(&packet).unwrap();
                for reply in script(request) {
                    write_packet(&mut plugin_write, &reply.to_bytes().unwrap())
                        .await
                        .unwrap();
                }
            }
        });
        PluginConnection::new(host_read, host_write)
    }

    const IDENTITY: &str = "cap:in=media:;out=media:";

    #[tokio::test]
    async fn test_request_response_conversation() {
        // S6: ack, progress, then a correlated cap_response.
        let mut connection = scripted_plugin(|request| {
            vec![
                Message::ack(&request.id),
                Message::progress(&request.id, "working", Some(50), None),
                Message::cap_response(&request.id, json!({"result": "done"})),
            ]
        });
        let response = connection
            .request(IDENTITY, json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.payload, json!({"result": "done"}));
        assert_eq!(response.progress.len(), 1);
        assert_eq!(response.progress[0].stage, "working");
        assert_eq!(response.progress[0].percent, Some(50));
        assert!(response.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_conversation() {
        let mut connection = scripted_plugin(|request| {
            vec![
                Message::ack(&request.id),
                Message::stream_chunk(&request.id, json!({"n": 1})),
                Message::stream_chunk(&request.id, json!({"n": 2})),
                Message::stream_end(&request.id, json!({"total": 2})),
            ]
        });
        let response = connection
            .request(IDENTITY, json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.chunks, vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(response.payload, json!({"total": 2}));
    }

    #[tokio::test]
    async fn test_correlation_mismatch() {
        let mut connection = scripted_plugin(|_request| {
            vec![Message::ack("some-other-id")]
        });
        let err = connection
            .request(IDENTITY, json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::CorrelationMismatch { .. }));
    }

    #[tokio::test]
    async fn test_error_reply() {
        let mut connection = scripted_plugin(|request| {
            vec![
                Message::ack(&request.id),
                Message::error(&request.id, "render_failed", "could not open file"),
            ]
        });
        let err = connection
            .request(IDENTITY, json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            TransportError::Remote { code, message, .. } => {
                assert_eq!(code, "render_failed");
                assert_eq!(message, "could not open file");
            }
            other => panic!("expected remote error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_idle_markers_are_skipped() {
        let mut connection = scripted_plugin(|request| {
            vec![
                Message::idle(),
                Message::ack(&request.id),
                Message::cap_response(&request.id, json!({})),
            ]
        });
        let response = connection
            .request(IDENTITY, json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.payload, json!({}));
    }

    #[tokio::test]
    async fn test_timeout() {
        // Plugin that never answers.
        let mut connection = scripted_plugin(|_request| Vec::new());
        let err = connection
            .request(IDENTITY, json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Timeout { .. } | TransportError::ConnectionClosed
        ));
    }

    #[test]
    fn test_command_spec_argv_style() {
        let spec = CommandSpec::new("my-plugin")
            .arg("--mode")
            .arg("packet")
            .args(["--verbose"])
            .cwd("/tmp")
            .env("CAPNS_PLUGIN", "1");
        assert_eq!(spec.program, OsString::from("my-plugin"));
        assert_eq!(spec.args.len(), 3);
        assert_eq!(spec.cwd.as_deref(), Some(std::path::Path::new("/tmp")));
        // Shell metacharacters stay literal.
        let spec = CommandSpec::new("p").arg("$(whoami)").arg("a;b|c");
        assert_eq!(spec.args[0], OsString::from("$(whoami)"));
        assert_eq!(spec.args[1], OsString::from("a;b|c"));
    }
}
