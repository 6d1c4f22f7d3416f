//! Engine glue: backends that bind the router and transport layers to
//! the plan executor's [`CapExecutor`] contract.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use capns_def::{Cap, Manifest};
use capns_exec::{encode_value, CapExecutor, ExecError};
use capns_plan::ResolvedArgument;
use capns_router::{CapCube, CapProvider, RouterError};
use capns_transport::{CommandSpec, PluginProcess};
use capns_urn::CapUrn;

/// Default per-request timeout for plugin-backed execution.
const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Render resolved arguments as a JSON request payload.
///
/// Argument bytes that are valid UTF-8 travel as strings; anything else
/// becomes an array of byte values.
fn arguments_payload(arguments: &[ResolvedArgument], preferred_cap: Option<&str>) -> Value {
    let args: Vec<Value> = arguments
        .iter()
        .map(|a| {
            let value = match std::str::from_utf8(&a.value) {
                Ok(text) => Value::String(text.to_string()),
                Err(_) => Value::Array(a.value.iter().map(|b| Value::from(*b)).collect()),
            };
            json!({"name": a.name, "value": value})
        })
        .collect();
    match preferred_cap {
        Some(preferred) => json!({"args": args, "preferred_cap": preferred}),
        None => json!({"args": args}),
    }
}

/// Turn a response payload into output bytes: an `output` field wins,
/// otherwise the whole payload is serialized.
fn payload_to_bytes(payload: &Value) -> Vec<u8> {
    match payload.get("output") {
        Some(output) => encode_value(output),
        None => encode_value(payload),
    }
}

/// In-process backend: routes every cap invocation through a
/// [`CapCube`] to whichever provider wins the specificity match.
pub struct CubeBackend {
    cube: CapCube,
}

impl CubeBackend {
    #[must_use]
    pub fn new(cube: CapCube) -> Self {
        Self { cube }
    }

    #[must_use]
    pub fn cube(&self) -> &CapCube {
        &self.cube
    }
}

#[async_trait]
impl CapExecutor for CubeBackend {
    async fn execute_cap(
        &self,
        cap_urn: &CapUrn,
        arguments: &[ResolvedArgument],
        preferred_cap: Option<&str>,
    ) -> Result<Vec<u8>, ExecError> {
        let handle = self.cube.can(cap_urn).map_err(|e| match e {
            RouterError::NotFound { urn } => ExecError::CapUnavailable { urn },
            other => ExecError::ExecutionFailed {
                node: cap_urn.to_string(),
                reason: other.to_string(),
            },
        })?;
        debug!(cap = %cap_urn, provider = handle.provider_name(), "executing via cube");
        handle
            .invoke(cap_urn, arguments_payload(arguments, preferred_cap))
            .await
            .map_err(|e| ExecError::ExecutionFailed {
                node: cap_urn.to_string(),
                reason: e.to_string(),
            })
    }

    async fn has_cap(&self, cap_urn: &CapUrn) -> bool {
        self.cube.accepts(cap_urn)
    }

    async fn get_cap(&self, cap_urn: &CapUrn) -> Result<Cap, ExecError> {
        self.cube
            .best(cap_urn)
            .map(|m| m.cap)
            .ok_or_else(|| ExecError::CapUnavailable {
                urn: cap_urn.to_string(),
            })
    }
}

/// Plugin backend: dispatches cap invocations to a spawned plugin over
/// the packet transport, with the plugin's manifest as the cap source.
pub struct PluginBackend {
    process: Mutex<PluginProcess>,
    manifest: Manifest,
    timeout: Duration,
}

impl PluginBackend {
    /// Spawn the plugin and wrap it as an executor backend.
    pub fn spawn(spec: &CommandSpec, manifest: Manifest) -> Result<Self, ExecError> {
        let process = PluginProcess::spawn(spec).map_err(|e| ExecError::ExecutionFailed {
            node: "plugin".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            process: Mutex::new(process),
            manifest,
            timeout: DEFAULT_PLUGIN_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn find_cap(&self, cap_urn: &CapUrn) -> Option<&Cap> {
        self.manifest.caps.iter().find(|c| c.accepts(cap_urn))
    }
}

#[async_trait]
impl CapExecutor for PluginBackend {
    async fn execute_cap(
        &self,
        cap_urn: &CapUrn,
        arguments: &[ResolvedArgument],
        preferred_cap: Option<&str>,
    ) -> Result<Vec<u8>, ExecError> {
        if self.find_cap(cap_urn).is_none() {
            return Err(ExecError::CapUnavailable {
                urn: cap_urn.to_string(),
            });
        }
        // One in-flight request per connection; the lock serializes.
        let mut process = self.process.lock().await;
        let response = process
            .request(
                &cap_urn.to_string(),
                arguments_payload(arguments, preferred_cap),
                self.timeout,
            )
            .await
            .map_err(|e| ExecError::ExecutionFailed {
                node: cap_urn.to_string(),
                reason: e.to_string(),
            })?;
        Ok(payload_to_bytes(&response.payload))
    }

    async fn has_cap(&self, cap_urn: &CapUrn) -> bool {
        self.find_cap(cap_urn).is_some()
    }

    async fn get_cap(&self, cap_urn: &CapUrn) -> Result<Cap, ExecError> {
        self.find_cap(cap_urn)
            .cloned()
            .ok_or_else(|| ExecError::CapUnavailable {
                urn: cap_urn.to_string(),
            })
    }
}

/// Provider for declaration-only registrations: routing and graph
/// discovery work, invocation reports that nothing is bound.
pub struct UnboundProvider;

#[async_trait]
impl CapProvider for UnboundProvider {
    fn name(&self) -> &str {
        "unbound"
    }

    async fn invoke(
        &self,
        request: &CapUrn,
        _payload: Value,
    ) -> Result<Vec<u8>, RouterError> {
        Err(RouterError::ProviderFailed {
            provider: "unbound".to_string(),
            urn: request.to_string(),
            reason: "cap is declared but no provider is bound".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capns_plan::ArgumentSource;
    use std::sync::Arc;

    struct ReverseProvider;

    #[async_trait]
    impl CapProvider for ReverseProvider {
        fn name(&self) -> &str {
            "reverse"
        }

        async fn invoke(
            &self,
            _request: &CapUrn,
            payload: Value,
        ) -> Result<Vec<u8>, RouterError> {
            let input = payload["args"][0]["value"].as_str().unwrap_or_default();
            Ok(input.chars().rev().collect::<String>().into_bytes())
        }
    }

    fn test_cube() -> CapCube {
        use capns_def::CapBuilder;
        let urn = CapUrn::parse(
            r#"cap:in="media:string;textable";out="media:string;textable";op=reverse"#,
        )
        .unwrap();
        let cap = CapBuilder::new(urn, "Reverse", "reverse").build().unwrap();
        let mut matrix = CapMatrix::new();
        matrix.register(cap, Arc::new(ReverseProvider));
        let mut cube = CapCube::new();
        cube.add("local", matrix);
        cube
    }

    use capns_router::CapMatrix;

    #[tokio::test]
    async fn test_cube_backend_executes() {
        let backend = CubeBackend::new(test_cube());
        let urn = CapUrn::parse(
            r#"cap:in="media:string;textable";out="media:string;textable";op=reverse"#,
        )
        .unwrap();
        assert!(backend.has_cap(&urn).await);
        let args = vec![ResolvedArgument::new(
            "input",
            b"abc".to_vec(),
            ArgumentSource::Slot,
        )];
        let out = backend.execute_cap(&urn, &args, None).await.unwrap();
        assert_eq!(out, b"cba");
    }

    #[tokio::test]
    async fn test_cube_backend_unknown_cap() {
        let backend = CubeBackend::new(test_cube());
        let urn = CapUrn::parse("cap:in=media:pdf;out=media:epub").unwrap();
        assert!(!backend.has_cap(&urn).await);
        let err = backend.execute_cap(&urn, &[], None).await.unwrap_err();
        assert!(matches!(err, ExecError::CapUnavailable { .. }));
    }

    #[test]
    fn test_arguments_payload_shapes() {
        let args = vec![
            ResolvedArgument::new("text", b"hello".to_vec(), ArgumentSource::Literal),
            ResolvedArgument::new("blob", vec![0xFF, 0x00], ArgumentSource::InputFile),
        ];
        let payload = arguments_payload(&args, Some("cap:in=media:;out=media:"));
        assert_eq!(payload["args"][0]["value"], "hello");
        assert!(payload["args"][1]["value"].is_array());
        assert_eq!(payload["preferred_cap"], "cap:in=media:;out=media:");
    }

    #[test]
    fn test_payload_to_bytes_prefers_output_field() {
        assert_eq!(
            payload_to_bytes(&json!({"output": "result text"})),
            b"result text"
        );
        assert_eq!(payload_to_bytes(&json!({"other": 1})), br#"{"other":1}"#);
    }
}
