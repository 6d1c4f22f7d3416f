use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use capns_def::Cap;
use capns_plan::ResolvedArgument;
use capns_urn::CapUrn;

use crate::error::ExecError;

/// The backend contract: the sole way the engine invokes work.
///
/// Implemented in-process for local caps and over the packet/message
/// transport for plugin-hosted ones.
#[async_trait]
pub trait CapExecutor: Send + Sync {
    /// Execute a cap with resolved arguments and return its raw output.
    ///
    /// `preferred_cap` carries a routing preference when multiple
    /// providers match the URN.
    async fn execute_cap(
        &self,
        cap_urn: &CapUrn,
        arguments: &[ResolvedArgument],
        preferred_cap: Option<&str>,
    ) -> Result<Vec<u8>, ExecError>;

    /// Whether a provider is available for the cap.
    async fn has_cap(&self, cap_urn: &CapUrn) -> bool;

    /// Fetch the cap definition.
    async fn get_cap(&self, cap_urn: &CapUrn) -> Result<Cap, ExecError>;
}

/// Provides overridden default values for cap arguments, keyed by the
/// argument's media URN.
#[async_trait]
pub trait CapSettingsProvider: Send + Sync {
    async fn settings_for(
        &self,
        cap_urn: &CapUrn,
    ) -> Result<BTreeMap<String, serde_json::Value>, ExecError>;
}

/// Cooperative cancellation token passed in at execution start.
///
/// Cloning shares the flag; cancelling stops the executor from
/// dispatching further nodes and yields a partial result.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
