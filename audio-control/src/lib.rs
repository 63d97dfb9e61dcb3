//! An async wrapper around the module-management contract of a PulseAudio-class audio server:
//! loading and unloading null sinks and loopbacks, introspecting sinks and modules, and toggling
//! sink suspend state.
//!
//! Start by creating a [`pulse::PulseAudioControl`]. For tests, [`fake::FakeAudioControl`]
//! implements the same [`AudioControl`] trait without touching a real server.

pub mod fake;
mod module;
pub mod pulse;

pub use module::{ModuleId, ModuleInfo, SinkInfo, SinkState};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Poll period for [`AudioControl::ensure_running`]: re-check `ping` every 2 seconds.
pub const ENSURE_RUNNING_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Delay between [`AudioControl::load_loopback`] retries.
pub const LOOPBACK_RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Number of attempts [`AudioControl::load_loopback`] makes before giving up.
pub const LOOPBACK_RETRY_ATTEMPTS: u32 = 3;

/// An error carrying out an audio server operation.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Could not establish or maintain a connection to the audio server.
    #[error("failed to connect to audio server: {0}")]
    ConnectionFailed(String),
    /// The audio server connection dropped out of the ready state mid-operation.
    #[error("audio server connection is not ready")]
    NotReady,
    /// A module-load or introspection call was rejected by the server.
    #[error("audio server operation failed: {0}")]
    OperationFailed(String),
    /// No module with the given id is currently loaded.
    #[error("no such module: {0}")]
    NoSuchModule(ModuleId),
    /// `load_loopback` exhausted its retry budget without a numeric module id.
    #[error("load_loopback failed after {attempts} attempts")]
    LoopbackLoadFailed { attempts: u32 },
    /// The blocking worker task driving the PulseAudio mainloop was lost.
    #[error("audio worker task failed: {0}")]
    WorkerLost(#[from] tokio::task::JoinError),
}

/// The capability interface the Executor (in `orchestrator-core`) drives audio topology through.
/// Implemented for real by [`pulse::PulseAudioControl`] and, for tests, by
/// [`fake::FakeAudioControl`].
#[async_trait]
pub trait AudioControl: Send + Sync {
    /// Load a `module-null-sink` named `name`, or return its existing module id if one is
    /// already loaded under that name.
    async fn load_null_sink(&self, name: &str) -> Result<ModuleId, AudioError>;

    /// Load a `module-loopback` routing `source_monitor` into `sink_name` at `latency_ms`, with
    /// up to [`LOOPBACK_RETRY_ATTEMPTS`] attempts, [`LOOPBACK_RETRY_INTERVAL`] apart.
    async fn load_loopback(
        &self,
        source_monitor: &str,
        sink_name: &str,
        latency_ms: u32,
    ) -> Result<ModuleId, AudioError>;

    async fn unload_module(&self, module_id: ModuleId) -> Result<(), AudioError>;

    async fn list_sinks(&self) -> Result<Vec<SinkInfo>, AudioError>;
    async fn list_modules(&self) -> Result<Vec<ModuleInfo>, AudioError>;

    async fn unsuspend_sink(&self, name: &str) -> Result<(), AudioError>;

    /// Unload every currently loaded module whose name equals `name`, returning the count
    /// unloaded. Used to sweep `module-suspend-on-idle` after wiring a loopback (§4.6 Phase C).
    async fn unload_all_matching(&self, name: &str) -> Result<usize, AudioError>;

    /// True iff the audio server answers introspection calls.
    async fn ping(&self) -> Result<bool, AudioError>;

    async fn set_sink_volume(&self, sink_name: &str, volume_percent: u8) -> Result<(), AudioError>;

    /// Reload a loopback module at a new latency: `unload_module(module_id)` (best-effort) then
    /// `load_loopback(source_monitor, sink_name, latency_ms)`. Briefly drops audio for the
    /// affected speaker; see the per-speaker parameter update notes this adapter is driven by.
    async fn set_loopback_latency(
        &self,
        module_id: ModuleId,
        source_monitor: &str,
        sink_name: &str,
        latency_ms: u32,
    ) -> Result<ModuleId, AudioError> {
        let _ = self.unload_module(module_id).await;
        self.load_loopback(source_monitor, sink_name, latency_ms)
            .await
    }

    /// Poll [`AudioControl::ping`] every [`ENSURE_RUNNING_POLL_INTERVAL`] until it succeeds or
    /// `timeout` elapses.
    async fn ensure_running(&self, timeout: Duration) -> Result<(), AudioError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.ping().await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AudioError::ConnectionFailed(
                    "audio server did not become ready in time".to_owned(),
                ));
            }
            tokio::time::sleep(ENSURE_RUNNING_POLL_INTERVAL.min(deadline - tokio::time::Instant::now()))
                .await;
        }
    }
}
