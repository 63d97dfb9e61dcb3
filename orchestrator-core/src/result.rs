//! The JSON-facing shapes returned to the BLE layer (§6). Kept separate from [`crate::domain`]
//! because the wire format keys by MAC string and uses a different status vocabulary than the
//! internal Gameplan does.

use serde::Serialize;
use std::collections::HashMap;

/// Per-entry outcome, reported alongside the Planner's decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryStatus {
    Connected,
    Skipped,
    Failed,
    AudioDegraded,
    NoController,
}

#[derive(Clone, Debug, Serialize)]
pub struct EntryResult {
    pub name: String,
    pub action: crate::domain::PlannedAction,
    #[serde(rename = "recommendedController")]
    pub recommended_controller: String,
    pub disconnect: Vec<String>,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct VirtualSinkResult {
    pub present: bool,
    #[serde(rename = "moduleId")]
    pub module_id: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApplyResult {
    pub entries: HashMap<String, EntryResult>,
    #[serde(rename = "virtualSink")]
    pub virtual_sink: VirtualSinkResult,
    pub loopbacks: HashMap<String, u32>,
}

impl ApplyResult {
    /// True iff any entry did not reach `connected` or `skipped` — the CLI maps this to exit
    /// code 4 when the cause was audio, per §6.
    pub fn any_audio_degraded(&self) -> bool {
        self.entries.values().any(|e| e.status == EntryStatus::AudioDegraded)
    }
}

/// The outcome of `disconnect_configuration`: §6 does not give this a wire schema (it is an
/// internal teardown op the binary reports informally), so this just mirrors what the Executor
/// actually did.
#[derive(Clone, Debug, Serialize)]
pub struct DisconnectResult {
    pub disconnected: Vec<String>,
    pub loopbacks_unloaded: usize,
    pub virtual_sink_unloaded: bool,
}
