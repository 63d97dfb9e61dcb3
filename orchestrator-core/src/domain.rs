//! The orchestrator's own data model: controllers classified by role, targets the phone wants
//! playing, and the Gameplan the Planner hands the Executor.

use bluez_control::{ControllerId, ControllerInfo, MacAddress};
use std::collections::HashMap;

/// Whether a controller is reserved for the BLE control channel or free for speaker audio.
/// Exactly one controller known to the daemon is `ReservedBle`; the Planner never assigns it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControllerRole {
    ReservedBle,
    Audio,
}

/// A controller as seen by the orchestrator: the daemon's [`ControllerInfo`] plus the role
/// classification this crate owns (the daemon itself has no notion of "reserved").
#[derive(Clone, Debug)]
pub struct Controller {
    pub info: ControllerInfo,
    pub role: ControllerRole,
}

/// Classify a controller against the configured reserved-controller identifier, which may name
/// either the controller's MAC address or its `hciN` id.
pub fn classify_role(info: &ControllerInfo, reserved_controller: &str) -> ControllerRole {
    let mac_matches = info.mac_address.to_string().eq_ignore_ascii_case(reserved_controller);
    let id_matches = info.id.to_string().eq_ignore_ascii_case(reserved_controller);
    if mac_matches || id_matches {
        ControllerRole::ReservedBle
    } else {
        ControllerRole::Audio
    }
}

/// Whether a target is a playback sink (gets a loopback) or a source, paired/connected like any
/// other target but never wrapped in a loopback (e.g. a phone acting as a microphone).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetRole {
    Sink,
    Source,
}

/// A desired speaker the phone wants playing.
#[derive(Clone, Debug)]
pub struct Target {
    pub mac: MacAddress,
    pub name: String,
    pub volume: Option<u8>,
    pub latency_ms: Option<u32>,
    pub role: TargetRole,
}

impl Target {
    pub fn new(mac: MacAddress, name: impl Into<String>) -> Self {
        Target {
            mac,
            name: name.into(),
            volume: None,
            latency_ms: None,
            role: TargetRole::Sink,
        }
    }
}

/// An ordered set of targets the phone wants playing, plus an id and name used only for logging.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config_id: String,
    pub config_name: String,
    pub targets: Vec<Target>,
}

/// The decision the Planner made for one target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
pub enum PlannedAction {
    NoAction,
    ConnectExistingPair,
    PairAndConnect,
    NoFreeController,
}

/// The Planner's decision for one target: what state it is currently in, and what the Executor
/// should do about it.
#[derive(Clone, Debug)]
pub struct GameplanEntry {
    pub mac: MacAddress,
    pub name: String,
    pub role: TargetRole,
    pub volume: Option<u8>,
    pub latency_ms: Option<u32>,
    pub paired_on: Vec<ControllerId>,
    pub connected_on: Vec<ControllerId>,
    pub disconnect: Vec<ControllerId>,
    pub action: PlannedAction,
    pub recommended_controller: Option<ControllerId>,
}

/// The Planner's output: a per-target entry, in the target set's iteration order. Kept as a
/// `Vec` rather than a map so that order — which the Planner's greedy assignment depends on and
/// which the Executor replays in Phase B — is part of the type rather than incidental to an
/// iterator.
#[derive(Clone, Debug, Default)]
pub struct Gameplan {
    pub entries: Vec<GameplanEntry>,
}

impl Gameplan {
    pub fn get(&self, mac: MacAddress) -> Option<&GameplanEntry> {
        self.entries.iter().find(|entry| entry.mac == mac)
    }
}

/// Ground-truth pairing/connection state of one (controller, device) pair, as last observed by
/// the Inventory Snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttachmentStatus {
    pub paired: bool,
    pub connected: bool,
    pub name: Option<String>,
}

/// An immutable snapshot of the Bluetooth world, built once per `apply_configuration` call.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub controllers: Vec<Controller>,
    pub attachments: HashMap<(ControllerId, MacAddress), AttachmentStatus>,
}

impl Snapshot {
    /// The audio-role controller pool the Planner draws from: every known controller except the
    /// one reserved for BLE, in the daemon's enumeration order.
    pub fn controller_pool(&self) -> Vec<ControllerId> {
        self.controllers
            .iter()
            .filter(|c| c.role == ControllerRole::Audio)
            .map(|c| c.info.id.clone())
            .collect()
    }

    pub fn controller_mac(&self, id: &ControllerId) -> Option<MacAddress> {
        self.controllers
            .iter()
            .find(|c| &c.info.id == id)
            .map(|c| c.info.mac_address)
    }

    fn status(&self, controller: &ControllerId, mac: MacAddress) -> Option<&AttachmentStatus> {
        self.attachments.get(&(controller.clone(), mac))
    }

    pub fn is_paired(&self, controller: &ControllerId, mac: MacAddress) -> bool {
        self.status(controller, mac).map(|s| s.paired).unwrap_or(false)
    }

    pub fn is_connected(&self, controller: &ControllerId, mac: MacAddress) -> bool {
        self.status(controller, mac).map(|s| s.connected).unwrap_or(false)
    }
}
