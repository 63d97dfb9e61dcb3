//! The Connection Orchestrator: the control loop that, given a desired set of target speakers
//! and a pool of Bluetooth controllers, plans and executes the Bluetooth pair/trust/connect/
//! disconnect sequence and the accompanying audio-routing module lifecycle so that every
//! targeted speaker ends up connected on exactly one controller and every connected speaker is
//! wired into a single combined audio output.
//!
//! Both the Bluetooth and audio control planes are consumed as traits ([`bluez_control::BluetoothControl`],
//! [`audio_control::AudioControl`]), so the Planner and Executor here are fully exercised in
//! tests against deterministic in-memory fakes, with the real D-Bus/PulseAudio-class clients
//! wired in only by the `speaker-hub` binary.

mod domain;
mod error;
mod executor;
mod facade;
mod planner;
mod result;
mod snapshot;

pub use domain::{
    classify_role, AttachmentStatus, Configuration, Controller, ControllerRole, Gameplan,
    GameplanEntry, PlannedAction, Snapshot, Target, TargetRole,
};
pub use error::OrchestratorError;
pub use executor::{sink_name_for, AudioTopology, ExecutorConfig, TrackedSpeaker};
pub use facade::Orchestrator;
pub use planner::plan;
pub use result::{ApplyResult, DisconnectResult, EntryResult, EntryStatus, VirtualSinkResult};
pub use snapshot::build_snapshot;
