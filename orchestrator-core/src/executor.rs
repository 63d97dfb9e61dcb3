//! C5: applies a Gameplan through the Bluetooth and Audio control adapters, enforcing ordering,
//! retries and verification, in the fixed phases of §4.5.
//!
//! Policy: never let one target's failure block another's. The Executor always walks every
//! target; failures accumulate into that target's own outcome. Only two things short-circuit
//! Phase C for everyone: the audio server being unreachable (§7 `AudioUnavailable`).

use crate::domain::{Gameplan, PlannedAction, Snapshot, TargetRole};
use crate::result::{ApplyResult, EntryResult, EntryStatus, VirtualSinkResult};
use audio_control::{AudioControl, ModuleId};
use bluez_control::{BluetoothControl, ControllerId, DeviceFilter, DeviceFlag, MacAddress, WaitOutcome};
use std::collections::HashMap;
use std::time::Duration;

/// The named, configurable sleeps and timeouts of §4.5/§4.8, pulled out of the Executor body
/// rather than left as bare literals scattered through it, so a deployment can tune them without
/// a rebuild (REDESIGN FLAGS).
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub wait_timeout: Duration,
    pub scan_settle: Duration,
    pub pair_settle: Duration,
    pub post_connect_settle: Duration,
    pub disconnect_settle: Duration,
    pub audio_ready_timeout: Duration,
    pub virtual_sink_name: String,
    pub default_latency_ms: u32,
    pub suspend_module_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            wait_timeout: Duration::from_secs(30),
            scan_settle: Duration::from_secs(2),
            pair_settle: Duration::from_secs(5),
            post_connect_settle: Duration::from_secs(3),
            disconnect_settle: Duration::from_millis(500),
            audio_ready_timeout: Duration::from_secs(20),
            virtual_sink_name: "virtual_out".to_owned(),
            default_latency_ms: 100,
            suspend_module_name: "module-suspend-on-idle".to_owned(),
        }
    }
}

/// One tracked speaker in the audio topology: the sink name the loopback targets, and the
/// loopback module id if one was successfully loaded. Owned by the facade and kept across apply
/// calls, since the virtual sink and loopbacks outlive a single `apply_configuration`.
#[derive(Clone, Debug)]
pub struct TrackedSpeaker {
    pub sink_name: String,
    pub loopback_module: Option<ModuleId>,
}

#[derive(Clone, Debug, Default)]
pub struct AudioTopology {
    pub virtual_sink: Option<ModuleId>,
    pub speakers: HashMap<MacAddress, TrackedSpeaker>,
}

#[derive(Clone, Debug)]
struct PhaseBOutcome {
    status: EntryStatus,
    reason: Option<String>,
}

impl PhaseBOutcome {
    fn connected() -> Self {
        PhaseBOutcome {
            status: EntryStatus::Connected,
            reason: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        PhaseBOutcome {
            status: EntryStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

pub fn sink_name_for(mac: MacAddress) -> String {
    format!("bluez_sink.{}.a2dp_sink", mac.path_segment())
}

pub struct Executor<'a, B: ?Sized, A: ?Sized> {
    bluetooth: &'a B,
    audio: &'a A,
    config: &'a ExecutorConfig,
}

impl<'a, B: BluetoothControl + ?Sized, A: AudioControl + ?Sized> Executor<'a, B, A> {
    pub fn new(bluetooth: &'a B, audio: &'a A, config: &'a ExecutorConfig) -> Self {
        Executor { bluetooth, audio, config }
    }

    pub async fn execute(
        &self,
        gameplan: &Gameplan,
        snapshot: &Snapshot,
        topology: &mut AudioTopology,
    ) -> ApplyResult {
        self.run_phase_a(gameplan).await;
        let mut outcomes = self.run_phase_b(gameplan).await;
        self.run_phase_c(gameplan, &mut outcomes, topology).await;
        build_apply_result(gameplan, &outcomes, topology, snapshot)
    }

    async fn run_phase_a(&self, gameplan: &Gameplan) {
        for entry in &gameplan.entries {
            for ctrl in &entry.disconnect {
                if let Err(err) = self.bluetooth.select(ctrl).await {
                    log::warn!("phase A: select({ctrl}) failed for {}: {err}", entry.mac);
                    continue;
                }
                if let Err(err) = self.bluetooth.disconnect(ctrl, entry.mac).await {
                    log::warn!("phase A: disconnect({}, {ctrl}) failed: {err}", entry.mac);
                }
                tokio::time::sleep(self.config.disconnect_settle).await;
            }
        }
    }

    async fn run_phase_b(&self, gameplan: &Gameplan) -> HashMap<MacAddress, PhaseBOutcome> {
        let mut outcomes = HashMap::new();
        for entry in &gameplan.entries {
            log::info!("phase B: {} -> {:?}", entry.mac, entry.action);
            let outcome = match entry.action {
                PlannedAction::NoFreeController => PhaseBOutcome {
                    status: EntryStatus::NoController,
                    reason: Some("no free controller available".to_owned()),
                },
                PlannedAction::NoAction => PhaseBOutcome {
                    status: EntryStatus::Skipped,
                    reason: None,
                },
                PlannedAction::ConnectExistingPair => {
                    let ctrl = entry.recommended_controller.as_ref().expect("ConnectExistingPair always has a recommended controller");
                    self.connect_existing_pair(ctrl, entry.mac).await
                }
                PlannedAction::PairAndConnect => {
                    let ctrl = entry.recommended_controller.as_ref().expect("PairAndConnect always has a recommended controller");
                    self.pair_and_connect(ctrl, entry.mac).await
                }
            };
            outcomes.insert(entry.mac, outcome);
        }
        outcomes
    }

    async fn connect_existing_pair(&self, ctrl: &ControllerId, mac: MacAddress) -> PhaseBOutcome {
        if let Err(err) = self.bluetooth.select(ctrl).await {
            return PhaseBOutcome::failed(format!("select failed: {err}"));
        }
        let _ = self.bluetooth.scan(ctrl, true).await;
        tokio::time::sleep(self.config.scan_settle).await;
        let _ = self.bluetooth.scan(ctrl, false).await;
        if let Err(err) = self.bluetooth.connect(ctrl, mac).await {
            return PhaseBOutcome::failed(format!("connect failed: {err}"));
        }
        if self.verify_connected(ctrl, mac).await {
            PhaseBOutcome::connected()
        } else {
            PhaseBOutcome::failed("device did not appear connected")
        }
    }

    async fn pair_and_connect(&self, ctrl: &ControllerId, mac: MacAddress) -> PhaseBOutcome {
        if let Err(err) = self.bluetooth.select(ctrl).await {
            return PhaseBOutcome::failed(format!("select failed: {err}"));
        }
        let _ = self.bluetooth.scan(ctrl, true).await;
        tokio::time::sleep(self.config.pair_settle).await;

        if let Err(err) = self.bluetooth.pair(ctrl, mac).await {
            let _ = self.bluetooth.scan(ctrl, false).await;
            return PhaseBOutcome::failed(format!("pair failed: {err}"));
        }
        let already_paired = self
            .bluetooth
            .device_info(ctrl, mac)
            .await
            .map(|status| status.paired)
            .unwrap_or(false);
        if !already_paired {
            match self.bluetooth.wait_for_flag(ctrl, mac, DeviceFlag::Paired, self.config.wait_timeout).await {
                Ok(WaitOutcome::Reached) => {}
                Ok(WaitOutcome::TimedOut) | Err(_) => {
                    let _ = self.bluetooth.scan(ctrl, false).await;
                    return PhaseBOutcome::failed("pairing timeout");
                }
            }
        }

        if let Err(err) = self.bluetooth.trust(ctrl, mac).await {
            let _ = self.bluetooth.scan(ctrl, false).await;
            return PhaseBOutcome::failed(format!("trust failed: {err}"));
        }
        if matches!(
            self.bluetooth.wait_for_flag(ctrl, mac, DeviceFlag::Trusted, self.config.wait_timeout).await,
            Ok(WaitOutcome::TimedOut) | Err(_)
        ) {
            let _ = self.bluetooth.scan(ctrl, false).await;
            return PhaseBOutcome::failed("trust timeout");
        }

        if let Err(err) = self.bluetooth.connect(ctrl, mac).await {
            let _ = self.bluetooth.scan(ctrl, false).await;
            return PhaseBOutcome::failed(format!("connect failed: {err}"));
        }
        tokio::time::sleep(self.config.post_connect_settle).await;
        let connected = self.verify_connected(ctrl, mac).await;
        let _ = self.bluetooth.scan(ctrl, false).await;

        if connected {
            PhaseBOutcome::connected()
        } else {
            PhaseBOutcome::failed("device did not appear connected")
        }
    }

    async fn verify_connected(&self, ctrl: &ControllerId, mac: MacAddress) -> bool {
        self.bluetooth
            .list_devices(ctrl, DeviceFilter::Connected)
            .await
            .map(|devices| devices.iter().any(|d| d.mac_address == mac))
            .unwrap_or(false)
    }

    async fn run_phase_c(
        &self,
        gameplan: &Gameplan,
        outcomes: &mut HashMap<MacAddress, PhaseBOutcome>,
        topology: &mut AudioTopology,
    ) {
        if self.audio.ensure_running(self.config.audio_ready_timeout).await.is_err() {
            log::warn!("phase C: audio server not ready, skipping topology reconcile");
            for outcome in outcomes.values_mut() {
                if matches!(outcome.status, EntryStatus::Connected | EntryStatus::Skipped) {
                    outcome.status = EntryStatus::AudioDegraded;
                    outcome.reason.get_or_insert_with(|| "audio server unavailable".to_owned());
                }
            }
            return;
        }

        if topology.virtual_sink.is_none() {
            match self.audio.load_null_sink(&self.config.virtual_sink_name).await {
                Ok(id) => topology.virtual_sink = Some(id),
                Err(err) => log::warn!("phase C: failed to load virtual sink: {err}"),
            }
        }

        let source_monitor = format!("{}.monitor", self.config.virtual_sink_name);
        for entry in &gameplan.entries {
            let live = matches!(
                outcomes.get(&entry.mac).map(|o| o.status),
                Some(EntryStatus::Connected) | Some(EntryStatus::Skipped)
            );
            if !live || entry.role != TargetRole::Sink {
                continue;
            }

            let sink_name = sink_name_for(entry.mac);
            let latency_ms = entry.latency_ms.unwrap_or(self.config.default_latency_ms);
            match self.audio.load_loopback(&source_monitor, &sink_name, latency_ms).await {
                Ok(module_id) => {
                    if let Some(volume) = entry.volume {
                        if let Err(err) = self.audio.set_sink_volume(&sink_name, volume).await {
                            log::warn!("phase C: set_sink_volume({sink_name}) failed: {err}");
                        }
                    }
                    topology.speakers.insert(
                        entry.mac,
                        TrackedSpeaker {
                            sink_name,
                            loopback_module: Some(module_id),
                        },
                    );
                }
                Err(err) => {
                    log::warn!("phase C: loopback load failed for {}: {err}", entry.mac);
                    if let Some(outcome) = outcomes.get_mut(&entry.mac) {
                        outcome.status = EntryStatus::AudioDegraded;
                        outcome.reason = Some("loopback load failed".to_owned());
                    }
                    topology.speakers.insert(
                        entry.mac,
                        TrackedSpeaker {
                            sink_name,
                            loopback_module: None,
                        },
                    );
                }
            }
        }

        if let Ok(sinks) = self.audio.list_sinks().await {
            for sink in sinks {
                if let Err(err) = self.audio.unsuspend_sink(&sink.name).await {
                    log::warn!("phase C: unsuspend_sink({}) failed: {err}", sink.name);
                }
            }
        }
        if let Err(err) = self.audio.unload_all_matching(&self.config.suspend_module_name).await {
            log::warn!("phase C: sweeping {} failed: {err}", self.config.suspend_module_name);
        }
    }
}

fn build_apply_result(
    gameplan: &Gameplan,
    outcomes: &HashMap<MacAddress, PhaseBOutcome>,
    topology: &AudioTopology,
    snapshot: &Snapshot,
) -> ApplyResult {
    let mut entries = HashMap::with_capacity(gameplan.entries.len());
    for entry in &gameplan.entries {
        let outcome = outcomes.get(&entry.mac).expect("every Gameplan entry gets a Phase B outcome");
        let recommended_controller = entry
            .recommended_controller
            .as_ref()
            .and_then(|id| snapshot.controller_mac(id))
            .map(|mac| mac.to_string())
            .unwrap_or_default();
        let disconnect = entry
            .disconnect
            .iter()
            .filter_map(|id| snapshot.controller_mac(id))
            .map(|mac| mac.to_string())
            .collect();

        entries.insert(
            entry.mac.to_string(),
            EntryResult {
                name: entry.name.clone(),
                action: entry.action,
                recommended_controller,
                disconnect,
                status: outcome.status,
                reason: outcome.reason.clone(),
            },
        );
    }

    let loopbacks = topology
        .speakers
        .values()
        .filter_map(|speaker| speaker.loopback_module.map(|id| (speaker.sink_name.clone(), id.0)))
        .collect();

    ApplyResult {
        entries,
        virtual_sink: VirtualSinkResult {
            present: topology.virtual_sink.is_some(),
            module_id: topology.virtual_sink.map(|id| id.0),
        },
        loopbacks,
    }
}

/// Used only by `disconnect_configuration`: whether a device is currently connected on the given
/// controller, defaulting to "not connected" if the daemon can't be reached for that one check
/// (teardown is best-effort and must not abort on a single bad read, per §4.5 Phase A semantics).
pub(crate) async fn currently_connected<B: BluetoothControl + ?Sized>(
    bluetooth: &B,
    controller: &ControllerId,
    mac: MacAddress,
) -> bool {
    bluetooth
        .device_info(controller, mac)
        .await
        .map(|status| status.connected)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{classify_role, Controller, Target};
    use crate::planner::plan;
    use audio_control::fake::FakeAudioControl;
    use bluez_control::fake::FakeBluetoothControl;
    use bluez_control::ControllerInfo;

    fn controller(path: &str, mac: &str) -> Controller {
        let info = ControllerInfo {
            id: ControllerId::new(path),
            mac_address: mac.parse().unwrap(),
            friendly_name: path.to_string(),
        };
        Controller {
            role: classify_role(&info, "hci0"),
            info,
        }
    }

    fn config_fast() -> ExecutorConfig {
        ExecutorConfig {
            wait_timeout: Duration::from_millis(50),
            scan_settle: Duration::from_millis(1),
            pair_settle: Duration::from_millis(1),
            post_connect_settle: Duration::from_millis(1),
            disconnect_settle: Duration::from_millis(1),
            audio_ready_timeout: Duration::from_millis(50),
            ..ExecutorConfig::default()
        }
    }

    #[tokio::test]
    async fn pair_and_connect_creates_loopback() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let mac: MacAddress = "AA:AA:AA:AA:AA:AA".parse().unwrap();
        let snapshot = Snapshot {
            controllers: vec![r1.clone()],
            attachments: HashMap::new(),
        };
        let gameplan = plan(&[Target::new(mac, "speaker")], &snapshot);
        let bluetooth = FakeBluetoothControl::new(vec![r1.info.clone()]);
        let audio = FakeAudioControl::new();
        let config = config_fast();
        let executor = Executor::new(&bluetooth, &audio, &config);
        let mut topology = AudioTopology::default();

        let result = executor.execute(&gameplan, &snapshot, &mut topology).await;

        let entry = &result.entries[&mac.to_string()];
        assert_eq!(entry.status, EntryStatus::Connected);
        assert!(topology.virtual_sink.is_some());
        assert!(topology.speakers.contains_key(&mac));
        assert_eq!(result.loopbacks.len(), 1);
    }

    #[tokio::test]
    async fn stuck_pairing_fails_target_but_others_proceed() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let r2 = controller("/org/bluez/hci2", "22:22:22:22:22:22");
        let stuck: MacAddress = "AA:AA:AA:AA:AA:AA".parse().unwrap();
        let ok: MacAddress = "BB:BB:BB:BB:BB:BB".parse().unwrap();
        let snapshot = Snapshot {
            controllers: vec![r1.clone(), r2.clone()],
            attachments: HashMap::new(),
        };
        let gameplan = plan(&[Target::new(stuck, "stuck"), Target::new(ok, "ok")], &snapshot);
        let bluetooth = FakeBluetoothControl::new(vec![r1.info.clone(), r2.info.clone()]).never_pairs(stuck);
        let audio = FakeAudioControl::new();
        let config = config_fast();
        let executor = Executor::new(&bluetooth, &audio, &config);
        let mut topology = AudioTopology::default();

        let result = executor.execute(&gameplan, &snapshot, &mut topology).await;

        assert_eq!(result.entries[&stuck.to_string()].status, EntryStatus::Failed);
        assert_eq!(result.entries[&ok.to_string()].status, EntryStatus::Connected);
    }

    #[tokio::test]
    async fn audio_unreachable_degrades_connected_targets() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let mac: MacAddress = "AA:AA:AA:AA:AA:AA".parse().unwrap();
        let snapshot = Snapshot {
            controllers: vec![r1.clone()],
            attachments: HashMap::new(),
        };
        let gameplan = plan(&[Target::new(mac, "speaker")], &snapshot);
        let bluetooth = FakeBluetoothControl::new(vec![r1.info.clone()]);
        let audio = FakeAudioControl::new();
        audio.set_unresponsive();
        let config = config_fast();
        let executor = Executor::new(&bluetooth, &audio, &config);
        let mut topology = AudioTopology::default();

        let result = executor.execute(&gameplan, &snapshot, &mut topology).await;

        assert_eq!(result.entries[&mac.to_string()].status, EntryStatus::AudioDegraded);
        assert!(topology.virtual_sink.is_none());
    }

    #[tokio::test]
    async fn loopback_failure_degrades_only_that_target() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let mac: MacAddress = "AA:AA:AA:AA:AA:AA".parse().unwrap();
        let snapshot = Snapshot {
            controllers: vec![r1.clone()],
            attachments: HashMap::new(),
        };
        let gameplan = plan(&[Target::new(mac, "speaker")], &snapshot);
        let bluetooth = FakeBluetoothControl::new(vec![r1.info.clone()]);
        let audio = FakeAudioControl::new().never_loads(&sink_name_for(mac));
        let config = config_fast();
        let executor = Executor::new(&bluetooth, &audio, &config);
        let mut topology = AudioTopology::default();

        let result = executor.execute(&gameplan, &snapshot, &mut topology).await;

        assert_eq!(result.entries[&mac.to_string()].status, EntryStatus::AudioDegraded);
        assert_eq!(result.entries[&mac.to_string()].reason.as_deref(), Some("loopback load failed"));
    }
}
