//! C6: the single entry point invoked by the BLE layer. Accepts a desired [`Configuration`],
//! runs Snapshot -> Plan -> Execute, and returns a structured result.
//!
//! A single process-wide `tokio::sync::Mutex` serializes `apply_configuration` and
//! `disconnect_configuration` (§5): if a new call arrives while one is running, it queues rather
//! than interleaving. The same lock also guards the audio topology table so that
//! `set_volume`/`set_latency` never race a concurrent apply.

use crate::domain::Configuration;
use crate::error::OrchestratorError;
use crate::executor::{currently_connected, AudioTopology, Executor, ExecutorConfig};
use crate::planner::plan;
use crate::result::{ApplyResult, DisconnectResult};
use crate::snapshot::build_snapshot;
use audio_control::AudioControl;
use bluez_control::{BluetoothControl, MacAddress};
use tokio::sync::Mutex;

struct OrchestratorState {
    topology: AudioTopology,
}

/// Wires a Bluetooth control plane and an audio control plane together behind the two
/// operations the BLE layer actually calls.
pub struct Orchestrator<B, A> {
    bluetooth: B,
    audio: A,
    reserved_controller: String,
    config: ExecutorConfig,
    state: Mutex<OrchestratorState>,
}

impl<B: BluetoothControl, A: AudioControl> Orchestrator<B, A> {
    pub fn new(bluetooth: B, audio: A, reserved_controller: impl Into<String>, config: ExecutorConfig) -> Self {
        Orchestrator {
            bluetooth,
            audio,
            reserved_controller: reserved_controller.into(),
            config,
            state: Mutex::new(OrchestratorState {
                topology: AudioTopology::default(),
            }),
        }
    }

    pub async fn apply_configuration(&self, config: Configuration) -> Result<ApplyResult, OrchestratorError> {
        if config.targets.is_empty() {
            return Err(OrchestratorError::ConfigError(
                "configuration has no speakers".to_owned(),
            ));
        }

        let mut state = self.state.lock().await;
        log::info!("applying configuration {} ({})", config.config_id, config.config_name);

        let snapshot = build_snapshot(&self.bluetooth, &self.reserved_controller).await?;
        if snapshot.controller_pool().is_empty() {
            return Err(OrchestratorError::NoControllers);
        }

        let gameplan = plan(&config.targets, &snapshot);
        let executor = Executor::new(&self.bluetooth, &self.audio, &self.config);
        Ok(executor.execute(&gameplan, &snapshot, &mut state.topology).await)
    }

    pub async fn disconnect_configuration(&self, config: Configuration) -> Result<DisconnectResult, OrchestratorError> {
        let mut state = self.state.lock().await;
        log::info!("tearing down configuration {} ({})", config.config_id, config.config_name);

        let controllers = self.bluetooth.list_controllers().await?;
        let mut disconnected = Vec::new();
        for target in &config.targets {
            for controller in &controllers {
                if currently_connected(&self.bluetooth, &controller.id, target.mac).await {
                    if let Err(err) = self.bluetooth.select(&controller.id).await {
                        log::warn!("teardown: select({}) failed: {err}", controller.id);
                        continue;
                    }
                    match self.bluetooth.disconnect(&controller.id, target.mac).await {
                        Ok(()) => disconnected.push(target.mac.to_string()),
                        Err(err) => log::warn!(
                            "teardown: disconnect({}, {}) failed: {err}",
                            target.mac,
                            controller.id
                        ),
                    }
                }
            }
        }

        let mut loopbacks_unloaded = 0;
        for target in &config.targets {
            if let Some(speaker) = state.topology.speakers.remove(&target.mac) {
                if let Some(module_id) = speaker.loopback_module {
                    if self.audio.unload_module(module_id).await.is_ok() {
                        loopbacks_unloaded += 1;
                    }
                }
            }
        }

        let mut virtual_sink_unloaded = false;
        if state.topology.speakers.is_empty() {
            if let Some(module_id) = state.topology.virtual_sink.take() {
                virtual_sink_unloaded = self.audio.unload_module(module_id).await.is_ok();
            }
        }

        Ok(DisconnectResult {
            disconnected,
            loopbacks_unloaded,
            virtual_sink_unloaded,
        })
    }

    /// §4.7: resolves `mac` to its sink name and pokes the audio server directly. Fails with
    /// `NotFound` if `mac` isn't part of the currently-tracked live topology; does not trigger a
    /// full `apply_configuration` pass.
    pub async fn set_volume(&self, mac: MacAddress, volume_percent: u8) -> Result<(), OrchestratorError> {
        let state = self.state.lock().await;
        let speaker = state
            .topology
            .speakers
            .get(&mac)
            .ok_or_else(|| OrchestratorError::NotFound(mac.to_string()))?;
        self.audio
            .set_sink_volume(&speaker.sink_name, volume_percent)
            .await
            .map_err(|err| OrchestratorError::Fatal(err.to_string()))
    }

    /// §4.7: reloads the speaker's owned loopback module at the new latency (unload + load).
    /// This briefly drops audio for that speaker, matching the source behavior (§9).
    pub async fn set_latency(&self, mac: MacAddress, latency_ms: u32) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        let (sink_name, module_id) = {
            let speaker = state
                .topology
                .speakers
                .get(&mac)
                .ok_or_else(|| OrchestratorError::NotFound(mac.to_string()))?;
            let module_id = speaker
                .loopback_module
                .ok_or_else(|| OrchestratorError::NotFound(mac.to_string()))?;
            (speaker.sink_name.clone(), module_id)
        };
        let source_monitor = format!("{}.monitor", self.config.virtual_sink_name);
        let new_module_id = self
            .audio
            .set_loopback_latency(module_id, &source_monitor, &sink_name, latency_ms)
            .await
            .map_err(|err| OrchestratorError::Fatal(err.to_string()))?;
        state
            .topology
            .speakers
            .get_mut(&mac)
            .expect("checked above")
            .loopback_module = Some(new_module_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Target;
    use audio_control::fake::FakeAudioControl;
    use bluez_control::fake::FakeBluetoothControl;
    use bluez_control::ControllerId;
    use bluez_control::ControllerInfo;
    use std::time::Duration;

    fn fast_config() -> ExecutorConfig {
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

    fn controller_info(path: &str, mac: &str) -> ControllerInfo {
        ControllerInfo {
            id: ControllerId::new(path),
            mac_address: mac.parse().unwrap(),
            friendly_name: path.to_string(),
        }
    }

    #[tokio::test]
    async fn apply_rejects_empty_configuration() {
        let orchestrator = Orchestrator::new(
            FakeBluetoothControl::new(vec![]),
            FakeAudioControl::new(),
            "hci0",
            fast_config(),
        );
        let result = orchestrator
            .apply_configuration(Configuration {
                config_id: "c1".to_owned(),
                config_name: "test".to_owned(),
                targets: vec![],
            })
            .await;
        assert!(matches!(result, Err(OrchestratorError::ConfigError(_))));
    }

    #[tokio::test]
    async fn apply_fails_when_only_reserved_controller_exists() {
        let reserved = controller_info("/org/bluez/hci0", "00:00:00:00:00:00");
        let orchestrator = Orchestrator::new(
            FakeBluetoothControl::new(vec![reserved]),
            FakeAudioControl::new(),
            "hci0",
            fast_config(),
        );
        let mac: MacAddress = "AA:AA:AA:AA:AA:AA".parse().unwrap();
        let result = orchestrator
            .apply_configuration(Configuration {
                config_id: "c1".to_owned(),
                config_name: "test".to_owned(),
                targets: vec![Target::new(mac, "speaker")],
            })
            .await;
        assert!(matches!(result, Err(OrchestratorError::NoControllers)));
    }

    #[tokio::test]
    async fn apply_then_set_volume_and_latency_then_teardown() {
        let audio_controller = controller_info("/org/bluez/hci1", "11:11:11:11:11:11");
        let bluetooth = FakeBluetoothControl::new(vec![audio_controller]);
        let audio = FakeAudioControl::new();
        let orchestrator = Orchestrator::new(bluetooth, audio, "hci0", fast_config());
        let mac: MacAddress = "AA:AA:AA:AA:AA:AA".parse().unwrap();

        let applied = orchestrator
            .apply_configuration(Configuration {
                config_id: "c1".to_owned(),
                config_name: "test".to_owned(),
                targets: vec![Target::new(mac, "speaker")],
            })
            .await
            .unwrap();
        assert_eq!(applied.entries[&mac.to_string()].status, crate::result::EntryStatus::Connected);

        orchestrator.set_volume(mac, 42).await.unwrap();
        orchestrator.set_latency(mac, 150).await.unwrap();

        let unknown: MacAddress = "FF:FF:FF:FF:FF:FF".parse().unwrap();
        assert!(matches!(
            orchestrator.set_volume(unknown, 10).await,
            Err(OrchestratorError::NotFound(_))
        ));

        let teardown = orchestrator
            .disconnect_configuration(Configuration {
                config_id: "c1".to_owned(),
                config_name: "test".to_owned(),
                targets: vec![Target::new(mac, "speaker")],
            })
            .await
            .unwrap();
        assert_eq!(teardown.disconnected, vec![mac.to_string()]);
        assert_eq!(teardown.loopbacks_unloaded, 1);
        assert!(teardown.virtual_sink_unloaded);
    }

    #[tokio::test]
    async fn apply_is_idempotent_on_unchanged_state() {
        let audio_controller = controller_info("/org/bluez/hci1", "11:11:11:11:11:11");
        let bluetooth = FakeBluetoothControl::new(vec![audio_controller]);
        let audio = FakeAudioControl::new();
        let orchestrator = Orchestrator::new(bluetooth, audio, "hci0", fast_config());
        let mac: MacAddress = "AA:AA:AA:AA:AA:AA".parse().unwrap();
        let config = Configuration {
            config_id: "c1".to_owned(),
            config_name: "test".to_owned(),
            targets: vec![Target::new(mac, "speaker")],
        };

        let first = orchestrator.apply_configuration(config.clone()).await.unwrap();
        let second = orchestrator.apply_configuration(config).await.unwrap();

        assert_eq!(first.entries[&mac.to_string()].status, crate::result::EntryStatus::Connected);
        assert_eq!(second.entries[&mac.to_string()].status, crate::result::EntryStatus::Skipped);
        assert_eq!(second.entries[&mac.to_string()].action, crate::domain::PlannedAction::NoAction);
    }
}
