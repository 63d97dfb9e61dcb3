//! An in-memory [`BluetoothControl`] double for testing the Planner and Executor in
//! `orchestrator-core` without a real BlueZ daemon.
use crate::{
    BluetoothControl, BluetoothError, ControllerId, ControllerInfo, Device, DeviceFilter,
    DeviceStatus, MacAddress,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Clone, Debug, Default)]
struct FakeDevice {
    name: Option<String>,
    paired: bool,
    trusted: bool,
    connected: bool,
}

struct FakeState {
    controllers: Vec<ControllerInfo>,
    devices: HashMap<(ControllerId, MacAddress), FakeDevice>,
    /// MACs in this set never advance past `Paired: false` no matter how many times `pair` is
    /// called, to simulate a daemon that never converges (scenario 5 in the spec).
    stuck_pairing: HashSet<MacAddress>,
}

/// A fake Bluetooth control plane: a fixed set of controllers plus a mutable table of
/// (controller, mac) attachments that the fake verbs mutate the way the real daemon would.
pub struct FakeBluetoothControl {
    state: Mutex<FakeState>,
}

impl FakeBluetoothControl {
    pub fn new(controllers: Vec<ControllerInfo>) -> Self {
        FakeBluetoothControl {
            state: Mutex::new(FakeState {
                controllers,
                devices: HashMap::new(),
                stuck_pairing: HashSet::new(),
            }),
        }
    }

    /// Seed an existing attachment, as if the device had already been paired/connected on a
    /// previous run.
    pub fn with_attachment(
        self,
        controller: ControllerId,
        mac: MacAddress,
        name: Option<&str>,
        paired: bool,
        trusted: bool,
        connected: bool,
    ) -> Self {
        self.state.lock().unwrap().devices.insert(
            (controller, mac),
            FakeDevice {
                name: name.map(str::to_owned),
                paired,
                trusted,
                connected,
            },
        );
        self
    }

    /// Mark a MAC as one whose pairing will never complete, to simulate a hung daemon.
    pub fn never_pairs(self, mac: MacAddress) -> Self {
        self.state.lock().unwrap().stuck_pairing.insert(mac);
        self
    }
}

#[async_trait]
impl BluetoothControl for FakeBluetoothControl {
    async fn list_controllers(&self) -> Result<Vec<ControllerInfo>, BluetoothError> {
        Ok(self.state.lock().unwrap().controllers.clone())
    }

    async fn list_devices(
        &self,
        controller: &ControllerId,
        filter: DeviceFilter,
    ) -> Result<Vec<Device>, BluetoothError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .devices
            .iter()
            .filter(|((ctrl, _), _)| ctrl == controller)
            .filter_map(|((_, mac), device)| {
                let status = DeviceStatus {
                    mac_address: *mac,
                    name: device.name.clone(),
                    paired: device.paired,
                    trusted: device.trusted,
                    connected: device.connected,
                };
                filter.matches(&status).then(|| status.into())
            })
            .collect())
    }

    async fn device_info(
        &self,
        controller: &ControllerId,
        mac: MacAddress,
    ) -> Result<DeviceStatus, BluetoothError> {
        let state = self.state.lock().unwrap();
        let device = state
            .devices
            .get(&(controller.clone(), mac))
            .cloned()
            .unwrap_or_default();
        Ok(DeviceStatus {
            mac_address: mac,
            name: device.name,
            paired: device.paired,
            trusted: device.trusted,
            connected: device.connected,
        })
    }

    async fn select(&self, controller: &ControllerId) -> Result<(), BluetoothError> {
        let state = self.state.lock().unwrap();
        if state.controllers.iter().any(|c| &c.id == controller) {
            Ok(())
        } else {
            Err(BluetoothError::NoSuchController(controller.to_string()))
        }
    }

    async fn scan(&self, _controller: &ControllerId, _on: bool) -> Result<(), BluetoothError> {
        Ok(())
    }

    async fn pair(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        let mut state = self.state.lock().unwrap();
        let stuck = state.stuck_pairing.contains(&mac);
        let device = state
            .devices
            .entry((controller.clone(), mac))
            .or_default();
        if !stuck {
            device.paired = true;
        }
        Ok(())
    }

    async fn trust(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        let mut state = self.state.lock().unwrap();
        state
            .devices
            .entry((controller.clone(), mac))
            .or_default()
            .trusted = true;
        Ok(())
    }

    async fn connect(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        let mut state = self.state.lock().unwrap();
        state
            .devices
            .entry((controller.clone(), mac))
            .or_default()
            .connected = true;
        Ok(())
    }

    async fn disconnect(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.devices.get_mut(&(controller.clone(), mac)) {
            device.connected = false;
        }
        Ok(())
    }

    async fn remove(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        self.state.lock().unwrap().devices.remove(&(controller.clone(), mac));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceFlag;
    use std::time::Duration;

    fn controller(path: &str, mac: &str) -> ControllerInfo {
        ControllerInfo {
            id: ControllerId::new(path),
            mac_address: mac.parse().unwrap(),
            friendly_name: path.to_string(),
        }
    }

    #[tokio::test]
    async fn pair_then_wait_reaches_flag() {
        let fake = FakeBluetoothControl::new(vec![controller("/org/bluez/hci1", "11:11:11:11:11:11")]);
        let ctrl = ControllerId::new("/org/bluez/hci1");
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();

        fake.pair(&ctrl, mac).await.unwrap();
        let outcome = fake
            .wait_for_flag(&ctrl, mac, DeviceFlag::Paired, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(outcome, crate::WaitOutcome::Reached);
    }

    #[tokio::test]
    async fn stuck_pairing_times_out() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let fake = FakeBluetoothControl::new(vec![controller("/org/bluez/hci1", "11:11:11:11:11:11")])
            .never_pairs(mac);
        let ctrl = ControllerId::new("/org/bluez/hci1");

        fake.pair(&ctrl, mac).await.unwrap();
        let outcome = fake
            .wait_for_flag(&ctrl, mac, DeviceFlag::Paired, Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(outcome, crate::WaitOutcome::TimedOut);
    }
}
