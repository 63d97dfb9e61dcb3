//! C3: builds the current world view by calling `list_controllers` and then, for each
//! controller, `list_devices(controller, Paired)` and `list_devices(controller, Connected)`.
//! Snapshots are taken once per apply call; there is no incremental updating.

use crate::domain::{classify_role, AttachmentStatus, Controller, Snapshot};
use bluez_control::{BluetoothControl, BluetoothError, DeviceFilter};
use std::collections::HashMap;

pub async fn build_snapshot<B: BluetoothControl + ?Sized>(
    bluetooth: &B,
    reserved_controller: &str,
) -> Result<Snapshot, BluetoothError> {
    let infos = bluetooth.list_controllers().await?;
    let controllers: Vec<Controller> = infos
        .into_iter()
        .map(|info| Controller {
            role: classify_role(&info, reserved_controller),
            info,
        })
        .collect();

    let mut attachments = HashMap::new();
    for controller in &controllers {
        let id = &controller.info.id;
        for device in bluetooth.list_devices(id, DeviceFilter::Paired).await? {
            attachments
                .entry((id.clone(), device.mac_address))
                .or_insert_with(|| AttachmentStatus {
                    name: device.name.clone(),
                    ..Default::default()
                })
                .paired = true;
        }
        for device in bluetooth.list_devices(id, DeviceFilter::Connected).await? {
            let entry = attachments
                .entry((id.clone(), device.mac_address))
                .or_insert_with(|| AttachmentStatus {
                    name: device.name.clone(),
                    ..Default::default()
                });
            entry.connected = true;
            entry.name = entry.name.clone().or(device.name);
        }
    }

    Ok(Snapshot {
        controllers,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluez_control::{ControllerId, ControllerInfo, fake::FakeBluetoothControl};
    use crate::domain::ControllerRole;

    fn controller(path: &str, mac: &str) -> ControllerInfo {
        ControllerInfo {
            id: ControllerId::new(path),
            mac_address: mac.parse().unwrap(),
            friendly_name: path.to_string(),
        }
    }

    #[tokio::test]
    async fn classifies_reserved_controller_by_mac() {
        let reserved = controller("/org/bluez/hci0", "00:00:00:00:00:01");
        let audio = controller("/org/bluez/hci1", "00:00:00:00:00:02");
        let fake = FakeBluetoothControl::new(vec![reserved.clone(), audio.clone()]);

        let snapshot = build_snapshot(&fake, "00:00:00:00:00:01").await.unwrap();
        assert_eq!(snapshot.controllers.len(), 2);
        assert_eq!(
            snapshot
                .controllers
                .iter()
                .find(|c| c.info.id == reserved.id)
                .unwrap()
                .role,
            ControllerRole::ReservedBle
        );
        assert_eq!(
            snapshot
                .controllers
                .iter()
                .find(|c| c.info.id == audio.id)
                .unwrap()
                .role,
            ControllerRole::Audio
        );
        assert_eq!(snapshot.controller_pool(), vec![audio.id]);
    }

    #[tokio::test]
    async fn classifies_reserved_controller_by_hci_name() {
        let reserved = controller("/org/bluez/hci0", "00:00:00:00:00:01");
        let fake = FakeBluetoothControl::new(vec![reserved.clone()]);

        let snapshot = build_snapshot(&fake, "hci0").await.unwrap();
        assert_eq!(snapshot.controllers[0].role, ControllerRole::ReservedBle);
        assert!(snapshot.controller_pool().is_empty());
    }

    #[tokio::test]
    async fn captures_paired_and_connected_attachments() {
        let audio = controller("/org/bluez/hci1", "00:00:00:00:00:02");
        let mac = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let fake = FakeBluetoothControl::new(vec![audio.clone()]).with_attachment(
            audio.id.clone(),
            mac,
            Some("Speaker"),
            true,
            true,
            true,
        );

        let snapshot = build_snapshot(&fake, "hci0").await.unwrap();
        assert!(snapshot.is_paired(&audio.id, mac));
        assert!(snapshot.is_connected(&audio.id, mac));
    }
}
