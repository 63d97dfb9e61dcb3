use crate::dbus_iface::OrgBluezAdapter1Properties;
use crate::{BluetoothError, MacAddress};
use dbus::Path;
use std::fmt::{self, Display, Formatter};

/// Opaque identifier for a Bluetooth controller (radio) on the system.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControllerId {
    pub(crate) object_path: Path<'static>,
}

impl ControllerId {
    /// Build a `ControllerId` from a raw D-Bus object path. Exposed (beyond `pub(crate)`) so
    /// that fakes and tests outside this crate — `orchestrator-core`'s Planner/Executor tests —
    /// can construct controllers without a live daemon.
    pub fn new(object_path: &str) -> Self {
        Self {
            object_path: object_path.to_owned().into(),
        }
    }
}

impl Display for ControllerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.object_path
                .to_string()
                .strip_prefix("/org/bluez/")
                .ok_or(fmt::Error)?
        )
    }
}

/// Information about a Bluetooth controller as reported by the daemon. This crate has no notion
/// of "reserved for BLE" vs. "audio" — that classification belongs to the orchestrator, which
/// compares `mac_address` against its own configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControllerInfo {
    /// An opaque identifier for the controller. This can be used to perform operations on it.
    pub id: ControllerId,
    /// The MAC address of the controller itself.
    pub mac_address: MacAddress,
    /// The Bluetooth friendly name (alias) of the controller.
    pub friendly_name: String,
}

impl ControllerInfo {
    pub(crate) fn from_properties(
        id: ControllerId,
        properties: OrgBluezAdapter1Properties,
    ) -> Result<ControllerInfo, BluetoothError> {
        let mac_address = properties
            .address()
            .ok_or(BluetoothError::RequiredPropertyMissing("Address"))?
            .parse()?;
        let friendly_name = properties
            .alias()
            .ok_or(BluetoothError::RequiredPropertyMissing("Alias"))?
            .to_owned();

        Ok(ControllerInfo {
            id,
            mac_address,
            friendly_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbus::arg::{RefArg, Variant};
    use std::collections::HashMap;

    #[test]
    fn controller_info_minimal() {
        let id = ControllerId::new("/org/bluez/hci0");
        let mut properties: HashMap<String, Variant<Box<dyn RefArg>>> = HashMap::new();
        properties.insert(
            "Address".to_string(),
            Variant(Box::new("00:11:22:33:44:55".to_string())),
        );
        properties.insert("Alias".to_string(), Variant(Box::new("hub-audio-0".to_string())));

        let controller =
            ControllerInfo::from_properties(id.clone(), OrgBluezAdapter1Properties(&properties))
                .unwrap();
        assert_eq!(
            controller,
            ControllerInfo {
                id,
                mac_address: "00:11:22:33:44:55".parse().unwrap(),
                friendly_name: "hub-audio-0".to_string(),
            }
        );
    }

    #[test]
    fn display_strips_prefix() {
        let id = ControllerId::new("/org/bluez/hci1");
        assert_eq!(id.to_string(), "hci1");
    }
}
