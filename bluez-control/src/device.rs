use crate::dbus_iface::OrgBluezDevice1Properties;
use crate::{BluetoothError, MacAddress};

/// Snapshot of a device's pairing state as currently known to the daemon, as returned by
/// [`crate::BluetoothControl::device_info`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceStatus {
    pub mac_address: MacAddress,
    pub name: Option<String>,
    pub paired: bool,
    pub trusted: bool,
    pub connected: bool,
}

impl DeviceStatus {
    pub(crate) fn from_properties(
        mac_address: MacAddress,
        properties: OrgBluezDevice1Properties,
    ) -> Result<DeviceStatus, BluetoothError> {
        Ok(DeviceStatus {
            mac_address,
            name: properties.name().map(str::to_owned),
            paired: properties
                .paired()
                .ok_or(BluetoothError::RequiredPropertyMissing("Paired"))?,
            trusted: properties
                .trusted()
                .ok_or(BluetoothError::RequiredPropertyMissing("Trusted"))?,
            connected: properties
                .connected()
                .ok_or(BluetoothError::RequiredPropertyMissing("Connected"))?,
        })
    }
}

/// Which flag of a [`DeviceStatus`] to poll for in [`crate::BluetoothControl::wait_for_flag`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceFlag {
    Paired,
    Trusted,
    Connected,
}

impl DeviceFlag {
    pub(crate) fn get(self, status: &DeviceStatus) -> bool {
        match self {
            DeviceFlag::Paired => status.paired,
            DeviceFlag::Trusted => status.trusted,
            DeviceFlag::Connected => status.connected,
        }
    }
}

/// A device as returned by [`crate::BluetoothControl::list_devices`]: just enough to identify it
/// and show a human a name, without the full pairing-state detail of [`DeviceStatus`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Device {
    pub mac_address: MacAddress,
    pub name: Option<String>,
}

impl From<DeviceStatus> for Device {
    fn from(status: DeviceStatus) -> Self {
        Device {
            mac_address: status.mac_address,
            name: status.name,
        }
    }
}

/// Which subset of devices [`crate::BluetoothControl::list_devices`] should return.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceFilter {
    All,
    Paired,
    Connected,
}

impl DeviceFilter {
    pub(crate) fn matches(self, status: &DeviceStatus) -> bool {
        match self {
            DeviceFilter::All => true,
            DeviceFilter::Paired => status.paired,
            DeviceFilter::Connected => status.connected,
        }
    }
}
