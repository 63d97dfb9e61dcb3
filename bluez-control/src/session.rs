use crate::dbus_iface::{
    OrgBluezAdapter1, OrgBluezAdapter1Properties, OrgBluezDevice1, OrgBluezDevice1Properties,
    ORG_BLUEZ_ADAPTER1_NAME, ORG_BLUEZ_DEVICE1_NAME,
};
use crate::{
    BluetoothControl, BluetoothError, ControllerId, ControllerInfo, Device, DeviceFilter,
    DeviceStatus, MacAddress,
};
use async_trait::async_trait;
use dbus::arg::{PropMap, Variant};
use dbus::nonblock::stdintf::org_freedesktop_dbus::{ObjectManager, Properties};
use dbus::nonblock::{Proxy, SyncConnection};
use dbus::Path;
use dbus_tokio::connection::IOResourceError;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;

const DBUS_METHOD_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const BLUEZ_SERVICE: &str = "org.bluez";

/// Error type for the background task that pumps the D-Bus connection.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("D-Bus connection lost: {0}")]
    DbusConnectionLost(#[source] IOResourceError),
    #[error("Task failed: {0}")]
    Join(#[from] JoinError),
}

/// A live connection to BlueZ over the D-Bus system bus. This can be cheaply cloned and passed
/// around; it is the production implementation of [`BluetoothControl`].
#[derive(Clone)]
pub struct BlueZSession {
    connection: Arc<SyncConnection>,
}

impl BlueZSession {
    /// Establish a new D-Bus connection to communicate with BlueZ.
    ///
    /// Returns a tuple of (join handle, Self). If the join handle ever completes then the
    /// connection to D-Bus has been lost and the process should restart.
    pub async fn new() -> Result<(impl Future<Output = Result<(), SpawnError>>, Self), BluetoothError>
    {
        let (dbus_resource, connection) = dbus_tokio::connection::new_system_sync()
            .map_err(BluetoothError::DbusError)?;
        let dbus_handle = tokio::spawn(async {
            let err = dbus_resource.await;
            Err(SpawnError::DbusConnectionLost(err))
        });
        Ok((
            dbus_handle.map(|res| res?),
            BlueZSession { connection },
        ))
    }

    fn adapter_proxy(&self, id: &ControllerId) -> Proxy<'_, Arc<SyncConnection>> {
        Proxy::new(
            BLUEZ_SERVICE,
            id.object_path.clone(),
            DBUS_METHOD_CALL_TIMEOUT,
            self.connection.clone(),
        )
    }

    fn device_proxy(&self, controller: &ControllerId, mac: MacAddress) -> Proxy<'_, Arc<SyncConnection>> {
        Proxy::new(
            BLUEZ_SERVICE,
            Self::device_path(controller, mac),
            DBUS_METHOD_CALL_TIMEOUT,
            self.connection.clone(),
        )
    }

    fn device_path(controller: &ControllerId, mac: MacAddress) -> Path<'static> {
        format!("{}/dev_{}", controller.object_path, mac.path_segment()).into()
    }

    async fn managed_objects(
        &self,
    ) -> Result<HashMap<Path<'static>, HashMap<String, PropMap>>, BluetoothError> {
        let root = Proxy::new(BLUEZ_SERVICE, "/", DBUS_METHOD_CALL_TIMEOUT, self.connection.clone());
        Ok(root.get_managed_objects().await?)
    }
}

#[async_trait]
impl BluetoothControl for BlueZSession {
    async fn list_controllers(&self) -> Result<Vec<ControllerInfo>, BluetoothError> {
        let tree = self.managed_objects().await?;
        Ok(tree
            .into_iter()
            .filter_map(|(object_path, interfaces)| {
                let properties = OrgBluezAdapter1Properties::from_interfaces(&interfaces)?;
                ControllerInfo::from_properties(
                    ControllerId {
                        object_path,
                    },
                    properties,
                )
                .ok()
            })
            .collect())
    }

    async fn list_devices(
        &self,
        controller: &ControllerId,
        filter: DeviceFilter,
    ) -> Result<Vec<Device>, BluetoothError> {
        let tree = self.managed_objects().await?;
        let prefix = format!("{}/", controller.object_path);
        let mut devices = vec![];
        for (object_path, interfaces) in tree {
            if !object_path.starts_with(&prefix) {
                continue;
            }
            let Some(properties) = OrgBluezDevice1Properties::from_interfaces(&interfaces) else {
                continue;
            };
            let Some(address) = properties.address() else {
                continue;
            };
            let Ok(mac) = address.parse() else {
                continue;
            };
            let Ok(status) = DeviceStatus::from_properties(mac, properties) else {
                continue;
            };
            if filter.matches(&status) {
                devices.push(status.into());
            }
        }
        Ok(devices)
    }

    async fn device_info(
        &self,
        controller: &ControllerId,
        mac: MacAddress,
    ) -> Result<DeviceStatus, BluetoothError> {
        let device = self.device_proxy(controller, mac);
        let properties = device
            .get_all(ORG_BLUEZ_DEVICE1_NAME)
            .await
            .map_err(|err| BluetoothError::from_dbus_call(err, &controller.to_string(), &mac.to_string()))?;
        DeviceStatus::from_properties(mac, OrgBluezDevice1Properties(&properties))
    }

    async fn select(&self, controller: &ControllerId) -> Result<(), BluetoothError> {
        let adapter = self.adapter_proxy(controller);
        adapter
            .get_all(ORG_BLUEZ_ADAPTER1_NAME)
            .await
            .map_err(|_| BluetoothError::NoSuchController(controller.to_string()))?;
        Ok(())
    }

    async fn scan(&self, controller: &ControllerId, on: bool) -> Result<(), BluetoothError> {
        let adapter = self.adapter_proxy(controller);
        if on {
            adapter.start_discovery().await?;
        } else {
            // BlueZ returns an error if discovery isn't active; that's not a failure worth
            // surfacing to the caller, who just wants scanning off.
            let _ = adapter.stop_discovery().await;
        }
        Ok(())
    }

    async fn pair(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        self.device_proxy(controller, mac)
            .pair()
            .await
            .map_err(|err| BluetoothError::from_dbus_call(err, &controller.to_string(), &mac.to_string()))
    }

    async fn trust(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        self.device_proxy(controller, mac)
            .set(ORG_BLUEZ_DEVICE1_NAME, "Trusted", Variant(true))
            .await
            .map_err(|err| BluetoothError::from_dbus_call(err, &controller.to_string(), &mac.to_string()))
    }

    async fn connect(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        self.device_proxy(controller, mac)
            .connect()
            .await
            .map_err(|err| BluetoothError::from_dbus_call(err, &controller.to_string(), &mac.to_string()))
    }

    async fn disconnect(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        self.device_proxy(controller, mac)
            .disconnect()
            .await
            .map_err(|err| BluetoothError::from_dbus_call(err, &controller.to_string(), &mac.to_string()))
    }

    async fn remove(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError> {
        let device_path = Self::device_path(controller, mac);
        self.adapter_proxy(controller)
            .remove_device(device_path)
            .await
            .map_err(|err| BluetoothError::from_dbus_call(err, &controller.to_string(), &mac.to_string()))
    }
}
