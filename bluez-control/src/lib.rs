//! An async wrapper around the D-Bus interface of BlueZ, the Linux Bluetooth daemon, for the
//! subset of operations needed to move a classic (A2DP) device between controllers: listing
//! controllers and devices, pairing, trusting, connecting, disconnecting and removing, and
//! polling the ground-truth state of a device.
//!
//! Start by creating a [`BlueZSession`]. For tests, [`fake::FakeBluetoothControl`] implements
//! the same [`BluetoothControl`] trait without touching the daemon.

mod adapter;
mod dbus_iface;
mod device;
pub mod fake;
mod macaddress;
mod session;

pub use adapter::{ControllerId, ControllerInfo};
pub use device::{Device, DeviceFilter, DeviceFlag, DeviceStatus};
pub use macaddress::{MacAddress, ParseMacAddressError};
pub use session::BlueZSession;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for [`BluetoothControl::wait_for_flag`], per the Bluetooth Control Adapter
/// design: 30 seconds.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Poll period for [`BluetoothControl::wait_for_flag`]: re-check `device_info` every 2 seconds.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// An error carrying out a Bluetooth operation.
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No controller with the given id/MAC is known to the daemon.
    #[error("No such Bluetooth controller: {0}")]
    NoSuchController(String),
    /// No such device is known on the given controller.
    #[error("No such device {device} on controller {controller}")]
    NoSuchDevice { controller: String, device: String },
    /// The daemon reported the controller or device was busy with another operation.
    #[error("Bluetooth controller or device busy: {0}")]
    Busy(String),
    /// There was an error talking to the BlueZ daemon over D-Bus.
    #[error(transparent)]
    DbusError(#[from] dbus::Error),
    /// A required property of some device or controller was not found.
    #[error("Required property {0} missing.")]
    RequiredPropertyMissing(&'static str),
    /// Error parsing a `MacAddress` from a string.
    #[error(transparent)]
    MacAddressParseError(#[from] ParseMacAddressError),
}

impl BluetoothError {
    /// Classify a raw `dbus::Error` returned by a method call against a device or adapter path
    /// into the taxonomy callers actually want to branch on.
    pub(crate) fn from_dbus_call(err: dbus::Error, controller: &str, device: &str) -> Self {
        match err.name() {
            Some("org.bluez.Error.DoesNotExist") | Some("org.freedesktop.DBus.Error.UnknownObject") => {
                BluetoothError::NoSuchDevice {
                    controller: controller.to_owned(),
                    device: device.to_owned(),
                }
            }
            Some("org.bluez.Error.InProgress") | Some("org.bluez.Error.AlreadyConnected") => {
                BluetoothError::Busy(err.to_string())
            }
            _ => BluetoothError::DbusError(err),
        }
    }
}

/// Outcome of [`BluetoothControl::wait_for_flag`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    Reached,
    TimedOut,
}

/// The capability interface the Planner/Executor (in `orchestrator-core`) drive Bluetooth
/// operations through. Implemented for real by [`BlueZSession`] and, for tests, by
/// [`fake::FakeBluetoothControl`].
///
/// Every verb takes its controller explicitly. There is deliberately no hidden "currently
/// selected controller" state threaded through the trait: the underlying interactive-session
/// daemon used to have that as global mutable state, and it was a major source of the flakiness
/// this rewrite exists to fix. `select` is retained only as an existence check, documented on
/// the method itself.
#[async_trait]
pub trait BluetoothControl: Send + Sync {
    /// Enumerate the Bluetooth controllers (radios) known to the daemon.
    async fn list_controllers(&self) -> Result<Vec<ControllerInfo>, BluetoothError>;

    /// List devices under the given controller, filtered by pairing state.
    async fn list_devices(
        &self,
        controller: &ControllerId,
        filter: DeviceFilter,
    ) -> Result<Vec<Device>, BluetoothError>;

    /// Current ground-truth state of a device on a controller.
    async fn device_info(
        &self,
        controller: &ControllerId,
        mac: MacAddress,
    ) -> Result<DeviceStatus, BluetoothError>;

    /// Confirm the controller exists and is usable for subsequent operations. See the trait's
    /// docs: this performs no state mutation, only an existence check.
    async fn select(&self, controller: &ControllerId) -> Result<(), BluetoothError>;

    /// Toggle discovery on the given controller.
    async fn scan(&self, controller: &ControllerId, on: bool) -> Result<(), BluetoothError>;

    async fn pair(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError>;
    async fn trust(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError>;
    async fn connect(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError>;
    async fn disconnect(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError>;
    async fn remove(&self, controller: &ControllerId, mac: MacAddress) -> Result<(), BluetoothError>;

    /// Poll `device_info` every [`WAIT_POLL_INTERVAL`] until `flag` is set or `timeout` elapses.
    async fn wait_for_flag(
        &self,
        controller: &ControllerId,
        mac: MacAddress,
        flag: DeviceFlag,
        timeout: Duration,
    ) -> Result<WaitOutcome, BluetoothError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.device_info(controller, mac).await?;
            if flag.get(&status) {
                return Ok(WaitOutcome::Reached);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL.min(deadline - tokio::time::Instant::now())).await;
        }
    }
}
