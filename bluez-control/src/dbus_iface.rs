//! Thin nonblock D-Bus proxy bindings for the subset of the BlueZ object API this crate drives:
//! `org.bluez.Adapter1` and `org.bluez.Device1` method calls. Property access (Paired, Trusted,
//! Connected, Alias, Address, ...) goes through `dbus`'s generic
//! `org.freedesktop.DBus.Properties` trait instead, so it isn't duplicated here.
//!
//! Hand-written rather than run through `dbus-codegen-rust`, since the two interfaces used here
//! are a handful of methods; see `session.rs` for how they're invoked.
use dbus::arg::PropMap;
use dbus::nonblock;
use std::collections::HashMap;

pub const ORG_BLUEZ_ADAPTER1_NAME: &str = "org.bluez.Adapter1";
pub const ORG_BLUEZ_DEVICE1_NAME: &str = "org.bluez.Device1";

pub trait OrgBluezAdapter1 {
    fn start_discovery(&self) -> nonblock::MethodReply<()>;
    fn stop_discovery(&self) -> nonblock::MethodReply<()>;
    fn remove_device(&self, device: dbus::Path) -> nonblock::MethodReply<()>;
}

impl<'a, T: nonblock::NonblockReply, C: ::std::ops::Deref<Target = T>> OrgBluezAdapter1
    for nonblock::Proxy<'a, C>
{
    fn start_discovery(&self) -> nonblock::MethodReply<()> {
        self.method_call(ORG_BLUEZ_ADAPTER1_NAME, "StartDiscovery", ())
    }

    fn stop_discovery(&self) -> nonblock::MethodReply<()> {
        self.method_call(ORG_BLUEZ_ADAPTER1_NAME, "StopDiscovery", ())
    }

    fn remove_device(&self, device: dbus::Path) -> nonblock::MethodReply<()> {
        self.method_call(ORG_BLUEZ_ADAPTER1_NAME, "RemoveDevice", (device,))
    }
}

pub trait OrgBluezDevice1 {
    fn connect(&self) -> nonblock::MethodReply<()>;
    fn disconnect(&self) -> nonblock::MethodReply<()>;
    fn pair(&self) -> nonblock::MethodReply<()>;
}

impl<'a, T: nonblock::NonblockReply, C: ::std::ops::Deref<Target = T>> OrgBluezDevice1
    for nonblock::Proxy<'a, C>
{
    fn connect(&self) -> nonblock::MethodReply<()> {
        self.method_call(ORG_BLUEZ_DEVICE1_NAME, "Connect", ())
    }

    fn disconnect(&self) -> nonblock::MethodReply<()> {
        self.method_call(ORG_BLUEZ_DEVICE1_NAME, "Disconnect", ())
    }

    fn pair(&self) -> nonblock::MethodReply<()> {
        self.method_call(ORG_BLUEZ_DEVICE1_NAME, "Pair", ())
    }
}

/// Newtype so callers can pull fields out of a `GetManagedObjects` interfaces map without
/// repeating the `org.bluez.Adapter1` string everywhere.
pub struct OrgBluezAdapter1Properties<'a>(pub &'a PropMap);

impl<'a> OrgBluezAdapter1Properties<'a> {
    pub fn from_interfaces(
        interfaces: &'a HashMap<String, PropMap>,
    ) -> Option<Self> {
        interfaces.get(ORG_BLUEZ_ADAPTER1_NAME).map(Self)
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        dbus::arg::cast::<String>(&self.0.get(name)?.0).map(String::as_str)
    }

    pub fn address(&self) -> Option<&str> {
        self.get_str("Address")
    }

    pub fn alias(&self) -> Option<&str> {
        self.get_str("Alias")
    }
}

pub struct OrgBluezDevice1Properties<'a>(pub &'a PropMap);

impl<'a> OrgBluezDevice1Properties<'a> {
    pub fn from_interfaces(
        interfaces: &'a HashMap<String, PropMap>,
    ) -> Option<Self> {
        interfaces.get(ORG_BLUEZ_DEVICE1_NAME).map(Self)
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        dbus::arg::cast::<String>(&self.0.get(name)?.0).map(String::as_str)
    }

    fn get_bool(&self, name: &str) -> Option<bool> {
        dbus::arg::cast::<bool>(&self.0.get(name)?.0).copied()
    }

    pub fn address(&self) -> Option<&str> {
        self.get_str("Address")
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str("Name")
    }

    pub fn paired(&self) -> Option<bool> {
        self.get_bool("Paired")
    }

    pub fn trusted(&self) -> Option<bool> {
        self.get_bool("Trusted")
    }

    pub fn connected(&self) -> Option<bool> {
        self.get_bool("Connected")
    }
}
