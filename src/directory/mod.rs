//! Valve device directory
//!
//! Discovering valves costs one hub call per hub device plus the room
//! lookups, so the result is persisted and trusted on later boots until the
//! configured device type changes or a rescan is requested.

pub mod discovery;
pub mod store;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use discovery::discover;
pub use store::DirectoryStore;

/// File name of the persisted directory inside the data dir
pub const DIRECTORY_FILE_NAME: &str = "hm_device_cache.json";

/// Current persisted layout version
pub const SCHEMA_VERSION: u32 = 1;

/// Identity of a valve on the hub
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub interface: String,
    pub address: String,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.interface, self.address)
    }
}

/// A radiator valve found during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValveDevice {
    pub interface: String,
    pub address: String,
    #[serde(default)]
    pub room_name: Option<String>,
}

impl ValveDevice {
    #[must_use]
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            interface: self.interface.clone(),
            address: self.address.clone(),
        }
    }
}

/// Ordered set of valves built for one device type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDirectory {
    pub schema: u32,
    pub device_type: String,
    devices: Vec<ValveDevice>,
}

impl DeviceDirectory {
    /// Build a directory, dropping repeated `(interface, address)` pairs
    ///
    /// The first occurrence of a key wins and discovery order is kept.
    #[must_use]
    pub fn new(device_type: &str, devices: impl IntoIterator<Item = ValveDevice>) -> Self {
        let mut seen = HashSet::new();
        let devices = devices
            .into_iter()
            .filter(|d| seen.insert(d.key()))
            .collect();

        Self {
            schema: SCHEMA_VERSION,
            device_type: device_type.to_string(),
            devices,
        }
    }

    #[must_use]
    pub fn devices(&self) -> &[ValveDevice] {
        &self.devices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Whether this directory can stand in for discovery of `device_type`
    #[must_use]
    pub fn is_valid_for(&self, device_type: &str) -> bool {
        self.schema == SCHEMA_VERSION && self.device_type == device_type
    }
}
