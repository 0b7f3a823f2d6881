use std::collections::HashSet;

use anyhow::Result;
use bluer::{Adapter, Address, Session, Uuid};
use tracing::{debug, info};

use crate::protocol::commands::SPP_UUID;

/// A paired Bluetooth device.
#[derive(Debug, Clone)]
pub struct BluetoothDevice {
    pub name: String,
    pub address: Address,
    pub connected: bool,
    pub services: HashSet<Uuid>,
}

impl BluetoothDevice {
    /// Whether the device advertises the Serial Port Profile.
    pub fn has_serial_port(&self) -> bool {
        self.services.contains(&SPP_UUID)
    }
}

/// List paired devices on the default adapter.
pub async fn list_paired_devices() -> Result<Vec<BluetoothDevice>> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;

    let mut result = Vec::new();
    for addr in adapter.device_addresses().await? {
        if let Some(dev) = paired_or_skip(&adapter, addr).await {
            result.push(dev);
        }
    }

    info!("Found {} paired devices", result.len());
    Ok(result)
}

/// Find a paired device by address or exact name.
///
/// Only listing the adapter's devices can fail. An address BlueZ does not
/// know, or a device that cannot be read, is reported as not found.
pub async fn find_paired(adapter: &Adapter, identifier: &str) -> bluer::Result<Option<BluetoothDevice>> {
    let known = adapter.device_addresses().await?;

    match plan_lookup(identifier, &known) {
        Lookup::Address(addr) => Ok(paired_or_skip(adapter, addr).await),
        Lookup::UnknownAddress => {
            debug!("{} is not known to the adapter", identifier);
            Ok(None)
        }
        Lookup::Name => {
            for addr in known {
                if let Some(dev) = paired_or_skip(adapter, addr).await {
                    if matches_name(&dev.name, identifier) {
                        return Ok(Some(dev));
                    }
                }
            }
            Ok(None)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Lookup {
    Address(Address),
    UnknownAddress,
    Name,
}

fn plan_lookup(identifier: &str, known: &[Address]) -> Lookup {
    match identifier.parse::<Address>() {
        Ok(addr) if known.contains(&addr) => Lookup::Address(addr),
        Ok(_) => Lookup::UnknownAddress,
        Err(_) => Lookup::Name,
    }
}

/// Devices can disappear between listing and reading their properties.
async fn paired_or_skip(adapter: &Adapter, addr: Address) -> Option<BluetoothDevice> {
    match describe_paired(adapter, addr).await {
        Ok(dev) => dev,
        Err(e) => {
            debug!("Skipping {}: {}", addr, e);
            None
        }
    }
}

async fn describe_paired(adapter: &Adapter, addr: Address) -> bluer::Result<Option<BluetoothDevice>> {
    let device = adapter.device(addr)?;
    if !device.is_paired().await? {
        return Ok(None);
    }

    let name = device.name().await?.unwrap_or_default();
    let connected = device.is_connected().await?;
    let services = device.uuids().await?.unwrap_or_default();

    debug!("Paired device: {} ({}), connected={}", name, addr, connected);
    Ok(Some(BluetoothDevice {
        name,
        address: addr,
        connected,
        services,
    }))
}

fn matches_name(name: &str, identifier: &str) -> bool {
    !identifier.is_empty() && name == identifier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_match_is_exact() {
        assert!(matches_name("HUAWEI FreeBuds 5i", "HUAWEI FreeBuds 5i"));
        assert!(!matches_name("HUAWEI FreeBuds 5i", "HUAWEI FreeBuds"));
        assert!(!matches_name("", ""));
    }

    #[test]
    fn test_lookup_plan() {
        let buds = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let known = [Address([0, 1, 2, 3, 4, 5]), buds];

        assert_eq!(plan_lookup("AA:BB:CC:DD:EE:FF", &known), Lookup::Address(buds));
        assert_eq!(plan_lookup("11:22:33:44:55:66", &known), Lookup::UnknownAddress);
        assert_eq!(plan_lookup("AA:BB:CC:DD:EE:FF", &[]), Lookup::UnknownAddress);
        assert_eq!(plan_lookup("HUAWEI FreeBuds 5i", &known), Lookup::Name);
    }

    #[test]
    fn test_serial_port_detection() {
        let mut dev = BluetoothDevice {
            name: "buds".into(),
            address: Address([0, 1, 2, 3, 4, 5]),
            connected: false,
            services: HashSet::new(),
        };
        assert!(!dev.has_serial_port());
        dev.services.insert(SPP_UUID);
        assert!(dev.has_serial_port());
    }
}
