//! Device descriptions and identity.
//!
//! A backend reports each pointing device it finds as a [`DeviceDescriptor`].
//! Once the device is opened, the session registers it and it becomes a
//! [`Device`] with a stable [`DeviceIndex`].
//!
//! # Conventions
//! - Axis items are positional: item `0` is X, item `1` is Y.
//! - `DeviceIdentity::key()` is the cross-backend dedup key: the
//!   vendor/product/serial triple when a serial exists, else the OS path.
//!   Serials are stable across input APIs; paths are unique within one.
//! - `path` is an OS/topology path (opaque string); treat it as diagnostic
//!   first, identity second.

use serde::Serialize;

/// Stable index of a registered device.
///
/// Assigned sequentially from 0 at session start and never reused while the
/// session lives; a disconnected device leaves a permanent hole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceIndex(pub u32);

impl DeviceIndex {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for DeviceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an axis reports position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AxisKind {
    /// Deltas per report (regular mice).
    Relative,
    /// Positions within a fixed range (tablets, touchscreens, RDP mice).
    Absolute,
}

/// One axis as declared by the device at enumeration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AxisDesc {
    pub kind: AxisKind,
    /// Lowest reportable value. `0` for relative axes.
    pub min: i32,
    /// Highest reportable value. `0` for relative axes.
    pub max: i32,
}

impl AxisDesc {
    pub fn relative() -> Self {
        AxisDesc {
            kind: AxisKind::Relative,
            min: 0,
            max: 0,
        }
    }

    pub fn absolute(min: i32, max: i32) -> Self {
        AxisDesc {
            kind: AxisKind::Absolute,
            min,
            max,
        }
    }
}

/// Hardware identity of a device, used to spot the same physical mouse when
/// several backends can reach it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// USB vendor id, `0` when unknown.
    pub vendor: u16,
    /// USB product id, `0` when unknown.
    pub product: u16,
    /// Firmware serial number, when the platform reports one.
    pub serial: Option<String>,
    /// OS path of the node this backend would open.
    pub path: String,
}

impl DeviceIdentity {
    /// Dedup key. See the module docs for the rules.
    pub fn key(&self) -> String {
        match &self.serial {
            Some(serial) if !serial.is_empty() => {
                format!("{:04x}:{:04x}:{}", self.vendor, self.product, serial)
            }
            _ => self.path.clone(),
        }
    }

    /// Vendor/product pair, for the fallback backend's claimed-hardware check.
    pub fn pair(&self) -> (u16, u16) {
        (self.vendor, self.product)
    }
}

/// A pointing device a backend discovered but has not opened yet.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceDescriptor {
    /// Human-readable name, best effort (`"Unknown mouse"` when the platform
    /// gives nothing).
    pub name: String,
    /// Short tag of the backend that found it (`"evdev"`, `"rawinput"`, ...).
    pub backend: &'static str,
    pub identity: DeviceIdentity,
    /// Declared axes in item order (X, then Y).
    pub axes: Vec<AxisDesc>,
    /// Number of buttons the device claims to have.
    pub buttons: u16,
}

/// A registered, opened device.
#[derive(Clone, Debug, Serialize)]
pub struct Device {
    pub index: DeviceIndex,
    pub name: String,
    pub backend: &'static str,
    pub axes: Vec<AxisDesc>,
    pub buttons: u16,
    pub identity: DeviceIdentity,
}
