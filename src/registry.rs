//! Device registry.
//!
//! Maps stable [`DeviceIndex`]es to registered devices. Indices count up from
//! 0 in registration order and are never handed out twice within a session,
//! so a consumer can key per-player state by index without worrying about a
//! reconnected mouse impersonating a departed one.

use std::collections::HashMap;

use crate::device::{Device, DeviceDescriptor, DeviceIndex};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<u32, Device>,
    next_index: u32,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an opened device and assign it the next free index.
    ///
    /// Only successfully opened devices are registered, so enumeration slots
    /// of devices that failed to open never consume an index.
    pub fn register(&mut self, desc: &DeviceDescriptor) -> DeviceIndex {
        let index = DeviceIndex(self.next_index);
        self.next_index += 1;
        self.devices.insert(
            index.0,
            Device {
                index,
                name: desc.name.clone(),
                backend: desc.backend,
                axes: desc.axes.clone(),
                buttons: desc.buttons,
                identity: desc.identity.clone(),
            },
        );
        index
    }

    /// `None` for indices that were retired or never assigned.
    pub fn lookup(&self, index: DeviceIndex) -> Option<&Device> {
        self.devices.get(&index.0)
    }

    /// Remove a device. Its index stays burned until [`clear`](Self::clear).
    ///
    /// Returns whether the device was still present, so callers can tell a
    /// first retire from a repeat.
    pub fn retire(&mut self, index: DeviceIndex) -> bool {
        self.devices.remove(&index.0).is_some()
    }

    /// Number of live devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Live devices sorted by index, for listings and diagnostics.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut out: Vec<Device> = self.devices.values().cloned().collect();
        out.sort_by_key(|d| d.index);
        out
    }

    /// Session teardown: drop everything and rewind the index counter.
    pub fn clear(&mut self) {
        self.devices.clear();
        self.next_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AxisDesc, DeviceIdentity};

    fn descriptor(name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            name: name.to_string(),
            backend: "test",
            identity: DeviceIdentity {
                vendor: 0x1234,
                product: 0x5678,
                serial: None,
                path: format!("/test/{name}"),
            },
            axes: vec![AxisDesc::relative(), AxisDesc::relative()],
            buttons: 3,
        }
    }

    #[test]
    fn test_indices_count_up_from_zero() {
        let mut reg = DeviceRegistry::new();
        assert_eq!(reg.register(&descriptor("a")), DeviceIndex(0));
        assert_eq!(reg.register(&descriptor("b")), DeviceIndex(1));
        assert_eq!(reg.register(&descriptor("c")), DeviceIndex(2));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_retired_index_is_never_reassigned() {
        let mut reg = DeviceRegistry::new();
        let a = reg.register(&descriptor("a"));
        let b = reg.register(&descriptor("b"));
        assert!(reg.retire(a));

        let c = reg.register(&descriptor("c"));
        assert_eq!(c, DeviceIndex(2));
        assert!(reg.lookup(a).is_none());
        assert!(reg.lookup(b).is_some());
        assert!(reg.lookup(c).is_some());
    }

    #[test]
    fn test_retire_is_idempotent() {
        let mut reg = DeviceRegistry::new();
        let a = reg.register(&descriptor("a"));
        assert!(reg.retire(a));
        assert!(!reg.retire(a));
        assert!(reg.lookup(a).is_none());
    }

    #[test]
    fn test_lookup_unknown_index_is_none() {
        let reg = DeviceRegistry::new();
        assert!(reg.lookup(DeviceIndex(0)).is_none());
        assert!(reg.lookup(DeviceIndex(99)).is_none());
    }

    #[test]
    fn test_snapshot_sorted_by_index() {
        let mut reg = DeviceRegistry::new();
        reg.register(&descriptor("a"));
        reg.register(&descriptor("b"));
        reg.register(&descriptor("c"));
        reg.retire(DeviceIndex(1));

        let snap = reg.snapshot();
        let indices: Vec<u32> = snap.iter().map(|d| d.index.as_u32()).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_clear_rewinds_the_counter() {
        let mut reg = DeviceRegistry::new();
        reg.register(&descriptor("a"));
        reg.register(&descriptor("b"));
        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(reg.register(&descriptor("c")), DeviceIndex(0));
    }
}
