//! In-process virtual mice.
//!
//! A [`VirtualBackend`] looks exactly like a hardware backend to the session,
//! but its devices are declared in code and fed through a [`VirtualHandle`].
//! Demos use it to fake a second mouse; tests use it to drive the whole
//! pipeline without hardware, including open failures and disconnects.
//!
//! ```no_run
//! use rawmice::backends::virtual_input::{VirtualBackend, VirtualMouse};
//! use rawmice::{Session, SessionConfig};
//!
//! let mut backend = VirtualBackend::new();
//! let mouse = backend.add(VirtualMouse::new("Virtual Mouse 0"));
//! let handle = backend.handle();
//!
//! let session = Session::init_with(SessionConfig::default(), vec![Box::new(backend)])?;
//! handle.motion(mouse, 3, -2);
//! assert!(session.device_count() > 0);
//! # Ok::<(), rawmice::InitError>(())
//! ```

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::backends::{Backend, CaptureContext};
use crate::device::{AxisDesc, DeviceDescriptor, DeviceIdentity};
use crate::error::BackendError;
use crate::normalizer::RawReport;

/// One scripted device.
#[derive(Clone, Debug)]
pub struct VirtualMouse {
    name: String,
    buttons: u16,
    axes: Vec<AxisDesc>,
    serial: Option<String>,
    fail_open: bool,
}

impl VirtualMouse {
    pub fn new(name: impl Into<String>) -> Self {
        VirtualMouse {
            name: name.into(),
            buttons: 3,
            axes: vec![AxisDesc::relative(), AxisDesc::relative()],
            serial: None,
            fail_open: false,
        }
    }

    pub fn buttons(mut self, buttons: u16) -> Self {
        self.buttons = buttons;
        self
    }

    /// Declare absolute X/Y axes with the given calibration.
    pub fn absolute(mut self, min: i32, max: i32) -> Self {
        self.axes = vec![AxisDesc::absolute(min, max), AxisDesc::absolute(min, max)];
        self
    }

    /// Give the device a serial, making its identity portable across
    /// backends (for dedup scenarios).
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Make `open` fail for this device. It will be discovered, then skipped.
    pub fn failing(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

/// Feeds reports into a running [`VirtualBackend`]. Cloneable; slots are the
/// values [`VirtualBackend::add`] returned.
#[derive(Clone)]
pub struct VirtualHandle {
    tx: Sender<(usize, RawReport)>,
}

impl VirtualHandle {
    /// Returns `false` once the backend is gone.
    pub fn feed(&self, slot: usize, report: RawReport) -> bool {
        self.tx.send((slot, report)).is_ok()
    }

    pub fn motion(&self, slot: usize, dx: i32, dy: i32) -> bool {
        self.feed(slot, RawReport::Relative { dx, dy })
    }

    pub fn position(&self, slot: usize, item: u16, value: i32) -> bool {
        self.feed(slot, RawReport::Absolute { item, value })
    }

    pub fn button(&self, slot: usize, item: u16, pressed: bool) -> bool {
        self.feed(slot, RawReport::ButtonState { item, pressed })
    }

    pub fn scroll(&self, slot: usize, item: u16, delta: i32) -> bool {
        self.feed(slot, RawReport::Scroll { item, delta })
    }

    /// Simulate the device being yanked.
    pub fn unplug(&self, slot: usize) -> bool {
        self.feed(slot, RawReport::Removed)
    }
}

pub struct VirtualBackend {
    devices: Vec<VirtualMouse>,
    // declared slot -> open slot, filled during `open`
    active: Vec<Option<usize>>,
    opened: usize,
    fallback: bool,
    tx: Sender<(usize, RawReport)>,
    rx: Receiver<(usize, RawReport)>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        VirtualBackend {
            devices: Vec::new(),
            active: Vec::new(),
            opened: 0,
            fallback: false,
            tx,
            rx,
        }
    }

    /// Declare a device. Returns its slot for use with the handle.
    pub fn add(&mut self, mouse: VirtualMouse) -> usize {
        self.devices.push(mouse);
        self.active.push(None);
        self.devices.len() - 1
    }

    /// Report as a fallback backend (subject to claimed-hardware skips).
    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    pub fn handle(&self) -> VirtualHandle {
        VirtualHandle {
            tx: self.tx.clone(),
        }
    }

    fn path_of(slot: usize) -> String {
        format!("virtual/{slot}")
    }

    fn slot_by_path(&self, path: &str) -> Option<usize> {
        (0..self.devices.len()).find(|&slot| Self::path_of(slot) == path)
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for VirtualBackend {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn discover(&mut self) -> Result<Vec<DeviceDescriptor>, BackendError> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(slot, dev)| DeviceDescriptor {
                name: dev.name.clone(),
                backend: "virtual",
                identity: DeviceIdentity {
                    vendor: 0x0f0f,
                    product: slot as u16,
                    serial: dev.serial.clone(),
                    path: Self::path_of(slot),
                },
                axes: dev.axes.clone(),
                buttons: dev.buttons,
            })
            .collect())
    }

    fn open(&mut self, desc: &DeviceDescriptor) -> Result<usize, BackendError> {
        let slot = self
            .slot_by_path(&desc.identity.path)
            .ok_or_else(|| BackendError::open(&desc.identity.path, "no such virtual device"))?;
        if self.devices[slot].fail_open {
            return Err(BackendError::open(
                &desc.identity.path,
                "scripted open failure",
            ));
        }
        let open_slot = self.opened;
        self.opened += 1;
        self.active[slot] = Some(open_slot);
        Ok(open_slot)
    }

    fn run(self: Box<Self>, ctx: CaptureContext) {
        loop {
            crossbeam_channel::select! {
                recv(self.rx) -> msg => match msg {
                    Ok((slot, report)) => {
                        match self.active.get(slot).copied().flatten() {
                            Some(open_slot) => ctx.sink.deliver(ctx.indices[open_slot], report),
                            None => debug!(slot, "report for unopened virtual device, dropping"),
                        }
                    }
                    // Every handle is gone; nothing can ever arrive again.
                    Err(_) => break,
                },
                recv(ctx.stop) -> _ => break,
            }
        }
    }

    fn is_fallback(&self) -> bool {
        self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_assigns_dense_slots_and_skips_failures() {
        let mut backend = VirtualBackend::new();
        backend.add(VirtualMouse::new("bad").failing());
        backend.add(VirtualMouse::new("good a"));
        backend.add(VirtualMouse::new("good b"));

        let descs = backend.discover().unwrap();
        assert_eq!(descs.len(), 3);

        assert!(backend.open(&descs[0]).is_err());
        assert_eq!(backend.open(&descs[1]).unwrap(), 0);
        assert_eq!(backend.open(&descs[2]).unwrap(), 1);
    }

    #[test]
    fn test_descriptors_have_unique_paths() {
        let mut backend = VirtualBackend::new();
        backend.add(VirtualMouse::new("a"));
        backend.add(VirtualMouse::new("b"));
        let descs = backend.discover().unwrap();
        assert_ne!(descs[0].identity.key(), descs[1].identity.key());
    }

    #[test]
    fn test_serial_makes_identity_portable() {
        let mut one = VirtualBackend::new();
        one.add(VirtualMouse::new("same").serial("S1"));
        let mut two = VirtualBackend::new();
        two.add(VirtualMouse::new("same").serial("S1"));

        let a = one.discover().unwrap();
        let b = two.discover().unwrap();
        assert_eq!(a[0].identity.key(), b[0].identity.key());
    }
}
