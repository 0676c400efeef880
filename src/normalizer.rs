//! Raw report normalization.
//!
//! Backends hand in [`RawReport`]s in whatever granularity their platform
//! produces; the [`Normalizer`] turns them into the uniform event vocabulary:
//! one event per moved axis (X before Y), button edges instead of button
//! state, calibration attached to absolute positions, and exactly one
//! [`Disconnect`](crate::EventKind::Disconnect) per device, ever.
//!
//! The normalizer is the only stateful stage of the pipeline; everything it
//! knows about a device is seeded from the descriptor at registration time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, trace};

use crate::device::{AxisDesc, AxisKind, DeviceIndex};
use crate::event::{Event, EventKind};
use crate::queue::EventQueue;
use crate::registry::DeviceRegistry;

/// Raw Input switches a mouse collection to absolute packets for tablets and
/// remote desktops; those coordinates arrive normalized to this range even
/// though the device declared relative axes.
const OS_NORMALIZED_MAX: i32 = 65_535;

/// Backend-native input, reduced to the common denominator all platforms can
/// fill in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawReport {
    /// Motion deltas. A backend that learns about axes one at a time leaves
    /// the other field 0.
    Relative { dx: i32, dy: i32 },
    /// One absolute axis sample.
    Absolute { item: u16, value: i32 },
    /// Current state of one button. Repeats are fine; only edges make it out.
    ButtonState { item: u16, pressed: bool },
    /// Wheel turn, already in signed notches.
    Scroll { item: u16, delta: i32 },
    /// The device vanished.
    Removed,
}

#[derive(Debug)]
struct DeviceState {
    axes: Vec<AxisDesc>,
    pressed: u64,
    gone: bool,
}

/// Converts raw reports into events, tracking per-device state.
#[derive(Debug, Default)]
pub struct Normalizer {
    devices: HashMap<u32, DeviceState>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed state for a freshly registered device.
    pub fn add_device(&mut self, index: DeviceIndex, axes: &[AxisDesc]) {
        self.devices.insert(
            index.0,
            DeviceState {
                axes: axes.to_vec(),
                pressed: 0,
                gone: false,
            },
        );
    }

    /// Drop state for a device that never got a capture thread.
    pub fn forget(&mut self, index: DeviceIndex) {
        self.devices.remove(&index.0);
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Translate one report into zero or more events, appended to `out`.
    pub fn normalize(&mut self, device: DeviceIndex, report: RawReport, out: &mut Vec<Event>) {
        let state = match self.devices.get_mut(&device.0) {
            Some(s) => s,
            None => {
                debug!(%device, ?report, "report for unregistered device, dropping");
                return;
            }
        };
        if state.gone {
            // Capture threads can race a removal; whatever trickles in after
            // the Disconnect is dead traffic.
            trace!(%device, ?report, "report after disconnect, dropping");
            return;
        }

        match report {
            RawReport::Relative { dx, dy } => {
                if dx != 0 {
                    out.push(Event::new(device, EventKind::RelMotion { item: 0, value: dx }));
                }
                if dy != 0 {
                    out.push(Event::new(device, EventKind::RelMotion { item: 1, value: dy }));
                }
            }
            RawReport::Absolute { item, value } => {
                let (min, max) = match state.axes.get(item as usize) {
                    Some(axis) if axis.kind == AxisKind::Absolute => (axis.min, axis.max),
                    _ => (0, OS_NORMALIZED_MAX),
                };
                out.push(Event::new(
                    device,
                    EventKind::AbsMotion {
                        item,
                        value,
                        min,
                        max,
                    },
                ));
            }
            RawReport::ButtonState { item, pressed } => {
                if item >= 64 {
                    debug!(%device, item, "button index out of range, dropping");
                    return;
                }
                let bit = 1u64 << item;
                let was = state.pressed & bit != 0;
                if pressed != was {
                    state.pressed ^= bit;
                    out.push(Event::new(device, EventKind::Button { item, pressed }));
                }
            }
            RawReport::Scroll { item, delta } => {
                if delta != 0 {
                    out.push(Event::new(device, EventKind::Scroll { item, value: delta }));
                }
            }
            RawReport::Removed => {
                state.gone = true;
                out.push(Event::new(device, EventKind::Disconnect));
            }
        }
    }
}

/// Shared delivery end of the pipeline, cloned into every capture thread.
///
/// `deliver` runs normalize-and-enqueue under one lock so the events of a
/// multi-event report land in the queue contiguously, and handles the
/// registry retire that follows a removal.
#[derive(Clone)]
pub struct ReportSink {
    normalizer: Arc<Mutex<Normalizer>>,
    registry: Arc<RwLock<DeviceRegistry>>,
    queue: Arc<EventQueue>,
}

impl ReportSink {
    pub fn new(
        normalizer: Arc<Mutex<Normalizer>>,
        registry: Arc<RwLock<DeviceRegistry>>,
        queue: Arc<EventQueue>,
    ) -> Self {
        ReportSink {
            normalizer,
            registry,
            queue,
        }
    }

    fn normalizer(&self) -> MutexGuard<'_, Normalizer> {
        self.normalizer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn deliver(&self, device: DeviceIndex, report: RawReport) {
        let mut events = Vec::with_capacity(4);
        {
            let mut norm = self.normalizer();
            norm.normalize(device, report, &mut events);
            for event in &events {
                self.queue.push(*event);
            }
        }
        if matches!(report, RawReport::Removed) {
            let retired = self
                .registry
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retire(device);
            if retired {
                debug!(%device, "device retired after disconnect");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceDescriptor, DeviceIdentity};

    fn norm_with(axes: &[AxisDesc]) -> (Normalizer, DeviceIndex) {
        let mut norm = Normalizer::new();
        let index = DeviceIndex(0);
        norm.add_device(index, axes);
        (norm, index)
    }

    fn rel_axes() -> Vec<AxisDesc> {
        vec![AxisDesc::relative(), AxisDesc::relative()]
    }

    fn run(norm: &mut Normalizer, index: DeviceIndex, report: RawReport) -> Vec<Event> {
        let mut out = Vec::new();
        norm.normalize(index, report, &mut out);
        out
    }

    #[test]
    fn test_relative_motion_splits_x_before_y() {
        let (mut norm, dev) = norm_with(&rel_axes());
        let events = run(&mut norm, dev, RawReport::Relative { dx: 3, dy: -2 });
        assert_eq!(
            events,
            vec![
                Event::new(dev, EventKind::RelMotion { item: 0, value: 3 }),
                Event::new(dev, EventKind::RelMotion { item: 1, value: -2 }),
            ]
        );
    }

    #[test]
    fn test_relative_motion_skips_still_axes() {
        let (mut norm, dev) = norm_with(&rel_axes());
        let only_y = run(&mut norm, dev, RawReport::Relative { dx: 0, dy: 5 });
        assert_eq!(
            only_y,
            vec![Event::new(dev, EventKind::RelMotion { item: 1, value: 5 })]
        );
        assert!(run(&mut norm, dev, RawReport::Relative { dx: 0, dy: 0 }).is_empty());
    }

    #[test]
    fn test_absolute_motion_carries_declared_calibration() {
        let (mut norm, dev) = norm_with(&[AxisDesc::absolute(0, 4095), AxisDesc::absolute(0, 2047)]);
        let events = run(&mut norm, dev, RawReport::Absolute { item: 1, value: 99 });
        assert_eq!(
            events,
            vec![Event::new(
                dev,
                EventKind::AbsMotion {
                    item: 1,
                    value: 99,
                    min: 0,
                    max: 2047,
                }
            )]
        );
    }

    #[test]
    fn test_absolute_on_relative_axis_uses_os_normalized_range() {
        let (mut norm, dev) = norm_with(&rel_axes());
        let events = run(
            &mut norm,
            dev,
            RawReport::Absolute {
                item: 0,
                value: 32768,
            },
        );
        assert_eq!(
            events,
            vec![Event::new(
                dev,
                EventKind::AbsMotion {
                    item: 0,
                    value: 32768,
                    min: 0,
                    max: OS_NORMALIZED_MAX,
                }
            )]
        );
    }

    #[test]
    fn test_relative_motion_ignores_axis_calibration() {
        // Hybrid devices declare absolute axes for the calibration; their
        // relative deltas must still pass through untouched.
        let (mut norm, dev) =
            norm_with(&[AxisDesc::absolute(0, 4095), AxisDesc::absolute(0, 4095)]);
        let events = run(&mut norm, dev, RawReport::Relative { dx: 3, dy: -2 });
        assert_eq!(
            events,
            vec![
                Event::new(dev, EventKind::RelMotion { item: 0, value: 3 }),
                Event::new(dev, EventKind::RelMotion { item: 1, value: -2 }),
            ]
        );
    }

    #[test]
    fn test_buttons_emit_edges_only() {
        let (mut norm, dev) = norm_with(&rel_axes());
        let down = RawReport::ButtonState {
            item: 0,
            pressed: true,
        };
        assert_eq!(
            run(&mut norm, dev, down),
            vec![Event::new(
                dev,
                EventKind::Button {
                    item: 0,
                    pressed: true
                }
            )]
        );
        // Same state again: held, not a new press.
        assert!(run(&mut norm, dev, down).is_empty());

        let up = RawReport::ButtonState {
            item: 0,
            pressed: false,
        };
        assert_eq!(
            run(&mut norm, dev, up),
            vec![Event::new(
                dev,
                EventKind::Button {
                    item: 0,
                    pressed: false
                }
            )]
        );
        assert!(run(&mut norm, dev, up).is_empty());
    }

    #[test]
    fn test_independent_buttons_do_not_mask_each_other() {
        let (mut norm, dev) = norm_with(&rel_axes());
        run(
            &mut norm,
            dev,
            RawReport::ButtonState {
                item: 0,
                pressed: true,
            },
        );
        let right = run(
            &mut norm,
            dev,
            RawReport::ButtonState {
                item: 1,
                pressed: true,
            },
        );
        assert_eq!(
            right,
            vec![Event::new(
                dev,
                EventKind::Button {
                    item: 1,
                    pressed: true
                }
            )]
        );
    }

    #[test]
    fn test_scroll_passes_through_signed() {
        let (mut norm, dev) = norm_with(&rel_axes());
        let up = run(&mut norm, dev, RawReport::Scroll { item: 0, delta: 1 });
        assert_eq!(
            up,
            vec![Event::new(dev, EventKind::Scroll { item: 0, value: 1 })]
        );
        let left = run(&mut norm, dev, RawReport::Scroll { item: 1, delta: -3 });
        assert_eq!(
            left,
            vec![Event::new(dev, EventKind::Scroll { item: 1, value: -3 })]
        );
        assert!(run(&mut norm, dev, RawReport::Scroll { item: 0, delta: 0 }).is_empty());
    }

    #[test]
    fn test_disconnect_emitted_once_then_drops_stragglers() {
        let (mut norm, dev) = norm_with(&rel_axes());
        let first = run(&mut norm, dev, RawReport::Removed);
        assert_eq!(first, vec![Event::new(dev, EventKind::Disconnect)]);

        assert!(run(&mut norm, dev, RawReport::Removed).is_empty());
        assert!(run(&mut norm, dev, RawReport::Relative { dx: 9, dy: 9 }).is_empty());
        assert!(run(
            &mut norm,
            dev,
            RawReport::ButtonState {
                item: 0,
                pressed: true
            }
        )
        .is_empty());
    }

    #[test]
    fn test_unregistered_device_is_dropped() {
        let mut norm = Normalizer::new();
        let mut out = Vec::new();
        norm.normalize(
            DeviceIndex(7),
            RawReport::Relative { dx: 1, dy: 1 },
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_forget_makes_a_device_unknown_again() {
        let (mut norm, dev) = norm_with(&rel_axes());
        assert!(!run(&mut norm, dev, RawReport::Relative { dx: 1, dy: 0 }).is_empty());

        norm.forget(dev);
        // No Disconnect here: forget is for devices that never went live.
        assert!(run(&mut norm, dev, RawReport::Relative { dx: 1, dy: 0 }).is_empty());
        assert!(run(&mut norm, dev, RawReport::Removed).is_empty());
    }

    #[test]
    fn test_sink_enqueues_and_retires() {
        let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
        let queue = Arc::new(EventQueue::new(32));
        let normalizer = Arc::new(Mutex::new(Normalizer::new()));

        let desc = DeviceDescriptor {
            name: "sink mouse".into(),
            backend: "test",
            identity: DeviceIdentity::default(),
            axes: rel_axes(),
            buttons: 3,
        };
        let index = registry.write().unwrap().register(&desc);
        normalizer.lock().unwrap().add_device(index, &desc.axes);

        let sink = ReportSink::new(normalizer, registry.clone(), queue.clone());
        sink.deliver(index, RawReport::Relative { dx: 2, dy: 4 });
        sink.deliver(index, RawReport::Removed);
        sink.deliver(index, RawReport::Relative { dx: 1, dy: 1 });

        assert_eq!(
            queue.poll(),
            Some(Event::new(index, EventKind::RelMotion { item: 0, value: 2 }))
        );
        assert_eq!(
            queue.poll(),
            Some(Event::new(index, EventKind::RelMotion { item: 1, value: 4 }))
        );
        assert_eq!(queue.poll(), Some(Event::new(index, EventKind::Disconnect)));
        assert_eq!(queue.poll(), None);
        assert!(registry.read().unwrap().lookup(index).is_none());
    }
}
