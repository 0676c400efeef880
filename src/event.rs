//! Normalized input events.
//!
//! Every backend reduces its platform's raw traffic to the same small event
//! vocabulary: motion, buttons, scroll, disconnect. One event describes one
//! change on one device; nothing is merged across devices.
//!
//! ## Value conventions
//! - **Relative motion:** raw OS counts, one event per axis that moved,
//!   X (item 0) before Y (item 1). Axes that did not move emit nothing.
//! - **Absolute motion:** raw position plus the axis calibration captured at
//!   enumeration, so consumers can scale without a device lookup.
//! - **Buttons:** press/release edges only; item 0 = left, 1 = right,
//!   2 = middle, then extras in device order. `value` on the wire is `1`/`0`.
//! - **Scroll:** signed notch count; item 0 = vertical (positive = up),
//!   item 1 = horizontal (positive = right).
//! - **Disconnect:** the final event a device index ever produces.

use serde::{Deserialize, Serialize};

use crate::device::DeviceIndex;

/// Per-device input change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// An absolute axis reported a position.
    ///
    /// `min`/`max` repeat the axis calibration so the event is
    /// self-describing.
    AbsMotion {
        item: u16,
        value: i32,
        min: i32,
        max: i32,
    },

    /// A relative axis moved by `value` counts.
    RelMotion { item: u16, value: i32 },

    /// A button changed state.
    Button { item: u16, pressed: bool },

    /// A wheel turned by `value` notches.
    Scroll { item: u16, value: i32 },

    /// The device is gone. Always the last event for its index.
    Disconnect,
}

impl EventKind {
    /// Numeric type tag used on the wire: `AbsMotion` = 0, `RelMotion` = 1,
    /// `Button` = 2, `Scroll` = 3, `Disconnect` = 4.
    pub const fn code(&self) -> u8 {
        match self {
            EventKind::AbsMotion { .. } => 0,
            EventKind::RelMotion { .. } => 1,
            EventKind::Button { .. } => 2,
            EventKind::Scroll { .. } => 3,
            EventKind::Disconnect => 4,
        }
    }
}

/// One input occurrence on one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub device: DeviceIndex,
    pub kind: EventKind,
}

impl Event {
    pub fn new(device: DeviceIndex, kind: EventKind) -> Self {
        Event { device, kind }
    }

    /// Flatten into the binding-friendly record shape.
    pub fn to_wire(&self) -> WireEvent {
        let (item, value, minval, maxval) = match self.kind {
            EventKind::AbsMotion {
                item,
                value,
                min,
                max,
            } => (item, value, min, max),
            EventKind::RelMotion { item, value } => (item, value, 0, 0),
            EventKind::Button { item, pressed } => (item, pressed as i32, 0, 0),
            EventKind::Scroll { item, value } => (item, value, 0, 0),
            EventKind::Disconnect => (0, 0, 0, 0),
        };
        WireEvent {
            kind: self.kind.code(),
            device: self.device.as_u32(),
            item,
            value,
            minval,
            maxval,
        }
    }
}

/// Flat event record for language bindings and serialization.
///
/// `minval`/`maxval` are meaningful only for `AbsMotion` (type 0) and are `0`
/// everywhere else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: u8,
    pub device: u32,
    pub item: u16,
    pub value: i32,
    pub minval: i32,
    pub maxval: i32,
}
