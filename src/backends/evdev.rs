//! Linux backend on the kernel evdev interface.
//!
//! Reads `/dev/input/event*` nodes directly, one channel per mouse, so every
//! device keeps its own stream instead of being merged by the display server.
//! Works on consoles and under Wayland/X11 alike.
//!
//! A device counts as a mouse when it declares `BTN_LEFT` plus either a
//! relative X/Y pair or an absolute one (touchpads and tablets fall in the
//! second group). Any device with the absolute pair, hybrids included, gets
//! its axis calibration from the kernel at enumeration. Keyboards and plain
//! joysticks declare neither pair and are skipped.
//!
//! Note on permissions: event nodes are usually owned by `root:input`, so
//! either run from that group or add a udev rule. Devices we cannot read are
//! skipped at discovery, not errors.

use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use evdev::{AbsoluteAxisType, Device, InputEvent, InputEventKind, Key, RelativeAxisType};
use tracing::{debug, warn};

use crate::backends::{Backend, CaptureContext};
use crate::device::{AxisDesc, DeviceDescriptor, DeviceIdentity};
use crate::error::BackendError;
use crate::normalizer::RawReport;

// BTN_LEFT through BTN_TASK; item = code - BTN_LEFT, so left/right/middle
// come out as 0/1/2.
const BTN_FIRST: u16 = 0x110;
const BTN_LAST: u16 = 0x117;

struct Channel {
    dev: Device,
    path: String,
    dead: bool,
}

pub struct EvdevBackend {
    channels: Vec<Channel>,
}

impl EvdevBackend {
    pub fn new() -> Self {
        EvdevBackend {
            channels: Vec::new(),
        }
    }
}

impl Default for EvdevBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_pointer(dev: &Device) -> bool {
    let has_left_button = dev
        .supported_keys()
        .map_or(false, |keys| keys.contains(Key::BTN_LEFT));
    if !has_left_button {
        return false;
    }
    let rel_pair = dev.supported_relative_axes().map_or(false, |axes| {
        axes.contains(RelativeAxisType::REL_X) && axes.contains(RelativeAxisType::REL_Y)
    });
    let abs_pair = dev.supported_absolute_axes().map_or(false, |axes| {
        axes.contains(AbsoluteAxisType::ABS_X) && axes.contains(AbsoluteAxisType::ABS_Y)
    });
    rel_pair || abs_pair
}

fn abs_axes(state: &[libc::input_absinfo]) -> Vec<AxisDesc> {
    let x = state[AbsoluteAxisType::ABS_X.0 as usize];
    let y = state[AbsoluteAxisType::ABS_Y.0 as usize];
    vec![
        AxisDesc::absolute(x.minimum, x.maximum),
        AxisDesc::absolute(y.minimum, y.maximum),
    ]
}

fn describe(path: &Path, dev: &Device) -> DeviceDescriptor {
    let path_str = path.display().to_string();
    let id = dev.input_id();

    // The absolute pair wins whenever the device has one, hybrids included:
    // translate() forwards EV_ABS regardless of what else the device
    // declares, and the kernel ranges are the only calibration for those
    // values. Relative deltas never consult the axis table.
    let abs_pair = dev.supported_absolute_axes().map_or(false, |axes| {
        axes.contains(AbsoluteAxisType::ABS_X) && axes.contains(AbsoluteAxisType::ABS_Y)
    });
    let axes = if abs_pair {
        match dev.get_abs_state() {
            Ok(state) => abs_axes(&state),
            Err(e) => {
                debug!(path = %path_str, error = %e, "could not read absolute axis ranges");
                vec![AxisDesc::absolute(0, 0), AxisDesc::absolute(0, 0)]
            }
        }
    } else {
        vec![AxisDesc::relative(), AxisDesc::relative()]
    };

    let buttons = dev.supported_keys().map_or(0, |keys| {
        keys.iter()
            .filter(|k| (BTN_FIRST..=BTN_LAST).contains(&k.code()))
            .count() as u16
    });

    DeviceDescriptor {
        name: dev.name().unwrap_or("Unknown mouse").to_string(),
        backend: "evdev",
        identity: DeviceIdentity {
            vendor: id.vendor(),
            product: id.product(),
            serial: dev
                .unique_name()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            path: path_str,
        },
        axes,
        buttons,
    }
}

fn set_nonblocking(dev: &Device) -> io::Result<()> {
    let fd = dev.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn button_item(code: u16) -> Option<u16> {
    (BTN_FIRST..=BTN_LAST)
        .contains(&code)
        .then(|| code - BTN_FIRST)
}

fn translate(ev: &InputEvent) -> Option<RawReport> {
    match ev.kind() {
        InputEventKind::Key(key) => button_item(key.code()).map(|item| RawReport::ButtonState {
            item,
            pressed: ev.value() != 0,
        }),
        InputEventKind::RelAxis(axis) => match axis {
            RelativeAxisType::REL_X => Some(RawReport::Relative {
                dx: ev.value(),
                dy: 0,
            }),
            RelativeAxisType::REL_Y => Some(RawReport::Relative {
                dx: 0,
                dy: ev.value(),
            }),
            RelativeAxisType::REL_WHEEL => Some(RawReport::Scroll {
                item: 0,
                delta: ev.value(),
            }),
            RelativeAxisType::REL_HWHEEL => Some(RawReport::Scroll {
                item: 1,
                delta: ev.value(),
            }),
            // Leaves REL_*_HI_RES alone so wheel notches are not counted twice.
            _ => None,
        },
        InputEventKind::AbsAxis(axis) => match axis {
            AbsoluteAxisType::ABS_X => Some(RawReport::Absolute {
                item: 0,
                value: ev.value(),
            }),
            AbsoluteAxisType::ABS_Y => Some(RawReport::Absolute {
                item: 1,
                value: ev.value(),
            }),
            _ => None,
        },
        _ => None,
    }
}

impl Backend for EvdevBackend {
    fn name(&self) -> &'static str {
        "evdev"
    }

    fn discover(&mut self) -> Result<Vec<DeviceDescriptor>, BackendError> {
        let mut out = Vec::new();
        for (path, dev) in evdev::enumerate() {
            if is_pointer(&dev) {
                out.push(describe(&path, &dev));
            }
        }
        debug!(found = out.len(), "evdev discovery complete");
        Ok(out)
    }

    fn open(&mut self, desc: &DeviceDescriptor) -> Result<usize, BackendError> {
        let path = &desc.identity.path;
        let dev =
            Device::open(path).map_err(|e| BackendError::open(path, e))?;
        set_nonblocking(&dev).map_err(|e| BackendError::open(path, e))?;
        self.channels.push(Channel {
            dev,
            path: path.clone(),
            dead: false,
        });
        Ok(self.channels.len() - 1)
    }

    fn run(self: Box<Self>, ctx: CaptureContext) {
        let CaptureContext {
            indices,
            sink,
            stop,
            idle,
        } = ctx;
        let mut channels = self.channels;

        loop {
            let mut saw_input = false;
            for (slot, ch) in channels.iter_mut().enumerate() {
                if ch.dead {
                    continue;
                }
                let index = indices[slot];
                match ch.dev.fetch_events() {
                    Ok(events) => {
                        for ev in events {
                            if let Some(report) = translate(&ev) {
                                saw_input = true;
                                sink.deliver(index, report);
                            }
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        let err = BackendError::read(&ch.path, e);
                        warn!(%err, "treating device as disconnected");
                        ch.dead = true;
                        sink.deliver(index, RawReport::Removed);
                    }
                }
            }

            if channels.iter().all(|c| c.dead) {
                // Nothing left to read; park until shutdown.
                let _ = stop.recv();
                return;
            }

            let wait = if saw_input { Duration::ZERO } else { idle };
            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::EventType;

    #[test]
    fn test_button_item_mapping() {
        assert_eq!(button_item(0x110), Some(0)); // BTN_LEFT
        assert_eq!(button_item(0x111), Some(1)); // BTN_RIGHT
        assert_eq!(button_item(0x112), Some(2)); // BTN_MIDDLE
        assert_eq!(button_item(0x117), Some(7)); // BTN_TASK
        assert_eq!(button_item(0x118), None);
        assert_eq!(button_item(0x30), None); // KEY_A
    }

    #[test]
    fn test_translate_relative_axes() {
        let x = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, 3);
        assert_eq!(translate(&x), Some(RawReport::Relative { dx: 3, dy: 0 }));

        let y = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_Y.0, -2);
        assert_eq!(translate(&y), Some(RawReport::Relative { dx: 0, dy: -2 }));
    }

    #[test]
    fn test_translate_wheels() {
        let up = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_WHEEL.0, 1);
        assert_eq!(translate(&up), Some(RawReport::Scroll { item: 0, delta: 1 }));

        let left = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_HWHEEL.0, -1);
        assert_eq!(
            translate(&left),
            Some(RawReport::Scroll { item: 1, delta: -1 })
        );

        let hi_res = InputEvent::new(
            EventType::RELATIVE,
            RelativeAxisType::REL_WHEEL_HI_RES.0,
            120,
        );
        assert_eq!(translate(&hi_res), None);
    }

    #[test]
    fn test_translate_buttons_and_abs() {
        let down = InputEvent::new(EventType::KEY, 0x110, 1);
        assert_eq!(
            translate(&down),
            Some(RawReport::ButtonState {
                item: 0,
                pressed: true
            })
        );

        let up = InputEvent::new(EventType::KEY, 0x111, 0);
        assert_eq!(
            translate(&up),
            Some(RawReport::ButtonState {
                item: 1,
                pressed: false
            })
        );

        let abs = InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_Y.0, 512);
        assert_eq!(
            translate(&abs),
            Some(RawReport::Absolute {
                item: 1,
                value: 512
            })
        );
    }

    #[test]
    fn test_translate_ignores_unrelated_events() {
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        assert_eq!(translate(&syn), None);

        let keyboard = InputEvent::new(EventType::KEY, 0x30, 1); // KEY_A
        assert_eq!(translate(&keyboard), None);
    }

    #[test]
    fn test_abs_axes_read_kernel_calibration() {
        let blank = libc::input_absinfo {
            value: 0,
            minimum: 0,
            maximum: 0,
            fuzz: 0,
            flat: 0,
            resolution: 0,
        };
        let mut state = [blank; 64];
        state[AbsoluteAxisType::ABS_X.0 as usize] = libc::input_absinfo {
            maximum: 4095,
            ..blank
        };
        state[AbsoluteAxisType::ABS_Y.0 as usize] = libc::input_absinfo {
            minimum: -2048,
            maximum: 2047,
            ..blank
        };
        assert_eq!(
            abs_axes(&state),
            vec![AxisDesc::absolute(0, 4095), AxisDesc::absolute(-2048, 2047)]
        );
    }
}
