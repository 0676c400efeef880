//! Portable HID fallback backend.
//!
//! Reads mouse-usage HID interfaces through `hidapi`. This is the capture
//! path on platforms without a native backend (macOS, the BSDs) and a safety
//! net elsewhere; the session skips any hardware a native backend already
//! claimed, so the fallback normally sits idle on Linux and Windows.
//!
//! Reports are parsed with the boot-protocol layout: buttons bitmap, then
//! signed dx/dy, then an optional signed wheel byte. Mice that prefix a
//! report ID need the full report descriptor to decode reliably, which
//! `hidapi` does not expose; those fall outside what this backend promises.

use std::ffi::CString;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use hidapi::{HidApi, HidDevice};
use tracing::{debug, warn};

use crate::backends::{Backend, CaptureContext};
use crate::device::{AxisDesc, DeviceDescriptor, DeviceIdentity};
use crate::error::BackendError;
use crate::normalizer::RawReport;

const USAGE_PAGE_GENERIC_DESKTOP: u16 = 0x01;
const USAGE_MOUSE: u16 = 0x02;

/// Boot protocol defines three buttons; two more bits are common enough in
/// practice to pass through.
const BOOT_BUTTONS: u16 = 5;

/// Cap per device per tick so one chatty mouse cannot starve its neighbors.
const MAX_REPORTS_PER_TICK: usize = 32;

struct HidChannel {
    dev: HidDevice,
    path: String,
    dead: bool,
}

pub struct HidBackend {
    api: Option<HidApi>,
    channels: Vec<HidChannel>,
}

impl HidBackend {
    pub fn new() -> Self {
        HidBackend {
            api: None,
            channels: Vec::new(),
        }
    }
}

impl Default for HidBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_boot_report(data: &[u8], out: &mut Vec<RawReport>) {
    if data.len() < 3 {
        return;
    }
    let buttons = data[0];
    let dx = data[1] as i8 as i32;
    let dy = data[2] as i8 as i32;

    if dx != 0 || dy != 0 {
        out.push(RawReport::Relative { dx, dy });
    }
    for item in 0..BOOT_BUTTONS {
        out.push(RawReport::ButtonState {
            item,
            pressed: buttons & (1 << item) != 0,
        });
    }
    if data.len() >= 4 {
        let wheel = data[3] as i8 as i32;
        if wheel != 0 {
            out.push(RawReport::Scroll {
                item: 0,
                delta: wheel,
            });
        }
    }
}

impl Backend for HidBackend {
    fn name(&self) -> &'static str {
        "hid"
    }

    fn discover(&mut self) -> Result<Vec<DeviceDescriptor>, BackendError> {
        let api = HidApi::new().map_err(|e| BackendError::Discovery(e.to_string()))?;

        let mut out = Vec::new();
        for info in api.device_list() {
            if info.usage_page() != USAGE_PAGE_GENERIC_DESKTOP || info.usage() != USAGE_MOUSE {
                continue;
            }
            let path = info.path().to_string_lossy().into_owned();
            out.push(DeviceDescriptor {
                name: info
                    .product_string()
                    .unwrap_or("Unknown HID mouse")
                    .to_string(),
                backend: "hid",
                identity: DeviceIdentity {
                    vendor: info.vendor_id(),
                    product: info.product_id(),
                    serial: info
                        .serial_number()
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                    path,
                },
                axes: vec![AxisDesc::relative(), AxisDesc::relative()],
                buttons: BOOT_BUTTONS,
            });
        }
        debug!(found = out.len(), "hid discovery complete");

        self.api = Some(api);
        Ok(out)
    }

    fn open(&mut self, desc: &DeviceDescriptor) -> Result<usize, BackendError> {
        let path = &desc.identity.path;
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| BackendError::open(path, "discover was not called"))?;
        let cpath =
            CString::new(path.as_str()).map_err(|e| BackendError::open(path, e))?;
        let dev = api
            .open_path(&cpath)
            .map_err(|e| BackendError::open(path, e))?;
        dev.set_blocking_mode(false)
            .map_err(|e| BackendError::open(path, e))?;
        self.channels.push(HidChannel {
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
        let mut reports = Vec::with_capacity(8);
        let mut buf = [0u8; 64];

        loop {
            let mut saw_input = false;
            for (slot, ch) in channels.iter_mut().enumerate() {
                if ch.dead {
                    continue;
                }
                let index = indices[slot];
                for _ in 0..MAX_REPORTS_PER_TICK {
                    match ch.dev.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            saw_input = true;
                            reports.clear();
                            parse_boot_report(&buf[..n], &mut reports);
                            for report in reports.drain(..) {
                                sink.deliver(index, report);
                            }
                        }
                        Err(e) => {
                            let err = BackendError::read(&ch.path, e);
                            warn!(%err, "treating device as disconnected");
                            ch.dead = true;
                            sink.deliver(index, RawReport::Removed);
                            break;
                        }
                    }
                }
            }

            if channels.iter().all(|c| c.dead) {
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

    fn is_fallback(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Vec<RawReport> {
        let mut out = Vec::new();
        parse_boot_report(data, &mut out);
        out
    }

    #[test]
    fn test_boot_report_motion_comes_first() {
        let reports = parse(&[0x00, 3, 0xFE]); // dx = 3, dy = -2
        assert_eq!(reports[0], RawReport::Relative { dx: 3, dy: -2 });
    }

    #[test]
    fn test_boot_report_button_bits() {
        let reports = parse(&[0b0000_0101, 0, 0]);
        let pressed: Vec<(u16, bool)> = reports
            .iter()
            .filter_map(|r| match r {
                RawReport::ButtonState { item, pressed } => Some((*item, *pressed)),
                _ => None,
            })
            .collect();
        assert_eq!(
            pressed,
            vec![(0, true), (1, false), (2, true), (3, false), (4, false)]
        );
    }

    #[test]
    fn test_boot_report_wheel_byte() {
        let reports = parse(&[0, 0, 0, 0xFF]); // wheel = -1
        assert_eq!(
            reports.last(),
            Some(&RawReport::Scroll { item: 0, delta: -1 })
        );

        // Three-byte reports simply have no wheel.
        let no_wheel = parse(&[0, 1, 1]);
        assert!(!no_wheel
            .iter()
            .any(|r| matches!(r, RawReport::Scroll { .. })));
    }

    #[test]
    fn test_boot_report_too_short_is_ignored() {
        assert!(parse(&[0x01]).is_empty());
        assert!(parse(&[]).is_empty());
    }

    #[test]
    fn test_still_report_emits_button_state_only() {
        let reports = parse(&[0, 0, 0, 0]);
        assert!(reports
            .iter()
            .all(|r| matches!(r, RawReport::ButtonState { .. })));
        assert_eq!(reports.len(), BOOT_BUTTONS as usize);
    }
}
