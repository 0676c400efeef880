//! Windows backend on the Raw Input API.
//!
//! Raw Input is the only Windows surface that reports which physical mouse a
//! packet came from, so this backend owns a hidden window, registers for the
//! mouse usage (page 1, usage 2) with `RIDEV_INPUTSINK`, and pumps
//! `WM_INPUT` on a dedicated thread. `RIDEV_DEVNOTIFY` adds
//! `WM_INPUT_DEVICE_CHANGE`, which is how unplugs become disconnects.
//!
//! The blocking `GetMessageW` loop is interrupted at shutdown by a tiny
//! watcher thread that waits on the stop channel and posts `WM_QUIT` at the
//! pump thread.

mod raw_input;

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::{debug, error, warn};
use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_CLASS_ALREADY_EXISTS, HWND, LPARAM, LRESULT, WPARAM,
};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::System::Threading::GetCurrentThreadId;
use windows_sys::Win32::UI::Input::{
    GetRawInputDeviceList, RegisterRawInputDevices, GIDC_REMOVAL, RAWINPUTDEVICE,
    RAWINPUTDEVICELIST, RIDEV_DEVNOTIFY, RIDEV_INPUTSINK, RIDEV_REMOVE, RIM_TYPEMOUSE,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    PostThreadMessageW, RegisterClassW, TranslateMessage, MSG, WM_INPUT, WM_INPUT_DEVICE_CHANGE,
    WM_QUIT, WNDCLASSW,
};

use crate::backends::{Backend, CaptureContext};
use crate::device::{AxisDesc, DeviceDescriptor, DeviceIdentity, DeviceIndex};
use crate::error::BackendError;
use crate::normalizer::{RawReport, ReportSink};

use raw_input::{MousePacket, MOUSE_MOVE_ABSOLUTE, RI_MOUSE_HWHEEL, RI_MOUSE_WHEEL, WHEEL_NOTCH};

const HID_USAGE_PAGE_GENERIC: u16 = 0x01;
const HID_USAGE_GENERIC_MOUSE: u16 = 0x02;

const WINDOW_CLASS: &str = "rawmice-capture";

struct ActiveDevice {
    handle: isize,
    path: String,
}

pub struct RawInputBackend {
    // interface path -> raw input handle, filled at discovery
    known: HashMap<String, isize>,
    active: Vec<ActiveDevice>,
}

impl RawInputBackend {
    pub fn new() -> Self {
        RawInputBackend {
            known: HashMap::new(),
            active: Vec::new(),
        }
    }
}

impl Default for RawInputBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Fallback when the registry has no `DeviceDesc` for the device.
fn friendly_name(vendor: u16, product: u16) -> String {
    if vendor != 0 {
        format!("Mouse {vendor:04x}:{product:04x}")
    } else {
        // PS/2 and ACPI paths carry no VID/PID.
        "Unidentified mouse".to_string()
    }
}

/// Turn one parsed packet into raw reports: motion, then button edges, then
/// wheels, matching the order the fields sit in RAWMOUSE.
fn packet_reports(p: &MousePacket, out: &mut Vec<RawReport>) {
    if p.flags & MOUSE_MOVE_ABSOLUTE != 0 {
        // Absolute packets always carry both coordinates, normalized by the
        // OS to 0..=65535.
        out.push(RawReport::Absolute {
            item: 0,
            value: p.last_x,
        });
        out.push(RawReport::Absolute {
            item: 1,
            value: p.last_y,
        });
    } else if p.last_x != 0 || p.last_y != 0 {
        out.push(RawReport::Relative {
            dx: p.last_x,
            dy: p.last_y,
        });
    }

    for btn in 0..5u16 {
        let down = 1u16 << (btn * 2);
        let up = 2u16 << (btn * 2);
        if p.button_flags & down != 0 {
            out.push(RawReport::ButtonState {
                item: btn,
                pressed: true,
            });
        }
        if p.button_flags & up != 0 {
            out.push(RawReport::ButtonState {
                item: btn,
                pressed: false,
            });
        }
    }

    if p.button_flags & RI_MOUSE_WHEEL != 0 {
        out.push(RawReport::Scroll {
            item: 0,
            delta: wheel_notches(p.button_data),
        });
    }
    if p.button_flags & RI_MOUSE_HWHEEL != 0 {
        out.push(RawReport::Scroll {
            item: 1,
            delta: wheel_notches(p.button_data),
        });
    }
}

/// WHEEL_DELTA units to signed notches. High-resolution wheels can report
/// less than one notch; keep the direction instead of rounding to zero.
fn wheel_notches(data: u16) -> i32 {
    let delta = data as i16 as i32;
    let notches = delta / WHEEL_NOTCH;
    if notches != 0 {
        notches
    } else {
        delta.signum()
    }
}

struct PumpState {
    sink: ReportSink,
    by_handle: HashMap<isize, DeviceIndex>,
}

thread_local! {
    static PUMP: RefCell<Option<PumpState>> = const { RefCell::new(None) };
}

unsafe extern "system" fn wndproc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_INPUT => {
            if let Some(packet) = raw_input::read_wm_input(lparam) {
                PUMP.with(|cell| {
                    if let Some(state) = cell.borrow().as_ref() {
                        // INPUTSINK hears every mouse in the session,
                        // including ones we skipped; those miss the map.
                        if let Some(&index) = state.by_handle.get(&packet.device) {
                            let mut reports = Vec::with_capacity(8);
                            packet_reports(&packet, &mut reports);
                            for report in reports {
                                state.sink.deliver(index, report);
                            }
                        }
                    }
                });
            }
            // Raw Input wants the default handler to run for cleanup.
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
        WM_INPUT_DEVICE_CHANGE => {
            if wparam as u32 == GIDC_REMOVAL {
                let handle: isize = lparam;
                PUMP.with(|cell| {
                    if let Some(state) = cell.borrow_mut().as_mut() {
                        if let Some(index) = state.by_handle.remove(&handle) {
                            debug!(%index, "raw input device removed");
                            state.sink.deliver(index, RawReport::Removed);
                        }
                    }
                });
            }
            0
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

/// Every startup failure downgrades to "all devices gone" so the session
/// keeps running with whatever other backends opened.
fn fail_all(ctx: &CaptureContext) {
    for &index in &ctx.indices {
        ctx.sink.deliver(index, RawReport::Removed);
    }
}

impl Backend for RawInputBackend {
    fn name(&self) -> &'static str {
        "rawinput"
    }

    fn discover(&mut self) -> Result<Vec<DeviceDescriptor>, BackendError> {
        let mut count: u32 = 0;
        let entry_size = core::mem::size_of::<RAWINPUTDEVICELIST>() as u32;
        let r0 = unsafe { GetRawInputDeviceList(core::ptr::null_mut(), &mut count, entry_size) };
        if r0 == u32::MAX {
            return Err(BackendError::Discovery(format!(
                "GetRawInputDeviceList failed: {}",
                unsafe { GetLastError() }
            )));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut list = vec![unsafe { core::mem::zeroed::<RAWINPUTDEVICELIST>() }; count as usize];
        let filled = unsafe { GetRawInputDeviceList(list.as_mut_ptr(), &mut count, entry_size) };
        if filled == u32::MAX {
            return Err(BackendError::Discovery(format!(
                "GetRawInputDeviceList failed: {}",
                unsafe { GetLastError() }
            )));
        }
        list.truncate(filled as usize);

        let mut out = Vec::new();
        for entry in &list {
            if entry.dwType != RIM_TYPEMOUSE {
                continue;
            }
            let path = match raw_input::device_path(entry.hDevice) {
                Some(p) => p,
                None => continue,
            };
            // Terminal Services adds this pseudo-device to feed the remote
            // session; it mirrors the real mice and would double everything.
            if path.contains("Root#RDP_MOU") {
                debug!(%path, "skipping terminal services mouse");
                continue;
            }
            let (buttons, _has_hwheel) = raw_input::mouse_info(entry.hDevice).unwrap_or((3, false));
            let (vendor, product) = raw_input::vid_pid_from_path(&path);
            let name = raw_input::product_name(&path)
                .unwrap_or_else(|| friendly_name(vendor, product));

            self.known.insert(path.clone(), entry.hDevice as isize);
            out.push(DeviceDescriptor {
                name,
                backend: "rawinput",
                identity: DeviceIdentity {
                    vendor,
                    product,
                    serial: None,
                    path,
                },
                axes: vec![AxisDesc::relative(), AxisDesc::relative()],
                buttons: buttons.min(u16::MAX as u32) as u16,
            });
        }
        debug!(found = out.len(), "raw input discovery complete");
        Ok(out)
    }

    fn open(&mut self, desc: &DeviceDescriptor) -> Result<usize, BackendError> {
        let path = &desc.identity.path;
        let handle = *self
            .known
            .get(path)
            .ok_or_else(|| BackendError::open(path, "not in discovery set"))?;
        // The handle may have died between discovery and now.
        if raw_input::mouse_info(handle as _).is_none() {
            return Err(BackendError::open(path, "device vanished"));
        }
        self.active.push(ActiveDevice {
            handle,
            path: path.clone(),
        });
        Ok(self.active.len() - 1)
    }

    fn run(self: Box<Self>, ctx: CaptureContext) {
        debug_assert_eq!(self.active.len(), ctx.indices.len());

        let class_name = wide(WINDOW_CLASS);
        let hinstance = unsafe { GetModuleHandleW(core::ptr::null()) };

        unsafe {
            let mut wc: WNDCLASSW = core::mem::zeroed();
            wc.lpfnWndProc = Some(wndproc);
            wc.hInstance = hinstance;
            wc.lpszClassName = class_name.as_ptr();
            if RegisterClassW(&wc) == 0 && GetLastError() != ERROR_CLASS_ALREADY_EXISTS {
                error!("RegisterClassW failed: {}", GetLastError());
                fail_all(&ctx);
                return;
            }
        }

        let hwnd: HWND = unsafe {
            CreateWindowExW(
                0,
                class_name.as_ptr(),
                class_name.as_ptr(),
                0,
                0,
                0,
                0,
                0,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
                hinstance,
                core::ptr::null(),
            )
        };
        if hwnd.is_null() {
            error!("CreateWindowExW failed: {}", unsafe { GetLastError() });
            fail_all(&ctx);
            return;
        }

        let register = RAWINPUTDEVICE {
            usUsagePage: HID_USAGE_PAGE_GENERIC,
            usUsage: HID_USAGE_GENERIC_MOUSE,
            dwFlags: RIDEV_INPUTSINK | RIDEV_DEVNOTIFY,
            hwndTarget: hwnd,
        };
        let registered = unsafe {
            RegisterRawInputDevices(&register, 1, core::mem::size_of::<RAWINPUTDEVICE>() as u32)
        };
        if registered == 0 {
            error!("RegisterRawInputDevices failed: {}", unsafe {
                GetLastError()
            });
            unsafe { DestroyWindow(hwnd) };
            fail_all(&ctx);
            return;
        }

        let by_handle: HashMap<isize, DeviceIndex> = self
            .active
            .iter()
            .zip(&ctx.indices)
            .map(|(dev, &index)| (dev.handle, index))
            .collect();
        for dev in &self.active {
            debug!(path = %dev.path, "capturing raw input");
        }
        PUMP.with(|cell| {
            *cell.borrow_mut() = Some(PumpState {
                sink: ctx.sink.clone(),
                by_handle,
            });
        });

        // GetMessageW blocks, so stop is watched from the side and turned
        // into WM_QUIT.
        let pump_tid = unsafe { GetCurrentThreadId() };
        let stop = ctx.stop.clone();
        let watcher = std::thread::Builder::new()
            .name("rawmice-rawinput-stop".into())
            .spawn(move || {
                let _ = stop.recv();
                unsafe { PostThreadMessageW(pump_tid, WM_QUIT, 0, 0) };
            });
        if watcher.is_err() {
            error!("could not spawn stop watcher");
            unsafe { DestroyWindow(hwnd) };
            PUMP.with(|cell| cell.borrow_mut().take());
            fail_all(&ctx);
            return;
        }

        unsafe {
            let mut msg: MSG = core::mem::zeroed();
            loop {
                let r = GetMessageW(&mut msg, core::ptr::null_mut(), 0, 0);
                if r <= 0 {
                    if r < 0 {
                        warn!("GetMessageW failed: {}", GetLastError());
                    }
                    break;
                }
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }

        let unregister = RAWINPUTDEVICE {
            usUsagePage: HID_USAGE_PAGE_GENERIC,
            usUsage: HID_USAGE_GENERIC_MOUSE,
            dwFlags: RIDEV_REMOVE,
            hwndTarget: core::ptr::null_mut(),
        };
        unsafe {
            RegisterRawInputDevices(&unregister, 1, core::mem::size_of::<RAWINPUTDEVICE>() as u32);
            DestroyWindow(hwnd);
        }
        PUMP.with(|cell| cell.borrow_mut().take());
        // The watcher exits on its own once the stop sender goes away.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(flags: u16, button_flags: u16, button_data: u16, x: i32, y: i32) -> MousePacket {
        MousePacket {
            device: 1,
            flags,
            button_flags,
            button_data,
            last_x: x,
            last_y: y,
        }
    }

    fn reports(p: MousePacket) -> Vec<RawReport> {
        let mut out = Vec::new();
        packet_reports(&p, &mut out);
        out
    }

    #[test]
    fn test_relative_packet_motion() {
        let out = reports(packet(0, 0, 0, 3, -2));
        assert_eq!(out, vec![RawReport::Relative { dx: 3, dy: -2 }]);
        assert!(reports(packet(0, 0, 0, 0, 0)).is_empty());
    }

    #[test]
    fn test_absolute_packet_always_carries_both_axes() {
        let out = reports(packet(MOUSE_MOVE_ABSOLUTE, 0, 0, 100, 0));
        assert_eq!(
            out,
            vec![
                RawReport::Absolute {
                    item: 0,
                    value: 100
                },
                RawReport::Absolute { item: 1, value: 0 },
            ]
        );
    }

    #[test]
    fn test_button_flag_decoding() {
        // Button 1 down (0x0001) and button 3 up (0x0020) in one packet.
        let out = reports(packet(0, 0x0001 | 0x0020, 0, 0, 0));
        assert_eq!(
            out,
            vec![
                RawReport::ButtonState {
                    item: 0,
                    pressed: true
                },
                RawReport::ButtonState {
                    item: 2,
                    pressed: false
                },
            ]
        );
    }

    #[test]
    fn test_wheel_notches() {
        assert_eq!(wheel_notches(120), 1);
        assert_eq!(wheel_notches((-240i16) as u16), -2);
        // Sub-notch high-resolution deltas keep their direction.
        assert_eq!(wheel_notches(30), 1);
        assert_eq!(wheel_notches((-30i16) as u16), -1);
        assert_eq!(wheel_notches(0), 0);
    }

    #[test]
    fn test_vertical_and_horizontal_wheels() {
        let vertical = reports(packet(0, RI_MOUSE_WHEEL, 120, 0, 0));
        assert_eq!(vertical, vec![RawReport::Scroll { item: 0, delta: 1 }]);

        let horizontal = reports(packet(0, RI_MOUSE_HWHEEL, (-120i16) as u16, 0, 0));
        assert_eq!(horizontal, vec![RawReport::Scroll { item: 1, delta: -1 }]);
    }
}
