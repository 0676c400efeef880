//! Windows Raw Input parsing helpers.
//!
//! This module is intentionally "dumb": it parses `WM_INPUT` payloads and
//! answers device-info queries. Routing (handle-to-index mapping, report
//! delivery) lives in the backend one level up.
//!
//! ## Conventions
//! - Mouse deltas come out in **raw OS counts** as provided by Raw Input.
//! - Wheel payloads stay in **raw WHEEL_DELTA units** (typically ±120 per
//!   notch); the backend converts to notches.
//! - Device handles are carried as `isize` so they can cross threads and key
//!   hash maps.

use core::ffi::c_void;

use windows_sys::Win32::Foundation::{ERROR_SUCCESS, HANDLE};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_LOCAL_MACHINE, KEY_READ, REG_SZ,
    REG_VALUE_TYPE,
};
use windows_sys::Win32::UI::Input::{
    GetRawInputData, GetRawInputDeviceInfoW, RAWINPUTHEADER, RAWMOUSE, RID_DEVICE_INFO,
    RID_INPUT, RIDI_DEVICEINFO, RIDI_DEVICENAME, RIM_TYPEMOUSE,
};

/// One parsed `WM_INPUT` mouse payload.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MousePacket {
    /// Raw Input device handle that produced the event.
    pub device: isize,
    /// RAWMOUSE usFlags (MOUSE_MOVE_*).
    pub flags: u16,
    /// RAWMOUSE usButtonFlags bitfield (RI_MOUSE_*).
    pub button_flags: u16,
    /// Wheel payload, valid when a wheel flag is set.
    pub button_data: u16,
    /// Delta X (relative) or normalized position X (absolute).
    pub last_x: i32,
    /// Delta Y (relative) or normalized position Y (absolute).
    pub last_y: i32,
}

// Local constants (avoid relying on module exports that vary by windows-sys version)
pub(crate) const RI_MOUSE_WHEEL: u16 = 0x0400;
pub(crate) const RI_MOUSE_HWHEEL: u16 = 0x0800;
pub(crate) const MOUSE_MOVE_ABSOLUTE: u16 = 0x0001;
pub(crate) const WHEEL_NOTCH: i32 = 120;

/// Parse a `WM_INPUT` lparam into a mouse packet. Keyboard and HID payloads
/// return `None`.
pub(crate) fn read_wm_input(lparam: isize) -> Option<MousePacket> {
    unsafe {
        // Query size
        let mut size: u32 = 0;
        let r0 = GetRawInputData(
            lparam as _,
            RID_INPUT,
            core::ptr::null_mut(),
            &mut size,
            core::mem::size_of::<RAWINPUTHEADER>() as u32,
        );
        if r0 == u32::MAX || size == 0 {
            return None;
        }

        // Read buffer
        let mut buf = vec![0u8; size as usize];
        let r1 = GetRawInputData(
            lparam as _,
            RID_INPUT,
            buf.as_mut_ptr() as *mut c_void,
            &mut size,
            core::mem::size_of::<RAWINPUTHEADER>() as u32,
        );
        if r1 == u32::MAX {
            return None;
        }

        read_raw_input_bytes(&buf)
    }
}

/// Parse a raw `RID_INPUT` payload (bytes from `GetRawInputData`).
pub(crate) fn read_raw_input_bytes(buf: &[u8]) -> Option<MousePacket> {
    let hdr_sz = core::mem::size_of::<RAWINPUTHEADER>();
    if buf.len() < hdr_sz + core::mem::size_of::<RAWMOUSE>() {
        return None;
    }

    unsafe {
        // Header first; the payload after it is variable-sized by dwType.
        let hdr: RAWINPUTHEADER = core::ptr::read_unaligned(buf.as_ptr() as *const RAWINPUTHEADER);
        if hdr.dwType != RIM_TYPEMOUSE {
            return None;
        }

        let m: RAWMOUSE = core::ptr::read_unaligned(buf.as_ptr().add(hdr_sz) as *const RAWMOUSE);
        Some(MousePacket {
            device: hdr.hDevice as isize,
            flags: m.usFlags,
            button_flags: m.Anonymous.Anonymous.usButtonFlags,
            button_data: m.Anonymous.Anonymous.usButtonData,
            last_x: m.lLastX,
            last_y: m.lLastY,
        })
    }
}

/// RawInput device interface path for a given `hDevice` (RIDI_DEVICENAME).
pub(crate) fn device_path(hdev: HANDLE) -> Option<String> {
    unsafe {
        // Query required size (in WCHARs, including NUL).
        let mut size: u32 = 0;
        let r0 = GetRawInputDeviceInfoW(hdev, RIDI_DEVICENAME, core::ptr::null_mut(), &mut size);
        if r0 == u32::MAX || size == 0 {
            return None;
        }

        let mut wide: Vec<u16> = vec![0u16; size as usize];
        let r1 = GetRawInputDeviceInfoW(
            hdev,
            RIDI_DEVICENAME,
            wide.as_mut_ptr() as *mut c_void,
            &mut size,
        );
        if r1 == u32::MAX {
            return None;
        }

        while wide.last() == Some(&0) {
            wide.pop();
        }
        Some(String::from_utf16_lossy(&wide))
    }
}

/// Button count and horizontal-wheel capability for a mouse handle
/// (RIDI_DEVICEINFO).
pub(crate) fn mouse_info(hdev: HANDLE) -> Option<(u32, bool)> {
    unsafe {
        let mut info: RID_DEVICE_INFO = core::mem::zeroed();
        info.cbSize = core::mem::size_of::<RID_DEVICE_INFO>() as u32;
        let mut size = info.cbSize;
        let r = GetRawInputDeviceInfoW(
            hdev,
            RIDI_DEVICEINFO,
            &mut info as *mut RID_DEVICE_INFO as *mut c_void,
            &mut size,
        );
        if r == u32::MAX || info.dwType != RIM_TYPEMOUSE {
            return None;
        }
        let mouse = info.Anonymous.mouse;
        Some((mouse.dwNumberOfButtons, mouse.fHasHorizontalWheel != 0))
    }
}

/// Reshape an interface path into the device's subkey under the registry
/// Enum tree: strip the `\\?\` prefix and turn `#` back into `\`. The class
/// GUID suffix is not part of the instance id.
///
/// `\\?\HID#VID_046D&PID_C077#8&2f4a#{guid}` becomes
/// `SYSTEM\CurrentControlSet\Enum\HID\VID_046D&PID_C077\8&2f4a`.
fn enum_subkey(path: &str) -> Option<String> {
    let instance = path.get(4..)?;
    let mut key = String::from(r"SYSTEM\CurrentControlSet\Enum\");
    for c in instance.chars() {
        match c {
            '{' => break,
            '#' => key.push('\\'),
            _ => key.push(c),
        }
    }
    Some(key.trim_end_matches('\\').to_string())
}

/// `DeviceDesc` values on current systems lead with an inf resource
/// reference (`@msmouse.inf,%hid.devicedesc%;HID-compliant mouse`); the
/// display text follows the last `;`. Older systems store the text bare.
fn display_name(desc: &str) -> Option<String> {
    let text = match desc.rsplit_once(';') {
        Some((_, tail)) => tail,
        None => desc,
    }
    .trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Product name the device installer recorded: the `DeviceDesc` value of the
/// device's Enum key, addressed by reshaping the interface path. `None` when
/// the key or value is missing.
pub(crate) fn product_name(path: &str) -> Option<String> {
    let subkey = super::wide(&enum_subkey(path)?);
    let value = super::wide("DeviceDesc");
    unsafe {
        let mut hkey: HKEY = core::ptr::null_mut();
        if RegOpenKeyExW(HKEY_LOCAL_MACHINE, subkey.as_ptr(), 0, KEY_READ, &mut hkey)
            != ERROR_SUCCESS
        {
            return None;
        }

        let mut kind: REG_VALUE_TYPE = 0;
        let mut buf = [0u16; 256];
        let mut size = core::mem::size_of_val(&buf) as u32;
        let rc = RegQueryValueExW(
            hkey,
            value.as_ptr(),
            core::ptr::null(),
            &mut kind,
            buf.as_mut_ptr().cast(),
            &mut size,
        );
        RegCloseKey(hkey);
        if rc != ERROR_SUCCESS || kind != REG_SZ {
            return None;
        }

        let chars = (size as usize / 2).min(buf.len());
        display_name(String::from_utf16_lossy(&buf[..chars]).trim_end_matches('\0'))
    }
}

/// Pull VID/PID hex fields out of a device interface path like
/// `\\?\HID#VID_046D&PID_C077#...`. Unparseable paths come back as `(0, 0)`.
pub(crate) fn vid_pid_from_path(path: &str) -> (u16, u16) {
    fn hex_after(path: &str, tag: &str) -> u16 {
        let upper = path.to_ascii_uppercase();
        upper
            .find(tag)
            .map(|at| &upper[at + tag.len()..])
            .and_then(|rest| {
                let digits: String = rest.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
                u16::from_str_radix(&digits, 16).ok()
            })
            .unwrap_or(0)
    }
    (hex_after(path, "VID_"), hex_after(path, "PID_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vid_pid_from_hid_path() {
        let path = r"\\?\HID#VID_046D&PID_C077&MI_00#8&2f4a64c&0&0000#{378de44c-56ef-11d1-bc8c-00a0c91405dd}";
        assert_eq!(vid_pid_from_path(path), (0x046d, 0xc077));
    }

    #[test]
    fn test_vid_pid_case_insensitive() {
        assert_eq!(vid_pid_from_path(r"\\?\hid#vid_1b1c&pid_1b5e#x"), (0x1b1c, 0x1b5e));
    }

    #[test]
    fn test_vid_pid_missing_is_zero() {
        assert_eq!(vid_pid_from_path(r"\\?\ACPI#PNP0F13#4&1f2c8e&0"), (0, 0));
    }

    #[test]
    fn test_enum_subkey_from_interface_path() {
        let path = r"\\?\HID#VID_046D&PID_C077&MI_00#8&2f4a64c&0&0000#{378de44c-56ef-11d1-bc8c-00a0c91405dd}";
        assert_eq!(
            enum_subkey(path).unwrap(),
            r"SYSTEM\CurrentControlSet\Enum\HID\VID_046D&PID_C077&MI_00\8&2f4a64c&0&0000"
        );
        // PS/2 paths have no class GUID; the whole tail is the instance id.
        assert_eq!(
            enum_subkey(r"\\?\ACPI#PNP0F13#4&1f2c8e&0").unwrap(),
            r"SYSTEM\CurrentControlSet\Enum\ACPI\PNP0F13\4&1f2c8e&0"
        );
        assert_eq!(enum_subkey("x"), None);
    }

    #[test]
    fn test_display_name_strips_inf_reference() {
        assert_eq!(
            display_name("@msmouse.inf,%hid.devicedesc%;HID-compliant mouse").as_deref(),
            Some("HID-compliant mouse")
        );
        assert_eq!(
            display_name("Logitech USB Optical Mouse").as_deref(),
            Some("Logitech USB Optical Mouse")
        );
        assert_eq!(display_name("  "), None);
        assert_eq!(display_name("@oem8.inf,%desc%;"), None);
    }
}
