//! Capture backends.
//!
//! One implementation of [`Backend`] per platform input API. The session runs
//! every backend it can: native APIs first, the portable HID fallback last,
//! with devices deduplicated by identity so one physical mouse never shows up
//! twice.
//!
//! # Feature flags
//! - **`hid`** (default): the portable `hidapi` fallback backend. It is the
//!   only capture path on platforms without a native backend.
//!
//! The crate reads devices; it never creates OS-level virtual ones. The
//! [`virtual_input`] backend exists purely in-process, for tests and demos.

use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::device::{DeviceDescriptor, DeviceIndex};
use crate::error::BackendError;
use crate::normalizer::ReportSink;

#[cfg(target_os = "linux")]
pub mod evdev;
#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;
pub mod virtual_input;
#[cfg(windows)]
pub mod windows;

/// A platform capture driver.
///
/// Lifecycle: the session calls [`discover`](Backend::discover) once, decides
/// which descriptors to keep, calls [`open`](Backend::open) for each, then
/// hands the backend to its capture thread via [`run`](Backend::run). A
/// backend that opened nothing is simply dropped.
pub trait Backend: Send {
    /// Short tag for logs and device records.
    fn name(&self) -> &'static str;

    /// Enumerate candidate pointing devices without opening them.
    ///
    /// An error disables this backend for the session; other backends are
    /// unaffected.
    fn discover(&mut self) -> Result<Vec<DeviceDescriptor>, BackendError>;

    /// Open the raw channel for one discovered descriptor.
    ///
    /// Returns a backend-local slot, assigned densely in open order. The
    /// session pairs slots with registry indices when it starts the capture
    /// thread.
    fn open(&mut self, desc: &DeviceDescriptor) -> Result<usize, BackendError>;

    /// Capture loop. Runs on a dedicated thread until `ctx.stop` fires (or
    /// its sender is dropped), tagging each report with `ctx.indices[slot]`
    /// and pushing it into `ctx.sink`.
    fn run(self: Box<Self>, ctx: CaptureContext);

    /// Whether this backend is a fallback for hardware a native backend may
    /// also reach. Fallbacks skip vendor/product pairs already claimed.
    fn is_fallback(&self) -> bool {
        false
    }
}

/// Everything a capture thread needs, bundled by the session.
pub struct CaptureContext {
    /// Registry index per backend slot, in open order.
    pub indices: Vec<DeviceIndex>,
    pub sink: ReportSink,
    /// Fires (or disconnects) when the session shuts down.
    pub stop: Receiver<()>,
    /// How long to sleep when every device is quiet.
    pub idle: Duration,
}

/// The built-in backend set for this platform, native APIs first.
pub fn default_backends(config: &crate::SessionConfig) -> Vec<Box<dyn Backend>> {
    #[cfg(not(feature = "hid"))]
    let _ = config;
    let mut out: Vec<Box<dyn Backend>> = Vec::new();

    #[cfg(target_os = "linux")]
    out.push(Box::new(evdev::EvdevBackend::new()));

    #[cfg(windows)]
    out.push(Box::new(windows::RawInputBackend::new()));

    #[cfg(feature = "hid")]
    if config.hid_fallback {
        out.push(Box::new(hid::HidBackend::new()));
    }

    out
}
