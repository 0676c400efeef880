//! Session lifecycle.
//!
//! [`Session::init`] discovers every reachable mouse, opens the ones that
//! cooperate, and starts one capture thread per backend. The session is the
//! polling surface: capture threads feed the shared queue, the caller drains
//! it with [`poll_event`](Session::poll_event) whenever convenient.
//!
//! Only one session may capture at a time in a process. [`quit`](Session::quit)
//! (or dropping the session) stops the threads, clears all state, and frees
//! the slot for a later `init`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::backends::{default_backends, Backend, CaptureContext};
use crate::config::SessionConfig;
use crate::device::{Device, DeviceIndex};
use crate::error::InitError;
use crate::event::Event;
use crate::normalizer::{Normalizer, RawReport, ReportSink};
use crate::queue::EventQueue;
use crate::registry::DeviceRegistry;

/// Raw input APIs misbehave when claimed twice from one process, so a second
/// concurrent `init` is refused outright.
static ACTIVE: AtomicBool = AtomicBool::new(false);

struct CaptureThread {
    backend: &'static str,
    handle: JoinHandle<()>,
}

/// A running multi-mouse capture session.
pub struct Session {
    registry: Arc<RwLock<DeviceRegistry>>,
    queue: Arc<EventQueue>,
    normalizer: Arc<Mutex<Normalizer>>,
    stop: Option<Sender<()>>,
    threads: Vec<CaptureThread>,
    shutdown_timeout: Duration,
}

impl Session {
    /// Start capturing from every mouse the platform backends can reach.
    pub fn init() -> Result<Self, InitError> {
        Self::init_with_config(SessionConfig::default())
    }

    /// [`init`](Self::init) with tuned knobs.
    pub fn init_with_config(config: SessionConfig) -> Result<Self, InitError> {
        let backends = default_backends(&config);
        Self::init_with(config, backends)
    }

    /// Start a session over a hand-picked backend set.
    ///
    /// This is how tests and demos mix virtual mice in; `backends` run in the
    /// given order, which matters for deduplication (earlier backends claim
    /// devices first).
    pub fn init_with(
        config: SessionConfig,
        backends: Vec<Box<dyn Backend>>,
    ) -> Result<Self, InitError> {
        if ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(InitError::AlreadyRunning);
        }

        let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        let normalizer = Arc::new(Mutex::new(Normalizer::new()));
        let sink = ReportSink::new(normalizer.clone(), registry.clone(), queue.clone());
        let (stop_tx, stop_rx) = crossbeam_channel::unbounded::<()>();

        let mut claimed_keys: HashSet<String> = HashSet::new();
        let mut claimed_pairs: HashSet<(u16, u16)> = HashSet::new();
        let mut threads = Vec::new();

        for mut backend in backends {
            let name = backend.name();
            let descriptors = match backend.discover() {
                Ok(d) => d,
                Err(err) => {
                    warn!(backend = name, %err, "discovery failed, backend disabled");
                    continue;
                }
            };

            let mut indices: Vec<DeviceIndex> = Vec::new();
            for desc in descriptors {
                let key = desc.identity.key();
                if claimed_keys.contains(&key) {
                    debug!(backend = name, device = %desc.name, "already claimed, skipping");
                    continue;
                }
                // A fallback backend reaches hardware the native backend
                // already owns, under a different path. Matching on
                // vendor/product catches those; (0, 0) matches nothing.
                if backend.is_fallback()
                    && desc.identity.pair() != (0, 0)
                    && claimed_pairs.contains(&desc.identity.pair())
                {
                    debug!(
                        backend = name,
                        device = %desc.name,
                        "hardware claimed by an earlier backend, skipping"
                    );
                    continue;
                }

                let slot = match backend.open(&desc) {
                    Ok(slot) => slot,
                    Err(err) => {
                        warn!(backend = name, %err, "skipping device");
                        continue;
                    }
                };
                debug_assert_eq!(slot, indices.len());

                let index = registry
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .register(&desc);
                normalizer
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .add_device(index, &desc.axes);
                claimed_keys.insert(key);
                claimed_pairs.insert(desc.identity.pair());
                info!(backend = name, %index, device = %desc.name, "mouse attached");
                indices.push(index);
            }

            if indices.is_empty() {
                debug!(backend = name, "no devices, not starting a capture thread");
                continue;
            }

            let thread_indices = indices.clone();
            let ctx = CaptureContext {
                indices,
                sink: sink.clone(),
                stop: stop_rx.clone(),
                idle: config.capture_idle(),
            };
            let spawned = thread::Builder::new()
                .name(format!("rawmice-{name}"))
                .spawn(move || backend.run(ctx));
            match spawned {
                Ok(handle) => threads.push(CaptureThread {
                    backend: name,
                    handle,
                }),
                Err(err) => {
                    // No thread means no events and no disconnect either, so
                    // retire the devices as if they were unplugged.
                    warn!(backend = name, %err, "failed to spawn capture thread");
                    for index in thread_indices {
                        sink.deliver(index, RawReport::Removed);
                    }
                }
            }
        }

        let session = Session {
            registry,
            queue,
            normalizer,
            stop: Some(stop_tx),
            threads,
            shutdown_timeout: config.shutdown_timeout(),
        };
        info!(
            devices = session.device_count(),
            threads = session.threads.len(),
            "input session started"
        );
        Ok(session)
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, DeviceRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Pop the oldest pending event. Never blocks; `None` means the queue is
    /// empty right now.
    pub fn poll_event(&self) -> Option<Event> {
        self.queue.poll()
    }

    /// Number of devices still attached.
    pub fn device_count(&self) -> usize {
        self.read_registry().len()
    }

    /// Name of an attached device. `None` once it disconnected, which is the
    /// reliable way to tell a departed device from a renamed one.
    pub fn device_name(&self, index: DeviceIndex) -> Option<String> {
        self.read_registry().lookup(index).map(|d| d.name.clone())
    }

    /// Live devices sorted by index.
    pub fn devices(&self) -> Vec<Device> {
        self.read_registry().snapshot()
    }

    /// Events shed to queue overflow since the session started.
    pub fn dropped_events(&self) -> u64 {
        self.queue.dropped()
    }

    /// Stop capturing and tear everything down.
    ///
    /// Idempotent: later calls (and the eventual drop) are no-ops. Waits up
    /// to the configured shutdown timeout per capture thread, then detaches
    /// stragglers rather than hanging the caller.
    pub fn quit(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        // Dropping the only sender disconnects every capture thread's
        // receiver at once.
        drop(stop);

        for thread in self.threads.drain(..) {
            // JoinHandle has no timed join; poll is_finished against a
            // per-thread deadline instead.
            let deadline = Instant::now() + self.shutdown_timeout;
            while !thread.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if thread.handle.is_finished() {
                let _ = thread.handle.join();
            } else {
                error!(
                    backend = thread.backend,
                    "capture thread ignored shutdown, detaching"
                );
            }
        }

        self.queue.clear();
        self.normalizer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        ACTIVE.store(false, Ordering::SeqCst);
        info!("input session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.quit();
    }
}
