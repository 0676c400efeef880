//! Raw multi-mouse input.
//!
//! Operating systems merge every pointing device into one cursor; `rawmice`
//! undoes that. A [`Session`] opens each attached mouse as its own raw event
//! stream, tagged with a stable per-device index, for split-screen games,
//! multi-trackball kiosks, and input test rigs.
//!
//! ```no_run
//! use rawmice::{EventKind, Session};
//!
//! let mut session = Session::init()?;
//! while let Some(event) = session.poll_event() {
//!     match event.kind {
//!         EventKind::RelMotion { item, value } => {
//!             println!("mouse {} moved {value} on axis {item}", event.device)
//!         }
//!         EventKind::Disconnect => println!("mouse {} unplugged", event.device),
//!         _ => {}
//!     }
//! }
//! session.quit();
//! # Ok::<(), rawmice::InitError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backends;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod normalizer;
pub mod queue;
pub mod registry;
pub mod session;

pub use config::*;
pub use device::*;
pub use error::*;
pub use event::*;
pub use session::*;
