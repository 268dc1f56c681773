//! A portable, user-space CPU limiter.
//!
//! This is a rewrite of the classic [`cpulimit`](https://github.com/opsengine/cpulimit)
//! idea, extended to process groups and to Windows: given a target process
//! (by pid, executable name, or a command to launch), it enforces an
//! aggregate CPU budget on that process and, optionally, its descendant
//! tree, by alternately resuming and suspending it on a short control
//! period.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use cpulimiter::{CancelToken, Controller, ControllerConfig, PosixProvider, Selector};
//!
//! let selector = Selector::new(None, Some(1234), None).unwrap();
//! let config = ControllerConfig::new(0.5, Duration::from_millis(100), false, false);
//! let controller = Controller::new(PosixProvider, selector, config);
//!
//! let cancel = CancelToken::new();
//! controller.run(&cancel).unwrap();
//! ```

mod attach;
mod cancel;
mod controller;
mod error;
mod provider;
mod telemetry;
mod tracker;

pub use attach::Selector;
pub use cancel::CancelToken;
pub use controller::{Controller, ControllerConfig, SLICE_DURATION};
pub use error::{Error, Result};
pub use provider::ProcessProvider;

#[cfg(unix)]
pub use provider::PosixProvider;

#[cfg(windows)]
pub use provider::WindowsProvider;
#[cfg(windows)]
pub use provider::windows::raise_own_priority as raise_own_process_priority;
