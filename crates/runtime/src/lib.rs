//! Sandbox Runtime - VNC browser session lifecycle
//!
//! This crate supervises the process group behind a VNC-observable browser
//! automation sandbox:
//!
//! - **Port allocation**: OS-assigned loopback ports with held reservations
//! - **Launch**: sequential spawn of Xvfb, openbox, x11vnc, noVNC, and a
//!   Playwright server, with captured output and readiness waits
//! - **Teardown**: reverse-order, best-effort, continue-on-error shutdown
//! - **Session**: a scoped handle exposing the control (`ws://`) and visual
//!   (`http://`) endpoints
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Session    │  SessionConfig → VncBrowserSession
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐
//! │   Launch     │  CommandSpec plan, sequential spawn
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐
//! │   Process    │  ProcessGroup, reverse teardown
//! └──────────────┘
//! ```
//!
//! Launch either fully succeeds or tears down everything it started and
//! returns an error; teardown never fails and is idempotent.

pub mod error;
pub mod launch;
pub mod port;
pub mod process;
pub mod session;

// Re-export key types at crate root
pub use error::{Error, Result};
pub use launch::CommandSpec;
pub use port::{PortReservation, allocate_port};
pub use process::{ChildProcess, ProcessGroup, ProcessHandle, ProcessRecord};
pub use session::{HOSTNAME, REQUIRED_PROGRAMS, SessionConfig, VncBrowserSession};
