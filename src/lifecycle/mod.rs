//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     root token → child tokens held by invokers and background tasks
//!     trigger → in-flight waits and calls end as Cancelled
//! ```
//!
//! # Design Decisions
//! - One root token per process, children everywhere else
//! - Cancelled calls are audited like any other terminal failure

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
