//! Invocation subsystem.
//!
//! # Data Flow
//! ```text
//! service client
//!     → request.rs (RequestDescriptor: operation, key parts, cost, TTL, budget)
//!     → executor.rs (ResilientInvoker::execute)
//!         → cache lookup → token bucket → remote call → retry policy
//!         → audit record at every step
//! ```
//!
//! # Design Decisions
//! - The remote call is an opaque closure; the invoker never inspects payloads
//! - Retry policy and call budget are swapped atomically and snapshotted per call
//! - One invoker may be shared by several clients to enforce a combined budget

pub mod executor;
pub mod request;

pub use executor::ResilientInvoker;
pub use request::RequestDescriptor;
