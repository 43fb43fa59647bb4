//! # Lanewire
//!
//! Endpoint layer for RDMA-style transports: one connection object per remote
//! peer, spread over up to eight transport lanes.
//!
//! ## Architecture
//!
//! - **`lanewire-core`**: lane configuration, protocol thresholds, transport
//!   trait, request pool and monitor events
//! - **`lanewire-ep`**: endpoint registry, stub endpoints, flush/disconnect
//!   state machine and the worker progress loop
//! - **`lanewire`**: Public API surface (this crate)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lanewire::prelude::*;
//!
//! # async fn example(
//! #     resources: ResourceTable,
//! #     wireup: impl Wireup + 'static,
//! #     address: bytes::Bytes,
//! # ) -> Result<()> {
//! let worker = Worker::new(WorkerOptions::default(), resources, wireup)?;
//! let worker = SharedWorker::new(worker);
//!
//! let ep = worker.create_endpoint(&EndpointParams::new().with_address(address))?;
//! // ... post operations on the lanes ...
//! worker.disconnect(ep).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress
//!
//! Transports never call back into the worker. Completions are queued as
//! events and handled the next time the worker progresses, so flush handlers
//! always run from the progress loop. Awaiting a disconnect drives progress
//! on every poll.

#![warn(clippy::all)]

pub mod dev_tracing;

// Re-export core types
pub use bytes::Bytes;

pub use lanewire_core::error::{LanewireError, Result};
pub use lanewire_core::monitor::{EndpointEvent, EndpointMonitor};
pub use lanewire_core::options::{Features, ThresholdSetting, WorkerOptions};
pub use lanewire_core::PeerId;
pub use lanewire_ep::{
    AddressEntry, EndpointParams, EpFlags, EpHandle, RequestFuture, SharedWorker, UnpackedAddress,
    Wireup, Worker,
};

// Full internals for transport and wireup implementors
pub use lanewire_core;
pub use lanewire_ep;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use lanewire_core::prelude::*;
    pub use lanewire_ep::prelude::*;
}
