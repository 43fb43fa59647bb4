//! # Lanewire EP
//!
//! Multi-lane endpoint layer: one endpoint per remote peer, each spread over
//! up to eight transport lanes.
//!
//! ## Overview
//!
//! - **Registry**: owning map from peer id to endpoint, one endpoint per peer
//! - **Stub endpoints**: placeholder lane that buffers work until wireup
//! - **Flush/disconnect**: per-lane flush state machine with a single pending
//!   retry slot and deferred teardown
//! - **Worker**: progress loop tying transports, requests and deferred work
//!   together; [`SharedWorker`] wraps it in a lock
//!
//! ## Progress model
//!
//! Nothing happens behind the caller's back. Transports report completions
//! as events, and [`Worker::progress`] handles them. A disconnect either
//! finishes right away or hands back a request to poll:
//!
//! ```rust,ignore
//! match worker.disconnect_nb(ep)? {
//!     None => {} // already gone
//!     Some(req) => {
//!         while worker.request_test(req).is_pending() {
//!             worker.progress();
//!         }
//!         worker.request_release(req);
//!     }
//! }
//! ```

#![deny(unsafe_code)]
// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod deferred;
pub mod endpoint;
pub mod flush;
pub mod info;
pub mod registry;
pub mod shared;
pub mod stub;
pub mod wireup;
pub mod worker;

pub use endpoint::{EpFlags, EpHandle, Endpoint};
pub use flush::{FlushRequest, FlushedHandler};
pub use shared::{RequestFuture, SharedWorker};
pub use stub::{Refused, StubTransport};
pub use wireup::{AddressEntry, EndpointParams, UnpackedAddress, Wireup};
pub use worker::Worker;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::endpoint::{EpFlags, EpHandle, Endpoint};
    pub use crate::flush::FlushedHandler;
    pub use crate::shared::{RequestFuture, SharedWorker};
    pub use crate::wireup::{AddressEntry, EndpointParams, UnpackedAddress, Wireup};
    pub use crate::worker::Worker;
}
