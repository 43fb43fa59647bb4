//! Lanewire Core
//!
//! This crate contains the runtime-agnostic building blocks of the endpoint
//! layer:
//! - Lane indices and lane sets (`lane`)
//! - Worker tunables (`options`)
//! - Hardware resource attributes (`resource`)
//! - Protocol threshold calculator (`threshold`)
//! - Lane configuration keys and their registry (`config`)
//! - Transport endpoint capability (`transport`)
//! - Request pool (`pool`)
//! - Endpoint event monitor (`monitor`)
//! - Error types (`error`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

pub mod config;
pub mod error;
pub mod lane;
pub mod monitor;
pub mod options;
pub mod pool;
pub mod resource;
pub mod threshold;
pub mod transport;

/// 64-bit identifier of a remote worker, unique per remote process.
pub type PeerId = u64;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::config::{ConfigIndex, ConfigRegistry, LaneConfig, LaneConfigKey, LaneKey};
    pub use crate::error::{LanewireError, Result};
    pub use crate::lane::{LaneIndex, LaneMap, MAX_LANES};
    pub use crate::monitor::{EndpointEvent, EndpointMonitor};
    pub use crate::options::{Features, ThresholdSetting, WorkerOptions};
    pub use crate::pool::RequestId;
    pub use crate::resource::{IfaceAttr, IfaceCaps, LinearGrowth, MdAttr, OpLimits, ResourceTable, TlResource};
    pub use crate::transport::{Completion, FlushStatus, LaneEvent, PendingRequest, TransportEndpoint};
    pub use crate::PeerId;
}
