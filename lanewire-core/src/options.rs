//! Worker configuration options
//!
//! Tunables consumed by the threshold calculator and the endpoint layer.
//! Values follow the usual UCX-style defaults: thresholds are computed
//! automatically unless pinned to a fixed size.

use std::fmt;
use std::str::FromStr;

use crate::error::LanewireError;

/// A size threshold that is either computed from hardware attributes or fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdSetting {
    /// Derive the threshold from the performance model.
    Auto,
    /// Use this size. `usize::MAX` disables the protocol.
    Fixed(usize),
}

impl ThresholdSetting {
    /// Parse a memory-unit string.
    ///
    /// Supported formats:
    /// - `auto`
    /// - `inf` / `infinity` (disabled)
    /// - plain byte counts: `8192`
    /// - suffixed sizes: `8k`, `1m`, `2g`, `512b` (case-insensitive)
    ///
    /// # Examples
    ///
    /// ```
    /// use lanewire_core::options::ThresholdSetting;
    ///
    /// assert_eq!(ThresholdSetting::parse("auto").unwrap(), ThresholdSetting::Auto);
    /// assert_eq!(ThresholdSetting::parse("8k").unwrap(), ThresholdSetting::Fixed(8192));
    /// assert_eq!(ThresholdSetting::parse("inf").unwrap(), ThresholdSetting::Fixed(usize::MAX));
    /// ```
    pub fn parse(s: &str) -> Result<Self, LanewireError> {
        s.parse()
    }

    #[inline]
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

impl FromStr for ThresholdSetting {
    type Err = LanewireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "auto" => return Ok(Self::Auto),
            "inf" | "infinity" => return Ok(Self::Fixed(usize::MAX)),
            _ => {}
        }

        let (digits, shift) = match s.as_bytes().last() {
            Some(b'b') => (&s[..s.len() - 1], 0),
            Some(b'k') => (&s[..s.len() - 1], 10),
            Some(b'm') => (&s[..s.len() - 1], 20),
            Some(b'g') => (&s[..s.len() - 1], 30),
            _ => (s.as_str(), 0),
        };

        let value = digits
            .parse::<usize>()
            .map_err(|_| LanewireError::invalid_param(format!("invalid memory units: {s}")))?;
        value
            .checked_mul(1usize << shift)
            .map(Self::Fixed)
            .ok_or_else(|| LanewireError::invalid_param(format!("memory units overflow: {s}")))
    }
}

impl fmt::Display for ThresholdSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Fixed(usize::MAX) => write!(f, "inf"),
            Self::Fixed(n) => write!(f, "{n}"),
        }
    }
}

/// Protocol families enabled on the worker (affects the diagnostic dump).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub tag: bool,
    pub rma: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self { tag: true, rma: false }
    }
}

/// Worker configuration options.
///
/// # Examples
///
/// ```
/// use lanewire_core::options::{ThresholdSetting, WorkerOptions};
///
/// let opts = WorkerOptions::default()
///     .with_rndv_thresh(ThresholdSetting::Fixed(64 * 1024))
///     .with_rndv_perf_diff(5.0);
/// assert_eq!(opts.rndv_thresh, ThresholdSetting::Fixed(65536));
/// ```
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Rendezvous threshold (`Auto` uses the latency model)
    pub rndv_thresh: ThresholdSetting,

    /// Zero-copy threshold (`Auto` uses the registration-cost model)
    pub zcopy_thresh: ThresholdSetting,

    /// Percentage by which rendezvous must beat eager zero-copy before it is used
    pub rndv_perf_diff: f64,

    /// Threshold used when the rendezvous model does not apply
    pub rndv_thresh_fallback: usize,

    /// Estimated memory copy bandwidth, bytes/second
    pub bcopy_bw: f64,

    /// Minimal size from which bcopy is preferred over short
    pub bcopy_thresh: usize,

    /// Estimated number of endpoints, scales the per-endpoint latency growth
    pub est_num_eps: usize,

    /// Maximum number of endpoints the worker may hold
    pub max_endpoints: usize,

    /// Capacity of the flush request pool
    pub max_requests: usize,

    /// Enabled protocol families
    pub features: Features,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            rndv_thresh: ThresholdSetting::Auto,
            zcopy_thresh: ThresholdSetting::Auto,
            rndv_perf_diff: 1.0,
            rndv_thresh_fallback: usize::MAX,
            bcopy_bw: 5800.0 * 1024.0 * 1024.0, // 5800 MB/s
            bcopy_thresh: 0,
            est_num_eps: 1,
            max_endpoints: 65536,
            max_requests: 1024,
            features: Features::default(),
        }
    }
}

impl WorkerOptions {
    /// Create new worker options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rendezvous threshold.
    pub fn with_rndv_thresh(mut self, thresh: ThresholdSetting) -> Self {
        self.rndv_thresh = thresh;
        self
    }

    /// Set the zero-copy threshold.
    pub fn with_zcopy_thresh(mut self, thresh: ThresholdSetting) -> Self {
        self.zcopy_thresh = thresh;
        self
    }

    /// Set the rendezvous performance tolerance, in percent.
    pub fn with_rndv_perf_diff(mut self, percent: f64) -> Self {
        self.rndv_perf_diff = percent;
        self
    }

    /// Set the fallback rendezvous threshold.
    pub fn with_rndv_thresh_fallback(mut self, size: usize) -> Self {
        self.rndv_thresh_fallback = size;
        self
    }

    /// Set the estimated memory copy bandwidth (bytes/second).
    pub fn with_bcopy_bw(mut self, bw: f64) -> Self {
        self.bcopy_bw = bw;
        self
    }

    /// Set the bcopy threshold.
    pub fn with_bcopy_thresh(mut self, size: usize) -> Self {
        self.bcopy_thresh = size;
        self
    }

    /// Set the estimated number of endpoints.
    pub fn with_est_num_eps(mut self, n: usize) -> Self {
        self.est_num_eps = n;
        self
    }

    /// Limit the number of endpoints.
    pub fn with_max_endpoints(mut self, n: usize) -> Self {
        self.max_endpoints = n;
        self
    }

    /// Set the request pool capacity.
    pub fn with_max_requests(mut self, n: usize) -> Self {
        self.max_requests = n;
        self
    }

    /// Set the enabled protocol families.
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Tolerance factor applied to eager latency: `1 - rndv_perf_diff / 100`.
    #[inline]
    pub fn rndv_diff_factor(&self) -> f64 {
        1.0 - self.rndv_perf_diff / 100.0
    }
}
