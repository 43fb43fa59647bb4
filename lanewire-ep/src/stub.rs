//! Placeholder transport for endpoints that are still being wired up.
//!
//! A stub endpoint is created when a peer has to be addressed before address
//! negotiation has finished. Its single lane is a [`StubTransport`]: nothing
//! can be posted to hardware yet, so requests are buffered and handed to the
//! real lane with [`forward_pending`] once wireup binds it.

use std::collections::VecDeque;

use lanewire_core::error::{LanewireError, Result};
use lanewire_core::lane::LaneIndex;
use lanewire_core::transport::{Completion, FlushStatus, PendingRequest, TransportEndpoint};
use tracing::trace;

#[derive(Debug, Default)]
pub struct StubTransport {
    pending: VecDeque<PendingRequest>,
}

impl StubTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered requests.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Work the wired lane did not take while forwarding.
#[derive(Debug, Default)]
pub struct Refused {
    /// Flush retries, as `(completion, lane)`; their request has to start the
    /// lane over
    pub retries: Vec<(Completion, LaneIndex)>,
    /// Other requests, dropped by the lane that refused them
    pub dropped: usize,
    /// First error returned for a dropped request
    pub error: Option<LanewireError>,
}

impl Refused {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.retries.is_empty() && self.dropped == 0
    }
}

/// Move every request queued on `from` onto `to`, in queue order.
///
/// Flush retries `to` refuses are handed back; any other refused request is
/// lost and counted.
pub fn forward_pending(from: &mut dyn TransportEndpoint, to: &mut dyn TransportEndpoint) -> Refused {
    let mut refused = Refused::default();
    from.pending_purge(&mut |req| {
        trace!("[EP] forwarding {:?} to the wired lane", req);
        let retry = match &req {
            PendingRequest::FlushRetry { completion, lane } => Some((completion.clone(), *lane)),
            PendingRequest::Custom(_) => None,
        };
        if let Err(e) = to.pending_add(req) {
            match retry {
                Some(retry) => refused.retries.push(retry),
                None => {
                    refused.dropped += 1;
                    refused.error.get_or_insert(e);
                }
            }
        }
    });
    refused
}

impl TransportEndpoint for StubTransport {
    /// Nothing reaches hardware through a stub. The flush is complete unless
    /// buffered work is queued ahead of it.
    fn flush(&mut self, _completion: &Completion) -> Result<FlushStatus> {
        if self.pending.is_empty() {
            Ok(FlushStatus::Complete)
        } else {
            Err(LanewireError::NoResource)
        }
    }

    fn pending_add(&mut self, req: PendingRequest) -> Result<()> {
        self.pending.push_back(req);
        Ok(())
    }

    fn pending_purge(&mut self, purge: &mut dyn FnMut(PendingRequest)) {
        for req in self.pending.drain(..) {
            purge(req);
        }
    }
}
