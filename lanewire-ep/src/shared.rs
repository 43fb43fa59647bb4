//! Thread-safe worker handle and awaitable requests.
//!
//! [`SharedWorker`] puts the worker behind one coarse lock; every public
//! operation takes it for its whole duration. [`RequestFuture`] resolves when
//! a flush or disconnect request finishes, driving worker progress each time
//! it is polled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use lanewire_core::error::Result;
use lanewire_core::pool::RequestId;
use lanewire_core::PeerId;
use parking_lot::{Mutex, MutexGuard};

use crate::endpoint::EpHandle;
use crate::wireup::{AddressEntry, EndpointParams};
use crate::worker::Worker;

#[derive(Clone)]
pub struct SharedWorker {
    inner: Arc<Mutex<Worker>>,
}

impl SharedWorker {
    #[must_use]
    pub fn new(worker: Worker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(worker)),
        }
    }

    /// Lock the worker for several operations in a row.
    pub fn lock(&self) -> MutexGuard<'_, Worker> {
        self.inner.lock()
    }

    pub fn create_endpoint(&self, params: &EndpointParams) -> Result<EpHandle> {
        self.inner.lock().create_endpoint(params)
    }

    pub fn create_stub_endpoint(&self, peer_id: PeerId, peer_name: Option<&str>) -> Result<EpHandle> {
        self.inner.lock().create_stub_endpoint(peer_id, peer_name)
    }

    pub fn wireup_endpoint(&self, handle: EpHandle, entries: &[AddressEntry]) -> Result<()> {
        self.inner.lock().wireup_endpoint(handle, entries)
    }

    pub fn disconnect_nb(&self, handle: EpHandle) -> Result<Option<RequestId>> {
        self.inner.lock().disconnect_nb(handle)
    }

    pub fn flush_nb(&self, handle: EpHandle) -> Result<Option<RequestId>> {
        self.inner.lock().flush_nb(handle)
    }

    pub fn destroy_endpoint(&self, handle: EpHandle) {
        self.inner.lock().destroy_endpoint(handle);
    }

    pub fn progress(&self) -> usize {
        self.inner.lock().progress()
    }

    pub fn request_test(&self, id: RequestId) -> Poll<Result<()>> {
        self.inner.lock().request_test(id)
    }

    pub fn request_release(&self, id: RequestId) {
        self.inner.lock().request_release(id);
    }

    pub fn shutdown(&self) {
        self.inner.lock().shutdown();
    }

    /// Disconnect and wait for every lane to be flushed.
    ///
    /// The wait polls: each poll takes the worker lock for one progress round
    /// and wakes the task again while lanes are outstanding, so an awaiting
    /// task keeps its executor busy until the request finishes. Callers that
    /// cannot afford that should use [`SharedWorker::disconnect_nb`] and drive
    /// [`SharedWorker::progress`] at their own pace.
    pub async fn disconnect(&self, handle: EpHandle) -> Result<()> {
        let req = self.disconnect_nb(handle)?;
        self.wait(req).await
    }

    /// Flush every lane of the endpoint and wait for it.
    ///
    /// Busy-polls like [`SharedWorker::disconnect`].
    pub async fn flush(&self, handle: EpHandle) -> Result<()> {
        let req = self.flush_nb(handle)?;
        self.wait(req).await
    }

    /// Future for a request returned by a `*_nb` call.
    ///
    /// `None` stands for a request that already finished successfully.
    #[must_use]
    pub fn wait(&self, req: Option<RequestId>) -> RequestFuture {
        RequestFuture {
            worker: self.clone(),
            req,
        }
    }
}

/// Resolves with the final status of a request.
///
/// Every poll runs one progress round. While the request is unfinished the
/// future wakes itself, because completions only surface through progress.
///
/// Dropping the future before it resolves releases the request; it is freed
/// once its lanes are flushed.
#[must_use = "futures do nothing unless polled"]
pub struct RequestFuture {
    worker: SharedWorker,
    req: Option<RequestId>,
}

impl Future for RequestFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(req) = this.req else {
            return Poll::Ready(Ok(()));
        };

        let mut worker = this.worker.inner.lock();
        worker.progress();
        match worker.request_test(req) {
            Poll::Ready(status) => {
                worker.request_release(req);
                this.req = None;
                Poll::Ready(status)
            }
            Poll::Pending => {
                // hardware completions arrive through progress only
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

impl Drop for RequestFuture {
    fn drop(&mut self) {
        if let Some(req) = self.req.take() {
            self.worker.request_release(req);
        }
    }
}
