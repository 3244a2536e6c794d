use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Progress and cancellation of the ROM upload, shared between the thread
/// doing the transfer and any number of observers.
///
/// Obtain one with [`Device::upload_state`](crate::Device::upload_state) and
/// keep the `Arc` on the observing side; every method takes `&self`.
#[derive(Debug, Default)]
pub struct UploadState {
    active: AtomicBool,
    cancelled: AtomicBool,
    /// `f32` bit pattern, always within [0.0, 1.0].
    progress: AtomicU32,
}
impl UploadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the running upload to stop at the next chunk boundary.
    ///
    /// Does nothing when no upload is running and returns without waiting for
    /// the transfer to notice.
    pub fn cancel(&self) {
        if self.active.load(Ordering::Acquire) {
            self.cancelled.store(true, Ordering::Release);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether an upload is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stores `progress` clamped to [0.0, 1.0]. NaN is stored as 0.0.
    pub fn set_progress(&self, progress: f32) {
        self.progress
            .store(clamp_progress(progress).to_bits(), Ordering::Release);
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Acquire))
    }

    /// Resets the state for a new upload and marks it active.
    pub(crate) fn begin(&self) -> UploadGuard<'_> {
        self.cancelled.store(false, Ordering::Release);
        self.progress.store(0f32.to_bits(), Ordering::Release);
        self.active.store(true, Ordering::Release);
        UploadGuard { state: self }
    }

    /// Raises the progress to `progress`, never lowering it.
    pub(crate) fn advance(&self, progress: f32) {
        // non-negative floats order the same way as their bit patterns
        self.progress
            .fetch_max(clamp_progress(progress).to_bits(), Ordering::AcqRel);
    }
}

fn clamp_progress(progress: f32) -> f32 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// Marks the upload inactive when the transfer returns, whatever the outcome.
pub(crate) struct UploadGuard<'a> {
    state: &'a UploadState,
}
impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.state.active.store(false, Ordering::Release);
    }
}
