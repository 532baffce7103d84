//! CPU-GPU synchronization primitives.
//!
//! A [`Fence`] is handed out by the backend for every submitted frame and is
//! signalled from the queue's work-done callback once the GPU has finished
//! with that frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// CPU-GPU synchronization primitive.
///
/// Cloning a fence yields another handle to the same flag, so the clone moved
/// into the completion callback and the one stored by
/// [`FramePipeline`](super::FramePipeline) observe the same state.
#[derive(Debug)]
pub struct Fence {
    id: u64,
    signaled: Arc<AtomicBool>,
    submitted_at: Instant,
}

impl Fence {
    /// Create a new fence in the unsignaled state.
    pub(crate) fn new_unsignaled(id: u64) -> Self {
        Self {
            id,
            signaled: Arc::new(AtomicBool::new(false)),
            submitted_at: Instant::now(),
        }
    }

    /// Create a new fence in the signaled state.
    pub(crate) fn new_signaled(id: u64) -> Self {
        let fence = Self::new_unsignaled(id);
        fence.signal();
        fence
    }

    /// Identifier of the submission this fence tracks.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Time at which the tracked work was submitted.
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> FenceStatus {
        if self.signaled.load(Ordering::Acquire) {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Spin until the fence is signaled by another thread.
    ///
    /// Backends whose completion callbacks only fire while the device is
    /// polled must go through [`FenceWaiter::wait_fence`] instead.
    pub fn wait(&self) {
        while !self.signaled.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `true` if the fence was signaled, `false` if timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while !self.signaled.load(Ordering::Acquire) {
            if start.elapsed() >= timeout {
                return false;
            }
            std::hint::spin_loop();
        }
        true
    }

    /// Reset the fence to unsignaled state.
    ///
    /// Must only be called when no GPU work is pending on this fence.
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// Signal the fence.
    pub(crate) fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }
}

impl Clone for Fence {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            signaled: Arc::clone(&self.signaled),
            submitted_at: self.submitted_at,
        }
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new_unsignaled(0)
    }
}

/// Something that can block until a fence is signaled.
///
/// The GPU backend implements this by polling the device until the
/// submission behind the fence has completed.
pub trait FenceWaiter {
    fn wait_fence(&self, fence: &Fence);
}

/// Waiter for fences signaled by another thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWaiter;

impl FenceWaiter for SpinWaiter {
    fn wait_fence(&self, fence: &Fence) {
        fence.wait();
    }
}
