//! Frame pacing for multiple frames in flight.
//!
//! [`FramePipeline`] keeps one fence per frame slot. The CPU records frame
//! N+1 (and N+2 with three slots) while the GPU is still executing frame N,
//! and only blocks when it comes back around to a slot whose previous frame
//! has not completed yet:
//!
//! ```text
//! frames_in_flight = 3
//!
//! Slot 0: [Frame 0] ──► [Frame 3] ──► [Frame 6] ──►
//! Slot 1: [Frame 1] ──► [Frame 4] ──► [Frame 7] ──►
//! Slot 2: [Frame 2] ──► [Frame 5] ──► [Frame 8] ──►
//! ```
//!
//! Everything the CPU rewrites every frame (see [`UniformRing`]) is indexed
//! by the slot returned from [`FramePipeline::begin_frame`], so a slot's data
//! is never overwritten while the GPU may still read it.
//!
//! # Shutdown and resize
//!
//! Call [`FramePipeline::wait_idle`] before destroying resources that
//! in-flight frames may reference.

mod sync;
mod timings;
mod uniform_ring;

pub use sync::*;
pub use timings::*;
pub use uniform_ring::*;

/// Default number of frames in flight (triple buffering).
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 3;

/// Manages multiple frames in flight for CPU-GPU parallelism.
///
/// `FramePipeline` is not thread-safe; it is owned by the render thread.
#[derive(Debug)]
pub struct FramePipeline {
    /// Fences for each frame slot. `None` if slot hasn't been used yet.
    frame_fences: Vec<Option<Fence>>,

    /// Current frame slot index (0 to frames_in_flight - 1).
    current_slot: usize,

    frames_in_flight: usize,

    /// Total frames started.
    frame_count: u64,
}

impl FramePipeline {
    /// Create a new frame pipeline.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is 0.
    ///
    /// ```
    /// use multipass_demo::frame::FramePipeline;
    ///
    /// let pipeline = FramePipeline::new(3);
    /// assert_eq!(pipeline.frames_in_flight(), 3);
    /// ```
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        Self {
            frame_fences: (0..frames_in_flight).map(|_| None).collect(),
            current_slot: 0,
            frames_in_flight,
            frame_count: 0,
        }
    }

    /// Begin a new frame and return the slot it may write.
    ///
    /// Blocks until the GPU has finished the frame that last used this slot.
    pub fn begin_frame<W: FenceWaiter + ?Sized>(&mut self, waiter: &W) -> usize {
        if let Some(fence) = &self.frame_fences[self.current_slot] {
            if !fence.is_signaled() {
                log::trace!(
                    "Slot {} busy, waiting for fence {}",
                    self.current_slot,
                    fence.id()
                );
                waiter.wait_fence(fence);
            }
        }

        self.frame_count += 1;

        log::trace!(
            "Begin frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );

        self.current_slot
    }

    /// Record the fence of the submitted frame and advance to the next slot.
    pub fn end_frame(&mut self, fence: Fence) {
        log::trace!(
            "End frame {} (slot {}, fence {})",
            self.frame_count,
            self.current_slot,
            fence.id()
        );

        self.frame_fences[self.current_slot] = Some(fence);
        self.current_slot = (self.current_slot + 1) % self.frames_in_flight;
    }

    /// Wait for all in-flight GPU work to complete.
    pub fn wait_idle<W: FenceWaiter + ?Sized>(&self, waiter: &W) {
        log::trace!("Waiting for GPU idle ({} slots)", self.frames_in_flight);

        for (i, fence) in self.frame_fences.iter().enumerate() {
            if let Some(f) = fence {
                if !f.is_signaled() {
                    log::trace!("Waiting for slot {}...", i);
                    waiter.wait_fence(f);
                }
            }
        }

        log::trace!("GPU idle");
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot that the next [`begin_frame`](Self::begin_frame) will return.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of submitted frames the GPU has not finished yet.
    pub fn frames_pending(&self) -> usize {
        self.frame_fences
            .iter()
            .flatten()
            .filter(|f| !f.is_signaled())
            .count()
    }

    /// Check if a specific frame slot is ready (non-blocking).
    pub fn is_slot_ready(&self, slot: usize) -> bool {
        assert!(slot < self.frames_in_flight, "Invalid slot index");

        match &self.frame_fences[slot] {
            Some(fence) => fence.is_signaled(),
            None => true,
        }
    }

    /// Check if all frame slots are ready (non-blocking).
    pub fn is_idle(&self) -> bool {
        self.frame_fences
            .iter()
            .all(|f| f.as_ref().map_or(true, |fence| fence.is_signaled()))
    }
}

impl Default for FramePipeline {
    fn default() -> Self {
        Self::new(DEFAULT_FRAMES_IN_FLIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    /// Waiter that completes the fence immediately and records the wait.
    #[derive(Default)]
    struct RecordingWaiter {
        waited: RefCell<Vec<u64>>,
    }

    impl FenceWaiter for RecordingWaiter {
        fn wait_fence(&self, fence: &Fence) {
            self.waited.borrow_mut().push(fence.id());
            fence.signal();
        }
    }

    #[test]
    fn test_new() {
        let pipeline = FramePipeline::new(2);
        assert_eq!(pipeline.frames_in_flight(), 2);
        assert_eq!(pipeline.current_slot(), 0);
        assert_eq!(pipeline.frame_count(), 0);
    }

    #[test]
    fn test_default_is_triple_buffered() {
        let pipeline = FramePipeline::default();
        assert_eq!(pipeline.frames_in_flight(), 3);
    }

    #[test]
    #[should_panic(expected = "frames_in_flight must be at least 1")]
    fn test_zero_frames_panics() {
        FramePipeline::new(0);
    }

    #[test]
    fn test_end_frame_advances_slot() {
        let waiter = RecordingWaiter::default();
        let mut pipeline = FramePipeline::new(3);

        for (id, expected) in [(1, 0), (2, 1), (3, 2), (4, 0)] {
            let slot = pipeline.begin_frame(&waiter);
            assert_eq!(slot, expected);
            pipeline.end_frame(Fence::new_signaled(id));
        }
        assert_eq!(pipeline.frame_count(), 4);
    }

    #[test]
    fn test_waits_only_when_slot_is_reused() {
        let waiter = RecordingWaiter::default();
        let mut pipeline = FramePipeline::new(2);

        pipeline.begin_frame(&waiter);
        pipeline.end_frame(Fence::new_unsignaled(10));
        pipeline.begin_frame(&waiter);
        pipeline.end_frame(Fence::new_unsignaled(11));
        assert!(waiter.waited.borrow().is_empty());
        assert_eq!(pipeline.frames_pending(), 2);

        // Third frame reuses slot 0 and must wait for fence 10 only.
        let slot = pipeline.begin_frame(&waiter);
        assert_eq!(slot, 0);
        assert_eq!(*waiter.waited.borrow(), vec![10]);
        assert_eq!(pipeline.frames_pending(), 1);
    }

    #[test]
    fn test_signaled_fence_is_not_waited_on() {
        let waiter = RecordingWaiter::default();
        let mut pipeline = FramePipeline::new(1);

        pipeline.begin_frame(&waiter);
        pipeline.end_frame(Fence::new_signaled(1));
        pipeline.begin_frame(&waiter);
        assert!(waiter.waited.borrow().is_empty());
    }

    #[test]
    fn test_skipped_frame_keeps_slot() {
        let waiter = RecordingWaiter::default();
        let mut pipeline = FramePipeline::new(3);

        let slot = pipeline.begin_frame(&waiter);
        // No end_frame: acquisition failed, nothing was submitted.
        let retry = pipeline.begin_frame(&waiter);
        assert_eq!(slot, retry);
    }

    #[test]
    fn test_wait_idle_waits_for_every_pending_fence() {
        let waiter = RecordingWaiter::default();
        let mut pipeline = FramePipeline::new(3);

        for id in 1..=3 {
            pipeline.begin_frame(&waiter);
            pipeline.end_frame(Fence::new_unsignaled(id));
        }
        assert!(!pipeline.is_idle());

        pipeline.wait_idle(&waiter);
        assert_eq!(*waiter.waited.borrow(), vec![1, 2, 3]);
        assert!(pipeline.is_idle());
    }

    #[test]
    fn test_is_slot_ready() {
        let waiter = RecordingWaiter::default();
        let mut pipeline = FramePipeline::new(2);
        assert!(pipeline.is_slot_ready(0));
        assert!(pipeline.is_slot_ready(1));

        pipeline.begin_frame(&waiter);
        pipeline.end_frame(Fence::new_unsignaled(1));
        assert!(!pipeline.is_slot_ready(0));
        assert!(pipeline.is_slot_ready(1));
    }

    #[test]
    #[should_panic(expected = "Invalid slot index")]
    fn test_is_slot_ready_out_of_range() {
        FramePipeline::new(2).is_slot_ready(2);
    }

    #[test]
    fn test_cross_thread_signal() {
        let mut pipeline = FramePipeline::new(1);
        pipeline.begin_frame(&SpinWaiter);
        let fence = Fence::new_unsignaled(1);
        let gpu = fence.clone();
        pipeline.end_frame(fence);

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            gpu.signal();
        });

        assert_eq!(pipeline.begin_frame(&SpinWaiter), 0);
        assert!(pipeline.is_idle());
    }
}
