use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Rolling frame statistics shown by the overlay.
///
/// CPU frame times are pushed by the render loop; GPU latencies (submit to
/// completion) are pushed from the queue's completion callbacks, which is why
/// the timings are shared behind a mutex.
#[derive(Debug, Clone)]
pub struct FrameTimings {
    frame_times: VecDeque<Duration>,
    gpu_latencies: VecDeque<Duration>,
    capacity: usize,
    completed_frames: u64,
}

pub type SharedFrameTimings = Arc<Mutex<FrameTimings>>;

impl FrameTimings {
    pub const DEFAULT_CAPACITY: usize = 60;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frame_times: VecDeque::with_capacity(capacity),
            gpu_latencies: VecDeque::with_capacity(capacity),
            capacity,
            completed_frames: 0,
        }
    }

    pub fn shared() -> SharedFrameTimings {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn record_frame_time(&mut self, dt: Duration) {
        push_bounded(&mut self.frame_times, dt, self.capacity);
    }

    /// Called once per completed GPU submission.
    pub fn record_gpu_latency(&mut self, latency: Duration) {
        push_bounded(&mut self.gpu_latencies, latency, self.capacity);
        self.completed_frames += 1;
    }

    pub fn average_frame_time(&self) -> Option<Duration> {
        average(&self.frame_times)
    }

    pub fn average_gpu_latency(&self) -> Option<Duration> {
        average(&self.gpu_latencies)
    }

    pub fn fps(&self) -> Option<f32> {
        self.average_frame_time()
            .filter(|dt| !dt.is_zero())
            .map(|dt| 1.0 / dt.as_secs_f32())
    }

    /// Total number of submissions the GPU reported as finished.
    pub fn completed_frames(&self) -> u64 {
        self.completed_frames
    }
}

impl Default for FrameTimings {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

fn push_bounded(samples: &mut VecDeque<Duration>, value: Duration, capacity: usize) {
    if samples.len() == capacity {
        samples.pop_front();
    }
    samples.push_back(value);
}

fn average(samples: &VecDeque<Duration>) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let total: Duration = samples.iter().sum();
    Some(total / samples.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_has_no_averages() {
        let timings = FrameTimings::default();
        assert_eq!(timings.average_frame_time(), None);
        assert_eq!(timings.average_gpu_latency(), None);
        assert_eq!(timings.fps(), None);
    }

    #[test]
    fn test_fps_from_frame_times() {
        let mut timings = FrameTimings::new(4);
        for _ in 0..4 {
            timings.record_frame_time(Duration::from_millis(20));
        }
        let fps = timings.fps().unwrap();
        assert!((fps - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_window_drops_old_samples() {
        let mut timings = FrameTimings::new(2);
        timings.record_gpu_latency(Duration::from_millis(100));
        timings.record_gpu_latency(Duration::from_millis(2));
        timings.record_gpu_latency(Duration::from_millis(4));

        assert_eq!(timings.average_gpu_latency(), Some(Duration::from_millis(3)));
        assert_eq!(timings.completed_frames(), 3);
    }

    #[test]
    fn test_shared_across_threads() {
        let shared = FrameTimings::shared();
        let worker = Arc::clone(&shared);
        std::thread::spawn(move || {
            worker.lock().record_gpu_latency(Duration::from_millis(1));
        })
        .join()
        .unwrap();
        assert_eq!(shared.lock().completed_frames(), 1);
    }
}
