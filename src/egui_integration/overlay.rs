//! Debug overlay: frame statistics and a scene picker

use crate::backend::traits::GraphicsBackend;
use crate::engine::Engine;
use crate::frame::FenceWaiter;
use crate::scenes::SceneKind;

/// Snapshot of everything the overlay shows
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStats {
    pub fps: Option<f32>,
    pub frame_time_ms: Option<f32>,
    /// Submit to completion, as reported by the GPU
    pub gpu_latency_ms: Option<f32>,
    pub completed_frames: u64,
    pub slot: usize,
    pub frames_in_flight: usize,
    pub scene: SceneKind,
    pub paused: bool,
    /// Seconds until auto-cycling moves on, if it is active
    pub next_scene_in: Option<f32>,
}

impl OverlayStats {
    pub fn collect<B: GraphicsBackend + FenceWaiter>(engine: &Engine<B>) -> Self {
        let timings = engine.timings();
        let timings = timings.lock();
        let pipeline = engine.frame_pipeline();
        let selector = engine.selector();

        Self {
            fps: timings.fps(),
            frame_time_ms: timings.average_frame_time().map(|d| d.as_secs_f32() * 1000.0),
            gpu_latency_ms: timings.average_gpu_latency().map(|d| d.as_secs_f32() * 1000.0),
            completed_frames: timings.completed_frames(),
            slot: pipeline.current_slot(),
            frames_in_flight: pipeline.frames_in_flight(),
            scene: selector.current(),
            paused: selector.is_paused(),
            next_scene_in: (!selector.is_paused() && selector.interval() > 0.0)
                .then(|| (selector.interval() - selector.elapsed()).max(0.0)),
        }
    }
}

/// Overlay visibility. Window input only reaches egui while the overlay is
/// shown, since hidden frames never drain egui's pending input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayVisibility {
    visible: bool,
}

impl OverlayVisibility {
    pub fn new(visible: bool) -> Self {
        Self { visible }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Show or hide the overlay; returns the new state
    pub fn toggle(&mut self) -> bool {
        self.visible = !self.visible;
        self.visible
    }

    pub fn receives_input(&self) -> bool {
        self.visible
    }
}

/// What the user clicked in the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    Select(SceneKind),
    TogglePause,
}

fn format_ms(value: Option<f32>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{ms:.2} ms"))
}

/// Draw the overlay window
pub fn show_overlay(ctx: &egui::Context, stats: &OverlayStats) -> Option<OverlayAction> {
    let mut action = None;

    egui::Window::new("Multipass Demo")
        .default_pos([12.0, 12.0])
        .resizable(false)
        .show(ctx, |ui| {
            ui.label(match stats.fps {
                Some(fps) => format!("FPS: {fps:.0}"),
                None => "FPS: -".to_string(),
            });
            ui.label(format!("Frame time: {}", format_ms(stats.frame_time_ms)));
            ui.label(format!("GPU latency: {}", format_ms(stats.gpu_latency_ms)));
            ui.label(format!(
                "Slot {} of {} ({} frames completed)",
                stats.slot, stats.frames_in_flight, stats.completed_frames
            ));

            ui.separator();
            for kind in SceneKind::ALL {
                if ui.selectable_label(kind == stats.scene, kind.title()).clicked() {
                    action = Some(OverlayAction::Select(kind));
                }
            }

            ui.separator();
            ui.horizontal(|ui| {
                let label = if stats.paused { "Resume cycling" } else { "Pause cycling" };
                if ui.button(label).clicked() {
                    action = Some(OverlayAction::TogglePause);
                }
                if let Some(seconds) = stats.next_scene_in {
                    ui.label(format!("next in {seconds:.0}s"));
                }
            });
        });

    action
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::frame::FrameTimings;
    use crate::EngineConfig;
    use std::time::Duration;

    #[test]
    fn hidden_overlay_takes_no_input() {
        let mut visibility = OverlayVisibility::new(true);
        assert!(visibility.receives_input());

        assert!(!visibility.toggle());
        assert!(!visibility.is_visible());
        assert!(!visibility.receives_input());

        assert!(visibility.toggle());
        assert!(visibility.receives_input());
    }

    #[test]
    fn formats_missing_samples_as_dash() {
        assert_eq!(format_ms(None), "-");
        assert_eq!(format_ms(Some(16.666)), "16.67 ms");
    }

    #[test]
    fn collects_engine_state() {
        let timings = FrameTimings::shared();
        timings.lock().record_frame_time(Duration::from_millis(20));
        timings.lock().record_gpu_latency(Duration::from_millis(5));
        let config = EngineConfig {
            scene_duration: 8.0,
            start_scene: SceneKind::Grass,
            ..Default::default()
        };
        let mut engine = Engine::with_backend(MockBackend::new(16, 16), &config, timings).unwrap();

        let stats = OverlayStats::collect(&engine);
        assert_eq!(stats.scene, SceneKind::Grass);
        assert_eq!(stats.frames_in_flight, 3);
        assert_eq!(stats.completed_frames, 1);
        assert_eq!(stats.next_scene_in, Some(8.0));
        assert!((stats.fps.unwrap() - 50.0).abs() < 0.01);

        engine.toggle_pause();
        assert_eq!(OverlayStats::collect(&engine).next_scene_in, None);
    }

    #[test]
    fn renders_without_input() {
        let ctx = egui::Context::default();
        let stats = OverlayStats {
            fps: None,
            frame_time_ms: None,
            gpu_latency_ms: None,
            completed_frames: 0,
            slot: 0,
            frames_in_flight: 2,
            scene: SceneKind::Ocean,
            paused: true,
            next_scene_in: None,
        };
        let mut action = Some(OverlayAction::TogglePause);
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            action = show_overlay(ctx, &stats);
        });
        assert_eq!(action, None);
    }
}
