//! Main engine orchestrator
//!
//! Owns the backend, the frame pipeline and one [`SceneSlot`] per demo
//! scene. A frame is driven by the binary as:
//!
//! ```text
//! update(dt, input) -> render_scene() -> [overlay] -> end_frame()
//! ```

use crate::backend::traits::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::frame::{FenceWaiter, FramePipeline, SharedFrameTimings};
use crate::render_graph::{FrameInfo, GraphError};
use crate::resources::AssetError;
use crate::scene::CameraInput;
use crate::scenes::{create_scenes, DemoScene, SceneKind, SceneSelector, SceneSlot};
use crate::{ConfigError, EngineConfig};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use winit::window::Window as WinitWindow;

/// Any error that stops the demo
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Render graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),
    #[error("Window error: {0}")]
    Window(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// The demo engine
pub struct Engine<B: GraphicsBackend + FenceWaiter = WgpuBackend> {
    backend: B,
    frame_pipeline: FramePipeline,
    slots: Vec<SceneSlot>,
    selector: SceneSelector,
    timings: SharedFrameTimings,
    start: Instant,
    last_present: Option<Instant>,
    size: (u32, u32),
}

impl Engine<WgpuBackend> {
    /// Create the wgpu backend for `window` and every scene
    pub async fn new_async(window: Arc<WinitWindow>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let backend = WgpuBackend::new_async(window, config.vsync).await?;
        let info = backend.adapter_info();
        log::info!("Using {} ({:?})", info.name, info.backend);
        let timings = backend.timings();
        Self::with_backend(backend, &config, timings)
    }
}

impl<B: GraphicsBackend + FenceWaiter> Engine<B> {
    /// Build every scene on an already created backend
    pub fn with_backend(mut backend: B, config: &EngineConfig, timings: SharedFrameTimings) -> EngineResult<Self> {
        config.validate()?;
        let scenes = create_scenes(&mut backend, config)?;
        let size = backend.surface_size();
        log::info!(
            "Engine ready: {} scenes, {} frames in flight, {}x{}",
            scenes.len(),
            config.frames_in_flight,
            size.0,
            size.1
        );

        Ok(Self {
            backend,
            frame_pipeline: FramePipeline::new(config.frames_in_flight),
            slots: scenes.into_iter().map(SceneSlot::new).collect(),
            selector: SceneSelector::new(config.start_scene, config.scene_duration),
            timings,
            start: Instant::now(),
            last_present: None,
            size,
        })
    }

    /// Advance auto-cycling and the active scene's camera
    pub fn update(&mut self, dt: f32, input: &CameraInput) {
        if let Some(kind) = self.selector.update(dt) {
            log::info!("Switching to scene '{}'", kind.title());
        }
        if let Some(slot) = self.active_slot_mut() {
            slot.scene_mut().update(dt, input);
        }
    }

    /// Wait for a frame slot, write the active scene's uniforms, acquire the
    /// swapchain image and execute the scene graph into it.
    ///
    /// Returns the acquired frame, or `None` when the frame was skipped
    /// (minimised window, lost surface, acquire timeout). Only call
    /// [`end_frame`](Self::end_frame) after `Some`.
    pub fn render_scene(&mut self) -> EngineResult<Option<FrameContext>> {
        let (width, height) = self.size;
        if width == 0 || height == 0 || self.slots.is_empty() {
            return Ok(None);
        }

        let slot = self.frame_pipeline.begin_frame(&self.backend);
        let frame = FrameInfo {
            slot,
            frame_index: self.frame_pipeline.frame_count(),
            time: self.start.elapsed().as_secs_f32(),
            width,
            height,
        };
        let active = self.selector.current().index();
        self.slots[active]
            .scene_mut()
            .write_uniforms(&mut self.backend, &frame);

        let target = match self.backend.begin_frame() {
            Ok(target) => target,
            Err(BackendError::SurfaceLost) => {
                log::warn!("Surface lost, reconfiguring");
                self.backend.resize(width, height);
                return Ok(None);
            }
            Err(BackendError::AcquireImageFailed(reason)) => {
                log::warn!("Skipping frame {}: {}", frame.frame_index, reason);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        self.slots[active].render(&mut self.backend, &frame, target.swapchain_view)?;
        Ok(Some(target))
    }

    /// Submit and present the frame started by [`render_scene`](Self::render_scene)
    pub fn end_frame(&mut self) -> EngineResult<()> {
        let fence = self.backend.end_frame()?;
        self.frame_pipeline.end_frame(fence);

        let now = Instant::now();
        if let Some(previous) = self.last_present.replace(now) {
            self.timings.lock().record_frame_time(now - previous);
        }
        Ok(())
    }

    /// Reconfigure the surface and drop every scene graph.
    ///
    /// A zero extent (minimised window) only pauses rendering.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("Window minimised, pausing rendering");
            self.size = (0, 0);
            return;
        }

        self.frame_pipeline.wait_idle(&self.backend);
        self.backend.resize(width, height);
        self.size = self.backend.surface_size();
        for slot in &mut self.slots {
            slot.teardown(&mut self.backend);
        }
        log::debug!("Resized to {}x{}", self.size.0, self.size.1);
    }

    pub fn select_scene(&mut self, kind: SceneKind) {
        if kind != self.selector.current() {
            log::info!("Switching to scene '{}'", kind.title());
        }
        self.selector.select(kind);
    }

    pub fn next_scene(&mut self) -> SceneKind {
        let kind = self.selector.next();
        log::info!("Switching to scene '{}'", kind.title());
        kind
    }

    pub fn previous_scene(&mut self) -> SceneKind {
        let kind = self.selector.previous();
        log::info!("Switching to scene '{}'", kind.title());
        kind
    }

    /// Pause or resume auto-cycling; returns whether it is now paused
    pub fn toggle_pause(&mut self) -> bool {
        let paused = self.selector.toggle_pause();
        log::info!("Scene cycling {}", if paused { "paused" } else { "resumed" });
        paused
    }

    /// Wait for the GPU and free every scene. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        self.frame_pipeline.wait_idle(&self.backend);
        for mut slot in self.slots.drain(..) {
            slot.destroy(&mut self.backend);
        }
        log::info!("Engine shut down after {} frames", self.frame_pipeline.frame_count());
    }

    fn active_slot_mut(&mut self) -> Option<&mut SceneSlot> {
        let index = self.selector.current().index();
        self.slots.get_mut(index)
    }

    pub fn active_scene(&self) -> Option<&dyn DemoScene> {
        self.slots
            .get(self.selector.current().index())
            .map(SceneSlot::scene)
    }

    pub fn selector(&self) -> &SceneSelector {
        &self.selector
    }

    pub fn frame_pipeline(&self) -> &FramePipeline {
        &self.frame_pipeline
    }

    pub fn timings(&self) -> SharedFrameTimings {
        Arc::clone(&self.timings)
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: GraphicsBackend + FenceWaiter> Drop for Engine<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::frame::FrameTimings;

    fn engine(config: EngineConfig) -> Engine<MockBackend> {
        Engine::with_backend(MockBackend::new(64, 48), &config, FrameTimings::shared()).unwrap()
    }

    fn count(engine: &Engine<MockBackend>, call: &str) -> usize {
        engine.backend().calls.iter().filter(|c| *c == call).count()
    }

    /// Submit `frames` frames whose fences the GPU has not signaled yet
    fn render_unfinished(engine: &mut Engine<MockBackend>, frames: usize) {
        for _ in 0..frames {
            engine.render_scene().unwrap();
            engine.end_frame().unwrap();
        }
        engine.backend_mut().lifecycle.get_mut().clear();
    }

    /// Asserts `waits` fences were waited on before any texture was freed
    fn assert_waited_before_destroy(engine: &Engine<MockBackend>, waits: usize) {
        let lifecycle = engine.backend().lifecycle.borrow();
        let first_destroy = lifecycle
            .iter()
            .position(|e| e.starts_with("destroy_texture"))
            .expect("graph textures destroyed");
        let waited: Vec<_> = lifecycle
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with("wait_fence"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(waited.len(), waits);
        assert!(waited.iter().all(|&i| i < first_destroy));
    }

    #[test]
    fn frames_rotate_through_slots() {
        let mut engine = engine(EngineConfig::default());
        let mut slots = Vec::new();
        for _ in 0..4 {
            slots.push(engine.frame_pipeline().current_slot());
            assert!(engine.render_scene().unwrap().is_some());
            engine.end_frame().unwrap();
        }
        assert_eq!(slots, [0, 1, 2, 0]);
        assert_eq!(count(&engine, "end_frame"), 4);
        assert!(engine.timings().lock().average_frame_time().is_some());
    }

    #[test]
    fn minimised_window_skips_frames() {
        let mut engine = engine(EngineConfig::default());
        engine.resize(0, 0);
        assert!(engine.render_scene().unwrap().is_none());
        assert_eq!(count(&engine, "begin_frame"), 0);

        engine.resize(32, 32);
        assert!(engine.render_scene().unwrap().is_some());
    }

    #[test]
    fn lost_surface_is_reconfigured() {
        let mut engine = engine(EngineConfig::default());
        engine.backend_mut().fail_acquire = Some(|| BackendError::SurfaceLost);
        assert!(engine.render_scene().unwrap().is_none());
        assert_eq!(count(&engine, "resize 64x48"), 1);

        engine.backend_mut().fail_acquire = Some(|| BackendError::AcquireImageFailed("timeout".into()));
        assert!(engine.render_scene().unwrap().is_none());
    }

    #[test]
    fn out_of_memory_is_fatal() {
        let mut engine = engine(EngineConfig::default());
        engine.backend_mut().fail_acquire = Some(|| BackendError::OutOfMemory);
        assert!(matches!(
            engine.render_scene(),
            Err(EngineError::Backend(BackendError::OutOfMemory))
        ));
    }

    #[test]
    fn resize_drops_built_graphs() {
        let mut engine = engine(EngineConfig::default());
        engine.render_scene().unwrap();
        engine.end_frame().unwrap();
        assert_eq!(engine.slots[0].built_size(), Some((64, 48)));

        engine.resize(128, 96);
        assert!(engine.slots.iter().all(|s| s.built_size().is_none()));
        assert_eq!(engine.size(), (128, 96));

        engine.render_scene().unwrap();
        assert_eq!(engine.slots[0].built_size(), Some((128, 96)));
    }

    #[test]
    fn resize_waits_for_in_flight_frames_before_freeing() {
        let mut engine = engine(EngineConfig::default());
        render_unfinished(&mut engine, 3);

        engine.resize(128, 96);
        assert_waited_before_destroy(&engine, 3);
    }

    #[test]
    fn shutdown_waits_for_in_flight_frames_before_freeing() {
        let mut engine = engine(EngineConfig::default());
        render_unfinished(&mut engine, 3);

        engine.shutdown();
        assert_waited_before_destroy(&engine, 3);
    }

    #[test]
    fn renders_the_selected_scene() {
        let mut engine = engine(EngineConfig {
            scene_duration: 1.0,
            ..Default::default()
        });
        assert_eq!(engine.active_scene().unwrap().kind(), SceneKind::House);

        engine.update(1.5, &CameraInput::default());
        assert_eq!(engine.selector().current(), SceneKind::Ocean);

        engine.select_scene(SceneKind::Grass);
        engine.backend_mut().calls.clear();
        engine.render_scene().unwrap();
        assert!(engine
            .backend()
            .calls
            .contains(&"begin_compute_pass Grass Generate Pass".to_string()));
        assert_eq!(engine.previous_scene(), SceneKind::Ocean);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        let result = Engine::with_backend(MockBackend::new(8, 8), &config, FrameTimings::shared());
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn shutdown_frees_everything() {
        let mut engine = engine(EngineConfig::default());
        for kind in SceneKind::ALL {
            engine.select_scene(kind);
            engine.render_scene().unwrap();
            engine.end_frame().unwrap();
        }
        engine.shutdown();
        engine.shutdown();

        let backend = engine.backend();
        assert!(backend.live_buffers.is_empty());
        assert!(backend.live_textures.is_empty());
        assert!(backend.live_views.is_empty());
        assert!(engine.active_scene().is_none());
    }
}
