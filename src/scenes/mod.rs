//! Demo scenes and the selector cycling between them
//!
//! Every scene owns its meshes, textures and uniform rings for the whole
//! run. Its render graph is built lazily the first time the scene is shown
//! and torn down only when the surface changes size (or at shutdown), after
//! the engine has waited for the GPU to go idle.

mod grass;
mod house;
mod ocean;
mod reflections;

pub use grass::GrassScene;
pub use house::HouseScene;
pub use ocean::OceanScene;
pub use reflections::ReflectionScene;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::EngineResult;
use crate::pipeline::{TonemapOperator, TonemappingPass, DEPTH_FORMAT, HDR_FORMAT};
use crate::render_graph::*;
use crate::scene::{Camera, CameraInput};
use crate::EngineConfig;
use std::fmt;
use std::str::FromStr;

/// Name under which every scene graph registers the swapchain image
pub const SWAPCHAIN: &str = "swapchain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SceneKind {
    #[default]
    House,
    Ocean,
    Grass,
    Reflections,
}

impl SceneKind {
    /// Cycling order
    pub const ALL: [SceneKind; 4] = [
        SceneKind::House,
        SceneKind::Ocean,
        SceneKind::Grass,
        SceneKind::Reflections,
    ];

    pub fn title(self) -> &'static str {
        match self {
            SceneKind::House => "Shadow-mapped house",
            SceneKind::Ocean => "Animated ocean",
            SceneKind::Grass => "Procedural grass",
            SceneKind::Reflections => "Environment reflections",
        }
    }

    pub fn index(self) -> usize {
        match self {
            SceneKind::House => 0,
            SceneKind::Ocean => 1,
            SceneKind::Grass => 2,
            SceneKind::Reflections => 3,
        }
    }
}

impl fmt::Display for SceneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SceneKind::House => "house",
            SceneKind::Ocean => "ocean",
            SceneKind::Grass => "grass",
            SceneKind::Reflections => "reflections",
        };
        f.write_str(name)
    }
}

impl FromStr for SceneKind {
    type Err = String;

    /// Accepts scene names in any case, or their 1-based number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(number) = s.parse::<usize>() {
            return number
                .checked_sub(1)
                .and_then(|i| Self::ALL.get(i).copied())
                .ok_or_else(|| format!("scene number must be 1-{}, got {number}", Self::ALL.len()));
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown scene '{s}'"))
    }
}

/// Which scene is showing, and when to move on to the next one
#[derive(Debug, Clone)]
pub struct SceneSelector {
    current: usize,
    /// Seconds per scene; 0 disables auto-advance
    interval: f32,
    elapsed: f32,
    paused: bool,
}

impl SceneSelector {
    pub fn new(start: SceneKind, interval: f32) -> Self {
        Self {
            current: start.index(),
            interval: interval.max(0.0),
            elapsed: 0.0,
            paused: false,
        }
    }

    pub fn current(&self) -> SceneKind {
        SceneKind::ALL[self.current]
    }

    /// Advance the timer. Returns the newly selected scene when the interval
    /// has elapsed.
    pub fn update(&mut self, dt: f32) -> Option<SceneKind> {
        if self.paused || self.interval <= 0.0 {
            return None;
        }
        self.elapsed += dt;
        if self.elapsed < self.interval {
            return None;
        }
        Some(self.next())
    }

    pub fn next(&mut self) -> SceneKind {
        self.current = (self.current + 1) % SceneKind::ALL.len();
        self.elapsed = 0.0;
        self.current()
    }

    pub fn previous(&mut self) -> SceneKind {
        self.current = (self.current + SceneKind::ALL.len() - 1) % SceneKind::ALL.len();
        self.elapsed = 0.0;
        self.current()
    }

    pub fn select(&mut self, kind: SceneKind) {
        self.current = kind.index();
        self.elapsed = 0.0;
    }

    /// Toggle auto-advance; returns whether it is now paused.
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    /// Seconds the current scene has been showing since the last switch
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }
}

/// One of the hardcoded demos
pub trait DemoScene {
    fn kind(&self) -> SceneKind;

    /// Animate and move the camera
    fn update(&mut self, dt: f32, input: &CameraInput);

    /// Write this frame's uniforms into the copies owned by `frame.slot`
    fn write_uniforms(&mut self, backend: &mut dyn GraphicsBackend, frame: &FrameInfo);

    /// Declare the passes and resources of this scene. The graph must
    /// register the swapchain as [`SWAPCHAIN`].
    fn build_graph(&mut self, width: u32, height: u32, swapchain_format: TextureFormat) -> RenderGraph;

    /// Scene-owned textures the graph registers as externals, by name
    fn external_views(&self) -> Vec<(&'static str, TextureViewHandle)> {
        Vec::new()
    }

    fn camera(&self) -> &Camera;

    /// Free scene-owned GPU objects. The GPU must be idle.
    fn destroy(&mut self, backend: &mut dyn GraphicsBackend);
}

/// Build every demo scene
pub fn create_scenes(
    backend: &mut dyn GraphicsBackend,
    config: &EngineConfig,
) -> BackendResult<Vec<Box<dyn DemoScene>>> {
    let mut scenes: Vec<Box<dyn DemoScene>> = Vec::with_capacity(SceneKind::ALL.len());
    for kind in SceneKind::ALL {
        let scene: Box<dyn DemoScene> = match kind {
            SceneKind::House => Box::new(HouseScene::new(backend, config)?),
            SceneKind::Ocean => Box::new(OceanScene::new(backend, config)?),
            SceneKind::Grass => Box::new(GrassScene::new(backend, config)?),
            SceneKind::Reflections => Box::new(ReflectionScene::new(backend, config)?),
        };
        log::debug!("Created scene '{}'", kind);
        scenes.push(scene);
    }
    Ok(scenes)
}

struct BuiltGraph {
    graph: RenderGraph,
    compiled: CompiledGraph,
    executor: RenderGraphExecutor,
    size: (u32, u32),
}

/// A scene together with its lazily built render graph
pub struct SceneSlot {
    scene: Box<dyn DemoScene>,
    built: Option<BuiltGraph>,
}

impl SceneSlot {
    pub fn new(scene: Box<dyn DemoScene>) -> Self {
        Self { scene, built: None }
    }

    pub fn scene(&self) -> &dyn DemoScene {
        self.scene.as_ref()
    }

    pub fn scene_mut(&mut self) -> &mut dyn DemoScene {
        self.scene.as_mut()
    }

    /// Size the current graph was built for, if any
    pub fn built_size(&self) -> Option<(u32, u32)> {
        self.built.as_ref().map(|b| b.size)
    }

    /// Execute the scene graph into `swapchain`, building it first if needed.
    ///
    /// A graph built for another size is rebuilt; callers must have waited
    /// for the GPU before the size changed.
    pub fn render<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        frame: &FrameInfo,
        swapchain: TextureViewHandle,
    ) -> EngineResult<()> {
        let size = (frame.width, frame.height);
        if self.built_size() != Some(size) {
            self.teardown(backend);
            self.build(backend, size)?;
        }
        let externals = self.scene.external_views();
        let Some(built) = self.built.as_mut() else {
            return Ok(());
        };

        if let Some(id) = built.graph.get_external(SWAPCHAIN) {
            built.executor.set_external_view(id, swapchain);
        }
        for (name, view) in externals {
            match built.graph.get_external(name) {
                Some(id) => built.executor.set_external_view(id, view),
                None => log::warn!("Scene '{}' has no external named '{}'", self.scene.kind(), name),
            }
        }

        let result = built
            .executor
            .execute(&built.graph, &built.compiled, backend, frame);
        built.executor.clear_external_views();
        result.map_err(Into::into)
    }

    fn build<B: GraphicsBackend>(&mut self, backend: &mut B, (width, height): (u32, u32)) -> EngineResult<()> {
        let mut graph = self
            .scene
            .build_graph(width, height, backend.swapchain_format());
        let compiled = graph.compile()?;

        let mut executor = RenderGraphExecutor::new();
        executor.allocate_resources(&graph, &compiled, backend)?;
        executor.prepare_passes(&mut graph, backend, width, height)?;

        log::debug!(
            "Built '{}' graph for {}x{}: {} passes, {} textures, {} buffers",
            self.scene.kind(),
            width,
            height,
            compiled.pass_order.len(),
            executor.allocated_texture_count(),
            executor.allocated_buffer_count()
        );

        self.built = Some(BuiltGraph {
            graph,
            compiled,
            executor,
            size: (width, height),
        });
        Ok(())
    }

    /// Destroy the graph's passes and resources. The GPU must be idle.
    pub fn teardown<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(mut built) = self.built.take() {
            built.graph.release_passes(backend);
            built.executor.cleanup(backend);
            log::debug!("Released '{}' graph", self.scene.kind());
        }
    }

    /// Teardown plus the scene's own resources. The GPU must be idle.
    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.teardown(backend);
        self.scene.destroy(backend);
    }
}

/// Targets shared by every scene graph: HDR colour, depth and the swapchain
#[derive(Debug, Clone, Copy)]
pub(crate) struct SceneTargets {
    pub hdr: ResourceId,
    pub depth: ResourceId,
    pub swapchain: ResourceId,
}

impl SceneTargets {
    pub(crate) fn declare(graph: &mut RenderGraph, width: u32, height: u32) -> Self {
        let hdr = graph.create_texture_relative(
            "hdr",
            TextureSize::FULL,
            HDR_FORMAT,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            width,
            height,
        );
        let depth = graph.create_texture_relative(
            "depth",
            TextureSize::FULL,
            DEPTH_FORMAT,
            TextureUsage::RENDER_ATTACHMENT,
            width,
            height,
        );
        let swapchain = graph.register_external(SWAPCHAIN);
        Self {
            hdr,
            depth,
            swapchain,
        }
    }
}

/// Tonemapping settings every scene finishes with
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tonemap {
    pub operator: TonemapOperator,
    pub exposure: f32,
}

impl Tonemap {
    pub(crate) fn from_config(config: &EngineConfig) -> Self {
        Self {
            operator: config.tonemap,
            exposure: config.exposure,
        }
    }

    pub(crate) fn pass(self, targets: &SceneTargets) -> TonemappingPass {
        TonemappingPass::new(targets.hdr, targets.swapchain).with_operator(self.operator, self.exposure)
    }
}

/// Depth state for fullscreen backgrounds drawn inside a pass with depth:
/// always passes and leaves the cleared depth untouched.
pub(crate) fn background_depth() -> DepthStencilState {
    DepthStencilState {
        depth_write_enabled: false,
        depth_compare: CompareFunction::Always,
        ..DepthStencilState::depth_test(DEPTH_FORMAT)
    }
}

/// WGSL helpers deriving camera data from `uniforms`
pub(crate) const CAMERA_WGSL: &str = r#"
fn camera_rotation() -> mat3x3<f32> {
    return transpose(mat3x3<f32>(uniforms.view[0].xyz, uniforms.view[1].xyz, uniforms.view[2].xyz));
}

fn camera_position() -> vec3<f32> {
    return -(camera_rotation() * uniforms.view[3].xyz);
}

// World-space direction through a fullscreen uv
fn view_ray(uv: vec2<f32>) -> vec3<f32> {
    let ndc = vec2<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let ray = vec3<f32>(ndc.x / uniforms.projection[0][0], ndc.y / uniforms.projection[1][1], -1.0);
    return normalize(camera_rotation() * ray);
}
"#;

/// Procedural daylight sky, shared by the ocean and grass scenes
pub(crate) const SKY_WGSL: &str = r#"
const SUN_DIRECTION: vec3<f32> = vec3<f32>(0.32, 0.38, -0.87);

fn sky_color(dir: vec3<f32>) -> vec3<f32> {
    let horizon = vec3<f32>(0.85, 0.9, 1.0);
    let zenith = vec3<f32>(0.18, 0.42, 0.9);
    var color = mix(horizon, zenith, sqrt(clamp(dir.y, 0.0, 1.0)));
    if (dir.y < 0.0) {
        color = mix(horizon, vec3<f32>(0.12, 0.16, 0.22), clamp(-dir.y * 4.0, 0.0, 1.0));
    }
    let sun = pow(max(dot(dir, normalize(SUN_DIRECTION)), 0.0), 900.0) * 25.0;
    return color + vec3<f32>(sun);
}
"#;
