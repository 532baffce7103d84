//! Multipass rendering demo
//!
//! Run with:
//!   cargo run --release
//!   cargo run --release -- --scene ocean --duration 0
//!
//! Controls:
//!   Space / Right - Next scene
//!   Left          - Previous scene
//!   1-4           - Jump to a scene
//!   P             - Pause automatic cycling
//!   Mouse drag    - Orbit the camera
//!   Scroll        - Zoom
//!   WASD / QE     - Pan the orbit target
//!   F1            - Toggle overlay
//!   Escape        - Exit

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use multipass_demo::egui_integration::{show_overlay, OverlayAction, OverlayStats};
use multipass_demo::pipeline::TonemapOperator;
use multipass_demo::window::DemoCommand;
use multipass_demo::{
    AssetPaths, Engine, EngineConfig, EngineError, SceneKind, WgpuEguiIntegration, Window,
};
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
};

/// Multipass rendering demo arguments.
#[derive(Parser, Debug)]
#[command(
    name = "multipass-demo",
    about = "Real-time rendering demo cycling through four multipass scenes",
    version
)]
struct Args {
    /// Scene shown first: house, ocean, grass or reflections (or 1-4).
    #[arg(long, default_value = "house")]
    scene: SceneKind,

    /// Seconds per scene before cycling; 0 disables cycling.
    #[arg(long, default_value_t = 10.0)]
    duration: f32,

    /// Initial window width in pixels.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Disable vertical sync.
    #[arg(long)]
    no_vsync: bool,

    /// Frames the CPU may record ahead of the GPU (1-3).
    #[arg(long, default_value_t = 3)]
    frames_in_flight: usize,

    /// Shadow map resolution for the house scene.
    #[arg(long, default_value_t = 2048)]
    shadow_map_size: u32,

    /// OBJ model replacing the procedural house.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Diffuse texture for the house.
    #[arg(long)]
    texture: Option<PathBuf>,

    /// Equirectangular panorama for the reflection scene.
    #[arg(long)]
    environment: Option<PathBuf>,

    /// Tonemapping operator: aces, reinhard or none.
    #[arg(long, default_value = "aces")]
    tonemap: TonemapOperator,

    /// Exposure applied before tonemapping.
    #[arg(long, default_value_t = 1.0)]
    exposure: f32,

    /// Start with the overlay hidden.
    #[arg(long)]
    hide_overlay: bool,

    /// Exit after rendering this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn into_config(self) -> EngineConfig {
        EngineConfig {
            width: self.width,
            height: self.height,
            vsync: !self.no_vsync,
            frames_in_flight: self.frames_in_flight,
            start_scene: self.scene,
            scene_duration: self.duration,
            shadow_map_size: self.shadow_map_size,
            assets: AssetPaths {
                house_model: self.model,
                house_texture: self.texture,
                environment: self.environment,
            },
            overlay: !self.hide_overlay,
            tonemap: self.tonemap,
            exposure: self.exposure,
            ..Default::default()
        }
    }
}

struct App {
    engine: Engine,
    window: Window,
    overlay: WgpuEguiIntegration,
    last_frame: Instant,
    frames: u64,
    max_frames: Option<u64>,
}

impl App {
    fn apply(&mut self, command: DemoCommand, elwt: &EventLoopWindowTarget<()>) {
        match command {
            DemoCommand::NextScene => {
                self.engine.next_scene();
            }
            DemoCommand::PreviousScene => {
                self.engine.previous_scene();
            }
            DemoCommand::Select(kind) => self.engine.select_scene(kind),
            DemoCommand::TogglePause => {
                self.engine.toggle_pause();
            }
            DemoCommand::ToggleOverlay => {
                self.overlay.toggle();
            }
            DemoCommand::Quit => elwt.exit(),
        }
    }

    fn frame(&mut self, elwt: &EventLoopWindowTarget<()>) -> Result<(), EngineError> {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        if self.window.take_resized() {
            let (width, height) = self.window.dimensions();
            self.engine.resize(width, height);
        }

        self.engine.update(dt, self.window.input().camera_input());
        self.window.input_mut().end_frame();

        let Some(target) = self.engine.render_scene()? else {
            return Ok(());
        };

        if self.overlay.is_visible() {
            let stats = OverlayStats::collect(&self.engine);
            let mut action = None;
            self.overlay
                .run(self.window.window(), |ctx| action = show_overlay(ctx, &stats));
            self.overlay.render(
                self.engine.backend_mut(),
                target.swapchain_view,
                target.width,
                target.height,
            );
            match action {
                Some(OverlayAction::Select(kind)) => self.engine.select_scene(kind),
                Some(OverlayAction::TogglePause) => {
                    self.engine.toggle_pause();
                }
                None => {}
            }
        }

        self.engine.end_frame()?;

        self.frames += 1;
        if self.max_frames.is_some_and(|max| self.frames >= max) {
            log::info!("Rendered {} frames, exiting", self.frames);
            elwt.exit();
        }
        Ok(())
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let max_frames = args.max_frames;
    let config = args.into_config();
    if let Err(err) = config.validate() {
        log::error!("Invalid configuration: {err}");
        std::process::exit(2);
    }

    if let Err(err) = run(config, max_frames) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run(config: EngineConfig, max_frames: Option<u64>) -> Result<(), EngineError> {
    let event_loop = EventLoop::new().map_err(|err| EngineError::Window(err.to_string()))?;
    let window = Window::new(&event_loop, &config)?;
    let overlay_visible = config.overlay;

    let engine = pollster::block_on(Engine::new_async(window.window_arc(), config))?;
    let overlay = WgpuEguiIntegration::new(engine.backend(), window.window(), overlay_visible);

    let mut app = App {
        engine,
        window,
        overlay,
        last_frame: Instant::now(),
        frames: 0,
        max_frames,
    };

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    if app.overlay.on_window_event(app.window.window(), &event) {
                        return;
                    }
                    match event {
                        WindowEvent::RedrawRequested => {
                            if let Err(err) = app.frame(elwt) {
                                log::error!("Fatal rendering error: {err}");
                                elwt.exit();
                            }
                        }
                        other => {
                            if let Some(command) = app.window.handle_event(&other) {
                                app.apply(command, elwt);
                            }
                        }
                    }
                }
                Event::AboutToWait => app.window.request_redraw(),
                Event::LoopExiting => app.engine.shutdown(),
                _ => {}
            }
        })
        .map_err(|err| EngineError::Window(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_config() {
        let args = Args::try_parse_from(["multipass-demo"]).unwrap();
        assert_eq!(args.into_config(), EngineConfig::default());
    }

    #[test]
    fn maps_flags_onto_config() {
        let args = Args::try_parse_from([
            "multipass-demo",
            "--scene",
            "3",
            "--duration",
            "0",
            "--no-vsync",
            "--frames-in-flight",
            "2",
            "--environment",
            "sky.hdr",
            "--tonemap",
            "reinhard",
            "--hide-overlay",
            "--max-frames",
            "10",
        ])
        .unwrap();
        assert_eq!(args.max_frames, Some(10));

        let config = args.into_config();
        assert_eq!(config.start_scene, SceneKind::Grass);
        assert_eq!(config.scene_duration, 0.0);
        assert!(!config.vsync);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.assets.environment, Some(PathBuf::from("sky.hdr")));
        assert_eq!(config.tonemap, TonemapOperator::Reinhard);
        assert!(!config.overlay);
    }

    #[test]
    fn rejects_unknown_scene() {
        assert!(Args::try_parse_from(["multipass-demo", "--scene", "desert"]).is_err());
    }
}
