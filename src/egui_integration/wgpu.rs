//! egui on the wgpu backend
//!
//! The overlay is drawn into the swapchain image after the scene graph ran,
//! inside the same command encoder, so it is presented with the frame.

use egui::ViewportId;
use egui_wgpu::ScreenDescriptor;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::backend::traits::TextureViewHandle;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::egui_integration::overlay::OverlayVisibility;

pub struct WgpuEguiIntegration {
    ctx: egui::Context,
    winit_state: egui_winit::State,
    renderer: egui_wgpu::Renderer,
    paint_jobs: Vec<egui::ClippedPrimitive>,
    textures_delta: egui::TexturesDelta,
    visibility: OverlayVisibility,
}

impl WgpuEguiIntegration {
    pub fn new(backend: &WgpuBackend, window: &Window, visible: bool) -> Self {
        let ctx = egui::Context::default();
        let winit_state = egui_winit::State::new(
            ctx.clone(),
            ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
        );
        let renderer = egui_wgpu::Renderer::new(backend.device(), backend.wgpu_surface_format(), None, 1);

        Self {
            ctx,
            winit_state,
            renderer,
            paint_jobs: Vec::new(),
            textures_delta: egui::TexturesDelta::default(),
            visibility: OverlayVisibility::new(visible),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visibility.is_visible()
    }

    /// Show or hide the overlay; returns the new state
    pub fn toggle(&mut self) -> bool {
        self.visibility.toggle()
    }

    /// Feed a window event to egui. Returns `true` when the overlay used it
    /// and the camera should not.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        if !self.visibility.receives_input() {
            return false;
        }
        self.winit_state.on_window_event(window, event).consumed
    }

    /// Run one egui frame and tessellate its output
    pub fn run(&mut self, window: &Window, ui: impl FnMut(&egui::Context)) {
        let raw_input = self.winit_state.take_egui_input(window);
        let output = self.ctx.run(raw_input, ui);

        self.winit_state
            .handle_platform_output(window, output.platform_output);
        self.paint_jobs = self.ctx.tessellate(output.shapes, output.pixels_per_point);
        self.textures_delta.append(output.textures_delta);
    }

    /// Record the tessellated overlay into `target`
    pub fn render(&mut self, backend: &mut WgpuBackend, target: TextureViewHandle, width: u32, height: u32) {
        let screen = ScreenDescriptor {
            size_in_pixels: [width, height],
            pixels_per_point: self.ctx.pixels_per_point(),
        };

        let (device, queue, encoder) = backend.device_queue_encoder();
        for (id, delta) in &self.textures_delta.set {
            self.renderer.update_texture(device, queue, *id, delta);
        }
        if let Some(encoder) = encoder {
            self.renderer
                .update_buffers(device, queue, encoder, &self.paint_jobs, &screen);
        }

        backend.render_egui(&self.renderer, &self.paint_jobs, &screen, target);

        for id in &self.textures_delta.free {
            self.renderer.free_texture(id);
        }
        self.textures_delta = egui::TexturesDelta::default();
    }

    pub fn context(&self) -> &egui::Context {
        &self.ctx
    }
}
