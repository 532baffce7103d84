//! Commands recorded between `begin_*_pass` and `end_*_pass`.
//!
//! wgpu passes borrow every resource they touch for their whole lifetime, so
//! the backend records commands against handles and replays them once the pass
//! is closed and all handles can be resolved at the same time.

use crate::backend::traits::*;
use std::ops::Range;

#[derive(Debug, Clone)]
pub(super) enum RenderCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
        offsets: Vec<u32>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

#[derive(Debug, Clone)]
pub(super) enum ComputeCommand {
    SetPipeline(ComputePipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
        offsets: Vec<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

pub(super) struct PendingRenderPass {
    pub descriptor: RenderPassDescriptor,
    pub commands: Vec<RenderCommand>,
}

pub(super) struct PendingComputePass {
    pub label: Option<String>,
    pub commands: Vec<ComputeCommand>,
}

/// The pass currently being recorded, if any.
#[derive(Default)]
pub(super) enum OpenPass {
    #[default]
    None,
    Render(PendingRenderPass),
    Compute(PendingComputePass),
}

impl OpenPass {
    pub fn record_render(&mut self, command: RenderCommand) {
        match self {
            OpenPass::Render(pass) => pass.commands.push(command),
            _ => log::warn!("Render command recorded outside a render pass: {command:?}"),
        }
    }

    pub fn record_compute(&mut self, command: ComputeCommand) {
        match self {
            OpenPass::Compute(pass) => pass.commands.push(command),
            _ => log::warn!("Compute command recorded outside a compute pass: {command:?}"),
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, OpenPass::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_pass() -> OpenPass {
        OpenPass::Render(PendingRenderPass {
            descriptor: RenderPassDescriptor {
                label: None,
                color_attachments: Vec::new(),
                depth_stencil_attachment: None,
            },
            commands: Vec::new(),
        })
    }

    #[test]
    fn test_commands_go_to_matching_pass() {
        let mut pass = render_pass();
        pass.record_render(RenderCommand::Draw {
            vertices: 0..3,
            instances: 0..1,
        });
        pass.record_compute(ComputeCommand::Dispatch { x: 1, y: 1, z: 1 });

        match pass {
            OpenPass::Render(p) => assert_eq!(p.commands.len(), 1),
            _ => panic!("expected render pass"),
        }
    }

    #[test]
    fn test_commands_without_pass_are_dropped() {
        let mut pass = OpenPass::None;
        pass.record_compute(ComputeCommand::Dispatch { x: 1, y: 1, z: 1 });
        assert!(!pass.is_open());
    }
}
