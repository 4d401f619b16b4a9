// SPDX-License-Identifier: CEPL-1.0
use crate::VkRenderer;
use anyhow::{Context, Result};
use ash::vk;
use kiln_render::PassLayout;

/// Clear values in attachment order: colour targets take `rgba`, depth clears to 1.0.
pub fn clear_values(layout: PassLayout, rgba: [f32; 4]) -> Vec<vk::ClearValue> {
    let colour = vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    };
    let depth = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    };
    match layout {
        PassLayout::Forward => vec![colour, depth],
        PassLayout::Deferred => vec![colour, colour, depth],
    }
}

impl VkRenderer {
    /// Re-record the command buffer for `image` against the current scene.
    pub(crate) fn record_commands(&self, image: usize) -> Result<()> {
        let d = &self.device;
        let cmd = self.command_buffers[image];
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("reset_command_buffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin).context("begin_command_buffer")?;

            let clears = clear_values(self.pass_layout, self.clear);
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.render_pass.raw(),
                framebuffer: self.framebuffers[image].raw(),
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.swapchain.extent(),
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

            // Subpass 0: geometry
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.geometry.raw());
            let uniform_set = self.uniforms.set(image);
            for item in self.scene.draw_items() {
                let mesh = item.mesh;
                if !mesh.is_drawable() {
                    continue;
                }
                d.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer()], &[0]);
                if let Some(index_buffer) = mesh.index_buffer() {
                    d.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
                }

                let sets = [uniform_set, self.textures.set(mesh.texture())?];
                let offset = self.strategy.dynamic_offset(item.slot);
                d.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.geometry.layout(),
                    0,
                    &sets,
                    offset.as_slice(),
                );
                if let Some(bytes) = self.strategy.push_bytes(&item.transform) {
                    d.cmd_push_constants(
                        cmd,
                        self.geometry.layout(),
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytes,
                    );
                }

                if mesh.index_buffer().is_some() {
                    d.cmd_draw_indexed(cmd, mesh.index_count(), 1, 0, 0, 0);
                } else {
                    d.cmd_draw(cmd, mesh.vertex_count(), 1, 0, 0);
                }
            }

            // Subpass 1: composition
            if let (Some(composition), Some(inputs)) = (&self.composition, &self.inputs) {
                d.cmd_next_subpass(cmd, vk::SubpassContents::INLINE);
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, composition.raw());
                d.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    composition.layout(),
                    0,
                    &[inputs.set(image)],
                    &[],
                );
                d.cmd_draw(cmd, 3, 1, 0, 0);
            }

            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd).context("end_command_buffer")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_follow_attachment_order() {
        let rgba = [0.6, 0.65, 0.4, 1.0];
        let deferred = clear_values(PassLayout::Deferred, rgba);
        assert_eq!(deferred.len(), 3);
        unsafe {
            assert_eq!(deferred[0].color.float32, rgba);
            assert_eq!(deferred[1].color.float32, rgba);
            assert_eq!(deferred[2].depth_stencil.depth, 1.0);
        }

        let forward = clear_values(PassLayout::Forward, rgba);
        assert_eq!(forward.len(), 2);
        unsafe {
            assert_eq!(forward[0].color.float32, rgba);
            assert_eq!(forward[1].depth_stencil.depth, 1.0);
        }
    }
}
