// SPDX-License-Identifier: CEPL-1.0
//! Geometry and composition pipelines.

use crate::context::Device;
use crate::handle::Owned;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use kiln_render::shader::{parse_spirv, read_shader_blob};
use kiln_render::{TransformMode, Vertex};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const MESH_PUSH_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh_push.vert.spv"));
const MESH_DYNAMIC_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh_dynamic.vert.spv"));
const MESH_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));
const COMPOSE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/compose.vert.spv"));
const COMPOSE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/compose.frag.spv"));

/// A SPIR-V blob known by file stem, built into the binary.
#[derive(Clone, Copy, Debug)]
pub struct ShaderBlob {
    pub name: &'static str,
    embedded: &'static [u8],
}

pub fn mesh_shaders(mode: TransformMode) -> [ShaderBlob; 2] {
    let vert = match mode {
        TransformMode::PushConstant => ShaderBlob {
            name: "mesh_push.vert",
            embedded: MESH_PUSH_VERT,
        },
        TransformMode::DynamicUniform => ShaderBlob {
            name: "mesh_dynamic.vert",
            embedded: MESH_DYNAMIC_VERT,
        },
    };
    [
        vert,
        ShaderBlob {
            name: "mesh.frag",
            embedded: MESH_FRAG,
        },
    ]
}

pub fn compose_shaders() -> [ShaderBlob; 2] {
    [
        ShaderBlob {
            name: "compose.vert",
            embedded: COMPOSE_VERT,
        },
        ShaderBlob {
            name: "compose.frag",
            embedded: COMPOSE_FRAG,
        },
    ]
}

/// Words for `blob`: `<dir>/<name>.spv` when a directory is configured, else the built-in copy.
pub fn shader_words(blob: ShaderBlob, dir: Option<&Path>) -> Result<Vec<u32>> {
    match dir {
        Some(dir) => Ok(read_shader_blob(&dir.join(format!("{}.spv", blob.name)))?),
        None => parse_spirv(blob.embedded).map_err(|reason| anyhow!("built-in {}: {reason}", blob.name)),
    }
}

fn shader_module(device: &Arc<Device>, blob: ShaderBlob, dir: Option<&Path>) -> Result<Owned<vk::ShaderModule>> {
    let words = shader_words(blob, dir)?;
    let info = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: words.len() * 4,
        p_code: words.as_ptr(),
        ..Default::default()
    };
    let raw = unsafe { device.create_shader_module(&info, None) }
        .with_context(|| format!("create_shader_module({})", blob.name))?;
    Ok(Owned::new(device, raw))
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: Vertex::STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        (0, vk::Format::R32G32B32_SFLOAT, Vertex::POS_OFFSET),
        (1, vk::Format::R32G32B32_SFLOAT, Vertex::COL_OFFSET),
        (2, vk::Format::R32G32_SFLOAT, Vertex::TEX_OFFSET),
    ]
    .map(|(location, format, offset)| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset,
    })
}

/// Colour blends over what is there; alpha is replaced.
pub fn geometry_blend() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    }
}

pub fn compose_blend() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        color_write_mask: vk::ColorComponentFlags::RGBA,
        ..Default::default()
    }
}

pub struct GraphicsPipeline {
    raw: Owned<vk::Pipeline>,
    layout: Owned<vk::PipelineLayout>,
}

impl GraphicsPipeline {
    pub fn raw(&self) -> vk::Pipeline {
        self.raw.raw()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.raw()
    }
}

/// Fixed-function state that differs between the two pipelines.
struct Stage<'a> {
    shaders: [ShaderBlob; 2],
    vertex_input: bool,
    cull: vk::CullModeFlags,
    depth: bool,
    blend: vk::PipelineColorBlendAttachmentState,
    set_layouts: &'a [vk::DescriptorSetLayout],
    push_ranges: &'a [vk::PushConstantRange],
    subpass: u32,
}

pub struct PipelineBuilder<'a> {
    device: &'a Arc<Device>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    shader_dir: Option<&'a Path>,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(
        device: &'a Arc<Device>,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        shader_dir: Option<&'a Path>,
    ) -> Self {
        Self {
            device,
            render_pass,
            extent,
            shader_dir,
        }
    }

    /// Subpass 0: meshes into the depth-tested colour target.
    pub fn geometry(
        &self,
        mode: TransformMode,
        set_layouts: &[vk::DescriptorSetLayout],
        push_ranges: &[vk::PushConstantRange],
    ) -> Result<GraphicsPipeline> {
        self.build(Stage {
            shaders: mesh_shaders(mode),
            vertex_input: true,
            cull: vk::CullModeFlags::BACK,
            depth: true,
            blend: geometry_blend(),
            set_layouts,
            push_ranges,
            subpass: 0,
        })
    }

    /// Subpass 1: fullscreen triangle reading the input attachments.
    pub fn composition(&self, input_layout: vk::DescriptorSetLayout) -> Result<GraphicsPipeline> {
        self.build(Stage {
            shaders: compose_shaders(),
            vertex_input: false,
            cull: vk::CullModeFlags::NONE,
            depth: false,
            blend: compose_blend(),
            set_layouts: std::slice::from_ref(&input_layout),
            push_ranges: &[],
            subpass: 1,
        })
    }

    fn build(&self, stage: Stage<'_>) -> Result<GraphicsPipeline> {
        let device = self.device;
        let [vs_blob, fs_blob] = stage.shaders;
        // Modules only need to outlive pipeline creation
        let vs = shader_module(device, vs_blob, self.shader_dir)?;
        let fs = shader_module(device, fs_blob, self.shader_dir)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.raw(),
                p_name: c"main".as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.raw(),
                p_name: c"main".as_ptr(),
                ..Default::default()
            },
        ];

        let binding = vertex_binding();
        let attributes = vertex_attributes();
        let vertex_input = if stage.vertex_input {
            vk::PipelineVertexInputStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
                vertex_binding_description_count: 1,
                p_vertex_binding_descriptions: &binding,
                vertex_attribute_description_count: attributes.len() as u32,
                p_vertex_attribute_descriptions: attributes.as_ptr(),
                ..Default::default()
            }
        } else {
            vk::PipelineVertexInputStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
                ..Default::default()
            }
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };

        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            depth_clamp_enable: vk::FALSE,
            rasterizer_discard_enable: vk::FALSE,
            polygon_mode: vk::PolygonMode::FILL,
            line_width: 1.0,
            cull_mode: stage.cull,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: vk::FALSE,
            ..Default::default()
        };

        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            sample_shading_enable: vk::FALSE,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };

        let blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            logic_op_enable: vk::FALSE,
            attachment_count: 1,
            p_attachments: &stage.blend,
            ..Default::default()
        };

        let depth_flag: vk::Bool32 = stage.depth.into();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: depth_flag,
            depth_write_enable: depth_flag,
            depth_compare_op: vk::CompareOp::LESS,
            depth_bounds_test_enable: vk::FALSE,
            stencil_test_enable: vk::FALSE,
            ..Default::default()
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: stage.set_layouts.len() as u32,
            p_set_layouts: stage.set_layouts.as_ptr(),
            push_constant_range_count: stage.push_ranges.len() as u32,
            p_push_constant_ranges: stage.push_ranges.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .context("create_pipeline_layout")?;
        let layout = Owned::new(device, layout);

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &blend,
            layout: layout.raw(),
            render_pass: self.render_pass,
            subpass: stage.subpass,
            base_pipeline_handle: vk::Pipeline::null(),
            base_pipeline_index: -1,
            ..Default::default()
        };
        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
        }
        .map_err(|(_, e)| e)
        .with_context(|| format!("create_graphics_pipelines(subpass {})", stage.subpass))?;

        debug!(
            "vk: pipeline for subpass {} ({} + {})",
            stage.subpass, vs_blob.name, fs_blob.name
        );
        Ok(GraphicsPipeline {
            raw: Owned::new(device, pipelines[0]),
            layout,
        })
    }
}
