use std::{env, fs, path::PathBuf};

// Vertex layout shared by both mesh shaders (binding 0):
//   location 0: R32G32B32_SFLOAT (pos)
//   location 1: R32G32B32_SFLOAT (col)
//   location 2: R32G32_SFLOAT    (tex)
const MESH_INPUTS: &str = r#"
layout(location = 0) in vec3 pos;
layout(location = 1) in vec3 col;
layout(location = 2) in vec2 tex;

layout(set = 0, binding = 0) uniform ViewProjection {
    mat4 projection;
    mat4 view;
} vp;

layout(location = 0) out vec3 fragCol;
layout(location = 1) out vec2 fragTex;
"#;

// Model matrix from a 64-byte push constant.
const MESH_PUSH_VS: &str = r#"
layout(push_constant) uniform PushModel {
    mat4 model;
} push;

void main() {
    gl_Position = vp.projection * vp.view * push.model * vec4(pos, 1.0);
    fragCol = col;
    fragTex = tex;
}
"#;

// Model matrix from the dynamically offset slot at binding 1.
const MESH_DYNAMIC_VS: &str = r#"
layout(set = 0, binding = 1) uniform UboModel {
    mat4 model;
} ubo;

void main() {
    gl_Position = vp.projection * vp.view * ubo.model * vec4(pos, 1.0);
    fragCol = col;
    fragTex = tex;
}
"#;

// Texture slot 0 is opaque white, so untextured meshes keep their vertex colour.
const MESH_FS: &str = r#"
#version 450
layout(location = 0) in vec3 fragCol;
layout(location = 1) in vec2 fragTex;

layout(set = 1, binding = 0) uniform sampler2D textureSampler;

layout(location = 0) out vec4 outColour;

void main() {
    outColour = vec4(fragCol, 1.0) * texture(textureSampler, fragTex);
}
"#;

// Fullscreen triangle from gl_VertexIndex, no vertex buffer.
const COMPOSE_VS: &str = r#"
#version 450
const vec2 corners[3] = vec2[](vec2(3.0, -1.0), vec2(-1.0, -1.0), vec2(-1.0, 3.0));

void main() {
    gl_Position = vec4(corners[gl_VertexIndex], 0.0, 1.0);
}
"#;

// Reads subpass 0 output in place. Geometry fades slightly with distance.
const COMPOSE_FS: &str = r#"
#version 450
layout(input_attachment_index = 0, set = 0, binding = 0) uniform subpassInput inputColour;
layout(input_attachment_index = 1, set = 0, binding = 1) uniform subpassInput inputDepth;

layout(location = 0) out vec4 outColour;

void main() {
    vec4 colour = subpassLoad(inputColour);
    float depth = subpassLoad(inputDepth).r;
    float cue = depth < 1.0 ? 1.0 - 0.3 * pow(depth, 32.0) : 1.0;
    outColour = vec4(colour.rgb * cue, 1.0);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    let mesh_push_vs = format!("#version 450\n{MESH_INPUTS}{MESH_PUSH_VS}");
    let mesh_dynamic_vs = format!("#version 450\n{MESH_INPUTS}{MESH_DYNAMIC_VS}");
    let sources = [
        ("mesh_push.vert", shaderc::ShaderKind::Vertex, mesh_push_vs.as_str()),
        ("mesh_dynamic.vert", shaderc::ShaderKind::Vertex, mesh_dynamic_vs.as_str()),
        ("mesh.frag", shaderc::ShaderKind::Fragment, MESH_FS),
        ("compose.vert", shaderc::ShaderKind::Vertex, COMPOSE_VS),
        ("compose.frag", shaderc::ShaderKind::Fragment, COMPOSE_FS),
    ];

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");

    // Input attachments and push constants are core 1.0
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind, src) in sources {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {name}.spv: {e}"));
    }

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
