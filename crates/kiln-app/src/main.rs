// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kiln_core::init_tracing;
use kiln_render::{ModelId, PassLayout, Renderer, RendererConfig, TextureId, TransformMode};
use kiln_render_vk::VkRenderer;
use tracing::{debug, error, info, warn};

use kiln_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

mod demo;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config; a missing file means defaults
    #[arg(long, default_value = "kiln.toml")]
    config: PathBuf,
    /// Wavefront OBJ to load alongside the demo quads
    #[arg(long)]
    model: Option<PathBuf>,
    /// Texture file (relative to texture_dir) for the first quad
    #[arg(long)]
    texture: Option<String>,
    /// How model matrices reach the shader
    #[arg(long, value_enum)]
    transform: Option<TransformArg>,
    /// Single geometry subpass or geometry + composition
    #[arg(long, value_enum)]
    pass: Option<PassArg>,
    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,
    /// Orbit the camera around its target, degrees per second
    #[arg(long)]
    orbit: Option<f32>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransformArg {
    Push,
    Dynamic,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PassArg {
    Forward,
    Deferred,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RendererConfig,
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(_) => {
            debug!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
    }
}

/// CLI flags win over the config file.
fn apply_overrides(cfg: &mut RendererConfig, args: &Args) {
    if let Some(t) = args.transform {
        cfg.transform_mode = match t {
            TransformArg::Push => TransformMode::PushConstant,
            TransformArg::Dynamic => TransformMode::DynamicUniform,
        };
    }
    if let Some(p) = args.pass {
        cfg.pass_layout = match p {
            PassArg::Forward => PassLayout::Forward,
            PassArg::Deferred => PassLayout::Deferred,
        };
    }
}

struct App {
    // Renderer goes before the window it presents to
    renderer: Option<VkRenderer>,
    window: Option<Window>,

    cfg: RendererConfig,
    model: Option<PathBuf>,
    texture: Option<String>,
    frame_limit: Option<u64>,
    orbit: Option<f32>,
    aspect: f32,

    quads: Vec<ModelId>,
    started: Instant,
    frames: u64,
    fps_frames: u32,
    last_fps_instant: Instant,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(args: Args, cfg: RendererConfig) -> Self {
        App {
            renderer: None,
            window: None,
            cfg,
            model: args.model,
            texture: args.texture,
            frame_limit: args.frames,
            orbit: args.orbit,
            aspect: 1.0,
            quads: Vec::new(),
            started: Instant::now(),
            frames: 0,
            fps_frames: 0,
            last_fps_instant: Instant::now(),
            fatal: None,
        }
    }

    fn setup(&mut self, window: &Window) -> Result<VkRenderer> {
        let size = kiln_platform::framebuffer_size(window);
        self.aspect = size.aspect();
        let mut renderer = VkRenderer::new(window, window, size, &self.cfg).context("renderer init")?;

        let quad_texture = match &self.texture {
            Some(file) => renderer.create_texture(file)?,
            None => TextureId::DEFAULT,
        };
        for (i, quad) in demo::quads().into_iter().enumerate() {
            let textures: &[TextureId] = if i == 0 { &[quad_texture] } else { &[] };
            let quad = if i == 0 { quad.with_material(0) } else { quad };
            self.quads.push(renderer.add_model(&[quad], textures)?);
        }

        if let Some(path) = &self.model {
            let id = renderer
                .load_model(path)
                .with_context(|| format!("load_model({})", path.display()))?;
            info!("loaded {} as {:?}", path.display(), id);
        }
        info!("scene ready: {} models", renderer.model_count());
        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.fatal = Some(e);
        self.renderer = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = kiln_platform::window_attributes(
            "kiln",
            kiln_platform::DEFAULT_WIDTH,
            kiln_platform::DEFAULT_HEIGHT,
        );
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => return self.fail(event_loop, anyhow::Error::new(e).context("create_window")),
        };

        match self.setup(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => return self.fail(event_loop, e),
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        self.started = Instant::now();
        self.last_fps_instant = self.started;
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = &mut self.renderer else { return };

                let t = self.started.elapsed().as_secs_f32();
                for (&id, transform) in self.quads.iter().zip(demo::spin(t)) {
                    renderer.update_model(id, transform);
                }
                if let Some(rate) = self.orbit {
                    let vp = demo::orbit_view(&self.cfg.camera, self.aspect, rate, t);
                    renderer.set_view_projection(vp);
                }

                if let Err(e) = renderer.draw() {
                    return self.fail(event_loop, e.context("draw"));
                }
                self.frames += 1;
                self.fps_frames = self.fps_frames.saturating_add(1);

                if self.frame_limit.is_some_and(|n| self.frames >= n) {
                    info!("drew {} frames; exiting", self.frames);
                    self.renderer = None;
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.fps_frames);
            self.fps_frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config).render;
    apply_overrides(&mut cfg, &args);
    info!(
        "transform = {:?}, pass = {:?}",
        cfg.transform_mode, cfg.pass_layout
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(args, cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::try_parse_from(["kiln-app", "--transform", "dynamic", "--pass", "forward"]).unwrap();
        let mut cfg = RendererConfig::default();
        apply_overrides(&mut cfg, &args);
        assert_eq!(cfg.transform_mode, TransformMode::DynamicUniform);
        assert_eq!(cfg.pass_layout, PassLayout::Forward);
    }

    #[test]
    fn no_flags_keep_config() {
        let args = Args::try_parse_from(["kiln-app"]).unwrap();
        assert_eq!(args.config, PathBuf::from("kiln.toml"));
        assert_eq!(args.orbit, None);
        let mut cfg = RendererConfig {
            transform_mode: TransformMode::DynamicUniform,
            ..Default::default()
        };
        apply_overrides(&mut cfg, &args);
        assert_eq!(cfg.transform_mode, TransformMode::DynamicUniform);
        assert_eq!(cfg.pass_layout, PassLayout::Deferred);
    }

    #[test]
    fn orbit_flag_parses() {
        let args = Args::try_parse_from(["kiln-app", "--orbit", "30"]).unwrap();
        assert_eq!(args.orbit, Some(30.0));
    }

    #[test]
    fn render_table_parses() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [render]
            transform_mode = "dynamic_uniform"
            pass_layout = "forward"
            clear_color = [0.0, 0.0, 0.0, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.transform_mode, TransformMode::DynamicUniform);
        assert_eq!(cfg.render.pass_layout, PassLayout::Forward);
        assert_eq!(cfg.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_or_broken_file_gives_defaults() {
        let cfg = load_cfg(Path::new("/nonexistent/kiln.toml"));
        assert_eq!(cfg.render.transform_mode, TransformMode::PushConstant);

        let path = std::env::temp_dir().join(format!("kiln-app-{}.toml", std::process::id()));
        fs::write(&path, "render = 3").unwrap();
        let cfg = load_cfg(&path);
        assert_eq!(cfg.render.pass_layout, PassLayout::Deferred);
    }
}
