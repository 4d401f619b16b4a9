// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use kiln_render::RenderSize;
use winit::dpi::LogicalSize;
use winit::window::{Window, WindowAttributes};

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;

/// Fixed-size window: the renderer never rebuilds its swapchain.
pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width, height))
        .with_resizable(false)
}

/// Current drawable size in physical pixels, never 0x0.
pub fn framebuffer_size(window: &Window) -> RenderSize {
    let size = window.inner_size();
    RenderSize {
        width: size.width.max(1),
        height: size.height.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::Size;

    #[test]
    fn window_is_not_resizable() {
        let attrs = window_attributes("kiln", DEFAULT_WIDTH, DEFAULT_HEIGHT);
        assert!(!attrs.resizable);
        assert_eq!(attrs.title, "kiln");
        match attrs.inner_size {
            Some(Size::Logical(s)) => assert_eq!((s.width, s.height), (800.0, 600.0)),
            other => panic!("unexpected inner size {other:?}"),
        }
    }
}
