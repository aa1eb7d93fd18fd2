//! Scanline renderer contract.
//!
//! The frame scheduler owns the decision of *whether* a frame is drawn; a
//! renderer only knows how to draw one visible line at a time into its own
//! framebuffer.
//!
//! ```text
//! FrameScheduler -> LineRenderer::render_line(0..height) -> Frame
//! ```
//!
//! `configure` is called before the first line of any frame whose visible
//! dimensions differ from the previous frame, so a renderer may reallocate
//! there and nowhere else.

use crate::types::Frame;

/// A renderer that draws one visible scanline per call.
pub trait LineRenderer: Send {
    /// Draw visible line `line` (0-based) of the current frame.
    fn render_line(&mut self, line: u32);

    /// Adopt new visible dimensions.
    fn configure(&mut self, width: u32, height: u32);

    /// Framebuffer holding the last rendered frame, if the renderer keeps one
    fn frame(&self) -> Option<&Frame> {
        None
    }

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StripeRenderer {
        frame: Frame,
        configured: u32,
    }

    impl LineRenderer for StripeRenderer {
        fn render_line(&mut self, line: u32) {
            let width = self.frame.width as usize;
            let start = line as usize * width;
            let color = if line % 2 == 0 { 0xFF00_00FF } else { 0xFFFF_FFFF };
            self.frame.pixels[start..start + width].fill(color);
        }

        fn configure(&mut self, width: u32, height: u32) {
            self.frame = Frame::new(width, height);
            self.configured += 1;
        }

        fn frame(&self) -> Option<&Frame> {
            Some(&self.frame)
        }

        fn name(&self) -> &str {
            "stripes"
        }
    }

    #[test]
    fn test_render_lines_after_configure() {
        let mut r = StripeRenderer {
            frame: Frame::new(0, 0),
            configured: 0,
        };
        r.configure(256, 224);
        for line in 0..224 {
            r.render_line(line);
        }
        let frame = r.frame().unwrap();
        assert_eq!(frame.pixels.len(), 256 * 224);
        assert_eq!(frame.pixels[0], 0xFF00_00FF);
        assert_eq!(frame.pixels[256], 0xFFFF_FFFF);
        assert_eq!(r.configured, 1);
        assert_eq!(r.name(), "stripes");
    }
}
