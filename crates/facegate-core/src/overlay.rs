//! Drawing surface for detection feedback.

use crate::state::BoxColor;
use crate::types::BoundingBox;
use image::{GrayImage, Rgba, RgbaImage};

const BOX_LINE_WIDTH: u32 = 2;

/// Surface the driver redraws after every classified frame.
pub trait Overlay {
    fn clear(&mut self);
    fn resize(&mut self, width: u32, height: u32);
    fn draw_box(&mut self, face: &BoundingBox, color: BoxColor);
}

/// Overlay that draws nothing, for headless sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOverlay;

impl Overlay for NullOverlay {
    fn clear(&mut self) {}
    fn resize(&mut self, _width: u32, _height: u32) {}
    fn draw_box(&mut self, _face: &BoundingBox, _color: BoxColor) {}
}

/// Transparent RGBA canvas with box outlines.
#[derive(Debug, Clone)]
pub struct RasterOverlay {
    image: RgbaImage,
}

impl RasterOverlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// The frame as opaque RGBA with every drawn overlay pixel on top.
    pub fn composite(&self, frame: &GrayImage) -> RgbaImage {
        let mut out = RgbaImage::from_fn(frame.width(), frame.height(), |x, y| {
            let v = frame.get_pixel(x, y).0[0];
            Rgba([v, v, v, 255])
        });
        for (x, y, px) in self.image.enumerate_pixels() {
            if px.0[3] > 0 && x < out.width() && y < out.height() {
                out.put_pixel(x, y, *px);
            }
        }
        out
    }

    fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, px: Rgba<u8>) {
        let (w, h) = (self.image.width() as i64, self.image.height() as i64);
        for y in y0.max(0)..y1.min(h) {
            for x in x0.max(0)..x1.min(w) {
                self.image.put_pixel(x as u32, y as u32, px);
            }
        }
    }
}

impl Overlay for RasterOverlay {
    fn clear(&mut self) {
        self.image.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    fn draw_box(&mut self, face: &BoundingBox, color: BoxColor) {
        let [r, g, b] = color.rgb;
        let px = Rgba([r, g, b, 255]);
        let lw = BOX_LINE_WIDTH as i64;

        let x0 = face.x.round() as i64;
        let y0 = face.y.round() as i64;
        let x1 = (face.x + face.width).round() as i64;
        let y1 = (face.y + face.height).round() as i64;
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        self.fill_rect(x0, y0, x1, y0 + lw, px);
        self.fill_rect(x0, y1 - lw, x1, y1, px);
        self.fill_rect(x0, y0, x0 + lw, y1, px);
        self.fill_rect(x1 - lw, y0, x1, y1, px);
    }
}
