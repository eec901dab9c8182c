//! Grayscale frame type and the image operations a capture session needs:
//! YUYV conversion, downscaling, cropping, and box and label annotation.

use image::imageops::{self, FilterType};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use rollcall_core::BoundingBox;

/// Side of one label glyph cell, in pixels.
const GLYPH_SIZE: u32 = 8;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap an already-decoded grayscale image.
    pub fn from_image(image: GrayImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// View the frame as an image. `None` if the buffer is shorter than
    /// `width * height`.
    pub fn to_image(&self) -> Option<GrayImage> {
        let pixels = (self.width * self.height) as usize;
        let data = self.data.get(..pixels)?.to_vec();
        GrayImage::from_raw(self.width, self.height, data)
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Shrink `image` by an integer `factor` (each side divided, at least 1px).
pub fn downscale(image: &GrayImage, factor: u32) -> GrayImage {
    if factor <= 1 {
        return image.clone();
    }
    let w = (image.width() / factor).max(1);
    let h = (image.height() / factor).max(1);
    imageops::resize(image, w, h, FilterType::Triangle)
}

/// Crop `region` out of `image`, clamped to the image bounds.
///
/// The result has zero area when the region lies entirely outside the image.
pub fn crop(image: &GrayImage, region: &BoundingBox) -> GrayImage {
    let (x, y, w, h) = region.clamp_to(image.width(), image.height());
    if w == 0 || h == 0 {
        return GrayImage::new(0, 0);
    }
    imageops::crop_imm(image, x, y, w, h).to_image()
}

/// Draw a hollow rectangle outline of `region` into `image`, `thickness`
/// pixels wide, growing inwards.
pub fn draw_box(image: &mut GrayImage, region: &BoundingBox, thickness: u32, value: u8) {
    let (x, y, w, h) = region.clamp_to(image.width(), image.height());
    for inset in 0..thickness.max(1) {
        if w <= 2 * inset || h <= 2 * inset {
            break;
        }
        let rect = Rect::at((x + inset) as i32, (y + inset) as i32).of_size(w - 2 * inset, h - 2 * inset);
        draw_hollow_rect_mut(image, rect, Luma([value]));
    }
}

/// Write `text` on a filled tag sitting on top of `region`.
///
/// The tag is drawn in `value` and the glyphs in its inverse. When there is no
/// room above the region the tag goes just inside its top edge. Characters
/// outside the basic Latin set render as `?`.
pub fn draw_label(image: &mut GrayImage, region: &BoundingBox, text: &str, value: u8) {
    let (x, y, w, h) = region.clamp_to(image.width(), image.height());
    if w == 0 || h == 0 || text.is_empty() {
        return;
    }

    let tag_h = GLYPH_SIZE + 2;
    let tag_w = (text.chars().count() as u32 * GLYPH_SIZE + 2).min(image.width() - x);
    let tag_y = y.checked_sub(tag_h).unwrap_or(y);
    draw_filled_rect_mut(image, Rect::at(x as i32, tag_y as i32).of_size(tag_w, tag_h), Luma([value]));

    let ink = Luma([u8::MAX - value]);
    for (i, c) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };
        let gx = x + 1 + i as u32 * GLYPH_SIZE;
        for (row, &bits) in glyph.iter().enumerate() {
            let py = tag_y + 1 + row as u32;
            for col in 0..GLYPH_SIZE {
                let px = gx + col;
                if (bits >> col) & 1 == 1 && px < image.width() && py < image.height() {
                    image.put_pixel(px, py, ink);
                }
            }
        }
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv = vec![100, 128, 200, 128];
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 1).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_frame_image_roundtrip() {
        let image = GrayImage::from_fn(4, 3, |x, y| Luma([(x + 10 * y) as u8]));
        let frame = Frame::from_image(image.clone(), 7);
        assert_eq!((frame.width, frame.height, frame.sequence), (4, 3, 7));
        assert_eq!(frame.to_image().unwrap(), image);
    }

    #[test]
    fn test_short_buffer_has_no_image() {
        let mut frame = Frame::from_image(GrayImage::new(4, 4), 0);
        frame.data.truncate(10);
        assert!(frame.to_image().is_none());
    }

    #[test]
    fn test_downscale_quarter() {
        let image = GrayImage::from_pixel(640, 360, Luma([50]));
        let small = downscale(&image, 4);
        assert_eq!(small.dimensions(), (160, 90));
        assert_eq!(downscale(&image, 1).dimensions(), (640, 360));
        assert_eq!(downscale(&GrayImage::new(2, 2), 4).dimensions(), (1, 1));
    }

    #[test]
    fn test_crop_clamped() {
        let image = GrayImage::from_pixel(100, 50, Luma([9]));
        let c = crop(&image, &BoundingBox::new(90.0, 40.0, 30.0, 30.0));
        assert_eq!(c.dimensions(), (10, 10));
        let empty = crop(&image, &BoundingBox::new(200.0, 0.0, 10.0, 10.0));
        assert_eq!(empty.dimensions(), (0, 0));
    }

    #[test]
    fn test_draw_box_outline_only() {
        let mut image = GrayImage::new(20, 20);
        draw_box(&mut image, &BoundingBox::new(5.0, 5.0, 10.0, 10.0), 1, 255);
        assert_eq!(image.get_pixel(5, 5).0[0], 255);
        assert_eq!(image.get_pixel(14, 10).0[0], 255);
        assert_eq!(image.get_pixel(10, 10).0[0], 0);
        assert_eq!(image.get_pixel(4, 4).0[0], 0);
    }

    #[test]
    fn test_draw_box_thickness_grows_inwards() {
        let mut image = GrayImage::new(20, 20);
        draw_box(&mut image, &BoundingBox::new(5.0, 5.0, 10.0, 10.0), 2, 255);
        assert_eq!(image.get_pixel(6, 6).0[0], 255);
        assert_eq!(image.get_pixel(7, 7).0[0], 0);
        // Degenerate regions draw nothing.
        draw_box(&mut image, &BoundingBox::new(50.0, 50.0, 5.0, 5.0), 2, 255);
    }

    #[test]
    fn test_draw_label_depends_on_text() {
        let region = BoundingBox::new(4.0, 20.0, 50.0, 30.0);
        let mut alice = GrayImage::new(64, 64);
        let mut unknown = GrayImage::new(64, 64);
        draw_label(&mut alice, &region, "alice", 255);
        draw_label(&mut unknown, &region, "Unknown", 255);
        assert_ne!(alice, unknown);

        // Tag sits above the region; glyph pixels are inked in the inverse.
        assert_eq!(alice.get_pixel(4, 10).0[0], 255);
        assert!(alice.enumerate_pixels().any(|(x, y, p)| (11..19).contains(&y) && (5..44).contains(&x) && p.0[0] == 0));
        assert_eq!(alice.get_pixel(4, 30).0[0], 0);
    }

    #[test]
    fn test_draw_label_at_top_edge_goes_inside() {
        let mut image = GrayImage::new(32, 32);
        draw_label(&mut image, &BoundingBox::new(0.0, 0.0, 32.0, 32.0), "x", 255);
        assert_eq!(image.get_pixel(0, 0).0[0], 255);
        assert_eq!(image.get_pixel(0, 20).0[0], 0);
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame::from_image(GrayImage::from_pixel(2, 2, Luma([100])), 0);
        assert!((frame.avg_brightness() - 100.0).abs() < 1e-6);
    }
}
