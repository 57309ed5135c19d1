use crate::models::sample::PixelBuffer;

/// Stateless per-pixel color filter that strips the green channel from
/// 32-bit BGRA frames, leaving the rosy look. Operates in place; there is
/// nothing to prepare and nothing to reset between frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct RosyRenderer;

impl RosyRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Zero the green channel of every pixel. Rows may carry padding; only
    /// the first `width * 4` bytes of each row are touched.
    pub fn render_in_place(&self, frame: &mut PixelBuffer) {
        let bytes_per_row = frame.bytes_per_row as usize;
        let row_bytes = frame.width as usize * 4;

        for row in frame
            .data
            .chunks_exact_mut(bytes_per_row)
            .take(frame.height as usize)
        {
            for pixel in row[..row_bytes].chunks_exact_mut(4) {
                pixel[1] = 0; // green sits second in BGRA
            }
        }
    }
}
