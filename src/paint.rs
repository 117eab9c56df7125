// src/paint.rs

//! Solid-color fill for a mapped pixel buffer.
//!
//! This is the external painting collaborator: it writes through the pitch
//! (never assuming `pitch == width * bytes_per_pixel`) and by convention is
//! the only writer while a session is presenting.

use crate::framebuffer::PixelBuffer;

/// Fills every visible pixel with `rgb`, leaving any pitch padding alone.
pub fn fill_solid(buffer: &mut PixelBuffer, rgb: [u8; 3]) {
    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let pitch = buffer.pitch() as usize;
    let format = buffer.format();
    let bpp = format.bytes_per_pixel() as usize;

    let pixels = buffer.pixels_mut();
    for y in 0..height {
        let row = &mut pixels[y * pitch..y * pitch + width * bpp];
        for px in row.chunks_exact_mut(bpp) {
            format.write_pixel(px, rgb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::framebuffer::{FramebufferManager, PixelFormat};

    #[test_log::test]
    fn fill_respects_pitch_and_byte_order() {
        let dev = MockDevice::new();
        let manager = FramebufferManager::new(&dev, PixelFormat::Bgr888);
        // 3 px * 3 B = 9 B rows, padded to a 64-byte pitch by the mock.
        let mut buffer = manager.create(3, 2).unwrap();
        let pitch = buffer.pitch() as usize;
        assert!(pitch > 9);

        fill_solid(&mut buffer, [10, 20, 30]);

        let pixels = buffer.pixels_mut();
        for y in 0..2 {
            for x in 0..3 {
                let at = y * pitch + x * 3;
                assert_eq!(&pixels[at..at + 3], &[10, 20, 30]);
            }
            // Padding keeps the creation fill.
            assert_eq!(pixels[y * pitch + 9], 0xff);
        }

        let mut failures = Vec::new();
        manager.destroy(buffer, &mut failures);
        assert!(failures.is_empty());
    }
}
