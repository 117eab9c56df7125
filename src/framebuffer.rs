// src/framebuffer.rs

//! Pixel buffer lifecycle: allocate device memory, register it as a display
//! object, map it, and release everything in reverse on teardown.
//!
//! Creation uses disarm-able guards so that a failure at any sub-step
//! releases exactly what was already acquired in that call; the caller never
//! sees a partially constructed buffer.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::device::{DeviceError, DeviceResult, KmsDevice, MappedPixels};

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    a as u32 | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
}

/// Pixel memory layout, fixed at display-object registration. Addressing a
/// buffer with a different format than it was registered with is a caller
/// error this module does not detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 24 bpp, byte order R, G, B ("BG24").
    Bgr888,
    /// 32 bpp, byte order B, G, R, X ("XR24").
    Xrgb8888,
}

impl PixelFormat {
    pub fn fourcc(self) -> u32 {
        match self {
            Self::Bgr888 => fourcc(b'B', b'G', b'2', b'4'),
            Self::Xrgb8888 => fourcc(b'X', b'R', b'2', b'4'),
        }
    }

    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Bgr888 => 24,
            Self::Xrgb8888 => 32,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        self.bits_per_pixel() / 8
    }

    /// Writes one pixel in this format's byte order. `px` must hold exactly
    /// `bytes_per_pixel` bytes.
    pub fn write_pixel(self, px: &mut [u8], rgb: [u8; 3]) {
        let [r, g, b] = rgb;
        match self {
            Self::Bgr888 => {
                px[0] = r;
                px[1] = g;
                px[2] = b;
            }
            Self::Xrgb8888 => {
                px[0] = b;
                px[1] = g;
                px[2] = r;
                px[3] = 0;
            }
        }
    }
}

/// An owned, mapped pixel buffer registered for scan-out.
///
/// Addressing contract: pixel (x, y) lives at `y * pitch + x * bytes_per_pixel`
/// in [`Self::pixels_mut`]; the pitch may exceed `width * bytes_per_pixel`.
#[derive(Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    handle: u32,
    fb_id: u32,
    pitch: u32,
    size: u64,
    map: MappedPixels,
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn fb_id(&self) -> u32 {
        self.fb_id
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.map.as_mut_slice()
    }
}

/// Releases a dumb buffer handle unless disarmed.
struct DumbGuard<'a, D: KmsDevice> {
    dev: &'a D,
    handle: Option<u32>,
}

impl<D: KmsDevice> DumbGuard<'_, D> {
    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl<D: KmsDevice> Drop for DumbGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.dev.destroy_dumb(handle) {
                warn!("rollback: {}", e);
            }
        }
    }
}

/// Deregisters a display object unless disarmed.
struct FbGuard<'a, D: KmsDevice> {
    dev: &'a D,
    fb_id: Option<u32>,
}

impl<D: KmsDevice> FbGuard<'_, D> {
    fn disarm(&mut self) {
        self.fb_id = None;
    }
}

impl<D: KmsDevice> Drop for FbGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(fb_id) = self.fb_id.take() {
            if let Err(e) = self.dev.remove_framebuffer(fb_id) {
                warn!("rollback: {}", e);
            }
        }
    }
}

/// Owns the create/map/destroy lifecycle of pixel buffers in one format.
pub struct FramebufferManager<'a, D: KmsDevice> {
    dev: &'a D,
    format: PixelFormat,
}

impl<'a, D: KmsDevice> FramebufferManager<'a, D> {
    pub fn new(dev: &'a D, format: PixelFormat) -> Self {
        Self { dev, format }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Allocates, registers and maps a buffer, filling it with 0xFF (solid
    /// white in both supported formats) so the first commit shows a defined
    /// picture. On a sub-step failure everything acquired so far in this
    /// call is released in reverse order before the error is returned.
    pub fn create(&self, width: u32, height: u32) -> DeviceResult<PixelBuffer> {
        let dumb = self
            .dev
            .create_dumb(width, height, self.format.bits_per_pixel())?;
        let mut dumb_guard = DumbGuard {
            dev: self.dev,
            handle: Some(dumb.handle),
        };

        let fb_id = self
            .dev
            .add_framebuffer(width, height, self.format, dumb.handle, dumb.pitch)?;
        let mut fb_guard = FbGuard {
            dev: self.dev,
            fb_id: Some(fb_id),
        };

        let mut map = self.dev.map_dumb(dumb.handle, dumb.size)?;
        map.as_mut_slice().fill(0xff);

        fb_guard.disarm();
        dumb_guard.disarm();
        debug!(
            "created {}x{} buffer: handle {} fb {} pitch {} size {}",
            width, height, dumb.handle, fb_id, dumb.pitch, dumb.size
        );

        Ok(PixelBuffer {
            width,
            height,
            format: self.format,
            handle: dumb.handle,
            fb_id,
            pitch: dumb.pitch,
            size: dumb.size,
            map,
        })
    }

    /// Unmaps, deregisters and frees the buffer. Every sub-step is attempted
    /// even if an earlier one fails; failures are appended to `failures`.
    pub fn destroy(&self, buffer: PixelBuffer, failures: &mut Vec<DeviceError>) {
        let PixelBuffer {
            handle, fb_id, map, ..
        } = buffer;
        if let Err(e) = self.dev.unmap(map) {
            warn!("teardown: {}", e);
            failures.push(e);
        }
        if let Err(e) = self.dev.remove_framebuffer(fb_id) {
            warn!("teardown: {}", e);
            failures.push(e);
        }
        if let Err(e) = self.dev.destroy_dumb(handle) {
            warn!("teardown: {}", e);
            failures.push(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockDevice, Op};

    #[test_log::test]
    fn create_maps_and_fills_white() {
        let dev = MockDevice::new();
        let manager = FramebufferManager::new(&dev, PixelFormat::Bgr888);

        let mut buffer = manager.create(640, 480).unwrap();
        assert!(buffer.pitch() >= 640 * 3);
        assert_eq!(buffer.size(), buffer.pitch() as u64 * 480);
        assert!(buffer.pixels_mut().iter().all(|&b| b == 0xff));

        let mut failures = Vec::new();
        manager.destroy(buffer, &mut failures);
        assert!(failures.is_empty());
        assert_eq!(dev.live_dumb_count(), 0);
        assert_eq!(dev.live_framebuffer_count(), 0);
        assert_eq!(dev.live_mapping_count(), 0);
    }

    #[test_log::test]
    fn registration_failure_releases_the_dumb_buffer() {
        let dev = MockDevice::new().fail_add_framebuffer();
        let manager = FramebufferManager::new(&dev, PixelFormat::Bgr888);

        assert!(manager.create(640, 480).is_err());
        assert_eq!(dev.live_dumb_count(), 0);
        assert_eq!(dev.live_mapping_count(), 0);
        let journal = dev.journal();
        assert!(matches!(journal.last(), Some(Op::DestroyDumb { .. })));
    }

    #[test_log::test]
    fn map_failure_releases_object_then_memory() {
        let dev = MockDevice::new().fail_map_dumb();
        let manager = FramebufferManager::new(&dev, PixelFormat::Xrgb8888);

        assert!(manager.create(640, 480).is_err());
        assert_eq!(dev.live_dumb_count(), 0);
        assert_eq!(dev.live_framebuffer_count(), 0);
        let journal = dev.journal();
        let n = journal.len();
        assert!(matches!(journal[n - 2], Op::RemoveFramebuffer { .. }));
        assert!(matches!(journal[n - 1], Op::DestroyDumb { .. }));
    }

    #[test_log::test]
    fn format_parameters() {
        assert_eq!(PixelFormat::Bgr888.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Xrgb8888.bytes_per_pixel(), 4);
        // "BG24" / "XR24" little-endian fourcc codes.
        assert_eq!(PixelFormat::Bgr888.fourcc(), 0x3432_4742);
        assert_eq!(PixelFormat::Xrgb8888.fourcc(), 0x3432_5258);

        let mut px = [0u8; 3];
        PixelFormat::Bgr888.write_pixel(&mut px, [1, 2, 3]);
        assert_eq!(px, [1, 2, 3]);

        let mut px = [0xffu8; 4];
        PixelFormat::Xrgb8888.write_pixel(&mut px, [1, 2, 3]);
        assert_eq!(px, [3, 2, 1, 0]);
    }
}
