// src/device/mod.rs

//! Kernel-facing seam for the display subsystem.
//!
//! Everything above this module manipulates display state exclusively through
//! the [`KmsDevice`] trait, so the allocation and lifecycle logic can be
//! exercised against [`mock::MockDevice`] while production runs on
//! [`drm::DrmDevice`]. The trait mirrors the mode-setting operations the
//! kernel exposes, one method per ioctl-level concern.

pub mod drm;
mod ioctl;
pub mod mock;

use std::fmt;
use std::ptr::NonNull;

use nix::errno::Errno;

use crate::framebuffer::PixelFormat;
use crate::mode::TimingMode;

/// Identifier lists reported by the one-shot resource query.
#[derive(Debug, Clone, Default)]
pub struct ResourceIds {
    pub framebuffers: Vec<u32>,
    pub crtcs: Vec<u32>,
    pub connectors: Vec<u32>,
    pub encoders: Vec<u32>,
}

/// A connector as the kernel reports it.
#[derive(Debug, Clone)]
pub struct ConnectorState {
    pub id: u32,
    /// Kernel connector-type code (VGA, HDMI-A, ...).
    pub kind_code: u32,
    /// Instance index within the type, used for the display name.
    pub kind_index: u32,
    pub connected: bool,
    /// Encoder currently driving this connector, 0 if none.
    pub current_encoder: u32,
    /// Supported modes, highest priority first.
    pub modes: Vec<TimingMode>,
    /// Encoders this connector can be driven by.
    pub encoders: Vec<u32>,
}

/// An encoder as the kernel reports it.
#[derive(Debug, Clone, Copy)]
pub struct EncoderState {
    pub id: u32,
    pub kind_code: u32,
    /// CRTC currently feeding this encoder, 0 if none.
    pub crtc_id: u32,
    /// Bitmask of CRTC indices this encoder can be driven by.
    pub possible_crtcs: u32,
}

/// Current configuration of one CRTC.
#[derive(Debug, Clone)]
pub struct CrtcState {
    pub id: u32,
    /// Display object currently scanned out, 0 if none.
    pub buffer_id: u32,
    pub x: u32,
    pub y: u32,
    pub gamma_size: u32,
    /// Mode currently programmed, `None` when the CRTC is unbound.
    pub mode: Option<TimingMode>,
}

/// A plane as the kernel reports it. Consumed by the inventory report only.
#[derive(Debug, Clone)]
pub struct PlaneState {
    pub id: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub possible_crtcs: u32,
    pub gamma_size: u32,
    /// Supported fourcc format codes.
    pub formats: Vec<u32>,
}

/// Handle, pitch and size of a freshly created dumb buffer.
#[derive(Debug, Clone, Copy)]
pub struct DumbBuffer {
    pub handle: u32,
    /// Bytes per scanline; may exceed `width * bytes_per_pixel`.
    pub pitch: u32,
    pub size: u64,
}

/// A process-visible mapping of a dumb buffer.
///
/// Valid only while the owning device handle is open and until passed back
/// to [`KmsDevice::unmap`]. Not `Send`: the mapping belongs to the session
/// that created it.
#[derive(Debug)]
pub struct MappedPixels {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedPixels {
    /// # Safety
    /// `ptr` must point to `len` writable bytes that stay valid until the
    /// mapping is handed back to the device that produced it.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn into_raw(self) -> (NonNull<u8>, usize) {
        (self.ptr, self.len)
    }
}

/// A failed kernel-facing operation: which one, and the OS error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError {
    pub op: &'static str,
    pub errno: Errno,
}

impl DeviceError {
    pub fn new(op: &'static str, errno: Errno) -> Self {
        Self { op, errno }
    }

    /// True when the kernel rejected the call with `EINVAL`, which for a
    /// mode-set commit means an invalid engine/mode/object combination.
    pub fn is_invalid_argument(&self) -> bool {
        self.errno == Errno::EINVAL
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.op, self.errno)
    }
}

impl std::error::Error for DeviceError {}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// The mode-setting operations this tool consumes.
///
/// Methods take `&self`: the real device is a file descriptor and the mock
/// uses interior mutability for its journal.
pub trait KmsDevice {
    /// One-shot query of connector/CRTC/encoder/framebuffer id lists.
    fn resources(&self) -> DeviceResult<ResourceIds>;

    fn connector(&self, id: u32) -> DeviceResult<ConnectorState>;

    fn encoder(&self, id: u32) -> DeviceResult<EncoderState>;

    /// Read the current configuration of a CRTC (saved-state capture).
    fn crtc(&self, id: u32) -> DeviceResult<CrtcState>;

    /// Commit a mode-set: bind `fb_id` and `mode` to the CRTC for the given
    /// connectors. `mode: None` with `fb_id == 0` and an empty connector
    /// list leaves the CRTC unbound.
    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        x: u32,
        y: u32,
        connectors: &[u32],
        mode: Option<&TimingMode>,
    ) -> DeviceResult<()>;

    /// Acquire the exclusive display-control token.
    fn acquire_master(&self) -> DeviceResult<()>;

    /// Release the exclusive display-control token.
    fn release_master(&self) -> DeviceResult<()>;

    /// Allocate CPU-writable device memory for a `width`x`height` buffer at
    /// `bpp` bits per pixel.
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> DeviceResult<DumbBuffer>;

    fn destroy_dumb(&self, handle: u32) -> DeviceResult<()>;

    /// Register a dumb buffer as a display object, returning its id.
    fn add_framebuffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        handle: u32,
        pitch: u32,
    ) -> DeviceResult<u32>;

    fn remove_framebuffer(&self, fb_id: u32) -> DeviceResult<()>;

    /// Map a dumb buffer into the process address space.
    fn map_dumb(&self, handle: u32, size: u64) -> DeviceResult<MappedPixels>;

    /// Tear down a mapping previously returned by [`Self::map_dumb`].
    fn unmap(&self, map: MappedPixels) -> DeviceResult<()>;

    /// Plane id list, for the inventory report.
    fn plane_resources(&self) -> DeviceResult<Vec<u32>>;

    fn plane(&self, id: u32) -> DeviceResult<PlaneState>;
}
