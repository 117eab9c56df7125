// src/device/mock.rs

//! In-memory [`KmsDevice`] for tests.
//!
//! The mock keeps a journal of every state-changing operation so tests can
//! assert ordering properties (reverse-mirror teardown, idempotent restore)
//! without touching hardware. Read-only queries are not journaled.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;

use nix::errno::Errno;

use super::{
    ConnectorState, CrtcState, DeviceError, DeviceResult, DumbBuffer, EncoderState, KmsDevice,
    MappedPixels, PlaneState, ResourceIds,
};
use crate::framebuffer::PixelFormat;
use crate::mode::{ModeFlags, TimingMode};

/// One state-changing operation, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    AcquireMaster,
    ReleaseMaster,
    CreateDumb { handle: u32 },
    DestroyDumb { handle: u32 },
    AddFramebuffer { fb_id: u32 },
    RemoveFramebuffer { fb_id: u32 },
    MapDumb { handle: u32 },
    Unmap,
    SetCrtc { crtc_id: u32, fb_id: u32, mode_valid: bool },
}

#[derive(Debug, Default)]
struct MockState {
    connectors: Vec<ConnectorState>,
    encoders: Vec<EncoderState>,
    crtcs: Vec<CrtcState>,
    planes: Vec<PlaneState>,
    framebuffers: Vec<u32>,

    next_handle: u32,
    next_fb_id: u32,
    master_held: bool,
    live_dumbs: Vec<u32>,
    live_fbs: Vec<u32>,
    mappings: HashMap<usize, usize>,
    journal: Vec<Op>,

    deny_master: bool,
    fail_create_dumb: bool,
    fail_add_framebuffer: bool,
    fail_map_dumb: bool,
    reject_set_crtc: Option<Errno>,
}

/// A scripted display device. Build the fixture with the `with_*` methods,
/// run the code under test, then inspect [`MockDevice::journal`] and the
/// live-resource accessors.
#[derive(Debug, Default)]
pub struct MockDevice {
    state: RefCell<MockState>,
}

/// A reasonable 1080p timing for fixtures.
pub fn test_mode() -> TimingMode {
    TimingMode {
        name: "1920x1080".to_string(),
        clock: 148_500,
        hdisplay: 1920,
        hsync_start: 2008,
        hsync_end: 2052,
        htotal: 2200,
        hskew: 0,
        vdisplay: 1080,
        vsync_start: 1084,
        vsync_end: 1089,
        vtotal: 1125,
        vscan: 1,
        vrefresh: 60,
        flags: ModeFlags::PHSYNC | ModeFlags::PVSYNC,
        kind: 0,
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(MockState {
                next_handle: 1,
                next_fb_id: 100,
                ..MockState::default()
            }),
        }
    }

    /// Adds a CRTC with no current binding.
    pub fn with_crtc(self, id: u32) -> Self {
        self.state.borrow_mut().crtcs.push(CrtcState {
            id,
            buffer_id: 0,
            x: 0,
            y: 0,
            gamma_size: 256,
            mode: None,
        });
        self
    }

    /// Adds a CRTC already scanning out `buffer_id` at the given mode.
    pub fn with_bound_crtc(self, id: u32, buffer_id: u32, mode: TimingMode) -> Self {
        self.state.borrow_mut().crtcs.push(CrtcState {
            id,
            buffer_id,
            x: 0,
            y: 0,
            gamma_size: 256,
            mode: Some(mode),
        });
        self
    }

    pub fn with_encoder(self, id: u32, possible_crtcs: u32) -> Self {
        self.state.borrow_mut().encoders.push(EncoderState {
            id,
            kind_code: 0,
            crtc_id: 0,
            possible_crtcs,
        });
        self
    }

    pub fn with_connector(
        self,
        id: u32,
        connected: bool,
        modes: Vec<TimingMode>,
        encoders: Vec<u32>,
    ) -> Self {
        self.state.borrow_mut().connectors.push(ConnectorState {
            id,
            kind_code: 11, // HDMI-A
            kind_index: 1,
            connected,
            current_encoder: 0,
            modes,
            encoders,
        });
        self
    }

    pub fn deny_master(self) -> Self {
        self.state.borrow_mut().deny_master = true;
        self
    }

    pub fn fail_create_dumb(self) -> Self {
        self.state.borrow_mut().fail_create_dumb = true;
        self
    }

    pub fn fail_add_framebuffer(self) -> Self {
        self.state.borrow_mut().fail_add_framebuffer = true;
        self
    }

    pub fn fail_map_dumb(self) -> Self {
        self.state.borrow_mut().fail_map_dumb = true;
        self
    }

    pub fn reject_set_crtc(self, errno: Errno) -> Self {
        self.state.borrow_mut().reject_set_crtc = Some(errno);
        self
    }

    pub fn journal(&self) -> Vec<Op> {
        self.state.borrow().journal.clone()
    }

    pub fn journal_len(&self) -> usize {
        self.state.borrow().journal.len()
    }

    pub fn master_held(&self) -> bool {
        self.state.borrow().master_held
    }

    pub fn live_dumb_count(&self) -> usize {
        self.state.borrow().live_dumbs.len()
    }

    pub fn live_framebuffer_count(&self) -> usize {
        self.state.borrow().live_fbs.len()
    }

    pub fn live_mapping_count(&self) -> usize {
        self.state.borrow().mappings.len()
    }

    /// Current configuration of a CRTC, as mutated by `set_crtc` calls.
    pub fn crtc_state(&self, id: u32) -> Option<CrtcState> {
        self.state.borrow().crtcs.iter().find(|c| c.id == id).cloned()
    }
}

impl KmsDevice for MockDevice {
    fn resources(&self) -> DeviceResult<ResourceIds> {
        let state = self.state.borrow();
        Ok(ResourceIds {
            framebuffers: state.framebuffers.clone(),
            crtcs: state.crtcs.iter().map(|c| c.id).collect(),
            connectors: state.connectors.iter().map(|c| c.id).collect(),
            encoders: state.encoders.iter().map(|e| e.id).collect(),
        })
    }

    fn connector(&self, id: u32) -> DeviceResult<ConnectorState> {
        self.state
            .borrow()
            .connectors
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| DeviceError::new("DRM_IOCTL_MODE_GETCONNECTOR", Errno::ENOENT))
    }

    fn encoder(&self, id: u32) -> DeviceResult<EncoderState> {
        self.state
            .borrow()
            .encoders
            .iter()
            .find(|e| e.id == id)
            .copied()
            .ok_or_else(|| DeviceError::new("DRM_IOCTL_MODE_GETENCODER", Errno::ENOENT))
    }

    fn crtc(&self, id: u32) -> DeviceResult<CrtcState> {
        self.state
            .borrow()
            .crtcs
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| DeviceError::new("DRM_IOCTL_MODE_GETCRTC", Errno::ENOENT))
    }

    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        x: u32,
        y: u32,
        _connectors: &[u32],
        mode: Option<&TimingMode>,
    ) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(errno) = state.reject_set_crtc {
            return Err(DeviceError::new("DRM_IOCTL_MODE_SETCRTC", errno));
        }
        let crtc = state
            .crtcs
            .iter_mut()
            .find(|c| c.id == crtc_id)
            .ok_or_else(|| DeviceError::new("DRM_IOCTL_MODE_SETCRTC", Errno::EINVAL))?;
        crtc.buffer_id = fb_id;
        crtc.x = x;
        crtc.y = y;
        crtc.mode = mode.cloned();
        state.journal.push(Op::SetCrtc {
            crtc_id,
            fb_id,
            mode_valid: mode.is_some(),
        });
        Ok(())
    }

    fn acquire_master(&self) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        if state.deny_master {
            return Err(DeviceError::new("DRM_IOCTL_SET_MASTER", Errno::EPERM));
        }
        state.master_held = true;
        state.journal.push(Op::AcquireMaster);
        Ok(())
    }

    fn release_master(&self) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.master_held = false;
        state.journal.push(Op::ReleaseMaster);
        Ok(())
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> DeviceResult<DumbBuffer> {
        let mut state = self.state.borrow_mut();
        if state.fail_create_dumb {
            return Err(DeviceError::new("DRM_IOCTL_MODE_CREATE_DUMB", Errno::ENOMEM));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        // 64-byte pitch alignment, like real drivers.
        let pitch = (width * bpp.div_ceil(8) + 63) & !63;
        let buffer = DumbBuffer {
            handle,
            pitch,
            size: pitch as u64 * height as u64,
        };
        state.live_dumbs.push(handle);
        state.journal.push(Op::CreateDumb { handle });
        Ok(buffer)
    }

    fn destroy_dumb(&self, handle: u32) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        let at = state
            .live_dumbs
            .iter()
            .position(|&h| h == handle)
            .ok_or_else(|| DeviceError::new("DRM_IOCTL_MODE_DESTROY_DUMB", Errno::EINVAL))?;
        state.live_dumbs.remove(at);
        state.journal.push(Op::DestroyDumb { handle });
        Ok(())
    }

    fn add_framebuffer(
        &self,
        _width: u32,
        _height: u32,
        _format: PixelFormat,
        handle: u32,
        _pitch: u32,
    ) -> DeviceResult<u32> {
        let mut state = self.state.borrow_mut();
        if state.fail_add_framebuffer {
            return Err(DeviceError::new("DRM_IOCTL_MODE_ADDFB2", Errno::EINVAL));
        }
        if !state.live_dumbs.contains(&handle) {
            return Err(DeviceError::new("DRM_IOCTL_MODE_ADDFB2", Errno::ENOENT));
        }
        let fb_id = state.next_fb_id;
        state.next_fb_id += 1;
        state.live_fbs.push(fb_id);
        state.journal.push(Op::AddFramebuffer { fb_id });
        Ok(fb_id)
    }

    fn remove_framebuffer(&self, fb_id: u32) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        let at = state
            .live_fbs
            .iter()
            .position(|&id| id == fb_id)
            .ok_or_else(|| DeviceError::new("DRM_IOCTL_MODE_RMFB", Errno::ENOENT))?;
        state.live_fbs.remove(at);
        state.journal.push(Op::RemoveFramebuffer { fb_id });
        Ok(())
    }

    fn map_dumb(&self, handle: u32, size: u64) -> DeviceResult<MappedPixels> {
        let mut state = self.state.borrow_mut();
        if state.fail_map_dumb {
            return Err(DeviceError::new("DRM_IOCTL_MODE_MAP_DUMB", Errno::ENOMEM));
        }
        if !state.live_dumbs.contains(&handle) {
            return Err(DeviceError::new("DRM_IOCTL_MODE_MAP_DUMB", Errno::ENOENT));
        }
        let len = size as usize;
        let boxed = vec![0u8; len].into_boxed_slice();
        let ptr = Box::into_raw(boxed) as *mut u8;
        state.mappings.insert(ptr as usize, len);
        state.journal.push(Op::MapDumb { handle });
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| DeviceError::new("DRM_IOCTL_MODE_MAP_DUMB", Errno::ENOMEM))?;
        Ok(unsafe { MappedPixels::from_raw(ptr, len) })
    }

    fn unmap(&self, map: MappedPixels) -> DeviceResult<()> {
        let (ptr, len) = map.into_raw();
        let mut state = self.state.borrow_mut();
        match state.mappings.remove(&(ptr.as_ptr() as usize)) {
            Some(recorded) if recorded == len => {
                let slice = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len);
                drop(unsafe { Box::from_raw(slice) });
                state.journal.push(Op::Unmap);
                Ok(())
            }
            _ => Err(DeviceError::new("munmap", Errno::EINVAL)),
        }
    }

    fn plane_resources(&self) -> DeviceResult<Vec<u32>> {
        Ok(self.state.borrow().planes.iter().map(|p| p.id).collect())
    }

    fn plane(&self, id: u32) -> DeviceResult<PlaneState> {
        self.state
            .borrow()
            .planes
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| DeviceError::new("DRM_IOCTL_MODE_GETPLANE", Errno::ENOENT))
    }
}
